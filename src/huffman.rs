//! Canonical Huffman tables (RFC 1951 §3.2.2) serving both directions of the
//! transcoder: decoding symbols from a bit reader while puffing, and
//! re-emitting the exact same codes through a bit writer while huffing.
//!
//! Also owns the dynamic-header codec: reading a dynamic block header off the
//! bit stream while serializing it into block metadata, and replaying that
//! serialized state back into bits.

use crate::bit_reader::BitReader;
use crate::bit_writer::BitWriter;
use crate::error::{RepuffError, RepuffResult};

/// Longest Huffman code length used by DEFLATE.
pub const MAX_CODE_LENGTH: usize = 15;

/// Number of literal/length symbols a dynamic header may declare.
pub const MAX_LITLEN_SYMBOLS: usize = 286;

/// Number of distance symbols a dynamic header may declare.
pub const MAX_DISTANCE_SYMBOLS: usize = 30;

/// Order in which code lengths of the code-length alphabet appear in a
/// dynamic header.
const CL_PERMUTATION: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// Base match length for symbols 257..=285.
pub const LENGTH_BASES: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115,
    131, 163, 195, 227, 258,
];

/// Extra bits following the length symbol.
pub const LENGTH_EXTRA_BITS: [u32; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

/// Base distance for symbols 0..=29.
pub const DISTANCE_BASES: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];

/// Extra bits following the distance symbol.
pub const DISTANCE_EXTRA_BITS: [u32; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12,
    13, 13,
];

// Serialized code-length-RLE markers. Values 0x00..=0x0F are literal code
// lengths; the ranges below carry the repeat codes with their extra bits.
const RLE_COPY: u8 = 0x10; // code 16, repeat previous 3..=6
const RLE_ZERO_SHORT: u8 = 0x14; // code 17, 3..=10 zeros
const RLE_ZERO_LONG: u8 = 0x1C; // code 18, 11..=138 zeros
const RLE_MAX: u8 = RLE_ZERO_LONG + (138 - 11); // 0x9B

/// Symbol for a match length in `3..=258`. Length 258 always maps to symbol
/// 285, matching what every canonical encoder emits.
#[inline]
pub fn length_symbol(length: u16) -> u16 {
    debug_assert!((3..=258).contains(&length));
    let idx = LENGTH_BASES.partition_point(|&base| base <= length) - 1;
    257 + idx as u16
}

/// Symbol for a match distance in `1..=32768`.
#[inline]
pub fn distance_symbol(distance: u16) -> u16 {
    debug_assert!(distance >= 1);
    DISTANCE_BASES.partition_point(|&base| base <= distance) as u16 - 1
}

#[inline]
fn reverse_bits(code: u16, len: u8) -> u16 {
    code.reverse_bits() >> (16 - len as u32)
}

/// A canonical Huffman table over at most 288 symbols.
pub struct HuffmanTable {
    /// Codes per length, index 1..=15.
    count: [u16; MAX_CODE_LENGTH + 1],
    /// Canonical first code of each length, MSB-first value.
    first_code: [u16; MAX_CODE_LENGTH + 1],
    /// Index into `symbols` of the first code of each length.
    first_index: [u16; MAX_CODE_LENGTH + 1],
    /// Symbols ordered by (code length, symbol value).
    symbols: Vec<u16>,
    /// Per-symbol code length and bit-reversed code, ready for the LSB-first
    /// bit writer. Length 0 marks an unassigned symbol.
    encode: Vec<(u8, u16)>,
    /// Built through the single-code incomplete-table special case.
    single_code: bool,
}

impl HuffmanTable {
    /// Build the canonical table for a code-length vector.
    ///
    /// Over-subscribed vectors fail. Incomplete vectors fail unless the
    /// vector is all zeros (an empty table) or declares exactly one code of
    /// length one (the RFC 1951 single-distance-code case; observable via
    /// [`HuffmanTable::is_single_code`]).
    pub fn build(lens: &[u8]) -> RepuffResult<Self> {
        if lens.len() > 288 {
            return Err(RepuffError::bad_deflate("too many huffman symbols"));
        }
        let mut count = [0u16; MAX_CODE_LENGTH + 1];
        for &len in lens {
            if len as usize > MAX_CODE_LENGTH {
                return Err(RepuffError::bad_deflate("huffman code length exceeds 15"));
            }
            count[len as usize] += 1;
        }
        let assigned = lens.len() - count[0] as usize;
        // Unassigned symbols play no part in code construction.
        count[0] = 0;

        // Kraft check: every length level must be exactly subscribed, save
        // for the empty and single-code special cases.
        let mut left: i32 = 1;
        for len in 1..=MAX_CODE_LENGTH {
            left <<= 1;
            left -= count[len] as i32;
            if left < 0 {
                return Err(RepuffError::bad_deflate("over-subscribed huffman table"));
            }
        }
        let single_code = if left != 0 && assigned > 0 {
            if assigned == 1 && count[1] == 1 {
                true
            } else {
                return Err(RepuffError::bad_deflate("incomplete huffman table"));
            }
        } else {
            false
        };

        let mut first_code = [0u16; MAX_CODE_LENGTH + 1];
        let mut first_index = [0u16; MAX_CODE_LENGTH + 1];
        let mut next_code = [0u16; MAX_CODE_LENGTH + 1];
        let mut code = 0u16;
        let mut index = 0u16;
        for len in 1..=MAX_CODE_LENGTH {
            code = (code + count[len - 1]) << 1;
            first_code[len] = code;
            next_code[len] = code;
            first_index[len] = index;
            index += count[len];
        }

        let mut symbols = vec![0u16; assigned];
        let mut encode = vec![(0u8, 0u16); lens.len()];
        let mut filled = [0u16; MAX_CODE_LENGTH + 1];
        for (symbol, &len) in lens.iter().enumerate() {
            if len == 0 {
                continue;
            }
            let len_idx = len as usize;
            symbols[(first_index[len_idx] + filled[len_idx]) as usize] = symbol as u16;
            filled[len_idx] += 1;
            encode[symbol] = (len, reverse_bits(next_code[len_idx], len));
            next_code[len_idx] += 1;
        }

        Ok(Self {
            count,
            first_code,
            first_index,
            symbols,
            encode,
            single_code,
        })
    }

    /// Decode one symbol, consuming exactly its code length in bits.
    pub fn read_symbol(&self, br: &mut BitReader) -> RepuffResult<u16> {
        let mut code = 0u32;
        for len in 1..=MAX_CODE_LENGTH {
            br.cache_bits(1)?;
            code = (code << 1) | br.peek_bits(1);
            br.drop_bits(1);
            let count = self.count[len] as u32;
            if count > 0 {
                let first = self.first_code[len] as u32;
                if code >= first && code - first < count {
                    let idx = self.first_index[len] as u32 + (code - first);
                    return Ok(self.symbols[idx as usize]);
                }
            }
        }
        Err(RepuffError::bad_deflate("invalid huffman code"))
    }

    /// Emit the code assigned to `symbol`.
    pub fn write_symbol(&self, symbol: u16, bw: &mut BitWriter) -> RepuffResult<()> {
        match self.encode.get(symbol as usize) {
            Some(&(len, bits)) if len > 0 => bw.write_bits(len as u32, bits as u32),
            _ => Err(RepuffError::bad_puff(format!(
                "symbol {symbol} has no huffman code in this block"
            ))),
        }
    }

    #[inline]
    pub fn is_single_code(&self) -> bool {
        self.single_code
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Fixed literal/length table: 286 real symbols plus the two reserved codes
/// that complete the canonical set.
pub fn fixed_literal_length() -> HuffmanTable {
    let mut lens = [0u8; 288];
    lens[0..144].fill(8);
    lens[144..256].fill(9);
    lens[256..280].fill(7);
    lens[280..288].fill(8);
    HuffmanTable::build(&lens).expect("fixed literal/length table is canonical")
}

/// Fixed distance table: 30 real symbols plus two reserved 5-bit codes.
pub fn fixed_distance() -> HuffmanTable {
    HuffmanTable::build(&[5u8; 32]).expect("fixed distance table is canonical")
}

/// Read the dynamic header that follows the 3 block-header bits, building
/// the two decode tables and appending the serialized code-length state to
/// `out` so the huffer can replay the header bit-for-bit.
pub fn read_dynamic_header(
    br: &mut BitReader,
    out: &mut Vec<u8>,
) -> RepuffResult<(HuffmanTable, HuffmanTable)> {
    br.cache_bits(14)?;
    let hlit = br.peek_bits(5) as u8;
    br.drop_bits(5);
    let hdist = br.peek_bits(5) as u8;
    br.drop_bits(5);
    let hclen = br.peek_bits(4) as u8;
    br.drop_bits(4);

    let num_litlen = hlit as usize + 257;
    let num_distance = hdist as usize + 1;
    let num_codes = hclen as usize + 4;
    if num_litlen > MAX_LITLEN_SYMBOLS {
        return Err(RepuffError::bad_deflate("too many literal/length codes"));
    }
    if num_distance > MAX_DISTANCE_SYMBOLS {
        return Err(RepuffError::bad_deflate("too many distance codes"));
    }

    out.push(hlit);
    out.push(hdist);
    out.push(hclen);

    let mut cl_lens = [0u8; 19];
    for i in 0..num_codes {
        let len = br.read_bits(3)? as u8;
        cl_lens[CL_PERMUTATION[i]] = len;
        if i % 2 == 0 {
            out.push(len << 4);
        } else {
            *out.last_mut().unwrap() |= len;
        }
    }
    let cl_table = HuffmanTable::build(&cl_lens)?;
    if cl_table.is_empty() || cl_table.is_single_code() {
        return Err(RepuffError::bad_deflate("incomplete code-length table"));
    }

    let total = num_litlen + num_distance;
    let mut lens = vec![0u8; total];
    let mut i = 0;
    while i < total {
        let symbol = cl_table.read_symbol(br)?;
        match symbol {
            0..=15 => {
                lens[i] = symbol as u8;
                out.push(symbol as u8);
                i += 1;
            }
            16 => {
                if i == 0 {
                    return Err(RepuffError::bad_deflate("length repeat with no previous"));
                }
                let repeat = 3 + br.read_bits(2)? as usize;
                if i + repeat > total {
                    return Err(RepuffError::bad_deflate("length repeat past end"));
                }
                out.push(RLE_COPY + (repeat - 3) as u8);
                let prev = lens[i - 1];
                lens[i..i + repeat].fill(prev);
                i += repeat;
            }
            17 => {
                let repeat = 3 + br.read_bits(3)? as usize;
                if i + repeat > total {
                    return Err(RepuffError::bad_deflate("zero run past end"));
                }
                out.push(RLE_ZERO_SHORT + (repeat - 3) as u8);
                i += repeat;
            }
            18 => {
                let repeat = 11 + br.read_bits(7)? as usize;
                if i + repeat > total {
                    return Err(RepuffError::bad_deflate("zero run past end"));
                }
                out.push(RLE_ZERO_LONG + (repeat - 11) as u8);
                i += repeat;
            }
            _ => unreachable!("code-length alphabet has 19 symbols"),
        }
    }

    let litlen = HuffmanTable::build(&lens[..num_litlen])?;
    let distance = HuffmanTable::build(&lens[num_litlen..])?;
    Ok((litlen, distance))
}

/// Replay a serialized dynamic header into `bw`, reproducing the original
/// bit sequence, and rebuild the two encode tables.
pub fn write_dynamic_header(
    serialized: &[u8],
    bw: &mut BitWriter,
) -> RepuffResult<(HuffmanTable, HuffmanTable)> {
    if serialized.len() < 3 {
        return Err(RepuffError::bad_puff("truncated dynamic block metadata"));
    }
    let hlit = serialized[0];
    let hdist = serialized[1];
    let hclen = serialized[2];
    let num_litlen = hlit as usize + 257;
    let num_distance = hdist as usize + 1;
    let num_codes = hclen as usize + 4;
    if num_litlen > MAX_LITLEN_SYMBOLS || num_distance > MAX_DISTANCE_SYMBOLS || num_codes > 19 {
        return Err(RepuffError::bad_puff("dynamic block metadata counts out of range"));
    }

    bw.write_bits(5, hlit as u32)?;
    bw.write_bits(5, hdist as u32)?;
    bw.write_bits(4, hclen as u32)?;

    let nibble_bytes = (num_codes + 1) / 2;
    if serialized.len() < 3 + nibble_bytes {
        return Err(RepuffError::bad_puff("truncated code-length nibbles"));
    }
    let mut cl_lens = [0u8; 19];
    for i in 0..num_codes {
        let byte = serialized[3 + i / 2];
        let len = if i % 2 == 0 { byte >> 4 } else { byte & 0x0F };
        cl_lens[CL_PERMUTATION[i]] = len;
        bw.write_bits(3, len as u32)?;
    }
    let cl_table = HuffmanTable::build(&cl_lens)?;

    let total = num_litlen + num_distance;
    let mut lens = vec![0u8; total];
    let mut i = 0;
    let mut pos = 3 + nibble_bytes;
    while i < total {
        let marker = *serialized
            .get(pos)
            .ok_or_else(|| RepuffError::bad_puff("truncated code-length data"))?;
        pos += 1;
        if marker <= 15 {
            cl_table.write_symbol(marker as u16, bw)?;
            lens[i] = marker;
            i += 1;
        } else if marker < RLE_ZERO_SHORT {
            if i == 0 {
                return Err(RepuffError::bad_puff("length repeat with no previous"));
            }
            let repeat = (marker - RLE_COPY) as usize + 3;
            if i + repeat > total {
                return Err(RepuffError::bad_puff("length repeat past end"));
            }
            cl_table.write_symbol(16, bw)?;
            bw.write_bits(2, (repeat - 3) as u32)?;
            let prev = lens[i - 1];
            lens[i..i + repeat].fill(prev);
            i += repeat;
        } else if marker < RLE_ZERO_LONG {
            let repeat = (marker - RLE_ZERO_SHORT) as usize + 3;
            if i + repeat > total {
                return Err(RepuffError::bad_puff("zero run past end"));
            }
            cl_table.write_symbol(17, bw)?;
            bw.write_bits(3, (repeat - 3) as u32)?;
            i += repeat;
        } else if marker <= RLE_MAX {
            let repeat = (marker - RLE_ZERO_LONG) as usize + 11;
            if i + repeat > total {
                return Err(RepuffError::bad_puff("zero run past end"));
            }
            cl_table.write_symbol(18, bw)?;
            bw.write_bits(7, (repeat - 11) as u32)?;
            i += repeat;
        } else {
            return Err(RepuffError::bad_puff("invalid code-length marker"));
        }
    }
    if pos != serialized.len() {
        return Err(RepuffError::bad_puff("trailing bytes in dynamic block metadata"));
    }

    let litlen = HuffmanTable::build(&lens[..num_litlen])?;
    let distance = HuffmanTable::build(&lens[num_litlen..])?;
    Ok((litlen, distance))
}
