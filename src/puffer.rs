//! DEFLATE → puff transcoder.
//!
//! Walks deflate blocks off a bit reader and emits the equivalent puff
//! records, capturing in each block's metadata exactly what the huffer needs
//! to reproduce the original bits: the final/type bits, stored-block
//! boundary fill, and the serialized dynamic-header state.

use crate::bit_reader::BitReader;
use crate::error::{RepuffError, RepuffResult};
use crate::huffman::{
    self, fixed_distance, fixed_literal_length, read_dynamic_header, HuffmanTable,
    DISTANCE_BASES, DISTANCE_EXTRA_BITS, LENGTH_BASES, LENGTH_EXTRA_BITS,
};
use crate::puff_data::{BitExtent, BlockType, PuffData, MAX_BLOCK_METADATA};
use crate::puff_writer::PuffWriter;

pub struct Puffer {
    exclude_bad_distance_cache: bool,
    fixed_litlen: HuffmanTable,
    fixed_distance: HuffmanTable,
}

impl Puffer {
    pub fn new() -> Self {
        Self::with_exclusions(false)
    }

    /// A puffer that, while locating deflate extents, drops dynamic blocks
    /// whose distance table was declared through the single-code special
    /// case. Such blocks are left for the byte-level delta to handle.
    pub fn with_exclusions(exclude_bad_distance_cache: bool) -> Self {
        Self {
            exclude_bad_distance_cache,
            fixed_litlen: fixed_literal_length(),
            fixed_distance: fixed_distance(),
        }
    }

    /// Transcode deflate blocks from `br` into puff records on `pw`.
    ///
    /// With `deflates` present the call is in discovery mode: it records one
    /// bit extent per compressed block, consumes but does not record stored
    /// blocks (or excluded bad-distance-cache blocks), and stops after the
    /// first final-bit block. Without it, every block is emitted and parsing
    /// continues until fewer than eight bits remain.
    pub fn puff_deflate(
        &self,
        br: &mut BitReader,
        pw: &mut PuffWriter,
        mut deflates: Option<&mut Vec<BitExtent>>,
    ) -> RepuffResult<()> {
        let discovering = deflates.is_some();
        let mut metadata: Vec<u8> = Vec::with_capacity(MAX_BLOCK_METADATA);
        // Output bytes produced since the stream origin; only discovery mode
        // starts at a true origin, so only it can validate distances.
        let mut produced: u64 = 0;

        while br.bits_remaining() >= 8 {
            let block_start = br.bit_offset();
            br.cache_bits(3)?;
            let final_block = br.peek_bits(1) == 1;
            br.drop_bits(1);
            let type_bits = br.peek_bits(2) as u8;
            br.drop_bits(2);
            let block_type = BlockType::from_bits(type_bits)
                .ok_or_else(|| RepuffError::bad_deflate("invalid block type"))?;

            metadata.clear();
            metadata.push(((final_block as u8) << 7) | (type_bits << 5));

            match block_type {
                BlockType::Stored => {
                    let boundary = br.read_boundary_bits();
                    br.skip_boundary_bits();
                    br.cache_bits(32)?;
                    let len = br.peek_bits(16) as u16;
                    br.drop_bits(16);
                    let nlen = br.peek_bits(16) as u16;
                    br.drop_bits(16);
                    if len != !nlen {
                        return Err(RepuffError::bad_deflate("stored block LEN/NLEN mismatch"));
                    }
                    metadata[0] |= boundary & 0x1F;
                    let data = br.read_aligned_bytes(len as usize)?;
                    // Stored blocks are already incompressible; discovery
                    // leaves them to the byte-level delta.
                    if !discovering {
                        pw.insert(&PuffData::BlockMetadata(&metadata))?;
                        if len > 0 {
                            pw.insert(&PuffData::Literals(data))?;
                        }
                        pw.insert(&PuffData::EndOfBlock)?;
                    }
                    produced += len as u64;
                }
                BlockType::Fixed => {
                    pw.insert(&PuffData::BlockMetadata(&metadata))?;
                    self.puff_block(
                        &self.fixed_litlen,
                        &self.fixed_distance,
                        br,
                        pw,
                        true,
                        discovering,
                        &mut produced,
                    )?;
                    if let Some(list) = deflates.as_deref_mut() {
                        list.push(BitExtent::new(block_start, br.bit_offset() - block_start));
                    }
                }
                BlockType::Dynamic => {
                    let (litlen, distance) = read_dynamic_header(br, &mut metadata)?;
                    let skip = discovering
                        && self.exclude_bad_distance_cache
                        && distance.is_single_code();
                    if !skip {
                        pw.insert(&PuffData::BlockMetadata(&metadata))?;
                    }
                    self.puff_block(
                        &litlen,
                        &distance,
                        br,
                        pw,
                        !skip,
                        discovering,
                        &mut produced,
                    )?;
                    if !skip {
                        if let Some(list) = deflates.as_deref_mut() {
                            list.push(BitExtent::new(
                                block_start,
                                br.bit_offset() - block_start,
                            ));
                        }
                    }
                }
            }

            if final_block {
                if discovering {
                    break;
                }
                // A following block belongs to a fresh deflate stream.
                produced = 0;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn puff_block(
        &self,
        litlen: &HuffmanTable,
        distance: &HuffmanTable,
        br: &mut BitReader,
        pw: &mut PuffWriter,
        emit: bool,
        check_distances: bool,
        produced: &mut u64,
    ) -> RepuffResult<()> {
        loop {
            let symbol = litlen.read_symbol(br)?;
            match symbol {
                0..=255 => {
                    if emit {
                        pw.insert(&PuffData::Literal(symbol as u8))?;
                    }
                    *produced += 1;
                }
                256 => {
                    if emit {
                        pw.insert(&PuffData::EndOfBlock)?;
                    }
                    return Ok(());
                }
                257..=285 => {
                    let idx = (symbol - 257) as usize;
                    let length =
                        LENGTH_BASES[idx] + br.read_bits(LENGTH_EXTRA_BITS[idx])? as u16;
                    let dist_symbol = distance.read_symbol(br)?;
                    if dist_symbol as usize >= huffman::MAX_DISTANCE_SYMBOLS {
                        return Err(RepuffError::bad_deflate("invalid distance symbol"));
                    }
                    let didx = dist_symbol as usize;
                    let dist =
                        DISTANCE_BASES[didx] + br.read_bits(DISTANCE_EXTRA_BITS[didx])? as u16;
                    if check_distances && dist as u64 > *produced {
                        return Err(RepuffError::bad_deflate(
                            "distance reaches before start of stream",
                        ));
                    }
                    *produced += length as u64;
                    if emit {
                        pw.insert(&PuffData::LenDist {
                            length,
                            distance: dist,
                        })?;
                    }
                }
                _ => {
                    return Err(RepuffError::bad_deflate("invalid literal/length symbol"));
                }
            }
        }
    }
}

impl Default for Puffer {
    fn default() -> Self {
        Self::new()
    }
}
