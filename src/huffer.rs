//! Puff → DEFLATE transcoder.
//!
//! Consumes puff records and re-emits the original deflate bits. Huffman
//! codes are rebuilt from the code-length state captured in each block's
//! metadata, so canonical construction yields the same codes the puffer
//! decoded and the output is bit-exact, including stored-block boundary
//! fill and the zero padding of the final partial byte.

use crate::bit_writer::BitWriter;
use crate::error::{RepuffError, RepuffResult};
use crate::huffman::{
    distance_symbol, fixed_distance, fixed_literal_length, length_symbol, write_dynamic_header,
    HuffmanTable, DISTANCE_BASES, DISTANCE_EXTRA_BITS, LENGTH_BASES, LENGTH_EXTRA_BITS,
};
use crate::puff_data::{BlockType, PuffData};
use crate::puff_reader::PuffReader;

pub struct Huffer {
    fixed_litlen: HuffmanTable,
    fixed_distance: HuffmanTable,
}

impl Huffer {
    pub fn new() -> Self {
        Self {
            fixed_litlen: fixed_literal_length(),
            fixed_distance: fixed_distance(),
        }
    }

    /// Re-encode every puff block in `pr` into deflate bits on `bw`,
    /// flushing the final partial byte zero-padded.
    pub fn huff_deflate(&self, pr: &mut PuffReader, bw: &mut BitWriter) -> RepuffResult<()> {
        while pr.bytes_left() > 0 {
            let metadata = match pr.get_next()? {
                PuffData::BlockMetadata(payload) => payload,
                _ => return Err(RepuffError::bad_puff("expected block metadata")),
            };
            let first = metadata[0];
            let final_bit = (first >> 7) & 1;
            let type_bits = (first >> 5) & 0x3;
            let block_type = BlockType::from_bits(type_bits)
                .ok_or_else(|| RepuffError::bad_puff("invalid block type in metadata"))?;

            bw.write_bits(1, final_bit as u32)?;
            bw.write_bits(2, type_bits as u32)?;

            match block_type {
                BlockType::Stored => {
                    if metadata.len() != 1 {
                        return Err(RepuffError::bad_puff("malformed stored block metadata"));
                    }
                    self.huff_stored_block(first & 0x1F, pr, bw)?;
                }
                BlockType::Fixed => {
                    if metadata.len() != 1 {
                        return Err(RepuffError::bad_puff("malformed fixed block metadata"));
                    }
                    self.huff_block(&self.fixed_litlen, &self.fixed_distance, pr, bw)?;
                }
                BlockType::Dynamic => {
                    let (litlen, distance) = write_dynamic_header(&metadata[1..], bw)?;
                    self.huff_block(&litlen, &distance, pr, bw)?;
                }
            }
        }
        bw.flush()
    }

    fn huff_stored_block(
        &self,
        boundary_fill: u8,
        pr: &mut PuffReader,
        bw: &mut BitWriter,
    ) -> RepuffResult<()> {
        bw.write_boundary_bits(boundary_fill)?;
        match pr.get_next()? {
            PuffData::EndOfBlock => {
                bw.write_bits(16, 0)?;
                bw.write_bits(16, 0xFFFF)?;
                Ok(())
            }
            PuffData::Literal(byte) => {
                bw.write_bits(16, 1)?;
                bw.write_bits(16, !1u16 as u32)?;
                bw.write_bits(8, byte as u32)?;
                self.expect_end_of_block(pr)
            }
            PuffData::Literals(bytes) => {
                if bytes.len() > 0xFFFF {
                    return Err(RepuffError::bad_puff("stored block longer than 65535"));
                }
                let len = bytes.len() as u16;
                bw.write_bits(16, len as u32)?;
                bw.write_bits(16, !len as u32)?;
                for &byte in bytes {
                    bw.write_bits(8, byte as u32)?;
                }
                self.expect_end_of_block(pr)
            }
            _ => Err(RepuffError::bad_puff("unexpected record in stored block")),
        }
    }

    fn expect_end_of_block(&self, pr: &mut PuffReader) -> RepuffResult<()> {
        match pr.get_next()? {
            PuffData::EndOfBlock => Ok(()),
            _ => Err(RepuffError::bad_puff("stored block holds a single literal run")),
        }
    }

    fn huff_block(
        &self,
        litlen: &HuffmanTable,
        distance: &HuffmanTable,
        pr: &mut PuffReader,
        bw: &mut BitWriter,
    ) -> RepuffResult<()> {
        loop {
            match pr.get_next()? {
                PuffData::Literal(byte) => litlen.write_symbol(byte as u16, bw)?,
                PuffData::Literals(bytes) => {
                    for &byte in bytes {
                        litlen.write_symbol(byte as u16, bw)?;
                    }
                }
                PuffData::LenDist {
                    length,
                    distance: dist,
                } => {
                    let symbol = length_symbol(length);
                    litlen.write_symbol(symbol, bw)?;
                    let idx = (symbol - 257) as usize;
                    bw.write_bits(LENGTH_EXTRA_BITS[idx], (length - LENGTH_BASES[idx]) as u32)?;

                    let dist_sym = distance_symbol(dist);
                    distance.write_symbol(dist_sym, bw)?;
                    let didx = dist_sym as usize;
                    bw.write_bits(DISTANCE_EXTRA_BITS[didx], (dist - DISTANCE_BASES[didx]) as u32)?;
                }
                PuffData::EndOfBlock => {
                    litlen.write_symbol(256, bw)?;
                    return Ok(());
                }
                PuffData::BlockMetadata(_) => {
                    return Err(RepuffError::bad_puff("unexpected metadata inside block"));
                }
            }
        }
    }
}

impl Default for Huffer {
    fn default() -> Self {
        Self::new()
    }
}
