//! Encoder for the puff record stream.
//!
//! Record encodings, first byte first:
//!
//! - block metadata: 2-byte big-endian `len-1`, then `len` payload bytes
//!   (only ever written at a block boundary);
//! - literals, `0x00..=0x7E`: `len-1`, then `len` bytes;
//! - literals, `0x7F`: 2-byte big-endian `len-1`, then `len` bytes;
//! - length/distance, `0x80..=0xFE`: `0x80 | (len-3)`, then 2-byte
//!   big-endian `distance-1`;
//! - length/distance, `0xFF 0x00..=0x80`: `len-130`, then the distance;
//! - end of block: `0xFF 0x81`.
//!
//! Consecutive literal inserts coalesce into a single run, upgrading from
//! the small to the large form at 128 bytes. A writer constructed without a
//! buffer only counts, which is how puff sizes are discovered ahead of
//! allocation.

use crate::error::{RepuffError, RepuffResult};
use crate::puff_data::{
    PuffData, MAX_BLOCK_METADATA, MAX_DISTANCE, MAX_LITERALS, MAX_MATCH_LENGTH, MAX_SMALL_LITERALS,
    MIN_MATCH_LENGTH,
};

#[derive(PartialEq)]
enum RunState {
    Idle,
    Small,
    Large,
}

pub struct PuffWriter<'a> {
    buf: Option<&'a mut [u8]>,
    pos: usize,
    run_start: usize,
    run_len: usize,
    state: RunState,
}

impl<'a> PuffWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf: Some(buf),
            pos: 0,
            run_start: 0,
            run_len: 0,
            state: RunState::Idle,
        }
    }

    /// A writer that discards bytes and only tracks the size they would
    /// occupy.
    pub fn counting() -> PuffWriter<'static> {
        PuffWriter {
            buf: None,
            pos: 0,
            run_start: 0,
            run_len: 0,
            state: RunState::Idle,
        }
    }

    /// Bytes emitted so far, including any open literal run.
    #[inline]
    pub fn size(&self) -> usize {
        self.pos
    }

    fn put(&mut self, byte: u8) -> RepuffResult<()> {
        if let Some(buf) = &mut self.buf {
            if self.pos >= buf.len() {
                return Err(RepuffError::boundary("puff writer out of space"));
            }
            buf[self.pos] = byte;
        }
        self.pos += 1;
        Ok(())
    }

    fn put_slice(&mut self, bytes: &[u8]) -> RepuffResult<()> {
        if let Some(buf) = &mut self.buf {
            if self.pos + bytes.len() > buf.len() {
                return Err(RepuffError::boundary("puff writer out of space"));
            }
            buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        }
        self.pos += bytes.len();
        Ok(())
    }

    fn put_u16_be(&mut self, value: u16) -> RepuffResult<()> {
        self.put((value >> 8) as u8)?;
        self.put(value as u8)
    }

    /// Append a record. Literal records may be merged with neighbours; all
    /// other records seal any open run first.
    pub fn insert(&mut self, data: &PuffData) -> RepuffResult<()> {
        match *data {
            PuffData::BlockMetadata(payload) => {
                self.flush_literals()?;
                if payload.is_empty() || payload.len() > MAX_BLOCK_METADATA {
                    return Err(RepuffError::bad_puff("block metadata length out of range"));
                }
                self.put_u16_be((payload.len() - 1) as u16)?;
                self.put_slice(payload)
            }
            PuffData::Literal(byte) => self.append_literals(&[byte]),
            PuffData::Literals(bytes) => {
                if bytes.is_empty() {
                    return Err(RepuffError::bad_puff("empty literals record"));
                }
                self.append_literals(bytes)
            }
            PuffData::LenDist { length, distance } => {
                self.flush_literals()?;
                if !(MIN_MATCH_LENGTH..=MAX_MATCH_LENGTH).contains(&length) {
                    return Err(RepuffError::bad_puff("match length out of range"));
                }
                if distance < 1 || distance > MAX_DISTANCE {
                    return Err(RepuffError::bad_puff("match distance out of range"));
                }
                if length <= 129 {
                    self.put(0x80 | (length - 3) as u8)?;
                } else {
                    self.put(0xFF)?;
                    self.put((length - 130) as u8)?;
                }
                self.put_u16_be(distance - 1)
            }
            PuffData::EndOfBlock => {
                self.flush_literals()?;
                self.put(0xFF)?;
                self.put(0x81)
            }
        }
    }

    fn append_literals(&mut self, mut bytes: &[u8]) -> RepuffResult<()> {
        while !bytes.is_empty() {
            if self.state == RunState::Idle {
                self.run_start = self.pos;
                self.put(0)?; // header placeholder
                self.state = RunState::Small;
            }
            if self.state == RunState::Small
                && self.run_len + bytes.len() > MAX_SMALL_LITERALS
            {
                // Upgrade in place: shift the run to make room for the
                // 3-byte large header.
                if let Some(buf) = &mut self.buf {
                    if self.pos + 2 > buf.len() {
                        return Err(RepuffError::boundary("puff writer out of space"));
                    }
                    buf.copy_within(
                        self.run_start + 1..self.run_start + 1 + self.run_len,
                        self.run_start + 3,
                    );
                }
                self.pos += 2;
                self.state = RunState::Large;
            }
            let room = MAX_LITERALS - self.run_len;
            let take = bytes.len().min(room);
            self.put_slice(&bytes[..take])?;
            self.run_len += take;
            bytes = &bytes[take..];
            if self.run_len == MAX_LITERALS {
                self.flush_literals()?;
            }
        }
        Ok(())
    }

    /// Seal any open literal run by finalizing its header.
    pub fn flush_literals(&mut self) -> RepuffResult<()> {
        match self.state {
            RunState::Idle => {}
            RunState::Small => {
                debug_assert!(self.run_len >= 1 && self.run_len <= MAX_SMALL_LITERALS);
                if let Some(buf) = &mut self.buf {
                    buf[self.run_start] = (self.run_len - 1) as u8;
                }
            }
            RunState::Large => {
                if let Some(buf) = &mut self.buf {
                    buf[self.run_start] = 0x7F;
                    let len = (self.run_len - 1) as u16;
                    buf[self.run_start + 1] = (len >> 8) as u8;
                    buf[self.run_start + 2] = len as u8;
                }
            }
        }
        self.state = RunState::Idle;
        self.run_len = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puff_reader::PuffReader;

    #[test]
    fn coalesces_single_literals_into_a_run() {
        let mut buf = vec![0u8; 16];
        let mut pw = PuffWriter::new(&mut buf);
        pw.insert(&PuffData::BlockMetadata(&[0xA0])).unwrap();
        for byte in [0x01, 0x02, 0x03, 0x04, 0x05] {
            pw.insert(&PuffData::Literal(byte)).unwrap();
        }
        pw.insert(&PuffData::EndOfBlock).unwrap();
        let size = pw.size();
        assert_eq!(
            &buf[..size],
            &[0x00, 0x00, 0xA0, 0x04, 0x01, 0x02, 0x03, 0x04, 0x05, 0xFF, 0x81]
        );
    }

    #[test]
    fn upgrades_run_to_large_form() {
        let mut buf = vec![0u8; 600];
        let mut pw = PuffWriter::new(&mut buf);
        pw.insert(&PuffData::BlockMetadata(&[0xA0])).unwrap();
        for i in 0..300u16 {
            pw.insert(&PuffData::Literal(i as u8)).unwrap();
        }
        pw.insert(&PuffData::EndOfBlock).unwrap();
        let size = pw.size();
        // 3 metadata + 3 header + 300 literals + 2 end-of-block.
        assert_eq!(size, 308);
        assert_eq!(buf[3], 0x7F);
        assert_eq!(((buf[4] as usize) << 8 | buf[5] as usize) + 1, 300);

        let mut pr = PuffReader::new(&buf[..size]);
        pr.get_next().unwrap();
        match pr.get_next().unwrap() {
            PuffData::Literals(data) => {
                assert_eq!(data.len(), 300);
                assert_eq!(data[255], 0xFF);
                assert_eq!(data[299], (299 % 256) as u8);
            }
            other => panic!("expected literals, got {other:?}"),
        }
        assert_eq!(pr.get_next().unwrap(), PuffData::EndOfBlock);
    }

    #[test]
    fn counting_writer_sizes_match_real_writes() {
        let records = [
            PuffData::BlockMetadata(&[0xC0, 0x01, 0x02]),
            PuffData::Literals(b"abcdef"),
            PuffData::LenDist {
                length: 200,
                distance: 1,
            },
            PuffData::Literal(b'x'),
            PuffData::EndOfBlock,
        ];
        let mut counting = PuffWriter::counting();
        for record in &records {
            counting.insert(record).unwrap();
        }
        let mut buf = vec![0u8; 64];
        let mut real = PuffWriter::new(&mut buf);
        for record in &records {
            real.insert(record).unwrap();
        }
        assert_eq!(counting.size(), real.size());
    }

    #[test]
    fn len_dist_encodings() {
        let mut buf = vec![0u8; 32];
        let mut pw = PuffWriter::new(&mut buf);
        pw.insert(&PuffData::BlockMetadata(&[0xA0])).unwrap();
        pw.insert(&PuffData::LenDist {
            length: 6,
            distance: 57,
        })
        .unwrap();
        pw.insert(&PuffData::LenDist {
            length: 129,
            distance: 1,
        })
        .unwrap();
        pw.insert(&PuffData::LenDist {
            length: 130,
            distance: 32768,
        })
        .unwrap();
        pw.insert(&PuffData::EndOfBlock).unwrap();
        let size = pw.size();
        assert_eq!(
            &buf[..size],
            &[
                0x00, 0x00, 0xA0, // metadata
                0x83, 0x00, 0x38, // 6 @ 57
                0xFE, 0x00, 0x00, // 129 @ 1
                0xFF, 0x00, 0x7F, 0xFF, // 130 @ 32768
                0xFF, 0x81,
            ]
        );
    }

    #[test]
    fn rejects_out_of_range_records() {
        let mut buf = vec![0u8; 16];
        let mut pw = PuffWriter::new(&mut buf);
        assert!(pw
            .insert(&PuffData::LenDist {
                length: 2,
                distance: 1
            })
            .is_err());
        assert!(pw
            .insert(&PuffData::LenDist {
                length: 259,
                distance: 1
            })
            .is_err());
        assert!(pw
            .insert(&PuffData::LenDist {
                length: 3,
                distance: 0
            })
            .is_err());
        assert!(pw.insert(&PuffData::BlockMetadata(&[])).is_err());
    }

    #[test]
    fn reports_overflow_of_fixed_buffer() {
        let mut buf = vec![0u8; 4];
        let mut pw = PuffWriter::new(&mut buf);
        pw.insert(&PuffData::BlockMetadata(&[0xA0])).unwrap();
        assert!(pw.insert(&PuffData::Literals(b"abcdef")).is_err());
    }
}
