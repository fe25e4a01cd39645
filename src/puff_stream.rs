//! Random-access puff view over a deflate backing stream.
//!
//! The stream is laid out from two parallel extent lists: the i-th deflate
//! bit extent transcodes to the i-th puff byte extent. Bits between
//! consecutive deflate extents (and before the first / after the last) are
//! raw: the gap is split at deflate byte boundaries and each chunk becomes
//! one puff byte holding the chunk's bits shifted down to bit zero.
//!
//! Reading puffs lazily, one whole extent at a time, through an LRU cache of
//! transcoded extents. Writing buffers each extent until complete, then
//! huffs it into the backing with the bit phase of the surrounding raw
//! chunks preserved.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::bit_reader::BitReader;
use crate::bit_writer::BitWriter;
use crate::error::{RepuffError, RepuffResult};
use crate::huffer::Huffer;
use crate::puff_data::{BitExtent, ByteExtent};
use crate::puff_reader::PuffReader;
use crate::puff_writer::PuffWriter;
use crate::puffer::Puffer;
use crate::stream::Stream;

/// Puff bytes needed for the raw bits in `[begin, end)`: one per deflate
/// byte the gap touches.
fn raw_chunk_count(begin: u64, end: u64) -> u64 {
    if end <= begin {
        0
    } else {
        (end - 1) / 8 - begin / 8 + 1
    }
}

enum Region {
    /// Inside the puff extent with this index.
    Puff(usize),
    /// One raw puff byte carrying the deflate bits `[start, start + len)`.
    Raw { start: u64, len: u32 },
}

enum Mode {
    Puff(Rc<Puffer>),
    Huff(Rc<Huffer>),
}

pub struct PuffStream {
    stream: Box<dyn Stream>,
    mode: Mode,
    puff_size: u64,
    deflates: Vec<BitExtent>,
    puffs: Vec<ByteExtent>,
    offset: u64,
    closed: bool,

    // Puff-on-read cache.
    max_cache_size: u64,
    cache: VecDeque<(usize, Rc<Vec<u8>>)>,
    cached_bytes: u64,

    // Huff-on-write state.
    extent_buf: Vec<u8>,
    deflate_bit_pos: u64,
    last_byte: u8,
}

impl PuffStream {
    /// A readable puff view over a deflate backing.
    pub fn for_puff(
        stream: Box<dyn Stream>,
        puffer: Rc<Puffer>,
        puff_size: u64,
        deflates: Vec<BitExtent>,
        puffs: Vec<ByteExtent>,
        max_cache_size: u64,
    ) -> RepuffResult<Self> {
        Self::new(stream, Mode::Puff(puffer), puff_size, deflates, puffs, max_cache_size)
    }

    /// A writable puff view that huffs into a deflate backing.
    pub fn for_huff(
        stream: Box<dyn Stream>,
        huffer: Rc<Huffer>,
        puff_size: u64,
        deflates: Vec<BitExtent>,
        puffs: Vec<ByteExtent>,
    ) -> RepuffResult<Self> {
        Self::new(stream, Mode::Huff(huffer), puff_size, deflates, puffs, 0)
    }

    fn new(
        stream: Box<dyn Stream>,
        mode: Mode,
        puff_size: u64,
        deflates: Vec<BitExtent>,
        puffs: Vec<ByteExtent>,
        max_cache_size: u64,
    ) -> RepuffResult<Self> {
        if deflates.len() != puffs.len() {
            return Err(RepuffError::stream("extent lists differ in length"));
        }
        let mut prev_bit = 0u64;
        let mut prev_byte = 0u64;
        for (deflate, puff) in deflates.iter().zip(&puffs) {
            if deflate.offset < prev_bit {
                return Err(RepuffError::stream("deflate extents out of order"));
            }
            // Every gap in deflate space must match its puff-space layout.
            if puff.offset != prev_byte + raw_chunk_count(prev_bit, deflate.offset) {
                return Err(RepuffError::stream("extent lists are not parallel"));
            }
            prev_bit = deflate.end();
            prev_byte = puff.end();
        }
        if prev_byte > puff_size {
            return Err(RepuffError::stream("puff extents exceed stream size"));
        }
        Ok(Self {
            stream,
            mode,
            puff_size,
            deflates,
            puffs,
            offset: 0,
            closed: false,
            max_cache_size,
            cache: VecDeque::new(),
            cached_bytes: 0,
            extent_buf: Vec::new(),
            deflate_bit_pos: 0,
            last_byte: 0,
        })
    }

    fn region_at(&self, pos: u64) -> Region {
        let idx = self.puffs.partition_point(|p| p.offset <= pos);
        if idx > 0 {
            let i = idx - 1;
            if pos < self.puffs[i].end() {
                return Region::Puff(i);
            }
        }
        let (puff_base, bit_base) = if idx == 0 {
            (0, 0)
        } else {
            (self.puffs[idx - 1].end(), self.deflates[idx - 1].end())
        };
        let next_bit = if idx < self.deflates.len() {
            self.deflates[idx].offset
        } else {
            u64::MAX
        };
        let chunk = bit_base / 8 + (pos - puff_base);
        let start = (chunk * 8).max(bit_base);
        let end = ((chunk + 1) * 8).min(next_bit);
        Region::Raw {
            start,
            len: (end - start) as u32,
        }
    }

    fn check_open(&self) -> RepuffResult<()> {
        if self.closed {
            return Err(RepuffError::stream("puff stream is closed"));
        }
        Ok(())
    }

    /// Fetch the transcoded bytes of extent `index`, through the cache.
    fn puff_extent(&mut self, index: usize) -> RepuffResult<Rc<Vec<u8>>> {
        if let Some(at) = self.cache.iter().position(|(i, _)| *i == index) {
            let entry = self.cache.remove(at).unwrap();
            let buffer = entry.1.clone();
            self.cache.push_front(entry);
            return Ok(buffer);
        }

        let puffer = match &self.mode {
            Mode::Puff(puffer) => puffer.clone(),
            Mode::Huff(_) => return Err(RepuffError::stream("stream is write-only")),
        };
        let deflate = self.deflates[index];
        let puff_len = self.puffs[index].length as usize;

        let first_byte = deflate.offset / 8;
        let last_byte = (deflate.end() + 7) / 8;
        let mut compressed = vec![0u8; (last_byte - first_byte) as usize];
        self.stream.seek(first_byte)?;
        self.stream.read(&mut compressed)?;

        let mut buffer = vec![0u8; puff_len];
        let mut reader = BitReader::new(&compressed);
        let phase = (deflate.offset % 8) as u32;
        reader.read_bits(phase)?;
        let mut writer = PuffWriter::new(&mut buffer);
        puffer.puff_deflate(&mut reader, &mut writer, None)?;
        if reader.bit_offset() - phase as u64 != deflate.length {
            return Err(RepuffError::stream("deflate extent length mismatch"));
        }
        if writer.size() != puff_len {
            return Err(RepuffError::stream("puff extent length mismatch"));
        }

        let buffer = Rc::new(buffer);
        if self.max_cache_size > 0 && puff_len as u64 <= self.max_cache_size {
            while self.cached_bytes + puff_len as u64 > self.max_cache_size {
                let (_, evicted) = self.cache.pop_back().unwrap();
                self.cached_bytes -= evicted.len() as u64;
            }
            self.cache.push_front((index, buffer.clone()));
            self.cached_bytes += puff_len as u64;
        }
        Ok(buffer)
    }

    /// Huff the completed extent `index` into the backing, preserving the
    /// bit phase carried in `last_byte`.
    fn huff_extent(&mut self, index: usize) -> RepuffResult<()> {
        let huffer = match &self.mode {
            Mode::Huff(huffer) => huffer.clone(),
            Mode::Puff(_) => return Err(RepuffError::stream("stream is read-only")),
        };
        let deflate = self.deflates[index];
        debug_assert_eq!(self.deflate_bit_pos, deflate.offset);

        let phase = (deflate.offset % 8) as u32;
        let total_bits = phase as u64 + deflate.length;
        let mut scratch = vec![0u8; ((total_bits + 7) / 8) as usize];
        let mut writer = BitWriter::new(&mut scratch);
        writer.write_bits(phase, self.last_byte as u32)?;
        let mut reader = PuffReader::new(&self.extent_buf);
        huffer.huff_deflate(&mut reader, &mut writer)?;
        if writer.bits_written() != total_bits {
            return Err(RepuffError::stream("huffed extent length mismatch"));
        }

        let full_bytes = (total_bits / 8) as usize;
        if full_bytes > 0 {
            self.stream.seek(deflate.offset / 8)?;
            self.stream.write(&scratch[..full_bytes])?;
        }
        self.last_byte = if total_bits % 8 != 0 {
            scratch[full_bytes]
        } else {
            0
        };
        self.deflate_bit_pos = deflate.end();
        self.extent_buf.clear();
        Ok(())
    }
}

impl Stream for PuffStream {
    fn read(&mut self, buf: &mut [u8]) -> RepuffResult<()> {
        self.check_open()?;
        if matches!(self.mode, Mode::Huff(_)) {
            return Err(RepuffError::stream("stream is write-only"));
        }
        if self.offset + buf.len() as u64 > self.puff_size {
            return Err(RepuffError::stream("read past end of puff stream"));
        }
        let mut done = 0;
        while done < buf.len() {
            match self.region_at(self.offset) {
                Region::Puff(index) => {
                    let extent = self.puffs[index];
                    let within = (self.offset - extent.offset) as usize;
                    let take = (extent.length as usize - within).min(buf.len() - done);
                    let bytes = self.puff_extent(index)?;
                    buf[done..done + take].copy_from_slice(&bytes[within..within + take]);
                    self.offset += take as u64;
                    done += take;
                }
                Region::Raw { start, len } => {
                    let mut byte = [0u8];
                    self.stream.seek(start / 8)?;
                    self.stream.read(&mut byte)?;
                    let mask = ((1u16 << len) - 1) as u8;
                    buf[done] = (byte[0] >> (start % 8)) & mask;
                    self.offset += 1;
                    done += 1;
                }
            }
        }
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> RepuffResult<()> {
        self.check_open()?;
        if matches!(self.mode, Mode::Puff(_)) {
            return Err(RepuffError::stream("stream is read-only"));
        }
        if self.offset + buf.len() as u64 > self.puff_size {
            return Err(RepuffError::stream("write past end of puff stream"));
        }
        let mut done = 0;
        while done < buf.len() {
            match self.region_at(self.offset) {
                Region::Puff(index) => {
                    let extent = self.puffs[index];
                    let within = (self.offset - extent.offset) as usize;
                    debug_assert_eq!(within, self.extent_buf.len());
                    let take = (extent.length as usize - within).min(buf.len() - done);
                    self.extent_buf.extend_from_slice(&buf[done..done + take]);
                    self.offset += take as u64;
                    done += take;
                    if self.extent_buf.len() == extent.length as usize {
                        self.huff_extent(index)?;
                    }
                }
                Region::Raw { start, len } => {
                    let mask = ((1u16 << len) - 1) as u8;
                    self.last_byte |= (buf[done] & mask) << (start % 8);
                    self.deflate_bit_pos = start + len as u64;
                    if self.deflate_bit_pos % 8 == 0 {
                        self.stream.seek(self.deflate_bit_pos / 8 - 1)?;
                        self.stream.write(&[self.last_byte])?;
                        self.last_byte = 0;
                    }
                    self.offset += 1;
                    done += 1;
                }
            }
        }
        // A stream that ends mid-byte inside the last extent still owes its
        // padding bits to the backing.
        if self.offset == self.puff_size && self.deflate_bit_pos % 8 != 0 {
            self.stream.seek(self.deflate_bit_pos / 8)?;
            self.stream.write(&[self.last_byte])?;
            self.last_byte = 0;
            self.deflate_bit_pos = (self.deflate_bit_pos / 8 + 1) * 8;
        }
        Ok(())
    }

    fn seek(&mut self, offset: u64) -> RepuffResult<()> {
        self.check_open()?;
        match self.mode {
            Mode::Puff(_) => {
                if offset > self.puff_size {
                    return Err(RepuffError::stream("seek past end of puff stream"));
                }
                self.offset = offset;
            }
            Mode::Huff(_) => {
                // Bitstreams are rebuilt strictly in order; only a full
                // restart is meaningful.
                if offset != 0 {
                    return Err(RepuffError::stream("huff stream only seeks to zero"));
                }
                self.offset = 0;
                self.deflate_bit_pos = 0;
                self.last_byte = 0;
                self.extent_buf.clear();
            }
        }
        Ok(())
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn size(&self) -> RepuffResult<u64> {
        Ok(self.puff_size)
    }

    fn close(&mut self) -> RepuffResult<()> {
        self.closed = true;
        self.stream.close()
    }
}

/// Compute the puff-space extent for every deflate extent of `stream`, plus
/// the total size of the resulting puff view, by transcoding each extent
/// through a counting writer.
pub fn find_puff_locations(
    stream: &mut dyn Stream,
    deflates: &[BitExtent],
) -> RepuffResult<(Vec<ByteExtent>, u64)> {
    let puffer = Puffer::new();
    let stream_bits = stream.size()? * 8;
    let mut puffs = Vec::with_capacity(deflates.len());
    let mut puff_pos = 0u64;
    let mut prev_end = 0u64;

    for deflate in deflates {
        if deflate.offset < prev_end || deflate.end() > stream_bits {
            return Err(RepuffError::stream("deflate extents out of order"));
        }
        puff_pos += raw_chunk_count(prev_end, deflate.offset);

        let first_byte = deflate.offset / 8;
        let last_byte = (deflate.end() + 7) / 8;
        let mut compressed = vec![0u8; (last_byte - first_byte) as usize];
        stream.seek(first_byte)?;
        stream.read(&mut compressed)?;

        let mut reader = BitReader::new(&compressed);
        let phase = (deflate.offset % 8) as u32;
        reader.read_bits(phase)?;
        let mut writer = PuffWriter::counting();
        puffer.puff_deflate(&mut reader, &mut writer, None)?;
        if reader.bit_offset() - phase as u64 != deflate.length {
            return Err(RepuffError::stream("deflate extent length mismatch"));
        }

        puffs.push(ByteExtent::new(puff_pos, writer.size() as u64));
        puff_pos += writer.size() as u64;
        prev_end = deflate.end();
    }
    puff_pos += raw_chunk_count(prev_end, stream_bits);
    Ok((puffs, puff_pos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{shared_buffer, MemoryStream};

    #[test]
    fn raw_chunk_counts() {
        assert_eq!(raw_chunk_count(0, 0), 0);
        assert_eq!(raw_chunk_count(36, 36), 0);
        assert_eq!(raw_chunk_count(36, 37), 1);
        assert_eq!(raw_chunk_count(55, 57), 2);
        assert_eq!(raw_chunk_count(75, 78), 1);
        assert_eq!(raw_chunk_count(114, 122), 2);
        assert_eq!(raw_chunk_count(224, 232), 1);
        assert_eq!(raw_chunk_count(0, 16), 2);
    }

    #[test]
    fn rejects_non_parallel_extents() {
        let backing = shared_buffer(vec![0u8; 8]);
        let result = PuffStream::for_puff(
            Box::new(MemoryStream::for_read(backing)),
            Rc::new(Puffer::new()),
            20,
            vec![BitExtent::new(0, 18), BitExtent::new(18, 18)],
            vec![ByteExtent::new(0, 7), ByteExtent::new(8, 7)],
            0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn locates_extents_in_simple_stream() {
        // Two adjacent fixed blocks, no gaps, one trailing padding chunk.
        let deflate = shared_buffer(vec![0x62, 0x04, 0x88, 0x11, 0x00]);
        let mut stream = MemoryStream::for_read(deflate);
        let deflates = vec![BitExtent::new(0, 18), BitExtent::new(18, 18)];
        let (puffs, size) = find_puff_locations(&mut stream, &deflates).unwrap();
        assert_eq!(puffs, vec![ByteExtent::new(0, 7), ByteExtent::new(7, 7)]);
        // 14 puff bytes plus one chunk for deflate bits [36, 40).
        assert_eq!(size, 15);
    }

    #[test]
    fn read_stitches_raw_and_puffed_regions() {
        let deflate = shared_buffer(vec![0x62, 0x04, 0x88, 0x11, 0x00]);
        let deflates = vec![BitExtent::new(0, 18), BitExtent::new(18, 18)];
        let puffs = vec![ByteExtent::new(0, 7), ByteExtent::new(7, 7)];
        let mut stream = PuffStream::for_puff(
            Box::new(MemoryStream::for_read(deflate)),
            Rc::new(Puffer::new()),
            15,
            deflates,
            puffs,
            0,
        )
        .unwrap();

        let mut out = vec![0u8; 15];
        stream.read(&mut out).unwrap();
        let expected = [
            0x00, 0x00, 0x20, 0x00, 0x01, 0xFF, 0x81, // block one
            0x00, 0x00, 0x20, 0x00, 0x01, 0xFF, 0x81, // block two
            0x00, // padding bits [36, 40)
        ];
        assert_eq!(out, expected);

        // Random access equals a slice of the full read.
        stream.seek(5).unwrap();
        let mut slice = vec![0u8; 6];
        stream.read(&mut slice).unwrap();
        assert_eq!(slice, expected[5..11]);
    }

    #[test]
    fn write_rebuilds_backing() {
        let backing = shared_buffer(Vec::new());
        let deflates = vec![BitExtent::new(0, 18), BitExtent::new(18, 18)];
        let puffs = vec![ByteExtent::new(0, 7), ByteExtent::new(7, 7)];
        let mut stream = PuffStream::for_huff(
            Box::new(MemoryStream::for_write(backing.clone())),
            Rc::new(Huffer::new()),
            15,
            deflates,
            puffs,
        )
        .unwrap();

        let puff = [
            0x00, 0x00, 0x20, 0x00, 0x01, 0xFF, 0x81, 0x00, 0x00, 0x20, 0x00, 0x01, 0xFF,
            0x81, 0x00,
        ];
        stream.write(&puff).unwrap();
        assert_eq!(*backing.borrow(), vec![0x62, 0x04, 0x88, 0x11, 0x00]);

        // Huff views only rewind to zero.
        assert!(stream.seek(3).is_err());
        stream.seek(0).unwrap();
        for &byte in &puff {
            stream.write(&[byte]).unwrap();
        }
        assert_eq!(*backing.borrow(), vec![0x62, 0x04, 0x88, 0x11, 0x00]);
    }

    #[test]
    fn cache_sizes_do_not_change_reads() {
        let deflate = shared_buffer(vec![0x62, 0x04, 0x88, 0x11, 0x00]);
        let deflates = vec![BitExtent::new(0, 18), BitExtent::new(18, 18)];
        let puffs = vec![ByteExtent::new(0, 7), ByteExtent::new(7, 7)];
        let mut outputs = Vec::new();
        for cache_size in [0u64, 7, 64] {
            let mut stream = PuffStream::for_puff(
                Box::new(MemoryStream::for_read(deflate.clone())),
                Rc::new(Puffer::new()),
                15,
                deflates.clone(),
                puffs.clone(),
                cache_size,
            )
            .unwrap();
            let mut out = vec![0u8; 15];
            stream.read(&mut out).unwrap();
            // Re-read to exercise cache hits and eviction.
            stream.seek(0).unwrap();
            let mut again = vec![0u8; 15];
            stream.read(&mut again).unwrap();
            assert_eq!(out, again);
            outputs.push(out);
        }
        assert_eq!(outputs[0], outputs[1]);
        assert_eq!(outputs[1], outputs[2]);
    }
}
