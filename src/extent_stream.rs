//! A view of selected byte ranges of a backing stream, presented as one
//! contiguous logical stream. The extent list defines the concatenation
//! order; zero-length extents are legal and contribute nothing.

use crate::error::{RepuffError, RepuffResult};
use crate::puff_data::ByteExtent;
use crate::stream::Stream;

pub struct ExtentStream {
    stream: Box<dyn Stream>,
    extents: Vec<ByteExtent>,
    /// Logical offset at the start of each extent, with the total size last.
    cumulative: Vec<u64>,
    offset: u64,
    writable: bool,
}

impl ExtentStream {
    pub fn for_read(stream: Box<dyn Stream>, extents: Vec<ByteExtent>) -> Self {
        Self::new(stream, extents, false)
    }

    pub fn for_write(stream: Box<dyn Stream>, extents: Vec<ByteExtent>) -> Self {
        Self::new(stream, extents, true)
    }

    fn new(stream: Box<dyn Stream>, extents: Vec<ByteExtent>, writable: bool) -> Self {
        let mut cumulative = Vec::with_capacity(extents.len() + 1);
        let mut total = 0u64;
        for extent in &extents {
            cumulative.push(total);
            total += extent.length;
        }
        cumulative.push(total);
        Self {
            stream,
            extents,
            cumulative,
            offset: 0,
            writable,
        }
    }

    fn total(&self) -> u64 {
        *self.cumulative.last().unwrap()
    }

    /// Run `op` over the backing ranges covering `len` logical bytes from
    /// the current offset.
    fn for_ranges<F>(&mut self, len: usize, mut op: F) -> RepuffResult<()>
    where
        F: FnMut(&mut dyn Stream, usize, usize) -> RepuffResult<()>,
    {
        if self.offset + len as u64 > self.total() {
            return Err(RepuffError::stream("range past end of extent stream"));
        }
        let mut idx = self
            .cumulative
            .partition_point(|&start| start <= self.offset)
            .saturating_sub(1);
        let mut done = 0usize;
        while done < len {
            while self.offset == self.cumulative[idx + 1] {
                idx += 1;
            }
            let within = self.offset - self.cumulative[idx];
            let avail = (self.extents[idx].length - within) as usize;
            let take = avail.min(len - done);
            self.stream.seek(self.extents[idx].offset + within)?;
            op(self.stream.as_mut(), done, take)?;
            self.offset += take as u64;
            done += take;
        }
        Ok(())
    }
}

impl Stream for ExtentStream {
    fn read(&mut self, buf: &mut [u8]) -> RepuffResult<()> {
        if self.writable {
            return Err(RepuffError::stream("extent stream is write-only"));
        }
        self.for_ranges(buf.len(), |stream, done, take| {
            stream.read(&mut buf[done..done + take])
        })
    }

    fn write(&mut self, buf: &[u8]) -> RepuffResult<()> {
        if !self.writable {
            return Err(RepuffError::stream("extent stream is read-only"));
        }
        self.for_ranges(buf.len(), |stream, done, take| {
            stream.write(&buf[done..done + take])
        })
    }

    fn seek(&mut self, offset: u64) -> RepuffResult<()> {
        if offset > self.total() {
            return Err(RepuffError::stream("seek past end of extent stream"));
        }
        self.offset = offset;
        Ok(())
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn size(&self) -> RepuffResult<u64> {
        Ok(self.total())
    }

    fn close(&mut self) -> RepuffResult<()> {
        self.stream.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{shared_buffer, MemoryStream};

    fn extents() -> Vec<ByteExtent> {
        vec![
            ByteExtent::new(10, 10),
            ByteExtent::new(25, 0),
            ByteExtent::new(30, 10),
        ]
    }

    #[test]
    fn reads_concatenate_extents() {
        let buf = shared_buffer((0u8..100).collect());
        let mut stream =
            ExtentStream::for_read(Box::new(MemoryStream::for_read(buf)), extents());
        assert_eq!(stream.size().unwrap(), 20);

        let mut out = vec![0u8; 20];
        stream.read(&mut out).unwrap();
        let expected: Vec<u8> = (10u8..20).chain(30..40).collect();
        assert_eq!(out, expected);

        // Random access across the extent boundary.
        stream.seek(8).unwrap();
        let mut out = [0u8; 4];
        stream.read(&mut out).unwrap();
        assert_eq!(out, [18, 19, 30, 31]);
    }

    #[test]
    fn seek_and_read_bounds() {
        let buf = shared_buffer((0u8..100).collect());
        let mut stream =
            ExtentStream::for_read(Box::new(MemoryStream::for_read(buf)), extents());
        stream.seek(20).unwrap();
        stream.read(&mut []).unwrap();
        assert!(stream.read(&mut [0u8]).is_err());
        assert!(stream.seek(21).is_err());
    }

    #[test]
    fn writes_land_in_backing_ranges() {
        let buf = shared_buffer((0u8..100).collect());
        let mut stream =
            ExtentStream::for_write(Box::new(MemoryStream::for_write(buf.clone())), extents());
        let data = vec![3u8; 20];
        stream.write(&data).unwrap();

        let backing = buf.borrow();
        for i in 0..100 {
            let in_extent = (10..20).contains(&i) || (30..40).contains(&i);
            let expected = if in_extent { 3 } else { i as u8 };
            assert_eq!(backing[i], expected, "byte {i}");
        }
    }

    #[test]
    fn writes_are_bounded_by_extent_total() {
        let buf = shared_buffer(vec![0u8; 100]);
        let mut stream =
            ExtentStream::for_write(Box::new(MemoryStream::for_write(buf)), extents());
        stream.seek(15).unwrap();
        assert!(stream.write(&[0u8; 6]).is_err());
        stream.write(&[0u8; 5]).unwrap();
    }
}
