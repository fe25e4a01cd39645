//! Seekable byte streams backing the transcoder.
//!
//! `Stream` is a small capability interface; concrete backings are memory
//! buffers (shared, so a writer and a reader can be paired over the same
//! bytes), POSIX files, and the composing views in `extent_stream` and
//! `puff_stream`. Reads and writes transfer the whole requested range or
//! fail.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::rc::Rc;

use crate::error::{RepuffError, RepuffResult};

pub trait Stream {
    /// Fill `buf` from the current offset, advancing past it.
    fn read(&mut self, buf: &mut [u8]) -> RepuffResult<()>;
    /// Write all of `buf` at the current offset, advancing past it.
    fn write(&mut self, buf: &[u8]) -> RepuffResult<()>;
    /// Move to an absolute offset.
    fn seek(&mut self, offset: u64) -> RepuffResult<()>;
    /// Current absolute offset.
    fn offset(&self) -> u64;
    /// Total stream size in bytes.
    fn size(&self) -> RepuffResult<u64>;
    /// Release the backing; further operations fail.
    fn close(&mut self) -> RepuffResult<()>;
}

/// Byte buffer shareable between a reading and a writing stream.
pub type SharedBuffer = Rc<RefCell<Vec<u8>>>;

/// Wrap bytes for use as a stream backing.
pub fn shared_buffer(data: Vec<u8>) -> SharedBuffer {
    Rc::new(RefCell::new(data))
}

pub struct MemoryStream {
    buf: SharedBuffer,
    offset: u64,
    writable: bool,
    closed: bool,
}

impl MemoryStream {
    /// Read-only view of a buffer.
    pub fn for_read(buf: SharedBuffer) -> Self {
        Self {
            buf,
            offset: 0,
            writable: false,
            closed: false,
        }
    }

    /// Writable view; writes past the end grow the buffer.
    pub fn for_write(buf: SharedBuffer) -> Self {
        Self {
            buf,
            offset: 0,
            writable: true,
            closed: false,
        }
    }

    fn check_open(&self) -> RepuffResult<()> {
        if self.closed {
            return Err(RepuffError::stream("memory stream is closed"));
        }
        Ok(())
    }
}

impl Stream for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> RepuffResult<()> {
        self.check_open()?;
        let data = self.buf.borrow();
        let end = self.offset as usize + buf.len();
        if end > data.len() {
            return Err(RepuffError::stream("read past end of memory stream"));
        }
        buf.copy_from_slice(&data[self.offset as usize..end]);
        drop(data);
        self.offset = end as u64;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> RepuffResult<()> {
        self.check_open()?;
        if !self.writable {
            return Err(RepuffError::stream("memory stream is read-only"));
        }
        let mut data = self.buf.borrow_mut();
        let end = self.offset as usize + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[self.offset as usize..end].copy_from_slice(buf);
        drop(data);
        self.offset = end as u64;
        Ok(())
    }

    fn seek(&mut self, offset: u64) -> RepuffResult<()> {
        self.check_open()?;
        if offset > self.buf.borrow().len() as u64 {
            return Err(RepuffError::stream("seek past end of memory stream"));
        }
        self.offset = offset;
        Ok(())
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn size(&self) -> RepuffResult<u64> {
        self.check_open()?;
        Ok(self.buf.borrow().len() as u64)
    }

    fn close(&mut self) -> RepuffResult<()> {
        self.closed = true;
        Ok(())
    }
}

pub struct FileStream {
    file: Option<File>,
    offset: u64,
}

impl FileStream {
    /// Open `path` with the requested capabilities. Unlike memory streams a
    /// file allows seeking past its end.
    pub fn open<P: AsRef<Path>>(path: P, read: bool, write: bool) -> RepuffResult<Self> {
        if !read && !write {
            return Err(RepuffError::stream("file stream needs read or write"));
        }
        let file = OpenOptions::new()
            .read(read)
            .write(write)
            .open(path.as_ref())?;
        Ok(Self {
            file: Some(file),
            offset: 0,
        })
    }

    fn file(&mut self) -> RepuffResult<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| RepuffError::stream("file stream is closed"))
    }
}

impl Stream for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> RepuffResult<()> {
        let len = buf.len() as u64;
        self.file()?.read_exact(buf)?;
        self.offset += len;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> RepuffResult<()> {
        let len = buf.len() as u64;
        self.file()?.write_all(buf)?;
        self.offset += len;
        Ok(())
    }

    fn seek(&mut self, offset: u64) -> RepuffResult<()> {
        self.file()?.seek(SeekFrom::Start(offset))?;
        self.offset = offset;
        Ok(())
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn size(&self) -> RepuffResult<u64> {
        match &self.file {
            Some(file) => Ok(file.metadata()?.len()),
            None => Err(RepuffError::stream("file stream is closed")),
        }
    }

    fn close(&mut self) -> RepuffResult<()> {
        // Dropping the handle releases it even if a previous op failed.
        self.file.take();
        Ok(())
    }
}
