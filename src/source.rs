use std::cell::RefCell;
use std::io::{self, Read, Seek, SeekFrom};
use std::rc::Rc;

/// Shared ownership of the container's underlying reader.
///
/// The container, the embedded filesystem, every open file reader, and the
/// digest stream all read from the same handle. Rather than coordinating a
/// shared cursor, each [`SourceWindow`] keeps its own position and performs
/// an absolute seek before every read, so no positional state survives
/// across operations.
#[derive(Debug)]
pub struct SharedSource<R> {
    inner: Rc<RefCell<R>>,
}

impl<R: Read + Seek> SharedSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner: Rc::new(RefCell::new(inner)) }
    }

    /// A view of `len` bytes starting at absolute offset `base`.
    pub fn window(&self, base: u64, len: u64) -> SourceWindow<R> {
        SourceWindow { inner: self.inner.clone(), base, len, pos: 0 }
    }
}

/// A finite, seekable view into the shared reader. Cloning yields an
/// independent cursor over the same handle.
#[derive(Debug)]
pub struct SourceWindow<R> {
    inner: Rc<RefCell<R>>,
    base: u64,
    len: u64,
    pos: u64,
}

impl<R> SourceWindow<R> {
    pub fn len(&self) -> u64 {
        self.len
    }
}

impl<R> Clone for SourceWindow<R> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), base: self.base, len: self.len, pos: self.pos }
    }
}

impl<R: Read + Seek> Read for SourceWindow<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len {
            return Ok(0);
        }
        let remaining = self.len - self.pos;
        let max = buf.len().min(remaining.try_into().unwrap_or(usize::MAX));
        let mut inner = self.inner.borrow_mut();
        inner.seek(SeekFrom::Start(self.base + self.pos))?;
        let n = inner.read(&mut buf[..max])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for SourceWindow<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(p) => self.len.checked_add_signed(p),
            SeekFrom::Current(p) => self.pos.checked_add_signed(p),
        };
        match target {
            Some(p) => {
                self.pos = p;
                Ok(p)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of window",
            )),
        }
    }
}
