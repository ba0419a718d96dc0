use std::collections::VecDeque;
use std::io::{self, Read};

/// Wraps another reader and substitutes zero bytes for configured ranges.
///
/// The signature-bearing ELF sections must be hashed as if they were all
/// zeros, not omitted: the emitted stream has exactly the same length as the
/// source and every byte outside the configured ranges is passed through
/// untouched.
///
/// Ranges are sorted once at construction and must not overlap. The reader
/// moves between three states: passing bytes through, truncating a read that
/// would cross into a skip, and replaying zeros while draining the source.
pub struct SkipReader<R> {
    inner: R,
    skips: VecDeque<Skip>,
    pos: u64,
    zeros_pending: u64,
}

#[derive(Debug, Clone, Copy)]
struct Skip {
    start: u64,
    len: u64,
}

impl<R: Read> SkipReader<R> {
    pub fn new(inner: R, ranges: &[(u64, u64)]) -> Self {
        let mut skips: Vec<Skip> = ranges
            .iter()
            .filter(|(_, len)| *len > 0)
            .map(|&(start, len)| Skip { start, len })
            .collect();
        skips.sort_by_key(|s| s.start);
        SkipReader {
            inner,
            skips: skips.into(),
            pos: 0,
            zeros_pending: 0,
        }
    }

    /// Consume `n` bytes of the inner reader without emitting them.
    fn drain(&mut self, n: u64) -> io::Result<u64> {
        io::copy(&mut self.inner.by_ref().take(n), &mut io::sink())
    }
}

impl<R: Read> Read for SkipReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.zeros_pending > 0 {
            let n = (buf.len() as u64).min(self.zeros_pending);
            // The replaced bytes still advance the source; the replacement
            // is zeros, not a hole.
            let drained = self.drain(n)?;
            buf[..drained as usize].fill(0);
            self.pos += drained;
            self.zeros_pending -= drained;
            return Ok(drained as usize);
        }

        if let Some(skip) = self.skips.front().copied() {
            debug_assert!(skip.start >= self.pos, "skip ranges must not overlap");
            if skip.start == self.pos {
                self.zeros_pending = skip.len;
                self.skips.pop_front();
                return self.read(buf);
            }
            if skip.start < self.pos + buf.len() as u64 {
                // Truncate so the next read starts exactly at the skip.
                let upto = (skip.start - self.pos) as usize;
                let n = self.inner.read(&mut buf[..upto])?;
                self.pos += n as u64;
                return Ok(n);
            }
        }

        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}
