use std::io::{self, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;

use crate::error::{Error, Result};

use super::metadata::InodeRef;

/// Metadata block size is fixed by the SquashFS specification.
pub const META_BLOCK_SIZE: usize = 8192;

/// Read one metadata block at the given absolute offset.
///
/// The 2-byte little-endian header carries the on-disk payload length in its
/// low 15 bits; the high bit marks the payload as stored (not compressed).
/// Returns the decompressed payload and the on-disk byte count including the
/// header.
pub(crate) fn read_meta_block<R>(r: &mut R, offset: u64) -> Result<(Vec<u8>, u64)>
where R: Read + Seek
{
    r.seek(SeekFrom::Start(offset))?;
    let header = r.read_u16::<LittleEndian>()?;
    let on_disk = usize::from(header & 0x7FFF);
    let stored = header & 0x8000 != 0;

    if on_disk > META_BLOCK_SIZE {
        return Err(Error::OversizeMetaBlock);
    }

    let mut raw = vec![0u8; on_disk];
    r.read_exact(&mut raw).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::TruncatedMetaBlock,
        _ => Error::Io(e),
    })?;

    let data = if stored {
        raw
    } else {
        inflate(&raw, META_BLOCK_SIZE)?
    };
    if data.len() > META_BLOCK_SIZE {
        return Err(Error::OversizeMetaBlock);
    }

    Ok((data, 2 + on_disk as u64))
}

/// Inflate a zlib stream, producing at most `limit + 1` bytes so callers can
/// tell an over-limit payload from an exact fit.
pub(crate) fn inflate(raw: &[u8], limit: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut dec = ZlibDecoder::new(raw).take(limit as u64 + 1);
    dec.read_to_end(&mut out)
        .map_err(|e| Error::ZlibFailure(e.to_string()))?;
    Ok(out)
}

/// A logical byte stream over consecutive metadata blocks.
///
/// Inode and directory records may straddle block boundaries; this reader
/// transparently loads the next 2-byte-headered block at the right absolute
/// offset whenever the current buffer runs out.
pub(crate) struct MetaStream<R> {
    source: R,
    next_offset: u64,
    buf: Vec<u8>,
    pos: usize,
}

impl<R: Read + Seek> MetaStream<R> {
    /// Start streaming at `(table_start + at.block())`, skipping `at.offset()`
    /// bytes into the first decompressed block.
    pub fn new(source: R, table_start: u64, at: InodeRef) -> Result<Self> {
        let mut stream = MetaStream {
            source,
            next_offset: table_start + at.block(),
            buf: Vec::new(),
            pos: 0,
        };
        stream.skip(at.offset().into())?;
        Ok(stream)
    }

    fn refill(&mut self) -> Result<()> {
        // Zero-length blocks are legal; keep going until there is data.
        while self.pos >= self.buf.len() {
            let (data, on_disk) = read_meta_block(&mut self.source, self.next_offset)?;
            self.next_offset += on_disk;
            self.buf = data;
            self.pos = 0;
        }
        Ok(())
    }

    pub fn skip(&mut self, mut n: usize) -> Result<()> {
        while n > 0 {
            self.refill()?;
            let step = n.min(self.buf.len() - self.pos);
            self.pos += step;
            n -= step;
        }
        Ok(())
    }

    pub fn read_exact_meta(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut written = 0;
        while written < buf.len() {
            self.refill()?;
            let step = (buf.len() - written).min(self.buf.len() - self.pos);
            buf[written..written + step].copy_from_slice(&self.buf[self.pos..self.pos + step]);
            self.pos += step;
            written += step;
        }
        Ok(())
    }
}

impl<R: Read + Seek> Read for MetaStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.refill().map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let step = buf.len().min(self.buf.len() - self.pos);
        buf[..step].copy_from_slice(&self.buf[self.pos..self.pos + step]);
        self.pos += step;
        Ok(step)
    }
}
