use std::io::{self, Read, Seek, SeekFrom};

use log::warn;

use crate::error::{Error, Result};

use super::block::inflate;
use super::metadata::{FragmentEntry, Inode, NO_FRAGMENT};
use super::superblock::{Superblock, SuperblockFlags};

/// Streaming reader for the uncompressed contents of one file.
///
/// File data lives in a run of compressed blocks starting at a fixed offset,
/// optionally followed by a tail packed into a shared fragment block. The
/// reader decompresses one block at a time into a buffer and serves reads
/// from it; the caller sees a single contiguous stream of exactly
/// `file_size` bytes.
pub struct FileReader<R> {
    source: R,
    block_size: u32,
    blocks_start: u64,
    block_sizes: Vec<u32>,
    file_size: u64,
    fragment: Option<FragmentRead>,

    current_block: usize,
    disk_offset: u64,
    buffer: Vec<u8>,
    buf_pos: usize,
    fragment_consumed: bool,
    bytes_returned: u64,
}

struct FragmentRead {
    entry: FragmentEntry,
    offset: u32,
}

// Per-block size entries carry the on-disk length in the low 24 bits; bit 24
// marks the block as stored rather than compressed.
const BLOCK_LEN_MASK: u32 = 0xFF_FFFF;
const BLOCK_STORED: u32 = 0x100_0000;

impl<R: Read + Seek + Clone> FileReader<R> {
    /// Build a reader from a file inode. Returns None for non-file inodes.
    /// The fragment-table entry, when one is referenced, is resolved here so
    /// the reader owns its full geometry.
    pub(crate) fn from_inode(source: R, sb: &Superblock, inode: &Inode) -> Result<Option<Self>> {
        let geo = match inode.file_geometry() {
            Some(g) => g,
            None => return Ok(None),
        };

        let fragment = if geo.frag_index == NO_FRAGMENT {
            None
        } else {
            if sb.flags.contains(SuperblockFlags::FRAGMENTS_NOT_USED) {
                warn!("inode references a fragment in an image flagged as fragment-free");
            }
            let entry = FragmentEntry::lookup(source.clone(), sb, geo.frag_index)?;
            Some(FragmentRead { entry, offset: geo.frag_offset })
        };

        Ok(Some(FileReader {
            source,
            block_size: sb.block_size,
            blocks_start: geo.blocks_start,
            block_sizes: geo.block_sizes.to_vec(),
            file_size: geo.file_size,
            fragment,
            current_block: 0,
            disk_offset: 0,
            buffer: Vec::new(),
            buf_pos: 0,
            fragment_consumed: false,
            bytes_returned: 0,
        }))
    }

    /// Total uncompressed size of the file.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    fn remaining(&self) -> u64 {
        self.file_size - self.bytes_returned
    }

    fn fill_from_block(&mut self) -> Result<()> {
        let entry = self.block_sizes[self.current_block];
        let disk_len = entry & BLOCK_LEN_MASK;
        let stored = entry & BLOCK_STORED != 0;

        // A zero length marks an all-zero block that is not stored on disk.
        let data = if disk_len == 0 {
            vec![0u8; self.remaining().min(self.block_size.into()) as usize]
        } else {
            self.source
                .seek(SeekFrom::Start(self.blocks_start + self.disk_offset))?;
            let mut raw = vec![0u8; disk_len as usize];
            self.source.read_exact(&mut raw)?;
            if stored {
                raw
            } else {
                inflate(&raw, self.block_size as usize)?
            }
        };

        self.disk_offset += u64::from(disk_len);
        self.current_block += 1;
        self.buffer = data;
        let cap = self.remaining().min(self.buffer.len() as u64) as usize;
        self.buffer.truncate(cap);
        self.buf_pos = 0;
        Ok(())
    }

    fn fill_from_fragment(&mut self) -> Result<()> {
        let frag = self.fragment.as_ref().expect("fragment presence checked by caller");
        self.source.seek(SeekFrom::Start(frag.entry.start))?;
        let mut raw = vec![0u8; frag.entry.disk_len() as usize];
        self.source.read_exact(&mut raw)?;
        let block = if frag.entry.is_stored() {
            raw
        } else {
            inflate(&raw, self.block_size as usize)?
        };

        let start = frag.offset as usize;
        let end = start + self.remaining() as usize;
        if end > block.len() {
            return Err(Error::ShortRead);
        }
        self.buffer = block[start..end].to_vec();
        self.buf_pos = 0;
        self.fragment_consumed = true;
        Ok(())
    }
}

impl<R: Read + Seek + Clone> Read for FileReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.remaining() == 0 {
            return Ok(0);
        }
        if self.buf_pos >= self.buffer.len() {
            let refill = if self.current_block < self.block_sizes.len() {
                self.fill_from_block()
            } else if self.fragment.is_some() && !self.fragment_consumed {
                self.fill_from_fragment()
            } else {
                return Ok(0);
            };
            refill.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        }

        let n = buf.len().min(self.buffer.len() - self.buf_pos);
        buf[..n].copy_from_slice(&self.buffer[self.buf_pos..self.buf_pos + n]);
        self.buf_pos += n;
        self.bytes_returned += n as u64;
        Ok(n)
    }
}
