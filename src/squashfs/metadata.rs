use std::io::{Read, Seek};

use byteorder::{LittleEndian, ReadBytesExt};
use num_enum::{FromPrimitive, IntoPrimitive};

use crate::error::{Error, Result};

use super::block::{read_meta_block, MetaStream};
use super::superblock::Superblock;

// Divide x by y, rounding up any fractional result
macro_rules! div_ceil {
    ($x:expr, $y:expr) => { ($x + $y - 1) / $y }
}

/// A reference to an inode's location: the offset of its metadata block
/// within the inode table, plus a byte offset into the decompressed block.
///
/// The block offset occupies bits 16..64 of the packed value. The SquashFS
/// layout defines 48 significant bits there, so the shift alone extracts it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct InodeRef {
    raw: u64,
}

impl InodeRef {
    pub(crate) fn new(block: u64, offset: u16) -> Self {
        Self { raw: (block << 16) | u64::from(offset) }
    }

    pub(crate) fn read<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self { raw: r.read_u64::<LittleEndian>()? })
    }

    /// Offset of the metadata block within the inode table.
    pub(crate) fn block(&self) -> u64 {
        (self.raw >> 16) & 0x0000_FFFF_FFFF_FFFF
    }

    /// Byte offset into the decompressed metadata block.
    pub(crate) fn offset(&self) -> u16 {
        (self.raw & 0xFFFF) as u16
    }
}

impl std::fmt::Debug for InodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{}", self.block(), self.offset())
    }
}

/// Inode type discriminator. Directory entries carry the same values in
/// their type field, always as the basic variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum InodeKind {
    BasicDir = 1,
    BasicFile = 2,
    BasicSymlink = 3,
    BasicBlockDev = 4,
    BasicCharDev = 5,
    BasicFifo = 6,
    BasicSocket = 7,
    ExtDir = 8,
    ExtFile = 9,
    ExtSymlink = 10,
    ExtBlockDev = 11,
    ExtCharDev = 12,
    ExtFifo = 13,
    ExtSocket = 14,
    #[num_enum(default)]
    Unknown = 0xFFFF,
}

impl InodeKind {
    pub fn is_dir(self) -> bool {
        matches!(self, InodeKind::BasicDir | InodeKind::ExtDir)
    }

    pub fn is_file(self) -> bool {
        matches!(self, InodeKind::BasicFile | InodeKind::ExtFile)
    }

    pub fn is_symlink(self) -> bool {
        matches!(self, InodeKind::BasicSymlink | InodeKind::ExtSymlink)
    }

    /// The S_IFMT bits corresponding to this inode type.
    pub fn mode_bits(self) -> u32 {
        match self {
            InodeKind::BasicDir | InodeKind::ExtDir => 0o040000,
            InodeKind::BasicFile | InodeKind::ExtFile => 0o100000,
            InodeKind::BasicSymlink | InodeKind::ExtSymlink => 0o120000,
            InodeKind::BasicBlockDev | InodeKind::ExtBlockDev => 0o060000,
            InodeKind::BasicCharDev | InodeKind::ExtCharDev => 0o020000,
            InodeKind::BasicFifo | InodeKind::ExtFifo => 0o010000,
            InodeKind::BasicSocket | InodeKind::ExtSocket => 0o140000,
            InodeKind::Unknown => 0,
        }
    }
}

/// One filesystem object: the 16-byte common header plus the type-dependent
/// payload.
#[derive(Debug)]
pub struct Inode {
    pub kind: InodeKind,
    pub permissions: u16,
    pub uid_index: u16,
    pub gid_index: u16,
    pub mtime: u32,
    pub inode_number: u32,
    pub payload: InodePayload,
}

#[derive(Debug)]
pub enum InodePayload {
    Dir(DirInfo),
    ExtDir(ExtDirInfo),
    File(FileInfo),
    ExtFile(ExtFileInfo),
    Symlink(SymlinkInfo),
    Device(DeviceInfo),
    Ipc(IpcInfo),
    /// Type surfaced via the header only; the payload is not readable.
    Opaque,
}

#[derive(Debug)]
pub struct DirInfo {
    pub block_start: u32,
    pub link_count: u32,
    pub file_size: u16,
    pub block_offset: u16,
    pub parent_inode: u32,
}

#[derive(Debug)]
pub struct ExtDirInfo {
    pub link_count: u32,
    pub file_size: u32,
    pub block_start: u32,
    pub parent_inode: u32,
    pub index_count: u16,
    pub block_offset: u16,
    pub xattr_index: u32,
}

#[derive(Debug)]
pub struct FileInfo {
    pub blocks_start: u32,
    pub frag_index: u32,
    pub frag_offset: u32,
    pub file_size: u32,
    pub block_sizes: Vec<u32>,
}

#[derive(Debug)]
pub struct ExtFileInfo {
    pub blocks_start: u64,
    pub file_size: u64,
    pub sparse: u64,
    pub link_count: u32,
    pub frag_index: u32,
    pub frag_offset: u32,
    pub xattr_index: u32,
    pub block_sizes: Vec<u32>,
}

#[derive(Debug)]
pub struct SymlinkInfo {
    pub link_count: u32,
    pub target: Vec<u8>,
    pub xattr_index: Option<u32>,
}

#[derive(Debug)]
pub struct DeviceInfo {
    pub link_count: u32,
    pub device: u32,
}

#[derive(Debug)]
pub struct IpcInfo {
    pub link_count: u32,
}

/// No tail fragment: the fragment index field holds all ones.
pub const NO_FRAGMENT: u32 = u32::MAX;

/// A uniform view over basic and extended file payloads.
pub(crate) struct FileGeometry<'a> {
    pub blocks_start: u64,
    pub file_size: u64,
    pub frag_index: u32,
    pub frag_offset: u32,
    pub block_sizes: &'a [u32],
}

/// Location of a directory's entry runs within the directory table.
pub(crate) struct DirLocation {
    pub block_start: u32,
    pub block_offset: u16,
    pub file_size: u32,
}

impl Inode {
    /// Read one inode record from a metadata stream positioned at its start.
    pub(crate) fn read<R>(r: &mut MetaStream<R>, block_size: u32) -> Result<Self>
    where R: Read + Seek
    {
        let raw_kind = r.read_u16::<LittleEndian>()?;
        let kind = InodeKind::from(raw_kind);
        let permissions = r.read_u16::<LittleEndian>()?;
        let uid_index = r.read_u16::<LittleEndian>()?;
        let gid_index = r.read_u16::<LittleEndian>()?;
        let mtime = r.read_u32::<LittleEndian>()?;
        let inode_number = r.read_u32::<LittleEndian>()?;

        let payload = match kind {
            InodeKind::BasicDir => InodePayload::Dir(DirInfo {
                block_start: r.read_u32::<LittleEndian>()?,
                link_count: r.read_u32::<LittleEndian>()?,
                file_size: r.read_u16::<LittleEndian>()?,
                block_offset: r.read_u16::<LittleEndian>()?,
                parent_inode: r.read_u32::<LittleEndian>()?,
            }),
            InodeKind::ExtDir => {
                let info = ExtDirInfo {
                    link_count: r.read_u32::<LittleEndian>()?,
                    file_size: r.read_u32::<LittleEndian>()?,
                    block_start: r.read_u32::<LittleEndian>()?,
                    parent_inode: r.read_u32::<LittleEndian>()?,
                    index_count: r.read_u16::<LittleEndian>()?,
                    block_offset: r.read_u16::<LittleEndian>()?,
                    xattr_index: r.read_u32::<LittleEndian>()?,
                };
                // The directory index is a lookup accelerator. We scan runs
                // instead, but the records must be consumed so the stream
                // stays aligned for any follow-on read.
                for _ in 0..info.index_count {
                    let _index = r.read_u32::<LittleEndian>()?;
                    let _start = r.read_u32::<LittleEndian>()?;
                    let name_size = r.read_u32::<LittleEndian>()?;
                    r.skip(name_size as usize + 1)?;
                }
                InodePayload::ExtDir(info)
            }
            InodeKind::BasicFile => {
                let blocks_start = r.read_u32::<LittleEndian>()?;
                let frag_index = r.read_u32::<LittleEndian>()?;
                let frag_offset = r.read_u32::<LittleEndian>()?;
                let file_size = r.read_u32::<LittleEndian>()?;
                let block_sizes =
                    read_block_sizes(r, u64::from(file_size), frag_index, block_size)?;
                InodePayload::File(FileInfo {
                    blocks_start, frag_index, frag_offset, file_size, block_sizes,
                })
            }
            InodeKind::ExtFile => {
                let blocks_start = r.read_u64::<LittleEndian>()?;
                let file_size = r.read_u64::<LittleEndian>()?;
                let sparse = r.read_u64::<LittleEndian>()?;
                let link_count = r.read_u32::<LittleEndian>()?;
                let frag_index = r.read_u32::<LittleEndian>()?;
                let frag_offset = r.read_u32::<LittleEndian>()?;
                let xattr_index = r.read_u32::<LittleEndian>()?;
                let block_sizes = read_block_sizes(r, file_size, frag_index, block_size)?;
                InodePayload::ExtFile(ExtFileInfo {
                    blocks_start, file_size, sparse, link_count,
                    frag_index, frag_offset, xattr_index, block_sizes,
                })
            }
            InodeKind::BasicSymlink | InodeKind::ExtSymlink => {
                let link_count = r.read_u32::<LittleEndian>()?;
                let target_size = r.read_u32::<LittleEndian>()?;
                let mut target = vec![0u8; target_size as usize];
                r.read_exact_meta(&mut target)?;
                let xattr_index = if kind == InodeKind::ExtSymlink {
                    Some(r.read_u32::<LittleEndian>()?)
                } else {
                    None
                };
                InodePayload::Symlink(SymlinkInfo { link_count, target, xattr_index })
            }
            InodeKind::BasicBlockDev | InodeKind::BasicCharDev => {
                InodePayload::Device(DeviceInfo {
                    link_count: r.read_u32::<LittleEndian>()?,
                    device: r.read_u32::<LittleEndian>()?,
                })
            }
            InodeKind::BasicFifo | InodeKind::BasicSocket => {
                InodePayload::Ipc(IpcInfo {
                    link_count: r.read_u32::<LittleEndian>()?,
                })
            }
            InodeKind::ExtBlockDev
            | InodeKind::ExtCharDev
            | InodeKind::ExtFifo
            | InodeKind::ExtSocket => InodePayload::Opaque,
            InodeKind::Unknown => return Err(Error::UnhandledInode(raw_kind)),
        };

        Ok(Inode {
            kind, permissions, uid_index, gid_index, mtime, inode_number, payload,
        })
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }

    /// Full mode word: type bits or'd with the stored permissions.
    pub fn mode(&self) -> u32 {
        self.kind.mode_bits() | u32::from(self.permissions)
    }

    /// Logical size. Directories and symlinks report zero.
    pub fn file_size(&self) -> u64 {
        match &self.payload {
            InodePayload::File(i) => i.file_size.into(),
            InodePayload::ExtFile(i) => i.file_size,
            _ => 0,
        }
    }

    /// Symlink target bytes, if this is a symlink.
    pub fn symlink_target(&self) -> Option<&[u8]> {
        match &self.payload {
            InodePayload::Symlink(i) => Some(&i.target),
            _ => None,
        }
    }

    pub(crate) fn file_geometry(&self) -> Option<FileGeometry<'_>> {
        match &self.payload {
            InodePayload::File(i) => Some(FileGeometry {
                blocks_start: i.blocks_start.into(),
                file_size: i.file_size.into(),
                frag_index: i.frag_index,
                frag_offset: i.frag_offset,
                block_sizes: &i.block_sizes,
            }),
            InodePayload::ExtFile(i) => Some(FileGeometry {
                blocks_start: i.blocks_start,
                file_size: i.file_size,
                frag_index: i.frag_index,
                frag_offset: i.frag_offset,
                block_sizes: &i.block_sizes,
            }),
            _ => None,
        }
    }

    pub(crate) fn dir_location(&self) -> Option<DirLocation> {
        match &self.payload {
            InodePayload::Dir(i) => Some(DirLocation {
                block_start: i.block_start,
                block_offset: i.block_offset,
                file_size: i.file_size.into(),
            }),
            InodePayload::ExtDir(i) => Some(DirLocation {
                block_start: i.block_start,
                block_offset: i.block_offset,
                file_size: i.file_size,
            }),
            _ => None,
        }
    }
}

/// The inline block-size list has one entry per full block; the tail lands in
/// a fragment when one is referenced, otherwise in a final short block.
fn read_block_sizes<R>(
    r: &mut MetaStream<R>,
    file_size: u64,
    frag_index: u32,
    block_size: u32,
) -> Result<Vec<u32>>
where R: Read + Seek
{
    let block_size = u64::from(block_size);
    let count = if frag_index == NO_FRAGMENT {
        div_ceil!(file_size, block_size)
    } else {
        file_size / block_size
    };
    let mut sizes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        sizes.push(r.read_u32::<LittleEndian>()?);
    }
    Ok(sizes)
}

/// One run of directory entries: the header names the inode-table block and
/// base inode number shared by the following entries.
#[derive(Debug)]
pub struct DirRun {
    pub start: u32,
    pub inode_number: u32,
    pub entries: Vec<RawDirEntry>,
}

#[derive(Debug)]
pub struct RawDirEntry {
    pub offset: u16,
    pub inode_delta: i16,
    pub kind: InodeKind,
    pub name: Vec<u8>,
}

impl DirRun {
    fn load<R>(r: &mut MetaStream<R>, consumed: &mut u64) -> Result<Self>
    where R: Read + Seek
    {
        let count = r.read_u32::<LittleEndian>()? + 1;
        let start = r.read_u32::<LittleEndian>()?;
        let inode_number = r.read_u32::<LittleEndian>()?;
        *consumed += 12;

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let offset = r.read_u16::<LittleEndian>()?;
            let inode_delta = r.read_i16::<LittleEndian>()?;
            let kind = InodeKind::from(r.read_u16::<LittleEndian>()?);
            let name_size = r.read_u16::<LittleEndian>()? + 1;
            let mut name = vec![0u8; name_size.into()];
            r.read_exact_meta(&mut name)?;
            *consumed += 8 + u64::from(name_size);
            entries.push(RawDirEntry { offset, inode_delta, kind, name });
        }
        Ok(DirRun { start, inode_number, entries })
    }

    /// Expand a directory inode into its entry runs. The logical size field
    /// includes a 3-byte allowance for the virtual "." and ".." entries that
    /// are never written.
    pub(crate) fn read_for_dir<R>(
        source: R,
        sb: &Superblock,
        loc: &DirLocation,
    ) -> Result<Vec<Self>>
    where R: Read + Seek
    {
        let at = InodeRef::new(loc.block_start.into(), loc.block_offset);
        let mut stream = MetaStream::new(source, sb.dir_table, at)?;

        let logical = u64::from(loc.file_size).saturating_sub(3);
        let mut consumed = 0u64;
        let mut runs = Vec::new();
        while consumed < logical {
            runs.push(Self::load(&mut stream, &mut consumed)?);
        }
        Ok(runs)
    }
}

/// One fragment-block record: 16 bytes in the fragment table.
#[derive(Debug, Clone, Copy)]
pub struct FragmentEntry {
    pub start: u64,
    pub size: u32,
}

impl FragmentEntry {
    /// On-disk length of the fragment block.
    pub fn disk_len(&self) -> u32 {
        self.size & 0xFF_FFFF
    }

    /// Bit 24 marks the block as stored rather than compressed.
    pub fn is_stored(&self) -> bool {
        self.size & 0x100_0000 != 0
    }

    /// Look up one entry: the index table at `frag_table` holds one u64
    /// metadata-block offset per 512 entries; the entry lives at
    /// `(index % 512) * 16` within the resolved block.
    pub(crate) fn lookup<R>(mut source: R, sb: &Superblock, index: u32) -> Result<Self>
    where R: Read + Seek
    {
        if index >= sb.frag_count {
            return Err(Error::UnsupportedSquashFs(format!(
                "fragment index {index} outside fragment table (count {})",
                sb.frag_count
            )));
        }
        source.seek(std::io::SeekFrom::Start(
            sb.frag_table + u64::from(index / 512) * 8,
        ))?;
        let block_offset = source.read_u64::<LittleEndian>()?;

        let (block, _) = read_meta_block(&mut source, block_offset)?;
        let at = (index % 512) as usize * 16;
        if at + 16 > block.len() {
            return Err(Error::TruncatedMetaBlock);
        }
        let mut entry = &block[at..at + 16];
        let start = entry.read_u64::<LittleEndian>()?;
        let size = entry.read_u32::<LittleEndian>()?;
        Ok(FragmentEntry { start, size })
    }
}
