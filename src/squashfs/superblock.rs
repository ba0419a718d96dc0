use std::io::Read;

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use num_enum::{FromPrimitive, IntoPrimitive};

use crate::error::{Error, Result};

use super::metadata::InodeRef;

pub const MAGIC: u32 = 0x73717368;

/// The fixed 96-byte header at the start of every SquashFS v4.0 image.
/// All table offsets are absolute within the image.
#[derive(Debug)]
pub struct Superblock {
    pub magic: u32,
    pub inode_count: u32,
    pub mod_time: u32,
    pub block_size: u32,
    pub frag_count: u32,
    pub compressor: Compressor,
    pub block_log: u16,
    pub flags: SuperblockFlags,
    pub id_count: u16,
    pub version_major: u16,
    pub version_minor: u16,
    pub root_inode: InodeRef,
    pub bytes_used: u64,
    pub id_table: u64,
    pub xattr_table: u64,
    pub inode_table: u64,
    pub dir_table: u64,
    pub frag_table: u64,
    pub export_table: u64,
}

bitflags! {
    pub struct SuperblockFlags: u16 {
        const INODES_UNCOMPRESSED = 0x0001;
        const DATABLOCKS_UNCOMPRESSED = 0x0002;
        const FRAGMENTS_UNCOMPRESSED = 0x0008;
        const FRAGMENTS_NOT_USED = 0x0010;
        const FRAGMENTS_ALWAYS_GENERATED = 0x0020;
        const DATA_DEDUPLICATED = 0x0040;
        const NFS_EXPORT_EXISTS = 0x0080;
        const XATTRS_UNCOMPRESSED = 0x0100;
        const NO_XATTRS = 0x0200;
        const COMPRESSOR_OPTIONS_PRESENT = 0x0400;
        const ID_TABLE_UNCOMPRESSED = 0x0800;
    }
}

#[derive(Debug, IntoPrimitive, FromPrimitive, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Compressor {
    Gzip = 1,
    Lzo = 2,
    Lzma = 3,
    Xz = 4,
    Lz4 = 5,
    Zstd = 6,
    #[num_enum(default)]
    Unknown = 0xFFFF,
}

impl Superblock {
    pub fn read<R>(r: &mut R) -> Result<Superblock>
    where R: Read
    {
        let sb = Superblock {
            magic: r.read_u32::<LittleEndian>()?,
            inode_count: r.read_u32::<LittleEndian>()?,
            mod_time: r.read_u32::<LittleEndian>()?,
            block_size: r.read_u32::<LittleEndian>()?,
            frag_count: r.read_u32::<LittleEndian>()?,
            compressor: Compressor::from(r.read_u16::<LittleEndian>()?),
            block_log: r.read_u16::<LittleEndian>()?,
            flags: SuperblockFlags::from_bits_truncate(r.read_u16::<LittleEndian>()?),
            id_count: r.read_u16::<LittleEndian>()?,
            version_major: r.read_u16::<LittleEndian>()?,
            version_minor: r.read_u16::<LittleEndian>()?,
            root_inode: InodeRef::read(r)?,
            bytes_used: r.read_u64::<LittleEndian>()?,
            id_table: r.read_u64::<LittleEndian>()?,
            xattr_table: r.read_u64::<LittleEndian>()?,
            inode_table: r.read_u64::<LittleEndian>()?,
            dir_table: r.read_u64::<LittleEndian>()?,
            frag_table: r.read_u64::<LittleEndian>()?,
            export_table: r.read_u64::<LittleEndian>()?,
        };
        sb.validate()?;
        Ok(sb)
    }

    fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(Error::NotSquashFs);
        }
        if self.compressor != Compressor::Gzip {
            return Err(Error::UnsupportedSquashFs(format!(
                "compression type {:?} (only zlib is supported)",
                self.compressor
            )));
        }
        if (self.version_major, self.version_minor) != (4, 0) {
            return Err(Error::UnsupportedSquashFs(format!(
                "version {}.{} (only 4.0 is supported)",
                self.version_major, self.version_minor
            )));
        }
        if !self.block_size.is_power_of_two()
            || u32::from(self.block_log) != self.block_size.trailing_zeros()
        {
            return Err(Error::UnsupportedSquashFs(
                "block_log does not match log2(block_size)".into(),
            ));
        }
        let rejected = SuperblockFlags::COMPRESSOR_OPTIONS_PRESENT
            | SuperblockFlags::INODES_UNCOMPRESSED
            | SuperblockFlags::DATABLOCKS_UNCOMPRESSED
            | SuperblockFlags::FRAGMENTS_UNCOMPRESSED;
        if self.flags.intersects(rejected) {
            return Err(Error::UnsupportedSquashFs(format!(
                "unsupported superblock flags {:?}",
                self.flags & rejected
            )));
        }
        Ok(())
    }
}
