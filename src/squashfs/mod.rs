//! Read-only access to a SquashFS v4.0 image: directory listing, file
//! reading, and symlink-aware path resolution.
//!
//! Binary format reference: <https://dr-emann.github.io/squashfs/squashfs.html>

mod block;
mod filedata;
pub mod metadata;
pub mod superblock;

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};
use crate::source::{SharedSource, SourceWindow};

pub use filedata::FileReader;
pub use metadata::{Inode, InodeKind, InodeRef};
pub use superblock::Superblock;

use metadata::{DirLocation, DirRun, RawDirEntry};

/// How many symlinks a single resolution may traverse before giving up.
pub const DEFAULT_SYMLINK_HOPS: u32 = 40;

/// The top-level interface to a SquashFS filesystem: inode lookup, directory
/// listing, and file readers.
///
/// Every operation seeks the shared source absolutely, so readers obtained
/// from the same filesystem never disturb each other.
#[derive(Debug)]
pub struct SquashFS<R> {
    source: R,
    sb: Superblock,
    max_symlink_hops: u32,
}

impl SquashFS<SourceWindow<File>> {
    /// Open a file containing a SquashFS image at offset 0.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let source = SharedSource::new(file);
        Self::new(source.window(0, len))
    }
}

impl<R: Read + Seek + Clone> SquashFS<R> {
    /// Create a new SquashFS instance from the provided reader. Offset 0 of
    /// the reader must be the superblock.
    pub fn new(mut source: R) -> Result<Self> {
        source.seek(SeekFrom::Start(0))?;
        let sb = Superblock::read(&mut source)?;
        debug!(
            "squashfs: {} inodes, {} fragments, block size {}",
            sb.inode_count, sb.frag_count, sb.block_size
        );
        Ok(SquashFS { source, sb, max_symlink_hops: DEFAULT_SYMLINK_HOPS })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    /// Adjust the symlink traversal budget for path resolution.
    pub fn set_max_symlink_hops(&mut self, hops: u32) {
        self.max_symlink_hops = hops;
    }

    /// The inode of the '/' directory.
    pub fn root_inode(&self) -> Result<Inode> {
        self.inode_at(self.sb.root_inode)
    }

    /// Read the inode stored at the given reference.
    pub fn inode_at(&self, at: InodeRef) -> Result<Inode> {
        let mut stream =
            block::MetaStream::new(self.source.clone(), self.sb.inode_table, at)?;
        Inode::read(&mut stream, self.sb.block_size)
    }

    /// Resolve a path to its inode, following symlinks.
    pub fn lookup<P: AsRef<Path>>(&self, path: P) -> Result<Inode> {
        self.resolve(path.as_ref(), true)
    }

    /// The target of the symlink at `path`, without dereferencing it.
    /// Returns None when the path names something other than a symlink.
    pub fn symlink_target<P: AsRef<Path>>(&self, path: P) -> Result<Option<String>> {
        let inode = self.resolve(path.as_ref(), false)?;
        Ok(inode
            .symlink_target()
            .map(|t| String::from_utf8_lossy(t).into_owned()))
    }

    /// Iterate the entries of the directory at `path`.
    pub fn read_dir<P: AsRef<Path>>(&self, path: P) -> Result<ReadDir> {
        let inode = self.resolve(path.as_ref(), true)?;
        if !inode.is_dir() {
            return Err(Error::NotADirectory(path.as_ref().display().to_string()));
        }
        self.read_dir_inode(&inode)
    }

    /// Iterate the entries of a directory inode.
    pub fn read_dir_inode(&self, inode: &Inode) -> Result<ReadDir> {
        let loc = inode
            .dir_location()
            .ok_or_else(|| Error::NotADirectory(format!("inode {}", inode.inode_number)))?;
        self.read_dir_location(&loc)
    }

    fn read_dir_location(&self, loc: &DirLocation) -> Result<ReadDir> {
        let runs = DirRun::read_for_dir(self.source.clone(), &self.sb, loc)?;
        Ok(ReadDir::new(runs.into_iter()))
    }

    /// Open the file at `path` for streaming reads, following symlinks.
    pub fn open_file<P: AsRef<Path>>(&self, path: P) -> Result<FileReader<R>> {
        let inode = self.resolve(path.as_ref(), true)?;
        self.open_file_inode(&inode)
    }

    /// Open a file inode for streaming reads.
    pub fn open_file_inode(&self, inode: &Inode) -> Result<FileReader<R>> {
        FileReader::from_inode(self.source.clone(), &self.sb, inode)?.ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "not a regular file",
            ))
        })
    }

    /// Metadata for the object at `path`, following symlinks.
    pub fn metadata<P: AsRef<Path>>(&self, path: P) -> Result<Metadata> {
        Ok(Metadata::from_inode(&self.resolve(path.as_ref(), true)?))
    }

    /// Metadata for a directory entry.
    pub fn metadata_for(&self, entry: &DirEntry) -> Result<Metadata> {
        Ok(Metadata::from_inode(&self.inode_at(entry.inode_ref())?))
    }

    /// Walk `path` component by component from the root. `.` is ignored,
    /// `..` pops one level (the root is its own parent), and symlinks splice
    /// their target into the remaining components: absolute targets restart
    /// from the root, relative targets resolve against the containing
    /// directory. `follow_last` controls whether a symlink in the final
    /// position is dereferenced.
    fn resolve(&self, path: &Path, follow_last: bool) -> Result<Inode> {
        let display = path.display().to_string();
        let mut remaining: VecDeque<String> = components(path);
        // The chain of directories entered so far; empty means the root.
        let mut dir_chain: Vec<InodeRef> = Vec::new();
        let mut hops = 0u32;

        while let Some(comp) = remaining.pop_front() {
            if comp == ".." {
                dir_chain.pop();
                continue;
            }

            let dir_inode = match dir_chain.last() {
                Some(at) => self.inode_at(*at)?,
                None => self.root_inode()?,
            };
            let loc = dir_inode
                .dir_location()
                .ok_or_else(|| Error::NotADirectory(display.clone()))?;

            let entry = self
                .read_dir_location(&loc)?
                .find(|e| e.file_name() == comp)
                .ok_or_else(|| Error::NotFound(display.clone()))?;
            let inode = self.inode_at(entry.inode_ref())?;

            if inode.is_symlink() && (follow_last || !remaining.is_empty()) {
                hops += 1;
                if hops > self.max_symlink_hops {
                    return Err(Error::SymlinkLoop(display));
                }
                let target = inode.symlink_target().expect("symlink payload");
                let target = String::from_utf8_lossy(target).into_owned();
                if target.is_empty() {
                    return Err(Error::NotFound(display));
                }
                if target.starts_with('/') {
                    dir_chain.clear();
                }
                let mut spliced = components(Path::new(&target));
                spliced.append(&mut remaining);
                remaining = spliced;
            } else if remaining.is_empty() {
                return Ok(inode);
            } else {
                dir_chain.push(entry.inode_ref());
            }
        }

        // The path was "/", empty, or ended on "." / "..".
        match dir_chain.last() {
            Some(at) => self.inode_at(*at),
            None => self.root_inode(),
        }
    }
}

fn components(path: &Path) -> VecDeque<String> {
    path.to_string_lossy()
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .map(str::to_owned)
        .collect()
}

/// Metadata for one filesystem object, in the shape a caller would expect
/// from `stat`. Uid and gid are the raw 16-bit indices stored in the inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub kind: InodeKind,
    pub mode: u32,
    pub uid_index: u16,
    pub gid_index: u16,
    pub mtime: u32,
    pub size: u64,
}

impl Metadata {
    pub fn from_inode(inode: &Inode) -> Self {
        Metadata {
            kind: inode.kind,
            mode: inode.mode(),
            uid_index: inode.uid_index,
            gid_index: inode.gid_index,
            mtime: inode.mtime,
            size: inode.file_size(),
        }
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
}

/// A named inode reference within a directory, like `std::fs::DirEntry`.
#[derive(Debug)]
pub struct DirEntry {
    name: String,
    kind: InodeKind,
    inode_ref: InodeRef,
    inode_number: u32,
}

impl DirEntry {
    fn new(run_start: u64, run_inode_number: u32, raw: RawDirEntry) -> Self {
        DirEntry {
            name: String::from_utf8_lossy(&raw.name).into_owned(),
            kind: raw.kind,
            inode_ref: InodeRef::new(run_start, raw.offset),
            inode_number: run_inode_number.wrapping_add_signed(raw.inode_delta.into()),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.name
    }

    /// The inode type recorded in the directory entry (always the basic
    /// variant, even when the inode itself is extended).
    pub fn kind(&self) -> InodeKind {
        self.kind
    }

    pub fn inode_ref(&self) -> InodeRef {
        self.inode_ref
    }

    pub fn inode_number(&self) -> u32 {
        self.inode_number
    }
}

/// Iterator over the entries of a directory.
///
/// A directory's entries are split across runs sharing a header; this
/// iterator flattens them, carrying each run's inode-table block and base
/// inode number into the entries it yields.
#[derive(Debug)]
pub struct ReadDir {
    runs: std::vec::IntoIter<DirRun>,
    entries: std::vec::IntoIter<RawDirEntry>,
    run_start: u64,
    run_inode_number: u32,
}

impl ReadDir {
    fn new(runs: std::vec::IntoIter<DirRun>) -> Self {
        ReadDir {
            runs,
            entries: Vec::new().into_iter(),
            run_start: 0,
            run_inode_number: 0,
        }
    }
}

impl Iterator for ReadDir {
    type Item = DirEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(raw) = self.entries.next() {
                return Some(DirEntry::new(self.run_start, self.run_inode_number, raw));
            }
            let run = self.runs.next()?;
            self.run_start = run.start.into();
            self.run_inode_number = run.inode_number;
            self.entries = run.entries.into_iter();
        }
    }
}
