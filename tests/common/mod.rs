//! In-memory fixture builders: synthetic SquashFS v4.0 images and AppImage
//! containers assembled byte by byte, so the tests need no checked-in
//! binaries and no network assets.

// Each test binary uses its own subset of the builders.
#![allow(dead_code)]

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

// ---------------------------------------------------------------------------
// SquashFS image builder
// ---------------------------------------------------------------------------

const META_CHUNK: usize = 8192;
const STORED_META: u16 = 0x8000;
const STORED_BLOCK: u32 = 0x100_0000;

#[derive(Clone)]
pub enum Node {
    File { name: String, content: Vec<u8>, extended: bool },
    Dir { name: String, children: Vec<Node>, extended: bool },
    Symlink { name: String, target: String, extended: bool },
}

pub fn file(name: &str, content: &[u8]) -> Node {
    Node::File { name: name.into(), content: content.into(), extended: false }
}

pub fn file_ext(name: &str, content: &[u8]) -> Node {
    Node::File { name: name.into(), content: content.into(), extended: true }
}

pub fn dir(name: &str, children: Vec<Node>) -> Node {
    Node::Dir { name: name.into(), children, extended: false }
}

pub fn dir_ext(name: &str, children: Vec<Node>) -> Node {
    Node::Dir { name: name.into(), children, extended: true }
}

pub fn symlink(name: &str, target: &str) -> Node {
    Node::Symlink { name: name.into(), target: target.into(), extended: false }
}

pub fn symlink_ext(name: &str, target: &str) -> Node {
    Node::Symlink { name: name.into(), target: target.into(), extended: true }
}

pub struct FsSpec {
    pub root: Vec<Node>,
    pub block_size: u32,
    /// zlib-compress data blocks and the fragment block; stored otherwise.
    pub compress_data: bool,
    /// zlib-compress metadata blocks. Only valid while the inode and
    /// directory streams each fit in a single block, which keeps every
    /// metadata reference computable before compression.
    pub compress_meta: bool,
}

impl Default for FsSpec {
    fn default() -> Self {
        FsSpec { root: Vec::new(), block_size: 4096, compress_data: true, compress_meta: true }
    }
}

pub fn squashfs(root: Vec<Node>) -> Vec<u8> {
    build_squashfs(&FsSpec { root, ..FsSpec::default() })
}

const KIND_DIR: u16 = 1;
const KIND_FILE: u16 = 2;
const KIND_SYMLINK: u16 = 3;
const KIND_EXT_DIR: u16 = 8;
const KIND_EXT_FILE: u16 = 9;
const KIND_EXT_SYMLINK: u16 = 10;

#[derive(Default)]
struct Flat {
    kind: u16, // basic kind
    extended: bool,
    name: String,
    content: Vec<u8>, // file content or symlink target
    children: Vec<usize>,
    inode_num: u32,
    parent_num: u32,
    inode_logical: u64,
    blocks_start: u64,
    block_entries: Vec<u32>,
    frag_index: u32,
    frag_offset: u32,
    dir_logical: u64,
    dir_runs: Vec<u8>,
}

fn flatten(nodes: &[Node], flats: &mut Vec<Flat>) -> Vec<usize> {
    let mut indices = Vec::new();
    for node in nodes {
        match node {
            Node::File { name, content, extended } => {
                flats.push(Flat {
                    kind: KIND_FILE,
                    extended: *extended,
                    name: name.clone(),
                    content: content.clone(),
                    ..Flat::default()
                });
                indices.push(flats.len() - 1);
            }
            Node::Symlink { name, target, extended } => {
                flats.push(Flat {
                    kind: KIND_SYMLINK,
                    extended: *extended,
                    name: name.clone(),
                    content: target.clone().into_bytes(),
                    ..Flat::default()
                });
                indices.push(flats.len() - 1);
            }
            Node::Dir { name, children, extended } => {
                let child_indices = flatten(children, flats);
                flats.push(Flat {
                    kind: KIND_DIR,
                    extended: *extended,
                    name: name.clone(),
                    children: child_indices,
                    ..Flat::default()
                });
                indices.push(flats.len() - 1);
            }
        }
    }
    indices
}

fn inode_record_size(f: &Flat) -> u64 {
    let body = match (f.kind, f.extended) {
        (KIND_DIR, false) => 16,
        (KIND_DIR, true) => 24,
        (KIND_FILE, false) => 16 + 4 * f.block_entries.len(),
        (KIND_FILE, true) => 40 + 4 * f.block_entries.len(),
        (KIND_SYMLINK, false) => 8 + f.content.len(),
        (KIND_SYMLINK, true) => 12 + f.content.len(),
        _ => unreachable!(),
    };
    16 + body as u64
}

fn meta_block_offset(logical: u64, compress_meta: bool) -> u64 {
    if compress_meta {
        0
    } else {
        (logical / META_CHUNK as u64) * (META_CHUNK as u64 + 2)
    }
}

fn pack_meta(logical: &[u8], compress: bool) -> Vec<u8> {
    let mut disk = Vec::new();
    for chunk in logical.chunks(META_CHUNK) {
        if compress {
            let z = zlib(chunk);
            disk.extend_from_slice(&(z.len() as u16).to_le_bytes());
            disk.extend_from_slice(&z);
        } else {
            disk.extend_from_slice(&(chunk.len() as u16 | STORED_META).to_le_bytes());
            disk.extend_from_slice(chunk);
        }
    }
    disk
}

pub fn build_squashfs(spec: &FsSpec) -> Vec<u8> {
    let bs = spec.block_size as usize;

    let mut flats = Vec::new();
    let root_children = flatten(&spec.root, &mut flats);
    flats.push(Flat { kind: KIND_DIR, children: root_children, ..Flat::default() });
    let root_idx = flats.len() - 1;

    for (i, f) in flats.iter_mut().enumerate() {
        f.inode_num = (i + 1) as u32;
    }
    for d in 0..flats.len() {
        if flats[d].kind != KIND_DIR {
            continue;
        }
        let parent = flats[d].inode_num;
        for c in flats[d].children.clone() {
            flats[c].parent_num = parent;
        }
    }
    flats[root_idx].parent_num = flats.len() as u32 + 1;

    // Data region: full blocks per file, tails concatenated into one shared
    // fragment block.
    let mut data = Vec::new();
    let data_base = 96u64;
    let mut frag_tail = Vec::new();
    for f in flats.iter_mut() {
        if f.kind != KIND_FILE {
            continue;
        }
        let full = f.content.len() / bs;
        let rem = f.content.len() % bs;
        f.blocks_start = data_base + data.len() as u64;
        for b in 0..full {
            let chunk = &f.content[b * bs..(b + 1) * bs];
            if spec.compress_data {
                let z = zlib(chunk);
                f.block_entries.push(z.len() as u32);
                data.extend_from_slice(&z);
            } else {
                f.block_entries.push(bs as u32 | STORED_BLOCK);
                data.extend_from_slice(chunk);
            }
        }
        if rem > 0 {
            f.frag_index = 0;
            f.frag_offset = frag_tail.len() as u32;
            frag_tail.extend_from_slice(&f.content[full * bs..]);
        } else {
            f.frag_index = u32::MAX;
        }
    }
    let frag_entry = if frag_tail.is_empty() {
        None
    } else {
        let start = data_base + data.len() as u64;
        if spec.compress_data {
            let z = zlib(&frag_tail);
            data.extend_from_slice(&z);
            Some((start, z.len() as u32))
        } else {
            data.extend_from_slice(&frag_tail);
            Some((start, frag_tail.len() as u32 | STORED_BLOCK))
        }
    };

    // Inode stream layout.
    let mut offset = 0u64;
    for f in flats.iter_mut() {
        f.inode_logical = offset;
        offset += inode_record_size(f);
    }
    if spec.compress_meta {
        assert!(offset <= META_CHUNK as u64, "compressed metadata must fit one block");
    }

    // Directory runs, grouped by the metadata block holding the entry's
    // inode, capped at 256 entries per run.
    for d in 0..flats.len() {
        if flats[d].kind != KIND_DIR {
            continue;
        }
        let entries: Vec<(String, u16, u64, u16, u32)> = flats[d]
            .children
            .iter()
            .map(|&c| {
                let ch = &flats[c];
                (
                    ch.name.clone(),
                    ch.kind,
                    meta_block_offset(ch.inode_logical, spec.compress_meta),
                    (ch.inode_logical % META_CHUNK as u64) as u16,
                    ch.inode_num,
                )
            })
            .collect();
        flats[d].dir_runs = build_runs(&entries);
    }
    let mut dir_offset = 0u64;
    for f in flats.iter_mut() {
        if f.kind != KIND_DIR {
            continue;
        }
        f.dir_logical = dir_offset;
        dir_offset += f.dir_runs.len() as u64;
    }
    if spec.compress_meta {
        assert!(dir_offset <= META_CHUNK as u64, "compressed metadata must fit one block");
    }

    // Serialize the inode and directory streams.
    let mut istream = Vec::new();
    for f in &flats {
        serialize_inode(&mut istream, f, spec.compress_meta);
    }
    let mut dstream = Vec::new();
    for f in &flats {
        dstream.extend_from_slice(&f.dir_runs);
    }

    let inode_table = data_base + data.len() as u64;
    let inode_disk = pack_meta(&istream, spec.compress_meta);
    let dir_table = inode_table + inode_disk.len() as u64;
    let dir_disk = pack_meta(&dstream, spec.compress_meta);
    let mut pos = dir_table + dir_disk.len() as u64;

    // Fragment table: one metadata block of entries, then the index of
    // block pointers the superblock references.
    let (frag_table, frag_bytes, frag_count) = match frag_entry {
        Some((start, size)) => {
            let mut entry = Vec::new();
            entry.extend_from_slice(&start.to_le_bytes());
            entry.extend_from_slice(&size.to_le_bytes());
            entry.extend_from_slice(&0u32.to_le_bytes());
            let block = pack_meta(&entry, false);
            let index_at = pos + block.len() as u64;
            let mut bytes = block;
            bytes.extend_from_slice(&pos.to_le_bytes());
            (index_at, bytes, 1u32)
        }
        None => (u64::MAX, Vec::new(), 0),
    };
    pos += frag_bytes.len() as u64;

    // Id table with a single root id, same block-then-index shape.
    let id_block = pack_meta(&0u32.to_le_bytes(), false);
    let id_table = pos + id_block.len() as u64;
    let mut id_bytes = id_block;
    id_bytes.extend_from_slice(&pos.to_le_bytes());
    pos = id_table + 8;

    let root = &flats[root_idx];
    let root_ref = (meta_block_offset(root.inode_logical, spec.compress_meta) << 16)
        | (root.inode_logical % META_CHUNK as u64);

    let mut out = Vec::new();
    out.extend_from_slice(&0x73717368u32.to_le_bytes());
    out.extend_from_slice(&(flats.len() as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // mod_time
    out.extend_from_slice(&spec.block_size.to_le_bytes());
    out.extend_from_slice(&frag_count.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // compressor: zlib
    out.extend_from_slice(&(spec.block_size.trailing_zeros() as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // flags
    out.extend_from_slice(&1u16.to_le_bytes()); // id_count
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&root_ref.to_le_bytes());
    out.extend_from_slice(&pos.to_le_bytes()); // bytes_used
    out.extend_from_slice(&id_table.to_le_bytes());
    out.extend_from_slice(&u64::MAX.to_le_bytes()); // xattr table
    out.extend_from_slice(&inode_table.to_le_bytes());
    out.extend_from_slice(&dir_table.to_le_bytes());
    out.extend_from_slice(&frag_table.to_le_bytes());
    out.extend_from_slice(&u64::MAX.to_le_bytes()); // export table
    assert_eq!(out.len(), 96);

    out.extend_from_slice(&data);
    out.extend_from_slice(&inode_disk);
    out.extend_from_slice(&dir_disk);
    out.extend_from_slice(&frag_bytes);
    out.extend_from_slice(&id_bytes);
    assert_eq!(out.len() as u64, pos);
    out
}

fn build_runs(entries: &[(String, u16, u64, u16, u32)]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < entries.len() {
        let block = entries[i].2;
        let mut j = i;
        while j < entries.len() && entries[j].2 == block && j - i < 256 {
            j += 1;
        }
        let base = entries[i].4;
        out.extend_from_slice(&((j - i - 1) as u32).to_le_bytes());
        out.extend_from_slice(&(block as u32).to_le_bytes());
        out.extend_from_slice(&base.to_le_bytes());
        for (name, kind, _, intra, inum) in &entries[i..j] {
            out.extend_from_slice(&intra.to_le_bytes());
            let delta = (*inum as i64 - base as i64) as i16;
            out.extend_from_slice(&delta.to_le_bytes());
            out.extend_from_slice(&kind.to_le_bytes());
            out.extend_from_slice(&((name.len() - 1) as u16).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
        }
        i = j;
    }
    out
}

fn serialize_inode(out: &mut Vec<u8>, f: &Flat, compress_meta: bool) {
    let kind = match (f.kind, f.extended) {
        (KIND_DIR, true) => KIND_EXT_DIR,
        (KIND_FILE, true) => KIND_EXT_FILE,
        (KIND_SYMLINK, true) => KIND_EXT_SYMLINK,
        (k, false) => k,
        _ => unreachable!(),
    };
    let permissions: u16 = match f.kind {
        KIND_DIR => 0o755,
        KIND_SYMLINK => 0o777,
        _ => 0o644,
    };
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(&permissions.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // uid index
    out.extend_from_slice(&0u16.to_le_bytes()); // gid index
    out.extend_from_slice(&0u32.to_le_bytes()); // mtime
    out.extend_from_slice(&f.inode_num.to_le_bytes());

    match (f.kind, f.extended) {
        (KIND_DIR, false) => {
            let block = meta_block_offset(f.dir_logical, compress_meta) as u32;
            let intra = (f.dir_logical % META_CHUNK as u64) as u16;
            out.extend_from_slice(&block.to_le_bytes());
            out.extend_from_slice(&2u32.to_le_bytes()); // link count
            out.extend_from_slice(&((f.dir_runs.len() + 3) as u16).to_le_bytes());
            out.extend_from_slice(&intra.to_le_bytes());
            out.extend_from_slice(&f.parent_num.to_le_bytes());
        }
        (KIND_DIR, true) => {
            let block = meta_block_offset(f.dir_logical, compress_meta) as u32;
            let intra = (f.dir_logical % META_CHUNK as u64) as u16;
            out.extend_from_slice(&2u32.to_le_bytes()); // link count
            out.extend_from_slice(&((f.dir_runs.len() + 3) as u32).to_le_bytes());
            out.extend_from_slice(&block.to_le_bytes());
            out.extend_from_slice(&f.parent_num.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes()); // index count
            out.extend_from_slice(&intra.to_le_bytes());
            out.extend_from_slice(&u32::MAX.to_le_bytes()); // xattr index
        }
        (KIND_FILE, false) => {
            out.extend_from_slice(&(f.blocks_start as u32).to_le_bytes());
            out.extend_from_slice(&f.frag_index.to_le_bytes());
            out.extend_from_slice(&f.frag_offset.to_le_bytes());
            out.extend_from_slice(&(f.content.len() as u32).to_le_bytes());
            for e in &f.block_entries {
                out.extend_from_slice(&e.to_le_bytes());
            }
        }
        (KIND_FILE, true) => {
            out.extend_from_slice(&f.blocks_start.to_le_bytes());
            out.extend_from_slice(&(f.content.len() as u64).to_le_bytes());
            out.extend_from_slice(&0u64.to_le_bytes()); // sparse
            out.extend_from_slice(&1u32.to_le_bytes()); // link count
            out.extend_from_slice(&f.frag_index.to_le_bytes());
            out.extend_from_slice(&f.frag_offset.to_le_bytes());
            out.extend_from_slice(&u32::MAX.to_le_bytes()); // xattr index
            for e in &f.block_entries {
                out.extend_from_slice(&e.to_le_bytes());
            }
        }
        (KIND_SYMLINK, extended) => {
            out.extend_from_slice(&1u32.to_le_bytes()); // link count
            out.extend_from_slice(&(f.content.len() as u32).to_le_bytes());
            out.extend_from_slice(&f.content);
            if extended {
                out.extend_from_slice(&u32::MAX.to_le_bytes());
            }
        }
        _ => unreachable!(),
    }
}

// ---------------------------------------------------------------------------
// ELF / AppImage container builder
// ---------------------------------------------------------------------------

pub struct ElfSpec<'a> {
    pub sections: Vec<(&'a str, Vec<u8>)>,
    pub class64: bool,
    pub big_endian: bool,
    /// The AppImage format version byte at identification offset 9.
    pub format_version: u8,
}

impl Default for ElfSpec<'_> {
    fn default() -> Self {
        ElfSpec { sections: Vec::new(), class64: true, big_endian: false, format_version: 2 }
    }
}

struct ElfWriter {
    out: Vec<u8>,
    big_endian: bool,
    class64: bool,
}

impl ElfWriter {
    fn u16(&mut self, v: u16) {
        let b = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.out.extend_from_slice(&b);
    }

    fn u32(&mut self, v: u32) {
        let b = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.out.extend_from_slice(&b);
    }

    fn u64(&mut self, v: u64) {
        let b = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.out.extend_from_slice(&b);
    }

    fn word(&mut self, v: u64) {
        if self.class64 {
            self.u64(v);
        } else {
            self.u32(v as u32);
        }
    }
}

/// Assemble an ELF image: header, section data, string table, then the
/// section header table (a null section, the named sections, `.shstrtab`).
pub fn build_elf(spec: &ElfSpec) -> Vec<u8> {
    let ehsize: u64 = if spec.class64 { 64 } else { 52 };
    let shentsize: u16 = if spec.class64 { 64 } else { 40 };
    let shnum = spec.sections.len() as u16 + 2;

    let mut strtab = vec![0u8];
    let mut name_offsets = Vec::new();
    for (name, _) in &spec.sections {
        name_offsets.push(strtab.len() as u32);
        strtab.extend_from_slice(name.as_bytes());
        strtab.push(0);
    }
    let shstrtab_name = strtab.len() as u32;
    strtab.extend_from_slice(b".shstrtab");
    strtab.push(0);

    let mut section_offsets = Vec::new();
    let mut cursor = ehsize;
    for (_, data) in &spec.sections {
        section_offsets.push(cursor);
        cursor += data.len() as u64;
    }
    let strtab_offset = cursor;
    cursor += strtab.len() as u64;
    let shoff = cursor;

    let mut w = ElfWriter { out: Vec::new(), big_endian: spec.big_endian, class64: spec.class64 };
    w.out.extend_from_slice(&[0x7F, b'E', b'L', b'F']);
    w.out.push(if spec.class64 { 2 } else { 1 });
    w.out.push(if spec.big_endian { 2 } else { 1 });
    w.out.push(1); // ident version
    w.out.push(0); // os abi
    w.out.push(0x41); // AppImage magic
    w.out.push(spec.format_version);
    w.out.extend_from_slice(&[0u8; 6]);
    w.u16(2); // e_type: EXEC
    w.u16(if spec.class64 { 62 } else { 3 }); // machine
    w.u32(1); // version
    w.word(0); // entry
    w.word(0); // phoff
    w.word(shoff);
    w.u32(0); // flags
    w.u16(ehsize as u16);
    w.u16(0); // phentsize
    w.u16(0); // phnum
    w.u16(shentsize);
    w.u16(shnum);
    w.u16(shnum - 1); // shstrndx
    assert_eq!(w.out.len() as u64, ehsize);

    for (_, data) in &spec.sections {
        w.out.extend_from_slice(data);
    }
    w.out.extend_from_slice(&strtab);
    assert_eq!(w.out.len() as u64, shoff);

    // Null section header.
    for _ in 0..shentsize {
        w.out.push(0);
    }
    for (i, (_, data)) in spec.sections.iter().enumerate() {
        w.u32(name_offsets[i]);
        w.u32(1); // PROGBITS
        w.word(0); // flags
        w.word(0); // addr
        w.word(section_offsets[i]);
        w.word(data.len() as u64);
        w.u32(0); // link
        w.u32(0); // info
        w.word(1); // addralign
        w.word(0); // entsize
    }
    w.u32(shstrtab_name);
    w.u32(3); // STRTAB
    w.word(0);
    w.word(0);
    w.word(strtab_offset);
    w.word(strtab.len() as u64);
    w.u32(0);
    w.u32(0);
    w.word(1);
    w.word(0);

    w.out
}

/// An AppImage container: the ELF stub followed immediately by the image.
pub fn build_appimage(sections: Vec<(&str, Vec<u8>)>, fs: &FsSpec) -> Vec<u8> {
    let mut container = build_elf(&ElfSpec { sections, ..ElfSpec::default() });
    container.extend_from_slice(&build_squashfs(fs));
    container
}
