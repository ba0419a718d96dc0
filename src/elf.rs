//! Just enough ELF parsing to deal with AppImage containers: the
//! identification block, the 32/64-bit header, and the section header table
//! with pre-resolved names.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};

pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Elf32,
    Elf64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

// byteorder dispatches endianness at the type level; the ELF data byte is
// only known at runtime, so dispatch per read instead.
impl Endian {
    fn u16<R: Read>(self, r: &mut R) -> Result<u16> {
        Ok(match self {
            Endian::Little => r.read_u16::<LittleEndian>()?,
            Endian::Big => r.read_u16::<BigEndian>()?,
        })
    }

    fn u32<R: Read>(self, r: &mut R) -> Result<u32> {
        Ok(match self {
            Endian::Little => r.read_u32::<LittleEndian>()?,
            Endian::Big => r.read_u32::<BigEndian>()?,
        })
    }

    fn u64<R: Read>(self, r: &mut R) -> Result<u64> {
        Ok(match self {
            Endian::Little => r.read_u64::<LittleEndian>()?,
            Endian::Big => r.read_u64::<BigEndian>()?,
        })
    }

    /// A size/offset field: 32 bits on ELF32, widened to u64.
    fn word<R: Read>(self, r: &mut R, class: Class) -> Result<u64> {
        match class {
            Class::Elf32 => Ok(self.u32(r)?.into()),
            Class::Elf64 => self.u64(r),
        }
    }
}

/// A named, offset-length region within the ELF file. Sections hold no file
/// handle; content is fetched by the owner of the byte source.
#[derive(Debug, Clone)]
pub struct Section {
    name: String,
    pub sh_type: u32,
    pub flags: u64,
    pub addr: u64,
    offset: u64,
    size: u64,
    pub link: u32,
    pub info: u32,
    pub addralign: u64,
    pub entsize: u64,
}

impl Section {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Parsed ELF identification, header, and section headers.
#[derive(Debug)]
pub struct Elf {
    pub class: Class,
    pub endian: Endian,
    ident: [u8; 16],
    pub e_type: u16,
    pub machine: u16,
    pub entry: u64,
    pub phoff: u64,
    pub shoff: u64,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
    sections: Vec<Section>,
}

impl Elf {
    /// Parse the header and section table from a source positioned over an
    /// ELF image at offset 0. All section names are resolved eagerly.
    pub fn read<R: Read + Seek>(r: &mut R) -> Result<Self> {
        r.seek(SeekFrom::Start(0))?;
        let mut ident = [0u8; 16];
        r.read_exact(&mut ident)?;

        if ident[0..4] != ELF_MAGIC {
            return Err(Error::NotElf);
        }
        let class = match ident[4] {
            1 => Class::Elf32,
            2 => Class::Elf64,
            c => return Err(Error::UnsupportedElf(format!("unknown ELF class {c}"))),
        };
        let endian = match ident[5] {
            1 => Endian::Little,
            2 => Endian::Big,
            d => return Err(Error::UnsupportedElf(format!("unknown ELF data encoding {d}"))),
        };

        let e_type = endian.u16(r)?;
        let machine = endian.u16(r)?;
        let _version = endian.u32(r)?;
        let entry = endian.word(r, class)?;
        let phoff = endian.word(r, class)?;
        let shoff = endian.word(r, class)?;
        let _flags = endian.u32(r)?;
        let _ehsize = endian.u16(r)?;
        let _phentsize = endian.u16(r)?;
        let _phnum = endian.u16(r)?;
        let shentsize = endian.u16(r)?;
        let shnum = endian.u16(r)?;
        let shstrndx = endian.u16(r)?;

        r.seek(SeekFrom::Start(shoff))?;
        let mut name_offsets = Vec::with_capacity(shnum.into());
        let mut sections = Vec::with_capacity(shnum.into());
        for _ in 0..shnum {
            let (name_offset, section) = read_section_header(r, endian, class)?;
            name_offsets.push(name_offset);
            sections.push(section);
        }
        resolve_section_names(r, &mut sections, &name_offsets, shstrndx)?;

        Ok(Elf {
            class,
            endian,
            ident,
            e_type,
            machine,
            entry,
            phoff,
            shoff,
            shentsize,
            shnum,
            shstrndx,
            sections,
        })
    }

    /// The 16 identification bytes. AppImage stashes its magic and format
    /// version at indices 8 and 9.
    pub fn ident(&self) -> &[u8; 16] {
        &self.ident
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Look up a section by its resolved name.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// End of the ELF region: the byte just past the section header table.
    /// In an AppImage the embedded filesystem starts here.
    pub fn end_offset(&self) -> u64 {
        self.shoff + u64::from(self.shentsize) * u64::from(self.shnum)
    }
}

fn read_section_header<R: Read>(r: &mut R, endian: Endian, class: Class) -> Result<(u32, Section)> {
    let name_offset = endian.u32(r)?;
    let sh_type = endian.u32(r)?;
    let flags = endian.word(r, class)?;
    let addr = endian.word(r, class)?;
    let offset = endian.word(r, class)?;
    let size = endian.word(r, class)?;
    let link = endian.u32(r)?;
    let info = endian.u32(r)?;
    let addralign = endian.word(r, class)?;
    let entsize = endian.word(r, class)?;
    let section = Section {
        name: String::new(),
        sh_type,
        flags,
        addr,
        offset,
        size,
        link,
        info,
        addralign,
        entsize,
    };
    Ok((name_offset, section))
}

fn resolve_section_names<R: Read + Seek>(
    r: &mut R,
    sections: &mut [Section],
    name_offsets: &[u32],
    shstrndx: u16,
) -> Result<()> {
    let strtab = sections.get(usize::from(shstrndx)).ok_or(Error::BadSectionName)?;
    let mut table = vec![0u8; strtab.size.try_into().map_err(|_| Error::BadSectionName)?];
    r.seek(SeekFrom::Start(strtab.offset))?;
    r.read_exact(&mut table)?;

    for (section, &name_offset) in sections.iter_mut().zip(name_offsets) {
        let start = usize::try_from(name_offset).map_err(|_| Error::BadSectionName)?;
        if start > table.len() {
            return Err(Error::BadSectionName);
        }
        let tail = &table[start..];
        let end = tail.iter().position(|&b| b == 0).ok_or(Error::BadSectionName)?;
        section.name = String::from_utf8_lossy(&tail[..end]).into_owned();
    }
    Ok(())
}
