//! The AppImage container facade: an ELF runtime stub immediately followed
//! by a SquashFS image holding the application bundle.
//!
//! The facade glues the ELF section reader and the embedded filesystem
//! together and adds the container-level operations: metadata sections,
//! signature-exempt digests, and stable identity derivation.

mod identity;
mod skip;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use log::debug;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::appstream;
use crate::desktop::DesktopFile;
use crate::elf::Elf;
use crate::error::{Error, Result};
use crate::source::{SharedSource, SourceWindow};
use crate::squashfs::SquashFS;

pub use identity::AppImageId;
pub use skip::SkipReader;

/// ELF section holding the detached signature.
pub const SECTION_SIGNATURE: &str = ".sha256_sig";
/// ELF section holding the signer's public key ring.
pub const SECTION_SIG_KEY: &str = ".sig_key";
/// ELF section holding update information.
pub const SECTION_UPDATE_INFO: &str = ".upd_info";

/// A read-only handle on an AppImage type-2 container.
///
/// All child views (ELF sections, the embedded filesystem, open file
/// readers) share the container's single underlying handle and become
/// invalid when it is dropped.
pub struct AppImage<R> {
    shared: SharedSource<R>,
    file_len: u64,
    elf: Elf,
    fs: SquashFS<SourceWindow<R>>,
    format_version: u8,
    source_name: Option<String>,
}

impl AppImage<File> {
    /// Open a container file. The file name is retained as the identity
    /// derivation fallback.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let name = path
            .as_ref()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        let file = File::open(path)?;
        Self::from_parts(file, name)
    }
}

impl<R: Read + Seek> AppImage<R> {
    /// Open a container from an arbitrary reader, e.g. an in-memory image.
    pub fn new(reader: R) -> Result<Self> {
        Self::from_parts(reader, None)
    }

    /// Like [`AppImage::new`], with an on-disk file name for identity
    /// derivation.
    pub fn new_named(reader: R, name: &str) -> Result<Self> {
        Self::from_parts(reader, Some(name.to_string()))
    }

    fn from_parts(mut reader: R, source_name: Option<String>) -> Result<Self> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        let shared = SharedSource::new(reader);

        let mut elf_view = shared.window(0, file_len);
        let elf = Elf::read(&mut elf_view)?;

        // AppImage magic: 'A' at identification byte 8, format version at 9.
        let ident = elf.ident();
        if ident[8] != 0x41 {
            return Err(Error::NotAppImage);
        }
        let format_version = ident[9];
        if format_version != 1 && format_version != 2 {
            return Err(Error::NotAppImage);
        }
        if format_version == 1 {
            return Err(Error::UnsupportedImageFormat(1));
        }

        let elf_end = elf.end_offset();
        if elf_end >= file_len {
            return Err(Error::ShortRead);
        }
        debug!("appimage: ELF region ends at {elf_end}, container is {file_len} bytes");

        let fs = SquashFS::new(shared.window(elf_end, file_len - elf_end))?;
        Ok(AppImage { shared, file_len, elf, fs, format_version, source_name })
    }

    /// The AppImage format version from the identification block (always 2).
    pub fn image_format_type(&self) -> u8 {
        self.format_version
    }

    /// The parsed ELF view of the runtime stub.
    pub fn elf(&self) -> &Elf {
        &self.elf
    }

    /// The embedded read-only filesystem.
    pub fn filesystem(&self) -> &SquashFS<SourceWindow<R>> {
        &self.fs
    }

    /// Raw contents of a named ELF section.
    pub fn section_data(&self, name: &str) -> Result<Vec<u8>> {
        let section = self
            .elf
            .section(name)
            .ok_or_else(|| Error::SectionNotFound(name.to_string()))?;
        let mut window = self.shared.window(section.offset(), section.size());
        let mut buf = Vec::with_capacity(section.size() as usize);
        window.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// A named ELF section as text, with the NUL padding trimmed.
    pub fn section_as_string(&self, name: &str) -> Result<String> {
        let mut bytes = self.section_data(name)?;
        while bytes.last() == Some(&0) {
            bytes.pop();
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// The embedded update information, e.g.
    /// `gh-releases-zsync|user|repo|latest|App-*.AppImage`.
    pub fn update_info(&self) -> Result<String> {
        self.section_as_string(SECTION_UPDATE_INFO)
    }

    /// A reader over the whole container with the signature-bearing sections
    /// replaced by zeros. Emits exactly the container's length.
    pub fn unsigned_reader(&self) -> SkipReader<SourceWindow<R>> {
        let mut ranges = Vec::new();
        for name in [SECTION_SIGNATURE, SECTION_SIG_KEY] {
            if let Some(section) = self.elf.section(name) {
                ranges.push((section.offset(), section.size()));
            }
        }
        SkipReader::new(self.shared.window(0, self.file_len), &ranges)
    }

    fn stream_unsigned(&self, mut update: impl FnMut(&[u8])) -> Result<()> {
        let mut reader = self.unsigned_reader();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            update(&buf[..n]);
        }
    }

    /// SHA-256 of the container with the signature sections zeroed. This is
    /// the digest a detached signature covers.
    pub fn unsigned_sha256(&self) -> Result<[u8; 32]> {
        let mut hasher = Sha256::new();
        self.stream_unsigned(|chunk| hasher.update(chunk))?;
        Ok(hasher.finalize().into())
    }

    /// SHA-1 twin of [`unsigned_sha256`], for update channels keyed on SHA-1.
    ///
    /// [`unsigned_sha256`]: AppImage::unsigned_sha256
    pub fn unsigned_sha1(&self) -> Result<[u8; 20]> {
        let mut hasher = Sha1::new();
        self.stream_unsigned(|chunk| hasher.update(chunk))?;
        Ok(hasher.finalize().into())
    }

    /// Whether both signature sections are present and non-empty.
    pub fn has_signature(&self) -> bool {
        let filled = |name| {
            self.section_as_string(name)
                .map(|s| !s.is_empty())
                .unwrap_or(false)
        };
        filled(SECTION_SIGNATURE) && filled(SECTION_SIG_KEY)
    }

    /// Everything an external OpenPGP verifier needs: the armored key ring,
    /// the armored detached signature, and the signed text. Returns None
    /// when the container carries no signature.
    ///
    /// The signature covers the lowercase hexadecimal ASCII encoding of the
    /// unsigned SHA-256, not the raw digest bytes.
    pub fn signature_material(&self) -> Result<Option<SignatureMaterial>> {
        if !self.has_signature() {
            return Ok(None);
        }
        let key = self.section_as_string(SECTION_SIG_KEY)?.into_bytes();
        let signature = self.section_as_string(SECTION_SIGNATURE)?.into_bytes();
        let digest_hex = hex_string(&self.unsigned_sha256()?);
        Ok(Some(SignatureMaterial { key, signature, digest_hex }))
    }

    /// Fold an external OpenPGP check into a [`SignatureStatus`].
    ///
    /// The verifier receives the [`SignatureMaterial`] and reports the
    /// signer's identity strings on success, `None` when the signature does
    /// not check out, or an error when the cryptographic machinery itself
    /// failed. Only the last case is an [`Error::Signature`], and it does
    /// not invalidate the container for other uses.
    pub fn verify_signature_with<F>(&self, verifier: F) -> Result<SignatureStatus>
    where
        F: FnOnce(&SignatureMaterial) -> std::result::Result<Option<Vec<String>>, String>,
    {
        let material = match self.signature_material()? {
            None => return Ok(SignatureStatus::NoSignature),
            Some(m) => m,
        };
        match verifier(&material) {
            Ok(Some(identities)) => Ok(SignatureStatus::Verified(identities)),
            Ok(None) => Ok(SignatureStatus::Unverified),
            Err(e) => Err(Error::Signature(e)),
        }
    }

    /// The application's desktop-entry file: the first `*.desktop` at the
    /// filesystem root.
    pub fn desktop_file(&self) -> Result<DesktopFile> {
        let entry = self
            .fs
            .read_dir("/")?
            .find(|e| e.file_name().ends_with(".desktop"))
            .ok_or_else(|| Error::NotFound("*.desktop".to_string()))?;
        let name = entry.file_name().to_string();
        let mut reader = self.fs.open_file(format!("/{name}"))?;
        let mut content = String::new();
        reader.read_to_string(&mut content)?;
        DesktopFile::parse(&content)
    }

    /// Look up a key in the `Desktop Entry` group of the desktop file.
    pub fn desktop_entry(&self, key: &str) -> Result<Option<String>> {
        let file = self.desktop_file()?;
        Ok(file
            .group("Desktop Entry")
            .and_then(|g| g.get(key))
            .map(str::to_owned))
    }

    /// The `.DirIcon` image at the filesystem root, with its format guessed
    /// from the symlink target when `.DirIcon` is a symlink.
    pub fn icon(&self) -> Result<(Vec<u8>, IconKind)> {
        let mut reader = self.fs.open_file("/.DirIcon")?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;

        let kind = match self.fs.symlink_target("/.DirIcon")? {
            Some(target) => {
                let target = target.to_lowercase();
                if target.ends_with(".svg") || target.ends_with(".svgz") {
                    IconKind::Svg
                } else {
                    IconKind::Png
                }
            }
            None => IconKind::Png,
        };
        Ok((bytes, kind))
    }

    /// Derive the stable application identity.
    ///
    /// Precedence: AppStream component id, update information, desktop-entry
    /// `Name`, on-disk file name. Each source is consulted only when every
    /// earlier one is absent or malformed.
    pub fn id(&self) -> AppImageId {
        if let Some(id) = self.appstream_id() {
            return id;
        }
        if let Some(id) = self
            .update_info()
            .ok()
            .and_then(|info| identity::from_update_info(&info))
        {
            return id;
        }
        if let Some(id) = self
            .desktop_entry("Name")
            .ok()
            .flatten()
            .and_then(|name| identity::from_desktop_name(&name))
        {
            return id;
        }
        identity::from_file_name(self.source_name.as_deref().unwrap_or(""))
    }

    /// The `<component><id>` of the AppStream metadata at
    /// `usr/share/appdata/*.appdata.xml`, if present and non-empty.
    fn appstream_id(&self) -> Option<AppImageId> {
        let dir = "usr/share/appdata";
        let entry = self
            .fs
            .read_dir(dir)
            .ok()?
            .find(|e| e.file_name().ends_with(".appdata.xml"))?;
        let mut reader = self
            .fs
            .open_file(format!("{dir}/{}", entry.file_name()))
            .ok()?;
        let mut xml = String::new();
        reader.read_to_string(&mut xml).ok()?;
        let id = appstream::component_id(&xml)?;
        Some(AppImageId(id))
    }
}

/// Inputs for an external OpenPGP verifier.
#[derive(Debug, Clone)]
pub struct SignatureMaterial {
    /// ASCII-armored public key ring from `.sig_key`.
    pub key: Vec<u8>,
    /// ASCII-armored detached signature from `.sha256_sig`.
    pub signature: Vec<u8>,
    /// The signed text: lowercase hex of the unsigned SHA-256.
    pub digest_hex: String,
}

/// Outcome of an external signature check. Not an error: an unsigned or
/// badly signed container is still readable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    /// The signature verified; carries the signer's identity strings.
    Verified(Vec<String>),
    Unverified,
    NoSignature,
}

/// Format of the `.DirIcon` root icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconKind {
    Png,
    Svg,
}

fn hex_string(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}
