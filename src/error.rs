use std::io;

use thiserror::Error;

/// Everything that can go wrong while reading a container.
///
/// Parse and read failures are returned to the caller; this crate never
/// prints diagnostics and never terminates the process. Signature
/// verification *outcomes* are values ([`SignatureStatus`]), not errors;
/// only a failure of the external verifier itself surfaces as
/// [`Error::Signature`].
///
/// [`SignatureStatus`]: crate::appimage::SignatureStatus
#[derive(Error, Debug)]
pub enum Error {
    #[error("not an ELF file: invalid magic bytes")]
    NotElf,

    #[error("unsupported ELF: {0}")]
    UnsupportedElf(String),

    #[error("not an AppImage: expected AppImage magic at offset 0x08")]
    NotAppImage,

    #[error("AppImage format v{0} is not supported")]
    UnsupportedImageFormat(u8),

    #[error("ELF section '{0}' not found")]
    SectionNotFound(String),

    #[error("section name offset outside the string table")]
    BadSectionName,

    #[error("not a SquashFS archive: magic bytes don't match")]
    NotSquashFs,

    #[error("unsupported SquashFS: {0}")]
    UnsupportedSquashFs(String),

    #[error("path not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("too many levels of symbolic links: {0}")]
    SymlinkLoop(String),

    #[error("metadata block truncated")]
    TruncatedMetaBlock,

    #[error("metadata block larger than 8 KiB")]
    OversizeMetaBlock,

    #[error("zlib inflate failed: {0}")]
    ZlibFailure(String),

    #[error("unhandled inode type {0}")]
    UnhandledInode(u16),

    #[error("desktop entry parse error: {0}")]
    DesktopParse(String),

    #[error("signature error: {0}")]
    Signature(String),

    #[error("short read")]
    ShortRead,

    #[error("I/O failure: {0}")]
    Io(io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

// A reader hitting EOF mid-record is a structural problem with the file,
// not an environment failure, so it gets its own stable kind. Errors of this
// type that travelled through an io::Read adapter are unwrapped back out.
impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.downcast::<Error>() {
            Ok(inner) => inner,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Error::ShortRead,
            Err(e) => Error::Io(e),
        }
    }
}
