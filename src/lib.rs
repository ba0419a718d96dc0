//! Applens provides read-only access to AppImage type-2 containers: the ELF
//! runtime stub, the embedded SquashFS filesystem, the signature-exempt
//! container digests, and a stable application identity.
//!
//! # Usage Example
//! ```no_run
//! use std::io::Read;
//! use applens::appimage::AppImage;
//!
//! fn print_desktop_file() -> applens::Result<()> {
//!     // Open the container
//!     let ai = AppImage::open("MyApp.AppImage")?;
//!
//!     // List the contents of the bundle root
//!     for entry in ai.filesystem().read_dir("/")? {
//!         println!("{}", entry.file_name());
//!     }
//!
//!     // Read a file out of the bundle
//!     let mut reader = ai.filesystem().open_file("/AppRun")?;
//!     let mut buf = Vec::new();
//!     reader.read_to_end(&mut buf)?;
//!
//!     // The digest a detached signature would cover
//!     let digest = ai.unsigned_sha256()?;
//!     println!("{digest:02x?}");
//!     Ok(())
//! }
//! ```
//!
//! # Scope
//! Only type-2 containers (ELF stub + SquashFS v4.0) are supported, and only
//! zlib-compressed images. Signature *verification* is out of scope: the
//! container exposes the unsigned digest and the raw key and signature bytes
//! for an external OpenPGP implementation.

pub mod appimage;
pub mod appstream;
pub mod desktop;
pub mod elf;
pub mod error;
pub mod source;
pub mod squashfs;

pub use error::{Error, Result};
