//! Herein lies an in-place metadata editor for MP4/M4A files.
//!
//! The crate locates atoms ("boxes") inside an already encoded file, grows
//! them without touching unrelated payload, and keeps every ancestor atom's
//! declared size consistent after the edit. Its main job is injecting
//! iTunes-style tags into the `moov/udta/meta/ilst` chain:
//!
//! ```text
//! ftyp
//! moov
//!   ├── trak
//!   └── udta
//!       └── meta          (4-byte version/flags before children)
//!           └── ilst      (iTunes metadata list)
//!               ├── ©nam → data
//!               ├── ©ART → data
//!               └── ...
//! ```
//!
//! Use [`Mp4File`] to wrap an open read+write file handle and
//! [`Metadata::write_to`][Metadata] to replace the `ilst` payload. The
//! [`chapter`] module is experimental scaffolding for chapter track
//! references.
//!
//! All I/O is synchronous and blocking, and nothing here is atomic or
//! lock-protected: run one mutation sequence per file at a time, and wrap
//! calls in a copy-to-temporary-then-rename scheme if a crash mid-write
//! must not leave the file partially grown.

pub mod chapter;
mod file;
mod header;
mod meta;

pub use chapter::{Chapter, ChapterIndex};
pub use file::{Atom, Mp4File};
pub use header::{AtomHeader, FourCc};
pub use meta::Metadata;

/// Errors arising from parsing or editing an MP4 file.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An atom header was cut short by the end of the file. Only a clean
    /// boundary (zero bytes left) counts as "container exhausted"; anything
    /// between 1 and 7 bytes is structural damage.
    #[error("truncated atom header: {available} of 8 bytes available")]
    TruncatedHeader { available: usize },

    /// An atom declared a size smaller than its own header, which would
    /// make a scan loop forever or seek backwards.
    #[error("malformed atom '{tag}': declared size {size} is smaller than its 8-byte header")]
    MalformedBox { tag: FourCc, size: u32 },

    /// A box required for the edit is absent from the file.
    #[error("required atom '{0}' not found")]
    RequiredBoxMissing(FourCc),

    /// The box being edited is not the last content in the file, so
    /// resizing it would silently corrupt whatever follows.
    #[error(
        "atom '{tag}' ends at {end:#x} but the file continues to {file_len:#x}; refusing to edit"
    )]
    TrailingData { tag: FourCc, end: u64, file_len: u64 },

    /// A value is too large to represent in the on-disk encoding.
    #[error("value of {len} bytes does not fit in its atom encoding")]
    OversizedValue { len: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
