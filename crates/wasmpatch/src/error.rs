//! Error types for the decode → patch → encode pipeline.
//!
//! Every stage returns its own typed error; [`Error`] wraps them so callers of
//! [`crate::patch_bytes`] deal with a single type. None of these errors ever
//! comes with a partially built module or output buffer.

use crate::module::SectionKind;
use thiserror::Error;

/// A decode failure, located by absolute byte offset and (when known) by the
/// section being decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at offset {offset:#x}{}", section_suffix(.section))]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    /// Absolute offset into the input buffer.
    pub offset: usize,
    pub section: Option<SectionKind>,
}

fn section_suffix(section: &Option<SectionKind>) -> String {
    match section {
        Some(kind) => format!(" in {kind} section"),
        None => String::new(),
    }
}

impl DecodeError {
    pub fn new(kind: DecodeErrorKind, offset: usize) -> Self {
        Self {
            kind,
            offset,
            section: None,
        }
    }

    /// Tags the error with the section it occurred in, keeping an inner tag if
    /// one was already set.
    pub fn in_section(mut self, kind: SectionKind) -> Self {
        self.section.get_or_insert(kind);
        self
    }
}

/// What went wrong while decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeErrorKind {
    #[error("bad magic number (not a WebAssembly binary)")]
    BadMagic,
    #[error("unsupported binary version {0}")]
    UnsupportedVersion(u32),
    #[error("unexpected end of input")]
    UnexpectedEof,
    /// The encoding ran past the maximum byte count for its bit width.
    #[error("malformed {bits}-bit LEB128 integer (encoding too long)")]
    MalformedInteger { bits: u32 },
    /// The final byte carries bits that do not fit the declared width.
    #[error("LEB128 integer too large for {bits} bits")]
    IntegerTooLarge { bits: u32 },
    #[error("vector count {count} exceeds the {remaining} bytes left")]
    CountTooLarge { count: u32, remaining: usize },
    #[error("declared length {declared} exceeds the {remaining} bytes left")]
    LengthOverrun { declared: u32, remaining: usize },
    #[error("declared size {declared} but payload decoded to {consumed} bytes")]
    SizeMismatch { declared: usize, consumed: usize },
    #[error("duplicate section")]
    DuplicateSection,
    #[error("invalid UTF-8 in name")]
    InvalidUtf8,
    #[error("invalid {what} byte {byte:#04x}")]
    InvalidByte { what: &'static str, byte: u8 },
    #[error("invalid {what} segment flags {flags}")]
    InvalidSegmentFlags { what: &'static str, flags: u32 },
    #[error("unsupported {0}")]
    Unsupported(&'static str),
}

/// A patch rule that cannot be carried out on this module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("module declares no memory to resize")]
    NoMemory,
    #[error("requested {pages} pages exceeds the {limit}-page limit")]
    PagesOutOfRange { pages: u32, limit: u32 },
}

/// A module invariant that would be violated by the encoded output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("memory {index}: minimum {min} exceeds maximum {max}")]
    MemoryLimitsInverted { index: u32, min: u32, max: u32 },
    #[error("memory {index}: {pages} pages exceeds the {limit}-page limit")]
    PagesOutOfRange { index: u32, pages: u32, limit: u32 },
    #[error("memory {index}: shared memory must declare a maximum")]
    SharedMemoryWithoutMax { index: u32 },
    #[error("table {index}: minimum {min} exceeds maximum {max}")]
    TableLimitsInverted { index: u32, min: u32, max: u32 },
    #[error("{what} length {len} does not fit in 32 bits")]
    TooLarge { what: &'static str, len: usize },
}

/// Any failure of the patch pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to decode module")]
    Decode(#[from] DecodeError),
    #[error("failed to apply patch")]
    Patch(#[from] PatchError),
    #[error("failed to encode module")]
    Encode(#[from] EncodeError),
    #[error("encoded module failed verification")]
    Verify(#[from] wasmparser::BinaryReaderError),
}
