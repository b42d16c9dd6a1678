//! Error types for the compressed-vector engine.
//!
//! Every fallible operation in this crate returns [`Result`], aliased to
//! `Result<T, Error>`, so `?` propagates everywhere. Variants map one-to-one
//! onto the conditions a caller can act on:
//!
//! - API misuse: `ImageFileNotOpen`, `ReaderNotOpen`, `WriterNotOpen`,
//!   `BadApiArgument`, `FileReadOnly`, `NotImplemented`
//! - Prototype/path problems: `BadPathName`, `PathUndefined`
//! - Buffer binding problems: `BadBuffer`, `BuffersNotCompatible`,
//!   `ConversionRequired`, `TypeMismatch`
//! - Data problems: `BadCvPacket`, `ValueOutOfRange`, `ChecksumMismatch`
//! - Broken invariants: `Internal` (a bug in this crate, not in the caller)

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad file signature: {0}")]
    BadFileSignature(String),

    #[error("image file is not open")]
    ImageFileNotOpen,

    #[error("image file is read-only; write not supported")]
    FileReadOnly,

    #[error("image file still has {readers} reader(s) and {writers} writer(s) attached")]
    FileInUse { readers: u32, writers: u32 },

    #[error("reader is not open")]
    ReaderNotOpen,

    #[error("writer is not open")]
    WriterNotOpen,

    #[error("bad API argument: {0}")]
    BadApiArgument(String),

    #[error("bad path name: {0}")]
    BadPathName(String),

    #[error("path not defined in prototype: {0}")]
    PathUndefined(String),

    #[error("bad buffer: {0}")]
    BadBuffer(String),

    #[error("rebound buffers not compatible with originals: {0}")]
    BuffersNotCompatible(String),

    #[error("bad compressed-vector packet at logical offset {offset}: {reason}")]
    BadCvPacket { offset: u64, reason: String },

    #[error("value out of range at record {record}: {reason}")]
    ValueOutOfRange { record: u64, reason: String },

    #[error("transfer requires conversion that buffer '{path}' did not opt into: {reason}")]
    ConversionRequired { path: String, reason: String },

    #[error("impossible representation pair for buffer '{path}': {reason}")]
    TypeMismatch { path: String, reason: String },

    #[error("page checksum mismatch at physical offset {offset}")]
    ChecksumMismatch { offset: u64 },

    #[error("not implemented")]
    NotImplemented,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
