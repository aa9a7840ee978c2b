//! Error types for the USM codec.
//!
//! One flat enum rather than the teacher's per-concern split
//! (`SyncError`, `BlockError`, ...): USM has a single linear pipeline
//! (bytes -> chunk -> page) instead of dozens of independently
//! fallible bitstream syntax elements, so one enum covers every layer
//! without losing which layer raised it.

#[derive(thiserror::Error, Debug)]
pub enum UsmError {
    #[error("buffer underrun at offset {offset}: needed {needed} bytes, {available} available")]
    BufferUnderrun {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("bad signature: {context}")]
    BadSignature { context: String },

    #[error("unknown chunk signature: {0:#010X}")]
    UnknownSignature(u32),

    #[error("bad chunk geometry: {0}")]
    BadChunkGeometry(String),

    #[error("unknown element type byte {0:#04X}")]
    UnknownElementType(u8),

    #[error("unknown element occurrence byte {0:#04X}")]
    UnknownOccurrence(u8),

    #[error("unterminated string at offset {offset}")]
    UnterminatedString { offset: usize },

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("no file-level CRID page (chno == -1) found")]
    MissingUsmCrid,

    #[error("channel {channel} of kind {kind} has stream data but no matching CRID page")]
    OrphanChannel { channel: i16, kind: &'static str },

    #[error("bad key length: expected {expected}, got {actual}")]
    BadKeyLength { expected: usize, actual: usize },

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, UsmError>;
