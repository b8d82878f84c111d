//! Error types for basket decoding and decoder generation.

use thiserror::Error;

/// Errors that can occur while decoding baskets or generating decoders.
#[derive(Error, Debug)]
pub enum RootError {
    /// I/O error opening or mapping a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Buffer underflow (tried to read past end).
    #[error("unexpected end of buffer at offset {offset}, need {need} bytes, have {have}")]
    BufferUnderflow {
        /// Current offset in buffer.
        offset: usize,
        /// Bytes requested.
        need: usize,
        /// Bytes remaining.
        have: usize,
    },

    /// Decompression failure.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// Object or basket deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// No layout is registered for a class (or for one of its versions).
    #[error("unknown class: {0}")]
    UnknownClass(String),

    /// Valid on disk, but not readable by this crate.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// A type cannot be expressed as a generated decoder; the caller must
    /// fall back to the interpreted path.
    #[error("cannot generate decoder: {0}")]
    CannotGenerate(String),

    /// The node tree builder was driven inconsistently.
    #[error("code generation error: {0}")]
    CodeGeneration(String),

    /// Form JSON could not be written or parsed.
    #[error("form JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A node tree violates the structure the schema deriver expects.
    #[error("form derivation failed at node {node:?}: {reason}")]
    FormDerivation {
        /// Display name of the offending node.
        node: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, RootError>;
