//! Error types for wire protocol operations.

use thiserror::Error;

/// Errors that can occur while reading or decoding a plugin payload.
///
/// The first three variants are precise protocol violations and are
/// reported to producers as such; the remaining ones describe all other
/// ways a read can fail and are normalised by the registry.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Header marker missing, malformed or truncated.
    #[error("invalid header string")]
    InvalidHeaderString,

    /// A declared length or count falls outside what the buffer (or the
    /// protocol bound) can satisfy.
    #[error("invalid length field: declared {declared}, available {available}")]
    InvalidLengthField {
        /// Length or count the payload declares.
        declared: usize,
        /// What the buffer or the protocol bound actually allows.
        available: usize,
    },

    /// A declared checksum does not match the covered bytes.
    #[error("invalid checksum")]
    InvalidChecksum,

    /// Payload content is structurally sound but semantically malformed.
    #[error("malformed payload: {0}")]
    Payload(String),

    /// I/O error while fetching the payload bytes.
    #[error("payload read failed: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
