//! Error types for the qapi domain layer.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`ReaderError`] - Byte-level SCALE reading errors
//! - [`MetadataError`] - Runtime metadata decoding errors
//! - [`ChainError`] - Transport and RPC errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// Reader Errors
// =============================================================================

/// Byte-level reading errors.
///
/// Every variant carries the offset at which the read was attempted and
/// enough context to name the operation that failed, so a metadata decode
/// failure can be located inside a multi-megabyte blob.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReaderError {
    /// A read ran past the end of the input.
    #[error("out of bounds reading {op} at offset {offset}")]
    OutOfBounds {
        /// Operation that was attempted (e.g. "u8", "text bytes").
        op: &'static str,
        /// Offset at which the read started.
        offset: usize,
    },

    /// A compact integer used as an in-buffer length or id declared a
    /// big-integer payload wider than 4 bytes.
    #[error("compact at offset {offset} declares a {payload}-byte payload, not usable as a length")]
    InvalidCompactMode {
        /// Offset of the compact's first byte.
        offset: usize,
        /// Declared payload width in bytes.
        payload: usize,
    },

    /// An `Option` tag byte was neither 0 nor 1.
    #[error("invalid option tag {tag:#04x} at offset {offset}")]
    InvalidOptionTag {
        /// The tag byte that was read.
        tag: u8,
        /// Offset of the tag byte.
        offset: usize,
    },

    /// A one-byte enum discriminant was outside the known variants.
    #[error("invalid {what} tag {tag} at offset {offset}")]
    InvalidEnumTag {
        /// What was being discriminated (e.g. "storage kind").
        what: &'static str,
        /// The discriminant byte that was read.
        tag: u8,
        /// Offset of the discriminant byte.
        offset: usize,
    },

    /// A SCALE string was not valid UTF-8.
    #[error("invalid utf-8 in string at offset {offset}")]
    InvalidUtf8 {
        /// Offset of the first string byte.
        offset: usize,
    },
}

// =============================================================================
// Metadata Errors
// =============================================================================

/// Runtime metadata decoding errors.
///
/// These are the terminal failures of the decoder. Tolerated per-type and
/// per-pallet failures never surface here - they are recorded as
/// [`DecodeWarning`](crate::metadata::DecodeWarning)s on a best-effort table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    /// The version byte was outside the supported {14, 15, 16} trio.
    #[error("unsupported metadata version {0}")]
    UnsupportedVersion(u8),

    /// A type definition carried an unknown discriminant.
    #[error("unknown type definition tag {tag} in type #{ordinal}")]
    UnknownTypeDef {
        /// Ordinal of the type in the registry vec.
        ordinal: u32,
        /// The unrecognized discriminant byte.
        tag: u8,
    },

    /// The registry pass produced no usable types: whatever followed
    /// the version byte was not a type registry.
    #[error("type registry unusable: {declared} types declared, none intact")]
    RegistryUnusable {
        /// The declared type count.
        declared: u32,
    },

    /// No normalization candidate produced a parseable blob.
    #[error("metadata unparseable (starts with {preview})")]
    Unparseable {
        /// Hex of the first bytes of the raw payload, for diagnosis.
        preview: String,
    },

    /// Low-level read failure.
    #[error(transparent)]
    Reader(#[from] ReaderError),
}

// =============================================================================
// Chain Errors
// =============================================================================

/// Transport and RPC errors.
///
/// These errors occur when communicating with the node over the
/// WebSocket JSON-RPC channel.
#[derive(Debug, Error)]
pub enum ChainError {
    /// WebSocket connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The node answered a request with a JSON-RPC error object.
    #[error("rpc error: {0}")]
    Rpc(serde_json::Value),

    /// The socket dropped while requests were in flight.
    #[error("transport closed")]
    TransportClosed,

    /// A request deadline elapsed without a response.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Subscription setup failed or the server returned an unusable id.
    #[error("subscription error: {0}")]
    Subscription(String),

    /// A block could not be produced even after retries and the header
    /// fallback.
    #[error("block {0} unavailable")]
    BlockUnavailable(String),

    /// A hex string crossing the API boundary was malformed.
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    /// Runtime metadata could not be decoded.
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for byte-level reads.
pub type ReaderResult<T> = Result<T, ReaderError>;

/// Result type for metadata decoding.
pub type MetadataResult<T> = Result<T, MetadataError>;

/// Result type for transport and facade operations.
pub type ChainResult<T> = Result<T, ChainError>;
