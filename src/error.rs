//! Unified error types for graphseal.
//!
//! Token-level failures are deliberately coarse: `InvalidToken` never says
//! which window or byte failed, so a remote caller cannot use the error as
//! an oracle. Codec failures carry structural detail because codec input is
//! only ever reached after authentication.

use thiserror::Error;

/// Top-level error for envelope operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Token framing or base64 violation, detected before any cryptography.
    #[error("malformed token")]
    MalformedToken,

    /// Authentication failed for every tried key window.
    #[error("invalid token")]
    InvalidToken,

    /// Token authenticated but its validity window has elapsed.
    #[error("expired token")]
    ExpiredToken,

    /// Structural failure while decoding already-authenticated bytes.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Invalid construction parameters. Raised eagerly, never mid-operation.
    #[error("configuration error: {0}")]
    Configuration(&'static str),

    /// The secure random source failed.
    #[error("random source failure")]
    Rng,
}

/// Structural failure in the binary graph codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated stream")]
    Truncated,

    #[error("unknown type tag {0:#04x}")]
    UnknownTag(u8),

    #[error("malformed varint prefix")]
    BadVarint,

    #[error("backreference {0} out of range")]
    BadBackref(u64),

    #[error("corrupt compressed payload")]
    Corrupt,

    #[error("invalid utf-8 in text payload")]
    InvalidText,

    #[error("length field out of range")]
    IntOverflow,

    #[error("allocation of {requested} bytes exceeds ceiling of {ceiling}")]
    AllocationCeiling { requested: u64, ceiling: u64 },

    #[error("nesting depth exceeds limit")]
    NestingTooDeep,

    #[error("trailing bytes after value")]
    TrailingBytes,

    #[error("invalid padding on authenticated plaintext")]
    BadPadding,

    /// Encode-side only: graph has no root or a dangling node reference.
    #[error("dangling or missing graph node")]
    InvalidGraph,
}
