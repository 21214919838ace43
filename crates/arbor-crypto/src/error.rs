//! Error types for the crypto and codec layers.

use thiserror::Error;

/// Errors from key derivation primitives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The pseudorandom key handed to HKDF-Expand is shorter than the hash
    /// output
    #[error("invalid PRK length: need at least {minimum} bytes, got {actual}")]
    InvalidPrkLength {
        /// Minimum acceptable length (hash output size)
        minimum: usize,
        /// Length that was supplied
        actual: usize,
    },

    /// Requested output is longer than HKDF-Expand can produce
    #[error("invalid HKDF output length {requested}: maximum is {maximum}")]
    InvalidOutputLength {
        /// Requested output length
        requested: usize,
        /// Largest length the hash supports
        maximum: usize,
    },

    /// Prefixed label does not fit its 1-byte length prefix
    #[error("invalid label length {len}: maximum is {max}")]
    InvalidLabelLength {
        /// Length of the label including the prefix
        len: usize,
        /// Largest encodable length
        max: usize,
    },

    /// Context does not fit its 4-byte length prefix
    #[error("invalid context length {len}: maximum is {max}")]
    InvalidContextLength {
        /// Length of the context
        len: usize,
        /// Largest encodable length
        max: usize,
    },
}

/// Errors from encoding or decoding key schedule state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before a complete value was read
    #[error("truncated input: need {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required by the next field
        needed: usize,
        /// Bytes left in the input
        remaining: usize,
    },

    /// A field is too long for its length prefix
    #[error("field too long: {len} exceeds maximum {max}")]
    FieldTooLong {
        /// Actual length
        len: usize,
        /// Maximum encodable length
        max: usize,
    },

    /// Cipher suite identifier is not supported
    #[error("unknown cipher suite: {0:#06x}")]
    UnknownCipherSuite(u16),

    /// Enum tag does not name a known variant
    #[error("unknown {kind} variant tag: {tag}")]
    UnknownVariant {
        /// Type being decoded
        kind: &'static str,
        /// Tag that was read
        tag: u8,
    },

    /// Input continued after a complete value
    #[error("trailing bytes after value: {remaining}")]
    TrailingBytes {
        /// Unconsumed byte count
        remaining: usize,
    },

    /// Decoded value is structurally inconsistent
    #[error("invalid encoding: {reason}")]
    Invalid {
        /// What was wrong with the value
        reason: String,
    },
}
