//! Error types for the key schedule.
//!
//! Two classes of failure:
//! - Recoverable lookups (`ExpiredKey`, `TooFarAhead`): the caller decides
//!   whether to drop the affected message
//! - Fatal conditions: a programming or protocol-logic defect upstream. The
//!   enclosing operation must be aborted; retrying cannot succeed

use arbor_crypto::{CodecError, CryptoError, LeafCount, LeafIndex};
use thiserror::Error;

/// Errors from key schedule, base key source and ratchet operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyScheduleError {
    /// Requested generation is behind the ratchet and no longer cached
    #[error("expired key: generation {generation} is behind next generation {next_generation}")]
    ExpiredKey {
        /// Generation that was requested
        generation: u32,
        /// Ratchet's next unconsumed generation
        next_generation: u32,
    },

    /// Requested generation is further ahead than the configured skip limit
    #[error("generation {requested} too far ahead of {next_generation} (max skip {max_skip})")]
    TooFarAhead {
        /// Generation that was requested
        requested: u32,
        /// Ratchet's next unconsumed generation
        next_generation: u32,
        /// Configured limit
        max_skip: u32,
    },

    /// No live ancestor holds a secret for this leaf. The leaf's seed was
    /// already handed out, or the tree store is corrupt.
    #[error("base key seed exhausted for leaf {leaf}")]
    SeedExhausted {
        /// Leaf whose seed was requested
        leaf: LeafIndex,
    },

    /// Sender is not a member of the tree
    #[error("leaf {leaf} out of range for group of {size}")]
    LeafOutOfRange {
        /// Requested leaf
        leaf: LeafIndex,
        /// Number of leaves in the tree
        size: LeafCount,
    },

    /// Group size cannot be addressed (zero or beyond the tree limit)
    #[error("invalid group size: {size}")]
    InvalidGroupSize {
        /// Rejected leaf count
        size: LeafCount,
    },

    /// Secret handed in has the wrong length for the suite
    #[error("invalid secret length: expected {expected}, got {actual}")]
    InvalidSecretLength {
        /// Suite secret size
        expected: usize,
        /// Supplied length
        actual: usize,
    },

    /// Ratchet generation would overflow
    #[error("ratchet generation overflow at {current}")]
    GenerationOverflow {
        /// Generation when overflow was detected
        current: u32,
    },

    /// Key derivation primitive failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Encoding or decoding failed
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl KeyScheduleError {
    /// Returns true if this error is fatal (unrecoverable)
    ///
    /// Fatal errors indicate misuse or corrupted state and must abort the
    /// enclosing operation. Non-fatal errors concern a single message key.
    pub fn is_fatal(&self) -> bool {
        match self {
            // Single-message conditions - caller may drop the message
            Self::ExpiredKey { .. } => false,
            Self::TooFarAhead { .. } => false,

            // Invariant violations and misuse - fatal
            Self::SeedExhausted { .. } => true,
            Self::LeafOutOfRange { .. } => true,
            Self::InvalidGroupSize { .. } => true,
            Self::InvalidSecretLength { .. } => true,
            Self::GenerationOverflow { .. } => true,
            Self::Crypto(_) => true,
            Self::Codec(_) => true,
        }
    }
}
