//! Arbor Cryptographic Primitives
//!
//! Building blocks consumed by the Arbor key schedule. Pure functions with
//! deterministic outputs; nothing here holds state between calls.
//!
//! - [`CipherSuite`]: HKDF-based labeled derivation (`derive_secret`,
//!   `derive_app_secret`, `hkdf_expand_label`, `hkdf_extract`) and the
//!   suite's key, nonce and secret sizes
//! - [`Secret`] / [`KeyAndNonce`]: owned key material that zeroizes itself on
//!   drop
//! - [`tree`]: addressing over the left-balanced member tree
//! - [`codec`]: length-prefixed binary encoding
//!
//! # Security
//!
//! Domain Separation:
//! - Every derivation carries a distinct label and the output length in the
//!   HKDF info string
//! - Application secrets are additionally bound to (node, generation)
//!
//! Erasure:
//! - `Secret` overwrites its buffer with zeros when dropped
//! - Copies never alias; dropping one never affects another

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod error;
pub mod secret;
pub mod suite;
pub mod tree;

pub use codec::{Decode, Encode};
pub use error::{CodecError, CryptoError};
pub use secret::{KeyAndNonce, Secret};
pub use suite::{CipherSuite, SuiteConstants};
pub use tree::{LeafCount, LeafIndex, NodeIndex};
