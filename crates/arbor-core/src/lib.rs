//! Arbor Key Schedule
//!
//! Per-epoch secret derivation and the per-sender hash ratchets that turn
//! those secrets into message keys. Synchronous and single-threaded: every
//! mutating operation takes `&mut self`, and nothing here is global.
//!
//! # Key Lifecycle
//!
//! ```text
//! Epoch Secret + Group Context
//!        │
//!        ▼
//! KeyScheduleEpoch → sender data / handshake / app / confirm / init
//!        │
//!        ▼
//! Base Key Source (no-FS for handshake, tree for application)
//!        │
//!        ▼
//! HashRatchet per sender → (generation, key, nonce)
//! ```
//!
//! The init secret and an externally agreed update secret produce the next
//! epoch secret.
//!
//! # Security
//!
//! Forward Secrecy:
//! - Ratchet advancement: the previous ratchet secret is erased once its
//!   successor exists
//! - Tree base keys: every node split on the way to a leaf is erased, so a
//!   leaf's seed is released exactly once
//! - Cached message keys are erased on request, after which they can never
//!   be derived again
//!
//! Sender Isolation:
//! - Ratchet outputs are bound to the sender's tree node and the generation
//! - Handshake and application traffic derive from separate epoch secrets
//!
//! Erasure:
//! - All key material lives in [`arbor_crypto::Secret`], which zeroizes on
//!   drop, on success and error paths alike
//! - Callers receive copies, never references into internal storage

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod base_key;
pub mod config;
pub mod epoch;
pub mod error;
pub mod group_key;
pub mod ratchet;

pub use base_key::{BaseKeySource, NoFsBaseKeySource, TreeBaseKeySource};
pub use config::KeyScheduleConfig;
pub use epoch::{KeyScheduleEpoch, group_info_key_and_nonce};
pub use error::KeyScheduleError;
pub use group_key::GroupKeySource;
pub use ratchet::HashRatchet;
