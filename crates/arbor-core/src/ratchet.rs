//! Hash ratchet for forward-secure per-sender message keys
//!
//! # Security Properties
//!
//! - Forward Secrecy: the current secret is erased as soon as its successor
//!   exists
//! - Key Uniqueness: each generation's key and nonce are bound to (node,
//!   generation) by the derivation context
//! - Determinism: same suite, node and seed always produce the same sequence
//! - Bounded Reorder: keys derived while catching up are cached until
//!   explicitly erased, so late messages inside that window still decrypt

use std::collections::BTreeMap;

use arbor_crypto::{
    CipherSuite, CodecError, Decode, Encode, KeyAndNonce, NodeIndex, Secret,
    codec::{decode_map, encode_map},
};
use bytes::{Buf, BufMut};

use crate::error::KeyScheduleError;

/// Label for deriving a message key
const KEY_LABEL: &str = "app-key";

/// Label for deriving a message nonce
const NONCE_LABEL: &str = "app-nonce";

/// Label for deriving the successor secret
const SECRET_LABEL: &str = "app-secret";

/// Forward-secure hash ratchet owned by one sender's group key source.
///
/// Each [`next()`](Self::next) call:
/// 1. Derives a key, nonce and successor secret from the current secret
/// 2. Replaces (and erases) the current secret with the successor
/// 3. Caches a private copy of the key and nonce under the generation
///
/// # Invariants
///
/// - Generations are handed out in strictly increasing order from 0
/// - Every cached generation is below `next_generation`
/// - Once a generation is erased it can never be produced again
#[derive(Debug)]
pub struct HashRatchet {
    suite: CipherSuite,
    node: NodeIndex,
    next_secret: Secret,
    next_generation: u32,
    cache: BTreeMap<u32, KeyAndNonce>,
    max_forward_skip: Option<u32>,
}

impl HashRatchet {
    /// Create a ratchet for `node` seeded with `base_secret` (generation 0).
    pub fn new(suite: CipherSuite, node: NodeIndex, base_secret: Secret) -> Self {
        Self {
            suite,
            node,
            next_secret: base_secret,
            next_generation: 0,
            cache: BTreeMap::new(),
            max_forward_skip: None,
        }
    }

    /// Limit how far a single [`get()`](Self::get) may advance the ratchet.
    #[must_use]
    pub fn with_max_forward_skip(mut self, max_forward_skip: Option<u32>) -> Self {
        self.max_forward_skip = max_forward_skip;
        self
    }

    pub(crate) fn set_max_forward_skip(&mut self, max_forward_skip: Option<u32>) {
        self.max_forward_skip = max_forward_skip;
    }

    /// Cipher suite used for derivation.
    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Tree node this ratchet is bound to.
    pub fn node(&self) -> NodeIndex {
        self.node
    }

    /// Next generation [`next()`](Self::next) will produce.
    pub fn next_generation(&self) -> u32 {
        self.next_generation
    }

    /// True if `generation` is derived and not yet erased.
    pub fn is_cached(&self, generation: u32) -> bool {
        self.cache.contains_key(&generation)
    }

    /// Generations currently held in the cache, ascending.
    pub fn cached_generations(&self) -> Vec<u32> {
        self.cache.keys().copied().collect()
    }

    /// Advance the ratchet one step.
    ///
    /// Returns the generation just produced and an independent copy of its
    /// key and nonce. A second copy stays in the cache until
    /// [`erase()`](Self::erase).
    ///
    /// If derivation fails, the ratchet is unchanged. Generation `u32::MAX`
    /// is never produced: once the ratchet reaches it, every call fails with
    /// `GenerationOverflow`.
    pub fn next(&mut self) -> Result<(u32, KeyAndNonce), KeyScheduleError> {
        let generation = self.next_generation;
        if generation == u32::MAX {
            return Err(KeyScheduleError::GenerationOverflow { current: generation });
        }

        let sizes = self.suite.constants();
        let key = self.derive(KEY_LABEL, sizes.key_size)?;
        let nonce = self.derive(NONCE_LABEL, sizes.nonce_size)?;
        let successor = self.derive(SECRET_LABEL, sizes.secret_size)?;

        // Dropping the old secret zeroizes it
        self.next_secret = successor;
        self.next_generation = generation + 1;

        let key_and_nonce = KeyAndNonce::new(key, nonce);
        self.cache.insert(generation, key_and_nonce.clone());

        tracing::trace!(node = %self.node, generation, "advanced hash ratchet");

        Ok((generation, key_and_nonce))
    }

    /// Key and nonce for `generation`.
    ///
    /// Cached generations are returned as copies. Generations at or beyond
    /// the ratchet position are reached by advancing, caching every
    /// intermediate generation on the way.
    ///
    /// # Errors
    ///
    /// - `ExpiredKey` if `generation` is behind the ratchet and not cached
    /// - `TooFarAhead` if reaching `generation` exceeds the skip limit; the
    ///   ratchet is not advanced
    /// - `GenerationOverflow` if `generation` is `u32::MAX`, which no ratchet
    ///   ever produces; the ratchet is not advanced
    pub fn get(&mut self, generation: u32) -> Result<KeyAndNonce, KeyScheduleError> {
        if let Some(key_and_nonce) = self.cache.get(&generation) {
            return Ok(key_and_nonce.clone());
        }

        if generation < self.next_generation {
            tracing::warn!(
                node = %self.node,
                generation,
                next_generation = self.next_generation,
                "requested expired ratchet generation"
            );
            return Err(KeyScheduleError::ExpiredKey {
                generation,
                next_generation: self.next_generation,
            });
        }

        if generation == u32::MAX {
            return Err(KeyScheduleError::GenerationOverflow { current: self.next_generation });
        }

        // generation >= next_generation was checked above, so this won't underflow
        let skip = generation - self.next_generation;
        if let Some(max_skip) = self.max_forward_skip
            && skip > max_skip
        {
            return Err(KeyScheduleError::TooFarAhead {
                requested: generation,
                next_generation: self.next_generation,
                max_skip,
            });
        }

        if skip > 0 {
            tracing::debug!(
                node = %self.node,
                from = self.next_generation,
                to = generation,
                "catching up hash ratchet"
            );
        }

        loop {
            let (produced, key_and_nonce) = self.next()?;
            if produced == generation {
                return Ok(key_and_nonce);
            }
        }
    }

    /// Erase the cached key and nonce for `generation`.
    ///
    /// No-op if the generation is not cached.
    pub fn erase(&mut self, generation: u32) {
        // Dropping the entry zeroizes the key and nonce
        if self.cache.remove(&generation).is_some() {
            tracing::trace!(node = %self.node, generation, "erased cached generation");
        }
    }

    fn derive(&self, label: &str, len: usize) -> Result<Secret, KeyScheduleError> {
        Ok(self.suite.derive_app_secret(
            &self.next_secret,
            label,
            self.node,
            self.next_generation,
            len,
        )?)
    }
}

impl Encode for HashRatchet {
    fn encode(&self, dst: &mut impl BufMut) -> Result<(), CodecError> {
        self.suite.encode(dst)?;
        self.node.encode(dst)?;
        self.next_secret.encode(dst)?;
        self.next_generation.encode(dst)?;
        encode_map(dst, &self.cache)
    }
}

impl Decode for HashRatchet {
    fn decode(src: &mut impl Buf) -> Result<Self, CodecError> {
        let suite = CipherSuite::decode(src)?;
        let node = NodeIndex::decode(src)?;
        let next_secret = Secret::decode(src)?;
        let next_generation = u32::decode(src)?;
        let cache: BTreeMap<u32, KeyAndNonce> = decode_map(src)?;

        let sizes = suite.constants();
        if next_secret.len() != sizes.secret_size {
            return Err(CodecError::Invalid {
                reason: format!(
                    "ratchet secret is {} bytes, suite requires {}",
                    next_secret.len(),
                    sizes.secret_size
                ),
            });
        }

        if cache.keys().next_back().is_some_and(|&last| last >= next_generation) {
            return Err(CodecError::Invalid {
                reason: "cached generation at or beyond next generation".to_string(),
            });
        }

        if cache
            .values()
            .any(|kn| kn.key().len() != sizes.key_size || kn.nonce().len() != sizes.nonce_size)
        {
            return Err(CodecError::Invalid {
                reason: "cached key or nonce has wrong length for suite".to_string(),
            });
        }

        Ok(Self { suite, node, next_secret, next_generation, cache, max_forward_skip: None })
    }
}
