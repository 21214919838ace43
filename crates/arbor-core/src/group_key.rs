//! Group key source: one base key source plus per-sender ratchets.

use std::collections::{BTreeMap, btree_map::Entry};

use arbor_crypto::{
    CipherSuite, CodecError, Decode, Encode, KeyAndNonce, LeafCount, LeafIndex,
    codec::{decode_map, encode_map},
    tree,
};
use bytes::{Buf, BufMut};

use crate::{
    base_key::BaseKeySource, config::KeyScheduleConfig, error::KeyScheduleError,
    ratchet::HashRatchet,
};

/// Hands out per-(sender, generation) keys for one channel of one epoch.
///
/// A sender's ratchet is created on first reference, seeded from the base
/// key source. Both the base source and the ratchets are owned here, so they
/// can never be reset independently of each other.
///
/// # Invariants
///
/// - Exactly one group key source exists per (epoch, channel)
/// - A sender's ratchet, once created, is never reseeded
/// - Every ratchet uses the base source's cipher suite
#[derive(Debug)]
pub struct GroupKeySource {
    base: BaseKeySource,
    ratchets: BTreeMap<LeafIndex, HashRatchet>,
    config: KeyScheduleConfig,
}

impl GroupKeySource {
    /// Create a source with no ratchets yet.
    pub fn new(base: BaseKeySource, config: KeyScheduleConfig) -> Self {
        Self { base, ratchets: BTreeMap::new(), config }
    }

    /// Cipher suite used for derivation.
    pub fn suite(&self) -> CipherSuite {
        self.base.suite()
    }

    /// Underlying base key source.
    pub fn base(&self) -> &BaseKeySource {
        &self.base
    }

    /// True if `sender` already has a ratchet.
    pub fn has_ratchet(&self, sender: LeafIndex) -> bool {
        self.ratchets.contains_key(&sender)
    }

    /// Next generation `sender` will produce. `None` if the sender has no
    /// ratchet yet.
    pub fn next_generation(&self, sender: LeafIndex) -> Option<u32> {
        self.ratchets.get(&sender).map(HashRatchet::next_generation)
    }

    /// Senders with a ratchet, ascending.
    pub fn senders(&self) -> Vec<LeafIndex> {
        self.ratchets.keys().copied().collect()
    }

    /// Advance `sender`'s ratchet (used when sending).
    pub fn next(&mut self, sender: LeafIndex) -> Result<(u32, KeyAndNonce), KeyScheduleError> {
        self.ratchet(sender)?.next()
    }

    /// Key and nonce for `sender` at `generation` (used when receiving).
    ///
    /// # Errors
    ///
    /// - `ExpiredKey` / `TooFarAhead` from the sender's ratchet
    /// - `SeedExhausted` / `LeafOutOfRange` if the sender's ratchet cannot be
    ///   seeded
    pub fn get(
        &mut self,
        sender: LeafIndex,
        generation: u32,
    ) -> Result<KeyAndNonce, KeyScheduleError> {
        self.ratchet(sender)?.get(generation)
    }

    /// Erase `sender`'s cached key and nonce for `generation`.
    ///
    /// A sender with no ratchet has nothing cached, so this does not seed
    /// one.
    pub fn erase(&mut self, sender: LeafIndex, generation: u32) {
        if let Some(ratchet) = self.ratchets.get_mut(&sender) {
            ratchet.erase(generation);
        }
    }

    pub(crate) fn from_parts(
        base: BaseKeySource,
        ratchets: BTreeMap<LeafIndex, HashRatchet>,
    ) -> Result<Self, CodecError> {
        for (sender, ratchet) in &ratchets {
            if !LeafCount::MAX.contains(*sender) {
                return Err(CodecError::Invalid {
                    reason: format!("sender {sender} cannot be addressed"),
                });
            }
            if ratchet.suite() != base.suite() {
                return Err(CodecError::Invalid {
                    reason: format!("ratchet for sender {sender} uses a different suite"),
                });
            }
            if ratchet.node() != tree::to_node_index(*sender) {
                return Err(CodecError::Invalid {
                    reason: format!("ratchet for sender {sender} is bound to the wrong node"),
                });
            }
        }

        Ok(Self { base, ratchets, config: KeyScheduleConfig::default() })
    }

    pub(crate) fn ratchets(&self) -> &BTreeMap<LeafIndex, HashRatchet> {
        &self.ratchets
    }

    pub(crate) fn set_config(&mut self, config: KeyScheduleConfig) {
        self.config = config;
        for ratchet in self.ratchets.values_mut() {
            ratchet.set_max_forward_skip(config.max_forward_skip);
        }
    }

    fn ratchet(&mut self, sender: LeafIndex) -> Result<&mut HashRatchet, KeyScheduleError> {
        match self.ratchets.entry(sender) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let base_secret = self.base.get(sender)?;
                let ratchet =
                    HashRatchet::new(self.base.suite(), tree::to_node_index(sender), base_secret)
                        .with_max_forward_skip(self.config.max_forward_skip);

                tracing::debug!(sender = %sender, "seeded hash ratchet");

                Ok(entry.insert(ratchet))
            },
        }
    }
}

impl Encode for GroupKeySource {
    fn encode(&self, dst: &mut impl BufMut) -> Result<(), CodecError> {
        self.base.encode(dst)?;
        encode_map(dst, &self.ratchets)
    }
}

impl Decode for GroupKeySource {
    fn decode(src: &mut impl Buf) -> Result<Self, CodecError> {
        let base = BaseKeySource::decode(src)?;
        let ratchets = decode_map(src)?;
        Self::from_parts(base, ratchets)
    }
}

#[cfg(test)]
mod tests {
    use arbor_crypto::Secret;

    use super::*;
    use crate::base_key::{NoFsBaseKeySource, TreeBaseKeySource};

    const SUITE: CipherSuite = CipherSuite::X25519Sha256Aes128Gcm;

    fn tree_keys(size: u32) -> GroupKeySource {
        let base =
            TreeBaseKeySource::new(SUITE, LeafCount(size), Secret::from_slice(&[0x07; 32]))
                .unwrap();
        GroupKeySource::new(base.into(), KeyScheduleConfig::default())
    }

    fn handshake_keys() -> GroupKeySource {
        let base = NoFsBaseKeySource::new(SUITE, Secret::from_slice(&[0x09; 32]));
        GroupKeySource::new(base.into(), KeyScheduleConfig::default())
    }

    #[test]
    fn ratchets_are_created_lazily() {
        let mut keys = tree_keys(4);
        assert!(!keys.has_ratchet(LeafIndex(1)));

        keys.next(LeafIndex(1)).unwrap();

        assert!(keys.has_ratchet(LeafIndex(1)));
        assert_eq!(keys.senders(), vec![LeafIndex(1)]);
        assert_eq!(keys.next_generation(LeafIndex(1)), Some(1));
    }

    #[test]
    fn existing_ratchet_is_reused() {
        let mut keys = tree_keys(4);

        let (gen0, _) = keys.next(LeafIndex(2)).unwrap();
        let (gen1, _) = keys.next(LeafIndex(2)).unwrap();

        assert_eq!((gen0, gen1), (0, 1));
    }

    #[test]
    fn sender_and_receiver_agree() {
        let mut sender = tree_keys(4);
        let mut receiver = tree_keys(4);

        let (generation, sent) = sender.next(LeafIndex(3)).unwrap();
        let received = receiver.get(LeafIndex(3), generation).unwrap();

        assert_eq!(sent, received);
    }

    #[test]
    fn senders_are_isolated() {
        let mut keys = tree_keys(4);
        let (_, a) = keys.next(LeafIndex(0)).unwrap();
        let (_, b) = keys.next(LeafIndex(1)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn erase_without_ratchet_does_not_seed() {
        let mut keys = tree_keys(4);
        keys.erase(LeafIndex(2), 0);
        assert!(!keys.has_ratchet(LeafIndex(2)));
    }

    #[test]
    fn erase_then_get_is_expired() {
        let mut keys = handshake_keys();
        keys.get(LeafIndex(0), 2).unwrap();
        keys.erase(LeafIndex(0), 1);

        let result = keys.get(LeafIndex(0), 1);
        assert_eq!(result, Err(KeyScheduleError::ExpiredKey { generation: 1, next_generation: 3 }));
    }

    #[test]
    fn out_of_range_sender_is_rejected() {
        let mut keys = tree_keys(2);
        let result = keys.next(LeafIndex(5));
        assert!(matches!(result, Err(KeyScheduleError::LeafOutOfRange { .. })));
        assert!(!keys.has_ratchet(LeafIndex(5)));
    }

    #[test]
    fn config_reaches_new_and_existing_ratchets() {
        let mut keys = tree_keys(4);
        keys.next(LeafIndex(0)).unwrap();

        keys.set_config(KeyScheduleConfig::with_max_forward_skip(2));

        assert!(matches!(keys.get(LeafIndex(0), 10), Err(KeyScheduleError::TooFarAhead { .. })));
        assert!(matches!(keys.get(LeafIndex(1), 10), Err(KeyScheduleError::TooFarAhead { .. })));
        assert!(keys.get(LeafIndex(1), 2).is_ok());
    }

    #[test]
    fn encode_decode_keeps_ratchets_and_tree() {
        let mut keys = tree_keys(4);
        let mut reference = tree_keys(4);
        keys.get(LeafIndex(0), 1).unwrap();
        reference.get(LeafIndex(0), 1).unwrap();

        let bytes = keys.to_bytes().unwrap();
        let mut restored = GroupKeySource::decode_exact(&bytes).unwrap();

        assert_eq!(restored.senders(), vec![LeafIndex(0)]);
        assert_eq!(restored.get(LeafIndex(0), 0).unwrap(), reference.get(LeafIndex(0), 0).unwrap());
        assert_eq!(restored.next(LeafIndex(2)).unwrap(), reference.next(LeafIndex(2)).unwrap());
    }
}
