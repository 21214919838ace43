//! Key schedule epoch: the secrets of one group epoch and the key sources
//! built on them.
//!
//! # Derivation
//!
//! ```text
//! epoch_secret
//!   ├─ "sender data" ─> sender_data_secret ─ "sd key" ─> sender_data_key
//!   ├─ "handshake" ───> handshake_secret ──> no-FS base ──> handshake keys
//!   ├─ "app" ─────────> application_secret > tree base ───> application keys
//!   ├─ "confirm" ─────> confirmation_key
//!   └─ "init" ────────> init_secret
//!
//! next epoch_secret = HKDF-Extract(salt = init_secret, ikm = update_secret)
//! ```
//!
//! Every label is distinct, so no two epoch secrets share an output.

use std::collections::BTreeMap;

use arbor_crypto::{
    CipherSuite, CodecError, Decode, Encode, KeyAndNonce, LeafCount, LeafIndex, Secret,
    codec::{decode_map, encode_map},
};
use bytes::{Buf, BufMut};

use crate::{
    base_key::{BaseKeySource, NoFsBaseKeySource, TreeBaseKeySource},
    config::KeyScheduleConfig,
    error::KeyScheduleError,
    group_key::GroupKeySource,
    ratchet::HashRatchet,
};

const SENDER_DATA_LABEL: &str = "sender data";
const HANDSHAKE_LABEL: &str = "handshake";
const APPLICATION_LABEL: &str = "app";
const CONFIRM_LABEL: &str = "confirm";
const INIT_LABEL: &str = "init";
const SENDER_DATA_KEY_LABEL: &str = "sd key";

const GROUP_INFO_LABEL: &str = "group info";
const GROUP_INFO_KEY_LABEL: &str = "key";
const GROUP_INFO_NONCE_LABEL: &str = "nonce";

/// Key and nonce protecting the group info of the epoch whose secret is
/// `epoch_secret`.
///
/// The intermediate group info secret is erased before returning.
pub fn group_info_key_and_nonce(
    suite: CipherSuite,
    epoch_secret: &Secret,
) -> Result<KeyAndNonce, KeyScheduleError> {
    let sizes = suite.constants();
    let group_info_secret =
        suite.hkdf_expand_label(epoch_secret, GROUP_INFO_LABEL, &[], sizes.secret_size)?;
    let key =
        suite.hkdf_expand_label(&group_info_secret, GROUP_INFO_KEY_LABEL, &[], sizes.key_size)?;
    let nonce =
        suite.hkdf_expand_label(&group_info_secret, GROUP_INFO_NONCE_LABEL, &[], sizes.nonce_size)?;

    Ok(KeyAndNonce::new(key, nonce))
}

/// All key material for one epoch of a group.
///
/// Constructed once per epoch and advanced only through
/// [`next()`](Self::next). The superseded epoch is not erased by `next`;
/// dropping it erases every secret it still holds.
///
/// The epoch keeps `epoch_secret` and `application_secret` for its whole
/// lifetime, and the application tree source is seeded from the latter. A
/// leaf seed consumed from the tree can therefore be rederived until the
/// epoch is dropped. Drop superseded epochs as soon as their messages are
/// processed.
///
/// # Invariants
///
/// - All secrets are `secret_size` bytes except the sender data key
///   (`key_size`)
/// - The handshake keys sit on a no-forward-secrecy base source, the
///   application keys on a tree base source over `size` leaves
/// - Both key sources use the epoch's cipher suite
#[derive(Debug)]
pub struct KeyScheduleEpoch {
    suite: CipherSuite,
    size: LeafCount,

    epoch_secret: Secret,
    sender_data_secret: Secret,
    sender_data_key: Secret,
    handshake_secret: Secret,
    application_secret: Secret,
    confirmation_key: Secret,
    init_secret: Secret,

    handshake_keys: GroupKeySource,
    application_keys: GroupKeySource,

    config: KeyScheduleConfig,
}

impl KeyScheduleEpoch {
    /// Build an epoch from its epoch secret with the default configuration.
    ///
    /// `context` is the group context the epoch secrets are bound to.
    ///
    /// # Errors
    ///
    /// - `InvalidGroupSize` if `size` is zero or too large to address
    /// - `InvalidSecretLength` if `epoch_secret` is not the suite's secret size
    pub fn new(
        suite: CipherSuite,
        size: LeafCount,
        epoch_secret: Secret,
        context: &[u8],
    ) -> Result<Self, KeyScheduleError> {
        Self::with_config(suite, size, epoch_secret, context, KeyScheduleConfig::default())
    }

    /// Build an epoch with an explicit configuration.
    ///
    /// `config` applies to every ratchet this epoch creates and is carried
    /// over by [`next()`](Self::next).
    pub fn with_config(
        suite: CipherSuite,
        size: LeafCount,
        epoch_secret: Secret,
        context: &[u8],
        config: KeyScheduleConfig,
    ) -> Result<Self, KeyScheduleError> {
        if !size.is_valid() {
            return Err(KeyScheduleError::InvalidGroupSize { size });
        }

        let sizes = suite.constants();
        if epoch_secret.len() != sizes.secret_size {
            return Err(KeyScheduleError::InvalidSecretLength {
                expected: sizes.secret_size,
                actual: epoch_secret.len(),
            });
        }

        let sender_data_secret = suite.derive_secret(&epoch_secret, SENDER_DATA_LABEL, context)?;
        let handshake_secret = suite.derive_secret(&epoch_secret, HANDSHAKE_LABEL, context)?;
        let application_secret = suite.derive_secret(&epoch_secret, APPLICATION_LABEL, context)?;
        let confirmation_key = suite.derive_secret(&epoch_secret, CONFIRM_LABEL, context)?;
        let init_secret = suite.derive_secret(&epoch_secret, INIT_LABEL, context)?;

        let sender_data_key = suite.hkdf_expand_label(
            &sender_data_secret,
            SENDER_DATA_KEY_LABEL,
            &[],
            sizes.key_size,
        )?;

        let handshake_base = NoFsBaseKeySource::new(suite, handshake_secret.clone());
        let application_base = TreeBaseKeySource::new(suite, size, application_secret.clone())?;

        tracing::debug!(suite = ?suite, %size, "constructed key schedule epoch");

        Ok(Self {
            suite,
            size,
            epoch_secret,
            sender_data_secret,
            sender_data_key,
            handshake_secret,
            application_secret,
            confirmation_key,
            init_secret,
            handshake_keys: GroupKeySource::new(handshake_base.into(), config),
            application_keys: GroupKeySource::new(application_base.into(), config),
            config,
        })
    }

    /// Derive the following epoch.
    ///
    /// The next epoch secret is `HKDF-Extract(init_secret, update_secret)`.
    /// `self` is left untouched; callers drop it once they no longer need
    /// the old epoch's keys.
    pub fn next(
        &self,
        size: LeafCount,
        update_secret: &Secret,
        context: &[u8],
    ) -> Result<Self, KeyScheduleError> {
        let epoch_secret = self.suite.hkdf_extract(&self.init_secret, update_secret);

        tracing::debug!(
            suite = ?self.suite,
            from = %self.size,
            to = %size,
            "advancing key schedule epoch"
        );

        Self::with_config(self.suite, size, epoch_secret, context, self.config)
    }

    /// Cipher suite of the epoch.
    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Number of members the epoch was built for.
    pub fn size(&self) -> LeafCount {
        self.size
    }

    /// Configuration applied to this epoch's ratchets.
    pub fn config(&self) -> KeyScheduleConfig {
        self.config
    }

    /// Replace the configuration of this epoch and all of its ratchets.
    ///
    /// Decoded epochs start with the default configuration; apply the
    /// runtime policy again with this.
    pub fn set_config(&mut self, config: KeyScheduleConfig) {
        self.config = config;
        self.handshake_keys.set_config(config);
        self.application_keys.set_config(config);
    }

    /// Copy of the epoch secret.
    pub fn epoch_secret(&self) -> Secret {
        self.epoch_secret.clone()
    }

    /// Copy of the sender data secret.
    pub fn sender_data_secret(&self) -> Secret {
        self.sender_data_secret.clone()
    }

    /// Copy of the sender data key.
    pub fn sender_data_key(&self) -> Secret {
        self.sender_data_key.clone()
    }

    /// Copy of the handshake secret.
    pub fn handshake_secret(&self) -> Secret {
        self.handshake_secret.clone()
    }

    /// Copy of the application secret.
    pub fn application_secret(&self) -> Secret {
        self.application_secret.clone()
    }

    /// Copy of the confirmation key.
    pub fn confirmation_key(&self) -> Secret {
        self.confirmation_key.clone()
    }

    /// Copy of the init secret.
    pub fn init_secret(&self) -> Secret {
        self.init_secret.clone()
    }

    /// Key and nonce protecting this epoch's group info.
    pub fn group_info_key_and_nonce(&self) -> Result<KeyAndNonce, KeyScheduleError> {
        group_info_key_and_nonce(self.suite, &self.epoch_secret)
    }

    /// Handshake key source.
    pub fn handshake_keys(&self) -> &GroupKeySource {
        &self.handshake_keys
    }

    /// Handshake key source, for deriving and erasing keys.
    pub fn handshake_keys_mut(&mut self) -> &mut GroupKeySource {
        &mut self.handshake_keys
    }

    /// Application key source.
    pub fn application_keys(&self) -> &GroupKeySource {
        &self.application_keys
    }

    /// Application key source, for deriving and erasing keys.
    pub fn application_keys_mut(&mut self) -> &mut GroupKeySource {
        &mut self.application_keys
    }
}

impl Encode for KeyScheduleEpoch {
    fn encode(&self, dst: &mut impl BufMut) -> Result<(), CodecError> {
        self.suite.encode(dst)?;
        self.size.encode(dst)?;

        self.epoch_secret.encode(dst)?;
        self.sender_data_secret.encode(dst)?;
        self.sender_data_key.encode(dst)?;
        self.handshake_secret.encode(dst)?;
        self.application_secret.encode(dst)?;
        self.confirmation_key.encode(dst)?;
        self.init_secret.encode(dst)?;

        self.handshake_keys.base().encode(dst)?;
        self.application_keys.base().encode(dst)?;
        encode_map(dst, self.handshake_keys.ratchets())?;
        encode_map(dst, self.application_keys.ratchets())
    }
}

impl Decode for KeyScheduleEpoch {
    fn decode(src: &mut impl Buf) -> Result<Self, CodecError> {
        let suite = CipherSuite::decode(src)?;
        let size = LeafCount::decode(src)?;

        let epoch_secret = Secret::decode(src)?;
        let sender_data_secret = Secret::decode(src)?;
        let sender_data_key = Secret::decode(src)?;
        let handshake_secret = Secret::decode(src)?;
        let application_secret = Secret::decode(src)?;
        let confirmation_key = Secret::decode(src)?;
        let init_secret = Secret::decode(src)?;

        let handshake_base = BaseKeySource::decode(src)?;
        let application_base = BaseKeySource::decode(src)?;
        let handshake_ratchets: BTreeMap<LeafIndex, HashRatchet> = decode_map(src)?;
        let application_ratchets: BTreeMap<LeafIndex, HashRatchet> = decode_map(src)?;

        if !size.is_valid() {
            return Err(CodecError::Invalid { reason: format!("invalid group size {size}") });
        }

        let sizes = suite.constants();
        let secrets = [
            ("epoch secret", &epoch_secret, sizes.secret_size),
            ("sender data secret", &sender_data_secret, sizes.secret_size),
            ("sender data key", &sender_data_key, sizes.key_size),
            ("handshake secret", &handshake_secret, sizes.secret_size),
            ("application secret", &application_secret, sizes.secret_size),
            ("confirmation key", &confirmation_key, sizes.secret_size),
            ("init secret", &init_secret, sizes.secret_size),
        ];
        for (name, secret, expected) in secrets {
            if secret.len() != expected {
                return Err(CodecError::Invalid {
                    reason: format!("{name} is {} bytes, suite requires {expected}", secret.len()),
                });
            }
        }

        let BaseKeySource::NoForwardSecrecy(_) = &handshake_base else {
            return Err(CodecError::Invalid {
                reason: "handshake keys must use a no-forward-secrecy base".to_string(),
            });
        };
        let BaseKeySource::Tree(tree_base) = &application_base else {
            return Err(CodecError::Invalid {
                reason: "application keys must use a tree base".to_string(),
            });
        };
        if tree_base.size() != size {
            return Err(CodecError::Invalid {
                reason: format!(
                    "application tree has {} leaves, epoch has {size}",
                    tree_base.size()
                ),
            });
        }
        if handshake_base.suite() != suite || application_base.suite() != suite {
            return Err(CodecError::Invalid {
                reason: "key source suite differs from epoch suite".to_string(),
            });
        }

        Ok(Self {
            suite,
            size,
            epoch_secret,
            sender_data_secret,
            sender_data_key,
            handshake_secret,
            application_secret,
            confirmation_key,
            init_secret,
            handshake_keys: GroupKeySource::from_parts(handshake_base, handshake_ratchets)?,
            application_keys: GroupKeySource::from_parts(application_base, application_ratchets)?,
            config: KeyScheduleConfig::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use arbor_crypto::tree;

    use super::*;

    const SUITE: CipherSuite = CipherSuite::X25519Sha256Aes128Gcm;
    const CONTEXT: &[u8] = b"group context";

    fn test_epoch(size: u32) -> KeyScheduleEpoch {
        KeyScheduleEpoch::new(SUITE, LeafCount(size), Secret::from_slice(&[0x5a; 32]), CONTEXT)
            .unwrap()
    }

    #[test]
    fn application_secret_outlives_consumed_leaf_seeds() {
        let mut epoch = test_epoch(4);
        let (_, sent) = epoch.application_keys_mut().next(LeafIndex(2)).unwrap();

        // The live epoch can still rebuild the consumed seed
        let mut rebuilt =
            TreeBaseKeySource::new(SUITE, LeafCount(4), epoch.application_secret()).unwrap();
        let seed = rebuilt.get(LeafIndex(2)).unwrap();
        let mut ratchet = HashRatchet::new(SUITE, tree::to_node_index(LeafIndex(2)), seed);

        assert_eq!(ratchet.next().unwrap(), (0, sent));
    }

    #[test]
    fn secrets_have_suite_sizes() {
        let epoch = test_epoch(3);
        assert_eq!(epoch.sender_data_secret().len(), 32);
        assert_eq!(epoch.sender_data_key().len(), 16);
        assert_eq!(epoch.handshake_secret().len(), 32);
        assert_eq!(epoch.application_secret().len(), 32);
        assert_eq!(epoch.confirmation_key().len(), 32);
        assert_eq!(epoch.init_secret().len(), 32);
    }

    #[test]
    fn epoch_secrets_are_domain_separated() {
        let epoch = test_epoch(3);
        let secrets = [
            epoch.epoch_secret(),
            epoch.sender_data_secret(),
            epoch.handshake_secret(),
            epoch.application_secret(),
            epoch.confirmation_key(),
            epoch.init_secret(),
        ];

        let distinct: HashSet<Vec<u8>> = secrets.iter().map(|s| s.as_bytes().to_vec()).collect();
        assert_eq!(distinct.len(), secrets.len());
    }

    #[test]
    fn construction_is_deterministic() {
        let a = test_epoch(3);
        let b = test_epoch(3);
        assert_eq!(a.init_secret(), b.init_secret());
        assert_eq!(a.sender_data_key(), b.sender_data_key());
    }

    #[test]
    fn context_changes_every_derived_secret() {
        let a = test_epoch(3);
        let secret = Secret::from_slice(&[0x5a; 32]);
        let b = KeyScheduleEpoch::new(SUITE, LeafCount(3), secret, b"other").unwrap();

        assert_ne!(a.sender_data_secret(), b.sender_data_secret());
        assert_ne!(a.handshake_secret(), b.handshake_secret());
        assert_ne!(a.application_secret(), b.application_secret());
        assert_ne!(a.confirmation_key(), b.confirmation_key());
        assert_ne!(a.init_secret(), b.init_secret());
    }

    #[test]
    fn invalid_construction_is_rejected() {
        let empty =
            KeyScheduleEpoch::new(SUITE, LeafCount(0), Secret::from_slice(&[0; 32]), CONTEXT);
        assert_eq!(empty.err(), Some(KeyScheduleError::InvalidGroupSize { size: LeafCount(0) }));

        let short =
            KeyScheduleEpoch::new(SUITE, LeafCount(2), Secret::from_slice(&[0; 16]), CONTEXT);
        assert_eq!(
            short.err(),
            Some(KeyScheduleError::InvalidSecretLength { expected: 32, actual: 16 })
        );
    }

    #[test]
    fn next_is_deterministic() {
        let epoch = test_epoch(3);
        let update = Secret::from_slice(&[0x33; 32]);

        let a = epoch.next(LeafCount(4), &update, CONTEXT).unwrap();
        let b = epoch.next(LeafCount(4), &update, CONTEXT).unwrap();

        assert_eq!(a.epoch_secret(), b.epoch_secret());
        assert_eq!(a.size(), LeafCount(4));
    }

    #[test]
    fn next_depends_on_update_secret() {
        let epoch = test_epoch(3);

        let a = epoch.next(LeafCount(3), &Secret::from_slice(&[0x33; 32]), CONTEXT).unwrap();
        let b = epoch.next(LeafCount(3), &Secret::from_slice(&[0x34; 32]), CONTEXT).unwrap();

        assert_ne!(a.epoch_secret(), b.epoch_secret());
        assert_ne!(a.application_secret(), b.application_secret());
    }

    #[test]
    fn next_is_keyed_by_init_secret() {
        let epoch = test_epoch(3);
        let update = Secret::from_slice(&[0x33; 32]);

        let next = epoch.next(LeafCount(3), &update, CONTEXT).unwrap();
        let expected = SUITE.hkdf_extract(&epoch.init_secret(), &update);

        assert_eq!(next.epoch_secret(), expected);
        assert_ne!(next.epoch_secret(), epoch.epoch_secret());
    }

    #[test]
    fn next_keeps_previous_epoch_usable() {
        let mut epoch = test_epoch(2);
        let update = Secret::from_slice(&[0x33; 32]);

        let _next = epoch.next(LeafCount(2), &update, CONTEXT).unwrap();

        assert!(epoch.application_keys_mut().next(LeafIndex(0)).is_ok());
    }

    #[test]
    fn next_carries_config() {
        let epoch = KeyScheduleEpoch::with_config(
            SUITE,
            LeafCount(2),
            Secret::from_slice(&[0x5a; 32]),
            CONTEXT,
            KeyScheduleConfig::with_max_forward_skip(4),
        )
        .unwrap();

        let mut next = epoch.next(LeafCount(2), &Secret::from_slice(&[1; 32]), CONTEXT).unwrap();
        assert_eq!(next.config(), KeyScheduleConfig::with_max_forward_skip(4));

        let result = next.application_keys_mut().get(LeafIndex(1), 5);
        assert!(matches!(result, Err(KeyScheduleError::TooFarAhead { max_skip: 4, .. })));
    }

    #[test]
    fn handshake_and_application_keys_differ() {
        let mut epoch = test_epoch(2);

        let (_, handshake) = epoch.handshake_keys_mut().next(LeafIndex(0)).unwrap();
        let (_, application) = epoch.application_keys_mut().next(LeafIndex(0)).unwrap();

        assert_ne!(handshake, application);
    }

    #[test]
    fn group_info_key_matches_free_function() {
        let epoch = test_epoch(2);
        let expected = group_info_key_and_nonce(SUITE, &epoch.epoch_secret()).unwrap();

        let key_and_nonce = epoch.group_info_key_and_nonce().unwrap();

        assert_eq!(key_and_nonce, expected);
        assert_eq!(key_and_nonce.key().len(), 16);
        assert_eq!(key_and_nonce.nonce().len(), 12);
    }

    #[test]
    fn sha512_suite_uses_larger_sizes() {
        let suite = CipherSuite::X448Sha512Aes256Gcm;
        let mut epoch =
            KeyScheduleEpoch::new(suite, LeafCount(2), Secret::from_slice(&[0x5a; 64]), CONTEXT)
                .unwrap();

        assert_eq!(epoch.init_secret().len(), 64);
        assert_eq!(epoch.sender_data_key().len(), 32);

        let (_, key_and_nonce) = epoch.application_keys_mut().next(LeafIndex(1)).unwrap();
        assert_eq!(key_and_nonce.key().len(), 32);
        assert_eq!(key_and_nonce.nonce().len(), 12);
    }

    #[test]
    fn encode_decode_resumes_epoch() {
        let mut epoch = test_epoch(4);
        let mut reference = test_epoch(4);
        epoch.application_keys_mut().get(LeafIndex(2), 1).unwrap();
        reference.application_keys_mut().get(LeafIndex(2), 1).unwrap();
        epoch.handshake_keys_mut().next(LeafIndex(0)).unwrap();

        let bytes = epoch.to_bytes().unwrap();
        let mut restored = KeyScheduleEpoch::decode_exact(&bytes).unwrap();

        assert_eq!(restored.size(), LeafCount(4));
        assert_eq!(restored.init_secret(), epoch.init_secret());
        assert!(restored.handshake_keys().has_ratchet(LeafIndex(0)));
        assert_eq!(
            restored.application_keys_mut().get(LeafIndex(2), 0).unwrap(),
            reference.application_keys_mut().get(LeafIndex(2), 0).unwrap()
        );
        assert_eq!(
            restored.application_keys_mut().next(LeafIndex(3)).unwrap(),
            reference.application_keys_mut().next(LeafIndex(3)).unwrap()
        );
    }

    #[test]
    fn decode_does_not_restore_config() {
        let mut epoch = test_epoch(2);
        epoch.set_config(KeyScheduleConfig::with_max_forward_skip(1));

        let bytes = epoch.to_bytes().unwrap();
        let restored = KeyScheduleEpoch::decode_exact(&bytes).unwrap();

        assert_eq!(restored.config(), KeyScheduleConfig::default());
    }

    #[test]
    fn decode_rejects_swapped_key_sources() {
        let epoch = test_epoch(2);
        let mut bytes = Vec::new();
        epoch.suite.encode(&mut bytes).unwrap();
        epoch.size.encode(&mut bytes).unwrap();
        for secret in [
            &epoch.epoch_secret,
            &epoch.sender_data_secret,
            &epoch.sender_data_key,
            &epoch.handshake_secret,
            &epoch.application_secret,
            &epoch.confirmation_key,
            &epoch.init_secret,
        ] {
            secret.encode(&mut bytes).unwrap();
        }
        epoch.application_keys.base().encode(&mut bytes).unwrap();
        epoch.handshake_keys.base().encode(&mut bytes).unwrap();
        bytes.extend_from_slice(&[0; 8]);

        assert!(matches!(KeyScheduleEpoch::decode_exact(&bytes), Err(CodecError::Invalid { .. })));
    }
}
