//! Base key sources: where each sender's ratchet seed comes from.
//!
//! Two sources exist, modelled as a closed enum so every use site handles
//! both:
//!
//! - [`NoFsBaseKeySource`]: re-derives the same seed on every call. Used for
//!   handshake traffic, which is already protected by the generation ratchet
//!   and epoch-bound secrets, so base-key forward secrecy is traded away.
//! - [`TreeBaseKeySource`]: consumes a tree of secrets top-down. Every node
//!   touched on the way to a leaf is erased, so each leaf's seed is released
//!   exactly once.

use std::{collections::BTreeMap, iter};

use arbor_crypto::{
    CipherSuite, CodecError, Decode, Encode, LeafCount, LeafIndex, NodeIndex, Secret,
    codec::{decode_map, encode_map, read_u8},
    tree,
};
use bytes::{Buf, BufMut};

use crate::error::KeyScheduleError;

/// Label for deriving handshake seeds
const HANDSHAKE_SEED_LABEL: &str = "hs-secret";

/// Label for deriving child secrets in the tree source
const TREE_LABEL: &str = "tree";

const NO_FS_TAG: u8 = 0;
const TREE_TAG: u8 = 1;

/// Supplies the seed secret for a sender's hash ratchet.
#[derive(Debug)]
pub enum BaseKeySource {
    /// Repeatable derivation, no forward secrecy
    NoForwardSecrecy(NoFsBaseKeySource),
    /// Single-use, forward-secret tree derivation
    Tree(TreeBaseKeySource),
}

impl BaseKeySource {
    /// Cipher suite used for derivation.
    pub fn suite(&self) -> CipherSuite {
        match self {
            Self::NoForwardSecrecy(source) => source.suite(),
            Self::Tree(source) => source.suite(),
        }
    }

    /// Seed secret for `sender`.
    pub fn get(&mut self, sender: LeafIndex) -> Result<Secret, KeyScheduleError> {
        match self {
            Self::NoForwardSecrecy(source) => source.get(sender),
            Self::Tree(source) => source.get(sender),
        }
    }
}

impl From<NoFsBaseKeySource> for BaseKeySource {
    fn from(source: NoFsBaseKeySource) -> Self {
        Self::NoForwardSecrecy(source)
    }
}

impl From<TreeBaseKeySource> for BaseKeySource {
    fn from(source: TreeBaseKeySource) -> Self {
        Self::Tree(source)
    }
}

/// Base key source without forward secrecy.
///
/// `get(sender)` is a pure function of the root secret and the sender.
#[derive(Debug)]
pub struct NoFsBaseKeySource {
    suite: CipherSuite,
    root_secret: Secret,
}

impl NoFsBaseKeySource {
    /// Create a source over `root_secret`.
    pub fn new(suite: CipherSuite, root_secret: Secret) -> Self {
        Self { suite, root_secret }
    }

    /// Cipher suite used for derivation.
    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Seed secret for `sender`. Repeatable.
    ///
    /// Any leaf an addressable tree can hold is accepted.
    pub fn get(&self, sender: LeafIndex) -> Result<Secret, KeyScheduleError> {
        if !LeafCount::MAX.contains(sender) {
            return Err(KeyScheduleError::LeafOutOfRange { leaf: sender, size: LeafCount::MAX });
        }

        Ok(self.suite.derive_app_secret(
            &self.root_secret,
            HANDSHAKE_SEED_LABEL,
            tree::to_node_index(sender),
            0,
            self.suite.constants().secret_size,
        )?)
    }
}

/// Forward-secret, single-use base key source over the member tree.
///
/// Holds a store of node secrets, initially just the root. Retrieving a
/// leaf's seed derives down from the nearest live ancestor, erasing every
/// parent it splits, and finally removes the leaf itself.
///
/// # Invariants
///
/// - A leaf's seed is returned at most once for the lifetime of the source
/// - A node and any of its ancestors are never live at the same time
/// - Every stored secret is exactly `secret_size` bytes
#[derive(Debug)]
pub struct TreeBaseKeySource {
    suite: CipherSuite,
    root: NodeIndex,
    size: LeafCount,
    secrets: BTreeMap<NodeIndex, Secret>,
}

impl TreeBaseKeySource {
    /// Create a source for a tree of `size` leaves seeded with
    /// `root_secret`.
    ///
    /// # Errors
    ///
    /// - `InvalidGroupSize` if `size` is zero or too large to address
    /// - `InvalidSecretLength` if `root_secret` is not the suite's secret size
    pub fn new(
        suite: CipherSuite,
        size: LeafCount,
        root_secret: Secret,
    ) -> Result<Self, KeyScheduleError> {
        if !size.is_valid() {
            return Err(KeyScheduleError::InvalidGroupSize { size });
        }

        let secret_size = suite.constants().secret_size;
        if root_secret.len() != secret_size {
            return Err(KeyScheduleError::InvalidSecretLength {
                expected: secret_size,
                actual: root_secret.len(),
            });
        }

        let root = tree::root(size);
        let mut secrets = BTreeMap::new();
        secrets.insert(root, root_secret);

        Ok(Self { suite, root, size, secrets })
    }

    /// Cipher suite used for derivation.
    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Number of leaves in the tree.
    pub fn size(&self) -> LeafCount {
        self.size
    }

    /// Root node of the tree.
    pub fn root(&self) -> NodeIndex {
        self.root
    }

    /// Take the seed secret for `sender`.
    ///
    /// # Errors
    ///
    /// - `LeafOutOfRange` if `sender` is not in the tree
    /// - `SeedExhausted` if no ancestor of `sender` still holds a secret,
    ///   i.e. the seed was already taken. Fatal: indicates reuse or a
    ///   corrupted store.
    pub fn get(&mut self, sender: LeafIndex) -> Result<Secret, KeyScheduleError> {
        if !self.size.contains(sender) {
            return Err(KeyScheduleError::LeafOutOfRange { leaf: sender, size: self.size });
        }

        let leaf = tree::to_node_index(sender);
        let path: Vec<NodeIndex> =
            iter::once(leaf).chain(tree::direct_path(leaf, self.size)).collect();

        let Some(start) = path.iter().position(|node| self.secrets.contains_key(node)) else {
            tracing::error!(leaf = %sender, size = %self.size, "no live ancestor for base key");
            return Err(KeyScheduleError::SeedExhausted { leaf: sender });
        };

        // Derive down from the live ancestor, splitting each node on the path
        for &node in path[1..=start].iter().rev() {
            self.split(node, sender)?;
        }

        let seed =
            self.secrets.remove(&leaf).ok_or(KeyScheduleError::SeedExhausted { leaf: sender })?;

        tracing::debug!(leaf = %sender, live_nodes = self.secrets.len(), "released tree base key");

        Ok(seed)
    }

    /// Replace `node`'s secret with its two children's secrets.
    ///
    /// The parent is taken out of the store before deriving and erased once
    /// both children exist. On failure the parent is put back.
    fn split(&mut self, node: NodeIndex, sender: LeafIndex) -> Result<(), KeyScheduleError> {
        let parent_secret =
            self.secrets.remove(&node).ok_or(KeyScheduleError::SeedExhausted { leaf: sender })?;

        let left = tree::left(node);
        let right = tree::right(node, self.size);
        let secret_size = self.suite.constants().secret_size;

        let children = self
            .suite
            .derive_app_secret(&parent_secret, TREE_LABEL, left, 0, secret_size)
            .and_then(|left_secret| {
                let right_secret = self.suite.derive_app_secret(
                    &parent_secret,
                    TREE_LABEL,
                    right,
                    0,
                    secret_size,
                )?;
                Ok((left_secret, right_secret))
            });

        match children {
            Ok((left_secret, right_secret)) => {
                self.secrets.insert(left, left_secret);
                self.secrets.insert(right, right_secret);
                tracing::trace!(%node, %left, %right, "split tree base key node");
                Ok(())
            },
            Err(err) => {
                self.secrets.insert(node, parent_secret);
                Err(err.into())
            },
        }
    }

    /// True if `node` currently holds a secret.
    pub fn is_live(&self, node: NodeIndex) -> bool {
        self.secrets.contains_key(&node)
    }

    /// Nodes currently holding a secret, ascending.
    pub fn live_nodes(&self) -> Vec<NodeIndex> {
        self.secrets.keys().copied().collect()
    }

    /// Presence map of the store, one line per tree position.
    ///
    /// Debugging aid only. Secret bytes are never printed.
    pub fn dump(&self) -> String {
        (0..tree::node_width(self.size))
            .map(|i| {
                let node = NodeIndex(i);
                let state = if self.is_live(node) { "live" } else { "_" };
                format!("{i:>3x} {state}")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Encode for BaseKeySource {
    fn encode(&self, dst: &mut impl BufMut) -> Result<(), CodecError> {
        match self {
            Self::NoForwardSecrecy(source) => {
                dst.put_u8(NO_FS_TAG);
                source.suite.encode(dst)?;
                source.root_secret.encode(dst)
            },
            Self::Tree(source) => {
                dst.put_u8(TREE_TAG);
                source.suite.encode(dst)?;
                source.root.encode(dst)?;
                source.size.encode(dst)?;
                encode_map(dst, &source.secrets)
            },
        }
    }
}

impl Decode for BaseKeySource {
    fn decode(src: &mut impl Buf) -> Result<Self, CodecError> {
        let tag = read_u8(src)?;
        match tag {
            NO_FS_TAG => {
                let suite = CipherSuite::decode(src)?;
                let root_secret = Secret::decode(src)?;
                check_secret_len(suite, &root_secret)?;
                Ok(Self::NoForwardSecrecy(NoFsBaseKeySource { suite, root_secret }))
            },
            TREE_TAG => {
                let suite = CipherSuite::decode(src)?;
                let root = NodeIndex::decode(src)?;
                let size = LeafCount::decode(src)?;
                let secrets: BTreeMap<NodeIndex, Secret> = decode_map(src)?;

                if !size.is_valid() {
                    return Err(CodecError::Invalid { reason: format!("invalid tree size {size}") });
                }
                if root != tree::root(size) {
                    return Err(CodecError::Invalid {
                        reason: format!("root {root} does not match tree size {size}"),
                    });
                }
                let width = tree::node_width(size);
                if let Some(node) = secrets.keys().find(|node| node.0 >= width) {
                    return Err(CodecError::Invalid {
                        reason: format!("node {node} outside tree of width {width}"),
                    });
                }
                for secret in secrets.values() {
                    check_secret_len(suite, secret)?;
                }
                for node in secrets.keys() {
                    let path = tree::direct_path(*node, size);
                    if let Some(ancestor) = path.iter().find(|a| secrets.contains_key(a)) {
                        return Err(CodecError::Invalid {
                            reason: format!("node {node} is live under live ancestor {ancestor}"),
                        });
                    }
                }

                Ok(Self::Tree(TreeBaseKeySource { suite, root, size, secrets }))
            },
            tag => Err(CodecError::UnknownVariant { kind: "base key source", tag }),
        }
    }
}

fn check_secret_len(suite: CipherSuite, secret: &Secret) -> Result<(), CodecError> {
    let expected = suite.constants().secret_size;
    if secret.len() != expected {
        return Err(CodecError::Invalid {
            reason: format!("secret is {} bytes, suite requires {expected}", secret.len()),
        });
    }
    Ok(())
}
