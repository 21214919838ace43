//! Secret byte buffers that erase themselves.
//!
//! # Security
//!
//! - Erasure on drop: every `Secret` zeroizes its storage when dropped, on
//!   success and error paths alike
//! - No aliasing: `Clone` makes an independent allocation, so erasing one
//!   copy never touches another
//! - No leakage through `Debug`: only the length is printed

use std::fmt;

use zeroize::Zeroize;

/// Owned secret key material (secrets, keys and nonces).
#[derive(Clone, Default)]
pub struct Secret(Vec<u8>);

impl Secret {
    /// Take ownership of `bytes` as secret material.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Copy `bytes` into a new secret.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// All-zero secret of `len` bytes, to be filled in place.
    pub fn zeroed(len: usize) -> Self {
        Self(vec![0u8; len])
    }

    /// Raw secret bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.0
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the secret holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for Secret {
    fn from(bytes: &[u8]) -> Self {
        Self::from_slice(bytes)
    }
}

impl From<Vec<u8>> for Secret {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

// Comparison does not short-circuit on the first differing byte.
impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().zip(&other.0).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
    }
}

impl Eq for Secret {}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED; {}])", self.0.len())
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// An AEAD key and nonce for one (sender, generation).
///
/// Handed out by value. The ratchet cache keeps its own copy, so callers may
/// drop theirs at any time without affecting later lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAndNonce {
    key: Secret,
    nonce: Secret,
}

impl KeyAndNonce {
    /// Pair a key with its nonce.
    pub fn new(key: Secret, nonce: Secret) -> Self {
        Self { key, nonce }
    }

    /// AEAD key bytes.
    pub fn key(&self) -> &[u8] {
        self.key.as_bytes()
    }

    /// AEAD nonce bytes.
    pub fn nonce(&self) -> &[u8] {
        self.nonce.as_bytes()
    }

    pub(crate) fn key_secret(&self) -> &Secret {
        &self.key
    }

    pub(crate) fn nonce_secret(&self) -> &Secret {
        &self.nonce
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_contents() {
        let secret = Secret::from_slice(&[0xAB; 4]);
        let rendered = format!("{secret:?}");
        assert_eq!(rendered, "Secret([REDACTED; 4])");
        assert!(!rendered.contains("ab"));
    }

    #[test]
    fn clone_is_independent() {
        let original = Secret::from_slice(&[1, 2, 3]);
        let mut copy = original.clone();
        copy.as_mut_bytes().fill(0);

        assert_eq!(original.as_bytes(), &[1, 2, 3]);
        assert_ne!(original, copy);
    }

    #[test]
    fn equality_requires_same_length() {
        assert_ne!(Secret::from_slice(&[0, 0]), Secret::from_slice(&[0, 0, 0]));
        assert_eq!(Secret::from_slice(&[7; 8]), Secret::from_slice(&[7; 8]));
    }

    #[test]
    fn key_and_nonce_accessors() {
        let kn = KeyAndNonce::new(Secret::from_slice(&[1; 16]), Secret::from_slice(&[2; 12]));
        assert_eq!(kn.key(), &[1; 16]);
        assert_eq!(kn.nonce(), &[2; 12]);
    }
}
