//! Cipher suites and their key derivation primitives.
//!
//! Every derivation in the key schedule goes through [`hkdf_expand_label`],
//! which binds the output length, a protocol-prefixed label and a context
//! into the HKDF info string:
//!
//! ```text
//! struct {
//!     uint16 length;
//!     opaque label<7..255>;    // "mls10 " || label
//!     opaque context<0..2^32-1>;
//! } HkdfLabel;
//! ```
//!
//! Distinct labels therefore never share output, even when expanded from the
//! same secret.
//!
//! [`hkdf_expand_label`]: CipherSuite::hkdf_expand_label

use bytes::BufMut;
use hkdf::Hkdf;
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroize;

use crate::{
    error::CryptoError,
    secret::Secret,
    tree::NodeIndex,
};

/// Prefix prepended to every expand label
const LABEL_PREFIX: &[u8] = b"mls10 ";
const MAX_LABEL_LEN: usize = u8::MAX as usize;
const MAX_CONTEXT_LEN: usize = u32::MAX as usize;

/// Supported cipher suites, with their registry identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum CipherSuite {
    /// P-256, SHA-256, AES-128-GCM
    P256Sha256Aes128Gcm = 0x0000,
    /// X25519, SHA-256, AES-128-GCM
    X25519Sha256Aes128Gcm = 0x0001,
    /// P-521, SHA-512, AES-256-GCM
    P521Sha512Aes256Gcm = 0x0010,
    /// X448, SHA-512, AES-256-GCM
    X448Sha512Aes256Gcm = 0x0011,
}

/// Output sizes fixed by a cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuiteConstants {
    /// AEAD key length
    pub key_size: usize,
    /// AEAD nonce length
    pub nonce_size: usize,
    /// Secret length (hash output length)
    pub secret_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HashAlgorithm {
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    fn output_size(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }
}

impl CipherSuite {
    /// All supported suites.
    pub const ALL: [Self; 4] = [
        Self::P256Sha256Aes128Gcm,
        Self::X25519Sha256Aes128Gcm,
        Self::P521Sha512Aes256Gcm,
        Self::X448Sha512Aes256Gcm,
    ];

    /// Registry identifier.
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Suite for a registry identifier. `None` if unsupported.
    pub fn from_id(id: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|suite| suite.id() == id)
    }

    /// Key, nonce and secret sizes for this suite.
    pub fn constants(self) -> SuiteConstants {
        match self {
            Self::P256Sha256Aes128Gcm | Self::X25519Sha256Aes128Gcm => {
                SuiteConstants { key_size: 16, nonce_size: 12, secret_size: 32 }
            },
            Self::P521Sha512Aes256Gcm | Self::X448Sha512Aes256Gcm => {
                SuiteConstants { key_size: 32, nonce_size: 12, secret_size: 64 }
            },
        }
    }

    fn hash(self) -> HashAlgorithm {
        match self {
            Self::P256Sha256Aes128Gcm | Self::X25519Sha256Aes128Gcm => HashAlgorithm::Sha256,
            Self::P521Sha512Aes256Gcm | Self::X448Sha512Aes256Gcm => HashAlgorithm::Sha512,
        }
    }

    /// Hash `data` with the suite's hash function.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self.hash() {
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// HKDF-Extract. `salt` keys the extraction of `ikm`.
    pub fn hkdf_extract(self, salt: &Secret, ikm: &Secret) -> Secret {
        match self.hash() {
            HashAlgorithm::Sha256 => {
                let (mut prk, _) = Hkdf::<Sha256>::extract(Some(salt.as_bytes()), ikm.as_bytes());
                let out = Secret::from_slice(&prk);
                prk.as_mut_slice().zeroize();
                out
            },
            HashAlgorithm::Sha512 => {
                let (mut prk, _) = Hkdf::<Sha512>::extract(Some(salt.as_bytes()), ikm.as_bytes());
                let out = Secret::from_slice(&prk);
                prk.as_mut_slice().zeroize();
                out
            },
        }
    }

    fn hkdf_expand(self, prk: &Secret, info: &[u8], len: usize) -> Result<Secret, CryptoError> {
        let hash_len = self.hash().output_size();
        let invalid_prk =
            |_| CryptoError::InvalidPrkLength { minimum: hash_len, actual: prk.len() };
        let invalid_len =
            |_| CryptoError::InvalidOutputLength { requested: len, maximum: 255 * hash_len };

        let mut okm = Secret::zeroed(len);
        match self.hash() {
            HashAlgorithm::Sha256 => Hkdf::<Sha256>::from_prk(prk.as_bytes())
                .map_err(invalid_prk)?
                .expand(info, okm.as_mut_bytes())
                .map_err(invalid_len)?,
            HashAlgorithm::Sha512 => Hkdf::<Sha512>::from_prk(prk.as_bytes())
                .map_err(invalid_prk)?
                .expand(info, okm.as_mut_bytes())
                .map_err(invalid_len)?,
        }
        Ok(okm)
    }

    /// HKDF-Expand with a structured, prefixed label.
    ///
    /// # Errors
    ///
    /// - `InvalidPrkLength` if `secret` is shorter than the hash output
    /// - `InvalidOutputLength` if `len` exceeds what HKDF can produce
    /// - `InvalidLabelLength` if the prefixed label exceeds 255 bytes
    /// - `InvalidContextLength` if `context` exceeds `u32::MAX` bytes
    pub fn hkdf_expand_label(
        self,
        secret: &Secret,
        label: &str,
        context: &[u8],
        len: usize,
    ) -> Result<Secret, CryptoError> {
        let maximum = 255 * self.hash().output_size();
        let length = u16::try_from(len)
            .ok()
            .filter(|&l| usize::from(l) <= maximum)
            .ok_or(CryptoError::InvalidOutputLength { requested: len, maximum })?;

        let label_len = LABEL_PREFIX.len() + label.len();
        let label_len_byte = u8::try_from(label_len)
            .map_err(|_| CryptoError::InvalidLabelLength { len: label_len, max: MAX_LABEL_LEN })?;
        let context_len = u32::try_from(context.len()).map_err(|_| {
            CryptoError::InvalidContextLength { len: context.len(), max: MAX_CONTEXT_LEN }
        })?;

        // Capacity: 2 (length) + 1 + label + 4 + context
        let mut info = Vec::with_capacity(2 + 1 + label_len + 4 + context.len());
        info.put_u16(length);
        info.put_u8(label_len_byte);
        info.put_slice(LABEL_PREFIX);
        info.put_slice(label.as_bytes());
        info.put_u32(context_len);
        info.put_slice(context);

        self.hkdf_expand(secret, &info, len)
    }

    /// Derive a secret-sized value bound to `label` and the hash of
    /// `context`.
    pub fn derive_secret(
        self,
        secret: &Secret,
        label: &str,
        context: &[u8],
    ) -> Result<Secret, CryptoError> {
        let context_hash = self.digest(context);
        self.hkdf_expand_label(secret, label, &context_hash, self.constants().secret_size)
    }

    /// Derive `len` bytes bound to `label`, a tree node and a ratchet
    /// generation.
    pub fn derive_app_secret(
        self,
        secret: &Secret,
        label: &str,
        node: NodeIndex,
        generation: u32,
        len: usize,
    ) -> Result<Secret, CryptoError> {
        // Capacity: 4 (node) + 4 (generation) = 8
        let mut context = [0u8; 8];
        context[0..4].copy_from_slice(&node.0.to_be_bytes());
        context[4..8].copy_from_slice(&generation.to_be_bytes());

        self.hkdf_expand_label(secret, label, &context, len)
    }
}
