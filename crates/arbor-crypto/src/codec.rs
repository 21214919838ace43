//! Length-prefixed binary encoding for key schedule state.
//!
//! Layout rules:
//! - Byte strings (secrets, keys, nonces): 1-byte length prefix
//! - Maps: 4-byte big-endian element count, then entries in ascending key
//!   order
//! - Integers: big-endian, fixed width
//!
//! Decoding is strict: truncated input, unknown tags and non-canonical maps
//! (duplicate or out-of-order keys) are rejected.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut};

use crate::{
    error::CodecError,
    secret::{KeyAndNonce, Secret},
    suite::CipherSuite,
    tree::{LeafCount, LeafIndex, NodeIndex},
};

/// Maximum length of a 1-byte-prefixed field
pub const MAX_OPAQUE1_LEN: usize = u8::MAX as usize;

/// Types that can be written in the wire encoding.
pub trait Encode {
    /// Append the encoding of `self` to `dst`.
    fn encode(&self, dst: &mut impl BufMut) -> Result<(), CodecError>;

    /// Encode into a fresh buffer.
    fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        self.encode(&mut out)?;
        Ok(out)
    }
}

/// Types that can be read from the wire encoding.
pub trait Decode: Sized {
    /// Read one value from the front of `src`.
    fn decode(src: &mut impl Buf) -> Result<Self, CodecError>;

    /// Decode a value that must span all of `bytes`.
    fn decode_exact(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut src = bytes;
        let value = Self::decode(&mut src)?;
        if src.has_remaining() {
            return Err(CodecError::TrailingBytes { remaining: src.remaining() });
        }
        Ok(value)
    }
}

fn ensure(remaining: usize, needed: usize) -> Result<(), CodecError> {
    if remaining < needed {
        return Err(CodecError::Truncated { needed, remaining });
    }
    Ok(())
}

/// Read a `u8`.
pub fn read_u8(src: &mut impl Buf) -> Result<u8, CodecError> {
    ensure(src.remaining(), 1)?;
    Ok(src.get_u8())
}

/// Read a big-endian `u16`.
pub fn read_u16(src: &mut impl Buf) -> Result<u16, CodecError> {
    ensure(src.remaining(), 2)?;
    Ok(src.get_u16())
}

/// Read a big-endian `u32`.
pub fn read_u32(src: &mut impl Buf) -> Result<u32, CodecError> {
    ensure(src.remaining(), 4)?;
    Ok(src.get_u32())
}

/// Write a 4-byte element count.
pub fn write_count(dst: &mut impl BufMut, count: usize) -> Result<(), CodecError> {
    let count = u32::try_from(count)
        .map_err(|_| CodecError::FieldTooLong { len: count, max: u32::MAX as usize })?;
    dst.put_u32(count);
    Ok(())
}

/// Encode a map as a 4-byte count followed by its entries in key order.
pub fn encode_map<K: Encode, V: Encode>(
    dst: &mut impl BufMut,
    map: &BTreeMap<K, V>,
) -> Result<(), CodecError> {
    write_count(dst, map.len())?;
    for (key, value) in map {
        key.encode(dst)?;
        value.encode(dst)?;
    }
    Ok(())
}

/// Decode a map written by [`encode_map`]. Keys must be strictly ascending.
pub fn decode_map<K: Decode + Ord, V: Decode>(
    src: &mut impl Buf,
) -> Result<BTreeMap<K, V>, CodecError> {
    let count = read_u32(src)?;
    let mut map = BTreeMap::new();
    for _ in 0..count {
        let key = K::decode(src)?;
        let value = V::decode(src)?;
        if map.last_key_value().is_some_and(|(last, _)| *last >= key) {
            return Err(CodecError::Invalid {
                reason: "map keys are not strictly ascending".to_string(),
            });
        }
        map.insert(key, value);
    }
    Ok(map)
}

impl Encode for Secret {
    fn encode(&self, dst: &mut impl BufMut) -> Result<(), CodecError> {
        let Ok(len) = u8::try_from(self.len()) else {
            return Err(CodecError::FieldTooLong { len: self.len(), max: MAX_OPAQUE1_LEN });
        };
        dst.put_u8(len);
        dst.put_slice(self.as_bytes());
        Ok(())
    }
}

impl Decode for Secret {
    fn decode(src: &mut impl Buf) -> Result<Self, CodecError> {
        let len = usize::from(read_u8(src)?);
        ensure(src.remaining(), len)?;
        let mut secret = Self::zeroed(len);
        src.copy_to_slice(secret.as_mut_bytes());
        Ok(secret)
    }
}

impl Encode for KeyAndNonce {
    fn encode(&self, dst: &mut impl BufMut) -> Result<(), CodecError> {
        self.key_secret().encode(dst)?;
        self.nonce_secret().encode(dst)
    }
}

impl Decode for KeyAndNonce {
    fn decode(src: &mut impl Buf) -> Result<Self, CodecError> {
        let key = Secret::decode(src)?;
        let nonce = Secret::decode(src)?;
        Ok(Self::new(key, nonce))
    }
}

impl Encode for CipherSuite {
    fn encode(&self, dst: &mut impl BufMut) -> Result<(), CodecError> {
        dst.put_u16(self.id());
        Ok(())
    }
}

impl Decode for CipherSuite {
    fn decode(src: &mut impl Buf) -> Result<Self, CodecError> {
        let id = read_u16(src)?;
        Self::from_id(id).ok_or(CodecError::UnknownCipherSuite(id))
    }
}

impl Encode for u32 {
    fn encode(&self, dst: &mut impl BufMut) -> Result<(), CodecError> {
        dst.put_u32(*self);
        Ok(())
    }
}

impl Decode for u32 {
    fn decode(src: &mut impl Buf) -> Result<Self, CodecError> {
        read_u32(src)
    }
}

macro_rules! u32_newtype_codec {
    ($($ty:ident),*) => {$(
        impl Encode for $ty {
            fn encode(&self, dst: &mut impl BufMut) -> Result<(), CodecError> {
                dst.put_u32(self.0);
                Ok(())
            }
        }

        impl Decode for $ty {
            fn decode(src: &mut impl Buf) -> Result<Self, CodecError> {
                read_u32(src).map($ty)
            }
        }
    )*};
}

u32_newtype_codec!(NodeIndex, LeafIndex, LeafCount);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_has_one_byte_length_prefix() {
        let bytes = Secret::from_slice(&[0xAA, 0xBB, 0xCC]).to_bytes().unwrap();
        assert_eq!(bytes, vec![0x03, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn oversized_secret_is_rejected() {
        let result = Secret::zeroed(256).to_bytes();
        assert_eq!(result, Err(CodecError::FieldTooLong { len: 256, max: 255 }));
    }

    #[test]
    fn map_has_four_byte_count_and_sorted_entries() {
        let mut map = BTreeMap::new();
        map.insert(NodeIndex(5), Secret::from_slice(&[0x05]));
        map.insert(NodeIndex(1), Secret::from_slice(&[0x01]));

        let mut bytes = Vec::new();
        encode_map(&mut bytes, &map).unwrap();

        assert_eq!(
            hex::encode(&bytes),
            concat!("00000002", "00000001", "0101", "00000005", "0105")
        );

        let decoded: BTreeMap<NodeIndex, Secret> = decode_map(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn unsorted_map_is_rejected() {
        let bytes =
            hex::decode(concat!("00000002", "00000005", "0105", "00000001", "0101")).unwrap();
        let result: Result<BTreeMap<NodeIndex, Secret>, _> = decode_map(&mut bytes.as_slice());
        assert!(matches!(result, Err(CodecError::Invalid { .. })));
    }

    #[test]
    fn duplicate_map_key_is_rejected() {
        let bytes =
            hex::decode(concat!("00000002", "00000001", "0101", "00000001", "0102")).unwrap();
        let result: Result<BTreeMap<NodeIndex, Secret>, _> = decode_map(&mut bytes.as_slice());
        assert!(matches!(result, Err(CodecError::Invalid { .. })));
    }

    #[test]
    fn truncated_secret_is_rejected() {
        let result = Secret::decode_exact(&[0x04, 0x01, 0x02]);
        assert_eq!(result, Err(CodecError::Truncated { needed: 4, remaining: 2 }));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let result = Secret::decode_exact(&[0x01, 0x01, 0xFF]);
        assert_eq!(result, Err(CodecError::TrailingBytes { remaining: 1 }));
    }

    #[test]
    fn unknown_suite_is_rejected() {
        assert_eq!(
            CipherSuite::decode_exact(&[0x12, 0x34]),
            Err(CodecError::UnknownCipherSuite(0x1234))
        );
        assert_eq!(
            CipherSuite::decode_exact(&[0x00, 0x01]),
            Ok(CipherSuite::X25519Sha256Aes128Gcm)
        );
    }

    #[test]
    fn key_and_nonce_layout() {
        let kn = KeyAndNonce::new(Secret::from_slice(&[1, 2]), Secret::from_slice(&[3]));
        assert_eq!(kn.to_bytes().unwrap(), vec![0x02, 1, 2, 0x01, 3]);
        assert_eq!(KeyAndNonce::decode_exact(&[0x02, 1, 2, 0x01, 3]), Ok(kn));
    }
}
