//! Key schedule configuration.

use serde::{Deserialize, Serialize};

/// Tunables applied to every ratchet an epoch creates.
///
/// Configuration is runtime policy, not key state: it is not part of the
/// encoded epoch and must be re-applied after decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyScheduleConfig {
    /// Maximum number of generations a single lookup may advance a ratchet
    /// past its next unconsumed generation. `None` means unbounded.
    ///
    /// Bounding this limits the work (and the number of cached keys) one
    /// out-of-order message can force.
    pub max_forward_skip: Option<u32>,
}

impl KeyScheduleConfig {
    /// Configuration with a forward skip limit.
    pub fn with_max_forward_skip(max_forward_skip: u32) -> Self {
        Self { max_forward_skip: Some(max_forward_skip) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_unbounded() {
        assert_eq!(KeyScheduleConfig::default().max_forward_skip, None);
    }

    #[test]
    fn cbor_roundtrip() {
        let config = KeyScheduleConfig::with_max_forward_skip(1000);

        let mut bytes = Vec::new();
        ciborium::into_writer(&config, &mut bytes).unwrap();
        let decoded: KeyScheduleConfig = ciborium::from_reader(bytes.as_slice()).unwrap();

        assert_eq!(decoded, config);
    }

    #[test]
    fn missing_fields_use_defaults() {
        #[derive(Serialize)]
        struct Empty {}

        let mut bytes = Vec::new();
        ciborium::into_writer(&Empty {}, &mut bytes).unwrap();
        let decoded: KeyScheduleConfig = ciborium::from_reader(bytes.as_slice()).unwrap();

        assert_eq!(decoded, KeyScheduleConfig::default());
    }
}
