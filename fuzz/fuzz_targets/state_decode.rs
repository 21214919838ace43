//! Fuzz target for decoding persisted key schedule state
//!
//! Feeds arbitrary bytes to every stateful decoder to find:
//! - Parser crashes or panics
//! - Huge element counts that allocate before reading
//! - Decoded state that violates construction invariants and panics on use
//! - Decoded trees that release a leaf's seed more than once
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use arbor_core::{BaseKeySource, GroupKeySource, HashRatchet, KeyScheduleEpoch};
use arbor_crypto::{Decode, Encode, LeafIndex};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(mut ratchet) = HashRatchet::decode_exact(data) {
        // INVARIANT: accepted state re-encodes to the same bytes
        assert_eq!(ratchet.to_bytes().ok().as_deref(), Some(data));
        let _ = ratchet.next();
        let _ = ratchet.get(ratchet.next_generation().saturating_add(3));
    }

    if let Ok(mut base) = BaseKeySource::decode_exact(data) {
        assert_eq!(base.to_bytes().ok().as_deref(), Some(data));
        let _ = base.get(LeafIndex(0));

        if let BaseKeySource::Tree(mut source) = base {
            // INVARIANT: a decoded tree releases each leaf's seed at most once
            for leaf in (0..source.size().0.min(64)).map(LeafIndex) {
                if source.get(leaf).is_ok() {
                    assert!(source.get(leaf).is_err(), "leaf {leaf} seed released twice");
                }
            }
        }
    }

    if let Ok(mut keys) = GroupKeySource::decode_exact(data) {
        let _ = keys.next(LeafIndex(0));
    }

    if let Ok(mut epoch) = KeyScheduleEpoch::decode_exact(data) {
        assert_eq!(epoch.to_bytes().ok().as_deref(), Some(data));
        let _ = epoch.application_keys_mut().next(LeafIndex(0));
        let _ = epoch.handshake_keys_mut().next(LeafIndex(0));
    }
});
