//! Fuzz target for epochs, group key sources and ratchets
//!
//! Drives a sender epoch and a receiver epoch built from the same arbitrary
//! inputs through random operation sequences.
//!
//! # Strategy
//!
//! - Arbitrary epoch secrets (wrong length, suite length) and group sizes
//! - Senders inside and outside the group
//! - Random next / out-of-order get / erase sequences on both channels
//! - Epoch advances with arbitrary update secrets
//!
//! # Invariants
//!
//! - Nothing panics; misuse surfaces as an error
//! - Sender and receiver always agree on a (sender, generation) key
//! - An erased generation behind the ratchet is never returned again
//! - Fatal errors only come from out-of-range senders

#![no_main]

use std::collections::HashSet;

use arbitrary::Arbitrary;
use arbor_core::{GroupKeySource, KeyScheduleConfig, KeyScheduleEpoch, KeyScheduleError};
use arbor_crypto::{CipherSuite, LeafCount, LeafIndex, Secret};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Scenario {
    suite: u8,
    /// Group size (clamped to keep tree derivation cheap)
    size: u8,
    epoch_secret: Vec<u8>,
    context: Vec<u8>,
    max_forward_skip: Option<u8>,
    operations: Vec<Operation>,
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Channel {
    Handshake,
    Application,
}

#[derive(Debug, Arbitrary)]
enum Operation {
    /// Sender advances its ratchet; receiver looks the generation up
    Send { channel: Channel, sender: u8 },
    /// Receiver looks up an arbitrary generation
    Receive { channel: Channel, sender: u8, generation: u8 },
    /// Receiver erases a generation
    Erase { channel: Channel, sender: u8, generation: u8 },
    /// Both sides move to the next epoch
    Advance { size: u8, update_secret: Vec<u8> },
}

fn keys(epoch: &mut KeyScheduleEpoch, channel: Channel) -> &mut GroupKeySource {
    match channel {
        Channel::Handshake => epoch.handshake_keys_mut(),
        Channel::Application => epoch.application_keys_mut(),
    }
}

fuzz_target!(|scenario: Scenario| {
    let suite = CipherSuite::ALL[usize::from(scenario.suite) % CipherSuite::ALL.len()];
    let size = LeafCount(u32::from(scenario.size % 32));
    let config = KeyScheduleConfig { max_forward_skip: scenario.max_forward_skip.map(u32::from) };

    let build = || {
        KeyScheduleEpoch::with_config(
            suite,
            size,
            Secret::from_slice(&scenario.epoch_secret),
            &scenario.context,
            config,
        )
    };

    let (mut sender, mut receiver) = match (build(), build()) {
        (Ok(sender), Ok(receiver)) => (sender, receiver),
        (Err(a), Err(b)) => {
            // INVARIANT: construction failures are deterministic and fatal
            assert_eq!(a, b);
            assert!(a.is_fatal());
            return;
        },
        _ => panic!("identical inputs must construct identically"),
    };

    // (is application channel, sender, generation) erased by the receiver
    let mut erased: HashSet<(bool, u32, u32)> = HashSet::new();

    for op in scenario.operations {
        match op {
            Operation::Send { channel, sender: leaf } => {
                let leaf = LeafIndex(u32::from(leaf % 40));
                match keys(&mut sender, channel).next(leaf) {
                    Ok((generation, sent)) => {
                        // The receiver may already have caught up past this
                        // generation and erased it
                        if let Ok(received) = keys(&mut receiver, channel).get(leaf, generation) {
                            assert_eq!(sent, received, "sender and receiver disagree");
                        }
                    },
                    Err(err) => assert_fatal_misuse(&err, leaf, sender.size()),
                }
            },

            Operation::Receive { channel, sender: leaf, generation } => {
                let leaf = LeafIndex(u32::from(leaf % 40));
                let generation = u32::from(generation);
                match keys(&mut receiver, channel).get(leaf, generation) {
                    Ok(_) => {
                        let key = (matches!(channel, Channel::Application), leaf.0, generation);
                        // INVARIANT: erased generations are never returned again
                        assert!(!erased.contains(&key), "erased key returned");
                    },
                    Err(err) if !err.is_fatal() => {},
                    Err(err) => assert_fatal_misuse(&err, leaf, receiver.size()),
                }
            },

            Operation::Erase { channel, sender: leaf, generation } => {
                let leaf = LeafIndex(u32::from(leaf % 40));
                let generation = u32::from(generation);
                let source = keys(&mut receiver, channel);
                // Only generations behind the ratchet stay erased
                if source.next_generation(leaf).is_some_and(|next| generation < next) {
                    erased.insert((matches!(channel, Channel::Application), leaf.0, generation));
                }
                source.erase(leaf, generation);
            },

            Operation::Advance { size, update_secret } => {
                let size = LeafCount(u32::from(size % 32));
                let update = Secret::from_slice(&update_secret);
                let context = scenario.context.as_slice();
                match (sender.next(size, &update, context), receiver.next(size, &update, context)) {
                    (Ok(next_sender), Ok(next_receiver)) => {
                        assert_eq!(next_sender.epoch_secret(), next_receiver.epoch_secret());
                        sender = next_sender;
                        receiver = next_receiver;
                        erased.clear();
                    },
                    (Err(a), Err(b)) => assert_eq!(a, b),
                    _ => panic!("identical epochs must advance identically"),
                }
            },
        }
    }
});

fn assert_fatal_misuse(err: &KeyScheduleError, leaf: LeafIndex, size: LeafCount) {
    assert!(
        matches!(err, KeyScheduleError::LeafOutOfRange { .. }) && !size.contains(leaf),
        "unexpected error for leaf {leaf} in group of {size}: {err}"
    );
}
