// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sentel.dev

//! End-to-end codec + classifier behavior over a simulated lossy link.
//!
//! Frames real datagrams with one configuration, mangles the stream
//! the way UDP does (drops, reorders, replays), and checks that the
//! decode + classify pipeline tells the right story.

use sentel::protocol::messages::{decode_delta, encode_delta};
use sentel::protocol::{decode_datagram, encode_datagram, MsgKind};
use sentel::{Config, SeqClass, SequenceTracker};

fn frame_delta(cfg: &Config, seq: u16, delta: i8) -> Vec<u8> {
    encode_datagram(cfg, MsgKind::DataDelta, 1, seq, 0, &encode_delta(delta))
        .expect("framing a one-byte payload cannot fail")
}

#[test]
fn clean_stream_classifies_clean() {
    let cfg = Config::default();
    let mut tracker = SequenceTracker::new();

    for seq in 0..500u16 {
        let wire = frame_delta(&cfg, seq, 1);
        let (header, payload) = decode_datagram(&cfg, &wire).unwrap();
        assert_eq!(decode_delta(payload).unwrap(), 1);

        let class = tracker.classify(header.seq, None);
        assert!(
            matches!(class, SeqClass::First | SeqClass::AcceptNew),
            "seq {seq} classified {class:?}"
        );
    }
    assert_eq!(tracker.head(), Some(499));
    assert_eq!(tracker.missing_len(), 0);
}

#[test]
fn drops_reorders_and_replays_are_accounted_for() {
    let cfg = Config::default();
    let mut tracker = SequenceTracker::new();

    // Sender emits 0..10; the link drops 6, swaps 3 and 4, replays 2.
    let arrival_order: [u16; 10] = [0, 1, 2, 2, 4, 3, 5, 7, 8, 9];

    let mut gaps = 0u32;
    let mut recovered = 0u32;
    let mut duplicates = 0u32;
    for &seq in &arrival_order {
        let wire = frame_delta(&cfg, seq, 1);
        let (header, _) = decode_datagram(&cfg, &wire).unwrap();
        match tracker.classify(header.seq, None) {
            SeqClass::FillMissing { count } => gaps += u32::from(count),
            SeqClass::DelayedRecovery => recovered += 1,
            SeqClass::Duplicate | SeqClass::OutOfWindow => duplicates += 1,
            SeqClass::First | SeqClass::AcceptNew => {}
        }
    }

    // gap openings: 3 (when 4 eclipsed it) and 6 (when 7 eclipsed it)
    assert_eq!(gaps, 2);
    assert_eq!(recovered, 1, "the swapped 3 comes back");
    assert_eq!(duplicates, 1, "the replayed 2 is suppressed");
    assert!(tracker.is_missing(6), "the dropped 6 stays recoverable");
    assert_eq!(tracker.head(), Some(9));
}

#[test]
fn a_rewired_code_table_still_frames_and_routes() {
    // The wire codes are configuration: scramble the assignment and
    // everything must keep lining up as long as both ends agree.
    let cfg = Config {
        msg_startup: 0x8,
        msg_startup_ack: 0x7,
        msg_time_sync: 0x6,
        msg_keyframe: 0x5,
        msg_data_delta: 0x4,
        msg_heartbeat: 0x3,
        msg_batched_data: 0x2,
        msg_shutdown: 0x1,
        ..Config::default()
    };
    cfg.validate().unwrap();

    for kind in MsgKind::ALL {
        let wire = encode_datagram(&cfg, kind, 3, 11, 0, &[]).unwrap();
        let (header, _) = decode_datagram(&cfg, &wire).unwrap();
        assert_eq!(header.kind, kind);
    }

    // A receiver on the stock table rejects the scrambled version byte
    // only when codes genuinely disagree; version stays shared here, so
    // a SHUTDOWN framed as 0x1 arrives as the stock table's STARTUP.
    let stock = Config::default();
    let wire = encode_datagram(&cfg, MsgKind::Shutdown, 3, 11, 0, &[]).unwrap();
    let (header, _) = decode_datagram(&stock, &wire).unwrap();
    assert_eq!(header.kind, MsgKind::Startup);
}

#[test]
fn sustained_traffic_keeps_state_bounded() {
    let cfg = Config::default();
    let mut tracker = SequenceTracker::new();

    // 200k datagrams with a 1-in-50 drop the sender never repairs.
    let mut seq: u16 = 0;
    for i in 0..200_000u32 {
        if i % 50 == 7 {
            seq = seq.wrapping_add(1); // lost on the floor
        }
        let wire = frame_delta(&cfg, seq, 0);
        let (header, _) = decode_datagram(&cfg, &wire).unwrap();
        tracker.classify(header.seq, None);
        seq = seq.wrapping_add(1);
    }

    assert!(
        tracker.window_len() <= sentel::seq::DEFAULT_REPLAY_CAPACITY + 1,
        "duplicate window must stay bounded, got {}",
        tracker.window_len()
    );
    // unrepaired gaps age out once the head laps them
    assert!(
        tracker.missing_len() < 32_768,
        "missing set must not accumulate forever, got {}",
        tracker.missing_len()
    );
}
