// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sentel.dev

//! Cyclic sequence classification.
//!
//! Devices number every message modulo 2^16. Transport is lossy and
//! unordered, so each arriving sequence number must be sorted into one
//! of a handful of outcomes: fresh forward progress, a gap that opens
//! missing sequences, a late copy recovering one of those, or a replay
//! to suppress.
//!
//! # Algorithm
//!
//! All comparisons use unsigned modular distance against the head (the
//! highest accepted forward-progressing seq), with 2^15 as the
//! half-rollover boundary:
//!
//! - `0 < forward < 2^15`: forward progress. Any skipped sequence
//!   numbers join the missing set; the head advances.
//! - `0 < backward < 2^15`: a late arrival. If it is in the missing
//!   set it is a recovery; otherwise a replay of something already
//!   eclipsed.
//! - Anything else (including the exact midpoint) is out of window and
//!   suppressed like a duplicate.
//!
//! A bounded duplicate window (hash set for membership, queue for
//! aging) suppresses replays; eviction never forgets the head or a
//! sequence still awaiting recovery. The missing set itself ages: once
//! the head has moved at least a half-rollover past a gap, that gap
//! can no longer be told apart from old history and is dropped.
//!
//! # Example
//!
//! ```
//! use sentel::seq::{SeqClass, SequenceTracker};
//!
//! let mut tracker = SequenceTracker::new();
//! assert_eq!(tracker.classify(0, None), SeqClass::First);
//! assert_eq!(tracker.classify(1, None), SeqClass::AcceptNew);
//! assert_eq!(tracker.classify(3, None), SeqClass::FillMissing { count: 1 });
//! assert_eq!(tracker.classify(2, None), SeqClass::DelayedRecovery);
//! assert_eq!(tracker.classify(2, None), SeqClass::Duplicate);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};

/// Half of the 16-bit sequence space; the reorder horizon.
pub const HALF_ROLLOVER: u16 = 1 << 15;

/// Default bound on the duplicate window.
pub const DEFAULT_REPLAY_CAPACITY: usize = 512;

/// Outcome of classifying one sequence number. Exactly one tag per
/// input, deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqClass {
    /// The device's very first message; it seeds the head.
    First,
    /// Forward progress with no skipped sequences.
    AcceptNew,
    /// Forward progress that skipped `count` sequences, now missing.
    FillMissing { count: u16 },
    /// A late copy that fills a previously logged gap.
    DelayedRecovery,
    /// A replay of an already accepted sequence.
    Duplicate,
    /// Too far from the head to reason about; suppressed as a replay.
    OutOfWindow,
}

impl SeqClass {
    /// Journaled as a duplicate row.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, SeqClass::Duplicate | SeqClass::OutOfWindow)
    }

    /// Journaled with the gap flag set.
    pub fn is_gap(&self) -> bool {
        matches!(self, SeqClass::FillMissing { .. })
    }

    /// Journaled with the delayed flag set.
    pub fn is_delayed(&self) -> bool {
        matches!(self, SeqClass::DelayedRecovery)
    }
}

/// Per-device sequence state: head, missing set, duplicate window.
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    /// Highest forward-progressing accepted seq; None before traffic.
    head: Option<u16>,
    /// Membership half of the duplicate window.
    seen: HashSet<u16>,
    /// Insertion-ordered half of the duplicate window, for aging.
    seen_order: VecDeque<u16>,
    /// Gaps awaiting a delayed copy.
    missing: HashSet<u16>,
    /// Entries accepted so far under each batch seq.
    batch_counts: HashMap<u16, u32>,
    replay_capacity: usize,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    pub fn with_capacity(replay_capacity: usize) -> Self {
        SequenceTracker {
            head: None,
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            missing: HashSet::new(),
            batch_counts: HashMap::new(),
            replay_capacity,
        }
    }

    pub fn head(&self) -> Option<u16> {
        self.head
    }

    /// Number of sequences currently awaiting delayed recovery.
    pub fn missing_len(&self) -> usize {
        self.missing.len()
    }

    pub fn is_missing(&self, seq: u16) -> bool {
        self.missing.contains(&seq)
    }

    /// Current duplicate-window population.
    pub fn window_len(&self) -> usize {
        self.seen.len()
    }

    /// Classify `seq` and update state accordingly.
    ///
    /// `batch_limit` is the device's batch size when it registered as
    /// batching: a window hit is then accepted until that many entries
    /// have been counted under the one seq, which is how a batch's
    /// entries share their sequence number.
    pub fn classify(&mut self, seq: u16, batch_limit: Option<u32>) -> SeqClass {
        let head = match self.head {
            Some(head) => head,
            None => {
                self.head = Some(seq);
                self.remember(seq);
                return SeqClass::First;
            }
        };

        if self.seen.contains(&seq) {
            if let Some(limit) = batch_limit {
                let count = self.batch_counts.entry(seq).or_insert(1);
                if *count < limit {
                    *count += 1;
                    return SeqClass::AcceptNew;
                }
            }
            return SeqClass::Duplicate;
        }

        let forward = seq.wrapping_sub(head);
        let backward = head.wrapping_sub(seq);

        let class = if forward > 0 && forward < HALF_ROLLOVER {
            let mut count = 0u16;
            let mut probe = head.wrapping_add(1);
            while probe != seq {
                if self.missing.insert(probe) {
                    count += 1;
                }
                probe = probe.wrapping_add(1);
            }
            self.head = Some(seq);
            self.age_missing(seq);
            if count > 0 {
                SeqClass::FillMissing { count }
            } else {
                SeqClass::AcceptNew
            }
        } else if backward > 0 && backward < HALF_ROLLOVER {
            if self.missing.remove(&seq) {
                SeqClass::DelayedRecovery
            } else {
                return SeqClass::Duplicate;
            }
        } else {
            return SeqClass::OutOfWindow;
        };

        self.remember(seq);
        class
    }

    /// Add an accepted seq to the duplicate window and trim to bound.
    fn remember(&mut self, seq: u16) {
        self.seen.insert(seq);
        self.seen_order.push_back(seq);

        while self.seen_order.len() > self.replay_capacity {
            let Some(retired) = self.seen_order.pop_front() else {
                break;
            };
            if !self.missing.contains(&retired) && Some(retired) != self.head {
                self.seen.remove(&retired);
                self.batch_counts.remove(&retired);
            }
        }
    }

    /// Drop gaps the head has left at least a half-rollover behind;
    /// a copy that old classifies out-of-window anyway.
    fn age_missing(&mut self, head: u16) {
        if self.missing.is_empty() {
            return;
        }
        let before = self.missing.len();
        self.missing
            .retain(|&gap| head.wrapping_sub(gap) < HALF_ROLLOVER);
        let dropped = before - self.missing.len();
        if dropped > 0 {
            log::debug!("aged out {dropped} unrecoverable gap(s) behind head {head}");
        }
    }
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new()
    }
}
