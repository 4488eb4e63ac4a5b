// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sentel.dev

//! The per-tick sample generation state machine.
//!
//! Socket-free by design: every tick takes the client's counters and
//! clock readings in a [`Tick`] and returns zero or more [`Emission`]s
//! for the client to frame and send. Tests drive it with a fake clock
//! and a seeded RNG.
//!
//! Steady-state decision order per tick:
//! 1. Sequence counter at a multiple of 100: re-sync the clock.
//! 2. Multiple of 10 (and the last send wasn't already a keyframe):
//!    emit a keyframe.
//! 3. Otherwise draw a random delta from ±10× the change threshold.
//!    Past the threshold it is applied: as a delta if it fits a signed
//!    byte, as a keyframe otherwise. Below it, a heartbeat goes out
//!    only when nothing has been sent for five intervals.
//!
//! Batching collects the same decisions as entries with per-entry time
//! offsets, flushes a full buffer as one batch, and follows every
//! tenth batch with a time sync.

use std::mem;
use std::time::Duration;

use sentel::protocol::messages::{BatchEntry, BatchSample};
use sentel::protocol::MsgKind;

/// Ticks without a send before a heartbeat, as a multiple of the interval.
pub const STARVATION_FACTOR: u32 = 5;

/// Every this-many value changes, a batching device records a keyframe
/// entry instead of another delta.
const BATCH_KEYFRAME_EVERY: u8 = 10;

/// Every this-many batches, the device re-syncs its clock.
const BATCH_SYNC_EVERY: u32 = 10;

/// Initial value range drawn on start.
const INITIAL_VALUE: std::ops::RangeInclusive<i16> = 400..=600;

/// What the client should send this tick, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    TimeSync,
    Keyframe(i16),
    Delta(i8),
    Heartbeat,
    Batch(Vec<BatchEntry>),
}

/// Clock and counter readings for one tick.
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    /// Sequence number the next packet would carry.
    pub seq: u16,
    /// Time since the last packet went out.
    pub since_last_send: Duration,
    /// The configured tick interval.
    pub interval: Duration,
    /// Seconds since the device's base time, modulo 2^16.
    pub offset: u16,
}

pub struct Generator {
    rng: fastrand::Rng,
    delta_thresh: i32,
    batch_size: u8,
    value: i16,
    last_kind: Option<MsgKind>,
    buffer: Vec<BatchEntry>,
    value_changes: u8,
    batches_sent: u32,
}

impl Generator {
    pub fn new(seed: Option<u64>, delta_thresh: i32, batch_size: u8) -> Self {
        let rng = match seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        Generator {
            rng,
            delta_thresh,
            batch_size,
            value: 0,
            last_kind: None,
            buffer: Vec::new(),
            value_changes: 0,
            batches_sent: 0,
        }
    }

    pub fn batching(&self) -> bool {
        self.batch_size > 1
    }

    pub fn value(&self) -> i16 {
        self.value
    }

    /// Entering steady state: sync the clock, then establish the
    /// initial value with a keyframe.
    pub fn start(&mut self) -> Vec<Emission> {
        self.value = self.rng.i16(INITIAL_VALUE);
        self.last_kind = Some(MsgKind::Keyframe);
        vec![Emission::TimeSync, Emission::Keyframe(self.value)]
    }

    /// One tick of the steady-state machine.
    pub fn tick(&mut self, tick: &Tick) -> Vec<Emission> {
        if self.batching() {
            self.tick_batching(tick)
        } else {
            self.tick_plain(tick)
        }
    }

    /// Any partial batch, for the shutdown path.
    pub fn flush(&mut self) -> Option<Emission> {
        (!self.buffer.is_empty()).then(|| self.take_batch())
    }

    fn tick_plain(&mut self, tick: &Tick) -> Vec<Emission> {
        if tick.seq % 100 == 0 {
            self.last_kind = Some(MsgKind::TimeSync);
            return vec![Emission::TimeSync];
        }
        if tick.seq % 10 == 0 && self.last_kind != Some(MsgKind::Keyframe) {
            self.last_kind = Some(MsgKind::Keyframe);
            return vec![Emission::Keyframe(self.value)];
        }

        let delta = self.draw_delta();
        if delta.abs() > self.delta_thresh {
            self.apply(delta);
            match i8::try_from(delta) {
                Ok(delta) => {
                    self.last_kind = Some(MsgKind::DataDelta);
                    vec![Emission::Delta(delta)]
                }
                Err(_) => {
                    self.last_kind = Some(MsgKind::Keyframe);
                    vec![Emission::Keyframe(self.value)]
                }
            }
        } else if self.starving(tick) {
            self.last_kind = Some(MsgKind::Heartbeat);
            vec![Emission::Heartbeat]
        } else {
            Vec::new()
        }
    }

    fn tick_batching(&mut self, tick: &Tick) -> Vec<Emission> {
        let mut out = Vec::new();

        if self.value_changes >= BATCH_KEYFRAME_EVERY {
            self.buffer.push(BatchEntry {
                offset: tick.offset,
                sample: BatchSample::Keyframe(self.value),
            });
            self.value_changes = 0;
        } else {
            let delta = self.draw_delta();
            self.value_changes += 1;
            if delta.abs() > self.delta_thresh {
                self.apply(delta);
                let sample = match i8::try_from(delta) {
                    Ok(delta) => BatchSample::Delta(delta),
                    Err(_) => BatchSample::Keyframe(self.value),
                };
                self.buffer.push(BatchEntry {
                    offset: tick.offset,
                    sample,
                });
            } else if self.starving(tick) {
                // heartbeats bypass the buffer; liveness cannot wait
                self.last_kind = Some(MsgKind::Heartbeat);
                out.push(Emission::Heartbeat);
            }
        }

        if self.buffer.len() >= usize::from(self.batch_size) {
            out.push(self.take_batch());
            if self.batches_sent % BATCH_SYNC_EVERY == 0 {
                self.last_kind = Some(MsgKind::TimeSync);
                out.push(Emission::TimeSync);
            }
        }

        out
    }

    fn take_batch(&mut self) -> Emission {
        self.batches_sent += 1;
        self.last_kind = Some(MsgKind::BatchedData);
        Emission::Batch(mem::take(&mut self.buffer))
    }

    fn starving(&self, tick: &Tick) -> bool {
        tick.since_last_send >= tick.interval * STARVATION_FACTOR
    }

    fn draw_delta(&mut self) -> i32 {
        let span = 10 * self.delta_thresh;
        self.rng.i32(-span..=span)
    }

    /// The walk stays inside the keyframe-representable range.
    fn apply(&mut self, delta: i32) {
        let moved = i32::from(self.value) + delta;
        self.value = moved.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
    }
}
