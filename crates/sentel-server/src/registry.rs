// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sentel.dev

//! Device registry: endpoint/MAC bookkeeping and per-device state.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::time::{Instant, SystemTime};

use sentel::{MacAddr, SequenceTracker};

/// Rolling inter-arrival history depth per device.
pub const INTERVAL_WINDOW: usize = 32;

/// Lifecycle status of a registered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Registered, no telemetry yet.
    Idle,
    /// Receiving telemetry.
    Active,
    /// Silent past its adaptive ceiling.
    Timeout,
    /// Signed off (or presumed gone); eligible for resumption.
    Down,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceStatus::Idle => "IDLE",
            DeviceStatus::Active => "ACTIVE",
            DeviceStatus::Timeout => "TIMEOUT",
            DeviceStatus::Down => "DOWN",
        };
        f.write_str(s)
    }
}

/// Everything the server tracks for one device id.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    /// Endpoint as seen on the socket; rebound on resumption.
    pub bind_addr: SocketAddr,
    /// Canonical hardware tag from STARTUP.
    pub mac: MacAddr,
    /// Epoch seconds from the last TIME_SYNC; 0 until the first one.
    pub base_time: u32,
    /// Wall clock of the last accepted packet.
    pub last_seen: SystemTime,
    /// Monotonic instant of the last accepted packet.
    pub last_activity: Option<Instant>,
    /// Rolling inter-arrival spans in seconds, newest last.
    intervals: VecDeque<f64>,
    /// Packets that contributed to the interval statistics.
    pub packet_count: u64,
    /// Reconstructed signal value (keyframes reset it, deltas move it).
    pub value: i32,
    /// Sequence classification state.
    pub tracker: SequenceTracker,
    pub status: DeviceStatus,
    /// One timeout log line per silent episode.
    pub timeout_reported: bool,
    /// Declared batch size from STARTUP; >1 means batching.
    pub batch_size: Option<u8>,
    /// Whether the most recent accepted packet closed over a gap.
    pub last_gap: bool,
}

impl DeviceRecord {
    fn new(bind_addr: SocketAddr, mac: MacAddr, batch_size: Option<u8>) -> Self {
        DeviceRecord {
            bind_addr,
            mac,
            base_time: 0,
            last_seen: SystemTime::now(),
            last_activity: None,
            intervals: VecDeque::with_capacity(INTERVAL_WINDOW),
            packet_count: 0,
            value: 0,
            tracker: SequenceTracker::new(),
            status: DeviceStatus::Idle,
            timeout_reported: false,
            batch_size,
            last_gap: false,
        }
    }

    /// Batch entry allowance for the classifier, when batching.
    pub fn batch_limit(&self) -> Option<u32> {
        self.batch_size.filter(|&n| n > 1).map(u32::from)
    }

    /// Append the span since the prior accepted packet, keeping the
    /// window bounded. Non-positive spans are discarded.
    pub fn record_interval(&mut self, prior: Option<Instant>, arrival: Instant) {
        let Some(prior) = prior else {
            return;
        };
        let span = arrival.saturating_duration_since(prior).as_secs_f64();
        if span <= 0.0 {
            return;
        }
        if self.intervals.len() == INTERVAL_WINDOW {
            self.intervals.pop_front();
        }
        self.intervals.push_back(span);
    }

    /// Mean of the rolling inter-arrival history, if any.
    pub fn mean_interval(&self) -> Option<f64> {
        if self.intervals.is_empty() {
            return None;
        }
        let mean = self.intervals.iter().sum::<f64>() / self.intervals.len() as f64;
        (mean > 0.0).then_some(mean)
    }

    #[cfg(test)]
    pub fn push_interval(&mut self, span: f64) {
        if self.intervals.len() == INTERVAL_WINDOW {
            self.intervals.pop_front();
        }
        self.intervals.push_back(span);
    }
}

/// Result of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Fresh device, 2-byte ACK.
    Assigned { device_id: u16 },
    /// Known MAC coming back from DOWN, 4-byte ACK with the next seq.
    Resumed { device_id: u16, resume_seq: u16 },
    /// Conflict; no ACK goes out.
    Rejected { reason: RejectReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The MAC is already registered and not DOWN.
    MacAlreadyLive { device_id: u16 },
    /// The endpoint is bound to a live device under a different MAC.
    EndpointBound { device_id: u16 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MacAlreadyLive { device_id } => {
                write!(f, "MAC already registered as device {device_id}")
            }
            RejectReason::EndpointBound { device_id } => {
                write!(f, "endpoint already bound to device {device_id}")
            }
        }
    }
}

/// Maps device ids to records, with MAC and endpoint lookups.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<u16, DeviceRecord>,
    mac_index: HashMap<MacAddr, u16>,
    next_id: u16,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry {
            devices: HashMap::new(),
            mac_index: HashMap::new(),
            next_id: 1,
        }
    }

    /// Apply the registration policy for a STARTUP.
    pub fn register(
        &mut self,
        endpoint: SocketAddr,
        mac: MacAddr,
        batch_size: Option<u8>,
    ) -> RegisterOutcome {
        if let Some(&device_id) = self.mac_index.get(&mac) {
            let Some(record) = self.devices.get_mut(&device_id) else {
                // index without a record cannot happen; treat as fresh
                return self.allocate(endpoint, mac, batch_size);
            };
            if record.status != DeviceStatus::Down {
                return RegisterOutcome::Rejected {
                    reason: RejectReason::MacAlreadyLive { device_id },
                };
            }
            // Resume: same id, sequence continues one past the head.
            let resume_seq = record.tracker.head().map_or(0, |h| h.wrapping_add(1));
            record.bind_addr = endpoint;
            record.status = DeviceStatus::Idle;
            record.timeout_reported = false;
            record.last_seen = SystemTime::now();
            record.batch_size = batch_size;
            return RegisterOutcome::Resumed {
                device_id,
                resume_seq,
            };
        }

        if let Some(device_id) = self.lookup_by_endpoint(endpoint) {
            let live = self
                .devices
                .get(&device_id)
                .is_some_and(|r| r.status != DeviceStatus::Down);
            if live {
                return RegisterOutcome::Rejected {
                    reason: RejectReason::EndpointBound { device_id },
                };
            }
        }

        self.allocate(endpoint, mac, batch_size)
    }

    fn allocate(
        &mut self,
        endpoint: SocketAddr,
        mac: MacAddr,
        batch_size: Option<u8>,
    ) -> RegisterOutcome {
        let device_id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.devices
            .insert(device_id, DeviceRecord::new(endpoint, mac, batch_size));
        self.mac_index.insert(mac, device_id);
        RegisterOutcome::Assigned { device_id }
    }

    pub fn contains(&self, device_id: u16) -> bool {
        self.devices.contains_key(&device_id)
    }

    pub fn get(&self, device_id: u16) -> Option<&DeviceRecord> {
        self.devices.get(&device_id)
    }

    pub fn get_mut(&mut self, device_id: u16) -> Option<&mut DeviceRecord> {
        self.devices.get_mut(&device_id)
    }

    #[allow(dead_code)]
    pub fn lookup_by_mac(&self, mac: &MacAddr) -> Option<u16> {
        self.mac_index.get(mac).copied()
    }

    pub fn lookup_by_endpoint(&self, endpoint: SocketAddr) -> Option<u16> {
        self.devices
            .iter()
            .find(|(_, record)| record.bind_addr == endpoint)
            .map(|(&id, _)| id)
    }

    #[allow(dead_code)]
    pub fn mark_status(&mut self, device_id: u16, status: DeviceStatus) {
        if let Some(record) = self.devices.get_mut(&device_id) {
            record.status = status;
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u16, &mut DeviceRecord)> {
        self.devices.iter_mut().map(|(&id, record)| (id, record))
    }
}
