// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sentel.dev

//! Adaptive liveness timeouts.
//!
//! Every device earns its own silence ceiling from its observed
//! cadence: ten times the mean of its rolling inter-arrival history.
//! Devices with little history (or already signed off) are left
//! alone. One log line per silent episode; the latch clears when the
//! next packet arrives.

use std::time::{Duration, Instant};

use tracing::warn;

use crate::registry::{DeviceRegistry, DeviceStatus};

/// How often the registry is swept.
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(1500);

/// Devices with fewer accepted packets than this have no cadence yet.
pub const MIN_PACKETS: u64 = 10;

/// Silence ceiling as a multiple of the mean inter-arrival span.
pub const TIMEOUT_FACTOR: f64 = 10.0;

pub struct TimeoutObserver {
    last_sweep: Instant,
}

impl TimeoutObserver {
    pub fn new(now: Instant) -> Self {
        TimeoutObserver { last_sweep: now }
    }

    /// Sweep if the cadence interval has elapsed; called between
    /// socket receives.
    pub fn maybe_sweep(&mut self, registry: &mut DeviceRegistry, now: Instant) {
        if now.saturating_duration_since(self.last_sweep) < SWEEP_INTERVAL {
            return;
        }
        self.last_sweep = now;
        self.sweep(registry, now);
    }

    /// Unconditional sweep over every device.
    pub fn sweep(&mut self, registry: &mut DeviceRegistry, now: Instant) {
        for (device_id, record) in registry.iter_mut() {
            if record.packet_count < MIN_PACKETS {
                continue;
            }
            if record.status == DeviceStatus::Down {
                continue;
            }
            let Some(mean) = record.mean_interval() else {
                continue;
            };
            let Some(last) = record.last_activity else {
                continue;
            };

            let ceiling = mean * TIMEOUT_FACTOR;
            let idle = now.saturating_duration_since(last).as_secs_f64();
            if idle >= ceiling && !record.timeout_reported {
                record.timeout_reported = true;
                record.status = DeviceStatus::Timeout;
                warn!(
                    "device {} at {} idle for {:.1}s (mean interval {:.2}s, ceiling {:.1}s, last gap: {})",
                    device_id, record.bind_addr, idle, mean, ceiling, record.last_gap
                );
            }
        }
    }
}
