// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sentel.dev

//! Wire protocol: message kinds, header framing, payload codecs.
//!
//! Every datagram is a fixed 9-byte big-endian header followed by a
//! kind-specific payload. Numeric message codes are configuration, not
//! compile-time constants; the codec resolves them through [`Config`].
//!
//! [`Config`]: crate::config::Config

pub mod header;
pub mod mac;
pub mod messages;

pub use header::{decode_datagram, encode_datagram, FrameError, Header};
pub use mac::MacAddr;
pub use messages::{
    BatchEntries, BatchEntry, BatchSample, PayloadError, Startup, StartupAck,
};

/// Message kinds carried in the header's lower nibble.
///
/// The numeric code for each kind comes from the configuration file
/// (`MSG_STARTUP` and friends); nothing here assumes a particular
/// assignment beyond "distinct and fits in 4 bits".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgKind {
    /// Registration request (client to server, device id 0).
    Startup,
    /// Registration reply carrying the assigned or resumed device id.
    StartupAck,
    /// Clock alignment: 4-byte epoch seconds becoming the device's base time.
    TimeSync,
    /// Full-precision sample establishing the current value.
    Keyframe,
    /// Signed single-byte difference applied to the current value.
    DataDelta,
    /// Liveness ping, empty payload.
    Heartbeat,
    /// Several keyframe/delta entries under one sequence number.
    BatchedData,
    /// Graceful sign-off, empty payload.
    Shutdown,
}

impl MsgKind {
    /// All kinds, in wire-table order.
    pub const ALL: [MsgKind; 8] = [
        MsgKind::Startup,
        MsgKind::StartupAck,
        MsgKind::TimeSync,
        MsgKind::Keyframe,
        MsgKind::DataDelta,
        MsgKind::Heartbeat,
        MsgKind::BatchedData,
        MsgKind::Shutdown,
    ];

    /// Stable name for log lines.
    pub fn name(self) -> &'static str {
        match self {
            MsgKind::Startup => "STARTUP",
            MsgKind::StartupAck => "STARTUP_ACK",
            MsgKind::TimeSync => "TIME_SYNC",
            MsgKind::Keyframe => "KEYFRAME",
            MsgKind::DataDelta => "DATA_DELTA",
            MsgKind::Heartbeat => "HEARTBEAT",
            MsgKind::BatchedData => "BATCHED_DATA",
            MsgKind::Shutdown => "SHUTDOWN",
        }
    }
}

impl std::fmt::Display for MsgKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
