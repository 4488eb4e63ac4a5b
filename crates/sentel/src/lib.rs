// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sentel.dev

//! Sentel protocol library
//!
//! Shared core for the telemetry server and client binaries:
//! - Wire framing and payload codecs for the binary sensor protocol
//! - The cyclic sequence classifier (duplicate window + missing set)
//! - The flat key/value configuration surface
//! - UDP socket construction helpers
//!
//! The library is transport-agnostic where it can be: the codecs and
//! the classifier never touch a socket, so both binaries and the test
//! suites drive them directly.

pub mod config;
pub mod protocol;
pub mod seq;
pub mod transport;

pub use config::{Config, ConfigError};
pub use protocol::header::{Header, HEADER_WIRE_FORMAT, HEADER_LEN};
pub use protocol::mac::MacAddr;
pub use protocol::{FrameError, MsgKind, PayloadError};
pub use seq::{SeqClass, SequenceTracker};
pub use transport::TelemetrySocket;
