// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sentel.dev

//! The flat key/value configuration surface.
//!
//! One JSON object binds the protocol constants, the header layout,
//! and the journal directory for every party. Every key is required;
//! a missing or unparseable key aborts startup before any socket
//! opens. The loaded [`Config`] is immutable for the life of the
//! process.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::header::{HEADER_WIRE_FORMAT, HEADER_LEN};
use crate::protocol::MsgKind;

/// Immutable process configuration. Field names mirror the on-disk
/// keys exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address.
    #[serde(rename = "HOST")]
    pub host: IpAddr,

    /// Server bind port.
    #[serde(rename = "PORT")]
    pub port: u16,

    /// Version placed in the header's upper nibble.
    #[serde(rename = "PROTOCOL_VERSION")]
    pub protocol_version: u8,

    #[serde(rename = "MSG_STARTUP")]
    pub msg_startup: u8,
    #[serde(rename = "MSG_STARTUP_ACK")]
    pub msg_startup_ack: u8,
    #[serde(rename = "MSG_TIME_SYNC")]
    pub msg_time_sync: u8,
    #[serde(rename = "MSG_KEYFRAME")]
    pub msg_keyframe: u8,
    #[serde(rename = "MSG_DATA_DELTA")]
    pub msg_data_delta: u8,
    #[serde(rename = "MSG_HEARTBEAT")]
    pub msg_heartbeat: u8,
    #[serde(rename = "MSG_BATCHED_DATA")]
    pub msg_batched_data: u8,
    #[serde(rename = "MSG_SHUTDOWN")]
    pub msg_shutdown: u8,

    /// Authoritative header layout description. This build frames one
    /// layout; any other value here is a startup error.
    #[serde(rename = "HEADER_FORMAT")]
    pub header_format: String,

    /// Byte ceiling for both receive and send.
    #[serde(rename = "MAX_PACKET_SIZE")]
    pub max_packet_size: usize,

    /// Directory the per-session CSV journals land in.
    #[serde(rename = "CSV_LOG_DIR")]
    pub csv_log_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Load and validate a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency. Called by [`Config::from_file`];
    /// direct constructions (tests, tools) should call it themselves.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol_version > 0x0F {
            return Err(ConfigError::Invalid(format!(
                "PROTOCOL_VERSION {} does not fit in 4 bits",
                self.protocol_version
            )));
        }

        let mut codes = HashSet::new();
        for kind in MsgKind::ALL {
            let code = self.kind_code(kind);
            if code > 0x0F {
                return Err(ConfigError::Invalid(format!(
                    "message code {code} for {kind} does not fit in 4 bits"
                )));
            }
            if !codes.insert(code) {
                return Err(ConfigError::Invalid(format!(
                    "message code {code} assigned twice"
                )));
            }
        }

        if self.header_format != HEADER_WIRE_FORMAT {
            return Err(ConfigError::Invalid(format!(
                "HEADER_FORMAT {:?} does not match the framed layout {:?}",
                self.header_format, HEADER_WIRE_FORMAT
            )));
        }

        if self.max_packet_size <= HEADER_LEN {
            return Err(ConfigError::Invalid(format!(
                "MAX_PACKET_SIZE {} leaves no room past the {HEADER_LEN}-byte header",
                self.max_packet_size
            )));
        }
        if self.max_packet_size > 65535 {
            return Err(ConfigError::Invalid(format!(
                "MAX_PACKET_SIZE {} exceeds a UDP datagram",
                self.max_packet_size
            )));
        }

        if self.csv_log_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("CSV_LOG_DIR is empty".into()));
        }

        Ok(())
    }

    /// Wire code for a message kind.
    pub fn kind_code(&self, kind: MsgKind) -> u8 {
        match kind {
            MsgKind::Startup => self.msg_startup,
            MsgKind::StartupAck => self.msg_startup_ack,
            MsgKind::TimeSync => self.msg_time_sync,
            MsgKind::Keyframe => self.msg_keyframe,
            MsgKind::DataDelta => self.msg_data_delta,
            MsgKind::Heartbeat => self.msg_heartbeat,
            MsgKind::BatchedData => self.msg_batched_data,
            MsgKind::Shutdown => self.msg_shutdown,
        }
    }

    /// Message kind for a wire code, if the code is assigned.
    pub fn kind_from_code(&self, code: u8) -> Option<MsgKind> {
        MsgKind::ALL
            .into_iter()
            .find(|&kind| self.kind_code(kind) == code)
    }
}

impl Default for Config {
    /// The stock assignment: codes 0x1..=0x8 in table order, version 1,
    /// 200-byte datagram ceiling.
    fn default() -> Self {
        Config {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 12345,
            protocol_version: 0x1,
            msg_startup: 0x1,
            msg_startup_ack: 0x2,
            msg_time_sync: 0x3,
            msg_keyframe: 0x4,
            msg_data_delta: 0x5,
            msg_heartbeat: 0x6,
            msg_batched_data: 0x7,
            msg_shutdown: 0x8,
            header_format: HEADER_WIRE_FORMAT.to_string(),
            max_packet_size: 200,
            csv_log_dir: PathBuf::from("logs"),
        }
    }
}
