// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sentel.dev

//! Fixed-width datagram header framing.
//!
//! # Wire layout (9 bytes, all multi-byte fields big-endian)
//!
//! ```text
//! +-------------+-----------+-------+------------------+-------------+
//! | ver_msgtype | device_id |  seq  | timestamp_offset | payload_len |
//! |   1 byte    |  2 bytes  | 2 B   |     2 bytes      |   2 bytes   |
//! +-------------+-----------+-------+------------------+-------------+
//! ```
//!
//! `ver_msgtype` packs the protocol version in the upper nibble and the
//! message kind code in the lower nibble. `payload_len` must equal the
//! actual payload byte count; a mismatch drops the datagram.
//!
//! There is exactly one header layout in this build. The configuration
//! carries the authoritative format string ([`HEADER_WIRE_FORMAT`]) and
//! startup refuses any other value, so every party frames the same
//! bytes.

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use super::MsgKind;
use crate::config::Config;

/// Total header width on the wire.
pub const HEADER_LEN: usize = 9;

/// Authoritative description of the header layout, in struct notation:
/// network byte order, u8, then four u16 fields.
pub const HEADER_WIRE_FORMAT: &str = "!BHHHH";

/// Decoded header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub kind: MsgKind,
    pub device_id: u16,
    pub seq: u16,
    pub timestamp_offset: u16,
    pub payload_len: u16,
}

/// Framing failures. Each one drops the datagram with a single log
/// line at the call site; the receive loop continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("datagram is {len} bytes, shorter than the {HEADER_LEN}-byte header")]
    ShortDatagram { len: usize },

    #[error("protocol version {got} does not match configured version {expected}")]
    BadVersion { got: u8, expected: u8 },

    #[error("message code 0x{code:X} is not in the configured kind table")]
    UnknownKind { code: u8 },

    #[error("header declares {declared} payload bytes but {actual} arrived")]
    LengthMismatch { declared: u16, actual: usize },

    #[error("payload of {len} bytes does not fit the 16-bit length field")]
    PayloadTooLarge { len: usize },
}

/// Frame a complete datagram: header plus payload.
pub fn encode_datagram(
    cfg: &Config,
    kind: MsgKind,
    device_id: u16,
    seq: u16,
    timestamp_offset: u16,
    payload: &[u8],
) -> Result<Vec<u8>, FrameError> {
    let payload_len =
        u16::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
            len: payload.len(),
        })?;

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.push((cfg.protocol_version << 4) | cfg.kind_code(kind));
    buf.extend_from_slice(&device_id.to_be_bytes());
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(&timestamp_offset.to_be_bytes());
    buf.extend_from_slice(&payload_len.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Split a received datagram into its header and payload.
///
/// Validates length, protocol version, kind code, and the declared
/// payload length before handing anything back.
pub fn decode_datagram<'a>(
    cfg: &Config,
    datagram: &'a [u8],
) -> Result<(Header, &'a [u8]), FrameError> {
    if datagram.len() < HEADER_LEN {
        return Err(FrameError::ShortDatagram {
            len: datagram.len(),
        });
    }

    let ver_msgtype = datagram[0];
    let version = (ver_msgtype >> 4) & 0x0F;
    let code = ver_msgtype & 0x0F;

    if version != cfg.protocol_version {
        return Err(FrameError::BadVersion {
            got: version,
            expected: cfg.protocol_version,
        });
    }

    let kind = cfg
        .kind_from_code(code)
        .ok_or(FrameError::UnknownKind { code })?;

    let device_id = BigEndian::read_u16(&datagram[1..3]);
    let seq = BigEndian::read_u16(&datagram[3..5]);
    let timestamp_offset = BigEndian::read_u16(&datagram[5..7]);
    let payload_len = BigEndian::read_u16(&datagram[7..9]);

    let payload = &datagram[HEADER_LEN..];
    if payload.len() != usize::from(payload_len) {
        return Err(FrameError::LengthMismatch {
            declared: payload_len,
            actual: payload.len(),
        });
    }

    Ok((
        Header {
            version,
            kind,
            device_id,
            seq,
            timestamp_offset,
            payload_len,
        },
        payload,
    ))
}
