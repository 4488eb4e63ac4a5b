// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sentel.dev

//! Payload codecs for each message kind.
//!
//! Payloads are tiny and fixed-shape except BATCHED_DATA, which is a
//! concatenation of entries:
//!
//! ```text
//! +--------------+------------+----------------------+
//! | entry-offset | entry-kind | value bytes          |
//! |  2 bytes u16 |   1 byte   | i16 (KEYFRAME) or    |
//! |              |            | i8 (DATA_DELTA)      |
//! +--------------+------------+----------------------+
//! ```
//!
//! Entry offsets are unsigned seconds since the device's base time.
//! A malformed entry aborts the remainder of the batch; entries before
//! it stand.

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use super::mac::MacAddr;
use super::MsgKind;
use crate::config::Config;

/// Payload-level parse failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload is {got} bytes, expected {expected}")]
    WrongLength { expected: usize, got: usize },

    #[error("startup payload must be 6 or 7 bytes, got {got}")]
    BadStartup { got: usize },

    #[error("startup-ack payload must be 2 or 4 bytes, got {got}")]
    BadStartupAck { got: usize },

    #[error("truncated batch entry at byte {at}")]
    TruncatedBatch { at: usize },

    #[error("batch entry kind 0x{code:X} is not a sample kind")]
    BadEntryKind { code: u8 },
}

/// STARTUP: the hardware tag, plus a batch size when the device will
/// bundle samples (a size of 0 or 1 means plain per-sample sending).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Startup {
    pub mac: MacAddr,
    pub batch_size: Option<u8>,
}

/// STARTUP_ACK: fresh assignment (2-byte payload) or resumption of a
/// previously registered device (4-byte payload carrying the next
/// sequence number the client should use).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupAck {
    Assigned { device_id: u16 },
    Resumed { device_id: u16, resume_seq: u16 },
}

impl StartupAck {
    pub fn device_id(&self) -> u16 {
        match *self {
            StartupAck::Assigned { device_id } => device_id,
            StartupAck::Resumed { device_id, .. } => device_id,
        }
    }
}

/// One sample inside a BATCHED_DATA payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSample {
    Keyframe(i16),
    Delta(i8),
}

impl BatchSample {
    pub fn kind(&self) -> MsgKind {
        match self {
            BatchSample::Keyframe(_) => MsgKind::Keyframe,
            BatchSample::Delta(_) => MsgKind::DataDelta,
        }
    }
}

/// A batch entry: seconds since base time, plus the sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEntry {
    pub offset: u16,
    pub sample: BatchSample,
}

pub fn encode_startup(startup: &Startup) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MacAddr::WIRE_LEN + 1);
    buf.extend_from_slice(&startup.mac.octets());
    if let Some(size) = startup.batch_size {
        buf.push(size);
    }
    buf
}

pub fn decode_startup(payload: &[u8]) -> Result<Startup, PayloadError> {
    let (mac_bytes, batch_size) = match payload.len() {
        6 => (payload, None),
        7 => (&payload[..6], Some(payload[6])),
        got => return Err(PayloadError::BadStartup { got }),
    };
    // from_wire cannot fail here, the length was just checked
    let mac = MacAddr::from_wire(mac_bytes).ok_or(PayloadError::BadStartup {
        got: payload.len(),
    })?;
    Ok(Startup { mac, batch_size })
}

pub fn encode_startup_ack(ack: &StartupAck) -> Vec<u8> {
    match *ack {
        StartupAck::Assigned { device_id } => device_id.to_be_bytes().to_vec(),
        StartupAck::Resumed {
            device_id,
            resume_seq,
        } => {
            let mut buf = Vec::with_capacity(4);
            buf.extend_from_slice(&device_id.to_be_bytes());
            buf.extend_from_slice(&resume_seq.to_be_bytes());
            buf
        }
    }
}

pub fn decode_startup_ack(payload: &[u8]) -> Result<StartupAck, PayloadError> {
    match payload.len() {
        2 => Ok(StartupAck::Assigned {
            device_id: BigEndian::read_u16(payload),
        }),
        4 => Ok(StartupAck::Resumed {
            device_id: BigEndian::read_u16(&payload[..2]),
            resume_seq: BigEndian::read_u16(&payload[2..4]),
        }),
        got => Err(PayloadError::BadStartupAck { got }),
    }
}

pub fn encode_time_sync(epoch_secs: u32) -> Vec<u8> {
    epoch_secs.to_be_bytes().to_vec()
}

pub fn decode_time_sync(payload: &[u8]) -> Result<u32, PayloadError> {
    if payload.len() != 4 {
        return Err(PayloadError::WrongLength {
            expected: 4,
            got: payload.len(),
        });
    }
    Ok(BigEndian::read_u32(payload))
}

pub fn encode_keyframe(value: i16) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn decode_keyframe(payload: &[u8]) -> Result<i16, PayloadError> {
    if payload.len() != 2 {
        return Err(PayloadError::WrongLength {
            expected: 2,
            got: payload.len(),
        });
    }
    Ok(BigEndian::read_i16(payload))
}

pub fn encode_delta(delta: i8) -> Vec<u8> {
    vec![delta as u8]
}

pub fn decode_delta(payload: &[u8]) -> Result<i8, PayloadError> {
    if payload.len() != 1 {
        return Err(PayloadError::WrongLength {
            expected: 1,
            got: payload.len(),
        });
    }
    Ok(payload[0] as i8)
}

/// Empty-payload kinds (HEARTBEAT, SHUTDOWN) still get a length check.
pub fn decode_empty(payload: &[u8]) -> Result<(), PayloadError> {
    if payload.is_empty() {
        Ok(())
    } else {
        Err(PayloadError::WrongLength {
            expected: 0,
            got: payload.len(),
        })
    }
}

pub fn encode_batch(cfg: &Config, entries: &[BatchEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(entries.len() * 5);
    for entry in entries {
        buf.extend_from_slice(&entry.offset.to_be_bytes());
        buf.push(cfg.kind_code(entry.sample.kind()));
        match entry.sample {
            BatchSample::Keyframe(value) => buf.extend_from_slice(&value.to_be_bytes()),
            BatchSample::Delta(delta) => buf.push(delta as u8),
        }
    }
    buf
}

/// Streaming decoder over a BATCHED_DATA payload.
///
/// Yields entries until the payload is exhausted or an entry is
/// malformed; the error is yielded once and iteration stops, so a
/// consumer naturally processes the valid prefix and drops the rest.
pub struct BatchEntries<'a> {
    cfg: &'a Config,
    payload: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> BatchEntries<'a> {
    pub fn new(cfg: &'a Config, payload: &'a [u8]) -> Self {
        BatchEntries {
            cfg,
            payload,
            pos: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for BatchEntries<'a> {
    type Item = Result<BatchEntry, PayloadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.payload.len() {
            return None;
        }

        let at = self.pos;
        let rest = &self.payload[at..];
        if rest.len() < 3 {
            self.failed = true;
            return Some(Err(PayloadError::TruncatedBatch { at }));
        }

        let offset = BigEndian::read_u16(&rest[..2]);
        let code = rest[2];
        let sample = match self.cfg.kind_from_code(code) {
            Some(MsgKind::Keyframe) => {
                if rest.len() < 5 {
                    self.failed = true;
                    return Some(Err(PayloadError::TruncatedBatch { at }));
                }
                self.pos = at + 5;
                BatchSample::Keyframe(BigEndian::read_i16(&rest[3..5]))
            }
            Some(MsgKind::DataDelta) => {
                if rest.len() < 4 {
                    self.failed = true;
                    return Some(Err(PayloadError::TruncatedBatch { at }));
                }
                self.pos = at + 4;
                BatchSample::Delta(rest[3] as i8)
            }
            _ => {
                self.failed = true;
                return Some(Err(PayloadError::BadEntryKind { code }));
            }
        };

        Some(Ok(BatchEntry { offset, sample }))
    }
}

/// Decode a whole batch, failing on the first malformed entry.
/// Mostly for tests and tooling; the ingest path iterates instead.
pub fn decode_batch(cfg: &Config, payload: &[u8]) -> Result<Vec<BatchEntry>, PayloadError> {
    BatchEntries::new(cfg, payload).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Config {
        Config::default()
    }

    fn mac() -> MacAddr {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    #[test]
    fn startup_without_batch() {
        let startup = Startup {
            mac: mac(),
            batch_size: None,
        };
        let wire = encode_startup(&startup);
        assert_eq!(wire.len(), 6);
        assert_eq!(decode_startup(&wire).unwrap(), startup);
    }

    #[test]
    fn startup_with_batch_size() {
        let startup = Startup {
            mac: mac(),
            batch_size: Some(8),
        };
        let wire = encode_startup(&startup);
        assert_eq!(wire.len(), 7);
        assert_eq!(decode_startup(&wire).unwrap(), startup);
    }

    #[test]
    fn startup_bad_lengths() {
        assert!(matches!(
            decode_startup(&[0; 5]),
            Err(PayloadError::BadStartup { got: 5 })
        ));
        assert!(matches!(
            decode_startup(&[0; 8]),
            Err(PayloadError::BadStartup { got: 8 })
        ));
    }

    #[test]
    fn ack_two_and_four_byte_forms() {
        let assigned = StartupAck::Assigned { device_id: 42 };
        assert_eq!(
            decode_startup_ack(&encode_startup_ack(&assigned)).unwrap(),
            assigned
        );

        let resumed = StartupAck::Resumed {
            device_id: 42,
            resume_seq: 1001,
        };
        let wire = encode_startup_ack(&resumed);
        assert_eq!(wire.len(), 4);
        assert_eq!(decode_startup_ack(&wire).unwrap(), resumed);

        assert!(decode_startup_ack(&[0; 3]).is_err());
    }

    #[test]
    fn scalar_payloads() {
        assert_eq!(decode_time_sync(&encode_time_sync(1_700_000_000)).unwrap(), 1_700_000_000);
        assert_eq!(decode_keyframe(&encode_keyframe(-512)).unwrap(), -512);
        assert_eq!(decode_delta(&encode_delta(-100)).unwrap(), -100);
        assert!(decode_time_sync(&[0; 3]).is_err());
        assert!(decode_keyframe(&[0; 1]).is_err());
        assert!(decode_delta(&[0; 2]).is_err());
        assert!(decode_empty(&[]).is_ok());
        assert!(decode_empty(&[1]).is_err());
    }

    #[test]
    fn batch_round_trip_mixed_entries() {
        let cfg = cfg();
        let entries = vec![
            BatchEntry {
                offset: 0,
                sample: BatchSample::Keyframe(500),
            },
            BatchEntry {
                offset: 1,
                sample: BatchSample::Delta(3),
            },
            BatchEntry {
                offset: 2,
                sample: BatchSample::Delta(-2),
            },
        ];
        let wire = encode_batch(&cfg, &entries);
        assert_eq!(wire.len(), 5 + 4 + 4);
        assert_eq!(decode_batch(&cfg, &wire).unwrap(), entries);
    }

    #[test]
    fn batch_truncated_entry_keeps_prefix() {
        let cfg = cfg();
        let entries = vec![
            BatchEntry {
                offset: 0,
                sample: BatchSample::Delta(1),
            },
            BatchEntry {
                offset: 1,
                sample: BatchSample::Keyframe(7),
            },
        ];
        let mut wire = encode_batch(&cfg, &entries);
        wire.truncate(wire.len() - 1); // clip the keyframe's value short

        let mut iter = BatchEntries::new(&cfg, &wire);
        assert_eq!(iter.next(), Some(Ok(entries[0])));
        assert_eq!(iter.next(), Some(Err(PayloadError::TruncatedBatch { at: 4 })));
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn batch_rejects_non_sample_kind() {
        let cfg = cfg();
        // offset 0, then a HEARTBEAT code where a sample kind belongs
        let wire = [0u8, 0, cfg.kind_code(MsgKind::Heartbeat), 0, 0];
        let err = decode_batch(&cfg, &wire).unwrap_err();
        assert_eq!(
            err,
            PayloadError::BadEntryKind {
                code: cfg.kind_code(MsgKind::Heartbeat)
            }
        );
    }
}
