// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sentel.dev

//! The per-datagram ingest pipeline.
//!
//! One entry point, [`Ingest::on_datagram`]: decode the framing,
//! route STARTUPs to the registry, classify everything else on the
//! device's sequence space, journal exactly one row per classified
//! message (batch entries count individually), and fold accepted
//! samples into the device's reconstructed value.
//!
//! The pipeline never sends on a socket itself; registration replies
//! come back to the caller as an [`Ack`] so the loop stays the single
//! owner of the socket.

use std::net::SocketAddr;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use sentel::protocol::messages::{
    self, BatchEntries, BatchSample, StartupAck,
};
use sentel::protocol::{decode_datagram, encode_datagram, MsgKind, PayloadError};
use sentel::{Config, SeqClass};

use crate::journal::{CsvJournal, JournalRow};
use crate::registry::{DeviceRegistry, DeviceStatus, RegisterOutcome};

/// A registration reply for the socket loop to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub to: SocketAddr,
    pub datagram: Vec<u8>,
}

/// Parsed payload of a non-STARTUP message.
#[derive(Debug, Clone, Copy)]
enum Body {
    TimeSync(u32),
    Keyframe(i16),
    Delta(i8),
    Heartbeat,
    Shutdown,
    /// Recognized code with no server-side meaning (e.g. an ACK
    /// echoed back); journaled, then dropped.
    Unhandled,
}

pub struct Ingest {
    cfg: Config,
    registry: DeviceRegistry,
    journal: CsvJournal,
}

impl Ingest {
    pub fn new(cfg: Config, journal: CsvJournal) -> Self {
        Ingest {
            cfg,
            registry: DeviceRegistry::new(),
            journal,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.registry
    }

    pub fn journal(&self) -> &CsvJournal {
        &self.journal
    }

    /// Process one received datagram end to end.
    pub fn on_datagram(
        &mut self,
        datagram: &[u8],
        origin: SocketAddr,
        arrival_wall: SystemTime,
        arrival: Instant,
    ) -> Option<Ack> {
        let started = Instant::now();

        let (header, payload) = match decode_datagram(&self.cfg, datagram) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!("dropping datagram from {origin}: {err}");
                return None;
            }
        };

        if header.kind == MsgKind::Startup {
            return self.handle_startup(payload, origin);
        }

        if !self.registry.contains(header.device_id) {
            warn!(
                "packet from unknown device {} at {origin}, discarding",
                header.device_id
            );
            return self.registration_hint(origin);
        }

        if header.kind == MsgKind::BatchedData {
            self.ingest_batch(&header, payload, datagram.len(), arrival_wall, arrival, started);
        } else {
            let body = parse_body(header.kind, payload);
            self.process(
                header.device_id,
                header.kind,
                header.seq,
                header.timestamp_offset,
                body,
                datagram.len(),
                0,
                arrival_wall,
                arrival,
                started,
            );
        }
        None
    }

    /// Unpack a batch and run each entry through the pipeline as a
    /// pseudo-packet of its entry kind, sharing the datagram's seq. A
    /// malformed entry aborts the remainder; the prefix stands.
    fn ingest_batch(
        &mut self,
        header: &sentel::Header,
        payload: &[u8],
        packet_size: usize,
        arrival_wall: SystemTime,
        arrival: Instant,
        started: Instant,
    ) {
        let entries: Vec<Result<messages::BatchEntry, PayloadError>> =
            BatchEntries::new(&self.cfg, payload).collect();

        let mut batch_index = 0u16;
        for entry in entries {
            match entry {
                Ok(entry) => {
                    let body = match entry.sample {
                        BatchSample::Keyframe(value) => Body::Keyframe(value),
                        BatchSample::Delta(delta) => Body::Delta(delta),
                    };
                    self.process(
                        header.device_id,
                        entry.sample.kind(),
                        header.seq,
                        entry.offset,
                        Ok(body),
                        packet_size,
                        batch_index,
                        arrival_wall,
                        arrival,
                        started,
                    );
                    batch_index += 1;
                }
                Err(err) => {
                    warn!(
                        "batch from device {} seq {}: {err}; dropping the remainder",
                        header.device_id, header.seq
                    );
                    break;
                }
            }
        }
    }

    /// Classify, journal, and apply one message (or batch entry).
    #[allow(clippy::too_many_arguments)]
    fn process(
        &mut self,
        device_id: u16,
        kind: MsgKind,
        seq: u16,
        time_offset: u16,
        body: Result<Body, PayloadError>,
        packet_size: usize,
        batch_index: u16,
        arrival_wall: SystemTime,
        arrival: Instant,
        started: Instant,
    ) {
        let Some(record) = self.registry.get_mut(device_id) else {
            return;
        };

        let class = record.tracker.classify(seq, record.batch_limit());
        match class {
            SeqClass::FillMissing { count } => warn!(
                "packet loss for device {device_id}: {count} missing before seq {seq}"
            ),
            SeqClass::DelayedRecovery => {
                info!("recovered delayed seq {seq} from device {device_id}")
            }
            SeqClass::Duplicate => {
                warn!("duplicate seq {seq} from device {device_id}, suppressing")
            }
            SeqClass::OutOfWindow => {
                warn!("out-of-window seq {seq} from device {device_id}, suppressing")
            }
            SeqClass::First | SeqClass::AcceptNew => {}
        }

        let duplicate = class.is_duplicate();
        let delayed = class.is_delayed();
        let gap = class.is_gap();

        // Device clock before this message touches the base time.
        let row_timestamp = i64::from(record.base_time) + i64::from(time_offset);

        if !duplicate {
            let prior = record.last_activity;
            record.last_seen = arrival_wall;
            record.last_activity = Some(arrival);
            record.timeout_reported = false;
            record.last_gap = gap;
            if record.status != DeviceStatus::Down {
                record.status = DeviceStatus::Active;
            }

            if !delayed {
                record.record_interval(prior, arrival);
                record.packet_count += 1;
            }

            match body {
                Ok(Body::Keyframe(value)) => {
                    record.value = i32::from(value);
                }
                Ok(Body::Delta(delta)) => {
                    record.value += i32::from(delta);
                }
                // A recovered late copy still carries a valid sample,
                // but its control content is stale by definition.
                Ok(Body::TimeSync(epoch)) if !delayed => {
                    record.base_time = epoch;
                    info!("device {device_id} set base time to {epoch}");
                }
                Ok(Body::Heartbeat) if !delayed => {
                    debug!("heartbeat from device {device_id}");
                }
                Ok(Body::Shutdown) if !delayed => {
                    record.status = DeviceStatus::Down;
                    info!("device {device_id} signed off");
                }
                Ok(Body::TimeSync(_)) | Ok(Body::Heartbeat) | Ok(Body::Shutdown) => {}
                Ok(Body::Unhandled) => {
                    warn!("unhandled {kind} message from device {device_id}, discarding");
                }
                Err(err) => {
                    warn!("bad {kind} payload from device {device_id}: {err}");
                }
            }
        }

        let row = JournalRow {
            msg_type: self.cfg.kind_code(kind),
            device_id,
            seq,
            timestamp: row_timestamp,
            arrival_time: epoch_secs(arrival_wall),
            value: self
                .registry
                .get(device_id)
                .map_or(0, |record| record.value),
            duplicate,
            gap,
            delayed,
            cpu_time_ms: started.elapsed().as_secs_f64() * 1_000.0,
            packet_size,
            batch_index,
        };
        if let Err(err) = self.journal.append(&row) {
            tracing::error!("journal write failed: {err}");
        }
    }

    fn handle_startup(&mut self, payload: &[u8], origin: SocketAddr) -> Option<Ack> {
        let startup = match messages::decode_startup(payload) {
            Ok(startup) => startup,
            Err(err) => {
                warn!("bad STARTUP from {origin}: {err}");
                return None;
            }
        };
        info!("STARTUP from {origin}, mac {}", startup.mac);

        match self
            .registry
            .register(origin, startup.mac, startup.batch_size)
        {
            RegisterOutcome::Assigned { device_id } => {
                info!("assigned device {device_id} to {origin} (mac {})", startup.mac);
                self.make_ack(origin, device_id, StartupAck::Assigned { device_id })
            }
            RegisterOutcome::Resumed {
                device_id,
                resume_seq,
            } => {
                info!("resumed device {device_id} at {origin}, next seq {resume_seq}");
                self.make_ack(
                    origin,
                    device_id,
                    StartupAck::Resumed {
                        device_id,
                        resume_seq,
                    },
                )
            }
            RegisterOutcome::Rejected { reason } => {
                warn!("rejected STARTUP from {origin}: {reason}");
                None
            }
        }
    }

    /// Zero-id ACK nudging an unregistered sender back to STARTUP.
    fn registration_hint(&self, origin: SocketAddr) -> Option<Ack> {
        debug!("sending re-registration hint to {origin}");
        self.make_ack(origin, 0, StartupAck::Assigned { device_id: 0 })
    }

    fn make_ack(&self, to: SocketAddr, header_device_id: u16, ack: StartupAck) -> Option<Ack> {
        let payload = messages::encode_startup_ack(&ack);
        match encode_datagram(
            &self.cfg,
            MsgKind::StartupAck,
            header_device_id,
            0,
            0,
            &payload,
        ) {
            Ok(datagram) => Some(Ack { to, datagram }),
            Err(err) => {
                tracing::error!("could not frame STARTUP_ACK: {err}");
                None
            }
        }
    }
}

fn parse_body(kind: MsgKind, payload: &[u8]) -> Result<Body, PayloadError> {
    match kind {
        MsgKind::TimeSync => messages::decode_time_sync(payload).map(Body::TimeSync),
        MsgKind::Keyframe => messages::decode_keyframe(payload).map(Body::Keyframe),
        MsgKind::DataDelta => messages::decode_delta(payload).map(Body::Delta),
        MsgKind::Heartbeat => messages::decode_empty(payload).map(|()| Body::Heartbeat),
        MsgKind::Shutdown => messages::decode_empty(payload).map(|()| Body::Shutdown),
        MsgKind::Startup | MsgKind::StartupAck | MsgKind::BatchedData => Ok(Body::Unhandled),
    }
}

fn epoch_secs(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(_) => 0,
    }
}
