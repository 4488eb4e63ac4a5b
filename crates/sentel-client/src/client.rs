// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sentel.dev

//! Registration handshake and the timer loop.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use thiserror::Error;

use sentel::protocol::messages::{
    self, encode_batch, encode_delta, encode_keyframe, encode_startup, encode_time_sync,
    Startup, StartupAck,
};
use sentel::protocol::{decode_datagram, encode_datagram, MsgKind};
use sentel::{Config, FrameError, MacAddr, PayloadError, TelemetrySocket};

use crate::generator::{Emission, Generator, Tick};

/// STARTUP attempts before giving up.
pub const REGISTRATION_ATTEMPTS: u32 = 3;

/// Receive timeout while waiting for a STARTUP_ACK.
pub const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot resolve {host}:{port}")]
    Resolve { host: String, port: u16 },

    #[error("no STARTUP_ACK after {REGISTRATION_ATTEMPTS} attempts")]
    RegistrationTimedOut,

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("expected STARTUP_ACK, got {0}")]
    UnexpectedReply(MsgKind),
}

/// Where the client is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Boot,
    Registering,
    Synced,
    Running,
    ShuttingDown,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
    pub interval: Duration,
    pub duration: Duration,
    pub mac: MacAddr,
    pub seed: Option<u64>,
    /// 1 disables batching.
    pub batch_size: u8,
    pub delta_thresh: i32,
}

pub struct Client {
    cfg: Config,
    opts: ClientOptions,
    socket: TelemetrySocket,
    server: SocketAddr,
    generator: Generator,
    state: ClientState,
    device_id: u16,
    seq: u16,
    base_time: u32,
    last_sent: Option<Instant>,
    running: Arc<AtomicBool>,
}

impl Client {
    pub fn new(
        cfg: Config,
        opts: ClientOptions,
        running: Arc<AtomicBool>,
    ) -> Result<Self, ClientError> {
        let server = (opts.host.as_str(), opts.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ClientError::Resolve {
                host: opts.host.clone(),
                port: opts.port,
            })?;

        let bind: SocketAddr = if server.is_ipv4() {
            "0.0.0.0:0".parse().map_err(|_| ClientError::Resolve {
                host: opts.host.clone(),
                port: opts.port,
            })?
        } else {
            "[::]:0".parse().map_err(|_| ClientError::Resolve {
                host: opts.host.clone(),
                port: opts.port,
            })?
        };
        let socket = TelemetrySocket::bind(
            bind,
            cfg.max_packet_size,
            Some(REGISTRATION_TIMEOUT),
        )?;

        let generator = Generator::new(opts.seed, opts.delta_thresh, opts.batch_size);
        if let Some(seed) = opts.seed {
            info!("using random seed {seed}");
        }

        Ok(Client {
            cfg,
            opts,
            socket,
            server,
            generator,
            state: ClientState::Boot,
            device_id: 0,
            seq: 0,
            base_time: 0,
            last_sent: None,
            running,
        })
    }

    #[cfg(test)]
    pub fn device_id(&self) -> u16 {
        self.device_id
    }

    fn enter(&mut self, state: ClientState) {
        debug!("state {:?} -> {state:?}", self.state);
        self.state = state;
    }

    /// Register, stream until the duration elapses or an interrupt
    /// lands, then sign off gracefully.
    pub fn run(&mut self) -> Result<(), ClientError> {
        self.enter(ClientState::Registering);
        self.register()?;

        self.enter(ClientState::Synced);
        for emission in self.generator.start() {
            self.send(emission)?;
        }

        self.enter(ClientState::Running);
        info!(
            "client running for {:.1}s at {:.2}s intervals",
            self.opts.duration.as_secs_f64(),
            self.opts.interval.as_secs_f64()
        );

        let started = Instant::now();
        let mut next_tick = started + self.opts.interval;
        while self.running.load(Ordering::Relaxed) && started.elapsed() < self.opts.duration {
            let now = Instant::now();
            if next_tick > now {
                spin_sleep::sleep(next_tick - now);
            }
            next_tick += self.opts.interval;

            let tick = Tick {
                seq: self.seq,
                since_last_send: self
                    .last_sent
                    .map_or(Duration::ZERO, |sent| sent.elapsed()),
                interval: self.opts.interval,
                offset: self.offset_now(),
            };
            for emission in self.generator.tick(&tick) {
                self.send(emission)?;
            }
        }

        self.enter(ClientState::ShuttingDown);
        if let Some(batch) = self.generator.flush() {
            self.send(batch)?;
        }
        info!("sending SHUTDOWN");
        self.send_framed(MsgKind::Shutdown, &[])?;

        self.enter(ClientState::Closed);
        info!("client shut down");
        Ok(())
    }

    /// STARTUP / STARTUP_ACK with bounded retries. A 2-byte ACK starts
    /// the sequence counter at 0; a 4-byte ACK resumes it at exactly
    /// the server-supplied value.
    fn register(&mut self) -> Result<(), ClientError> {
        let startup = Startup {
            mac: self.opts.mac,
            batch_size: (self.opts.batch_size > 1).then_some(self.opts.batch_size),
        };
        let payload = encode_startup(&startup);
        if self.generator.batching() {
            info!(
                "batching enabled: {} samples per datagram",
                self.opts.batch_size
            );
        }

        let mut buf = vec![0u8; self.cfg.max_packet_size];
        for attempt in 1..=REGISTRATION_ATTEMPTS {
            info!(
                "sending STARTUP to {} (attempt {attempt}/{REGISTRATION_ATTEMPTS})",
                self.server
            );
            let datagram =
                encode_datagram(&self.cfg, MsgKind::Startup, 0, 0, 0, &payload)?;
            self.socket.send_to(&datagram, self.server)?;

            let Some((len, from)) = self.socket.recv(&mut buf)? else {
                warn!("no reply from server, retrying STARTUP");
                continue;
            };
            if from != self.server {
                debug!("ignoring datagram from unexpected peer {from}");
                continue;
            }

            let (header, ack_payload) = decode_datagram(&self.cfg, &buf[..len])?;
            if header.kind != MsgKind::StartupAck {
                return Err(ClientError::UnexpectedReply(header.kind));
            }
            match messages::decode_startup_ack(ack_payload)? {
                StartupAck::Assigned { device_id } => {
                    self.device_id = device_id;
                    self.seq = 0;
                    info!("registered, assigned device id {device_id}");
                }
                StartupAck::Resumed {
                    device_id,
                    resume_seq,
                } => {
                    self.device_id = device_id;
                    self.seq = resume_seq;
                    info!("re-registered as device {device_id}, resuming at seq {resume_seq}");
                }
            }
            return Ok(());
        }

        Err(ClientError::RegistrationTimedOut)
    }

    fn send(&mut self, emission: Emission) -> Result<(), ClientError> {
        match emission {
            Emission::TimeSync => {
                let now = epoch_now();
                self.base_time = now;
                debug!("sending TIME_SYNC");
                self.send_framed(MsgKind::TimeSync, &encode_time_sync(now))
            }
            Emission::Keyframe(value) => {
                info!("sending KEYFRAME -> {value}");
                self.send_framed(MsgKind::Keyframe, &encode_keyframe(value))
            }
            Emission::Delta(delta) => {
                debug!(
                    "sending DATA_DELTA -> {delta:+} (new value {})",
                    self.generator.value()
                );
                self.send_framed(MsgKind::DataDelta, &encode_delta(delta))
            }
            Emission::Heartbeat => {
                debug!("sending HEARTBEAT");
                self.send_framed(MsgKind::Heartbeat, &[])
            }
            Emission::Batch(entries) => {
                info!("sending BATCH of {} samples", entries.len());
                let payload = encode_batch(&self.cfg, &entries);
                self.send_framed(MsgKind::BatchedData, &payload)
            }
        }
    }

    fn send_framed(&mut self, kind: MsgKind, payload: &[u8]) -> Result<(), ClientError> {
        let datagram = encode_datagram(
            &self.cfg,
            kind,
            self.device_id,
            self.seq,
            self.offset_now(),
            payload,
        )?;
        self.socket.send_to(&datagram, self.server)?;
        self.last_sent = Some(Instant::now());
        self.seq = self.seq.wrapping_add(1);
        Ok(())
    }

    /// Seconds since the device's base time, modulo 2^16; 0 before the
    /// first sync.
    fn offset_now(&self) -> u16 {
        if self.base_time == 0 {
            return 0;
        }
        let now = epoch_now();
        (now.wrapping_sub(self.base_time) % 65536) as u16
    }
}

fn epoch_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn options(port: u16, batch_size: u8) -> ClientOptions {
        ClientOptions {
            host: "127.0.0.1".to_string(),
            port,
            interval: Duration::from_millis(10),
            duration: Duration::from_millis(50),
            mac: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            seed: Some(42),
            batch_size,
            delta_thresh: 5,
        }
    }

    /// One-shot peer that answers the first STARTUP with a canned ACK.
    fn spawn_acking_server(cfg: Config, ack: StartupAck) -> (SocketAddr, thread::JoinHandle<Vec<u8>>) {
        let socket = TelemetrySocket::bind(
            "127.0.0.1:0".parse().unwrap(),
            cfg.max_packet_size,
            Some(Duration::from_secs(5)),
        )
        .unwrap();
        let addr = socket.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let mut buf = vec![0u8; cfg.max_packet_size];
            let (len, origin) = socket.recv(&mut buf).unwrap().expect("startup expected");
            let request = buf[..len].to_vec();

            let payload = messages::encode_startup_ack(&ack);
            let reply = encode_datagram(
                &cfg,
                MsgKind::StartupAck,
                ack.device_id(),
                0,
                0,
                &payload,
            )
            .unwrap();
            socket.send_to(&reply, origin).unwrap();
            request
        });

        (addr, handle)
    }

    #[test]
    fn fresh_registration_starts_seq_at_zero() {
        let cfg = Config::default();
        let (addr, server) =
            spawn_acking_server(cfg.clone(), StartupAck::Assigned { device_id: 3 });

        let running = Arc::new(AtomicBool::new(true));
        let mut client = Client::new(cfg.clone(), options(addr.port(), 1), running).unwrap();
        client.register().unwrap();

        assert_eq!(client.device_id(), 3);
        assert_eq!(client.seq, 0);

        // the STARTUP on the wire carried device id 0 and the MAC
        let request = server.join().unwrap();
        let (header, payload) = decode_datagram(&cfg, &request).unwrap();
        assert_eq!(header.kind, MsgKind::Startup);
        assert_eq!(header.device_id, 0);
        let startup = messages::decode_startup(payload).unwrap();
        assert_eq!(startup.mac.to_string(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(startup.batch_size, None);
    }

    #[test]
    fn resumed_registration_adopts_the_server_seq_verbatim() {
        let cfg = Config::default();
        let (addr, server) = spawn_acking_server(
            cfg.clone(),
            StartupAck::Resumed {
                device_id: 3,
                resume_seq: 101,
            },
        );

        let running = Arc::new(AtomicBool::new(true));
        let mut client = Client::new(cfg, options(addr.port(), 1), running).unwrap();
        client.register().unwrap();
        server.join().unwrap();

        assert_eq!(client.device_id(), 3);
        assert_eq!(client.seq, 101, "resume seq is used as-is, no extra bump");
    }

    #[test]
    fn batching_startup_carries_the_batch_size() {
        let cfg = Config::default();
        let (addr, server) =
            spawn_acking_server(cfg.clone(), StartupAck::Assigned { device_id: 1 });

        let running = Arc::new(AtomicBool::new(true));
        let mut client = Client::new(cfg.clone(), options(addr.port(), 6), running).unwrap();
        client.register().unwrap();

        let request = server.join().unwrap();
        let (_, payload) = decode_datagram(&cfg, &request).unwrap();
        let startup = messages::decode_startup(payload).unwrap();
        assert_eq!(startup.batch_size, Some(6));
    }

    #[test]
    fn silent_server_times_out_registration() {
        let cfg = Config::default();
        // bind a peer that never answers
        let peer = TelemetrySocket::bind(
            "127.0.0.1:0".parse().unwrap(),
            cfg.max_packet_size,
            None,
        )
        .unwrap();
        let addr = peer.local_addr().unwrap();

        let mut opts = options(addr.port(), 1);
        opts.interval = Duration::from_millis(1);

        let running = Arc::new(AtomicBool::new(true));
        let mut client = Client::new(cfg, opts, running).unwrap();
        // shrink the wait so the three attempts fail fast
        client
            .socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();

        let err = client.register().unwrap_err();
        assert!(matches!(err, ClientError::RegistrationTimedOut));
    }
}
