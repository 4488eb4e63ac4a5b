// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sentel.dev

//! Socket loop: receive, ingest, ACK, sweep, shut down cleanly.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::Local;
use thiserror::Error;
use tracing::{error, info, warn};

use sentel::{Config, TelemetrySocket};

use crate::ingest::Ingest;
use crate::journal::{CsvJournal, JournalError};
use crate::timeout::TimeoutObserver;

/// Receive timeout: the observer and the shutdown flag get a look at
/// least this often even on a silent socket.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause after a transient socket error before retrying.
const SOCKET_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error(transparent)]
    Journal(#[from] JournalError),
}

pub struct Server {
    socket: TelemetrySocket,
    ingest: Ingest,
    observer: TimeoutObserver,
    running: Arc<AtomicBool>,
}

impl Server {
    /// Open the journal and bind the socket. Fails before any packet
    /// is read; nothing here is recoverable.
    pub fn new(cfg: Config, running: Arc<AtomicBool>) -> Result<Self, ServerError> {
        let journal = CsvJournal::create(&cfg.csv_log_dir, Local::now())?;
        info!("journaling to {}", journal.path().display());

        let addr = SocketAddr::new(cfg.host, cfg.port);
        let socket = TelemetrySocket::bind(addr, cfg.max_packet_size, Some(RECV_TIMEOUT))
            .map_err(|source| ServerError::Bind { addr, source })?;
        info!("listening on {addr}");

        Ok(Server {
            socket,
            ingest: Ingest::new(cfg, journal),
            observer: TimeoutObserver::new(Instant::now()),
            running,
        })
    }

    /// Run until the shutdown flag clears. One datagram is fully
    /// processed (classified, journaled, state updated) before the
    /// next receive.
    pub fn run(&mut self) {
        let mut buf = vec![0u8; self.socket.max_packet_size()];
        info!("server idle, waiting for packets");

        while self.running.load(Ordering::Relaxed) {
            self.observer
                .maybe_sweep(self.ingest.registry_mut(), Instant::now());

            match self.socket.recv(&mut buf) {
                Ok(None) => continue,
                Ok(Some((len, origin))) => {
                    let arrival_wall = SystemTime::now();
                    let arrival = Instant::now();
                    if let Some(ack) =
                        self.ingest
                            .on_datagram(&buf[..len], origin, arrival_wall, arrival)
                    {
                        if let Err(err) = self.socket.send_to(&ack.datagram, ack.to) {
                            warn!("could not send ACK to {}: {err}", ack.to);
                        }
                    }
                }
                Err(err) => {
                    error!("socket receive failed: {err}");
                    std::thread::sleep(SOCKET_BACKOFF);
                }
            }
        }

        info!(
            "shutting down: {} devices, {} journal rows",
            self.ingest.registry().len(),
            self.ingest.journal().rows_written()
        );
        // journal and socket close on drop; rows are already flushed
    }
}
