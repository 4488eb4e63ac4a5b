// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sentel.dev

//! Sentel device simulator
//!
//! Registers with the telemetry server, then streams a seeded random
//! walk as keyframes and deltas (optionally batched) until the
//! duration elapses or ctrl-c lands, signing off with SHUTDOWN.
//!
//! # Usage
//!
//! ```bash
//! sentel-client 127.0.0.1 --mac AA:BB:CC:DD:EE:FF --interval 1.0 --duration 60 --seed 42
//!
//! # Batched: 8 samples per datagram
//! sentel-client 127.0.0.1 --mac AA:BB:CC:DD:EE:FF --batching 8
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;

use sentel::{Config, MacAddr, HEADER_LEN};

mod client;
mod generator;

use client::{Client, ClientOptions};

/// Per-entry ceiling inside a batch datagram: offset, kind, i16 value.
const BATCH_ENTRY_MAX_LEN: usize = 5;

/// Sentel device simulator
#[derive(Parser, Debug)]
#[command(name = "sentel-client")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host name or address
    host: String,

    /// Server port (defaults to the configured PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Seconds between ticks
    #[arg(long, default_value = "1.0")]
    interval: f64,

    /// Total run time in seconds
    #[arg(long, default_value = "60.0")]
    duration: f64,

    /// MAC address for registration, e.g. AA:BB:CC:DD:EE:FF
    #[arg(long)]
    mac: MacAddr,

    /// Random seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Samples per batch datagram (1 disables batching)
    #[arg(long, default_value = "1")]
    batching: u8,

    /// Change threshold gating delta emission
    #[arg(long, default_value = "5")]
    delta_thresh: i32,

    /// Configuration file (flat JSON key/value table)
    #[arg(long, default_value = "sentel.json")]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let cfg = Config::from_file(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    if args.interval <= 0.0 {
        bail!("--interval must be positive");
    }
    if args.duration <= 0.0 {
        bail!("--duration must be positive");
    }
    if args.batching == 0 {
        bail!("--batching must be at least 1");
    }
    if args.delta_thresh < 0 {
        bail!("--delta-thresh must not be negative");
    }

    // A full batch has to fit under the datagram ceiling.
    let largest_batch = HEADER_LEN + usize::from(args.batching) * BATCH_ENTRY_MAX_LEN;
    if args.batching > 1 && largest_batch > cfg.max_packet_size {
        bail!(
            "--batching {} cannot fit MAX_PACKET_SIZE {} ({largest_batch} bytes worst case)",
            args.batching,
            cfg.max_packet_size
        );
    }

    let opts = ClientOptions {
        host: args.host,
        port: args.port.unwrap_or(cfg.port),
        interval: Duration::from_secs_f64(args.interval),
        duration: Duration::from_secs_f64(args.duration),
        mac: args.mac,
        seed: args.seed,
        batch_size: args.batching,
        delta_thresh: args.delta_thresh,
    };

    let running = Arc::new(AtomicBool::new(true));
    let running_flag = running.clone();
    ctrlc::set_handler(move || {
        running_flag.store(false, Ordering::Relaxed);
    })
    .context("installing the interrupt handler")?;

    let mut client = Client::new(cfg, opts, running).context("starting the client")?;
    client.run().context("client run failed")?;
    Ok(())
}
