// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sentel.dev

//! Sentel telemetry server
//!
//! Single-socket UDP ingest for fleets of sensor endpoints: assigns
//! device ids on STARTUP, classifies every datagram on the 16-bit
//! cyclic sequence space, reconstructs keyframe+delta values, watches
//! per-device liveness, and journals every classified message to a
//! per-session CSV.
//!
//! # Usage
//!
//! ```bash
//! # Protocol constants and the journal directory come from the config file
//! sentel-server --config sentel.json
//!
//! # More verbose logging
//! sentel-server --config sentel.json --log-level debug
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use sentel::Config;

mod ingest;
mod journal;
mod registry;
mod server;
mod timeout;

use server::Server;

/// Sentel telemetry ingest server
#[derive(Parser, Debug)]
#[command(name = "sentel-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (flat JSON key/value table)
    #[arg(short, long, default_value = "sentel.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cfg = Config::from_file(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    info!("sentel-server v{}", env!("CARGO_PKG_VERSION"));
    info!("bind: {}:{}", cfg.host, cfg.port);
    info!("protocol version: {}", cfg.protocol_version);
    info!("max packet size: {} bytes", cfg.max_packet_size);
    info!("journal dir: {}", cfg.csv_log_dir.display());

    let running = Arc::new(AtomicBool::new(true));
    let running_flag = running.clone();
    ctrlc::set_handler(move || {
        running_flag.store(false, Ordering::Relaxed);
    })
    .context("installing the interrupt handler")?;

    let mut server = Server::new(cfg, running).context("starting the server")?;
    server.run();

    info!("server offline");
    Ok(())
}
