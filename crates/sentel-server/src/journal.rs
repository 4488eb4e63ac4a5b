// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sentel.dev

//! Per-session CSV journal.
//!
//! One file per server session, one row per classified message,
//! flushed before the next datagram is read so an abrupt exit leaves a
//! valid prefix. The column order is the analysis contract; the rows
//! are plain numerics and local timestamps, nothing needs quoting.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};
use thiserror::Error;

/// Canonical column order.
pub const COLUMNS: [&str; 12] = [
    "msg_type",
    "device_id",
    "seq",
    "timestamp",
    "arrival_time",
    "value",
    "duplicate_flag",
    "gap_flag",
    "delayed_flag",
    "cpu_time_ms",
    "packet_size",
    "batch_index",
];

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// One journal row, pre-formatting.
#[derive(Debug, Clone)]
pub struct JournalRow {
    /// Raw wire code of the message (batch entries carry their entry kind).
    pub msg_type: u8,
    pub device_id: u16,
    pub seq: u16,
    /// Device clock: base time plus the header (or entry) offset, epoch seconds.
    pub timestamp: i64,
    /// Server clock at receive, epoch seconds.
    pub arrival_time: i64,
    /// Reconstructed value after this row's message was applied.
    pub value: i32,
    pub duplicate: bool,
    pub gap: bool,
    pub delayed: bool,
    /// Processing time of the carrying datagram up to this row.
    pub cpu_time_ms: f64,
    /// Full datagram length, repeated on every row of a batch.
    pub packet_size: usize,
    /// 0 for plain messages; 0..k-1 across a batch's entries.
    pub batch_index: u16,
}

/// Append-only CSV writer for one server session.
pub struct CsvJournal {
    writer: BufWriter<File>,
    path: PathBuf,
    rows: u64,
}

impl CsvJournal {
    /// Create the session file under `dir` (created if absent), named
    /// with the session start stamp, and write the heading row.
    pub fn create(dir: &Path, started: DateTime<Local>) -> Result<Self, JournalError> {
        fs::create_dir_all(dir)?;
        let name = format!("server_log_{}.csv", started.format("%Y-%m-%d_%H-%M-%S"));
        let path = dir.join(name);

        let mut writer = BufWriter::new(File::create(&path)?);
        writeln!(writer, "{}", COLUMNS.join(","))?;
        writer.flush()?;

        Ok(CsvJournal {
            writer,
            path,
            rows: 0,
        })
    }

    /// Write and flush one row.
    pub fn append(&mut self, row: &JournalRow) -> Result<(), JournalError> {
        writeln!(
            self.writer,
            "{},{},{},{},{},{},{},{},{},{:.3},{},{}",
            row.msg_type,
            row.device_id,
            row.seq,
            format_local(row.timestamp),
            format_local(row.arrival_time),
            row.value,
            u8::from(row.duplicate),
            u8::from(row.gap),
            u8::from(row.delayed),
            row.cpu_time_ms,
            row.packet_size,
            row.batch_index,
        )?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }
}

/// Local-time rendering; out-of-range epochs fall back to the raw
/// number rather than losing the row.
pub(crate) fn format_local(epoch_secs: i64) -> String {
    Local
        .timestamp_opt(epoch_secs, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| epoch_secs.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> JournalRow {
        JournalRow {
            msg_type: 4,
            device_id: 1,
            seq: 17,
            timestamp: 1_700_000_000,
            arrival_time: 1_700_000_001,
            value: 512,
            duplicate: false,
            gap: true,
            delayed: false,
            cpu_time_ms: 0.25,
            packet_size: 11,
            batch_index: 0,
        }
    }

    #[test]
    fn session_file_carries_the_start_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let started = Local.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let journal = CsvJournal::create(dir.path(), started).unwrap();
        assert_eq!(
            journal.path().file_name().unwrap(),
            "server_log_2026-03-14_09-26-53.csv"
        );
    }

    #[test]
    fn heading_row_is_written_first() {
        let dir = tempfile::tempdir().unwrap();
        let journal = CsvJournal::create(dir.path(), Local::now()).unwrap();
        let content = fs::read_to_string(journal.path()).unwrap();
        assert_eq!(content.lines().next().unwrap(), COLUMNS.join(","));
    }

    #[test]
    fn rows_are_on_disk_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = CsvJournal::create(dir.path(), Local::now()).unwrap();

        journal.append(&sample_row()).unwrap();
        // read back without dropping the journal: the row must be durable
        let content = fs::read_to_string(journal.path()).unwrap();
        assert_eq!(content.lines().count(), 2);

        let row = content.lines().nth(1).unwrap();
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields.len(), COLUMNS.len());
        assert_eq!(fields[0], "4");
        assert_eq!(fields[1], "1");
        assert_eq!(fields[2], "17");
        assert_eq!(fields[5], "512");
        assert_eq!(fields[6], "0");
        assert_eq!(fields[7], "1");
        assert_eq!(fields[8], "0");
        assert_eq!(fields[9], "0.250");
        assert_eq!(fields[10], "11");
        assert_eq!(fields[11], "0");
        assert_eq!(journal.rows_written(), 1);
    }

    #[test]
    fn timestamps_render_in_local_form() {
        let rendered = format_local(1_700_000_000);
        // YYYY-MM-DD HH:MM:SS
        assert_eq!(rendered.len(), 19);
        assert_eq!(&rendered[4..5], "-");
        assert_eq!(&rendered[10..11], " ");
    }
}
