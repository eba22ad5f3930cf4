//! # Telemetry Logger
//!
//! Writes routed telemetry as JSON Lines with file rotation.
//!
//! Each line is one record:
//!
//! ```text
//! {"timestamp":"2024-05-01T12:00:00.000Z","kind":"battery","data":{"voltage":16.8,...}}
//! ```
//!
//! A file holds at most `max_records_per_file` records; only the newest
//! `max_files_to_keep` files are retained.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::crsf::protocol::{Attitude, BatterySensor, GpsData, LinkStatistics};
use crate::error::Result;

const FILE_PREFIX: &str = "telemetry_";
const FILE_EXTENSION: &str = "jsonl";

/// One routed telemetry value
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum TelemetryRecord {
    LinkStats(LinkStatistics),
    Battery(BatterySensor),
    Gps(GpsData),
    Attitude(Attitude),
}

#[derive(Serialize)]
struct Line<'a> {
    timestamp: String,
    #[serde(flatten)]
    record: &'a TelemetryRecord,
}

/// Rotating JSONL telemetry writer
#[derive(Debug)]
pub struct TelemetryLogger {
    log_dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    writer: Option<BufWriter<File>>,
    records_in_file: usize,
    file_sequence: u32,
}

impl TelemetryLogger {
    /// Create the log directory if needed. The first file is opened lazily.
    pub fn new<P: AsRef<Path>>(
        log_dir: P,
        max_records_per_file: usize,
        max_files_to_keep: usize,
    ) -> Result<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();
        fs::create_dir_all(&log_dir)?;
        info!("Recording telemetry to {}", log_dir.display());

        Ok(Self {
            log_dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            writer: None,
            records_in_file: 0,
            file_sequence: 0,
        })
    }

    /// Append a record stamped with the current time
    pub fn log(&mut self, record: TelemetryRecord) -> Result<()> {
        self.log_at(Utc::now(), record)
    }

    /// Append a record with an explicit timestamp
    pub fn log_at(&mut self, timestamp: DateTime<Utc>, record: TelemetryRecord) -> Result<()> {
        if self.writer.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate(timestamp)?;
        }

        let line = Line {
            timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            record: &record,
        };
        let json = serde_json::to_string(&line)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{}", json)?;
        }
        self.records_in_file += 1;
        Ok(())
    }

    /// Flush buffered records to disk
    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn rotate(&mut self, timestamp: DateTime<Utc>) -> Result<()> {
        self.flush()?;

        let name = format!(
            "{}{}_{:03}.{}",
            FILE_PREFIX,
            timestamp.format("%Y%m%d_%H%M%S"),
            self.file_sequence,
            FILE_EXTENSION
        );
        self.file_sequence = self.file_sequence.wrapping_add(1) % 1000;

        let path = self.log_dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Opened telemetry log {}", path.display());

        self.writer = Some(BufWriter::new(file));
        self.records_in_file = 0;
        self.prune()
    }

    /// Delete the oldest log files beyond the retention limit
    fn prune(&self) -> Result<()> {
        let mut files = self.log_files()?;
        if files.len() <= self.max_files_to_keep {
            return Ok(());
        }

        // Names embed the timestamp and sequence, so lexical order is age order
        files.sort();
        let excess = files.len() - self.max_files_to_keep;
        for old in files.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&old) {
                warn!("Failed to remove old telemetry log {}: {}", old.display(), e);
            }
        }
        Ok(())
    }

    /// Telemetry log files currently in the log directory
    pub fn log_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.log_dir)? {
            let path = entry?.path();
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(FILE_PREFIX) && n.ends_with(FILE_EXTENSION))
                .unwrap_or(false);
            if is_log {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl Drop for TelemetryLogger {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
