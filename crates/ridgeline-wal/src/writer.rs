//! WAL writer for appending log records.

use crate::record::{LogRecord, Lsn};
use crate::segment::{LogSegment, SegmentHeader, SegmentId};
use parking_lot::Mutex;
use ridgeline_common::{Result, RidgelineError};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration for the WAL writer.
#[derive(Debug, Clone)]
pub struct WalWriterConfig {
    /// Directory for WAL segment files.
    pub wal_dir: PathBuf,
    /// Maximum size of each segment file.
    pub segment_size: u32,
    /// Enable fsync on flush.
    pub fsync_enabled: bool,
}

impl Default for WalWriterConfig {
    fn default() -> Self {
        Self {
            wal_dir: PathBuf::from("./data/wal"),
            segment_size: LogSegment::DEFAULT_SIZE,
            fsync_enabled: true,
        }
    }
}

/// Thread-safe, blocking WAL writer.
///
/// Handles appending log records, segment rotation, and fsync.
pub struct WalWriter {
    /// Configuration.
    config: WalWriterConfig,
    /// Current active segment.
    current_segment: Mutex<LogSegment>,
}

impl WalWriter {
    /// Creates a new WAL writer, resuming the latest segment if one exists.
    pub fn new(config: WalWriterConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.wal_dir)?;

        let current_segment = Self::recover_or_create(&config)?;

        Ok(Self {
            config,
            current_segment: Mutex::new(current_segment),
        })
    }

    /// Recovers the latest existing segment or creates the first one.
    fn recover_or_create(config: &WalWriterConfig) -> Result<LogSegment> {
        let mut segments: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(&config.wal_dir)? {
            let path = entry?.path();
            if path.extension().map(|ext| ext == "wal").unwrap_or(false) {
                segments.push(path);
            }
        }

        if segments.is_empty() {
            let segment_id = SegmentId::FIRST;
            let first_lsn = Lsn::new(segment_id.0, SegmentHeader::SIZE as u32);
            return LogSegment::create(&config.wal_dir, segment_id, first_lsn, config.segment_size);
        }

        segments.sort();
        let latest = segments.last().ok_or_else(|| {
            RidgelineError::WalWriteFailed("WAL segment list unexpectedly empty".to_string())
        })?;

        let segment = LogSegment::open(latest)?;
        debug!(segment = %segment.segment_id(), offset = segment.write_offset(), "resumed WAL segment");
        Ok(segment)
    }

    /// Returns the directory containing WAL segments.
    pub fn wal_dir(&self) -> &Path {
        &self.config.wal_dir
    }

    /// Appends a log record, rotating segments when the current one is full.
    ///
    /// Returns the LSN assigned to the record.
    pub fn append(&self, mut record: LogRecord) -> Result<Lsn> {
        let mut segment = self.current_segment.lock();

        // Assign the record its own position before serializing.
        let mut lsn = Lsn::new(segment.segment_id().0, segment.write_offset());
        record.lsn = lsn;
        let mut data = record.serialize();

        if !segment.has_space(data.len()) {
            let next_id = segment.segment_id().next();
            segment.sync()?;

            let first_lsn = Lsn::new(next_id.0, SegmentHeader::SIZE as u32);
            *segment = LogSegment::create(
                &self.config.wal_dir,
                next_id,
                first_lsn,
                self.config.segment_size,
            )?;
            debug!(segment = %next_id, "rotated WAL segment");

            lsn = first_lsn;
            record.lsn = lsn;
            data = record.serialize();
        }

        segment.append_raw(&data)?;
        Ok(lsn)
    }

    /// Flushes buffered data, fsyncing when enabled.
    pub fn flush(&self) -> Result<()> {
        if self.config.fsync_enabled {
            self.current_segment.lock().sync()?;
        }
        Ok(())
    }
}
