//! WAL reading for inspection and recovery.

use crate::record::{ComponentOperation, LogRecord, LogRecordType};
use crate::segment::LogSegment;
use ridgeline_common::Result;
use std::path::{Path, PathBuf};

/// Reads log records back out of a WAL directory.
///
/// Segments are visited in id order; records within a segment are parsed
/// sequentially from the raw segment payload.
pub struct WalReader {
    wal_dir: PathBuf,
}

impl WalReader {
    /// Creates a reader over the given WAL directory.
    pub fn new(wal_dir: impl Into<PathBuf>) -> Self {
        Self {
            wal_dir: wal_dir.into(),
        }
    }

    /// Returns the directory being read.
    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }

    /// Reads every record from every segment, in log order.
    pub fn read_records(&self) -> Result<Vec<LogRecord>> {
        let mut segment_paths: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(&self.wal_dir)? {
            let path = entry?.path();
            if path.extension().map(|ext| ext == "wal").unwrap_or(false) {
                segment_paths.push(path);
            }
        }
        segment_paths.sort();

        let mut records = Vec::new();
        for path in segment_paths {
            let mut segment = LogSegment::open(&path)?;
            let data = segment.read_all_data()?;

            let mut pos = 0;
            while pos + LogRecord::HEADER_SIZE + LogRecord::CHECKSUM_SIZE <= data.len() {
                let payload_len =
                    u16::from_le_bytes([data[pos + 22], data[pos + 23]]) as usize;
                let total = LogRecord::HEADER_SIZE + payload_len + LogRecord::CHECKSUM_SIZE;
                if pos + total > data.len() {
                    break;
                }
                records.push(LogRecord::deserialize(&data[pos..pos + total])?);
                pos += total;
            }
        }

        Ok(records)
    }

    /// Reads the component operations of every committed atomic operation.
    ///
    /// Operations whose commit record is missing (crash mid-operation or an
    /// explicit rollback) are dropped.
    pub fn read_committed_operations(&self) -> Result<Vec<ComponentOperation>> {
        let records = self.read_records()?;

        let committed: std::collections::HashSet<u32> = records
            .iter()
            .filter(|r| r.record_type == LogRecordType::Commit)
            .map(|r| r.op_id)
            .collect();

        let mut operations = Vec::new();
        for record in &records {
            match record.record_type {
                LogRecordType::IndexPut | LogRecordType::IndexRemove
                    if committed.contains(&record.op_id) =>
                {
                    operations.push(ComponentOperation::deserialize(
                        record.record_type,
                        &record.payload,
                    )?);
                }
                _ => {}
            }
        }

        Ok(operations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Lsn, PutOperation};
    use crate::writer::{WalWriter, WalWriterConfig};
    use ridgeline_common::RecordId;

    fn test_writer(dir: &Path) -> WalWriter {
        WalWriter::new(WalWriterConfig {
            wal_dir: dir.to_path_buf(),
            segment_size: LogSegment::DEFAULT_SIZE,
            fsync_enabled: false,
        })
        .unwrap()
    }

    fn put_operation(index_id: i32, position: i64) -> ComponentOperation {
        ComponentOperation::Put(PutOperation {
            index_id,
            serializer_id: 1,
            encryption_name: None,
            key: Some(vec![1, 2, 3]),
            rid: RecordId::new(1, position),
        })
    }

    #[test]
    fn test_reader_round_trips_records() {
        let dir = tempfile::tempdir().unwrap();
        let writer = test_writer(dir.path());

        writer.append(LogRecord::begin(1)).unwrap();
        let op = put_operation(9, 77);
        writer.append(LogRecord::component(1, Lsn::INVALID, &op)).unwrap();
        writer.append(LogRecord::commit(Lsn::INVALID, 1)).unwrap();
        writer.flush().unwrap();

        let records = WalReader::new(dir.path()).read_records().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].record_type, LogRecordType::Begin);
        assert_eq!(records[1].record_type, LogRecordType::IndexPut);
        assert_eq!(records[2].record_type, LogRecordType::Commit);
    }

    #[test]
    fn test_reader_filters_uncommitted_operations() {
        let dir = tempfile::tempdir().unwrap();
        let writer = test_writer(dir.path());

        // Committed operation.
        writer.append(LogRecord::begin(1)).unwrap();
        writer
            .append(LogRecord::component(1, Lsn::INVALID, &put_operation(9, 1)))
            .unwrap();
        writer.append(LogRecord::commit(Lsn::INVALID, 1)).unwrap();

        // Operation without commit.
        writer.append(LogRecord::begin(2)).unwrap();
        writer
            .append(LogRecord::component(2, Lsn::INVALID, &put_operation(9, 2)))
            .unwrap();
        writer.flush().unwrap();

        let operations = WalReader::new(dir.path())
            .read_committed_operations()
            .unwrap();
        assert_eq!(operations.len(), 1);
        assert_eq!(operations[0], put_operation(9, 1));
    }

    #[test]
    fn test_reader_spans_rotated_segments() {
        let dir = tempfile::tempdir().unwrap();
        let writer = WalWriter::new(WalWriterConfig {
            wal_dir: dir.path().to_path_buf(),
            segment_size: 256,
            fsync_enabled: false,
        })
        .unwrap();

        for i in 0..16 {
            writer.append(LogRecord::begin(i)).unwrap();
        }
        writer.flush().unwrap();

        let records = WalReader::new(dir.path()).read_records().unwrap();
        assert_eq!(records.len(), 16);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.op_id, i as u32);
        }
    }
}
