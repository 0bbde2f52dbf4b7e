//! WAL segment management.

use crate::record::Lsn;
use bytes::Bytes;
use ridgeline_common::{Result, RidgelineError};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Unique identifier for a WAL segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub u32);

impl SegmentId {
    /// First segment ID.
    pub const FIRST: SegmentId = SegmentId(1);

    /// Returns the next segment ID.
    pub fn next(&self) -> Self {
        SegmentId(self.0 + 1)
    }

    /// Generates the filename for this segment.
    pub fn filename(&self) -> String {
        format!("{:016}.wal", self.0)
    }
}

impl std::fmt::Display for SegmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08}", self.0)
    }
}

/// Header at the beginning of each segment file.
///
/// Layout (32 bytes):
/// - magic: 4 bytes ("RWAL")
/// - version: 4 bytes
/// - segment_id: 4 bytes
/// - segment_size: 4 bytes
/// - first_lsn: 8 bytes
/// - flags: 4 bytes
/// - checksum: 4 bytes
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SegmentHeader {
    /// Magic bytes for identification.
    pub magic: [u8; 4],
    /// Format version.
    pub version: u32,
    /// Segment ID.
    pub segment_id: SegmentId,
    /// Maximum size of this segment.
    pub segment_size: u32,
    /// First LSN in this segment.
    pub first_lsn: Lsn,
    /// Segment flags.
    pub flags: u32,
    /// Header checksum.
    pub checksum: u32,
}

impl SegmentHeader {
    /// Magic bytes identifying a WAL segment.
    pub const MAGIC: [u8; 4] = *b"RWAL";
    /// Current format version.
    pub const VERSION: u32 = 1;
    /// Size of the header in bytes.
    pub const SIZE: usize = 32;

    /// Creates a new segment header.
    pub fn new(segment_id: SegmentId, segment_size: u32, first_lsn: Lsn) -> Self {
        let mut header = Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            segment_id,
            segment_size,
            first_lsn,
            flags: 0,
            checksum: 0,
        };
        header.checksum = header.compute_checksum();
        header
    }

    /// Computes the checksum for this header.
    fn compute_checksum(&self) -> u32 {
        let mut data = [0u8; Self::SIZE - 4];
        data[0..4].copy_from_slice(&self.magic);
        data[4..8].copy_from_slice(&self.version.to_le_bytes());
        data[8..12].copy_from_slice(&self.segment_id.0.to_le_bytes());
        data[12..16].copy_from_slice(&self.segment_size.to_le_bytes());
        data[16..24].copy_from_slice(&self.first_lsn.0.to_le_bytes());
        data[24..28].copy_from_slice(&self.flags.to_le_bytes());
        crc32fast::hash(&data)
    }

    /// Validates this header.
    pub fn validate(&self) -> Result<()> {
        if self.magic != Self::MAGIC {
            return Err(RidgelineError::WalCorrupted {
                offset: self.first_lsn.0,
                reason: "invalid magic bytes".to_string(),
            });
        }
        if self.version != Self::VERSION {
            return Err(RidgelineError::WalCorrupted {
                offset: self.first_lsn.0,
                reason: format!("unsupported version: {}", self.version),
            });
        }
        if self.checksum != self.compute_checksum() {
            return Err(RidgelineError::WalCorrupted {
                offset: self.first_lsn.0,
                reason: "header checksum mismatch".to_string(),
            });
        }
        Ok(())
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut data = [0u8; Self::SIZE];
        data[0..4].copy_from_slice(&self.magic);
        data[4..8].copy_from_slice(&self.version.to_le_bytes());
        data[8..12].copy_from_slice(&self.segment_id.0.to_le_bytes());
        data[12..16].copy_from_slice(&self.segment_size.to_le_bytes());
        data[16..24].copy_from_slice(&self.first_lsn.0.to_le_bytes());
        data[24..28].copy_from_slice(&self.flags.to_le_bytes());
        data[28..32].copy_from_slice(&self.checksum.to_le_bytes());
        data
    }

    /// Deserializes the header from bytes.
    pub fn from_bytes(data: &[u8; Self::SIZE]) -> Self {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&data[0..4]);

        Self {
            magic,
            version: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            segment_id: SegmentId(u32::from_le_bytes([data[8], data[9], data[10], data[11]])),
            segment_size: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
            first_lsn: Lsn(u64::from_le_bytes([
                data[16], data[17], data[18], data[19], data[20], data[21], data[22], data[23],
            ])),
            flags: u32::from_le_bytes([data[24], data[25], data[26], data[27]]),
            checksum: u32::from_le_bytes([data[28], data[29], data[30], data[31]]),
        }
    }
}

/// A single WAL segment file.
pub struct LogSegment {
    /// Path to the segment file.
    path: PathBuf,
    /// Segment header.
    header: SegmentHeader,
    /// Current write position within the segment.
    write_offset: u32,
    /// File handle.
    file: File,
}

impl LogSegment {
    /// Default segment size (16 MB).
    pub const DEFAULT_SIZE: u32 = 16 * 1024 * 1024;

    /// Creates a new segment file.
    pub fn create(
        wal_dir: &Path,
        segment_id: SegmentId,
        first_lsn: Lsn,
        segment_size: u32,
    ) -> Result<Self> {
        let path = wal_dir.join(segment_id.filename());
        let header = SegmentHeader::new(segment_id, segment_size, first_lsn);

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        file.write_all(&header.to_bytes())?;
        file.sync_all()?;

        Ok(Self {
            path,
            header,
            write_offset: SegmentHeader::SIZE as u32,
            file,
        })
    }

    /// Opens an existing segment file.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut header_bytes = [0u8; SegmentHeader::SIZE];
        file.read_exact(&mut header_bytes)?;
        let header = SegmentHeader::from_bytes(&header_bytes);
        header.validate()?;

        // The write position is wherever the file ends.
        let file_size = file.seek(SeekFrom::End(0))?;
        let write_offset = file_size as u32;

        Ok(Self {
            path: path.to_path_buf(),
            header,
            write_offset,
            file,
        })
    }

    /// Returns the segment ID.
    pub fn segment_id(&self) -> SegmentId {
        self.header.segment_id
    }

    /// Returns the first LSN in this segment.
    pub fn first_lsn(&self) -> Lsn {
        self.header.first_lsn
    }

    /// Returns the current write offset.
    pub fn write_offset(&self) -> u32 {
        self.write_offset
    }

    /// Returns the remaining space in this segment.
    pub fn remaining_space(&self) -> u32 {
        self.header.segment_size.saturating_sub(self.write_offset)
    }

    /// Returns true if this segment has space for a record of the given size.
    pub fn has_space(&self, record_size: usize) -> bool {
        self.remaining_space() >= record_size as u32
    }

    /// Returns the path to this segment file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends pre-serialized record bytes to this segment.
    pub fn append_raw(&mut self, data: &[u8]) -> Result<Lsn> {
        if !self.has_space(data.len()) {
            return Err(RidgelineError::WalWriteFailed("segment full".to_string()));
        }

        self.file.seek(SeekFrom::Start(self.write_offset as u64))?;
        self.file.write_all(data)?;

        let lsn = Lsn::new(self.header.segment_id.0, self.write_offset);
        self.write_offset += data.len() as u32;

        Ok(lsn)
    }

    /// Syncs the segment to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Reads all record data from the header boundary to the write position.
    pub fn read_all_data(&mut self) -> Result<Bytes> {
        let data_start = SegmentHeader::SIZE as u64;
        let data_len = (self.write_offset as u64).saturating_sub(data_start);

        if data_len == 0 {
            return Ok(Bytes::new());
        }

        self.file.seek(SeekFrom::Start(data_start))?;
        let mut buf = vec![0u8; data_len as usize];
        self.file.read_exact(&mut buf)?;

        Ok(Bytes::from(buf))
    }
}
