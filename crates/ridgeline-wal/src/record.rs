//! WAL log record format.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ridgeline_common::{RecordId, Result, RidgelineError};
use serde::{Deserialize, Serialize};

/// Log Sequence Number - unique identifier for each log record.
///
/// LSN is a monotonically increasing 64-bit value that identifies
/// the position of a record in the WAL. It encodes both the segment
/// ID and offset within the segment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Invalid/uninitialized LSN.
    pub const INVALID: Lsn = Lsn(0);

    /// Creates a new LSN from segment ID and offset.
    pub fn new(segment_id: u32, offset: u32) -> Self {
        Self(((segment_id as u64) << 32) | (offset as u64))
    }

    /// Returns the segment ID portion of this LSN.
    pub fn segment_id(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Returns the offset within the segment.
    pub fn offset(&self) -> u32 {
        self.0 as u32
    }

    /// Returns true if this is a valid LSN.
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for Lsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.segment_id(), self.offset())
    }
}

/// Types of log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LogRecordType {
    /// Invalid/padding record.
    Invalid = 0,
    /// Atomic operation begin.
    Begin = 1,
    /// Atomic operation commit.
    Commit = 2,
    /// Atomic operation rollback.
    Rollback = 3,
    /// Index put component operation.
    IndexPut = 10,
    /// Index remove-entry component operation.
    IndexRemove = 11,
}

impl TryFrom<u8> for LogRecordType {
    type Error = RidgelineError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(LogRecordType::Invalid),
            1 => Ok(LogRecordType::Begin),
            2 => Ok(LogRecordType::Commit),
            3 => Ok(LogRecordType::Rollback),
            10 => Ok(LogRecordType::IndexPut),
            11 => Ok(LogRecordType::IndexRemove),
            _ => Err(RidgelineError::WalCorrupted {
                offset: 0,
                reason: format!("invalid record type: {}", value),
            }),
        }
    }
}

/// A single log record in the WAL.
///
/// Record format on disk:
/// - header (24 bytes):
///   - lsn: 8 bytes
///   - prev_lsn: 8 bytes (for operation chaining)
///   - op_id: 4 bytes
///   - record_type: 1 byte
///   - flags: 1 byte
///   - payload_len: 2 bytes
/// - payload: variable length
/// - checksum: 4 bytes (CRC32 of header + payload)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// LSN of this record.
    pub lsn: Lsn,
    /// LSN of the previous record of this atomic operation.
    pub prev_lsn: Lsn,
    /// Atomic operation ID.
    pub op_id: u32,
    /// Type of this record.
    pub record_type: LogRecordType,
    /// Record flags.
    pub flags: u8,
    /// Record payload.
    pub payload: Bytes,
}

impl LogRecord {
    /// Size of the record header in bytes.
    pub const HEADER_SIZE: usize = 24;
    /// Size of the checksum in bytes.
    pub const CHECKSUM_SIZE: usize = 4;
    /// Maximum payload size (64 KB).
    pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

    /// Creates a new log record.
    pub fn new(lsn: Lsn, prev_lsn: Lsn, op_id: u32, record_type: LogRecordType, payload: Bytes) -> Self {
        Self {
            lsn,
            prev_lsn,
            op_id,
            record_type,
            flags: 0,
            payload,
        }
    }

    /// Creates an atomic-operation begin record.
    pub fn begin(op_id: u32) -> Self {
        Self::new(Lsn::INVALID, Lsn::INVALID, op_id, LogRecordType::Begin, Bytes::new())
    }

    /// Creates an atomic-operation commit record.
    pub fn commit(prev_lsn: Lsn, op_id: u32) -> Self {
        Self::new(Lsn::INVALID, prev_lsn, op_id, LogRecordType::Commit, Bytes::new())
    }

    /// Creates an atomic-operation rollback record.
    pub fn rollback(prev_lsn: Lsn, op_id: u32) -> Self {
        Self::new(Lsn::INVALID, prev_lsn, op_id, LogRecordType::Rollback, Bytes::new())
    }

    /// Creates a component-operation record.
    pub fn component(op_id: u32, prev_lsn: Lsn, operation: &ComponentOperation) -> Self {
        Self::new(
            Lsn::INVALID,
            prev_lsn,
            op_id,
            operation.record_type(),
            operation.serialize(),
        )
    }

    /// Returns the total size of this record on disk.
    pub fn size_on_disk(&self) -> usize {
        Self::HEADER_SIZE + self.payload.len() + Self::CHECKSUM_SIZE
    }

    /// Serializes this record to bytes.
    pub fn serialize(&self) -> Bytes {
        let total_size = self.size_on_disk();
        let mut buf = BytesMut::with_capacity(total_size);

        // Write header
        buf.put_u64_le(self.lsn.0);
        buf.put_u64_le(self.prev_lsn.0);
        buf.put_u32_le(self.op_id);
        buf.put_u8(self.record_type as u8);
        buf.put_u8(self.flags);
        buf.put_u16_le(self.payload.len() as u16);

        // Write payload
        buf.put_slice(&self.payload);

        // Compute and write checksum
        let checksum = crc32fast::hash(&buf);
        buf.put_u32_le(checksum);

        buf.freeze()
    }

    /// Deserializes a record from bytes.
    pub fn deserialize(mut data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE + Self::CHECKSUM_SIZE {
            return Err(RidgelineError::WalCorrupted {
                offset: 0,
                reason: "record too short".to_string(),
            });
        }

        // Read header
        let lsn = Lsn(data.get_u64_le());
        let prev_lsn = Lsn(data.get_u64_le());
        let op_id = data.get_u32_le();
        let record_type = LogRecordType::try_from(data.get_u8())?;
        let flags = data.get_u8();
        let payload_len = data.get_u16_le() as usize;

        if payload_len > Self::MAX_PAYLOAD_SIZE {
            return Err(RidgelineError::WalCorrupted {
                offset: lsn.0,
                reason: format!("payload too large: {}", payload_len),
            });
        }

        if data.len() < payload_len + Self::CHECKSUM_SIZE {
            return Err(RidgelineError::WalCorrupted {
                offset: lsn.0,
                reason: "truncated record".to_string(),
            });
        }

        // Read payload
        let payload = Bytes::copy_from_slice(&data[..payload_len]);
        data.advance(payload_len);

        // Read and verify checksum
        let stored_checksum = data.get_u32_le();
        let record = Self {
            lsn,
            prev_lsn,
            op_id,
            record_type,
            flags,
            payload,
        };

        let serialized = record.serialize();
        let computed_checksum = (&serialized[serialized.len() - 4..]).get_u32_le();

        if stored_checksum != computed_checksum {
            return Err(RidgelineError::WalCorrupted {
                offset: lsn.0,
                reason: format!(
                    "checksum mismatch: stored={}, computed={}",
                    stored_checksum, computed_checksum
                ),
            });
        }

        Ok(record)
    }
}

/// Index mutation recorded in the WAL as part of an atomic operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentOperation {
    /// One RID added under a key (or under the null key).
    Put(PutOperation),
    /// One RID removed from under a key (or from under the null key).
    RemoveEntry(RemoveEntryOperation),
}

impl ComponentOperation {
    /// Returns the WAL record type this operation is logged as.
    pub fn record_type(&self) -> LogRecordType {
        match self {
            ComponentOperation::Put(_) => LogRecordType::IndexPut,
            ComponentOperation::RemoveEntry(_) => LogRecordType::IndexRemove,
        }
    }

    /// Serializes this operation as a record payload.
    pub fn serialize(&self) -> Bytes {
        match self {
            ComponentOperation::Put(op) => serialize_operation(
                op.index_id,
                op.serializer_id,
                op.encryption_name.as_deref(),
                op.key.as_deref(),
                op.rid,
            ),
            ComponentOperation::RemoveEntry(op) => serialize_operation(
                op.index_id,
                op.serializer_id,
                op.encryption_name.as_deref(),
                op.key.as_deref(),
                op.rid,
            ),
        }
    }

    /// Deserializes an operation from a record.
    pub fn deserialize(record_type: LogRecordType, payload: &[u8]) -> Result<Self> {
        let (index_id, serializer_id, encryption_name, key, rid) = deserialize_operation(payload)?;
        match record_type {
            LogRecordType::IndexPut => Ok(ComponentOperation::Put(PutOperation {
                index_id,
                serializer_id,
                encryption_name,
                key,
                rid,
            })),
            LogRecordType::IndexRemove => Ok(ComponentOperation::RemoveEntry(RemoveEntryOperation {
                index_id,
                serializer_id,
                encryption_name,
                key,
                rid,
            })),
            other => Err(RidgelineError::WalCorrupted {
                offset: 0,
                reason: format!("not a component operation record: {:?}", other),
            }),
        }
    }
}

/// Payload of a put component operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOperation {
    /// Identifier of the index that was mutated.
    pub index_id: i32,
    /// Key serializer id used to encode the key payload.
    pub serializer_id: u8,
    /// Name of the encryption scheme, if keys are encrypted.
    pub encryption_name: Option<String>,
    /// Serialized key bytes; None for the null key.
    pub key: Option<Vec<u8>>,
    /// The record id that was added.
    pub rid: RecordId,
}

/// Payload of a remove-entry component operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveEntryOperation {
    /// Identifier of the index that was mutated.
    pub index_id: i32,
    /// Key serializer id used to encode the key payload.
    pub serializer_id: u8,
    /// Name of the encryption scheme, if keys are encrypted.
    pub encryption_name: Option<String>,
    /// Serialized key bytes; None for the null key.
    pub key: Option<Vec<u8>>,
    /// The record id that was removed.
    pub rid: RecordId,
}

fn serialize_operation(
    index_id: i32,
    serializer_id: u8,
    encryption_name: Option<&str>,
    key: Option<&[u8]>,
    rid: RecordId,
) -> Bytes {
    let mut buf = BytesMut::new();

    buf.put_i32_le(index_id);
    buf.put_u8(serializer_id);

    match encryption_name {
        Some(name) => {
            buf.put_u8(1);
            buf.put_u16_le(name.len() as u16);
            buf.put_slice(name.as_bytes());
        }
        None => buf.put_u8(0),
    }

    match key {
        Some(bytes) => {
            buf.put_u8(1);
            buf.put_u32_le(bytes.len() as u32);
            buf.put_slice(bytes);
        }
        None => buf.put_u8(0),
    }

    buf.put_i16_le(rid.cluster_id);
    buf.put_i64_le(rid.cluster_position);

    buf.freeze()
}

type OperationFields = (i32, u8, Option<String>, Option<Vec<u8>>, RecordId);

fn deserialize_operation(mut data: &[u8]) -> Result<OperationFields> {
    let corrupted = |reason: &str| RidgelineError::WalCorrupted {
        offset: 0,
        reason: reason.to_string(),
    };

    if data.len() < 7 {
        return Err(corrupted("component operation too short"));
    }

    let index_id = data.get_i32_le();
    let serializer_id = data.get_u8();

    let encryption_name = if data.get_u8() == 1 {
        if data.len() < 2 {
            return Err(corrupted("truncated encryption name"));
        }
        let len = data.get_u16_le() as usize;
        if data.len() < len {
            return Err(corrupted("truncated encryption name"));
        }
        let name = std::str::from_utf8(&data[..len])
            .map_err(|_| corrupted("encryption name is not UTF-8"))?
            .to_string();
        data.advance(len);
        Some(name)
    } else {
        None
    };

    if data.is_empty() {
        return Err(corrupted("missing key flag"));
    }
    let key = if data.get_u8() == 1 {
        if data.len() < 4 {
            return Err(corrupted("truncated key length"));
        }
        let len = data.get_u32_le() as usize;
        if data.len() < len {
            return Err(corrupted("truncated key payload"));
        }
        let bytes = data[..len].to_vec();
        data.advance(len);
        Some(bytes)
    } else {
        None
    };

    if data.len() < 10 {
        return Err(corrupted("truncated record id"));
    }
    let cluster_id = data.get_i16_le();
    let cluster_position = data.get_i64_le();

    Ok((
        index_id,
        serializer_id,
        encryption_name,
        key,
        RecordId::new(cluster_id, cluster_position),
    ))
}
