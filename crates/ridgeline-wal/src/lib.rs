//! Write-Ahead Log (WAL) for Ridgeline.
//!
//! Provides durability by logging index mutations as component operations
//! before the pages that carry them are written back. Supports inspection
//! and replay through log reading.

pub mod reader;
pub mod record;
pub mod segment;
pub mod writer;

pub use reader::WalReader;
pub use record::{
    ComponentOperation, LogRecord, LogRecordType, Lsn, PutOperation, RemoveEntryOperation,
};
pub use segment::{LogSegment, SegmentHeader, SegmentId};
pub use writer::{WalWriter, WalWriterConfig};
