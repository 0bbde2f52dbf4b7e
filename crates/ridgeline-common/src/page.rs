//! Page structures for Ridgeline storage.

use serde::{Deserialize, Serialize};

/// Default page size in bytes (16 KB).
pub const PAGE_SIZE: usize = 16 * 1024;

/// Unique identifier for a page within a file.
///
/// PageId consists of a file ID and page index within that file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId {
    /// File identifier assigned by the page cache.
    pub file_id: u32,
    /// Page index within the file (0-indexed).
    pub page_index: u32,
}

impl PageId {
    /// Creates a new PageId.
    pub fn new(file_id: u32, page_index: u32) -> Self {
        Self { file_id, page_index }
    }

    /// Returns the PageId as a single u64 for compact storage.
    pub fn as_u64(&self) -> u64 {
        ((self.file_id as u64) << 32) | (self.page_index as u64)
    }

    /// Creates a PageId from a u64 representation.
    pub fn from_u64(value: u64) -> Self {
        Self {
            file_id: (value >> 32) as u32,
            page_index: value as u32,
        }
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_id, self.page_index)
    }
}

/// Page types in Ridgeline storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageType {
    /// Unallocated page.
    Free = 0,
    /// Tree-wide metadata page (size counters, id high-water marks).
    EntryPoint = 1,
    /// Multi-value index leaf bucket.
    IndexLeaf = 2,
    /// Multi-value index internal bucket.
    IndexInternal = 3,
    /// Single-page bucket for the null key.
    NullBucket = 4,
    /// Overflow container leaf.
    ContainerLeaf = 5,
    /// Overflow container internal node.
    ContainerInternal = 6,
}

impl PageType {
    /// Decodes a page type from its on-disk tag, defaulting to Free.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PageType::EntryPoint,
            2 => PageType::IndexLeaf,
            3 => PageType::IndexInternal,
            4 => PageType::NullBucket,
            5 => PageType::ContainerLeaf,
            6 => PageType::ContainerInternal,
            _ => PageType::Free,
        }
    }
}

/// Header structure at the beginning of every page.
///
/// Layout (32 bytes total):
/// - file_id: 4 bytes
/// - page_index: 4 bytes
/// - lsn: 8 bytes (log sequence number of the last modification)
/// - page_type: 1 byte
/// - flags: 1 byte
/// - checksum: 4 bytes
/// - reserved: 10 bytes
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageHeader {
    /// Unique page identifier.
    pub page_id: PageId,
    /// Log sequence number of the last modification.
    pub lsn: u64,
    /// Type of this page.
    pub page_type: PageType,
    /// Page flags.
    pub flags: u8,
    /// CRC32 checksum of the page contents (excluding this field).
    pub checksum: u32,
}

impl PageHeader {
    /// Size of the page header in bytes.
    pub const SIZE: usize = 32;

    /// Creates a new page header.
    pub fn new(page_id: PageId, page_type: PageType) -> Self {
        Self {
            page_id,
            lsn: 0,
            page_type,
            flags: 0,
            checksum: 0,
        }
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.page_id.file_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.page_id.page_index.to_le_bytes());
        buf[8..16].copy_from_slice(&self.lsn.to_le_bytes());
        buf[16] = self.page_type as u8;
        buf[17] = self.flags;
        buf[18..22].copy_from_slice(&self.checksum.to_le_bytes());
        // bytes 22-31 are reserved (already zeroed)
        buf
    }

    /// Deserializes the header from bytes.
    pub fn from_bytes(buf: &[u8]) -> Self {
        let file_id = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let page_index = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let lsn = u64::from_le_bytes([
            buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
        ]);
        let page_type = PageType::from_u8(buf[16]);
        let flags = buf[17];
        let checksum = u32::from_le_bytes([buf[18], buf[19], buf[20], buf[21]]);

        Self {
            page_id: PageId::new(file_id, page_index),
            lsn,
            page_type,
            flags,
            checksum,
        }
    }
}
