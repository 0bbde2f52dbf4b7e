//! Single-page bucket for the null key.
//!
//! Lives alone in the null file. Keeps a bounded inline list of record ids;
//! the rest of the bag spills to the overflow container under the bucket's
//! m-id, exactly like a regular leaf entry.

use crate::constants::NULL_EMBEDDED_LIMIT;
use ridgeline_common::page::{PageHeader, PageId, PageType};
use ridgeline_common::rid::RecordId;

const M_ID_OFFSET: usize = PageHeader::SIZE;
const SIZE_OFFSET: usize = M_ID_OFFSET + 8;
const EMBEDDED_COUNT_OFFSET: usize = SIZE_OFFSET + 4;
const RIDS_OFFSET: usize = EMBEDDED_COUNT_OFFSET + 2;

/// Result of appending a record id to the null bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullAppend {
    /// Stored inline; the bucket size was already incremented.
    Embedded,
    /// Inline region full; the caller must insert into the overflow
    /// container under the returned m-id and increment the size on success.
    RequiresOverflow(i64),
    /// The record id is already inline.
    Duplicate,
}

/// Result of removing a record id from the null bucket's inline region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullRemove {
    /// Removed inline; the bucket size was already decremented.
    Removed,
    /// Not inline; the caller should try the overflow container and
    /// decrement the size on success.
    NotEmbedded,
}

/// Accessors for the null bucket page layout.
pub struct NullBucketPage;

impl NullBucketPage {
    /// Initializes the null bucket with its assigned m-id.
    pub fn init(data: &mut [u8], page_id: PageId, m_id: i64) {
        let header = PageHeader::new(page_id, PageType::NullBucket);
        data[..PageHeader::SIZE].copy_from_slice(&header.to_bytes());
        data[M_ID_OFFSET..M_ID_OFFSET + 8].copy_from_slice(&m_id.to_le_bytes());
        Self::set_size(data, 0);
        Self::set_embedded_count(data, 0);
    }

    /// Returns the m-id joining this bucket to its overflow rows.
    pub fn m_id(data: &[u8]) -> i64 {
        i64::from_le_bytes(data[M_ID_OFFSET..M_ID_OFFSET + 8].try_into().unwrap())
    }

    /// Returns the total record-id count, inline plus overflow.
    pub fn size(data: &[u8]) -> u32 {
        u32::from_le_bytes(data[SIZE_OFFSET..SIZE_OFFSET + 4].try_into().unwrap())
    }

    fn set_size(data: &mut [u8], size: u32) {
        data[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&size.to_le_bytes());
    }

    /// Increments the total count after a successful overflow insert.
    pub fn increment_size(data: &mut [u8]) {
        let size = Self::size(data);
        Self::set_size(data, size + 1);
    }

    /// Decrements the total count after a successful overflow removal.
    pub fn decrement_size(data: &mut [u8]) {
        let size = Self::size(data);
        Self::set_size(data, size - 1);
    }

    /// Returns the number of inline record ids.
    pub fn embedded_count(data: &[u8]) -> usize {
        u16::from_le_bytes([data[EMBEDDED_COUNT_OFFSET], data[EMBEDDED_COUNT_OFFSET + 1]]) as usize
    }

    fn set_embedded_count(data: &mut [u8], count: usize) {
        data[EMBEDDED_COUNT_OFFSET..EMBEDDED_COUNT_OFFSET + 2]
            .copy_from_slice(&(count as u16).to_le_bytes());
    }

    /// Returns the inline record ids.
    pub fn embedded_rids(data: &[u8]) -> Vec<RecordId> {
        (0..Self::embedded_count(data))
            .map(|i| RecordId::read_from(data, RIDS_OFFSET + i * RecordId::SERIALIZED_SIZE))
            .collect()
    }

    /// Appends a record id to the bucket.
    pub fn add_rid(data: &mut [u8], rid: RecordId) -> NullAppend {
        let count = Self::embedded_count(data);

        for i in 0..count {
            if RecordId::read_from(data, RIDS_OFFSET + i * RecordId::SERIALIZED_SIZE) == rid {
                return NullAppend::Duplicate;
            }
        }

        if count < NULL_EMBEDDED_LIMIT {
            rid.write_to(data, RIDS_OFFSET + count * RecordId::SERIALIZED_SIZE);
            Self::set_embedded_count(data, count + 1);
            Self::increment_size(data);
            return NullAppend::Embedded;
        }

        NullAppend::RequiresOverflow(Self::m_id(data))
    }

    /// Removes a record id from the bucket's inline region.
    pub fn remove_rid(data: &mut [u8], rid: RecordId) -> NullRemove {
        let count = Self::embedded_count(data);

        for i in 0..count {
            if RecordId::read_from(data, RIDS_OFFSET + i * RecordId::SERIALIZED_SIZE) == rid {
                let last =
                    RecordId::read_from(data, RIDS_OFFSET + (count - 1) * RecordId::SERIALIZED_SIZE);
                last.write_to(data, RIDS_OFFSET + i * RecordId::SERIALIZED_SIZE);
                Self::set_embedded_count(data, count - 1);
                Self::decrement_size(data);
                return NullRemove::Removed;
            }
        }

        NullRemove::NotEmbedded
    }
}
