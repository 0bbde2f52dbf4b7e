//! Slotted bucket page holding leaf or internal tree nodes.
//!
//! The page uses the classic double-ended arrangement: a slot array of
//! `(offset, len)` pairs grows forward from the header, the record region
//! grows backward from the page tail. Slots are kept sorted by key order so
//! lookups binary-search the slot array. Removing an entry drops its slot
//! but leaves the record bytes in place; the space is reclaimed when a
//! split rebuilds the page.
//!
//! Leaf record layout:
//! ```text
//! m_id: i64 | entries_count: u32 | embedded_count: u8 | key_len: u16 |
//! key bytes | embedded rids (EMBEDDED_RID_LIMIT slots of 10 bytes)
//! ```
//!
//! Internal record layout:
//! ```text
//! left_child: u32 | right_child: u32 | key_len: u16 | key bytes
//! ```

use crate::constants::{EMBEDDED_RID_LIMIT, ENTRY_SPILL_LIMIT, NO_SIBLING};
use ridgeline_common::key::{CompositeKey, Encryption, KeySerializer};
use ridgeline_common::page::{PageHeader, PageId, PageType, PAGE_SIZE};
use ridgeline_common::rid::RecordId;
use ridgeline_common::{Result, RidgelineError};

const SIZE_OFFSET: usize = PageHeader::SIZE;
const DATA_END_OFFSET: usize = SIZE_OFFSET + 2;
const LEFT_SIBLING_OFFSET: usize = DATA_END_OFFSET + 2;
const RIGHT_SIBLING_OFFSET: usize = LEFT_SIBLING_OFFSET + 8;
const SLOT_ARRAY_START: usize = RIGHT_SIBLING_OFFSET + 8 + 4;
const SLOT_SIZE: usize = 4;

const LEAF_FIXED_FIELDS: usize = 8 + 4 + 1 + 2;
const INTERNAL_FIXED_FIELDS: usize = 4 + 4 + 2;
const EMBEDDED_REGION: usize = EMBEDDED_RID_LIMIT * RecordId::SERIALIZED_SIZE;

/// Result of a slot-array binary search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotSearch {
    /// Key found at the given slot.
    Found(usize),
    /// Key absent; would be inserted at the given slot.
    Insertion(usize),
}

impl SlotSearch {
    /// Returns the slot regardless of whether the key was found.
    pub fn index(&self) -> usize {
        match *self {
            SlotSearch::Found(i) | SlotSearch::Insertion(i) => i,
        }
    }

    /// Returns true for a hit.
    pub fn is_found(&self) -> bool {
        matches!(self, SlotSearch::Found(_))
    }
}

/// Result of appending a record id to an existing leaf entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Stored in the entry's inline region.
    Embedded,
    /// No inline room; the caller must insert into the overflow container
    /// under the returned m-id.
    RequiresOverflow(i64),
    /// The entry reached its spill limit; the caller should create a new
    /// entry under the same key.
    Saturated,
    /// The record id is already in the inline region.
    Duplicate,
}

/// Result of removing a record id from a leaf entry's inline region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// Removed; the entry now holds `remaining` record ids in total.
    Removed { remaining: u32 },
    /// The record id is not inline; the caller should try the overflow
    /// container if the entry has external entries.
    NotEmbedded,
}

/// A fully materialized leaf entry.
#[derive(Debug, Clone)]
pub struct LeafEntry {
    /// Stored key bytes (ciphertext when encryption is enabled).
    pub key: Vec<u8>,
    /// Identifier joining this entry to its overflow rows.
    pub m_id: i64,
    /// Total record ids belonging to this entry, inline plus overflow.
    pub entries_count: u32,
    /// The inline record ids.
    pub embedded: Vec<RecordId>,
}

/// Decodes a stored key, handling the encryption length prefix.
pub fn decode_stored_key(
    raw: &[u8],
    serializer: &dyn KeySerializer,
    encryption: Option<&dyn Encryption>,
) -> Result<CompositeKey> {
    match encryption {
        None => serializer.deserialize(raw),
        Some(enc) => {
            if raw.len() < 4 {
                return Err(RidgelineError::MalformedKey(
                    "encrypted key shorter than its length prefix".into(),
                ));
            }
            let len = u32::from_le_bytes(raw[0..4].try_into().unwrap()) as usize;
            let cipher = raw.get(4..4 + len).ok_or_else(|| {
                RidgelineError::MalformedKey("encrypted key truncated".into())
            })?;
            serializer.deserialize(&enc.decrypt(cipher))
        }
    }
}

/// Accessors and mutators for the bucket page layout.
pub struct BucketPage;

impl BucketPage {
    /// Initializes a page as an empty leaf or internal bucket.
    ///
    /// Sibling pointers survive only until re-init; callers re-link them.
    pub fn init(data: &mut [u8], page_id: PageId, leaf: bool) {
        let page_type = if leaf {
            PageType::IndexLeaf
        } else {
            PageType::IndexInternal
        };
        let header = PageHeader::new(page_id, page_type);
        data[..PageHeader::SIZE].copy_from_slice(&header.to_bytes());

        Self::set_size(data, 0);
        Self::set_data_end(data, PAGE_SIZE as u16);
        Self::set_left_sibling(data, NO_SIBLING);
        Self::set_right_sibling(data, NO_SIBLING);
    }

    /// Returns true if the page holds a leaf node.
    pub fn is_leaf(data: &[u8]) -> bool {
        PageHeader::from_bytes(data).page_type == PageType::IndexLeaf
    }

    /// Returns the number of entries.
    pub fn size(data: &[u8]) -> usize {
        u16::from_le_bytes([data[SIZE_OFFSET], data[SIZE_OFFSET + 1]]) as usize
    }

    fn set_size(data: &mut [u8], size: usize) {
        data[SIZE_OFFSET..SIZE_OFFSET + 2].copy_from_slice(&(size as u16).to_le_bytes());
    }

    /// Returns true if the page holds no entries.
    pub fn is_empty(data: &[u8]) -> bool {
        Self::size(data) == 0
    }

    fn data_end(data: &[u8]) -> usize {
        u16::from_le_bytes([data[DATA_END_OFFSET], data[DATA_END_OFFSET + 1]]) as usize
    }

    fn set_data_end(data: &mut [u8], end: u16) {
        data[DATA_END_OFFSET..DATA_END_OFFSET + 2].copy_from_slice(&end.to_le_bytes());
    }

    /// Returns the left sibling page index, or -1.
    pub fn left_sibling(data: &[u8]) -> i64 {
        i64::from_le_bytes(
            data[LEFT_SIBLING_OFFSET..LEFT_SIBLING_OFFSET + 8]
                .try_into()
                .unwrap(),
        )
    }

    /// Sets the left sibling page index.
    pub fn set_left_sibling(data: &mut [u8], sibling: i64) {
        data[LEFT_SIBLING_OFFSET..LEFT_SIBLING_OFFSET + 8]
            .copy_from_slice(&sibling.to_le_bytes());
    }

    /// Returns the right sibling page index, or -1.
    pub fn right_sibling(data: &[u8]) -> i64 {
        i64::from_le_bytes(
            data[RIGHT_SIBLING_OFFSET..RIGHT_SIBLING_OFFSET + 8]
                .try_into()
                .unwrap(),
        )
    }

    /// Sets the right sibling page index.
    pub fn set_right_sibling(data: &mut [u8], sibling: i64) {
        data[RIGHT_SIBLING_OFFSET..RIGHT_SIBLING_OFFSET + 8]
            .copy_from_slice(&sibling.to_le_bytes());
    }

    fn slot(data: &[u8], index: usize) -> (usize, usize) {
        let base = SLOT_ARRAY_START + index * SLOT_SIZE;
        let offset = u16::from_le_bytes([data[base], data[base + 1]]) as usize;
        let len = u16::from_le_bytes([data[base + 2], data[base + 3]]) as usize;
        (offset, len)
    }

    fn write_slot(data: &mut [u8], index: usize, offset: usize, len: usize) {
        let base = SLOT_ARRAY_START + index * SLOT_SIZE;
        data[base..base + 2].copy_from_slice(&(offset as u16).to_le_bytes());
        data[base + 2..base + 4].copy_from_slice(&(len as u16).to_le_bytes());
    }

    fn free_space(data: &[u8]) -> usize {
        let slot_array_end = SLOT_ARRAY_START + Self::size(data) * SLOT_SIZE;
        Self::data_end(data).saturating_sub(slot_array_end)
    }

    /// Returns the raw stored key bytes of the entry at `index`.
    pub fn raw_key_at(data: &[u8], index: usize) -> Vec<u8> {
        let (offset, _) = Self::slot(data, index);
        let key_len_off = if Self::is_leaf(data) {
            offset + 8 + 4 + 1
        } else {
            offset + 4 + 4
        };
        let key_len = u16::from_le_bytes([data[key_len_off], data[key_len_off + 1]]) as usize;
        data[key_len_off + 2..key_len_off + 2 + key_len].to_vec()
    }

    /// Returns the decoded key of the entry at `index`.
    pub fn key_at(
        data: &[u8],
        index: usize,
        serializer: &dyn KeySerializer,
        encryption: Option<&dyn Encryption>,
    ) -> Result<CompositeKey> {
        decode_stored_key(&Self::raw_key_at(data, index), serializer, encryption)
    }

    /// Binary search for a key over the slot array.
    pub fn find(
        data: &[u8],
        key: &CompositeKey,
        serializer: &dyn KeySerializer,
        encryption: Option<&dyn Encryption>,
    ) -> Result<SlotSearch> {
        let mut low = 0usize;
        let mut high = Self::size(data);

        while low < high {
            let mid = low + (high - low) / 2;
            let stored = Self::key_at(data, mid, serializer, encryption)?;
            match stored.cmp(key) {
                std::cmp::Ordering::Equal => return Ok(SlotSearch::Found(mid)),
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
            }
        }

        Ok(SlotSearch::Insertion(low))
    }

    // ------------------------------------------------------------------
    // Leaf entries
    // ------------------------------------------------------------------

    /// Materializes the leaf entry at `index`.
    pub fn leaf_entry(data: &[u8], index: usize) -> LeafEntry {
        let (offset, _) = Self::slot(data, index);
        let m_id = i64::from_le_bytes(data[offset..offset + 8].try_into().unwrap());
        let entries_count =
            u32::from_le_bytes(data[offset + 8..offset + 12].try_into().unwrap());
        let embedded_count = data[offset + 12] as usize;
        let key_len =
            u16::from_le_bytes([data[offset + 13], data[offset + 14]]) as usize;
        let key = data[offset + 15..offset + 15 + key_len].to_vec();

        let rid_base = offset + LEAF_FIXED_FIELDS + key_len;
        let embedded = (0..embedded_count)
            .map(|i| RecordId::read_from(data, rid_base + i * RecordId::SERIALIZED_SIZE))
            .collect();

        LeafEntry {
            key,
            m_id,
            entries_count,
            embedded,
        }
    }

    /// Returns the m-id of the leaf entry at `index`.
    pub fn m_id_at(data: &[u8], index: usize) -> i64 {
        let (offset, _) = Self::slot(data, index);
        i64::from_le_bytes(data[offset..offset + 8].try_into().unwrap())
    }

    /// Returns the total record-id count of the leaf entry at `index`.
    pub fn entries_count_at(data: &[u8], index: usize) -> u32 {
        let (offset, _) = Self::slot(data, index);
        u32::from_le_bytes(data[offset + 8..offset + 12].try_into().unwrap())
    }

    fn set_entries_count_at(data: &mut [u8], index: usize, count: u32) {
        let (offset, _) = Self::slot(data, index);
        data[offset + 8..offset + 12].copy_from_slice(&count.to_le_bytes());
    }

    /// Returns true if the entry keeps record ids in the overflow container.
    pub fn has_external_entries(data: &[u8], index: usize) -> bool {
        let (offset, _) = Self::slot(data, index);
        let entries_count =
            u32::from_le_bytes(data[offset + 8..offset + 12].try_into().unwrap());
        let embedded_count = data[offset + 12] as u32;
        entries_count > embedded_count
    }

    /// Increments the entry's total count after a successful overflow insert.
    pub fn increment_entries_count(data: &mut [u8], index: usize) {
        let count = Self::entries_count_at(data, index);
        Self::set_entries_count_at(data, index, count + 1);
    }

    /// Decrements the entry's total count after a successful overflow
    /// removal. Returns true when the entry is now empty and its slot
    /// should be dropped.
    pub fn decrement_entries_count(data: &mut [u8], index: usize) -> bool {
        let count = Self::entries_count_at(data, index) - 1;
        Self::set_entries_count_at(data, index, count);
        count == 0
    }

    /// Creates a new leaf entry at slot `index`.
    ///
    /// Returns false when the page has no room; the caller must split.
    pub fn create_leaf_entry(
        data: &mut [u8],
        index: usize,
        key: &[u8],
        rid: RecordId,
        m_id: i64,
    ) -> bool {
        let record_len = LEAF_FIXED_FIELDS + key.len() + EMBEDDED_REGION;
        if Self::free_space(data) < record_len + SLOT_SIZE {
            return false;
        }

        let record_offset = Self::data_end(data) - record_len;
        data[record_offset..record_offset + 8].copy_from_slice(&m_id.to_le_bytes());
        data[record_offset + 8..record_offset + 12].copy_from_slice(&1u32.to_le_bytes());
        data[record_offset + 12] = 1;
        data[record_offset + 13..record_offset + 15]
            .copy_from_slice(&(key.len() as u16).to_le_bytes());
        data[record_offset + 15..record_offset + 15 + key.len()].copy_from_slice(key);

        let rid_base = record_offset + LEAF_FIXED_FIELDS + key.len();
        data[rid_base..rid_base + EMBEDDED_REGION].fill(0);
        rid.write_to(data, rid_base);

        Self::insert_slot(data, index, record_offset, record_len);
        Self::set_data_end(data, record_offset as u16);
        true
    }

    /// Appends a record id to the leaf entry at `index`.
    pub fn append_leaf_rid(data: &mut [u8], index: usize, rid: RecordId) -> AppendOutcome {
        let (offset, _) = Self::slot(data, index);
        let m_id = i64::from_le_bytes(data[offset..offset + 8].try_into().unwrap());
        let entries_count =
            u32::from_le_bytes(data[offset + 8..offset + 12].try_into().unwrap());
        let embedded_count = data[offset + 12] as usize;
        let key_len = u16::from_le_bytes([data[offset + 13], data[offset + 14]]) as usize;
        let rid_base = offset + LEAF_FIXED_FIELDS + key_len;

        for i in 0..embedded_count {
            if RecordId::read_from(data, rid_base + i * RecordId::SERIALIZED_SIZE) == rid {
                return AppendOutcome::Duplicate;
            }
        }

        if embedded_count < EMBEDDED_RID_LIMIT {
            rid.write_to(data, rid_base + embedded_count * RecordId::SERIALIZED_SIZE);
            data[offset + 12] = (embedded_count + 1) as u8;
            Self::set_entries_count_at(data, index, entries_count + 1);
            return AppendOutcome::Embedded;
        }

        if entries_count < ENTRY_SPILL_LIMIT {
            return AppendOutcome::RequiresOverflow(m_id);
        }

        AppendOutcome::Saturated
    }

    /// Removes a record id from the entry's inline region.
    ///
    /// The inline list is a bag: the removed slot is back-filled with the
    /// last inline record id.
    pub fn remove_embedded_rid(data: &mut [u8], index: usize, rid: RecordId) -> RemoveOutcome {
        let (offset, _) = Self::slot(data, index);
        let entries_count =
            u32::from_le_bytes(data[offset + 8..offset + 12].try_into().unwrap());
        let embedded_count = data[offset + 12] as usize;
        let key_len = u16::from_le_bytes([data[offset + 13], data[offset + 14]]) as usize;
        let rid_base = offset + LEAF_FIXED_FIELDS + key_len;

        for i in 0..embedded_count {
            if RecordId::read_from(data, rid_base + i * RecordId::SERIALIZED_SIZE) == rid {
                let last = RecordId::read_from(
                    data,
                    rid_base + (embedded_count - 1) * RecordId::SERIALIZED_SIZE,
                );
                last.write_to(data, rid_base + i * RecordId::SERIALIZED_SIZE);
                data[offset + 12] = (embedded_count - 1) as u8;
                Self::set_entries_count_at(data, index, entries_count - 1);
                return RemoveOutcome::Removed {
                    remaining: entries_count - 1,
                };
            }
        }

        RemoveOutcome::NotEmbedded
    }

    /// Drops the slot of the leaf entry at `index`.
    ///
    /// The record bytes stay behind as garbage until a split rebuilds the
    /// page.
    pub fn remove_leaf_entry_at(data: &mut [u8], index: usize) {
        let size = Self::size(data);
        let start = SLOT_ARRAY_START + index * SLOT_SIZE;
        let end = SLOT_ARRAY_START + size * SLOT_SIZE;
        data.copy_within(start + SLOT_SIZE..end, start);
        Self::set_size(data, size - 1);
    }

    // ------------------------------------------------------------------
    // Internal entries
    // ------------------------------------------------------------------

    /// Returns the left child of the internal entry at `index`.
    pub fn left_child(data: &[u8], index: usize) -> u32 {
        let (offset, _) = Self::slot(data, index);
        u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
    }

    /// Returns the right child of the internal entry at `index`.
    pub fn right_child(data: &[u8], index: usize) -> u32 {
        let (offset, _) = Self::slot(data, index);
        u32::from_le_bytes(data[offset + 4..offset + 8].try_into().unwrap())
    }

    fn set_left_child(data: &mut [u8], index: usize, child: u32) {
        let (offset, _) = Self::slot(data, index);
        data[offset..offset + 4].copy_from_slice(&child.to_le_bytes());
    }

    fn set_right_child(data: &mut [u8], index: usize, child: u32) {
        let (offset, _) = Self::slot(data, index);
        data[offset + 4..offset + 8].copy_from_slice(&child.to_le_bytes());
    }

    /// Inserts an internal entry at slot `index`.
    ///
    /// With `update_neighbors`, the adjacent entries' child pointers are
    /// fixed so that `right(i - 1) == left(i)` keeps holding.
    ///
    /// Returns false when the page has no room; the caller must split.
    pub fn add_internal_entry(
        data: &mut [u8],
        index: usize,
        key: &[u8],
        left_child: u32,
        right_child: u32,
        update_neighbors: bool,
    ) -> bool {
        let record_len = INTERNAL_FIXED_FIELDS + key.len();
        if Self::free_space(data) < record_len + SLOT_SIZE {
            return false;
        }

        let record_offset = Self::data_end(data) - record_len;
        data[record_offset..record_offset + 4].copy_from_slice(&left_child.to_le_bytes());
        data[record_offset + 4..record_offset + 8].copy_from_slice(&right_child.to_le_bytes());
        data[record_offset + 8..record_offset + 10]
            .copy_from_slice(&(key.len() as u16).to_le_bytes());
        data[record_offset + 10..record_offset + 10 + key.len()].copy_from_slice(key);

        Self::insert_slot(data, index, record_offset, record_len);
        Self::set_data_end(data, record_offset as u16);

        if update_neighbors {
            let size = Self::size(data);
            if index > 0 {
                Self::set_right_child(data, index - 1, left_child);
            }
            if index + 1 < size {
                Self::set_left_child(data, index + 1, right_child);
            }
        }

        true
    }

    // ------------------------------------------------------------------
    // Raw records: split support
    // ------------------------------------------------------------------

    /// Returns the verbatim record bytes of the entry at `index`.
    pub fn raw_entry(data: &[u8], index: usize) -> Vec<u8> {
        let (offset, len) = Self::slot(data, index);
        data[offset..offset + len].to_vec()
    }

    /// Appends raw records, in order, to the end of the entry array.
    ///
    /// Used when a split rebuilds a fresh page from copied records.
    pub fn add_raw_entries(data: &mut [u8], entries: &[Vec<u8>]) {
        for record in entries {
            let record_offset = Self::data_end(data) - record.len();
            data[record_offset..record_offset + record.len()].copy_from_slice(record);
            let index = Self::size(data);
            Self::insert_slot(data, index, record_offset, record.len());
            Self::set_data_end(data, record_offset as u16);
        }
    }

    /// Truncates the bucket to its first `keep` entries and compacts the
    /// record region.
    pub fn shrink(data: &mut [u8], keep: usize) {
        let records: Vec<Vec<u8>> = (0..keep).map(|i| Self::raw_entry(data, i)).collect();

        Self::set_size(data, 0);
        Self::set_data_end(data, PAGE_SIZE as u16);
        Self::add_raw_entries(data, &records);
    }

    fn insert_slot(data: &mut [u8], index: usize, offset: usize, len: usize) {
        let size = Self::size(data);
        let start = SLOT_ARRAY_START + index * SLOT_SIZE;
        let end = SLOT_ARRAY_START + size * SLOT_SIZE;
        data.copy_within(start..end, start + SLOT_SIZE);
        Self::write_slot(data, index, offset, len);
        Self::set_size(data, size + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridgeline_common::key::CompositeKeySerializer;

    const SERIALIZER: CompositeKeySerializer = CompositeKeySerializer;

    fn leaf_page() -> Box<[u8; PAGE_SIZE]> {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        BucketPage::init(&mut data[..], PageId::new(1, 1), true);
        data
    }

    fn internal_page() -> Box<[u8; PAGE_SIZE]> {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        BucketPage::init(&mut data[..], PageId::new(1, 1), false);
        data
    }

    fn key_bytes(value: i64) -> Vec<u8> {
        SERIALIZER.serialize(&CompositeKey::from(value))
    }

    fn insert_sorted(data: &mut [u8], value: i64, rid: RecordId, m_id: i64) {
        let key = CompositeKey::from(value);
        let search = BucketPage::find(data, &key, &SERIALIZER, None).unwrap();
        assert!(!search.is_found());
        assert!(BucketPage::create_leaf_entry(
            data,
            search.index(),
            &key_bytes(value),
            rid,
            m_id
        ));
    }

    #[test]
    fn test_init_leaf_flags() {
        let leaf = leaf_page();
        let internal = internal_page();
        assert!(BucketPage::is_leaf(&leaf[..]));
        assert!(!BucketPage::is_leaf(&internal[..]));
        assert!(BucketPage::is_empty(&leaf[..]));
        assert_eq!(BucketPage::left_sibling(&leaf[..]), NO_SIBLING);
        assert_eq!(BucketPage::right_sibling(&leaf[..]), NO_SIBLING);
    }

    #[test]
    fn test_create_and_find_sorted() {
        let mut data = leaf_page();
        for value in [50i64, 10, 30, 20, 40] {
            insert_sorted(&mut data[..], value, RecordId::new(1, value), value);
        }

        assert_eq!(BucketPage::size(&data[..]), 5);
        for (slot, value) in [10i64, 20, 30, 40, 50].iter().enumerate() {
            let key = BucketPage::key_at(&data[..], slot, &SERIALIZER, None).unwrap();
            assert_eq!(key, CompositeKey::from(*value));
        }

        let search = BucketPage::find(&data[..], &CompositeKey::from(30i64), &SERIALIZER, None)
            .unwrap();
        assert_eq!(search, SlotSearch::Found(2));

        let search = BucketPage::find(&data[..], &CompositeKey::from(35i64), &SERIALIZER, None)
            .unwrap();
        assert_eq!(search, SlotSearch::Insertion(3));
    }

    #[test]
    fn test_leaf_entry_materialization() {
        let mut data = leaf_page();
        insert_sorted(&mut data[..], 7, RecordId::new(3, 700), 99);

        let entry = BucketPage::leaf_entry(&data[..], 0);
        assert_eq!(entry.m_id, 99);
        assert_eq!(entry.entries_count, 1);
        assert_eq!(entry.embedded, vec![RecordId::new(3, 700)]);
        assert_eq!(entry.key, key_bytes(7));
    }

    #[test]
    fn test_append_embeds_until_inline_limit() {
        let mut data = leaf_page();
        insert_sorted(&mut data[..], 1, RecordId::new(1, 0), 5);

        for i in 1..EMBEDDED_RID_LIMIT {
            assert_eq!(
                BucketPage::append_leaf_rid(&mut data[..], 0, RecordId::new(1, i as i64)),
                AppendOutcome::Embedded
            );
        }

        // Inline region full: the next appends must go to the container.
        assert_eq!(
            BucketPage::append_leaf_rid(&mut data[..], 0, RecordId::new(1, 100)),
            AppendOutcome::RequiresOverflow(5)
        );

        let entry = BucketPage::leaf_entry(&data[..], 0);
        assert_eq!(entry.entries_count, EMBEDDED_RID_LIMIT as u32);
        assert_eq!(entry.embedded.len(), EMBEDDED_RID_LIMIT);
    }

    #[test]
    fn test_append_detects_inline_duplicates() {
        let mut data = leaf_page();
        insert_sorted(&mut data[..], 1, RecordId::new(1, 0), 5);
        assert_eq!(
            BucketPage::append_leaf_rid(&mut data[..], 0, RecordId::new(1, 0)),
            AppendOutcome::Duplicate
        );
        assert_eq!(BucketPage::entries_count_at(&data[..], 0), 1);
    }

    #[test]
    fn test_append_saturates_at_spill_limit() {
        let mut data = leaf_page();
        insert_sorted(&mut data[..], 1, RecordId::new(1, 0), 5);
        for i in 1..EMBEDDED_RID_LIMIT {
            BucketPage::append_leaf_rid(&mut data[..], 0, RecordId::new(1, i as i64));
        }
        // Simulate overflow inserts up to the spill limit.
        while BucketPage::entries_count_at(&data[..], 0) < ENTRY_SPILL_LIMIT {
            assert!(matches!(
                BucketPage::append_leaf_rid(&mut data[..], 0, RecordId::new(1, 1000)),
                AppendOutcome::RequiresOverflow(5)
            ));
            BucketPage::increment_entries_count(&mut data[..], 0);
        }

        assert_eq!(
            BucketPage::append_leaf_rid(&mut data[..], 0, RecordId::new(1, 2000)),
            AppendOutcome::Saturated
        );
    }

    #[test]
    fn test_remove_embedded_rid() {
        let mut data = leaf_page();
        insert_sorted(&mut data[..], 1, RecordId::new(1, 0), 5);
        BucketPage::append_leaf_rid(&mut data[..], 0, RecordId::new(1, 1));
        BucketPage::append_leaf_rid(&mut data[..], 0, RecordId::new(1, 2));

        assert_eq!(
            BucketPage::remove_embedded_rid(&mut data[..], 0, RecordId::new(1, 1)),
            RemoveOutcome::Removed { remaining: 2 }
        );
        assert_eq!(
            BucketPage::remove_embedded_rid(&mut data[..], 0, RecordId::new(1, 1)),
            RemoveOutcome::NotEmbedded
        );

        let entry = BucketPage::leaf_entry(&data[..], 0);
        assert_eq!(entry.embedded.len(), 2);
        assert!(entry.embedded.contains(&RecordId::new(1, 0)));
        assert!(entry.embedded.contains(&RecordId::new(1, 2)));
    }

    #[test]
    fn test_remove_leaf_entry_drops_slot() {
        let mut data = leaf_page();
        for value in [1i64, 2, 3] {
            insert_sorted(&mut data[..], value, RecordId::new(1, value), value);
        }

        BucketPage::remove_leaf_entry_at(&mut data[..], 1);
        assert_eq!(BucketPage::size(&data[..]), 2);
        assert_eq!(
            BucketPage::key_at(&data[..], 0, &SERIALIZER, None).unwrap(),
            CompositeKey::from(1i64)
        );
        assert_eq!(
            BucketPage::key_at(&data[..], 1, &SERIALIZER, None).unwrap(),
            CompositeKey::from(3i64)
        );
    }

    #[test]
    fn test_entries_count_adjustment() {
        let mut data = leaf_page();
        insert_sorted(&mut data[..], 1, RecordId::new(1, 0), 5);

        BucketPage::increment_entries_count(&mut data[..], 0);
        assert_eq!(BucketPage::entries_count_at(&data[..], 0), 2);
        assert!(BucketPage::has_external_entries(&data[..], 0));

        assert!(!BucketPage::decrement_entries_count(&mut data[..], 0));
        assert!(!BucketPage::has_external_entries(&data[..], 0));
    }

    #[test]
    fn test_create_returns_false_when_full() {
        let mut data = leaf_page();
        let mut value = 0i64;
        loop {
            let key = CompositeKey::from(value);
            let search = BucketPage::find(&data[..], &key, &SERIALIZER, None).unwrap();
            if !BucketPage::create_leaf_entry(
                &mut data[..],
                search.index(),
                &key_bytes(value),
                RecordId::new(1, value),
                value,
            ) {
                break;
            }
            value += 1;
        }

        assert!(value > 100, "page should hold a few hundred entries");
        assert_eq!(BucketPage::size(&data[..]), value as usize);
    }

    #[test]
    fn test_internal_entries_and_neighbor_updates() {
        let mut data = internal_page();

        assert!(BucketPage::add_internal_entry(
            &mut data[..],
            0,
            &key_bytes(20),
            2,
            3,
            true
        ));
        // Insert a separator before: its right child becomes 20's left.
        assert!(BucketPage::add_internal_entry(
            &mut data[..],
            0,
            &key_bytes(10),
            1,
            2,
            true
        ));
        // And one after.
        assert!(BucketPage::add_internal_entry(
            &mut data[..],
            2,
            &key_bytes(30),
            3,
            4,
            true
        ));

        assert_eq!(BucketPage::size(&data[..]), 3);
        for i in 1..BucketPage::size(&data[..]) {
            assert_eq!(
                BucketPage::right_child(&data[..], i - 1),
                BucketPage::left_child(&data[..], i),
                "neighbor coherence at {i}"
            );
        }
    }

    #[test]
    fn test_shrink_compacts_records() {
        let mut data = leaf_page();
        for value in 0..10i64 {
            insert_sorted(&mut data[..], value, RecordId::new(1, value), value);
        }

        let free_before = BucketPage::free_space(&data[..]);
        BucketPage::shrink(&mut data[..], 4);

        assert_eq!(BucketPage::size(&data[..]), 4);
        assert!(BucketPage::free_space(&data[..]) > free_before);
        for value in 0..4i64 {
            assert_eq!(
                BucketPage::key_at(&data[..], value as usize, &SERIALIZER, None).unwrap(),
                CompositeKey::from(value)
            );
        }
    }

    #[test]
    fn test_raw_entries_survive_copy() {
        let mut data = leaf_page();
        for value in 0..6i64 {
            insert_sorted(&mut data[..], value, RecordId::new(1, value), value + 100);
        }

        let records: Vec<Vec<u8>> =
            (3..6).map(|i| BucketPage::raw_entry(&data[..], i)).collect();

        let mut right = leaf_page();
        BucketPage::add_raw_entries(&mut right[..], &records);

        assert_eq!(BucketPage::size(&right[..]), 3);
        for (slot, value) in (3i64..6).enumerate() {
            let entry = BucketPage::leaf_entry(&right[..], slot);
            assert_eq!(entry.m_id, value + 100);
            assert_eq!(entry.embedded, vec![RecordId::new(1, value)]);
        }
    }
}
