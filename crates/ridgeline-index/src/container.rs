//! Overflow container: a side tree spilling per-entry record id bags.
//!
//! An independent ordered map over fixed 18-byte keys
//! `(m_id, cluster_id, cluster_position)`, used as a set: presence means
//! the record id belongs to the leaf entry tagged with that m-id. Leaves
//! are sorted fixed-stride arrays chained through right siblings; the root
//! is fixed at page 0 and re-initialized in place when it splits. Pages
//! are reused, never freed, and removals do not rebalance.

use ridgeline_cache::{AtomicOperation, PageCache};
use ridgeline_common::page::{PageHeader, PageId, PageType, PAGE_SIZE};
use ridgeline_common::rid::RecordId;
use ridgeline_common::Result;
use std::sync::Arc;
use tracing::debug;

const ROOT_INDEX: u32 = 0;
const NO_SIBLING: i64 = -1;

const SIZE_OFFSET: usize = PageHeader::SIZE;
const RIGHT_SIBLING_OFFSET: usize = SIZE_OFFSET + 2;
const LEAF_KEYS_OFFSET: usize = RIGHT_SIBLING_OFFSET + 8;

const KEY_SIZE: usize = 18;
const LEAF_CAPACITY: usize = (PAGE_SIZE - LEAF_KEYS_OFFSET) / KEY_SIZE;

const CHILDREN_OFFSET: usize = SIZE_OFFSET + 2;
const INTERNAL_STRIDE: usize = KEY_SIZE + 4;
const INTERNAL_CAPACITY: usize = (PAGE_SIZE - CHILDREN_OFFSET - 4) / INTERNAL_STRIDE;

/// Key of one overflow row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContainerKey {
    /// The owning leaf entry's m-id.
    pub m_id: i64,
    /// Cluster of the spilled record id.
    pub cluster_id: i16,
    /// Position of the spilled record id.
    pub cluster_position: i64,
}

impl ContainerKey {
    /// Creates a key for the record id spilled from the entry `m_id`.
    pub fn new(m_id: i64, rid: RecordId) -> Self {
        Self {
            m_id,
            cluster_id: rid.cluster_id,
            cluster_position: rid.cluster_position,
        }
    }

    /// Returns the spilled record id.
    pub fn rid(&self) -> RecordId {
        RecordId::new(self.cluster_id, self.cluster_position)
    }

    fn write_to(&self, data: &mut [u8], offset: usize) {
        data[offset..offset + 8].copy_from_slice(&self.m_id.to_le_bytes());
        data[offset + 8..offset + 10].copy_from_slice(&self.cluster_id.to_le_bytes());
        data[offset + 10..offset + 18].copy_from_slice(&self.cluster_position.to_le_bytes());
    }

    fn read_from(data: &[u8], offset: usize) -> Self {
        Self {
            m_id: i64::from_le_bytes(data[offset..offset + 8].try_into().unwrap()),
            cluster_id: i16::from_le_bytes([data[offset + 8], data[offset + 9]]),
            cluster_position: i64::from_le_bytes(
                data[offset + 10..offset + 18].try_into().unwrap(),
            ),
        }
    }
}

struct LeafView;

impl LeafView {
    fn init(data: &mut [u8], page_id: PageId) {
        let header = PageHeader::new(page_id, PageType::ContainerLeaf);
        data[..PageHeader::SIZE].copy_from_slice(&header.to_bytes());
        Self::set_size(data, 0);
        Self::set_right_sibling(data, NO_SIBLING);
    }

    fn is_leaf(data: &[u8]) -> bool {
        PageHeader::from_bytes(data).page_type == PageType::ContainerLeaf
    }

    fn size(data: &[u8]) -> usize {
        u16::from_le_bytes([data[SIZE_OFFSET], data[SIZE_OFFSET + 1]]) as usize
    }

    fn set_size(data: &mut [u8], size: usize) {
        data[SIZE_OFFSET..SIZE_OFFSET + 2].copy_from_slice(&(size as u16).to_le_bytes());
    }

    fn right_sibling(data: &[u8]) -> i64 {
        i64::from_le_bytes(
            data[RIGHT_SIBLING_OFFSET..RIGHT_SIBLING_OFFSET + 8]
                .try_into()
                .unwrap(),
        )
    }

    fn set_right_sibling(data: &mut [u8], sibling: i64) {
        data[RIGHT_SIBLING_OFFSET..RIGHT_SIBLING_OFFSET + 8]
            .copy_from_slice(&sibling.to_le_bytes());
    }

    fn key_at(data: &[u8], index: usize) -> ContainerKey {
        ContainerKey::read_from(data, LEAF_KEYS_OFFSET + index * KEY_SIZE)
    }

    fn search(data: &[u8], key: &ContainerKey) -> std::result::Result<usize, usize> {
        let size = Self::size(data);
        let mut low = 0;
        let mut high = size;
        while low < high {
            let mid = low + (high - low) / 2;
            match Self::key_at(data, mid).cmp(key) {
                std::cmp::Ordering::Equal => return Ok(mid),
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
            }
        }
        Err(low)
    }

    fn insert_at(data: &mut [u8], index: usize, key: &ContainerKey) {
        let size = Self::size(data);
        let start = LEAF_KEYS_OFFSET + index * KEY_SIZE;
        let end = LEAF_KEYS_OFFSET + size * KEY_SIZE;
        data.copy_within(start..end, start + KEY_SIZE);
        key.write_to(data, start);
        Self::set_size(data, size + 1);
    }

    fn remove_at(data: &mut [u8], index: usize) {
        let size = Self::size(data);
        let start = LEAF_KEYS_OFFSET + index * KEY_SIZE;
        let end = LEAF_KEYS_OFFSET + size * KEY_SIZE;
        data.copy_within(start + KEY_SIZE..end, start);
        Self::set_size(data, size - 1);
    }
}

struct InternalView;

impl InternalView {
    fn init(data: &mut [u8], page_id: PageId) {
        let header = PageHeader::new(page_id, PageType::ContainerInternal);
        data[..PageHeader::SIZE].copy_from_slice(&header.to_bytes());
        Self::set_size(data, 0);
    }

    fn size(data: &[u8]) -> usize {
        u16::from_le_bytes([data[SIZE_OFFSET], data[SIZE_OFFSET + 1]]) as usize
    }

    fn set_size(data: &mut [u8], size: usize) {
        data[SIZE_OFFSET..SIZE_OFFSET + 2].copy_from_slice(&(size as u16).to_le_bytes());
    }

    fn child_at(data: &[u8], index: usize) -> u32 {
        let offset = CHILDREN_OFFSET + index * INTERNAL_STRIDE;
        u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
    }

    fn set_child(data: &mut [u8], index: usize, child: u32) {
        let offset = CHILDREN_OFFSET + index * INTERNAL_STRIDE;
        data[offset..offset + 4].copy_from_slice(&child.to_le_bytes());
    }

    fn key_at(data: &[u8], index: usize) -> ContainerKey {
        ContainerKey::read_from(data, CHILDREN_OFFSET + 4 + index * INTERNAL_STRIDE)
    }

    fn set_key(data: &mut [u8], index: usize, key: &ContainerKey) {
        key.write_to(data, CHILDREN_OFFSET + 4 + index * INTERNAL_STRIDE);
    }

    /// Returns the child index covering `key`: separators at or below the
    /// key send the search right.
    fn child_index_for(data: &[u8], key: &ContainerKey) -> usize {
        let size = Self::size(data);
        let mut low = 0;
        let mut high = size;
        while low < high {
            let mid = low + (high - low) / 2;
            if Self::key_at(data, mid) <= *key {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low
    }

    /// Inserts a separator and its right child at key position `index`.
    fn insert_at(data: &mut [u8], index: usize, key: &ContainerKey, right_child: u32) {
        let size = Self::size(data);
        let start = CHILDREN_OFFSET + 4 + index * INTERNAL_STRIDE;
        let end = CHILDREN_OFFSET + 4 + size * INTERNAL_STRIDE;
        data.copy_within(start..end, start + INTERNAL_STRIDE);
        Self::set_key(data, index, key);
        Self::set_child(data, index + 1, right_child);
        Self::set_size(data, size + 1);
    }
}

/// The overflow container over its own file.
pub struct OverflowContainer {
    name: String,
    file_id: u32,
    cache: Arc<PageCache>,
}

impl OverflowContainer {
    /// Creates the container file with an empty root leaf.
    pub fn create(cache: Arc<PageCache>, name: &str, operation: &AtomicOperation) -> Result<Self> {
        let file_id = cache.add_file(name)?;
        let root = cache.add_page(operation, file_id)?;
        LeafView::init(&mut root.data_mut()[..], root.page_id());
        drop(root);

        debug!(container = name, file = file_id, "overflow container created");
        Ok(Self {
            name: name.to_string(),
            file_id,
            cache,
        })
    }

    /// Opens an existing container file.
    pub fn load(cache: Arc<PageCache>, name: &str) -> Result<Self> {
        let file_id = cache.open_file(name)?;
        Ok(Self {
            name: name.to_string(),
            file_id,
            cache,
        })
    }

    /// Returns the container's file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flushes and closes the container file.
    pub fn close(&self) -> Result<()> {
        self.cache.close_file(self.file_id)
    }

    /// Deletes the container file.
    pub fn delete(&self) -> Result<()> {
        self.cache.delete_file(self.file_id)
    }

    fn descend_to_leaf(&self, key: &ContainerKey) -> Result<(u32, Vec<(u32, usize)>)> {
        let mut path = Vec::new();
        let mut page = ROOT_INDEX;

        loop {
            let guard = self.cache.load_for_read(self.file_id, page)?;
            let data = guard.data();
            if LeafView::is_leaf(&data[..]) {
                return Ok((page, path));
            }
            let child_index = InternalView::child_index_for(&data[..], key);
            let child = InternalView::child_at(&data[..], child_index);
            path.push((page, child_index));
            drop(data);
            page = child;
        }
    }

    /// Inserts a key if absent. Returns true when an insert happened,
    /// false when the key was already present.
    pub fn validated_put(&self, operation: &AtomicOperation, key: ContainerKey) -> Result<bool> {
        let (leaf_index, path) = self.descend_to_leaf(&key)?;

        let guard = self.cache.load_for_write(operation, self.file_id, leaf_index)?;
        let mut data = guard.data_mut();

        let insert_at = match LeafView::search(&data[..], &key) {
            Ok(_) => return Ok(false),
            Err(pos) => pos,
        };

        if LeafView::size(&data[..]) < LEAF_CAPACITY {
            LeafView::insert_at(&mut data[..], insert_at, &key);
            return Ok(true);
        }

        drop(data);
        drop(guard);
        self.split_leaf(operation, leaf_index, path, &key)?;
        Ok(true)
    }

    /// Returns true when the key is present.
    pub fn contains(&self, key: ContainerKey) -> Result<bool> {
        let (leaf_index, _) = self.descend_to_leaf(&key)?;
        let guard = self.cache.load_for_read(self.file_id, leaf_index)?;
        let data = guard.data();
        Ok(LeafView::search(&data[..], &key).is_ok())
    }

    /// Removes a key. Returns true when it was present.
    pub fn remove(&self, operation: &AtomicOperation, key: ContainerKey) -> Result<bool> {
        let (leaf_index, _path) = self.descend_to_leaf(&key)?;

        let guard = self.cache.load_for_write(operation, self.file_id, leaf_index)?;
        let mut data = guard.data_mut();

        match LeafView::search(&data[..], &key) {
            Ok(pos) => {
                LeafView::remove_at(&mut data[..], pos);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Returns every record id spilled under `m_id`, in key order.
    pub fn values_for(&self, m_id: i64) -> Result<Vec<RecordId>> {
        let lower = ContainerKey {
            m_id,
            cluster_id: i16::MIN,
            cluster_position: i64::MIN,
        };
        let (leaf_index, _) = self.descend_to_leaf(&lower)?;

        let mut values = Vec::new();
        let mut page = leaf_index as i64;
        let mut start = {
            let guard = self.cache.load_for_read(self.file_id, leaf_index)?;
            let data = guard.data();
            match LeafView::search(&data[..], &lower) {
                Ok(pos) | Err(pos) => pos,
            }
        };

        while page >= 0 {
            let guard = self.cache.load_for_read(self.file_id, page as u32)?;
            let data = guard.data();
            let size = LeafView::size(&data[..]);

            for i in start..size {
                let key = LeafView::key_at(&data[..], i);
                match key.m_id.cmp(&m_id) {
                    std::cmp::Ordering::Less => continue,
                    std::cmp::Ordering::Equal => values.push(key.rid()),
                    std::cmp::Ordering::Greater => return Ok(values),
                }
            }

            page = LeafView::right_sibling(&data[..]);
            start = 0;
        }

        Ok(values)
    }

    fn split_leaf(
        &self,
        operation: &AtomicOperation,
        leaf_index: u32,
        path: Vec<(u32, usize)>,
        pending: &ContainerKey,
    ) -> Result<()> {
        let guard = self.cache.load_for_write(operation, self.file_id, leaf_index)?;
        let mut data = guard.data_mut();

        let size = LeafView::size(&data[..]);
        let mid = size / 2;
        let separator = LeafView::key_at(&data[..], mid);
        let right_keys: Vec<ContainerKey> =
            (mid..size).map(|i| LeafView::key_at(&data[..], i)).collect();

        if leaf_index == ROOT_INDEX {
            // Root split: the root page index never changes, so both halves
            // move to fresh pages and the root becomes internal.
            let left_guard = self.cache.add_page(operation, self.file_id)?;
            let right_guard = self.cache.add_page(operation, self.file_id)?;
            let left_index = left_guard.page_id().page_index;
            let right_index = right_guard.page_id().page_index;

            {
                let mut left = left_guard.data_mut();
                LeafView::init(&mut left[..], left_guard.page_id());
                for i in 0..mid {
                    let key = LeafView::key_at(&data[..], i);
                    LeafView::insert_at(&mut left[..], i, &key);
                }
                LeafView::set_right_sibling(&mut left[..], right_index as i64);
            }
            {
                let mut right = right_guard.data_mut();
                LeafView::init(&mut right[..], right_guard.page_id());
                for (i, key) in right_keys.iter().enumerate() {
                    LeafView::insert_at(&mut right[..], i, key);
                }
            }

            InternalView::init(&mut data[..], PageId::new(self.file_id, ROOT_INDEX));
            InternalView::set_child(&mut data[..], 0, left_index);
            InternalView::insert_at(&mut data[..], 0, &separator, right_index);
            drop(data);
            drop(guard);

            let target = if *pending < separator { left_index } else { right_index };
            self.insert_into_leaf(operation, target, pending)?;
            return Ok(());
        }

        let right_guard = self.cache.add_page(operation, self.file_id)?;
        let right_index = right_guard.page_id().page_index;
        {
            let mut right = right_guard.data_mut();
            LeafView::init(&mut right[..], right_guard.page_id());
            for (i, key) in right_keys.iter().enumerate() {
                LeafView::insert_at(&mut right[..], i, key);
            }
            LeafView::set_right_sibling(&mut right[..], LeafView::right_sibling(&data[..]));
        }

        LeafView::set_size(&mut data[..], mid);
        LeafView::set_right_sibling(&mut data[..], right_index as i64);
        drop(data);
        drop(guard);

        let target = if *pending < separator { leaf_index } else { right_index };
        self.insert_into_leaf(operation, target, pending)?;

        self.insert_into_parent(operation, path, separator, right_index)
    }

    fn insert_into_leaf(
        &self,
        operation: &AtomicOperation,
        leaf_index: u32,
        key: &ContainerKey,
    ) -> Result<()> {
        let guard = self.cache.load_for_write(operation, self.file_id, leaf_index)?;
        let mut data = guard.data_mut();
        if let Err(pos) = LeafView::search(&data[..], key) {
            LeafView::insert_at(&mut data[..], pos, key);
        }
        Ok(())
    }

    fn insert_into_parent(
        &self,
        operation: &AtomicOperation,
        mut path: Vec<(u32, usize)>,
        mut separator: ContainerKey,
        mut right_child: u32,
    ) -> Result<()> {
        while let Some((page, key_index)) = path.pop() {
            let guard = self.cache.load_for_write(operation, self.file_id, page)?;
            let mut data = guard.data_mut();

            if InternalView::size(&data[..]) < INTERNAL_CAPACITY {
                InternalView::insert_at(&mut data[..], key_index, &separator, right_child);
                return Ok(());
            }

            // Split this internal node; the middle separator moves up.
            let size = InternalView::size(&data[..]);
            let mid = size / 2;
            let promoted = InternalView::key_at(&data[..], mid);

            let right_keys: Vec<ContainerKey> =
                (mid + 1..size).map(|i| InternalView::key_at(&data[..], i)).collect();
            let right_children: Vec<u32> =
                (mid + 1..=size).map(|i| InternalView::child_at(&data[..], i)).collect();

            let new_right_guard = self.cache.add_page(operation, self.file_id)?;
            let new_right_index = new_right_guard.page_id().page_index;
            {
                let mut right = new_right_guard.data_mut();
                InternalView::init(&mut right[..], new_right_guard.page_id());
                InternalView::set_child(&mut right[..], 0, right_children[0]);
                for (i, key) in right_keys.iter().enumerate() {
                    InternalView::insert_at(&mut right[..], i, key, right_children[i + 1]);
                }
            }

            if page == ROOT_INDEX {
                // Move the left half out as well and keep the root in place.
                let left_keys: Vec<ContainerKey> =
                    (0..mid).map(|i| InternalView::key_at(&data[..], i)).collect();
                let left_children: Vec<u32> =
                    (0..=mid).map(|i| InternalView::child_at(&data[..], i)).collect();

                let new_left_guard = self.cache.add_page(operation, self.file_id)?;
                let new_left_index = new_left_guard.page_id().page_index;
                {
                    let mut left = new_left_guard.data_mut();
                    InternalView::init(&mut left[..], new_left_guard.page_id());
                    InternalView::set_child(&mut left[..], 0, left_children[0]);
                    for (i, key) in left_keys.iter().enumerate() {
                        InternalView::insert_at(&mut left[..], i, key, left_children[i + 1]);
                    }
                }

                InternalView::init(&mut data[..], PageId::new(self.file_id, ROOT_INDEX));
                InternalView::set_child(&mut data[..], 0, new_left_index);
                InternalView::insert_at(&mut data[..], 0, &promoted, new_right_index);
                drop(data);
                drop(guard);

                let (target, position) = if key_index <= mid {
                    (new_left_index, key_index)
                } else {
                    (new_right_index, key_index - mid - 1)
                };
                let target_guard = self.cache.load_for_write(operation, self.file_id, target)?;
                let mut target_data = target_guard.data_mut();
                InternalView::insert_at(&mut target_data[..], position, &separator, right_child);
                return Ok(());
            }

            InternalView::set_size(&mut data[..], mid);
            drop(data);
            drop(guard);

            let (target, position) = if key_index <= mid {
                (page, key_index)
            } else {
                (new_right_index, key_index - mid - 1)
            };
            let target_guard = self.cache.load_for_write(operation, self.file_id, target)?;
            let mut target_data = target_guard.data_mut();
            InternalView::insert_at(&mut target_data[..], position, &separator, right_child);
            drop(target_data);

            separator = promoted;
            right_child = new_right_index;
        }

        Ok(())
    }
}
