//! The multi-value tree engine.
//!
//! Maps composite keys to bags of record ids. The tree descends from a
//! fixed root page through slotted buckets; leaves chain to their siblings
//! so equal-key runs that straddle bucket boundaries can be walked in both
//! directions. Every public mutation runs under the atomic-operation
//! manager's per-tree write lock, the tree's own latch, and an atomic
//! operation that is rolled back on any error.

use crate::bucket::{decode_stored_key, AppendOutcome, BucketPage, RemoveOutcome, SlotSearch};
use crate::constants::{
    CONTAINER_FILE_EXTENSION, DATA_FILE_EXTENSION, ENTRY_POINT_INDEX, M_ID_BATCH_SIZE,
    NULL_FILE_EXTENSION, ROOT_INDEX,
};
use crate::container::{ContainerKey, OverflowContainer};
use crate::cursor::{CursorBackward, CursorForward, KeyCursor, RangeCursor};
use crate::entry_point::EntryPointPage;
use crate::null_bucket::{NullAppend, NullBucketPage, NullRemove};
use parking_lot::{Mutex, RwLock};
use ridgeline_cache::{AtomicOperation, AtomicOperationManager, PageCache};
use ridgeline_common::key::{CompositeKey, Encryption, KeyItem, KeySerializer};
use ridgeline_common::page::PageId;
use ridgeline_common::rid::RecordId;
use ridgeline_common::{Result, RidgelineError};
use ridgeline_wal::{ComponentOperation, PutOperation, RemoveEntryOperation};
use std::sync::Arc;
use tracing::{debug, trace};

/// Tree-level configuration.
#[derive(Debug, Clone)]
pub struct MultiValueIndexConfig {
    /// Arity of composite keys stored in this tree.
    pub key_size: usize,
    /// Maximum serialized key size in bytes.
    pub max_key_size: usize,
    /// Maximum descent depth before the tree is declared corrupted.
    pub max_depth: usize,
    /// Upper bound applied to cursor prefetch sizes.
    pub cursor_prefetch_limit: usize,
}

impl Default for MultiValueIndexConfig {
    fn default() -> Self {
        Self {
            key_size: 1,
            max_key_size: 4096,
            max_depth: 64,
            cursor_prefetch_limit: 4096,
        }
    }
}

impl MultiValueIndexConfig {
    /// Derives a tree configuration from the storage-wide configuration.
    pub fn from_storage(config: &ridgeline_common::StorageConfig, key_size: usize) -> Self {
        Self {
            key_size,
            max_key_size: config.max_key_size,
            max_depth: config.max_depth,
            cursor_prefetch_limit: config.cursor_prefetch_limit,
        }
    }
}

/// Which boundary a short composite probe key should be completed toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PartialSearchMode {
    LowestBoundary,
    HighestBoundary,
}

pub(crate) struct BucketSearchResult {
    pub page_index: u32,
    pub search: SlotSearch,
}

struct UpdatePathSearch {
    path: Vec<u32>,
    insertion_indexes: Vec<usize>,
}

enum AddOutcome {
    Inserted,
    AlreadyPresent,
    NeedsSplit { at: usize },
}

/// A paged, durable multi-value B+-tree index.
pub struct MultiValueIndex {
    pub(crate) name: String,
    pub(crate) index_id: i32,
    pub(crate) config: MultiValueIndexConfig,
    pub(crate) serializer: Arc<dyn KeySerializer>,
    pub(crate) encryption: Option<Arc<dyn Encryption>>,
    pub(crate) manager: Arc<AtomicOperationManager>,
    pub(crate) cache: Arc<PageCache>,
    /// The atomic-operation manager's per-tree read/write lock.
    pub(crate) op_lock: Arc<RwLock<()>>,
    /// The tree's own latch, protecting in-memory tree state.
    pub(crate) latch: RwLock<()>,
    pub(crate) file_id: u32,
    pub(crate) null_file_id: u32,
    pub(crate) container: OverflowContainer,
    m_id_counter: Mutex<i64>,
}

impl MultiValueIndex {
    /// Creates the tree's files and initial pages.
    pub fn create(
        manager: Arc<AtomicOperationManager>,
        name: &str,
        index_id: i32,
        serializer: Arc<dyn KeySerializer>,
        encryption: Option<Arc<dyn Encryption>>,
        config: MultiValueIndexConfig,
    ) -> Result<Self> {
        let cache = Arc::clone(manager.cache());
        let op_lock = manager.component_lock(name);
        let _write = op_lock.write();

        let operation = manager.start_operation();
        let result = (|| -> Result<(u32, u32, OverflowContainer, i64)> {
            let file_id = cache.add_file(&format!("{name}{DATA_FILE_EXTENSION}"))?;
            let null_file_id = cache.add_file(&format!("{name}{NULL_FILE_EXTENSION}"))?;

            let entry_point = cache.add_page(&operation, file_id)?;
            EntryPointPage::init(&mut entry_point.data_mut()[..], entry_point.page_id());
            drop(entry_point);

            let root = cache.add_page(&operation, file_id)?;
            BucketPage::init(&mut root.data_mut()[..], root.page_id(), true);
            drop(root);

            let mut counter = 0i64;
            let null_m_id =
                Self::next_m_id(&cache, &operation, file_id, &mut counter)?;

            let null_page = cache.add_page(&operation, null_file_id)?;
            NullBucketPage::init(&mut null_page.data_mut()[..], null_page.page_id(), null_m_id);
            drop(null_page);

            let container = OverflowContainer::create(
                Arc::clone(&cache),
                &format!("{name}{CONTAINER_FILE_EXTENSION}"),
                &operation,
            )?;

            Ok((file_id, null_file_id, container, counter))
        })();

        match result {
            Ok((file_id, null_file_id, container, counter)) => {
                manager.end_operation(operation, false)?;
                debug!(index = name, file = file_id, "multi-value index created");
                drop(_write);
                Ok(Self {
                    name: name.to_string(),
                    index_id,
                    config,
                    serializer,
                    encryption,
                    cache,
                    op_lock: Arc::clone(&op_lock),
                    latch: RwLock::new(()),
                    file_id,
                    null_file_id,
                    container,
                    m_id_counter: Mutex::new(counter),
                    manager,
                })
            }
            Err(error) => {
                let _ = manager.end_operation(operation, true);
                Err(error)
            }
        }
    }

    /// Opens an existing tree, restoring the m-id counter from the entry
    /// point's persisted high-water mark.
    pub fn load(
        manager: Arc<AtomicOperationManager>,
        name: &str,
        index_id: i32,
        serializer: Arc<dyn KeySerializer>,
        encryption: Option<Arc<dyn Encryption>>,
        config: MultiValueIndexConfig,
    ) -> Result<Self> {
        let cache = Arc::clone(manager.cache());
        let op_lock = manager.component_lock(name);
        let _write = op_lock.write();

        let file_id = cache.open_file(&format!("{name}{DATA_FILE_EXTENSION}"))?;
        let null_file_id = cache.open_file(&format!("{name}{NULL_FILE_EXTENSION}"))?;
        let container = OverflowContainer::load(
            Arc::clone(&cache),
            &format!("{name}{CONTAINER_FILE_EXTENSION}"),
        )?;

        let entry_id = {
            let guard = cache.load_for_read(file_id, ENTRY_POINT_INDEX)?;
            let data = guard.data();
            EntryPointPage::entry_id(&data[..])
        };

        debug!(index = name, entry_id, "multi-value index loaded");
        drop(_write);

        Ok(Self {
            name: name.to_string(),
            index_id,
            config,
            serializer,
            encryption,
            cache,
            op_lock: Arc::clone(&op_lock),
            latch: RwLock::new(()),
            file_id,
            null_file_id,
            container,
            m_id_counter: Mutex::new(entry_id),
            manager,
        })
    }

    /// Returns the tree's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    // ------------------------------------------------------------------
    // Key encoding
    // ------------------------------------------------------------------

    fn encode_stored_key(&self, key: &CompositeKey) -> Result<Vec<u8>> {
        let plain = self.serializer.serialize(key);
        if plain.len() > self.config.max_key_size {
            return Err(RidgelineError::KeyTooLarge {
                size: plain.len(),
                max: self.config.max_key_size,
                index: self.name.clone(),
            });
        }

        match &self.encryption {
            None => Ok(plain),
            Some(enc) => {
                let cipher = enc.encrypt(&plain);
                let mut stored = Vec::with_capacity(4 + cipher.len());
                stored.extend_from_slice(&(cipher.len() as u32).to_le_bytes());
                stored.extend_from_slice(&cipher);
                Ok(stored)
            }
        }
    }

    pub(crate) fn decode_key(&self, raw: &[u8]) -> Result<CompositeKey> {
        decode_stored_key(raw, self.serializer.as_ref(), self.encryption.as_deref())
    }

    pub(crate) fn enhance_composite_key(
        &self,
        key: &CompositeKey,
        mode: PartialSearchMode,
    ) -> CompositeKey {
        if self.config.key_size == 1 || key.arity() >= self.config.key_size {
            return key.clone();
        }
        let pad = match mode {
            PartialSearchMode::LowestBoundary => KeyItem::AlwaysLess,
            PartialSearchMode::HighestBoundary => KeyItem::AlwaysGreater,
        };
        key.completed_to(self.config.key_size, pad)
    }

    // ------------------------------------------------------------------
    // Counters
    // ------------------------------------------------------------------

    fn next_m_id(
        cache: &PageCache,
        operation: &AtomicOperation,
        file_id: u32,
        counter: &mut i64,
    ) -> Result<i64> {
        // Persist the high-water mark once per batch so recovery resumes
        // from an upper bound of every id handed out.
        if *counter & (M_ID_BATCH_SIZE - 1) == 0 {
            let guard = cache.load_for_write(operation, file_id, ENTRY_POINT_INDEX)?;
            let mut data = guard.data_mut();
            EntryPointPage::set_entry_id(&mut data[..], *counter + M_ID_BATCH_SIZE);
        }

        *counter += 1;
        Ok(*counter)
    }

    fn increment_m_id(&self, operation: &AtomicOperation) -> Result<i64> {
        let mut counter = self.m_id_counter.lock();
        Self::next_m_id(&self.cache, operation, self.file_id, &mut counter)
    }

    fn update_size(&self, operation: &AtomicOperation, diff: i64) -> Result<()> {
        let guard = self
            .cache
            .load_for_write(operation, self.file_id, ENTRY_POINT_INDEX)?;
        let mut data = guard.data_mut();
        let size = EntryPointPage::tree_size(&data[..]);
        EntryPointPage::set_tree_size(&mut data[..], size + diff);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Descent
    // ------------------------------------------------------------------

    fn corrupted(&self, reason: &str) -> RidgelineError {
        RidgelineError::TreeCorrupted {
            index: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn find_bucket(&self, key: &CompositeKey) -> Result<BucketSearchResult> {
        let mut page_index = ROOT_INDEX;
        let mut depth = 0usize;

        loop {
            depth += 1;
            if depth > self.config.max_depth {
                return Err(self.corrupted(
                    "descent exceeded the maximum depth; the index needs to be rebuilt",
                ));
            }

            let guard = self.cache.load_for_read(self.file_id, page_index)?;
            let data = guard.data();
            let search = BucketPage::find(
                &data[..],
                key,
                self.serializer.as_ref(),
                self.encryption.as_deref(),
            )?;

            if BucketPage::is_leaf(&data[..]) {
                return Ok(BucketSearchResult { page_index, search });
            }

            page_index = match search {
                SlotSearch::Found(index) => BucketPage::right_child(&data[..], index),
                SlotSearch::Insertion(index) => {
                    let size = BucketPage::size(&data[..]);
                    if size == 0 {
                        return Err(self.corrupted("internal bucket holds no separators"));
                    }
                    if index >= size {
                        BucketPage::right_child(&data[..], index - 1)
                    } else {
                        BucketPage::left_child(&data[..], index)
                    }
                }
            };
        }
    }

    fn find_bucket_for_update(&self, key: &CompositeKey) -> Result<UpdatePathSearch> {
        let mut page_index = ROOT_INDEX;
        let mut path = Vec::with_capacity(8);
        let mut insertion_indexes = Vec::with_capacity(8);

        loop {
            if path.len() > self.config.max_depth {
                return Err(self.corrupted(
                    "descent exceeded the maximum depth; the index needs to be rebuilt",
                ));
            }

            path.push(page_index);
            let guard = self.cache.load_for_read(self.file_id, page_index)?;
            let data = guard.data();
            let search = BucketPage::find(
                &data[..],
                key,
                self.serializer.as_ref(),
                self.encryption.as_deref(),
            )?;

            if BucketPage::is_leaf(&data[..]) {
                insertion_indexes.push(search.index());
                return Ok(UpdatePathSearch {
                    path,
                    insertion_indexes,
                });
            }

            match search {
                SlotSearch::Found(index) => {
                    page_index = BucketPage::right_child(&data[..], index);
                    insertion_indexes.push(index + 1);
                }
                SlotSearch::Insertion(index) => {
                    let size = BucketPage::size(&data[..]);
                    if size == 0 {
                        return Err(self.corrupted("internal bucket holds no separators"));
                    }
                    page_index = if index >= size {
                        BucketPage::right_child(&data[..], index - 1)
                    } else {
                        BucketPage::left_child(&data[..], index)
                    };
                    insertion_indexes.push(index);
                }
            }
        }
    }

    /// Finds the left-most occupied leaf slot, skipping empty buckets.
    pub(crate) fn first_item(&self) -> Result<Option<(u32, usize)>> {
        let mut path: Vec<(u32, usize)> = Vec::new();
        let mut bucket_index = ROOT_INDEX;
        let mut item_index = 0usize;

        loop {
            let guard = self.cache.load_for_read(self.file_id, bucket_index)?;
            let data = guard.data();
            let size = BucketPage::size(&data[..]);

            if !BucketPage::is_leaf(&data[..]) {
                if size == 0 || item_index > size {
                    match path.pop() {
                        Some((page, item)) => {
                            bucket_index = page;
                            item_index = item + 1;
                        }
                        None => return Ok(None),
                    }
                } else {
                    path.push((bucket_index, item_index));
                    bucket_index = if item_index < size {
                        BucketPage::left_child(&data[..], item_index)
                    } else {
                        BucketPage::right_child(&data[..], item_index - 1)
                    };
                    item_index = 0;
                }
            } else if size == 0 {
                match path.pop() {
                    Some((page, item)) => {
                        bucket_index = page;
                        item_index = item + 1;
                    }
                    None => return Ok(None),
                }
            } else {
                return Ok(Some((bucket_index, 0)));
            }
        }
    }

    /// Finds the right-most occupied leaf slot, skipping empty buckets.
    pub(crate) fn last_item(&self) -> Result<Option<(u32, usize)>> {
        let mut path: Vec<(u32, i64)> = Vec::new();
        let mut bucket_index = ROOT_INDEX;
        // None means "start from the last entry of the next bucket".
        let mut item_index: Option<i64> = None;

        loop {
            let guard = self.cache.load_for_read(self.file_id, bucket_index)?;
            let data = guard.data();
            let size = BucketPage::size(&data[..]) as i64;
            let item = item_index.unwrap_or(size - 1);

            if !BucketPage::is_leaf(&data[..]) {
                if item < -1 {
                    match path.pop() {
                        Some((page, parent_item)) => {
                            bucket_index = page;
                            item_index = Some(parent_item - 1);
                        }
                        None => return Ok(None),
                    }
                } else {
                    path.push((bucket_index, item));
                    bucket_index = if item > -1 {
                        BucketPage::right_child(&data[..], item as usize)
                    } else {
                        BucketPage::left_child(&data[..], 0)
                    };
                    item_index = None;
                }
            } else if size == 0 {
                match path.pop() {
                    Some((page, parent_item)) => {
                        bucket_index = page;
                        item_index = Some(parent_item - 1);
                    }
                    None => return Ok(None),
                }
            } else {
                return Ok(Some((bucket_index, size as usize - 1)));
            }
        }
    }

    // ------------------------------------------------------------------
    // put
    // ------------------------------------------------------------------

    /// Adds a record id to the bag stored under `key` (None = null key).
    pub fn put(&self, key: Option<&CompositeKey>, rid: RecordId) -> Result<()> {
        let _op_lock = self.op_lock.write();
        let operation = self.manager.start_operation();

        let result = (|| -> Result<()> {
            let _latch = self.latch.write();
            match key {
                Some(key) => self.put_key(&operation, key, rid),
                None => self.put_null(&operation, rid),
            }
        })();

        match result {
            Ok(()) => self.manager.end_operation(operation, false),
            Err(error) => {
                let _ = self.manager.end_operation(operation, true);
                Err(error)
            }
        }
    }

    /// Adds `rid` under `key` only when the key holds no record id yet.
    ///
    /// Returns the record id already stored under the key when one exists,
    /// leaving the bag untouched. The probe and the insert run under the
    /// same write latch, so no concurrent writer can slip a record id in
    /// between them.
    pub fn put_if_absent(
        &self,
        key: Option<&CompositeKey>,
        rid: RecordId,
    ) -> Result<Option<RecordId>> {
        let _op_lock = self.op_lock.write();
        let operation = self.manager.start_operation();

        let result = (|| -> Result<Option<RecordId>> {
            let _latch = self.latch.write();

            let existing = match key {
                Some(key) => self.get_key(key)?,
                None => self.get_null()?,
            };
            if let Some(first) = existing.first() {
                return Ok(Some(*first));
            }

            match key {
                Some(key) => self.put_key(&operation, key, rid)?,
                None => self.put_null(&operation, rid)?,
            }
            Ok(None)
        })();

        match result {
            Ok(outcome) => {
                self.manager.end_operation(operation, false)?;
                Ok(outcome)
            }
            Err(error) => {
                let _ = self.manager.end_operation(operation, true);
                Err(error)
            }
        }
    }

    fn put_key(&self, operation: &AtomicOperation, key: &CompositeKey, rid: RecordId) -> Result<()> {
        let key = self.serializer.preprocess(key.clone());
        let stored_key = self.encode_stored_key(&key)?;

        let descent = self.find_bucket_for_update(&key)?;
        let mut path = descent.path;
        let mut insertion_indexes = descent.insertion_indexes;
        let mut leaf_index = *path.last().ok_or_else(|| self.corrupted("empty descent path"))?;

        let inserted = loop {
            match self.add_entry(operation, leaf_index, &key, &stored_key, rid)? {
                AddOutcome::Inserted => break true,
                AddOutcome::AlreadyPresent => break false,
                AddOutcome::NeedsSplit { at } => {
                    let (new_path, new_indexes, _) =
                        self.split_bucket(operation, &path, &insertion_indexes, at, &key)?;
                    path = new_path;
                    insertion_indexes = new_indexes;
                    leaf_index =
                        *path.last().ok_or_else(|| self.corrupted("empty split path"))?;
                }
            }
        };

        if inserted {
            self.update_size(operation, 1)?;
        }

        // The component record is emitted even when the container de-duped
        // the insert; replay passes through the same validation.
        operation.add_component_operation(ComponentOperation::Put(PutOperation {
            index_id: self.index_id,
            serializer_id: self.serializer.id(),
            encryption_name: self.encryption.as_ref().map(|e| e.name().to_string()),
            key: Some(stored_key),
            rid,
        }));

        Ok(())
    }

    fn put_null(&self, operation: &AtomicOperation, rid: RecordId) -> Result<()> {
        let guard = self
            .cache
            .load_for_write(operation, self.null_file_id, 0)?;
        let mut data = guard.data_mut();

        let inserted = match NullBucketPage::add_rid(&mut data[..], rid) {
            NullAppend::Embedded => true,
            NullAppend::Duplicate => false,
            NullAppend::RequiresOverflow(m_id) => {
                let inserted = self
                    .container
                    .validated_put(operation, ContainerKey::new(m_id, rid))?;
                if inserted {
                    NullBucketPage::increment_size(&mut data[..]);
                }
                inserted
            }
        };
        drop(data);
        drop(guard);

        if inserted {
            self.update_size(operation, 1)?;
        }

        operation.add_component_operation(ComponentOperation::Put(PutOperation {
            index_id: self.index_id,
            serializer_id: self.serializer.id(),
            encryption_name: self.encryption.as_ref().map(|e| e.name().to_string()),
            key: None,
            rid,
        }));

        Ok(())
    }

    /// Adds a record id into the leaf, creating or appending to an entry of
    /// the equal-key run.
    fn add_entry(
        &self,
        operation: &AtomicOperation,
        leaf_index: u32,
        key: &CompositeKey,
        stored_key: &[u8],
        rid: RecordId,
    ) -> Result<AddOutcome> {
        let guard = self
            .cache
            .load_for_write(operation, self.file_id, leaf_index)?;
        let mut data = guard.data_mut();

        let search = BucketPage::find(
            &data[..],
            key,
            self.serializer.as_ref(),
            self.encryption.as_deref(),
        )?;

        let index = match search {
            SlotSearch::Insertion(index) => index,
            SlotSearch::Found(found) => {
                let (run_start, run_end) = self.equal_run(&data[..], found, key)?;

                // Duplicate check across the whole run first: the record id
                // may already sit in another entry's inline region or in
                // its overflow rows.
                for slot in run_start..run_end {
                    let entry = BucketPage::leaf_entry(&data[..], slot);
                    if entry.embedded.contains(&rid) {
                        return Ok(AddOutcome::AlreadyPresent);
                    }
                    if (entry.embedded.len() as u32) < entry.entries_count
                        && self.container.contains(ContainerKey::new(entry.m_id, rid))?
                    {
                        return Ok(AddOutcome::AlreadyPresent);
                    }
                }

                for slot in run_start..run_end {
                    match BucketPage::append_leaf_rid(&mut data[..], slot, rid) {
                        AppendOutcome::Embedded => return Ok(AddOutcome::Inserted),
                        AppendOutcome::Duplicate => return Ok(AddOutcome::AlreadyPresent),
                        AppendOutcome::RequiresOverflow(m_id) => {
                            let inserted = self
                                .container
                                .validated_put(operation, ContainerKey::new(m_id, rid))?;
                            if inserted {
                                BucketPage::increment_entries_count(&mut data[..], slot);
                                return Ok(AddOutcome::Inserted);
                            }
                            return Ok(AddOutcome::AlreadyPresent);
                        }
                        AppendOutcome::Saturated => continue,
                    }
                }

                // Every entry of the run is saturated: start another entry
                // under the same key.
                found
            }
        };

        let m_id = self.increment_m_id(operation)?;
        if BucketPage::create_leaf_entry(&mut data[..], index, stored_key, rid, m_id) {
            return Ok(AddOutcome::Inserted);
        }

        // Dropped slots leave their records behind; rebuild the page once
        // to reclaim that space before resorting to a split.
        let live = BucketPage::size(&data[..]);
        BucketPage::shrink(&mut data[..], live);
        if BucketPage::create_leaf_entry(&mut data[..], index, stored_key, rid, m_id) {
            Ok(AddOutcome::Inserted)
        } else {
            Ok(AddOutcome::NeedsSplit { at: index })
        }
    }

    /// Expands the run of slots holding keys equal to `key` around `index`.
    fn equal_run(&self, data: &[u8], index: usize, key: &CompositeKey) -> Result<(usize, usize)> {
        let size = BucketPage::size(data);
        let mut start = index;
        while start > 0 {
            let stored = BucketPage::key_at(
                data,
                start - 1,
                self.serializer.as_ref(),
                self.encryption.as_deref(),
            )?;
            if stored != *key {
                break;
            }
            start -= 1;
        }

        let mut end = index + 1;
        while end < size {
            let stored = BucketPage::key_at(
                data,
                end,
                self.serializer.as_ref(),
                self.encryption.as_deref(),
            )?;
            if stored != *key {
                break;
            }
            end += 1;
        }

        Ok((start, end))
    }

    // ------------------------------------------------------------------
    // Split
    // ------------------------------------------------------------------

    /// Allocates the page for a split, reusing a pre-allocated page left
    /// behind by a rolled-back operation when one exists.
    fn allocate_split_page(
        &self,
        operation: &AtomicOperation,
    ) -> Result<ridgeline_cache::PageWriteGuard> {
        let entry_point =
            self.cache
                .load_for_write(operation, self.file_id, ENTRY_POINT_INDEX)?;
        let mut entry_data = entry_point.data_mut();

        let pages_size = EntryPointPage::pages_size(&entry_data[..]);
        let filled = self.cache.filled_up_to(self.file_id)?;
        let next = pages_size + 1;

        let guard = if next < filled {
            self.cache.load_for_write(operation, self.file_id, next)?
        } else {
            self.cache.add_page(operation, self.file_id)?
        };

        EntryPointPage::set_pages_size(&mut entry_data[..], guard.page_id().page_index);
        Ok(guard)
    }

    /// Splits the bucket at the end of `path` and returns the adjusted
    /// descent for the pending key.
    fn split_bucket(
        &self,
        operation: &AtomicOperation,
        path: &[u32],
        insertion_indexes: &[usize],
        key_index: usize,
        key: &CompositeKey,
    ) -> Result<(Vec<u32>, Vec<usize>, usize)> {
        let page_index = *path.last().ok_or_else(|| self.corrupted("empty split path"))?;

        let guard = self
            .cache
            .load_for_write(operation, self.file_id, page_index)?;
        let mut data = guard.data_mut();

        let leaf = BucketPage::is_leaf(&data[..]);
        let size = BucketPage::size(&data[..]);
        if size <= 1 {
            return Err(RidgelineError::InvariantViolation(
                "bucket must hold at least two entries to split".to_string(),
            ));
        }

        let mid = size >> 1;
        let separator_raw = BucketPage::raw_key_at(&data[..], mid);
        let start_right = if leaf { mid } else { mid + 1 };
        let right_entries: Vec<Vec<u8>> = (start_right..size)
            .map(|i| BucketPage::raw_entry(&data[..], i))
            .collect();

        trace!(
            index = self.name.as_str(),
            page = page_index,
            leaf,
            entries = size,
            "splitting bucket"
        );

        if page_index != ROOT_INDEX {
            self.split_non_root_bucket(
                operation,
                path,
                insertion_indexes,
                key_index,
                key,
                page_index,
                &mut data[..],
                leaf,
                mid,
                &separator_raw,
                &right_entries,
            )
        } else {
            self.split_root_bucket(
                operation,
                key_index,
                key,
                &mut data[..],
                leaf,
                mid,
                &separator_raw,
                &right_entries,
            )
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn split_non_root_bucket(
        &self,
        operation: &AtomicOperation,
        path: &[u32],
        insertion_indexes: &[usize],
        key_index: usize,
        key: &CompositeKey,
        page_index: u32,
        data: &mut [u8],
        leaf: bool,
        mid: usize,
        separator_raw: &[u8],
        right_entries: &[Vec<u8>],
    ) -> Result<(Vec<u32>, Vec<usize>, usize)> {
        let right_guard = self.allocate_split_page(operation)?;
        let right_index = right_guard.page_id().page_index;

        {
            let mut right = right_guard.data_mut();
            BucketPage::init(&mut right[..], right_guard.page_id(), leaf);
            BucketPage::add_raw_entries(&mut right[..], right_entries);

            if leaf {
                let old_right = BucketPage::right_sibling(data);
                BucketPage::set_right_sibling(&mut right[..], old_right);
                BucketPage::set_left_sibling(&mut right[..], page_index as i64);

                BucketPage::shrink(data, mid);
                BucketPage::set_right_sibling(data, right_index as i64);

                if old_right >= 0 {
                    let sibling = self.cache.load_for_write(
                        operation,
                        self.file_id,
                        old_right as u32,
                    )?;
                    let mut sibling_data = sibling.data_mut();
                    BucketPage::set_left_sibling(&mut sibling_data[..], right_index as i64);
                }
            } else {
                BucketPage::shrink(data, mid);
            }
        }
        drop(right_guard);

        // Insert the separator into the parent, splitting upward as needed.
        let mut parent_index = path[path.len() - 2];
        let mut insertion_index = insertion_indexes[insertion_indexes.len() - 2];
        let separator_key = self.decode_key(separator_raw)?;

        loop {
            let parent_guard =
                self.cache
                    .load_for_write(operation, self.file_id, parent_index)?;
            let mut parent_data = parent_guard.data_mut();

            if BucketPage::add_internal_entry(
                &mut parent_data[..],
                insertion_index,
                separator_raw,
                page_index,
                right_index,
                true,
            ) {
                break;
            }

            drop(parent_data);
            drop(parent_guard);

            let (parent_path, parent_indexes, parent_item) = self.split_bucket(
                operation,
                &path[..path.len() - 1],
                &insertion_indexes[..insertion_indexes.len() - 1],
                insertion_index,
                &separator_key,
            )?;

            parent_index = *parent_path
                .last()
                .ok_or_else(|| self.corrupted("empty parent split path"))?;
            insertion_index = parent_item;
            let _ = parent_indexes;
        }

        let mut result_path: Vec<u32> = path[..path.len() - 1].to_vec();
        let mut result_indexes: Vec<usize> =
            insertion_indexes[..insertion_indexes.len() - 1].to_vec();

        let to_right = match key_index.cmp(&mid) {
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => leaf && *key == separator_key,
        };

        if to_right {
            let last = result_indexes.len() - 1;
            result_indexes[last] += 1;
            result_path.push(right_index);
            let item = if leaf {
                key_index - mid
            } else {
                key_index - mid - 1
            };
            result_indexes.push(item);
            Ok((result_path, result_indexes, item))
        } else {
            result_path.push(page_index);
            result_indexes.push(key_index);
            Ok((result_path, result_indexes, key_index))
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn split_root_bucket(
        &self,
        operation: &AtomicOperation,
        key_index: usize,
        key: &CompositeKey,
        data: &mut [u8],
        leaf: bool,
        mid: usize,
        separator_raw: &[u8],
        right_entries: &[Vec<u8>],
    ) -> Result<(Vec<u32>, Vec<usize>, usize)> {
        let left_entries: Vec<Vec<u8>> =
            (0..mid).map(|i| BucketPage::raw_entry(data, i)).collect();

        let left_guard = self.allocate_split_page(operation)?;
        let right_guard = self.allocate_split_page(operation)?;
        let left_index = left_guard.page_id().page_index;
        let right_index = right_guard.page_id().page_index;

        {
            let mut left = left_guard.data_mut();
            BucketPage::init(&mut left[..], left_guard.page_id(), leaf);
            BucketPage::add_raw_entries(&mut left[..], &left_entries);
            if leaf {
                BucketPage::set_right_sibling(&mut left[..], right_index as i64);
            }
        }
        {
            let mut right = right_guard.data_mut();
            BucketPage::init(&mut right[..], right_guard.page_id(), leaf);
            BucketPage::add_raw_entries(&mut right[..], right_entries);
            if leaf {
                BucketPage::set_left_sibling(&mut right[..], left_index as i64);
            }
        }

        // The root keeps its page index and becomes internal.
        BucketPage::init(data, PageId::new(self.file_id, ROOT_INDEX), false);
        BucketPage::add_internal_entry(data, 0, separator_raw, left_index, right_index, true);

        let to_right = match key_index.cmp(&mid) {
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => leaf && *key == self.decode_key(separator_raw)?,
        };

        let mut result_path = vec![ROOT_INDEX];
        let mut result_indexes = Vec::with_capacity(2);

        if to_right {
            result_path.push(right_index);
            result_indexes.push(1);
            let item = if leaf {
                key_index - mid
            } else {
                key_index - mid - 1
            };
            result_indexes.push(item);
            Ok((result_path, result_indexes, item))
        } else {
            result_path.push(left_index);
            result_indexes.push(0);
            result_indexes.push(key_index);
            Ok((result_path, result_indexes, key_index))
        }
    }

    // ------------------------------------------------------------------
    // get
    // ------------------------------------------------------------------

    /// Returns every record id stored under `key` (None = null key), in
    /// unspecified order.
    pub fn get(&self, key: Option<&CompositeKey>) -> Result<Vec<RecordId>> {
        let _op_lock = self.op_lock.read();
        let _latch = self.latch.read();

        match key {
            Some(key) => self.get_key(key),
            None => self.get_null(),
        }
    }

    fn get_key(&self, key: &CompositeKey) -> Result<Vec<RecordId>> {
        let key = self.serializer.preprocess(key.clone());

        let descent = self.find_bucket(&key)?;

        let mut result = Vec::with_capacity(8);
        let mut left_sibling = -1i64;
        let mut right_sibling = -1i64;

        {
            let guard = self.cache.load_for_read(self.file_id, descent.page_index)?;
            let data = guard.data();
            let size = BucketPage::size(&data[..]);

            // A miss that is not at a bucket edge proves the key is nowhere:
            // in-bucket neighbors bracket it strictly. A miss at an edge may
            // still have equal-key entries in a sibling.
            let (walk_left, walk_right) = match descent.search {
                SlotSearch::Found(found) => {
                    let (run_start, run_end) = self.equal_run(&data[..], found, &key)?;
                    for slot in run_start..run_end {
                        self.fetch_values(&data[..], slot, &mut result)?;
                    }
                    (run_start == 0, run_end == size)
                }
                SlotSearch::Insertion(index) => (index == 0, index >= size),
            };

            if walk_left {
                left_sibling = BucketPage::left_sibling(&data[..]);
            }
            if walk_right {
                right_sibling = BucketPage::right_sibling(&data[..]);
            }
        }

        while left_sibling >= 0 {
            let guard = self
                .cache
                .load_for_read(self.file_id, left_sibling as u32)?;
            let data = guard.data();
            left_sibling = self.collect_from_tail(&data[..], &key, &mut result)?;
        }

        while right_sibling >= 0 {
            let guard = self
                .cache
                .load_for_read(self.file_id, right_sibling as u32)?;
            let data = guard.data();
            right_sibling = self.collect_from_head(&data[..], &key, &mut result)?;
        }

        Ok(result)
    }

    /// Collects equal-key entries from the tail of a left sibling.
    ///
    /// Returns the next left sibling to visit, or -1 to stop: the walk
    /// continues only past empty buckets and buckets made up entirely of
    /// the probe key.
    fn collect_from_tail(
        &self,
        data: &[u8],
        key: &CompositeKey,
        result: &mut Vec<RecordId>,
    ) -> Result<i64> {
        let size = BucketPage::size(data);
        if size == 0 {
            return Ok(BucketPage::left_sibling(data));
        }

        let last = self.bucket_key_at(data, size - 1)?;
        if last != *key {
            return Ok(-1);
        }

        let (run_start, _) = self.equal_run(data, size - 1, key)?;
        for slot in run_start..size {
            self.fetch_values(data, slot, result)?;
        }

        if run_start == 0 {
            Ok(BucketPage::left_sibling(data))
        } else {
            Ok(-1)
        }
    }

    /// Collects equal-key entries from the head of a right sibling.
    fn collect_from_head(
        &self,
        data: &[u8],
        key: &CompositeKey,
        result: &mut Vec<RecordId>,
    ) -> Result<i64> {
        let size = BucketPage::size(data);
        if size == 0 {
            return Ok(BucketPage::right_sibling(data));
        }

        let first = self.bucket_key_at(data, 0)?;
        if first != *key {
            return Ok(-1);
        }

        let (_, run_end) = self.equal_run(data, 0, key)?;
        for slot in 0..run_end {
            self.fetch_values(data, slot, result)?;
        }

        if run_end == size {
            Ok(BucketPage::right_sibling(data))
        } else {
            Ok(-1)
        }
    }

    pub(crate) fn bucket_key_at(&self, data: &[u8], index: usize) -> Result<CompositeKey> {
        BucketPage::key_at(
            data,
            index,
            self.serializer.as_ref(),
            self.encryption.as_deref(),
        )
    }

    /// Appends every record id of the leaf entry at `slot` to `result`.
    pub(crate) fn fetch_values(
        &self,
        data: &[u8],
        slot: usize,
        result: &mut Vec<RecordId>,
    ) -> Result<()> {
        let entry = BucketPage::leaf_entry(data, slot);
        let embedded = entry.embedded.len() as u32;
        result.extend(entry.embedded.iter().copied());
        if embedded < entry.entries_count {
            result.extend(self.container.values_for(entry.m_id)?);
        }
        Ok(())
    }

    fn get_null(&self) -> Result<Vec<RecordId>> {
        let guard = self.cache.load_for_read(self.null_file_id, 0)?;
        let data = guard.data();

        let mut values = NullBucketPage::embedded_rids(&data[..]);
        let size = NullBucketPage::size(&data[..]) as usize;
        if values.len() < size {
            let m_id = NullBucketPage::m_id(&data[..]);
            values.extend(self.container.values_for(m_id)?);
        }

        Ok(values)
    }

    // ------------------------------------------------------------------
    // remove
    // ------------------------------------------------------------------

    /// Removes one `(key, rid)` association. Returns true when something
    /// was removed.
    pub fn remove(&self, key: Option<&CompositeKey>, rid: RecordId) -> Result<bool> {
        let _op_lock = self.op_lock.write();
        let operation = self.manager.start_operation();

        let result = (|| -> Result<bool> {
            let _latch = self.latch.write();
            match key {
                Some(key) => self.remove_key(&operation, key, rid),
                None => self.remove_null(&operation, rid),
            }
        })();

        match result {
            Ok(removed) => {
                self.manager.end_operation(operation, false)?;
                Ok(removed)
            }
            Err(error) => {
                let _ = self.manager.end_operation(operation, true);
                Err(error)
            }
        }
    }

    fn remove_key(
        &self,
        operation: &AtomicOperation,
        key: &CompositeKey,
        rid: RecordId,
    ) -> Result<bool> {
        let key = self.serializer.preprocess(key.clone());

        let descent = self.find_bucket(&key)?;

        let mut removed = false;
        let mut left_sibling = -1i64;
        let mut right_sibling = -1i64;

        {
            let guard =
                self.cache
                    .load_for_write(operation, self.file_id, descent.page_index)?;
            let mut data = guard.data_mut();
            let size = BucketPage::size(&data[..]);

            let (walk_left, walk_right) = match descent.search {
                SlotSearch::Found(found) => {
                    let (run_start, run_end) = self.equal_run(&data[..], found, &key)?;
                    for slot in run_start..run_end {
                        if self.remove_from_entry(operation, &mut data[..], slot, rid)? {
                            removed = true;
                            break;
                        }
                    }
                    (run_start == 0, run_end == size)
                }
                SlotSearch::Insertion(index) => (index == 0, index >= size),
            };

            if !removed {
                if walk_left {
                    left_sibling = BucketPage::left_sibling(&data[..]);
                }
                if walk_right {
                    right_sibling = BucketPage::right_sibling(&data[..]);
                }
            }
        }

        while !removed && left_sibling >= 0 {
            let guard =
                self.cache
                    .load_for_write(operation, self.file_id, left_sibling as u32)?;
            let mut data = guard.data_mut();
            let (next, done) =
                self.remove_from_tail(operation, &mut data[..], &key, rid)?;
            left_sibling = next;
            removed = done;
        }

        while !removed && right_sibling >= 0 {
            let guard =
                self.cache
                    .load_for_write(operation, self.file_id, right_sibling as u32)?;
            let mut data = guard.data_mut();
            let (next, done) =
                self.remove_from_head(operation, &mut data[..], &key, rid)?;
            right_sibling = next;
            removed = done;
        }

        if removed {
            self.update_size(operation, -1)?;

            let stored_key = self.encode_stored_key(&key)?;
            operation.add_component_operation(ComponentOperation::RemoveEntry(
                RemoveEntryOperation {
                    index_id: self.index_id,
                    serializer_id: self.serializer.id(),
                    encryption_name: self.encryption.as_ref().map(|e| e.name().to_string()),
                    key: Some(stored_key),
                    rid,
                },
            ));
        }

        Ok(removed)
    }

    /// Tries to remove `rid` from the entry at `slot`; drops the slot when
    /// the entry empties.
    fn remove_from_entry(
        &self,
        operation: &AtomicOperation,
        data: &mut [u8],
        slot: usize,
        rid: RecordId,
    ) -> Result<bool> {
        match BucketPage::remove_embedded_rid(data, slot, rid) {
            RemoveOutcome::Removed { remaining } => {
                if remaining == 0 {
                    BucketPage::remove_leaf_entry_at(data, slot);
                }
                Ok(true)
            }
            RemoveOutcome::NotEmbedded => {
                if !BucketPage::has_external_entries(data, slot) {
                    return Ok(false);
                }
                let m_id = BucketPage::m_id_at(data, slot);
                if self
                    .container
                    .remove(operation, ContainerKey::new(m_id, rid))?
                {
                    if BucketPage::decrement_entries_count(data, slot) {
                        BucketPage::remove_leaf_entry_at(data, slot);
                    }
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    fn remove_from_tail(
        &self,
        operation: &AtomicOperation,
        data: &mut [u8],
        key: &CompositeKey,
        rid: RecordId,
    ) -> Result<(i64, bool)> {
        let size = BucketPage::size(data);
        if size == 0 {
            return Ok((BucketPage::left_sibling(data), false));
        }

        let last = self.bucket_key_at(data, size - 1)?;
        if last != *key {
            return Ok((-1, false));
        }

        let (run_start, _) = self.equal_run(data, size - 1, key)?;
        for slot in (run_start..size).rev() {
            if self.remove_from_entry(operation, data, slot, rid)? {
                return Ok((-1, true));
            }
        }

        if run_start == 0 {
            Ok((BucketPage::left_sibling(data), false))
        } else {
            Ok((-1, false))
        }
    }

    fn remove_from_head(
        &self,
        operation: &AtomicOperation,
        data: &mut [u8],
        key: &CompositeKey,
        rid: RecordId,
    ) -> Result<(i64, bool)> {
        let size = BucketPage::size(data);
        if size == 0 {
            return Ok((BucketPage::right_sibling(data), false));
        }

        let first = self.bucket_key_at(data, 0)?;
        if first != *key {
            return Ok((-1, false));
        }

        let (_, run_end) = self.equal_run(data, 0, key)?;
        for slot in 0..run_end {
            if self.remove_from_entry(operation, data, slot, rid)? {
                return Ok((-1, true));
            }
        }

        if run_end == size {
            Ok((BucketPage::right_sibling(data), false))
        } else {
            Ok((-1, false))
        }
    }

    fn remove_null(&self, operation: &AtomicOperation, rid: RecordId) -> Result<bool> {
        let guard = self
            .cache
            .load_for_write(operation, self.null_file_id, 0)?;
        let mut data = guard.data_mut();

        let removed = match NullBucketPage::remove_rid(&mut data[..], rid) {
            NullRemove::Removed => true,
            NullRemove::NotEmbedded => {
                let m_id = NullBucketPage::m_id(&data[..]);
                let removed = self
                    .container
                    .remove(operation, ContainerKey::new(m_id, rid))?;
                if removed {
                    NullBucketPage::decrement_size(&mut data[..]);
                }
                removed
            }
        };
        drop(data);
        drop(guard);

        if removed {
            self.update_size(operation, -1)?;
            operation.add_component_operation(ComponentOperation::RemoveEntry(
                RemoveEntryOperation {
                    index_id: self.index_id,
                    serializer_id: self.serializer.id(),
                    encryption_name: self.encryption.as_ref().map(|e| e.name().to_string()),
                    key: None,
                    rid,
                },
            ));
        }

        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Returns the total number of record ids in the tree, including the
    /// null bucket.
    pub fn size(&self) -> Result<i64> {
        let _op_lock = self.op_lock.read();
        let _latch = self.latch.read();

        let guard = self
            .cache
            .load_for_read(self.file_id, ENTRY_POINT_INDEX)?;
        let data = guard.data();
        Ok(EntryPointPage::tree_size(&data[..]))
    }

    /// Returns the smallest key in the tree, if any.
    pub fn first_key(&self) -> Result<Option<CompositeKey>> {
        let _op_lock = self.op_lock.read();
        let _latch = self.latch.read();

        match self.first_item()? {
            None => Ok(None),
            Some((page_index, item)) => {
                let guard = self.cache.load_for_read(self.file_id, page_index)?;
                let data = guard.data();
                Ok(Some(self.bucket_key_at(&data[..], item)?))
            }
        }
    }

    /// Returns the largest key in the tree, if any.
    pub fn last_key(&self) -> Result<Option<CompositeKey>> {
        let _op_lock = self.op_lock.read();
        let _latch = self.latch.read();

        match self.last_item()? {
            None => Ok(None),
            Some((page_index, item)) => {
                let guard = self.cache.load_for_read(self.file_id, page_index)?;
                let data = guard.data();
                Ok(Some(self.bucket_key_at(&data[..], item)?))
            }
        }
    }

    // ------------------------------------------------------------------
    // Cursors
    // ------------------------------------------------------------------

    /// Iterates `(key, rid)` pairs between two keys.
    pub fn iterate_entries_between(
        &self,
        from: &CompositeKey,
        from_inclusive: bool,
        to: &CompositeKey,
        to_inclusive: bool,
        ascending: bool,
    ) -> RangeCursor<'_> {
        let from = self.serializer.preprocess(from.clone());
        let to = self.serializer.preprocess(to.clone());

        let from = self.enhance_composite_key(
            &from,
            if from_inclusive {
                PartialSearchMode::LowestBoundary
            } else {
                PartialSearchMode::HighestBoundary
            },
        );
        let to = self.enhance_composite_key(
            &to,
            if to_inclusive {
                PartialSearchMode::HighestBoundary
            } else {
                PartialSearchMode::LowestBoundary
            },
        );

        if ascending {
            RangeCursor::Forward(CursorForward::new(
                self,
                Some(from),
                Some(to),
                from_inclusive,
                to_inclusive,
            ))
        } else {
            RangeCursor::Backward(CursorBackward::new(
                self,
                Some(from),
                Some(to),
                from_inclusive,
                to_inclusive,
            ))
        }
    }

    /// Iterates `(key, rid)` pairs with keys greater than (or equal to)
    /// `from`.
    pub fn iterate_entries_major(
        &self,
        from: &CompositeKey,
        inclusive: bool,
        ascending: bool,
    ) -> RangeCursor<'_> {
        let from = self.serializer.preprocess(from.clone());
        let from = self.enhance_composite_key(
            &from,
            if inclusive {
                PartialSearchMode::LowestBoundary
            } else {
                PartialSearchMode::HighestBoundary
            },
        );

        if ascending {
            RangeCursor::Forward(CursorForward::new(self, Some(from), None, inclusive, false))
        } else {
            RangeCursor::Backward(CursorBackward::new(self, Some(from), None, inclusive, true))
        }
    }

    /// Iterates `(key, rid)` pairs with keys less than (or equal to) `to`.
    pub fn iterate_entries_minor(
        &self,
        to: &CompositeKey,
        inclusive: bool,
        ascending: bool,
    ) -> RangeCursor<'_> {
        let to = self.serializer.preprocess(to.clone());
        let to = self.enhance_composite_key(
            &to,
            if inclusive {
                PartialSearchMode::HighestBoundary
            } else {
                PartialSearchMode::LowestBoundary
            },
        );

        if ascending {
            RangeCursor::Forward(CursorForward::new(self, None, Some(to), true, inclusive))
        } else {
            RangeCursor::Backward(CursorBackward::new(self, None, Some(to), false, inclusive))
        }
    }

    /// Iterates the stored keys in ascending order. Keys stored as several
    /// entries may appear more than once.
    pub fn key_cursor(&self) -> Result<KeyCursor<'_>> {
        let _op_lock = self.op_lock.read();
        let _latch = self.latch.read();

        let start = self.first_item()?.map(|(page, _)| page);
        Ok(KeyCursor::new(self, start))
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Flushes and closes the tree's files.
    pub fn close(&self) -> Result<()> {
        let _latch = self.latch.write();

        self.cache.close_file(self.file_id)?;
        self.cache.close_file(self.null_file_id)?;
        self.container.close()?;
        debug!(index = self.name.as_str(), "multi-value index closed");
        Ok(())
    }

    /// Deletes the tree's files. Refuses when the tree still holds records.
    pub fn delete(&self) -> Result<()> {
        let _op_lock = self.op_lock.write();
        let operation = self.manager.start_operation();

        let result = (|| -> Result<()> {
            let _latch = self.latch.write();

            let size = {
                let guard = self
                    .cache
                    .load_for_read(self.file_id, ENTRY_POINT_INDEX)?;
                let data = guard.data();
                EntryPointPage::tree_size(&data[..])
            };
            if size > 0 {
                return Err(RidgelineError::NotEmptyOnDelete {
                    index: self.name.clone(),
                    size,
                });
            }

            self.cache.delete_file(self.file_id)?;
            self.cache.delete_file(self.null_file_id)?;
            self.container.delete()?;
            debug!(index = self.name.as_str(), "multi-value index deleted");
            Ok(())
        })();

        match result {
            Ok(()) => self.manager.end_operation(operation, false),
            Err(error) => {
                let _ = self.manager.end_operation(operation, true);
                Err(error)
            }
        }
    }
}
