//! One-value facade over the multi-value tree.
//!
//! Exposes a unique-key contract: at most one record id per key. Built on
//! the same storage mechanism; uniqueness is enforced through the tree's
//! `put_if_absent`, which probes and inserts under one write latch.

use crate::cursor::{KeyCursor, RangeCursor};
use crate::tree::{MultiValueIndex, MultiValueIndexConfig};
use ridgeline_cache::AtomicOperationManager;
use ridgeline_common::key::{CompositeKey, Encryption, KeySerializer};
use ridgeline_common::rid::RecordId;
use ridgeline_common::{Result, RidgelineError};
use std::sync::Arc;

/// Unique-key view over a multi-value tree.
pub struct UniqueIndex {
    tree: MultiValueIndex,
}

impl UniqueIndex {
    /// Creates a unique index.
    pub fn create(
        manager: Arc<AtomicOperationManager>,
        name: &str,
        index_id: i32,
        serializer: Arc<dyn KeySerializer>,
        encryption: Option<Arc<dyn Encryption>>,
        config: MultiValueIndexConfig,
    ) -> Result<Self> {
        Ok(Self {
            tree: MultiValueIndex::create(manager, name, index_id, serializer, encryption, config)?,
        })
    }

    /// Opens an existing unique index.
    pub fn load(
        manager: Arc<AtomicOperationManager>,
        name: &str,
        index_id: i32,
        serializer: Arc<dyn KeySerializer>,
        encryption: Option<Arc<dyn Encryption>>,
        config: MultiValueIndexConfig,
    ) -> Result<Self> {
        Ok(Self {
            tree: MultiValueIndex::load(manager, name, index_id, serializer, encryption, config)?,
        })
    }

    /// Associates `key` with `rid`.
    ///
    /// Re-putting the same pair is a no-op; a different record id under an
    /// occupied key is rejected.
    pub fn put(&self, key: Option<&CompositeKey>, rid: RecordId) -> Result<()> {
        match self.tree.put_if_absent(key, rid)? {
            None => Ok(()),
            Some(existing) if existing == rid => Ok(()),
            Some(_) => Err(RidgelineError::DuplicateKey {
                index: self.tree.name().to_string(),
            }),
        }
    }

    /// Returns the record id stored under `key`, if any.
    pub fn get(&self, key: Option<&CompositeKey>) -> Result<Option<RecordId>> {
        Ok(self.tree.get(key)?.into_iter().next())
    }

    /// Returns 1 when the key is present, 0 otherwise.
    pub fn count(&self, key: Option<&CompositeKey>) -> Result<u64> {
        Ok(if self.get(key)?.is_some() { 1 } else { 0 })
    }

    /// Removes the association stored under `key`.
    pub fn remove(&self, key: Option<&CompositeKey>) -> Result<bool> {
        match self.get(key)? {
            Some(rid) => self.tree.remove(key, rid),
            None => Ok(false),
        }
    }

    /// Returns the number of keys in the index.
    pub fn size(&self) -> Result<i64> {
        self.tree.size()
    }

    /// Returns the smallest key.
    pub fn first_key(&self) -> Result<Option<CompositeKey>> {
        self.tree.first_key()
    }

    /// Returns the largest key.
    pub fn last_key(&self) -> Result<Option<CompositeKey>> {
        self.tree.last_key()
    }

    /// Iterates `(key, rid)` pairs between two keys.
    pub fn iterate_entries_between(
        &self,
        from: &CompositeKey,
        from_inclusive: bool,
        to: &CompositeKey,
        to_inclusive: bool,
        ascending: bool,
    ) -> RangeCursor<'_> {
        self.tree
            .iterate_entries_between(from, from_inclusive, to, to_inclusive, ascending)
    }

    /// Iterates `(key, rid)` pairs with keys above `from`.
    pub fn iterate_entries_major(
        &self,
        from: &CompositeKey,
        inclusive: bool,
        ascending: bool,
    ) -> RangeCursor<'_> {
        self.tree.iterate_entries_major(from, inclusive, ascending)
    }

    /// Iterates `(key, rid)` pairs with keys below `to`.
    pub fn iterate_entries_minor(
        &self,
        to: &CompositeKey,
        inclusive: bool,
        ascending: bool,
    ) -> RangeCursor<'_> {
        self.tree.iterate_entries_minor(to, inclusive, ascending)
    }

    /// Iterates the stored keys in ascending order.
    pub fn key_cursor(&self) -> Result<KeyCursor<'_>> {
        self.tree.key_cursor()
    }

    /// Flushes and closes the index files.
    pub fn close(&self) -> Result<()> {
        self.tree.close()
    }

    /// Deletes the index files. Refuses when the index is not empty.
    pub fn delete(&self) -> Result<()> {
        self.tree.delete()
    }
}
