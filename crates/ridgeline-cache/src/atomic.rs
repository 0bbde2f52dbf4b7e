//! Atomic operations over cached pages.
//!
//! An atomic operation is the unit of WAL-logged mutation. Pages written
//! under an operation capture a first-touch before-image; rolling the
//! operation back restores those images through the cache, committing it
//! appends the operation's component records to the WAL.

use crate::cache::PageCache;
use parking_lot::{Mutex, RwLock};
use ridgeline_common::page::{PageId, PAGE_SIZE};
use ridgeline_common::Result;
use ridgeline_wal::{ComponentOperation, LogRecord, Lsn, WalWriter};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::trace;

/// A single in-flight atomic operation.
pub struct AtomicOperation {
    id: u32,
    /// First-touch page images, keyed by page id.
    undo: Mutex<HashMap<PageId, Box<[u8; PAGE_SIZE]>>>,
    /// Component operations buffered for the commit record stream.
    operations: Mutex<Vec<ComponentOperation>>,
}

impl AtomicOperation {
    fn new(id: u32) -> Self {
        Self {
            id,
            undo: Mutex::new(HashMap::new()),
            operations: Mutex::new(Vec::new()),
        }
    }

    /// Creates an operation that is not tracked by any manager.
    ///
    /// Used where mutations need page guards but no WAL stream, such as
    /// cache-level tests.
    pub fn detached() -> Self {
        Self::new(0)
    }

    /// Returns the operation id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Captures the current content of a page, first touch only.
    pub(crate) fn capture_before_image(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) {
        self.undo
            .lock()
            .entry(page_id)
            .or_insert_with(|| Box::new(*data));
    }

    /// Buffers a component operation for the WAL.
    pub fn add_component_operation(&self, operation: ComponentOperation) {
        self.operations.lock().push(operation);
    }

    /// Returns the number of pages this operation has touched.
    pub fn touched_pages(&self) -> usize {
        self.undo.lock().len()
    }
}

/// Coordinates atomic operations: id assignment, commit/rollback, and the
/// per-component read/write locks held around every public index operation.
pub struct AtomicOperationManager {
    cache: Arc<PageCache>,
    wal: Arc<WalWriter>,
    next_op_id: AtomicU32,
    component_locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl AtomicOperationManager {
    /// Creates a manager over the given cache and WAL.
    pub fn new(cache: Arc<PageCache>, wal: Arc<WalWriter>) -> Self {
        Self {
            cache,
            wal,
            next_op_id: AtomicU32::new(1),
            component_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the page cache this manager operates on.
    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    /// Begins a new atomic operation.
    pub fn start_operation(&self) -> AtomicOperation {
        let id = self.next_op_id.fetch_add(1, Ordering::SeqCst);
        trace!(op = id, "atomic operation started");
        AtomicOperation::new(id)
    }

    /// Ends an atomic operation.
    ///
    /// With `rollback` set, every touched page is restored to its
    /// before-image and a rollback record is logged. Otherwise the
    /// operation's component records are appended between begin and commit
    /// markers and the WAL is flushed.
    pub fn end_operation(&self, operation: AtomicOperation, rollback: bool) -> Result<()> {
        let op_id = operation.id();

        if rollback {
            let undo = operation.undo.into_inner();
            for (page_id, image) in &undo {
                self.cache.restore_page(*page_id, image)?;
            }
            self.wal.append(LogRecord::rollback(Lsn::INVALID, op_id))?;
            self.wal.flush()?;
            trace!(op = op_id, pages = undo.len(), "atomic operation rolled back");
            return Ok(());
        }

        let operations = operation.operations.into_inner();

        let mut prev = self.wal.append(LogRecord::begin(op_id))?;
        for component in &operations {
            prev = self.wal.append(LogRecord::component(op_id, prev, component))?;
        }
        self.wal.append(LogRecord::commit(prev, op_id))?;
        self.wal.flush()?;

        trace!(op = op_id, records = operations.len(), "atomic operation committed");
        Ok(())
    }

    /// Returns the shared read/write lock registered for a component name.
    pub fn component_lock(&self, name: &str) -> Arc<RwLock<()>> {
        let mut locks = self.component_locks.lock();
        Arc::clone(
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(()))),
        )
    }
}
