//! Pin-based page cache over the file registry.

use crate::atomic::AtomicOperation;
use crate::files::FileRegistry;
use crate::frame::Frame;
use parking_lot::Mutex;
use ridgeline_common::page::{PageId, PAGE_SIZE};
use ridgeline_common::{Result, RidgelineError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Configuration for the page cache.
#[derive(Debug, Clone)]
pub struct PageCacheConfig {
    /// Number of frames in the cache.
    pub frames: usize,
    /// Enable fsync after page write-back.
    pub fsync_enabled: bool,
}

impl Default for PageCacheConfig {
    fn default() -> Self {
        Self {
            frames: 8192,
            fsync_enabled: true,
        }
    }
}

struct CacheState {
    /// Resident frames keyed by page id.
    map: HashMap<PageId, Arc<Frame>>,
    /// Clock ring of resident page ids.
    clock: Vec<PageId>,
    /// Clock hand position.
    hand: usize,
    /// Per-file page count: pages on disk plus pages added in memory.
    filled: HashMap<u32, u32>,
}

/// Page cache with pin counting and clock eviction.
///
/// Pages are pinned through RAII guards; unpinned frames become eviction
/// candidates and are written back to their file when displaced. Newly
/// added pages extend the per-file `filled_up_to` watermark immediately,
/// before any write-back happens.
pub struct PageCache {
    registry: FileRegistry,
    state: Mutex<CacheState>,
    capacity: usize,
}

impl PageCache {
    /// Creates a page cache rooted at `data_dir`.
    pub fn new(data_dir: impl AsRef<Path>, config: PageCacheConfig) -> Result<Self> {
        let registry = FileRegistry::new(data_dir.as_ref(), config.fsync_enabled)?;
        Ok(Self {
            registry,
            state: Mutex::new(CacheState {
                map: HashMap::new(),
                clock: Vec::new(),
                hand: 0,
                filled: HashMap::new(),
            }),
            capacity: config.frames.max(8),
        })
    }

    /// Returns the data directory backing this cache.
    pub fn data_dir(&self) -> &Path {
        self.registry.data_dir()
    }

    /// Creates a new file and returns its id.
    pub fn add_file(&self, name: &str) -> Result<u32> {
        let file_id = self.registry.add_file(name)?;
        self.state.lock().filled.insert(file_id, 0);
        Ok(file_id)
    }

    /// Opens an existing file and returns its id.
    pub fn open_file(&self, name: &str) -> Result<u32> {
        let file_id = self.registry.open_file(name)?;
        let num_pages = self.registry.num_pages(file_id)?;
        self.state.lock().filled.insert(file_id, num_pages);
        Ok(file_id)
    }

    /// Returns the number of pages allocated in a file, including pages not
    /// yet written back.
    pub fn filled_up_to(&self, file_id: u32) -> Result<u32> {
        self.state
            .lock()
            .filled
            .get(&file_id)
            .copied()
            .ok_or(RidgelineError::FileNotOpen { file_id })
    }

    /// Allocates the next page of a file and pins it for write.
    pub fn add_page(&self, operation: &AtomicOperation, file_id: u32) -> Result<PageWriteGuard> {
        let page_index = {
            let mut state = self.state.lock();
            let filled = state
                .filled
                .get_mut(&file_id)
                .ok_or(RidgelineError::FileNotOpen { file_id })?;
            let index = *filled;
            *filled += 1;
            index
        };

        let page_id = PageId::new(file_id, page_index);
        let frame = self.fetch(page_id, true)?;
        operation.capture_before_image(page_id, &frame.read_data());
        Ok(PageWriteGuard { frame })
    }

    /// Pins a page for read.
    pub fn load_for_read(&self, file_id: u32, page_index: u32) -> Result<PageReadGuard> {
        let frame = self.fetch(PageId::new(file_id, page_index), false)?;
        Ok(PageReadGuard { frame })
    }

    /// Pins a page for write under an atomic operation.
    ///
    /// The page's current content is captured as a before-image on first
    /// touch so the operation can be rolled back.
    pub fn load_for_write(
        &self,
        operation: &AtomicOperation,
        file_id: u32,
        page_index: u32,
    ) -> Result<PageWriteGuard> {
        let page_id = PageId::new(file_id, page_index);
        let frame = self.fetch(page_id, false)?;
        operation.capture_before_image(page_id, &frame.read_data());
        Ok(PageWriteGuard { frame })
    }

    /// Overwrites a page with a previously captured image.
    pub fn restore_page(&self, page_id: PageId, image: &[u8; PAGE_SIZE]) -> Result<()> {
        let frame = self.fetch(page_id, false)?;
        frame.write_data().copy_from_slice(&image[..]);
        frame.set_dirty(true);
        frame.unpin();
        Ok(())
    }

    fn fetch(&self, page_id: PageId, zeroed: bool) -> Result<Arc<Frame>> {
        let mut state = self.state.lock();

        if let Some(frame) = state.map.get(&page_id) {
            frame.pin();
            return Ok(Arc::clone(frame));
        }

        if state.map.len() >= self.capacity {
            self.evict_one(&mut state)?;
        }

        let data = if zeroed {
            Box::new([0u8; PAGE_SIZE])
        } else {
            self.registry.read_page(page_id)?
        };

        let frame = Arc::new(Frame::new(page_id, data));
        frame.pin();
        state.map.insert(page_id, Arc::clone(&frame));
        state.clock.push(page_id);
        Ok(frame)
    }

    /// Clock sweep: skip pinned frames, give referenced frames a second
    /// chance, write back the victim if dirty.
    fn evict_one(&self, state: &mut CacheState) -> Result<()> {
        let mut steps = 0;
        let max_steps = state.clock.len() * 2;

        while steps < max_steps && !state.clock.is_empty() {
            let idx = state.hand % state.clock.len();
            let page_id = state.clock[idx];

            let evictable = {
                let frame = &state.map[&page_id];
                !frame.is_pinned() && !frame.take_reference_bit()
            };

            if evictable {
                let frame = &state.map[&page_id];
                if frame.is_dirty() {
                    self.registry.write_page(page_id, &frame.read_data())?;
                }
                state.map.remove(&page_id);
                state.clock.remove(idx);
                if !state.clock.is_empty() {
                    state.hand = idx % state.clock.len();
                }
                return Ok(());
            }

            state.hand = (idx + 1) % state.clock.len();
            steps += 1;
        }

        Err(RidgelineError::CacheFull)
    }

    /// Writes back every dirty frame and syncs the files.
    pub fn flush(&self) -> Result<()> {
        let state = self.state.lock();
        for (page_id, frame) in &state.map {
            if frame.is_dirty() {
                self.registry.write_page(*page_id, &frame.read_data())?;
                frame.set_dirty(false);
            }
        }
        drop(state);
        self.registry.sync_all()
    }

    /// Flushes a file's pages, drops its frames, and closes the handle.
    pub fn close_file(&self, file_id: u32) -> Result<()> {
        let mut state = self.state.lock();
        let pages: Vec<PageId> = state
            .map
            .keys()
            .filter(|p| p.file_id == file_id)
            .copied()
            .collect();

        for page_id in pages {
            let frame = &state.map[&page_id];
            if frame.is_dirty() {
                self.registry.write_page(page_id, &frame.read_data())?;
            }
            state.map.remove(&page_id);
            state.clock.retain(|p| *p != page_id);
        }
        state.hand = 0;
        state.filled.remove(&file_id);
        drop(state);

        self.registry.close_file(file_id)
    }

    /// Drops a file's frames and deletes the file from disk.
    pub fn delete_file(&self, file_id: u32) -> Result<()> {
        let mut state = self.state.lock();
        state.map.retain(|p, _| p.file_id != file_id);
        state.clock.retain(|p| p.file_id != file_id);
        state.hand = 0;
        state.filled.remove(&file_id);
        drop(state);

        self.registry.delete_file(file_id)
    }
}

/// RAII pin guard for reading a page.
pub struct PageReadGuard {
    frame: Arc<Frame>,
}

impl PageReadGuard {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.frame.page_id()
    }

    /// Returns the page data.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.read_data()
    }
}

impl Drop for PageReadGuard {
    fn drop(&mut self) {
        self.frame.unpin();
    }
}

/// RAII pin guard for writing a page.
///
/// The frame is marked dirty when the guard drops.
pub struct PageWriteGuard {
    frame: Arc<Frame>,
}

impl PageWriteGuard {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.frame.page_id()
    }

    /// Returns the page data for reading.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.read_data()
    }

    /// Returns mutable access to the page data.
    pub fn data_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.write_data()
    }
}

impl Drop for PageWriteGuard {
    fn drop(&mut self) {
        self.frame.set_dirty(true);
        self.frame.unpin();
    }
}
