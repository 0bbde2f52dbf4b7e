//! Registry of named index files with page-level I/O.

use parking_lot::Mutex;
use ridgeline_common::page::{PageId, PAGE_SIZE};
use ridgeline_common::{Result, RidgelineError};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

/// Handle for an open index file.
struct FileHandle {
    /// The file handle.
    file: File,
    /// Name the file was registered under.
    name: String,
    /// Number of pages currently on disk.
    num_pages: u32,
}

/// Maps file names to file ids and performs page-granular reads and writes.
///
/// Every index component registers its files here by name; the returned
/// file id is the handle used for all subsequent page I/O.
pub struct FileRegistry {
    /// Base directory for index files.
    data_dir: PathBuf,
    /// Enable fsync after writes.
    fsync_enabled: bool,
    /// Open file handles keyed by file id.
    files: Mutex<HashMap<u32, FileHandle>>,
    /// Registered names, to reject duplicate registration.
    names: Mutex<HashMap<String, u32>>,
    /// Next file id to assign.
    next_file_id: AtomicU32,
}

impl FileRegistry {
    /// Creates a registry rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>, fsync_enabled: bool) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;

        Ok(Self {
            data_dir,
            fsync_enabled,
            files: Mutex::new(HashMap::new()),
            names: Mutex::new(HashMap::new()),
            next_file_id: AtomicU32::new(1),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    /// Creates a new file and returns its id. Fails if the file exists.
    pub fn add_file(&self, name: &str) -> Result<u32> {
        let path = self.path_for(name);
        if path.exists() {
            return Err(RidgelineError::FileAlreadyExists {
                name: name.to_string(),
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        Ok(self.register(name, file, 0))
    }

    /// Opens an existing file and returns its id.
    pub fn open_file(&self, name: &str) -> Result<u32> {
        if let Some(&file_id) = self.names.lock().get(name) {
            return Ok(file_id);
        }

        let path = self.path_for(name);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let num_pages = (file.metadata()?.len() / PAGE_SIZE as u64) as u32;

        Ok(self.register(name, file, num_pages))
    }

    fn register(&self, name: &str, file: File, num_pages: u32) -> u32 {
        let file_id = self.next_file_id.fetch_add(1, Ordering::SeqCst);
        self.files.lock().insert(
            file_id,
            FileHandle {
                file,
                name: name.to_string(),
                num_pages,
            },
        );
        self.names.lock().insert(name.to_string(), file_id);
        file_id
    }

    /// Returns the number of pages on disk for a file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        let files = self.files.lock();
        let handle = files
            .get(&file_id)
            .ok_or(RidgelineError::FileNotOpen { file_id })?;
        Ok(handle.num_pages)
    }

    /// Reads a page from disk. Pages past the end of the file read as zeros.
    pub fn read_page(&self, page_id: PageId) -> Result<Box<[u8; PAGE_SIZE]>> {
        let mut files = self.files.lock();
        let handle = files
            .get_mut(&page_id.file_id)
            .ok_or(RidgelineError::FileNotOpen {
                file_id: page_id.file_id,
            })?;

        let mut buffer = Box::new([0u8; PAGE_SIZE]);
        if page_id.page_index < handle.num_pages {
            let offset = (page_id.page_index as u64) * (PAGE_SIZE as u64);
            handle.file.seek(SeekFrom::Start(offset))?;
            handle.file.read_exact(&mut buffer[..])?;
        }

        Ok(buffer)
    }

    /// Writes a page to disk, extending the file if needed.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut files = self.files.lock();
        let handle = files
            .get_mut(&page_id.file_id)
            .ok_or(RidgelineError::FileNotOpen {
                file_id: page_id.file_id,
            })?;

        let offset = (page_id.page_index as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(data)?;

        if self.fsync_enabled {
            handle.file.sync_all()?;
        }

        if page_id.page_index >= handle.num_pages {
            handle.num_pages = page_id.page_index + 1;
        }

        Ok(())
    }

    /// Syncs and forgets a file handle.
    pub fn close_file(&self, file_id: u32) -> Result<()> {
        let mut files = self.files.lock();
        if let Some(handle) = files.remove(&file_id) {
            handle.file.sync_all()?;
            self.names.lock().remove(&handle.name);
        }
        Ok(())
    }

    /// Deletes a file from disk.
    pub fn delete_file(&self, file_id: u32) -> Result<()> {
        let mut files = self.files.lock();
        if let Some(handle) = files.remove(&file_id) {
            self.names.lock().remove(&handle.name);
            let path = self.path_for(&handle.name);
            drop(handle);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// Syncs all open files.
    pub fn sync_all(&self) -> Result<()> {
        let files = self.files.lock();
        for handle in files.values() {
            handle.file.sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_registry() -> (FileRegistry, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let registry = FileRegistry::new(dir.path(), false).unwrap();
        (registry, dir)
    }

    #[test]
    fn test_add_file_rejects_duplicates() {
        let (registry, _dir) = test_registry();
        registry.add_file("index.dat").unwrap();
        assert!(matches!(
            registry.add_file("index.dat"),
            Err(RidgelineError::FileAlreadyExists { .. })
        ));
    }

    #[test]
    fn test_open_missing_file_fails() {
        let (registry, _dir) = test_registry();
        assert!(registry.open_file("missing.dat").is_err());
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (registry, _dir) = test_registry();
        let file_id = registry.add_file("index.dat").unwrap();

        let mut data = Box::new([0u8; PAGE_SIZE]);
        data[0] = 0xAB;
        data[PAGE_SIZE - 1] = 0xEF;

        let page_id = PageId::new(file_id, 3);
        registry.write_page(page_id, &data).unwrap();
        assert_eq!(registry.num_pages(file_id).unwrap(), 4);

        let read = registry.read_page(page_id).unwrap();
        assert_eq!(read[0], 0xAB);
        assert_eq!(read[PAGE_SIZE - 1], 0xEF);
    }

    #[test]
    fn test_read_past_end_returns_zeros() {
        let (registry, _dir) = test_registry();
        let file_id = registry.add_file("index.dat").unwrap();

        let read = registry.read_page(PageId::new(file_id, 9)).unwrap();
        assert!(read.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_reopen_preserves_pages() {
        let dir = tempdir().unwrap();
        {
            let registry = FileRegistry::new(dir.path(), true).unwrap();
            let file_id = registry.add_file("index.dat").unwrap();
            let mut data = Box::new([0u8; PAGE_SIZE]);
            data[7] = 0x77;
            registry.write_page(PageId::new(file_id, 0), &data).unwrap();
            registry.close_file(file_id).unwrap();
        }

        let registry = FileRegistry::new(dir.path(), true).unwrap();
        let file_id = registry.open_file("index.dat").unwrap();
        assert_eq!(registry.num_pages(file_id).unwrap(), 1);
        assert_eq!(registry.read_page(PageId::new(file_id, 0)).unwrap()[7], 0x77);
    }

    #[test]
    fn test_delete_file_removes_from_disk() {
        let (registry, dir) = test_registry();
        let file_id = registry.add_file("index.dat").unwrap();
        assert!(dir.path().join("index.dat").exists());

        registry.delete_file(file_id).unwrap();
        assert!(!dir.path().join("index.dat").exists());
        assert!(registry.num_pages(file_id).is_err());
    }

    #[test]
    fn test_close_then_reopen_by_name() {
        let (registry, _dir) = test_registry();
        let file_id = registry.add_file("index.dat").unwrap();
        registry.close_file(file_id).unwrap();

        let reopened = registry.open_file("index.dat").unwrap();
        assert_ne!(file_id, reopened);
        assert_eq!(registry.num_pages(reopened).unwrap(), 0);
    }
}
