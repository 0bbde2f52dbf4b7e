//! Entry-point page: tree-wide counters.
//!
//! Page 0 of the main index file. Holds the total record count, the
//! high-water page index (splits may allocate pages before the cache's
//! file watermark catches up), and the persisted m-id batch boundary.

use ridgeline_common::page::{PageHeader, PageId, PageType};

const TREE_SIZE_OFFSET: usize = PageHeader::SIZE;
const PAGES_SIZE_OFFSET: usize = TREE_SIZE_OFFSET + 8;
const ENTRY_ID_OFFSET: usize = PAGES_SIZE_OFFSET + 4;

/// Accessors for the entry-point page layout.
pub struct EntryPointPage;

impl EntryPointPage {
    /// Initializes a fresh entry-point page.
    pub fn init(data: &mut [u8], page_id: PageId) {
        let header = PageHeader::new(page_id, PageType::EntryPoint);
        data[..PageHeader::SIZE].copy_from_slice(&header.to_bytes());
        Self::set_tree_size(data, 0);
        // Pages 0 and 1 (entry point and root) are allocated at creation.
        Self::set_pages_size(data, 1);
        Self::set_entry_id(data, 0);
    }

    /// Returns the total record count of the tree.
    pub fn tree_size(data: &[u8]) -> i64 {
        i64::from_le_bytes(data[TREE_SIZE_OFFSET..TREE_SIZE_OFFSET + 8].try_into().unwrap())
    }

    /// Sets the total record count of the tree.
    pub fn set_tree_size(data: &mut [u8], size: i64) {
        data[TREE_SIZE_OFFSET..TREE_SIZE_OFFSET + 8].copy_from_slice(&size.to_le_bytes());
    }

    /// Returns the highest page index in use.
    pub fn pages_size(data: &[u8]) -> u32 {
        u32::from_le_bytes(data[PAGES_SIZE_OFFSET..PAGES_SIZE_OFFSET + 4].try_into().unwrap())
    }

    /// Sets the highest page index in use.
    pub fn set_pages_size(data: &mut [u8], pages: u32) {
        data[PAGES_SIZE_OFFSET..PAGES_SIZE_OFFSET + 4].copy_from_slice(&pages.to_le_bytes());
    }

    /// Returns the persisted m-id high-water mark.
    pub fn entry_id(data: &[u8]) -> i64 {
        i64::from_le_bytes(data[ENTRY_ID_OFFSET..ENTRY_ID_OFFSET + 8].try_into().unwrap())
    }

    /// Sets the persisted m-id high-water mark.
    pub fn set_entry_id(data: &mut [u8], entry_id: i64) {
        data[ENTRY_ID_OFFSET..ENTRY_ID_OFFSET + 8].copy_from_slice(&entry_id.to_le_bytes());
    }
}
