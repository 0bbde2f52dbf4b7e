//! Page cache and atomic-operation manager for Ridgeline.
//!
//! The cache owns the index files: callers register files, add pages, and
//! pin pages for read or write through RAII guards. Writes performed under
//! an atomic operation capture first-touch before-images so the operation
//! can be rolled back; commits append the operation's component records to
//! the WAL.

pub mod atomic;
pub mod cache;
pub mod files;
pub mod frame;

pub use atomic::{AtomicOperation, AtomicOperationManager};
pub use cache::{PageCache, PageCacheConfig, PageReadGuard, PageWriteGuard};
pub use files::FileRegistry;
pub use frame::Frame;
