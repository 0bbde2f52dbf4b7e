//! Tree layout constants.

/// Page index of the entry-point page in the main file.
pub const ENTRY_POINT_INDEX: u32 = 0;

/// Page index of the root bucket in the main file. Fixed for the lifetime
/// of the tree; root splits re-initialize this page in place.
pub const ROOT_INDEX: u32 = 1;

/// The persisted m-id high-water mark advances in batches of this size to
/// keep counter updates off the per-put write path.
pub const M_ID_BATCH_SIZE: i64 = 131_072;

/// Record ids kept inline in a leaf entry before spilling to the overflow
/// container.
pub const EMBEDDED_RID_LIMIT: usize = 4;

/// Total record ids (inline plus overflow) one leaf entry accumulates
/// before an additional entry is created under the same key. Bounds the
/// container range scanned per entry and lets a hot key spread across
/// buckets.
pub const ENTRY_SPILL_LIMIT: u32 = 16;

/// Record ids kept inline in the null bucket before spilling to the
/// overflow container.
pub const NULL_EMBEDDED_LIMIT: usize = 128;

/// Sibling pointer value meaning "no sibling".
pub const NO_SIBLING: i64 = -1;

/// Extension of the main index file.
pub const DATA_FILE_EXTENSION: &str = ".rix";

/// Extension of the null-bucket file.
pub const NULL_FILE_EXTENSION: &str = ".nrx";

/// Extension of the overflow container file.
pub const CONTAINER_FILE_EXTENSION: &str = ".crx";
