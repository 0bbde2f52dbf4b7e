//! Paged, durable multi-value B+-tree index engine.
//!
//! This crate provides:
//! - Slotted bucket pages holding leaf and internal tree nodes
//! - The entry-point page carrying tree-wide counters
//! - A single-page bucket for null-key entries
//! - An overflow container spilling per-key record id bags to a side tree
//! - The tree engine with point lookup, range cursors, and transactional
//!   mutation under the atomic-operation manager
//! - A one-value facade exposing a unique-key view

mod bucket;
mod constants;
mod container;
mod cursor;
mod entry_point;
mod null_bucket;
mod tree;
mod unique;

pub use bucket::{AppendOutcome, LeafEntry, SlotSearch};
pub use constants::{
    CONTAINER_FILE_EXTENSION, DATA_FILE_EXTENSION, M_ID_BATCH_SIZE, NULL_FILE_EXTENSION,
};
pub use container::{ContainerKey, OverflowContainer};
pub use cursor::{CursorBackward, CursorForward, KeyCursor, RangeCursor};
pub use tree::{MultiValueIndex, MultiValueIndexConfig};
pub use unique::UniqueIndex;
