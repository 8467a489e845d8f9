//! Index layer
//!
//! The paged B-Tree over (name, threshold) keys: page layout, page store and
//! header, the engine, and the offline compactor.

pub mod btree;
pub mod compaction;
pub mod page;
pub mod pager;

pub use btree::BTree;
pub use compaction::{CompactionStats, Compactor};
pub use page::{Page, PageState, NONE_OFFSET, PAGE_SIZE};
pub use pager::{IndexHeader, PageStore, HEADER_SIZE};
