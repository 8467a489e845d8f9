//! Payload storage
//!
//! The append-only Record Store and the temp-file replacement used by
//! compaction

pub mod atomic;
pub mod record_store;

pub use atomic::{discard_temp, replace_file, temp_path};
pub use record_store::RecordStore;
