//! Database Module
//!
//! # Module Structure
//! - `core`: ImageDB struct, open methods, statistics
//! - `crud`: key operations and image import/export
//! - `persistence`: flush, close and compaction

pub mod core;
pub mod crud;
pub mod persistence;

// Re-export main types
pub use core::{DatabaseStats, ImageDB};
