//! ImageDB Storage Engine
//!
//! Embedded store for thresholded grayscale images.
//!
//! ## Architecture
//! - Index: order-3 B-Tree over (name, threshold) keys in fixed 573-byte
//!   pages, root cached in memory, every other page read per operation
//! - Payloads: append-only record file addressed by byte offset
//! - Compaction: offline rebuild of both files, reclaiming tombstoned pages
//!   and orphaned payloads
//! - Images: PGM (P2/P5) codec and threshold transform
//!
//! ## Example
//! ```ignore
//! use imagedb::{ImageDB, ImageKey};
//!
//! let mut db = ImageDB::open("models/index.bin", "models/records.bin")?;
//! db.import_pgm("lena.pgm", &[64, 128, 192])?;
//! let key = db.search(&ImageKey::new("lena.pgm", 128)?)?;
//! db.compact()?;
//! db.close()?;
//! ```

pub mod config;
pub mod database;
pub mod image;
pub mod index;
pub mod storage;
pub mod types;

mod error;

pub use config::{DBConfig, DurabilityLevel};
pub use error::{Result, StorageError};

pub use database::{DatabaseStats, ImageDB};
pub use image::PgmFormat;
pub use index::CompactionStats;
pub use types::{ImageKey, ImageRecord};
