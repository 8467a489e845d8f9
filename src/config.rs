//! Database configuration, durability levels and fixed limits
//!
//! The tree order is a compile-time constant: the on-disk page layout
//! depends on it, so it is deliberately not part of `DBConfig`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Maximum children per internal page
pub const ORDER: usize = 3;

/// Key capacity of a page
pub const MAX_KEYS: usize = ORDER - 1;

/// Minimum keys held by any non-root page
pub const MIN_KEYS: usize = (ORDER - 1) / 2;

/// Bytes reserved for a key name on disk (NUL padded, so one byte less is usable)
pub const NAME_CAPACITY: usize = 256;

/// Pixel cap of a stored image (640x480)
pub const MAX_PIXELS: usize = 640 * 480;

/// Default number of thresholds accepted in one batch insert
pub const DEFAULT_MAX_THRESHOLDS: usize = 20;

/// Default index file location
pub const DEFAULT_INDEX_FILE: &str = "models/index.bin";

/// Default record file location
pub const DEFAULT_RECORD_FILE: &str = "models/records.bin";

/// Durability level for page, header and record writes
///
/// - Synchronous: every write is followed by `sync_data`, so it is durable
///   when the call returns
/// - NoSync: writes stay in the OS buffer until `close`/`flush`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DurabilityLevel {
    #[default]
    Synchronous,

    /// Only for tests and bulk tooling; a crash loses unsynced writes
    NoSync,
}

impl DurabilityLevel {
    pub fn requires_immediate_sync(&self) -> bool {
        matches!(self, Self::Synchronous)
    }

    pub fn is_no_sync(&self) -> bool {
        matches!(self, Self::NoSync)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Synchronous => "synchronous (durable on return)",
            Self::NoSync => "no sync (test only)",
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DBConfig {
    /// Paged B-Tree index file
    pub index_path: PathBuf,

    /// Append-only payload file
    pub record_path: PathBuf,

    pub durability: DurabilityLevel,

    /// Upper bound on thresholds accepted by one `insert_thresholds` call
    pub max_thresholds_per_batch: usize,
}

impl Default for DBConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from(DEFAULT_INDEX_FILE),
            record_path: PathBuf::from(DEFAULT_RECORD_FILE),
            durability: DurabilityLevel::default(),
            max_thresholds_per_batch: DEFAULT_MAX_THRESHOLDS,
        }
    }
}

impl DBConfig {
    /// Configuration for an explicit pair of files
    pub fn with_paths<P: AsRef<Path>, Q: AsRef<Path>>(index_path: P, record_path: Q) -> Self {
        Self {
            index_path: index_path.as_ref().to_path_buf(),
            record_path: record_path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Both files inside `dir`, with the default file names
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self::with_paths(dir.join("index.bin"), dir.join("records.bin"))
    }

    /// Test configuration: files in `dir`, no fsync
    pub fn for_testing<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            durability: DurabilityLevel::NoSync,
            ..Self::in_dir(dir)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_constants() {
        assert_eq!(MAX_KEYS, 2);
        assert_eq!(MIN_KEYS, 1);
        // a page emptied by a removal can always be merged with a minimal sibling
        assert!(MIN_KEYS + 1 <= MAX_KEYS);
    }

    #[test]
    fn test_durability_levels() {
        let sync = DurabilityLevel::Synchronous;
        assert!(sync.requires_immediate_sync());
        assert!(!sync.is_no_sync());

        let no_sync = DurabilityLevel::NoSync;
        assert!(no_sync.is_no_sync());
        assert_eq!(DurabilityLevel::default(), DurabilityLevel::Synchronous);
    }

    #[test]
    fn test_config_presets() {
        let config = DBConfig::default();
        assert_eq!(config.index_path, PathBuf::from(DEFAULT_INDEX_FILE));
        assert_eq!(config.record_path, PathBuf::from(DEFAULT_RECORD_FILE));
        assert_eq!(config.max_thresholds_per_batch, 20);

        let testing = DBConfig::for_testing("/tmp/imgdb");
        assert!(testing.durability.is_no_sync());
        assert_eq!(testing.index_path, PathBuf::from("/tmp/imgdb/index.bin"));
    }
}
