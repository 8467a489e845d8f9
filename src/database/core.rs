//! Database Core - ImageDB Structure and Initialization
//!
//! This module contains:
//! - ImageDB struct definition
//! - open() / open_with_config()
//! - statistics, page dump and invariant check

use crate::config::{DBConfig, ORDER};
use crate::index::{BTree, Page};
use crate::storage::RecordStore;
use crate::Result;
use log::info;
use serde::Serialize;
use std::path::Path;

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    pub order: usize,
    pub height: usize,
    pub page_count: usize,
    pub root_offset: i64,
    pub root_keys: usize,
    pub root_is_leaf: bool,
    pub next_free_offset: i64,
    pub index_bytes: u64,
    pub record_bytes: u64,
}

/// ImageDB instance: the index with its cached root, and the payload file
pub struct ImageDB {
    pub(crate) tree: BTree,
    pub(crate) records: RecordStore,
    pub(crate) config: DBConfig,
    /// Set once the final flush has succeeded
    pub(crate) closed: bool,
}

impl ImageDB {
    /// Open (or create) a database over the given index and record files
    ///
    /// # Example
    /// ```ignore
    /// let db = ImageDB::open("models/index.bin", "models/records.bin")?;
    /// ```
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(index_path: P, record_path: Q) -> Result<Self> {
        Self::open_with_config(DBConfig::with_paths(index_path, record_path))
    }

    /// Open with custom configuration
    pub fn open_with_config(config: DBConfig) -> Result<Self> {
        let tree = BTree::open(&config.index_path, config.durability)?;
        let records = RecordStore::open(&config.record_path, config.durability)?;

        info!(
            "opened {} (height {}, {} pages) and {} ({} bytes), durability: {}",
            config.index_path.display(),
            tree.height(),
            tree.header().page_count,
            config.record_path.display(),
            records.len(),
            config.durability.description()
        );

        Ok(Self {
            tree,
            records,
            config,
            closed: false,
        })
    }

    pub fn config(&self) -> &DBConfig {
        &self.config
    }

    /// Index shape and file sizes
    pub fn stats(&self) -> Result<DatabaseStats> {
        let header = self.tree.header();
        let root = self.tree.root();

        Ok(DatabaseStats {
            order: ORDER,
            height: self.tree.height(),
            page_count: header.page_count.max(0) as usize,
            root_offset: header.root_offset,
            root_keys: root.num_keys(),
            root_is_leaf: root.is_leaf(),
            next_free_offset: header.next_free_offset,
            index_bytes: self.tree.store().file_len()?,
            record_bytes: self.records.len(),
        })
    }

    /// Every allocated page slot in file order, tombstones included
    pub fn pages(&self) -> Result<Vec<Page>> {
        self.tree.pages()
    }

    /// Check the order, occupancy and leaf-depth invariants of the index.
    /// Returns the number of keys.
    pub fn verify(&self) -> Result<usize> {
        self.tree.verify()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{HEADER_SIZE, PAGE_SIZE};
    use tempfile::TempDir;

    #[test]
    fn test_open_fresh_database() {
        let temp_dir = TempDir::new().unwrap();
        let config = DBConfig::for_testing(temp_dir.path().join("models"));
        let db = ImageDB::open_with_config(config.clone()).unwrap();

        assert!(config.index_path.exists());
        assert!(config.record_path.exists());

        let stats = db.stats().unwrap();
        assert_eq!(stats.order, 3);
        assert_eq!(stats.height, 0);
        assert_eq!(stats.page_count, 1);
        assert_eq!(stats.root_offset, HEADER_SIZE as i64);
        assert_eq!(stats.root_keys, 0);
        assert!(stats.root_is_leaf);
        assert_eq!(stats.index_bytes, (HEADER_SIZE + PAGE_SIZE) as u64);
        assert_eq!(stats.record_bytes, 0);
        assert_eq!(db.verify().unwrap(), 0);
    }

    #[test]
    fn test_open_with_paths() {
        let temp_dir = TempDir::new().unwrap();
        let index = temp_dir.path().join("i.bin");
        let records = temp_dir.path().join("r.bin");

        let db = ImageDB::open(&index, &records).unwrap();
        assert_eq!(db.config().index_path, index);
        assert_eq!(db.pages().unwrap().len(), 1);
    }
}
