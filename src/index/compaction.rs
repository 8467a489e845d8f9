//! Offline compaction of the index and payload files
//!
//! ## Phases
//! ```text
//! A. payload repack   traverse keys -> copy payloads in key order into
//!                     records.bin.compact.tmp -> replace -> rewrite the
//!                     back-references of changed pages
//! B. page repack      children-before-parent copy of every reachable page
//!                     into index.bin.compact.tmp -> fresh header -> replace
//! ```
//! Each phase commits with a rename, so a crash leaves either the old or the
//! new file in place. This is the only place tombstoned pages and orphaned
//! payloads are reclaimed.

use super::btree::{load_live, BTree};
use super::page::Page;
use super::pager::PageStore;
use crate::storage::{discard_temp, replace_file, temp_path, RecordStore};
use crate::types::{ImageKey, NO_PAYLOAD};
use crate::Result;
use log::info;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

/// Outcome of one compaction run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompactionStats {
    /// Keys whose back-reference changed
    pub records_moved: usize,

    /// Index + payload bytes before
    pub bytes_before: u64,

    /// Index + payload bytes after
    pub bytes_after: u64,

    /// Allocated page slots before, tombstones included
    pub pages_before: usize,

    /// Pages written to the new index
    pub pages_after: usize,
}

/// Rebuilds a tree and its payload file in place
pub struct Compactor<'a> {
    tree: &'a mut BTree,
    records: &'a mut RecordStore,
}

impl<'a> Compactor<'a> {
    pub fn new(tree: &'a mut BTree, records: &'a mut RecordStore) -> Self {
        Self { tree, records }
    }

    /// Run both phases; the handles are reopened on the new files
    pub fn run(mut self) -> Result<CompactionStats> {
        let mut stats = CompactionStats {
            bytes_before: self.tree.store().file_len()? + self.records.len(),
            pages_before: self.tree.header().page_count.max(0) as usize,
            ..Default::default()
        };

        stats.records_moved = self.repack_records()?;
        stats.pages_after = self.repack_pages()?;
        stats.bytes_after = self.tree.store().file_len()? + self.records.len();

        info!(
            "compaction done: {} records moved, {} -> {} pages, {} -> {} bytes",
            stats.records_moved, stats.pages_before, stats.pages_after, stats.bytes_before, stats.bytes_after
        );
        Ok(stats)
    }

    /// Phase A: copy live payloads, in key order, into a fresh payload file
    fn repack_records(&mut self) -> Result<usize> {
        let keys = self.tree.traverse()?;
        if keys.is_empty() {
            info!("no live keys, payload repack skipped");
            return Ok(0);
        }

        let target = self.records.path().to_path_buf();
        let durability = self.records.durability();
        let temp = temp_path(&target);

        let moved = match write_records(&*self.records, &keys, &temp) {
            Ok(moved) => moved,
            Err(e) => {
                discard_temp(&temp);
                return Err(e);
            }
        };

        replace_file(&temp, &target)?;
        *self.records = RecordStore::open(&target, durability)?;

        self.tree.rewrite_references(&moved)?;
        self.tree.flush()?;
        Ok(moved.len())
    }

    /// Phase B: write reachable pages bottom-up into a fresh index file.
    /// Returns the number of pages written.
    fn repack_pages(&mut self) -> Result<usize> {
        let target = self.tree.path().to_path_buf();
        let durability = self.tree.store().durability();
        let height = self.tree.header().height;
        let temp = temp_path(&target);

        let page_count = match write_pages(&*self.tree, &temp, height) {
            Ok(count) => count,
            Err(e) => {
                discard_temp(&temp);
                return Err(e);
            }
        };

        replace_file(&temp, &target)?;
        *self.tree = BTree::open(&target, durability)?;
        Ok(page_count)
    }
}

/// Copy the payload of every key into a fresh file at `temp`. Returns the
/// new offset of each key whose payload moved.
fn write_records(records: &RecordStore, keys: &[ImageKey], temp: &Path) -> Result<HashMap<(String, i32), i64>> {
    let mut moved = HashMap::with_capacity(keys.len());
    let mut fresh = RecordStore::create(temp, records.durability())?;
    for key in keys {
        if key.payload_offset() == NO_PAYLOAD {
            continue;
        }
        let record = records.read(key.payload_offset())?;
        let offset = fresh.append(&record)?;
        if offset != key.payload_offset() {
            moved.insert((key.name().to_string(), key.threshold()), offset);
        }
    }
    fresh.sync()?;
    Ok(moved)
}

/// Copy the reachable tree into a fresh index at `temp`. Returns the page
/// count of the copy.
fn write_pages(tree: &BTree, temp: &Path, height: i32) -> Result<usize> {
    let mut fresh = PageStore::create(temp, tree.store().durability())?;
    let root_offset = copy_subtree(tree.store(), tree.root(), &mut fresh)?;
    fresh.set_root(root_offset, height)?;
    fresh.sync()?;
    Ok(fresh.header().page_count.max(0) as usize)
}

/// Copy `page` and everything below it into `target`, children first.
/// Returns the page's offset in `target`.
fn copy_subtree(source: &PageStore, page: &Page, target: &mut PageStore) -> Result<i64> {
    let mut copy = page.clone();

    if !page.is_leaf() {
        copy.children.clear();
        for &offset in page.children() {
            let child = load_live(source, offset)?;
            copy.children.push(copy_subtree(source, &child, target)?);
        }
    }

    copy.offset = target.allocate()?;
    target.write(&copy)?;
    Ok(copy.offset)
}
