//! Disk-resident B-Tree of order 3 over the Page Store
//!
//! ## Design
//! - **Root cached**: the root page lives in the handle for its whole
//!   lifetime; every other page is loaded, mutated, written and dropped
//!   within one call
//! - **Write-through**: every split, rotation and merge writes each page it
//!   touches before returning
//! - **Split before descend**: a full child is split before the insertion
//!   descends into it
//! - **Fill before descend**: a minimal child is topped up (rotation) before a
//!   removal descends into it; a child left empty by the removal is repaired
//!   on the way back up
//! - **Tombstones**: pages dropped by a merge or a root collapse are marked
//!   deleted in place; only compaction reclaims them
//!
//! ## Order 3
//! ```text
//! MAX_KEYS = 2, MIN_KEYS = 1
//!
//! split {a, b}        ->  {a} | b | {}      (sibling starts empty)
//! merge {a} + s + {c} ->  {a, s, c}         (does not fit)
//! ```
//! A split therefore leaves an empty sibling that is settled (rotation or
//! merge back) once the insertion below it has returned, and removals only
//! merge a page that has been emptied (`0 + 1 + 1 <= MAX_KEYS`).

use super::page::{Page, PageState};
use super::pager::{IndexHeader, PageStore};
use crate::config::{DurabilityLevel, MAX_KEYS, MIN_KEYS};
use crate::types::ImageKey;
use crate::{Result, StorageError};
use log::{debug, warn};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

/// Where a key was found: on the cached root or on a loaded page
enum Location {
    Root(usize),
    Page(Page, usize),
}

/// B-Tree handle: the Page Store plus the cached root
pub struct BTree {
    store: PageStore,
    root: Page,
}

impl BTree {
    /// Open an index file, initialising an empty leaf root if it is new
    pub fn open<P: AsRef<Path>>(path: P, durability: DurabilityLevel) -> Result<Self> {
        let (mut store, is_new) = PageStore::open(path.as_ref(), durability)?;

        let root = if is_new {
            let offset = store.allocate()?;
            let root = Page::new_leaf(offset);
            store.write(&root)?;
            store.set_root(offset, 0)?;
            debug!("initialised index {} with empty root at {}", path.as_ref().display(), offset);
            root
        } else {
            load_live(&store, store.header().root_offset)?
        };

        Ok(Self { store, root })
    }

    pub fn header(&self) -> &IndexHeader {
        self.store.header()
    }

    /// Edges from the root to any leaf
    pub fn height(&self) -> usize {
        self.store.header().height.max(0) as usize
    }

    pub fn root(&self) -> &Page {
        &self.root
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_leaf() && self.root.num_keys() == 0
    }

    pub(crate) fn store(&self) -> &PageStore {
        &self.store
    }

    /// Find `key` by (name, threshold); the result carries the stored back-reference
    pub fn search(&self, key: &ImageKey) -> Result<Option<ImageKey>> {
        Ok(self.locate(key)?.map(|location| match location {
            Location::Root(idx) => self.root.keys[idx].clone(),
            Location::Page(page, idx) => page.keys[idx].clone(),
        }))
    }

    fn locate(&self, key: &ImageKey) -> Result<Option<Location>> {
        let mut offset = match self.root.find(key) {
            Ok(idx) => return Ok(Some(Location::Root(idx))),
            Err(_) if self.root.is_leaf() => return Ok(None),
            Err(idx) => self.root.children[idx],
        };

        loop {
            let page = load_live(&self.store, offset)?;
            offset = match page.find(key) {
                Ok(idx) => return Ok(Some(Location::Page(page, idx))),
                Err(_) if page.is_leaf() => return Ok(None),
                Err(idx) => page.children[idx],
            };
        }
    }

    /// Insert `key`.
    ///
    /// If a key with the same (name, threshold) exists, its back-reference is
    /// replaced in place and the previous key is returned.
    pub fn insert(&mut self, key: ImageKey) -> Result<Option<ImageKey>> {
        if let Some(location) = self.locate(&key)? {
            let old = match location {
                Location::Root(idx) => {
                    let old = std::mem::replace(&mut self.root.keys[idx], key);
                    self.store.write(&self.root)?;
                    old
                }
                Location::Page(mut page, idx) => {
                    let old = std::mem::replace(&mut page.keys[idx], key);
                    self.store.write(&page)?;
                    old
                }
            };
            debug!("updated back-reference of [{}]", old);
            return Ok(Some(old));
        }

        let grew = self.root.is_full();
        if grew {
            self.grow_root()?;
        }

        Self::insert_non_full(&mut self.store, &mut self.root, key)?;

        if grew {
            Self::settle_split(&self.store, &mut self.root, 0)?;
        }
        self.store.write(&self.root)?;
        self.collapse_root()?;
        Ok(None)
    }

    /// Split the full root under a brand-new root page
    fn grow_root(&mut self) -> Result<()> {
        let offset = self.store.allocate()?;
        let new_root = Page::new_internal(offset, self.root.offset);
        let mut old_root = std::mem::replace(&mut self.root, new_root);

        Self::split_child(&mut self.store, &mut self.root, 0, &mut old_root)?;

        let height = self.store.header().height + 1;
        self.store.set_root(offset, height)?;
        debug!("root split: new root {} over {}, height {}", offset, old_root.offset, height);
        Ok(())
    }

    fn insert_non_full(store: &mut PageStore, page: &mut Page, key: ImageKey) -> Result<()> {
        let idx = page.lower_bound(&key);

        if page.is_leaf() {
            page.keys.insert(idx, key);
            return store.write(page);
        }

        let mut target = load_live(store, page.children[idx])?;
        let split = target.is_full();
        if split {
            let sibling = Self::split_child(store, page, idx, &mut target)?;
            if key.compare(&page.keys[idx]) == Ordering::Greater {
                target = sibling;
            }
        }

        Self::insert_non_full(store, &mut target, key)?;
        drop(target);

        if split {
            Self::settle_split(store, page, idx)?;
        }
        Ok(())
    }

    /// Move the upper half of the full `child` (at `idx` under `parent`) into
    /// a new sibling and promote the median. Returns the sibling.
    fn split_child(store: &mut PageStore, parent: &mut Page, idx: usize, child: &mut Page) -> Result<Page> {
        let offset = store.allocate()?;

        let upper_keys = child.keys.split_off(MIN_KEYS + 1);
        let median = child.keys.pop().ok_or_else(|| underflow(child))?;
        let upper_children = if child.is_leaf() {
            Vec::new()
        } else {
            child.children.split_off(MIN_KEYS + 1)
        };

        let sibling = Page {
            offset,
            is_leaf: child.is_leaf,
            state: PageState::Live,
            keys: upper_keys,
            children: upper_children,
        };

        parent.keys.insert(idx, median);
        parent.children.insert(idx + 1, offset);

        store.write(child)?;
        store.write(&sibling)?;
        store.write(parent)?;

        debug!("split page {} into {} under {}", child.offset, offset, parent.offset);
        Ok(sibling)
    }

    /// Repair the sibling created by a split at `idx` if it is still empty
    fn settle_split(store: &PageStore, parent: &mut Page, idx: usize) -> Result<()> {
        let sibling_idx = idx + 1;
        let sibling = load_live(store, parent.children[sibling_idx])?;
        if sibling.num_keys() == 0 {
            drop(sibling);
            Self::fill(store, parent, sibling_idx)?;
        }
        Ok(())
    }

    /// Remove `key` by (name, threshold). Returns the removed key, or `None`
    /// (and no mutation) when it is absent.
    pub fn remove(&mut self, key: &ImageKey) -> Result<Option<ImageKey>> {
        let found = match self.search(key)? {
            Some(found) => found,
            None => return Ok(None),
        };

        Self::remove_from(&self.store, &mut self.root, key)?;
        self.store.write(&self.root)?;

        self.collapse_root()?;
        self.repair_root_children()?;
        Ok(Some(found))
    }

    fn remove_from(store: &PageStore, page: &mut Page, key: &ImageKey) -> Result<()> {
        match page.find(key) {
            Ok(idx) if page.is_leaf() => {
                page.keys.remove(idx);
                store.write(page)
            }
            Ok(idx) => Self::remove_from_internal(store, page, idx),
            // not in this subtree
            Err(_) if page.is_leaf() => Ok(()),
            Err(idx) => {
                let child_keys = load_live(store, page.children[idx])?.num_keys();
                let idx = if child_keys == MIN_KEYS {
                    Self::fill(store, page, idx)?
                } else {
                    idx
                };
                Self::remove_below(store, page, idx, key)
            }
        }
    }

    /// Remove `page.keys[idx]` from an internal page
    fn remove_from_internal(store: &PageStore, page: &mut Page, idx: usize) -> Result<()> {
        let left = load_live(store, page.children[idx])?;
        let right = load_live(store, page.children[idx + 1])?;

        if left.num_keys() <= MIN_KEYS && right.num_keys() > MIN_KEYS {
            drop(left);
            let successor = min_key(store, right.offset)?;
            drop(right);
            page.keys[idx] = successor.clone();
            store.write(page)?;
            return Self::remove_below(store, page, idx + 1, &successor);
        }

        // separator included
        if left.num_keys() + right.num_keys() < MAX_KEYS {
            let key = page.keys[idx].clone();
            Self::merge(store, page, idx, left, right)?;
            return Self::remove_below(store, page, idx, &key);
        }

        // a richer left child, or two minimal children that cannot be merged:
        // both are repaired on the way back up
        drop(right);
        let predecessor = max_key(store, left.offset)?;
        drop(left);
        page.keys[idx] = predecessor.clone();
        store.write(page)?;
        Self::remove_below(store, page, idx, &predecessor)
    }

    /// Remove `key` from the subtree at `page.children[idx]`, then repair
    /// that child if it was left without keys
    fn remove_below(store: &PageStore, page: &mut Page, idx: usize, key: &ImageKey) -> Result<()> {
        let mut child = load_live(store, page.children[idx])?;
        Self::remove_from(store, &mut child, key)?;

        let emptied = child.num_keys() == 0;
        drop(child);
        if emptied {
            Self::fill(store, page, idx)?;
        }
        Ok(())
    }

    /// Rebalance `parent.children[idx]`: rotate from the left sibling, then
    /// from the right sibling, then merge when the result fits in one page.
    ///
    /// Returns the index of the child that now covers the original range.
    fn fill(store: &PageStore, parent: &mut Page, idx: usize) -> Result<usize> {
        if parent.children.len() < 2 {
            return Ok(idx);
        }

        let child = load_live(store, parent.children[idx])?;
        let left = match idx.checked_sub(1) {
            Some(left_idx) => Some(load_live(store, parent.children[left_idx])?),
            None => None,
        };
        let right = match parent.children.get(idx + 1) {
            Some(&offset) => Some(load_live(store, offset)?),
            None => None,
        };

        match (left, right) {
            (Some(left), _) if left.num_keys() > MIN_KEYS => {
                Self::borrow_from_left(store, parent, idx, left, child)?;
                Ok(idx)
            }
            (_, Some(right)) if right.num_keys() > MIN_KEYS => {
                Self::borrow_from_right(store, parent, idx, child, right)?;
                Ok(idx)
            }
            (_, Some(right)) if child.num_keys() + right.num_keys() < MAX_KEYS => {
                Self::merge(store, parent, idx, child, right)?;
                Ok(idx)
            }
            (Some(left), _) if left.num_keys() + child.num_keys() < MAX_KEYS => {
                Self::merge(store, parent, idx - 1, left, child)?;
                Ok(idx - 1)
            }
            _ => Ok(idx),
        }
    }

    /// Right rotation through `parent.keys[idx - 1]`
    fn borrow_from_left(store: &PageStore, parent: &mut Page, idx: usize, mut left: Page, mut child: Page) -> Result<()> {
        let up = left.keys.pop().ok_or_else(|| underflow(&left))?;
        let down = std::mem::replace(&mut parent.keys[idx - 1], up);
        child.keys.insert(0, down);

        if !child.is_leaf() {
            let moved = left.children.pop().ok_or_else(|| underflow(&left))?;
            child.children.insert(0, moved);
        }

        store.write(&left)?;
        store.write(&child)?;
        store.write(parent)?;

        debug!("rotated key from {} into {}", left.offset, child.offset);
        Ok(())
    }

    /// Left rotation through `parent.keys[idx]`
    fn borrow_from_right(store: &PageStore, parent: &mut Page, idx: usize, mut child: Page, mut right: Page) -> Result<()> {
        if right.keys.is_empty() || (!right.is_leaf() && right.children.is_empty()) {
            return Err(underflow(&right));
        }

        let up = right.keys.remove(0);
        let down = std::mem::replace(&mut parent.keys[idx], up);
        child.keys.push(down);

        if !child.is_leaf() {
            child.children.push(right.children.remove(0));
        }

        store.write(&child)?;
        store.write(&right)?;
        store.write(parent)?;

        debug!("rotated key from {} into {}", right.offset, child.offset);
        Ok(())
    }

    /// Fold `right` and the separator `parent.keys[idx]` into `left`;
    /// `right` is tombstoned
    fn merge(store: &PageStore, parent: &mut Page, idx: usize, mut left: Page, mut right: Page) -> Result<()> {
        if idx >= parent.keys.len() {
            return Err(StorageError::Corruption(format!(
                "Page {} has no separator at {}",
                parent.offset, idx
            )));
        }

        let separator = parent.keys.remove(idx);
        parent.children.remove(idx + 1);

        left.keys.push(separator);
        left.keys.extend(right.keys.iter().cloned());
        left.children.extend(right.children.iter().copied());
        right.tombstone();

        store.write(&left)?;
        store.write(&right)?;
        store.write(parent)?;

        debug!("merged page {} into {} (tombstoned)", right.offset, left.offset);
        Ok(())
    }

    /// Promote the sole child of a key-less internal root
    fn collapse_root(&mut self) -> Result<()> {
        while !self.root.is_leaf() && self.root.num_keys() == 0 {
            let child = load_live(&self.store, self.root.children[0])?;
            let mut old_root = std::mem::replace(&mut self.root, child);
            old_root.tombstone();
            self.store.write(&old_root)?;

            let height = self.store.header().height - 1;
            self.store.set_root(self.root.offset, height)?;
            debug!("root collapse: {} replaces {}, height {}", self.root.offset, old_root.offset, height);
        }
        Ok(())
    }

    /// Fix-point pass over the root's children: fill any empty child until a
    /// full scan finds none
    fn repair_root_children(&mut self) -> Result<()> {
        loop {
            if self.root.is_leaf() {
                return Ok(());
            }

            let mut empty = None;
            for (idx, &offset) in self.root.children.iter().enumerate() {
                if load_live(&self.store, offset)?.num_keys() == 0 {
                    empty = Some(idx);
                    break;
                }
            }

            let idx = match empty {
                Some(idx) => idx,
                None => return Ok(()),
            };

            warn!("empty child {} under root {} after removal, repairing", idx, self.root.offset);
            let before = self.root.children.len();
            Self::fill(&self.store, &mut self.root, idx)?;
            if self.root.children.len() == before
                && load_live(&self.store, self.root.children[idx])?.num_keys() == 0
            {
                return Err(StorageError::Corruption(format!(
                    "Cannot repair empty child {} of root {}",
                    idx, self.root.offset
                )));
            }
            self.collapse_root()?;
        }
    }

    /// All keys in order
    pub fn traverse(&self) -> Result<Vec<ImageKey>> {
        let mut keys = Vec::new();
        collect_keys(&self.store, &self.root, &mut keys)?;
        Ok(keys)
    }

    /// Every allocated page slot in file order, tombstones included
    pub fn pages(&self) -> Result<Vec<Page>> {
        self.store.scan()
    }

    /// Check order, occupancy and leaf depth of the reachable tree.
    ///
    /// Returns the number of keys.
    pub fn verify(&self) -> Result<usize> {
        let header = self.store.header();
        if header.root_offset != self.root.offset {
            return Err(StorageError::Corruption(format!(
                "Header root {} differs from cached root {}",
                header.root_offset, self.root.offset
            )));
        }

        let mut verifier = Verifier {
            store: &self.store,
            height: self.height(),
            keys: 0,
        };
        verifier.visit(&self.root, 0, None, None)?;
        Ok(verifier.keys)
    }

    /// Point keys at new payload offsets, keyed by (name, threshold).
    ///
    /// Only pages whose keys changed are written. Returns the number of
    /// pages rewritten.
    pub fn rewrite_references(&mut self, moved: &HashMap<(String, i32), i64>) -> Result<usize> {
        let mut rewritten = 0;

        if apply_references(&mut self.root, moved) {
            self.store.write(&self.root)?;
            rewritten += 1;
        }
        if !self.root.is_leaf() {
            for &child in &self.root.children {
                rewrite_subtree(&self.store, child, moved, &mut rewritten)?;
            }
        }

        debug!("rewrote back-references on {} pages", rewritten);
        Ok(rewritten)
    }

    /// Force written pages and header to disk
    pub fn flush(&self) -> Result<()> {
        self.store.sync()
    }
}

fn underflow(page: &Page) -> StorageError {
    StorageError::Corruption(format!("Page {} has no key to give", page.offset))
}

/// Load a page that must be live
pub(crate) fn load_live(store: &PageStore, offset: i64) -> Result<Page> {
    let page = store.load(offset)?;
    if page.is_tombstoned() {
        return Err(StorageError::Corruption(format!(
            "Tombstoned page {} is still referenced",
            offset
        )));
    }
    Ok(page)
}

/// Rightmost key of the subtree at `offset`
fn max_key(store: &PageStore, mut offset: i64) -> Result<ImageKey> {
    loop {
        let page = load_live(store, offset)?;
        if page.is_leaf() {
            return page.keys.last().cloned().ok_or_else(|| underflow(&page));
        }
        offset = *page.children.last().ok_or_else(|| underflow(&page))?;
    }
}

/// Leftmost key of the subtree at `offset`
fn min_key(store: &PageStore, mut offset: i64) -> Result<ImageKey> {
    loop {
        let page = load_live(store, offset)?;
        if page.is_leaf() {
            return page.keys.first().cloned().ok_or_else(|| underflow(&page));
        }
        offset = *page.children.first().ok_or_else(|| underflow(&page))?;
    }
}

fn collect_keys(store: &PageStore, page: &Page, out: &mut Vec<ImageKey>) -> Result<()> {
    if page.is_leaf() {
        out.extend(page.keys.iter().cloned());
        return Ok(());
    }

    for (idx, &offset) in page.children.iter().enumerate() {
        let child = load_live(store, offset)?;
        collect_keys(store, &child, out)?;
        if let Some(key) = page.keys.get(idx) {
            out.push(key.clone());
        }
    }
    Ok(())
}

fn apply_references(page: &mut Page, moved: &HashMap<(String, i32), i64>) -> bool {
    let mut changed = false;
    for key in page.keys.iter_mut() {
        let identity = (key.name().to_string(), key.threshold());
        if let Some(&offset) = moved.get(&identity) {
            if key.payload_offset() != offset {
                key.set_payload_offset(offset);
                changed = true;
            }
        }
    }
    changed
}

fn rewrite_subtree(
    store: &PageStore,
    offset: i64,
    moved: &HashMap<(String, i32), i64>,
    rewritten: &mut usize,
) -> Result<()> {
    let mut page = load_live(store, offset)?;
    if apply_references(&mut page, moved) {
        store.write(&page)?;
        *rewritten += 1;
    }
    for &child in &page.children {
        rewrite_subtree(store, child, moved, rewritten)?;
    }
    Ok(())
}

struct Verifier<'a> {
    store: &'a PageStore,
    height: usize,
    keys: usize,
}

impl Verifier<'_> {
    fn visit(
        &mut self,
        page: &Page,
        depth: usize,
        lower: Option<&ImageKey>,
        upper: Option<&ImageKey>,
    ) -> Result<()> {
        let n = page.num_keys();
        let is_root = depth == 0;

        if page.is_tombstoned() {
            return Err(corrupt(page, "is tombstoned but reachable"));
        }
        if n > MAX_KEYS || (!is_root && n < MIN_KEYS) || (is_root && !page.is_leaf() && n == 0) {
            return Err(corrupt(page, &format!("holds {} keys at depth {}", n, depth)));
        }

        for key in &page.keys {
            let above_lower = lower.map_or(true, |l| key.compare(l) == Ordering::Greater);
            let below_upper = upper.map_or(true, |u| key.compare(u) == Ordering::Less);
            if !above_lower || !below_upper {
                return Err(corrupt(page, &format!("key [{}] is outside its parent range", key)));
            }
        }
        if page.keys.windows(2).any(|w| w[0].compare(&w[1]) != Ordering::Less) {
            return Err(corrupt(page, "keys are not strictly increasing"));
        }
        self.keys += n;

        if page.is_leaf() {
            if depth != self.height {
                return Err(corrupt(page, &format!("leaf at depth {}, height {}", depth, self.height)));
            }
            return Ok(());
        }

        if page.children.len() != n + 1 {
            return Err(corrupt(page, &format!("has {} children for {} keys", page.children.len(), n)));
        }
        if depth >= self.height {
            return Err(corrupt(page, &format!("internal page at depth {}", depth)));
        }

        for (idx, &offset) in page.children.iter().enumerate() {
            let child = self.store.load(offset)?;
            let lo = if idx == 0 { lower } else { Some(&page.keys[idx - 1]) };
            let hi = page.keys.get(idx).or(upper);
            self.visit(&child, depth + 1, lo, hi)?;
        }
        Ok(())
    }
}

fn corrupt(page: &Page, what: &str) -> StorageError {
    StorageError::Corruption(format!("Page {} {}", page.offset, what))
}
