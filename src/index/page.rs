//! Fixed-size B-Tree page and its on-disk layout
//!
//! ## Layout (order 3, little-endian)
//! ```text
//! [num_keys: i32][keys: MAX_KEYS x Key][children: ORDER x i64][is_leaf: u8][self_offset: i64]
//!
//! num_keys = -1   tombstoned page
//! child    = -1   no child
//! ```
//!
//! A tombstoned page keeps its frozen contents on disk; only the key count
//! is replaced by the sentinel. In memory the state is the explicit
//! [`PageState`] tag.

use crate::config::{MAX_KEYS, ORDER};
use crate::types::{ImageKey, KEY_SIZE};
use crate::{Result, StorageError};
use std::cmp::Ordering;

/// Child/offset sentinel for "none"
pub const NONE_OFFSET: i64 = -1;

/// Serialized key count of a tombstoned page
const TOMBSTONE_KEYS: i32 = -1;

const KEYS_START: usize = 4;
const CHILDREN_START: usize = KEYS_START + MAX_KEYS * KEY_SIZE;
const LEAF_FLAG_AT: usize = CHILDREN_START + ORDER * 8;
const SELF_OFFSET_AT: usize = LEAF_FLAG_AT + 1;

/// Serialized page size in bytes
pub const PAGE_SIZE: usize = SELF_OFFSET_AT + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Live,
    /// Logically deleted; reclaimed only by compaction
    Tombstoned,
}

/// B-Tree page
///
/// Leaves have no children. Internal pages have exactly `keys.len() + 1`
/// children, including the transient zero-key internal page that holds a
/// single child while a split or merge is being settled.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub(crate) offset: i64,
    pub(crate) is_leaf: bool,
    pub(crate) state: PageState,
    pub(crate) keys: Vec<ImageKey>,
    pub(crate) children: Vec<i64>,
}

impl Page {
    /// Create an empty leaf page at `offset`
    pub fn new_leaf(offset: i64) -> Self {
        Self {
            offset,
            is_leaf: true,
            state: PageState::Live,
            keys: Vec::with_capacity(MAX_KEYS),
            children: Vec::new(),
        }
    }

    /// Create a key-less internal page whose only child is `first_child`
    pub fn new_internal(offset: i64, first_child: i64) -> Self {
        let mut children = Vec::with_capacity(ORDER);
        children.push(first_child);
        Self {
            offset,
            is_leaf: false,
            state: PageState::Live,
            keys: Vec::with_capacity(MAX_KEYS),
            children,
        }
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    pub fn state(&self) -> PageState {
        self.state
    }

    pub fn is_tombstoned(&self) -> bool {
        self.state == PageState::Tombstoned
    }

    pub fn keys(&self) -> &[ImageKey] {
        &self.keys
    }

    pub fn children(&self) -> &[i64] {
        &self.children
    }

    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    pub fn is_full(&self) -> bool {
        self.keys.len() == MAX_KEYS
    }

    /// Freeze the page as logically deleted
    pub fn tombstone(&mut self) {
        self.state = PageState::Tombstoned;
    }

    /// First position whose key is `>= key` (linear scan)
    pub fn lower_bound(&self, key: &ImageKey) -> usize {
        self.keys
            .iter()
            .position(|k| k.compare(key) != Ordering::Less)
            .unwrap_or(self.keys.len())
    }

    /// `Ok(idx)` on an exact match, `Err(idx)` with the descent index otherwise
    pub fn find(&self, key: &ImageKey) -> std::result::Result<usize, usize> {
        let idx = self.lower_bound(key);
        match self.keys.get(idx) {
            Some(k) if k.same_identity(key) => Ok(idx),
            _ => Err(idx),
        }
    }

    /// Serialize page to its fixed-size record
    pub fn serialize(&self) -> Result<Vec<u8>> {
        if self.keys.len() > MAX_KEYS || self.children.len() > ORDER {
            return Err(StorageError::Corruption(format!(
                "Page {} overflows: {} keys, {} children",
                self.offset,
                self.keys.len(),
                self.children.len()
            )));
        }

        let mut buf = vec![0u8; PAGE_SIZE];

        let num_keys = match self.state {
            PageState::Live => self.keys.len() as i32,
            PageState::Tombstoned => TOMBSTONE_KEYS,
        };
        buf[..KEYS_START].copy_from_slice(&num_keys.to_le_bytes());

        for (i, key) in self.keys.iter().enumerate() {
            let at = KEYS_START + i * KEY_SIZE;
            key.encode_into(&mut buf[at..at + KEY_SIZE]);
        }

        for slot in 0..ORDER {
            let child = self.children.get(slot).copied().unwrap_or(NONE_OFFSET);
            let at = CHILDREN_START + slot * 8;
            buf[at..at + 8].copy_from_slice(&child.to_le_bytes());
        }

        buf[LEAF_FLAG_AT] = if self.is_leaf { 1 } else { 0 };
        buf[SELF_OFFSET_AT..SELF_OFFSET_AT + 8].copy_from_slice(&self.offset.to_le_bytes());

        Ok(buf)
    }

    /// Deserialize the page record read at `offset`
    pub fn deserialize(offset: i64, buf: &[u8]) -> Result<Self> {
        if buf.len() < PAGE_SIZE {
            return Err(StorageError::Corruption(format!(
                "Page record too small: {}",
                buf.len()
            )));
        }

        let num_keys = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let is_leaf = buf[LEAF_FLAG_AT] == 1;
        let self_offset = read_i64(buf, SELF_OFFSET_AT);

        if self_offset != offset {
            return Err(StorageError::Corruption(format!(
                "Page at {} records self offset {}",
                offset, self_offset
            )));
        }

        if num_keys == TOMBSTONE_KEYS {
            return Ok(Self {
                offset,
                is_leaf,
                state: PageState::Tombstoned,
                keys: Vec::new(),
                children: Vec::new(),
            });
        }

        if num_keys < 0 || num_keys as usize > MAX_KEYS {
            return Err(StorageError::Corruption(format!(
                "Invalid num_keys in page {}: {}",
                offset, num_keys
            )));
        }
        let num_keys = num_keys as usize;

        let mut keys = Vec::with_capacity(MAX_KEYS);
        for i in 0..num_keys {
            let at = KEYS_START + i * KEY_SIZE;
            keys.push(ImageKey::decode(&buf[at..at + KEY_SIZE])?);
        }

        let slots: Vec<i64> = (0..ORDER)
            .map(|slot| read_i64(buf, CHILDREN_START + slot * 8))
            .collect();

        let children = if is_leaf {
            Vec::new()
        } else {
            slots[..=num_keys].to_vec()
        };

        let page = Self {
            offset,
            is_leaf,
            state: PageState::Live,
            keys,
            children,
        };
        page.validate(&slots)?;
        Ok(page)
    }

    /// Structural checks on a freshly read live page
    fn validate(&self, slots: &[i64]) -> Result<()> {
        let used = if self.is_leaf { 0 } else { self.keys.len() + 1 };

        if let Some(bad) = slots[..used].iter().find(|&&c| c < 0) {
            return Err(StorageError::Corruption(format!(
                "Internal page {} has missing child ({})",
                self.offset, bad
            )));
        }
        if slots[used..].iter().any(|&c| c != NONE_OFFSET) {
            return Err(StorageError::Corruption(format!(
                "Page {} has child pointers beyond its key count",
                self.offset
            )));
        }
        for pair in self.keys.windows(2) {
            if pair[0].compare(&pair[1]) != Ordering::Less {
                return Err(StorageError::Corruption(format!(
                    "Page {} keys out of order: [{}] then [{}]",
                    self.offset, pair[0], pair[1]
                )));
            }
        }
        Ok(())
    }
}

fn read_i64(buf: &[u8], at: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    i64::from_le_bytes(bytes)
}
