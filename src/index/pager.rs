//! Page Store: fixed-size page I/O against the index file
//!
//! ## File format
//! ```text
//! [Header (24 bytes)][Page 0][Page 1]...[Page N]
//!  offset 0           24      24+573
//! ```
//!
//! Offsets are byte offsets from the start of the file. New pages are handed
//! out by a monotonic cursor (`next_free_offset`) kept in the header; slots
//! are never reused outside compaction. Every page and header write is
//! flushed before returning (with `DurabilityLevel::Synchronous`), but a
//! mutation spanning several writes is not atomic as a unit.

use super::page::{Page, NONE_OFFSET, PAGE_SIZE};
use crate::config::DurabilityLevel;
use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Serialized header size
pub const HEADER_SIZE: usize = 24;

/// Persistent index metadata, stored at offset 0
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    /// Offset of the root page
    pub root_offset: i64,

    /// Allocation cursor; only increases
    pub next_free_offset: i64,

    /// Edges from the root to any leaf
    pub height: i32,

    /// Allocated page slots, tombstones included
    pub page_count: i32,
}

impl IndexHeader {
    /// Header of a file with no pages yet
    pub fn empty() -> Self {
        Self {
            root_offset: NONE_OFFSET,
            next_free_offset: HEADER_SIZE as i64,
            height: 0,
            page_count: 0,
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let data = bincode::serialize(self)
            .map_err(|e| StorageError::Serialization(format!("Failed to serialize header: {}", e)))?;
        if data.len() != HEADER_SIZE {
            return Err(StorageError::Serialization(format!(
                "Header encodes to {} bytes, expected {}",
                data.len(),
                HEADER_SIZE
            )));
        }
        Ok(data)
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        bincode::deserialize(buf)
            .map_err(|e| StorageError::Corruption(format!("Failed to deserialize header: {}", e)))
    }

    fn validate(&self) -> Result<()> {
        let slots = self.next_free_offset - HEADER_SIZE as i64;
        if slots < 0 || slots % PAGE_SIZE as i64 != 0 {
            return Err(StorageError::Corruption(format!(
                "Invalid next free offset: {}",
                self.next_free_offset
            )));
        }
        if self.height < 0 || self.page_count < 0 {
            return Err(StorageError::Corruption(format!(
                "Invalid header: height={}, page_count={}",
                self.height, self.page_count
            )));
        }
        Ok(())
    }
}

/// Page Store over one index file
pub struct PageStore {
    file: File,
    path: PathBuf,
    header: IndexHeader,
    durability: DurabilityLevel,
}

impl PageStore {
    /// Open or create an index file.
    ///
    /// Returns the store and whether the file was new; a new file holds only
    /// an empty header and no pages.
    pub fn open(path: &Path, durability: DurabilityLevel) -> Result<(Self, bool)> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let file_size = file.metadata()?.len();
        if file_size == 0 {
            let store = Self {
                file,
                path: path.to_path_buf(),
                header: IndexHeader::empty(),
                durability,
            };
            store.write_header()?;
            return Ok((store, true));
        }

        if file_size < HEADER_SIZE as u64 {
            return Err(StorageError::Corruption(format!(
                "Index file {} is {} bytes, shorter than its header",
                path.display(),
                file_size
            )));
        }

        file.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; HEADER_SIZE];
        file.read_exact(&mut buf)?;
        let header = IndexHeader::decode(&buf)?;
        header.validate()?;

        let store = Self {
            file,
            path: path.to_path_buf(),
            header,
            durability,
        };
        // header written, root not yet allocated
        if header.next_free_offset == HEADER_SIZE as i64 {
            return Ok((store, true));
        }
        if !store.is_page_offset(header.root_offset) {
            return Err(StorageError::Corruption(format!(
                "Root offset {} is not an allocated page",
                header.root_offset
            )));
        }
        Ok((store, false))
    }

    /// Create (truncating) an index file holding only an empty header
    pub fn create(path: &Path, durability: DurabilityLevel) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let store = Self {
            file,
            path: path.to_path_buf(),
            header: IndexHeader::empty(),
            durability,
        };
        store.write_header()?;
        Ok(store)
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn durability(&self) -> DurabilityLevel {
        self.durability
    }

    /// Hand out the next page slot and persist the advanced cursor
    pub fn allocate(&mut self) -> Result<i64> {
        let offset = self.header.next_free_offset;
        self.header.next_free_offset += PAGE_SIZE as i64;
        self.header.page_count += 1;
        self.write_header()?;
        log::trace!("allocated page slot at {}", offset);
        Ok(offset)
    }

    /// Record a new root and tree height
    pub fn set_root(&mut self, root_offset: i64, height: i32) -> Result<()> {
        self.header.root_offset = root_offset;
        self.header.height = height;
        self.write_header()
    }

    /// Read the page at `offset`; `None` for the sentinel or an unallocated slot
    pub fn read(&self, offset: i64) -> Result<Option<Page>> {
        if !self.is_page_offset(offset) {
            return Ok(None);
        }

        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset as u64))?;
        let mut buf = vec![0u8; PAGE_SIZE];
        file.read_exact(&mut buf)?;

        Page::deserialize(offset, &buf).map(Some)
    }

    /// Read a page that must exist
    pub fn load(&self, offset: i64) -> Result<Page> {
        self.read(offset)?.ok_or_else(|| {
            StorageError::Corruption(format!("Dangling page offset {}", offset))
        })
    }

    /// Write `page` at its own offset
    pub fn write(&self, page: &Page) -> Result<()> {
        if !self.is_page_offset(page.offset) {
            return Err(StorageError::Corruption(format!(
                "Cannot write page at unallocated offset {}",
                page.offset
            )));
        }

        let buf = page.serialize()?;
        let mut file = &self.file;
        file.seek(SeekFrom::Start(page.offset as u64))?;
        file.write_all(&buf)?;

        if self.durability.requires_immediate_sync() {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Every allocated slot in file order, tombstones included
    pub fn scan(&self) -> Result<Vec<Page>> {
        let mut pages = Vec::with_capacity(self.header.page_count.max(0) as usize);
        let mut offset = HEADER_SIZE as i64;
        while offset < self.header.next_free_offset {
            pages.push(self.load(offset)?);
            offset += PAGE_SIZE as i64;
        }
        Ok(pages)
    }

    /// Force all written data to disk
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn file_len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn write_header(&self) -> Result<()> {
        let data = self.header.encode()?;
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&data)?;

        if self.durability.requires_immediate_sync() {
            file.sync_data()?;
        }
        Ok(())
    }

    fn is_page_offset(&self, offset: i64) -> bool {
        let base = HEADER_SIZE as i64;
        offset >= base
            && offset < self.header.next_free_offset
            && (offset - base) % PAGE_SIZE as i64 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageKey;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> (PageStore, bool) {
        PageStore::open(&dir.path().join("index.bin"), DurabilityLevel::NoSync).unwrap()
    }

    #[test]
    fn test_header_is_fixed_size() {
        let header = IndexHeader {
            root_offset: 24,
            next_free_offset: 24 + 573,
            height: 0,
            page_count: 1,
        };
        let data = header.encode().unwrap();
        assert_eq!(data.len(), HEADER_SIZE);
        assert_eq!(&data[..8], &24i64.to_le_bytes());
        assert_eq!(IndexHeader::decode(&data).unwrap(), header);
    }

    #[test]
    fn test_allocate_is_monotonic() {
        let temp = TempDir::new().unwrap();
        let (mut store, is_new) = open_store(&temp);
        assert!(is_new);

        let a = store.allocate().unwrap();
        let b = store.allocate().unwrap();
        assert_eq!(a, HEADER_SIZE as i64);
        assert_eq!(b, a + PAGE_SIZE as i64);
        assert_eq!(store.header().page_count, 2);
        assert_eq!(store.header().next_free_offset, b + PAGE_SIZE as i64);
    }

    #[test]
    fn test_read_write_and_reopen() {
        let temp = TempDir::new().unwrap();
        let offset;
        {
            let (mut store, _) = open_store(&temp);
            offset = store.allocate().unwrap();
            let mut page = Page::new_leaf(offset);
            page.keys.push(ImageKey::with_offset("x.pgm", 50, 0).unwrap());
            store.write(&page).unwrap();
            store.set_root(offset, 0).unwrap();
        }

        let (store, is_new) = open_store(&temp);
        assert!(!is_new);
        assert_eq!(store.header().root_offset, offset);
        let page = store.load(offset).unwrap();
        assert_eq!(page.keys()[0].name(), "x.pgm");
    }

    #[test]
    fn test_invalid_offsets_read_as_none() {
        let temp = TempDir::new().unwrap();
        let (mut store, _) = open_store(&temp);
        let offset = store.allocate().unwrap();
        store.write(&Page::new_leaf(offset)).unwrap();

        assert!(store.read(NONE_OFFSET).unwrap().is_none());
        assert!(store.read(offset + 1).unwrap().is_none());
        assert!(store.read(offset + PAGE_SIZE as i64).unwrap().is_none());
        assert!(matches!(store.load(NONE_OFFSET), Err(StorageError::Corruption(_))));
        assert!(store.write(&Page::new_leaf(offset + PAGE_SIZE as i64)).is_err());
    }

    #[test]
    fn test_scan_includes_tombstones() {
        let temp = TempDir::new().unwrap();
        let (mut store, _) = open_store(&temp);
        let a = store.allocate().unwrap();
        let b = store.allocate().unwrap();
        store.write(&Page::new_leaf(a)).unwrap();
        let mut dead = Page::new_leaf(b);
        dead.tombstone();
        store.write(&dead).unwrap();

        let pages = store.scan().unwrap();
        assert_eq!(pages.len(), 2);
        assert!(!pages[0].is_tombstoned());
        assert!(pages[1].is_tombstoned());
    }

    #[test]
    fn test_short_file_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        assert!(matches!(
            PageStore::open(&path, DurabilityLevel::NoSync),
            Err(StorageError::Corruption(_))
        ));
    }
}
