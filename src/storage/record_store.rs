//! Record Store: append-only payload file
//!
//! ## File Format
//! ```text
//! [Record 1] [Record 2] ... [Record N]
//!
//! Each Record:
//!   [size: u32] [bincode(ImageRecord)] [crc32: u32]
//! ```
//! A record is addressed by the byte offset of its size prefix; that offset
//! is the back-reference stored in an index key. Records are never updated
//! or removed in place; compaction rewrites the whole file.

use crate::config::{DurabilityLevel, MAX_PIXELS, NAME_CAPACITY};
use crate::types::ImageRecord;
use crate::{Result, StorageError};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Size prefix + CRC
const FRAME_OVERHEAD: u64 = 8;

/// Upper bound of an encoded record body: pixels, name and fixed fields
const MAX_BODY_SIZE: usize = MAX_PIXELS + NAME_CAPACITY + 64;

pub struct RecordStore {
    file: File,
    path: PathBuf,
    len: u64,
    durability: DurabilityLevel,
}

impl RecordStore {
    /// Open (or create) the payload file at `path`
    pub fn open<P: AsRef<Path>>(path: P, durability: DurabilityLevel) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
            durability,
        })
    }

    /// Create (truncating) an empty payload file
    pub fn create<P: AsRef<Path>>(path: P, durability: DurabilityLevel) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            len: 0,
            durability,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn durability(&self) -> DurabilityLevel {
        self.durability
    }

    /// Current file size in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append `record`, returning its offset
    pub fn append(&mut self, record: &ImageRecord) -> Result<i64> {
        record.validate()?;

        let body = bincode::serialize(record)?;
        if body.len() > MAX_BODY_SIZE {
            return Err(StorageError::Capacity(format!(
                "Encoded record is {} bytes, limit {}",
                body.len(),
                MAX_BODY_SIZE
            )));
        }

        // size | data | crc32
        let mut frame = Vec::with_capacity(body.len() + FRAME_OVERHEAD as usize);
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());

        let offset = self.len;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&frame)?;

        if self.durability.requires_immediate_sync() {
            self.file.sync_data()?;
        }

        self.len += frame.len() as u64;
        Ok(offset as i64)
    }

    /// Read the record at `offset`
    pub fn read(&self, offset: i64) -> Result<ImageRecord> {
        if offset < 0 || offset as u64 + FRAME_OVERHEAD > self.len {
            return Err(StorageError::Corruption(format!(
                "Payload offset {} is outside {} ({} bytes)",
                offset,
                self.path.display(),
                self.len
            )));
        }

        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset as u64))?;

        let mut size_buf = [0u8; 4];
        file.read_exact(&mut size_buf)?;
        let size = u32::from_le_bytes(size_buf) as usize;

        if size > MAX_BODY_SIZE || offset as u64 + FRAME_OVERHEAD + size as u64 > self.len {
            return Err(StorageError::Corruption(format!(
                "Record at {} claims {} bytes",
                offset, size
            )));
        }

        let mut body = vec![0u8; size];
        file.read_exact(&mut body)?;

        let mut crc_buf = [0u8; 4];
        file.read_exact(&mut crc_buf)?;
        let stored_crc = u32::from_le_bytes(crc_buf);
        let computed_crc = crc32fast::hash(&body);
        if stored_crc != computed_crc {
            return Err(StorageError::Corruption(format!(
                "Record CRC mismatch at {}: stored {:08x}, computed {:08x}",
                offset, stored_crc, computed_crc
            )));
        }

        let record: ImageRecord = bincode::deserialize(&body)
            .map_err(|e| StorageError::Corruption(format!("Undecodable record at {}: {}", offset, e)))?;
        record.validate()?;
        Ok(record)
    }

    /// Force appended records to disk
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
