//! Composite index key: (source name, threshold) plus a payload back-reference

use crate::config::NAME_CAPACITY;
use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Serialized key size: name[NAME_CAPACITY] + threshold(4) + payload_offset(8)
pub const KEY_SIZE: usize = NAME_CAPACITY + 4 + 8;

/// Back-reference of a key that does not point at a record yet
pub const NO_PAYLOAD: i64 = -1;

/// Identifies one thresholded variant of a named source image.
///
/// Ordering (see [`ImageKey::compare`]) is by name bytes, then threshold.
/// `payload_offset` is a back-reference into the record store and takes no
/// part in ordering; the derived `PartialEq` compares all three fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageKey {
    name: String,
    threshold: i32,
    payload_offset: i64,
}

impl ImageKey {
    /// Key without a payload, for lookups and removals
    pub fn new(name: impl Into<String>, threshold: i32) -> Result<Self> {
        Self::with_offset(name, threshold, NO_PAYLOAD)
    }

    pub fn with_offset(name: impl Into<String>, threshold: i32, payload_offset: i64) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { name, threshold, payload_offset })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    pub fn payload_offset(&self) -> i64 {
        self.payload_offset
    }

    pub fn set_payload_offset(&mut self, offset: i64) {
        self.payload_offset = offset;
    }

    /// Index order: lexicographic by name bytes, threshold as tie-break
    pub fn compare(&self, other: &ImageKey) -> Ordering {
        self.name
            .as_bytes()
            .cmp(other.name.as_bytes())
            .then(self.threshold.cmp(&other.threshold))
    }

    /// Same (name, threshold), regardless of back-reference
    pub fn same_identity(&self, other: &ImageKey) -> bool {
        self.compare(other) == Ordering::Equal
    }

    pub fn identity(&self) -> (&str, i32) {
        (&self.name, self.threshold)
    }

    /// Write the fixed-size form into `buf[..KEY_SIZE]`
    pub(crate) fn encode_into(&self, buf: &mut [u8]) {
        let name = self.name.as_bytes();
        buf[..NAME_CAPACITY].fill(0);
        buf[..name.len()].copy_from_slice(name);

        let mut offset = NAME_CAPACITY;
        buf[offset..offset + 4].copy_from_slice(&self.threshold.to_le_bytes());
        offset += 4;
        buf[offset..offset + 8].copy_from_slice(&self.payload_offset.to_le_bytes());
    }

    /// Read the fixed-size form from `buf[..KEY_SIZE]`
    pub(crate) fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < KEY_SIZE {
            return Err(StorageError::Corruption(format!(
                "Key slot too small: {} bytes",
                buf.len()
            )));
        }

        let raw = &buf[..NAME_CAPACITY];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(NAME_CAPACITY);
        let name = std::str::from_utf8(&raw[..end])
            .map_err(|e| StorageError::Corruption(format!("Key name is not UTF-8: {}", e)))?
            .to_string();

        let mut offset = NAME_CAPACITY;
        let threshold = i32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]]);
        offset += 4;
        let mut off_bytes = [0u8; 8];
        off_bytes.copy_from_slice(&buf[offset..offset + 8]);
        let payload_offset = i64::from_le_bytes(off_bytes);

        Ok(Self { name, threshold, payload_offset })
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, threshold={} (offset: {})", self.name, self.threshold, self.payload_offset)
    }
}

/// Names must be non-empty, NUL-free and leave room for the NUL terminator
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StorageError::InvalidArgument("Key name is empty".into()));
    }
    if name.as_bytes().contains(&0) {
        return Err(StorageError::InvalidArgument(format!(
            "Key name contains a NUL byte: {:?}",
            name
        )));
    }
    if name.len() >= NAME_CAPACITY {
        return Err(StorageError::Capacity(format!(
            "Key name is {} bytes, at most {} allowed",
            name.len(),
            NAME_CAPACITY - 1
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_name_then_threshold() {
        let a = ImageKey::new("x.pgm", 50).unwrap();
        let b = ImageKey::new("x.pgm", 100).unwrap();
        let c = ImageKey::new("y.pgm", 0).unwrap();

        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(b.compare(&c), Ordering::Less);
        assert_eq!(c.compare(&a), Ordering::Greater);
    }

    #[test]
    fn test_payload_offset_not_part_of_order() {
        let a = ImageKey::with_offset("x.pgm", 50, 0).unwrap();
        let b = ImageKey::with_offset("x.pgm", 50, 4096).unwrap();
        assert!(a.same_identity(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_name_validation() {
        assert!(matches!(ImageKey::new("", 1), Err(StorageError::InvalidArgument(_))));
        assert!(matches!(ImageKey::new("a\0b", 1), Err(StorageError::InvalidArgument(_))));

        let longest = "n".repeat(NAME_CAPACITY - 1);
        assert!(ImageKey::new(longest, 1).is_ok());
        let too_long = "n".repeat(NAME_CAPACITY);
        assert!(matches!(ImageKey::new(too_long, 1), Err(StorageError::Capacity(_))));
    }

    #[test]
    fn test_fixed_layout() {
        let key = ImageKey::with_offset("img/lena.pgm", -7, 123_456).unwrap();
        let mut buf = vec![0xAAu8; KEY_SIZE];
        key.encode_into(&mut buf);

        assert_eq!(&buf[..12], b"img/lena.pgm");
        assert!(buf[12..NAME_CAPACITY].iter().all(|&b| b == 0));
        assert_eq!(ImageKey::decode(&buf).unwrap(), key);
    }
}
