//! Stored image payload

use crate::config::MAX_PIXELS;
use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};

/// An 8-bit grayscale image as kept in the record store.
///
/// Source images decoded from PGM carry `threshold: None`; binary variants
/// produced by the threshold transform carry the threshold that made them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub source_name: String,
    pub threshold: Option<i32>,
    pub width: u32,
    pub height: u32,
    pub max_value: u8,
    pub pixels: Vec<u8>,
}

impl ImageRecord {
    pub fn new(
        source_name: impl Into<String>,
        width: u32,
        height: u32,
        max_value: u8,
        pixels: Vec<u8>,
    ) -> Result<Self> {
        let record = Self {
            source_name: source_name.into(),
            threshold: None,
            width,
            height,
            max_value,
            pixels,
        };
        record.validate()?;
        Ok(record)
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    /// Checks dimensions against the pixel buffer and the pixel cap.
    ///
    /// Called by the codec, the transform and the record store, so an
    /// oversized image is rejected at every boundary.
    pub fn validate(&self) -> Result<()> {
        let expected = checked_pixel_count(self.width, self.height)?;
        if self.pixels.len() != expected {
            return Err(StorageError::Format(format!(
                "{}: {}x{} image carries {} pixels, expected {}",
                self.source_name,
                self.width,
                self.height,
                self.pixels.len(),
                expected
            )));
        }
        if self.max_value == 0 {
            return Err(StorageError::Format(format!("{}: max value is 0", self.source_name)));
        }
        Ok(())
    }
}

/// `width * height`, rejecting overflow and anything above `MAX_PIXELS`
pub fn checked_pixel_count(width: u32, height: u32) -> Result<usize> {
    let count = (width as usize)
        .checked_mul(height as usize)
        .filter(|&n| n <= MAX_PIXELS)
        .ok_or_else(|| {
            StorageError::Format(format!(
                "Image {}x{} exceeds the {} pixel limit",
                width, height, MAX_PIXELS
            ))
        })?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_record() {
        let record = ImageRecord::new("a.pgm", 3, 2, 255, vec![0, 1, 2, 3, 4, 5]).unwrap();
        assert_eq!(record.pixel_count(), 6);
        assert_eq!(record.threshold, None);
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = ImageRecord::new("a.pgm", 3, 3, 255, vec![0; 6]).unwrap_err();
        assert!(matches!(err, StorageError::Format(_)));
    }

    #[test]
    fn test_pixel_cap() {
        assert!(checked_pixel_count(640, 480).is_ok());
        assert!(matches!(checked_pixel_count(641, 480), Err(StorageError::Format(_))));
        assert!(checked_pixel_count(u32::MAX, u32::MAX).is_err());
    }
}
