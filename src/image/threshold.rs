//! Binary variants of a source image

use crate::types::ImageRecord;
use crate::{Result, StorageError};

/// Sample value of a foreground pixel
pub const WHITE: u8 = 255;

/// Sample value of a background pixel
pub const BLACK: u8 = 0;

/// Thresholds must address an 8-bit sample
pub fn validate_threshold(threshold: i32) -> Result<()> {
    if !(0..=u8::MAX as i32).contains(&threshold) {
        return Err(StorageError::InvalidArgument(format!(
            "Threshold {} is outside 0..=255",
            threshold
        )));
    }
    Ok(())
}

/// Pixels `>= threshold` become white, the rest black.
///
/// The result keeps the source name and dimensions, records the threshold,
/// and uses a max value of 255 so every sample stays within range.
pub fn binarize(source: &ImageRecord, threshold: i32) -> Result<ImageRecord> {
    validate_threshold(threshold)?;
    source.validate()?;

    let pixels = source
        .pixels
        .iter()
        .map(|&p| if p as i32 >= threshold { WHITE } else { BLACK })
        .collect();

    let record = ImageRecord {
        source_name: source.source_name.clone(),
        threshold: Some(threshold),
        width: source.width,
        height: source.height,
        max_value: WHITE,
        pixels,
    };
    record.validate()?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient() -> ImageRecord {
        ImageRecord::new("g.pgm", 4, 1, 200, vec![0, 99, 100, 200]).unwrap()
    }

    #[test]
    fn test_binarize() {
        let binary = binarize(&gradient(), 100).unwrap();
        assert_eq!(binary.pixels, vec![BLACK, BLACK, WHITE, WHITE]);
        assert_eq!(binary.threshold, Some(100));
        assert_eq!(binary.source_name, "g.pgm");
        assert_eq!(binary.max_value, 255);
    }

    #[test]
    fn test_threshold_bounds() {
        assert!(binarize(&gradient(), 0).unwrap().pixels.iter().all(|&p| p == WHITE));
        assert_eq!(binarize(&gradient(), 255).unwrap().pixels, vec![BLACK; 4]);
        assert!(matches!(binarize(&gradient(), -1), Err(StorageError::InvalidArgument(_))));
        assert!(matches!(binarize(&gradient(), 256), Err(StorageError::InvalidArgument(_))));
    }

    #[test]
    fn test_invalid_source_rejected() {
        let mut source = gradient();
        source.width = 5;
        assert!(matches!(binarize(&source, 10), Err(StorageError::Format(_))));
    }
}
