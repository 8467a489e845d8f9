//! Key and image operations
//!
//! Search, insert, remove and traverse act on index keys directly. The
//! image-level operations pair each key with a record appended to the
//! Record Store and validate their whole input before the first write.

use crate::database::core::ImageDB;
use crate::image::{binarize, decode_pgm, validate_threshold, write_pgm, PgmFormat};
use crate::types::{validate_name, ImageKey, ImageRecord, NO_PAYLOAD};
use crate::{Result, StorageError};
use log::{debug, info};
use std::path::Path;

impl ImageDB {
    /// Find a key by (name, threshold)
    pub fn search(&self, key: &ImageKey) -> Result<Option<ImageKey>> {
        self.tree.search(key)
    }

    /// Insert a key as is; an existing (name, threshold) gets the new
    /// back-reference and the previous key is returned
    pub fn insert(&mut self, key: ImageKey) -> Result<Option<ImageKey>> {
        self.tree.insert(key)
    }

    /// Remove a key; `None` when it is not present
    pub fn remove(&mut self, key: &ImageKey) -> Result<Option<ImageKey>> {
        let removed = self.tree.remove(key)?;
        if let Some(ref k) = removed {
            debug!("removed [{}]", k);
        }
        Ok(removed)
    }

    /// All keys in (name, threshold) order
    pub fn traverse(&self) -> Result<Vec<ImageKey>> {
        self.tree.traverse()
    }

    /// Store a thresholded record and index it under its (name, threshold)
    pub fn insert_image(&mut self, record: &ImageRecord) -> Result<ImageKey> {
        let threshold = record.threshold.ok_or_else(|| {
            StorageError::InvalidArgument(format!("{} carries no threshold", record.source_name))
        })?;
        validate_threshold(threshold)?;
        validate_name(&record.source_name)?;
        record.validate()?;

        let offset = self.records.append(record)?;
        let key = ImageKey::with_offset(record.source_name.clone(), threshold, offset)?;
        if let Some(old) = self.tree.insert(key.clone())? {
            debug!("replaced payload of [{}]", old);
        }
        Ok(key)
    }

    /// Derive and store one binary variant of `source` per threshold.
    ///
    /// The batch is rejected as a whole, before anything is written, if it is
    /// empty, larger than `max_thresholds_per_batch`, or holds a threshold
    /// outside 0..=255.
    pub fn insert_thresholds(&mut self, source: &ImageRecord, thresholds: &[i32]) -> Result<Vec<ImageKey>> {
        let limit = self.config.max_thresholds_per_batch;
        if thresholds.is_empty() {
            return Err(StorageError::InvalidArgument("No thresholds given".into()));
        }
        if thresholds.len() > limit {
            return Err(StorageError::Capacity(format!(
                "{} thresholds requested, at most {} per batch",
                thresholds.len(),
                limit
            )));
        }
        for &threshold in thresholds {
            validate_threshold(threshold)?;
        }
        validate_name(&source.source_name)?;
        source.validate()?;

        let mut keys = Vec::with_capacity(thresholds.len());
        for &threshold in thresholds {
            let binary = binarize(source, threshold)?;
            keys.push(self.insert_image(&binary)?);
        }

        info!("stored {} variants of {}", keys.len(), source.source_name);
        Ok(keys)
    }

    /// Decode a PGM file and store one variant per threshold
    pub fn import_pgm<P: AsRef<Path>>(&mut self, path: P, thresholds: &[i32]) -> Result<Vec<ImageKey>> {
        let source = decode_pgm(path)?;
        self.insert_thresholds(&source, thresholds)
    }

    /// Read the record a key points at
    pub fn load_image(&self, key: &ImageKey) -> Result<ImageRecord> {
        let found = self.tree.search(key)?.ok_or_else(|| {
            StorageError::NotFound(format!("{}, threshold={}", key.name(), key.threshold()))
        })?;
        if found.payload_offset() == NO_PAYLOAD {
            return Err(StorageError::NotFound(format!("No payload stored for [{}]", found)));
        }
        self.records.read(found.payload_offset())
    }

    /// Write the record a key points at as a PGM file
    pub fn export_image<P: AsRef<Path>>(&self, key: &ImageKey, path: P, format: PgmFormat) -> Result<()> {
        let record = self.load_image(key)?;
        write_pgm(&record, path.as_ref(), format)?;
        info!("exported [{}] to {} ({})", key, path.as_ref().display(), format.magic());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DBConfig;
    use crate::image::decode_pgm_bytes;
    use tempfile::TempDir;

    fn create_test_db() -> (ImageDB, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = ImageDB::open_with_config(DBConfig::for_testing(temp_dir.path())).unwrap();
        (db, temp_dir)
    }

    fn source() -> ImageRecord {
        ImageRecord::new("scan.pgm", 3, 2, 255, vec![0, 50, 100, 150, 200, 250]).unwrap()
    }

    #[test]
    fn test_insert_thresholds_and_load() {
        let (mut db, _temp) = create_test_db();
        let keys = db.insert_thresholds(&source(), &[100, 50, 200]).unwrap();
        assert_eq!(keys.len(), 3);

        let listed: Vec<i32> = db.traverse().unwrap().iter().map(|k| k.threshold()).collect();
        assert_eq!(listed, vec![50, 100, 200]);

        let binary = db.load_image(&ImageKey::new("scan.pgm", 100).unwrap()).unwrap();
        assert_eq!(binary.pixels, vec![0, 0, 255, 255, 255, 255]);
        assert_eq!(binary.threshold, Some(100));
        assert_eq!(db.verify().unwrap(), 3);
    }

    #[test]
    fn test_batch_rejected_before_mutation() {
        let (mut db, _temp) = create_test_db();
        let too_many: Vec<i32> = (0..21).collect();

        let err = db.insert_thresholds(&source(), &too_many).unwrap_err();
        assert!(matches!(err, StorageError::Capacity(_)));
        assert!(matches!(
            db.insert_thresholds(&source(), &[10, 300]),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(db.insert_thresholds(&source(), &[]).is_err());

        assert!(db.traverse().unwrap().is_empty());
        assert_eq!(db.stats().unwrap().record_bytes, 0);
    }

    #[test]
    fn test_search_and_remove() {
        let (mut db, _temp) = create_test_db();
        db.insert_thresholds(&source(), &[10, 20, 30, 40]).unwrap();

        let key = ImageKey::new("scan.pgm", 30).unwrap();
        let found = db.search(&key).unwrap().unwrap();
        assert!(found.payload_offset() >= 0);

        assert_eq!(db.remove(&key).unwrap(), Some(found));
        assert_eq!(db.search(&key).unwrap(), None);
        assert_eq!(db.remove(&key).unwrap(), None);
        assert!(matches!(db.load_image(&key), Err(StorageError::NotFound(_))));
        assert_eq!(db.verify().unwrap(), 3);
    }

    #[test]
    fn test_reinsert_replaces_payload() {
        let (mut db, _temp) = create_test_db();
        let first = db.insert_thresholds(&source(), &[100]).unwrap();
        let second = db.insert_thresholds(&source(), &[100]).unwrap();

        assert_ne!(first[0].payload_offset(), second[0].payload_offset());
        let stored = db.search(&ImageKey::new("scan.pgm", 100).unwrap()).unwrap().unwrap();
        assert_eq!(stored.payload_offset(), second[0].payload_offset());
        assert_eq!(db.traverse().unwrap().len(), 1);
    }

    #[test]
    fn test_import_and_export_pgm() {
        let (mut db, temp) = create_test_db();
        let input = temp.path().join("in.pgm");
        std::fs::write(&input, b"P2\n2 2\n255\n10 20\n30 40\n").unwrap();

        let keys = db.import_pgm(&input, &[25]).unwrap();
        let output = temp.path().join("out.pgm");
        db.export_image(&keys[0], &output, PgmFormat::Ascii).unwrap();

        let exported = decode_pgm_bytes("out.pgm", &std::fs::read(&output).unwrap()).unwrap();
        assert_eq!(exported.pixels, vec![0, 0, 255, 255]);
    }

    #[test]
    fn test_import_rejects_bad_images() {
        let (mut db, temp) = create_test_db();
        let ppm = temp.path().join("color.ppm");
        std::fs::write(&ppm, b"P6\n1 1\n255\n\x00\x00\x00").unwrap();
        assert!(matches!(db.import_pgm(&ppm, &[10]), Err(StorageError::Format(_))));

        let huge = temp.path().join("huge.pgm");
        std::fs::write(&huge, b"P5\n1000 1000\n255\n").unwrap();
        assert!(matches!(db.import_pgm(&huge, &[10]), Err(StorageError::Format(_))));
        assert!(db.traverse().unwrap().is_empty());
    }

    #[test]
    fn test_plain_key_insert() {
        let (mut db, _temp) = create_test_db();
        let key = ImageKey::new("bare.pgm", 1).unwrap();
        assert_eq!(db.insert(key.clone()).unwrap(), None);
        assert_eq!(db.search(&key).unwrap(), Some(key.clone()));
        assert!(matches!(db.load_image(&key), Err(StorageError::NotFound(_))));
    }
}
