//! Persistence Operations (Flush, Close & Compaction)

use crate::database::core::ImageDB;
use crate::index::{CompactionStats, Compactor};
use crate::Result;
use log::{info, warn};

impl ImageDB {
    /// Force the index and the payload file to disk
    pub fn flush(&self) -> Result<()> {
        self.tree.flush()?;
        self.records.sync()?;
        Ok(())
    }

    /// Flush and release the handle
    pub fn close(mut self) -> Result<()> {
        self.finish()?;
        info!("closed {}", self.config.index_path.display());
        Ok(())
    }

    /// Final flush, run at most once per handle. Returns whether it ran.
    fn finish(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        self.flush()?;
        self.closed = true;
        Ok(true)
    }

    /// Rewrite both files without tombstoned pages or orphaned payloads.
    ///
    /// Keys keep their order; payloads are packed in key order and every
    /// back-reference is updated.
    pub fn compact(&mut self) -> Result<CompactionStats> {
        Compactor::new(&mut self.tree, &mut self.records).run()
    }
}

impl Drop for ImageDB {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("flush on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::DBConfig;
    use crate::database::ImageDB;
    use crate::types::{ImageKey, ImageRecord};
    use tempfile::TempDir;

    fn source(name: &str) -> ImageRecord {
        let pixels = (0..64u32).map(|v| (v * 4) as u8).collect();
        ImageRecord::new(name, 8, 8, 255, pixels).unwrap()
    }

    #[test]
    fn test_reopen_after_close() {
        let temp_dir = TempDir::new().unwrap();
        let config = DBConfig::for_testing(temp_dir.path());

        {
            let mut db = ImageDB::open_with_config(config.clone()).unwrap();
            db.insert_thresholds(&source("a.pgm"), &[10, 20, 30]).unwrap();
            db.insert_thresholds(&source("b.pgm"), &[15]).unwrap();
            db.close().unwrap();
        }

        let db = ImageDB::open_with_config(config).unwrap();
        assert_eq!(db.verify().unwrap(), 4);
        let record = db.load_image(&ImageKey::new("b.pgm", 15).unwrap()).unwrap();
        assert_eq!(record.threshold, Some(15));
        assert_eq!(record.width, 8);
    }

    #[test]
    fn test_final_flush_runs_once() {
        let temp_dir = TempDir::new().unwrap();
        let mut db = ImageDB::open_with_config(DBConfig::for_testing(temp_dir.path())).unwrap();
        db.insert_thresholds(&source("a.pgm"), &[10]).unwrap();

        assert!(db.finish().unwrap());
        // what Drop sees after close
        assert!(!db.finish().unwrap());
        drop(db);

        let db = ImageDB::open_with_config(DBConfig::for_testing(temp_dir.path())).unwrap();
        assert_eq!(db.verify().unwrap(), 1);
    }

    #[test]
    fn test_compaction_keeps_keys_and_payload_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let mut db = ImageDB::open_with_config(DBConfig::for_testing(temp_dir.path())).unwrap();

        for name in ["d.pgm", "a.pgm", "c.pgm", "b.pgm"] {
            db.insert_thresholds(&source(name), &[32, 64, 96, 128, 160]).unwrap();
        }
        for name in ["a.pgm", "c.pgm"] {
            for t in [64, 128] {
                db.remove(&ImageKey::new(name, t).unwrap()).unwrap();
            }
        }

        let keys_before = db.traverse().unwrap();
        let payloads_before: Vec<ImageRecord> = keys_before.iter().map(|k| db.load_image(k).unwrap()).collect();
        let stats_before = db.stats().unwrap();

        let compaction = db.compact().unwrap();
        assert!(compaction.records_moved > 0);
        assert!(compaction.pages_after <= compaction.pages_before);

        let keys_after = db.traverse().unwrap();
        let identities = |keys: &[ImageKey]| -> Vec<(String, i32)> {
            keys.iter().map(|k| (k.name().to_string(), k.threshold())).collect()
        };
        assert_eq!(identities(&keys_after), identities(&keys_before));

        let payloads_after: Vec<ImageRecord> = keys_after.iter().map(|k| db.load_image(k).unwrap()).collect();
        assert_eq!(payloads_after, payloads_before);

        let stats_after = db.stats().unwrap();
        assert!(stats_after.record_bytes < stats_before.record_bytes);
        assert_eq!(stats_after.height, stats_before.height);
        assert_eq!(db.verify().unwrap(), 16);

        // still a working database afterwards
        db.insert_thresholds(&source("e.pgm"), &[1]).unwrap();
        assert_eq!(db.verify().unwrap(), 17);
    }
}
