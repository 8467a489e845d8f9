//! Whole-file replacement: write a temp file next to the target, then rename

use crate::Result;
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Sibling path used while rebuilding `target`
pub fn temp_path(target: &Path) -> PathBuf {
    let mut name: OsString = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".compact.tmp");
    target.with_file_name(name)
}

/// Atomically move `temp` over `target` and persist the rename.
///
/// `temp` must already be fully written and synced.
pub fn replace_file(temp: &Path, target: &Path) -> Result<()> {
    // Atomic rename (POSIX guarantee)
    std::fs::rename(temp, target)?;

    // fsync parent directory so the rename itself is durable
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let dir = File::open(dir)?;
        let rc = unsafe { libc::fsync(dir.as_raw_fd()) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
    }

    #[cfg(not(unix))]
    {
        File::open(target)?.sync_all()?;
    }

    log::debug!("replaced {} with {}", target.display(), temp.display());
    Ok(())
}

/// Best-effort removal of an abandoned temp file
pub fn discard_temp(temp: &Path) {
    match std::fs::remove_file(temp) {
        Ok(()) => log::debug!("removed abandoned {}", temp.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("could not remove {}: {}", temp.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_temp_path_is_sibling() {
        let target = Path::new("/data/models/index.bin");
        assert_eq!(temp_path(target), PathBuf::from("/data/models/index.bin.compact.tmp"));
    }

    #[test]
    fn test_replace_file() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("records.bin");
        std::fs::write(&target, b"old contents").unwrap();

        let temp = temp_path(&target);
        std::fs::write(&temp, b"new").unwrap();
        replace_file(&temp, &target).unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        assert!(!temp.exists());
    }

    #[test]
    fn test_discard_temp() {
        let temp_dir = TempDir::new().unwrap();
        let temp = temp_path(&temp_dir.path().join("index.bin"));
        std::fs::write(&temp, b"partial").unwrap();

        discard_temp(&temp);
        assert!(!temp.exists());

        // already gone
        discard_temp(&temp);
    }
}
