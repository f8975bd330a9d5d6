//! File-based storage backend for persistent table images.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A file-based image store.
///
/// The image lives at a stable path. `replace` installs a new image with the
/// write-temp-then-rename pattern:
///
/// 1. Write the image to `<name>.tmp`
/// 2. Sync the temp file to disk
/// 3. Rename the temp file over the stable name
///
/// `sync` then fsyncs the parent directory so the rename itself is durable.
/// A crash at any point leaves either the previous image or the new one.
///
/// # Thread Safety
///
/// Replacement is serialized by an internal mutex; reads open the file
/// independently and observe whichever image the last rename installed.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    write: Mutex<()>,
}

impl FileBackend {
    /// Creates a backend for the image at `path`.
    ///
    /// The file itself is not created until the first `replace`; a missing
    /// file reads as the empty image.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            write: Mutex::new(()),
        })
    }

    /// Returns the path of the image file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    #[cfg(unix)]
    fn sync_parent(&self) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_parent(&self) -> StorageResult<()> {
        // NTFS journaling covers metadata durability.
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn replace(&self, image: &[u8]) -> StorageResult<()> {
        let _guard = self.write.lock();
        let temp = self.temp_path();

        let mut file = File::create(&temp)?;
        file.write_all(image)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, &self.path)?;
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        let _guard = self.write.lock();
        self.sync_parent()
    }

    fn len(&self) -> StorageResult<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("table.dat")).unwrap();

        assert!(backend.read_all().unwrap().is_empty());
        assert_eq!(backend.len().unwrap(), 0);
        assert!(backend.is_empty().unwrap());
    }

    #[test]
    fn replace_and_read() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("table.dat")).unwrap();

        backend.replace(b"first image").unwrap();
        assert_eq!(backend.read_all().unwrap(), b"first image");

        backend.replace(b"second").unwrap();
        assert_eq!(backend.read_all().unwrap(), b"second");
        assert_eq!(backend.len().unwrap(), 6);
    }

    #[test]
    fn replace_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.dat");
        let backend = FileBackend::open(&path).unwrap();

        backend.replace(b"image").unwrap();
        backend.sync().unwrap();

        assert!(path.exists());
        assert!(!backend.temp_path().exists());
    }

    #[test]
    fn image_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.dat");

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.replace(b"persistent").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.read_all().unwrap(), b"persistent");
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("table.dat");

        let backend = FileBackend::open(&path).unwrap();
        backend.replace(b"x").unwrap();
        assert!(path.exists());
    }
}
