use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use fs4::fs_std::FileExt;
use tempfile::TempDir;

use super::{Storage, WriteLock};
use crate::error::Result;

const TEMP_PREFIX: &str = ".fathom-tmp";

/// Storage backed by one filesystem directory
#[derive(Clone, Debug)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn sync_dir(&self) -> Result<()> {
        // directory fsync is not available everywhere
        #[cfg(unix)]
        File::open(&self.root)?.sync_all()?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn write_file(&self, name: &str, data: &[u8]) -> Result<()> {
        let mut file = File::create(self.path(name))?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    }

    fn read_file(&self, name: &str) -> Result<Bytes> {
        Ok(Bytes::from(fs::read(self.path(name))?))
    }

    fn exists(&self, name: &str) -> bool {
        self.path(name).exists()
    }

    fn delete(&self, name: &str) -> Result<()> {
        fs::remove_file(self.path(name))?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        fs::rename(self.path(from), self.path(to))?;
        self.sync_dir()
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn temp_dir(&self) -> Result<TempDir> {
        Ok(tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir_in(&self.root)?)
    }

    fn try_lock(&self, name: &str) -> Result<Option<WriteLock>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.path(name))?;
        if !file.try_lock_exclusive()? {
            return Ok(None);
        }
        Ok(Some(WriteLock::new(name, file)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::FathomError;
    use crate::storage::acquire_lock;

    #[test]
    fn test_file_roundtrip_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        storage.write_file("b.bin", b"beta").unwrap();
        storage.write_file("a.tmp", b"alpha").unwrap();
        storage.rename("a.tmp", "a.bin").unwrap();

        assert_eq!(storage.list().unwrap(), vec!["a.bin", "b.bin"]);
        assert_eq!(&storage.read_file("a.bin").unwrap()[..], b"alpha");
        assert!(!storage.exists("a.tmp"));

        storage.delete("b.bin").unwrap();
        assert!(!storage.exists("b.bin"));
        assert!(storage.read_file("b.bin").is_err());
    }

    #[test]
    fn test_temp_dir_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let temp = storage.temp_dir().unwrap();
        let path = temp.path().to_path_buf();
        assert!(path.exists());
        // temp dirs are not files, so they never show up in listings
        assert!(storage.list().unwrap().is_empty());
        drop(temp);
        assert!(!path.exists());
    }

    #[test]
    fn test_lock_contention_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let held = storage.try_lock("LOCK").unwrap().unwrap();
        assert_eq!(held.name(), "LOCK");

        let err = acquire_lock(
            &storage,
            "LOCK",
            Duration::from_millis(30),
            Duration::from_millis(5),
        )
        .unwrap_err();
        assert!(matches!(err, FathomError::Lock { .. }));
        assert!(err.is_retriable());

        drop(held);
        assert!(acquire_lock(&storage, "LOCK", Duration::ZERO, Duration::from_millis(5)).is_ok());
    }
}
