use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::storage::Storage;

/// Directory backend: one file per block, file name equals the block key.
///
/// Keys produced by this crate are hex strings plus the reserved names, so
/// they are always valid file names.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<FsStorage> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(FsStorage { root })
    }

    fn path_of(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

impl Storage for FsStorage {
    fn put_block(&self, id: &str, data: &[u8]) -> Result<()> {
        fs::write(self.path_of(id), data)?;
        Ok(())
    }

    fn get_block(&self, id: &str) -> Result<Vec<u8>> {
        match fs::read(self.path_of(id)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::BlockNotFound),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_block(&self, id: &str) -> Result<()> {
        match fs::remove_file(self.path_of(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_blocks(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(prefix) {
                    keys.push(name.to_string());
                }
            }
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_read_write() {
        let dir = tempfile::tempdir().unwrap();
        let back = FsStorage::new(dir.path()).unwrap();

        back.put_block("test-key", b"Test Data").unwrap();
        assert_eq!(back.get_block("test-key").unwrap(), b"Test Data");
    }

    #[test]
    fn delete_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let back = FsStorage::new(dir.path()).unwrap();

        back.put_block("k", b"v").unwrap();
        back.delete_block("k").unwrap();
        back.delete_block("k").unwrap();
        assert!(matches!(back.get_block("k"), Err(Error::BlockNotFound)));
    }

    #[test]
    fn list_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let back = FsStorage::new(dir.path()).unwrap();

        back.put_block("Pone", b"1").unwrap();
        back.put_block("two", b"2").unwrap();

        assert_eq!(back.list_blocks("P").unwrap(), vec!["Pone"]);
    }
}
