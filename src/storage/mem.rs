use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::storage::Storage;

/// In-memory backend over a shared key/value map.
///
/// Clones share the same map, so a repository can be closed and re-opened
/// over identical contents, and tests can inspect or seed raw blocks
/// directly.
#[derive(Clone, Default)]
pub struct MemStorage {
    data: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemStorage {
    pub fn new() -> MemStorage {
        MemStorage::default()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.lock().keys().cloned().collect()
    }

    /// Raw payload access for seeding and corrupting blocks in tests.
    pub fn insert_raw(&self, id: &str, data: Vec<u8>) {
        self.data.lock().insert(id.to_string(), data);
    }

    pub fn get_raw(&self, id: &str) -> Option<Vec<u8>> {
        self.data.lock().get(id).cloned()
    }
}

impl Storage for MemStorage {
    fn put_block(&self, id: &str, data: &[u8]) -> Result<()> {
        self.data.lock().insert(id.to_string(), data.to_vec());
        Ok(())
    }

    fn get_block(&self, id: &str) -> Result<Vec<u8>> {
        self.data.lock().get(id).cloned().ok_or(Error::BlockNotFound)
    }

    fn delete_block(&self, id: &str) -> Result<()> {
        self.data.lock().remove(id);
        Ok(())
    }

    fn list_blocks(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .data
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_read_write() {
        let back = MemStorage::new();

        back.put_block("test-key", b"Test Data").unwrap();
        assert_eq!(back.get_block("test-key").unwrap(), b"Test Data");
    }

    #[test]
    fn overwrite_read_write() {
        let back = MemStorage::new();

        back.put_block("test-key", b"Test Data").unwrap();
        back.put_block("test-key", b"Data Test").unwrap();
        assert_eq!(back.get_block("test-key").unwrap(), b"Data Test");
    }

    #[test]
    fn missing_key_is_not_found() {
        let back = MemStorage::new();

        assert!(matches!(
            back.get_block("nope"),
            Err(Error::BlockNotFound)
        ));
    }

    #[test]
    fn list_by_prefix() {
        let back = MemStorage::new();

        back.put_block("Pabc", b"1").unwrap();
        back.put_block("Pdef", b"2").unwrap();
        back.put_block("zzz", b"3").unwrap();

        let mut keys = back.list_blocks("P").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["Pabc", "Pdef"]);
        assert_eq!(back.list_blocks("").unwrap().len(), 3);
    }

    #[test]
    fn clones_share_contents() {
        let back = MemStorage::new();
        let other = back.clone();

        back.put_block("k", b"v").unwrap();
        assert_eq!(other.get_block("k").unwrap(), b"v");

        other.delete_block("k").unwrap();
        assert!(back.get_block("k").is_err());
    }
}
