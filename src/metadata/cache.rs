use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::Storage;

/// Caches the list of known metadata block IDs so repeated `list` calls
/// stay off the backend. Contents are never cached, only names; puts and
/// removes keep the list current and `refresh` re-reads it outright.
pub struct MetadataCache {
    storage: Arc<dyn Storage>,
    ids: Mutex<Option<Vec<String>>>,
}

impl MetadataCache {
    pub fn new(storage: Arc<dyn Storage>) -> MetadataCache {
        MetadataCache {
            storage,
            ids: Mutex::new(None),
        }
    }

    pub fn get(&self, id: &str) -> Result<Vec<u8>> {
        self.storage.get_block(id)
    }

    pub fn put(&self, id: &str, data: &[u8]) -> Result<()> {
        self.storage.put_block(id, data)?;

        let mut ids = self.ids.lock();
        if let Some(list) = ids.as_mut() {
            if let Err(pos) = list.binary_search_by(|x| x.as_str().cmp(id)) {
                list.insert(pos, id.to_string());
            }
        }
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.storage.delete_block(id)?;

        let mut ids = self.ids.lock();
        if let Some(list) = ids.as_mut() {
            if let Ok(pos) = list.binary_search_by(|x| x.as_str().cmp(id)) {
                list.remove(pos);
            }
        }
        Ok(())
    }

    pub fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut ids = self.ids.lock();
        if ids.is_none() {
            let mut fresh = self.storage.list_blocks("")?;
            fresh.sort();
            *ids = Some(fresh);
        }
        let list = ids.as_ref().expect("just populated");

        Ok(list
            .iter()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect())
    }

    /// Drops the cached list; the next `list` re-reads the backend.
    pub fn refresh(&self) -> Result<()> {
        let mut fresh = self.storage.list_blocks("")?;
        fresh.sort();
        *self.ids.lock() = Some(fresh);
        Ok(())
    }
}
