//! Keyed store for named repository items (manifests, policies, formats)
//! layered on the same flat backend as everything else, with authenticated
//! encryption when the repository asks for it.

pub mod cache;

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use parking_lot::Mutex;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::key::KeyManager;
use crate::metadata::cache::MetadataCache;
use crate::storage::Storage;

/// Metadata encryption algorithm for new repositories.
pub const DEFAULT_ENCRYPTION_ALGORITHM: &str = "AES256_GCM";

pub const SUPPORTED_ENCRYPTION_ALGORITHMS: [&str; 2] = ["AES256_GCM", "NONE"];

const PURPOSE_AES_KEY: &[u8] = b"AES";
const PURPOSE_AUTH_DATA: &[u8] = b"CHECKSUM";

const NONCE_LENGTH: usize = 12;

/// Bounded worker pools; pool sizes are part of the repository contract.
const PARALLEL_FETCHES: usize = 5;
const PARALLEL_REMOVALS: usize = 30;

/// Names reserved for repository bootstrap blocks.
const RESERVED_NAMES: [&str; 2] = ["format", "repo"];

/// Stored in plain text under the reserved `format` name.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetadataFormat {
    pub version: String,
    #[serde(rename = "encryption")]
    pub encryption_algorithm: String,
}

/// Manages named metadata items in a repository.
pub struct Manager {
    format: MetadataFormat,
    cache: MetadataCache,
    aead: Option<Aes256Gcm>,
    auth_data: Vec<u8>,
}

impl Manager {
    pub fn new(
        storage: Arc<dyn Storage>,
        format: MetadataFormat,
        key_manager: &KeyManager,
    ) -> Result<Manager> {
        let (aead, auth_data) = match format.encryption_algorithm.as_str() {
            "NONE" => (None, Vec::new()),
            "AES256_GCM" => {
                let aes_key = key_manager.derive_key(PURPOSE_AES_KEY, 32);
                let auth_data = key_manager.derive_key(PURPOSE_AUTH_DATA, 32);
                let cipher = Aes256Gcm::new_from_slice(&aes_key)
                    .expect("derived key length matches cipher");
                (Some(cipher), auth_data)
            }
            other => {
                return Err(Error::Config(format!(
                    "unknown encryption algorithm: '{}'",
                    other
                )))
            }
        };

        Ok(Manager {
            format,
            cache: MetadataCache::new(storage),
            aead,
            auth_data,
        })
    }

    pub fn format(&self) -> &MetadataFormat {
        &self.format
    }

    /// Saves content under a name. Reserved names are rejected.
    pub fn put(&self, item_id: &str, content: &[u8]) -> Result<()> {
        check_reserved_name(item_id)?;
        self.write_encrypted_block(item_id, content)
    }

    /// Returns the contents of a named item; `NotFound` when absent.
    pub fn get(&self, item_id: &str) -> Result<Vec<u8>> {
        check_reserved_name(item_id)?;
        self.read_encrypted_block(item_id)
    }

    /// Reads and parses an item as JSON. Used internally for the reserved
    /// bootstrap items too, so no reserved-name check here.
    pub fn get_json<T: DeserializeOwned>(&self, item_id: &str) -> Result<T> {
        let content = self.read_encrypted_block(item_id)?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Serializes a value as JSON and stores it under the given name.
    pub fn put_json<T: Serialize>(&self, item_id: &str, content: &T) -> Result<()> {
        let j = serde_json::to_vec(content)?;
        self.write_encrypted_block(item_id, &j)
    }

    /// Sorted names of items starting with `prefix`.
    pub fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.cache.list(prefix)
    }

    /// Fetches the contents of every item starting with `prefix`.
    pub fn list_contents(&self, prefix: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        let item_ids = self.list(prefix)?;
        self.multi_get(&item_ids)
    }

    /// Fetches many items over a pool of `PARALLEL_FETCHES` workers.
    /// Missing items are omitted from the map; the first real error wins.
    pub fn multi_get(&self, item_ids: &[String]) -> Result<BTreeMap<String, Vec<u8>>> {
        let results = self.fan_out(item_ids, PARALLEL_FETCHES, |id| self.get(id));

        let mut map = BTreeMap::new();
        let mut first_err = None;
        for (id, result) in results {
            match result {
                Ok(contents) => {
                    map.insert(id, contents);
                }
                Err(Error::NotFound) => {}
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(map),
        }
    }

    /// Removes a named item.
    pub fn remove(&self, item_id: &str) -> Result<()> {
        check_reserved_name(item_id)?;
        self.cache.delete(item_id)
    }

    /// Removes many items over a pool of `PARALLEL_REMOVALS` workers;
    /// the first error wins.
    pub fn remove_many(&self, item_ids: &[String]) -> Result<()> {
        let results = self.fan_out(item_ids, PARALLEL_REMOVALS, |id| self.remove(id));

        for (_, result) in results {
            result?;
        }
        Ok(())
    }

    pub fn refresh_cache(&self) -> Result<()> {
        self.cache.refresh()
    }

    /// Workers drain a shared input channel and push `(id, outcome)` pairs
    /// back; the caller collects once the channel closes. Order does not
    /// matter to any caller.
    fn fan_out<T, F>(&self, item_ids: &[String], workers: usize, op: F) -> Vec<(String, Result<T>)>
    where
        T: Send,
        F: Fn(&str) -> Result<T> + Sync,
    {
        let (work_tx, work_rx) = mpsc::channel::<String>();
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (result_tx, result_rx) = mpsc::channel();

        thread::scope(|s| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                let op = &op;
                s.spawn(move || loop {
                    let id = match work_rx.lock().recv() {
                        Ok(id) => id,
                        Err(_) => break,
                    };
                    let outcome = op(&id);
                    if result_tx.send((id, outcome)).is_err() {
                        break;
                    }
                });
            }

            for id in item_ids {
                let _ = work_tx.send(id.clone());
            }
            drop(work_tx);
            drop(result_tx);

            result_rx.into_iter().collect()
        })
    }

    fn write_encrypted_block(&self, item_id: &str, content: &[u8]) -> Result<()> {
        let blob = match &self.aead {
            None => content.to_vec(),
            Some(cipher) => {
                let mut nonce = [0u8; NONCE_LENGTH];
                rand::thread_rng().fill_bytes(&mut nonce);

                let ciphertext = cipher
                    .encrypt(
                        Nonce::from_slice(&nonce),
                        Payload {
                            msg: content,
                            aad: &self.auth_data,
                        },
                    )
                    .map_err(|_| Error::Malformed("metadata encryption failed".to_string()))?;

                // nonce || ciphertext || tag
                let mut blob = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
                blob.extend_from_slice(&nonce);
                blob.extend_from_slice(&ciphertext);
                blob
            }
        };

        self.cache.put(item_id, &blob)
    }

    fn read_encrypted_block(&self, item_id: &str) -> Result<Vec<u8>> {
        let content = match self.cache.get(item_id) {
            Ok(content) => content,
            Err(Error::BlockNotFound) => return Err(Error::NotFound),
            Err(e) => return Err(e),
        };

        self.decrypt_block(content)
    }

    fn decrypt_block(&self, content: Vec<u8>) -> Result<Vec<u8>> {
        match &self.aead {
            None => Ok(content),
            Some(cipher) => {
                if content.len() < NONCE_LENGTH {
                    return Err(Error::Malformed(
                        "metadata item shorter than its nonce".to_string(),
                    ));
                }
                let (nonce, payload) = content.split_at(NONCE_LENGTH);
                cipher
                    .decrypt(
                        Nonce::from_slice(nonce),
                        Payload {
                            msg: payload,
                            aad: &self.auth_data,
                        },
                    )
                    .map_err(|_| {
                        Error::Malformed("metadata authentication failed".to_string())
                    })
            }
        }
    }
}

fn check_reserved_name(item_id: &str) -> Result<()> {
    if RESERVED_NAMES.contains(&item_id) {
        return Err(Error::InvalidArgument(format!(
            "invalid metadata item name: '{}'",
            item_id
        )));
    }
    Ok(())
}
