//! Repository bootstrap and facade.
//!
//! Two reserved storage keys carry the configuration:
//!     - `format`: plain-text JSON, version + metadata encryption algorithm
//!     - `repo`: repository format (block format, wrapped HMAC secret,
//!       splitter, size limits), stored through the metadata encryption
//!       layer so it is sealed whenever encryption is on
//!
//! Everything else in storage is content-addressed data, pack files, pack
//! indexes, and user metadata items.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::debug;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::block::{BlockManager, DEFAULT_MAX_PACK_FILE_LENGTH};
use crate::error::{Error, Result};
use crate::format::{BlockFormat, Formatter, FORMAT_VERSION};
use crate::key::KeyManager;
use crate::metadata::{Manager as MetadataManager, MetadataFormat};
use crate::object::writer::WriterOptions;
use crate::object::ObjectManager;
use crate::splitter;
use crate::storage::Storage;

/// Reserved key of the plain-text metadata format block.
pub const FORMAT_BLOCK_ID: &str = "format";

/// Reserved key of the repository format item.
pub const REPOSITORY_FORMAT_ID: &str = "repo";

/// Creation-time options; persisted into the two format blocks.
#[derive(Clone, Debug)]
pub struct NewRepositoryOptions {
    pub max_block_size: usize,
    pub splitter: String,
    pub block_format: String,
    pub object_hmac_secret: Vec<u8>,
    pub no_hmac: bool,
    pub metadata_encryption_algorithm: String,
    /// Blocks no longer than this get packed; -1 disables packing.
    pub max_packed_content_length: i64,
}

impl Default for NewRepositoryOptions {
    fn default() -> NewRepositoryOptions {
        NewRepositoryOptions {
            max_block_size: 16 << 20,
            splitter: splitter::DEFAULT_SPLITTER.to_string(),
            block_format: "UNENCRYPTED_HMAC_SHA256_128".to_string(),
            object_hmac_secret: Vec::new(),
            no_hmac: false,
            metadata_encryption_algorithm: crate::metadata::DEFAULT_ENCRYPTION_ALGORITHM
                .to_string(),
            max_packed_content_length: -1,
        }
    }
}

/// Connect-time tunables; nothing here is persisted.
#[derive(Clone, Debug)]
pub struct Options {
    /// Pack files roll over once their buffer would cross this size.
    pub max_pack_file_length: usize,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            max_pack_file_length: DEFAULT_MAX_PACK_FILE_LENGTH,
        }
    }
}

/// The `repo` item: everything needed to read objects back.
#[derive(Serialize, Deserialize, Debug, Clone)]
struct RepositoryFormat {
    version: String,
    #[serde(rename = "objectFormat")]
    block_format: String,
    #[serde(
        rename = "secret",
        serialize_with = "base64_bytes",
        deserialize_with = "base64_bytes_de"
    )]
    object_hmac_secret: Vec<u8>,
    #[serde(rename = "noHMAC", default)]
    no_hmac: bool,
    splitter: String,
    #[serde(rename = "maxBlockSize")]
    max_block_size: usize,
    #[serde(rename = "maxPackedContentLength")]
    max_packed_content_length: i64,
}

fn base64_bytes<S: Serializer>(x: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&STANDARD.encode(x))
}

fn base64_bytes_de<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<u8>, D::Error> {
    let s: String = Deserialize::deserialize(d)?;
    STANDARD.decode(s).map_err(serde::de::Error::custom)
}

/// Creates a new repository in empty storage: validates the options and
/// writes the two reserved format blocks. Storage census afterwards is
/// exactly those two keys.
pub fn initialize(
    storage: Arc<dyn Storage>,
    options: &NewRepositoryOptions,
    key_manager: &KeyManager,
) -> Result<()> {
    if !storage.list_blocks("")?.is_empty() {
        return Err(Error::InvalidArgument(
            "storage already contains a repository".to_string(),
        ));
    }

    // fail on bad combinations before anything lands in storage
    let format = BlockFormat::parse(&options.block_format)?;
    Formatter::new(format, &options.object_hmac_secret, options.no_hmac)?;
    splitter::new_splitter(&options.splitter, options.max_block_size)?;
    if options.max_block_size == 0 {
        return Err(Error::Config("max block size must be positive".to_string()));
    }

    let metadata_format = MetadataFormat {
        version: FORMAT_VERSION.to_string(),
        encryption_algorithm: options.metadata_encryption_algorithm.clone(),
    };
    // constructing the manager validates the encryption algorithm
    let metadata = MetadataManager::new(storage.clone(), metadata_format.clone(), key_manager)?;

    storage.put_block(FORMAT_BLOCK_ID, &serde_json::to_vec(&metadata_format)?)?;

    let repository_format = RepositoryFormat {
        version: FORMAT_VERSION.to_string(),
        block_format: options.block_format.clone(),
        object_hmac_secret: options.object_hmac_secret.clone(),
        no_hmac: options.no_hmac,
        splitter: options.splitter.clone(),
        max_block_size: options.max_block_size,
        max_packed_content_length: options.max_packed_content_length,
    };
    metadata.put_json(REPOSITORY_FORMAT_ID, &repository_format)?;

    debug!("initialized repository ({})", options.block_format);
    Ok(())
}

/// An open repository: objects, blocks, and metadata over one backend.
pub struct Repository {
    blocks: Arc<BlockManager>,
    objects: ObjectManager,
    metadata: MetadataManager,
}

impl Repository {
    pub fn open(storage: Arc<dyn Storage>, key_manager: &KeyManager) -> Result<Repository> {
        Repository::open_with_options(storage, key_manager, Options::default())
    }

    pub fn open_with_options(
        storage: Arc<dyn Storage>,
        key_manager: &KeyManager,
        options: Options,
    ) -> Result<Repository> {
        let raw = match storage.get_block(FORMAT_BLOCK_ID) {
            Ok(raw) => raw,
            Err(Error::BlockNotFound) => {
                return Err(Error::InvalidArgument(
                    "storage does not contain a repository".to_string(),
                ))
            }
            Err(e) => return Err(e),
        };
        let metadata_format: MetadataFormat = serde_json::from_slice(&raw)
            .map_err(|e| Error::Malformed(format!("format block does not parse: {}", e)))?;

        let metadata = MetadataManager::new(storage.clone(), metadata_format, key_manager)?;
        let repository_format: RepositoryFormat = metadata.get_json(REPOSITORY_FORMAT_ID)?;

        let format = BlockFormat::parse(&repository_format.block_format)?;
        let formatter = Formatter::new(
            format,
            &repository_format.object_hmac_secret,
            repository_format.no_hmac,
        )?;

        let blocks = Arc::new(BlockManager::new(
            storage,
            formatter,
            repository_format.max_packed_content_length,
            options.max_pack_file_length,
        )?);
        let objects = ObjectManager::new(
            blocks.clone(),
            &repository_format.splitter,
            repository_format.max_block_size,
        )?;

        debug!(
            "opened repository ({}, splitter {})",
            repository_format.block_format, repository_format.splitter
        );
        Ok(Repository {
            blocks,
            objects,
            metadata,
        })
    }

    pub fn objects(&self) -> &ObjectManager {
        &self.objects
    }

    pub fn blocks(&self) -> &BlockManager {
        &self.blocks
    }

    pub fn metadata(&self) -> &MetadataManager {
        &self.metadata
    }

    /// Writes out all pending pack groups and their index.
    pub fn flush(&self) -> Result<()> {
        self.blocks.flush()
    }

    /// Flushes and consumes the repository.
    pub fn close(self) -> Result<()> {
        self.flush()
    }
}

/// Convenience used throughout the test suite: one-shot object write.
pub fn write_object(repo: &Repository, data: &[u8]) -> Result<crate::object::id::ObjectId> {
    use std::io::Write;

    let mut w = repo.objects().new_writer(WriterOptions::default());
    w.write_all(data)?;
    w.result()
}
