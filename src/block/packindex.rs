//! Pack index wire format
//!
//! A pack index storage block is gzip-compressed JSON: an array of
//! `PackIndex` objects, one per sealed group. Its storage key is `P`
//! followed by 32 random hex chars.
//!
//! | Field         | Type                       | Description |
//! | ------------- | -------------------------- | ----------- |
//! | `packBlockID` | string                     | Storage key of the pack file; `""` for the unpacked group |
//! | `createTime`  | RFC3339 string             | When the group was sealed |
//! | `items`       | map address -> `IndexItem` | Per content-address location within the pack |
//! | `format`      | `IndexFormat`              | Echo of the repository block format |
//!
//! `IndexItem` is `{offset, length, deleted?}`; a `deleted` item is a
//! tombstone and shadows any older entry for the same address. Standalone
//! blocks (unpacked group) carry `offset: 0` and their own payload length,
//! and resolve to the storage key equal to their address.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{Error, Result};

/// Storage key prefix for pack index blocks.
pub const PACK_INDEX_PREFIX: &str = "P";

/// Storage key prefix for pack files.
pub const PACK_BLOCK_PREFIX: &str = "K";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IndexFormat {
    pub version: String,
    #[serde(rename = "objectFormat")]
    pub object_format: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexItem {
    pub offset: u64,
    pub length: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
}

fn is_false(b: &bool) -> bool {
    !b
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PackIndex {
    #[serde(rename = "packBlockID")]
    pub pack_block_id: String,
    #[serde(rename = "createTime", with = "time::serde::rfc3339")]
    pub create_time: OffsetDateTime,
    pub items: BTreeMap<String, IndexItem>,
    pub format: IndexFormat,
}

pub fn generate_index_block_id() -> String {
    format!("{}{}", PACK_INDEX_PREFIX, random_suffix())
}

pub fn generate_pack_block_id() -> String {
    format!("{}{}", PACK_BLOCK_PREFIX, random_suffix())
}

fn random_suffix() -> String {
    let mut buf = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

pub fn encode_indexes(indexes: &[PackIndex]) -> Result<Vec<u8>> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(&serde_json::to_vec(indexes)?)?;
    Ok(enc.finish()?)
}

pub fn decode_indexes(data: &[u8]) -> Result<Vec<PackIndex>> {
    let mut buf = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut buf)
        .map_err(|e| Error::Malformed(format!("pack index is not valid gzip: {}", e)))?;

    serde_json::from_slice(&buf)
        .map_err(|e| Error::Malformed(format!("pack index JSON does not parse: {}", e)))
}
