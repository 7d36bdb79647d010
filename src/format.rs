use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Version echoed into format descriptors and pack indexes.
pub const FORMAT_VERSION: &str = "1";

/// How a block's payload maps to its content-address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockFormat {
    /// Plain MD5, 32 hex chars. Test repositories only.
    TestOnlyMd5,
    /// HMAC-SHA256 over the payload, full 64 hex chars.
    HmacSha256,
    /// HMAC-SHA256 truncated to the first 16 bytes, 32 hex chars.
    HmacSha256Trunc128,
}

impl BlockFormat {
    pub fn parse(name: &str) -> Result<BlockFormat> {
        match name {
            "TESTONLY_MD5" => Ok(BlockFormat::TestOnlyMd5),
            "UNENCRYPTED_HMAC_SHA256" => Ok(BlockFormat::HmacSha256),
            "UNENCRYPTED_HMAC_SHA256_128" => Ok(BlockFormat::HmacSha256Trunc128),
            other => Err(Error::Config(format!("unknown block format: '{}'", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlockFormat::TestOnlyMd5 => "TESTONLY_MD5",
            BlockFormat::HmacSha256 => "UNENCRYPTED_HMAC_SHA256",
            BlockFormat::HmacSha256Trunc128 => "UNENCRYPTED_HMAC_SHA256_128",
        }
    }
}

/// Computes content-addresses for one repository's configured format.
#[derive(Clone)]
pub struct Formatter {
    format: BlockFormat,
    secret: Vec<u8>,
}

impl Formatter {
    /// Validates the (format, secret, no_hmac) combination before use.
    pub fn new(format: BlockFormat, secret: &[u8], no_hmac: bool) -> Result<Formatter> {
        match format {
            BlockFormat::TestOnlyMd5 => {
                if !no_hmac {
                    return Err(Error::Config(
                        "non-HMAC block format requires no_hmac".to_string(),
                    ));
                }
            }
            BlockFormat::HmacSha256 | BlockFormat::HmacSha256Trunc128 => {
                if no_hmac {
                    return Err(Error::Config(
                        "HMAC block format is incompatible with no_hmac".to_string(),
                    ));
                }
                if secret.is_empty() {
                    return Err(Error::Config(
                        "HMAC block format requires an object HMAC secret".to_string(),
                    ));
                }
            }
        }

        Ok(Formatter {
            format,
            secret: secret.to_vec(),
        })
    }

    pub fn format(&self) -> BlockFormat {
        self.format
    }

    /// Lowercase hex content-address of a payload.
    pub fn block_id_of(&self, data: &[u8]) -> String {
        match self.format {
            BlockFormat::TestOnlyMd5 => hex::encode(Md5::digest(data)),
            BlockFormat::HmacSha256 => hex::encode(self.hmac_of(data)),
            BlockFormat::HmacSha256Trunc128 => hex::encode(&self.hmac_of(data)[..16]),
        }
    }

    fn hmac_of(&self, data: &[u8]) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}
