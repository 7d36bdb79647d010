use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Derives purpose-scoped keys from a master secret.
///
/// Every consumer names its purpose (`b"AES"`, `b"CHECKSUM"`, ...) and gets
/// a deterministic key of the requested length, so two repositories opened
/// with the same credentials always agree. Password-based credential setup
/// lives outside this crate; callers hand over the master secret directly.
pub struct KeyManager {
    master: Vec<u8>,
}

impl KeyManager {
    pub fn new(master: impl Into<Vec<u8>>) -> Self {
        KeyManager {
            master: master.into(),
        }
    }

    /// Counter-mode HMAC-SHA256 expansion: block i is
    /// HMAC(master, purpose || i) and the output is the first `len` bytes
    /// of the concatenated blocks.
    pub fn derive_key(&self, purpose: &[u8], len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        let mut counter: u32 = 0;

        while out.len() < len {
            let mut mac = HmacSha256::new_from_slice(&self.master)
                .expect("HMAC accepts any key length");
            mac.update(purpose);
            mac.update(&counter.to_be_bytes());
            out.extend_from_slice(&mac.finalize().into_bytes());
            counter += 1;
        }

        out.truncate(len);
        out
    }
}
