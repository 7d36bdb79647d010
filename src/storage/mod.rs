pub mod fs;
pub mod mem;

use crate::error::Result;

/// Flat blob storage: opaque string keys to opaque byte payloads.
///
/// Everything the repository persists goes through this seam, so a backend
/// only has to provide these four calls. Implementations must be safe for
/// concurrent use; the block and metadata managers share one handle across
/// threads.
pub trait Storage: Send + Sync {
    /// Stores a payload, replacing any previous payload under the key.
    fn put_block(&self, id: &str, data: &[u8]) -> Result<()>;

    /// Fetches a payload; `Error::BlockNotFound` when the key is absent.
    fn get_block(&self, id: &str) -> Result<Vec<u8>>;

    /// Removes a key. Removing an absent key is not an error.
    fn delete_block(&self, id: &str) -> Result<()>;

    /// Lists all keys starting with `prefix`, in no particular order.
    fn list_blocks(&self, prefix: &str) -> Result<Vec<String>>;
}
