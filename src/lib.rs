//! Content-addressed backup repository core.
//!
//! Layering, bottom up:
//!     - `storage`: flat blob backend (put/get/list/delete by opaque key)
//!     - `key`: purpose-scoped key derivation from a master secret
//!     - `format`: block formats and content-address computation
//!     - `block`: content-address -> physical location, small-block packing,
//!       pack indexes, tombstones, index compaction
//!     - `splitter` + `object`: streaming chunked object writes, random-access
//!       reads, indirection for large objects
//!     - `metadata`: named items with authenticated encryption over the same
//!       backend
//!     - `repository`: configuration, bootstrap, and the `objects`/`blocks`/
//!       `metadata` facade

pub mod block;
pub mod error;
pub mod format;
pub mod key;
pub mod metadata;
pub mod object;
pub mod repository;
pub mod splitter;
pub mod storage;

pub use crate::error::{Error, Result};
pub use crate::object::id::ObjectId;
pub use crate::repository::{NewRepositoryOptions, Options, Repository};
