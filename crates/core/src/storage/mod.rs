//! Key-to-bytes storage backends.
//!
//! A backend only maps string keys to raw bytes. TTL handling lives one layer
//! up in [`crate::cache`]. `retrieve` must signal absence with
//! [`Error::NotFound`] and nothing else, so that callers can tell a miss from a
//! broken disk.

pub mod lru;
pub mod migrations;
pub mod sqlite;

use async_trait::async_trait;
use bytes::Bytes;

use crate::Error;

pub use self::lru::{EvictionCallback, LruMap, LruStore};
pub use sqlite::SqliteStore;

/// Capability set shared by every storage backend.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn insert(&self, key: &str, value: Bytes) -> Result<(), Error>;

    /// Fetch a value. Absent keys yield [`Error::NotFound`].
    async fn retrieve(&self, key: &str) -> Result<Bytes, Error>;

    /// Remove a key. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), Error>;

    /// Remove every key.
    async fn flush(&self) -> Result<(), Error>;

    /// Number of stored keys.
    async fn len(&self) -> Result<u64, Error>;

    /// Approximate bytes used.
    async fn size(&self) -> Result<u64, Error>;

    async fn close(&self) -> Result<(), Error>;
}
