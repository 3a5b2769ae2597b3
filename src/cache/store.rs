//! Page cache storage.
//!
//! [`CacheStorage`] is the seam to the physical cache backend. [`MemoryStorage`]
//! is the in-process LRU implementation used by the CLI and the tests.

use std::num::NonZeroUsize;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use thiserror::Error;

use super::config::RefreshConfig;
use super::lock::{rw_read, rw_write};
use crate::domain::site_uri::SiteUri;

const SOURCE: &str = "pagerefresh::store";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("cache storage failed: {message}")]
    Backend { message: String },
}

impl StorageError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Cached body for a page, `None` on a miss.
    async fn get(&self, uri: &SiteUri) -> Result<Option<Bytes>, StorageError>;

    async fn put(&self, uri: &SiteUri, body: Bytes) -> Result<(), StorageError>;

    /// Drop the listed pages; missing pages are ignored.
    async fn delete(&self, uris: &[SiteUri]) -> Result<(), StorageError>;

    async fn delete_all(&self) -> Result<(), StorageError>;
}

/// LRU page cache held in memory.
pub struct MemoryStorage {
    pages: RwLock<LruCache<SiteUri, Bytes>>,
}

impl MemoryStorage {
    pub fn new(limit: NonZeroUsize) -> Self {
        Self {
            pages: RwLock::new(LruCache::new(limit)),
        }
    }

    pub fn from_config(config: &RefreshConfig) -> Self {
        Self::new(config.storage_limit_non_zero())
    }

    pub fn contains(&self, uri: &SiteUri) -> bool {
        rw_read(&self.pages, SOURCE, "contains").contains(uri)
    }

    pub fn len(&self) -> usize {
        rw_read(&self.pages, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn get(&self, uri: &SiteUri) -> Result<Option<Bytes>, StorageError> {
        // LruCache::get promotes the entry, so it needs the write lock.
        Ok(rw_write(&self.pages, SOURCE, "get").get(uri).cloned())
    }

    async fn put(&self, uri: &SiteUri, body: Bytes) -> Result<(), StorageError> {
        rw_write(&self.pages, SOURCE, "put").put(uri.clone(), body);
        Ok(())
    }

    async fn delete(&self, uris: &[SiteUri]) -> Result<(), StorageError> {
        let mut pages = rw_write(&self.pages, SOURCE, "delete");
        for uri in uris {
            pages.pop(uri);
        }
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), StorageError> {
        rw_write(&self.pages, SOURCE, "delete_all").clear();
        Ok(())
    }
}
