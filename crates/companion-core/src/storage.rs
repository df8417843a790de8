//! Conditional-write item store over object storage.
//!
//! The queue persists everything — job records, dedup reservations, the
//! scheduler lock — as small JSON items addressed by `"{partition}/{sort}"`
//! keys. The contract every backend must honor:
//!
//! - Conditional writes with preconditions (create-if-absent, match-version)
//! - Opaque version tokens returned from every successful write
//! - Prefix listing, used for the due-job range scan
//!
//! Precondition failures are normal results, never errors: the CAS loop in
//! the queue treats them as lost races.
//!
//! ## Version tokens
//!
//! The version token is an opaque `String` so backends can map it onto
//! whatever their native conditional-write primitive is (GCS generation,
//! S3 `ETag`, an in-memory counter). Nothing above this layer may interpret
//! it.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Precondition for conditional writes.
#[derive(Debug, Clone)]
pub enum WritePrecondition {
    /// Write only if no item exists at the key.
    DoesNotExist,
    /// Write only if the item's version matches the given token.
    MatchesVersion(String),
    /// Write unconditionally.
    None,
}

/// Result of a conditional write.
#[derive(Debug, Clone)]
pub enum WriteResult {
    /// Write succeeded, returns the new version token.
    Success {
        /// The new version token after the write.
        version: String,
    },
    /// Precondition failed; the item was not modified.
    PreconditionFailed {
        /// The current version that caused the precondition to fail.
        current_version: String,
    },
}

impl WriteResult {
    /// Returns true if the write was applied.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Metadata about a stored item.
#[derive(Debug, Clone)]
pub struct ItemMeta {
    /// Item key (`"{partition}/{sort}"`).
    pub key: String,
    /// Item size in bytes.
    pub size: u64,
    /// Version token for CAS operations.
    pub version: String,
    /// Last modification timestamp, if the backend reports one.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage backend for the queue's item store.
///
/// All backends (in-memory, cloud object stores) implement this trait. The
/// queue relies only on single-item conditional writes; no multi-item
/// transactions are required.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads an item's raw bytes.
    ///
    /// Returns `Error::NotFound` if no item exists at the key.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Writes an item, honoring the precondition.
    ///
    /// Returns `WriteResult::PreconditionFailed` if the precondition is not
    /// met — never an error for that case.
    async fn put(&self, key: &str, data: Bytes, precondition: WritePrecondition)
    -> Result<WriteResult>;

    /// Deletes an item. Idempotent: succeeds even if the item is absent.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Lists items whose key starts with `prefix`, in ascending key order.
    async fn list(&self, prefix: &str) -> Result<Vec<ItemMeta>>;

    /// Reads an item's metadata without its content.
    ///
    /// Returns `None` if no item exists at the key.
    async fn head(&self, key: &str) -> Result<Option<ItemMeta>>;
}

/// In-memory backend for tests and local development.
///
/// Keys live in a `BTreeMap`, so [`StorageBackend::list`] comes back in
/// lexicographic key order exactly like a wide-column range scan. Versions
/// are monotonic per-key counters.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    items: Arc<RwLock<BTreeMap<String, StoredItem>>>,
}

#[derive(Debug, Clone)]
struct StoredItem {
    data: Bytes,
    version: u64,
    last_modified: DateTime<Utc>,
}

impl StoredItem {
    fn meta(&self, key: &str) -> ItemMeta {
        ItemMeta {
            key: key.to_string(),
            size: self.data.len() as u64,
            version: self.version.to_string(),
            last_modified: Some(self.last_modified),
        }
    }
}

impl MemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Bytes> {
        let items = self.items.read().map_err(|_| Error::Internal {
            message: "storage lock poisoned".into(),
        })?;

        items
            .get(key)
            .map(|item| item.data.clone())
            .ok_or_else(|| Error::NotFound(format!("item not found: {key}")))
    }

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut items = self.items.write().map_err(|_| Error::Internal {
            message: "storage lock poisoned".into(),
        })?;

        let current = items.get(key);

        match precondition {
            WritePrecondition::DoesNotExist => {
                if let Some(item) = current {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: item.version.to_string(),
                    });
                }
            }
            WritePrecondition::MatchesVersion(expected) => match current {
                Some(item) if item.version.to_string() != expected => {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: item.version.to_string(),
                    });
                }
                None => {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: "0".to_string(),
                    });
                }
                _ => {}
            },
            WritePrecondition::None => {}
        }

        let new_version = current.map_or(1, |item| item.version + 1);
        items.insert(
            key.to_string(),
            StoredItem {
                data,
                version: new_version,
                last_modified: Utc::now(),
            },
        );
        drop(items);

        Ok(WriteResult::Success {
            version: new_version.to_string(),
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.items
            .write()
            .map_err(|_| Error::Internal {
                message: "storage lock poisoned".into(),
            })?
            .remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ItemMeta>> {
        let items = self.items.read().map_err(|_| Error::Internal {
            message: "storage lock poisoned".into(),
        })?;

        Ok(items
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, item)| item.meta(key))
            .collect())
    }

    async fn head(&self, key: &str) -> Result<Option<ItemMeta>> {
        let items = self.items.read().map_err(|_| Error::Internal {
            message: "storage lock poisoned".into(),
        })?;

        Ok(items.get(key).map(|item| item.meta(key)))
    }
}

/// Object-store backed implementation for production deployments.
///
/// Wraps the `object_store` crate, so the same backend speaks GCS, S3, and
/// the local filesystem. Conditional writes map onto the store's native
/// put modes (`Create` for create-if-absent, etag-conditioned `Update` for
/// match-version); the etag doubles as the version token.
pub struct ObjectStoreBackend {
    store: Box<dyn object_store::ObjectStore>,
    prefix: object_store::path::Path,
}

impl std::fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl ObjectStoreBackend {
    /// Creates a backend from a storage URL.
    ///
    /// Accepts `gs://bucket/prefix`, `s3://bucket/prefix`, and
    /// `file:///path` URLs.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the URL cannot be parsed or names an
    /// unsupported scheme.
    pub fn from_url(storage_url: &str) -> Result<Self> {
        let parsed = url::Url::parse(storage_url).map_err(|e| {
            Error::configuration(format!("invalid storage URL '{storage_url}': {e}"))
        })?;
        let (store, prefix) = object_store::parse_url(&parsed).map_err(|e| {
            Error::configuration(format!("unsupported storage URL '{storage_url}': {e}"))
        })?;
        Ok(Self { store, prefix })
    }

    fn full_path(&self, key: &str) -> object_store::path::Path {
        if self.prefix.as_ref().is_empty() {
            object_store::path::Path::from(key)
        } else {
            object_store::path::Path::from(format!("{}/{key}", self.prefix.as_ref()))
        }
    }

    fn logical_key(&self, location: &object_store::path::Path) -> String {
        let full = location.as_ref();
        if self.prefix.as_ref().is_empty() {
            full.to_string()
        } else {
            full.strip_prefix(self.prefix.as_ref())
                .map_or_else(|| full.to_string(), |s| s.trim_start_matches('/').to_string())
        }
    }

    fn version_token(e_tag: Option<String>, version: Option<String>) -> String {
        e_tag.or(version).unwrap_or_default()
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.full_path(key);
        match self.store.get(&path).await {
            Ok(result) => result
                .bytes()
                .await
                .map_err(|e| Error::storage_with_source(format!("read failed: {key}"), e)),
            Err(object_store::Error::NotFound { .. }) => {
                Err(Error::NotFound(format!("item not found: {key}")))
            }
            Err(e) => Err(Error::storage_with_source(format!("get failed: {key}"), e)),
        }
    }

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        use object_store::{PutMode, PutOptions, UpdateVersion};

        let path = self.full_path(key);
        let mode = match precondition {
            WritePrecondition::DoesNotExist => PutMode::Create,
            WritePrecondition::MatchesVersion(token) => PutMode::Update(UpdateVersion {
                e_tag: Some(token),
                version: None,
            }),
            WritePrecondition::None => PutMode::Overwrite,
        };

        let result = self
            .store
            .put_opts(&path, data.into(), PutOptions::from(mode))
            .await;

        match result {
            Ok(put) => Ok(WriteResult::Success {
                version: Self::version_token(put.e_tag, put.version),
            }),
            Err(
                object_store::Error::AlreadyExists { .. }
                | object_store::Error::Precondition { .. },
            ) => {
                // Surface the loser's view of the current version so callers
                // can decide whether to re-read and retry.
                let current = self.head(key).await?.map_or_else(String::new, |m| m.version);
                Ok(WriteResult::PreconditionFailed {
                    current_version: current,
                })
            }
            Err(e) => Err(Error::storage_with_source(format!("put failed: {key}"), e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.full_path(key);
        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(Error::storage_with_source(
                format!("delete failed: {key}"),
                e,
            )),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ItemMeta>> {
        let list_path = self.full_path(prefix.trim_end_matches('/'));
        let mut stream = self.store.list(Some(&list_path));

        let mut metas = Vec::new();
        while let Some(entry) = stream.next().await {
            let meta =
                entry.map_err(|e| Error::storage_with_source(format!("list failed: {prefix}"), e))?;
            let key = self.logical_key(&meta.location);
            if !key.starts_with(prefix) {
                continue;
            }
            metas.push(ItemMeta {
                key,
                size: meta.size,
                version: Self::version_token(meta.e_tag, meta.version),
                last_modified: Some(meta.last_modified),
            });
        }
        metas.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(metas)
    }

    async fn head(&self, key: &str) -> Result<Option<ItemMeta>> {
        let path = self.full_path(key);
        match self.store.head(&path).await {
            Ok(meta) => Ok(Some(ItemMeta {
                key: key.to_string(),
                size: meta.size,
                version: Self::version_token(meta.e_tag, meta.version),
                last_modified: Some(meta.last_modified),
            })),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(Error::storage_with_source(format!("head failed: {key}"), e)),
        }
    }
}
