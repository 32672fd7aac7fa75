//! Object storage for archived workflow logs.
//!
//! Objects are grouped into namespaces (Azure Blob containers) and written once under a
//! key that is never reused. [`AzureBlobStore`] talks to the Blob service through
//! `object_store`; [`MemoryStore`] keeps everything in process and is used by tests.

pub mod azure;
mod memory;
mod target;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use thiserror::Error;

pub use azure::AzureBlobStore;
pub use memory::MemoryStore;
pub use target::{ArchiveTarget, namespace_for};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("namespace `{name}` invalid: {reason}")]
    InvalidNamespace { name: String, reason: &'static str },
    #[error("namespace `{0}` not found")]
    NamespaceNotFound(String),
    #[error("object `{key}` already exists in namespace `{namespace}`")]
    ObjectExists { namespace: String, key: String },
    #[error("invalid storage credential: {0}")]
    Credential(String),
    #[error("storage service returned {status} ({code}): {message}")]
    Service { status: StatusCode, code: String, message: String },
    #[error("storage endpoint `{0}` cannot take container paths")]
    InvalidEndpoint(url::Url),
    #[error(transparent)]
    Store(#[from] object_store::Error),
    #[error(transparent)]
    Request(#[from] object_store::client::HttpError),
    #[error(transparent)]
    InvalidRequest(#[from] http::Error),
    #[error(transparent)]
    Client(#[from] reqwest::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the namespace if it does not exist yet.
    ///
    /// Succeeds if the namespace already exists, so concurrent callers for the same
    /// namespace all succeed.
    async fn ensure_namespace(&self, name: &str) -> StorageResult<()>;

    /// Write `data` under `key`. Never replaces an existing object.
    async fn put_object(&self, namespace: &str, key: &str, data: Bytes) -> StorageResult<()>;
}
