use crate::blob_store::BlobStore;
use crate::cache::BlobCache;
use crate::error::IndexError;
use crate::metadata_store::{ImageMetadata, MetadataStore};
use crate::stats::{summarize, ImageStats};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Image bytes ready to be sent to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Base64 of the raw object bytes
    pub body: String,
    pub content_type: Option<String>,
}

/// Read path over the metadata table and the blob cache
#[derive(Clone)]
pub struct QueryService {
    metadata_store: Arc<dyn MetadataStore>,
    blob_store: Arc<dyn BlobStore>,
    cache: BlobCache,
    key_prefix: String,
}

impl QueryService {
    pub fn new(
        metadata_store: Arc<dyn MetadataStore>,
        blob_store: Arc<dyn BlobStore>,
        cache: BlobCache,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            metadata_store,
            blob_store,
            cache,
            key_prefix: key_prefix.into(),
        }
    }

    /// Full object key for a client identifier
    pub fn object_key(&self, identifier: &str) -> String {
        format!("{}{}", self.key_prefix, identifier)
    }

    #[instrument(skip(self))]
    pub async fn get_metadata(&self, identifier: &str) -> Result<ImageMetadata, IndexError> {
        let key = self.object_key(identifier);

        let record = self.metadata_store.get_item(&key).await?;
        record.ok_or(IndexError::RecordNotFound { key })
    }

    /// Fetch image bytes through the local cache.
    ///
    /// The cache is keyed by the identifier while storage is read with the
    /// full prefixed key.
    #[instrument(skip(self))]
    pub async fn get_image(&self, identifier: &str) -> Result<EncodedImage, IndexError> {
        let key = self.object_key(identifier);

        let blob = self
            .cache
            .fetch(identifier, &key, self.blob_store.as_ref())
            .await?;

        debug!(size_bytes = blob.bytes.len(), "Image served");

        Ok(EncodedImage {
            body: STANDARD.encode(&blob.bytes),
            content_type: blob.content_type,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_stats(&self) -> Result<ImageStats, IndexError> {
        let records = self.metadata_store.scan().await?;
        summarize(&records)
    }

    /// Cheap store round trip used by the readiness probe
    pub async fn ping(&self) -> Result<(), IndexError> {
        self.metadata_store
            .get_item(&self.object_key(".readiness"))
            .await
            .map(|_| ())
    }
}
