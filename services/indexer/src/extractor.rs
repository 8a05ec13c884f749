use crate::blob_store::BlobStore;
use crate::codec::{decode_object_key, probe_dimensions};
use crate::error::IndexError;
use crate::events::BucketNotification;
use crate::metadata_store::{ImageMetadata, MetadataStore};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Recorded when blob storage reports no content type
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Turns uploaded objects into metadata records
#[derive(Clone)]
pub struct Extractor {
    blob_store: Arc<dyn BlobStore>,
    metadata_store: Arc<dyn MetadataStore>,
    bucket: String,
}

impl Extractor {
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        metadata_store: Arc<dyn MetadataStore>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            blob_store,
            metadata_store,
            bucket: bucket.into(),
        }
    }

    /// Index one uploaded object.
    ///
    /// `raw_key` is the key as it appears in the notification (form-encoded).
    /// The record is fully built before the single upsert, so a failure at
    /// any step leaves the table untouched.
    #[instrument(skip(self))]
    pub async fn extract(&self, raw_key: &str) -> Result<ImageMetadata, IndexError> {
        let started = Instant::now();

        let result = self.extract_inner(raw_key).await;

        match &result {
            Ok(record) => {
                metrics::counter!("indexer.images.extracted").increment(1);
                metrics::histogram!("indexer.extract.duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                info!(
                    object_key = %record.object_key,
                    size_bytes = record.size_bytes,
                    width = record.width,
                    height = record.height,
                    "Image indexed"
                );
            }
            Err(e) => {
                metrics::counter!("indexer.extract.failed", "code" => e.code()).increment(1);
            }
        }

        result
    }

    async fn extract_inner(&self, raw_key: &str) -> Result<ImageMetadata, IndexError> {
        let key = decode_object_key(raw_key)?;

        let object = self.blob_store.get_object(&key).await?;
        let size_bytes = object.size_bytes();
        let content_type = object
            .content_type
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        // Decoding is CPU-bound
        let body = object.body;
        let probe_key = key.clone();
        let dimensions =
            tokio::task::spawn_blocking(move || probe_dimensions(&probe_key, &body))
                .await
                .map_err(IndexError::storage)??;

        let record = ImageMetadata {
            object_key: key,
            size_bytes,
            content_type,
            width: dimensions.width,
            height: dimensions.height,
        };

        self.metadata_store.put_item(&record).await?;

        Ok(record)
    }

    /// Index every object-created record of a bucket notification, in order.
    ///
    /// Stops at the first failure; records already indexed stay indexed and
    /// a redelivery re-indexes them harmlessly.
    #[instrument(skip(self, notification), fields(records = notification.records.len()))]
    pub async fn handle_notification(
        &self,
        notification: &BucketNotification,
    ) -> Result<Vec<ImageMetadata>, IndexError> {
        let mut indexed = Vec::with_capacity(notification.records.len());

        for record in &notification.records {
            if !record.is_object_created() {
                debug!(
                    event_name = %record.event_name,
                    key = %record.s3.object.key,
                    "Ignoring non-create event"
                );
                continue;
            }

            if record.s3.bucket.name != self.bucket {
                warn!(
                    event_bucket = %record.s3.bucket.name,
                    configured_bucket = %self.bucket,
                    key = %record.s3.object.key,
                    "Notification from unexpected bucket, reading configured bucket"
                );
            }

            indexed.push(self.extract(&record.s3.object.key).await?);
        }

        Ok(indexed)
    }
}
