use crate::config::S3Config;
use crate::error::IndexError;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::Client as S3Client;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

/// An object fetched from blob storage
#[derive(Debug, Clone)]
pub struct BlobObject {
    pub body: Vec<u8>,
    /// Content length reported by storage
    pub content_length: Option<u64>,
    /// Content type reported by storage
    pub content_type: Option<String>,
}

impl BlobObject {
    /// Reported size, falling back to the body length
    pub fn size_bytes(&self) -> u64 {
        self.content_length.unwrap_or(self.body.len() as u64)
    }
}

/// Read access to the bucket holding uploaded images
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch an object body together with its reported length and type
    async fn get_object(&self, key: &str) -> Result<BlobObject, IndexError>;

    /// Stream an object into `destination`, returning its content type
    async fn download_object(
        &self,
        key: &str,
        destination: &Path,
    ) -> Result<Option<String>, IndexError>;
}

/// S3 (or S3-compatible) blob store bound to a single bucket
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
}

impl S3BlobStore {
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 blob store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get_object(&self, key: &str) -> Result<BlobObject, IndexError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_get_error(key, e))?;

        let content_length = output.content_length().and_then(|len| u64::try_from(len).ok());
        let content_type = output.content_type().map(str::to_string);

        let body = output
            .body
            .collect()
            .await
            .map_err(IndexError::storage)?
            .to_vec();

        debug!(size_bytes = body.len(), "Object fetched");

        Ok(BlobObject {
            body,
            content_length,
            content_type,
        })
    }

    #[instrument(skip(self, destination), fields(bucket = %self.bucket))]
    async fn download_object(
        &self,
        key: &str,
        destination: &Path,
    ) -> Result<Option<String>, IndexError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_get_error(key, e))?;

        let content_type = output.content_type().map(str::to_string);

        let mut body = output.body;
        let mut file = tokio::fs::File::create(destination).await?;
        let mut written = 0usize;

        while let Some(chunk) = body.try_next().await.map_err(IndexError::storage)? {
            file.write_all(&chunk).await?;
            written += chunk.len();
        }
        file.flush().await?;

        debug!(
            destination = %destination.display(),
            size_bytes = written,
            "Object downloaded"
        );

        Ok(content_type)
    }
}

/// Missing keys and access denials both surface as not found
fn map_get_error(key: &str, err: SdkError<GetObjectError>) -> IndexError {
    let missing = err
        .as_service_error()
        .map(|e| e.is_no_such_key())
        .unwrap_or(false)
        || err
            .raw_response()
            .map(|r| is_missing_status(r.status().as_u16()))
            .unwrap_or(false);

    if missing {
        IndexError::ObjectNotFound {
            key: key.to_string(),
        }
    } else {
        IndexError::storage(DisplayErrorContext(err))
    }
}

fn is_missing_status(status: u16) -> bool {
    matches!(status, 403 | 404)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_falls_back_to_body_length() {
        let object = BlobObject {
            body: vec![0u8; 42],
            content_length: None,
            content_type: None,
        };
        assert_eq!(object.size_bytes(), 42);

        let object = BlobObject {
            content_length: Some(1024),
            ..object
        };
        assert_eq!(object.size_bytes(), 1024);
    }

    #[test]
    fn test_missing_statuses() {
        assert!(is_missing_status(404));
        assert!(is_missing_status(403));
        assert!(!is_missing_status(500));
        assert!(!is_missing_status(503));
    }
}
