use crate::config::DynamoDbConfig;
use crate::error::IndexError;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::config::Builder as DynamoConfigBuilder;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

/// Partition key attribute of the metadata table
pub const KEY_ATTRIBUTE: &str = "s3objectkey";
const SIZE_ATTRIBUTE: &str = "size";
const CONTENT_TYPE_ATTRIBUTE: &str = "contentType";
const WIDTH_ATTRIBUTE: &str = "width";
const HEIGHT_ATTRIBUTE: &str = "height";

/// Indexed image metadata, one record per object key
///
/// Numeric fields are typed here and rendered as decimal strings both in JSON
/// responses and in the table, which is how existing records are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    /// Full storage path of the image
    pub object_key: String,
    /// Object size in bytes as reported by blob storage
    #[serde(with = "decimal_string")]
    pub size_bytes: u64,
    /// MIME type as reported by blob storage
    pub content_type: String,
    /// Pixel width
    #[serde(with = "decimal_string")]
    pub width: u32,
    /// Pixel height
    #[serde(with = "decimal_string")]
    pub height: u32,
}

/// Decimal string serialization helper
mod decimal_string {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::fmt::Display;
    use std::str::FromStr;

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Keyed metadata store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Unconditional upsert keyed by `object_key`
    async fn put_item(&self, record: &ImageMetadata) -> Result<(), IndexError>;

    /// Look up a single record
    async fn get_item(&self, object_key: &str) -> Result<Option<ImageMetadata>, IndexError>;

    /// Every record in the store, in store scan order
    async fn scan(&self) -> Result<Vec<ImageMetadata>, IndexError>;
}

/// DynamoDB-backed metadata store
pub struct DynamoMetadataStore {
    client: DynamoClient,
    table: String,
}

impl DynamoMetadataStore {
    /// Create a new store for the configured table
    pub async fn new(config: &DynamoDbConfig) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = DynamoConfigBuilder::from(&aws_config);

        // Local DynamoDB / LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        info!(
            table = %config.table,
            region = %config.region,
            "DynamoDB metadata store initialized"
        );

        Self::from_client(DynamoClient::from_conf(builder.build()), &config.table)
    }

    pub fn from_client(client: DynamoClient, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
        }
    }
}

#[async_trait]
impl MetadataStore for DynamoMetadataStore {
    #[instrument(skip(self, record), fields(object_key = %record.object_key))]
    async fn put_item(&self, record: &ImageMetadata) -> Result<(), IndexError> {
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(to_item(record)))
            .send()
            .await
            .map_err(|e| IndexError::storage(DisplayErrorContext(e)))?;

        debug!("Metadata record written");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_item(&self, object_key: &str) -> Result<Option<ImageMetadata>, IndexError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key(KEY_ATTRIBUTE, AttributeValue::S(object_key.to_string()))
            .send()
            .await
            .map_err(|e| IndexError::storage(DisplayErrorContext(e)))?;

        output.item().map(from_item).transpose()
    }

    #[instrument(skip(self))]
    async fn scan(&self) -> Result<Vec<ImageMetadata>, IndexError> {
        let mut records = Vec::new();
        let mut start_key: Option<HashMap<String, AttributeValue>> = None;
        let mut pages = 0u32;

        loop {
            let output = self
                .client
                .scan()
                .table_name(&self.table)
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| IndexError::storage(DisplayErrorContext(e)))?;

            pages += 1;
            for item in output.items() {
                records.push(from_item(item)?);
            }

            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        debug!(pages, records = records.len(), "Metadata table scanned");
        Ok(records)
    }
}

/// Encode a record as a table item
pub fn to_item(record: &ImageMetadata) -> HashMap<String, AttributeValue> {
    HashMap::from([
        (
            KEY_ATTRIBUTE.to_string(),
            AttributeValue::S(record.object_key.clone()),
        ),
        (
            SIZE_ATTRIBUTE.to_string(),
            AttributeValue::S(record.size_bytes.to_string()),
        ),
        (
            CONTENT_TYPE_ATTRIBUTE.to_string(),
            AttributeValue::S(record.content_type.clone()),
        ),
        (
            WIDTH_ATTRIBUTE.to_string(),
            AttributeValue::S(record.width.to_string()),
        ),
        (
            HEIGHT_ATTRIBUTE.to_string(),
            AttributeValue::S(record.height.to_string()),
        ),
    ])
}

/// Decode a table item into a record
pub fn from_item(item: &HashMap<String, AttributeValue>) -> Result<ImageMetadata, IndexError> {
    let object_key = string_attribute(item, KEY_ATTRIBUTE, "<unknown>")?;

    Ok(ImageMetadata {
        size_bytes: numeric_attribute(item, SIZE_ATTRIBUTE, &object_key)?,
        content_type: string_attribute(item, CONTENT_TYPE_ATTRIBUTE, &object_key)?,
        width: numeric_attribute(item, WIDTH_ATTRIBUTE, &object_key)?,
        height: numeric_attribute(item, HEIGHT_ATTRIBUTE, &object_key)?,
        object_key,
    })
}

fn string_attribute(
    item: &HashMap<String, AttributeValue>,
    name: &str,
    object_key: &str,
) -> Result<String, IndexError> {
    item.get(name)
        .and_then(|value| value.as_s().ok())
        .cloned()
        .ok_or_else(|| IndexError::MalformedRecord {
            key: object_key.to_string(),
            reason: format!("missing string attribute {name}"),
        })
}

fn numeric_attribute<T: std::str::FromStr>(
    item: &HashMap<String, AttributeValue>,
    name: &str,
    object_key: &str,
) -> Result<T, IndexError> {
    // Older writers may have used the N type instead of a decimal string
    let raw = match item.get(name) {
        Some(AttributeValue::S(s)) | Some(AttributeValue::N(s)) => s,
        _ => {
            return Err(IndexError::MalformedRecord {
                key: object_key.to_string(),
                reason: format!("missing attribute {name}"),
            })
        }
    };

    raw.parse().map_err(|_| IndexError::MalformedRecord {
        key: object_key.to_string(),
        reason: format!("attribute {name} is not a non-negative integer: {raw}"),
    })
}
