//! Bucket notification payloads.
//!
//! S3 and MinIO deliver the same JSON document whether the target is a
//! Kafka topic or an HTTP webhook.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bucket notification carrying one or more event records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketNotification {
    #[serde(rename = "Records", default)]
    pub records: Vec<EventRecord>,
}

/// A single object event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// e.g. `ObjectCreated:Put`
    pub event_name: String,
    pub event_time: Option<DateTime<Utc>>,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: BucketEntity,
    pub object: ObjectEntity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketEntity {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEntity {
    /// URL-encoded object key
    pub key: String,
    pub size: Option<u64>,
    pub e_tag: Option<String>,
}

impl EventRecord {
    pub fn is_object_created(&self) -> bool {
        // MinIO prefixes event names with `s3:`
        self.event_name
            .trim_start_matches("s3:")
            .starts_with("ObjectCreated:")
    }
}
