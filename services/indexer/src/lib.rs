//! Image Indexer
//!
//! Event-driven image metadata indexing and retrieval. Every image uploaded to
//! the bucket is inspected once: its size, content type and pixel dimensions
//! are written to a DynamoDB table keyed by object key. The HTTP API then
//! serves single records, aggregate statistics, and the image bytes
//! themselves through a local disk cache.
//!
//! ## Architecture
//!
//! ```text
//! Bucket notification          S3 Bucket                DynamoDB
//! (Kafka topic / webhook)     ┌──────────────┐         ┌──────────────┐
//! ┌──────────────┐            │ {prefix}/... │         │ s3objectkey  │
//! │ Notification │            └──────────────┘         │ size, type,  │
//! │ Consumer     │                │      │              │ width/height │
//! └──────────────┘                │      │              └──────────────┘
//!        │                        │      │                 ▲      │
//!        ▼                        │      │                 │      │
//! ┌──────────────┐  get_object    │      │    put_item     │      │
//! │ Extractor    │◀───────────────┘      │  ───────────────┘      │
//! └──────────────┘                       │                        │
//!                                        │ download               │ get/scan
//!                                        ▼                        ▼
//!                                 ┌──────────────┐         ┌──────────────┐
//!                                 │ Blob Cache   │────────▶│ Query        │
//!                                 │ (local disk) │         │ Service/API  │
//!                                 └──────────────┘         └──────────────┘
//! ```

pub mod api;
pub mod blob_store;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod extractor;
pub mod kafka_consumer;
pub mod metadata_store;
pub mod query;
pub mod stats;

#[cfg(test)]
mod testing;

pub use api::AppState;
pub use blob_store::{BlobObject, BlobStore, S3BlobStore};
pub use cache::{BlobCache, CachedBlob};
pub use config::Config;
pub use error::IndexError;
pub use events::BucketNotification;
pub use extractor::Extractor;
pub use kafka_consumer::NotificationConsumer;
pub use metadata_store::{DynamoMetadataStore, ImageMetadata, MetadataStore};
pub use query::{EncodedImage, QueryService};
pub use stats::ImageStats;
