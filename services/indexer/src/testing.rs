//! In-memory stand-ins for blob storage and the metadata table.

use crate::blob_store::{BlobObject, BlobStore};
use crate::error::IndexError;
use crate::metadata_store::{ImageMetadata, MetadataStore};
use async_trait::async_trait;
use image::{ImageFormat, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: Mutex<HashMap<String, (Vec<u8>, Option<String>)>>,
    gets: AtomicUsize,
    downloads: AtomicUsize,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, body: Vec<u8>, content_type: Option<&str>) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            (body, content_type.map(str::to_string)),
        );
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn lookup(&self, key: &str) -> Result<(Vec<u8>, Option<String>), IndexError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| IndexError::ObjectNotFound {
                key: key.to_string(),
            })
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get_object(&self, key: &str) -> Result<BlobObject, IndexError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let (body, content_type) = self.lookup(key)?;
        Ok(BlobObject {
            content_length: Some(body.len() as u64),
            body,
            content_type,
        })
    }

    async fn download_object(
        &self,
        key: &str,
        destination: &Path,
    ) -> Result<Option<String>, IndexError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let (body, content_type) = self.lookup(key)?;
        tokio::fs::write(destination, body).await?;
        Ok(content_type)
    }
}

/// Metadata table keeping insertion order as its scan order
#[derive(Default)]
pub struct InMemoryMetadataStore {
    records: Mutex<Vec<ImageMetadata>>,
    puts: AtomicUsize,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ImageMetadata>) -> Self {
        Self {
            records: Mutex::new(records),
            puts: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn put_item(&self, record: &ImageMetadata) -> Result<(), IndexError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().unwrap();
        match records
            .iter_mut()
            .find(|r| r.object_key == record.object_key)
        {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    async fn get_item(&self, object_key: &str) -> Result<Option<ImageMetadata>, IndexError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.object_key == object_key)
            .cloned())
    }

    async fn scan(&self) -> Result<Vec<ImageMetadata>, IndexError> {
        Ok(self.records.lock().unwrap().clone())
    }
}

/// Encode a blank image of the given size
pub fn encode_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    RgbImage::new(width, height)
        .write_to(&mut out, format)
        .expect("encode test image");
    out.into_inner()
}

pub fn record(object_key: &str, size_bytes: u64, content_type: &str) -> ImageMetadata {
    ImageMetadata {
        object_key: object_key.to_string(),
        size_bytes,
        content_type: content_type.to_string(),
        width: 1,
        height: 1,
    }
}
