//! Local disk cache for image bytes.
//!
//! Entries live in a flat directory. Each identifier maps to two files: the
//! raw bytes and a `.meta.json` sidecar holding the content type reported by
//! blob storage at download time. An entry counts as present only when both
//! files exist. Both files are written to a temporary name first and renamed
//! into place, so concurrent fills of the same entry are harmless.
//!
//! File names are the percent-encoded identifier. Identifiers whose encoded
//! form would not fit a single path component once the staging and sidecar
//! suffixes are added get a fixed-length name instead: a readable stem plus
//! the SHA-256 of the identifier.

use crate::blob_store::BlobStore;
use crate::error::IndexError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

const SIDECAR_SUFFIX: &str = ".meta.json";

/// Longest encoded name used verbatim. Leaves room under NAME_MAX (255) for
/// the staging wrapper `.{name}.{uuid}.part` and the sidecar suffix.
const MAX_ENCODED_NAME: usize = 160;

/// Leading characters of the encoded identifier kept in a digest name
const DIGEST_STEM_LEN: usize = 48;

/// Cached image bytes with the content type recorded at download time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBlob {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    content_type: Option<String>,
    size_bytes: u64,
    cached_at: DateTime<Utc>,
}

/// Cache-through store for downloaded images
#[derive(Debug, Clone)]
pub struct BlobCache {
    directory: PathBuf,
}

impl BlobCache {
    /// Open the cache, creating its directory if needed
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let directory = directory.into();
        fs::create_dir_all(&directory).await?;
        Ok(Self { directory })
    }

    /// Path of the cached bytes for an identifier
    pub fn entry_path(&self, identifier: &str) -> Result<PathBuf, IndexError> {
        Ok(self.directory.join(entry_name(identifier)?))
    }

    fn sidecar_path(&self, identifier: &str) -> Result<PathBuf, IndexError> {
        Ok(self.directory.join(sidecar_name(&entry_name(identifier)?)))
    }

    /// Look up a cached entry without touching blob storage
    pub async fn get(&self, identifier: &str) -> Result<Option<CachedBlob>, IndexError> {
        let sidecar_path = self.sidecar_path(identifier)?;
        let raw = match fs::read(&sidecar_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let sidecar: Sidecar = match serde_json::from_slice(&raw) {
            Ok(sidecar) => sidecar,
            Err(e) => {
                warn!(
                    path = %sidecar_path.display(),
                    error = %e,
                    "Unreadable cache sidecar, treating entry as missing"
                );
                return Ok(None);
            }
        };

        let bytes = match fs::read(self.entry_path(identifier)?).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(CachedBlob {
            bytes,
            content_type: sidecar.content_type,
        }))
    }

    /// Serve `identifier` from the cache, downloading `object_key` on a miss
    #[instrument(skip(self, store))]
    pub async fn fetch(
        &self,
        identifier: &str,
        object_key: &str,
        store: &dyn BlobStore,
    ) -> Result<CachedBlob, IndexError> {
        if let Some(blob) = self.get(identifier).await? {
            metrics::counter!("indexer.cache.hits").increment(1);
            debug!("Cache hit");
            return Ok(blob);
        }

        metrics::counter!("indexer.cache.misses").increment(1);

        let name = entry_name(identifier)?;
        let entry_path = self.directory.join(&name);
        let staging = self.staging_path(&name);

        let content_type = match store.download_object(object_key, &staging).await {
            Ok(content_type) => content_type,
            Err(e) => {
                discard(&staging).await;
                return Err(e);
            }
        };

        let bytes = match fs::read(&staging).await {
            Ok(bytes) => bytes,
            Err(e) => {
                discard(&staging).await;
                return Err(e.into());
            }
        };
        if let Err(e) = fs::rename(&staging, &entry_path).await {
            discard(&staging).await;
            return Err(e.into());
        }

        let sidecar = Sidecar {
            content_type: content_type.clone(),
            size_bytes: bytes.len() as u64,
            cached_at: Utc::now(),
        };
        let encoded = serde_json::to_vec(&sidecar).map_err(IndexError::storage)?;
        let sidecar_staging = self.staging_path(&name);
        let written = match fs::write(&sidecar_staging, encoded).await {
            Ok(()) => {
                fs::rename(&sidecar_staging, self.directory.join(sidecar_name(&name))).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            discard(&sidecar_staging).await;
            return Err(e.into());
        }

        debug!(
            path = %entry_path.display(),
            size_bytes = bytes.len(),
            "Cache filled"
        );

        Ok(CachedBlob {
            bytes,
            content_type,
        })
    }

    fn staging_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!(".{}.{}.part", name, Uuid::new_v4()))
    }
}

/// Flat, traversal-free file name for an identifier
fn entry_name(identifier: &str) -> Result<String, IndexError> {
    if identifier.is_empty() {
        return Err(IndexError::InvalidObjectKey {
            key: identifier.to_string(),
        });
    }

    let encoded = urlencoding::encode(identifier).into_owned();
    if encoded.chars().all(|c| c == '.') {
        return Ok(encoded.replace('.', "%2E"));
    }
    if encoded.len() > MAX_ENCODED_NAME {
        // `+` never survives percent-encoding, so digest names cannot collide
        // with verbatim ones
        let digest = Sha256::digest(identifier.as_bytes());
        return Ok(format!("{}+{:x}", &encoded[..DIGEST_STEM_LEN], digest));
    }
    Ok(encoded)
}

fn sidecar_name(entry_name: &str) -> String {
    format!("{}{}", entry_name, SIDECAR_SUFFIX)
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove staging file");
        }
    }
}
