use thiserror::Error;

/// Errors raised by the indexing pipeline and the query path
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("{key} not found!")]
    ObjectNotFound { key: String },

    #[error("{key} not found!")]
    RecordNotFound { key: String },

    #[error("Unsupported image format for {key}: {reason}")]
    UnsupportedImageFormat { key: String, reason: String },

    #[error("Invalid object key: {key}")]
    InvalidObjectKey { key: String },

    #[error("Malformed metadata record {key}: {reason}")]
    MalformedRecord { key: String, reason: String },

    #[error("no images indexed!")]
    EmptyCollection,

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl IndexError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        IndexError::StorageError(err.to_string())
    }

    /// Whether a retry of the same operation could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, IndexError::StorageError(_))
    }

    /// Not-found conditions the query path answers with a 404
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            IndexError::ObjectNotFound { .. }
                | IndexError::RecordNotFound { .. }
                | IndexError::EmptyCollection
        )
    }

    /// Short machine-readable code used in API error bodies and metrics labels
    pub fn code(&self) -> &'static str {
        match self {
            IndexError::ObjectNotFound { .. } => "OBJECT_NOT_FOUND",
            IndexError::RecordNotFound { .. } => "RECORD_NOT_FOUND",
            IndexError::UnsupportedImageFormat { .. } => "UNSUPPORTED_IMAGE_FORMAT",
            IndexError::InvalidObjectKey { .. } => "INVALID_OBJECT_KEY",
            IndexError::MalformedRecord { .. } => "MALFORMED_RECORD",
            IndexError::EmptyCollection => "EMPTY_COLLECTION",
            IndexError::StorageError(_) => "STORAGE_ERROR",
        }
    }
}

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        IndexError::StorageError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_carries_key() {
        let err = IndexError::RecordNotFound {
            key: "uploads/cat.png".to_string(),
        };
        assert_eq!(err.to_string(), "uploads/cat.png not found!");
        assert!(err.is_not_found());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_empty_collection_message() {
        assert_eq!(IndexError::EmptyCollection.to_string(), "no images indexed!");
        assert!(IndexError::EmptyCollection.is_not_found());
    }

    #[test]
    fn test_only_storage_errors_are_transient() {
        assert!(IndexError::storage("throttled").is_transient());
        assert!(!IndexError::EmptyCollection.is_transient());
        assert!(!IndexError::UnsupportedImageFormat {
            key: "a".to_string(),
            reason: "b".to_string()
        }
        .is_transient());
    }
}
