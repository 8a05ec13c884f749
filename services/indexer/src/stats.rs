use crate::error::IndexError;
use crate::metadata_store::ImageMetadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Summary statistics over every indexed image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStats {
    /// Object key of the largest image
    pub highest_size_image: String,
    /// Object key of the smallest image
    pub lowest_size_image: String,
    /// Number of images per content type
    pub content_types: BTreeMap<String, u64>,
    pub total_images: u64,
}

/// Compute statistics over a full scan.
///
/// Ties on size resolve to the record seen first in scan order, for both the
/// largest and the smallest image. An empty scan is `EmptyCollection`.
pub fn summarize(records: &[ImageMetadata]) -> Result<ImageStats, IndexError> {
    let (first, rest) = records.split_first().ok_or(IndexError::EmptyCollection)?;

    let mut highest = first;
    let mut lowest = first;
    let mut content_types = BTreeMap::new();
    *content_types.entry(first.content_type.clone()).or_insert(0) += 1;

    for record in rest {
        if record.size_bytes > highest.size_bytes {
            highest = record;
        }
        if record.size_bytes < lowest.size_bytes {
            lowest = record;
        }
        *content_types.entry(record.content_type.clone()).or_insert(0) += 1;
    }

    Ok(ImageStats {
        highest_size_image: highest.object_key.clone(),
        lowest_size_image: lowest.object_key.clone(),
        content_types,
        total_images: records.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::record;

    #[test]
    fn test_extremes_and_histogram() {
        let records = vec![
            record("p/small.png", 10, "image/png"),
            record("p/large.png", 500, "image/png"),
            record("p/mid.jpg", 37, "image/jpeg"),
        ];

        let stats = summarize(&records).unwrap();
        assert_eq!(stats.highest_size_image, "p/large.png");
        assert_eq!(stats.lowest_size_image, "p/small.png");
        assert_eq!(
            stats.content_types,
            BTreeMap::from([("image/png".to_string(), 2), ("image/jpeg".to_string(), 1)])
        );
        assert_eq!(stats.content_types.values().sum::<u64>(), records.len() as u64);
        assert_eq!(stats.total_images, 3);
    }

    #[test]
    fn test_ties_resolve_to_first_in_scan_order() {
        let records = vec![
            record("a", 5, "image/png"),
            record("b", 9, "image/png"),
            record("c", 9, "image/png"),
            record("d", 5, "image/png"),
        ];

        let stats = summarize(&records).unwrap();
        assert_eq!(stats.highest_size_image, "b");
        assert_eq!(stats.lowest_size_image, "a");
    }

    #[test]
    fn test_single_record_is_both_extremes() {
        let stats = summarize(&[record("only.gif", 0, "image/gif")]).unwrap();
        assert_eq!(stats.highest_size_image, "only.gif");
        assert_eq!(stats.lowest_size_image, "only.gif");
    }

    #[test]
    fn test_empty_scan_is_an_error() {
        assert!(matches!(summarize(&[]), Err(IndexError::EmptyCollection)));
    }

    #[test]
    fn test_serialized_shape() {
        let stats = summarize(&[record("x.png", 1, "image/png")]).unwrap();
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "highestSizeImage": "x.png",
                "lowestSizeImage": "x.png",
                "contentTypes": { "image/png": 1 },
                "totalImages": 1
            })
        );
    }
}
