//! Image dimension probing and S3 object key decoding.

use crate::error::IndexError;
use image::ImageReader;
use std::io::Cursor;

/// Pixel dimensions of a raster image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Read width and height from encoded image bytes.
///
/// The format is guessed from the leading magic bytes and only the header is
/// parsed, so this stays cheap for large images.
pub fn probe_dimensions(key: &str, bytes: &[u8]) -> Result<Dimensions, IndexError> {
    let unsupported = |reason: String| IndexError::UnsupportedImageFormat {
        key: key.to_string(),
        reason,
    };

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| unsupported(e.to_string()))?;

    if reader.format().is_none() {
        return Err(unsupported("unrecognized image format".to_string()));
    }

    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| unsupported(e.to_string()))?;

    if width == 0 || height == 0 {
        return Err(unsupported(format!("degenerate dimensions {width}x{height}")));
    }

    Ok(Dimensions { width, height })
}

/// Decode an object key as delivered in bucket notifications.
///
/// Keys arrive form-encoded: `+` stands for a space and other reserved bytes
/// are percent-escaped.
pub fn decode_object_key(raw: &str) -> Result<String, IndexError> {
    let invalid = || IndexError::InvalidObjectKey {
        key: raw.to_string(),
    };

    let spaced = raw.replace('+', " ");
    let decoded = urlencoding::decode(&spaced).map_err(|_| invalid())?;

    if decoded.is_empty() {
        return Err(invalid());
    }

    Ok(decoded.into_owned())
}
