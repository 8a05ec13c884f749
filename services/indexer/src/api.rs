use crate::config::ApiConfig;
use crate::error::IndexError;
use crate::events::BucketNotification;
use crate::extractor::{Extractor, DEFAULT_CONTENT_TYPE};
use crate::metadata_store::ImageMetadata;
use crate::query::QueryService;
use crate::stats::ImageStats;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub query: QueryService,
    pub extractor: Extractor,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Records written by a webhook delivery
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexedResponse {
    pub indexed: Vec<ImageMetadata>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/metadata/*id", get(get_metadata))
        .route("/api/v1/images/*id", get(get_image))
        .route("/api/v1/info", get(get_info))
        .route("/api/v1/events/s3", post(ingest_notification))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Map a pipeline error onto a status code and body.
///
/// Not-found bodies are exactly `{"error": "<key> not found!"}`.
fn error_response(err: IndexError) -> ApiError {
    if err.is_not_found() {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: err.to_string(),
                code: None,
            }),
        );
    }

    let status = match &err {
        IndexError::InvalidObjectKey { .. } => StatusCode::BAD_REQUEST,
        IndexError::UnsupportedImageFormat { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        _ => {
            error!(error = %err, "Request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: Some(err.code().to_string()),
        }),
    )
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "image-indexer"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.query.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "metadata_store": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "metadata_store": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Get single image metadata
#[instrument(skip(state))]
async fn get_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ImageMetadata>, ApiError> {
    state
        .query
        .get_metadata(&id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Get base64 image bytes, served through the local cache
#[instrument(skip(state))]
async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let image = state.query.get_image(&id).await.map_err(error_response)?;

    let content_type = image
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or(HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        image.body,
    )
        .into_response())
}

/// Size extremes and content type histogram over all images
#[instrument(skip(state))]
async fn get_info(State(state): State<AppState>) -> Result<Json<ImageStats>, ApiError> {
    state
        .query
        .get_stats()
        .await
        .map(Json)
        .map_err(error_response)
}

/// Bucket notification webhook; indexes synchronously
#[instrument(skip(state, notification), fields(records = notification.records.len()))]
async fn ingest_notification(
    State(state): State<AppState>,
    Json(notification): Json<BucketNotification>,
) -> Result<Json<IndexedResponse>, ApiError> {
    let indexed = state
        .extractor
        .handle_notification(&notification)
        .await
        .map_err(|e| {
            warn!(error = %e, "Webhook extraction failed");
            error_response(e)
        })?;

    Ok(Json(IndexedResponse { indexed }))
}

/// Start the API server, returning once `shutdown` is cancelled
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::BlobStore;
    use crate::cache::BlobCache;
    use crate::metadata_store::MetadataStore;
    use crate::testing::{encode_image, record, InMemoryBlobStore, InMemoryMetadataStore};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use image::ImageFormat;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Harness {
        router: Router,
        blobs: Arc<InMemoryBlobStore>,
        table: Arc<InMemoryMetadataStore>,
        _cache_dir: TempDir,
    }

    async fn harness(table: InMemoryMetadataStore) -> Harness {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let table = Arc::new(table);
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = BlobCache::open(cache_dir.path()).await.unwrap();

        let blob_store: Arc<dyn BlobStore> = blobs.clone();
        let metadata_store: Arc<dyn MetadataStore> = table.clone();

        let state = AppState {
            query: QueryService::new(
                metadata_store.clone(),
                blob_store.clone(),
                cache,
                "prefix/",
            ),
            extractor: Extractor::new(blob_store, metadata_store, "images"),
        };

        Harness {
            router: create_router(state, &ApiConfig::default()),
            blobs,
            table,
            _cache_dir: cache_dir,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Response) {
        let response = router.clone().oneshot(request).await.unwrap();
        (response.status(), response)
    }

    async fn get(router: &Router, uri: &str) -> (StatusCode, Response) {
        send(router, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn notification(key: &str) -> String {
        serde_json::json!({
            "Records": [{
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": { "name": "images" },
                    "object": { "key": key }
                }
            }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness(InMemoryMetadataStore::new()).await;
        let (status, response) = get(&h.router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_ready() {
        let h = harness(InMemoryMetadataStore::new()).await;
        let (status, _) = get(&h.router, "/ready").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_upload_then_fetch_metadata() {
        let h = harness(InMemoryMetadataStore::new()).await;
        h.blobs.insert(
            "prefix/photos/cat.png",
            encode_image(800, 600, ImageFormat::Png),
            Some("image/png"),
        );

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/events/s3")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(notification("prefix/photos/cat.png")))
            .unwrap();
        let (status, response) = send(&h.router, request).await;
        assert_eq!(status, StatusCode::OK);
        let indexed = json_body(response).await;
        assert_eq!(indexed["indexed"][0]["objectKey"], "prefix/photos/cat.png");

        let (status, response) = get(&h.router, "/api/v1/metadata/photos/cat.png").await;
        assert_eq!(status, StatusCode::OK);

        let size = h.table.get_item("prefix/photos/cat.png").await.unwrap().unwrap().size_bytes;
        assert_eq!(
            json_body(response).await,
            serde_json::json!({
                "objectKey": "prefix/photos/cat.png",
                "sizeBytes": size.to_string(),
                "contentType": "image/png",
                "width": "800",
                "height": "600"
            })
        );
    }

    #[tokio::test]
    async fn test_metadata_not_found_shape() {
        let h = harness(InMemoryMetadataStore::new()).await;
        let (status, response) = get(&h.router, "/api/v1/metadata/dog.png").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({ "error": "prefix/dog.png not found!" })
        );
    }

    #[tokio::test]
    async fn test_image_is_base64_with_content_type() {
        let h = harness(InMemoryMetadataStore::new()).await;
        h.blobs
            .insert("prefix/cat.png", vec![1, 2, 3], Some("image/png"));

        for _ in 0..2 {
            let (status, response) = get(&h.router, "/api/v1/images/cat.png").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert_eq!(&body[..], b"AQID");
        }

        assert_eq!(h.blobs.download_count(), 1);
    }

    #[tokio::test]
    async fn test_image_not_found_shape() {
        let h = harness(InMemoryMetadataStore::new()).await;
        let (status, response) = get(&h.router, "/api/v1/images/ghost.png").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({ "error": "prefix/ghost.png not found!" })
        );
    }

    #[tokio::test]
    async fn test_info() {
        let h = harness(InMemoryMetadataStore::with_records(vec![
            record("prefix/a.png", 10, "image/png"),
            record("prefix/b.png", 500, "image/png"),
            record("prefix/c.jpg", 37, "image/jpeg"),
        ]))
        .await;

        let (status, response) = get(&h.router, "/api/v1/info").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({
                "highestSizeImage": "prefix/b.png",
                "lowestSizeImage": "prefix/a.png",
                "contentTypes": { "image/jpeg": 1, "image/png": 2 },
                "totalImages": 3
            })
        );
    }

    #[tokio::test]
    async fn test_info_on_empty_table() {
        let h = harness(InMemoryMetadataStore::new()).await;
        let (status, response) = get(&h.router, "/api/v1/info").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({ "error": "no images indexed!" })
        );
    }

    #[tokio::test]
    async fn test_webhook_rejects_non_image() {
        let h = harness(InMemoryMetadataStore::new()).await;
        h.blobs
            .insert("prefix/notes.txt", b"plain text".to_vec(), Some("text/plain"));

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/events/s3")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(notification("prefix/notes.txt")))
            .unwrap();
        let (status, response) = send(&h.router, request).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json_body(response).await["code"], "UNSUPPORTED_IMAGE_FORMAT");
        assert_eq!(h.table.len(), 0);
    }

    #[test]
    fn test_not_found_errors_share_the_404_shape() {
        let not_found = [
            IndexError::RecordNotFound {
                key: "prefix/a.png".to_string(),
            },
            IndexError::ObjectNotFound {
                key: "prefix/a.png".to_string(),
            },
            IndexError::EmptyCollection,
        ];
        for err in not_found {
            assert!(err.is_not_found());
            let message = err.to_string();
            let (status, Json(body)) = error_response(err);
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body.error, message);
            assert!(body.code.is_none());
        }

        let (status, Json(body)) = error_response(IndexError::storage("timeout"));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code.as_deref(), Some("STORAGE_ERROR"));
    }
}
