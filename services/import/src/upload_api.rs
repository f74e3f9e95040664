use crate::config::ApiConfig;
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::storage_events::UPLOAD_PREFIX;
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

/// Content type the signed upload URL is bound to
pub const UPLOAD_CONTENT_TYPE: &str = "text/csv";

/// Lifetime of a signed upload URL
pub const UPLOAD_URL_EXPIRY: Duration = Duration::from_secs(300);

/// Upload authorization errors
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Missing query parameter: fileName")]
    MissingFileName,

    #[error(transparent)]
    Store(#[from] ObjectStoreError),
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub object_store: Arc<dyn ObjectStore>,
}

/// Query parameters for the upload URL endpoint
#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    #[serde(rename = "fileName")]
    pub file_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignedUrlResponse {
    #[serde(rename = "signedUrl")]
    pub signed_url: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            UploadError::MissingFileName => (StatusCode::BAD_REQUEST, self.to_string()),
            UploadError::Store(ref e) => {
                error!(error = %e, "Failed to sign upload URL");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(ErrorResponse { message })).into_response()
    }
}

/// Sign a time-limited PUT URL for `uploaded/<file_name>`.
///
/// The name is used verbatim; a missing or blank name is rejected.
pub async fn authorize_upload(
    store: &dyn ObjectStore,
    file_name: Option<&str>,
) -> Result<String, UploadError> {
    let file_name = file_name
        .filter(|name| !name.trim().is_empty())
        .ok_or(UploadError::MissingFileName)?;

    let key = format!("{UPLOAD_PREFIX}{file_name}");
    let url = store
        .presign_put(&key, UPLOAD_CONTENT_TYPE, UPLOAD_URL_EXPIRY)
        .await?;

    metrics::counter!("import.upload_urls.issued").increment(1);
    info!(key = %key, "Issued upload URL");

    Ok(url)
}

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
        .route("/import", get(import_upload_url))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "import-service"
    }))
}

/// Issue a signed upload URL for a CSV file
#[instrument(skip(state))]
async fn import_upload_url(
    State(state): State<AppState>,
    Query(params): Query<ImportQuery>,
) -> Result<Json<SignedUrlResponse>, UploadError> {
    let signed_url = authorize_upload(state.object_store.as_ref(), params.file_name.as_deref()).await?;
    Ok(Json(SignedUrlResponse { signed_url }))
}

/// Start the API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting upload URL API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::{MemoryObjectStore, ObjectReader};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    struct UnavailableStore;

    #[async_trait]
    impl ObjectStore for UnavailableStore {
        async fn presign_put(
            &self,
            key: &str,
            _content_type: &str,
            _expires_in: Duration,
        ) -> Result<String, ObjectStoreError> {
            Err(ObjectStoreError::Presign {
                key: key.to_string(),
                message: "credentials expired".to_string(),
            })
        }

        async fn open_read(
            &self,
            bucket: &str,
            key: &str,
        ) -> Result<ObjectReader, ObjectStoreError> {
            Err(ObjectStoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
        }
    }

    fn router(store: Arc<dyn ObjectStore>) -> Router {
        create_router(
            AppState {
                object_store: store,
            },
            &ApiConfig::default(),
        )
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_signed_url_targets_upload_prefix() {
        let (status, body) = get_json(
            router(Arc::new(MemoryObjectStore::new())),
            "/import?fileName=products.csv",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["signedUrl"],
            "memory://upload/uploaded/products.csv?content-type=text/csv&expires=300"
        );
    }

    #[tokio::test]
    async fn test_file_name_is_used_verbatim() {
        let url = authorize_upload(&MemoryObjectStore::new(), Some("spring sale/../x.csv"))
            .await
            .unwrap();

        assert!(url.starts_with("memory://upload/uploaded/spring sale/../x.csv?"));
    }

    #[tokio::test]
    async fn test_missing_file_name_is_bad_request() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());

        for uri in ["/import", "/import?fileName=", "/import?fileName=%20%20"] {
            let (status, body) = get_json(router(store.clone()), uri).await;

            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["message"], "Missing query parameter: fileName");
        }
    }

    #[tokio::test]
    async fn test_signing_failure_is_internal_error() {
        let (status, body) = get_json(
            router(Arc::new(UnavailableStore)),
            "/import?fileName=products.csv",
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
    }

    #[tokio::test]
    async fn test_health_check() {
        let (status, body) = get_json(router(Arc::new(MemoryObjectStore::new())), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }
}
