//! HTTP surface: actix-web application wiring and error mapping.
//!
//! The server layer is a thin orchestrator over the injected components —
//! registry, cache index, storage, worker — all constructed once in
//! [`build_state`] and shared via `Arc`. Handlers never block on
//! conversion: only the submit path does synchronous work (fingerprint
//! extraction), bounded in latency; everything long-running is the worker's
//! problem.

pub mod routes;

use crate::cache::CacheIndex;
use crate::config::ServiceConfig;
use crate::engine::ConversionEngine;
use crate::error::ServiceError;
use crate::registry::JobRegistry;
use crate::storage::StorageManager;
use crate::worker::ConversionWorker;
use actix_web::http::StatusCode;
use actix_web::{web, App, HttpResponse, HttpServer, ResponseError};
use std::sync::Arc;
use tracing::info;

/// Shared per-process state, dependency-injected into every handler.
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub cache: Arc<CacheIndex>,
    pub storage: Arc<StorageManager>,
    pub worker: Arc<ConversionWorker>,
    pub max_upload_bytes: usize,
}

/// Construct the full component graph for one service instance.
///
/// Tests call this with a stub engine and a temp-dir storage root to get a
/// fully isolated instance per test case.
pub fn build_state(
    config: &ServiceConfig,
    engine: Arc<dyn ConversionEngine>,
) -> Result<web::Data<AppState>, ServiceError> {
    let storage = Arc::new(StorageManager::new(&config.storage_root)?);
    let cache = Arc::new(if config.persist_cache_index {
        CacheIndex::open(storage.cache_index_path())
    } else {
        CacheIndex::in_memory()
    });
    let registry = Arc::new(JobRegistry::new());
    let worker = Arc::new(ConversionWorker::new(
        Arc::clone(&registry),
        Arc::clone(&cache),
        Arc::clone(&storage),
        engine,
        config.worker_concurrency,
        config.conversion_timeout(),
    ));
    Ok(web::Data::new(AppState {
        registry,
        cache,
        storage,
        worker,
        max_upload_bytes: config.max_upload_bytes,
    }))
}

/// Run the HTTP server until shutdown.
pub async fn run(config: ServiceConfig, engine: Arc<dyn ConversionEngine>) -> std::io::Result<()> {
    let state = build_state(&config, engine)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    info!(
        "Serving on http://{}:{} (storage root: {})",
        config.host,
        config.port,
        config.storage_root.display()
    );

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(routes::configure)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotAPdf { .. }
            | ServiceError::EmptyUpload
            | ServiceError::BadUpload(_)
            | ServiceError::InvalidFilename { .. }
            | ServiceError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            ServiceError::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            ServiceError::JobNotFound { .. } | ServiceError::ArtifactNotFound { .. } => {
                StatusCode::NOT_FOUND
            }

            // Distinct from 404 so clients know to keep polling.
            ServiceError::NotReady { .. } => StatusCode::CONFLICT,

            ServiceError::ConversionTimeout { .. }
            | ServiceError::Storage { .. }
            | ServiceError::InvalidTransition { .. }
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .json(serde_json::json!({ "error": self.to_string() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{JobId, JobStatus};

    #[test]
    fn validation_maps_to_400() {
        assert_eq!(
            ServiceError::EmptyUpload.status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn not_found_and_not_ready_are_distinct() {
        let id = JobId::new();
        assert_eq!(
            ServiceError::JobNotFound { id }.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::NotReady {
                id,
                status: JobStatus::Processing
            }
            .status_code(),
            StatusCode::CONFLICT
        );
    }
}
