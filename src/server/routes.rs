//! API route handlers.
//!
//! Data flow for an upload: multipart read → PDF validation → fingerprint →
//! cache lookup → hit: return the canonical job immediately / miss: register
//! a job, dispatch the worker, return the new id. Status polling is
//! client-driven; nothing here ever waits for a conversion.
//!
//! A cache hit is only honoured when the canonical job's storage actually
//! holds a Markdown file. An entry pointing at vanished storage is deleted
//! and the upload treated as a miss — cached = ready, never "maybe later".

use super::AppState;
use crate::error::ServiceError;
use crate::fingerprint;
use crate::registry::{JobId, JobStatus};
use crate::storage;
use actix_web::{get, post, web, HttpResponse};
use actix_multipart::Multipart;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tracing::{error, info};

/// Response body for `POST /api/convert`.
#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: String,
    pub cached: bool,
}

/// Response body for `GET /api/status/{job_id}`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub markdown_ready: bool,
}

/// Register all routes on the application.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(convert_pdf)
            .service(job_status)
            .service(get_markdown)
            .service(download_zip)
            .service(get_image),
    )
    .service(health);
}

/// POST /api/convert — upload a PDF, receive a job id to poll.
///
/// Previously converted documents (same title metadata, or same bytes for
/// untitled files) short-circuit to the existing result with `cached: true`
/// and never invoke the engine again.
#[post("/convert")]
async fn convert_pdf(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, ServiceError> {
    let pdf_bytes = read_upload(payload, state.max_upload_bytes).await?;
    validate_pdf(&pdf_bytes)?;

    let fingerprint = fingerprint::derive(&pdf_bytes);

    if let Some(job_id) = state.cache.lookup(&fingerprint) {
        if state.storage.has_markdown(job_id) {
            info!("Cache hit for '{fingerprint}': job {job_id}");
            return Ok(HttpResponse::Ok().json(ConvertResponse {
                job_id,
                status: JobStatus::Done,
                message: "Found cached conversion result".to_string(),
                cached: true,
            }));
        }
        // Canonical job's storage has gone missing; the entry is stale.
        state.cache.invalidate(&fingerprint);
    }

    let job_id = state.registry.create(fingerprint.clone());
    info!("Accepted upload ({} bytes) as job {job_id}", pdf_bytes.len());
    // Fire-and-forget; completion is observable via /api/status.
    state.worker.dispatch(job_id, fingerprint, pdf_bytes);

    Ok(HttpResponse::Ok().json(ConvertResponse {
        job_id,
        status: JobStatus::Pending,
        message: "Conversion started. Poll /api/status/{job_id}.".to_string(),
        cached: false,
    }))
}

/// GET /api/status/{job_id} — poll conversion progress.
#[get("/status/{job_id}")]
async fn job_status(
    state: web::Data<AppState>,
    path: web::Path<JobId>,
) -> Result<HttpResponse, ServiceError> {
    let id = path.into_inner();
    let response = match state.registry.get(id) {
        Some(record) => StatusResponse {
            job_id: id,
            status: record.status,
            title: record.title,
            error_message: record.error_message,
            created_at: Some(record.created_at),
            completed_at: record.completed_at,
            markdown_ready: state.storage.has_markdown(id),
        },
        // The registry is volatile; a completed result referenced by the
        // durable cache index is still servable after a restart.
        None if state.storage.has_markdown(id) => StatusResponse {
            job_id: id,
            status: JobStatus::Done,
            title: None,
            error_message: None,
            created_at: None,
            completed_at: None,
            markdown_ready: true,
        },
        None => return Err(ServiceError::JobNotFound { id }),
    };
    Ok(HttpResponse::Ok().json(response))
}

/// GET /api/markdown/{job_id} — the converted document, once `done`.
#[get("/markdown/{job_id}")]
async fn get_markdown(
    state: web::Data<AppState>,
    path: web::Path<JobId>,
) -> Result<HttpResponse, ServiceError> {
    let id = path.into_inner();
    let known_to_registry = require_done(&state, id)?;

    match state.storage.read_markdown(id)? {
        Some(content) => Ok(HttpResponse::Ok()
            .content_type("text/markdown; charset=utf-8")
            .body(content)),
        None if known_to_registry => {
            // `done` promised this read would succeed; the result was
            // corrupted after success. Operational anomaly, not job failure.
            error!("Job {id} is done but its markdown is unreadable");
            Err(ServiceError::Internal(format!(
                "Result missing for completed job {id}"
            )))
        }
        None => Err(ServiceError::JobNotFound { id }),
    }
}

/// GET /api/download/{job_id} — Markdown plus images as a zip.
#[get("/download/{job_id}")]
async fn download_zip(
    state: web::Data<AppState>,
    path: web::Path<JobId>,
) -> Result<HttpResponse, ServiceError> {
    let id = path.into_inner();
    let known_to_registry = require_done(&state, id)?;

    let title = state
        .registry
        .get(id)
        .and_then(|r| r.title)
        .unwrap_or_else(|| "document".to_string());

    match state.storage.bundle_zip(id)? {
        Some(bytes) => Ok(HttpResponse::Ok()
            .content_type("application/zip")
            .insert_header((
                "Content-Disposition",
                format!("attachment; filename=\"{}.zip\"", filename_safe(&title)),
            ))
            .body(bytes)),
        None if known_to_registry => {
            error!("Job {id} is done but its archive could not be built");
            Err(ServiceError::Internal(format!(
                "Result missing for completed job {id}"
            )))
        }
        None => Err(ServiceError::JobNotFound { id }),
    }
}

/// GET /api/images/{job_id}/{filename} — one extracted image.
#[get("/images/{job_id}/{filename}")]
async fn get_image(
    state: web::Data<AppState>,
    path: web::Path<(JobId, String)>,
) -> Result<HttpResponse, ServiceError> {
    let (id, filename) = path.into_inner();
    if state.registry.get(id).is_none() && !state.storage.has_markdown(id) {
        return Err(ServiceError::JobNotFound { id });
    }
    match state.storage.read_image(id, &filename)? {
        Some(bytes) => Ok(HttpResponse::Ok()
            .content_type(storage::image_content_type(&filename))
            .body(bytes)),
        None => Err(ServiceError::ArtifactNotFound { id, filename }),
    }
}

/// GET /health — liveness probe.
#[get("/health")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "healthy" }))
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// Gate a read endpoint on the job being `done`.
///
/// Returns whether the registry knows the job (false = restart-recovered
/// result, known only through storage). Non-`done` jobs are `NotReady`;
/// jobs unknown to both registry and storage are `NotFound`.
fn require_done(state: &AppState, id: JobId) -> Result<bool, ServiceError> {
    match state.registry.get(id) {
        Some(record) if record.status == JobStatus::Done => Ok(true),
        Some(record) => Err(ServiceError::NotReady {
            id,
            status: record.status,
        }),
        None if state.storage.has_markdown(id) => Ok(false),
        None => Err(ServiceError::JobNotFound { id }),
    }
}

/// Collect the uploaded file's bytes out of the multipart body.
///
/// Accepts the field named `file`, or any field carrying a filename.
async fn read_upload(mut payload: Multipart, limit: usize) -> Result<Vec<u8>, ServiceError> {
    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| ServiceError::BadUpload(e.to_string()))?;
        let is_file = {
            let cd = field.content_disposition();
            cd.get_name() == Some("file") || cd.get_filename().is_some()
        };
        if !is_file {
            continue;
        }
        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| ServiceError::BadUpload(e.to_string()))?;
            if bytes.len() + chunk.len() > limit {
                return Err(ServiceError::UploadTooLarge { limit_bytes: limit });
            }
            bytes.extend_from_slice(&chunk);
        }
        return Ok(bytes);
    }
    Err(ServiceError::BadUpload(
        "no file field in multipart body".to_string(),
    ))
}

/// Synchronous upload validation: cheap header check, no parsing.
fn validate_pdf(bytes: &[u8]) -> Result<(), ServiceError> {
    if bytes.is_empty() {
        return Err(ServiceError::EmptyUpload);
    }
    if !bytes.starts_with(b"%PDF-") {
        let mut magic = [0u8; 4];
        for (i, b) in bytes.iter().take(4).enumerate() {
            magic[i] = *b;
        }
        return Err(ServiceError::NotAPdf { magic });
    }
    Ok(())
}

/// Make a title usable inside a Content-Disposition filename.
fn filename_safe(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | '"' | '\0' => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "document".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_magic_is_required() {
        assert!(validate_pdf(b"%PDF-1.7\n...").is_ok());
        assert!(matches!(
            validate_pdf(b"PK\x03\x04zipzip"),
            Err(ServiceError::NotAPdf { .. })
        ));
        assert!(matches!(validate_pdf(b""), Err(ServiceError::EmptyUpload)));
        // Shorter than the magic itself
        assert!(matches!(
            validate_pdf(b"%P"),
            Err(ServiceError::NotAPdf { .. })
        ));
    }

    #[test]
    fn filenames_are_sanitised() {
        assert_eq!(filename_safe("A Nice Paper"), "A Nice Paper");
        assert_eq!(filename_safe("a/b\\c\"d"), "a_b_c_d");
        assert_eq!(filename_safe("   "), "document");
    }
}
