//! Error types for the pdf2md-serve library.
//!
//! One enum covers the whole error taxonomy of the service:
//!
//! * Validation errors are rejected synchronously at upload time; no job is
//!   ever created for them.
//! * Not-found and not-ready are distinct conditions so polling clients can
//!   tell "keep waiting" apart from "give up".
//! * Conversion and storage failures inside a running worker are captured
//!   into the job record (`status = error`) and surfaced only through status
//!   polling — they never propagate back to the upload request, which has
//!   already returned.
//!
//! The HTTP status mapping lives with the server layer
//! ([`crate::server`]), keeping this module framework-free.

use crate::registry::{JobId, JobStatus};
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the pdf2md-serve library.
#[derive(Debug, Error)]
pub enum ServiceError {
    // ── Validation (synchronous, upload path) ────────────────────────────
    /// The uploaded bytes do not start with a PDF header.
    #[error("Uploaded file is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { magic: [u8; 4] },

    /// The uploaded file was empty.
    #[error("Uploaded file is empty")]
    EmptyUpload,

    /// The upload exceeded the configured size limit.
    #[error("Uploaded file exceeds the {limit_bytes} byte limit")]
    UploadTooLarge { limit_bytes: usize },

    /// The multipart request body could not be parsed, or carried no file.
    #[error("Malformed upload: {0}")]
    BadUpload(String),

    /// A client-supplied artifact filename contained path separators or
    /// parent-directory components.
    #[error("Invalid artifact filename: '{filename}'")]
    InvalidFilename { filename: String },

    // ── Lookup ───────────────────────────────────────────────────────────
    /// No job with the given id exists.
    #[error("Job '{id}' not found")]
    JobNotFound { id: JobId },

    /// The job exists and is `done`, but the named artifact does not.
    #[error("File '{filename}' not found for job '{id}'")]
    ArtifactNotFound { id: JobId, filename: String },

    /// The job exists but has not reached `done`; the client should keep
    /// polling (or inspect the `error` status).
    #[error("Job '{id}' has not completed yet (status: {status})")]
    NotReady { id: JobId, status: JobStatus },

    // ── Worker-side failures (captured into job state) ───────────────────
    /// The engine ran past the worker-side timeout.
    #[error("Conversion timed out after {secs}s")]
    ConversionTimeout { secs: u64 },

    /// Reading or writing persisted artifacts failed.
    #[error("Storage error at {path:?}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Programming errors ───────────────────────────────────────────────
    /// An invalid job state transition was attempted. Terminal jobs never
    /// mutate; this is a bug in the caller, not normal control flow.
    #[error("Invalid state transition for job '{id}': {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    // ── Config ───────────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ────────────────────────────────────────────────────────
    /// Result corrupted after success: a `done` job whose storage no longer
    /// reads back, a panicked worker task, and similar operational
    /// anomalies. Distinct from job failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ServiceError::Storage {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::JobStatus;

    #[test]
    fn not_a_pdf_display_includes_magic() {
        let e = ServiceError::NotAPdf {
            magic: [0x50, 0x4B, 0x03, 0x04],
        };
        assert!(e.to_string().contains("80"), "got: {e}");
    }

    #[test]
    fn not_ready_display_includes_status() {
        let id = JobId::new();
        let e = ServiceError::NotReady {
            id,
            status: JobStatus::Processing,
        };
        let msg = e.to_string();
        assert!(msg.contains("processing"), "got: {msg}");
        assert!(msg.contains(&id.to_string()));
    }

    #[test]
    fn storage_error_carries_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e = ServiceError::storage("/tmp/x", io);
        assert!(e.to_string().contains("/tmp/x"));
        assert!(std::error::Error::source(&e).is_some());
    }
}
