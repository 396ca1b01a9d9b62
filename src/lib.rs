//! # pdf2md-serve
//!
//! Upload a PDF, get shareable Markdown. A small HTTP service that turns a
//! one-shot, slow, CPU-bound document conversion into an observable,
//! resumable, idempotent asynchronous job — and never converts the same
//! document twice.
//!
//! ## Request Flow
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Validate    %PDF- magic, size limit (synchronous, bounded)
//!  ├─ 2. Fingerprint title metadata via lopdf, sha256 fallback
//!  ├─ 3. Cache       hit → canonical job id, done             ──▶ respond
//!  ├─ 4. Register    new job in `pending`
//!  └─ 5. Dispatch    background worker (spawn_blocking engine call)
//!                        │
//!        client polls    ├─ storage write (atomic)
//!        /api/status ◀── ├─ registry → done
//!                        └─ cache record
//! ```
//!
//! The ordering in step 5 is the central invariant: `status = done` is a
//! promise that reads succeed, so the storage write strictly precedes the
//! `done` transition, which strictly precedes the cache record.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2md_serve::{server, PdfExtractEngine, ServiceConfig};
//! use std::sync::Arc;
//!
//! #[actix_web::main]
//! async fn main() -> std::io::Result<()> {
//!     let config = ServiceConfig::default();
//!     server::run(config, Arc::new(PdfExtractEngine::new())).await
//! }
//! ```
//!
//! The conversion engine is a seam: [`PdfExtractEngine`] (bundled, text
//! only) works out of the box, and anything implementing
//! [`ConversionEngine`] — an OCR pipeline, a layout-analysis model, a
//! remote service — plugs into the same orchestration unchanged.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod registry;
pub mod server;
pub mod storage;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{CacheIndex, Fingerprint};
pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use engine::{ConversionEngine, EngineError, EngineOutput, ExtractedImage, PdfExtractEngine};
pub use error::ServiceError;
pub use registry::{JobId, JobRecord, JobRegistry, JobStatus};
pub use storage::StorageManager;
pub use worker::ConversionWorker;
