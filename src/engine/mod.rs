//! The conversion engine seam.
//!
//! The engine is an opaque collaborator: it takes raw PDF bytes and an
//! extract-images flag, and produces a Markdown string, a set of named image
//! files, and (optionally) the document title. The core never interprets an
//! engine failure beyond its message string.
//!
//! The trait is synchronous on purpose — real engines are CPU-bound (layout
//! analysis, OCR) and run inside `tokio::task::spawn_blocking`, never on the
//! async request path. Implementors therefore do not need an async runtime
//! at all.
//!
//! [`PdfExtractEngine`] is the bundled default so the server runs out of the
//! box; deployments wanting richer output swap in their own implementation
//! behind the same trait.

mod text;

pub use text::PdfExtractEngine;

use thiserror::Error;

/// One named image file produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// The complete output of one engine invocation.
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    /// Converted Markdown. Image references use the bare artifact filename;
    /// the worker rewrites them to API URLs before persisting.
    pub markdown: String,
    /// Extracted images, empty when extraction was disabled or the document
    /// has none.
    pub images: Vec<ExtractedImage>,
    /// Document title when the engine could determine one.
    pub title: Option<String>,
}

/// Failure raised by an engine. The service stores the message on the job
/// and moves on — no retries, no interpretation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The input could not be parsed as a PDF at all.
    #[error("Unreadable PDF: {0}")]
    UnreadablePdf(String),

    /// The engine started but could not produce output.
    #[error("{0}")]
    Failed(String),
}

/// A PDF→Markdown conversion backend.
pub trait ConversionEngine: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    /// Convert a document. Called from a blocking thread; may take as long
    /// as it needs (the worker enforces the timeout from outside).
    fn convert(&self, pdf_bytes: &[u8], extract_images: bool)
        -> Result<EngineOutput, EngineError>;
}
