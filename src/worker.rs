//! Conversion worker: one supervised background task per job.
//!
//! ## Why spawn_blocking?
//!
//! Conversion engines are CPU-bound (layout analysis, OCR). Running them on
//! the async runtime would stall request handlers, so each engine invocation
//! moves onto the blocking thread pool, bounded by a semaphore so a burst of
//! uploads cannot occupy every blocking thread at once. Jobs waiting on a
//! permit stay `pending`; `processing` means the engine is actually running.
//!
//! ## The happens-before chain
//!
//! For each successful job the worker performs, in strict order:
//!
//! 1. write Markdown + images through the storage manager,
//! 2. transition the registry to `done`,
//! 3. record the cache index entry.
//!
//! Only the worker performs these (single-writer per job), so a reader that
//! follows a cache hit always lands on a directory with complete content,
//! and `status = done` always means reads succeed. Any failure — engine
//! error, timeout, storage write, panic — transitions the job to `error`
//! with a human-readable message instead; no retries, no cache entry.

use crate::cache::{CacheIndex, Fingerprint};
use crate::engine::{ConversionEngine, EngineOutput, ExtractedImage};
use crate::error::ServiceError;
use crate::fingerprint;
use crate::registry::{JobId, JobRegistry, JobStatus};
use crate::storage::StorageManager;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Matches `![alt](target)` so engine-produced image references can be
/// rewritten to this service's image URLs.
static IMAGE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)\s]+)\)").expect("valid regex"));

/// Fallback title for documents whose metadata and engine both yield none.
const UNTITLED: &str = "Untitled";

/// Executes conversions off the request path and reports back through the
/// job registry. Dependency-injected like every other component; clones are
/// cheap (everything inside is shared).
#[derive(Clone)]
pub struct ConversionWorker {
    registry: Arc<JobRegistry>,
    cache: Arc<CacheIndex>,
    storage: Arc<StorageManager>,
    engine: Arc<dyn ConversionEngine>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl ConversionWorker {
    pub fn new(
        registry: Arc<JobRegistry>,
        cache: Arc<CacheIndex>,
        storage: Arc<StorageManager>,
        engine: Arc<dyn ConversionEngine>,
        concurrency: usize,
        timeout: Duration,
    ) -> Self {
        ConversionWorker {
            registry,
            cache,
            storage,
            engine,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            timeout,
        }
    }

    /// Dispatch a job. Fire-and-forget from the caller's perspective: the
    /// returned handle exists so tests can await completion, and completion
    /// is otherwise observable only through the registry.
    pub fn dispatch(&self, id: JobId, fingerprint: Fingerprint, pdf_bytes: Vec<u8>) -> JoinHandle<()> {
        let worker = self.clone();
        tokio::spawn(async move {
            worker.run(id, fingerprint, pdf_bytes).await;
        })
    }

    async fn run(&self, id: JobId, fingerprint: Fingerprint, pdf_bytes: Vec<u8>) {
        // Queue until a conversion slot frees up; the job stays `pending`.
        let _permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.fail(id, "Worker pool shut down before conversion started".into());
                return;
            }
        };

        if let Err(e) = self
            .registry
            .transition(id, JobStatus::Processing, None, None)
        {
            error!("Job {id}: cannot enter processing: {e}");
            return;
        }
        info!("Job {id}: conversion started (engine: {})", self.engine.name());

        // Title from metadata as soon as we have it — pollers see it while
        // the engine is still running. Not required for correctness.
        if let Some(title) = fingerprint::extract_title(&pdf_bytes) {
            if let Err(e) = self.registry.set_title(id, title) {
                warn!("Job {id}: could not set early title: {e}");
            }
        }

        let engine = Arc::clone(&self.engine);
        let convert = tokio::task::spawn_blocking(move || engine.convert(&pdf_bytes, true));
        let output = match tokio::time::timeout(self.timeout, convert).await {
            Err(_) => {
                let secs = self.timeout.as_secs();
                self.fail(id, ServiceError::ConversionTimeout { secs }.to_string());
                return;
            }
            Ok(Err(join_err)) => {
                self.fail(id, format!("Conversion task panicked: {join_err}"));
                return;
            }
            Ok(Ok(Err(engine_err))) => {
                self.fail(id, engine_err.to_string());
                return;
            }
            Ok(Ok(Ok(output))) => output,
        };

        let EngineOutput {
            markdown,
            images,
            title,
        } = output;
        let markdown = rewrite_image_links(&markdown, id, &images);

        // Storage write strictly precedes the externally visible `done`.
        let storage = Arc::clone(&self.storage);
        let image_count = images.len();
        let write =
            tokio::task::spawn_blocking(move || storage.write_result(id, &markdown, &images));
        match write.await {
            Err(join_err) => {
                self.fail(id, format!("Storage task panicked: {join_err}"));
                return;
            }
            Ok(Err(storage_err)) => {
                // A write-phase storage failure is a job failure, same as an
                // engine failure.
                self.fail(id, storage_err.to_string());
                return;
            }
            Ok(Ok(())) => {}
        }

        let final_title = title
            .or_else(|| self.registry.get(id).and_then(|r| r.title))
            .unwrap_or_else(|| UNTITLED.to_string());

        match self
            .registry
            .transition(id, JobStatus::Done, Some(final_title.clone()), None)
        {
            Ok(_) => {
                // Cache record comes last: a hit must never lead anywhere
                // that is not already complete on disk.
                self.cache.record(fingerprint, id);
                info!("Job {id}: done ({final_title:?}, {image_count} image(s))");
            }
            Err(e) => error!("Job {id}: registry refused done transition: {e}"),
        }
    }

    /// Capture a failure into job state. Never retries, never caches.
    fn fail(&self, id: JobId, message: String) {
        warn!("Job {id}: failed: {message}");
        if let Err(e) = self
            .registry
            .transition(id, JobStatus::Error, None, Some(message))
        {
            error!("Job {id}: registry refused error transition: {e}");
        }
    }
}

/// Rewrite engine-produced image references to this service's image URLs.
///
/// Engines reference extracted images by filename (sometimes behind a
/// relative path). Any link whose final path segment names a produced image
/// becomes `/api/images/<job>/<filename>`; everything else — external URLs,
/// links to images the engine did not produce — is left untouched.
fn rewrite_image_links(markdown: &str, id: JobId, images: &[ExtractedImage]) -> String {
    if images.is_empty() {
        return markdown.to_string();
    }
    let produced: HashSet<&str> = images.iter().map(|i| i.filename.as_str()).collect();
    IMAGE_LINK
        .replace_all(markdown, |caps: &Captures<'_>| {
            let alt = &caps[1];
            let target = &caps[2];
            let basename = target.rsplit('/').next().unwrap_or(target);
            if produced.contains(basename) {
                format!("![{alt}](/api/images/{id}/{basename})")
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}
