//! Storage manager: the on-disk layout for job artifacts.
//!
//! One directory per job id under the storage root:
//!
//! ```text
//! <root>/<job-id>/document.md        the converted Markdown
//! <root>/<job-id>/artifacts/<name>   extracted images
//! ```
//!
//! ## The ordering invariant
//!
//! `status = done` is a promise that storage reads will succeed. The worker
//! therefore calls [`StorageManager::write_result`] strictly before the
//! registry's `done` transition, and `write_result` itself writes images
//! first, then the Markdown file atomically (temp file + fsync + rename in
//! the same directory). A reader that can see the Markdown file can see the
//! complete result; a partially written job is invisible.
//!
//! This module knows nothing about job status or caching — it is addressed
//! purely by job id.

use crate::engine::ExtractedImage;
use crate::error::ServiceError;
use crate::registry::JobId;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Markdown filename inside a job directory.
pub const MARKDOWN_FILE: &str = "document.md";
/// Image subdirectory inside a job directory.
pub const ARTIFACTS_DIR: &str = "artifacts";
/// Cache-index filename under the storage root.
pub const CACHE_INDEX_FILE: &str = "cache-index.json";

/// Rewrites `![alt](/api/images/<job>/<file>)` to `![alt](images/<file>)`
/// so an unpacked zip renders locally.
static API_IMAGE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"!\[([^\]]*)\]\(/api/images/[^/)]+/([^)]+)\)").expect("valid regex")
});

/// Owns the artifact directory tree. Addressed by job id only.
#[derive(Debug, Clone)]
pub struct StorageManager {
    root: PathBuf,
}

impl StorageManager {
    /// Open the storage root, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ServiceError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| ServiceError::storage(&root, e))?;
        Ok(StorageManager { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the cache index lives, by convention, under this root.
    pub fn cache_index_path(&self) -> PathBuf {
        self.root.join(CACHE_INDEX_FILE)
    }

    fn job_dir(&self, id: JobId) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn markdown_path(&self, id: JobId) -> PathBuf {
        self.job_dir(id).join(MARKDOWN_FILE)
    }

    fn artifacts_dir(&self, id: JobId) -> PathBuf {
        self.job_dir(id).join(ARTIFACTS_DIR)
    }

    /// Acquire the directory namespace for a job.
    ///
    /// Idempotent: re-entry for an existing id is a no-op and never destroys
    /// content (cache hits reuse existing directories).
    pub fn create_job_dir(&self, id: JobId) -> Result<PathBuf, ServiceError> {
        let dir = self.job_dir(id);
        fs::create_dir_all(&dir).map_err(|e| ServiceError::storage(&dir, e))?;
        Ok(dir)
    }

    /// Persist a completed conversion: every image, then the Markdown.
    ///
    /// The Markdown write is the commit point — temp file, fsync, rename —
    /// so no reader ever observes a partial document. Must complete before
    /// the job is externally visible as `done`.
    pub fn write_result(
        &self,
        id: JobId,
        markdown: &str,
        images: &[ExtractedImage],
    ) -> Result<(), ServiceError> {
        self.create_job_dir(id)?;

        if !images.is_empty() {
            let artifacts = self.artifacts_dir(id);
            fs::create_dir_all(&artifacts).map_err(|e| ServiceError::storage(&artifacts, e))?;
            for image in images {
                if !is_safe_filename(&image.filename) {
                    return Err(ServiceError::InvalidFilename {
                        filename: image.filename.clone(),
                    });
                }
                let path = artifacts.join(&image.filename);
                fs::write(&path, &image.bytes).map_err(|e| ServiceError::storage(&path, e))?;
            }
        }

        let md_path = self.markdown_path(id);
        let tmp_path = md_path.with_extension("md.tmp");
        {
            let mut file =
                fs::File::create(&tmp_path).map_err(|e| ServiceError::storage(&tmp_path, e))?;
            file.write_all(markdown.as_bytes())
                .map_err(|e| ServiceError::storage(&tmp_path, e))?;
            file.sync_all()
                .map_err(|e| ServiceError::storage(&tmp_path, e))?;
        }
        fs::rename(&tmp_path, &md_path).map_err(|e| ServiceError::storage(&md_path, e))?;

        debug!(
            "Persisted result for job {id}: {} bytes of markdown, {} image(s)",
            markdown.len(),
            images.len()
        );
        Ok(())
    }

    /// Whether a complete result exists for this job.
    pub fn has_markdown(&self, id: JobId) -> bool {
        self.markdown_path(id).is_file()
    }

    /// Read the converted Markdown. `None` when no completed artifact
    /// exists (including jobs that never finished).
    pub fn read_markdown(&self, id: JobId) -> Result<Option<String>, ServiceError> {
        let path = self.markdown_path(id);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ServiceError::storage(&path, e)),
        }
    }

    /// Read one extracted image. `None` for unknown filenames, even on
    /// completed jobs with other images.
    pub fn read_image(&self, id: JobId, filename: &str) -> Result<Option<Vec<u8>>, ServiceError> {
        if !is_safe_filename(filename) {
            return Err(ServiceError::InvalidFilename {
                filename: filename.to_string(),
            });
        }
        let path = self.artifacts_dir(id).join(filename);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ServiceError::storage(&path, e)),
        }
    }

    /// Bundle the Markdown and all images into a zip archive, generated on
    /// demand — download is infrequent and bounded-cost next to conversion.
    ///
    /// Inside the archive, API image links are rewritten to the local
    /// `images/` form so the unpacked folder renders standalone. `None` when
    /// the job has no completed result.
    pub fn bundle_zip(&self, id: JobId) -> Result<Option<Vec<u8>>, ServiceError> {
        let Some(markdown) = self.read_markdown(id)? else {
            return Ok(None);
        };
        let markdown = API_IMAGE_LINK.replace_all(&markdown, "![$1](images/$2)");

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        writer
            .start_file(MARKDOWN_FILE, options)
            .and_then(|()| writer.write_all(markdown.as_bytes()).map_err(Into::into))
            .map_err(|e| ServiceError::Internal(format!("zip write failed: {e}")))?;

        let artifacts = self.artifacts_dir(id);
        if artifacts.is_dir() {
            let entries =
                fs::read_dir(&artifacts).map_err(|e| ServiceError::storage(&artifacts, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| ServiceError::storage(&artifacts, e))?;
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                let bytes = fs::read(&path).map_err(|e| ServiceError::storage(&path, e))?;
                writer
                    .start_file(format!("images/{name}"), options)
                    .and_then(|()| writer.write_all(&bytes).map_err(Into::into))
                    .map_err(|e| ServiceError::Internal(format!("zip write failed: {e}")))?;
            }
        }

        let cursor = writer
            .finish()
            .map_err(|e| ServiceError::Internal(format!("zip finish failed: {e}")))?;
        Ok(Some(cursor.into_inner()))
    }
}

/// Reject filenames that could escape a job's artifact directory.
pub fn is_safe_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.contains("..")
        && !filename.contains('/')
        && !filename.contains('\\')
}

/// Content type for an image artifact, by extension.
pub fn image_content_type(filename: &str) -> &'static str {
    let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn image(name: &str, bytes: &[u8]) -> ExtractedImage {
        ExtractedImage {
            filename: name.to_string(),
            bytes: bytes.to_vec(),
        }
    }

    fn storage() -> (tempfile::TempDir, StorageManager) {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(dir.path().join("output")).unwrap();
        (dir, storage)
    }

    #[test]
    fn write_then_read_round_trip() {
        let (_dir, storage) = storage();
        let id = JobId::new();
        storage
            .write_result(id, "# Title\n\nBody.\n", &[image("fig1.png", b"\x89PNG")])
            .unwrap();

        assert!(storage.has_markdown(id));
        assert_eq!(
            storage.read_markdown(id).unwrap().as_deref(),
            Some("# Title\n\nBody.\n")
        );
        assert_eq!(
            storage.read_image(id, "fig1.png").unwrap().as_deref(),
            Some(&b"\x89PNG"[..])
        );
    }

    #[test]
    fn missing_artifacts_read_as_none() {
        let (_dir, storage) = storage();
        let id = JobId::new();
        assert!(!storage.has_markdown(id));
        assert!(storage.read_markdown(id).unwrap().is_none());
        assert!(storage.read_image(id, "nope.png").unwrap().is_none());
        assert!(storage.bundle_zip(id).unwrap().is_none());
    }

    #[test]
    fn unknown_image_on_completed_job_is_none() {
        let (_dir, storage) = storage();
        let id = JobId::new();
        storage
            .write_result(id, "md", &[image("real.png", b"x")])
            .unwrap();
        assert!(storage.read_image(id, "other.png").unwrap().is_none());
    }

    #[test]
    fn create_job_dir_is_idempotent() {
        let (_dir, storage) = storage();
        let id = JobId::new();
        storage.write_result(id, "content", &[]).unwrap();
        // Re-entry must not error and must not destroy existing content.
        storage.create_job_dir(id).unwrap();
        assert_eq!(storage.read_markdown(id).unwrap().as_deref(), Some("content"));
    }

    #[test]
    fn traversal_filenames_are_rejected() {
        let (_dir, storage) = storage();
        let id = JobId::new();
        for bad in ["../escape.png", "a/b.png", "a\\b.png", ""] {
            let err = storage.read_image(id, bad).unwrap_err();
            assert!(matches!(err, ServiceError::InvalidFilename { .. }), "{bad:?}");
        }
    }

    #[test]
    fn zip_round_trips_and_rewrites_links() {
        let (_dir, storage) = storage();
        let id = JobId::new();
        let md = format!("# Doc\n\n![fig](/api/images/{id}/fig1.png)\n");
        storage
            .write_result(id, &md, &[image("fig1.png", b"pngbytes")])
            .unwrap();

        let zipped = storage.bundle_zip(id).unwrap().expect("zip for done job");
        let mut archive = zip::ZipArchive::new(Cursor::new(zipped)).unwrap();

        let mut unpacked_md = String::new();
        archive
            .by_name(MARKDOWN_FILE)
            .unwrap()
            .read_to_string(&mut unpacked_md)
            .unwrap();
        assert_eq!(unpacked_md, "# Doc\n\n![fig](images/fig1.png)\n");

        let mut img = Vec::new();
        archive
            .by_name("images/fig1.png")
            .unwrap()
            .read_to_end(&mut img)
            .unwrap();
        assert_eq!(img, b"pngbytes");
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(image_content_type("a.png"), "image/png");
        assert_eq!(image_content_type("a.JPG"), "image/jpeg");
        assert_eq!(image_content_type("a.jpeg"), "image/jpeg");
        assert_eq!(image_content_type("a.webp"), "image/webp");
        assert_eq!(image_content_type("mystery"), "application/octet-stream");
    }
}
