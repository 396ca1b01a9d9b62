//! Fingerprint derivation: cheap document identity without running a
//! conversion.
//!
//! Runs synchronously on the upload request path, so it must stay well under
//! conversion time. Parsing only the PDF's trailer/Info dictionary with
//! `lopdf` is bounded and fast — no layout analysis, no page rendering.
//!
//! Untitled PDFs fall back to a content hash of the raw bytes, so
//! byte-identical files still dedupe. Silently skipping caching for untitled
//! documents would quietly degrade the feature.

use crate::cache::Fingerprint;
use lopdf::{Document, Object};
use tracing::debug;

/// Derive the cache key for an uploaded PDF.
///
/// Title metadata when present, content hash otherwise.
pub fn derive(pdf_bytes: &[u8]) -> Fingerprint {
    match extract_title(pdf_bytes) {
        Some(title) => {
            debug!("Fingerprint from title metadata: {title:?}");
            Fingerprint::from_title(&title)
        }
        None => {
            debug!("No usable title metadata; fingerprint from content hash");
            Fingerprint::from_content(pdf_bytes)
        }
    }
}

/// Extract the document title from PDF metadata, if any.
///
/// Returns `None` for missing/empty titles and for documents whose trailer
/// cannot be parsed — an unreadable upload is the conversion engine's problem
/// to report, not the fingerprint's.
pub fn extract_title(pdf_bytes: &[u8]) -> Option<String> {
    let doc = Document::load_mem(pdf_bytes).ok()?;
    let info = doc.trailer.get(b"Info").ok()?;

    // The Info entry is usually an indirect reference, occasionally inline.
    let dict = match info {
        Object::Reference(id) => doc.get_object(*id).ok()?.as_dict().ok()?,
        Object::Dictionary(d) => d,
        _ => return None,
    };

    let title = match dict.get(b"Title").ok()? {
        Object::String(bytes, _) => decode_pdf_text(bytes),
        _ => return None,
    };

    let title = title.trim().to_string();
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

/// Decode a PDF text string: UTF-16BE when it carries a BOM, otherwise
/// treated as (mostly ASCII-compatible) PDFDocEncoding.
fn decode_pdf_text(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}
