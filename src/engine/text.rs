//! Bundled text-extraction engine built on the `pdf-extract` crate.
//!
//! Deliberately modest: plain text extraction reshaped into readable
//! Markdown, no layout analysis and no image extraction. It exists so the
//! server converts something useful with zero external services; production
//! deployments are expected to plug a richer engine into the
//! [`ConversionEngine`] seam.

use super::{ConversionEngine, EngineError, EngineOutput};
use crate::fingerprint;
use tracing::debug;

/// Text-only engine backed by `pdf_extract::extract_text_from_mem`.
#[derive(Debug, Default)]
pub struct PdfExtractEngine;

impl PdfExtractEngine {
    pub fn new() -> Self {
        PdfExtractEngine
    }
}

impl ConversionEngine for PdfExtractEngine {
    fn name(&self) -> &'static str {
        "pdf-extract"
    }

    fn convert(
        &self,
        pdf_bytes: &[u8],
        _extract_images: bool,
    ) -> Result<EngineOutput, EngineError> {
        let text = pdf_extract::extract_text_from_mem(pdf_bytes)
            .map_err(|e| EngineError::UnreadablePdf(e.to_string()))?;

        let title = fingerprint::extract_title(pdf_bytes);
        let markdown = text_to_markdown(&text, title.as_deref());
        debug!(
            "pdf-extract produced {} bytes of markdown (title: {title:?})",
            markdown.len()
        );

        Ok(EngineOutput {
            markdown,
            images: Vec::new(),
            title,
        })
    }
}

/// Reshape extracted plain text into minimal Markdown: an optional title
/// heading, paragraphs separated by blank lines, single trailing newline.
fn text_to_markdown(text: &str, title: Option<&str>) -> String {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }

    let mut out = String::new();
    if let Some(title) = title {
        out.push_str("# ");
        out.push_str(title.trim());
        out.push_str("\n\n");
    }
    out.push_str(&paragraphs.join("\n\n"));
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_are_joined_and_separated() {
        let text = "first line\nsecond line\n\nnext para\n";
        let md = text_to_markdown(text, None);
        assert_eq!(md, "first line second line\n\nnext para\n");
    }

    #[test]
    fn title_becomes_heading() {
        let md = text_to_markdown("body", Some("My Paper"));
        assert!(md.starts_with("# My Paper\n\n"));
        assert!(md.ends_with("body\n"));
    }

    #[test]
    fn whitespace_only_input_is_just_newline() {
        let md = text_to_markdown("  \n \n", None);
        assert_eq!(md, "\n");
    }

    #[test]
    fn garbage_bytes_fail_as_unreadable() {
        let engine = PdfExtractEngine::new();
        let err = engine.convert(b"not a pdf", true).unwrap_err();
        assert!(matches!(err, EngineError::UnreadablePdf(_)));
    }
}
