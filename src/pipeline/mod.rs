//! Pipeline stages for identifying one scanned book.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own and the batch path can reuse rendering and encoding without the
//! real-time LLM call.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ llm ──▶ crate::metadata
//! (dir)     (pdfium)   (base64)   (VLM)   (JSON reply)
//! ```
//!
//! 1. [`input`]  — list and validate the PDFs of a directory
//! 2. [`render`] — rasterise the first pages; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`encode`] — base64-wrap each page and trim the page count to the
//!    request size budget
//! 4. [`llm`]    — the VLM call with timeout and retry/backoff, paced by
//!    [`rate_limit`]

pub mod encode;
pub mod input;
pub mod llm;
pub mod rate_limit;
pub mod render;

use crate::config::AnalyzeConfig;
use crate::error::FileError;
use edgequake_llm::ImageData;
use std::path::Path;

/// Render, encode and size-limit the pages of one PDF.
///
/// Shared by the real-time and batch paths. Every failure is reported as a
/// [`FileError::RenderFailed`] for `file`.
pub async fn prepare_pages(
    pdf_path: &Path,
    file: &str,
    config: &AnalyzeConfig,
) -> Result<Vec<ImageData>, FileError> {
    let render_err = |detail: String| FileError::RenderFailed {
        file: file.to_string(),
        detail,
    };

    input::check_pdf_magic(pdf_path).map_err(|e| render_err(e.to_string()))?;

    let rendered = render::render_first_pages(
        pdf_path,
        config.max_pages,
        config.max_rendered_pixels,
        config.password.as_deref(),
    )
    .await
    .map_err(|e| render_err(e.to_string()))?;

    if rendered.is_empty() {
        return Err(render_err("PDF has no pages".to_string()));
    }

    let encoded = rendered
        .iter()
        .map(encode::encode_page)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| render_err(format!("Image encoding failed: {}", e)))?;

    let attempts = config.page_attempts(encoded.len());
    let budget = config.max_payload_mb * 1024 * 1024;
    Ok(encode::select_within_budget(encoded, &attempts, budget))
}
