//! PDF rasterisation: render the leading pages of a scan via pdfium.
//!
//! pdfium is not async-safe, so all work runs inside
//! `tokio::task::spawn_blocking`. The longest edge of every page is capped
//! at `max_rendered_pixels`; scans at 600 DPI would otherwise produce images
//! far larger than any vision API accepts.

use crate::error::OcrRenameError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Bind to pdfium: the library cached by pdfium-auto when present, else the
/// system library.
pub fn bind_pdfium() -> Result<Pdfium, OcrRenameError> {
    if let Some(path) = pdfium_auto::cached_pdfium_path() {
        return pdfium_auto::bind_pdfium_from_path(&path)
            .map_err(|e| OcrRenameError::PdfiumBindingFailed(e.to_string()));
    }
    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| OcrRenameError::PdfiumBindingFailed(format!("{e:?}")))
}

/// Render the first `max_pages` pages of `pdf_path`.
///
/// # Returns
/// Page images in page order; fewer than `max_pages` when the document is
/// shorter.
pub async fn render_first_pages(
    pdf_path: &Path,
    max_pages: usize,
    max_pixels: u32,
    password: Option<&str>,
) -> Result<Vec<DynamicImage>, OcrRenameError> {
    let path = pdf_path.to_path_buf();
    let password = password.map(str::to_string);

    tokio::task::spawn_blocking(move || {
        render_first_pages_blocking(&path, max_pages, max_pixels, password.as_deref())
    })
    .await
    .map_err(|e| OcrRenameError::Internal(format!("Render task panicked: {}", e)))?
}

/// Blocking implementation of page rendering.
fn render_first_pages_blocking(
    pdf_path: &Path,
    max_pages: usize,
    max_pixels: u32,
    password: Option<&str>,
) -> Result<Vec<DynamicImage>, OcrRenameError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                OcrRenameError::WrongPassword {
                    path: pdf_path.to_path_buf(),
                }
            } else {
                OcrRenameError::PasswordRequired {
                    path: pdf_path.to_path_buf(),
                }
            }
        } else {
            OcrRenameError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    let count = max_pages.min(total_pages);
    info!(
        "{}: {} pages, rendering {}",
        pdf_path.display(),
        total_pages,
        count
    );

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(count);
    for idx in 0..count {
        let page = pages
            .get(idx as u16)
            .map_err(|e| OcrRenameError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            OcrRenameError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        images.push(image);
    }

    Ok(images)
}
