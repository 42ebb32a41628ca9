//! Page extraction: native text plus a rasterised PNG for every page.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool so the
//! Tokio workers driving OCR calls never stall on rendering.
//!
//! ## Two passes
//!
//! Text extraction and rendering are separate passes over the document. Their
//! page counts must agree; [`pair_page_records`] refuses to guess which page
//! an orphaned image belongs to.

use crate::error::OcrMdError;
use crate::pipeline::encode;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// One page as handed to the pipeline. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    /// 1-indexed, contiguous within a document.
    pub page_number: usize,
    pub total_pages: usize,
    pub native_text: String,
    /// PNG bytes of the rendered page.
    pub image: Vec<u8>,
}

/// Produces [`PageRecord`]s for a document.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Count pages without rendering; used to size global progress.
    async fn page_count(&self, path: &Path) -> Result<usize, OcrMdError>;

    /// Extract every page, ordered 1..N.
    async fn extract(&self, path: &Path, dpi: u32) -> Result<Vec<PageRecord>, OcrMdError>;
}

/// Zip the text pass and the render pass into records numbered 1..N.
pub fn pair_page_records(
    document: &str,
    texts: Vec<String>,
    images: Vec<Vec<u8>>,
) -> Result<Vec<PageRecord>, OcrMdError> {
    if texts.len() != images.len() {
        return Err(OcrMdError::PageCountMismatch {
            document: document.to_string(),
            text: texts.len(),
            images: images.len(),
        });
    }

    let total_pages = texts.len();
    Ok(texts
        .into_iter()
        .zip(images)
        .enumerate()
        .map(|(i, (native_text, image))| PageRecord {
            page_number: i + 1,
            total_pages,
            native_text,
            image,
        })
        .collect())
}

/// Integer render scale used for a given DPI (PDF user space is 72 DPI).
///
/// Halves round to even, so 180 DPI renders at 2×.
pub fn render_scale(dpi: u32) -> f32 {
    (dpi as f32 / 72.0).round_ties_even().max(1.0)
}

/// [`PageSource`] backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumPageSource {
    password: Option<String>,
    max_rendered_pixels: u32,
}

impl PdfiumPageSource {
    pub fn new(password: Option<String>, max_rendered_pixels: u32) -> Self {
        Self {
            password,
            max_rendered_pixels,
        }
    }
}

#[async_trait]
impl PageSource for PdfiumPageSource {
    async fn page_count(&self, path: &Path) -> Result<usize, OcrMdError> {
        let path = path.to_path_buf();
        let password = self.password.clone();

        tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium()?;
            let document = load_document(&pdfium, &path, password.as_deref())?;
            Ok(document.pages().len() as usize)
        })
        .await
        .map_err(|e| OcrMdError::Internal(format!("Page-count task panicked: {}", e)))?
    }

    async fn extract(&self, path: &Path, dpi: u32) -> Result<Vec<PageRecord>, OcrMdError> {
        let path = path.to_path_buf();
        let password = self.password.clone();
        let max_pixels = self.max_rendered_pixels;

        tokio::task::spawn_blocking(move || {
            extract_blocking(&path, dpi, max_pixels, password.as_deref())
        })
        .await
        .map_err(|e| OcrMdError::Internal(format!("Render task panicked: {}", e)))?
    }
}

/// Bind pdfium from `PDFIUM_LIB_PATH`, the working directory, or the system.
fn bind_pdfium() -> Result<Pdfium, OcrMdError> {
    let dir = std::env::var("PDFIUM_LIB_PATH").unwrap_or_else(|_| "./".to_string());
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| OcrMdError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

fn load_document<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, OcrMdError> {
    pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                OcrMdError::WrongPassword {
                    path: pdf_path.to_path_buf(),
                }
            } else {
                OcrMdError::PasswordRequired {
                    path: pdf_path.to_path_buf(),
                }
            }
        } else {
            OcrMdError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

/// Blocking implementation of page extraction.
fn extract_blocking(
    pdf_path: &Path,
    dpi: u32,
    max_pixels: u32,
    password: Option<&str>,
) -> Result<Vec<PageRecord>, OcrMdError> {
    let pdfium = bind_pdfium()?;
    let document = load_document(&pdfium, pdf_path, password)?;
    let pages = document.pages();
    info!("PDF loaded: {} pages", pages.len());

    // ── Text pass ────────────────────────────────────────────────────────
    let mut texts = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let text = page.text().map_err(|e| OcrMdError::RenderFailed {
            page: idx + 1,
            detail: format!("{:?}", e),
        })?;
        texts.push(text.all().trim().to_string());
    }

    // ── Render pass ──────────────────────────────────────────────────────
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(render_scale(dpi))
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| OcrMdError::RenderFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );

        let png = encode::encode_png(&image).map_err(|e| OcrMdError::RenderFailed {
            page: idx + 1,
            detail: format!("PNG encoding failed: {}", e),
        })?;
        images.push(png);
    }

    let name = pdf_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| pdf_path.display().to_string());
    pair_page_records(&name, texts, images)
}
