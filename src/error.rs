//! Error types for the pdf-ocr-md library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`OcrMdError`]: **Fatal for one document**: the document cannot be
//!   processed at all (bad input file, page passes disagree, provider not
//!   configured, output not writable). The multi-document loop records it and
//!   moves on to the next document.
//!
//! * [`OcrError`]: **Recoverable, per page**: one vision-OCR call failed.
//!   The page is retried once and then falls back to native text, so this
//!   error never leaves a page slot empty.
//!
//! * [`AggregateError`]: **Recoverable, per document**: the aggregate
//!   cleanup call failed and the assembler uses its deterministic fallback.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf-ocr-md library.
///
/// Page-level failures use [`OcrError`] and are absorbed by the retry and
/// fallback path rather than propagated here.
#[derive(Debug, Error)]
pub enum OcrMdError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// pdfium could not render or read the text of a page.
    #[error("Extraction failed for page {page}: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The text pass and the render pass disagree on how many pages exist.
    #[error("Page count mismatch for '{document}': text={text}, images={images}")]
    PageCountMismatch {
        document: String,
        text: usize,
        images: usize,
    },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Service errors ────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not move a processed source document out of the way.
    #[error("Failed to move '{from}' to '{to}': {source}")]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A recoverable vision-OCR failure for a single page.
///
/// Every variant carries the page number so the retry pass and the fallback
/// diagnostics can be driven from a plain list of failures.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OcrError {
    /// The OCR service rejected the request or the transport failed.
    #[error("Page {page}: OCR request failed: {detail}")]
    Request { page: usize, detail: String },

    /// The OCR call exceeded the per-call timeout.
    #[error("Page {page}: OCR call timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    /// The service answered with no content at all.
    #[error("Page {page}: OCR service returned empty content")]
    EmptyResponse { page: usize },

    /// The answer contained no usable JSON object.
    #[error("Page {page}: OCR response was not valid JSON: {detail}")]
    InvalidPayload { page: usize, detail: String },
}

impl OcrError {
    /// The 1-indexed page this failure belongs to.
    pub fn page(&self) -> usize {
        match self {
            OcrError::Request { page, .. }
            | OcrError::Timeout { page, .. }
            | OcrError::EmptyResponse { page }
            | OcrError::InvalidPayload { page, .. } => *page,
        }
    }
}

/// A recoverable failure of the aggregate-cleanup call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AggregateError {
    /// The rewriting service rejected the request or the transport failed.
    #[error("Aggregate cleanup failed: {0}")]
    Request(String),

    /// The rewriting call exceeded the per-call timeout.
    #[error("Aggregate cleanup timed out after {0}s")]
    Timeout(u64),
}
