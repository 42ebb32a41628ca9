//! Progress-sink trait for per-document and per-page pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgress>`] via
//! [`crate::config::PipelineConfigBuilder::progress`] to receive discrete
//! "advance" signals as pages are finalized. Absence of a sink is equivalent
//! to [`NoopProgress`] and never changes what the pipeline produces.
//!
//! The advance signals are emitted from exactly one place,
//! [`crate::pipeline::store::PageAnalysisStore::finalize`], which guarantees
//! at most one page-advance and one OCR-advance per page per document.
//!
//! # Example
//!
//! ```rust
//! use pdf_ocr_md::{PipelineConfig, PipelineProgress};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingProgress {
//!     pages: AtomicUsize,
//! }
//!
//! impl PipelineProgress for CountingProgress {
//!     fn advance_global_pages(&self) {
//!         self.pages.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let sink = Arc::new(CountingProgress { pages: AtomicUsize::new(0) });
//! let config = PipelineConfig::builder()
//!     .progress(sink as Arc<dyn PipelineProgress>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Receives progress signals from the pipeline.
///
/// Implementations must be `Send + Sync`. All methods have default no-op
/// implementations so callers only override what they render.
pub trait PipelineProgress: Send + Sync {
    /// Called once before the first document is processed.
    ///
    /// `total_pages` is the pre-counted page total across all documents.
    /// Pages of documents left out of it (URL inputs, failed pre-counts) are
    /// reported later through [`Self::add_global_pages`].
    fn on_run_start(&self, total_documents: usize, total_pages: usize) {
        let _ = (total_documents, total_pages);
    }

    /// A document missing from the pre-count was extracted with `pages` pages.
    ///
    /// Called before any of those pages is finalized, so the global total
    /// never trails the global position.
    fn add_global_pages(&self, pages: usize) {
        let _ = pages;
    }

    /// Called once per document after classification, before any OCR call.
    fn on_document_start(&self, document: &str, ocr_queued: usize, total_pages: usize) {
        let _ = (document, ocr_queued, total_pages);
    }

    /// One page of `document` has been finalized (any path).
    fn advance_document_pages(&self, document: &str) {
        let _ = document;
    }

    /// One OCR-queued page of `document` has been finalized.
    fn advance_document_ocr(&self, document: &str) {
        let _ = document;
    }

    /// One page has been finalized, counted across every document in the run.
    fn advance_global_pages(&self) {}

    /// Called when a document's pages are all finalized and assembled.
    fn on_document_finish(&self, document: &str) {
        let _ = document;
    }

    /// One document has been attempted, whether it succeeded or failed.
    fn advance_documents(&self) {}
}

/// A no-op sink for callers that don't need progress events.
///
/// This is the default when no sink is configured.
pub struct NoopProgress;

impl PipelineProgress for NoopProgress {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressSink = Arc<dyn PipelineProgress>;
