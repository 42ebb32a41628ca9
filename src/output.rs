//! Result types produced by the pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The finalized analysis of one page.
///
/// Exactly one exists per page once that page has been processed, whether
/// by vision OCR, the native-text fast path, or the failure fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageAnalysis {
    /// 1-indexed page number.
    pub page_number: usize,
    /// Clean transcript of the page's text.
    pub retranscribed_text: String,
    /// Equations as Markdown-ready LaTeX, in page order.
    pub math_markdown: Vec<String>,
    /// Short descriptions of figures and visual content, in page order.
    pub image_descriptions: Vec<String>,
}

impl PageAnalysis {
    /// An analysis carrying only text.
    pub fn text_only(page_number: usize, text: impl Into<String>) -> Self {
        Self {
            page_number,
            retranscribed_text: text.into(),
            ..Default::default()
        }
    }
}

/// The result of processing a single document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResult {
    /// The assembled Markdown document.
    pub output_text: String,
    /// Number of pages in the source document.
    pub total_pages: usize,
    /// Number of pages that were queued for vision OCR.
    pub ocr_queue_count: usize,
    /// Pages that failed the first OCR pass and succeeded on retry.
    pub recovered_pages: Vec<usize>,
    /// Pages that failed both OCR passes and used fallback text.
    pub fallback_pages: Vec<usize>,
    /// Whether the aggregate section came from the cleanup service.
    pub aggregate_cleaned: bool,
    /// Where the Markdown was written, when it was written to disk.
    pub output_path: Option<PathBuf>,
}

/// What happened to one input of a multi-document run.
#[derive(Debug)]
pub enum DocumentOutcome {
    /// The document was converted (and possibly moved to the processed dir).
    Converted {
        input: String,
        result: DocumentResult,
        moved_to: Option<PathBuf>,
    },
    /// Dry run: pages were extracted and counted, nothing else.
    DryRun { input: String, pages: usize },
    /// The document failed; siblings were unaffected.
    Failed {
        input: String,
        error: crate::error::OcrMdError,
    },
}

impl DocumentOutcome {
    /// The input string this outcome belongs to.
    pub fn input(&self) -> &str {
        match self {
            DocumentOutcome::Converted { input, .. }
            | DocumentOutcome::DryRun { input, .. }
            | DocumentOutcome::Failed { input, .. } => input,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, DocumentOutcome::Failed { .. })
    }
}

/// Aggregated outcome of a multi-document run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// One entry per input, in processing order.
    pub documents: Vec<DocumentOutcome>,
    /// Pre-counted pages across every input, plus the pages of converted
    /// documents that could not be pre-counted.
    pub total_pages: usize,
}

impl RunSummary {
    /// Number of documents that were converted.
    pub fn documents_succeeded(&self) -> usize {
        self.documents
            .iter()
            .filter(|d| matches!(d, DocumentOutcome::Converted { .. }))
            .count()
    }

    /// Number of documents that failed.
    pub fn documents_failed(&self) -> usize {
        self.documents.iter().filter(|d| d.is_failure()).count()
    }

    /// Pages belonging to converted documents.
    pub fn pages_succeeded(&self) -> usize {
        self.converted().map(|r| r.total_pages).sum()
    }

    /// OCR-queued pages belonging to converted documents.
    pub fn ocr_queue_pages(&self) -> usize {
        self.converted().map(|r| r.ocr_queue_count).sum()
    }

    /// Process exit status: non-zero if any document failed.
    pub fn exit_code(&self) -> i32 {
        if self.documents_failed() > 0 {
            1
        } else {
            0
        }
    }

    fn converted(&self) -> impl Iterator<Item = &DocumentResult> {
        self.documents.iter().filter_map(|d| match d {
            DocumentOutcome::Converted { result, .. } => Some(result),
            _ => None,
        })
    }
}
