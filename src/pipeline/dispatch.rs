//! OCR dispatch: bounded-concurrency first pass, one retry pass, fallback.
//!
//! ## Flow
//!
//! ```text
//! queued pages ──▶ first pass ──ok──▶ finalize (processed)
//!                      │
//!                    failed (error kept)
//!                      ▼
//!                 retry pass ──ok──▶ finalize (recovered)
//!                      │
//!                    failed
//!                      ▼
//!                 fallback text + both errors ──▶ finalize (fallback)
//! ```
//!
//! Every OCR call is a future in a `buffer_unordered` stream capped at the
//! worker count. The stream has exactly one consumer, the pass loop, and that
//! loop is the only code touching the [`PageAnalysisStore`]. Completion order
//! is therefore free to vary while finalize stays exactly-once. With one
//! worker the pass is a plain sequential loop with the same outcome.
//!
//! Failures are values ([`OcrFailure`]) collected per pass; the retry pass
//! runs over that list after every first attempt has finished.

use crate::error::OcrError;
use crate::output::PageAnalysis;
use crate::pipeline::ocr::{OcrRequest, OcrResponse, VisionOcr};
use crate::pipeline::render::PageRecord;
use crate::pipeline::store::PageAnalysisStore;
use crate::pipeline::trigger::{classify, is_native_text_usable, TriggerReason};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

/// Text used when a fast-path page has no native text.
pub const NO_NATIVE_TEXT: &str = "(No native text detected.)";
/// Image note recorded on fast-path pages.
pub const FAST_PATH_NOTE: &str = "Used native PDF text fast path (vision OCR skipped).";
/// Text used when OCR failed twice and there is no native text.
pub const OCR_FAILED_NO_TEXT: &str = "(Slide OCR failed and no native PDF text was available.)";

/// Which pass an OCR attempt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    First,
    Retry,
}

/// How a queued page was finally settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageOutcome {
    /// First OCR attempt succeeded.
    Processed,
    /// First attempt failed, retry succeeded.
    Recovered,
    /// Both attempts failed; fallback text was used.
    Fallback,
}

/// Per-page outcomes of one dispatch, keyed by page number.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub outcomes: BTreeMap<usize, PageOutcome>,
}

impl DispatchReport {
    fn pages_with(&self, outcome: PageOutcome) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|(_, o)| **o == outcome)
            .map(|(page, _)| *page)
            .collect()
    }

    pub fn processed_pages(&self) -> Vec<usize> {
        self.pages_with(PageOutcome::Processed)
    }

    pub fn recovered_pages(&self) -> Vec<usize> {
        self.pages_with(PageOutcome::Recovered)
    }

    pub fn fallback_pages(&self) -> Vec<usize> {
        self.pages_with(PageOutcome::Fallback)
    }
}

/// A failed OCR attempt, kept as a value for the next pass.
#[derive(Debug, Clone)]
pub struct OcrFailure<'r> {
    pub record: &'r PageRecord,
    pub error: OcrError,
}

/// Result of classifying a document's pages.
#[derive(Debug, Default)]
pub struct Triage<'r> {
    /// Pages that go to vision OCR, ascending.
    pub queued: Vec<&'r PageRecord>,
    /// Pages finalized from native text, with the classifier's reason.
    pub fast_path: Vec<(&'r PageRecord, TriggerReason)>,
}

/// Split pages between the OCR queue and the native-text fast path.
///
/// Without `native_fast_path` every page is queued and the classifier is
/// never consulted.
pub fn triage(records: &[PageRecord], native_fast_path: bool, min_native_chars: usize) -> Triage<'_> {
    let mut triage = Triage::default();
    for record in records {
        if !native_fast_path {
            triage.queued.push(record);
            continue;
        }
        let decision = classify(&record.native_text, &record.image, min_native_chars);
        if decision.use_vision {
            info!(
                "Page {}/{} queued for OCR ({})",
                record.page_number, record.total_pages, decision.reason
            );
            triage.queued.push(record);
        } else {
            triage.fast_path.push((record, decision.reason));
        }
    }
    triage
}

/// Analysis for a page that skips OCR.
pub fn fast_path_analysis(record: &PageRecord) -> PageAnalysis {
    let text = record.native_text.trim();
    PageAnalysis {
        page_number: record.page_number,
        retranscribed_text: if text.is_empty() { NO_NATIVE_TEXT } else { text }.to_string(),
        math_markdown: Vec::new(),
        image_descriptions: vec![FAST_PATH_NOTE.to_string()],
    }
}

/// Analysis for a page whose OCR failed on both passes.
pub fn fallback_analysis(record: &PageRecord, first: Option<&OcrError>, retry: &OcrError) -> PageAnalysis {
    let text = record.native_text.trim();
    let first = first.map(ToString::to_string).unwrap_or_else(|| "unknown".to_string());
    PageAnalysis {
        page_number: record.page_number,
        retranscribed_text: if text.is_empty() { OCR_FAILED_NO_TEXT } else { text }.to_string(),
        math_markdown: Vec::new(),
        image_descriptions: vec![
            format!("OCR failed after retry. First error: {first}"),
            format!("Retry error: {retry}"),
        ],
    }
}

/// Analysis from a successful OCR response; blank OCR text falls back to native text.
fn analysis_from_ocr(record: &PageRecord, response: OcrResponse) -> PageAnalysis {
    let text = response.retranscribed_text.trim();
    let text = if text.is_empty() {
        record.native_text.trim()
    } else {
        text
    };
    PageAnalysis {
        page_number: record.page_number,
        retranscribed_text: text.to_string(),
        math_markdown: response.math_markdown,
        image_descriptions: response.image_descriptions,
    }
}

/// Runs vision OCR for the queued pages of one document.
pub struct OcrDispatcher<'a> {
    ocr: &'a dyn VisionOcr,
    workers: usize,
    min_native_chars: usize,
}

impl<'a> OcrDispatcher<'a> {
    /// `workers` is a cap on calls in flight; values below 1 are treated as 1.
    pub fn new(ocr: &'a dyn VisionOcr, workers: usize, min_native_chars: usize) -> Self {
        Self {
            ocr,
            workers: workers.max(1),
            min_native_chars,
        }
    }

    /// OCR every queued page, retry failures once, and fall back for the rest.
    ///
    /// On return every queued page has exactly one entry in `store`.
    pub async fn dispatch(&self, queued: &[&PageRecord], store: &mut PageAnalysisStore) -> DispatchReport {
        let mut report = DispatchReport::default();

        let first_failures = self
            .run_pass(queued.to_vec(), Pass::First, store, &mut report)
            .await;
        if first_failures.is_empty() {
            return report;
        }

        info!(
            "Retrying {} failed page(s) for {}",
            first_failures.len(),
            store.document()
        );
        let mut first_errors: HashMap<usize, OcrError> = HashMap::new();
        let mut retry_queue = Vec::with_capacity(first_failures.len());
        for failure in first_failures {
            first_errors.insert(failure.record.page_number, failure.error);
            retry_queue.push(failure.record);
        }

        let retry_failures = self
            .run_pass(retry_queue, Pass::Retry, store, &mut report)
            .await;

        for OcrFailure { record, error } in retry_failures {
            let page = record.page_number;
            if !store.contains(page) {
                let analysis = fallback_analysis(record, first_errors.get(&page), &error);
                store.finalize(page, analysis, true);
            }
            report.outcomes.insert(page, PageOutcome::Fallback);
            warn!(
                "Page {}/{} failed again; used fallback text.",
                page, record.total_pages
            );
        }

        report
    }

    /// One pass over `pages`; returns the failures sorted by page number.
    async fn run_pass<'r>(
        &self,
        pages: Vec<&'r PageRecord>,
        pass: Pass,
        store: &mut PageAnalysisStore,
        report: &mut DispatchReport,
    ) -> Vec<OcrFailure<'r>> {
        let mut failures = Vec::new();
        if pages.is_empty() {
            return failures;
        }

        let workers = self.workers.min(pages.len());
        if workers == 1 {
            for record in pages {
                let result = self.analyze(record).await;
                settle(record, result, pass, store, report, &mut failures);
            }
        } else {
            let mut in_flight = stream::iter(
                pages
                    .into_iter()
                    .map(|record| async move { (record, self.analyze(record).await) }),
            )
            .buffer_unordered(workers);

            while let Some((record, result)) = in_flight.next().await {
                settle(record, result, pass, store, report, &mut failures);
            }
        }

        failures.sort_by_key(|f| f.record.page_number);
        failures
    }

    async fn analyze(&self, record: &PageRecord) -> Result<PageAnalysis, OcrError> {
        let native_context = is_native_text_usable(&record.native_text, self.min_native_chars)
            .then_some(record.native_text.as_str());

        let response = self
            .ocr
            .analyze_page(OcrRequest {
                image_png: &record.image,
                page_number: record.page_number,
                total_pages: record.total_pages,
                native_context,
            })
            .await?;

        Ok(analysis_from_ocr(record, response))
    }
}

/// Route one attempt's result: finalize on success, collect on failure.
fn settle<'r>(
    record: &'r PageRecord,
    result: Result<PageAnalysis, OcrError>,
    pass: Pass,
    store: &mut PageAnalysisStore,
    report: &mut DispatchReport,
    failures: &mut Vec<OcrFailure<'r>>,
) {
    let page = record.page_number;
    match result {
        Ok(analysis) => {
            store.finalize(page, analysis, true);
            let outcome = match pass {
                Pass::First => {
                    info!("Processed page {}/{}", page, record.total_pages);
                    PageOutcome::Processed
                }
                Pass::Retry => {
                    info!("Recovered page {}/{} on retry", page, record.total_pages);
                    PageOutcome::Recovered
                }
            };
            report.outcomes.insert(page, outcome);
        }
        Err(error) => {
            match pass {
                Pass::First => warn!(
                    "Page {}/{} failed (will retry later): {}",
                    page, record.total_pages, error
                ),
                Pass::Retry => warn!(
                    "Page {}/{} retry failed: {}",
                    page, record.total_pages, error
                ),
            }
            failures.push(OcrFailure { record, error });
        }
    }
}
