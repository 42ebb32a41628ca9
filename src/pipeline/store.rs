//! Per-document page-analysis store.
//!
//! Every path that produces a page analysis (fast path, first OCR pass,
//! retry, fallback) ends in [`PageAnalysisStore::finalize`]. It is the only
//! place progress is signalled, and it signals each kind at most once per
//! page.
//!
//! The store is owned by a single coordinator. Concurrent OCR calls hand
//! their results back to that owner (see [`crate::pipeline::dispatch`]), and
//! `finalize` takes `&mut self`, so the "already finalized" checks cannot race.

use crate::output::PageAnalysis;
use crate::progress::{NoopProgress, ProgressSink};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Which progress signals a `finalize` call emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FinalizeEffect {
    /// First time this page was finalized on any path.
    pub page_advanced: bool,
    /// First time this page was finalized from the OCR queue.
    pub ocr_advanced: bool,
}

/// Holds the analyses of one document, keyed by page number.
pub struct PageAnalysisStore {
    document: String,
    analyses: BTreeMap<usize, PageAnalysis>,
    finalized_all: HashSet<usize>,
    finalized_ocr: HashSet<usize>,
    progress: ProgressSink,
}

impl PageAnalysisStore {
    pub fn new(document: impl Into<String>, progress: Option<ProgressSink>) -> Self {
        Self {
            document: document.into(),
            analyses: BTreeMap::new(),
            finalized_all: HashSet::new(),
            finalized_ocr: HashSet::new(),
            progress: progress.unwrap_or_else(|| Arc::new(NoopProgress)),
        }
    }

    /// Record `analysis` for `page_number` and signal progress once per kind.
    ///
    /// The analysis itself is overwritten on a repeated call; callers that
    /// must not replace an existing result check [`Self::contains`] first.
    pub fn finalize(&mut self, page_number: usize, analysis: PageAnalysis, from_ocr: bool) -> FinalizeEffect {
        self.analyses.insert(page_number, analysis);

        let mut effect = FinalizeEffect::default();
        if self.finalized_all.insert(page_number) {
            self.progress.advance_document_pages(&self.document);
            self.progress.advance_global_pages();
            effect.page_advanced = true;
        }
        if from_ocr && self.finalized_ocr.insert(page_number) {
            self.progress.advance_document_ocr(&self.document);
            effect.ocr_advanced = true;
        }
        effect
    }

    pub fn contains(&self, page_number: usize) -> bool {
        self.analyses.contains_key(&page_number)
    }

    pub fn get(&self, page_number: usize) -> Option<&PageAnalysis> {
        self.analyses.get(&page_number)
    }

    pub fn len(&self) -> usize {
        self.analyses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyses.is_empty()
    }

    /// Pages finalized on any path.
    pub fn finalized_count(&self) -> usize {
        self.finalized_all.len()
    }

    /// Pages finalized from the OCR queue.
    pub fn ocr_finalized_count(&self) -> usize {
        self.finalized_ocr.len()
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    /// Page numbers currently stored, ascending.
    pub fn page_numbers(&self) -> Vec<usize> {
        self.analyses.keys().copied().collect()
    }

    /// Consume the store, yielding analyses in ascending page order.
    pub fn into_ordered(self) -> Vec<PageAnalysis> {
        self.analyses.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::PipelineProgress;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        pages: AtomicUsize,
        ocr: AtomicUsize,
        global: AtomicUsize,
    }

    impl PipelineProgress for Counting {
        fn advance_document_pages(&self, _document: &str) {
            self.pages.fetch_add(1, Ordering::SeqCst);
        }
        fn advance_document_ocr(&self, _document: &str) {
            self.ocr.fetch_add(1, Ordering::SeqCst);
        }
        fn advance_global_pages(&self) {
            self.global.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn store_with(counter: &Arc<Counting>) -> PageAnalysisStore {
        PageAnalysisStore::new("deck.pdf", Some(Arc::clone(counter) as ProgressSink))
    }

    #[test]
    fn repeated_ocr_finalize_signals_once() {
        let counter = Arc::new(Counting::default());
        let mut store = store_with(&counter);

        let first = store.finalize(2, PageAnalysis::text_only(2, "a"), true);
        let second = store.finalize(2, PageAnalysis::text_only(2, "a"), true);

        assert_eq!(first, FinalizeEffect { page_advanced: true, ocr_advanced: true });
        assert_eq!(second, FinalizeEffect::default());
        assert_eq!(counter.ocr.load(Ordering::SeqCst), 1);
        assert_eq!(counter.pages.load(Ordering::SeqCst), 1);
        assert_eq!(counter.global.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fast_path_then_ocr_signals_each_kind_once() {
        let counter = Arc::new(Counting::default());
        let mut store = store_with(&counter);

        store.finalize(1, PageAnalysis::text_only(1, "native"), false);
        let effect = store.finalize(1, PageAnalysis::text_only(1, "ocr"), true);

        assert!(!effect.page_advanced);
        assert!(effect.ocr_advanced);
        assert_eq!(counter.pages.load(Ordering::SeqCst), 1);
        assert_eq!(counter.ocr.load(Ordering::SeqCst), 1);
        assert_eq!(store.finalized_count(), 1);
        assert_eq!(store.ocr_finalized_count(), 1);
    }

    #[test]
    fn last_writer_wins() {
        let mut store = PageAnalysisStore::new("deck.pdf", None);
        store.finalize(1, PageAnalysis::text_only(1, "old"), false);
        store.finalize(1, PageAnalysis::text_only(1, "new"), false);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(1).unwrap().retranscribed_text, "new");
    }

    #[test]
    fn into_ordered_sorts_by_page() {
        let mut store = PageAnalysisStore::new("deck.pdf", None);
        for page in [3, 1, 2] {
            store.finalize(page, PageAnalysis::text_only(page, format!("p{page}")), true);
        }
        assert_eq!(store.page_numbers(), vec![1, 2, 3]);
        let pages: Vec<usize> = store.into_ordered().iter().map(|p| p.page_number).collect();
        assert_eq!(pages, vec![1, 2, 3]);
    }

    #[test]
    fn empty_store() {
        let store = PageAnalysisStore::new("empty.pdf", None);
        assert!(store.is_empty());
        assert_eq!(store.document(), "empty.pdf");
        assert!(!store.contains(1));
    }
}
