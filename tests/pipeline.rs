//! End-to-end pipeline tests against in-memory collaborators.
//!
//! No pdfium, no network: pages come from a scripted [`PageSource`], OCR and
//! aggregate cleanup from scripted services. Source PDFs are tiny files with
//! a valid `%PDF` header so input resolution and processed-dir moves run for
//! real.

use async_trait::async_trait;
use pdf_ocr_md::pipeline::render::pair_page_records;
use pdf_ocr_md::{
    convert_documents, process_pages, AggregateError, AggregateService, DocumentOutcome, OcrError,
    OcrMdError, OcrRequest, OcrResponse, PageRecord, PageSource, PipelineConfig, PipelineProgress,
    PipelineServices, ProgressSink, VisionOcr,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ── Collaborators ────────────────────────────────────────────────────────

/// Pages keyed by file name. A document listed in `corrupt` fails extraction;
/// one listed in `short_render` renders one image fewer than it has pages.
#[derive(Default)]
struct InMemoryPages {
    documents: HashMap<String, Vec<String>>,
    corrupt: HashSet<String>,
    short_render: HashSet<String>,
    uncountable: HashSet<String>,
}

impl InMemoryPages {
    fn with(mut self, name: &str, pages: &[&str]) -> Self {
        self.documents
            .insert(name.to_string(), pages.iter().map(|p| p.to_string()).collect());
        self
    }

    fn corrupt(mut self, name: &str) -> Self {
        self.corrupt.insert(name.to_string());
        self
    }

    fn uncountable(mut self, name: &str) -> Self {
        self.uncountable.insert(name.to_string());
        self
    }

    fn short_render(mut self, name: &str) -> Self {
        self.short_render.insert(name.to_string());
        self
    }

    fn texts(&self, path: &Path) -> Result<Vec<String>, OcrMdError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.corrupt.contains(&name) {
            return Err(OcrMdError::CorruptPdf {
                path: path.to_path_buf(),
                detail: "xref table damaged".into(),
            });
        }
        self.documents
            .get(&name)
            .cloned()
            .ok_or_else(|| OcrMdError::FileNotFound {
                path: path.to_path_buf(),
            })
    }
}

#[async_trait]
impl PageSource for InMemoryPages {
    async fn page_count(&self, path: &Path) -> Result<usize, OcrMdError> {
        let counted = path
            .file_name()
            .is_some_and(|n| !self.uncountable.contains(n.to_string_lossy().as_ref()));
        if !counted {
            return Err(OcrMdError::Internal("page tree unreadable".into()));
        }
        Ok(self.texts(path)?.len())
    }

    async fn extract(&self, path: &Path, _dpi: u32) -> Result<Vec<PageRecord>, OcrMdError> {
        let texts = self.texts(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let rendered = if self.short_render.contains(&name) {
            texts.len().saturating_sub(1)
        } else {
            texts.len()
        };
        let images = vec![Vec::new(); rendered];
        pair_page_records(&path.display().to_string(), texts, images)
    }
}

/// OCR that fails page N's first `fails[N]` attempts (all pages if `always_fail`).
#[derive(Default)]
struct ScriptedOcr {
    fails: HashMap<usize, usize>,
    always_fail: bool,
    attempts: Mutex<HashMap<(usize, usize), usize>>,
    calls: AtomicUsize,
}

#[async_trait]
impl VisionOcr for ScriptedOcr {
    async fn analyze_page(&self, request: OcrRequest<'_>) -> Result<OcrResponse, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let page = request.page_number;
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry((request.total_pages, page)).or_insert(0);
            *n += 1;
            *n
        };
        tokio::time::sleep(Duration::from_millis(((page * 7) % 5) as u64)).await;

        if self.always_fail || attempt <= self.fails.get(&page).copied().unwrap_or(0) {
            return Err(OcrError::Timeout { page, secs: 240 });
        }
        Ok(OcrResponse {
            retranscribed_text: format!("OCR text of page {page}"),
            math_markdown: if page == 1 {
                vec!["a^2 + b^2 = c^2".into()]
            } else {
                vec![]
            },
            image_descriptions: vec![format!("Figure on page {page}")],
        })
    }
}

struct ScriptedAggregate {
    reply: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedAggregate {
    fn replying(text: &str) -> Self {
        Self {
            reply: Some(text.into()),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            reply: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AggregateService for ScriptedAggregate {
    async fn rewrite(&self, _joined: &str) -> Result<String, AggregateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply
            .clone()
            .ok_or_else(|| AggregateError::Request("HTTP 503".into()))
    }
}

#[derive(Default)]
struct Counting {
    documents: AtomicUsize,
    global_pages: AtomicUsize,
    document_pages: AtomicUsize,
    document_ocr: AtomicUsize,
    run_total_pages: AtomicUsize,
    added_pages: AtomicUsize,
}

impl PipelineProgress for Counting {
    fn on_run_start(&self, _total_documents: usize, total_pages: usize) {
        self.run_total_pages.store(total_pages, Ordering::SeqCst);
    }
    fn add_global_pages(&self, pages: usize) {
        self.added_pages.fetch_add(pages, Ordering::SeqCst);
    }
    fn advance_document_pages(&self, _document: &str) {
        self.document_pages.fetch_add(1, Ordering::SeqCst);
    }
    fn advance_document_ocr(&self, _document: &str) {
        self.document_ocr.fetch_add(1, Ordering::SeqCst);
    }
    fn advance_global_pages(&self) {
        self.global_pages.fetch_add(1, Ordering::SeqCst);
    }
    fn advance_documents(&self) {
        self.documents.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn services(
    pages: InMemoryPages,
    ocr: Arc<ScriptedOcr>,
    aggregate: Arc<ScriptedAggregate>,
) -> PipelineServices {
    PipelineServices::new(Arc::new(pages), ocr, aggregate)
}

fn records(texts: &[&str]) -> Vec<PageRecord> {
    let texts = texts.iter().map(|t| t.to_string()).collect::<Vec<_>>();
    let images = vec![Vec::new(); texts.len()];
    pair_page_records("deck.pdf", texts, images).unwrap()
}

fn write_pdf(dir: &Path, name: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, b"%PDF-1.7\n%stub\n").unwrap();
    path.to_string_lossy().into_owned()
}

fn run_dirs() -> (TempDir, PathBuf, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("markdown");
    let processed = dir.path().join("processed");
    (dir, out, processed)
}

// ── process_pages ────────────────────────────────────────────────────────

#[tokio::test]
async fn every_page_failing_still_yields_every_slide() {
    let ocr = Arc::new(ScriptedOcr {
        always_fail: true,
        ..Default::default()
    });
    let svc = services(
        InMemoryPages::default(),
        Arc::clone(&ocr),
        Arc::new(ScriptedAggregate::failing()),
    );
    let config = PipelineConfig::builder().workers(3).build().unwrap();
    let recs = records(&["Intro", "", "Conclusion"]);

    let result = process_pages("deck.pdf", &recs, &svc, &config).await;

    assert_eq!(result.total_pages, 3);
    assert_eq!(result.ocr_queue_count, 3);
    assert_eq!(result.fallback_pages, vec![1, 2, 3]);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 6);
    for n in 1..=3 {
        assert_eq!(
            result.output_text.matches(&format!("## Slide {n}\n")).count(),
            1
        );
    }
    assert!(result
        .output_text
        .contains("(Slide OCR failed and no native PDF text was available.)"));
    assert!(result.output_text.contains(
        "## Clean Aggregate\n\nIntro\n\n(Slide OCR failed and no native PDF text was available.)\n\nConclusion\n\n"
    ));
    assert!(result.output_text.contains("- Retry error: Page 2: OCR call timed out after 240s"));
    assert!(!result.aggregate_cleaned);
}

#[tokio::test]
async fn retry_recovers_a_flaky_page() {
    let ocr = Arc::new(ScriptedOcr {
        fails: HashMap::from([(2, 1)]),
        ..Default::default()
    });
    let svc = services(
        InMemoryPages::default(),
        ocr,
        Arc::new(ScriptedAggregate::replying("One story.")),
    );
    let config = PipelineConfig::builder().workers(2).build().unwrap();

    let result = process_pages("deck.pdf", &records(&["a", "b", "c"]), &svc, &config).await;

    assert_eq!(result.recovered_pages, vec![2]);
    assert!(result.fallback_pages.is_empty());
    assert!(result.output_text.contains("OCR text of page 2"));
    assert!(!result.output_text.contains("OCR failed after retry"));
    assert!(result.output_text.contains("## Clean Aggregate\n\nOne story.\n\n"));
    assert!(result.output_text.contains("$$\na^2 + b^2 = c^2\n$$"));
    assert!(result.aggregate_cleaned);
}

#[tokio::test]
async fn native_fast_path_skips_plain_pages() {
    let ocr = Arc::new(ScriptedOcr::default());
    let svc = services(
        InMemoryPages::default(),
        Arc::clone(&ocr),
        Arc::new(ScriptedAggregate::failing()),
    );
    let config = PipelineConfig::builder()
        .native_fast_path(true)
        .min_native_chars(10)
        .skip_aggregate_cleanup(true)
        .build()
        .unwrap();
    let recs = records(&[
        "A perfectly ordinary paragraph of words.",
        "short",
        "The loss is L = sum of errors",
        "See the architecture diagram",
    ]);

    let result = process_pages("deck.pdf", &recs, &svc, &config).await;

    assert_eq!(result.ocr_queue_count, 3);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 3);
    assert!(result
        .output_text
        .contains("- Used native PDF text fast path (vision OCR skipped)."));
    assert!(result.output_text.contains("A perfectly ordinary paragraph of words."));
}

#[tokio::test]
async fn skipped_cleanup_never_calls_the_service() {
    let aggregate = Arc::new(ScriptedAggregate::replying("unused"));
    let svc = services(
        InMemoryPages::default(),
        Arc::new(ScriptedOcr::default()),
        Arc::clone(&aggregate),
    );
    let config = PipelineConfig::builder()
        .skip_aggregate_cleanup(true)
        .build()
        .unwrap();

    let result = process_pages("deck.pdf", &records(&["x"]), &svc, &config).await;

    assert_eq!(aggregate.calls.load(Ordering::SeqCst), 0);
    assert!(result
        .output_text
        .contains("## Clean Aggregate\n\nOCR text of page 1\n\n"));
}

#[tokio::test]
async fn worker_count_does_not_change_output() {
    let texts = ["one", "two", "three", "four", "five", "six"];
    let mut outputs = Vec::new();
    for workers in [1, 4] {
        let svc = services(
            InMemoryPages::default(),
            Arc::new(ScriptedOcr {
                fails: HashMap::from([(3, 1), (5, 2)]),
                ..Default::default()
            }),
            Arc::new(ScriptedAggregate::failing()),
        );
        let config = PipelineConfig::builder().workers(workers).build().unwrap();
        outputs.push(process_pages("deck.pdf", &records(&texts), &svc, &config).await);
    }
    assert_eq!(outputs[0].output_text, outputs[1].output_text);
    assert_eq!(outputs[0].recovered_pages, vec![3]);
    assert_eq!(outputs[1].fallback_pages, vec![5]);
}

// ── convert_documents ────────────────────────────────────────────────────

#[tokio::test]
async fn failing_document_does_not_stop_the_run() {
    let (dir, out, processed) = run_dirs();
    let inputs = vec![
        write_pdf(dir.path(), "a.pdf"),
        write_pdf(dir.path(), "broken.pdf"),
        write_pdf(dir.path(), "c.pdf"),
    ];
    let pages = InMemoryPages::default()
        .with("a.pdf", &["alpha 1", "alpha 2"])
        .with("c.pdf", &["gamma"])
        .corrupt("broken.pdf");
    let counter = Arc::new(Counting::default());
    let svc = services(
        pages,
        Arc::new(ScriptedOcr::default()),
        Arc::new(ScriptedAggregate::failing()),
    );
    let config = PipelineConfig::builder()
        .output_dir(&out)
        .processed_dir(&processed)
        .progress(Arc::clone(&counter) as ProgressSink)
        .build()
        .unwrap();

    let summary = convert_documents(&inputs, &svc, &config).await;

    assert_eq!(summary.documents_succeeded(), 2);
    assert_eq!(summary.documents_failed(), 1);
    assert_eq!(summary.exit_code(), 1);
    assert_eq!(summary.total_pages, 3);
    assert_eq!(summary.pages_succeeded(), 3);
    assert_eq!(summary.ocr_queue_pages(), 3);
    assert!(matches!(
        summary.documents[1],
        DocumentOutcome::Failed {
            error: OcrMdError::CorruptPdf { .. },
            ..
        }
    ));

    let a_md = std::fs::read_to_string(out.join("a.md")).unwrap();
    assert!(a_md.starts_with("# OCR Transcript: a.pdf\n"));
    assert!(out.join("c.md").exists());
    assert!(!out.join("broken.md").exists());

    assert!(processed.join("a.pdf").exists());
    assert!(processed.join("c.pdf").exists());
    assert!(dir.path().join("broken.pdf").exists());

    assert_eq!(counter.documents.load(Ordering::SeqCst), 3);
    assert_eq!(counter.run_total_pages.load(Ordering::SeqCst), 3);
    assert_eq!(counter.global_pages.load(Ordering::SeqCst), 3);
    assert_eq!(counter.document_pages.load(Ordering::SeqCst), 3);
    assert_eq!(counter.document_ocr.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn page_count_mismatch_fails_only_that_document() {
    let (dir, out, processed) = run_dirs();
    let inputs = vec![
        write_pdf(dir.path(), "mismatch.pdf"),
        write_pdf(dir.path(), "ok.pdf"),
    ];
    let pages = InMemoryPages::default()
        .with("mismatch.pdf", &["one", "two", "three"])
        .with("ok.pdf", &["only page"])
        .short_render("mismatch.pdf");
    let ocr = Arc::new(ScriptedOcr::default());
    let svc = services(
        pages,
        Arc::clone(&ocr),
        Arc::new(ScriptedAggregate::replying("Clean")),
    );
    let config = PipelineConfig::builder()
        .output_dir(&out)
        .processed_dir(&processed)
        .build()
        .unwrap();

    let summary = convert_documents(&inputs, &svc, &config).await;

    assert_eq!(summary.documents_succeeded(), 1);
    assert_eq!(summary.documents_failed(), 1);
    assert_eq!(summary.exit_code(), 1);
    match &summary.documents[0] {
        DocumentOutcome::Failed {
            error: OcrMdError::PageCountMismatch { text, images, .. },
            ..
        } => {
            assert_eq!(*text, 3);
            assert_eq!(*images, 2);
        }
        other => panic!("expected a page-count mismatch, got {other:?}"),
    }

    // No OCR call is spent on a document whose pages could not be paired.
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    assert!(!out.join("mismatch.md").exists());
    assert!(dir.path().join("mismatch.pdf").exists());
    assert!(out.join("ok.md").exists());
    assert!(processed.join("ok.pdf").exists());
}

#[tokio::test]
async fn pages_missing_from_precount_grow_the_global_total() {
    let (dir, out, processed) = run_dirs();
    let inputs = vec![
        write_pdf(dir.path(), "counted.pdf"),
        write_pdf(dir.path(), "late.pdf"),
    ];
    let pages = InMemoryPages::default()
        .with("counted.pdf", &["a", "b"])
        .with("late.pdf", &["x", "y", "z"])
        .uncountable("late.pdf");
    let counter = Arc::new(Counting::default());
    let svc = services(
        pages,
        Arc::new(ScriptedOcr::default()),
        Arc::new(ScriptedAggregate::replying("Clean")),
    );
    let config = PipelineConfig::builder()
        .output_dir(&out)
        .processed_dir(&processed)
        .progress(Arc::clone(&counter) as ProgressSink)
        .build()
        .unwrap();

    let summary = convert_documents(&inputs, &svc, &config).await;

    assert_eq!(summary.documents_succeeded(), 2);
    assert_eq!(counter.run_total_pages.load(Ordering::SeqCst), 2);
    assert_eq!(counter.added_pages.load(Ordering::SeqCst), 3);
    let global_total = counter.run_total_pages.load(Ordering::SeqCst)
        + counter.added_pages.load(Ordering::SeqCst);
    assert_eq!(counter.global_pages.load(Ordering::SeqCst), global_total);
    assert_eq!(summary.total_pages, 5);
    assert_eq!(summary.pages_succeeded(), 5);
}

#[tokio::test]
async fn processed_name_collision_gets_suffix() {
    let (dir, out, processed) = run_dirs();
    std::fs::create_dir_all(&processed).unwrap();
    std::fs::write(processed.join("deck.pdf"), b"earlier run").unwrap();
    let inputs = vec![write_pdf(dir.path(), "deck.pdf")];
    let svc = services(
        InMemoryPages::default().with("deck.pdf", &["hello"]),
        Arc::new(ScriptedOcr::default()),
        Arc::new(ScriptedAggregate::failing()),
    );
    let config = PipelineConfig::builder()
        .output_dir(&out)
        .processed_dir(&processed)
        .build()
        .unwrap();

    let summary = convert_documents(&inputs, &svc, &config).await;

    match &summary.documents[0] {
        DocumentOutcome::Converted { moved_to, .. } => {
            assert_eq!(moved_to.as_deref(), Some(processed.join("deck-1.pdf").as_path()));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(summary.exit_code(), 0);
}

#[tokio::test]
async fn dry_run_counts_pages_and_writes_nothing() {
    let (dir, out, processed) = run_dirs();
    let inputs = vec![write_pdf(dir.path(), "deck.pdf")];
    let ocr = Arc::new(ScriptedOcr::default());
    let svc = services(
        InMemoryPages::default().with("deck.pdf", &["p1", "p2", "p3"]),
        Arc::clone(&ocr),
        Arc::new(ScriptedAggregate::failing()),
    );
    let config = PipelineConfig::builder()
        .output_dir(&out)
        .processed_dir(&processed)
        .dry_run(true)
        .build()
        .unwrap();

    let summary = convert_documents(&inputs, &svc, &config).await;

    assert!(matches!(
        summary.documents[0],
        DocumentOutcome::DryRun { pages: 3, .. }
    ));
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    assert!(!out.exists());
    assert!(!processed.exists());
    assert!(dir.path().join("deck.pdf").exists());
}

#[tokio::test]
async fn output_next_to_source_without_output_dir() {
    let (dir, _, _) = run_dirs();
    let inputs = vec![write_pdf(dir.path(), "notes.pdf")];
    let svc = services(
        InMemoryPages::default().with("notes.pdf", &["text"]),
        Arc::new(ScriptedOcr::default()),
        Arc::new(ScriptedAggregate::failing()),
    );
    let config = PipelineConfig::builder().build().unwrap();

    let summary = convert_documents(&inputs, &svc, &config).await;

    assert_eq!(summary.exit_code(), 0);
    assert!(dir.path().join("notes.md").exists());
    assert!(dir.path().join("notes.pdf").exists());
}
