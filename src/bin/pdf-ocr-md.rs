//! CLI binary for pdf-ocr-md.
//!
//! A thin shim over the library crate: discovers PDFs, maps flags to
//! `PipelineConfig`, renders progress with indicatif, and prints a summary.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use pdf_ocr_md::pipeline::input::{find_root_pdfs, select_by_name};
use pdf_ocr_md::pipeline::render::PdfiumPageSource;
use pdf_ocr_md::{
    convert_documents, AggregateError, AggregateService, DocumentOutcome, OcrError, OcrRequest,
    OcrResponse, PipelineConfig, PipelineProgress, PipelineServices, ProgressSink, RunSummary,
    VisionOcr,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress using indicatif ─────────────────────────────────────────────

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.cyan} {prefix:<28.bold} [{bar:40.green/238}] {pos:>4}/{len:<4} ⏱ {elapsed_precise}  ETA {eta_precise}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
    .tick_strings(TICKS)
}

/// Per-document bars: every page, and the OCR-queued subset.
struct DocumentBars {
    all: ProgressBar,
    ocr: ProgressBar,
}

/// Terminal progress: a documents bar, a global pages bar, and two bars per
/// document while it is being processed.
struct CliProgress {
    multi: MultiProgress,
    documents: ProgressBar,
    global_pages: ProgressBar,
    per_document: Mutex<HashMap<String, DocumentBars>>,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let multi = MultiProgress::new();
        let documents = multi.add(ProgressBar::new(0));
        documents.set_style(bar_style());
        documents.set_prefix("Documents");
        let global_pages = multi.add(ProgressBar::new(0));
        global_pages.set_style(bar_style());
        global_pages.set_prefix("Global pages");

        Arc::new(Self {
            multi,
            documents,
            global_pages,
            per_document: Mutex::new(HashMap::new()),
        })
    }

    fn add_bar(&self, prefix: String, len: usize) -> ProgressBar {
        let bar = self.multi.add(ProgressBar::new(len as u64));
        bar.set_style(bar_style());
        bar.set_prefix(prefix);
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    }

    fn with_bars(&self, document: &str, f: impl FnOnce(&DocumentBars)) {
        if let Some(bars) = self.per_document.lock().unwrap().get(document) {
            f(bars);
        }
    }

    fn finish(&self) {
        self.documents.finish();
        self.global_pages.finish();
    }
}

impl PipelineProgress for CliProgress {
    fn on_run_start(&self, total_documents: usize, total_pages: usize) {
        self.documents.set_length(total_documents as u64);
        self.global_pages.set_length(total_pages as u64);
        self.documents.enable_steady_tick(Duration::from_millis(80));
    }

    fn add_global_pages(&self, pages: usize) {
        self.global_pages.inc_length(pages as u64);
    }

    fn on_document_start(&self, document: &str, ocr_queued: usize, total_pages: usize) {
        let ocr = self.add_bar(format!("{document} OCR queue"), ocr_queued);
        let all = self.add_bar(format!("{document} all pages"), total_pages);
        self.per_document
            .lock()
            .unwrap()
            .insert(document.to_string(), DocumentBars { all, ocr });
    }

    fn advance_document_pages(&self, document: &str) {
        self.with_bars(document, |bars| bars.all.inc(1));
    }

    fn advance_document_ocr(&self, document: &str) {
        self.with_bars(document, |bars| bars.ocr.inc(1));
    }

    fn advance_global_pages(&self) {
        self.global_pages.inc(1);
    }

    fn on_document_finish(&self, document: &str) {
        if let Some(bars) = self.per_document.lock().unwrap().remove(document) {
            bars.ocr.finish_and_clear();
            bars.all.finish_and_clear();
            self.multi.remove(&bars.ocr);
            self.multi.remove(&bars.all);
        }
    }

    fn advance_documents(&self) {
        self.documents.inc(1);
    }
}

// ── Dry-run stand-in ─────────────────────────────────────────────────────────

/// Model stand-in for `--dry-run`, which extracts pages but never calls a model.
struct NoModel;

#[async_trait]
impl VisionOcr for NoModel {
    async fn analyze_page(&self, request: OcrRequest<'_>) -> Result<OcrResponse, OcrError> {
        Err(OcrError::Request {
            page: request.page_number,
            detail: "dry run: no model configured".to_string(),
        })
    }
}

#[async_trait]
impl AggregateService for NoModel {
    async fn rewrite(&self, _joined: &str) -> Result<String, AggregateError> {
        Err(AggregateError::Request("dry run: no model configured".to_string()))
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert every PDF in the current directory with a local Ollama model
  pdf-ocr-md --provider ollama --model llama3.2-vision

  # Only some of the PDFs in the current directory
  pdf-ocr-md --pdf lecture-01.pdf --pdf lecture-02.pdf

  # Explicit inputs (paths or URLs), keep sources where they are
  pdf-ocr-md slides.pdf https://example.com/talk.pdf --no-move

  # Cheaper: skip OCR on pages whose native text is strong
  pdf-ocr-md --native-fast-path --workers 4

  # See what would be processed
  pdf-ocr-md --dry-run

OUTPUT:
  One <name>.md per PDF in --output-dir (default ./markdown). After a PDF is
  converted it is moved into --processed-dir (default ./processed); a name
  collision gets a -1, -2, ... suffix. The exit status is 1 if any PDF failed.

ENVIRONMENT VARIABLES:
  EDGEQUAKE_LLM_PROVIDER  Provider when --provider is not given (ollama, lmstudio, openai, ...)
  EDGEQUAKE_MODEL         Model when --model is not given
  OLLAMA_HOST             Ollama server URL
  PDFIUM_LIB_PATH         Directory containing libpdfium
  RUST_LOG                Log filter, overrides --verbose / --quiet
"#;

/// Convert PDFs to Markdown transcripts with native text and vision OCR.
#[derive(Parser, Debug)]
#[command(
    name = "pdf-ocr-md",
    version,
    about = "Convert PDFs to Markdown transcripts with native text and vision OCR",
    long_about = "Find PDFs (by default in the current directory root), transcribe each page \
with a vision model where native text is not enough, and write one clean Markdown file per PDF.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF paths or HTTP/HTTPS URLs. Default: PDFs in the current directory root.
    inputs: Vec<String>,

    /// Only process PDFs with this file name (repeatable).
    #[arg(long = "pdf", value_name = "NAME")]
    pdf: Vec<String>,

    /// Vision model ID (e.g. llama3.2-vision, gpt-4.1-mini).
    #[arg(long, env = "PDF_OCR_MD_MODEL")]
    model: Option<String>,

    /// LLM provider: ollama, lmstudio, openai, anthropic, gemini, ...
    #[arg(long, env = "PDF_OCR_MD_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI for page images (72-400).
    #[arg(long, env = "PDF_OCR_MD_DPI", default_value_t = 180,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Compact native characters needed before native text counts as usable.
    #[arg(long, env = "PDF_OCR_MD_MIN_NATIVE_CHARS", default_value_t = 80)]
    min_native_chars: usize,

    /// Concurrent OCR calls per PDF.
    #[arg(short, long, env = "PDF_OCR_MD_WORKERS", default_value_t = 2)]
    workers: usize,

    /// Skip OCR on pages whose native text is strong and show no visual signal.
    #[arg(long, env = "PDF_OCR_MD_NATIVE_FAST_PATH")]
    native_fast_path: bool,

    /// Skip the final aggregate cleanup call.
    #[arg(long, env = "PDF_OCR_MD_SKIP_AGGREGATE_CLEANUP")]
    skip_aggregate_cleanup: bool,

    /// Directory for Markdown output.
    #[arg(long, env = "PDF_OCR_MD_OUTPUT_DIR", default_value = "markdown")]
    output_dir: PathBuf,

    /// Directory converted PDFs are moved into.
    #[arg(long, env = "PDF_OCR_MD_PROCESSED_DIR", default_value = "processed")]
    processed_dir: PathBuf,

    /// Leave converted PDFs where they are.
    #[arg(long)]
    no_move: bool,

    /// Extract and count pages only; no model calls, no files written.
    #[arg(long)]
    dry_run: bool,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF_OCR_MD_PASSWORD")]
    password: Option<String>,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "PDF_OCR_MD_API_TIMEOUT", default_value_t = 240)]
    api_timeout: u64,

    /// Disable progress bars.
    #[arg(long, env = "PDF_OCR_MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF_OCR_MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF_OCR_MD_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Progress bars replace INFO logs; verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.dry_run;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inputs ───────────────────────────────────────────────────────────
    let discovered = cli.inputs.is_empty();
    let candidates: Vec<PathBuf> = if discovered {
        let root = std::env::current_dir().context("Cannot determine the current directory")?;
        let found = find_root_pdfs(&root);
        if found.is_empty() {
            println!("No PDF files found in {}", root.display());
            return Ok(ExitCode::SUCCESS);
        }
        found
    } else {
        cli.inputs.iter().map(PathBuf::from).collect()
    };

    let (selected, missing) = select_by_name(candidates, &cli.pdf);
    for name in &missing {
        eprintln!("Warning: selected PDF not found: {name}");
    }
    if selected.is_empty() {
        eprintln!("No selected PDF files found.");
        return Ok(ExitCode::FAILURE);
    }
    let inputs: Vec<String> = selected
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    if !cli.quiet {
        eprintln!("Found {} PDF(s)", inputs.len());
    }

    // ── Config + services ────────────────────────────────────────────────
    let progress = show_progress.then(CliProgress::new);
    let config = build_config(&cli, progress.clone().map(|p| p as ProgressSink))?;

    let services = if cli.dry_run {
        let no_model = Arc::new(NoModel);
        PipelineServices::new(
            Arc::new(PdfiumPageSource::new(
                config.password.clone(),
                config.max_rendered_pixels,
            )),
            Arc::clone(&no_model) as Arc<dyn VisionOcr>,
            no_model,
        )
    } else {
        PipelineServices::from_config(&config).context("Failed to set up the vision model")?
    };

    // ── Run ──────────────────────────────────────────────────────────────
    let summary = convert_documents(&inputs, &services, &config).await;
    if let Some(progress) = progress {
        progress.finish();
    }

    if !cli.quiet {
        report(&summary, cli.dry_run);
    }

    Ok(if summary.exit_code() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(summary.exit_code() as u8)
    })
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressSink>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .dpi(cli.dpi)
        .workers(cli.workers)
        .min_native_chars(cli.min_native_chars)
        .native_fast_path(cli.native_fast_path)
        .skip_aggregate_cleanup(cli.skip_aggregate_cleanup)
        .api_timeout_secs(cli.api_timeout)
        .output_dir(&cli.output_dir)
        .dry_run(cli.dry_run);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if !cli.no_move && !cli.dry_run {
        builder = builder.processed_dir(&cli.processed_dir);
    }
    if let Some(sink) = progress {
        builder = builder.progress(sink);
    }

    builder.build().context("Invalid configuration")
}

/// Per-document lines, then one summary line.
fn report(summary: &RunSummary, dry_run: bool) {
    for outcome in &summary.documents {
        match outcome {
            DocumentOutcome::Converted {
                input,
                result,
                moved_to,
            } => {
                let written = result
                    .output_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                eprintln!("{} {input} → {}", green("✔"), bold(&written));
                if !result.fallback_pages.is_empty() {
                    eprintln!("    fallback text used on pages {:?}", result.fallback_pages);
                }
                if let Some(moved) = moved_to {
                    eprintln!("    moved source to {}", moved.display());
                }
            }
            DocumentOutcome::DryRun { input, pages } => {
                eprintln!("[dry run] {input}: {pages} pages discovered");
            }
            DocumentOutcome::Failed { input, error } => {
                eprintln!("{} {input}: {}", red("✘"), red(&error.to_string()));
            }
        }
    }

    if dry_run {
        return;
    }
    let pages_left = summary.total_pages.saturating_sub(summary.pages_succeeded());
    eprintln!(
        "Summary: Documents {}/{} | Pages {}/{} | Pages left {} | OCR queue pages {}",
        summary.documents_succeeded(),
        summary.documents.len(),
        summary.pages_succeeded(),
        summary.total_pages,
        pages_left,
        summary.ocr_queue_pages()
    );
}
