//! Conversion entry points: one document, one file, or a whole run.
//!
//! ## Layers
//!
//! - [`process_pages`] is the core pipeline over records already in memory:
//!   classify, fast path or dispatch, aggregate cleanup, assembly. It cannot
//!   fail; every page ends up with an analysis.
//! - [`process_document`] and [`convert_to_file`] add input resolution, page
//!   extraction, and the atomic Markdown write. Their errors are fatal for
//!   that one document.
//! - [`convert_documents`] runs many inputs in order, turns each document's
//!   error into a [`DocumentOutcome::Failed`], and keeps going.
//!
//! The outside world is reached only through [`PipelineServices`], so every
//! layer runs against in-memory fakes in tests.

use crate::config::PipelineConfig;
use crate::error::OcrMdError;
use crate::output::{DocumentOutcome, DocumentResult, RunSummary};
use crate::pipeline::aggregate::{AggregateCleaner, AggregateService};
use crate::pipeline::assemble::assemble;
use crate::pipeline::dispatch::{fast_path_analysis, triage, OcrDispatcher};
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::llm::LlmVision;
use crate::pipeline::ocr::VisionOcr;
use crate::pipeline::render::{PageRecord, PageSource, PdfiumPageSource};
use crate::pipeline::store::PageAnalysisStore;
use crate::progress::{NoopProgress, ProgressSink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The collaborators a run talks to.
#[derive(Clone)]
pub struct PipelineServices {
    pub pages: Arc<dyn PageSource>,
    pub ocr: Arc<dyn VisionOcr>,
    pub aggregate: Arc<dyn AggregateService>,
}

impl PipelineServices {
    pub fn new(
        pages: Arc<dyn PageSource>,
        ocr: Arc<dyn VisionOcr>,
        aggregate: Arc<dyn AggregateService>,
    ) -> Self {
        Self {
            pages,
            ocr,
            aggregate,
        }
    }

    /// pdfium for pages and one edgequake-llm provider for both model calls.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, OcrMdError> {
        let model = Arc::new(LlmVision::from_config(config)?);
        Ok(Self {
            pages: Arc::new(PdfiumPageSource::new(
                config.password.clone(),
                config.max_rendered_pixels,
            )),
            ocr: Arc::clone(&model) as Arc<dyn VisionOcr>,
            aggregate: model,
        })
    }
}

fn progress_sink(config: &PipelineConfig) -> ProgressSink {
    config
        .progress
        .clone()
        .unwrap_or_else(|| Arc::new(NoopProgress))
}

/// Run the page pipeline for one document whose pages are already extracted.
///
/// `name` is used in the Markdown title and in progress events.
pub async fn process_pages(
    name: &str,
    records: &[PageRecord],
    services: &PipelineServices,
    config: &PipelineConfig,
) -> DocumentResult {
    let start = Instant::now();
    let progress = progress_sink(config);

    let plan = triage(records, config.native_fast_path, config.min_native_chars);
    let ocr_queue_count = plan.queued.len();
    info!(
        "{}: {} page(s), {} queued for OCR",
        name,
        records.len(),
        ocr_queue_count
    );
    progress.on_document_start(name, ocr_queue_count, records.len());

    let mut store = PageAnalysisStore::new(name, Some(Arc::clone(&progress)));
    for (record, reason) in &plan.fast_path {
        debug!(
            "Page {}/{} uses native text ({})",
            record.page_number, record.total_pages, reason
        );
        store.finalize(record.page_number, fast_path_analysis(record), false);
    }

    let report = OcrDispatcher::new(services.ocr.as_ref(), config.workers, config.min_native_chars)
        .dispatch(&plan.queued, &mut store)
        .await;

    let pages = store.into_ordered();
    let aggregate = if config.skip_aggregate_cleanup {
        None
    } else {
        let texts: Vec<&str> = pages.iter().map(|p| p.retranscribed_text.as_str()).collect();
        AggregateCleaner::new(services.aggregate.as_ref())
            .clean(&texts)
            .await
    };
    let aggregate_cleaned = aggregate.as_deref().is_some_and(|a| !a.trim().is_empty());

    progress.on_document_finish(name);
    let output_text = assemble(name, &pages, aggregate.as_deref());

    debug!("{}: assembled in {:?}", name, start.elapsed());
    DocumentResult {
        output_text,
        total_pages: records.len(),
        ocr_queue_count,
        recovered_pages: report.recovered_pages(),
        fallback_pages: report.fallback_pages(),
        aggregate_cleaned,
        output_path: None,
    }
}

/// Resolve `input` (path or URL), extract its pages, and run the pipeline.
pub async fn process_document(
    input_str: impl AsRef<str>,
    services: &PipelineServices,
    config: &PipelineConfig,
) -> Result<DocumentResult, OcrMdError> {
    let resolved = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    process_resolved(resolved.path(), services, config, false).await
}

/// `precounted` says whether the document's pages are already part of the
/// run's global page total.
async fn process_resolved(
    path: &Path,
    services: &PipelineServices,
    config: &PipelineConfig,
    precounted: bool,
) -> Result<DocumentResult, OcrMdError> {
    let records = services.pages.extract(path, config.dpi).await?;
    if !precounted {
        progress_sink(config).add_global_pages(records.len());
    }
    Ok(process_pages(&display_name(path), &records, services, config).await)
}

/// Convert `input` and write `<stem>.md` atomically.
///
/// The file goes to `config.output_dir`, or next to a local source. A
/// downloaded source without an output directory writes to the working
/// directory.
pub async fn convert_to_file(
    input_str: impl AsRef<str>,
    services: &PipelineServices,
    config: &PipelineConfig,
) -> Result<DocumentResult, OcrMdError> {
    write_document(input_str.as_ref(), services, config, false).await
}

async fn write_document(
    input_str: &str,
    services: &PipelineServices,
    config: &PipelineConfig,
    precounted: bool,
) -> Result<DocumentResult, OcrMdError> {
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let mut result = process_resolved(resolved.path(), services, config, precounted).await?;

    let target_dir = match (&config.output_dir, &resolved) {
        (Some(dir), _) => Some(dir.as_path()),
        (None, ResolvedInput::Downloaded { .. }) => Some(Path::new(".")),
        (None, ResolvedInput::Local(_)) => None,
    };
    let path = output_markdown_path(resolved.path(), target_dir);
    write_atomic(&path, &result.output_text).await?;

    result.output_path = Some(path);
    Ok(result)
}

/// `<dir>/<stem>.md`, where `dir` defaults to the source's own directory.
pub fn output_markdown_path(source: &Path, output_dir: Option<&Path>) -> PathBuf {
    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| source.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    dir.join(format!("{stem}.md"))
}

/// Write to a temp file next to `path`, then rename over it.
async fn write_atomic(path: &Path, contents: &str) -> Result<(), OcrMdError> {
    let write_err = |e| OcrMdError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(write_err)?;
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Convert every input in order.
///
/// A failing document is recorded and never stops the run. Successful local
/// sources are moved into `config.processed_dir` when one is set. With
/// `config.dry_run` pages are only extracted and counted.
pub async fn convert_documents(
    inputs: &[String],
    services: &PipelineServices,
    config: &PipelineConfig,
) -> RunSummary {
    let progress = progress_sink(config);

    // URL inputs are counted once downloaded, never here.
    let mut total_pages = 0;
    let mut precounted = Vec::with_capacity(inputs.len());
    for input in inputs {
        if input::is_url(input) {
            precounted.push(false);
            continue;
        }
        match services.pages.page_count(Path::new(input)).await {
            Ok(n) => {
                total_pages += n;
                precounted.push(true);
            }
            Err(e) => {
                warn!("Could not pre-count pages in {}: {}", input, e);
                precounted.push(false);
            }
        }
    }
    progress.on_run_start(inputs.len(), total_pages);

    let mut summary = RunSummary {
        documents: Vec::with_capacity(inputs.len()),
        total_pages,
    };

    for (input, counted) in inputs.iter().zip(precounted) {
        info!("Processing: {}", input);
        let outcome = if config.dry_run {
            dry_run_document(input, services, config).await
        } else {
            convert_one(input, services, config, counted).await
        };

        match &outcome {
            DocumentOutcome::Failed { error, .. } => warn!("Failed {}: {}", input, error),
            DocumentOutcome::Converted { result, .. } if !counted => {
                summary.total_pages += result.total_pages;
            }
            _ => {}
        }
        progress.advance_documents();
        summary.documents.push(outcome);
    }

    info!(
        "Run complete: {}/{} document(s), {}/{} page(s), {} OCR-queued page(s)",
        summary.documents_succeeded(),
        inputs.len(),
        summary.pages_succeeded(),
        summary.total_pages,
        summary.ocr_queue_pages()
    );
    summary
}

async fn dry_run_document(
    input: &str,
    services: &PipelineServices,
    config: &PipelineConfig,
) -> DocumentOutcome {
    let extracted = async {
        let resolved = input::resolve_input(input, config.download_timeout_secs).await?;
        services.pages.extract(resolved.path(), config.dpi).await
    }
    .await;

    match extracted {
        Ok(records) => {
            info!("[dry run] {}: {} page(s) discovered", input, records.len());
            DocumentOutcome::DryRun {
                input: input.to_string(),
                pages: records.len(),
            }
        }
        Err(error) => DocumentOutcome::Failed {
            input: input.to_string(),
            error,
        },
    }
}

async fn convert_one(
    input: &str,
    services: &PipelineServices,
    config: &PipelineConfig,
    precounted: bool,
) -> DocumentOutcome {
    let failed = |error| DocumentOutcome::Failed {
        input: input.to_string(),
        error,
    };

    let result = match write_document(input, services, config, precounted).await {
        Ok(result) => result,
        Err(error) => return failed(error),
    };
    if let Some(ref path) = result.output_path {
        info!("Wrote {}", path.display());
    }

    let moved_to = match &config.processed_dir {
        Some(dir) if !input::is_url(input) => {
            match input::move_to_processed(Path::new(input), dir) {
                Ok(target) => Some(target),
                Err(error) => return failed(error),
            }
        }
        _ => None,
    };

    DocumentOutcome::Converted {
        input: input.to_string(),
        result,
        moved_to,
    }
}
