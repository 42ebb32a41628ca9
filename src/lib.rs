//! # pdf-ocr-md
//!
//! Turn slide decks and other multi-page PDFs into Markdown transcripts by
//! combining the text a PDF already carries with vision-model OCR.
//!
//! ## Why mix native text and OCR?
//!
//! Native PDF text is free and exact but misses anything drawn: equations
//! set as images, diagrams, screenshots, scanned slides. A vision model reads
//! all of that but costs a call per page. The pipeline decides page by page
//! which source is good enough, runs the model calls under a concurrency cap,
//! and always produces a complete transcript: a page whose OCR fails twice
//! falls back to its native text, and a failed cleanup call falls back to a
//! deterministic aggregate.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Extract   native text + rendered PNG per page (pdfium, spawn_blocking)
//!  ├─ 2. Trigger   weak text / math / diagram keywords / visual structure?
//!  ├─ 3. Dispatch  bounded-concurrency OCR, one retry pass, fallback text
//!  ├─ 4. Store     exactly-once finalize per page, progress signals
//!  ├─ 5. Cleanup   optional model rewrite of the joined page texts
//!  └─ 6. Assemble  "# OCR Transcript" markdown, pages in order
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_ocr_md::{convert_to_file, PipelineConfig, PipelineServices};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .provider_name("ollama")
//!         .model("llama3.2-vision")
//!         .workers(4)
//!         .build()?;
//!     let services = PipelineServices::from_config(&config)?;
//!     let result = convert_to_file("slides.pdf", &services, &config).await?;
//!     eprintln!(
//!         "{} pages, {} sent to OCR",
//!         result.total_pages, result.ocr_queue_count
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf-ocr-md` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf-ocr-md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use convert::{
    convert_documents, convert_to_file, output_markdown_path, process_document, process_pages,
    PipelineServices,
};
pub use error::{AggregateError, OcrError, OcrMdError};
pub use output::{DocumentOutcome, DocumentResult, PageAnalysis, RunSummary};
pub use pipeline::aggregate::AggregateService;
pub use pipeline::ocr::{OcrRequest, OcrResponse, VisionOcr};
pub use pipeline::render::{PageRecord, PageSource};
pub use pipeline::trigger::{classify, TriggerDecision, TriggerReason};
pub use progress::{NoopProgress, PipelineProgress, ProgressSink};
