//! Pipeline stages for PDF-to-Markdown OCR.
//!
//! Each submodule implements one step. The seams between steps that touch
//! the outside world (page extraction, vision OCR, aggregate cleanup) are
//! traits, so the whole pipeline runs against in-memory fakes in tests.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ trigger ──┬─▶ fast path ───────────────┐
//! (path/URL) (pdfium)  (classify) │                            ▼
//!                                 └─▶ dispatch ──▶ store ──▶ aggregate ──▶ assemble
//!                                     (OCR, retry,  (finalize   (optional    (markdown)
//!                                      fallback)     once)       cleanup)
//! ```
//!
//! 1. [`input`]: discover PDFs, resolve a path or URL to a local file,
//!    move finished sources to the processed directory
//! 2. [`render`]: native text + rasterised pages; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`trigger`]: per-page decision: is a vision call worth it?
//! 4. [`dispatch`]: bounded-concurrency OCR with one retry pass and a
//!    deterministic fallback
//! 5. [`store`]: exactly-once finalize and progress signalling
//! 6. [`aggregate`]: optional model rewrite of the joined page texts
//! 7. [`assemble`]: deterministic markdown from the stored analyses
//!
//! [`ocr`] and [`llm`] hold the vision service contract and its
//! edgequake-llm implementation; [`encode`] prepares images for it.

pub mod aggregate;
pub mod assemble;
pub mod dispatch;
pub mod encode;
pub mod input;
pub mod llm;
pub mod ocr;
pub mod render;
pub mod store;
pub mod trigger;
