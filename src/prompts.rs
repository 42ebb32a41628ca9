//! Prompts for page OCR and aggregate cleanup.
//!
//! Centralising every prompt here keeps the request-building code in
//! [`crate::pipeline::llm`] free of wording, and lets unit tests inspect the
//! prompts without a live model.

/// System prompt for the per-page vision-OCR call.
pub const OCR_SYSTEM_PROMPT: &str = "You are an OCR and document-transcription assistant. \
Extract slide text exactly, preserve meaning, and improve readability. \
Capture math in LaTeX-compatible markdown. \
Describe meaningful visual content and figures succinctly. \
Return strict JSON only.";

/// System prompt for the aggregate-cleanup call.
pub const AGGREGATE_SYSTEM_PROMPT: &str = "You are a markdown editor for OCR transcripts. \
Output clean markdown only, preserving technical meaning and equations.";

/// Build the user prompt for one page.
///
/// `native_context` is the page's native text when it is long enough to be
/// trusted as context; `None` (or blank) renders as `(none)`.
pub fn ocr_user_prompt(page_number: usize, total_pages: usize, native_context: Option<&str>) -> String {
    let context = native_context
        .filter(|t| !t.trim().is_empty())
        .unwrap_or("(none)");

    format!(
        "Analyze slide/page {page_number} of {total_pages}.\n\
Return JSON with keys: retranscribed_text (string), math_markdown (array of strings), image_descriptions (array of strings).\n\
Rules:\n\
1) retranscribed_text: clean and complete transcript of textual content on page.\n\
2) math_markdown: include each distinct equation as markdown-ready LaTeX strings.\n\
3) image_descriptions: bullet-ready short descriptions of charts, diagrams, photos, and key visual signals.\n\
4) Do not include explanations outside JSON.\n\
Native extracted text (may be partial/noisy):\n{context}"
    )
}

/// Build the user prompt for the aggregate-cleanup call.
pub fn aggregate_user_prompt(joined: &str) -> String {
    format!(
        "Rewrite the following slide transcript into one clean markdown narrative. \
Preserve equations in LaTeX markdown and keep all important technical content. \
Do not add facts not present in text.\n\n{joined}"
    )
}
