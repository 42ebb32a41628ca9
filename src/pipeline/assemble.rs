//! Document assembly: finalized page analyses → one markdown transcript.
//!
//! [`assemble`] is a pure function. It sorts its input by page number itself,
//! so the order in which pages were finalized never shows in the output.
//!
//! ```text
//! # OCR Transcript: <file name>
//!
//! ## Clean Aggregate
//!
//! <aggregate or fallback>
//!
//! ## Per-Slide Details
//!
//! ## Slide 1
//!
//! ### Retranscribed Text
//!
//! ...
//! ```
//!
//! Every block, heading or body, is separated from the next by one blank line.

use crate::output::PageAnalysis;

pub const NO_TEXT: &str = "(No text detected)";
pub const NO_MATH: &str = "(No explicit math content detected)";
pub const NO_IMAGES: &str = "- (No meaningful image content detected)";
pub const NO_AGGREGATE: &str = "(No aggregate text available)";

/// Right-trim every line, then trim the whole text.
pub fn normalize_multiline(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Keep `$…$` entries verbatim and wrap everything else in a `$$` block.
/// Blank entries are dropped.
pub fn normalize_math_entries<S: AsRef<str>>(entries: &[S]) -> Vec<String> {
    entries
        .iter()
        .map(|e| normalize_multiline(e.as_ref()))
        .filter(|e| !e.is_empty())
        .map(|e| {
            if e.starts_with('$') && e.ends_with('$') {
                e
            } else {
                format!("$$\n{e}\n$$")
            }
        })
        .collect()
}

/// The per-page subsection.
pub fn build_page_markdown(page: &PageAnalysis) -> String {
    let text = normalize_multiline(&page.retranscribed_text);
    let math = normalize_math_entries(&page.math_markdown);
    let images: Vec<String> = page
        .image_descriptions
        .iter()
        .map(|d| d.trim())
        .filter(|d| !d.is_empty())
        .map(|d| format!("- {d}"))
        .collect();

    let mut parts = vec![
        format!("## Slide {}", page.page_number),
        "### Retranscribed Text".to_string(),
        if text.is_empty() { NO_TEXT.to_string() } else { text },
        "### Math".to_string(),
    ];
    if math.is_empty() {
        parts.push(NO_MATH.to_string());
    } else {
        parts.extend(math);
    }
    parts.push("### Images".to_string());
    if images.is_empty() {
        parts.push(NO_IMAGES.to_string());
    } else {
        parts.extend(images);
    }

    parts.join("\n\n").trim().to_string()
}

/// Deterministic aggregate: the non-blank page texts, blank-line separated.
///
/// `pages` must already be in ascending page order.
pub fn build_fallback_aggregate(pages: &[&PageAnalysis]) -> String {
    let joined = pages
        .iter()
        .map(|p| normalize_multiline(&p.retranscribed_text))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    if joined.is_empty() {
        NO_AGGREGATE.to_string()
    } else {
        joined
    }
}

/// Build the final markdown for `source_name`.
///
/// A `None` or blank `aggregate` selects the deterministic fallback.
pub fn assemble(source_name: &str, pages: &[PageAnalysis], aggregate: Option<&str>) -> String {
    let mut ordered: Vec<&PageAnalysis> = pages.iter().collect();
    ordered.sort_by_key(|p| p.page_number);

    let aggregate = aggregate
        .map(normalize_multiline)
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| build_fallback_aggregate(&ordered));

    let mut sections = vec![
        format!("# OCR Transcript: {source_name}"),
        "## Clean Aggregate".to_string(),
        aggregate,
        "## Per-Slide Details".to_string(),
    ];
    sections.extend(ordered.iter().map(|p| build_page_markdown(p)));

    let body = sections
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{body}\n")
}
