//! Vision-OCR service contract and response parsing.
//!
//! The pipeline talks to OCR through [`VisionOcr`], so the dispatcher can be
//! driven by the edgequake-llm backend in production and by scripted mocks in
//! tests.
//!
//! ## Response parsing
//!
//! Models asked for "strict JSON" still wrap it in prose or code fences now
//! and then. [`parse_ocr_payload`] tries a strict parse of the whole answer
//! first, then tries each brace-balanced `{…}` substring from left to right
//! and keeps the first one that parses as an object. A stray `{roughly}` in
//! leading prose is skipped. When nothing parses the page fails and goes
//! through retry like any other error.

use crate::error::OcrError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One page handed to the OCR service.
#[derive(Debug, Clone, Copy)]
pub struct OcrRequest<'a> {
    /// PNG bytes of the rendered page.
    pub image_png: &'a [u8],
    pub page_number: usize,
    pub total_pages: usize,
    /// Native text, present only when it passed the usability threshold.
    pub native_context: Option<&'a str>,
}

/// Structured result of one successful OCR call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrResponse {
    pub retranscribed_text: String,
    pub math_markdown: Vec<String>,
    pub image_descriptions: Vec<String>,
}

/// A service that transcribes one page image.
#[async_trait]
pub trait VisionOcr: Send + Sync {
    async fn analyze_page(&self, request: OcrRequest<'_>) -> Result<OcrResponse, OcrError>;
}

/// Parse a model answer into an [`OcrResponse`].
///
/// Field coercion is forgiving: a non-string `retranscribed_text` is
/// stringified, non-array list fields become empty, and list items are
/// stringified, trimmed, and dropped when blank.
pub fn parse_ocr_payload(page: usize, content: &str) -> Result<OcrResponse, OcrError> {
    let map = extract_json_object(content).map_err(|detail| OcrError::InvalidPayload {
        page,
        detail: detail.to_string(),
    })?;

    Ok(OcrResponse {
        retranscribed_text: map
            .get("retranscribed_text")
            .map(value_to_text)
            .unwrap_or_default()
            .trim()
            .to_string(),
        math_markdown: string_list(map.get("math_markdown")),
        image_descriptions: string_list(map.get("image_descriptions")),
    })
}

/// Strict parse of the trimmed text, then every balanced `{…}` substring in
/// order until one parses as an object.
fn extract_json_object(content: &str) -> Result<Map<String, Value>, &'static str> {
    let trimmed = content.trim();
    let strict_is_json = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => return Ok(map),
        Ok(_) => true,
        Err(_) => false,
    };

    let mut saw_candidate = false;
    let mut from = 0;
    while let Some(offset) = trimmed[from..].find('{') {
        let start = from + offset;
        if let Some(candidate) = balanced_object_at(trimmed, start) {
            saw_candidate = true;
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
                return Ok(map);
            }
        }
        from = start + 1;
    }

    Err(if strict_is_json {
        "model response was JSON but not an object"
    } else if saw_candidate {
        "no well-formed JSON object in model response"
    } else {
        "no JSON object found in model response"
    })
}

/// The `{…}` starting at byte `start` up to its matching `}`, skipping braces
/// inside strings. `None` when it never closes.
fn balanced_object_at(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn value_to_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn string_list(v: Option<&Value>) -> Vec<String> {
    match v {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| value_to_text(item).trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}
