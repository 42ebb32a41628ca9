//! Trigger classifier: decide, per page, whether vision OCR is worth a call.
//!
//! Rules are evaluated in order and the first match wins:
//!
//! 1. compact native text shorter than `min_native_chars` → `weak_native_text`
//! 2. math indicators in the native text → `math_detected`
//! 3. diagram/figure keywords in the native text → `diagram_keyword_detected`
//! 4. compact text shorter than [`VISUAL_CHECK_MAX_CHARS`] and the rendered
//!    page shows visual structure → `visual_structure_detected`
//! 5. otherwise → `native_text_only`
//!
//! Rules 1–3 are linear in the text length. Rule 4 is the only one that
//! decodes the image, and it only runs for short pages.
//!
//! The thresholds below are policy: changing any of them changes which pages
//! are sent to the model.

use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Pages with at least this many compact characters never get the image check.
pub const VISUAL_CHECK_MAX_CHARS: usize = 450;
/// Minimum pixel area for an image to be considered at all.
pub const MIN_VISUAL_AREA: u64 = 40_000;
/// Minimum grayscale histogram entropy (bits).
pub const MIN_GRAY_ENTROPY: f64 = 2.0;
/// Minimum mean edge intensity, paired with [`MIN_GRAY_STDDEV`].
pub const MIN_EDGE_MEAN: f64 = 10.0;
/// Minimum grayscale standard deviation, paired with [`MIN_EDGE_MEAN`].
pub const MIN_GRAY_STDDEV: f64 = 28.0;
/// Minimum average per-channel colour standard deviation.
pub const MIN_COLOR_STDDEV: f64 = 35.0;

static MATH_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\$[^$]+\$",
        r"(?i)\b(sum|prod|lim|sin|cos|tan|log|ln|sqrt|frac|integral|derivative)\b",
        r"[=≈≠≤≥∑∫∞√α-ωΑ-Ω]",
        r"\b\w+\s*=\s*[^\n]+",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static RE_DIAGRAM_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(figure|diagram|chart|graph|plot|table|workflow|architecture|pipeline|schema|illustration|photo|image)\b",
    )
    .unwrap()
});

/// Why a page was (or was not) sent to vision OCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    WeakNativeText,
    MathDetected,
    DiagramKeywordDetected,
    VisualStructureDetected,
    NativeTextOnly,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::WeakNativeText => "weak_native_text",
            TriggerReason::MathDetected => "math_detected",
            TriggerReason::DiagramKeywordDetected => "diagram_keyword_detected",
            TriggerReason::VisualStructureDetected => "visual_structure_detected",
            TriggerReason::NativeTextOnly => "native_text_only",
        }
    }
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The classifier's verdict for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDecision {
    pub use_vision: bool,
    pub reason: TriggerReason,
}

impl TriggerDecision {
    fn vision(reason: TriggerReason) -> Self {
        Self {
            use_vision: true,
            reason,
        }
    }
}

/// Decide whether a page needs vision OCR.
///
/// Deterministic: the same text, image, and threshold always give the same
/// decision. An image that cannot be decoded counts as having no visual
/// structure.
pub fn classify(native_text: &str, image_png: &[u8], min_native_chars: usize) -> TriggerDecision {
    let compact = compact_text(native_text);
    let native_len = compact.chars().count();

    if native_len < min_native_chars {
        return TriggerDecision::vision(TriggerReason::WeakNativeText);
    }
    if has_math_indicators(&compact) {
        return TriggerDecision::vision(TriggerReason::MathDetected);
    }
    if has_diagram_keywords(&compact) {
        return TriggerDecision::vision(TriggerReason::DiagramKeywordDetected);
    }
    if native_len < VISUAL_CHECK_MAX_CHARS && has_visual_structure(image_png) {
        return TriggerDecision::vision(TriggerReason::VisualStructureDetected);
    }

    TriggerDecision {
        use_vision: false,
        reason: TriggerReason::NativeTextOnly,
    }
}

/// Collapse every whitespace run to a single space and trim the ends.
pub fn compact_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True when the compact text is at least `min_chars` characters long.
pub fn is_native_text_usable(text: &str, min_chars: usize) -> bool {
    compact_text(text).chars().count() >= min_chars
}

pub fn has_math_indicators(text: &str) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    MATH_PATTERNS.iter().any(|re| re.is_match(text))
}

pub fn has_diagram_keywords(text: &str) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    RE_DIAGRAM_KEYWORDS.is_match(text)
}

/// Cheap pixel heuristic flagging likely non-trivial visuals.
pub fn has_visual_structure(image_png: &[u8]) -> bool {
    match image::load_from_memory(image_png) {
        Ok(img) => image_has_visual_structure(&img),
        Err(e) => {
            debug!("Visual-structure check skipped, image not decodable: {}", e);
            false
        }
    }
}

/// [`has_visual_structure`] on an already decoded image.
pub fn image_has_visual_structure(img: &DynamicImage) -> bool {
    let (width, height) = (img.width(), img.height());
    if (width as u64) * (height as u64) < MIN_VISUAL_AREA {
        return false;
    }

    let rgb = img.to_rgb8();
    let gray: Vec<u8> = rgb.pixels().map(|p| luma(p.0)).collect();

    let gray_hist = histogram(gray.iter().copied());
    if entropy(&gray_hist) < MIN_GRAY_ENTROPY {
        return false;
    }

    let edges = find_edges(&gray, width as usize, height as usize);
    let edge_mean = channel_stats(&histogram(edges.into_iter())).0;
    let gray_std = channel_stats(&gray_hist).1;

    let color_std_avg = (0..3)
        .map(|c| channel_stats(&histogram(rgb.pixels().map(|p| p.0[c]))).1)
        .sum::<f64>()
        / 3.0;

    debug!(
        "Visual stats: edge_mean={:.2} gray_std={:.2} color_std={:.2}",
        edge_mean, gray_std, color_std_avg
    );

    (edge_mean >= MIN_EDGE_MEAN && gray_std >= MIN_GRAY_STDDEV) || color_std_avg >= MIN_COLOR_STDDEV
}

// ── Pixel statistics ─────────────────────────────────────────────────────

/// ITU-R 601-2 luma with 16-bit fixed-point rounding.
fn luma([r, g, b]: [u8; 3]) -> u8 {
    ((r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16) as u8
}

fn histogram(values: impl Iterator<Item = u8>) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for v in values {
        hist[v as usize] += 1;
    }
    hist
}

/// Shannon entropy of a histogram, in bits.
fn entropy(hist: &[u64; 256]) -> f64 {
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    hist.iter()
        .filter(|&&n| n > 0)
        .map(|&n| {
            let p = n as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// Mean and population standard deviation of a histogram.
fn channel_stats(hist: &[u64; 256]) -> (f64, f64) {
    let (mut n, mut sum, mut sum2) = (0f64, 0f64, 0f64);
    for (value, &count) in hist.iter().enumerate() {
        let c = count as f64;
        let v = value as f64;
        n += c;
        sum += v * c;
        sum2 += v * v * c;
    }
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let mean = sum / n;
    let var = (sum2 - sum * sum / n) / n;
    (mean, var.max(0.0).sqrt())
}

/// 3×3 Laplacian-style edge filter; border pixels are copied unchanged.
fn find_edges(gray: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut out = gray.to_vec();
    if width < 3 || height < 3 {
        return out;
    }
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut acc = 0i32;
            for dy in 0..3 {
                for dx in 0..3 {
                    let v = gray[(y + dy - 1) * width + (x + dx - 1)] as i32;
                    acc += if dx == 1 && dy == 1 { 8 * v } else { -v };
                }
            }
            out[y * width + x] = acc.clamp(0, 255) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::encode_png;
    use image::{Rgb, RgbImage};

    fn flat_png(w: u32, h: u32) -> Vec<u8> {
        encode_png(&DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([255, 255, 255]))))
            .unwrap()
    }

    /// Five gray levels in 5 px blocks: high entropy, dense edges.
    fn structured_png() -> Vec<u8> {
        const LEVELS: [u8; 5] = [0, 64, 128, 192, 255];
        let img = RgbImage::from_fn(250, 250, |x, y| {
            let v = LEVELS[((x / 5 + 2 * (y / 5)) % 5) as usize];
            Rgb([v, v, v])
        });
        encode_png(&DynamicImage::ImageRgb8(img)).unwrap()
    }

    #[test]
    fn threshold_boundary() {
        let img = flat_png(300, 300);
        let at = classify("abcdefghij", &img, 10);
        assert_eq!(at.reason, TriggerReason::NativeTextOnly);
        assert!(!at.use_vision);

        let below = classify("abcdefghi", &img, 10);
        assert_eq!(below.reason, TriggerReason::WeakNativeText);
        assert!(below.use_vision);
    }

    #[test]
    fn compact_length_ignores_whitespace_runs() {
        let img = flat_png(10, 10);
        let d = classify("  abcde \n\n\t fghi  ", &img, 10);
        // "abcde fghi" is exactly ten characters
        assert_eq!(d.reason, TriggerReason::NativeTextOnly);
    }

    #[test]
    fn empty_text_is_weak() {
        let d = classify("", &flat_png(10, 10), 1);
        assert_eq!(d.reason, TriggerReason::WeakNativeText);
    }

    #[test]
    fn math_wins_over_later_rules() {
        let d = classify("y = mx + b", &structured_png(), 5);
        assert_eq!(d.reason, TriggerReason::MathDetected);
        assert!(d.use_vision);
    }

    #[test]
    fn math_indicators() {
        assert!(has_math_indicators("the value $x$ grows"));
        assert!(has_math_indicators("apply SQRT to each term"));
        assert!(has_math_indicators("x ≤ 3"));
        assert!(has_math_indicators("angle θ"));
        assert!(!has_math_indicators("Executive summary of the quarter"));
        assert!(!has_math_indicators("   "));
    }

    #[test]
    fn diagram_keyword_detected() {
        let d = classify(
            "Quarterly revenue CHART for the northern region",
            &flat_png(10, 10),
            10,
        );
        assert_eq!(d.reason, TriggerReason::DiagramKeywordDetected);
        assert!(!has_diagram_keywords("tablespoon of salt"));
    }

    #[test]
    fn visual_structure_on_short_page() {
        let d = classify("Team offsite recap", &structured_png(), 10);
        assert_eq!(d.reason, TriggerReason::VisualStructureDetected);
    }

    #[test]
    fn long_text_skips_image_check() {
        let long = "lorem ipsum ".repeat(50);
        let d = classify(&long, &structured_png(), 10);
        assert_eq!(d.reason, TriggerReason::NativeTextOnly);
    }

    #[test]
    fn small_or_flat_images_have_no_structure() {
        assert!(!has_visual_structure(&flat_png(300, 300)));
        assert!(!has_visual_structure(&flat_png(100, 100)));
        assert!(has_visual_structure(&structured_png()));
    }

    #[test]
    fn undecodable_image_has_no_structure() {
        assert!(!has_visual_structure(b"not an image"));
        let d = classify("Team offsite recap", b"not an image", 10);
        assert_eq!(d.reason, TriggerReason::NativeTextOnly);
    }

    #[test]
    fn classify_is_deterministic() {
        let img = structured_png();
        let a = classify("Team offsite recap", &img, 10);
        let b = classify("Team offsite recap", &img, 10);
        assert_eq!(a, b);
    }

    #[test]
    fn pixel_statistics() {
        let mut hist = [0u64; 256];
        hist[0] = 2;
        hist[255] = 2;
        assert!((entropy(&hist) - 1.0).abs() < 1e-9);
        let (mean, std) = channel_stats(&hist);
        assert!((mean - 127.5).abs() < 1e-9);
        assert!((std - 127.5).abs() < 1e-9);
        assert_eq!(luma([255, 255, 255]), 255);
        assert_eq!(luma([0, 0, 0]), 0);
    }

    #[test]
    fn edge_filter_copies_border() {
        let gray = vec![10u8; 9];
        let edges = find_edges(&gray, 3, 3);
        assert_eq!(edges[0], 10);
        assert_eq!(edges[4], 0);
    }

    #[test]
    fn reason_names() {
        assert_eq!(TriggerReason::WeakNativeText.to_string(), "weak_native_text");
        assert_eq!(
            serde_json::to_string(&TriggerReason::VisualStructureDetected).unwrap(),
            "\"visual_structure_detected\""
        );
    }
}
