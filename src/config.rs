//! Configuration types for the OCR-to-Markdown pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The library never reads process-level
//! settings on its own; the CLI (or any embedding application) maps its own
//! flags and environment onto the builder.

use crate::error::OcrMdError;
use crate::progress::ProgressSink;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for processing one or more documents.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf_ocr_md::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .dpi(180)
///     .workers(4)
///     .native_fast_path(true)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Rendering DPI for page images sent to the vision model. Range: 72–400. Default: 180.
    ///
    /// Converted to an integer pdfium scale factor (`max(1, round(dpi / 72))`,
    /// halves to even), so 180 DPI renders at 2× the page's point size.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 4000.
    ///
    /// Caps huge pages (posters, A0 drawings) independent of the scale factor.
    pub max_rendered_pixels: u32,

    /// Upper bound on concurrent vision-OCR calls per document. Default: 2.
    ///
    /// A cap, not a promise: a document with fewer queued pages never opens
    /// more calls than it has pages. `1` processes pages strictly in order.
    pub workers: usize,

    /// Minimum compact native-text length considered usable. Default: 80.
    ///
    /// Below this the classifier reports `weak_native_text`, and the native
    /// text is not sent to the OCR model as context.
    pub min_native_chars: usize,

    /// Consult the trigger classifier and skip OCR on pages whose native text
    /// suffices. Default: false (every page goes through vision OCR).
    pub native_fast_path: bool,

    /// Skip the aggregate-cleanup call and use the deterministic aggregate. Default: false.
    pub skip_aggregate_cleanup: bool,

    /// LLM model identifier, e.g. "llama3.2-vision", "gpt-4.1-mini".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "ollama", "lmstudio", "openai").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for OCR calls. Default: 0.0.
    pub temperature: f32,

    /// Sampling temperature for the aggregate-cleanup call. Default: 0.1.
    pub aggregate_temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 4096.
    pub max_tokens: usize,

    /// Per-call timeout for OCR and aggregate calls, in seconds. Default: 240.
    ///
    /// Local vision models on CPU can take minutes per page; the default is
    /// generous on purpose.
    pub api_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Directory for generated Markdown. None writes next to the source.
    pub output_dir: Option<PathBuf>,

    /// Directory successful sources are moved into. None leaves them in place.
    pub processed_dir: Option<PathBuf>,

    /// Extract pages and report counts without calling any model or writing files.
    pub dry_run: bool,

    /// Optional progress sink.
    pub progress: Option<ProgressSink>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 180,
            max_rendered_pixels: 4000,
            workers: 2,
            min_native_chars: 80,
            native_fast_path: false,
            skip_aggregate_cleanup: false,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            aggregate_temperature: 0.1,
            max_tokens: 4096,
            api_timeout_secs: 240,
            password: None,
            download_timeout_secs: 120,
            output_dir: None,
            processed_dir: None,
            dry_run: false,
            progress: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("workers", &self.workers)
            .field("min_native_chars", &self.min_native_chars)
            .field("native_fast_path", &self.native_fast_path)
            .field("skip_aggregate_cleanup", &self.skip_aggregate_cleanup)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("output_dir", &self.output_dir)
            .field("processed_dir", &self.processed_dir)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl fmt::Debug for PipelineConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn min_native_chars(mut self, n: usize) -> Self {
        self.config.min_native_chars = n;
        self
    }

    pub fn native_fast_path(mut self, v: bool) -> Self {
        self.config.native_fast_path = v;
        self
    }

    pub fn skip_aggregate_cleanup(mut self, v: bool) -> Self {
        self.config.skip_aggregate_cleanup = v;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn aggregate_temperature(mut self, t: f32) -> Self {
        self.config.aggregate_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    pub fn processed_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.processed_dir = Some(dir.into());
        self
    }

    pub fn dry_run(mut self, v: bool) -> Self {
        self.config.dry_run = v;
        self
    }

    pub fn progress(mut self, sink: ProgressSink) -> Self {
        self.config.progress = Some(sink);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, OcrMdError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(OcrMdError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.workers == 0 {
            return Err(OcrMdError::InvalidConfig("Workers must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(OcrMdError::InvalidConfig(
                "API timeout must be at least 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cli_defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.dpi, 180);
        assert_eq!(c.workers, 2);
        assert_eq!(c.min_native_chars, 80);
        assert!(!c.native_fast_path);
        assert!(!c.skip_aggregate_cleanup);
        assert_eq!(c.api_timeout_secs, 240);
    }

    #[test]
    fn builder_clamps_values() {
        let c = PipelineConfig::builder()
            .dpi(1000)
            .workers(0)
            .temperature(5.0)
            .build()
            .expect("clamped values are valid");
        assert_eq!(c.dpi, 400);
        assert_eq!(c.workers, 1);
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = PipelineConfig::builder()
            .api_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, OcrMdError::InvalidConfig(_)));
    }

    #[test]
    fn debug_hides_provider() {
        let c = PipelineConfig::default();
        let dbg = format!("{c:?}");
        assert!(dbg.contains("PipelineConfig"));
        assert!(dbg.contains("provider: None"));
    }
}
