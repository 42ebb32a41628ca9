//! Model interaction: build vision/text messages and call the provider.
//!
//! [`LlmVision`] implements both [`VisionOcr`] and [`AggregateService`] over
//! a single `edgequake_llm` provider, so one local model server (Ollama,
//! LM Studio) or one hosted API serves the whole run. All wording lives in
//! [`crate::prompts`].
//!
//! There is no retry loop here. A failed page is retried once by the
//! dispatcher, after every other page has had its first attempt.

use crate::config::PipelineConfig;
use crate::error::{AggregateError, OcrError, OcrMdError};
use crate::pipeline::aggregate::AggregateService;
use crate::pipeline::encode::to_image_data;
use crate::pipeline::ocr::{parse_ocr_payload, OcrRequest, OcrResponse, VisionOcr};
use crate::prompts::{aggregate_user_prompt, ocr_user_prompt, AGGREGATE_SYSTEM_PROMPT, OCR_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::debug;

/// Vision OCR and aggregate cleanup backed by an `edgequake_llm` provider.
pub struct LlmVision {
    provider: Arc<dyn LLMProvider>,
    ocr_options: CompletionOptions,
    aggregate_options: CompletionOptions,
    timeout_secs: u64,
}

impl LlmVision {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            ocr_options: build_options(config.temperature, config.max_tokens),
            aggregate_options: build_options(config.aggregate_temperature, config.max_tokens),
            timeout_secs: config.api_timeout_secs,
        }
    }

    /// Resolve the provider from `config` and wrap it.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, OcrMdError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }
}

#[async_trait]
impl VisionOcr for LlmVision {
    async fn analyze_page(&self, request: OcrRequest<'_>) -> Result<OcrResponse, OcrError> {
        let page = request.page_number;
        let start = Instant::now();

        let prompt = ocr_user_prompt(page, request.total_pages, request.native_context);
        let messages = vec![
            ChatMessage::system(OCR_SYSTEM_PROMPT),
            ChatMessage::user_with_images(&prompt, vec![to_image_data(request.image_png)]),
        ];

        let call = self.provider.chat(&messages, Some(&self.ocr_options));
        let response = match timeout(Duration::from_secs(self.timeout_secs), call).await {
            Err(_) => {
                return Err(OcrError::Timeout {
                    page,
                    secs: self.timeout_secs,
                })
            }
            Ok(Err(e)) => {
                return Err(OcrError::Request {
                    page,
                    detail: e.to_string(),
                })
            }
            Ok(Ok(response)) => response,
        };

        debug!(
            "Page {}: {} input tokens, {} output tokens, {:?}",
            page,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        if response.content.trim().is_empty() {
            return Err(OcrError::EmptyResponse { page });
        }
        parse_ocr_payload(page, &response.content)
    }
}

#[async_trait]
impl AggregateService for LlmVision {
    async fn rewrite(&self, joined: &str) -> Result<String, AggregateError> {
        let prompt = aggregate_user_prompt(joined);
        let messages = vec![
            ChatMessage::system(AGGREGATE_SYSTEM_PROMPT),
            ChatMessage::user(&prompt),
        ];

        let call = self.provider.chat(&messages, Some(&self.aggregate_options));
        match timeout(Duration::from_secs(self.timeout_secs), call).await {
            Err(_) => Err(AggregateError::Timeout(self.timeout_secs)),
            Ok(Err(e)) => Err(AggregateError::Request(e.to_string())),
            Ok(Ok(response)) => Ok(response.content.trim().to_string()),
        }
    }
}

/// Build `CompletionOptions` for one kind of call.
fn build_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

/// Model used when a provider is named without a model.
fn default_model(provider_name: &str) -> &'static str {
    match provider_name {
        "ollama" => "llama3.2-vision",
        "anthropic" => "claude-sonnet-4-20250514",
        "gemini" => "gemini-2.0-flash",
        _ => "gpt-4.1-mini",
    }
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`), created through
///    [`ProviderFactory::create_llm_provider`], which reads the provider's
///    own environment (API key, host).
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, OcrMdError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config
            .model
            .as_deref()
            .unwrap_or_else(|| default_model(name));
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| OcrMdError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Start a local server and pass --provider ollama, or set an API key.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, OcrMdError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        OcrMdError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ocr_and_aggregate_options_differ_in_temperature() {
        let config = PipelineConfig::default();
        let ocr = build_options(config.temperature, config.max_tokens);
        let agg = build_options(config.aggregate_temperature, config.max_tokens);
        assert_eq!(ocr.temperature, Some(0.0));
        assert_eq!(agg.temperature, Some(0.1));
        assert_eq!(ocr.max_tokens, Some(4096));
    }

    #[test]
    fn named_provider_defaults() {
        assert_eq!(default_model("ollama"), "llama3.2-vision");
        assert_eq!(default_model("openai"), "gpt-4.1-mini");
    }
}
