//! Extraction model: send one page image, get free-form text back.
//!
//! [`ExtractionModel`] is the crate-local seam over whatever multimodal model
//! reads the invoice. [`LlmExtractionModel`] implements it over any
//! `edgequake-llm` provider; tests plug in canned replies.
//!
//! ## Retry Strategy
//!
//! Off by default (`max_retries = 0`, no timeout). When enabled, failed or
//! timed-out calls are retried with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`): with 500 ms base and 3 retries the
//! waits are 500 ms → 1 s → 2 s.

use crate::config::ExtractionConfig;
use crate::pipeline::encode::PageImage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Everything the model sees for one page, in request order.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system_prompt: &'a str,
    pub image: &'a PageImage,
    pub instruction: &'a str,
}

/// Raw model answer plus token accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelReply {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// A failed model call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ModelError(pub String);

/// A multimodal model that reads one invoice page.
#[async_trait]
pub trait ExtractionModel: Send + Sync {
    async fn extract(&self, request: ModelRequest<'_>) -> Result<ModelReply, ModelError>;
}

/// [`ExtractionModel`] backed by an `edgequake-llm` provider.
///
/// The request is a system message with the prompt, then a user message
/// holding the page PNG and the instruction text.
pub struct LlmExtractionModel {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl LlmExtractionModel {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
        }
    }
}

#[async_trait]
impl ExtractionModel for LlmExtractionModel {
    async fn extract(&self, request: ModelRequest<'_>) -> Result<ModelReply, ModelError> {
        let image = ImageData::new(request.image.data.clone(), request.image.mime_type)
            .with_detail("high");
        let messages = vec![
            ChatMessage::system(request.system_prompt),
            ChatMessage::user_with_images(request.instruction, vec![image]),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| ModelError(e.to_string()))?;

        Ok(ModelReply {
            content: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

/// Retry and timeout knobs for [`call_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout: Option<Duration>,
}

impl From<&ExtractionConfig> for RetryPolicy {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
            timeout: config.api_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Result of a model call after retries.
#[derive(Debug)]
pub struct ModelOutcome {
    pub result: Result<ModelReply, ModelError>,
    /// Retries spent (0 when the first attempt settled it).
    pub retries: u32,
    pub duration_ms: u64,
}

/// Call the model for one page, retrying per `policy`.
pub async fn call_with_retry(
    model: &dyn ExtractionModel,
    request: ModelRequest<'_>,
    policy: RetryPolicy,
) -> ModelOutcome {
    let start = Instant::now();
    let page_num = request.image.page_number;
    let mut last_err = ModelError("no attempt made".to_string());

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.backoff_ms.saturating_mul(2u64.saturating_pow(attempt - 1));
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_num, attempt, policy.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let result = match policy.timeout {
            Some(limit) => match timeout(limit, model.extract(request)).await {
                Ok(result) => result,
                Err(_) => Err(ModelError(format!(
                    "model call timed out after {}s",
                    limit.as_secs()
                ))),
            },
            None => model.extract(request).await,
        };

        match result {
            Ok(reply) => {
                debug!(
                    "Page {}: {} input tokens, {} output tokens, {:?}",
                    page_num,
                    reply.input_tokens,
                    reply.output_tokens,
                    start.elapsed()
                );
                return ModelOutcome {
                    result: Ok(reply),
                    retries: attempt,
                    duration_ms: start.elapsed().as_millis() as u64,
                };
            }
            Err(e) => {
                warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, e);
                last_err = e;
            }
        }
    }

    ModelOutcome {
        result: Err(last_err),
        retries: policy.max_retries,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}
