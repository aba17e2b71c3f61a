//! Configuration types for invoice extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. One struct for every knob keeps the
//! HTTP server and the CLI on the same settings, and lets two runs be diffed
//! field by field.

use crate::error::InvoiceError;
use crate::pipeline::llm::ExtractionModel;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for one invoice extraction.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_invoice::{BackfillStrategy, ExtractionConfig};
///
/// let config = ExtractionConfig::builder()
///     .dpi(150)
///     .model("gemini-2.0-flash")
///     .backfill(BackfillStrategy::FirstMatch)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// Caps either edge independently of DPI so an oversized page cannot
    /// exhaust memory or exceed the provider's upload limit.
    pub max_rendered_pixels: u32,

    /// LLM model identifier, e.g. "gpt-4.1-nano", "gemini-2.0-flash".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "gemini", "ollama").
    /// If None along with `provider`, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed extraction model. Takes precedence over every
    /// provider setting; used by tests and by callers with their own client.
    pub extraction_model: Option<Arc<dyn ExtractionModel>>,

    /// Sampling temperature for the LLM completion. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per page. Default: 4096.
    ///
    /// A dense invoice page with thirty line items and nineteen keys each
    /// needs roughly 3 000 output tokens.
    pub max_tokens: usize,

    /// Retry attempts on a failed model call. Default: 0 (single attempt).
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout for the model in seconds. Default: None (wait forever).
    pub api_timeout_secs: Option<u64>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom system prompt. If None, uses [`crate::prompts::INVOICE_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    /// Custom per-page instruction. If None, uses [`crate::prompts::EXTRACTION_INSTRUCTION`].
    pub instruction: Option<String>,

    /// How scanned HSN/GST pairs fill gaps in model output. Default: [`BackfillStrategy::FirstMatch`].
    pub backfill: BackfillStrategy,

    /// What a failed model call does to the request. Default: [`UpstreamPolicy::Abort`].
    pub on_model_error: UpstreamPolicy,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            model: None,
            provider_name: None,
            provider: None,
            extraction_model: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 0,
            retry_backoff_ms: 500,
            api_timeout_secs: None,
            password: None,
            system_prompt: None,
            instruction: None,
            backfill: BackfillStrategy::default(),
            on_model_error: UpstreamPolicy::default(),
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field(
                "extraction_model",
                &self.extraction_model.as_ref().map(|_| "<dyn ExtractionModel>"),
            )
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("backfill", &self.backfill)
            .field("on_model_error", &self.on_model_error)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
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

    pub fn extraction_model(mut self, model: Arc<dyn ExtractionModel>) -> Self {
        self.config.extraction_model = Some(model);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = Some(secs);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config.instruction = Some(instruction.into());
        self
    }

    pub fn backfill(mut self, strategy: BackfillStrategy) -> Self {
        self.config.backfill = strategy;
        self
    }

    pub fn on_model_error(mut self, policy: UpstreamPolicy) -> Self {
        self.config.on_model_error = policy;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, InvoiceError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(InvoiceError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.max_tokens == 0 {
            return Err(InvoiceError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == Some(0) {
            return Err(InvoiceError::InvalidConfig(
                "api_timeout_secs must be ≥ 1 when set".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How scanned HSN/GST pairs are applied to line items that lack them.
///
/// The scanner output is a flat, document-ordered list with no link to any
/// particular line item, so both strategies are heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackfillStrategy {
    /// Every item missing HSN takes the first scanned code; every item
    /// missing GST takes the first non-zero scanned rate. The list is never
    /// consumed, so one entry can fill the whole document. (default)
    #[default]
    FirstMatch,
    /// The n-th line item of the document (page order, then item order)
    /// takes the n-th scanned entry; items past the end of the list are left
    /// as the model returned them.
    Positional,
}

/// What happens to the request when the extraction model call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpstreamPolicy {
    /// Fail the whole request with [`InvoiceError::Upstream`]. (default)
    #[default]
    Abort,
    /// Emit a placeholder line item for the page and continue.
    Placeholder,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_reproduce_single_attempt_first_match() {
        let c = ExtractionConfig::default();
        assert_eq!(c.max_retries, 0);
        assert_eq!(c.api_timeout_secs, None);
        assert_eq!(c.backfill, BackfillStrategy::FirstMatch);
        assert_eq!(c.on_model_error, UpstreamPolicy::Abort);
    }

    #[test]
    fn builder_clamps_dpi() {
        let c = ExtractionConfig::builder().dpi(1000).build().unwrap();
        assert_eq!(c.dpi, 400);
        let c = ExtractionConfig::builder().dpi(10).build().unwrap();
        assert_eq!(c.dpi, 72);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = ExtractionConfig::builder()
            .api_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, InvoiceError::InvalidConfig(_)));
    }

    #[test]
    fn strategies_use_kebab_case() {
        let json = serde_json::to_string(&BackfillStrategy::FirstMatch).unwrap();
        assert_eq!(json, "\"first-match\"");
        let policy: UpstreamPolicy = serde_json::from_str("\"placeholder\"").unwrap();
        assert_eq!(policy, UpstreamPolicy::Placeholder);
    }
}
