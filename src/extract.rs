//! Top-level extraction API.
//!
//! [`InvoiceExtractor`] owns the two collaborators (a [`DocumentReader`] and
//! an [`ExtractionModel`]) plus the [`ExtractionConfig`], and drives one
//! document at a time:
//!
//! 1. Read every page once: text layer and raster.
//! 2. Scan the text for tax codes (one list per document).
//! 3. For each page in order: encode, call the model, parse, normalize.
//! 4. Collect line items, per-page reports and statistics.
//!
//! It is cheap to clone and holds no per-document state, so the HTTP server
//! shares one instance across requests.

use crate::config::{ExtractionConfig, UpstreamPolicy};
use crate::error::{InvoiceError, PageIssue};
use crate::output::{
    ExtractionOutput, ExtractionStats, InvoiceLineItem, PageExtraction, PageReport,
};
use crate::pipeline::encode;
use crate::pipeline::input;
use crate::pipeline::llm::{
    call_with_retry, ExtractionModel, LlmExtractionModel, ModelRequest, RetryPolicy,
};
use crate::pipeline::normalize::Normalizer;
use crate::pipeline::reader::{self, DocumentReader, PageContent, PdfiumReader, RenderSettings};
use crate::pipeline::response::{parse_reply, ParsedReply};
use crate::pipeline::taxcodes::{self, TaxCodeEntry};
use crate::prompts::{EXTRACTION_INSTRUCTION, INVOICE_SYSTEM_PROMPT};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Extracts invoice line items from PDF documents.
#[derive(Clone)]
pub struct InvoiceExtractor {
    reader: Arc<dyn DocumentReader>,
    model: Arc<dyn ExtractionModel>,
    config: ExtractionConfig,
}

/// A document read and scanned, ready for per-page model calls.
pub(crate) struct PreparedDocument {
    pub(crate) pages: Vec<PageContent>,
    pub(crate) normalizer: Normalizer,
    pub(crate) tax_codes_found: usize,
    pub(crate) render_duration_ms: u64,
}

impl InvoiceExtractor {
    /// Build an extractor from configuration alone.
    ///
    /// Uses [`ExtractionConfig::extraction_model`] when set, otherwise
    /// resolves an LLM provider (see [`resolve_provider`]). Pages are read
    /// with [`PdfiumReader::from_env`].
    pub fn from_config(config: ExtractionConfig) -> Result<Self, InvoiceError> {
        let model: Arc<dyn ExtractionModel> = match &config.extraction_model {
            Some(model) => Arc::clone(model),
            None => {
                let provider = resolve_provider(&config)?;
                Arc::new(LlmExtractionModel::new(provider, &config))
            }
        };
        Ok(Self::with_parts(Arc::new(PdfiumReader::from_env()), model, config))
    }

    /// Build an extractor from explicit collaborators.
    pub fn with_parts(
        reader: Arc<dyn DocumentReader>,
        model: Arc<dyn ExtractionModel>,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            reader,
            model,
            config,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract every line item from an in-memory PDF.
    ///
    /// `filename` must end in `.pdf`; it is also the default `title` of each
    /// item.
    pub async fn extract(&self, pdf: &[u8], filename: &str) -> Result<ExtractionOutput, InvoiceError> {
        let start = Instant::now();
        info!("Starting extraction: {} ({} bytes)", filename, pdf.len());

        let PreparedDocument {
            pages,
            mut normalizer,
            tax_codes_found,
            render_duration_ms,
        } = self.prepare(pdf, filename).await?;
        let total_pages = pages.len();

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_start(total_pages);
        }

        // ── Per-page model calls, strictly in page order ─────────────────────
        let mut items: Vec<InvoiceLineItem> = Vec::new();
        let mut reports: Vec<PageReport> = Vec::with_capacity(total_pages);
        for page in &pages {
            let PageExtraction {
                report,
                items: page_items,
            } = self.process_page(page, total_pages, &mut normalizer).await?;
            items.extend(page_items);
            reports.push(report);
        }

        let stats = build_stats(
            &reports,
            items.len(),
            tax_codes_found,
            render_duration_ms,
            start.elapsed().as_millis() as u64,
        );

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_complete(total_pages, items.len());
        }

        info!(
            "Extraction complete: {} items from {} pages ({} degraded), {}ms",
            stats.total_items, stats.total_pages, stats.degraded_pages, stats.total_duration_ms
        );

        Ok(ExtractionOutput {
            items,
            pages: reports,
            stats,
        })
    }

    /// Resolve a local path or URL, then [`extract`](Self::extract).
    pub async fn extract_file(&self, input: impl AsRef<str>) -> Result<ExtractionOutput, InvoiceError> {
        let resolved = input::resolve_input(input.as_ref(), self.config.download_timeout_secs).await?;
        self.extract(&resolved.bytes, &resolved.filename).await
    }

    /// Extract and write the line items as pretty JSON.
    ///
    /// Uses atomic write (temp file + rename) to prevent partial files.
    pub async fn extract_to_file(
        &self,
        input: impl AsRef<str>,
        output_path: impl AsRef<Path>,
    ) -> Result<ExtractionOutput, InvoiceError> {
        let output = self.extract_file(input).await?;
        write_items_json(output_path.as_ref(), &output.items).await?;
        Ok(output)
    }

    /// Tax-code scan only, using this extractor's reader. No model call.
    pub async fn scan_tax_codes(&self, pdf: &[u8]) -> Result<Vec<TaxCodeEntry>, InvoiceError> {
        let texts = reader::read_texts(
            Arc::clone(&self.reader),
            pdf.to_vec(),
            self.config.password.clone(),
        )
        .await?;
        Ok(taxcodes::scan_pages(&texts))
    }

    /// Read and scan the document; shared by the eager and streaming APIs.
    pub(crate) async fn prepare(&self, pdf: &[u8], filename: &str) -> Result<PreparedDocument, InvoiceError> {
        input::validate_pdf_name(filename)?;

        // ── Step 1: read pages (text + raster) ──────────────────────────────
        let render_start = Instant::now();
        let pages = reader::read_document(
            Arc::clone(&self.reader),
            pdf.to_vec(),
            RenderSettings::from(&self.config),
        )
        .await?;
        let render_duration_ms = render_start.elapsed().as_millis() as u64;

        // ── Step 2: scan the text layer for tax codes ────────────────────────
        let tax_codes = taxcodes::scan_pages(
            &pages.iter().map(|p| p.text.as_str()).collect::<Vec<_>>(),
        );
        info!(
            "{}: {} pages, {} tax-code entries",
            filename,
            pages.len(),
            tax_codes.len()
        );

        Ok(PreparedDocument {
            tax_codes_found: tax_codes.len(),
            normalizer: Normalizer::new(filename, tax_codes, self.config.backfill),
            pages,
            render_duration_ms,
        })
    }

    /// Model call → parse → normalize for one page.
    ///
    /// Only a model failure under [`UpstreamPolicy::Abort`] returns `Err`.
    pub(crate) async fn process_page(
        &self,
        page: &PageContent,
        total_pages: usize,
        normalizer: &mut Normalizer,
    ) -> Result<PageExtraction, InvoiceError> {
        let page_num = page.page_number;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_page_start(page_num, total_pages);
        }

        let image = encode::encode_page(page_num, &page.image)?;
        let request = ModelRequest {
            system_prompt: self
                .config
                .system_prompt
                .as_deref()
                .unwrap_or(INVOICE_SYSTEM_PROMPT),
            image: &image,
            instruction: self
                .config
                .instruction
                .as_deref()
                .unwrap_or(EXTRACTION_INSTRUCTION),
        };

        let outcome = call_with_retry(
            self.model.as_ref(),
            request,
            RetryPolicy::from(&self.config),
        )
        .await;

        let mut report = PageReport {
            page_num,
            item_count: 0,
            issue: None,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: outcome.duration_ms,
            retries: outcome.retries,
        };

        let items = match outcome.result {
            Ok(reply) => {
                report.input_tokens = reply.input_tokens;
                report.output_tokens = reply.output_tokens;
                let parsed = parse_reply(&reply.content);
                if let ParsedReply::Failure { detail } = &parsed {
                    report.issue = Some(PageIssue::ParseFailure {
                        page: page_num,
                        detail: detail.clone(),
                    });
                }
                normalizer.normalize_page(page_num, &parsed)
            }
            Err(e) => match self.config.on_model_error {
                UpstreamPolicy::Abort => {
                    let error = InvoiceError::Upstream {
                        page: page_num,
                        detail: e.to_string(),
                    };
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_extraction_aborted(page_num, &error.to_string());
                    }
                    return Err(error);
                }
                UpstreamPolicy::Placeholder => {
                    report.issue = Some(PageIssue::ModelFailed {
                        page: page_num,
                        retries: outcome.retries,
                        detail: e.to_string(),
                    });
                    vec![normalizer.placeholder(page_num)]
                }
            },
        };
        report.item_count = items.len();

        match &report.issue {
            Some(issue) => {
                warn!(page = issue.page(), "{}; using placeholder", issue);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_page_degraded(issue.page(), total_pages, &issue.to_string());
                }
            }
            None => {
                debug!("Page {}: {} line items", page_num, items.len());
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_page_complete(page_num, total_pages, items.len());
                }
            }
        }

        Ok(PageExtraction { report, items })
    }
}

/// Scan a PDF for tax codes with the default pdfium reader.
///
/// Does not require an LLM provider or API key.
pub async fn scan_tax_codes(pdf: &[u8], password: Option<&str>) -> Result<Vec<TaxCodeEntry>, InvoiceError> {
    let texts = reader::read_texts(
        Arc::new(PdfiumReader::from_env()),
        pdf.to_vec(),
        password.map(str::to_string),
    )
    .await?;
    Ok(taxcodes::scan_pages(&texts))
}

/// Write line items as a pretty-printed JSON array, atomically.
pub async fn write_items_json(path: &Path, items: &[InvoiceLineItem]) -> Result<(), InvoiceError> {
    let write_err = |source: std::io::Error| InvoiceError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_string_pretty(items)
        .map_err(|e| InvoiceError::Internal(format!("JSON serialisation failed: {}", e)))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

pub(crate) fn build_stats(
    reports: &[PageReport],
    total_items: usize,
    tax_codes_found: usize,
    render_duration_ms: u64,
    total_duration_ms: u64,
) -> ExtractionStats {
    ExtractionStats {
        total_pages: reports.len(),
        total_items,
        degraded_pages: reports.iter().filter(|r| r.is_degraded()).count(),
        tax_codes_found,
        total_input_tokens: reports.iter().map(|r| r.input_tokens as u64).sum(),
        total_output_tokens: reports.iter().map(|r| r.output_tokens as u64).sum(),
        render_duration_ms,
        model_duration_ms: reports.iter().map(|r| r.duration_ms).sum(),
        total_duration_ms,
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_vision_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, InvoiceError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        InvoiceError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.model` or
///    [`DEFAULT_MODEL`]; the factory reads the matching API key.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, both
///    non-empty.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** via [`ProviderFactory::from_env`].
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, InvoiceError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
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

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| InvoiceError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
