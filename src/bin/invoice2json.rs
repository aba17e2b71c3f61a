//! CLI binary for edgequake-invoice.
//!
//! A thin shim over the library crate: maps CLI flags to `ExtractionConfig`,
//! runs one of the `extract`, `scan` or `serve` subcommands and renders the
//! result.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_invoice::{
    input, scan_tax_codes, server, BackfillStrategy, ExtractionConfig, ExtractionOutput,
    ExtractionProgressCallback, InvoiceExtractor, InvoiceLineItem, ProgressCallback,
    UpstreamPolicy,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Items shown per page before collapsing the rest into a count.
const PREVIEW_ITEMS_PER_PAGE: usize = 3;

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    degraded: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_extraction_start` reports the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            degraded: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .map(|mut times| times.remove(&page_num))
            .ok()
            .flatten()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting line items from {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, item_count: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<10}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{item_count:>3} items")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_degraded(&self, page_num: usize, total: usize, reason: &str) {
        let secs = self.elapsed_secs(page_num);
        self.degraded.fetch_add(1, Ordering::SeqCst);

        let msg: String = if reason.chars().count() > 80 {
            format!("{}\u{2026}", reason.chars().take(79).collect::<String>())
        } else {
            reason.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_extraction_aborted(&self, page_num: usize, _reason: &str) {
        self.bar.finish_and_clear();
        eprintln!("{} Aborted on page {}", red("✗"), page_num);
    }

    fn on_extraction_complete(&self, total_pages: usize, total_items: usize) {
        self.bar.finish_and_clear();
        let degraded = self.degraded.load(Ordering::SeqCst);
        if degraded == 0 {
            eprintln!(
                "{} {} items from {} pages",
                green("✔"),
                bold(&total_items.to_string()),
                total_pages
            );
        } else {
            eprintln!(
                "{} {} items from {} pages  ({} degraded)",
                cyan("⚠"),
                bold(&total_items.to_string()),
                total_pages,
                red(&degraded.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract line items to extracted_invoices.json
  invoice2json extract invoice.pdf

  # Choose the output file, or print JSON to stdout
  invoice2json extract invoice.pdf -o march.json
  invoice2json extract invoice.pdf --stdout > march.json

  # Extract from a URL with a specific model
  invoice2json --provider gemini --model gemini-2.0-flash extract https://example.com/inv.pdf

  # Tax codes found in the text layer (no API key needed)
  invoice2json scan invoice.pdf

  # Run the HTTP API
  invoice2json serve --listen 0.0.0.0:8000
  curl -F file=@invoice.pdf http://localhost:8000/extract-invoice

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_PROVIDER      Default for --provider
  EDGEQUAKE_LLM_PROVIDER  Provider paired with EDGEQUAKE_MODEL when --provider is unset
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  RUST_LOG                Log filter, overrides -v / -q
"#;

/// Extract invoice line items from PDF files using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "invoice2json",
    version,
    about = "Extract invoice line items from PDFs using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    opts: ExtractOpts,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "INVOICE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "INVOICE_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract line items from a local PDF or URL.
    Extract {
        /// Local PDF file path or HTTP/HTTPS URL.
        input: String,

        /// Write JSON line items to this file.
        #[arg(short, long, env = "INVOICE_OUTPUT", default_value = "extracted_invoices.json")]
        output: PathBuf,

        /// Print JSON line items to stdout instead of writing a file.
        #[arg(long)]
        stdout: bool,

        /// Disable progress bar.
        #[arg(long, env = "INVOICE_NO_PROGRESS")]
        no_progress: bool,
    },
    /// Print the tax-code entries found in the PDF text layer as JSON.
    Scan {
        /// Local PDF file path or HTTP/HTTPS URL.
        input: String,
    },
    /// Serve the HTTP API.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "INVOICE_LISTEN", default_value = "127.0.0.1:8000")]
        listen: String,

        /// Maximum upload size in bytes.
        #[arg(long, env = "INVOICE_BODY_LIMIT", default_value_t = server::DEFAULT_BODY_LIMIT)]
        body_limit: usize,
    },
}

/// Flags shared by every subcommand.
#[derive(Args, Debug)]
struct ExtractOpts {
    /// LLM model ID (e.g. gpt-4.1-nano, gemini-2.0-flash).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, global = true, env = "INVOICE_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Max LLM output tokens per page.
    #[arg(long, global = true, env = "INVOICE_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, global = true, env = "INVOICE_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per page on model failure.
    #[arg(long, global = true, env = "INVOICE_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Per-page model call timeout in seconds (none by default).
    #[arg(long, global = true, env = "INVOICE_API_TIMEOUT")]
    api_timeout: Option<u64>,

    /// How missing HSN/GST values are filled from scanned tax codes.
    #[arg(long, global = true, env = "INVOICE_BACKFILL", value_enum, default_value = "first-match")]
    backfill: BackfillArg,

    /// What to do when the model call fails for a page.
    #[arg(long, global = true, env = "INVOICE_ON_MODEL_ERROR", value_enum, default_value = "abort")]
    on_model_error: ModelErrorArg,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, global = true, env = "INVOICE_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    #[arg(long, global = true, env = "INVOICE_PASSWORD")]
    password: Option<String>,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "INVOICE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BackfillArg {
    FirstMatch,
    Positional,
}

impl From<BackfillArg> for BackfillStrategy {
    fn from(v: BackfillArg) -> Self {
        match v {
            BackfillArg::FirstMatch => BackfillStrategy::FirstMatch,
            BackfillArg::Positional => BackfillStrategy::Positional,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModelErrorArg {
    Abort,
    Placeholder,
}

impl From<ModelErrorArg> for UpstreamPolicy {
    fn from(v: ModelErrorArg) -> Self {
        match v {
            ModelErrorArg::Abort => UpstreamPolicy::Abort,
            ModelErrorArg::Placeholder => UpstreamPolicy::Placeholder,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during `extract`; `serve` keeps them.
    let show_progress = match &cli.command {
        Command::Extract {
            no_progress,
            stdout,
            ..
        } => !cli.quiet && !no_progress && !stdout,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Extract {
            input,
            output,
            stdout,
            ..
        } => {
            let progress_cb: Option<ProgressCallback> = if show_progress {
                let cb = CliProgressCallback::new_dynamic();
                Some(cb as Arc<dyn ExtractionProgressCallback>)
            } else {
                None
            };
            let config = build_config(&cli.opts, progress_cb).await?;
            run_extract(config, input, output, *stdout, cli.quiet).await
        }
        Command::Scan { input } => run_scan(&cli.opts, input).await,
        Command::Serve { listen, body_limit } => {
            let config = build_config(&cli.opts, None).await?;
            let extractor =
                InvoiceExtractor::from_config(config).context("Failed to configure extractor")?;
            server::serve(listen, Arc::new(extractor), *body_limit)
                .await
                .context("HTTP server failed")
        }
    }
}

async fn run_extract(
    config: ExtractionConfig,
    input: &str,
    output_path: &Path,
    to_stdout: bool,
    quiet: bool,
) -> Result<()> {
    let extractor = InvoiceExtractor::from_config(config).context("Failed to configure extractor")?;

    if to_stdout {
        let output = extractor
            .extract_file(input)
            .await
            .context("Extraction failed")?;
        let json =
            serde_json::to_string_pretty(&output.items).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    let output = extractor
        .extract_to_file(input, output_path)
        .await
        .context("Extraction failed")?;

    if !quiet {
        print_summary(&output);
        eprintln!(
            "{}  {}  →  {}",
            green("✔"),
            output.summary_message(),
            bold(&output_path.display().to_string()),
        );
        eprintln!(
            "   {} tokens in  /  {} tokens out  —  {}ms total",
            dim(&output.stats.total_input_tokens.to_string()),
            dim(&output.stats.total_output_tokens.to_string()),
            output.stats.total_duration_ms,
        );
    }
    Ok(())
}

async fn run_scan(opts: &ExtractOpts, input_str: &str) -> Result<()> {
    let resolved = input::resolve_input(input_str, opts.download_timeout)
        .await
        .context("Failed to read input")?;
    let entries = scan_tax_codes(&resolved.bytes, opts.password.as_deref())
        .await
        .context("Tax-code scan failed")?;
    println!(
        "{}",
        serde_json::to_string_pretty(&entries).context("Failed to serialise tax codes")?
    );
    Ok(())
}

/// Per-page preview: the first few items, then a count of the rest.
fn print_summary(output: &ExtractionOutput) {
    for (page, items) in output.items_by_page() {
        eprintln!("{}", bold(&format!("Page {page}: {} items", items.len())));
        for item in items.iter().take(PREVIEW_ITEMS_PER_PAGE) {
            eprintln!("  {}", describe_item(item));
        }
        if items.len() > PREVIEW_ITEMS_PER_PAGE {
            eprintln!(
                "  {}",
                dim(&format!(
                    "… and {} more items",
                    items.len() - PREVIEW_ITEMS_PER_PAGE
                ))
            );
        }
    }
}

fn describe_item(item: &InvoiceLineItem) -> String {
    let num = |v: Option<f64>| v.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string());
    format!(
        "#{} {}  qty {}  rate {}  gst {}%  hsn {}",
        item.sort,
        item.number.as_deref().unwrap_or("-"),
        num(item.qty),
        num(item.rate),
        num(item.gst),
        item.hsn.as_deref().unwrap_or("-"),
    )
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(opts: &ExtractOpts, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .dpi(opts.dpi)
        .max_tokens(opts.max_tokens)
        .temperature(opts.temperature)
        .max_retries(opts.max_retries)
        .backfill(opts.backfill.into())
        .on_model_error(opts.on_model_error.into())
        .download_timeout_secs(opts.download_timeout);

    if let Some(secs) = opts.api_timeout {
        builder = builder.api_timeout_secs(secs);
    }
    if let Some(ref model) = opts.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = opts.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref pwd) = opts.password {
        builder = builder.password(pwd);
    }
    if let Some(ref path) = opts.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
