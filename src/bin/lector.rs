//! CLI binary for lector-dj.
//!
//! A thin shim over the library crate that maps CLI flags to `RunConfig`,
//! runs the batch and prints a summary.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use lector_dj::{
    classify_to_file, scan_only, AggregationPolicy, BackendConfig, ClassificationResult,
    ProgressCallback, RunConfig, RunProgressCallback, RunStats,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar over documents, with a log line per classified page.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_run_start` reports the document count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Scanning input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_documents: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_documents as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Classifying");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Found {total_documents} documents"))
        ));
    }

    fn on_document_start(&self, label: &str, index: usize, _total: usize) {
        if index > 1 {
            self.bar.inc(1);
        }
        self.bar.set_message(label.to_string());
    }

    fn on_page_classified(&self, label: &str, page_num: usize, result: &ClassificationResult) {
        let mark = if result.is_unknown() {
            cyan("?")
        } else {
            green("✓")
        };
        self.bar.println(format!(
            "  {} {:<32} p{:<3} {:<15} {}",
            mark,
            label,
            page_num,
            result.category.as_str(),
            dim(&format!("{:.2}", result.confidence)),
        ));
    }

    fn on_document_error(&self, label: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            let head: String = error.chars().take(79).collect();
            format!("{head}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {:<32} {}", red("✗"), label, red(&msg)));
    }

    fn on_run_complete(&self, stats: &RunStats) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        eprintln!(
            "{} {} documents, {} pages classified{}",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&stats.total_documents.to_string()),
            stats.classified_pages,
            if failed == 0 {
                String::new()
            } else {
                format!("  ({} unreadable)", red(&failed.to_string()))
            },
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Classify everything under ./input, report in ./output/results.json
  lector

  # A single archive, with a different examples library
  lector --input batch.zip --examples refs/

  # One verdict per document instead of one per page
  lector --input scans/ --aggregate majority-vote

  # List what would be classified, without calling the model
  lector --input scans/ --dry-run

EXAMPLES LIBRARY:
  examples/
    ID/             passport.jpg, licence.png, ...
    INVOICE/        ...
    RECEIPT/        ...
    TAX/            ...
    BANK_STATEMENT/ ...

  Each image is replayed to the model as a labelled reference before every
  page. A missing directory means zero-shot classification.

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY      Google Gemini API key (default provider)
  OPENAI_API_KEY      OpenAI API key
  ANTHROPIC_API_KEY   Anthropic API key
  LECTOR_PROVIDER     Override provider
  LECTOR_MODEL        Override model ID
  PDFIUM_LIB_PATH     Path to libpdfium
"#;

/// Classify scanned documents with a few-shot prompted vision model.
#[derive(Parser, Debug)]
#[command(
    name = "lector",
    version,
    about = "Classify documents (ID, invoice, receipt, tax, bank statement) with a vision LLM",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input directory, supported file (.jpg .jpeg .png .pdf) or .zip archive.
    #[arg(short, long, env = "LECTOR_INPUT", default_value = "input")]
    input: PathBuf,

    /// Directory receiving results.json.
    #[arg(short, long, env = "LECTOR_OUTPUT", default_value = "output")]
    output: PathBuf,

    /// Few-shot examples library (one subdirectory per category).
    #[arg(long, env = "LECTOR_EXAMPLES", default_value = "examples")]
    examples: PathBuf,

    /// Temp directory for extracted archives and rendered pages.
    /// Wiped at start and removed at the end of the run.
    #[arg(long, env = "LECTOR_TEMP_DIR", default_value = "temp_extracted")]
    temp_dir: PathBuf,

    /// LLM provider: gemini, openai, anthropic, azure, mistral, openrouter, ollama.
    #[arg(long, env = "LECTOR_PROVIDER", default_value = "gemini")]
    provider: String,

    /// LLM model ID.
    #[arg(long, env = "LECTOR_MODEL", default_value = "gemini-2.0-flash")]
    model: String,

    /// Report shape for multi-page documents.
    #[arg(long, env = "LECTOR_AGGREGATE", value_enum, default_value = "per-page")]
    aggregate: AggregateArg,

    /// Longest edge of rendered pages and examples, in pixels.
    #[arg(long, env = "LECTOR_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// How many levels of archives-inside-archives to open.
    #[arg(long, env = "LECTOR_ARCHIVE_DEPTH", default_value_t = 2)]
    archive_depth: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "LECTOR_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per page on transient backend failure.
    #[arg(long, env = "LECTOR_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call backend timeout in seconds.
    #[arg(long, env = "LECTOR_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Path to the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Print run statistics as JSON on stdout.
    #[arg(long, env = "LECTOR_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "LECTOR_NO_PROGRESS")]
    no_progress: bool,

    /// List the documents that would be classified, then exit.
    #[arg(long)]
    dry_run: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "LECTOR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "LECTOR_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum AggregateArg {
    PerPage,
    FirstPage,
    MajorityVote,
}

impl From<AggregateArg> for AggregationPolicy {
    fn from(v: AggregateArg) -> Self {
        match v {
            AggregateArg::PerPage => AggregationPolicy::PerPage,
            AggregateArg::FirstPage => AggregationPolicy::FirstPage,
            AggregateArg::MajorityVote => AggregationPolicy::MajorityVote,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.dry_run;
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

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn RunProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;

    // ── Dry run ──────────────────────────────────────────────────────────
    if cli.dry_run {
        let docs = scan_only(&cli.input, &config).context("Scan failed")?;
        if cli.json {
            let labels: Vec<_> = docs.iter().map(|d| (&d.label, d.kind)).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&labels).context("Failed to serialise scan")?
            );
        } else {
            for doc in &docs {
                println!("{:<6} {}", format!("{:?}", doc.kind).to_lowercase(), doc.label);
            }
            if !cli.quiet {
                eprintln!("{} documents", docs.len());
            }
        }
        return Ok(());
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let stats = classify_to_file(&cli.input, &config)
        .await
        .context("Classification run failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&stats).context("Failed to serialise stats")?
        );
    } else if !cli.quiet {
        eprintln!(
            "{}  {} documents  {} pages  {} unknown  {}ms  →  {}",
            if stats.failed_documents == 0 && stats.backend_failures == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            stats.total_documents,
            stats.classified_pages,
            stats.unknown_pages,
            stats.total_duration_ms,
            bold(&config.report_path().display().to_string()),
        );
        if stats.backend_failures > 0 {
            eprintln!(
                "   {} pages recorded as UNKNOWN after backend failures",
                red(&stats.backend_failures.to_string())
            );
        }
    }

    Ok(())
}

/// Map CLI args to `RunConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<RunConfig> {
    let mut builder = RunConfig::builder()
        .output_dir(&cli.output)
        .temp_dir(&cli.temp_dir)
        .examples_dir(&cli.examples)
        .max_rendered_pixels(cli.max_pixels)
        .max_archive_depth(cli.archive_depth)
        .aggregation(cli.aggregate.clone().into())
        .backend(BackendConfig::from_env(&cli.provider, &cli.model))
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_lib_path(lib);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
