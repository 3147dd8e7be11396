//! CLI binary for pdf-renamer.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `RenameConfig`, runs the pipeline until Ctrl-C, and prints a summary.

use anyhow::{Context, Result};
use clap::Parser;
use pdf_renamer::{
    Pipeline, RenameConfig, TaskEvent, TaskEventSink, TaskStatus,
};
use std::io::{self, Write};
use std::path::PathBuf;
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

// ── Terminal event sink ──────────────────────────────────────────────────────

/// Prints one line per task transition. Lines interleave safely because each
/// event is a single `eprintln!` call.
struct TerminalSink {
    quiet: bool,
}

impl TaskEventSink for TerminalSink {
    fn on_task_event(&self, event: &TaskEvent) {
        if self.quiet {
            return;
        }
        let name = event
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| event.path.display().to_string());

        match event.status {
            TaskStatus::Queued => {
                eprintln!("{} {}", cyan("◆"), dim(&format!("queued      {name}")));
            }
            TaskStatus::Processing => {
                eprintln!("{} {}", cyan("…"), dim(&format!("processing  {name}")));
            }
            TaskStatus::Success => {
                let dest = event
                    .destination
                    .as_deref()
                    .map(|d| d.display().to_string())
                    .unwrap_or_default();
                eprintln!("{} {name}  →  {}", green("✓"), bold(&dest));
            }
            TaskStatus::Error => {
                let detail = event.detail.as_deref().unwrap_or("unknown error");
                // Truncate very long error messages to keep output tidy.
                let msg = clip(detail, 120);
                eprintln!("{} {name}  {}", red("✗"), red(&msg));
                if let Some(ref dest) = event.destination {
                    eprintln!("   {}", dim(&format!("rescued to {}", dest.display())));
                }
            }
        }
    }
}

/// Shorten `s` to at most `max` characters, with an ellipsis. Counts chars,
/// not bytes — error details carry file names and provider messages, and
/// slicing those mid-umlaut would panic.
fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max - 1).collect();
        out.push('\u{2026}');
        out
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Watch an inbox, file renamed PDFs into an archive
  pdfrename ~/Scans/inbox ~/Scans/filed

  # Also process PDFs already sitting in the inbox
  pdfrename --scan-existing ~/Scans/inbox ~/Scans/filed

  # Use a specific model and provider
  pdfrename --model gpt-4.1 --provider openai ~/in ~/out

  # Two workers, patient retries for a flaky connection
  pdfrename -c 2 --max-retries 5 --retry-backoff-ms 1000 ~/in ~/out

  # Machine-readable final report
  pdfrename --scan-existing --json ~/in ~/out > report.json

NAMING:
  Each file is renamed to YYYY-MM-DD_Entity_DocType_Id.pdf based on what the
  model reads on its first pages, e.g.:
      scan_0047.pdf  →  2024-05-01_AcmeCorp_Invoice_998.pdf
  Name collisions get a numeric suffix (_1, _2, …). Files the model cannot
  classify are still moved, under <original-stem>_unclassified_<timestamp>.pdf,
  so the inbox always drains.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_PROVIDER      Override provider (openai, anthropic, gemini, ollama)
  PDFIUM_LIB_PATH         Path to an existing libpdfium

SETUP:
  1. Set API key:     export OPENAI_API_KEY=sk-...
  2. Run:             pdfrename ~/Scans/inbox ~/Scans/filed
  3. Stop with Ctrl-C; in-flight files finish before exit.
"#;

/// Watch a directory and rename incoming PDFs by their content.
#[derive(Parser, Debug)]
#[command(
    name = "pdfrename",
    version,
    about = "Watch a directory and rename incoming PDFs by their content",
    long_about = "Watches a directory for newly arrived PDF files, reads each one with a \
Vision Language Model, and moves it into an output directory under a content-derived name \
(YYYY-MM-DD_Entity_DocType_Id.pdf). Supports OpenAI, Anthropic, Google Gemini, and any \
OpenAI-compatible endpoint (Ollama, vLLM, LiteLLM, etc.).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory to watch for incoming PDFs.
    input_dir: PathBuf,

    /// Directory renamed files are moved into (created if missing).
    output_dir: PathBuf,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(
        long,
        env = "EDGEQUAKE_MODEL",
        long_help = "Vision LLM model to use. Default: gpt-4.1-nano ($0.10/$0.40 per 1M tokens).\n\
          A filename costs a few hundred tokens, so even large inboxes stay cheap."
    )]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Number of files processed concurrently.
    #[arg(short, long, env = "PDFRENAME_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Also enqueue PDFs already present in the input directory.
    #[arg(long, env = "PDFRENAME_SCAN_EXISTING")]
    scan_existing: bool,

    /// Retries per file on transient classifier failure.
    #[arg(long, env = "PDFRENAME_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Initial retry delay in milliseconds (doubles per attempt).
    #[arg(long, env = "PDFRENAME_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Per-classification API timeout in seconds.
    #[arg(long, env = "PDFRENAME_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Re-probes of a not-yet-fully-written file before giving up.
    #[arg(long, env = "PDFRENAME_STABILITY_RETRIES", default_value_t = 3)]
    stability_retries: u32,

    /// Delay between stability probes in milliseconds.
    #[arg(long, env = "PDFRENAME_STABILITY_DELAY_MS", default_value_t = 500)]
    stability_delay_ms: u64,

    /// Maximum number of page images sent per classification.
    #[arg(long, env = "PDFRENAME_MAX_PAGES", default_value_t = 4)]
    max_pages: usize,

    /// Print the final status table as JSON on exit.
    #[arg(long, env = "PDFRENAME_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFRENAME_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFRENAME_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The event sink carries per-file feedback; library logs default to
    // warnings so they do not drown it out.
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;
    let mut pipeline = Pipeline::start(config)
        .await
        .context("Failed to start pipeline")?;

    if !cli.quiet {
        eprintln!(
            "{} Watching {}  →  {}   {}",
            cyan("◆"),
            bold(&cli.input_dir.display().to_string()),
            bold(&pipeline.output_dir().display().to_string()),
            dim("(Ctrl-C to stop)"),
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    if !cli.quiet {
        eprintln!("{}", dim("Stopping, waiting for in-flight files…"));
    }
    pipeline.stop().await;

    // ── Final report ─────────────────────────────────────────────────────
    let tasks = pipeline.status();

    if cli.json {
        let json = serde_json::to_string_pretty(&tasks).context("Failed to serialise report")?;
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle.write_all(json.as_bytes()).ok();
        handle.write_all(b"\n").ok();
    }

    if !cli.quiet {
        let succeeded = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Success)
            .count();
        let failed = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Error)
            .count();

        if failed == 0 {
            eprintln!(
                "{} {} file(s) renamed",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {} renamed, {} failed",
                cyan("⚠"),
                bold(&succeeded.to_string()),
                red(&failed.to_string())
            );
        }
    }

    Ok(())
}

/// Map CLI args to `RenameConfig`.
fn build_config(cli: &Cli) -> Result<RenameConfig> {
    let mut builder = RenameConfig::builder(&cli.input_dir, &cli.output_dir)
        .concurrency(cli.concurrency)
        .scan_on_start(cli.scan_existing)
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .api_timeout_secs(cli.api_timeout)
        .stability_retries(cli.stability_retries)
        .stability_delay_ms(cli.stability_delay_ms)
        .max_classify_pages(cli.max_pages)
        .event_sink(std::sync::Arc::new(TerminalSink { quiet: cli.quiet }));

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }

    builder.build().context("Invalid configuration")
}
