//! CLI binary for edgequake-batch2md.
//!
//! A thin shim over the library crate that maps CLI flags and environment
//! variables to `BatchConfig` / `ServiceConfig` once at startup and prints
//! results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_batch2md::listing::{ItemLog, StatusLog};
use edgequake_batch2md::{
    build_report, index_roster, load_roster, plan_only, rebuild_snapshot, run_batch, write_report,
    BatchConfig, BatchError, BatchProgressCallback, ListingTool, OcrService, PartitionStatus,
    ProgressCallback, ServiceConfig, SkipReason,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

/// Exit status for a run stopped by Ctrl-C (128 + SIGINT).
const EXIT_INTERRUPTED: u8 = 130;

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over the items of this run plus a log
/// line per finished item. Items finish out of order when W > 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until the plan is known; `on_run_start` sets the length.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Planning");
        bar.set_message("Fingerprinting inputs…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} items  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
    }

    fn elapsed_for(&self, rel_path: &str) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(rel_path))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_run_start(&self, to_process: usize, skipped: usize) {
        self.activate_bar(to_process);
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold(&format!("{to_process} item(s) to convert")),
            dim(&format!("{skipped} already up to date")),
        ));
    }

    fn on_item_start(&self, rel_path: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(rel_path.to_string(), Instant::now());
        }
        self.bar.set_message(rel_path.to_string());
    }

    fn on_item_complete(&self, rel_path: &str, pages: usize) {
        let secs = self.elapsed_for(rel_path);
        self.bar.println(format!(
            "  {} {}  {}  {}",
            green("✓"),
            rel_path,
            dim(&format!("{pages} page(s)")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, rel_path: &str, error: &str) {
        let secs = self.elapsed_for(rel_path);
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} {}  {}  {}",
            red("✗"),
            rel_path,
            red(&shorten(error, 80)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_budget_exhausted(&self, remaining: usize) {
        self.bar.println(format!(
            "{} {}",
            yellow("⏸"),
            bold(&format!(
                "Time budget reached; {remaining} item(s) left for the next run"
            )),
        ));
    }

    fn on_run_complete(&self, converted: usize, failed: usize) {
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!("{} {} item(s) converted", green("✔"), bold(&converted.to_string()));
        } else {
            eprintln!(
                "{} {} converted  ({} failed)",
                cyan("⚠"),
                bold(&converted.to_string()),
                red(&failed.to_string()),
            );
        }
    }
}

fn shorten(s: &str, max: usize) -> String {
    match s.char_indices().nth(max.saturating_sub(1)) {
        Some((idx, _)) => format!("{}\u{2026}", &s[..idx]),
        None => s.to_string(),
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert everything new or changed under data/raw, 2 hours max
  batch2md run --budget-secs 7200

  # Convert at most 50 documents this time
  batch2md run --max-items 50

  # What would be converted? (writes nothing)
  batch2md plan

  # Rebuild the Parquet snapshot from the journal
  batch2md snapshot

  # List every roster partition on the remote, then report coverage
  batch2md index --remote ect_drive --roster config/partitions.csv
  batch2md report --roster config/partitions.csv

ENVIRONMENT VARIABLES:
  BATCH2MD_BASE_URL       OCR service base URL (OpenAI-compatible, e.g. https://api.opentyphoon.ai/v1)
  BATCH2MD_API_KEY        OCR service credential
  BATCH2MD_MODEL          Model identifier recorded in artifact headers (default typhoon-ocr)
  BATCH2MD_CONCURRENCY    Parallel workers (default 3)
  BATCH2MD_BUDGET_SECS    Wall-clock budget per run (default 7200)
  BATCH2MD_REMOTE         Remote name for `index`
  PDFIUM_LIB_PATH         Directory holding the pdfium shared library
  RUST_LOG                Overrides the log filter

RESUMING:
  Every finished item is journaled immediately. Interrupt a run at any time
  (Ctrl-C exits with status 130) and run the same command again: finished
  items are skipped and the rest are picked up.
"#;

/// Idempotent, resumable batch conversion of documents to Markdown.
#[derive(Parser, Debug)]
#[command(
    name = "batch2md",
    version,
    about = "Idempotent, resumable batch conversion of documents to Markdown via an OCR service",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "BATCH2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "BATCH2MD_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Plan, convert, journal, and rebuild the snapshot.
    Run {
        #[command(flatten)]
        batch: BatchArgs,

        #[command(flatten)]
        service: ServiceArgs,

        /// Disable the progress bar.
        #[arg(long, env = "BATCH2MD_NO_PROGRESS")]
        no_progress: bool,
    },

    /// Print what a run would convert. Writes nothing.
    Plan {
        #[command(flatten)]
        batch: BatchArgs,

        /// Also list items that would be skipped.
        #[arg(long)]
        show_skipped: bool,
    },

    /// Rebuild the Parquet snapshot from the journal.
    Snapshot {
        #[command(flatten)]
        paths: JournalArgs,
    },

    /// List every roster partition on the remote and journal its status.
    Index {
        #[command(flatten)]
        index: IndexArgs,
    },

    /// Write CSV and Markdown coverage reports from roster + status log.
    Report {
        #[command(flatten)]
        report: ReportArgs,
    },
}

#[derive(Args, Debug)]
struct JournalArgs {
    /// Append-only conversion journal (JSONL).
    #[arg(long, env = "BATCH2MD_JOURNAL", default_value = "data/manifests/ocr_manifest.jsonl")]
    journal: PathBuf,

    /// Parquet snapshot of the latest record per item.
    #[arg(long, env = "BATCH2MD_SNAPSHOT", default_value = "data/manifests/ocr_manifest.parquet")]
    snapshot: PathBuf,
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// Directory tree of source documents.
    #[arg(long, env = "BATCH2MD_INPUT_ROOT", default_value = "data/raw")]
    input_root: PathBuf,

    /// Directory tree for Markdown artifacts (mirrors the input tree).
    #[arg(long, env = "BATCH2MD_OUTPUT_ROOT", default_value = "data/processed/ocr_markdown")]
    output_root: PathBuf,

    #[command(flatten)]
    paths: JournalArgs,

    /// Accepted document extensions (repeatable).
    #[arg(long = "ext", env = "BATCH2MD_EXTENSIONS", value_delimiter = ',', default_value = "pdf")]
    extensions: Vec<String>,

    /// Number of items converted in parallel.
    #[arg(short, long, env = "BATCH2MD_CONCURRENCY", default_value_t = 3)]
    concurrency: usize,

    /// Retries per page after the first attempt.
    #[arg(long, env = "BATCH2MD_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Backoff base in seconds (doubles per retry, plus up to 1 s jitter).
    #[arg(long, env = "BATCH2MD_RETRY_BASE_SECS", default_value_t = 2.0)]
    retry_base_secs: f64,

    /// Stop dispatching new items after this many seconds.
    #[arg(long, env = "BATCH2MD_BUDGET_SECS", default_value_t = 7200)]
    budget_secs: u64,

    /// Convert at most this many items per invocation (0 = no cap).
    #[arg(long, env = "BATCH2MD_MAX_ITEMS", default_value_t = 0)]
    max_items: usize,
}

#[derive(Args, Debug)]
struct ServiceArgs {
    /// OCR service base URL (OpenAI-compatible).
    #[arg(long, env = "BATCH2MD_BASE_URL")]
    endpoint: Option<String>,

    /// OCR service credential.
    #[arg(long, env = "BATCH2MD_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model identifier.
    #[arg(long, env = "BATCH2MD_MODEL", default_value = "typhoon-ocr")]
    model: String,

    /// Per-call timeout in seconds.
    #[arg(long, env = "BATCH2MD_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Longest edge of the rendered page image, in pixels.
    #[arg(long, env = "BATCH2MD_MAX_PIXELS", default_value_t = 1800)]
    max_pixels: u32,

    /// Max service output tokens per page.
    #[arg(long, env = "BATCH2MD_MAX_TOKENS", default_value_t = 16384)]
    max_tokens: usize,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "BATCH2MD_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Path to a text file containing a custom OCR prompt.
    #[arg(long, env = "BATCH2MD_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Directory holding the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RosterArgs {
    /// Partition roster CSV (`partition,link`).
    #[arg(long, env = "BATCH2MD_ROSTER", default_value = "config/partitions.csv")]
    roster: PathBuf,

    /// Append-only partition status log (JSONL).
    #[arg(
        long,
        env = "BATCH2MD_STATUS_LOG",
        default_value = "data/remote_index/published/status.jsonl"
    )]
    status_log: PathBuf,
}

#[derive(Args, Debug)]
struct IndexArgs {
    #[command(flatten)]
    roster: RosterArgs,

    /// Remote name configured in the listing tool.
    #[arg(long, env = "BATCH2MD_REMOTE")]
    remote: String,

    /// Listing tool executable.
    #[arg(long, env = "BATCH2MD_LISTING_TOOL", default_value = "rclone")]
    listing_tool: String,

    /// Append-only log of every listed item (JSONL).
    #[arg(
        long,
        env = "BATCH2MD_ITEMS_LOG",
        default_value = "data/remote_index/published/items.jsonl"
    )]
    items_log: PathBuf,
}

#[derive(Args, Debug)]
struct ReportArgs {
    #[command(flatten)]
    roster: RosterArgs,

    /// CSV report path.
    #[arg(long, default_value = "data/remote_index/published/summary.csv")]
    csv: PathBuf,

    /// Markdown report path.
    #[arg(long, default_value = "data/remote_index/published/summary.md")]
    markdown: PathBuf,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO-level library logs would fight with the progress bar; the bar
    // gives all the per-item feedback that matters.
    let show_progress = matches!(&cli.command, Command::Run { no_progress, .. } if !no_progress)
        && !cli.quiet;
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

    // ── Interrupt handling ───────────────────────────────────────────────
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let outcome = match cli.command {
        Command::Run {
            batch,
            service,
            no_progress: _,
        } => cmd_run(&batch, &service, show_progress, cli.quiet, &cancel).await,
        Command::Plan {
            batch,
            show_skipped,
        } => cmd_plan(&batch, show_skipped).await,
        Command::Snapshot { paths } => cmd_snapshot(&paths, cli.quiet).await,
        Command::Index { index } => cmd_index(&index, cli.quiet, &cancel).await,
        Command::Report { report } => cmd_report(&report, cli.quiet).await,
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) if is_cancelled(&e) => {
            eprintln!(
                "{} {}",
                yellow("⏹"),
                bold("Interrupted; finished items are journaled, re-run to resume")
            );
            Ok(ExitCode::from(EXIT_INTERRUPTED))
        }
        Err(e) => Err(e),
    }
}

fn is_cancelled(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<BatchError>(), Some(BatchError::Cancelled))
}

// ── Subcommands ──────────────────────────────────────────────────────────────

async fn cmd_run(
    batch: &BatchArgs,
    service: &ServiceArgs,
    show_progress: bool,
    quiet: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };

    let config = build_batch_config(batch, progress_cb)?;
    let service = OcrService::new(build_service_config(service).await?)
        .context("Failed to set up OCR service client")?;

    let summary = match run_batch(&config, &service, cancel).await {
        Ok(s) => s,
        Err(BatchError::Cancelled) => return Err(BatchError::Cancelled.into()),
        Err(e) => return Err(anyhow::Error::new(e).context("Batch run failed")),
    };

    if !quiet {
        eprintln!(
            "{}  {} converted  {} failed  {} skipped  {} deferred  {:.1}s",
            if summary.failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&summary.converted.to_string()),
            if summary.failed == 0 {
                summary.failed.to_string()
            } else {
                red(&summary.failed.to_string())
            },
            summary.skipped,
            summary.deferred,
            summary.elapsed.as_secs_f64(),
        );
        if summary.budget_exhausted || summary.deferred > 0 {
            eprintln!(
                "   {}",
                dim("Items were deferred; run the same command again to continue.")
            );
        }
        eprintln!(
            "   {} {}",
            dim("snapshot:"),
            dim(&format!(
                "{} rows ({} ok, {} error, {} skipped) → {}",
                summary.snapshot.rows,
                summary.snapshot.ok,
                summary.snapshot.error,
                summary.snapshot.skipped,
                config.snapshot_path.display()
            )),
        );
    }
    Ok(())
}

async fn cmd_plan(batch: &BatchArgs, show_skipped: bool) -> Result<()> {
    let config = build_batch_config(batch, None)?;
    let plan = plan_only(&config).await.context("Planning failed")?;

    for task in &plan.tasks {
        println!("convert\t{}", task.item.rel_path);
    }
    for conflict in &plan.conflicts {
        println!("conflict\t{}\t{}", conflict.task.item.rel_path, conflict.owner);
    }
    if show_skipped {
        for skip in &plan.skipped {
            let why = match skip.reason {
                SkipReason::HeaderMatch => "header",
                SkipReason::JournalMatch => "journal",
            };
            println!("skip\t{}\t{}", skip.task.item.rel_path, why);
        }
    }

    let capped = config
        .max_items
        .map_or(plan.tasks.len(), |cap| plan.tasks.len().min(cap));
    eprintln!(
        "{} to convert ({} this run), {} up to date, {} conflicting",
        bold(&plan.tasks.len().to_string()),
        capped,
        plan.skipped.len(),
        plan.conflicts.len()
    );
    Ok(())
}

async fn cmd_snapshot(paths: &JournalArgs, quiet: bool) -> Result<()> {
    let summary = rebuild_snapshot(&paths.journal, &paths.snapshot)
        .await
        .context("Snapshot rebuild failed")?;
    if !quiet {
        eprintln!(
            "{}  {} rows  →  {}",
            green("✔"),
            summary.rows,
            bold(&paths.snapshot.display().to_string())
        );
    }
    Ok(())
}

async fn cmd_index(args: &IndexArgs, quiet: bool, cancel: &CancellationToken) -> Result<()> {
    let roster = load_roster(&args.roster.roster).context("Failed to load roster")?;
    let tool = ListingTool::new(&args.remote).with_program(&args.listing_tool);
    let status_log = StatusLog::open(&args.roster.status_log)
        .await
        .context("Failed to open status log")?;
    let item_log = ItemLog::open(&args.items_log)
        .await
        .context("Failed to open items log")?;

    let statuses = index_roster(&tool, &roster, &status_log, &item_log, cancel)
        .await
        .context("Indexing failed")?;

    if !quiet {
        for s in &statuses {
            if s.ok {
                eprintln!(
                    "  {} {}  {}",
                    green("✓"),
                    s.partition,
                    dim(&format!("{} files, {} documents", s.n_files, s.n_documents))
                );
            } else {
                eprintln!(
                    "  {} {}  {}",
                    red("✗"),
                    s.partition,
                    red(&shorten(s.error.as_deref().unwrap_or("unknown error"), 80))
                );
            }
        }
        let ok = statuses.iter().filter(|s| s.ok).count();
        eprintln!("{}/{} partitions listed", bold(&ok.to_string()), statuses.len());
    }
    Ok(())
}

async fn cmd_report(args: &ReportArgs, quiet: bool) -> Result<()> {
    let roster = load_roster(&args.roster.roster).context("Failed to load roster")?;
    let statuses: Vec<PartitionStatus> = StatusLog::load(&args.roster.status_log)
        .await
        .context("Failed to read status log")?;

    let rows = build_report(&roster, statuses);
    write_report(&rows, &args.csv, &args.markdown).context("Failed to write report")?;

    if !quiet {
        let indexed = rows.iter().filter(|r| r.indexed).count();
        eprintln!(
            "{}  {}/{} partitions indexed  →  {}, {}",
            if indexed == rows.len() { green("✔") } else { cyan("⚠") },
            indexed,
            rows.len(),
            bold(&args.csv.display().to_string()),
            bold(&args.markdown.display().to_string()),
        );
    }
    Ok(())
}

// ── Config mapping ───────────────────────────────────────────────────────────

fn build_batch_config(args: &BatchArgs, progress: Option<ProgressCallback>) -> Result<BatchConfig> {
    if !args.retry_base_secs.is_finite() || args.retry_base_secs < 0.0 {
        anyhow::bail!("--retry-base-secs must be a non-negative number");
    }

    let mut builder = BatchConfig::builder()
        .input_root(&args.input_root)
        .output_root(&args.output_root)
        .journal_path(&args.paths.journal)
        .snapshot_path(&args.paths.snapshot)
        .extensions(args.extensions.iter().map(String::as_str))
        .concurrency(args.concurrency)
        .max_retries(args.max_retries)
        .retry_base_delay(Duration::from_secs_f64(args.retry_base_secs))
        .budget(Duration::from_secs(args.budget_secs))
        .max_items(args.max_items);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn build_service_config(args: &ServiceArgs) -> Result<ServiceConfig> {
    let mut builder = ServiceConfig::builder()
        .endpoint(args.endpoint.clone().unwrap_or_default())
        .api_key(args.api_key.clone().unwrap_or_default())
        .model(&args.model)
        .request_timeout_secs(args.api_timeout)
        .max_rendered_pixels(args.max_pixels)
        .max_tokens(args.max_tokens)
        .temperature(args.temperature);

    if let Some(ref path) = args.prompt_file {
        builder = builder.prompt(read_prompt(path).await?);
    }
    if let Some(ref dir) = args.pdfium_lib_dir {
        builder = builder.pdfium_lib_dir(dir);
    }

    builder.build().context("Invalid service configuration")
}

async fn read_prompt(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read OCR prompt from {:?}", path))
}
