//! CLI binary for ocr-rename.
//!
//! A thin shim over the library crate: each subcommand maps its flags to
//! library calls and prints a human-readable summary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use ocr_rename::batch::{self, BatchClient, LAST_BATCH_ID_FILE};
use ocr_rename::config::DEFAULT_CONFIDENCE_THRESHOLD;
use ocr_rename::rename::{self, RenameStatus};
use ocr_rename::{
    analyze_directory, review, AnalysisProgressCallback, AnalyzeConfig, ProgressCallback,
};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ─────────────────────────────────────────────────────

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

fn format_cost(cost: Option<f64>) -> String {
    cost.map(|c| format!("≈ ${c:.4}"))
        .unwrap_or_else(|| "cost unknown".to_string())
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max - 1).collect();
        format!("{head}\u{2026}")
    } else {
        s.to_string()
    }
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per book. Files finish out of order
/// in concurrent mode, so start times are keyed by file name.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
    errors: AtomicUsize,
    /// Verb shown on the bar ("Analyzing" or "Preparing").
    verb: &'static str,
}

impl CliProgressCallback {
    fn new(verb: &'static str) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Scanning");
        bar.set_message("Listing PDFs…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
            verb,
        })
    }

    fn elapsed_secs(&self, file: &str) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(file))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl AnalysisProgressCallback for CliProgressCallback {
    fn on_analysis_start(&self, total_files: usize) {
        self.bar.set_length(total_files as u64);
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} books  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_prefix(self.verb);
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{} {total_files} PDFs…", self.verb))
        ));
    }

    fn on_file_start(&self, file: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(file.to_string(), Instant::now());
        }
        self.bar.set_message(truncate(file, 40));
    }

    fn on_file_complete(&self, file: &str, title: &str, confidence: f64) {
        let secs = self.elapsed_secs(file);
        self.bar.println(format!(
            "  {} {:<40}  {}  {}  {}",
            green("✓"),
            truncate(file, 40),
            truncate(title, 50),
            dim(&format!("{:.0}%", confidence * 100.0)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, file: &str, error: &str) {
        let secs = self.elapsed_secs(file);
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            red("✗"),
            truncate(file, 40),
            red(&truncate(error, 80)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_analysis_complete(&self, total_files: usize, success_count: usize) {
        let failed = total_files.saturating_sub(success_count);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!("{} {} books done", green("✔"), bold(&success_count.to_string()));
        } else {
            eprintln!(
                "{} {}/{} books done  ({} failed)",
                if failed == total_files { red("✘") } else { yellow("⚠") },
                bold(&success_count.to_string()),
                total_files,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"WORKFLOW:
  1. ocr-rename analyze ./scans            → output/review_<ts>.csv
  2. Open the CSV, fix titles, set approve = yes on rows to rename
  3. ocr-rename rename output/review_<ts>.csv --dir ./scans --dry-run
  4. ocr-rename rename output/review_<ts>.csv --dir ./scans
  5. ocr-rename undo output/rename_log_<ts>.json --dir ./scans   (if needed)

BATCH MODE (Anthropic only, half price, results within 24 h):
  ocr-rename analyze ./scans --batch
  ocr-rename batch-status            (defaults to the last submitted batch)
  ocr-rename batch-results

ENVIRONMENT VARIABLES:
  ANTHROPIC_API_KEY       Anthropic API key (required for batch mode)
  ANTHROPIC_BASE_URL      Override the Anthropic API endpoint
  OPENAI_API_KEY          OpenAI API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (anthropic, openai, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium, skips auto-download
  A .env file in the working directory is loaded at startup.
"#;

/// Rename scanned PDF books from their title pages using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "ocr-rename",
    version,
    about = "Rename scanned PDF books from their title pages using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "OCR_RENAME_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "OCR_RENAME_QUIET")]
    quiet: bool,

    /// Disable the progress bar.
    #[arg(long, global = true, env = "OCR_RENAME_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Identify every PDF in DIR and write a review CSV.
    Analyze {
        /// Directory containing the scanned PDFs.
        dir: PathBuf,

        /// LLM model ID (default: claude-haiku-4-5-20251001).
        #[arg(long, env = "OCR_RENAME_MODEL")]
        model: Option<String>,

        /// LLM provider: anthropic, openai, gemini, ollama, azure.
        #[arg(long, env = "OCR_RENAME_PROVIDER")]
        provider: Option<String>,

        /// Pages to send from the start of each book.
        #[arg(long, env = "OCR_RENAME_PAGES", default_value_t = 4,
              value_parser = clap::value_parser!(u32).range(1..=20))]
        pages: u32,

        /// Number of books analysed concurrently.
        #[arg(short, long, env = "OCR_RENAME_CONCURRENCY", default_value_t = 5)]
        concurrency: usize,

        /// Directory for review CSVs, logs and batch files.
        #[arg(short, long, env = "OCR_RENAME_OUTPUT", default_value = "output")]
        output: PathBuf,

        /// Submit through the Message Batches API instead of real-time calls.
        #[arg(long, env = "OCR_RENAME_BATCH")]
        batch: bool,

        /// Skip books already identified in an earlier review CSV.
        #[arg(long, env = "OCR_RENAME_RESUME")]
        resume: bool,

        /// Maximum API requests per minute.
        #[arg(long, env = "OCR_RENAME_RPM", default_value_t = 50)]
        rpm: u32,

        /// PDF user password for encrypted scans.
        #[arg(long, env = "OCR_RENAME_PASSWORD")]
        password: Option<String>,

        /// Pre-approve suggestions at or above this confidence.
        #[arg(long, env = "OCR_RENAME_THRESHOLD", default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
        threshold: f64,
    },

    /// Rename the approved rows of a review CSV.
    Rename {
        /// Review CSV produced by `analyze`.
        csv: PathBuf,

        /// Directory containing the PDFs.
        #[arg(long)]
        dir: PathBuf,

        /// Show what would happen without renaming anything.
        #[arg(long)]
        dry_run: bool,

        /// Directory for the rename log.
        #[arg(short, long, env = "OCR_RENAME_OUTPUT", default_value = "output")]
        output: PathBuf,
    },

    /// Restore the original names recorded in a rename log.
    Undo {
        /// Rename log produced by `rename`.
        log: PathBuf,

        /// Directory containing the renamed PDFs.
        #[arg(long)]
        dir: PathBuf,

        /// Show what would be restored without renaming anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the progress of a submitted batch.
    BatchStatus {
        /// Batch id; defaults to the last submitted batch.
        id: Option<String>,

        #[arg(short, long, env = "OCR_RENAME_OUTPUT", default_value = "output")]
        output: PathBuf,
    },

    /// Download the results of an ended batch into a review CSV.
    BatchResults {
        /// Batch id; defaults to the last submitted batch.
        id: Option<String>,

        #[arg(short, long, env = "OCR_RENAME_OUTPUT", default_value = "output")]
        output: PathBuf,

        /// Pre-approve suggestions at or above this confidence.
        #[arg(long, env = "OCR_RENAME_THRESHOLD", default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
        threshold: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO-level library logs are suppressed while the progress bar is shown.
    let shows_bar = matches!(cli.command, Command::Analyze { .. });
    let show_progress = !cli.quiet && !cli.no_progress && shows_bar;
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

    match cli.command {
        Command::Analyze {
            ref dir,
            ref model,
            ref provider,
            pages,
            concurrency,
            ref output,
            batch,
            resume,
            rpm,
            ref password,
            threshold,
        } => {
            ensure_pdfium(cli.quiet)?;

            let progress: Option<ProgressCallback> = if show_progress {
                let verb = if batch { "Preparing" } else { "Analyzing" };
                Some(CliProgressCallback::new(verb) as Arc<dyn AnalysisProgressCallback>)
            } else {
                None
            };

            let mut builder = AnalyzeConfig::builder()
                .max_pages(pages as usize)
                .concurrency(concurrency)
                .requests_per_minute(rpm)
                .output_dir(output.clone())
                .resume(resume)
                .confidence_threshold(threshold);
            if let Some(m) = model {
                builder = builder.model(m.clone());
            }
            if let Some(p) = provider {
                builder = builder.provider_name(p.clone());
            }
            if let Some(pw) = password {
                builder = builder.password(pw.clone());
            }
            if let Some(cb) = progress {
                builder = builder.progress_callback(cb);
            }
            let config = builder.build().context("Invalid configuration")?;

            if batch {
                run_batch_submit(dir, &config, cli.quiet).await
            } else {
                run_analyze(dir, &config, cli.quiet).await
            }
        }
        Command::Rename {
            ref csv,
            ref dir,
            dry_run,
            ref output,
        } => run_rename(csv, dir, dry_run, output, cli.quiet),
        Command::Undo {
            ref log,
            ref dir,
            dry_run,
        } => run_undo(log, dir, dry_run, cli.quiet),
        Command::BatchStatus { ref id, ref output } => {
            let id = batch_id_or_last(id.as_deref(), output)?;
            run_batch_status(&id).await
        }
        Command::BatchResults {
            ref id,
            ref output,
            threshold,
        } => {
            let id = batch_id_or_last(id.as_deref(), output)?;
            run_batch_results(&id, output, threshold, cli.quiet).await
        }
    }
}

// ── PDFium engine ───────────────────────────────────────────────────────────

/// Make sure the pdfium shared library is present before rendering.
///
/// With `--features bundled` the library is extracted from the binary;
/// otherwise it is downloaded once (~30 MB) and cached.
fn ensure_pdfium(quiet: bool) -> Result<()> {
    #[cfg(feature = "bundled")]
    {
        let _ = quiet;
        tokio::task::block_in_place(pdfium_auto::ensure_pdfium_bundled)
            .context("Failed to extract bundled PDFium engine")?;
    }

    #[cfg(not(feature = "bundled"))]
    if !pdfium_auto::is_pdfium_cached() {
        if quiet {
            tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
                .context("Failed to download PDFium engine")?;
            return Ok(());
        }

        let dl_bar = ProgressBar::new(0);
        dl_bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        dl_bar.set_prefix("PDF engine");
        dl_bar.enable_steady_tick(Duration::from_millis(80));

        let bar = dl_bar.clone();
        tokio::task::block_in_place(|| {
            pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
                if let Some(t) = total {
                    if bar.length() != Some(t) {
                        bar.set_length(t);
                    }
                }
                bar.set_position(downloaded);
            }))
        })
        .context("Failed to download PDFium engine")?;

        dl_bar.finish_with_message("ready ✓");
    }

    Ok(())
}

// ── analyze ─────────────────────────────────────────────────────────────────

async fn run_analyze(dir: &Path, config: &AnalyzeConfig, quiet: bool) -> Result<()> {
    let output = analyze_directory(dir, config)
        .await
        .with_context(|| format!("Analysis of {} failed", dir.display()))?;

    if output.entries.is_empty() {
        if !quiet {
            eprintln!(
                "{} nothing to do ({} already processed)",
                green("✔"),
                output.stats.skipped_files
            );
        }
        return Ok(());
    }

    let csv = review::write_review_csv(&output.entries, &config.output_dir)
        .context("Failed to write review CSV")?;

    if !quiet {
        let s = &output.stats;
        let approved = output.entries.iter().filter(|e| e.is_approved()).count();
        eprintln!(
            "{}  {}/{} books  {} pre-approved  {}ms  →  {}",
            if s.failed_files == 0 { green("✔") } else { yellow("⚠") },
            s.analyzed_files,
            s.analyzed_files + s.failed_files,
            approved,
            s.total_duration_ms,
            bold(&csv.display().to_string()),
        );
        eprintln!(
            "   {} tokens in  /  {} tokens out  —  {}",
            dim(&s.total_input_tokens.to_string()),
            dim(&s.total_output_tokens.to_string()),
            format_cost(s.estimated_cost_usd),
        );
        if s.total_retries > 0 {
            eprintln!("   {} API retries", yellow(&s.total_retries.to_string()));
        }
        eprintln!(
            "\nReview the CSV, then run:\n  {}",
            cyan(&format!(
                "ocr-rename rename {} --dir {}",
                csv.display(),
                dir.display()
            ))
        );
    }
    Ok(())
}

// ── batch ───────────────────────────────────────────────────────────────────

fn batch_id_or_last(id: Option<&str>, output: &Path) -> Result<String> {
    if let Some(id) = id {
        return Ok(id.to_string());
    }
    let path = output.join(LAST_BATCH_ID_FILE);
    let id = std::fs::read_to_string(&path)
        .with_context(|| format!("No batch id given and {} is unreadable", path.display()))?;
    Ok(id.trim().to_string())
}

async fn run_batch_submit(dir: &Path, config: &AnalyzeConfig, quiet: bool) -> Result<()> {
    let client = BatchClient::from_env().context("Batch mode needs the Anthropic API")?;
    let Some(sub) = batch::submit_batch(&client, dir, config)
        .await
        .context("Batch submission failed")?
    else {
        if !quiet {
            eprintln!("{} nothing to submit", green("✔"));
        }
        return Ok(());
    };

    if !quiet {
        eprintln!(
            "{} batch {} submitted with {} books ({} failed to render, {} skipped)",
            green("✔"),
            bold(&sub.batch.id),
            sub.submitted,
            sub.failed.len(),
            sub.skipped,
        );
        eprintln!("   manifest: {}", dim(&sub.manifest_path.display().to_string()));
        eprintln!(
            "\nCheck progress with:\n  {}\nthen fetch results with:\n  {}",
            cyan(&format!("ocr-rename batch-status {}", sub.batch.id)),
            cyan(&format!("ocr-rename batch-results {}", sub.batch.id)),
        );
    }
    // Stdout carries only the id, for scripting.
    println!("{}", sub.batch.id);
    Ok(())
}

async fn run_batch_status(id: &str) -> Result<()> {
    let client = BatchClient::from_env().context("Batch mode needs the Anthropic API")?;
    let batch = client
        .retrieve(id)
        .await
        .with_context(|| format!("Failed to fetch batch {id}"))?;

    let c = &batch.request_counts;
    println!("Batch:       {}", batch.id);
    println!("Status:      {}", batch.processing_status);
    if let Some(ref t) = batch.created_at {
        println!("Created:     {t}");
    }
    if let Some(ref t) = batch.ended_at {
        println!("Ended:       {t}");
    }
    println!("Processing:  {}", c.processing);
    println!("Succeeded:   {}", green(&c.succeeded.to_string()));
    println!("Errored:     {}", red(&c.errored.to_string()));
    println!("Canceled:    {}", c.canceled);
    println!("Expired:     {}", c.expired);
    if batch.is_ended() {
        println!("\nFetch results with: ocr-rename batch-results {}", batch.id);
    }
    Ok(())
}

async fn run_batch_results(id: &str, output: &Path, threshold: f64, quiet: bool) -> Result<()> {
    let client = BatchClient::from_env().context("Batch mode needs the Anthropic API")?;
    let results = batch::batch_results(&client, id, output, threshold)
        .await
        .with_context(|| format!("Failed to fetch results of batch {id}"))?;
    let csv = review::write_review_csv(&results.entries, output)
        .context("Failed to write review CSV")?;

    if !quiet {
        let s = &results.stats;
        let approved = results.entries.iter().filter(|e| e.is_approved()).count();
        eprintln!(
            "{}  {} books  {} pre-approved  {} failed  →  {}",
            if s.failed_files == 0 { green("✔") } else { yellow("⚠") },
            s.total_files,
            approved,
            s.failed_files,
            bold(&csv.display().to_string()),
        );
        eprintln!(
            "   {} tokens in  /  {} tokens out  —  {} (batch price)",
            dim(&s.total_input_tokens.to_string()),
            dim(&s.total_output_tokens.to_string()),
            format_cost(s.estimated_cost_usd),
        );
        let dir = batch::load_manifest(output, id)
            .map(|m| m.directory.display().to_string())
            .unwrap_or_else(|| "<DIR>".to_string());
        eprintln!(
            "\nReview the CSV, then run:\n  {}",
            cyan(&format!("ocr-rename rename {} --dir {}", csv.display(), dir))
        );
    }
    Ok(())
}

// ── rename / undo ───────────────────────────────────────────────────────────

fn run_rename(csv: &Path, dir: &Path, dry_run: bool, output: &Path, quiet: bool) -> Result<()> {
    let entries = review::read_review_csv(csv)
        .with_context(|| format!("Failed to read review CSV {}", csv.display()))?;
    let report = rename::rename_files(dir, &entries, dry_run, output).context("Rename failed")?;

    if quiet {
        return Ok(());
    }

    for e in &report.log {
        let mark = match e.status {
            RenameStatus::Renamed => green("✓"),
            RenameStatus::DryRun => cyan("→"),
            RenameStatus::Pending => dim("·"),
            RenameStatus::Error(_) => red("✗"),
        };
        let suffix = match e.status {
            RenameStatus::Error(ref msg) => format!("  {}", red(msg)),
            _ => String::new(),
        };
        println!("  {mark} {}  →  {}{suffix}", e.original, e.new);
    }
    for s in &report.skipped {
        println!("  {} {}  {}", yellow("–"), s.original, dim(&format!("({})", s.reason)));
    }

    if dry_run {
        eprintln!(
            "\n{} {} would be renamed, {} skipped",
            cyan("[dry run]"),
            report.log.len(),
            report.skipped.len()
        );
    } else {
        eprintln!(
            "\n{} renamed, {} skipped, {} errors",
            bold(&report.renamed.to_string()),
            report.skipped.len(),
            report.errors
        );
        if let Some(ref path) = report.log_path {
            eprintln!(
                "Undo with:\n  {}",
                cyan(&format!(
                    "ocr-rename undo {} --dir {}",
                    path.display(),
                    dir.display()
                ))
            );
        }
    }
    Ok(())
}

fn run_undo(log_path: &Path, dir: &Path, dry_run: bool, quiet: bool) -> Result<()> {
    let log = rename::read_log(log_path)
        .with_context(|| format!("Failed to read rename log {}", log_path.display()))?;

    if dry_run {
        let preview = rename::preview_undo(&log);
        if !quiet {
            for e in &preview {
                println!("  {} {}  →  {}", cyan("→"), e.new, e.original);
            }
            eprintln!("\n{} {} would be restored", cyan("[dry run]"), preview.len());
        }
        return Ok(());
    }

    let report = rename::apply_undo(&log, dir).context("Undo failed")?;
    if !quiet {
        for e in &report.reversed {
            println!("  {} {}  →  {}", green("✓"), e.new, e.original);
        }
        for s in &report.skipped {
            println!("  {} {}  {}", yellow("–"), s.new, dim(&format!("({})", s.reason)));
        }
        for (e, msg) in &report.errors {
            println!("  {} {}  {}", red("✗"), e.new, red(msg));
        }
        eprintln!(
            "\n{} reversed, {} skipped, {} errors",
            bold(&report.reversed.len().to_string()),
            report.skipped.len(),
            report.errors.len()
        );
    }
    Ok(())
}
