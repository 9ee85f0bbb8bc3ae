//! CLI binary for pdfmd.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionConfig`, renders progress, and prints a result summary.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdfmd::{
    convert_to_file, find_profile, inspect, ConversionConfig, ConversionOutcome,
    ConversionProgress, ConversionTracker, StrategyKind,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
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

// ── CLI progress observer using indicatif ────────────────────────────────────

/// Terminal progress observer: a spinner while the document type is being
/// detected, then a page-count progress bar once a conversion routine starts.
/// Lifecycle events (detection, normalisation, review) print above the bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    /// Create an observer whose progress-bar length is set dynamically by
    /// `on_conversion_start` (called before any pages are processed).
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_conversion_start

        // Initial style: spinner only (no counter until we know the total).
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Analysing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }

    /// Switch to the full progress-bar style once we know `total`.
    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
    }

    /// Remove the bar from the terminal. Safe to call more than once.
    fn clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl ConversionProgress for CliProgress {
    fn on_type_detected(&self, pdf_type: &str, total_pages: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{pdf_type} PDF · {total_pages} pages"))
        ));
        self.bar.set_message("choosing strategy…");
    }

    fn on_conversion_start(&self, strategy: &str, total_pages: usize) {
        // Switch from spinner-only style to a full progress bar now that
        // the routine and the page count are known.
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{strategy} conversion of {total_pages} pages…"))
        ));
    }

    fn on_page_complete(&self, page_num: usize, _total_pages: usize) {
        self.bar.set_message(format!("page {page_num}"));
        self.bar.inc(1);
    }

    fn on_normalized(&self, changes: usize, fidelity_score: f32) {
        self.bar.println(format!(
            "  {} normalised  {}",
            green("✓"),
            dim(&format!("{changes} edits · fidelity {fidelity_score:.1}%")),
        ));
    }

    fn on_validated(&self, quality_score: Option<f64>) {
        let detail = match quality_score {
            Some(score) => format!("score {score:.1}"),
            None => "no score reported".to_string(),
        };
        self.bar
            .println(format!("  {} reviewed  {}", green("✓"), dim(&detail)));
    }

    fn on_complete(&self, _elapsed_ms: u64) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Basic conversion (writes document.md next to the input)
  pdfmd document.pdf

  # Choose the output path
  pdfmd thesis.pdf -o out/thesis.md

  # Force OCR for a scan that slips past detection
  pdfmd --strategy ocr scanned-notes.pdf

  # Classify without converting (prints the report as JSON)
  pdfmd --inspect document.pdf

  # Re-convert even though this exact file content was converted before
  pdfmd --force document.pdf

  # Use the IEEE profile (also selects its OCR languages)
  pdfmd --profile engineering_ieee paper.pdf

  # Conversion history of a tracker database
  pdfmd --stats --db conversions.db

PROFILES:
  academic_apa        APA style, social sciences and psychology
  medical_vancouver   Vancouver style, medical research
  engineering_ieee    IEEE style, engineering and computer science
  book_chapters       Long-form books and theses
  legal_documents     Legal filings and contracts

ENVIRONMENT VARIABLES:
  PDFMD_DB            Tracker database path (same as --db)
  PDFMD_OLLAMA_URL    Ollama endpoint for the quality review
  PDFMD_OLLAMA_MODEL  Ollama model for the quality review
  RUST_LOG            Tracing filter override (e.g. pdfmd=debug)

NOTES:
  Text extraction uses the pdfium library, loaded at runtime from the
  system library path or from ./libpdfium in the working directory.

  The quality review is optional. When no Ollama server is reachable the
  conversion still succeeds and the review is skipped with a warning;
  use --no-validate to skip the probe entirely.
"#;

/// Convert academic PDF documents to Markdown.
#[derive(Parser, Debug)]
#[command(
    name = "pdfmd",
    version,
    about = "Adaptive PDF to Markdown conversion for academic documents",
    long_about = "Convert academic PDF documents to clean, well-structured Markdown. The \
document type (native text, scanned, or mixed) is detected up front and the conversion \
strategy chosen to match; headings are rebuilt into a consistent hierarchy, and every run \
is recorded in a SQLite tracker so the same file content is never converted twice.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF file to convert.
    #[arg(required_unless_present = "stats")]
    input: Option<PathBuf>,

    /// Write Markdown here instead of next to the input.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip type detection and force a conversion strategy.
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Sample only the first pages during type detection.
    #[arg(long)]
    quick: bool,

    /// Re-convert even if this exact file content was converted before.
    #[arg(long)]
    force: bool,

    /// Skip Markdown normalisation (keep the raw extraction output).
    #[arg(long)]
    no_normalize: bool,

    /// Skip the Ollama quality review.
    #[arg(long)]
    no_validate: bool,

    /// Classify the PDF and print the report as JSON, without converting.
    #[arg(long)]
    inspect: bool,

    /// Tracker database path.
    #[arg(long, env = "PDFMD_DB",
          long_help = "Tracker database path. Defaults to conversions.db next to the \
          output (or next to the input when no output path is given).")]
    db: Option<PathBuf>,

    /// Conversion profile (see PROFILES below).
    #[arg(long)]
    profile: Option<String>,

    /// Archive a copy of the input into this directory before converting.
    #[arg(long)]
    originals_dir: Option<PathBuf>,

    /// Ollama endpoint for the quality review.
    #[arg(long, env = "PDFMD_OLLAMA_URL", default_value = "http://localhost:11434")]
    ollama_url: String,

    /// Ollama model for the quality review.
    #[arg(long, env = "PDFMD_OLLAMA_MODEL", default_value = "gemma3:12b")]
    ollama_model: String,

    /// Print tracker statistics and exit.
    #[arg(long)]
    stats: bool,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    /// Direct text extraction with structure reconstruction.
    Native,
    /// Optical character recognition of rendered pages.
    Ocr,
    /// Extractable text plus image regions.
    Hybrid,
}

impl From<StrategyArg> for StrategyKind {
    fn from(v: StrategyArg) -> Self {
        match v {
            StrategyArg::Native => StrategyKind::Native,
            StrategyArg::Ocr => StrategyKind::Ocr,
            StrategyArg::Hybrid => StrategyKind::Hybrid,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs while the progress bar is active;
    // the bar and its event lines carry the same information.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.inspect && !cli.stats;
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

    // ── Stats mode ───────────────────────────────────────────────────────
    if cli.stats {
        return print_stats(cli.db.as_deref());
    }

    // clap enforces this (required_unless_present = "stats").
    let input = match cli.input {
        Some(ref p) => p.clone(),
        None => anyhow::bail!("missing <INPUT>"),
    };

    // ── Inspect mode ─────────────────────────────────────────────────────
    if cli.inspect {
        let config = ConversionConfig::builder()
            .quick_detection(cli.quick)
            .build()
            .context("Invalid configuration")?;
        let report = inspect(&input, &config)
            .await
            .context("Failed to inspect PDF")?;
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
        return Ok(());
    }

    // ── Build config and run ─────────────────────────────────────────────
    // The progress bar starts as a spinner (no page count yet);
    // `on_conversion_start` resizes it once the document has been analysed.
    let progress = if show_progress {
        Some(CliProgress::new_dynamic())
    } else {
        None
    };

    let config = build_config(&cli, progress.clone())?;
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| input.with_extension("md"));

    let result = convert_to_file(&input, &output, &config).await;

    // On success `on_complete` already cleared the bar; on failure it is
    // still ticking and would garble the error message.
    if let Some(ref p) = progress {
        p.clear();
    }
    let outcome = result.context("Conversion failed")?;

    if !cli.quiet {
        print_summary(&outcome, &output);
    }

    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<Arc<CliProgress>>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .quick_detection(cli.quick)
        .normalize(!cli.no_normalize)
        .validate(!cli.no_validate)
        .force(cli.force)
        .ollama_url(&cli.ollama_url)
        .ollama_model(&cli.ollama_model);

    if let Some(kind) = cli.strategy {
        builder = builder.strategy(kind.into());
    }
    if let Some(ref name) = cli.profile {
        builder = builder.profile(name);
        // The profile bundle also knows which OCR languages to load;
        // unknown names are rejected by `build()` below.
        if let Some(p) = find_profile(name) {
            builder = builder.ocr_languages(p.ocr_languages.iter().copied());
        }
    }
    if let Some(ref db) = cli.db {
        builder = builder.db_path(db);
    }
    if let Some(ref dir) = cli.originals_dir {
        builder = builder.originals_dir(dir);
    }
    if let Some(obs) = progress {
        builder = builder.progress(obs as Arc<dyn ConversionProgress>);
    }

    builder.build().context("Invalid configuration")
}

/// Result summary on stderr (the markdown itself went to `output`).
fn print_summary(outcome: &ConversionOutcome, output: &Path) {
    if outcome.duplicate {
        eprintln!(
            "{} {}  {}",
            cyan("↺"),
            bold("duplicate content — reused the earlier conversion"),
            dim(&match outcome.conversion_id {
                Some(id) => format!("(record #{id})"),
                None => String::new(),
            }),
        );
    }

    let tick = if outcome.warnings.is_empty() {
        green("✔")
    } else {
        cyan("⚠")
    };
    let strategy = match outcome.strategy {
        Some(s) => s.to_string(),
        None => "unknown".to_string(),
    };
    eprintln!(
        "{}  {} · {} · {} pages · {:.1}s  →  {}",
        tick,
        bold(&outcome.pdf_type.to_string()),
        strategy,
        outcome.pages,
        outcome.elapsed_ms as f64 / 1000.0,
        bold(&output.display().to_string()),
    );

    if outcome.tables_extracted > 0 {
        eprintln!(
            "   {}",
            dim(&format!("{} tables extracted", outcome.tables_extracted))
        );
    }
    if let Some(ref f) = outcome.fidelity {
        eprintln!(
            "   {}",
            dim(&format!(
                "fidelity {:.1}% · {} normaliser edits",
                f.fidelity_score,
                outcome.changes.len()
            ))
        );
    }
    if let Some(ref v) = outcome.validation {
        match v.quality_score() {
            Some(score) => eprintln!("   {}", dim(&format!("review score {score:.1}"))),
            None => eprintln!("   {}", dim("review returned no score")),
        }
    }
    for w in &outcome.warnings {
        eprintln!("   {} {}", cyan("⚠"), w.message());
    }
}

/// Print tracker statistics for `--stats`.
fn print_stats(db: Option<&Path>) -> Result<()> {
    let path = db
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("conversions.db"));
    let tracker = ConversionTracker::open(&path)
        .with_context(|| format!("Failed to open tracker database {}", path.display()))?;
    let stats = tracker
        .statistics()
        .context("Failed to read tracker statistics")?;

    println!("{}", bold(&format!("Tracker {}", path.display())));
    println!("Conversions:       {}", stats.total_conversions);
    for (status, count) in &stats.by_status {
        println!("  {status:<16} {count}");
    }
    match stats.average_fidelity {
        Some(avg) => println!("Average fidelity:  {avg:.1}%"),
        None => println!("Average fidelity:  n/a"),
    }
    println!("Total pages:       {}", stats.total_pages);
    println!("Total size:        {:.1} MB", stats.total_size_mb);
    println!("With tables:       {}", stats.with_tables);
    println!("Scanned PDFs:      {}", stats.scanned_pdfs);

    Ok(())
}
