//! # Context Sweep CLI (`sweep`)
//!
//! ## Usage
//!
//! ```bash
//! sweep --config ./config/sweep.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sweep run <file> --query "<q>"` | Analyze a document against a query |
//! | `sweep plan <file>` | Show the chunk plan without analyzing anything |
//! | `sweep detect <file>` | Show the detected content type and boundaries |
//!
//! ## Examples
//!
//! ```bash
//! # Offline dry run with the keyword analyzer
//! sweep run ./incident.log --query "why did the deploy fail" --analyzer keyword
//!
//! # Full run against OpenAI, JSON output, per-chunk records saved
//! OPENAI_API_KEY=... sweep run ./handbook.md -q "How are secrets rotated?" \
//!     --format json --records ./records.jsonl
//!
//! # Inspect how a file would be chunked
//! sweep plan ./export.json --size 20000
//! ```
//!
//! Logs go to stderr and are controlled with `RUST_LOG`
//! (default `warn,context_sweep=info`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use context_sweep::analyzer::create_analyzer;
use context_sweep::boundary::find_boundaries;
use context_sweep::config::{load_config_or_default, Config};
use context_sweep::models::{ContentType, Document};
use context_sweep::planner::{chunk_size_for, ChunkPlanner};
use context_sweep::progress::ProgressMode;
use context_sweep::report::{render_json, render_text, write_records};
use context_sweep::synthesis::SynthesisResult;
use context_sweep::Engine;

const DEFAULT_CONFIG: &str = "./config/sweep.toml";

/// Context Sweep CLI: wave-scheduled analysis of large documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sweep.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "sweep",
    about = "Context Sweep: analyze documents larger than a context window against a query",
    version,
    long_about = "Context Sweep cuts a document into boundary-respecting chunks, analyzes them \
    in small concurrent waves, adapts chunk sizes to observed latency, and merges the findings \
    into one answer with explicit gaps and conflicts."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/sweep.toml`. When the default file does not
    /// exist, built-in defaults are used.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Analyze a document against a query.
    ///
    /// Chunks are analyzed in waves; the run stops early once the
    /// accumulated findings answer the query. Ctrl-C stops dispatch after
    /// the wave in flight and prints the partial result.
    Run {
        /// Document to analyze.
        file: PathBuf,

        /// The question to answer from the document.
        #[arg(long, short)]
        query: String,

        /// Override content type detection (`structured-record`,
        /// `heading-sectioned`, `timestamped-log`, `code`, `plain-text`).
        #[arg(long)]
        content_type: Option<String>,

        /// Chunks analyzed concurrently per wave.
        #[arg(long)]
        wave_size: Option<usize>,

        /// Analyze at most this many chunks.
        #[arg(long)]
        max_chunks: Option<usize>,

        /// Analyzer provider: `keyword`, `openai`, `ollama`, or `disabled`.
        #[arg(long)]
        analyzer: Option<String>,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Write per-chunk result records (JSON Lines) to this path.
        #[arg(long)]
        records: Option<PathBuf>,

        /// Progress on stderr. Defaults to `human` when stderr is a
        /// terminal, otherwise `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Show the chunk plan for a document without analyzing it.
    Plan {
        /// Document to plan.
        file: PathBuf,

        /// Override content type detection.
        #[arg(long)]
        content_type: Option<String>,

        /// Target chunk size in bytes. Defaults to the content type's
        /// initial size, clamped to the configured bounds.
        #[arg(long)]
        size: Option<usize>,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Detect a document's content type and structural boundaries.
    Detect {
        /// Document to inspect.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,context_sweep=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let required = cli.config != Path::new(DEFAULT_CONFIG);
    let config = load_config_or_default(&cli.config, required)?;

    match cli.command {
        Commands::Run {
            file,
            query,
            content_type,
            wave_size,
            max_chunks,
            analyzer,
            format,
            records,
            progress,
        } => {
            let document = load_document(&file, content_type.as_deref())?;
            run_sweep(
                config,
                &document,
                &query,
                RunOverrides {
                    wave_size,
                    max_chunks,
                    analyzer,
                    progress,
                },
                format,
                records.as_deref(),
            )
            .await?;
        }
        Commands::Plan {
            file,
            content_type,
            size,
            format,
        } => {
            let document = load_document(&file, content_type.as_deref())?;
            print_plan(&config, &document, size, format)?;
        }
        Commands::Detect { file } => {
            let document = load_document(&file, None)?;
            let boundaries = find_boundaries(document.text(), document.content_type());
            println!("content type: {}", document.content_type());
            println!("bytes: {}", document.len());
            println!("boundaries: {}", boundaries.len());
            println!(
                "initial chunk size: {}",
                chunk_size_for(document.content_type())
            );
        }
    }

    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

struct RunOverrides {
    wave_size: Option<usize>,
    max_chunks: Option<usize>,
    analyzer: Option<String>,
    progress: Option<ProgressMode>,
}

async fn run_sweep(
    mut config: Config,
    document: &Document,
    query: &str,
    overrides: RunOverrides,
    format: OutputFormat,
    records: Option<&Path>,
) -> Result<()> {
    if let Some(provider) = overrides.analyzer {
        config.analyzer.provider = provider;
        config.analyzer.validate()?;
    }
    let mut engine_config = config.engine.to_engine_config();
    if let Some(wave_size) = overrides.wave_size {
        engine_config.wave_size = wave_size;
    }
    if let Some(max_chunks) = overrides.max_chunks {
        engine_config.max_chunks = Some(max_chunks);
    }

    let progress = overrides
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty);

    let analyzer = create_analyzer(&config.analyzer)?;
    let engine = Engine::new(engine_config, analyzer).with_progress(progress.reporter());
    let ctrl_c = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted: finishing the current wave...");
            ctrl_c.cancel();
        }
    });

    match engine.run(document, query).await {
        Ok(run) => {
            if let Some(path) = records {
                write_records(path, &run.results)?;
            }
            print_synthesis(&run.synthesis, format)
        }
        Err(e) => {
            let Some(partial) = e.partial() else {
                return Err(e.into());
            };
            print_synthesis(partial, format)?;
            eprintln!("{}.", e);
            std::process::exit(130);
        }
    }
}

fn print_synthesis(result: &SynthesisResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", render_json(result)?),
        OutputFormat::Text => print!("{}", render_text(result)),
    }
    Ok(())
}

fn print_plan(
    config: &Config,
    document: &Document,
    size: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let engine = config.engine.to_engine_config();
    let target = size.unwrap_or_else(|| engine.bounds.clamp(chunk_size_for(document.content_type())));
    let chunks = ChunkPlanner::new(document)
        .with_overlap(engine.overlap)
        .plan_all(target);

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
        return Ok(());
    }

    println!(
        "{} chunks for {} bytes of {} at target {}",
        chunks.len(),
        document.len(),
        document.content_type(),
        target
    );
    for chunk in &chunks {
        println!(
            "  #{:<4} {:>10}..{:<10} {:>8} bytes  {:?}",
            chunk.id,
            chunk.start,
            chunk.end,
            chunk.len(),
            chunk.boundary
        );
    }
    Ok(())
}

/// Read a document, taking its content type from the flag, the file
/// extension, or the text itself, in that order.
fn load_document(path: &Path, content_type: Option<&str>) -> Result<Document> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read document: {}", path.display()))?;

    if let Some(name) = content_type {
        return Ok(Document::new(text, name.parse::<ContentType>()?));
    }
    let from_extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(ContentType::from_extension);
    Ok(match from_extension {
        Some(content_type) => Document::new(text, content_type),
        None => Document::inferred(text),
    })
}
