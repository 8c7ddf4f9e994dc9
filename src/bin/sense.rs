#![forbid(unsafe_code)]

use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sense_harness::cache::SqliteCorpusCache;
use sense_harness::config::{self, Config};
use sense_harness::corpus::prepare_corpus;
use sense_harness::desk::{AnnotationDesk, DeskOptions, InboundEvent};
use sense_harness::recorder::TsvJudgmentRecorder;
use sense_harness::session::{RegistryOptions, SessionRegistry};

#[derive(Parser)]
#[command(name = "sense", version, about = "Answer-meaningfulness annotation harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build (or load cached) the finalized item collection and print its makeup
    Prepare {
        /// TOML config file; defaults apply when omitted
        #[arg(long, env = "SENSE_CONFIG")]
        config: Option<PathBuf>,
        /// Override the upstream export path
        #[arg(long)]
        source: Option<PathBuf>,
        /// Ignore any cached collection and derive a fresh one
        #[arg(long)]
        rebuild: bool,
    },
    /// Serve annotation sessions over newline-delimited JSON on stdin/stdout
    Serve {
        #[arg(long, env = "SENSE_CONFIG")]
        config: Option<PathBuf>,
        #[arg(long)]
        source: Option<PathBuf>,
        /// Judgment TSV path (overrides output.path)
        #[arg(long, env = "SENSE_OUTPUT")]
        output: Option<PathBuf>,
        #[arg(long)]
        rebuild: bool,
    },
    /// Keep only the most recently used cached collections
    CachePrune {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        max_rows: usize,
    },
}

fn load_config(
    path: Option<PathBuf>,
    source: Option<PathBuf>,
) -> Result<Config, Box<dyn std::error::Error>> {
    let mut cfg = match path {
        Some(path) => config::load(&path)?,
        None => Config::default(),
    };
    if let Some(source) = source {
        cfg.source.path = source;
    }
    Ok(cfg)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Prepare {
            config,
            source,
            rebuild,
        } => {
            let cfg = load_config(config, source)?;
            let corpus = prepare_corpus(&cfg, rebuild)?;
            for (operator, count) in corpus.operator_counts() {
                println!("{operator}\t{count}");
            }
            println!("total\t{}", corpus.len());
        }
        Commands::Serve {
            config,
            source,
            output,
            rebuild,
        } => {
            let cfg = load_config(config, source)?;
            let corpus = prepare_corpus(&cfg, rebuild)?;

            let output_path = output.unwrap_or_else(|| cfg.output.resolved_path(Utc::now()));
            let recorder =
                TsvJudgmentRecorder::open(&output_path, cfg.output.resolved_columns(cfg.mode))?;
            info!(path = %recorder.path().display(), "recording judgments");

            let registry = SessionRegistry::new(
                corpus.items.clone(),
                RegistryOptions {
                    handle_retention: cfg.session.handle_retention,
                    rng_seed: cfg.rng_seed,
                },
            )?;
            let desk = AnnotationDesk::new(
                registry,
                recorder,
                DeskOptions {
                    progress_every: cfg.session.progress_every,
                    greeting: cfg.session.greeting.clone(),
                    mask_digits: cfg.session.mask_digits,
                },
            );
            serve(desk).await?;
        }
        Commands::CachePrune { db, max_rows } => {
            if max_rows == 0 {
                return Err("--max-rows must be >= 1".into());
            }
            let path = db.unwrap_or_else(SqliteCorpusCache::default_path);
            let cache = SqliteCorpusCache::new(path)?;
            let _lock = cache.lock_exclusive()?;
            let stats = cache.prune(max_rows)?;
            println!(
                "pruned {} collections; {} remain",
                stats.deleted, stats.remaining
            );
        }
    }

    Ok(())
}

/// One event at a time: read a line, dispatch it, write every reply.
async fn serve(
    mut desk: AnnotationDesk<TsvJudgmentRecorder>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let event: InboundEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "ignoring malformed event");
                continue;
            }
        };
        for reply in desk.handle(event)? {
            let mut out = serde_json::to_string(&reply)?;
            out.push('\n');
            stdout.write_all(out.as_bytes()).await?;
        }
        stdout.flush().await?;
    }

    info!(
        sessions = desk.registry().session_count(),
        outstanding = desk.registry().outstanding(),
        "input closed; shutting down"
    );
    Ok(())
}
