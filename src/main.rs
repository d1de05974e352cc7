use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use worklog::batch::{self, BatchOptions, BatchReport};
use worklog::config::{self, WorklogConfig};
use worklog::enrich::{Enricher, GatewayClient};
use worklog::models::{ProcessResult, SessionIndexEntry};
use worklog::pipeline::Pipeline;
use worklog::publish::Publisher;
use worklog::source::SessionStore;
use worklog::state::HighWaterMarks;

#[derive(Parser)]
#[command(name = "worklog", version, about = "Publish coding-assistant sessions as worklog documents")]
struct Cli {
    /// Path to config file (default: ~/.worklog/worklog.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Custom session store base directory
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Custom high-water-mark state file (default: ~/.worklog/state.json)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process all sessions modified since the last run and publish them
    Run {
        /// Worker pool size
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Process a single session for one project
    Session {
        /// Project path as the assistant tool records it
        #[arg(long)]
        project: String,

        /// Session id or unique id prefix (defaults to the latest eligible session)
        #[arg(long)]
        id: Option<String>,

        /// Stop after formatting and print the Markdown instead of publishing
        #[arg(long)]
        dry_run: bool,
    },

    /// Write a default config file to ~/.worklog/worklog.toml
    Init,
}

fn main() {
    let cli = Cli::parse();

    // Load config before tracing init so log_level from config works.
    let cfg = match config::load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config: {e:#}");
            std::process::exit(1);
        }
    };

    // Priority: RUST_LOG env > config file log_level > "info"
    let log_level = cfg.resolved_log_level().to_string();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    match cli.command {
        Commands::Init => run_init(),
        Commands::Run { workers } => run_batch_cmd(&cli, &cfg, workers),
        Commands::Session {
            ref project,
            ref id,
            dry_run,
        } => run_session_cmd(&cli, &cfg, project, id.as_deref(), dry_run),
    }
}

fn run_init() {
    let path = config::default_config_path();
    if path.exists() {
        eprintln!("config file already exists: {}", path.display());
        std::process::exit(1);
    }
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("failed to create directory {}: {e}", parent.display());
            std::process::exit(1);
        }
    }
    let template = include_str!("config_template.toml");
    if let Err(e) = std::fs::write(&path, template) {
        eprintln!("failed to write config file: {e}");
        std::process::exit(1);
    }
    println!("wrote default config to {}", path.display());
}

fn resolve_state_path(cli: &Cli) -> PathBuf {
    cli.state
        .clone()
        .unwrap_or_else(config::default_state_path)
}

/// Assemble the pipeline from validated configuration. Config problems are
/// fatal here, before any session is touched.
fn build_pipeline(cli: &Cli, cfg: &WorklogConfig) -> Pipeline {
    let base_dir = cli
        .base_dir
        .clone()
        .unwrap_or_else(|| cfg.resolved_session_base());

    let gateway = match GatewayClient::new(&cfg.enrichment.url, &cfg.enrichment.api_key) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to build LLM client: {e}");
            std::process::exit(1);
        }
    };
    let publisher = match Publisher::new(&cfg.memory.url, &cfg.memory.api_key) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("failed to build publisher: {e}");
            std::process::exit(1);
        }
    };

    Pipeline {
        store: SessionStore::new(base_dir),
        sanitization: cfg.sanitization.clone(),
        enricher: Enricher::new(Arc::new(gateway), cfg.enrichment.model.clone()),
        publisher,
    }
}

fn validate_or_exit(cli: &Cli, cfg: &WorklogConfig) {
    // A --base-dir override substitutes for the configured directory check.
    let mut effective = cfg.clone();
    if let Some(base) = &cli.base_dir {
        effective.session_paths.claude_code = base.to_string_lossy().into_owned();
    }
    if let Err(e) = effective.validate() {
        eprintln!("invalid configuration: {e:#}");
        std::process::exit(1);
    }
}

fn run_batch_cmd(cli: &Cli, cfg: &WorklogConfig, workers: Option<usize>) {
    validate_or_exit(cli, cfg);
    let pipeline = build_pipeline(cli, cfg);
    let state_path = resolve_state_path(cli);

    let mut marks = match HighWaterMarks::load(&state_path) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("failed to load state: {e:#}");
            std::process::exit(1);
        }
    };

    let options = BatchOptions {
        workers: workers.unwrap_or(cfg.concurrency.workers),
        cancel_flag: Some(Arc::new(AtomicBool::new(false))),
    };

    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    rt.block_on(async {
        if let Some(flag) = options.cancel_flag.clone() {
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("cancellation requested, draining in-flight sessions");
                    flag.store(true, Ordering::Relaxed);
                }
            });
        }

        let started = std::time::Instant::now();
        match batch::run_batch(&pipeline, &marks, &options).await {
            Ok(outcome) => {
                for result in &outcome.results {
                    print_result(result);
                }
                let report = BatchReport::from_results(
                    &outcome.results,
                    outcome.results.len(),
                    started.elapsed().as_secs_f64(),
                );
                print!("{report}");

                if outcome.cancelled {
                    eprintln!("batch cancelled; high-water marks left unchanged");
                    return;
                }
                for (project, modified) in &outcome.high_water {
                    marks.advance(project, modified);
                }
                if let Err(e) = marks.save(&state_path) {
                    eprintln!("failed to save state: {e:#}");
                    std::process::exit(1);
                }
            }
            Err(e) => {
                eprintln!("batch failed: {e:#}");
                std::process::exit(1);
            }
        }
    });
}

fn run_session_cmd(
    cli: &Cli,
    cfg: &WorklogConfig,
    project: &str,
    id: Option<&str>,
    dry_run: bool,
) {
    validate_or_exit(cli, cfg);
    let pipeline = build_pipeline(cli, cfg);

    let entry = match resolve_entry(&pipeline.store, project, id) {
        Some(entry) => entry,
        None => {
            eprintln!("session not found");
            std::process::exit(1);
        }
    };

    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    rt.block_on(async {
        if dry_run {
            match pipeline.evaluate_session(&entry).await {
                Ok((_, _, markdown)) => println!("{markdown}"),
                Err(reason) => {
                    eprintln!("session skipped: {reason}");
                    std::process::exit(1);
                }
            }
            return;
        }

        let result = pipeline.process_session(&entry).await;
        print_result(&result);
        if !result.published {
            std::process::exit(1);
        }
    });
}

fn resolve_entry(
    store: &SessionStore,
    project: &str,
    id: Option<&str>,
) -> Option<SessionIndexEntry> {
    let resolved = match id {
        Some(id) => store.session_by_id(project, id),
        None => store.latest_session(project),
    };
    match resolved {
        Ok(entry) => entry,
        Err(e) => {
            eprintln!("failed to read session index: {e:#}");
            std::process::exit(1);
        }
    }
}

fn print_result(result: &ProcessResult) {
    if result.published {
        let kind = if result.is_significant {
            "significant"
        } else {
            "context-only"
        };
        println!(
            "published {} ({}): {}",
            result.session_id,
            kind,
            result.summary.as_deref().unwrap_or("")
        );
    } else {
        println!(
            "skipped   {} ({}): {}",
            result.session_id,
            result.project,
            result.skipped_reason.as_deref().unwrap_or("unknown")
        );
    }
}
