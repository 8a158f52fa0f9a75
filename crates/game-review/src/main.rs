use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use chess_analysis::{
    CachedEvaluator, EvaluationCache, GameAnalyzer, ProcessLauncher, RulesEngine, StandardRules, WorkerPool,
};
use clap::{Parser, Subcommand};
use game_review::config::ReviewConfig;
use game_review::storage::{SqliteEvaluationStore, SqliteStatisticsStore};
use game_review::{json_output, pgn, review};
use tokio::signal;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "game-review")]
#[command(about = "Annotate chess games with engine analysis")]
struct Cli {
    /// Configuration file (defaults to ./game-review.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze every game in a PGN file
    Analyze {
        /// PGN file to read
        pgn: PathBuf,
        /// Annotated PGN destination (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// JSON report destination
        #[arg(long)]
        json: Option<PathBuf>,
        /// Search depth, overriding the configuration
        #[arg(short, long)]
        depth: Option<u32>,
        /// Number of engine processes, overriding the configuration
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Trim the evaluation cache to its newest entries
    Prune {
        /// Entries to keep (defaults to storage.max_cache_entries)
        #[arg(long)]
        max_entries: Option<usize>,
    },
    /// Show opening statistics for a position
    Stats {
        /// Position in FEN
        fen: String,
    },
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = ReviewConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(cli.log_level.as_deref().unwrap_or(&config.log_level));

    match cli.command {
        Commands::Analyze { pgn, output, json, depth, workers } => {
            if let Some(depth) = depth {
                config.analysis.depth = depth;
                config.analysis.movetime_ms = None;
            }
            if let Some(workers) = workers {
                config.pool.size = workers;
            }
            config.validate().context("Invalid command line overrides")?;
            analyze(&config, &pgn, output.as_deref(), json.as_deref()).await
        }
        Commands::Prune { max_entries } => {
            let store = SqliteEvaluationStore::open(&config.storage.database)
                .with_context(|| format!("Failed to open {}", config.storage.database.display()))?;
            let removed = store.prune(max_entries.unwrap_or(config.storage.max_cache_entries))?;
            println!("Removed {} cached evaluations, {} remain", removed, store.len()?);
            Ok(())
        }
        Commands::Stats { fen } => {
            let position = StandardRules.parse_fen(&fen)?;
            let store = SqliteStatisticsStore::open(&config.storage.database)
                .with_context(|| format!("Failed to open {}", config.storage.database.display()))?;
            match store.position_stats(position.key())? {
                Some(stats) => println!("{}", serde_json::to_string_pretty(&stats)?),
                None => println!("No statistics recorded for {}", position.key()),
            }
            Ok(())
        }
    }
}

async fn analyze(config: &ReviewConfig, path: &Path, output: Option<&Path>, json: Option<&Path>) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let rules: Arc<dyn RulesEngine> = Arc::new(StandardRules);
    let games = review::load_games(&text, rules.as_ref())?;
    tracing::info!("Loaded {} games from {}", games.len(), path.display());
    if games.is_empty() {
        return Ok(());
    }

    ensure_parent_dir(&config.storage.database)?;
    let evaluations = Arc::new(SqliteEvaluationStore::open(&config.storage.database)?);
    let statistics = Arc::new(SqliteStatisticsStore::open(&config.storage.database)?);

    let pool = WorkerPool::start(ProcessLauncher::new(&config.engine.path), config.pool_config())
        .await
        .with_context(|| format!("Failed to start engine {}", config.engine.path.display()))?;
    let evaluator = Arc::new(CachedEvaluator::new(EvaluationCache::with_store(evaluations.clone()), Arc::new(pool.clone())));

    // Shutdown flag
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, finishing current plies");
            cancel_clone.store(true, Ordering::SeqCst);
        }
    });

    let (events, progress) = mpsc::unbounded_channel();
    let logger = review::spawn_progress_logger(progress);
    let analyzer = GameAnalyzer::new(evaluator.clone(), rules.clone(), config.analysis_config())?
        .with_sink(statistics)
        .with_events(events);

    let results = review::analyze_games(&analyzer, &games, config.analysis.concurrent_games, &cancel).await;
    drop(analyzer);
    logger.await.ok();

    let mut analyzed = Vec::with_capacity(results.len());
    for (input, result) in games.iter().zip(results) {
        match result {
            Ok(game) => analyzed.push(game),
            Err(e) => tracing::error!(game = %input.info.id, error = %e, "Analysis failed"),
        }
    }

    let annotated: String = analyzed
        .iter()
        .map(|game| pgn::write_annotated(game, rules.as_ref()))
        .collect::<Vec<_>>()
        .join("\n");
    match output {
        Some(path) => {
            std::fs::write(path, annotated).with_context(|| format!("Failed to write {}", path.display()))?
        }
        None => print!("{}", annotated),
    }
    if let Some(path) = json {
        json_output::write_report(path, &analyzed, evaluator.cache().stats())
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    for game in &analyzed {
        eprintln!("{}", review::describe(game));
    }
    let stats = evaluator.cache().stats();
    tracing::info!(
        hits = stats.hits,
        store_hits = stats.store_hits,
        computed = stats.computed,
        "Evaluation cache"
    );

    match evaluations.prune(config.storage.max_cache_entries) {
        Ok(0) => {}
        Ok(removed) => tracing::info!("Pruned {} cached evaluations", removed),
        Err(e) => tracing::warn!("Failed to prune evaluation cache: {}", e),
    }
    pool.shutdown().await;
    Ok(())
}
