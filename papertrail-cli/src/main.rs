//! papertrail CLI: live paper trading, state inspection and export.
//!
//! Commands:
//! - `run`: stream ticks into the engine until Ctrl-C, persisting state
//! - `status`: summarize the persisted state of a store directory
//! - `export`: write the persisted trade log as CSV
//! - `init-config`: write a starter TOML config

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use papertrail_core::{Engine, EngineConfig};
use papertrail_runner::feed;
use papertrail_runner::{
    init_tracing, write_trades_csv, AppConfig, EngineService, FeedKind, JsonFileStore,
    MemoryStore, StateStore,
};

const DEFAULT_LOG: &str = "papertrail=info,info";

#[derive(Parser)]
#[command(name = "papertrail", about = "papertrail: paper-trading decision engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine against a live or simulated tick feed until Ctrl-C.
    Run {
        /// Path to a TOML config file.
        #[arg(long, default_value = "papertrail.toml")]
        config: PathBuf,

        /// State directory; overrides `[store] dir`.
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Keep state in memory only.
        #[arg(long, default_value_t = false)]
        ephemeral: bool,

        /// Use the simulated feed regardless of `[feed] kind`.
        #[arg(long, default_value_t = false)]
        simulated: bool,

        /// Seconds between dashboard log lines.
        #[arg(long, default_value_t = 60)]
        report_secs: u64,
    },
    /// Summarize persisted state.
    Status {
        /// Path to a TOML config file (for the store directory and parameters).
        #[arg(long, default_value = "papertrail.toml")]
        config: PathBuf,

        /// State directory; overrides `[store] dir`.
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Print the dashboard as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Export the persisted trade log as CSV.
    Export {
        /// State directory containing `trades.jsonl`.
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Output CSV path.
        #[arg(long, default_value = "trades.csv")]
        out: PathBuf,
    },
    /// Write a starter config file.
    InitConfig {
        #[arg(long, default_value = "papertrail.toml")]
        out: PathBuf,

        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            state_dir,
            ephemeral,
            simulated,
            report_secs,
        } => {
            init_tracing(DEFAULT_LOG);
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start tokio runtime")?;
            runtime.block_on(run_live(
                &config,
                state_dir,
                ephemeral,
                simulated,
                Duration::from_secs(report_secs.max(1)),
            ))
        }
        Commands::Status {
            config,
            state_dir,
            json,
        } => run_status(&config, state_dir, json),
        Commands::Export { state_dir, out } => run_export(&state_dir, &out),
        Commands::InitConfig { out, force } => run_init_config(&out, force),
    }
}

async fn run_live(
    config_path: &Path,
    state_dir: Option<PathBuf>,
    ephemeral: bool,
    simulated: bool,
    report_every: Duration,
) -> Result<()> {
    let mut config = AppConfig::load(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    if let Some(dir) = state_dir {
        config.store.dir = dir;
    }
    if simulated {
        config.feed.kind = FeedKind::Simulated;
    }

    let store: Box<dyn StateStore> = if ephemeral {
        Box::new(MemoryStore::new())
    } else {
        Box::new(
            JsonFileStore::open(&config.store.dir)
                .with_context(|| format!("failed to open store {}", config.store.dir.display()))?
                .with_dedup_window(config.engine.history_capacity),
        )
    };

    let service = EngineService::start(config.engine.clone(), store)?;
    let symbols = service.engine().config().symbols.clone();
    let feed = feed::from_config(&config.feed);
    tracing::info!(feed = feed.name(), symbols = ?symbols, "subscribing");
    let (handle, task) = service.spawn(feed.subscribe(&symbols));

    let mut report_tick = tokio::time::interval(report_every);
    report_tick.tick().await;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                tracing::info!("shutdown requested");
                break;
            }
            _ = report_tick.tick() => {
                let Ok(dash) = handle.dashboard(Utc::now()).await else {
                    bail!("engine service stopped unexpectedly");
                };
                tracing::info!(
                    balance = dash.balance,
                    open = dash.open_positions.len(),
                    wins_24h = dash.last_24h.wins,
                    losses_24h = dash.last_24h.losses,
                    "dashboard"
                );
            }
        }
    }

    let report = match handle.shutdown().await {
        Ok(report) => report,
        Err(_) => task.await.context("engine task panicked")?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.final_flush_ok {
        bail!("final state flush failed; state on disk may lag behind");
    }
    Ok(())
}

fn run_status(config_path: &Path, state_dir: Option<PathBuf>, json: bool) -> Result<()> {
    let config = if config_path.exists() {
        AppConfig::load(config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?
    } else {
        AppConfig::default()
    };
    let dir = state_dir.unwrap_or(config.store.dir);

    let mut store = JsonFileStore::open(&dir)?;
    let Some(state) = store.load()? else {
        println!("no state in {}", dir.display());
        return Ok(());
    };

    // Replay into an engine so the queries match what the service reports.
    let mut engine_config = config.engine;
    if engine_config.symbols.is_empty() {
        engine_config = EngineConfig {
            symbols: state
                .open_positions
                .iter()
                .map(|p| p.symbol.clone())
                .chain(state.trades.iter().map(|t| t.symbol.clone()))
                .collect(),
            ..engine_config
        };
    }
    if engine_config.symbols.is_empty() {
        println!("balance: {:.2} (no trades)", state.balance);
        return Ok(());
    }
    let engine = Engine::restore(engine_config, state)?.engine;

    let now = Utc::now();
    let open = engine.open_positions();
    let counts_24h = engine.outcome_counts(now - chrono::Duration::hours(24));
    let totals = engine.history().outcome_totals();

    if json {
        let value = serde_json::json!({
            "balance": engine.current_balance(),
            "open_positions": open,
            "recent_trades": engine.recent_trades(5),
            "totals": totals,
            "last_24h": counts_24h,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("balance:        {:.2}", engine.current_balance());
    println!("open positions: {}", open.len());
    for view in &open {
        let p = &view.position;
        println!(
            "  {} {:<10} qty {:.8} entry {:.4} stop {:.4}",
            p.id, p.symbol, p.quantity, p.entry_price, p.trailing_stop_price
        );
    }
    println!("wins/losses:    {}/{}", totals.wins, totals.losses);
    println!("last 24h:       {}/{}", counts_24h.wins, counts_24h.losses);
    println!("recent trades:");
    for t in engine.recent_trades(5) {
        println!(
            "  {} {:<10} {:.4} -> {:.4} pnl {:+.4}",
            t.closed_at.format("%Y-%m-%d %H:%M:%S"),
            t.symbol,
            t.entry_price,
            t.exit_price,
            t.realized_pnl
        );
    }
    Ok(())
}

fn run_export(state_dir: &Path, out: &Path) -> Result<()> {
    let store = JsonFileStore::open(state_dir)?;
    let trades = store.read_trades()?;
    write_trades_csv(out, &trades)?;
    println!("wrote {} trades to {}", trades.len(), out.display());
    Ok(())
}

fn run_init_config(out: &Path, force: bool) -> Result<()> {
    if out.exists() && !force {
        bail!("{} exists; pass --force to overwrite", out.display());
    }
    std::fs::write(out, AppConfig::template())
        .with_context(|| format!("failed to write {}", out.display()))?;
    println!("wrote {}", out.display());
    Ok(())
}
