mod config;
mod models;
mod pipeline;
mod schedule;
mod scraper;
mod storage;
mod utils;

#[cfg(test)]
mod testing;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::catalog::{self, Pagination};
use crate::config::{AppConfig, SourceSpec};
use crate::models::{KeyField, Window};
use crate::pipeline::logos::backfill_logos;
use crate::pipeline::Pipeline;
use crate::schedule::{Runner, ScheduleGate};
use crate::scraper::build_adapter;
use crate::scraper::http_client::HttpClient;
use crate::storage::{open_store, RecordStore};

const LOGO_TARGET: &str = "investing-br";
const LOGO_SCREENER: &str = "tv-br-stocks";

#[derive(Parser)]
#[command(
    name = "market-feed",
    about = "Scheduled market-data ingestion into keyed tables",
    version
)]
struct Cli {
    /// Run every selected source once, ignoring business hours, then exit
    #[arg(long, conflicts_with_all = ["stats", "backfill_logos"])]
    once: bool,

    /// Print row counts and the latest record per source
    #[arg(long, conflicts_with = "backfill_logos")]
    stats: bool,

    /// Fill missing logos on the investing-br table from the screener
    #[arg(long)]
    backfill_logos: bool,

    /// Restrict to these catalog sources (repeatable)
    #[arg(short, long = "source", value_name = "NAME")]
    source: Vec<String>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "market_feed=info,warn",
        1 => "market_feed=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = AppConfig::load()?;
    let specs = config.sources(&cli.source)?;
    if specs.is_empty() && !cli.backfill_logos {
        bail!("No sources selected; check `enabled` in the configuration");
    }

    let store = open_store(&config.store, &config.http, &known_tables(&config)?)?;
    let client = Arc::new(HttpClient::new(&config.http)?);

    if cli.stats {
        print_stats(store.as_ref(), &specs).await?;
    } else if cli.backfill_logos {
        run_logo_backfill(&config, store, client).await?;
    } else if cli.once {
        let _t = utils::Timer::start(format!("One-shot run of {} sources", specs.len()));
        for spec in specs {
            let adapter = build_adapter(&spec, Arc::clone(&client))?;
            Pipeline::new(spec, adapter, Arc::clone(&store), &config.pipeline)
                .run()
                .await?;
        }
    } else {
        let mut tasks = tokio::task::JoinSet::new();
        for spec in specs {
            let gate = ScheduleGate::new(&config.pipeline.timezone, spec.window)?;
            let interval = Duration::from_secs(spec.interval_minutes.max(1) * 60);
            let adapter = build_adapter(&spec, Arc::clone(&client))?;
            let pipeline = Pipeline::new(spec, adapter, Arc::clone(&store), &config.pipeline);
            tasks.spawn(Runner::new(pipeline, gate, interval).run_forever());
        }
        info!("{} source loops running, Ctrl-C to stop", tasks.len());

        shutdown_signal().await;
        info!("Shutdown signal received, stopping");
        tasks.abort_all();
    }

    Ok(())
}

/// Every table any catalog source may write to, after overrides.
fn known_tables(config: &AppConfig) -> Result<Vec<(String, KeyField)>> {
    let names: Vec<String> = catalog::builtin().into_iter().map(|s| s.name).collect();
    let mut tables: Vec<(String, KeyField)> = Vec::new();
    for spec in config.sources(&names)? {
        if !tables.iter().any(|(t, _)| *t == spec.table) {
            tables.push((spec.table, spec.key));
        }
    }
    Ok(tables)
}

async fn print_stats(store: &dyn RecordStore, specs: &[SourceSpec]) -> Result<()> {
    println!("─────────────────────────────────────────────────────────────");
    println!("  market-feed — store stats");
    println!("─────────────────────────────────────────────────────────────");
    for spec in specs {
        let stats = store
            .stats(&spec.table, &spec.fields.flag)
            .await
            .with_context(|| format!("Stats for {}", spec.name))?;
        println!(
            "  {:<18} {:<18} {:>8} rows",
            spec.name,
            spec.table,
            utils::fmt_number(stats.rows)
        );
        match stats.latest {
            Some(r) => println!(
                "  {:<18} latest {} {} last={} chg={}% at {}",
                "",
                r.symbol,
                r.name.as_deref().unwrap_or(""),
                utils::fmt_opt(r.last, 4),
                utils::fmt_opt(r.chg_pct, 2),
                r.written_at.as_deref().unwrap_or("—"),
            ),
            None => println!("  {:<18} no records", ""),
        }
    }
    println!("─────────────────────────────────────────────────────────────");
    Ok(())
}

async fn run_logo_backfill(
    config: &AppConfig,
    store: Arc<dyn RecordStore>,
    client: Arc<HttpClient>,
) -> Result<()> {
    let _t = utils::Timer::start("Logo backfill");
    let mut picked = config.sources(&[LOGO_TARGET.to_string(), LOGO_SCREENER.to_string()])?;
    let screener_pos = picked
        .iter()
        .position(|s| s.name == LOGO_SCREENER)
        .context("Screener source missing from catalog")?;
    let screener = picked.swap_remove(screener_pos);
    let target = picked
        .into_iter()
        .find(|s| s.name == LOGO_TARGET)
        .context("Logo target missing from catalog")?;

    let end = match screener.pagination {
        Pagination::Sequential { total, .. } => total,
        Pagination::FanOut { page_size, .. } => page_size,
    };
    let adapter = build_adapter(&screener, client)?;
    let report = backfill_logos(
        store.as_ref(),
        &target.table,
        target.key,
        adapter.as_ref(),
        Window { page: 0, start: 0, end },
    )
    .await?;

    info!("Logo backfill: {} updated of {} candidates", report.updated, report.candidates);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Ctrl-C handler failed: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("SIGTERM handler failed: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
