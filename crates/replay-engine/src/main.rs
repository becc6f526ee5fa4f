//! Replay engine binary.
//!
//! Wires the projection engine to its adapters and replays the full event
//! history into the account summary read model. A restarted run resumes
//! after the last committed batch.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `replay-config.yaml` (or `REPLAY_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Validate the projection tuning knobs
//! 4. Connect to `PostgreSQL` when the store or the source needs it
//! 5. Build the selected account store adapter
//! 6. Seed the event source with synthetic load, if enabled
//! 7. Run the replay with periodic progress reports
//! 8. Log the result

mod config;
mod error;
mod reporter;

use std::sync::Arc;

use replay_db::{
    DragonflyAccountStore, DragonflyPool, PgAccountStore, PgEventLog, PostgresConfig, PostgresPool,
};
use replay_loadgen::LoadGenerator;
use replay_projection::{
    AccountStore, BatchCoordinator, EventSource, InMemoryEventLog, InMemoryStore, ReplayStats,
    RunSummary,
};
use replay_types::AccountEvent;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig, ReplayConfig, SourceKind, StoreAdapter};
use crate::error::EngineError;

/// Events generated and appended per chunk when seeding `PostgreSQL`.
const SEED_CHUNK: usize = 10_000;

/// Application entry point for the replay engine.
///
/// # Errors
///
/// Returns an error if any initialization step or the replay itself fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let path = ReplayConfig::path_from_env();
    let found = path.exists();
    let config = if found {
        ReplayConfig::from_file(&path).map_err(EngineError::from)?
    } else {
        ReplayConfig::parse("").map_err(EngineError::from)?
    };

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!("replay-engine starting");
    if found {
        info!(path = %path.display(), "Configuration loaded");
    } else {
        info!(path = %path.display(), "Config file not found, using defaults");
    }

    // 3. Validate tuning knobs before touching any infrastructure.
    let partitioner = config.projection.validate().map_err(EngineError::from)?;
    info!(
        projection = %config.projection.projection_name,
        lanes = partitioner.lane_count(),
        mode = ?config.projection.mode,
        store = ?config.store.adapter,
        source = ?config.source.kind,
        "Projection configured"
    );

    // 4. Connect to PostgreSQL if anything needs it.
    let needs_postgres = config.store.adapter == StoreAdapter::Postgres
        || config.source.kind == SourceKind::Postgres;
    let postgres = if needs_postgres {
        let pg_config = PostgresConfig::for_lanes(
            &config.store.postgres_url,
            partitioner.lane_count(),
            config.store.spare_connections,
        );
        let pool = PostgresPool::connect(&pg_config)
            .await
            .map_err(EngineError::from)?;
        pool.run_migrations().await.map_err(EngineError::from)?;
        Some(pool)
    } else {
        None
    };

    // 5-7. Build the store adapter and replay.
    let started = Instant::now();
    let stats = Arc::new(ReplayStats::new());
    let summary = match config.store.adapter {
        StoreAdapter::Memory => {
            let store = Arc::new(InMemoryStore::new());
            run_with_store(&config, store, &stats, postgres.as_ref()).await?
        }
        StoreAdapter::Postgres => {
            let pool = require_postgres(postgres.as_ref(), "postgres store")?;
            let store = Arc::new(PgAccountStore::new(pool.pool().clone()));
            let summary =
                run_with_store(&config, Arc::clone(&store), &stats, postgres.as_ref()).await?;
            let accounts = store.count().await.map_err(EngineError::from)?;
            let total_balance = store.total_balance().await.map_err(EngineError::from)?;
            info!(accounts, total_balance = %total_balance, "Read model totals");
            summary
        }
        StoreAdapter::Dragonfly => {
            let pool = DragonflyPool::connect(&config.store.dragonfly_url)
                .await
                .map_err(EngineError::from)?;
            info!("Dragonfly connected");
            let store = Arc::new(DragonflyAccountStore::new(pool));
            run_with_store(&config, store, &stats, postgres.as_ref()).await?
        }
    };

    // 8. Log the result.
    let elapsed = started.elapsed();
    let totals = stats.snapshot();
    info!(
        batches = summary.batches,
        events = summary.events,
        resumed_from = ?summary.resumed_from,
        last_position = ?summary.last_position,
        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        events_per_sec = reporter::per_second(summary.events, elapsed),
        puts = totals.puts,
        deletes = totals.deletes,
        elided_cancels = totals.elided_cancels,
        store_reads = totals.store_reads,
        retries = totals.retries,
        "Replay complete"
    );

    if let Some(pool) = postgres {
        pool.close().await;
    }
    Ok(())
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    match logging.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init(),
    }
}

fn require_postgres<'a>(
    postgres: Option<&'a PostgresPool>,
    needed_by: &str,
) -> Result<&'a PostgresPool, EngineError> {
    postgres.ok_or_else(|| EngineError::Setup {
        message: format!("{needed_by} requires a PostgreSQL connection"),
    })
}

/// Open the configured event source, seed it, and replay it into `store`.
async fn run_with_store<S: AccountStore>(
    config: &ReplayConfig,
    store: Arc<S>,
    stats: &Arc<ReplayStats>,
    postgres: Option<&PostgresPool>,
) -> Result<RunSummary, EngineError> {
    match config.source.kind {
        SourceKind::Memory => {
            let mut log = seed_memory_log(config)?;
            replay(config, store, stats, &mut log).await
        }
        SourceKind::Postgres => {
            let pool = require_postgres(postgres, "postgres source")?;
            let mut log =
                PgEventLog::new(pool.pool().clone()).with_page_size(config.source.page_size);
            seed_postgres_log(config, &log).await?;
            replay(config, store, stats, &mut log).await
        }
    }
}

/// Fill an in-memory log from the load generator.
fn seed_memory_log(config: &ReplayConfig) -> Result<InMemoryEventLog, EngineError> {
    if !config.loader.enabled {
        warn!("Load generation disabled, in-memory source is empty");
        return Ok(InMemoryEventLog::new());
    }
    let mut generator = LoadGenerator::new(&config.loader.shape, config.loader.seed)?;
    let log = InMemoryEventLog::from_events(generator.by_ref());
    let load = generator.summary();
    info!(
        events = load.total(),
        created = load.created,
        credited = load.credited,
        debited = load.debited,
        cancelled = load.cancelled,
        "Synthetic load generated"
    );
    Ok(log)
}

/// Append synthetic load to an empty `account_events` table.
///
/// A populated log is left untouched so that a restarted run resumes the
/// same history instead of extending it.
async fn seed_postgres_log(config: &ReplayConfig, log: &PgEventLog) -> Result<(), EngineError> {
    if !config.loader.enabled {
        return Ok(());
    }
    if let Some(head) = log.head_position().await? {
        info!(head, "Event log already populated, skipping load generation");
        return Ok(());
    }

    let mut generator = LoadGenerator::new(&config.loader.shape, config.loader.seed)?;
    let mut chunk: Vec<AccountEvent> = Vec::with_capacity(SEED_CHUNK);
    let mut appended: usize = 0;
    loop {
        chunk.clear();
        chunk.extend(generator.by_ref().take(SEED_CHUNK));
        if chunk.is_empty() {
            break;
        }
        log.append_batch(&chunk).await?;
        appended = appended.saturating_add(chunk.len());
    }

    let load = generator.summary();
    info!(
        events = appended,
        created = load.created,
        credited = load.credited,
        debited = load.debited,
        cancelled = load.cancelled,
        "Synthetic load appended to event log"
    );
    Ok(())
}

/// Run the coordinator over `source` to the end of the stream.
async fn replay<S: AccountStore, E: EventSource>(
    config: &ReplayConfig,
    store: Arc<S>,
    stats: &Arc<ReplayStats>,
    source: &mut E,
) -> Result<RunSummary, EngineError> {
    let mut coordinator =
        BatchCoordinator::start(config.projection.clone(), store, Arc::clone(stats))?;
    let progress = config
        .metrics
        .report_interval()
        .map(|interval| reporter::spawn(Arc::clone(stats), interval));

    let result = coordinator.run(source).await;

    if let Some(handle) = progress {
        handle.abort();
    }
    coordinator.shutdown().await;
    result.map_err(EngineError::from)
}
