//! tracker-import - bulk tracker data import
//!
//! Imports a JSON tracker payload into the SQLite tracker database and prints
//! the import report as JSON on stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracker_common::config::{ImportConfig, PreheatFailurePolicy};
use tracker_common::db::init_database;
use tracker_common::events::EventBus;
use tracker_common::logging::init_tracing;
use tracker_import::bundle::BundleCommitEngine;
use tracker_import::db::SqliteStore;
use tracker_import::identifier::{IdScheme, IdSchemeParam, IdSchemeParams};
use tracker_import::models::{
    AtomicMode, FlushMode, ImportMode, ImportParams, ImportStatus, ImportStrategy, RuleEffects, TrackerPayload,
};
use tracker_import::preheat::PreheatOrchestrator;
use tracker_import::side_effect::{NotificationHandler, SideEffectDispatcher};
use tracker_import::TrackerImporter;

/// Command-line arguments for tracker-import
#[derive(Parser, Debug)]
#[command(name = "tracker-import")]
#[command(about = "Bulk import of tracked entities, enrollments, events and relationships")]
#[command(version)]
struct Args {
    /// JSON payload to import
    #[arg(short, long)]
    payload: PathBuf,

    /// Precomputed rule effects (JSON)
    #[arg(long)]
    rule_effects: Option<PathBuf>,

    /// SQLite database (overrides config and TRACKER_DATABASE_PATH)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// TOML config file (default: <config_dir>/tracker/import.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// create, update, create-and-update or delete
    #[arg(long, default_value = "create-and-update")]
    strategy: ImportStrategy,

    /// commit or validate
    #[arg(long, default_value = "commit")]
    mode: ImportMode,

    /// auto or object
    #[arg(long, default_value = "auto")]
    flush: FlushMode,

    /// all or object
    #[arg(long, default_value = "all")]
    atomic: AtomicMode,

    /// Id scheme for every metadata reference: uid, code or name
    #[arg(long, default_value = "uid")]
    id_scheme: IdScheme,

    /// Username of the importing user
    #[arg(short, long)]
    user: Option<String>,

    /// fail-fast or best-effort (overrides config and TRACKER_PREHEAT_POLICY)
    #[arg(long)]
    preheat_policy: Option<PreheatFailurePolicy>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ImportConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    config.apply_cli_overrides(args.database.as_deref(), args.preheat_policy);
    init_tracing(&config.logging.level)?;

    info!("Starting tracker-import {}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.database_path.display());

    let payload: TrackerPayload = read_json(&args.payload)?;
    let rule_effects: RuleEffects = match &args.rule_effects {
        Some(path) => read_json(path)?,
        None => RuleEffects::default(),
    };

    let pool = init_database(&config.database_path, config.database.max_connections)
        .await
        .context("Failed to open database")?;
    let store = Arc::new(SqliteStore::open(pool, config.database.max_lock_wait_ms).await?);

    let event_bus = EventBus::new(100);
    let dispatcher = SideEffectDispatcher::new().with_handler(Arc::new(NotificationHandler::new(event_bus.clone())));
    let engine = BundleCommitEngine::new(store.clone()).with_dispatcher(dispatcher);
    let importer = TrackerImporter::new(store, PreheatOrchestrator::new(config.preheat.failure_policy))
        .with_engine(engine)
        .with_event_bus(event_bus);

    let params = ImportParams {
        import_mode: args.mode,
        import_strategy: args.strategy,
        flush_mode: args.flush,
        atomic_mode: args.atomic,
        id_schemes: IdSchemeParams::all(IdSchemeParam::of(args.id_scheme)),
        user: args.user,
    };

    let report = importer.import(params, payload, rule_effects).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.status == ImportStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> Result<T> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
