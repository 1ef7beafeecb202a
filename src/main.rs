//! Catalog mirror CLI.
//!
//! `catalog-mirror products` (or `customers`, `categories`, `all`) runs bulk
//! syncs; `catalog-mirror status` prints mirror table counts. Progress events
//! stream to the console while jobs run, and Ctrl-C cancels cooperatively
//! without losing committed work.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast;
use tracing::{error, warn};

use catalog_mirror::domain::{EntityKind, JobRegistry, JobState, SyncEvent, SyncJob};
use catalog_mirror::infrastructure::{
    init_logging_with_config, AppConfig, CatalogApiClient, ConfigManager, DatabaseConnection,
    MirrorStore,
};
use catalog_mirror::sync_engine::{
    CatalogFetcher, EventBus, ProgressPublisher, SyncOrchestrator,
};

enum Command {
    Sync(Vec<EntityKind>),
    Status,
}

struct CliArgs {
    command: Command,
    config_path: Option<PathBuf>,
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Some(args) = parse_args()? else {
        print_usage();
        return Ok(());
    };

    // 1. Configuration (written with defaults on first run)
    let manager = match args.config_path {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };
    let config = manager.initialize_on_first_run().await?;

    // 2. Logging
    init_logging_with_config(&config.logging)?;

    // 3. Local mirror database
    let database_url = match args.database_url {
        Some(url) => url,
        None => ConfigManager::database_url(&config)?,
    };
    let db = DatabaseConnection::new(&database_url).await?;
    db.migrate().await?;
    let store = MirrorStore::new(db.pool_arc());

    match args.command {
        Command::Status => print_status(&store).await,
        Command::Sync(kinds) => run_sync(&manager, &config, store, kinds).await,
    }
}

fn parse_args() -> Result<Option<CliArgs>> {
    let mut args = std::env::args().skip(1);
    let mut command: Option<Command> = None;
    let mut config_path = None;
    let mut database_url = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" | "help" => return Ok(None),
            "--config" => {
                let value = args.next().context("--config requires a path")?;
                config_path = Some(PathBuf::from(value));
            }
            "--db" => {
                let value = args.next().context("--db requires a database url")?;
                database_url = Some(value);
            }
            "status" => command = Some(Command::Status),
            "all" => command = Some(Command::Sync(EntityKind::ALL.to_vec())),
            other => match other.parse::<EntityKind>() {
                Ok(kind) => match command {
                    Some(Command::Sync(ref mut kinds)) => {
                        if !kinds.contains(&kind) {
                            kinds.push(kind);
                        }
                    }
                    _ => command = Some(Command::Sync(vec![kind])),
                },
                Err(_) => bail!("unknown argument: {other} (try --help)"),
            },
        }
    }

    match command {
        Some(command) => Ok(Some(CliArgs {
            command,
            config_path,
            database_url,
        })),
        None => Ok(None),
    }
}

fn print_usage() {
    println!("Catalog Mirror - remote catalog reconciliation engine");
    println!();
    println!("Usage: catalog-mirror [OPTIONS] <COMMAND>...");
    println!();
    println!("Commands:");
    println!("  products     Bulk-sync the product catalog");
    println!("  customers    Bulk-sync the customer catalog");
    println!("  categories   Bulk-sync the category catalog");
    println!("  all          Bulk-sync every catalog");
    println!("  status       Print mirror table counts");
    println!();
    println!("Options:");
    println!("  --config <PATH>  Use a specific config file");
    println!("  --db <URL>       Override the database url (e.g. sqlite:./mirror.db)");
    println!("  -h, --help       Show this help");
    println!();
    println!("Several sync commands can be combined: catalog-mirror products customers");
}

async fn print_status(store: &MirrorStore) -> Result<()> {
    println!("📊 Mirror status");
    for kind in EntityKind::ALL {
        let counts = store.table_counts(kind).await?;
        println!(
            "  {:<11} total {:>7}  active {:>7}  placeholder keys {:>5}",
            kind.table(),
            counts.total,
            counts.active,
            counts.temporary_keys
        );
    }
    Ok(())
}

async fn run_sync(
    manager: &ConfigManager,
    config: &AppConfig,
    store: MirrorStore,
    kinds: Vec<EntityKind>,
) -> Result<()> {
    config.validate().with_context(|| {
        format!(
            "configuration at {:?} is incomplete",
            manager.config_path
        )
    })?;

    // Remote client carrying the configured rate cap and retry budget
    let api = CatalogApiClient::new(config.remote.clone(), config.remote.retry_policy())?;
    let fetcher: Arc<dyn CatalogFetcher> = Arc::new(api);

    let registry = JobRegistry::new();
    let bus = Arc::new(EventBus::default());
    let publisher: Arc<dyn ProgressPublisher> = bus.clone();
    let orchestrator = Arc::new(SyncOrchestrator::new(
        fetcher,
        store,
        registry.clone(),
        publisher,
        config.sync.to_settings(),
    ));

    // Live progress feed; terminal events are reported via the job summary.
    let mut events = bus.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Ctrl-C cancels cooperatively; committed work stays in place.
    let shutdown_registry = registry.clone();
    let shutdown = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Ctrl-C received; cancelling running jobs");
            shutdown_registry.cancel_all().await;
        }
    });

    // One bulk job per kind; per-kind exclusion lives in the registry.
    let mut handles = Vec::new();
    for kind in kinds {
        let orchestrator = Arc::clone(&orchestrator);
        handles.push(tokio::spawn(
            async move { orchestrator.run_bulk(kind).await },
        ));
    }

    let mut failures = 0usize;
    for handle in handles {
        match handle.await {
            Ok(Ok(job)) => {
                print_job_summary(&job);
                if job.state != JobState::Completed {
                    failures += 1;
                }
            }
            Ok(Err(busy)) => {
                error!("❌ {busy}");
                failures += 1;
            }
            Err(join_err) => {
                error!("❌ Sync task panicked: {join_err}");
                failures += 1;
            }
        }
    }

    shutdown.abort();
    printer.abort();

    if failures > 0 {
        bail!("{failures} sync job(s) did not complete");
    }
    Ok(())
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::Started { kind, mode, .. } => {
            println!("🚀 {mode} {kind} sync started");
        }
        SyncEvent::Progress {
            kind, counts, page, ..
        } => {
            let page = page.map(|p| format!(" page {p},")).unwrap_or_default();
            println!(
                "🔄 {kind}:{page} {} processed, {} written, {} errors",
                counts.processed,
                counts.written(),
                counts.errors
            );
        }
        // Terminal events are covered by the final job summary.
        SyncEvent::Completed { .. } | SyncEvent::Failed { .. } => {}
    }
}

fn print_job_summary(job: &SyncJob) {
    match job.state {
        JobState::Completed => {
            let secs = job.duration_ms().unwrap_or(0) as f64 / 1000.0;
            println!("✅ {} sync {} completed in {secs:.1}s", job.kind, job.id);
        }
        JobState::Failed => {
            println!(
                "❌ {} sync {} failed: {}",
                job.kind,
                job.id,
                job.failure.as_deref().unwrap_or("unknown error")
            );
        }
        JobState::Running => {
            println!("🔄 {} sync {} still running", job.kind, job.id);
        }
    }

    let c = &job.counts;
    println!(
        "   {} processed | {} created, {} updated, {} relinked, {} deactivated | {} skipped, {} errors",
        c.processed, c.created, c.updated, c.relinked, c.deactivated, c.skipped, c.errors
    );
    if c.temp_keys > 0 || c.duplicate_keys > 0 {
        println!(
            "   placeholder keys assigned: {} missing-barcode, {} duplicate-barcode",
            c.temp_keys, c.duplicate_keys
        );
    }
}
