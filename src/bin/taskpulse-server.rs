//! TaskPulse pipeline server.
//!
//! Wires the full pipeline behind the HTTP surface. With `database.url` set,
//! reminder snapshots, the audit log, and the generation lease persist to
//! Postgres; otherwise everything runs on the in-memory stores, which is the
//! demo and test posture.

use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use taskpulse_core::audit::{AuditLogWriter, AuditStore, InMemoryAuditStore, PgAuditStore};
use taskpulse_core::config::PipelineConfig;
use taskpulse_core::events::{EventBus, InMemoryEventBus};
use taskpulse_core::logging::init_structured_logging;
use taskpulse_core::metrics::PipelineMetrics;
use taskpulse_core::notify::{ConnectionRegistry, NotificationFanout};
use taskpulse_core::producer::TaskLifecycleProducer;
use taskpulse_core::recurring::{
    InMemoryLeaseLock, LeaseLock, PgLeaseLock, RecurringTaskProcessor,
};
use taskpulse_core::scheduler::{
    InMemorySnapshotStore, PgSnapshotStore, ReminderScheduler, SnapshotStore,
};
use taskpulse_core::shutdown::Shutdown;
use taskpulse_core::store::{InMemoryTaskStore, TaskStore};
use taskpulse_core::web::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();
    let config = PipelineConfig::load().context("configuration load failed")?;

    let metrics = PipelineMetrics::new();
    let bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new(
        config.bus.clone(),
        Arc::clone(&metrics),
    ));
    let task_store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());

    let (snapshot_store, audit_store, lease): (
        Arc<dyn SnapshotStore>,
        Arc<dyn AuditStore>,
        Arc<dyn LeaseLock>,
    ) = if config.database.url.is_empty() {
        info!("no database configured; using in-memory durable stores");
        (
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(InMemoryAuditStore::new()),
            Arc::new(InMemoryLeaseLock::new()),
        )
    } else {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(
                config.database.connect_timeout_seconds,
            ))
            .connect(&config.database.url)
            .await
            .context("database connection failed")?;

        let snapshots = PgSnapshotStore::new(pool.clone());
        snapshots
            .ensure_schema()
            .await
            .context("snapshot schema setup failed")?;
        let audit = PgAuditStore::new(pool.clone());
        audit
            .ensure_schema()
            .await
            .context("audit schema setup failed")?;
        let lease = PgLeaseLock::new(pool);
        lease
            .ensure_schema()
            .await
            .context("lease schema setup failed")?;
        info!("durable stores backed by Postgres");
        (Arc::new(snapshots), Arc::new(audit), Arc::new(lease))
    };

    let shutdown = Shutdown::new();

    let producer = Arc::new(TaskLifecycleProducer::new(
        Arc::clone(&task_store),
        Arc::clone(&bus),
        Arc::clone(&metrics),
    ));

    let scheduler = ReminderScheduler::start(
        Arc::clone(&bus),
        snapshot_store,
        config.reminders.clone(),
        Arc::clone(&metrics),
        shutdown.subscribe(),
    )
    .await;

    let registry = Arc::new(ConnectionRegistry::new(
        config.notifications.clone(),
        Arc::clone(&metrics),
    ));
    let fanout = NotificationFanout::start(
        Arc::clone(&bus),
        Arc::clone(&registry),
        config.notifications.clone(),
        Arc::clone(&metrics),
        shutdown.subscribe(),
    );

    let audit_writer = AuditLogWriter::start(
        Arc::clone(&bus),
        Arc::clone(&audit_store),
        config.audit.clone(),
        Arc::clone(&metrics),
        shutdown.subscribe(),
    );

    let processor = RecurringTaskProcessor::new(
        Arc::clone(&producer),
        Arc::clone(&task_store),
        lease,
        config.recurring.clone(),
        Arc::clone(&metrics),
    )
    .start(shutdown.subscribe());

    let state = AppState::new(registry, audit_store, metrics);
    let app = web::router(state);
    let listener = tokio::net::TcpListener::bind(&config.web.bind_address)
        .await
        .with_context(|| format!("bind failed on {}", config.web.bind_address))?;
    info!(address = %config.web.bind_address, "taskpulse server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    info!("shutdown signal received; draining components");
    shutdown.trigger();
    scheduler.join().await;
    fanout.join().await;
    audit_writer.join().await;
    processor.join().await;
    info!("shutdown complete");
    Ok(())
}
