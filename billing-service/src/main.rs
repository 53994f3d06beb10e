use anyhow::Result;
use billing_service::{
    billing::BillingEngine,
    config::AppConfig,
    http::{self, AppState},
    leak::{self, LeakDetector},
    metrics_server,
    notifier::{ExpoGateway, Notifier},
    observability,
    store::{PgStore, WaterStore},
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let store: Arc<dyn WaterStore> = Arc::new(PgStore::new(pool));

    let gateway = Arc::new(ExpoGateway::new(
        cfg.push.endpoint.clone(),
        Duration::from_secs(cfg.push.timeout_secs),
    )?);
    let notifier = Arc::new(Notifier::new(gateway, store.clone()));

    // Recurring leak detection, independent of the request path.
    let detector = Arc::new(LeakDetector::new(
        store.clone(),
        notifier,
        cfg.leak.concurrency,
        cfg.leak.cooldown_secs.map(Duration::from_secs),
    ));
    let cancel = CancellationToken::new();
    let detector_task = leak::spawn(
        detector,
        Duration::from_secs(cfg.leak.interval_secs),
        Duration::from_secs(cfg.leak.run_timeout_secs),
        cancel.clone(),
    );

    let state = Arc::new(AppState {
        engine: BillingEngine::new(store.clone()),
        store,
    });
    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.http.bind_addr).await?;
    tracing::info!(addr = %cfg.http.bind_addr, "billing service listening");
    axum::serve(listener, app.into_make_service()).await?;

    cancel.cancel();
    detector_task.await?;

    Ok(())
}
