use tracing_subscriber::EnvFilter;

/// Honors `RUST_LOG` when set, otherwise defaults the service to info.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("billing_service=info,water_client=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
