use service_core::error::AppError;
use service_core::observability::{init_metrics_recorder, init_tracing};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use ticket_api::{
    build_router,
    config::ApiConfig,
    db,
    services::{
        AdmissionControl, AdmissionController, Authenticator, IdentityStore,
        InMemoryIdentityStore, JwtService, PgIdentityStore,
    },
    spawn_bucket_sweeper, AppState,
};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Fail fast on invalid configuration.
    let config = ApiConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;
    let metrics = init_metrics_recorder()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting ticket API"
    );

    let store: Arc<dyn IdentityStore> = match &config.database {
        Some(database) => {
            let pool = db::connect(database).await?;
            tracing::info!("Identity store: PostgreSQL");
            Arc::new(PgIdentityStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory identity store");
            Arc::new(InMemoryIdentityStore::new())
        }
    };

    let jwt = JwtService::new(&config.jwt).map_err(AppError::ConfigError)?;
    let authenticator = Authenticator::new(jwt, store);

    let admission: Arc<dyn AdmissionControl> =
        Arc::new(AdmissionController::new(config.rate_limit.policies.clone()));
    let sweeper = spawn_bucket_sweeper(
        admission.clone(),
        Duration::from_secs(config.rate_limit.sweep_interval_seconds),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    let grace = Duration::from_secs(config.common.shutdown_grace_seconds);

    let state = AppState::new(config, authenticator, admission).with_metrics(metrics);
    let app = build_router(state);

    tracing::info!(address = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(grace))
    .await?;

    sweeper.abort();
    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal(grace: Duration) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    // Grace period for load balancers to stop routing here.
    tokio::time::sleep(grace).await;
}
