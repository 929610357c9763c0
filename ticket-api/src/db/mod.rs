//! PostgreSQL pool for the identity store.

use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::DatabaseConfig;

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!(
        max_connections = config.max_connections,
        "Connecting to PostgreSQL"
    );

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .connect(&config.url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Identity schema migrations applied");
    Ok(())
}

/// Pool ready for use by [`crate::services::PgIdentityStore`].
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, AppError> {
    let pool = create_pool(config)
        .await
        .map_err(|e| AppError::IdentityStore(anyhow::Error::new(e)))?;

    run_migrations(&pool)
        .await
        .map_err(|e| AppError::IdentityStore(anyhow::Error::new(e)))?;

    Ok(pool)
}

pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // needs a running PostgreSQL
    async fn test_connect_and_migrate() {
        let config = DatabaseConfig {
            url: "postgres://localhost/tickets_test".to_string(),
            max_connections: 2,
            min_connections: 1,
        };

        let pool = connect(&config).await.unwrap();
        ping(&pool).await.unwrap();
    }
}
