pub mod drones;
pub mod orders;
pub mod users;

pub use drones::DroneStore;
pub use orders::OrderStore;
pub use users::UserStore;

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

use crate::config::DbConfig;
use crate::error::AppError;

pub type Tx = sqlx::Transaction<'static, sqlx::Postgres>;

/// Builds the pool without touching the network; the first query connects.
pub fn connect(cfg: &DbConfig) -> PgPool {
    let options = PgConnectOptions::new()
        .host(&cfg.host)
        .port(cfg.port)
        .username(&cfg.user)
        .password(&cfg.password)
        .database(&cfg.name)
        .options([("lock_timeout", "10s")]);

    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect_lazy_with(options)
}

pub async fn migrate(pool: &PgPool) -> Result<(), AppError> {
    sqlx::migrate!().run(pool).await?;
    Ok(())
}

/// Startup waits for the database to come up before giving up.
pub async fn migrate_with_retry(
    pool: &PgPool,
    attempts: u32,
    delay: Duration,
) -> Result<(), AppError> {
    let mut last_err = None;
    for attempt in 1..=attempts {
        match migrate(pool).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                tracing::warn!(attempt, error = %err, "migration attempt failed");
                last_err = Some(err);
                tokio::time::sleep(delay).await;
            }
        }
    }
    Err(last_err
        .unwrap_or_else(|| AppError::Infrastructure("database not reachable".to_string())))
}

pub(crate) fn map_not_found(err: sqlx::Error, not_found: AppError) -> AppError {
    match err {
        sqlx::Error::RowNotFound => not_found,
        other => other.into(),
    }
}

pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23503"))
}
