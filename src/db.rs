//! Postgres connection handle.
//!
//! Built once at startup from [`DbConfig`] and handed to the repository; there
//! is no process-global connection state.

use once_cell::sync::OnceCell;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};

pub use crate::config::DbConfig;

#[derive(thiserror::Error, Debug)]
pub enum DbError {
    #[error("database pool: {0}")] Pool(#[from] sqlx::Error),
    #[error("migration failed: {0}")] Migrate(#[from] sqlx::migrate::MigrateError),
}

pub struct Database {
    url: String,
    max_connections: u32,
    pool: OnceCell<PgPool>,
}

impl Database {
    fn new(url: String, max_connections: u32) -> Self {
        Self { url, max_connections, pool: OnceCell::new() }
    }

    /// Returns the shared pool, creating it on first call. Later calls are no-ops.
    pub fn connect(&self) -> Result<&PgPool, DbError> {
        let mut created = false;
        let pool = self.pool.get_or_try_init(|| {
            created = true;
            PgPoolOptions::new()
                .max_connections(self.max_connections)
                .connect_lazy(&self.url)
        })?;
        if created {
            info!(max_connections = self.max_connections, "postgres pool created");
        } else {
            tracing::debug!("postgres pool already initialised");
        }
        Ok(pool)
    }

    pub fn is_connected(&self) -> bool {
        self.pool.get().is_some()
    }

    /// Apply embedded migrations from `migrations/`.
    pub async fn migrate(&self) -> Result<(), DbError> {
        let pool = self.connect()?;
        sqlx::migrate!("./migrations").run(pool).await?;
        info!("database migrations applied");
        Ok(())
    }
}

/// Build the database handle. Missing configuration is reported and yields
/// `Ok(None)` so the caller can continue without Postgres.
pub fn connect_to_db(cfg: &DbConfig) -> Result<Option<Database>, DbError> {
    let Some(url) = cfg.url.as_ref().filter(|u| !u.trim().is_empty()) else {
        warn!("DATABASE_URL not set; postgres storage disabled");
        return Ok(None);
    };
    let db = Database::new(url.clone(), cfg.max_connections);
    db.connect()?;
    Ok(Some(db))
}
