//! Pool construction, migrations and small shared helpers.

use anyhow::{Context, Result};
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::{Connection, PgConnection};

use crate::shared::config::DatabaseConfig;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

/// Builds the r2d2 connection pool from configuration.
pub fn create_pool(config: &DatabaseConfig) -> Result<DbPool> {
    let manager = ConnectionManager::<PgConnection>::new(&config.url);
    Pool::builder()
        .max_size(config.max_connections)
        .build(manager)
        .with_context(|| format!("Failed to build connection pool for {}", config.url))
}

/// Opens a single unpooled connection. Handy for one-shot admin tasks.
pub fn establish_pg_connection(database_url: &str) -> Result<PgConnection> {
    PgConnection::establish(database_url)
        .with_context(|| format!("Failed to connect to database at {}", database_url))
}

pub fn run_migrations(pool: &DbPool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

    const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

    let mut conn = pool.get()?;
    conn.run_pending_migrations(MIGRATIONS).map_err(
        |e| -> Box<dyn std::error::Error + Send + Sync> {
            Box::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Migration error: {}", e),
            ))
        },
    )?;
    Ok(())
}

/// Initializes env_logger with an `info` default filter. Call once at startup.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init()
        .ok();
}

/// Format bytes to human readable
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(209_715_200), "200.00 MB");
    }
}
