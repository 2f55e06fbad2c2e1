//! Persistence layer for Launchpad.
//!
//! Provides repository traits with PostgreSQL implementations, the
//! Postgres-backed work queue, and an in-memory store implementing every
//! trait for tests and local development.

pub mod error;
pub mod memory;
pub mod queue;
pub mod repo;

pub use error::{DbError, DbResult};
pub use memory::{MemoryQueue, MemoryStore};
pub use queue::PgWorkQueue;
pub use repo::*;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
