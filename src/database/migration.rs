//! Schema migrations for the import tables and the completion procedure.
//!
//! Applied at startup unless the binary is started with `--skip-migrations`.

use crate::error::ImportResult;
use sqlx::PgPool;
use sqlx::migrate::Migrator;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Run pending migrations. Already applied migrations are skipped.
pub async fn run_migrations(pool: &PgPool) -> ImportResult<()> {
    log::info!("checking database migration state");

    MIGRATOR.run(pool).await?;

    log::info!("database migrations up to date");
    Ok(())
}
