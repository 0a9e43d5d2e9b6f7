//! Database migration management.
//!
//! Schema for the PostgreSQL replay cache and session store.

use sqlx::PgPool;

/// Run all pending migrations embedded from `migrations/`.
///
/// # Errors
///
/// Returns the migrator error if any migration fails to apply.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations...");

    sqlx::migrate!("./migrations").run(pool).await?;

    tracing::info!("Migrations completed successfully");
    Ok(())
}
