//! Schema migration from embedded SQL files.

use sqlx::SqlitePool;

/// SQL statements for all tables, in order.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_create_hosts",
        include_str!("../../migrations/sql/001_create_hosts.sql"),
    ),
    (
        "002_create_services",
        include_str!("../../migrations/sql/002_create_services.sql"),
    ),
    (
        "003_create_scans",
        include_str!("../../migrations/sql/003_create_scans.sql"),
    ),
    (
        "004_create_availability",
        include_str!("../../migrations/sql/004_create_availability.sql"),
    ),
    (
        "005_create_settings",
        include_str!("../../migrations/sql/005_create_settings.sql"),
    ),
];

/// Run all migrations against the database.
///
/// Uses `CREATE TABLE IF NOT EXISTS` so migrations are idempotent.
pub async fn run(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for (name, sql) in MIGRATIONS {
        tracing::debug!("Running migration: {name}");
        sqlx::raw_sql(sql).execute(pool).await?;
    }
    tracing::debug!("All {} migrations applied", MIGRATIONS.len());
    Ok(())
}
