use anyhow::{Context, Result, bail};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::{debug, info};

use crate::config::DbConfig;

/// Migrations embedded at compile time from `crates/stride-db/migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Tables owned by the plan store, in dependency order.
pub const PLAN_TABLES: [&str; 9] = [
    "programs",
    "session_instances",
    "exercise_plan_items",
    "meal_instances",
    "meal_item_plans",
    "day_overrides",
    "adherence_records",
    "plan_change_events",
    "calendar_events",
];

/// Open a pool sized and timed by `config`.
///
/// Every connection gets the configured `lock_timeout`, so a writer stuck
/// behind another writer's row lock fails with a contention error instead
/// of waiting indefinitely.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    let set_lock_timeout = format!("SET lock_timeout = {}", config.lock_timeout.as_millis());
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .after_connect(move |conn, _meta| {
            let stmt = set_lock_timeout.clone();
            Box::pin(async move {
                conn.execute(stmt.as_str()).await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
        .with_context(|| format!("failed to connect to stride database at {}", config.database_url))?;

    debug!(
        max_connections = config.max_connections,
        lock_timeout_ms = config.lock_timeout.as_millis() as u64,
        "plan store pool ready"
    );
    Ok(pool)
}

/// Apply every pending plan store migration.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to migrate plan store schema")?;

    let latest = MIGRATOR.iter().map(|m| m.version).max();
    info!(
        migrations = MIGRATOR.iter().count(),
        latest = ?latest,
        "plan store schema up to date"
    );
    Ok(())
}

/// Quote a database name for `CREATE DATABASE`, which takes no bind
/// parameters.
fn quoted_database_name(name: &str) -> Result<String> {
    if name.is_empty() || name.contains(['"', '\0']) {
        bail!("database name {name:?} cannot be used as an identifier");
    }
    Ok(format!("\"{name}\""))
}

/// Create the configured database on its server when it is missing.
///
/// Returns `true` when the database was created by this call.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<bool> {
    let Some(db_name) = config.database_name() else {
        bail!("no database name in {}", config.database_url);
    };
    let quoted = quoted_database_name(db_name)?;

    let maintenance_url = config.maintenance_url();
    let admin = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(config.acquire_timeout)
        .connect(&maintenance_url)
        .await
        .with_context(|| format!("failed to reach maintenance database at {maintenance_url}"))?;

    let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM pg_database WHERE datname = $1")
        .bind(db_name)
        .fetch_optional(&admin)
        .await
        .context("failed to look up database")?;

    let created = if found.is_some() {
        false
    } else {
        admin
            .execute(format!("CREATE DATABASE {quoted}").as_str())
            .await
            .with_context(|| format!("failed to create database {db_name}"))?;
        true
    };
    admin.close().await;

    info!(db = db_name, created, "stride database present");
    Ok(created)
}

/// Row counts of the plan store tables, in [`PLAN_TABLES`] order.
pub async fn plan_table_counts(pool: &PgPool) -> Result<Vec<(&'static str, i64)>> {
    let query = PLAN_TABLES
        .iter()
        .enumerate()
        .map(|(pos, table)| format!("SELECT {pos}::int AS pos, COUNT(*) AS n FROM {table}"))
        .collect::<Vec<_>>()
        .join(" UNION ALL ");

    let rows: Vec<(i32, i64)> = sqlx::query_as(&query)
        .fetch_all(pool)
        .await
        .context("failed to count plan store rows")?;

    let mut counts: Vec<(&'static str, i64)> = PLAN_TABLES.iter().map(|t| (*t, 0)).collect();
    for (pos, n) in rows {
        if let Some(slot) = usize::try_from(pos).ok().and_then(|p| counts.get_mut(p)) {
            slot.1 = n;
        }
    }
    Ok(counts)
}
