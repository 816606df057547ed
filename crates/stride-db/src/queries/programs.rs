//! Database query functions for the `programs` table.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgExecutor;
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::{MacroTargets, Program};

/// Parameters for inserting a new program snapshot.
#[derive(Debug, Clone)]
pub struct NewProgram<'a> {
    pub owner_id: Uuid,
    pub primary_goal: &'a str,
    pub start_date: NaiveDate,
    pub duration_weeks: i32,
    pub created_at: DateTime<Utc>,
    pub valid_until: Option<NaiveDate>,
    pub tdee: i32,
    pub macros: MacroTargets,
    pub safety_report: &'a serde_json::Value,
    pub full_bundle: &'a serde_json::Value,
}

/// Insert a program snapshot. Fails on the `(owner_id, created_at)` unique
/// constraint when the owner already has a snapshot at that instant.
pub async fn insert_program(
    executor: impl PgExecutor<'_>,
    new: &NewProgram<'_>,
) -> Result<Program> {
    let program = sqlx::query_as::<_, Program>(
        "INSERT INTO programs \
         (owner_id, primary_goal, start_date, duration_weeks, created_at, valid_until, \
          tdee, macros, safety_report, full_bundle) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         RETURNING *",
    )
    .bind(new.owner_id)
    .bind(new.primary_goal)
    .bind(new.start_date)
    .bind(new.duration_weeks)
    .bind(new.created_at)
    .bind(new.valid_until)
    .bind(new.tdee)
    .bind(Json(new.macros))
    .bind(new.safety_report)
    .bind(new.full_bundle)
    .fetch_one(executor)
    .await
    .with_context(|| format!("failed to insert program for owner {}", new.owner_id))?;

    Ok(program)
}

/// Fetch a program by its ID.
pub async fn get_program(executor: impl PgExecutor<'_>, id: Uuid) -> Result<Option<Program>> {
    let program = sqlx::query_as::<_, Program>("SELECT * FROM programs WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .with_context(|| format!("failed to fetch program {id}"))?;

    Ok(program)
}

/// Fetch only the owner of a program.
pub async fn get_program_owner(executor: impl PgExecutor<'_>, id: Uuid) -> Result<Option<Uuid>> {
    let owner = sqlx::query_scalar::<_, Uuid>("SELECT owner_id FROM programs WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .with_context(|| format!("failed to fetch owner of program {id}"))?;

    Ok(owner)
}

/// List an owner's programs, newest first.
pub async fn list_programs_for_owner(
    executor: impl PgExecutor<'_>,
    owner_id: Uuid,
) -> Result<Vec<Program>> {
    let programs = sqlx::query_as::<_, Program>(
        "SELECT * FROM programs WHERE owner_id = $1 ORDER BY created_at DESC",
    )
    .bind(owner_id)
    .fetch_all(executor)
    .await
    .with_context(|| format!("failed to list programs for owner {owner_id}"))?;

    Ok(programs)
}

/// The most recently created program of `owner_id` whose validity window
/// covers `date`. A NULL `valid_until` means the window is open-ended.
pub async fn get_active_program(
    executor: impl PgExecutor<'_>,
    owner_id: Uuid,
    date: NaiveDate,
) -> Result<Option<Program>> {
    let program = sqlx::query_as::<_, Program>(
        "SELECT * FROM programs \
         WHERE owner_id = $1 \
           AND start_date <= $2 \
           AND (valid_until IS NULL OR valid_until >= $2) \
         ORDER BY created_at DESC \
         LIMIT 1",
    )
    .bind(owner_id)
    .bind(date)
    .fetch_optional(executor)
    .await
    .with_context(|| format!("failed to find active program for owner {owner_id} on {date}"))?;

    Ok(program)
}
