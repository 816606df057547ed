//! Database query functions for the `day_overrides` table.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::PgExecutor;
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::{DayOverride, Modification, OverrideReason, OverrideStatus};

/// Parameters for inserting a day override.
#[derive(Debug, Clone)]
pub struct NewDayOverride<'a> {
    /// Chosen by the caller so a superseded predecessor can point at it
    /// before the row exists.
    pub id: Uuid,
    pub owner_id: Uuid,
    pub program_id: Uuid,
    pub date: NaiveDate,
    pub reason_code: OverrideReason,
    pub justification: &'a str,
    pub modification: &'a Modification,
    pub status: OverrideStatus,
}

/// Insert an override. Fails on the active-override unique index when a
/// non-terminal override already exists for the same owner, program and
/// date.
pub async fn insert_override(
    executor: impl PgExecutor<'_>,
    new: &NewDayOverride<'_>,
) -> Result<DayOverride> {
    let row = sqlx::query_as::<_, DayOverride>(
        "INSERT INTO day_overrides \
         (id, owner_id, program_id, date, reason_code, justification, modification, status, decided_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, \
                 CASE WHEN $8 = 'auto_applied' THEN now() ELSE NULL END) \
         RETURNING *",
    )
    .bind(new.id)
    .bind(new.owner_id)
    .bind(new.program_id)
    .bind(new.date)
    .bind(new.reason_code)
    .bind(new.justification)
    .bind(Json(new.modification))
    .bind(new.status)
    .fetch_one(executor)
    .await
    .with_context(|| {
        format!(
            "failed to insert override for program {} on {}",
            new.program_id, new.date
        )
    })?;

    Ok(row)
}

/// Fetch an override by ID.
pub async fn get_override(executor: impl PgExecutor<'_>, id: Uuid) -> Result<Option<DayOverride>> {
    let row = sqlx::query_as::<_, DayOverride>("SELECT * FROM day_overrides WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .with_context(|| format!("failed to fetch override {id}"))?;

    Ok(row)
}

/// Fetch an override by ID and lock it for the rest of the transaction.
pub async fn lock_override(executor: impl PgExecutor<'_>, id: Uuid) -> Result<Option<DayOverride>> {
    let row =
        sqlx::query_as::<_, DayOverride>("SELECT * FROM day_overrides WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(executor)
            .await
            .with_context(|| format!("failed to lock override {id}"))?;

    Ok(row)
}

/// The non-terminal override for `(owner, program, date)`, if any.
pub async fn get_active_override(
    executor: impl PgExecutor<'_>,
    owner_id: Uuid,
    program_id: Uuid,
    date: NaiveDate,
) -> Result<Option<DayOverride>> {
    let row = sqlx::query_as::<_, DayOverride>(
        "SELECT * FROM day_overrides \
         WHERE owner_id = $1 AND program_id = $2 AND date = $3 \
           AND status IN ('pending', 'approved', 'auto_applied')",
    )
    .bind(owner_id)
    .bind(program_id)
    .bind(date)
    .fetch_optional(executor)
    .await
    .with_context(|| format!("failed to fetch active override for program {program_id} on {date}"))?;

    Ok(row)
}

/// Same as [`get_active_override`], but takes a row lock so concurrent
/// writers on the same day queue behind each other.
pub async fn lock_active_override(
    executor: impl PgExecutor<'_>,
    owner_id: Uuid,
    program_id: Uuid,
    date: NaiveDate,
) -> Result<Option<DayOverride>> {
    let row = sqlx::query_as::<_, DayOverride>(
        "SELECT * FROM day_overrides \
         WHERE owner_id = $1 AND program_id = $2 AND date = $3 \
           AND status IN ('pending', 'approved', 'auto_applied') \
         FOR UPDATE",
    )
    .bind(owner_id)
    .bind(program_id)
    .bind(date)
    .fetch_optional(executor)
    .await
    .with_context(|| format!("failed to lock active override for program {program_id} on {date}"))?;

    Ok(row)
}

/// Full override history for one day, oldest first.
pub async fn list_overrides_for_date(
    executor: impl PgExecutor<'_>,
    owner_id: Uuid,
    program_id: Uuid,
    date: NaiveDate,
) -> Result<Vec<DayOverride>> {
    let rows = sqlx::query_as::<_, DayOverride>(
        "SELECT * FROM day_overrides \
         WHERE owner_id = $1 AND program_id = $2 AND date = $3 \
         ORDER BY created_at ASC",
    )
    .bind(owner_id)
    .bind(program_id)
    .bind(date)
    .fetch_all(executor)
    .await
    .with_context(|| format!("failed to list overrides for program {program_id} on {date}"))?;

    Ok(rows)
}

/// Non-terminal overrides of a program with a date in `[from, to]`.
pub async fn list_active_overrides_between(
    executor: impl PgExecutor<'_>,
    program_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<DayOverride>> {
    let rows = sqlx::query_as::<_, DayOverride>(
        "SELECT * FROM day_overrides \
         WHERE program_id = $1 AND date BETWEEN $2 AND $3 \
           AND status IN ('pending', 'approved', 'auto_applied') \
         ORDER BY date ASC, created_at ASC",
    )
    .bind(program_id)
    .bind(from)
    .bind(to)
    .fetch_all(executor)
    .await
    .with_context(|| {
        format!("failed to list overrides for program {program_id} between {from} and {to}")
    })?;

    Ok(rows)
}

/// Atomically move an override from `from` to `to`, stamping `decided_at`
/// or `undone_at` as appropriate. `superseded_by` is recorded when a newer
/// request replaced this one. Returns the number of rows affected.
pub async fn transition_override_status(
    executor: impl PgExecutor<'_>,
    id: Uuid,
    from: OverrideStatus,
    to: OverrideStatus,
    superseded_by: Option<Uuid>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE day_overrides \
         SET status = $1, \
             decided_at = CASE WHEN $1 IN ('approved', 'rejected', 'auto_applied') \
                               THEN now() ELSE decided_at END, \
             undone_at = CASE WHEN $1 = 'undone' THEN now() ELSE undone_at END, \
             superseded_by = COALESCE($2, superseded_by) \
         WHERE id = $3 AND status = $4",
    )
    .bind(to)
    .bind(superseded_by)
    .bind(id)
    .bind(from)
    .execute(executor)
    .await
    .with_context(|| format!("failed to transition override {id} from {from} to {to}"))?;

    Ok(result.rows_affected())
}
