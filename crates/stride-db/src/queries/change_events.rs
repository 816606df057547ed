//! Database query functions for the append-only `plan_change_events` table.
//!
//! There is deliberately no update or delete function here; the table also
//! rejects both at the database level.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{ChangeType, PlanChangeEvent, PlannedEntityRef};

/// Parameters for appending a change event.
#[derive(Debug, Clone)]
pub struct NewPlanChangeEvent<'a> {
    pub program_id: Uuid,
    pub owner_id: Uuid,
    pub change_type: ChangeType,
    pub planned: PlannedEntityRef,
    pub new_entity_id: Option<Uuid>,
    pub reason_code: &'a str,
    pub diff: &'a Value,
}

/// Append a change event. Returns the row with its server-generated id and
/// timestamp.
pub async fn insert_change_event(
    executor: impl PgExecutor<'_>,
    new: &NewPlanChangeEvent<'_>,
) -> Result<PlanChangeEvent> {
    let event = sqlx::query_as::<_, PlanChangeEvent>(
        "INSERT INTO plan_change_events \
         (program_id, owner_id, change_type, planned_entity_type, planned_entity_id, \
          new_entity_id, reason_code, diff) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(new.program_id)
    .bind(new.owner_id)
    .bind(new.change_type)
    .bind(new.planned.entity_type)
    .bind(new.planned.id)
    .bind(new.new_entity_id)
    .bind(new.reason_code)
    .bind(new.diff)
    .fetch_one(executor)
    .await
    .with_context(|| {
        format!(
            "failed to record {} change for {} in program {}",
            new.change_type, new.planned, new.program_id
        )
    })?;

    Ok(event)
}

/// All change events for a program, ordered by `(created_at, id)`.
pub async fn list_changes_for_program(
    executor: impl PgExecutor<'_>,
    program_id: Uuid,
) -> Result<Vec<PlanChangeEvent>> {
    let events = sqlx::query_as::<_, PlanChangeEvent>(
        "SELECT * FROM plan_change_events \
         WHERE program_id = $1 \
         ORDER BY created_at ASC, id ASC",
    )
    .bind(program_id)
    .fetch_all(executor)
    .await
    .with_context(|| format!("failed to list changes for program {program_id}"))?;

    Ok(events)
}

/// One page of a program's change events strictly after `after`.
pub async fn page_changes_for_program(
    executor: impl PgExecutor<'_>,
    program_id: Uuid,
    after: Option<(DateTime<Utc>, i64)>,
    limit: i64,
) -> Result<Vec<PlanChangeEvent>> {
    let (after_ts, after_id) = after.unzip();
    let events = sqlx::query_as::<_, PlanChangeEvent>(
        "SELECT * FROM plan_change_events \
         WHERE program_id = $1 \
           AND ($2::timestamptz IS NULL OR (created_at, id) > ($2, $3)) \
         ORDER BY created_at ASC, id ASC \
         LIMIT $4",
    )
    .bind(program_id)
    .bind(after_ts)
    .bind(after_id)
    .bind(limit)
    .fetch_all(executor)
    .await
    .with_context(|| format!("failed to page changes for program {program_id}"))?;

    Ok(events)
}

/// One page of an owner's change events with `created_at` in `[from, to)`,
/// strictly after `after`.
pub async fn page_changes_for_owner(
    executor: impl PgExecutor<'_>,
    owner_id: Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    after: Option<(DateTime<Utc>, i64)>,
    limit: i64,
) -> Result<Vec<PlanChangeEvent>> {
    let (after_ts, after_id) = after.unzip();
    let events = sqlx::query_as::<_, PlanChangeEvent>(
        "SELECT * FROM plan_change_events \
         WHERE owner_id = $1 \
           AND created_at >= $2 AND created_at < $3 \
           AND ($4::timestamptz IS NULL OR (created_at, id) > ($4, $5)) \
         ORDER BY created_at ASC, id ASC \
         LIMIT $6",
    )
    .bind(owner_id)
    .bind(from)
    .bind(to)
    .bind(after_ts)
    .bind(after_id)
    .bind(limit)
    .fetch_all(executor)
    .await
    .with_context(|| format!("failed to page changes for owner {owner_id}"))?;

    Ok(events)
}
