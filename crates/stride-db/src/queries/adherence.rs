//! Database query functions for the `adherence_records` table.

use anyhow::{Context, Result};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{AdherenceRecord, AdherenceStatus, EntityType, PlannedEntityRef};

/// Parameters for inserting an adherence record.
#[derive(Debug, Clone)]
pub struct NewAdherenceRecord<'a> {
    pub owner_id: Uuid,
    pub planned: PlannedEntityRef,
    pub status: AdherenceStatus,
    pub actual_ref: Option<&'a str>,
    pub similarity_score: Option<f64>,
}

/// Insert an adherence record. Records are never updated afterwards.
pub async fn insert_adherence(
    executor: impl PgExecutor<'_>,
    new: &NewAdherenceRecord<'_>,
) -> Result<AdherenceRecord> {
    let record = sqlx::query_as::<_, AdherenceRecord>(
        "INSERT INTO adherence_records \
         (owner_id, planned_entity_type, planned_entity_id, status, actual_ref, similarity_score) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(new.owner_id)
    .bind(new.planned.entity_type)
    .bind(new.planned.id)
    .bind(new.status)
    .bind(new.actual_ref)
    .bind(new.similarity_score)
    .fetch_one(executor)
    .await
    .with_context(|| format!("failed to insert adherence record for {}", new.planned))?;

    Ok(record)
}

/// All records for a planned entity, oldest first.
pub async fn list_adherence_for_entity(
    executor: impl PgExecutor<'_>,
    planned: PlannedEntityRef,
) -> Result<Vec<AdherenceRecord>> {
    let records = sqlx::query_as::<_, AdherenceRecord>(
        "SELECT * FROM adherence_records \
         WHERE planned_entity_type = $1 AND planned_entity_id = $2 \
         ORDER BY recorded_at ASC, id ASC",
    )
    .bind(planned.entity_type)
    .bind(planned.id)
    .fetch_all(executor)
    .await
    .with_context(|| format!("failed to list adherence records for {planned}"))?;

    Ok(records)
}

/// The most recent record for a planned entity; it defines the entity's
/// current outcome.
pub async fn latest_adherence_for_entity(
    executor: impl PgExecutor<'_>,
    planned: PlannedEntityRef,
) -> Result<Option<AdherenceRecord>> {
    let record = sqlx::query_as::<_, AdherenceRecord>(
        "SELECT * FROM adherence_records \
         WHERE planned_entity_type = $1 AND planned_entity_id = $2 \
         ORDER BY recorded_at DESC, id DESC \
         LIMIT 1",
    )
    .bind(planned.entity_type)
    .bind(planned.id)
    .fetch_optional(executor)
    .await
    .with_context(|| format!("failed to fetch latest adherence record for {planned}"))?;

    Ok(record)
}

/// Which of `ids` (all of `entity_type`) already have at least one record.
pub async fn entities_with_records(
    executor: impl PgExecutor<'_>,
    entity_type: EntityType,
    ids: &[Uuid],
) -> Result<Vec<Uuid>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT DISTINCT planned_entity_id FROM adherence_records \
         WHERE planned_entity_type = $1 AND planned_entity_id = ANY($2) \
         ORDER BY planned_entity_id",
    )
    .bind(entity_type)
    .bind(ids)
    .fetch_all(executor)
    .await
    .context("failed to look up entities with adherence records")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Current outcome counts for a program: for every planned entity of the
/// program only its most recent record is counted.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct AdherenceSummary {
    pub completed: i64,
    pub similar: i64,
    pub skipped: i64,
    pub partial: i64,
    pub unknown: i64,
    pub total: i64,
}

/// Summarize the current outcome of every recorded entity in a program.
pub async fn adherence_summary_for_program(
    executor: impl PgExecutor<'_>,
    program_id: Uuid,
) -> Result<AdherenceSummary> {
    let rows: Vec<(AdherenceStatus, i64)> = sqlx::query_as(
        "WITH entities AS ( \
             SELECT 'session' AS kind, id FROM session_instances WHERE program_id = $1 \
             UNION ALL \
             SELECT 'meal' AS kind, id FROM meal_instances WHERE program_id = $1 \
         ), latest AS ( \
             SELECT DISTINCT ON (a.planned_entity_type, a.planned_entity_id) a.status \
             FROM adherence_records a \
             JOIN entities e ON e.kind = a.planned_entity_type AND e.id = a.planned_entity_id \
             ORDER BY a.planned_entity_type, a.planned_entity_id, a.recorded_at DESC, a.id DESC \
         ) \
         SELECT status, COUNT(*) FROM latest GROUP BY status",
    )
    .bind(program_id)
    .fetch_all(executor)
    .await
    .with_context(|| format!("failed to summarize adherence for program {program_id}"))?;

    let mut summary = AdherenceSummary::default();
    for (status, count) in rows {
        match status {
            AdherenceStatus::Completed => summary.completed = count,
            AdherenceStatus::Similar => summary.similar = count,
            AdherenceStatus::Skipped => summary.skipped = count,
            AdherenceStatus::Partial => summary.partial = count,
            AdherenceStatus::Unknown => summary.unknown = count,
        }
        summary.total += count;
    }
    Ok(summary)
}
