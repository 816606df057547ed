//! Database query functions for the derived `calendar_events` table.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{CalendarEvent, CalendarEventType};

/// Parameters for inserting one projected calendar row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCalendarEvent {
    pub owner_id: Uuid,
    pub program_id: Uuid,
    pub date: NaiveDate,
    pub event_type: CalendarEventType,
    pub ref_table: &'static str,
    pub ref_id: Uuid,
    pub title: String,
    pub status: String,
}

/// Remove a program's projected rows in `[from, to]`. Returns the number of
/// rows deleted.
pub async fn delete_events_between(
    executor: impl PgExecutor<'_>,
    program_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM calendar_events WHERE program_id = $1 AND date BETWEEN $2 AND $3",
    )
    .bind(program_id)
    .bind(from)
    .bind(to)
    .execute(executor)
    .await
    .with_context(|| {
        format!("failed to clear calendar for program {program_id} between {from} and {to}")
    })?;

    Ok(result.rows_affected())
}

/// Insert one projected row.
pub async fn insert_event(
    executor: impl PgExecutor<'_>,
    new: &NewCalendarEvent,
) -> Result<CalendarEvent> {
    let event = sqlx::query_as::<_, CalendarEvent>(
        "INSERT INTO calendar_events \
         (owner_id, program_id, date, event_type, ref_table, ref_id, title, status) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(new.owner_id)
    .bind(new.program_id)
    .bind(new.date)
    .bind(new.event_type)
    .bind(new.ref_table)
    .bind(new.ref_id)
    .bind(&new.title)
    .bind(&new.status)
    .fetch_one(executor)
    .await
    .with_context(|| {
        format!(
            "failed to insert calendar event {} {} on {}",
            new.event_type, new.ref_id, new.date
        )
    })?;

    Ok(event)
}

/// A program's projected rows in `[from, to]`, ordered by
/// `(date, event_type, ref_id)`.
pub async fn list_events_between(
    executor: impl PgExecutor<'_>,
    program_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<CalendarEvent>> {
    let events = sqlx::query_as::<_, CalendarEvent>(
        "SELECT * FROM calendar_events \
         WHERE program_id = $1 AND date BETWEEN $2 AND $3 \
         ORDER BY date ASC, event_type ASC, ref_id ASC",
    )
    .bind(program_id)
    .bind(from)
    .bind(to)
    .fetch_all(executor)
    .await
    .with_context(|| {
        format!("failed to list calendar for program {program_id} between {from} and {to}")
    })?;

    Ok(events)
}
