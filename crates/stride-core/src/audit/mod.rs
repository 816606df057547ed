//! Change Audit Log.
//!
//! Every structural change to a plan item is appended here inside the same
//! transaction as the change itself. Reads come back ordered by
//! `(created_at, id)`, either as a list or as a lazy stream that can be
//! resumed from a [`ChangeCursor`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgExecutor, PgPool};
use tracing::debug;
use uuid::Uuid;

use stride_db::models::{ChangeType, PlanChangeEvent, PlannedEntityRef};
use stride_db::queries::change_events::{self as db, NewPlanChangeEvent};

use crate::error::{PlanError, PlanResult};

/// Default number of rows fetched per round trip by [`stream_changes`].
pub const DEFAULT_PAGE_SIZE: i64 = 200;

/// One audit entry to append.
#[derive(Debug, Clone)]
pub struct ChangeRecord<'a> {
    pub program_id: Uuid,
    pub owner_id: Uuid,
    pub change_type: ChangeType,
    pub entity: PlannedEntityRef,
    pub new_entity: Option<PlannedEntityRef>,
    pub reason_code: &'a str,
    pub diff: Value,
}

/// Append a change event. Call it on the transaction that performs the
/// change so the log and the plan cannot diverge.
pub async fn record_change(
    executor: impl PgExecutor<'_>,
    record: ChangeRecord<'_>,
) -> PlanResult<PlanChangeEvent> {
    let reason_code = record.reason_code.trim();
    if reason_code.is_empty() {
        return Err(PlanError::validation("reason_code must not be empty"));
    }
    if let Some(new_entity) = record.new_entity {
        if new_entity.entity_type != record.entity.entity_type {
            return Err(PlanError::validation(format!(
                "replacement {new_entity} is not the same kind as {}",
                record.entity
            )));
        }
    }

    let event = db::insert_change_event(
        executor,
        &NewPlanChangeEvent {
            program_id: record.program_id,
            owner_id: record.owner_id,
            change_type: record.change_type,
            planned: record.entity,
            new_entity_id: record.new_entity.map(|e| e.id),
            reason_code,
            diff: &record.diff,
        },
    )
    .await?;

    debug!(
        event_id = event.id,
        program_id = %event.program_id,
        change_type = %event.change_type,
        entity = %record.entity,
        "change recorded"
    );
    Ok(event)
}

/// Every change of a program, oldest first.
pub async fn list_changes_for_program(
    pool: &PgPool,
    program_id: Uuid,
) -> PlanResult<Vec<PlanChangeEvent>> {
    Ok(db::list_changes_for_program(pool, program_id).await?)
}

/// Which part of the log to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeFilter {
    Program(Uuid),
    /// Changes of an owner with `created_at` in `[from, to)`.
    Owner {
        owner_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

/// Position just after the last event a consumer has seen.
///
/// Written as `<rfc3339 timestamp>/<event id>` when it has to leave the
/// process (CLI flag, HTTP query parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCursor {
    pub created_at: DateTime<Utc>,
    pub id: i64,
}

impl From<&PlanChangeEvent> for ChangeCursor {
    fn from(event: &PlanChangeEvent) -> Self {
        Self {
            created_at: event.created_at,
            id: event.id,
        }
    }
}

impl fmt::Display for ChangeCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.created_at.to_rfc3339(), self.id)
    }
}

impl FromStr for ChangeCursor {
    type Err = ChangeCursorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ts, id) = s
            .rsplit_once('/')
            .ok_or_else(|| ChangeCursorParseError(s.to_owned()))?;
        let created_at = DateTime::parse_from_rfc3339(ts)
            .map_err(|_| ChangeCursorParseError(s.to_owned()))?
            .with_timezone(&Utc);
        let id = id
            .parse::<i64>()
            .map_err(|_| ChangeCursorParseError(s.to_owned()))?;
        Ok(Self { created_at, id })
    }
}

/// Error returned when parsing an invalid [`ChangeCursor`] string.
#[derive(Debug, Clone)]
pub struct ChangeCursorParseError(pub String);

impl fmt::Display for ChangeCursorParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid change cursor {:?} (expected <rfc3339>/<id>)",
            self.0
        )
    }
}

impl std::error::Error for ChangeCursorParseError {}

async fn fetch_page(
    pool: &PgPool,
    filter: ChangeFilter,
    after: Option<ChangeCursor>,
    limit: i64,
) -> PlanResult<Vec<PlanChangeEvent>> {
    let after = after.map(|c| (c.created_at, c.id));
    let page = match filter {
        ChangeFilter::Program(program_id) => {
            db::page_changes_for_program(pool, program_id, after, limit).await?
        }
        ChangeFilter::Owner { owner_id, from, to } => {
            db::page_changes_for_owner(pool, owner_id, from, to, after, limit).await?
        }
    };
    Ok(page)
}

/// Lazily stream the events selected by `filter`, starting after `start`.
///
/// Rows are fetched `page_size` at a time. The stream ends once a page comes
/// back short, so events appended while it runs are picked up only if they
/// sort after the cursor. Stop at any point and pass the cursor of the last
/// event received to resume.
pub fn stream_changes(
    pool: PgPool,
    filter: ChangeFilter,
    page_size: i64,
    start: Option<ChangeCursor>,
) -> impl Stream<Item = PlanResult<PlanChangeEvent>> + Send + 'static {
    let limit = page_size.max(1);
    async_stream::try_stream! {
        if let ChangeFilter::Owner { from, to, .. } = filter {
            if from > to {
                Err::<(), _>(PlanError::validation(format!("time range is reversed: {from} > {to}")))?;
            }
        }

        let mut cursor = start;
        loop {
            let page = fetch_page(&pool, filter, cursor, limit).await?;
            let fetched = page.len();
            for event in page {
                cursor = Some(ChangeCursor::from(&event));
                yield event;
            }
            if i64::try_from(fetched).unwrap_or(i64::MAX) < limit {
                break;
            }
        }
    }
}
