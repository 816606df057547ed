//! Database query functions for the `session_instances` and
//! `exercise_plan_items` tables.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{ExercisePlanItem, ExerciseSpec, InstanceState, SessionInstance};

/// Parameters for inserting a session instance.
#[derive(Debug, Clone)]
pub struct NewSessionInstance<'a> {
    pub program_id: Uuid,
    pub week_index: i32,
    pub day_index: i32,
    pub session_kind: &'a str,
    pub parameters: &'a serde_json::Value,
    /// The instance this one replaces, for edits.
    pub supersedes_id: Option<Uuid>,
}

/// Insert a session instance in state `planned`. Fails on the live-slot
/// unique index when the slot is already taken.
pub async fn insert_session(
    executor: impl PgExecutor<'_>,
    new: &NewSessionInstance<'_>,
) -> Result<SessionInstance> {
    let session = sqlx::query_as::<_, SessionInstance>(
        "INSERT INTO session_instances \
         (program_id, week_index, day_index, session_kind, parameters, supersedes_id) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(new.program_id)
    .bind(new.week_index)
    .bind(new.day_index)
    .bind(new.session_kind)
    .bind(new.parameters)
    .bind(new.supersedes_id)
    .fetch_one(executor)
    .await
    .with_context(|| {
        format!(
            "failed to insert session for program {} at week {} day {}",
            new.program_id, new.week_index, new.day_index
        )
    })?;

    Ok(session)
}

/// Insert one exercise row under a session.
pub async fn insert_exercise(
    executor: impl PgExecutor<'_>,
    session_id: Uuid,
    spec: &ExerciseSpec,
) -> Result<ExercisePlanItem> {
    let item = sqlx::query_as::<_, ExercisePlanItem>(
        "INSERT INTO exercise_plan_items \
         (session_instance_id, order_index, exercise_key, name, sets, reps, load_kg, rest_seconds, notes) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING *",
    )
    .bind(session_id)
    .bind(spec.order_index)
    .bind(&spec.exercise_key)
    .bind(&spec.name)
    .bind(spec.sets)
    .bind(&spec.reps)
    .bind(spec.load_kg)
    .bind(spec.rest_seconds)
    .bind(&spec.notes)
    .fetch_one(executor)
    .await
    .with_context(|| {
        format!(
            "failed to insert exercise {} for session {session_id}",
            spec.order_index
        )
    })?;

    Ok(item)
}

/// Fetch a session instance by ID.
pub async fn get_session(executor: impl PgExecutor<'_>, id: Uuid) -> Result<Option<SessionInstance>> {
    let session =
        sqlx::query_as::<_, SessionInstance>("SELECT * FROM session_instances WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
            .with_context(|| format!("failed to fetch session {id}"))?;

    Ok(session)
}

/// Fetch a session instance and hold a row lock until the transaction ends.
pub async fn lock_session(
    executor: impl PgExecutor<'_>,
    id: Uuid,
) -> Result<Option<SessionInstance>> {
    let session = sqlx::query_as::<_, SessionInstance>(
        "SELECT * FROM session_instances WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(executor)
    .await
    .with_context(|| format!("failed to lock session {id}"))?;

    Ok(session)
}

/// List every session of a program, superseded history included, in slot
/// order.
pub async fn list_sessions_for_program(
    executor: impl PgExecutor<'_>,
    program_id: Uuid,
) -> Result<Vec<SessionInstance>> {
    let sessions = sqlx::query_as::<_, SessionInstance>(
        "SELECT * FROM session_instances \
         WHERE program_id = $1 \
         ORDER BY week_index ASC, day_index ASC, created_at ASC",
    )
    .bind(program_id)
    .fetch_all(executor)
    .await
    .with_context(|| format!("failed to list sessions for program {program_id}"))?;

    Ok(sessions)
}

/// List the sessions of a program whose slot date lies in `[from, to]`.
pub async fn list_sessions_between(
    executor: impl PgExecutor<'_>,
    program_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<SessionInstance>> {
    let sessions = sqlx::query_as::<_, SessionInstance>(
        "SELECT s.* FROM session_instances s \
         JOIN programs p ON p.id = s.program_id \
         WHERE s.program_id = $1 \
           AND p.start_date + (s.week_index * 7 + s.day_index) BETWEEN $2 AND $3 \
         ORDER BY s.week_index ASC, s.day_index ASC, s.created_at ASC",
    )
    .bind(program_id)
    .bind(from)
    .bind(to)
    .fetch_all(executor)
    .await
    .with_context(|| {
        format!("failed to list sessions for program {program_id} between {from} and {to}")
    })?;

    Ok(sessions)
}

/// The live (non-superseded) session occupying a slot, if any.
pub async fn get_live_session_at(
    executor: impl PgExecutor<'_>,
    program_id: Uuid,
    week_index: i32,
    day_index: i32,
) -> Result<Option<SessionInstance>> {
    let session = sqlx::query_as::<_, SessionInstance>(
        "SELECT * FROM session_instances \
         WHERE program_id = $1 AND week_index = $2 AND day_index = $3 \
           AND state <> 'superseded'",
    )
    .bind(program_id)
    .bind(week_index)
    .bind(day_index)
    .fetch_optional(executor)
    .await
    .with_context(|| {
        format!("failed to look up session slot ({week_index}, {day_index}) of program {program_id}")
    })?;

    Ok(session)
}

/// List a session's exercises in order.
pub async fn list_exercises(
    executor: impl PgExecutor<'_>,
    session_id: Uuid,
) -> Result<Vec<ExercisePlanItem>> {
    let items = sqlx::query_as::<_, ExercisePlanItem>(
        "SELECT * FROM exercise_plan_items \
         WHERE session_instance_id = $1 \
         ORDER BY order_index ASC",
    )
    .bind(session_id)
    .fetch_all(executor)
    .await
    .with_context(|| format!("failed to list exercises for session {session_id}"))?;

    Ok(items)
}

/// Atomically move a session from one state to another.
///
/// Optimistic lock: the row is only updated while its state still equals
/// `from`. Returns the number of rows affected (0 means the state did not
/// match or the session does not exist).
pub async fn transition_session_state(
    executor: impl PgExecutor<'_>,
    id: Uuid,
    from: InstanceState,
    to: InstanceState,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE session_instances \
         SET state = $1, state_changed_at = now() \
         WHERE id = $2 AND state = $3",
    )
    .bind(to)
    .bind(id)
    .bind(from)
    .execute(executor)
    .await
    .with_context(|| format!("failed to transition session {id} from {from} to {to}"))?;

    Ok(result.rows_affected())
}
