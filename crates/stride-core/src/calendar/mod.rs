//! Calendar Projector.
//!
//! The calendar table is a derived view: one row per (date, event type,
//! source row). Projecting a range deletes whatever was projected there
//! before and rebuilds it from sessions, meals and active overrides, so
//! running it twice yields the same rows.

use chrono::{Days, NaiveDate};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};
use uuid::Uuid;

use stride_db::models::{
    CalendarEvent, CalendarEventType, DayOverride, InstanceState, MealInstance, Program,
    SessionInstance,
};
use stride_db::queries::calendar::{self as db, NewCalendarEvent};
use stride_db::queries::{meals, overrides, programs, sessions};

use crate::error::{PlanError, PlanResult};

/// Longest range a single projection may cover.
pub const MAX_PROJECTION_DAYS: i64 = 3 * 366;

/// First and last date of a program's week grid, if it has any weeks.
pub fn program_span(program: &Program) -> Option<(NaiveDate, NaiveDate)> {
    let days = u64::try_from(program.duration_weeks).ok()? * 7;
    if days == 0 {
        return None;
    }
    let last = program.start_date.checked_add_days(Days::new(days - 1))?;
    Some((program.start_date, last))
}

/// Build the calendar rows for `[from, to]` from source rows.
///
/// Superseded instances and terminal overrides produce nothing, as do
/// instances whose slot date falls outside the range. The result is sorted
/// by `(date, event_type, ref_id)`.
pub fn build_events(
    program: &Program,
    sessions: &[SessionInstance],
    meals: &[MealInstance],
    overrides: &[DayOverride],
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<NewCalendarEvent> {
    let in_range = |date: &NaiveDate| *date >= from && *date <= to;
    let mut events = Vec::new();

    for session in sessions
        .iter()
        .filter(|s| s.program_id == program.id && s.state != InstanceState::Superseded)
    {
        let Some(date) = program.date_for(session.week_index, session.day_index) else {
            continue;
        };
        if in_range(&date) {
            events.push(NewCalendarEvent {
                owner_id: program.owner_id,
                program_id: program.id,
                date,
                event_type: CalendarEventType::Session,
                ref_table: "session_instances",
                ref_id: session.id,
                title: session.session_kind.clone(),
                status: session.state.to_string(),
            });
        }
    }

    for meal in meals
        .iter()
        .filter(|m| m.program_id == program.id && m.state != InstanceState::Superseded)
    {
        let Some(date) = program.date_for(meal.week_index, meal.day_index) else {
            continue;
        };
        if in_range(&date) {
            events.push(NewCalendarEvent {
                owner_id: program.owner_id,
                program_id: program.id,
                date,
                event_type: CalendarEventType::Meal,
                ref_table: "meal_instances",
                ref_id: meal.id,
                title: meal.meal_type.clone(),
                status: meal.state.to_string(),
            });
        }
    }

    for ov in overrides
        .iter()
        .filter(|o| o.program_id == program.id && o.status.is_active() && in_range(&o.date))
    {
        events.push(NewCalendarEvent {
            owner_id: ov.owner_id,
            program_id: program.id,
            date: ov.date,
            event_type: CalendarEventType::Override,
            ref_table: "day_overrides",
            ref_id: ov.id,
            title: ov.reason_code.to_string(),
            status: ov.status.to_string(),
        });
    }

    events.sort_by(|a, b| {
        (a.date, a.event_type.as_str(), a.ref_id).cmp(&(b.date, b.event_type.as_str(), b.ref_id))
    });
    events
}

fn check_range(from: NaiveDate, to: NaiveDate) -> PlanResult<()> {
    if from > to {
        return Err(PlanError::validation(format!(
            "date range is reversed: {from} > {to}"
        )));
    }
    if (to - from).num_days() >= MAX_PROJECTION_DAYS {
        return Err(PlanError::validation(format!(
            "date range {from}..{to} exceeds {MAX_PROJECTION_DAYS} days"
        )));
    }
    Ok(())
}

/// Replace the projection of `[from, to]` inside the caller's transaction.
pub async fn project_in(
    conn: &mut PgConnection,
    program: &Program,
    from: NaiveDate,
    to: NaiveDate,
) -> PlanResult<Vec<CalendarEvent>> {
    check_range(from, to)?;

    let session_rows = sessions::list_sessions_between(&mut *conn, program.id, from, to).await?;
    let meal_rows = meals::list_meals_between(&mut *conn, program.id, from, to).await?;
    let override_rows =
        overrides::list_active_overrides_between(&mut *conn, program.id, from, to).await?;

    let removed = db::delete_events_between(&mut *conn, program.id, from, to).await?;

    let mut projected = Vec::new();
    for event in build_events(program, &session_rows, &meal_rows, &override_rows, from, to) {
        projected.push(db::insert_event(&mut *conn, &event).await?);
    }

    debug!(
        program_id = %program.id,
        %from,
        %to,
        removed,
        inserted = projected.len(),
        "calendar range projected"
    );
    Ok(projected)
}

/// Split `[from, to]` into consecutive windows no longer than
/// `MAX_PROJECTION_DAYS`.
pub fn projection_windows(from: NaiveDate, to: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    let step = Days::new(MAX_PROJECTION_DAYS as u64 - 1);
    let mut windows = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.checked_add_days(step).map_or(to, |end| end.min(to));
        windows.push((start, end));
        match end.succ_opt() {
            Some(next) => start = next,
            None => break,
        }
    }
    windows
}

/// Project a range of any length inside the caller's transaction, one
/// bounded window at a time.
pub async fn project_span_in(
    conn: &mut PgConnection,
    program: &Program,
    from: NaiveDate,
    to: NaiveDate,
) -> PlanResult<usize> {
    let mut total = 0;
    for (start, end) in projection_windows(from, to) {
        total += project_in(&mut *conn, program, start, end).await?.len();
    }
    Ok(total)
}

/// Regenerate the calendar of a program for `[from, to]`.
pub async fn project(
    pool: &PgPool,
    program_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> PlanResult<Vec<CalendarEvent>> {
    check_range(from, to)?;
    let mut tx = pool.begin().await?;
    let program = programs::get_program(&mut *tx, program_id)
        .await?
        .ok_or_else(|| PlanError::not_found(format!("program {program_id}")))?;
    let events = project_in(&mut tx, &program, from, to).await?;
    tx.commit().await?;

    info!(%program_id, %from, %to, events = events.len(), "calendar projected");
    Ok(events)
}

/// Read the stored projection of `[from, to]` without regenerating it.
pub async fn list_calendar(
    pool: &PgPool,
    program_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> PlanResult<Vec<CalendarEvent>> {
    check_range(from, to)?;
    Ok(db::list_events_between(pool, program_id, from, to).await?)
}
