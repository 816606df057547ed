//! Override Engine.
//!
//! At most one override per (owner, program, date) is active at a time. A
//! new request for a day that already has one supersedes it: the old row
//! moves to `undone` with `superseded_by` set, and history is never
//! deleted.
//!
//! ```text
//! pending      -> approved | rejected | undone
//! approved     -> undone
//! auto_applied -> undone
//! ```

pub mod policy;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use stride_db::errors as db_errors;
use stride_db::models::{
    ChangeType, DayOverride, EntityType, InstanceState, MacroTargets, Modification,
    OverrideReason, OverrideStatus, PlannedEntityRef, Program,
};
use stride_db::queries::{adherence, meals, overrides as db, programs, sessions};

use crate::audit::{self, ChangeRecord};
use crate::calendar;
use crate::error::{PlanError, PlanResult};

pub use policy::{OverridePolicy, apply_modification, validate_modification, volume_factor};

const ACTIVE_KEY: &str = "day_overrides_active_key";

/// Reason code written to the audit log when an applied override changes a
/// day whose items were already logged.
pub const RETROACTIVE_REASON: &str = "retroactive_override";

/// The override state machine.
pub struct OverrideStateMachine;

impl OverrideStateMachine {
    pub fn is_valid_transition(from: OverrideStatus, to: OverrideStatus) -> bool {
        matches!(
            (from, to),
            (
                OverrideStatus::Pending,
                OverrideStatus::Approved | OverrideStatus::Rejected | OverrideStatus::Undone
            ) | (
                OverrideStatus::Approved | OverrideStatus::AutoApplied,
                OverrideStatus::Undone
            )
        )
    }
}

/// Parse a reason code, rejecting unknown codes as validation errors.
pub fn parse_reason(code: &str) -> PlanResult<OverrideReason> {
    code.trim()
        .parse::<OverrideReason>()
        .map_err(|e| PlanError::validation(e.to_string()))
}

/// A request to adjust one day of a program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub owner_id: Uuid,
    pub program_id: Uuid,
    pub date: NaiveDate,
    pub reason_code: OverrideReason,
    #[serde(default)]
    pub justification: String,
    pub modification: Modification,
}

async fn load_program(conn: &mut PgConnection, program_id: Uuid) -> PlanResult<Program> {
    programs::get_program(&mut *conn, program_id)
        .await?
        .ok_or_else(|| PlanError::not_found(format!("program {program_id}")))
}

/// Write an `edit` event for every live item of the override's day that
/// already has adherence records. `previous` is the status the override
/// left, if it changed status rather than being created.
async fn record_retroactive_changes(
    conn: &mut PgConnection,
    program: &Program,
    ov: &DayOverride,
    previous: Option<OverrideStatus>,
) -> PlanResult<usize> {
    let day_sessions = sessions::list_sessions_between(&mut *conn, program.id, ov.date, ov.date).await?;
    let day_meals = meals::list_meals_between(&mut *conn, program.id, ov.date, ov.date).await?;

    let session_ids: Vec<Uuid> = day_sessions
        .iter()
        .filter(|s| s.state != InstanceState::Superseded)
        .map(|s| s.id)
        .collect();
    let meal_ids: Vec<Uuid> = day_meals
        .iter()
        .filter(|m| m.state != InstanceState::Superseded)
        .map(|m| m.id)
        .collect();

    let mut touched = Vec::new();
    for id in adherence::entities_with_records(&mut *conn, EntityType::Session, &session_ids).await? {
        touched.push(PlannedEntityRef::session(id));
    }
    for id in adherence::entities_with_records(&mut *conn, EntityType::Meal, &meal_ids).await? {
        touched.push(PlannedEntityRef::meal(id));
    }

    for entity in &touched {
        audit::record_change(
            &mut *conn,
            ChangeRecord {
                program_id: program.id,
                owner_id: ov.owner_id,
                change_type: ChangeType::Edit,
                entity: *entity,
                new_entity: None,
                reason_code: RETROACTIVE_REASON,
                diff: json!({
                    "override_id": ov.id,
                    "date": ov.date,
                    "status": ov.status,
                    "previous_status": previous,
                    "modification": ov.modification.0,
                }),
            },
        )
        .await?;
    }
    if !touched.is_empty() {
        info!(override_id = %ov.id, date = %ov.date, items = touched.len(), "retroactive override recorded");
    }
    Ok(touched.len())
}

/// Side effects shared by every status change: retroactive audit entries
/// when the day's targets moved (the override became applied or stopped
/// being applied), and a calendar refresh of its day.
async fn after_status_change(
    conn: &mut PgConnection,
    program: &Program,
    ov: &DayOverride,
    previous: Option<OverrideStatus>,
) -> PlanResult<()> {
    let was_applied = previous.is_some_and(OverrideStatus::is_applied);
    if ov.status.is_applied() || was_applied {
        record_retroactive_changes(&mut *conn, program, ov, previous).await?;
    }
    calendar::project_in(&mut *conn, program, ov.date, ov.date).await?;
    Ok(())
}

/// Request an adjustment for one day.
///
/// A request inside the policy's safe bound starts `auto_applied`, any
/// other starts `pending`. If the day already has an active override it is
/// superseded. When two writers race on the same day, the loser gets a
/// retryable `Conflict`.
pub async fn request_override(
    pool: &PgPool,
    policy: &OverridePolicy,
    request: &OverrideRequest,
) -> PlanResult<DayOverride> {
    validate_modification(&request.modification)?;

    let mut tx = pool.begin().await?;
    let program = load_program(&mut tx, request.program_id).await?;
    if program.owner_id != request.owner_id {
        return Err(PlanError::Forbidden(format!(
            "program {} belongs to another owner",
            program.id
        )));
    }
    if !program.covers(request.date) {
        return Err(PlanError::validation(format!(
            "{} is outside the validity window of program {}",
            request.date, program.id
        )));
    }

    let new_id = Uuid::new_v4();
    let previous =
        db::lock_active_override(&mut *tx, request.owner_id, request.program_id, request.date)
            .await?;
    if let Some(old) = &previous {
        let moved = db::transition_override_status(
            &mut *tx,
            old.id,
            old.status,
            OverrideStatus::Undone,
            Some(new_id),
        )
        .await?;
        if moved == 0 {
            return Err(PlanError::retryable_conflict(format!(
                "override {} changed while being superseded",
                old.id
            )));
        }
    }

    let status = policy.initial_status(&request.modification);
    let inserted = db::insert_override(
        &mut *tx,
        &db::NewDayOverride {
            id: new_id,
            owner_id: request.owner_id,
            program_id: request.program_id,
            date: request.date,
            reason_code: request.reason_code,
            justification: request.justification.trim(),
            modification: &request.modification,
            status,
        },
    )
    .await;
    let created = match inserted {
        Ok(row) => row,
        Err(err)
            if db_errors::is_unique_violation(&err)
                && db_errors::constraint_name(&err).as_deref() == Some(ACTIVE_KEY) =>
        {
            warn!(
                owner_id = %request.owner_id,
                program_id = %request.program_id,
                date = %request.date,
                "concurrent override request lost the race"
            );
            return Err(PlanError::retryable_conflict(format!(
                "another override for {} was created concurrently",
                request.date
            )));
        }
        Err(err) => return Err(err.into()),
    };

    // A pending replacement leaves the day on base targets, so withdrawing
    // an applied predecessor is itself a retroactive change.
    if let Some(old) = previous.as_ref() {
        if old.status.is_applied() && !created.status.is_applied() {
            let withdrawn = DayOverride {
                status: OverrideStatus::Undone,
                superseded_by: Some(created.id),
                ..old.clone()
            };
            record_retroactive_changes(&mut tx, &program, &withdrawn, Some(old.status)).await?;
        }
    }
    after_status_change(&mut tx, &program, &created, None).await?;
    tx.commit().await?;

    info!(
        override_id = %created.id,
        program_id = %created.program_id,
        date = %created.date,
        status = %created.status,
        superseded = ?previous.as_ref().map(|o| o.id),
        "override requested"
    );
    Ok(created)
}

async fn change_status(
    pool: &PgPool,
    override_id: Uuid,
    to: OverrideStatus,
) -> PlanResult<DayOverride> {
    let mut tx = pool.begin().await?;
    let current = db::lock_override(&mut *tx, override_id)
        .await?
        .ok_or_else(|| PlanError::not_found(format!("override {override_id}")))?;

    if !OverrideStateMachine::is_valid_transition(current.status, to) {
        warn!(%override_id, from = %current.status, %to, "rejected override transition");
        return Err(PlanError::invalid_transition(
            format!("override {override_id}"),
            current.status,
            to,
        ));
    }

    let moved = db::transition_override_status(&mut *tx, override_id, current.status, to, None).await?;
    if moved == 0 {
        return Err(PlanError::retryable_conflict(format!(
            "override {override_id} changed concurrently"
        )));
    }
    let updated = db::get_override(&mut *tx, override_id)
        .await?
        .ok_or_else(|| PlanError::not_found(format!("override {override_id}")))?;

    let program = load_program(&mut tx, updated.program_id).await?;
    after_status_change(&mut tx, &program, &updated, Some(current.status)).await?;
    tx.commit().await?;

    info!(%override_id, from = %current.status, to = %updated.status, "override status changed");
    Ok(updated)
}

/// Approve a pending override; its modification applies from now on.
pub async fn approve_override(pool: &PgPool, override_id: Uuid) -> PlanResult<DayOverride> {
    change_status(pool, override_id, OverrideStatus::Approved).await
}

/// Reject a pending override.
pub async fn reject_override(pool: &PgPool, override_id: Uuid) -> PlanResult<DayOverride> {
    change_status(pool, override_id, OverrideStatus::Rejected).await
}

/// Withdraw an override. The base plan stands again for that day.
pub async fn undo_override(pool: &PgPool, override_id: Uuid) -> PlanResult<DayOverride> {
    change_status(pool, override_id, OverrideStatus::Undone).await
}

pub async fn get_override(pool: &PgPool, override_id: Uuid) -> PlanResult<DayOverride> {
    db::get_override(pool, override_id)
        .await?
        .ok_or_else(|| PlanError::not_found(format!("override {override_id}")))
}

/// The non-terminal override for a day, if any.
pub async fn get_active_override(
    pool: &PgPool,
    owner_id: Uuid,
    program_id: Uuid,
    date: NaiveDate,
) -> PlanResult<Option<DayOverride>> {
    Ok(db::get_active_override(pool, owner_id, program_id, date).await?)
}

/// Every override ever requested for a day, oldest first.
pub async fn list_overrides(
    pool: &PgPool,
    owner_id: Uuid,
    program_id: Uuid,
    date: NaiveDate,
) -> PlanResult<Vec<DayOverride>> {
    Ok(db::list_overrides_for_date(pool, owner_id, program_id, date).await?)
}

/// Targets in force for one day: the program's base values with the
/// applied override, if any, layered on top.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveTargets {
    pub program_id: Uuid,
    pub date: NaiveDate,
    pub base_macros: MacroTargets,
    pub macros: MacroTargets,
    pub training_volume_factor: f64,
    pub sessions_cancelled: bool,
    /// Live sessions planned for the day.
    pub sessions: Vec<Uuid>,
    pub applied_override: Option<Uuid>,
}

/// Combine base values with an optional applied override. Pending
/// overrides do not change anything.
pub fn compose_targets(
    program: &Program,
    date: NaiveDate,
    sessions: Vec<Uuid>,
    active: Option<&DayOverride>,
) -> EffectiveTargets {
    let base = program.macros.0;
    let applied = active.filter(|o| o.status.is_applied());
    match applied {
        Some(ov) => EffectiveTargets {
            program_id: program.id,
            date,
            base_macros: base,
            macros: apply_modification(base, &ov.modification.0),
            training_volume_factor: volume_factor(&ov.modification.0),
            sessions_cancelled: ov.modification.0.cancel_sessions,
            sessions,
            applied_override: Some(ov.id),
        },
        None => EffectiveTargets {
            program_id: program.id,
            date,
            base_macros: base,
            macros: base,
            training_volume_factor: 1.0,
            sessions_cancelled: false,
            sessions,
            applied_override: None,
        },
    }
}

/// Compute the effective targets of `program_id` on `date` for `owner_id`.
pub async fn effective_targets(
    pool: &PgPool,
    owner_id: Uuid,
    program_id: Uuid,
    date: NaiveDate,
) -> PlanResult<EffectiveTargets> {
    let program = programs::get_program(pool, program_id)
        .await?
        .ok_or_else(|| PlanError::not_found(format!("program {program_id}")))?;
    if program.owner_id != owner_id {
        return Err(PlanError::Forbidden(format!(
            "program {program_id} belongs to another owner"
        )));
    }
    if !program.covers(date) {
        return Err(PlanError::validation(format!(
            "{date} is outside the validity window of program {program_id}"
        )));
    }

    let sessions = sessions::list_sessions_between(pool, program_id, date, date)
        .await?
        .into_iter()
        .filter(|s| s.state != InstanceState::Superseded)
        .map(|s| s.id)
        .collect();
    let active = db::get_active_override(pool, owner_id, program_id, date).await?;
    Ok(compose_targets(&program, date, sessions, active.as_ref()))
}
