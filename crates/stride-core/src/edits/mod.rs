//! Structural plan edits: edit, swap, move, reschedule and cancel.
//!
//! Edits never rewrite an instance in place. The old instance moves to
//! `superseded` and a replacement is inserted with `supersedes_id` pointing
//! back at it. The audit entry and the calendar refresh of every touched
//! date commit in the same transaction as the structural change.

use std::collections::{BTreeSet, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use stride_db::errors as db_errors;
use stride_db::models::{
    ChangeType, EntityType, ExercisePlanItem, ExerciseSpec, InstanceState, MacroTargets,
    MealInstance, MealItemPlan, MealItemSpec, PlanChangeEvent, PlannedEntityRef, Program,
    SessionInstance,
};
use stride_db::queries::{meals, programs, sessions};

use crate::audit::{self, ChangeRecord};
use crate::calendar;
use crate::error::{PlanError, PlanResult};
use crate::state::InstanceStateMachine;

/// Replacement content for [`edit_instance`]. Unset fields are copied from
/// the instance being edited. Session fields may only be used on sessions
/// and meal fields only on meals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstancePatch {
    pub session_kind: Option<String>,
    pub parameters: Option<Value>,
    pub exercises: Option<Vec<ExerciseSpec>>,
    pub meal_type: Option<String>,
    pub totals: Option<MacroTargets>,
    pub items: Option<Vec<MealItemSpec>>,
}

impl InstancePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Check that the patch fits `entity_type` and carries sane values.
    pub fn validate_for(&self, entity_type: EntityType) -> PlanResult<()> {
        if self.is_empty() {
            return Err(PlanError::validation("patch does not change anything"));
        }
        let has_session_fields =
            self.session_kind.is_some() || self.parameters.is_some() || self.exercises.is_some();
        let has_meal_fields = self.meal_type.is_some() || self.totals.is_some() || self.items.is_some();
        match entity_type {
            EntityType::Session if has_meal_fields => {
                return Err(PlanError::validation("meal fields cannot patch a session"));
            }
            EntityType::Meal if has_session_fields => {
                return Err(PlanError::validation("session fields cannot patch a meal"));
            }
            _ => {}
        }

        for (field, value) in [("session_kind", &self.session_kind), ("meal_type", &self.meal_type)] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(PlanError::validation(format!("{field} must not be empty")));
            }
        }
        if self.totals.is_some_and(|t| t.has_invalid_component()) {
            return Err(PlanError::validation("totals must be finite and non-negative"));
        }
        if let Some(exercises) = &self.exercises {
            check_orders("exercise", exercises.iter().map(|e| e.order_index))?;
        }
        if let Some(items) = &self.items {
            check_orders("meal item", items.iter().map(|i| i.order_index))?;
            if items.iter().any(|i| !i.quantity_g.is_finite() || i.quantity_g < 0.0) {
                return Err(PlanError::validation(
                    "meal item quantity must be finite and non-negative",
                ));
            }
        }
        Ok(())
    }
}

fn check_orders(kind: &str, orders: impl Iterator<Item = i32>) -> PlanResult<()> {
    let mut seen = HashSet::new();
    for order in orders {
        if order < 0 || !seen.insert(order) {
            return Err(PlanError::validation(format!(
                "{kind} order index {order} is negative or repeated"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Locked instances and slots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
struct Slot {
    week_index: i32,
    day_index: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    order_index: Option<i32>,
}

/// A planned instance held under a row lock, with its children.
enum Locked {
    Session(SessionInstance, Vec<ExercisePlanItem>),
    Meal(MealInstance, Vec<MealItemPlan>),
}

impl Locked {
    fn entity(&self) -> PlannedEntityRef {
        match self {
            Self::Session(s, _) => PlannedEntityRef::session(s.id),
            Self::Meal(m, _) => PlannedEntityRef::meal(m.id),
        }
    }

    fn program_id(&self) -> Uuid {
        match self {
            Self::Session(s, _) => s.program_id,
            Self::Meal(m, _) => m.program_id,
        }
    }

    fn slot(&self) -> Slot {
        match self {
            Self::Session(s, _) => Slot {
                week_index: s.week_index,
                day_index: s.day_index,
                order_index: None,
            },
            Self::Meal(m, _) => Slot {
                week_index: m.week_index,
                day_index: m.day_index,
                order_index: Some(m.order_index),
            },
        }
    }

    fn content(&self) -> Value {
        match self {
            Self::Session(s, exercises) => json!({
                "session_kind": s.session_kind,
                "parameters": s.parameters,
                "exercises": exercises.iter().map(ExerciseSpec::from).collect::<Vec<_>>(),
            }),
            Self::Meal(m, items) => json!({
                "meal_type": m.meal_type,
                "totals": m.totals.0,
                "items": items.iter().map(MealItemSpec::from).collect::<Vec<_>>(),
            }),
        }
    }
}

/// Lock an instance that is about to be edited. Only `planned` instances
/// may change structurally.
async fn lock_planned(conn: &mut PgConnection, entity: PlannedEntityRef) -> PlanResult<Locked> {
    let locked = match entity.entity_type {
        EntityType::Session => {
            let session = sessions::lock_session(&mut *conn, entity.id)
                .await?
                .ok_or_else(|| PlanError::not_found(entity.to_string()))?;
            let exercises = sessions::list_exercises(&mut *conn, session.id).await?;
            Locked::Session(session, exercises)
        }
        EntityType::Meal => {
            let meal = meals::lock_meal(&mut *conn, entity.id)
                .await?
                .ok_or_else(|| PlanError::not_found(entity.to_string()))?;
            let items = meals::list_meal_items(&mut *conn, meal.id).await?;
            Locked::Meal(meal, items)
        }
    };

    let state = match &locked {
        Locked::Session(s, _) => s.state,
        Locked::Meal(m, _) => m.state,
    };
    if state != InstanceState::Planned {
        warn!(%entity, %state, "edit of non-planned instance rejected");
        return Err(PlanError::invalid_transition(
            entity,
            state,
            InstanceState::Superseded,
        ));
    }
    Ok(locked)
}

async fn load_program(conn: &mut PgConnection, program_id: Uuid) -> PlanResult<Program> {
    programs::get_program(&mut *conn, program_id)
        .await?
        .ok_or_else(|| PlanError::not_found(format!("program {program_id}")))
}

fn slot_date(program: &Program, slot: Slot) -> PlanResult<NaiveDate> {
    program
        .date_for(slot.week_index, slot.day_index)
        .ok_or_else(|| PlanError::validation("slot date is out of range"))
}

fn slot_json(program: &Program, slot: Slot) -> Value {
    json!({
        "week_index": slot.week_index,
        "day_index": slot.day_index,
        "order_index": slot.order_index,
        "date": program.date_for(slot.week_index, slot.day_index),
    })
}

fn check_target_slot(program: &Program, week_index: i32, day_index: i32) -> PlanResult<()> {
    if week_index < 0 || week_index >= program.duration_weeks {
        return Err(PlanError::validation(format!(
            "week {week_index} is outside the {}-week program",
            program.duration_weeks
        )));
    }
    if !(0..=6).contains(&day_index) {
        return Err(PlanError::validation(format!(
            "day index {day_index} is outside 0..=6"
        )));
    }
    Ok(())
}

/// Whether a live instance of the same kind already holds `slot`.
async fn slot_taken(
    conn: &mut PgConnection,
    program_id: Uuid,
    entity_type: EntityType,
    slot: Slot,
) -> PlanResult<bool> {
    let taken = match entity_type {
        EntityType::Session => {
            sessions::get_live_session_at(&mut *conn, program_id, slot.week_index, slot.day_index)
                .await?
                .is_some()
        }
        EntityType::Meal => meals::get_live_meal_at(
            &mut *conn,
            program_id,
            slot.week_index,
            slot.day_index,
            slot.order_index.unwrap_or_default(),
        )
        .await?
        .is_some(),
    };
    Ok(taken)
}

/// Supersede `old` and insert its replacement at `slot`, copying children
/// unless `patch` replaces them. Returns the replacement's reference.
async fn replace(
    conn: &mut PgConnection,
    old: &Locked,
    slot: Slot,
    patch: &InstancePatch,
) -> PlanResult<PlannedEntityRef> {
    let old_ref = old.entity();
    InstanceStateMachine::transition(
        &mut *conn,
        old_ref,
        InstanceState::Planned,
        InstanceState::Superseded,
    )
    .await?;
    insert_replacement(conn, old, slot, patch).await
}

async fn insert_replacement(
    conn: &mut PgConnection,
    old: &Locked,
    slot: Slot,
    patch: &InstancePatch,
) -> PlanResult<PlannedEntityRef> {
    let old_ref = old.entity();
    let slot_conflict = |err: anyhow::Error| -> PlanError {
        if db_errors::is_unique_violation(&err) {
            PlanError::retryable_conflict(format!(
                "slot (week {}, day {}) was taken concurrently",
                slot.week_index, slot.day_index
            ))
        } else {
            err.into()
        }
    };

    match old {
        Locked::Session(s, exercises) => {
            let parameters = patch.parameters.as_ref().unwrap_or(&s.parameters);
            let session = sessions::insert_session(
                &mut *conn,
                &sessions::NewSessionInstance {
                    program_id: s.program_id,
                    week_index: slot.week_index,
                    day_index: slot.day_index,
                    session_kind: patch
                        .session_kind
                        .as_deref()
                        .map(str::trim)
                        .unwrap_or(s.session_kind.as_str()),
                    parameters,
                    supersedes_id: Some(old_ref.id),
                },
            )
            .await
            .map_err(slot_conflict)?;
            let specs: Vec<ExerciseSpec> = match &patch.exercises {
                Some(specs) => specs.clone(),
                None => exercises.iter().map(ExerciseSpec::from).collect(),
            };
            for spec in &specs {
                sessions::insert_exercise(&mut *conn, session.id, spec).await?;
            }
            Ok(PlannedEntityRef::session(session.id))
        }
        Locked::Meal(m, items) => {
            let meal = meals::insert_meal(
                &mut *conn,
                &meals::NewMealInstance {
                    program_id: m.program_id,
                    week_index: slot.week_index,
                    day_index: slot.day_index,
                    order_index: slot.order_index.unwrap_or(m.order_index),
                    meal_type: patch
                        .meal_type
                        .as_deref()
                        .map(str::trim)
                        .unwrap_or(m.meal_type.as_str()),
                    totals: patch.totals.unwrap_or(m.totals.0),
                    supersedes_id: Some(old_ref.id),
                },
            )
            .await
            .map_err(slot_conflict)?;
            let specs: Vec<MealItemSpec> = match &patch.items {
                Some(specs) => specs.clone(),
                None => items.iter().map(MealItemSpec::from).collect(),
            };
            for spec in &specs {
                meals::insert_meal_item(&mut *conn, meal.id, spec).await?;
            }
            Ok(PlannedEntityRef::meal(meal.id))
        }
    }
}

async fn reproject_dates(
    conn: &mut PgConnection,
    program: &Program,
    dates: BTreeSet<NaiveDate>,
) -> PlanResult<()> {
    for date in dates {
        calendar::project_in(&mut *conn, program, date, date).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Replace an instance's content in its current slot.
pub async fn edit_instance(
    pool: &PgPool,
    entity: PlannedEntityRef,
    patch: &InstancePatch,
    reason_code: &str,
) -> PlanResult<PlanChangeEvent> {
    patch.validate_for(entity.entity_type)?;

    let mut tx = pool.begin().await?;
    let old = lock_planned(&mut tx, entity).await?;
    let program = load_program(&mut tx, old.program_id()).await?;
    let slot = old.slot();

    let before = old.content();
    let new_ref = replace(&mut tx, &old, slot, patch).await?;
    let after = match entity.entity_type {
        EntityType::Session => {
            let s = sessions::get_session(&mut *tx, new_ref.id).await?;
            let exercises = sessions::list_exercises(&mut *tx, new_ref.id).await?;
            s.map(|s| Locked::Session(s, exercises).content())
        }
        EntityType::Meal => {
            let m = meals::get_meal(&mut *tx, new_ref.id).await?;
            let items = meals::list_meal_items(&mut *tx, new_ref.id).await?;
            m.map(|m| Locked::Meal(m, items).content())
        }
    };

    let event = audit::record_change(
        &mut *tx,
        ChangeRecord {
            program_id: program.id,
            owner_id: program.owner_id,
            change_type: ChangeType::Edit,
            entity,
            new_entity: Some(new_ref),
            reason_code,
            diff: json!({ "before": before, "after": after }),
        },
    )
    .await?;

    reproject_dates(&mut tx, &program, BTreeSet::from([slot_date(&program, slot)?])).await?;
    tx.commit().await?;

    info!(%entity, replacement = %new_ref, program_id = %program.id, "instance edited");
    Ok(event)
}

/// Exchange the slots of two live instances of the same kind and program.
/// Returns one `swap` event per side.
pub async fn swap_instances(
    pool: &PgPool,
    a: PlannedEntityRef,
    b: PlannedEntityRef,
    reason_code: &str,
) -> PlanResult<Vec<PlanChangeEvent>> {
    if a == b {
        return Err(PlanError::validation("cannot swap an instance with itself"));
    }
    if a.entity_type != b.entity_type {
        return Err(PlanError::validation(format!(
            "cannot swap {a} with {b}: different kinds"
        )));
    }

    let mut tx = pool.begin().await?;
    // Lock in id order so two opposite swaps cannot deadlock.
    let (first, second) = if a.id <= b.id { (a, b) } else { (b, a) };
    let locked_first = lock_planned(&mut tx, first).await?;
    let locked_second = lock_planned(&mut tx, second).await?;
    let (old_a, old_b) = if first == a {
        (locked_first, locked_second)
    } else {
        (locked_second, locked_first)
    };

    if old_a.program_id() != old_b.program_id() {
        return Err(PlanError::validation(format!(
            "cannot swap {a} with {b}: different programs"
        )));
    }
    let program = load_program(&mut tx, old_a.program_id()).await?;
    let slot_a = old_a.slot();
    let slot_b = old_b.slot();

    // Free both slots before either replacement is inserted.
    for old in [&old_a, &old_b] {
        InstanceStateMachine::transition(
            &mut tx,
            old.entity(),
            InstanceState::Planned,
            InstanceState::Superseded,
        )
        .await?;
    }
    let empty = InstancePatch::default();
    let new_a = insert_replacement(&mut tx, &old_a, slot_b, &empty).await?;
    let new_b = insert_replacement(&mut tx, &old_b, slot_a, &empty).await?;

    let mut events = Vec::with_capacity(2);
    for (entity, new_entity, from, to, counterpart) in [
        (a, new_a, slot_a, slot_b, b),
        (b, new_b, slot_b, slot_a, a),
    ] {
        events.push(
            audit::record_change(
                &mut *tx,
                ChangeRecord {
                    program_id: program.id,
                    owner_id: program.owner_id,
                    change_type: ChangeType::Swap,
                    entity,
                    new_entity: Some(new_entity),
                    reason_code,
                    diff: json!({
                        "from": slot_json(&program, from),
                        "to": slot_json(&program, to),
                        "counterpart": counterpart.to_string(),
                    }),
                },
            )
            .await?,
        );
    }

    let dates = BTreeSet::from([slot_date(&program, slot_a)?, slot_date(&program, slot_b)?]);
    reproject_dates(&mut tx, &program, dates).await?;
    tx.commit().await?;

    info!(%a, %b, program_id = %program.id, "instances swapped");
    Ok(events)
}

async fn relocate(
    pool: &PgPool,
    entity: PlannedEntityRef,
    target: Option<(i32, i32)>,
    target_date: Option<NaiveDate>,
    change_type: ChangeType,
    reason_code: &str,
) -> PlanResult<PlanChangeEvent> {
    let mut tx = pool.begin().await?;
    let old = lock_planned(&mut tx, entity).await?;
    let program = load_program(&mut tx, old.program_id()).await?;

    let (week_index, day_index) = match (target, target_date) {
        (Some(slot), _) => slot,
        (None, Some(date)) => program.slot_for(date).ok_or_else(|| {
            PlanError::validation(format!(
                "{date} is before the program start {}",
                program.start_date
            ))
        })?,
        (None, None) => return Err(PlanError::validation("no target slot given")),
    };
    check_target_slot(&program, week_index, day_index)?;

    let from = old.slot();
    let to = Slot {
        week_index,
        day_index,
        order_index: from.order_index,
    };
    if from == to {
        return Err(PlanError::validation(format!(
            "{entity} already occupies week {week_index}, day {day_index}"
        )));
    }
    if slot_taken(&mut tx, program.id, entity.entity_type, to).await? {
        return Err(PlanError::conflict(format!(
            "week {week_index}, day {day_index} is already planned"
        )));
    }

    let new_ref = replace(&mut tx, &old, to, &InstancePatch::default()).await?;
    let event = audit::record_change(
        &mut *tx,
        ChangeRecord {
            program_id: program.id,
            owner_id: program.owner_id,
            change_type,
            entity,
            new_entity: Some(new_ref),
            reason_code,
            diff: json!({
                "from": slot_json(&program, from),
                "to": slot_json(&program, to),
            }),
        },
    )
    .await?;

    let dates = BTreeSet::from([slot_date(&program, from)?, slot_date(&program, to)?]);
    reproject_dates(&mut tx, &program, dates).await?;
    tx.commit().await?;

    info!(%entity, replacement = %new_ref, %change_type, program_id = %program.id, "instance relocated");
    Ok(event)
}

/// Move an instance to another (week, day) slot of its program. Meals keep
/// their order within the day.
pub async fn move_instance(
    pool: &PgPool,
    entity: PlannedEntityRef,
    week_index: i32,
    day_index: i32,
    reason_code: &str,
) -> PlanResult<PlanChangeEvent> {
    relocate(
        pool,
        entity,
        Some((week_index, day_index)),
        None,
        ChangeType::Move,
        reason_code,
    )
    .await
}

/// Move an instance to the slot that falls on `date`.
pub async fn reschedule_instance(
    pool: &PgPool,
    entity: PlannedEntityRef,
    date: NaiveDate,
    reason_code: &str,
) -> PlanResult<PlanChangeEvent> {
    relocate(
        pool,
        entity,
        None,
        Some(date),
        ChangeType::Reschedule,
        reason_code,
    )
    .await
}

/// Drop a planned instance: `planned -> skipped`, no replacement.
pub async fn cancel_instance(
    pool: &PgPool,
    entity: PlannedEntityRef,
    reason_code: &str,
) -> PlanResult<PlanChangeEvent> {
    let mut tx = pool.begin().await?;
    let old = lock_planned(&mut tx, entity).await?;
    let program = load_program(&mut tx, old.program_id()).await?;
    let slot = old.slot();

    InstanceStateMachine::transition(&mut tx, entity, InstanceState::Planned, InstanceState::Skipped)
        .await?;
    let event = audit::record_change(
        &mut *tx,
        ChangeRecord {
            program_id: program.id,
            owner_id: program.owner_id,
            change_type: ChangeType::Cancel,
            entity,
            new_entity: None,
            reason_code,
            diff: json!({
                "slot": slot_json(&program, slot),
                "from_state": InstanceState::Planned,
                "to_state": InstanceState::Skipped,
            }),
        },
    )
    .await?;

    reproject_dates(&mut tx, &program, BTreeSet::from([slot_date(&program, slot)?])).await?;
    tx.commit().await?;

    info!(%entity, program_id = %program.id, "instance cancelled");
    Ok(event)
}
