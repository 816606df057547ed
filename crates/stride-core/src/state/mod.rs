//! Lifecycle state machine for scheduled session and meal instances.
//!
//! ```text
//! planned -> completed
//! planned -> modified
//! planned -> skipped
//! planned -> superseded
//! ```
//!
//! Every non-planned state is final. `superseded` additionally means a
//! newer instance holds the slot.

use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};

use stride_db::models::{EntityType, InstanceState, MealInstance, PlannedEntityRef, SessionInstance};
use stride_db::queries::{meals, programs, sessions};

use crate::calendar;
use crate::error::{PlanError, PlanResult};

/// Slot and state of a session or meal, without its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PlannedInstance {
    pub entity: PlannedEntityRef,
    pub program_id: uuid::Uuid,
    pub week_index: i32,
    pub day_index: i32,
    /// Only meals carry an order within the day.
    pub order_index: Option<i32>,
    pub state: InstanceState,
}

impl From<&SessionInstance> for PlannedInstance {
    fn from(s: &SessionInstance) -> Self {
        Self {
            entity: PlannedEntityRef::session(s.id),
            program_id: s.program_id,
            week_index: s.week_index,
            day_index: s.day_index,
            order_index: None,
            state: s.state,
        }
    }
}

impl From<&MealInstance> for PlannedInstance {
    fn from(m: &MealInstance) -> Self {
        Self {
            entity: PlannedEntityRef::meal(m.id),
            program_id: m.program_id,
            week_index: m.week_index,
            day_index: m.day_index,
            order_index: Some(m.order_index),
            state: m.state,
        }
    }
}

/// Fetch an instance header, failing with `NotFound` when it is missing.
pub async fn load_instance(
    conn: &mut PgConnection,
    entity: PlannedEntityRef,
) -> PlanResult<PlannedInstance> {
    let found = match entity.entity_type {
        EntityType::Session => sessions::get_session(&mut *conn, entity.id)
            .await?
            .map(|s| PlannedInstance::from(&s)),
        EntityType::Meal => meals::get_meal(&mut *conn, entity.id)
            .await?
            .map(|m| PlannedInstance::from(&m)),
    };
    found.ok_or_else(|| PlanError::not_found(entity.to_string()))
}

/// Like [`load_instance`], holding a row lock until the transaction ends.
pub async fn lock_instance(
    conn: &mut PgConnection,
    entity: PlannedEntityRef,
) -> PlanResult<PlannedInstance> {
    let found = match entity.entity_type {
        EntityType::Session => sessions::lock_session(&mut *conn, entity.id)
            .await?
            .map(|s| PlannedInstance::from(&s)),
        EntityType::Meal => meals::lock_meal(&mut *conn, entity.id)
            .await?
            .map(|m| PlannedInstance::from(&m)),
    };
    found.ok_or_else(|| PlanError::not_found(entity.to_string()))
}

/// The instance state machine.
pub struct InstanceStateMachine;

impl InstanceStateMachine {
    /// Whether `from -> to` is an edge of the state graph.
    pub fn is_valid_transition(from: InstanceState, to: InstanceState) -> bool {
        matches!(
            (from, to),
            (
                InstanceState::Planned,
                InstanceState::Completed
                    | InstanceState::Modified
                    | InstanceState::Skipped
                    | InstanceState::Superseded
            )
        )
    }

    /// Execute a transition with optimistic locking.
    ///
    /// Fails with `InvalidTransition` for edges outside the graph, with
    /// `NotFound` when the instance does not exist, and with a retryable
    /// `Conflict` when another writer changed the state first.
    pub async fn transition(
        conn: &mut PgConnection,
        entity: PlannedEntityRef,
        from: InstanceState,
        to: InstanceState,
    ) -> PlanResult<()> {
        if !Self::is_valid_transition(from, to) {
            return Err(PlanError::invalid_transition(entity, from, to));
        }

        let rows = match entity.entity_type {
            EntityType::Session => {
                sessions::transition_session_state(&mut *conn, entity.id, from, to).await?
            }
            EntityType::Meal => meals::transition_meal_state(&mut *conn, entity.id, from, to).await?,
        };

        if rows == 0 {
            let current = load_instance(conn, entity).await?;
            return Err(PlanError::retryable_conflict(format!(
                "{entity} has state {}, expected {from}",
                current.state
            )));
        }
        Ok(())
    }
}

/// Move an instance to `new_state` and refresh its calendar day.
///
/// The current state is read under a row lock, so an illegal request
/// leaves the stored state untouched.
pub async fn mark_instance_state(
    pool: &PgPool,
    entity: PlannedEntityRef,
    new_state: InstanceState,
) -> PlanResult<PlannedInstance> {
    let mut tx = pool.begin().await?;

    let current = lock_instance(&mut tx, entity).await?;
    if !InstanceStateMachine::is_valid_transition(current.state, new_state) {
        warn!(%entity, from = %current.state, to = %new_state, "rejected instance transition");
        return Err(PlanError::invalid_transition(entity, current.state, new_state));
    }

    InstanceStateMachine::transition(&mut tx, entity, current.state, new_state).await?;

    let program = programs::get_program(&mut *tx, current.program_id)
        .await?
        .ok_or_else(|| PlanError::not_found(format!("program {}", current.program_id)))?;
    if let Some(date) = program.date_for(current.week_index, current.day_index) {
        calendar::project_in(&mut tx, &program, date, date).await?;
    }

    tx.commit().await?;

    info!(%entity, from = %current.state, to = %new_state, "instance state changed");
    Ok(PlannedInstance {
        state: new_state,
        ..current
    })
}
