//! Ownership checks applied before any plan operation runs.
//!
//! The caller comes from a validated owner token. Every target is resolved
//! to its owning program, then compared with the caller.

use serde::Serialize;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use stride_db::models::{EntityType, PlannedEntityRef};
use stride_db::queries::{meals, overrides, programs, sessions};

use crate::error::{PlanError, PlanResult};

/// An authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Caller {
    pub owner_id: Uuid,
}

impl Caller {
    /// Fail with `Forbidden` unless the caller is `owner_id`.
    pub fn require_owner(&self, owner_id: Uuid, target: impl std::fmt::Display) -> PlanResult<()> {
        if self.owner_id != owner_id {
            warn!(caller = %self.owner_id, %target, "cross-owner access rejected");
            return Err(PlanError::Forbidden(format!("{target} belongs to another owner")));
        }
        Ok(())
    }
}

/// Allow the caller to act on `program_id`.
pub async fn authorize_program(pool: &PgPool, caller: &Caller, program_id: Uuid) -> PlanResult<()> {
    let owner = programs::get_program_owner(pool, program_id)
        .await?
        .ok_or_else(|| PlanError::not_found(format!("program {program_id}")))?;
    caller.require_owner(owner, format!("program {program_id}"))
}

/// Allow the caller to act on a session or meal. Returns the program the
/// entity belongs to.
pub async fn authorize_entity(
    pool: &PgPool,
    caller: &Caller,
    entity: PlannedEntityRef,
) -> PlanResult<Uuid> {
    let program_id = match entity.entity_type {
        EntityType::Session => sessions::get_session(pool, entity.id)
            .await?
            .map(|s| s.program_id),
        EntityType::Meal => meals::get_meal(pool, entity.id).await?.map(|m| m.program_id),
    }
    .ok_or_else(|| PlanError::not_found(entity.to_string()))?;

    authorize_program(pool, caller, program_id).await?;
    Ok(program_id)
}

/// Allow the caller to act on a day override.
pub async fn authorize_override(
    pool: &PgPool,
    caller: &Caller,
    override_id: Uuid,
) -> PlanResult<()> {
    let row = overrides::get_override(pool, override_id)
        .await?
        .ok_or_else(|| PlanError::not_found(format!("override {override_id}")))?;
    caller.require_owner(row.owner_id, format!("override {override_id}"))
}
