//! Adherence Engine.
//!
//! Records what actually happened against a planned session or meal.
//! Records are append-only; the most recent one is the item's current
//! outcome. Writing a record also advances the planned instance out of
//! `planned`, in the same transaction.

pub mod matcher;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use stride_db::models::{AdherenceRecord, AdherenceStatus, InstanceState, PlannedEntityRef};
use stride_db::queries::adherence::{self as db, NewAdherenceRecord};
use stride_db::queries::programs;

use crate::calendar;
use crate::error::{PlanError, PlanResult};
use crate::state::{InstanceStateMachine, PlannedInstance, lock_instance};

pub use matcher::{AdherenceMatcher, record_matched_adherence};
pub use stride_db::queries::adherence::AdherenceSummary;

/// Similarity thresholds used for validation and classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdherencePolicy {
    /// Lowest score that still counts as a full match.
    pub completed_min_similarity: f64,
    /// Lowest score that counts as a close substitute.
    pub similar_min_similarity: f64,
}

impl Default for AdherencePolicy {
    fn default() -> Self {
        Self {
            completed_min_similarity: 0.85,
            similar_min_similarity: 0.6,
        }
    }
}

impl AdherencePolicy {
    pub fn validate(&self) -> PlanResult<()> {
        let in_unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        if !in_unit(self.completed_min_similarity) || !in_unit(self.similar_min_similarity) {
            return Err(PlanError::validation("similarity thresholds must lie in [0, 1]"));
        }
        if self.similar_min_similarity > self.completed_min_similarity {
            return Err(PlanError::validation(
                "similar_min_similarity must not exceed completed_min_similarity",
            ));
        }
        Ok(())
    }

    /// Classify a matcher score.
    pub fn classify(&self, score: f64) -> AdherenceStatus {
        if score >= self.completed_min_similarity {
            AdherenceStatus::Completed
        } else if score >= self.similar_min_similarity {
            AdherenceStatus::Similar
        } else if score > 0.0 {
            AdherenceStatus::Partial
        } else {
            AdherenceStatus::Unknown
        }
    }

    /// Check a record before it is written.
    pub fn check_record(
        &self,
        status: AdherenceStatus,
        actual_ref: Option<&str>,
        similarity_score: Option<f64>,
    ) -> PlanResult<()> {
        if let Some(score) = similarity_score {
            if !score.is_finite() || !(0.0..=1.0).contains(&score) {
                return Err(PlanError::validation(format!(
                    "similarity_score must lie in [0, 1], got {score}"
                )));
            }
        }
        if actual_ref.is_some_and(|r| r.trim().is_empty()) {
            return Err(PlanError::validation("actual_ref must not be blank"));
        }

        match status {
            AdherenceStatus::Skipped if actual_ref.is_some() => Err(PlanError::validation(
                "a skipped item cannot reference an actual entry",
            )),
            AdherenceStatus::Completed => match (actual_ref, similarity_score) {
                (Some(_), None) => Err(PlanError::validation(
                    "completed with an actual entry requires a similarity score",
                )),
                (_, Some(score)) if score < self.completed_min_similarity => {
                    Err(PlanError::validation(format!(
                        "completed requires similarity >= {}, got {score}",
                        self.completed_min_similarity
                    )))
                }
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

/// Instance state implied by an adherence status, if any.
pub fn target_state(status: AdherenceStatus) -> Option<InstanceState> {
    match status {
        AdherenceStatus::Completed => Some(InstanceState::Completed),
        AdherenceStatus::Similar | AdherenceStatus::Partial => Some(InstanceState::Modified),
        AdherenceStatus::Skipped => Some(InstanceState::Skipped),
        AdherenceStatus::Unknown => None,
    }
}

/// What to record for one planned item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdherenceInput {
    pub owner_id: Uuid,
    pub planned: PlannedEntityRef,
    pub status: AdherenceStatus,
    #[serde(default)]
    pub actual_ref: Option<String>,
    #[serde(default)]
    pub similarity_score: Option<f64>,
}

/// The stored record and the instance state after it was applied.
#[derive(Debug, Clone, Serialize)]
pub struct AdherenceOutcome {
    pub record: AdherenceRecord,
    pub instance: PlannedInstance,
}

/// Validate and store an adherence record.
///
/// A `planned` instance moves to the state implied by the status. An
/// instance already out of `planned` (completed, skipped, superseded...)
/// keeps its state; the record is stored either way.
pub async fn record_adherence(
    pool: &PgPool,
    policy: &AdherencePolicy,
    input: &AdherenceInput,
) -> PlanResult<AdherenceOutcome> {
    policy.check_record(input.status, input.actual_ref.as_deref(), input.similarity_score)?;

    let mut tx = pool.begin().await?;
    let instance = lock_instance(&mut tx, input.planned).await?;
    let owner = programs::get_program_owner(&mut *tx, instance.program_id)
        .await?
        .ok_or_else(|| PlanError::not_found(format!("program {}", instance.program_id)))?;
    if owner != input.owner_id {
        return Err(PlanError::Forbidden(format!(
            "{} belongs to another owner",
            input.planned
        )));
    }

    let record = db::insert_adherence(
        &mut *tx,
        &NewAdherenceRecord {
            owner_id: input.owner_id,
            planned: input.planned,
            status: input.status,
            actual_ref: input.actual_ref.as_deref().map(str::trim),
            similarity_score: input.similarity_score,
        },
    )
    .await?;

    let mut state = instance.state;
    match target_state(input.status) {
        Some(to) if instance.state == InstanceState::Planned => {
            InstanceStateMachine::transition(&mut tx, input.planned, instance.state, to).await?;
            state = to;
            let program = programs::get_program(&mut *tx, instance.program_id)
                .await?
                .ok_or_else(|| PlanError::not_found(format!("program {}", instance.program_id)))?;
            if let Some(date) = program.date_for(instance.week_index, instance.day_index) {
                calendar::project_in(&mut tx, &program, date, date).await?;
            }
        }
        Some(_) => {
            warn!(
                entity = %input.planned,
                state = %instance.state,
                "adherence recorded against a settled instance; state left unchanged"
            );
        }
        None => {}
    }

    tx.commit().await?;

    info!(
        entity = %input.planned,
        status = %input.status,
        instance_state = %state,
        "adherence recorded"
    );
    Ok(AdherenceOutcome {
        record,
        instance: PlannedInstance { state, ..instance },
    })
}

/// The current outcome of a planned item.
pub async fn latest_adherence(
    pool: &PgPool,
    planned: PlannedEntityRef,
) -> PlanResult<Option<AdherenceRecord>> {
    Ok(db::latest_adherence_for_entity(pool, planned).await?)
}

/// Every record of a planned item, oldest first.
pub async fn adherence_history(
    pool: &PgPool,
    planned: PlannedEntityRef,
) -> PlanResult<Vec<AdherenceRecord>> {
    Ok(db::list_adherence_for_entity(pool, planned).await?)
}

/// Counts of current outcomes across a program.
pub async fn adherence_summary(pool: &PgPool, program_id: Uuid) -> PlanResult<AdherenceSummary> {
    if programs::get_program_owner(pool, program_id).await?.is_none() {
        return Err(PlanError::not_found(format!("program {program_id}")));
    }
    Ok(db::adherence_summary_for_program(pool, program_id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipped_with_actual_ref_is_rejected() {
        let policy = AdherencePolicy::default();
        let err = policy
            .check_record(AdherenceStatus::Skipped, Some("log:1"), None)
            .unwrap_err();
        assert!(matches!(err, PlanError::Validation(_)));
        assert!(policy.check_record(AdherenceStatus::Skipped, None, None).is_ok());
    }

    #[test]
    fn score_must_lie_in_unit_interval() {
        let policy = AdherencePolicy::default();
        for bad in [-0.1, 1.01, f64::NAN] {
            assert!(policy
                .check_record(AdherenceStatus::Partial, Some("log:1"), Some(bad))
                .is_err());
        }
        assert!(policy
            .check_record(AdherenceStatus::Partial, Some("log:1"), Some(0.0))
            .is_ok());
        assert!(policy
            .check_record(AdherenceStatus::Partial, Some("log:1"), Some(1.0))
            .is_ok());
    }

    #[test]
    fn completed_needs_implicit_or_high_confidence_match() {
        let policy = AdherencePolicy::default();
        assert!(policy.check_record(AdherenceStatus::Completed, None, None).is_ok());
        assert!(policy
            .check_record(AdherenceStatus::Completed, Some("log:1"), Some(0.9))
            .is_ok());
        assert!(policy
            .check_record(AdherenceStatus::Completed, Some("log:1"), Some(0.5))
            .is_err());
        assert!(policy
            .check_record(AdherenceStatus::Completed, Some("log:1"), None)
            .is_err());
    }

    #[test]
    fn classification_thresholds() {
        let policy = AdherencePolicy::default();
        assert_eq!(policy.classify(0.95), AdherenceStatus::Completed);
        assert_eq!(policy.classify(0.85), AdherenceStatus::Completed);
        assert_eq!(policy.classify(0.7), AdherenceStatus::Similar);
        assert_eq!(policy.classify(0.2), AdherenceStatus::Partial);
        assert_eq!(policy.classify(0.0), AdherenceStatus::Unknown);
    }

    #[test]
    fn status_maps_to_instance_state() {
        assert_eq!(
            target_state(AdherenceStatus::Completed),
            Some(InstanceState::Completed)
        );
        assert_eq!(
            target_state(AdherenceStatus::Similar),
            Some(InstanceState::Modified)
        );
        assert_eq!(
            target_state(AdherenceStatus::Partial),
            Some(InstanceState::Modified)
        );
        assert_eq!(
            target_state(AdherenceStatus::Skipped),
            Some(InstanceState::Skipped)
        );
        assert_eq!(target_state(AdherenceStatus::Unknown), None);
    }

    #[test]
    fn policy_thresholds_must_be_ordered() {
        assert!(AdherencePolicy::default().validate().is_ok());
        let inverted = AdherencePolicy {
            completed_min_similarity: 0.5,
            similar_min_similarity: 0.7,
        };
        assert!(inverted.validate().is_err());
    }
}
