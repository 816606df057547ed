//! Port to the external matcher that scores an actual log entry against
//! its planned counterpart.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use stride_db::models::PlannedEntityRef;

use super::{AdherenceInput, AdherenceOutcome, AdherencePolicy, record_adherence};
use crate::error::{PlanError, PlanResult};

/// Scores how closely a logged activity or meal matches a planned item.
///
/// Implementations live outside this crate; they compare planned macro or
/// volume targets against the actual entry.
#[async_trait]
pub trait AdherenceMatcher: Send + Sync {
    /// Similarity in `[0, 1]` between the planned item and `actual_ref`.
    async fn similarity(&self, planned: PlannedEntityRef, actual_ref: &str) -> anyhow::Result<f64>;
}

/// Score `actual_ref` with `matcher`, classify the score and record it.
pub async fn record_matched_adherence(
    pool: &PgPool,
    policy: &AdherencePolicy,
    matcher: &dyn AdherenceMatcher,
    owner_id: Uuid,
    planned: PlannedEntityRef,
    actual_ref: &str,
) -> PlanResult<AdherenceOutcome> {
    let score = matcher
        .similarity(planned, actual_ref)
        .await
        .with_context(|| format!("matcher failed for {planned}"))
        .map_err(PlanError::Storage)?;
    let status = policy.classify(score);
    debug!(%planned, score, %status, "matcher scored actual entry");

    record_adherence(
        pool,
        policy,
        &AdherenceInput {
            owner_id,
            planned,
            status,
            actual_ref: Some(actual_ref.to_owned()),
            similarity_score: Some(score),
        },
    )
    .await
}
