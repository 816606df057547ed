//! Handlers for `stride adherence`.

use anyhow::Result;
use sqlx::PgPool;

use stride_core::adherence::{self, AdherenceInput, AdherencePolicy};

use crate::AdherenceCommands;
use crate::output::print_json;

pub async fn run_adherence_command(
    command: AdherenceCommands,
    pool: &PgPool,
    policy: &AdherencePolicy,
) -> Result<()> {
    match command {
        AdherenceCommands::Record {
            entity,
            owner,
            status,
            actual_ref,
            score,
        } => {
            let input = AdherenceInput {
                owner_id: owner,
                planned: entity,
                status,
                actual_ref,
                similarity_score: score,
            };
            let outcome = adherence::record_adherence(pool, policy, &input).await?;
            println!(
                "Recorded {} for {entity}; instance is {}.",
                outcome.record.status, outcome.instance.state
            );
            Ok(())
        }
        AdherenceCommands::Summary { program_id } => {
            let summary = adherence::adherence_summary(pool, program_id).await?;
            print_json(&summary)
        }
        AdherenceCommands::History { entity } => {
            let history = adherence::adherence_history(pool, entity).await?;
            print_json(&history)
        }
    }
}
