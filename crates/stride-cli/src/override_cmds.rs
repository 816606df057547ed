//! Handlers for `stride override` and `stride targets`.

use anyhow::Result;
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use stride_core::overrides::{self, OverridePolicy, OverrideRequest};
use stride_db::models::{DayOverride, Modification};

use crate::OverrideCommands;
use crate::output::{parse_json_arg, print_json};

pub async fn run_override_command(
    command: OverrideCommands,
    pool: &PgPool,
    policy: &OverridePolicy,
) -> Result<()> {
    match command {
        OverrideCommands::Request {
            owner,
            program,
            date,
            reason,
            justification,
            modification,
        } => {
            let modification: Modification = parse_json_arg(&modification, "modification")?;
            let request = OverrideRequest {
                owner_id: owner,
                program_id: program,
                date,
                reason_code: reason,
                justification,
                modification,
            };
            let created = overrides::request_override(pool, policy, &request).await?;
            report(&created);
            if created.status.is_active() && !created.status.is_applied() {
                println!("Awaiting approval: run `stride override approve {}`.", created.id);
            }
            Ok(())
        }
        OverrideCommands::Approve { override_id } => {
            report(&overrides::approve_override(pool, override_id).await?);
            Ok(())
        }
        OverrideCommands::Reject { override_id } => {
            report(&overrides::reject_override(pool, override_id).await?);
            Ok(())
        }
        OverrideCommands::Undo { override_id } => {
            report(&overrides::undo_override(pool, override_id).await?);
            Ok(())
        }
        OverrideCommands::Show {
            owner,
            program,
            date,
        } => {
            let history = overrides::list_overrides(pool, owner, program, date).await?;
            print_json(&history)
        }
    }
}

fn report(ov: &DayOverride) {
    println!("Override {} for {} is {}.", ov.id, ov.date, ov.status);
}

pub async fn cmd_targets(pool: &PgPool, owner: Uuid, program: Uuid, date: NaiveDate) -> Result<()> {
    let targets = overrides::effective_targets(pool, owner, program, date).await?;
    print_json(&targets)
}
