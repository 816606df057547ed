//! Handlers for the structural edit commands.

use anyhow::Result;
use chrono::NaiveDate;
use sqlx::PgPool;

use stride_core::edits::{self, InstancePatch};
use stride_db::models::{PlanChangeEvent, PlannedEntityRef};

use crate::output::{parse_json_arg, print_json};

fn report(event: &PlanChangeEvent) -> Result<()> {
    match event.new_entity_id {
        Some(new_id) => println!(
            "{} {}:{} -> {}:{} (event {})",
            event.change_type,
            event.planned_entity_type,
            event.planned_entity_id,
            event.planned_entity_type,
            new_id,
            event.id
        ),
        None => println!(
            "{} {}:{} (event {})",
            event.change_type, event.planned_entity_type, event.planned_entity_id, event.id
        ),
    }
    Ok(())
}

pub async fn cmd_edit(
    pool: &PgPool,
    entity: PlannedEntityRef,
    patch: &str,
    reason: &str,
) -> Result<()> {
    let patch: InstancePatch = parse_json_arg(patch, "patch")?;
    let event = edits::edit_instance(pool, entity, &patch, reason).await?;
    print_json(&event.diff)?;
    report(&event)
}

pub async fn cmd_swap(
    pool: &PgPool,
    a: PlannedEntityRef,
    b: PlannedEntityRef,
    reason: &str,
) -> Result<()> {
    for event in edits::swap_instances(pool, a, b, reason).await? {
        report(&event)?;
    }
    Ok(())
}

pub async fn cmd_move(
    pool: &PgPool,
    entity: PlannedEntityRef,
    week: i32,
    day: i32,
    reason: &str,
) -> Result<()> {
    let event = edits::move_instance(pool, entity, week, day, reason).await?;
    report(&event)
}

pub async fn cmd_reschedule(
    pool: &PgPool,
    entity: PlannedEntityRef,
    date: NaiveDate,
    reason: &str,
) -> Result<()> {
    let event = edits::reschedule_instance(pool, entity, date, reason).await?;
    report(&event)
}

pub async fn cmd_cancel(pool: &PgPool, entity: PlannedEntityRef, reason: &str) -> Result<()> {
    let event = edits::cancel_instance(pool, entity, reason).await?;
    report(&event)
}
