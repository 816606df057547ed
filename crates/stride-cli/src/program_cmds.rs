//! Handlers for `stride program` and `stride instance` subcommands.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use stride_core::program::{self, parse_bundle_json};
use stride_core::state::mark_instance_state;

use crate::output::print_json;
use crate::{InstanceCommands, ProgramCommands};

pub async fn run_program_command(command: ProgramCommands, pool: &PgPool) -> Result<()> {
    match command {
        ProgramCommands::Create { file } => cmd_create(pool, &file).await,
        ProgramCommands::Show { program_id } => cmd_show(pool, program_id).await,
        ProgramCommands::List { owner } => cmd_list(pool, owner).await,
        ProgramCommands::Active { owner, date } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            match program::get_active_program(pool, owner, date).await? {
                Some(active) => print_json(&active),
                None => {
                    println!("No active program for {owner} on {date}.");
                    Ok(())
                }
            }
        }
    }
}

pub async fn run_instance_command(command: InstanceCommands, pool: &PgPool) -> Result<()> {
    match command {
        InstanceCommands::Mark { entity, state } => {
            let instance = mark_instance_state(pool, entity, state).await?;
            println!("{entity} is now {}.", instance.state);
            Ok(())
        }
    }
}

/// Read a bundle file, validate it and store the program.
async fn cmd_create(pool: &PgPool, file_path: &str) -> Result<()> {
    let content = std::fs::read_to_string(file_path)
        .with_context(|| format!("failed to read bundle file: {file_path}"))?;
    let bundle = parse_bundle_json(&content)
        .with_context(|| format!("failed to parse bundle file: {file_path}"))?;

    let created = program::create_program(pool, &bundle).await?;

    println!("Program created successfully.");
    println!();
    println!("  Program ID:   {}", created.id);
    println!("  Owner:        {}", created.owner_id);
    println!("  Goal:         {}", created.primary_goal);
    println!("  Start date:   {}", created.start_date);
    match created.valid_until {
        Some(until) => println!("  Valid until:  {until}"),
        None => println!("  Valid until:  -"),
    }
    println!("  Sessions:     {}", bundle.sessions.len());
    println!("  Meals:        {}", bundle.meals.len());
    Ok(())
}

async fn cmd_show(pool: &PgPool, program_id: Uuid) -> Result<()> {
    let detail = program::get_program_with_items(pool, program_id).await?;
    print_json(&detail)
}

async fn cmd_list(pool: &PgPool, owner: Uuid) -> Result<()> {
    let all = program::list_programs(pool, owner).await?;
    if all.is_empty() {
        println!("No programs found for {owner}.");
        return Ok(());
    }

    println!(
        "{:<38} {:<12} {:<12} {:<6} GOAL",
        "ID", "START", "UNTIL", "WEEKS"
    );
    for p in &all {
        let until = p
            .valid_until
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<38} {:<12} {:<12} {:<6} {}",
            p.id, p.start_date, until, p.duration_weeks, p.primary_goal
        );
    }
    Ok(())
}
