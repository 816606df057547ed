//! Handlers for `stride calendar` and `stride changes`.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::PgPool;
use uuid::Uuid;

use stride_core::audit::{ChangeCursor, ChangeFilter, stream_changes};
use stride_core::calendar;

use crate::CalendarCommands;
use crate::output::print_json;

pub async fn run_calendar_command(command: CalendarCommands, pool: &PgPool) -> Result<()> {
    match command {
        CalendarCommands::Project {
            program_id,
            from,
            to,
        } => {
            let events = calendar::project(pool, program_id, from, to).await?;
            println!("Projected {} calendar events for {from}..{to}.", events.len());
            Ok(())
        }
        CalendarCommands::Show {
            program_id,
            from,
            to,
        } => {
            let events = calendar::list_calendar(pool, program_id, from, to).await?;
            print_json(&events)
        }
    }
}

/// Arguments of `stride changes`.
#[derive(Debug)]
pub struct ChangesQuery {
    pub program: Option<Uuid>,
    pub owner: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub after: Option<String>,
    pub limit: Option<usize>,
    pub page_size: i64,
}

impl ChangesQuery {
    fn filter(&self) -> Result<ChangeFilter> {
        match (self.program, self.owner, self.from, self.to) {
            (Some(program_id), None, _, _) => Ok(ChangeFilter::Program(program_id)),
            (None, Some(owner_id), Some(from), Some(to)) => {
                Ok(ChangeFilter::Owner { owner_id, from, to })
            }
            _ => bail!("pass --program <id>, or --owner <id> with --from and --to"),
        }
    }
}

/// Stream change events as JSON lines, ending with the resume cursor on
/// stderr.
pub async fn cmd_changes(pool: &PgPool, query: ChangesQuery) -> Result<()> {
    let filter = query.filter()?;
    let start = query
        .after
        .as_deref()
        .map(str::parse::<ChangeCursor>)
        .transpose()
        .context("invalid --after cursor")?;

    let stream = stream_changes(pool.clone(), filter, query.page_size, start);
    futures::pin_mut!(stream);

    let mut last = None;
    let mut printed = 0usize;
    while let Some(event) = stream.try_next().await? {
        let line = serde_json::to_string(&event).context("failed to serialize change event")?;
        println!("{line}");
        last = Some(ChangeCursor::from(&event));
        printed += 1;
        if query.limit.is_some_and(|limit| printed >= limit) {
            break;
        }
    }

    if let Some(cursor) = last {
        eprintln!("cursor: {cursor}");
    }
    Ok(())
}
