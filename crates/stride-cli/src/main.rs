mod adherence_cmds;
mod change_cmds;
mod config;
mod edit_cmds;
mod output;
mod override_cmds;
mod program_cmds;
mod serve_cmd;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use stride_core::auth;
use stride_db::models::{AdherenceStatus, InstanceState, OverrideReason, PlannedEntityRef};
use stride_db::pool;

use config::StrideConfig;

#[derive(Parser)]
#[command(name = "stride", about = "Plan store and daily adaptation engine")]
struct Cli {
    /// Database URL (overrides STRIDE_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a stride config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/stride")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the stride database and run migrations
    DbInit,
    /// Program management
    Program {
        #[command(subcommand)]
        command: ProgramCommands,
    },
    /// Planned session and meal instances
    Instance {
        #[command(subcommand)]
        command: InstanceCommands,
    },
    /// Replace the content of a planned instance
    Edit {
        /// Instance reference, `session:<uuid>` or `meal:<uuid>`
        entity: PlannedEntityRef,
        /// JSON patch, inline or `@path/to/file.json`
        #[arg(long)]
        patch: String,
        #[arg(long, default_value = "manual_edit")]
        reason: String,
    },
    /// Exchange the slots of two planned instances
    Swap {
        a: PlannedEntityRef,
        b: PlannedEntityRef,
        #[arg(long, default_value = "manual_swap")]
        reason: String,
    },
    /// Move a planned instance to another week/day slot
    Move {
        entity: PlannedEntityRef,
        #[arg(long)]
        week: i32,
        #[arg(long)]
        day: i32,
        #[arg(long, default_value = "manual_move")]
        reason: String,
    },
    /// Move a planned instance to a calendar date
    Reschedule {
        entity: PlannedEntityRef,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, default_value = "manual_reschedule")]
        reason: String,
    },
    /// Drop a planned instance without replacement
    Cancel {
        entity: PlannedEntityRef,
        #[arg(long, default_value = "manual_cancel")]
        reason: String,
    },
    /// Day overrides
    Override {
        #[command(subcommand)]
        command: OverrideCommands,
    },
    /// Show the effective targets for a day
    Targets {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        program: Uuid,
        #[arg(long)]
        date: NaiveDate,
    },
    /// Adherence records
    Adherence {
        #[command(subcommand)]
        command: AdherenceCommands,
    },
    /// Calendar projection
    Calendar {
        #[command(subcommand)]
        command: CalendarCommands,
    },
    /// Print plan change events as JSON lines
    Changes {
        /// Restrict to one program
        #[arg(long, conflicts_with = "owner")]
        program: Option<Uuid>,
        /// Restrict to one owner (requires --from and --to)
        #[arg(long, requires_all = ["from", "to"])]
        owner: Option<Uuid>,
        /// Start of the time range (RFC 3339)
        #[arg(long)]
        from: Option<chrono::DateTime<chrono::Utc>>,
        /// End of the time range (RFC 3339)
        #[arg(long)]
        to: Option<chrono::DateTime<chrono::Utc>>,
        /// Resume after this cursor (`<rfc3339>/<id>`)
        #[arg(long)]
        after: Option<String>,
        /// Stop after this many events
        #[arg(long)]
        limit: Option<usize>,
        /// Rows fetched per database round trip
        #[arg(long, default_value_t = stride_core::audit::DEFAULT_PAGE_SIZE)]
        page_size: i64,
    },
    /// Owner tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
    /// Serve the JSON API
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Subcommand)]
pub enum ProgramCommands {
    /// Create a program from a JSON bundle file
    Create {
        /// Path to the bundle JSON file
        file: String,
    },
    /// Show a program with its sessions and meals
    Show { program_id: Uuid },
    /// List an owner's programs, newest first
    List {
        #[arg(long)]
        owner: Uuid,
    },
    /// Show the program in force for an owner on a date
    Active {
        #[arg(long)]
        owner: Uuid,
        /// Defaults to today (UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
pub enum InstanceCommands {
    /// Set the state of a planned instance
    Mark {
        entity: PlannedEntityRef,
        state: InstanceState,
    },
}

#[derive(Subcommand)]
pub enum OverrideCommands {
    /// Request an adjustment for one day
    Request {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        program: Uuid,
        #[arg(long)]
        date: NaiveDate,
        /// Reason code, e.g. `travel` or `illness`
        #[arg(long)]
        reason: OverrideReason,
        #[arg(long, default_value = "")]
        justification: String,
        /// Modification JSON, inline or `@path/to/file.json`
        #[arg(long)]
        modification: String,
    },
    /// Approve a pending override
    Approve { override_id: Uuid },
    /// Reject a pending override
    Reject { override_id: Uuid },
    /// Withdraw an override
    Undo { override_id: Uuid },
    /// Show every override requested for a day
    Show {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        program: Uuid,
        #[arg(long)]
        date: NaiveDate,
    },
}

#[derive(Subcommand)]
pub enum AdherenceCommands {
    /// Record the outcome of a planned instance
    Record {
        entity: PlannedEntityRef,
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        status: AdherenceStatus,
        /// Reference to the logged activity or meal
        #[arg(long)]
        actual_ref: Option<String>,
        /// Similarity score in [0, 1]
        #[arg(long)]
        score: Option<f64>,
    },
    /// Count current outcomes across a program
    Summary { program_id: Uuid },
    /// Show every record of a planned instance
    History { entity: PlannedEntityRef },
}

#[derive(Subcommand)]
pub enum CalendarCommands {
    /// Regenerate the calendar of a program for a date range
    Project {
        program_id: Uuid,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
    /// Show the stored calendar for a date range
    Show {
        program_id: Uuid,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a bearer token for an owner
    Issue { owner: Uuid },
}

/// Execute `stride init`: write the config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let token_secret = config::generate_token_secret();
    let cfg = config::ConfigFile {
        database: config::DatabaseSection::new(db_url),
        auth: config::AuthSection {
            token_secret: token_secret.clone(),
        },
        overrides: Default::default(),
        adherence: Default::default(),
    };
    config::save_config_to(&path, &cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  auth.token_secret = {}...", &token_secret[..8]);
    println!();
    println!("Next: run `stride db-init` to create and migrate the database.");
    Ok(())
}

/// Execute `stride db-init`: create the database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = StrideConfig::resolve(cli_db_url)?;

    println!("Initializing stride database...");
    if pool::ensure_database_exists(&resolved.db_config).await? {
        println!("Created database {}", resolved.db_config.database_url);
    }
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let counts = pool::plan_table_counts(&db_pool).await?;
    println!("Plan store ready:");
    for (table, count) in &counts {
        println!("  {table:<20} {count} rows");
    }
    db_pool.close().await;

    println!("stride db-init complete.");
    Ok(())
}

fn cmd_token_issue(resolved: &StrideConfig, owner: Uuid) -> anyhow::Result<()> {
    let token = auth::generate_owner_token(resolved.require_token()?, owner)
        .context("failed to issue owner token")?;
    println!("{token}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => return cmd_init(&db_url, force),
        Commands::DbInit => return cmd_db_init(cli.database_url.as_deref()).await,
        Commands::Token {
            command: TokenCommands::Issue { owner },
        } => {
            let resolved = StrideConfig::resolve(cli.database_url.as_deref())?;
            return cmd_token_issue(&resolved, owner);
        }
        _ => {}
    }

    let resolved = StrideConfig::resolve(cli.database_url.as_deref())?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let result = match cli.command {
        Commands::Program { command } => program_cmds::run_program_command(command, &db_pool).await,
        Commands::Instance { command } => {
            program_cmds::run_instance_command(command, &db_pool).await
        }
        Commands::Edit {
            entity,
            patch,
            reason,
        } => edit_cmds::cmd_edit(&db_pool, entity, &patch, &reason).await,
        Commands::Swap { a, b, reason } => edit_cmds::cmd_swap(&db_pool, a, b, &reason).await,
        Commands::Move {
            entity,
            week,
            day,
            reason,
        } => edit_cmds::cmd_move(&db_pool, entity, week, day, &reason).await,
        Commands::Reschedule {
            entity,
            date,
            reason,
        } => edit_cmds::cmd_reschedule(&db_pool, entity, date, &reason).await,
        Commands::Cancel { entity, reason } => {
            edit_cmds::cmd_cancel(&db_pool, entity, &reason).await
        }
        Commands::Override { command } => {
            override_cmds::run_override_command(command, &db_pool, &resolved.override_policy)
                .await
        }
        Commands::Targets {
            owner,
            program,
            date,
        } => override_cmds::cmd_targets(&db_pool, owner, program, date).await,
        Commands::Adherence { command } => {
            adherence_cmds::run_adherence_command(command, &db_pool, &resolved.adherence_policy)
                .await
        }
        Commands::Calendar { command } => change_cmds::run_calendar_command(command, &db_pool).await,
        Commands::Changes {
            program,
            owner,
            from,
            to,
            after,
            limit,
            page_size,
        } => {
            let query = change_cmds::ChangesQuery {
                program,
                owner,
                from,
                to,
                after,
                limit,
                page_size,
            };
            change_cmds::cmd_changes(&db_pool, query).await
        }
        Commands::Serve { bind, port } => match resolved.require_token() {
            Ok(token_config) => {
                let state = serve_cmd::AppState {
                    pool: db_pool.clone(),
                    tokens: token_config.clone(),
                    override_policy: resolved.override_policy,
                    adherence_policy: resolved.adherence_policy,
                };
                serve_cmd::run_serve(state, &bind, port).await
            }
            Err(e) => Err(e),
        },
        Commands::Init { .. } | Commands::DbInit | Commands::Token { .. } => Ok(()),
    };

    db_pool.close().await;
    result
}
