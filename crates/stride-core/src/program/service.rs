//! Plan Store service layer.
//!
//! Creates a program snapshot together with all of its session and meal
//! instances in one transaction, and projects the new weeks into the
//! calendar before committing.

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use stride_db::errors as db_errors;
use stride_db::models::{
    ExercisePlanItem, MealInstance, MealItemPlan, Program, SessionInstance,
};
use stride_db::queries::{meals, programs, sessions};

use super::bundle::ProgramBundle;
use crate::calendar;
use crate::error::{PlanError, PlanResult};

const OWNER_CREATED_AT_KEY: &str = "programs_owner_created_at_key";

/// Store a validated bundle as a new program snapshot.
///
/// Fails with a non-retryable `Conflict` when the owner already has a
/// program created at the same instant; nothing is written in that case.
pub async fn create_program(pool: &PgPool, bundle: &ProgramBundle) -> PlanResult<Program> {
    bundle
        .validate()
        .map_err(|e| PlanError::validation(e.to_string()))?;

    let valid_until = bundle
        .effective_valid_until()
        .map_err(|e| PlanError::validation(e.to_string()))?;
    let full_bundle = serde_json::to_value(bundle)
        .map_err(|e| PlanError::Storage(anyhow::Error::new(e).context("failed to serialize bundle")))?;
    let created_at = bundle.created_at.unwrap_or_else(Utc::now);

    let mut tx = pool.begin().await?;

    let inserted = programs::insert_program(
        &mut *tx,
        &programs::NewProgram {
            owner_id: bundle.owner_id,
            primary_goal: bundle.primary_goal.trim(),
            start_date: bundle.start_date,
            duration_weeks: bundle.duration_weeks,
            created_at,
            valid_until: Some(valid_until),
            tdee: bundle.tdee,
            macros: bundle.macros,
            safety_report: &bundle.safety_report,
            full_bundle: &full_bundle,
        },
    )
    .await;
    let program = match inserted {
        Ok(program) => program,
        Err(err)
            if db_errors::is_unique_violation(&err)
                && db_errors::constraint_name(&err).as_deref() == Some(OWNER_CREATED_AT_KEY) =>
        {
            warn!(owner_id = %bundle.owner_id, %created_at, "duplicate program snapshot");
            return Err(PlanError::conflict(format!(
                "owner {} already has a program created at {created_at}",
                bundle.owner_id
            )));
        }
        Err(err) => return Err(err.into()),
    };

    for spec in &bundle.sessions {
        let session = sessions::insert_session(
            &mut *tx,
            &sessions::NewSessionInstance {
                program_id: program.id,
                week_index: spec.week,
                day_index: spec.day,
                session_kind: spec.session_kind.trim(),
                parameters: &spec.parameters,
                supersedes_id: None,
            },
        )
        .await?;
        for exercise in &spec.exercises {
            sessions::insert_exercise(&mut *tx, session.id, exercise).await?;
        }
    }

    for spec in &bundle.meals {
        let meal = meals::insert_meal(
            &mut *tx,
            &meals::NewMealInstance {
                program_id: program.id,
                week_index: spec.week,
                day_index: spec.day,
                order_index: spec.order,
                meal_type: spec.meal_type.trim(),
                totals: spec.totals,
                supersedes_id: None,
            },
        )
        .await?;
        for item in &spec.items {
            meals::insert_meal_item(&mut *tx, meal.id, item).await?;
        }
    }

    if let Some((first, last)) = calendar::program_span(&program) {
        calendar::project_span_in(&mut tx, &program, first, last).await?;
    }

    tx.commit().await?;

    info!(
        program_id = %program.id,
        owner_id = %program.owner_id,
        weeks = program.duration_weeks,
        sessions = bundle.sessions.len(),
        meals = bundle.meals.len(),
        "program created"
    );
    Ok(program)
}

/// Fetch a program, failing with `NotFound` when it does not exist.
pub async fn get_program(pool: &PgPool, program_id: Uuid) -> PlanResult<Program> {
    programs::get_program(pool, program_id)
        .await?
        .ok_or_else(|| PlanError::not_found(format!("program {program_id}")))
}

/// The owner's most recent program whose validity window covers `date`.
pub async fn get_active_program(
    pool: &PgPool,
    owner_id: Uuid,
    date: NaiveDate,
) -> PlanResult<Option<Program>> {
    Ok(programs::get_active_program(pool, owner_id, date).await?)
}

/// All program snapshots of an owner, newest first.
pub async fn list_programs(pool: &PgPool, owner_id: Uuid) -> PlanResult<Vec<Program>> {
    Ok(programs::list_programs_for_owner(pool, owner_id).await?)
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub instance: SessionInstance,
    pub exercises: Vec<ExercisePlanItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MealDetail {
    #[serde(flatten)]
    pub instance: MealInstance,
    pub items: Vec<MealItemPlan>,
}

/// A program with every instance it has ever had, superseded ones included.
#[derive(Debug, Clone, Serialize)]
pub struct ProgramDetail {
    pub program: Program,
    pub sessions: Vec<SessionDetail>,
    pub meals: Vec<MealDetail>,
}

/// Load a program with its sessions, meals and their child items.
pub async fn get_program_with_items(pool: &PgPool, program_id: Uuid) -> PlanResult<ProgramDetail> {
    let program = get_program(pool, program_id).await?;

    let mut session_details = Vec::new();
    for instance in sessions::list_sessions_for_program(pool, program_id).await? {
        let exercises = sessions::list_exercises(pool, instance.id).await?;
        session_details.push(SessionDetail {
            instance,
            exercises,
        });
    }

    let mut meal_details = Vec::new();
    for instance in meals::list_meals_for_program(pool, program_id).await? {
        let items = meals::list_meal_items(pool, instance.id).await?;
        meal_details.push(MealDetail { instance, items });
    }

    Ok(ProgramDetail {
        program,
        sessions: session_details,
        meals: meal_details,
    })
}
