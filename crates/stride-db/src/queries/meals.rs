//! Database query functions for the `meal_instances` and `meal_item_plans`
//! tables.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::PgExecutor;
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::{InstanceState, MacroTargets, MealInstance, MealItemPlan, MealItemSpec};

/// Parameters for inserting a meal instance.
#[derive(Debug, Clone)]
pub struct NewMealInstance<'a> {
    pub program_id: Uuid,
    pub week_index: i32,
    pub day_index: i32,
    pub order_index: i32,
    pub meal_type: &'a str,
    pub totals: MacroTargets,
    pub supersedes_id: Option<Uuid>,
}

/// Insert a meal instance in state `planned`. Fails on the live-slot unique
/// index when `(week, day, order)` is already taken.
pub async fn insert_meal(
    executor: impl PgExecutor<'_>,
    new: &NewMealInstance<'_>,
) -> Result<MealInstance> {
    let meal = sqlx::query_as::<_, MealInstance>(
        "INSERT INTO meal_instances \
         (program_id, week_index, day_index, order_index, meal_type, totals, supersedes_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(new.program_id)
    .bind(new.week_index)
    .bind(new.day_index)
    .bind(new.order_index)
    .bind(new.meal_type)
    .bind(Json(new.totals))
    .bind(new.supersedes_id)
    .fetch_one(executor)
    .await
    .with_context(|| {
        format!(
            "failed to insert meal for program {} at week {} day {} order {}",
            new.program_id, new.week_index, new.day_index, new.order_index
        )
    })?;

    Ok(meal)
}

/// Insert one food item under a meal.
pub async fn insert_meal_item(
    executor: impl PgExecutor<'_>,
    meal_id: Uuid,
    spec: &MealItemSpec,
) -> Result<MealItemPlan> {
    let item = sqlx::query_as::<_, MealItemPlan>(
        "INSERT INTO meal_item_plans (meal_instance_id, order_index, food_key, name, quantity_g) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(meal_id)
    .bind(spec.order_index)
    .bind(&spec.food_key)
    .bind(&spec.name)
    .bind(spec.quantity_g)
    .fetch_one(executor)
    .await
    .with_context(|| format!("failed to insert item {} for meal {meal_id}", spec.order_index))?;

    Ok(item)
}

/// Fetch a meal instance by ID.
pub async fn get_meal(executor: impl PgExecutor<'_>, id: Uuid) -> Result<Option<MealInstance>> {
    let meal = sqlx::query_as::<_, MealInstance>("SELECT * FROM meal_instances WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .with_context(|| format!("failed to fetch meal {id}"))?;

    Ok(meal)
}

/// Fetch a meal instance and hold a row lock until the transaction ends.
pub async fn lock_meal(executor: impl PgExecutor<'_>, id: Uuid) -> Result<Option<MealInstance>> {
    let meal =
        sqlx::query_as::<_, MealInstance>("SELECT * FROM meal_instances WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(executor)
            .await
            .with_context(|| format!("failed to lock meal {id}"))?;

    Ok(meal)
}

/// List every meal of a program, superseded history included, in slot order.
pub async fn list_meals_for_program(
    executor: impl PgExecutor<'_>,
    program_id: Uuid,
) -> Result<Vec<MealInstance>> {
    let meals = sqlx::query_as::<_, MealInstance>(
        "SELECT * FROM meal_instances \
         WHERE program_id = $1 \
         ORDER BY week_index ASC, day_index ASC, order_index ASC, created_at ASC",
    )
    .bind(program_id)
    .fetch_all(executor)
    .await
    .with_context(|| format!("failed to list meals for program {program_id}"))?;

    Ok(meals)
}

/// List the meals of a program whose slot date lies in `[from, to]`.
pub async fn list_meals_between(
    executor: impl PgExecutor<'_>,
    program_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<MealInstance>> {
    let meals = sqlx::query_as::<_, MealInstance>(
        "SELECT m.* FROM meal_instances m \
         JOIN programs p ON p.id = m.program_id \
         WHERE m.program_id = $1 \
           AND p.start_date + (m.week_index * 7 + m.day_index) BETWEEN $2 AND $3 \
         ORDER BY m.week_index ASC, m.day_index ASC, m.order_index ASC, m.created_at ASC",
    )
    .bind(program_id)
    .bind(from)
    .bind(to)
    .fetch_all(executor)
    .await
    .with_context(|| {
        format!("failed to list meals for program {program_id} between {from} and {to}")
    })?;

    Ok(meals)
}

/// The live (non-superseded) meal occupying a slot, if any.
pub async fn get_live_meal_at(
    executor: impl PgExecutor<'_>,
    program_id: Uuid,
    week_index: i32,
    day_index: i32,
    order_index: i32,
) -> Result<Option<MealInstance>> {
    let meal = sqlx::query_as::<_, MealInstance>(
        "SELECT * FROM meal_instances \
         WHERE program_id = $1 AND week_index = $2 AND day_index = $3 AND order_index = $4 \
           AND state <> 'superseded'",
    )
    .bind(program_id)
    .bind(week_index)
    .bind(day_index)
    .bind(order_index)
    .fetch_optional(executor)
    .await
    .with_context(|| {
        format!(
            "failed to look up meal slot ({week_index}, {day_index}, {order_index}) of program {program_id}"
        )
    })?;

    Ok(meal)
}

/// List a meal's food items in order.
pub async fn list_meal_items(
    executor: impl PgExecutor<'_>,
    meal_id: Uuid,
) -> Result<Vec<MealItemPlan>> {
    let items = sqlx::query_as::<_, MealItemPlan>(
        "SELECT * FROM meal_item_plans WHERE meal_instance_id = $1 ORDER BY order_index ASC",
    )
    .bind(meal_id)
    .fetch_all(executor)
    .await
    .with_context(|| format!("failed to list items for meal {meal_id}"))?;

    Ok(items)
}

/// Atomically move a meal from one state to another, guarded by the
/// expected current state. Returns the number of rows affected.
pub async fn transition_meal_state(
    executor: impl PgExecutor<'_>,
    id: Uuid,
    from: InstanceState,
    to: InstanceState,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE meal_instances \
         SET state = $1, state_changed_at = now() \
         WHERE id = $2 AND state = $3",
    )
    .bind(to)
    .bind(id)
    .bind(from)
    .execute(executor)
    .await
    .with_context(|| format!("failed to transition meal {id} from {from} to {to}"))?;

    Ok(result.rows_affected())
}
