//! Bundle fixtures shared by the stride-core integration tests.

#![allow(dead_code)]

use chrono::NaiveDate;
use serde_json::json;
use uuid::Uuid;

use stride_core::program::{MealSpec, ProgramBundle, SessionSpec};
use stride_db::models::{ExerciseSpec, MacroTargets, MealItemSpec};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub const START: (i32, u32, u32) = (2025, 3, 3);

pub fn start() -> NaiveDate {
    date(START.0, START.1, START.2)
}

/// Two-week bundle: sessions on days 0 and 2 of week 0 and day 0 of week 1,
/// breakfast and dinner on the first day, breakfast on day 0 of week 1.
pub fn bundle(owner_id: Uuid) -> ProgramBundle {
    let session = |week, day, kind: &str| SessionSpec {
        week,
        day,
        session_kind: kind.to_owned(),
        parameters: json!({ "rpe": 7 }),
        exercises: vec![ExerciseSpec {
            order_index: 0,
            exercise_key: format!("{kind}_main"),
            name: format!("{kind} main lift"),
            sets: Some(4),
            reps: Some("6".into()),
            ..ExerciseSpec::default()
        }],
    };
    let meal = |week, day, order, meal_type: &str, calories| MealSpec {
        week,
        day,
        order,
        meal_type: meal_type.to_owned(),
        totals: MacroTargets {
            calories,
            protein_g: 40.0,
            carbs_g: 60.0,
            fat_g: 20.0,
        },
        items: vec![MealItemSpec {
            order_index: 0,
            food_key: "rice".into(),
            name: "Rice".into(),
            quantity_g: 150.0,
        }],
    };

    ProgramBundle {
        owner_id,
        primary_goal: "recomposition".into(),
        start_date: start(),
        duration_weeks: 2,
        created_at: None,
        valid_until: None,
        tdee: 2500,
        macros: MacroTargets {
            calories: 2200.0,
            protein_g: 160.0,
            carbs_g: 230.0,
            fat_g: 70.0,
        },
        safety_report: json!({ "status": "ok" }),
        sessions: vec![
            session(0, 0, "strength"),
            session(0, 2, "conditioning"),
            session(1, 0, "strength"),
        ],
        meals: vec![
            meal(0, 0, 0, "breakfast", 550.0),
            meal(0, 0, 1, "dinner", 800.0),
            meal(1, 0, 0, "breakfast", 550.0),
        ],
    }
}
