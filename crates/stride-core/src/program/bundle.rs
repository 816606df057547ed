//! Program bundle JSON produced by the external generator, with validation.

use std::collections::HashSet;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use stride_db::models::{ExerciseSpec, MacroTargets, MealItemSpec};

/// Errors that can occur while parsing or validating a bundle.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("bundle JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duration_weeks must be non-negative, got {0}")]
    NegativeDuration(i32),

    #[error("tdee must be positive, got {0}")]
    NonPositiveTdee(i32),

    #[error("macro targets must be finite and non-negative")]
    InvalidMacros,

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("{kind} at week {week} lies outside the {duration}-week program")]
    WeekOutOfRange {
        kind: &'static str,
        week: i32,
        duration: i32,
    },

    #[error("{kind} day index {day} is outside 0..=6")]
    DayOutOfRange { kind: &'static str, day: i32 },

    #[error("meal order index {0} is negative")]
    NegativeOrder(i32),

    #[error("two sessions share slot (week {week}, day {day})")]
    DuplicateSessionSlot { week: i32, day: i32 },

    #[error("two meals share slot (week {week}, day {day}, order {order})")]
    DuplicateMealSlot { week: i32, day: i32, order: i32 },

    #[error("duplicate {kind} order index {order} at (week {week}, day {day})")]
    DuplicateChildOrder {
        kind: &'static str,
        week: i32,
        day: i32,
        order: i32,
    },

    #[error("meal item quantity must be finite and non-negative, got {0}")]
    InvalidQuantity(f64),

    #[error("a {weeks}-week program starting {start_date} ends past the last representable date")]
    DateOverflow { start_date: NaiveDate, weeks: i32 },

    #[error("valid_until {valid_until} is before start_date {start_date}")]
    ValidUntilBeforeStart {
        start_date: NaiveDate,
        valid_until: NaiveDate,
    },
}

/// A finalized program as handed over by the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramBundle {
    pub owner_id: Uuid,
    pub primary_goal: String,
    pub start_date: NaiveDate,
    pub duration_weeks: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<NaiveDate>,
    pub tdee: i32,
    pub macros: MacroTargets,
    #[serde(default)]
    pub safety_report: Value,
    #[serde(default)]
    pub sessions: Vec<SessionSpec>,
    #[serde(default)]
    pub meals: Vec<MealSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSpec {
    pub week: i32,
    pub day: i32,
    pub session_kind: String,
    #[serde(default = "empty_object")]
    pub parameters: Value,
    #[serde(default)]
    pub exercises: Vec<ExerciseSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealSpec {
    pub week: i32,
    pub day: i32,
    #[serde(default)]
    pub order: i32,
    pub meal_type: String,
    pub totals: MacroTargets,
    #[serde(default)]
    pub items: Vec<MealItemSpec>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl ProgramBundle {
    /// Last day of the final week, or `start_date` for a zero-week program.
    pub fn last_planned_day(&self) -> Result<NaiveDate, BundleError> {
        let weeks = u64::try_from(self.duration_weeks)
            .map_err(|_| BundleError::NegativeDuration(self.duration_weeks))?;
        self.start_date
            .checked_add_days(Days::new((weeks * 7).saturating_sub(1)))
            .ok_or(BundleError::DateOverflow {
                start_date: self.start_date,
                weeks: self.duration_weeks,
            })
    }

    /// Inclusive end of the validity window: the explicit `valid_until`, or
    /// the last day of the final week.
    pub fn effective_valid_until(&self) -> Result<NaiveDate, BundleError> {
        match self.valid_until {
            Some(valid_until) => Ok(valid_until),
            None => self.last_planned_day(),
        }
    }

    /// Check every structural rule a bundle must satisfy before it is stored.
    pub fn validate(&self) -> Result<(), BundleError> {
        if self.duration_weeks < 0 {
            return Err(BundleError::NegativeDuration(self.duration_weeks));
        }
        if self.tdee <= 0 {
            return Err(BundleError::NonPositiveTdee(self.tdee));
        }
        if self.macros.has_invalid_component() {
            return Err(BundleError::InvalidMacros);
        }
        self.last_planned_day()?;
        if self.primary_goal.trim().is_empty() {
            return Err(BundleError::EmptyField {
                field: "primary_goal",
            });
        }
        if let Some(valid_until) = self.valid_until {
            if valid_until < self.start_date {
                return Err(BundleError::ValidUntilBeforeStart {
                    start_date: self.start_date,
                    valid_until,
                });
            }
        }

        let mut session_slots = HashSet::new();
        for session in &self.sessions {
            self.check_slot("session", session.week, session.day)?;
            if session.session_kind.trim().is_empty() {
                return Err(BundleError::EmptyField {
                    field: "session_kind",
                });
            }
            if !session_slots.insert((session.week, session.day)) {
                return Err(BundleError::DuplicateSessionSlot {
                    week: session.week,
                    day: session.day,
                });
            }
            let mut orders = HashSet::new();
            for exercise in &session.exercises {
                if !orders.insert(exercise.order_index) || exercise.order_index < 0 {
                    return Err(BundleError::DuplicateChildOrder {
                        kind: "exercise",
                        week: session.week,
                        day: session.day,
                        order: exercise.order_index,
                    });
                }
            }
        }

        let mut meal_slots = HashSet::new();
        for meal in &self.meals {
            self.check_slot("meal", meal.week, meal.day)?;
            if meal.order < 0 {
                return Err(BundleError::NegativeOrder(meal.order));
            }
            if meal.meal_type.trim().is_empty() {
                return Err(BundleError::EmptyField { field: "meal_type" });
            }
            if meal.totals.has_invalid_component() {
                return Err(BundleError::InvalidMacros);
            }
            if !meal_slots.insert((meal.week, meal.day, meal.order)) {
                return Err(BundleError::DuplicateMealSlot {
                    week: meal.week,
                    day: meal.day,
                    order: meal.order,
                });
            }
            let mut orders = HashSet::new();
            for item in &meal.items {
                if !orders.insert(item.order_index) || item.order_index < 0 {
                    return Err(BundleError::DuplicateChildOrder {
                        kind: "meal item",
                        week: meal.week,
                        day: meal.day,
                        order: item.order_index,
                    });
                }
                if !item.quantity_g.is_finite() || item.quantity_g < 0.0 {
                    return Err(BundleError::InvalidQuantity(item.quantity_g));
                }
            }
        }

        Ok(())
    }

    fn check_slot(&self, kind: &'static str, week: i32, day: i32) -> Result<(), BundleError> {
        if week < 0 || week >= self.duration_weeks {
            return Err(BundleError::WeekOutOfRange {
                kind,
                week,
                duration: self.duration_weeks,
            });
        }
        if !(0..=6).contains(&day) {
            return Err(BundleError::DayOutOfRange { kind, day });
        }
        Ok(())
    }
}

/// Parse and validate a bundle from JSON text.
pub fn parse_bundle_json(content: &str) -> Result<ProgramBundle, BundleError> {
    let bundle: ProgramBundle = serde_json::from_str(content)?;
    bundle.validate()?;
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "owner_id": "6f1c2a8e-8a53-4c1e-9d0b-6a1f6e4c2b10",
        "primary_goal": "fat_loss",
        "start_date": "2025-03-03",
        "duration_weeks": 2,
        "tdee": 2450,
        "macros": { "calories": 2100, "protein_g": 170, "carbs_g": 200, "fat_g": 70 },
        "safety_report": { "status": "ok" },
        "sessions": [
            {
                "week": 0, "day": 0, "session_kind": "strength",
                "exercises": [
                    { "order_index": 0, "exercise_key": "back_squat", "name": "Back squat", "sets": 4, "reps": "6" },
                    { "order_index": 1, "exercise_key": "rdl", "name": "Romanian deadlift" }
                ]
            },
            { "week": 1, "day": 3, "session_kind": "conditioning" }
        ],
        "meals": [
            {
                "week": 0, "day": 0, "order": 0, "meal_type": "breakfast",
                "totals": { "calories": 550, "protein_g": 40, "carbs_g": 60, "fat_g": 15 },
                "items": [ { "order_index": 0, "food_key": "oats", "name": "Oats", "quantity_g": 80 } ]
            },
            {
                "week": 0, "day": 0, "order": 1, "meal_type": "lunch",
                "totals": { "calories": 700, "protein_g": 55, "carbs_g": 70, "fat_g": 20 }
            }
        ]
    }"#;

    fn valid() -> ProgramBundle {
        parse_bundle_json(VALID).expect("valid bundle should parse")
    }

    #[test]
    fn parses_valid_bundle() {
        let bundle = valid();
        assert_eq!(bundle.duration_weeks, 2);
        assert_eq!(bundle.sessions.len(), 2);
        assert_eq!(bundle.sessions[0].exercises.len(), 2);
        assert_eq!(bundle.sessions[1].parameters, serde_json::json!({}));
        assert_eq!(bundle.meals[1].items.len(), 0);
        assert!(bundle.created_at.is_none());
    }

    #[test]
    fn default_validity_ends_on_last_day_of_final_week() {
        let bundle = valid();
        assert_eq!(
            bundle.effective_valid_until().ok(),
            NaiveDate::from_ymd_opt(2025, 3, 16)
        );

        let zero = ProgramBundle {
            duration_weeks: 0,
            sessions: vec![],
            meals: vec![],
            ..bundle.clone()
        };
        assert_eq!(zero.effective_valid_until().ok(), Some(zero.start_date));

        let explicit = ProgramBundle {
            valid_until: NaiveDate::from_ymd_opt(2025, 6, 1),
            ..bundle
        };
        assert_eq!(
            explicit.effective_valid_until().ok(),
            NaiveDate::from_ymd_opt(2025, 6, 1)
        );
    }

    #[test]
    fn rejects_duration_past_last_representable_date() {
        let bundle = ProgramBundle {
            duration_weeks: i32::MAX,
            sessions: vec![],
            meals: vec![],
            ..valid()
        };
        assert!(matches!(
            bundle.validate(),
            Err(BundleError::DateOverflow { weeks: i32::MAX, .. })
        ));
        assert!(matches!(
            bundle.effective_valid_until(),
            Err(BundleError::DateOverflow { .. })
        ));
    }

    #[test]
    fn long_programs_are_valid() {
        let bundle = ProgramBundle {
            duration_weeks: 157,
            ..valid()
        };
        assert!(bundle.validate().is_ok());
        assert_eq!(
            bundle.effective_valid_until().ok(),
            NaiveDate::from_ymd_opt(2028, 3, 5)
        );
    }

    #[test]
    fn rejects_negative_duration() {
        let bundle = ProgramBundle {
            duration_weeks: -1,
            sessions: vec![],
            meals: vec![],
            ..valid()
        };
        assert!(matches!(
            bundle.validate(),
            Err(BundleError::NegativeDuration(-1))
        ));
    }

    #[test]
    fn rejects_duplicate_session_slot() {
        let mut bundle = valid();
        let mut clash = bundle.sessions[0].clone();
        clash.session_kind = "mobility".into();
        bundle.sessions.push(clash);
        assert!(matches!(
            bundle.validate(),
            Err(BundleError::DuplicateSessionSlot { week: 0, day: 0 })
        ));
    }

    #[test]
    fn rejects_duplicate_meal_slot() {
        let mut bundle = valid();
        bundle.meals[1].order = 0;
        assert!(matches!(
            bundle.validate(),
            Err(BundleError::DuplicateMealSlot {
                week: 0,
                day: 0,
                order: 0
            })
        ));
    }

    #[test]
    fn rejects_week_past_duration_and_bad_day() {
        let mut bundle = valid();
        bundle.sessions[1].week = 2;
        assert!(matches!(
            bundle.validate(),
            Err(BundleError::WeekOutOfRange { week: 2, .. })
        ));

        let mut bundle = valid();
        bundle.meals[0].day = 7;
        assert!(matches!(
            bundle.validate(),
            Err(BundleError::DayOutOfRange { day: 7, .. })
        ));
    }

    #[test]
    fn rejects_duplicate_exercise_order() {
        let mut bundle = valid();
        bundle.sessions[0].exercises[1].order_index = 0;
        assert!(matches!(
            bundle.validate(),
            Err(BundleError::DuplicateChildOrder {
                kind: "exercise",
                ..
            })
        ));
    }

    #[test]
    fn rejects_bad_targets() {
        let mut bundle = valid();
        bundle.tdee = 0;
        assert!(matches!(
            bundle.validate(),
            Err(BundleError::NonPositiveTdee(0))
        ));

        let mut bundle = valid();
        bundle.macros.protein_g = -5.0;
        assert!(matches!(bundle.validate(), Err(BundleError::InvalidMacros)));
    }

    #[test]
    fn rejects_valid_until_before_start() {
        let bundle = ProgramBundle {
            valid_until: NaiveDate::from_ymd_opt(2025, 3, 1),
            ..valid()
        };
        assert!(matches!(
            bundle.validate(),
            Err(BundleError::ValidUntilBeforeStart { .. })
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            parse_bundle_json("{ not json"),
            Err(BundleError::Json(_))
        ));
    }
}
