//! Auto-approval policy and target arithmetic for day overrides.

use serde::{Deserialize, Serialize};

use stride_db::models::{MacroTargets, Modification, OverrideStatus};

use crate::error::{PlanError, PlanResult};

/// Bounds inside which an override is applied without review.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverridePolicy {
    /// Largest absolute calorie change applied automatically, in kcal.
    pub max_auto_calorie_delta: f64,
    /// Largest absolute training volume change applied automatically, in percent.
    pub max_auto_volume_delta_pct: f64,
    pub allow_auto_session_cancel: bool,
}

impl Default for OverridePolicy {
    fn default() -> Self {
        Self {
            max_auto_calorie_delta: 250.0,
            max_auto_volume_delta_pct: 20.0,
            allow_auto_session_cancel: false,
        }
    }
}

impl OverridePolicy {
    pub fn validate(&self) -> PlanResult<()> {
        for (name, value) in [
            ("max_auto_calorie_delta", self.max_auto_calorie_delta),
            ("max_auto_volume_delta_pct", self.max_auto_volume_delta_pct),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PlanError::validation(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Whether `modification` stays inside the safe bound.
    pub fn is_within_safe_bound(&self, modification: &Modification) -> bool {
        if modification.cancel_sessions && !self.allow_auto_session_cancel {
            return false;
        }
        modification.calorie_delta.abs() <= self.max_auto_calorie_delta
            && modification.training_volume_delta_pct.abs() <= self.max_auto_volume_delta_pct
    }

    /// Initial status of a new override: `auto_applied` inside the safe
    /// bound, `pending` otherwise.
    pub fn initial_status(&self, modification: &Modification) -> OverrideStatus {
        if self.is_within_safe_bound(modification) {
            OverrideStatus::AutoApplied
        } else {
            OverrideStatus::Pending
        }
    }
}

/// Reject payloads that cannot describe a real adjustment.
pub fn validate_modification(modification: &Modification) -> PlanResult<()> {
    if !modification.is_finite() {
        return Err(PlanError::validation("modification values must be finite numbers"));
    }
    if modification.training_volume_delta_pct < -100.0 {
        return Err(PlanError::validation(format!(
            "training volume cannot drop by more than 100%, got {}",
            modification.training_volume_delta_pct
        )));
    }
    let no_change = Modification {
        notes: modification.notes.clone(),
        ..Modification::default()
    };
    if *modification == no_change {
        return Err(PlanError::validation("modification does not change anything"));
    }
    Ok(())
}

/// Layer a modification on top of base macro targets. Components never go
/// below zero.
pub fn apply_modification(base: MacroTargets, modification: &Modification) -> MacroTargets {
    let adjusted = base.plus(MacroTargets {
        calories: modification.calorie_delta,
        protein_g: modification.protein_delta_g,
        carbs_g: modification.carbs_delta_g,
        fat_g: modification.fat_delta_g,
    });
    MacroTargets {
        calories: adjusted.calories.max(0.0),
        protein_g: adjusted.protein_g.max(0.0),
        carbs_g: adjusted.carbs_g.max(0.0),
        fat_g: adjusted.fat_g.max(0.0),
    }
}

/// Training volume multiplier after a modification (1.0 = as planned).
pub fn volume_factor(modification: &Modification) -> f64 {
    if modification.cancel_sessions {
        return 0.0;
    }
    (1.0 + modification.training_volume_delta_pct / 100.0).max(0.0)
}
