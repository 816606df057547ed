use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle state of a scheduled session or meal instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Planned,
    Completed,
    Modified,
    Skipped,
    Superseded,
}

impl InstanceState {
    /// Every variant, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Planned,
        Self::Completed,
        Self::Modified,
        Self::Skipped,
        Self::Superseded,
    ];

    /// The string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Completed => "completed",
            Self::Modified => "modified",
            Self::Skipped => "skipped",
            Self::Superseded => "superseded",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceState {
    type Err = InstanceStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(Self::Planned),
            "completed" => Ok(Self::Completed),
            "modified" => Ok(Self::Modified),
            "skipped" => Ok(Self::Skipped),
            "superseded" => Ok(Self::Superseded),
            other => Err(InstanceStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`InstanceState`] string.
#[derive(Debug, Clone)]
pub struct InstanceStateParseError(pub String);

impl fmt::Display for InstanceStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid instance state: {:?}", self.0)
    }
}

impl std::error::Error for InstanceStateParseError {}

// ---------------------------------------------------------------------------

/// Review status of a day override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OverrideStatus {
    Pending,
    Approved,
    Rejected,
    AutoApplied,
    Undone,
}

impl OverrideStatus {
    /// Every variant, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Approved,
        Self::Rejected,
        Self::AutoApplied,
        Self::Undone,
    ];

    /// The string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::AutoApplied => "auto_applied",
            Self::Undone => "undone",
        }
    }
}

impl fmt::Display for OverrideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverrideStatus {
    type Err = OverrideStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "auto_applied" => Ok(Self::AutoApplied),
            "undone" => Ok(Self::Undone),
            other => Err(OverrideStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`OverrideStatus`] string.
#[derive(Debug, Clone)]
pub struct OverrideStatusParseError(pub String);

impl fmt::Display for OverrideStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid override status: {:?}", self.0)
    }
}

impl std::error::Error for OverrideStatusParseError {}

// ---------------------------------------------------------------------------

/// Why a day override was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OverrideReason {
    PoorSleep,
    Injury,
    Illness,
    Travel,
    HighStress,
    ScheduleConflict,
    UserRequest,
    Other,
}

impl OverrideReason {
    /// Every variant, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::PoorSleep,
        Self::Injury,
        Self::Illness,
        Self::Travel,
        Self::HighStress,
        Self::ScheduleConflict,
        Self::UserRequest,
        Self::Other,
    ];

    /// The string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PoorSleep => "poor_sleep",
            Self::Injury => "injury",
            Self::Illness => "illness",
            Self::Travel => "travel",
            Self::HighStress => "high_stress",
            Self::ScheduleConflict => "schedule_conflict",
            Self::UserRequest => "user_request",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for OverrideReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverrideReason {
    type Err = OverrideReasonParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "poor_sleep" => Ok(Self::PoorSleep),
            "injury" => Ok(Self::Injury),
            "illness" => Ok(Self::Illness),
            "travel" => Ok(Self::Travel),
            "high_stress" => Ok(Self::HighStress),
            "schedule_conflict" => Ok(Self::ScheduleConflict),
            "user_request" => Ok(Self::UserRequest),
            "other" => Ok(Self::Other),
            other => Err(OverrideReasonParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`OverrideReason`] string.
#[derive(Debug, Clone)]
pub struct OverrideReasonParseError(pub String);

impl fmt::Display for OverrideReasonParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid override reason: {:?}", self.0)
    }
}

impl std::error::Error for OverrideReasonParseError {}

// ---------------------------------------------------------------------------

/// Outcome recorded for a planned session or meal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AdherenceStatus {
    Completed,
    Similar,
    Skipped,
    Partial,
    Unknown,
}

impl AdherenceStatus {
    /// Every variant, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Completed,
        Self::Similar,
        Self::Skipped,
        Self::Partial,
        Self::Unknown,
    ];

    /// The string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Similar => "similar",
            Self::Skipped => "skipped",
            Self::Partial => "partial",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AdherenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdherenceStatus {
    type Err = AdherenceStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "similar" => Ok(Self::Similar),
            "skipped" => Ok(Self::Skipped),
            "partial" => Ok(Self::Partial),
            "unknown" => Ok(Self::Unknown),
            other => Err(AdherenceStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`AdherenceStatus`] string.
#[derive(Debug, Clone)]
pub struct AdherenceStatusParseError(pub String);

impl fmt::Display for AdherenceStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid adherence status: {:?}", self.0)
    }
}

impl std::error::Error for AdherenceStatusParseError {}

// ---------------------------------------------------------------------------

/// Kind of structural change written to the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Swap,
    Move,
    Edit,
    Cancel,
    Reschedule,
}

impl ChangeType {
    /// Every variant, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Swap,
        Self::Move,
        Self::Edit,
        Self::Cancel,
        Self::Reschedule,
    ];

    /// The string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Swap => "swap",
            Self::Move => "move",
            Self::Edit => "edit",
            Self::Cancel => "cancel",
            Self::Reschedule => "reschedule",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = ChangeTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "swap" => Ok(Self::Swap),
            "move" => Ok(Self::Move),
            "edit" => Ok(Self::Edit),
            "cancel" => Ok(Self::Cancel),
            "reschedule" => Ok(Self::Reschedule),
            other => Err(ChangeTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ChangeType`] string.
#[derive(Debug, Clone)]
pub struct ChangeTypeParseError(pub String);

impl fmt::Display for ChangeTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid change type: {:?}", self.0)
    }
}

impl std::error::Error for ChangeTypeParseError {}

// ---------------------------------------------------------------------------

/// Kind of planned entity referenced by adherence and audit rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Session,
    Meal,
}

impl EntityType {
    /// Every variant, in declaration order.
    pub const ALL: [Self; 2] = [
        Self::Session,
        Self::Meal,
    ];

    /// The string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Meal => "meal",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = EntityTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(Self::Session),
            "meal" => Ok(Self::Meal),
            other => Err(EntityTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`EntityType`] string.
#[derive(Debug, Clone)]
pub struct EntityTypeParseError(pub String);

impl fmt::Display for EntityTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid entity type: {:?}", self.0)
    }
}

impl std::error::Error for EntityTypeParseError {}

// ---------------------------------------------------------------------------

/// Kind of row in the calendar projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CalendarEventType {
    Session,
    Meal,
    Override,
}

impl CalendarEventType {
    /// Every variant, in declaration order.
    pub const ALL: [Self; 3] = [
        Self::Session,
        Self::Meal,
        Self::Override,
    ];

    /// The string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Meal => "meal",
            Self::Override => "override",
        }
    }
}

impl fmt::Display for CalendarEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalendarEventType {
    type Err = CalendarEventTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(Self::Session),
            "meal" => Ok(Self::Meal),
            "override" => Ok(Self::Override),
            other => Err(CalendarEventTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`CalendarEventType`] string.
#[derive(Debug, Clone)]
pub struct CalendarEventTypeParseError(pub String);

impl fmt::Display for CalendarEventTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid calendar event type: {:?}", self.0)
    }
}

impl std::error::Error for CalendarEventTypeParseError {}

// ---------------------------------------------------------------------------
// Enum helpers
// ---------------------------------------------------------------------------

impl InstanceState {
    /// `superseded` is the only state with no outgoing edge at all.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Superseded)
    }

    /// Whether an instance in this state still occupies its plan slot.
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Superseded)
    }
}

impl OverrideStatus {
    /// Non-terminal statuses. At most one override per (owner, program, date)
    /// may be in one of these.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Approved | Self::AutoApplied)
    }

    /// Statuses whose modification is layered onto the base plan.
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Approved | Self::AutoApplied)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl EntityType {
    /// Backing table of the planned entity.
    pub fn table_name(self) -> &'static str {
        match self {
            Self::Session => "session_instances",
            Self::Meal => "meal_instances",
        }
    }
}

// ---------------------------------------------------------------------------
// JSON payloads
// ---------------------------------------------------------------------------

/// Daily macro targets of a program, or the planned totals of one meal.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MacroTargets {
    pub calories: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
}

impl MacroTargets {
    /// Component-wise sum.
    pub fn plus(self, other: Self) -> Self {
        Self {
            calories: self.calories + other.calories,
            protein_g: self.protein_g + other.protein_g,
            carbs_g: self.carbs_g + other.carbs_g,
            fat_g: self.fat_g + other.fat_g,
        }
    }

    /// Whether any component is negative or not a finite number.
    pub fn has_invalid_component(&self) -> bool {
        [self.calories, self.protein_g, self.carbs_g, self.fat_g]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
    }
}

/// Structured change carried by a day override. All deltas default to zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Modification {
    pub calorie_delta: f64,
    pub protein_delta_g: f64,
    pub carbs_delta_g: f64,
    pub fat_delta_g: f64,
    /// Relative change in training volume, in percent (-30.0 = 30% less).
    pub training_volume_delta_pct: f64,
    /// Drop every training session planned for the day.
    pub cancel_sessions: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Modification {
    /// Whether every numeric field is a finite number.
    pub fn is_finite(&self) -> bool {
        [
            self.calorie_delta,
            self.protein_delta_g,
            self.carbs_delta_g,
            self.fat_delta_g,
            self.training_volume_delta_pct,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// Exercise content of a session, as produced by the generator or an edit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExerciseSpec {
    pub order_index: i32,
    pub exercise_key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sets: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reps: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_kg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl From<&ExercisePlanItem> for ExerciseSpec {
    fn from(item: &ExercisePlanItem) -> Self {
        Self {
            order_index: item.order_index,
            exercise_key: item.exercise_key.clone(),
            name: item.name.clone(),
            sets: item.sets,
            reps: item.reps.clone(),
            load_kg: item.load_kg,
            rest_seconds: item.rest_seconds,
            notes: item.notes.clone(),
        }
    }
}

/// Food content of a meal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MealItemSpec {
    pub order_index: i32,
    pub food_key: String,
    pub name: String,
    pub quantity_g: f64,
}

impl From<&MealItemPlan> for MealItemSpec {
    fn from(item: &MealItemPlan) -> Self {
        Self {
            order_index: item.order_index,
            food_key: item.food_key.clone(),
            name: item.name.clone(),
            quantity_g: item.quantity_g,
        }
    }
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// An immutable program snapshot produced by the generator.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Program {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub primary_goal: String,
    pub start_date: NaiveDate,
    pub duration_weeks: i32,
    pub created_at: DateTime<Utc>,
    pub valid_until: Option<NaiveDate>,
    pub tdee: i32,
    pub macros: Json<MacroTargets>,
    pub safety_report: serde_json::Value,
    pub full_bundle: serde_json::Value,
}

impl Program {
    /// Calendar date of a (week, day) slot. `None` for negative indexes or
    /// dates outside chrono's range.
    pub fn date_for(&self, week_index: i32, day_index: i32) -> Option<NaiveDate> {
        slot_date(self.start_date, week_index, day_index)
    }

    /// The (week, day) slot a calendar date falls on, if the date is on or
    /// after the program start.
    pub fn slot_for(&self, date: NaiveDate) -> Option<(i32, i32)> {
        let offset = (date - self.start_date).num_days();
        if offset < 0 {
            return None;
        }
        let week = i32::try_from(offset / 7).ok()?;
        let day = i32::try_from(offset % 7).ok()?;
        Some((week, day))
    }

    /// Whether the program's validity window includes `date`.
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.start_date && self.valid_until.is_none_or(|until| date <= until)
    }
}

/// Date of a (week, day) slot relative to `start`.
pub fn slot_date(start: NaiveDate, week_index: i32, day_index: i32) -> Option<NaiveDate> {
    let offset = u64::try_from(week_index).ok()? * 7 + u64::try_from(day_index).ok()?;
    start.checked_add_days(Days::new(offset))
}

/// A scheduled training session.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionInstance {
    pub id: Uuid,
    pub program_id: Uuid,
    pub week_index: i32,
    pub day_index: i32,
    pub session_kind: String,
    pub state: InstanceState,
    pub parameters: serde_json::Value,
    pub supersedes_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub state_changed_at: Option<DateTime<Utc>>,
}

/// One ordered exercise of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExercisePlanItem {
    pub id: Uuid,
    pub session_instance_id: Uuid,
    pub order_index: i32,
    pub exercise_key: String,
    pub name: String,
    pub sets: Option<i32>,
    pub reps: Option<String>,
    pub load_kg: Option<f64>,
    pub rest_seconds: Option<i32>,
    pub notes: Option<String>,
}

/// A scheduled meal.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MealInstance {
    pub id: Uuid,
    pub program_id: Uuid,
    pub week_index: i32,
    pub day_index: i32,
    pub order_index: i32,
    pub meal_type: String,
    pub totals: Json<MacroTargets>,
    pub state: InstanceState,
    pub supersedes_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub state_changed_at: Option<DateTime<Utc>>,
}

/// One ordered food item of a meal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MealItemPlan {
    pub id: Uuid,
    pub meal_instance_id: Uuid,
    pub order_index: i32,
    pub food_key: String,
    pub name: String,
    pub quantity_g: f64,
}

/// A daily adjustment layered over the base plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DayOverride {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub program_id: Uuid,
    pub date: NaiveDate,
    pub reason_code: OverrideReason,
    pub justification: String,
    pub modification: Json<Modification>,
    pub status: OverrideStatus,
    pub superseded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub undone_at: Option<DateTime<Utc>>,
}

/// The recorded outcome of one planned session or meal.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AdherenceRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub planned_entity_type: EntityType,
    pub planned_entity_id: Uuid,
    pub status: AdherenceStatus,
    pub actual_ref: Option<String>,
    pub similarity_score: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only audit entry for a structural plan change.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlanChangeEvent {
    pub id: i64,
    pub program_id: Uuid,
    pub owner_id: Uuid,
    pub change_type: ChangeType,
    pub planned_entity_type: EntityType,
    pub planned_entity_id: Uuid,
    pub new_entity_id: Option<Uuid>,
    pub reason_code: String,
    pub diff: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One row of the derived calendar projection.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CalendarEvent {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub program_id: Uuid,
    pub date: NaiveDate,
    pub event_type: CalendarEventType,
    pub ref_table: String,
    pub ref_id: Uuid,
    pub title: String,
    pub status: String,
}

// ---------------------------------------------------------------------------
// Entity references
// ---------------------------------------------------------------------------

/// Typed pointer at a session or meal instance, written `session:<uuid>` or
/// `meal:<uuid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlannedEntityRef {
    pub entity_type: EntityType,
    pub id: Uuid,
}

impl PlannedEntityRef {
    pub fn session(id: Uuid) -> Self {
        Self {
            entity_type: EntityType::Session,
            id,
        }
    }

    pub fn meal(id: Uuid) -> Self {
        Self {
            entity_type: EntityType::Meal,
            id,
        }
    }
}

impl fmt::Display for PlannedEntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

impl FromStr for PlannedEntityRef {
    type Err = PlannedEntityRefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| PlannedEntityRefParseError(s.to_owned()))?;
        let entity_type = kind
            .parse::<EntityType>()
            .map_err(|_| PlannedEntityRefParseError(s.to_owned()))?;
        let id = Uuid::parse_str(id).map_err(|_| PlannedEntityRefParseError(s.to_owned()))?;
        Ok(Self { entity_type, id })
    }
}

/// Error returned when parsing an invalid [`PlannedEntityRef`] string.
#[derive(Debug, Clone)]
pub struct PlannedEntityRefParseError(pub String);

impl fmt::Display for PlannedEntityRefParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid entity reference {:?} (expected session:<uuid> or meal:<uuid>)",
            self.0
        )
    }
}

impl std::error::Error for PlannedEntityRefParseError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
