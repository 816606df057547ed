//! Query functions, one module per table family.
//!
//! Every function accepts any [`sqlx::PgExecutor`], so callers can run it
//! directly on a pool or inside an open transaction (`&mut *tx`).

pub mod adherence;
pub mod calendar;
pub mod change_events;
pub mod meals;
pub mod overrides;
pub mod programs;
pub mod sessions;
