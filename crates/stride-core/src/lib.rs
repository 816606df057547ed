pub mod adherence;
pub mod audit;
pub mod auth;
pub mod calendar;
pub mod edits;
pub mod error;
pub mod external;
pub mod overrides;
pub mod program;
pub mod state;

pub use error::{PlanError, PlanResult};
