//! Plan Store service: program bundles in, dated plan instances out.

pub mod bundle;
pub mod service;

pub use bundle::{BundleError, MealSpec, ProgramBundle, SessionSpec, parse_bundle_json};
pub use service::{
    MealDetail, ProgramDetail, SessionDetail, create_program, get_active_program, get_program,
    get_program_with_items, list_programs,
};
