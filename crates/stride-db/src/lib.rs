//! Storage layer for stride: schema migrations, row models, and query
//! functions for the plan store and its adaptation tables.

pub mod config;
pub mod errors;
pub mod models;
pub mod pool;
pub mod queries;
