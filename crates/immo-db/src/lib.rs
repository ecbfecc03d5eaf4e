//! Persistence for content generation jobs: the `contents`, `sections` and
//! `scenes` tables, their row types and query functions.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
