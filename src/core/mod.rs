//! Core value types: identifiers, task bodies, triggers and cron expressions.

pub mod cron;
pub mod task;
pub mod trigger;
pub mod types;
