//! Core data models for the batch/order lifecycle service.
//!
//! These entities cover the durable PID record, the partner-facing request
//! payload relayed to the external import manager, and the polled status
//! of asynchronous tasks. Database-backed types map to tables via
//! `sqlx::FromRow` and serialize naturally as JSON via `serde`.

pub mod data_object;
pub mod payload;
pub mod task;
