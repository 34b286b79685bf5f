//! Thin HTTP handlers.
//!
//! The endpoint layer only validates structurally, dispatches tasks and
//! serves token-authorized downloads; all lifecycle logic lives in the
//! task modules.

pub mod batch_handlers;
pub mod health_handlers;
pub mod order_handlers;
pub mod request_handlers;
