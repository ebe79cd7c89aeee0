//! Observability
//!
//! Structured audit events for enforcement and backend resolution.

pub mod audit;
