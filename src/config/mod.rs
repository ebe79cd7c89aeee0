//! Configuration and shared types
//!
//! Daemon settings and the types passed between modules.

pub mod daemon;
pub mod types;
