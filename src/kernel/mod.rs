//! Thin wrappers around kernel and C runtime primitives.
//!
//! All `unsafe` code is concentrated here with explicit SAFETY comments,
//! apart from the backend ABI calls in `identity::backend`.

pub mod daemon;
pub mod entropy;
pub mod signal;
pub mod tty;
pub mod utmp;
