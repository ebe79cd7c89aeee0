//! loginkit: login support runtime
//! Subordinate-id backend resolution, secure random numbers, and the logoutd
//! session enforcement daemon.
//!
//! # Architecture
//!
//! ## Identity ([`identity`])
//! - [`identity::nsswitch`]: `subid:` directive parsing
//! - [`identity::backend`]: `SubidBackend` trait and the dynamically loaded implementation
//! - [`identity::resolver`]: Process-wide, initialize-once backend handle
//!
//! ## Secure Random ([`random`])
//! - [`random::csrand`]: Raw 64-bit words from the first working entropy source
//! - [`random::uniform`]: Unbiased bounded sampling and inclusive intervals
//!
//! ## Enforcement ([`enforcement`])
//! - [`enforcement::policy`]: Policy oracle and the porttime table
//! - [`enforcement::session`]: Session snapshots
//! - [`enforcement::terminate`]: Type-state ordered notice, hangup and kill
//! - [`enforcement::daemon`]: Scan loop, task set and reaping
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::entropy`]: Entropy sources
//! - [`kernel::utmp`]: Session accounting
//! - [`kernel::tty`]: Terminal notices
//! - [`kernel::signal`]: Shutdown signals and process-group signaling
//! - [`kernel::daemon`]: Detaching from the terminal
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured audit events
//!
//! ## Configuration ([`config`])
//! - [`config::daemon`]: logoutd settings
//! - [`config::types`]: Shared type definitions and the error taxonomy
//!
//! # Design Principles
//!
//! 1. **Degrade, don't fail** - a doubtful backend means "local files"
//! 2. **Fixed ordering** - enforcement steps are enforced by the type system
//! 3. **Kernel access stays in [`kernel`]** - everything else is safe Rust

pub mod cli;
pub mod config;
pub mod enforcement;
pub mod identity;
pub mod kernel;
pub mod observability;
pub mod random;
