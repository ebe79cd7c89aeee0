//! Pluggable identity backend for subordinate-id range queries.
//!
//! Selected by a `subid:` line in the service-switch configuration, loaded
//! lazily once per process, and degraded to "no backend" on any doubt.

pub mod backend;
pub mod nsswitch;
pub mod resolver;

pub use backend::{BackendLoader, DynamicBackend, DynamicLoader, SharedBackend, SubidBackend};
pub use nsswitch::{parse_directive, Degradation, NsswitchDirective};
pub use resolver::{get_handle, init, init_state, resolution, Resolution, Resolver};
