//! Session enforcement (logoutd).
//!
//! - `policy`: who may be logged in where and when
//! - `session`: session snapshots
//! - `terminate`: notice, hangup and kill for one session
//! - `daemon`: the scan loop and its task set

pub mod daemon;
pub mod policy;
pub mod session;
pub mod terminate;

pub use daemon::{EnforcementDaemon, EnforcementSettings, PassSummary, TaskSet};
pub use policy::{PolicyOracle, PortTimePolicy, PortTimeTable};
pub use session::{FixedSessions, SessionSource, UtmpSource};
pub use terminate::{enforce, load_notice, Termination, DEFAULT_HUP_MESSAGE};
