/// Core types shared by the resolver, the random generator and logoutd
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Lifecycle of the process-wide backend resolution.
/// Transitions are monotonic: NotStarted -> InProgress -> Completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitState {
    NotStarted,
    InProgress,
    Completed,
}

impl InitState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            InitState::NotStarted => 0,
            InitState::InProgress => 1,
            InitState::Completed => 2,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => InitState::NotStarted,
            1 => InitState::InProgress,
            _ => InitState::Completed,
        }
    }
}

/// Id namespace a subordinate range belongs to (ABI values of the backend)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubidType {
    #[serde(rename = "uid")]
    Uid,
    #[serde(rename = "gid")]
    Gid,
}

impl SubidType {
    pub fn as_raw(self) -> libc::c_int {
        match self {
            SubidType::Uid => 1,
            SubidType::Gid => 2,
        }
    }
}

/// Status codes returned by backend capabilities
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubidStatus {
    Success,
    UnknownUser,
    ConnectionError,
    Error,
}

impl SubidStatus {
    pub fn from_raw(raw: libc::c_int) -> Self {
        match raw {
            0 => SubidStatus::Success,
            1 => SubidStatus::UnknownUser,
            2 => SubidStatus::ConnectionError,
            _ => SubidStatus::Error,
        }
    }
}

impl std::fmt::Display for SubidStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubidStatus::Success => write!(f, "success"),
            SubidStatus::UnknownUser => write!(f, "unknown user"),
            SubidStatus::ConnectionError => write!(f, "connection error"),
            SubidStatus::Error => write!(f, "error"),
        }
    }
}

/// A delegated range of subordinate ids
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubidRange {
    pub start: libc::c_ulong,
    pub count: libc::c_ulong,
}

/// Kind of a session accounting entry; only `Login` entries are policed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionKind {
    /// Interactive login (utmpx USER_PROCESS)
    #[serde(rename = "login")]
    Login,
    /// Any other record type (boot time, dead process, init, ...)
    #[serde(rename = "other")]
    Other(i16),
}

/// Snapshot of one live login session, taken fresh every scan pass
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user: String,
    pub line: String,
    pub pgid: i32,
    pub kind: SessionKind,
}

impl SessionRecord {
    pub fn login(user: &str, line: &str, pgid: i32) -> Self {
        Self {
            user: user.to_string(),
            line: line.to_string(),
            pgid,
            kind: SessionKind::Login,
        }
    }

    /// Only interactive logins with a user name are subject to policy
    pub fn is_policed(&self) -> bool {
        self.kind == SessionKind::Login && !self.user.is_empty()
    }
}

/// Policy verdict for one session in one pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnforcementDecision {
    Allow,
    Deny,
}

impl From<bool> for EnforcementDecision {
    fn from(allowed: bool) -> Self {
        if allowed {
            EnforcementDecision::Allow
        } else {
            EnforcementDecision::Deny
        }
    }
}

/// Stage reached by a termination attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationStage {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "notify_sent")]
    NotifySent,
    #[serde(rename = "hangup_signaled")]
    HangupSignaled,
    #[serde(rename = "kill_signaled")]
    KillSignaled,
    #[serde(rename = "reaped")]
    Reaped,
}

/// What one enforcement task did to its session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TerminationReport {
    pub user: String,
    pub line: String,
    pub device: PathBuf,
    pub pgid: i32,
    /// Notice reached the terminal
    pub notified: bool,
    /// Signal names in the order they were sent
    pub signals_sent: Vec<String>,
    pub stage: TerminationStage,
    pub errors: Vec<String>,
}

/// Error taxonomy for loginkit
#[derive(Error, Debug)]
pub enum LoginkitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration unavailable: {0}")]
    ConfigUnavailable(String),

    #[error("Configuration malformed: {0}")]
    ConfigMalformed(String),

    #[error("Backend load failed: {0}")]
    BackendLoadFailed(String),

    #[error("{library} did not provide @{capability}@")]
    BackendIncompatible {
        library: String,
        capability: String,
    },

    #[error("Backend query failed: {0}")]
    Backend(SubidStatus),

    #[error("Unable to obtain random bytes")]
    EntropyUnavailable,

    #[error("Cannot spawn enforcement task: {0}")]
    TaskSpawnExhausted(String),

    #[error("Terminal I/O failure: {0}")]
    TerminalIo(String),

    #[error("Policy error: {0}")]
    Policy(String),

    #[error("Process error: {0}")]
    Process(String),
}

impl From<nix::errno::Errno> for LoginkitError {
    fn from(err: nix::errno::Errno) -> Self {
        LoginkitError::Process(err.to_string())
    }
}

/// Result type alias for loginkit operations
pub type Result<T> = std::result::Result<T, LoginkitError>;
