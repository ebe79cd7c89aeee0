/// Audit trail for enforcement actions.
///
/// Every denial, notice, signal and logoff is recorded both through `log`
/// and, once [`init_security_logger`] has run with a path, as one JSON
/// object per line in the audit file. Events from one scan pass share a
/// pass id so a whole sweep can be correlated.
use crate::config::types::{LoginkitError, Result, TerminationReport};
use crate::identity::Degradation;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::SystemTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecuritySeverity {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityEventType {
    SessionDenied,
    TerminalNotified,
    TerminalNotifyFailed,
    HangupSent,
    KillSent,
    SessionLoggedOff,
    PassAborted,
    BackendDegraded,
}

impl SecurityEventType {
    pub fn default_severity(&self) -> SecuritySeverity {
        match self {
            SecurityEventType::SessionDenied => SecuritySeverity::Medium,
            SecurityEventType::TerminalNotified => SecuritySeverity::Low,
            SecurityEventType::TerminalNotifyFailed => SecuritySeverity::Medium,
            SecurityEventType::HangupSent => SecuritySeverity::Medium,
            SecurityEventType::KillSent => SecuritySeverity::High,
            SecurityEventType::SessionLoggedOff => SecuritySeverity::Low,
            SecurityEventType::PassAborted => SecuritySeverity::Critical,
            SecurityEventType::BackendDegraded => SecuritySeverity::High,
        }
    }
}

/// Identifiers tying events of one scan pass together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationIds {
    pub pass_id: String,
    pub daemon_pid: u32,
}

impl CorrelationIds {
    pub fn new_pass() -> Self {
        Self {
            pass_id: Uuid::new_v4().to_string(),
            daemon_pid: std::process::id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_type: SecurityEventType,
    pub severity: SecuritySeverity,
    pub timestamp: SystemTime,
    pub details: String,
    pub correlation: Option<CorrelationIds>,
    pub user: Option<String>,
    pub line: Option<String>,
    pub pgid: Option<i32>,
    pub file_path: Option<String>,
    /// The caller already wrote this event to `log`
    #[serde(skip)]
    pub logged_by_caller: bool,
}

impl SecurityEvent {
    pub fn new(event_type: SecurityEventType, details: String) -> Self {
        Self {
            severity: event_type.default_severity(),
            event_type,
            timestamp: SystemTime::now(),
            details,
            correlation: None,
            user: None,
            line: None,
            pgid: None,
            file_path: None,
            logged_by_caller: false,
        }
    }

    pub fn with_session(mut self, user: &str, line: &str, pgid: i32) -> Self {
        self.user = Some(user.to_string());
        self.line = Some(line.to_string());
        self.pgid = Some(pgid);
        self
    }

    pub fn with_file_path(mut self, path: &Path) -> Self {
        self.file_path = Some(path.display().to_string());
        self
    }

    pub fn already_logged(mut self) -> Self {
        self.logged_by_caller = true;
        self
    }

    pub fn with_correlation(mut self, correlation: Option<&CorrelationIds>) -> Self {
        self.correlation = correlation.cloned();
        self
    }

    fn to_json(&self) -> serde_json::Value {
        let mut entry = serde_json::json!({
            "timestamp": self.timestamp
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            "event_type": self.event_type,
            "severity": self.severity,
            "details": self.details,
            "process_id": std::process::id(),
        });

        if let Some(correlation) = &self.correlation {
            entry["correlation"] = serde_json::json!({
                "pass_id": correlation.pass_id,
                "daemon_pid": correlation.daemon_pid,
            });
        }
        if let Some(user) = &self.user {
            entry["user"] = serde_json::json!(user);
        }
        if let Some(line) = &self.line {
            entry["line"] = serde_json::json!(line);
        }
        if let Some(pgid) = self.pgid {
            entry["pgid"] = serde_json::json!(pgid);
        }
        if let Some(file_path) = &self.file_path {
            entry["file_path"] = serde_json::json!(file_path);
        }
        entry
    }

    fn emit_to_log(&self) {
        if self.logged_by_caller {
            return;
        }
        match self.severity {
            SecuritySeverity::Critical | SecuritySeverity::High => {
                error!("AUDIT {:?}: {}", self.event_type, self.details)
            }
            SecuritySeverity::Medium => warn!("AUDIT {:?}: {}", self.event_type, self.details),
            SecuritySeverity::Low => info!("AUDIT {:?}: {}", self.event_type, self.details),
        }
    }
}

/// Append-only JSON-lines audit file
pub struct SecurityLogger {
    audit_file: Mutex<File>,
    audit_path: PathBuf,
}

impl SecurityLogger {
    pub fn new(audit_path: &Path) -> Result<Self> {
        if let Some(parent) = audit_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LoginkitError::ConfigUnavailable(format!(
                    "cannot create audit log directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let audit_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(audit_path)
            .map_err(|e| {
                LoginkitError::ConfigUnavailable(format!(
                    "cannot open audit log {}: {}",
                    audit_path.display(),
                    e
                ))
            })?;

        Ok(Self {
            audit_file: Mutex::new(audit_file),
            audit_path: audit_path.to_path_buf(),
        })
    }

    pub fn log_security_event(&self, event: &SecurityEvent) {
        event.emit_to_log();

        let entry = event.to_json();
        match self.audit_file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", entry).and_then(|_| file.flush()) {
                    error!("Failed to write audit log: {}", e);
                }
            }
            Err(_) => error!("Audit log lock poisoned"),
        }
    }

    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }
}

static SECURITY_LOGGER: OnceLock<SecurityLogger> = OnceLock::new();

/// Install the process-wide audit file. Without a path, events only go
/// through `log`.
pub fn init_security_logger(audit_path: Option<&Path>) -> Result<()> {
    let Some(path) = audit_path else {
        return Ok(());
    };
    let logger = SecurityLogger::new(path)?;
    if SECURITY_LOGGER.set(logger).is_err() {
        warn!("Audit logger already initialized");
    } else {
        info!("Audit log at {}", path.display());
    }
    Ok(())
}

pub fn log_security_event(event: SecurityEvent) {
    match SECURITY_LOGGER.get() {
        Some(logger) => logger.log_security_event(&event),
        None => event.emit_to_log(),
    }
}

/// Shorthands for the events the daemon and resolver emit
pub mod events {
    use super::*;

    pub fn session_denied(correlation: Option<&CorrelationIds>, user: &str, line: &str, pgid: i32) {
        log_security_event(
            SecurityEvent::new(
                SecurityEventType::SessionDenied,
                format!("user '{}' not permitted on '{}' at this time", user, line),
            )
            .with_session(user, line, pgid)
            .with_correlation(correlation),
        );
    }

    pub fn terminal_notified(correlation: Option<&CorrelationIds>, report: &TerminationReport) {
        log_security_event(
            SecurityEvent::new(
                SecurityEventType::TerminalNotified,
                format!("notice written to {}", report.device.display()),
            )
            .with_session(&report.user, &report.line, report.pgid)
            .with_file_path(&report.device)
            .with_correlation(correlation),
        );
    }

    pub fn terminal_notify_failed(
        correlation: Option<&CorrelationIds>,
        report: &TerminationReport,
        reason: &str,
    ) {
        log_security_event(
            SecurityEvent::new(SecurityEventType::TerminalNotifyFailed, reason.to_string())
                .with_session(&report.user, &report.line, report.pgid)
                .with_file_path(&report.device)
                .with_correlation(correlation),
        );
    }

    pub fn signal_sent(
        correlation: Option<&CorrelationIds>,
        report: &TerminationReport,
        signal: nix::sys::signal::Signal,
    ) {
        let event_type = if signal == nix::sys::signal::Signal::SIGKILL {
            SecurityEventType::KillSent
        } else {
            SecurityEventType::HangupSent
        };
        log_security_event(
            SecurityEvent::new(
                event_type,
                format!("{} sent to process group {}", signal.as_str(), report.pgid),
            )
            .with_session(&report.user, &report.line, report.pgid)
            .with_correlation(correlation),
        );
    }

    pub fn session_logged_off(correlation: Option<&CorrelationIds>, report: &TerminationReport) {
        log_security_event(
            SecurityEvent::new(
                SecurityEventType::SessionLoggedOff,
                format!(
                    "logged off user '{}' on '{}'",
                    report.user,
                    report.device.display()
                ),
            )
            .with_session(&report.user, &report.line, report.pgid)
            .with_file_path(&report.device)
            .with_correlation(correlation)
            .already_logged(),
        );
    }

    pub fn pass_aborted(correlation: Option<&CorrelationIds>, reason: &str) {
        log_security_event(
            SecurityEvent::new(SecurityEventType::PassAborted, reason.to_string())
                .with_correlation(correlation),
        );
    }
}

pub fn backend_degraded(config_path: &Path, reason: &Degradation) {
    log_security_event(
        SecurityEvent::new(SecurityEventType::BackendDegraded, reason.to_string())
            .with_file_path(config_path),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::TerminationStage;

    fn report() -> TerminationReport {
        TerminationReport {
            user: "alice".to_string(),
            line: "pts/3".to_string(),
            device: PathBuf::from("/dev/pts/3"),
            pgid: 500,
            notified: false,
            signals_sent: Vec::new(),
            stage: TerminationStage::Pending,
            errors: Vec::new(),
        }
    }

    #[test]
    fn severities_follow_event_type() {
        assert_eq!(
            SecurityEventType::KillSent.default_severity(),
            SecuritySeverity::High
        );
        assert_eq!(
            SecurityEventType::SessionLoggedOff.default_severity(),
            SecuritySeverity::Low
        );
    }

    #[test]
    fn events_are_written_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("logoutd.jsonl");
        let logger = SecurityLogger::new(&path).unwrap();
        let pass = CorrelationIds::new_pass();

        let r = report();
        logger.log_security_event(
            &SecurityEvent::new(SecurityEventType::SessionDenied, "outside window".into())
                .with_session(&r.user, &r.line, r.pgid)
                .with_correlation(Some(&pass)),
        );
        logger.log_security_event(&SecurityEvent::new(
            SecurityEventType::PassAborted,
            "spawn failed".into(),
        ));

        let text = std::fs::read_to_string(logger.audit_path()).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event_type"], "SessionDenied");
        assert_eq!(lines[0]["user"], "alice");
        assert_eq!(lines[0]["pgid"], 500);
        assert_eq!(lines[0]["correlation"]["pass_id"], pass.pass_id.as_str());
        assert_eq!(lines[1]["severity"], "Critical");
        assert!(lines[1].get("correlation").is_none());
    }

    #[test]
    fn caller_logged_events_still_reach_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SecurityLogger::new(&dir.path().join("audit.jsonl")).unwrap();
        let event = SecurityEvent::new(SecurityEventType::SessionLoggedOff, "done".into())
            .already_logged();
        assert!(event.logged_by_caller);
        logger.log_security_event(&event);

        let text = std::fs::read_to_string(logger.audit_path()).unwrap();
        let entry: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(entry["event_type"], "SessionLoggedOff");
        assert!(entry.get("logged_by_caller").is_none());
    }

    #[test]
    fn pass_ids_are_distinct() {
        assert_ne!(CorrelationIds::new_pass(), CorrelationIds::new_pass());
    }

    #[test]
    fn uninitialized_global_falls_back_to_log() {
        events::session_logged_off(None, &report());
        backend_degraded(Path::new("/etc/nsswitch.conf"), &Degradation::EmptyToken);
    }
}
