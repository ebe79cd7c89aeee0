use crate::config::types::{LoginkitError, Result};
/// logoutd configuration loading from a JSON file
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/logoutd.json";
pub const DEFAULT_MESSAGE_FILE: &str = "/etc/logoutd.mesg";
pub const DEFAULT_PORTTIME_FILE: &str = "/etc/porttime";
pub const DEFAULT_DEVICE_DIR: &str = "/dev";
/// Where a detached daemon logs when no `log_file` is configured
pub const DEFAULT_LOG_FILE: &str = "/var/log/logoutd.log";

/// Runtime settings of the session enforcement daemon.
/// Every field has a default so a partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Seconds between two scans of the session accounting source
    pub scan_interval_secs: u64,
    /// Seconds between notice and hangup, and between hangup and kill
    pub grace_period_secs: u64,
    /// Hang-up notice; the built-in message is used when missing
    pub message_file: PathBuf,
    /// Directory terminal lines are resolved against
    pub device_dir: PathBuf,
    /// Login time/port restrictions consulted by the default policy
    pub porttime_file: PathBuf,
    /// Log destination; stderr in the foreground and [`DEFAULT_LOG_FILE`]
    /// once detached when unset
    pub log_file: Option<PathBuf>,
    /// JSON-lines audit trail
    pub audit_log: Option<PathBuf>,
    /// Cap on unreaped enforcement tasks; reaching it aborts the pass
    pub max_tasks: Option<usize>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 60,
            grace_period_secs: 10,
            message_file: PathBuf::from(DEFAULT_MESSAGE_FILE),
            device_dir: PathBuf::from(DEFAULT_DEVICE_DIR),
            porttime_file: PathBuf::from(DEFAULT_PORTTIME_FILE),
            log_file: None,
            audit_log: None,
            max_tasks: None,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LoginkitError::ConfigUnavailable(format!("{}: {}", path.display(), e))
        })?;

        let config: DaemonConfig = serde_json::from_str(&content).map_err(|e| {
            LoginkitError::ConfigMalformed(format!("{}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load the system configuration, falling back to defaults when absent
    pub fn load_default() -> Result<Self> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        if !path.exists() {
            log::debug!("{} not found, using built-in defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from_file(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan_interval_secs == 0 {
            return Err(LoginkitError::ConfigMalformed(
                "scan_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.max_tasks == Some(0) {
            return Err(LoginkitError::ConfigMalformed(
                "max_tasks must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// File the logger should write to. A detached daemon has no stderr, so
    /// it always gets one.
    pub fn log_destination(&self, detached: bool) -> Option<PathBuf> {
        match &self.log_file {
            Some(path) => Some(path.clone()),
            None if detached => Some(PathBuf::from(DEFAULT_LOG_FILE)),
            None => None,
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_classic_daemon_timing() {
        let config = DaemonConfig::default();
        assert_eq!(config.scan_interval(), Duration::from_secs(60));
        assert_eq!(config.grace_period(), Duration::from_secs(10));
        assert_eq!(config.device_dir, PathBuf::from("/dev"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"grace_period_secs": 3, "max_tasks": 16}}"#).unwrap();

        let config = DaemonConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.grace_period_secs, 3);
        assert_eq!(config.max_tasks, Some(16));
        assert_eq!(config.scan_interval_secs, 60);
        assert_eq!(config.message_file, PathBuf::from(DEFAULT_MESSAGE_FILE));
    }

    #[test]
    fn malformed_file_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "scan_interval_secs = 5").unwrap();

        let err = DaemonConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, LoginkitError::ConfigMalformed(_)));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let err = DaemonConfig::load_from_file("/nonexistent/logoutd.json").unwrap_err();
        assert!(matches!(err, LoginkitError::ConfigUnavailable(_)));
    }

    #[test]
    fn detached_daemon_always_has_a_log_sink() {
        let config = DaemonConfig::default();
        assert_eq!(
            config.log_destination(true),
            Some(PathBuf::from(DEFAULT_LOG_FILE))
        );
        assert_eq!(config.log_destination(false), None);

        let configured = DaemonConfig {
            log_file: Some(PathBuf::from("/srv/logoutd.log")),
            ..DaemonConfig::default()
        };
        for detached in [true, false] {
            assert_eq!(
                configured.log_destination(detached),
                Some(PathBuf::from("/srv/logoutd.log"))
            );
        }
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = DaemonConfig {
            scan_interval_secs: 0,
            ..DaemonConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
