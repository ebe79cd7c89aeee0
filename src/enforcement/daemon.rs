//! Scan loop of logoutd.
//!
//! Each pass takes a fresh session snapshot, asks the policy about every
//! policed record and hands each denied one to its own enforcement thread.
//! Threads are kept in a [`TaskSet`] and reaped at the end of every pass.

use super::policy::PolicyOracle;
use super::session::SessionSource;
use super::terminate::{enforce, load_notice};
use crate::config::daemon::DaemonConfig;
use crate::config::types::{
    EnforcementDecision, LoginkitError, Result, SessionRecord, TerminationReport,
    TerminationStage,
};
use crate::kernel::signal::{GroupSignaler, SignalHandler};
use crate::observability::audit::{events, CorrelationIds};
use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// What the enforcement threads need to know
#[derive(Debug, Clone, PartialEq)]
pub struct EnforcementSettings {
    pub scan_interval: Duration,
    pub grace: Duration,
    pub message_file: PathBuf,
    pub device_dir: PathBuf,
    pub max_tasks: Option<usize>,
}

impl From<&DaemonConfig> for EnforcementSettings {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            scan_interval: config.scan_interval(),
            grace: config.grace_period(),
            message_file: config.message_file.clone(),
            device_dir: config.device_dir.clone(),
            max_tasks: config.max_tasks,
        }
    }
}

struct EnforcementTask {
    user: String,
    line: String,
    pgid: i32,
    handle: JoinHandle<TerminationReport>,
}

impl EnforcementTask {
    fn join(self) -> TerminationReport {
        let mut report = match self.handle.join() {
            Ok(report) => report,
            Err(_) => TerminationReport {
                user: self.user,
                line: self.line.clone(),
                device: PathBuf::from(&self.line),
                pgid: self.pgid,
                notified: false,
                signals_sent: Vec::new(),
                stage: TerminationStage::Pending,
                errors: vec!["enforcement thread panicked".to_string()],
            },
        };
        report.stage = TerminationStage::Reaped;
        report
    }
}

/// Outstanding enforcement threads
#[derive(Default)]
pub struct TaskSet {
    tasks: Vec<EnforcementTask>,
}

impl TaskSet {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn push(&mut self, task: EnforcementTask) {
        self.tasks.push(task);
    }

    /// Join every task that has already finished; never blocks on the rest
    pub fn reap_finished(&mut self) -> Vec<TerminationReport> {
        let (finished, running): (Vec<_>, Vec<_>) = self
            .tasks
            .drain(..)
            .partition(|task| task.handle.is_finished());
        self.tasks = running;
        finished.into_iter().map(EnforcementTask::join).collect()
    }

    /// Wait for every task
    pub fn join_all(&mut self) -> Vec<TerminationReport> {
        self.tasks.drain(..).map(EnforcementTask::join).collect()
    }
}

/// Outcome of one scan pass
#[derive(Debug, Default)]
pub struct PassSummary {
    pub pass_id: String,
    pub scanned: usize,
    pub policed: usize,
    pub denied: usize,
    pub spawned: usize,
    /// Set when the pass was cut short by task exhaustion
    pub aborted: Option<String>,
    pub reaped: Vec<TerminationReport>,
}

pub struct EnforcementDaemon<S, P, G> {
    source: S,
    policy: P,
    signaler: Arc<G>,
    settings: EnforcementSettings,
    tasks: TaskSet,
}

impl<S, P, G> EnforcementDaemon<S, P, G>
where
    S: SessionSource,
    P: PolicyOracle,
    G: GroupSignaler + 'static,
{
    pub fn new(source: S, policy: P, signaler: Arc<G>, settings: EnforcementSettings) -> Self {
        Self {
            source,
            policy,
            signaler,
            settings,
            tasks: TaskSet::default(),
        }
    }

    pub fn settings(&self) -> &EnforcementSettings {
        &self.settings
    }

    /// Tasks spawned but not yet reaped
    pub fn outstanding(&self) -> usize {
        self.tasks.len()
    }

    /// One scan over the current sessions, judged at `now`
    pub fn run_pass(&mut self, now: DateTime<Local>) -> Result<PassSummary> {
        let correlation = CorrelationIds::new_pass();
        let records = self.source.snapshot()?;
        let notice: Arc<[u8]> = load_notice(&self.settings.message_file).into();

        let mut summary = PassSummary {
            pass_id: correlation.pass_id.clone(),
            scanned: records.len(),
            ..Default::default()
        };

        for record in records.into_iter().filter(SessionRecord::is_policed) {
            summary.policed += 1;
            if self.policy.decide(&record.user, &record.line, now) == EnforcementDecision::Allow {
                continue;
            }
            summary.denied += 1;
            events::session_denied(Some(&correlation), &record.user, &record.line, record.pgid);

            if let Err(e) = self.spawn_task(record, &notice, &correlation) {
                error!("{}; abandoning the rest of this pass", e);
                events::pass_aborted(Some(&correlation), &e.to_string());
                summary.aborted = Some(e.to_string());
                break;
            }
            summary.spawned += 1;
        }

        summary.reaped = self.tasks.reap_finished();
        debug!(
            "pass {}: {} records, {} denied, {} reaped, {} outstanding",
            summary.pass_id,
            summary.scanned,
            summary.denied,
            summary.reaped.len(),
            self.tasks.len()
        );
        Ok(summary)
    }

    fn spawn_task(
        &mut self,
        record: SessionRecord,
        notice: &Arc<[u8]>,
        correlation: &CorrelationIds,
    ) -> Result<()> {
        if let Some(limit) = self.settings.max_tasks {
            if self.tasks.len() >= limit {
                return Err(LoginkitError::TaskSpawnExhausted(format!(
                    "{} enforcement tasks outstanding",
                    limit
                )));
            }
        }

        let user = record.user.clone();
        let line = record.line.clone();
        let pgid = record.pgid;
        let signaler = Arc::clone(&self.signaler);
        let notice = Arc::clone(notice);
        let device_dir = self.settings.device_dir.clone();
        let grace = self.settings.grace;
        let correlation = correlation.clone();

        let handle = std::thread::Builder::new()
            .name(format!("logoff-{}", line.replace('/', "-")))
            .spawn(move || {
                enforce(
                    &record,
                    &device_dir,
                    grace,
                    &notice,
                    signaler.as_ref(),
                    Some(correlation),
                )
            })
            .map_err(|e| LoginkitError::TaskSpawnExhausted(e.to_string()))?;

        self.tasks.push(EnforcementTask {
            user,
            line,
            pgid,
            handle,
        });
        Ok(())
    }

    /// Scan until a shutdown signal arrives, or once when `once` is set.
    /// Outstanding tasks are joined before returning.
    pub fn run(&mut self, shutdown: &SignalHandler, once: bool) -> Result<()> {
        info!(
            "Scanning sessions every {}s",
            self.settings.scan_interval.as_secs()
        );

        loop {
            if let Err(e) = self.run_pass(Local::now()) {
                warn!("Session scan failed: {}", e);
            }
            if once || shutdown.wait_for_signal(self.settings.scan_interval) {
                break;
            }
        }

        if shutdown.shutdown_requested() {
            info!("Shutdown requested (signal {})", shutdown.get_signal());
        }
        let pending = self.tasks.len();
        if pending > 0 {
            info!("Waiting for {} enforcement tasks", pending);
        }
        self.tasks.join_all();
        Ok(())
    }

    /// Block until every outstanding task has finished
    pub fn drain(&mut self) -> Vec<TerminationReport> {
        self.tasks.join_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcement::session::FixedSessions;
    use crate::enforcement::terminate::tests::RecordingSignaler;
    use crate::config::types::SessionKind;
    use nix::sys::signal::Signal;

    fn settings(device_dir: &std::path::Path) -> EnforcementSettings {
        EnforcementSettings {
            scan_interval: Duration::from_millis(10),
            grace: Duration::from_millis(5),
            message_file: device_dir.join("no-such-message"),
            device_dir: device_dir.to_path_buf(),
            max_tasks: None,
        }
    }

    fn deny_user(name: &'static str) -> impl PolicyOracle {
        move |user: &str, _line: &str, _now: DateTime<Local>| user != name
    }

    #[test]
    fn denied_session_is_logged_off() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("pts")).unwrap();
        std::fs::write(dir.path().join("pts/3"), b"").unwrap();

        let signaler = Arc::new(RecordingSignaler::default());
        let source = FixedSessions(vec![
            SessionRecord::login("alice", "pts/3", 500),
            SessionRecord::login("bob", "pts/4", 600),
        ]);
        let mut daemon = EnforcementDaemon::new(
            source,
            deny_user("alice"),
            Arc::clone(&signaler),
            settings(dir.path()),
        );

        let summary = daemon.run_pass(Local::now()).unwrap();
        assert_eq!(summary.policed, 2);
        assert_eq!(summary.denied, 1);
        assert_eq!(summary.spawned, 1);
        assert!(summary.aborted.is_none());

        let reports = daemon.drain();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].user, "alice");
        assert!(reports[0].notified);
        assert_eq!(reports[0].stage, TerminationStage::Reaped);
        assert_eq!(
            std::fs::read(dir.path().join("pts/3")).unwrap(),
            b"login time exceeded\n\n"
        );

        let sent = signaler.sent.lock().unwrap();
        let signals: Vec<_> = sent.iter().map(|(pgid, sig, _)| (*pgid, *sig)).collect();
        assert_eq!(signals, vec![(500, Signal::SIGHUP), (500, Signal::SIGKILL)]);
    }

    #[test]
    fn allowed_sessions_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let signaler = Arc::new(RecordingSignaler::default());
        let allow_all = |_: &str, _: &str, _: DateTime<Local>| true;
        let mut daemon = EnforcementDaemon::new(
            FixedSessions(vec![SessionRecord::login("alice", "pts/3", 500)]),
            allow_all,
            Arc::clone(&signaler),
            settings(dir.path()),
        );

        let summary = daemon.run_pass(Local::now()).unwrap();
        assert_eq!(summary.denied, 0);
        assert_eq!(daemon.outstanding(), 0);
        assert!(signaler.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn non_login_records_are_not_policed() {
        let dir = tempfile::tempdir().unwrap();
        let signaler = Arc::new(RecordingSignaler::default());
        let source = FixedSessions(vec![
            SessionRecord {
                user: "reboot".to_string(),
                line: "~".to_string(),
                pgid: 0,
                kind: SessionKind::Other(2),
            },
            SessionRecord::login("", "tty2", 42),
        ]);
        let deny_all = |_: &str, _: &str, _: DateTime<Local>| false;
        let mut daemon =
            EnforcementDaemon::new(source, deny_all, Arc::clone(&signaler), settings(dir.path()));

        let summary = daemon.run_pass(Local::now()).unwrap();
        assert_eq!(summary.scanned, 2);
        assert_eq!(summary.policed, 0);
        assert_eq!(daemon.outstanding(), 0);
    }

    #[test]
    fn task_cap_aborts_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        let signaler = Arc::new(RecordingSignaler::default());
        let source = FixedSessions(vec![
            SessionRecord::login("a", "pts/1", 101),
            SessionRecord::login("b", "pts/2", 102),
            SessionRecord::login("c", "pts/3", 103),
        ]);
        let mut config = settings(dir.path());
        config.max_tasks = Some(2);
        config.grace = Duration::from_millis(200);
        let deny_all = |_: &str, _: &str, _: DateTime<Local>| false;
        let mut daemon = EnforcementDaemon::new(source, deny_all, signaler, config);

        let summary = daemon.run_pass(Local::now()).unwrap();
        assert_eq!(summary.denied, 3);
        assert_eq!(summary.spawned, 2);
        assert!(summary.aborted.is_some());
        assert_eq!(daemon.drain().len(), 2);
    }

    #[test]
    fn reaping_converges_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let signaler = Arc::new(RecordingSignaler::default());
        let deny_all = |_: &str, _: &str, _: DateTime<Local>| false;
        let mut daemon = EnforcementDaemon::new(
            FixedSessions(vec![
                SessionRecord::login("a", "pts/1", 101),
                SessionRecord::login("b", "pts/2", 102),
            ]),
            deny_all,
            signaler,
            settings(dir.path()),
        );
        daemon.run_pass(Local::now()).unwrap();
        assert!(daemon.outstanding() <= 2);

        let mut reaped = 0;
        for _ in 0..50 {
            std::thread::sleep(Duration::from_millis(20));
            reaped += daemon.tasks.reap_finished().len();
            if daemon.outstanding() == 0 {
                break;
            }
        }
        assert_eq!(daemon.outstanding(), 0);
        assert_eq!(reaped, 2);
    }

    #[test]
    fn settings_follow_config() {
        let config = DaemonConfig {
            grace_period_secs: 3,
            max_tasks: Some(8),
            ..Default::default()
        };
        let settings = EnforcementSettings::from(&config);
        assert_eq!(settings.grace, Duration::from_secs(3));
        assert_eq!(settings.scan_interval, Duration::from_secs(60));
        assert_eq!(settings.max_tasks, Some(8));
    }
}
