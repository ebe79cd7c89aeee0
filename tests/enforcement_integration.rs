//! Integration tests for the enforcement pipeline
//!
//! Drive the daemon through its public API with a porttime file, a scratch
//! device directory and a signaler that records instead of killing.

use chrono::{Local, TimeZone};
use loginkit::config::types::{Result, SessionRecord, TerminationStage};
use loginkit::enforcement::{EnforcementDaemon, EnforcementSettings, FixedSessions, PortTimePolicy};
use loginkit::kernel::signal::GroupSignaler;
use nix::sys::signal::Signal;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<(i32, Signal, Instant)>>,
}

impl GroupSignaler for Recorder {
    fn signal_group(&self, pgid: i32, signal: Signal) -> Result<()> {
        self.sent.lock().unwrap().push((pgid, signal, Instant::now()));
        Ok(())
    }
}

fn scratch_terminal(dir: &std::path::Path, line: &str) {
    let path = dir.join(line);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"").unwrap();
}

#[test]
fn weekend_login_outside_window_is_logged_off() {
    let dir = tempfile::tempdir().unwrap();
    let devices = dir.path().join("dev");
    scratch_terminal(&devices, "pts/3");

    let porttime = dir.path().join("porttime");
    std::fs::write(&porttime, "# office hours only\n*:alice:Wk0900-1700\n").unwrap();
    let message = dir.path().join("logoutd.mesg");
    std::fs::write(&message, "Your time is up.\nGoodbye.\n").unwrap();

    let grace = Duration::from_millis(40);
    let recorder = Arc::new(Recorder::default());
    let mut daemon = EnforcementDaemon::new(
        FixedSessions(vec![
            SessionRecord::login("alice", "pts/3", 500),
            SessionRecord::login("bob", "pts/4", 600),
        ]),
        PortTimePolicy::new(&porttime),
        Arc::clone(&recorder),
        EnforcementSettings {
            scan_interval: Duration::from_secs(60),
            grace,
            message_file: message,
            device_dir: devices.clone(),
            max_tasks: None,
        },
    );

    // Saturday noon.
    let saturday = Local.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).single().unwrap();
    let started = Instant::now();
    let summary = daemon.run_pass(saturday).unwrap();
    assert_eq!(summary.denied, 1);
    assert_eq!(summary.spawned, 1);

    let reports = daemon.drain();
    assert_eq!(daemon.outstanding(), 0);
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.user, "alice");
    assert_eq!(report.device, devices.join("pts/3"));
    assert!(report.notified);
    assert_eq!(report.stage, TerminationStage::Reaped);
    assert_eq!(
        std::fs::read_to_string(devices.join("pts/3")).unwrap(),
        "Your time is up.\r\nGoodbye.\r\n"
    );

    let sent = recorder.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!((sent[0].0, sent[0].1), (500, Signal::SIGHUP));
    assert_eq!((sent[1].0, sent[1].1), (500, Signal::SIGKILL));
    assert!(sent[0].2.duration_since(started) >= grace);
    assert!(sent[1].2.duration_since(sent[0].2) >= grace);
}

#[test]
fn weekday_login_inside_window_is_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let porttime = dir.path().join("porttime");
    std::fs::write(&porttime, "*:alice:Wk0900-1700\n").unwrap();

    let recorder = Arc::new(Recorder::default());
    let mut daemon = EnforcementDaemon::new(
        FixedSessions(vec![SessionRecord::login("alice", "pts/3", 500)]),
        PortTimePolicy::new(&porttime),
        Arc::clone(&recorder),
        EnforcementSettings {
            scan_interval: Duration::from_secs(60),
            grace: Duration::ZERO,
            message_file: dir.path().join("none"),
            device_dir: dir.path().to_path_buf(),
            max_tasks: None,
        },
    );

    let monday = Local.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).single().unwrap();
    let summary = daemon.run_pass(monday).unwrap();
    assert_eq!(summary.denied, 0);
    assert_eq!(daemon.outstanding(), 0);
    assert!(recorder.sent.lock().unwrap().is_empty());
}

/// Keeps every formatted record so tests can count them
struct CapturingLogger {
    lines: Mutex<Vec<String>>,
}

impl log::Log for CapturingLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        self.lines
            .lock()
            .unwrap()
            .push(format!("{} {}", record.level(), record.args()));
    }

    fn flush(&self) {}
}

static CAPTURE: CapturingLogger = CapturingLogger {
    lines: Mutex::new(Vec::new()),
};

#[test]
fn logoff_is_logged_exactly_once() {
    let _ = log::set_logger(&CAPTURE);
    log::set_max_level(log::LevelFilter::Trace);

    let dir = tempfile::tempdir().unwrap();
    scratch_terminal(dir.path(), "pts/3");
    let recorder = Recorder::default();
    let record = SessionRecord::login("once-alice", "pts/3", 500);

    let report = loginkit::enforcement::enforce(
        &record,
        dir.path(),
        Duration::ZERO,
        b"bye\r\n",
        &recorder,
        None,
    );
    assert_eq!(report.signals_sent, vec!["SIGHUP", "SIGKILL"]);

    let lines = CAPTURE.lines.lock().unwrap();
    let logoffs: Vec<_> = lines
        .iter()
        .filter(|line| line.contains("logged off user 'once-alice'"))
        .collect();
    assert_eq!(logoffs.len(), 1, "{:?}", logoffs);
    assert!(logoffs[0].contains(&dir.path().join("pts/3").display().to_string()));
}
