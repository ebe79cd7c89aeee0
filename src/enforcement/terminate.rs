use crate::config::types::{SessionRecord, TerminationReport, TerminationStage};
use crate::kernel::signal::GroupSignaler;
use crate::kernel::tty;
use crate::observability::audit::{events, CorrelationIds};
/// Logging off one offending session.
///
/// The sequence is fixed: notice on the terminal, grace period, SIGHUP to
/// the session's process group, grace period, SIGKILL. Each step is a
/// state of [`Termination`], so the order cannot be rearranged:
///
/// ```text
/// Termination<Pending> -> notify -> Termination<NotifySent>
///   -> hangup -> Termination<HangupSignaled>
///   -> kill -> Termination<KillSignaled> -> finish -> TerminationReport
/// ```
use log::{debug, info, warn};
use nix::sys::signal::Signal;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Written when no message file exists
pub const DEFAULT_HUP_MESSAGE: &str = "login time exceeded\n\n";

/// Notice text for a terminal: the message file with every `\n` turned into
/// `\r\n`, or [`DEFAULT_HUP_MESSAGE`] unchanged.
pub fn load_notice(message_file: &Path) -> Vec<u8> {
    match std::fs::read(message_file) {
        Ok(text) => {
            let mut notice = Vec::with_capacity(text.len() + text.len() / 16);
            for byte in text {
                if byte == b'\n' {
                    notice.push(b'\r');
                }
                notice.push(byte);
            }
            notice
        }
        Err(e) => {
            debug!("{}: {}, using built-in notice", message_file.display(), e);
            DEFAULT_HUP_MESSAGE.as_bytes().to_vec()
        }
    }
}

pub struct Pending;
pub struct NotifySent;
pub struct HangupSignaled;
pub struct KillSignaled;

pub struct Termination<S> {
    report: TerminationReport,
    device: Option<PathBuf>,
    grace: Duration,
    correlation: Option<CorrelationIds>,
    _state: PhantomData<S>,
}

impl<S> Termination<S> {
    fn advance<T>(self) -> Termination<T> {
        Termination {
            report: self.report,
            device: self.device,
            grace: self.grace,
            correlation: self.correlation,
            _state: PhantomData,
        }
    }

    /// Process groups 0 and 1 would hit the caller's own group or init
    fn group_is_signalable(&self) -> bool {
        self.report.pgid > 1
    }

    fn send(&mut self, signaler: &dyn GroupSignaler, signal: Signal) -> bool {
        match signaler.signal_group(self.report.pgid, signal) {
            Ok(()) => {
                self.report.signals_sent.push(signal.as_str().to_string());
                events::signal_sent(self.correlation.as_ref(), &self.report, signal);
                true
            }
            Err(e) => {
                warn!("{} to group {} failed: {}", signal.as_str(), self.report.pgid, e);
                self.report
                    .errors
                    .push(format!("{}: {}", signal.as_str(), e));
                false
            }
        }
    }

    pub fn report(&self) -> &TerminationReport {
        &self.report
    }
}

impl Termination<Pending> {
    pub fn new(
        record: &SessionRecord,
        device_dir: &Path,
        grace: Duration,
        correlation: Option<CorrelationIds>,
    ) -> Self {
        let mut errors = Vec::new();
        let device = match tty::device_path(device_dir, &record.line) {
            Ok(path) => Some(path),
            Err(e) => {
                errors.push(e.to_string());
                None
            }
        };

        Self {
            report: TerminationReport {
                user: record.user.clone(),
                line: record.line.clone(),
                device: device
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(&record.line)),
                pgid: record.pgid,
                notified: false,
                signals_sent: Vec::new(),
                stage: TerminationStage::Pending,
                errors,
            },
            device,
            grace,
            correlation,
            _state: PhantomData,
        }
    }

    /// Write the notice. The grace period only runs when the terminal could
    /// be opened; a terminal failure never stops the signals that follow.
    pub fn notify(mut self, notice: &[u8]) -> Termination<NotifySent> {
        if let Some(device) = self.device.clone() {
            match tty::open_terminal(&device) {
                Ok(terminal) => {
                    match tty::write_notice(&terminal, notice) {
                        Ok(()) => {
                            self.report.notified = true;
                            events::terminal_notified(self.correlation.as_ref(), &self.report);
                        }
                        Err(e) => {
                            self.report.errors.push(e.to_string());
                            events::terminal_notify_failed(
                                self.correlation.as_ref(),
                                &self.report,
                                &e.to_string(),
                            );
                        }
                    }
                    drop(terminal);
                    std::thread::sleep(self.grace);
                }
                Err(e) => {
                    self.report.errors.push(e.to_string());
                    events::terminal_notify_failed(
                        self.correlation.as_ref(),
                        &self.report,
                        &e.to_string(),
                    );
                }
            }
        }

        self.report.stage = TerminationStage::NotifySent;
        self.advance()
    }
}

impl Termination<NotifySent> {
    pub fn hangup(mut self, signaler: &dyn GroupSignaler) -> Termination<HangupSignaled> {
        if self.group_is_signalable() {
            if self.send(signaler, Signal::SIGHUP) {
                self.report.stage = TerminationStage::HangupSignaled;
            }
            std::thread::sleep(self.grace);
        }
        self.advance()
    }
}

impl Termination<HangupSignaled> {
    pub fn kill(mut self, signaler: &dyn GroupSignaler) -> Termination<KillSignaled> {
        if self.group_is_signalable() && self.send(signaler, Signal::SIGKILL) {
            self.report.stage = TerminationStage::KillSignaled;
        }
        self.advance()
    }
}

impl Termination<KillSignaled> {
    pub fn finish(self) -> TerminationReport {
        info!(
            "logged off user '{}' on '{}'",
            self.report.user,
            self.report.device.display()
        );
        events::session_logged_off(self.correlation.as_ref(), &self.report);
        self.report
    }
}

/// Run the whole sequence for one session
pub fn enforce(
    record: &SessionRecord,
    device_dir: &Path,
    grace: Duration,
    notice: &[u8],
    signaler: &dyn GroupSignaler,
    correlation: Option<CorrelationIds>,
) -> TerminationReport {
    Termination::new(record, device_dir, grace, correlation)
        .notify(notice)
        .hangup(signaler)
        .kill(signaler)
        .finish()
}
