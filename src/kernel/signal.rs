use crate::config::types::Result;
use log::info;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;
/// Async-safe shutdown signals for logoutd and process-group signaling
/// for session termination
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Global shutdown flag (async-safe atomic)
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Global signal received (async-safe atomic)
static SIGNAL_RECEIVED: AtomicU32 = AtomicU32::new(0);

/// Signal handler state
pub struct SignalHandler;

impl SignalHandler {
    /// Initialize signal handlers
    /// Must be called before any enforcement task is spawned
    pub fn init() -> Result<Self> {
        Self::install_signal_handlers()?;
        Ok(Self)
    }

    /// Install signal handlers for SIGINT, SIGTERM, SIGHUP
    fn install_signal_handlers() -> Result<()> {
        let sig_action = SigAction::new(
            SigHandler::Handler(Self::signal_handler),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );

        // SAFETY: the handler only stores to atomics.
        unsafe {
            signal::sigaction(Signal::SIGINT, &sig_action)?;
            signal::sigaction(Signal::SIGTERM, &sig_action)?;
            signal::sigaction(Signal::SIGHUP, &sig_action)?;
        }

        info!("Signal handlers installed (SIGINT, SIGTERM, SIGHUP)");
        Ok(())
    }

    /// Async-safe signal handler
    /// Only performs atomic operations - no allocations, no locks, no I/O
    extern "C" fn signal_handler(signal: libc::c_int) {
        SIGNAL_RECEIVED.store(signal as u32, Ordering::SeqCst);
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
    }

    /// Check if shutdown was requested
    pub fn shutdown_requested(&self) -> bool {
        SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
    }

    /// Get signal that was received (0 if none)
    pub fn get_signal(&self) -> u32 {
        SIGNAL_RECEIVED.load(Ordering::SeqCst)
    }

    /// Reset shutdown flag (for testing)
    #[cfg(test)]
    pub fn reset(&self) {
        SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
        SIGNAL_RECEIVED.store(0, Ordering::SeqCst);
    }

    /// Sleep up to `timeout`, waking early on a shutdown signal.
    /// Returns true if a signal arrived.
    pub fn wait_for_signal(&self, timeout: Duration) -> bool {
        let start = Instant::now();

        while start.elapsed() < timeout {
            if self.shutdown_requested() {
                return true;
            }
            let left = timeout.saturating_sub(start.elapsed());
            std::thread::sleep(left.min(Duration::from_millis(100)));
        }

        self.shutdown_requested()
    }
}

/// Delivers signals to the process group of a login session
pub trait GroupSignaler: Send + Sync {
    fn signal_group(&self, pgid: i32, signal: Signal) -> Result<()>;
}

/// Signals real process groups with killpg(2)
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelSignaler;

impl GroupSignaler for KernelSignaler {
    fn signal_group(&self, pgid: i32, signal: Signal) -> Result<()> {
        signal::killpg(Pid::from_raw(pgid), signal)?;
        Ok(())
    }
}
