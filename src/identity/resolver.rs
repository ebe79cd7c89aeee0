//! Process-wide, single-flight resolution of the subid backend.
//!
//! The first caller parses the service-switch configuration and loads the
//! backend; concurrent callers block on the same one-time cell and observe
//! the identical outcome. The result never changes afterwards.

use super::backend::{BackendLoader, DynamicLoader, SharedBackend};
use super::nsswitch::{parse_directive, Degradation, NSSWITCH_PATH};
use crate::config::types::InitState;
use log::{debug, info, warn};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Once, OnceLock, RwLock};

/// Final outcome of backend resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Backend token that was loaded
    Backend(String),
    /// No backend; subids come from local files
    Degraded(Degradation),
}

impl Resolution {
    pub fn has_backend(&self) -> bool {
        matches!(self, Resolution::Backend(_))
    }
}

struct Resolved {
    outcome: Resolution,
    backend: RwLock<Option<SharedBackend>>,
    config_opened: bool,
}

impl Resolved {
    fn degraded(reason: Degradation, config_opened: bool) -> Self {
        Self {
            outcome: Resolution::Degraded(reason),
            backend: RwLock::new(None),
            config_opened,
        }
    }
}

/// Single-flight backend resolver
pub struct Resolver<L: BackendLoader = DynamicLoader> {
    loader: L,
    state: AtomicU8,
    released: AtomicBool,
    slot: OnceLock<Resolved>,
}

impl<L: BackendLoader> Resolver<L> {
    pub const fn new(loader: L) -> Self {
        Self {
            loader,
            state: AtomicU8::new(0),
            released: AtomicBool::new(false),
            slot: OnceLock::new(),
        }
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Resolve once; `nsswitch_path` only matters for the first caller.
    pub fn init(&self, nsswitch_path: Option<&Path>) -> &Resolution {
        let resolved = self.slot.get_or_init(|| {
            let started = self.state.compare_exchange(
                InitState::NotStarted.as_u8(),
                InitState::InProgress.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            debug_assert!(started.is_ok(), "backend resolution entered twice");
            self.resolve(nsswitch_path.unwrap_or_else(|| Path::new(NSSWITCH_PATH)))
        });
        self.state.store(InitState::Completed.as_u8(), Ordering::Release);
        &resolved.outcome
    }

    /// Backend for subid queries, resolving from the default path on first use
    pub fn handle(&self) -> Option<SharedBackend> {
        self.init(None);
        self.current()
    }

    /// Backend without triggering resolution
    pub fn current(&self) -> Option<SharedBackend> {
        let resolved = self.slot.get()?;
        let backend = resolved.backend.read().ok()?;
        backend.clone()
    }

    pub fn state(&self) -> InitState {
        InitState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        self.slot.get().map(|resolved| &resolved.outcome)
    }

    /// Whether resolution managed to read the configuration source
    pub fn config_opened(&self) -> bool {
        self.slot.get().map_or(false, |resolved| resolved.config_opened)
    }

    /// Drop the resolver's reference to the backend. Returns true only for
    /// the call that actually released a loaded backend.
    pub fn release(&self) -> bool {
        let Some(resolved) = self.slot.get() else {
            return false;
        };
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        match resolved.backend.write() {
            Ok(mut backend) => backend.take().is_some(),
            Err(_) => false,
        }
    }

    fn resolve(&self, path: &Path) -> Resolved {
        let text = match std::fs::read(path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed opening {}: {}", path.display(), e);
                }
                return Resolved::degraded(
                    Degradation::ConfigUnavailable(format!("{}: {}", path.display(), e)),
                    false,
                );
            }
        };

        let loaded = parse_directive(&text).and_then(|directive| {
            let backend = self.loader.load(&directive)?;
            Ok((directive, backend))
        });

        match loaded {
            Ok((directive, backend)) => {
                info!("Using subid backend {}", directive.library_name());
                Resolved {
                    outcome: Resolution::Backend(directive.token().to_string()),
                    backend: RwLock::new(Some(backend)),
                    config_opened: true,
                }
            }
            Err(reason) => {
                if reason.is_expected() {
                    debug!("No subid backend configured ({})", reason);
                } else {
                    warn!("{}", reason);
                    warn!("Using files");
                    crate::observability::audit::backend_degraded(path, &reason);
                }
                Resolved::degraded(reason, true)
            }
        }
    }
}

static RESOLVER: Resolver<DynamicLoader> = Resolver::new(DynamicLoader);
static EXIT_HOOK: Once = Once::new();

extern "C" fn release_at_exit() {
    if RESOLVER.release() {
        debug!("Released subid backend at exit");
    }
}

/// Resolve the process-wide backend. Safe to call from any thread, any
/// number of times; only the first call's path is used.
pub fn init(nsswitch_path: Option<&Path>) -> &'static Resolution {
    let outcome = RESOLVER.init(nsswitch_path);
    if RESOLVER.config_opened() {
        EXIT_HOOK.call_once(|| {
            // SAFETY: release_at_exit neither unwinds nor touches
            // thread-local state.
            if unsafe { libc::atexit(release_at_exit) } != 0 {
                warn!("Cannot register subid backend release at exit");
            }
        });
    }
    outcome
}

/// Process-wide backend, or `None` when subids come from local files
pub fn get_handle() -> Option<SharedBackend> {
    init(None);
    RESOLVER.current()
}

pub fn init_state() -> InitState {
    RESOLVER.state()
}

/// Recorded outcome, if resolution has completed
pub fn resolution() -> Option<&'static Resolution> {
    RESOLVER.resolution()
}
