//! Integration tests for backend resolution against real files

use loginkit::config::types::InitState;
use loginkit::identity::{
    BackendLoader, Degradation, DynamicLoader, NsswitchDirective, Resolution, Resolver,
    SharedBackend,
};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

fn nsswitch(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

#[test]
fn missing_shared_object_degrades_to_files() {
    let config = nsswitch("passwd: files\nsubid: no_such_backend_for_tests\n");
    let resolver = Resolver::new(DynamicLoader);

    let resolution = resolver.init(Some(config.path()));
    match resolution {
        Resolution::Degraded(Degradation::LoadFailed(message)) => {
            assert!(message.contains("libsubid_no_such_backend_for_tests.so"));
        }
        other => panic!("unexpected resolution: {:?}", other),
    }
    assert!(resolver.handle().is_none());
    assert_eq!(resolver.state(), InitState::Completed);
    assert!(resolver.config_opened());
}

/// Counts load attempts and always declines
#[derive(Default)]
struct Declining {
    attempts: AtomicUsize,
}

impl BackendLoader for Declining {
    fn load(&self, directive: &NsswitchDirective) -> Result<SharedBackend, Degradation> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(Degradation::LoadFailed(directive.library_name()))
    }
}

#[test]
fn files_directive_never_loads() {
    let config = nsswitch("subid: files\n");
    let resolver = Resolver::new(Declining::default());

    assert_eq!(
        resolver.init(Some(config.path())),
        &Resolution::Degraded(Degradation::FilesRequested)
    );
    assert_eq!(resolver.loader().attempts.load(Ordering::SeqCst), 0);
}

#[test]
fn concurrent_first_use_loads_once() {
    let config = nsswitch("subid: sssd\n");
    let resolver = Resolver::new(Declining::default());

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                resolver.init(Some(config.path()));
            });
        }
    });
    assert_eq!(resolver.loader().attempts.load(Ordering::SeqCst), 1);
    assert_eq!(resolver.state(), InitState::Completed);
}
