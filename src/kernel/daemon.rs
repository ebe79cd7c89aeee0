//! Backgrounding for logoutd.

use crate::config::types::Result;
use nix::unistd::{dup2, fork, setsid, ForkResult};
use std::os::unix::io::AsRawFd;

/// Detach from the invoking terminal and process group and continue in the
/// background. The invoking process exits with success once the child
/// exists.
///
/// Must run before any thread is spawned.
pub fn detach() -> Result<()> {
    // SAFETY: logoutd calls this from main before spawning threads, so the
    // child is a faithful single-threaded copy.
    match unsafe { fork() }? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    // New session: no controlling terminal, own process group.
    setsid()?;
    std::env::set_current_dir("/")?;
    redirect_stdio_to_null()?;
    Ok(())
}

fn redirect_stdio_to_null() -> Result<()> {
    let null = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")?;
    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        dup2(null.as_raw_fd(), target)?;
    }
    Ok(())
}
