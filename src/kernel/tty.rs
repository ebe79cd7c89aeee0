//! Terminal access for hang-up notices.

use crate::config::types::{LoginkitError, Result};
use nix::sys::termios::{self, OutputFlags, SetArg};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Component, Path, PathBuf};

/// Device node for a session line: lines already under `device_dir` are
/// used as-is, anything else is placed below it.
pub fn device_path(device_dir: &Path, line: &str) -> Result<PathBuf> {
    let candidate = Path::new(line);
    if candidate.components().any(|c| c == Component::ParentDir) {
        return Err(LoginkitError::TerminalIo(format!(
            "refusing line with parent components: {}",
            line
        )));
    }
    if candidate.starts_with(device_dir) {
        return Ok(candidate.to_path_buf());
    }
    Ok(device_dir.join(line.trim_start_matches('/')))
}

/// Open a terminal for writing without blocking and without making it our
/// controlling terminal.
pub fn open_terminal(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
        .open(path)
        .map_err(|e| LoginkitError::TerminalIo(format!("{}: {}", path.display(), e)))
}

/// Write `message` with output post-processing forced on, then put the
/// terminal settings back. Non-terminals are written to as plain files.
pub fn write_notice(terminal: &File, message: &[u8]) -> Result<()> {
    let saved = termios::tcgetattr(terminal).ok();
    if let Some(saved) = &saved {
        let mut forced = saved.clone();
        forced.output_flags |= OutputFlags::OPOST;
        if let Err(e) = termios::tcsetattr(terminal, SetArg::TCSANOW, &forced) {
            log::debug!("cannot enable OPOST: {}", e);
        }
    }

    let mut writer = terminal;
    let written = writer.write_all(message).and_then(|_| writer.flush());

    if let Some(saved) = &saved {
        if let Err(e) = termios::tcsetattr(terminal, SetArg::TCSANOW, saved) {
            log::warn!("cannot restore terminal settings: {}", e);
        }
    }

    written.map_err(|e| LoginkitError::TerminalIo(e.to_string()))
}
