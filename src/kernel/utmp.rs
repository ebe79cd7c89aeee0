//! Session accounting (utmpx) snapshots.
//!
//! The utmpx cursor is process-global and not thread-safe, so every read
//! goes through one lock and rewinds/closes the database itself.

use crate::config::types::{Result, SessionKind, SessionRecord};

#[cfg(all(target_os = "linux", target_env = "gnu"))]
static UTMPX_CURSOR: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Text of a fixed-size, possibly unterminated C field
fn c_field(field: &[libc::c_char]) -> String {
    let bytes: Vec<u8> = field
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Read every entry of the session accounting database.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub fn read_sessions() -> Result<Vec<SessionRecord>> {
    let _cursor = UTMPX_CURSOR
        .lock()
        .map_err(|_| crate::config::types::LoginkitError::Process("utmpx lock poisoned".to_string()))?;

    let mut records = Vec::new();
    // SAFETY: the cursor functions are serialized by UTMPX_CURSOR; each
    // entry returned by getutxent is copied before the next call.
    unsafe {
        libc::setutxent();
        loop {
            let entry = libc::getutxent();
            if entry.is_null() {
                break;
            }
            let entry = &*entry;
            let kind = if entry.ut_type == libc::USER_PROCESS {
                SessionKind::Login
            } else {
                SessionKind::Other(entry.ut_type as i16)
            };
            records.push(SessionRecord {
                user: c_field(&entry.ut_user),
                line: c_field(&entry.ut_line),
                pgid: entry.ut_pid,
                kind,
            });
        }
        libc::endutxent();
    }

    Ok(records)
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
pub fn read_sessions() -> Result<Vec<SessionRecord>> {
    Err(crate::config::types::LoginkitError::Process(
        "utmpx session accounting requires Linux with glibc".to_string(),
    ))
}
