//! Where the daemon gets its session snapshots from.

use crate::config::types::{Result, SessionRecord};
use crate::kernel::utmp;

/// A fresh view of live sessions, taken once per scan pass
pub trait SessionSource: Send {
    fn snapshot(&self) -> Result<Vec<SessionRecord>>;
}

/// The system utmpx database
#[derive(Debug, Default, Clone, Copy)]
pub struct UtmpSource;

impl SessionSource for UtmpSource {
    fn snapshot(&self) -> Result<Vec<SessionRecord>> {
        utmp::read_sessions()
    }
}

/// A fixed list of records, for dry runs and tests
#[derive(Debug, Default, Clone)]
pub struct FixedSessions(pub Vec<SessionRecord>);

impl SessionSource for FixedSessions {
    fn snapshot(&self) -> Result<Vec<SessionRecord>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::SessionKind;

    #[test]
    fn fixed_sessions_are_returned_each_pass() {
        let source = FixedSessions(vec![
            SessionRecord::login("alice", "pts/3", 500),
            SessionRecord {
                user: String::new(),
                line: "~".to_string(),
                pgid: 0,
                kind: SessionKind::Other(2),
            },
        ]);
        assert_eq!(source.snapshot().unwrap().len(), 2);
        assert_eq!(source.snapshot().unwrap()[0].user, "alice");
    }
}
