//! Login time/port policy.
//!
//! [`PolicyOracle`] is the decision seam the daemon consults. The stock
//! implementation reads a porttime table:
//!
//! ```text
//! # ttys:users:times
//! tty1,tty2:*:Wk0800-1800
//! pts/*:guest:Wk0900-1700
//! *:guest:Al2200-0600
//! ```
//!
//! The first entry matching both the line and the user decides; no match
//! means the login is allowed.

use crate::config::types::{EnforcementDecision, LoginkitError, Result};
use chrono::{DateTime, Datelike, Local, Timelike, Weekday};
use log::warn;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// Decides whether a user may stay logged in on a line at a given time
pub trait PolicyOracle: Send + Sync {
    fn decide(&self, user: &str, line: &str, at: DateTime<Local>) -> EnforcementDecision;
}

impl<F> PolicyOracle for F
where
    F: Fn(&str, &str, DateTime<Local>) -> bool + Send + Sync,
{
    fn decide(&self, user: &str, line: &str, at: DateTime<Local>) -> EnforcementDecision {
        self(user, line, at).into()
    }
}

const ALL_DAYS: u8 = 0b111_1111;
const WEEK_DAYS: u8 = 0b011_1110;

fn day_bit(day: Weekday) -> u8 {
    1 << day.num_days_from_sunday()
}

/// One `DAYSHHMM-HHMM` window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    days: u8,
    start: u16,
    end: u16,
}

impl TimeWindow {
    pub fn parse(text: &str) -> Result<Self> {
        let malformed = || LoginkitError::Policy(format!("bad time window '{}'", text));

        let digits_at = text.find(|c: char| c.is_ascii_digit()).ok_or_else(malformed)?;
        let (day_codes, range) = text.split_at(digits_at);

        let mut days = 0u8;
        let codes = day_codes.as_bytes();
        if codes.len() % 2 != 0 {
            return Err(malformed());
        }
        for code in codes.chunks(2) {
            days |= match code {
                b"Su" => day_bit(Weekday::Sun),
                b"Mo" => day_bit(Weekday::Mon),
                b"Tu" => day_bit(Weekday::Tue),
                b"We" => day_bit(Weekday::Wed),
                b"Th" => day_bit(Weekday::Thu),
                b"Fr" => day_bit(Weekday::Fri),
                b"Sa" => day_bit(Weekday::Sat),
                b"Wk" => WEEK_DAYS,
                b"Al" => ALL_DAYS,
                _ => return Err(malformed()),
            };
        }
        if days == 0 {
            days = ALL_DAYS;
        }

        let (start, end) = range.split_once('-').ok_or_else(malformed)?;
        Ok(Self {
            days,
            start: parse_hhmm(start).ok_or_else(malformed)?,
            end: parse_hhmm(end).ok_or_else(malformed)?,
        })
    }

    /// Windows whose end precedes their start run past midnight.
    pub fn contains(&self, day: Weekday, minute_of_day: u16) -> bool {
        if self.days & day_bit(day) == 0 {
            return false;
        }
        if self.start <= self.end {
            (self.start..=self.end).contains(&minute_of_day)
        } else {
            minute_of_day >= self.start || minute_of_day <= self.end
        }
    }
}

fn parse_hhmm(text: &str) -> Option<u16> {
    if text.len() != 4 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: u16 = text[..2].parse().ok()?;
    let minutes: u16 = text[2..].parse().ok()?;
    (hours < 24 && minutes < 60).then_some(hours * 60 + minutes)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortTimeEntry {
    ttys: Vec<String>,
    users: Vec<String>,
    windows: Vec<TimeWindow>,
}

fn list_matches(list: &[String], value: &str) -> bool {
    list.iter().any(|item| item == "*" || item == value)
}

/// Tty patterns may end in `*` to match every line with that prefix
fn tty_matches(list: &[String], line: &str) -> bool {
    list.iter().any(|pattern| match pattern.strip_suffix('*') {
        Some(prefix) => line.starts_with(prefix),
        None => pattern == line,
    })
}

impl PortTimeEntry {
    pub fn parse(line: &str) -> Result<Self> {
        let mut fields = line.splitn(3, ':');
        let (Some(ttys), Some(users), Some(times)) = (fields.next(), fields.next(), fields.next()) else {
            return Err(LoginkitError::Policy(format!("expected ttys:users:times in '{}'", line)));
        };

        let split = |field: &str| -> Vec<String> {
            field
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        };

        let windows = split(times)
            .iter()
            .map(|text| TimeWindow::parse(text))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            ttys: split(ttys),
            users: split(users),
            windows,
        })
    }

    pub fn applies_to(&self, user: &str, line: &str) -> bool {
        tty_matches(&self.ttys, line) && list_matches(&self.users, user)
    }

    pub fn permits(&self, at: &DateTime<Local>) -> bool {
        let minute = (at.hour() * 60 + at.minute()) as u16;
        self.windows.iter().any(|w| w.contains(at.weekday(), minute))
    }
}

/// Parsed porttime table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortTimeTable {
    entries: Vec<PortTimeEntry>,
}

impl PortTimeTable {
    /// Parse a table, skipping (and reporting) malformed lines
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .enumerate()
            .filter(|(_, line)| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with('#')
            })
            .filter_map(|(number, line)| match PortTimeEntry::parse(line.trim()) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("porttime line {}: {}", number + 1, e);
                    None
                }
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_allowed(&self, user: &str, line: &str, at: &DateTime<Local>) -> bool {
        match self.entries.iter().find(|entry| entry.applies_to(user, line)) {
            Some(entry) => entry.permits(at),
            None => true,
        }
    }
}

/// Porttime file, re-read whenever its modification time changes
pub struct PortTimePolicy {
    path: PathBuf,
    cache: Mutex<(Option<SystemTime>, Arc<PortTimeTable>)>,
}

impl PortTimePolicy {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new((None, Arc::new(PortTimeTable::default()))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current table; an unreadable file yields an empty (allow-all) table
    pub fn table(&self) -> Arc<PortTimeTable> {
        let modified = std::fs::metadata(&self.path).and_then(|m| m.modified()).ok();

        let mut cache = match self.cache.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        if modified.is_some() && cache.0 == modified {
            return cache.1.clone();
        }

        let table = match std::fs::read_to_string(&self.path) {
            Ok(text) => PortTimeTable::parse(&text),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("cannot read {}: {}", self.path.display(), e);
                }
                PortTimeTable::default()
            }
        };
        *cache = (modified, Arc::new(table));
        cache.1.clone()
    }
}

impl PolicyOracle for PortTimePolicy {
    fn decide(&self, user: &str, line: &str, at: DateTime<Local>) -> EnforcementDecision {
        self.table().is_allowed(user, line, &at).into()
    }
}
