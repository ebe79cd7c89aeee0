//! `subid:` directive lookup in the name service switch configuration.
//!
//! Only one backend is consulted for subordinate ids. Anything ambiguous
//! resolves to a [`Degradation`], which callers treat as "local files".

use serde::{Deserialize, Serialize};

/// System service-switch configuration
pub const NSSWITCH_PATH: &str = "/etc/nsswitch.conf";

/// Longest backend token accepted in a directive
pub const MAX_TOKEN_LEN: usize = 50;

const DIRECTIVE_KEY: &str = "subid:";
const MIN_LINE_LEN: usize = 8;
const SEPARATORS: [char; 3] = [' ', '\t', '\n'];

/// A usable `subid: <token>` directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsswitchDirective {
    token: String,
}

impl NsswitchDirective {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Shared object that implements this backend
    pub fn library_name(&self) -> String {
        format!("libsubid_{}.so", self.token)
    }
}

/// Why resolution ended without a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Degradation {
    /// Configuration file could not be read
    ConfigUnavailable(String),
    /// No `subid:` line with a value
    NoDirective,
    /// Value was empty once its trailing separator was removed
    EmptyToken,
    /// Backend explicitly set to local files
    FilesRequested,
    /// Token exceeds [`MAX_TOKEN_LEN`]
    TokenTooLong(String),
    /// Shared object could not be opened
    LoadFailed(String),
    /// Shared object lacks one of the required capabilities
    Incompatible(String),
}

impl Degradation {
    /// Degradations that are ordinary configurations rather than faults
    pub fn is_expected(&self) -> bool {
        matches!(self, Degradation::NoDirective | Degradation::FilesRequested)
    }
}

impl std::fmt::Display for Degradation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Degradation::ConfigUnavailable(e) => write!(f, "configuration unavailable: {}", e),
            Degradation::NoDirective => write!(f, "no subid directive"),
            Degradation::EmptyToken => write!(f, "No usable subid NSS module found"),
            Degradation::FilesRequested => write!(f, "subid backend set to files"),
            Degradation::TokenTooLong(token) => write!(
                f,
                "Subid NSS module name too long (longer than {} characters): {}",
                MAX_TOKEN_LEN, token
            ),
            Degradation::LoadFailed(e) => write!(f, "{}", e),
            Degradation::Incompatible(e) => write!(f, "{}", e),
        }
    }
}

/// Value of the first `subid:` line that has one, leading blanks removed.
/// Line lengths include the line terminator.
fn first_subid_value(text: &str) -> Option<&str> {
    for line in text.split_inclusive('\n') {
        if line.starts_with('#') || line.len() < MIN_LINE_LEN {
            continue;
        }
        let is_directive = line
            .get(..DIRECTIVE_KEY.len())
            .map_or(false, |key| key.eq_ignore_ascii_case(DIRECTIVE_KEY));
        if !is_directive {
            continue;
        }

        let value = line[DIRECTIVE_KEY.len()..].trim_start_matches(SEPARATORS);
        if !value.is_empty() {
            return Some(value);
        }
    }
    None
}

/// Select the subid backend named by a service-switch configuration.
pub fn parse_directive(text: &str) -> Result<NsswitchDirective, Degradation> {
    let value = first_subid_value(text).ok_or(Degradation::NoDirective)?;

    // An unterminated value is treated as unusable rather than guessed at.
    let Some((token, _)) = value.split_once(SEPARATORS) else {
        return Err(Degradation::EmptyToken);
    };
    let token = token.trim_end_matches('\r');
    if token.is_empty() {
        return Err(Degradation::EmptyToken);
    }
    if token == "files" {
        return Err(Degradation::FilesRequested);
    }
    if token.len() > MAX_TOKEN_LEN {
        return Err(Degradation::TokenTooLong(token.to_string()));
    }

    Ok(NsswitchDirective {
        token: token.to_string(),
    })
}
