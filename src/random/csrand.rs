//! Cryptographically sourced machine words.

use crate::config::types::{LoginkitError, Result};
use crate::kernel::entropy::EntropySource;
use log::{debug, error};

/// Draw one word from the first source in `sources` that works
pub fn try_csrand_from(sources: &[EntropySource]) -> Result<u64> {
    let mut buf = [0u8; std::mem::size_of::<u64>()];
    for source in sources {
        match source.fill(&mut buf) {
            Ok(()) => return Ok(u64::from_ne_bytes(buf)),
            Err(e) => debug!("entropy source {} unavailable: {}", source.name(), e),
        }
    }
    Err(LoginkitError::EntropyUnavailable)
}

/// Uniform random word, or `EntropyUnavailable` when every source failed
pub fn try_csrand() -> Result<u64> {
    try_csrand_from(&EntropySource::CHAIN)
}

/// Uniform random word. Terminates the process when no entropy source is
/// usable: there is no acceptable substitute for missing randomness.
pub fn csrand() -> u64 {
    match try_csrand() {
        Ok(word) => word,
        Err(e) => {
            error!("{}", e);
            eprintln!("Unable to obtain random bytes.");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_chain_is_unavailable() {
        assert!(matches!(try_csrand_from(&[]), Err(LoginkitError::EntropyUnavailable)));
    }

    #[test]
    fn words_vary() {
        let words: std::collections::HashSet<u64> = (0..64).map(|_| csrand()).collect();
        assert!(words.len() > 60);
    }

    #[test]
    fn device_only_chain_still_works() {
        assert!(try_csrand_from(&[EntropySource::DevUrandom]).is_ok());
    }
}
