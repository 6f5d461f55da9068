//! Ambient configuration (spec §4.7, §9): the knobs the original library
//! exposes as process-global defaults (checksum strictness, default access
//! level, lock-retry timeout, CPS cache, thread affinity) collected into a
//! single struct a caller builds once and threads through session opens,
//! the same role a top-level options struct plays for a filesystem mount.

use std::time::Duration;

/// When to verify a CRC against its stored value (spec §3.3 testable
/// properties 1-7 are all "CRC matches"; this controls whether the crate
/// bothers checking on every read or only when asked).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumMode {
    /// Verify every header/block/record CRC on read; mismatches are `CRYP`
    /// errors (spec default).
    Verify,
    /// Skip verification entirely; useful for recovery tooling reading a
    /// partially corrupt file.
    Skip,
}

impl Default for ChecksumMode {
    fn default() -> Self {
        ChecksumMode::Verify
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    pub checksum_mode: ChecksumMode,
    /// Default password tried at open time when the caller supplies none.
    pub default_password: Option<String>,
    /// File-lock retry interval (spec §5 default: 1 ms).
    pub lock_retry_interval: Duration,
    /// Overall budget before a lock acquisition gives up as `FLOCK`.
    pub lock_timeout: Duration,
    pub cps_cache_enabled: bool,
    /// `CPS_DF_FALL_THROUGH_TO_BEST_ENCODING` (spec §4.4 edge cases).
    pub cps_fall_through_to_best_encoding: bool,
    /// Worker-pool core affinity string, opaque beyond being logged; an
    /// empty string means "no affinity, let the OS schedule".
    pub thread_affinity: String,
    pub expanded_passwords: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            checksum_mode: ChecksumMode::Verify,
            default_password: None,
            lock_retry_interval: Duration::from_millis(1),
            lock_timeout: Duration::from_millis(100),
            cps_cache_enabled: true,
            cps_fall_through_to_best_encoding: true,
            thread_affinity: String::new(),
            expanded_passwords: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let opts = Options::default();
        assert_eq!(ChecksumMode::Verify, opts.checksum_mode);
        assert!(opts.cps_fall_through_to_best_encoding);
        assert_eq!(Duration::from_millis(1), opts.lock_retry_interval);
    }
}
