//! Error taxonomy (spec §7). A closed set of codes, each tagged with the
//! triggering function and an optional signal number, wrapped in `anyhow`
//! via small free functions (`not_found`, `not_med`, `crc_mismatch`, ...)
//! rather than threading a custom error type through every `?`.

use std::fmt;

pub type Result<T> = anyhow::Result<T>;

/// One of the codes from spec §7. `Gen` is the catch-all the C library
/// falls back to when no more specific code applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MedErrorCode {
    Gen,
    Sig,
    Alloc,
    FileGeneric,
    FileNotFound,
    FileOpen,
    FileRead,
    FileWrite,
    FileLock,
    NotMed,
    Access,
    Crc,
    MetadataMissing,
    Record,
    Net,
    Compression,
    Process,
    Filter,
    Database,
    Parity,
}

impl fmt::Display for MedErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MedErrorCode::Gen => "GEN",
            MedErrorCode::Sig => "SIG",
            MedErrorCode::Alloc => "ALLOC",
            MedErrorCode::FileGeneric => "FGEN",
            MedErrorCode::FileNotFound => "FEXIST",
            MedErrorCode::FileOpen => "FOPEN",
            MedErrorCode::FileRead => "FREAD",
            MedErrorCode::FileWrite => "FWRITE",
            MedErrorCode::FileLock => "FLOCK",
            MedErrorCode::NotMed => "FMED",
            MedErrorCode::Access => "FACC",
            MedErrorCode::Crc => "CRYP",
            MedErrorCode::MetadataMissing => "MET",
            MedErrorCode::Record => "REC",
            MedErrorCode::Net => "NET",
            MedErrorCode::Compression => "CMP",
            MedErrorCode::Process => "PROC",
            MedErrorCode::Filter => "FILT",
            MedErrorCode::Database => "DB",
            MedErrorCode::Parity => "PRTY",
        };
        f.write_str(s)
    }
}

/// The error value itself. `function`/`line` are filled in by each helper
/// constructor below via `module_path!()`/`line!()`, mirroring the original
/// library's capture of `__func__`/`__LINE__` at the call site.
#[derive(Debug, thiserror::Error)]
#[error("[{code}] {message} (in {function}:{line})")]
pub struct MedError {
    pub code: MedErrorCode,
    pub function: &'static str,
    pub line: u32,
    pub message: String,
    pub signal: Option<i32>,
}

impl MedError {
    pub fn new(
        code: MedErrorCode,
        function: &'static str,
        line: u32,
        message: impl Into<String>,
    ) -> Self {
        MedError {
            code,
            function,
            line,
            message: message.into(),
            signal: None,
        }
    }
}

pub fn not_found(msg: impl Into<String>) -> MedError {
    MedError::new(MedErrorCode::FileNotFound, module_path!(), line!(), msg)
}

pub fn not_med(msg: impl Into<String>) -> MedError {
    MedError::new(MedErrorCode::NotMed, module_path!(), line!(), msg)
}

pub fn crc_mismatch(msg: impl Into<String>) -> MedError {
    MedError::new(MedErrorCode::Crc, module_path!(), line!(), msg)
}

pub fn access_denied(msg: impl Into<String>) -> MedError {
    MedError::new(MedErrorCode::Access, module_path!(), line!(), msg)
}

pub fn record_error(msg: impl Into<String>) -> MedError {
    MedError::new(MedErrorCode::Record, module_path!(), line!(), msg)
}

pub fn lock_timeout(msg: impl Into<String>) -> MedError {
    MedError::new(MedErrorCode::FileLock, module_path!(), line!(), msg)
}

pub fn compression_error(msg: impl Into<String>) -> MedError {
    MedError::new(MedErrorCode::Compression, module_path!(), line!(), msg)
}

pub fn generic(msg: impl Into<String>) -> MedError {
    MedError::new(MedErrorCode::Gen, module_path!(), line!(), msg)
}

/// Scoped error-handling policy, replacing the C library's `push/pop_behavior`
/// stack macros (spec §9) with an RAII guard: the previous behavior is
/// restored on drop regardless of how the scope is exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Exit/return on the first failure, recording the causal error.
    ReturnOnFail,
    /// Suppress even recording the causal error.
    IgnoreError,
    /// Retry the triggering call exactly once before propagating.
    RetryOnce,
    /// Don't write diagnostics to stderr/log.
    SuppressOutput,
}

thread_local! {
    static BEHAVIOR_STACK: std::cell::RefCell<Vec<Behavior>> = std::cell::RefCell::new(Vec::new());
}

/// RAII guard returned by [`push_behavior`]; restores the previous top of
/// stack when dropped.
pub struct BehaviorGuard;

impl Drop for BehaviorGuard {
    fn drop(&mut self) {
        BEHAVIOR_STACK.with(|s| {
            s.borrow_mut().pop();
        });
    }
}

pub fn push_behavior(behavior: Behavior) -> BehaviorGuard {
    BEHAVIOR_STACK.with(|s| s.borrow_mut().push(behavior));
    BehaviorGuard
}

pub fn current_behavior() -> Option<Behavior> {
    BEHAVIOR_STACK.with(|s| s.borrow().last().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behavior_guard_restores_previous() {
        assert_eq!(None, current_behavior());
        {
            let _g = push_behavior(Behavior::RetryOnce);
            assert_eq!(Some(Behavior::RetryOnce), current_behavior());
            {
                let _g2 = push_behavior(Behavior::IgnoreError);
                assert_eq!(Some(Behavior::IgnoreError), current_behavior());
            }
            assert_eq!(Some(Behavior::RetryOnce), current_behavior());
        }
        assert_eq!(None, current_behavior());
    }

    #[test]
    fn display_matches_taxonomy_codes() {
        assert_eq!("CRYP", MedErrorCode::Crc.to_string());
        assert_eq!("FACC", MedErrorCode::Access.to_string());
    }
}
