//! Concurrency & Resource Model (spec §4.7, §5): a process-globals object
//! per top-level thread, an inverse-semaphore file-lock registry, and a
//! worker dispatcher with per-job atomic status, all built on plain
//! `std::sync` primitives rather than an async runtime.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Error;

use crate::crypto::PasswordData;
use crate::error::{self, Behavior};

/// Per-thread process globals (spec §4.7): password data, misc process
/// flags, and a behavior/function stack. The behavior stack itself lives in
/// [`crate::error`] as a `thread_local`; this struct holds the rest.
#[derive(Debug, Default)]
pub struct ProcessGlobals {
    pub password_data: PasswordData,
    pub default_behavior: Option<Behavior>,
}

thread_local! {
    static GLOBALS: std::cell::RefCell<ProcessGlobals> = std::cell::RefCell::new(ProcessGlobals::default());
}

pub fn with_globals<R>(f: impl FnOnce(&ProcessGlobals) -> R) -> R {
    GLOBALS.with(|g| f(&g.borrow()))
}

pub fn with_globals_mut<R>(f: impl FnOnce(&mut ProcessGlobals) -> R) -> R {
    GLOBALS.with(|g| f(&mut g.borrow_mut()))
}

/// An inverse semaphore (spec §5 "Suspension points"): readers increment on
/// entry/decrement on exit; a writer waits for the count to reach zero
/// under the owning mutex and holds it "owned" for the duration of the
/// write, blocking further readers.
pub struct InverseSemaphore {
    count: AtomicUsize,
    writer_lock: Mutex<bool>,
    cond: Condvar,
}

impl Default for InverseSemaphore {
    fn default() -> Self {
        InverseSemaphore {
            count: AtomicUsize::new(0),
            writer_lock: Mutex::new(false),
            cond: Condvar::new(),
        }
    }
}

pub struct ReadGuard<'a> {
    sem: &'a InverseSemaphore,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        if self.sem.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.sem.cond.notify_all();
        }
    }
}

pub struct WriteGuard<'a> {
    sem: &'a InverseSemaphore,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let mut owned = self.sem.writer_lock.lock().unwrap();
        *owned = false;
        self.sem.cond.notify_all();
    }
}

impl InverseSemaphore {
    pub fn new() -> Self {
        InverseSemaphore::default()
    }

    /// Acquires a read lock, blocking only while a writer owns the
    /// semaphore.
    pub fn read(&self) -> ReadGuard<'_> {
        let mut owned = self.writer_lock.lock().unwrap();
        while *owned {
            owned = self.cond.wait(owned).unwrap();
        }
        drop(owned);
        self.count.fetch_add(1, Ordering::SeqCst);
        ReadGuard { sem: self }
    }

    /// Acquires the write lock, waiting for both the writer flag and every
    /// outstanding reader to clear, honoring a timeout per spec §5 (default
    /// 1 ms per retry); returns `None` ("LOCKED") on timeout.
    pub fn write(&self, timeout: Duration) -> Option<WriteGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let mut owned = self.writer_lock.lock().unwrap();
        loop {
            if !*owned && self.count.load(Ordering::SeqCst) == 0 {
                *owned = true;
                return Some(WriteGuard { sem: self });
            }
            if Instant::now() >= deadline {
                return None;
            }
            let (guard, _timeout_result) = self
                .cond
                .wait_timeout(owned, Duration::from_millis(1))
                .unwrap();
            owned = guard;
        }
    }
}

/// Registry mapping a component file's path to its [`InverseSemaphore`],
/// shared across every FPS opened on that path within the process (spec
/// §5: "Writes to a single file are serialized by the lock registry").
#[derive(Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<PathBuf, std::sync::Arc<InverseSemaphore>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        LockRegistry::default()
    }

    pub fn semaphore_for(&self, path: &std::path::Path) -> std::sync::Arc<InverseSemaphore> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| std::sync::Arc::new(InverseSemaphore::new()))
            .clone()
    }
}

/// Per-job status (spec §5: "progress signaled via an atomic `status`
/// field per job").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum JobStatus {
    Waiting = 0,
    Running = 1,
    Succeeded = 2,
    Failed = 3,
    Skipped = 4,
}

impl JobStatus {
    fn from_u32(v: u32) -> Self {
        match v {
            1 => JobStatus::Running,
            2 => JobStatus::Succeeded,
            3 => JobStatus::Failed,
            4 => JobStatus::Skipped,
            _ => JobStatus::Waiting,
        }
    }
}

pub struct JobInfo {
    status: AtomicU32,
}

impl Default for JobInfo {
    fn default() -> Self {
        JobInfo {
            status: AtomicU32::new(JobStatus::Waiting as u32),
        }
    }
}

impl JobInfo {
    pub fn status(&self) -> JobStatus {
        JobStatus::from_u32(self.status.load(Ordering::SeqCst))
    }

    fn set(&self, status: JobStatus) {
        self.status.store(status as u32, Ordering::SeqCst);
    }
}

/// `wait_jobs` (spec §5): dispatches `jobs.len()` worker threads, each
/// running its closure and updating its [`JobInfo`], then joins all of
/// them before returning. A job whose precondition is unmet should set
/// itself `Skipped` rather than running; this dispatcher does not inspect
/// preconditions itself, leaving that to the closures.
pub fn wait_jobs<F>(jobs: Vec<F>) -> Vec<std::sync::Arc<JobInfo>>
where
    F: FnOnce(&JobInfo) -> Result<(), Error> + Send + 'static,
{
    let infos: Vec<_> = jobs.iter().map(|_| std::sync::Arc::new(JobInfo::default())).collect();
    let mut handles = Vec::with_capacity(jobs.len());

    for (job, info) in jobs.into_iter().zip(infos.iter().cloned()) {
        handles.push(thread::spawn(move || {
            info.set(JobStatus::Running);
            match job(&info) {
                Ok(()) => info.set(JobStatus::Succeeded),
                Err(_) => info.set(JobStatus::Failed),
            }
        }));
    }

    for h in handles {
        let _ = h.join();
    }

    infos
}

/// Retries `f` under the behavior-stack policy active on the calling
/// thread (spec §5: "Timeouts surface as FLOCK errors with retry policy
/// controlled by the behavior stack").
pub fn with_lock_retry<T>(mut f: impl FnMut() -> Result<T, Error>) -> Result<T, Error> {
    match error::current_behavior() {
        Some(Behavior::RetryOnce) => match f() {
            Ok(v) => Ok(v),
            Err(_) => f(),
        },
        Some(Behavior::IgnoreError) => f().or_else(|_| {
            Err(error::lock_timeout("ignored lock failure has no fallback value").into())
        }),
        _ => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn readers_do_not_block_each_other() {
        let sem = Arc::new(InverseSemaphore::new());
        let _g1 = sem.read();
        let _g2 = sem.read();
        assert_eq!(2, sem.count.load(Ordering::SeqCst));
    }

    #[test]
    fn writer_waits_for_readers_to_clear() {
        let sem = InverseSemaphore::new();
        {
            let _r = sem.read();
            assert!(sem.write(Duration::from_millis(5)).is_none());
        }
        assert!(sem.write(Duration::from_millis(50)).is_some());
    }

    #[test]
    fn wait_jobs_collects_all_statuses() {
        let jobs: Vec<Box<dyn FnOnce(&JobInfo) -> Result<(), Error> + Send>> = vec![
            Box::new(|_info: &JobInfo| Ok(())),
            Box::new(|_info: &JobInfo| Err(error::generic("boom").into())),
        ];
        let infos = wait_jobs(jobs);
        assert_eq!(JobStatus::Succeeded, infos[0].status());
        assert_eq!(JobStatus::Failed, infos[1].status());
    }

    #[test]
    fn lock_registry_shares_semaphore_per_path() {
        let registry = LockRegistry::new();
        let path = std::path::Path::new("/tmp/med_test.tdat");
        let a = registry.semaphore_for(path);
        let b = registry.semaphore_for(path);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
