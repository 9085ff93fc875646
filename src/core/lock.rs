//! Purpose: Cross-process mutual exclusion over stable, file-backed markers.
//! Exports: `FileLockService`, `LockHandle`, `RetryPolicy`, `LOCK_MARKER_SUFFIX`.
//! Invariants: Marker paths are deterministic and the suffix never changes;
//! independent processes agree on them across versions.
//! Invariants: A handle releases only the OS advisory lock; marker files are
//! never deleted.
//! Invariants: Same-process conflict between two handles on one marker is
//! platform advisory-lock semantics; only cross-process exclusion is promised.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use libc::{EACCES, EPERM};

use crate::core::error::{Error, ErrorKind};

/// Suffix of every lock marker file. Persisted external state; other
/// processes key off it, so it must stay stable across versions.
pub const LOCK_MARKER_SUFFIX: &str = ".plinthlock";

/// Maps lock targets to canonical marker paths and hands out handles.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileLockService;

impl FileLockService {
    pub fn new() -> Self {
        Self
    }

    /// Directory target maps to `<dir>/.plinthlock`, file target to
    /// `<parent>/<name>.plinthlock`. Creates the marker's parent directory
    /// if needed; no other I/O happens here.
    pub fn get_locker(&self, target: &Path) -> Result<LockHandle, Error> {
        let marker = if target.is_dir() {
            target.join(LOCK_MARKER_SUFFIX)
        } else {
            let name = target.file_name().ok_or_else(|| {
                Error::new(ErrorKind::Config)
                    .with_message("lock target has no file name")
                    .with_path(target)
            })?;
            let mut file_name = name.to_os_string();
            file_name.push(LOCK_MARKER_SUFFIX);
            target
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(file_name)
        };

        if marker.is_dir() {
            return Err(Error::new(ErrorKind::Config)
                .with_message("lock marker path already exists and is a directory")
                .with_path(&marker));
        }

        let parent = marker.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        if !parent.is_dir() {
            std::fs::create_dir_all(&parent).map_err(|err| {
                Error::new(ErrorKind::Config)
                    .with_message("could not create parent directory of lock marker")
                    .with_path(&parent)
                    .with_source(err)
            })?;
        }
        let canonical_parent = parent.canonicalize().map_err(|err| {
            Error::new(ErrorKind::Config)
                .with_message("could not canonicalize lock marker parent")
                .with_path(&parent)
                .with_source(err)
        })?;
        let file_name = marker
            .file_name()
            .expect("marker path always ends in the suffix")
            .to_os_string();

        Ok(LockHandle {
            marker: canonical_parent.join(file_name),
            file: None,
            locked: false,
        })
    }
}

/// Polling acquisition policy: fixed interval, attempt count derived from
/// the timeout, last-error-wins aggregation. Kept separate from the handle
/// so the poll loop is testable with a fake sleeper.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    interval: Duration,
}

impl RetryPolicy {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// `ceil(timeout / interval) + 1`: one immediate attempt plus one per
    /// elapsed interval.
    pub fn attempts_for(&self, timeout_ms: u64) -> u64 {
        let interval_ms = self.interval.as_millis().max(1) as u64;
        timeout_ms.div_ceil(interval_ms) + 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

/// One named, file-backed mutual-exclusion resource.
#[derive(Debug)]
pub struct LockHandle {
    marker: PathBuf,
    file: Option<File>,
    locked: bool,
}

impl LockHandle {
    pub fn marker_path(&self) -> &Path {
        &self.marker
    }

    /// Blocking acquisition: creates the marker if absent and blocks until
    /// the OS advisory exclusive lock is obtained. No timeout.
    pub fn lock(&mut self) -> Result<(), Error> {
        let file = self.open_marker()?;
        file.lock_exclusive().map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_message("could not acquire exclusive lock")
                .with_path(&self.marker)
                .with_source(err)
        })?;
        self.locked = true;
        Ok(())
    }

    /// Polling acquisition with the default 50 ms interval. A negative
    /// timeout is a precondition violation and fails before any I/O.
    pub fn lock_timeout(&mut self, timeout_ms: i64) -> Result<(), Error> {
        if timeout_ms < 0 {
            return Err(Error::new(ErrorKind::Config)
                .with_message("lock timeout must not be negative"));
        }
        self.lock_with_policy(timeout_ms as u64, &RetryPolicy::default(), &mut |interval| {
            std::thread::sleep(interval)
        })
    }

    /// Poll loop behind `lock_timeout`. Per-attempt I/O errors are
    /// remembered, not raised; only the last one rides along on the final
    /// timeout error. Contention (would-block) is not an error, just a
    /// failed attempt.
    pub fn lock_with_policy(
        &mut self,
        timeout_ms: u64,
        policy: &RetryPolicy,
        sleep: &mut dyn FnMut(Duration),
    ) -> Result<(), Error> {
        self.open_marker()?;
        let attempts = policy.attempts_for(timeout_ms);
        let mut last_error: Option<io::Error> = None;

        for attempt in 0..attempts {
            last_error = None;
            let file = self.file.as_ref().expect("marker opened above");
            match file.try_lock_exclusive() {
                Ok(()) => {
                    self.locked = true;
                    return Ok(());
                }
                Err(err) if is_contended(&err) => {}
                Err(err) => last_error = Some(err),
            }
            if attempt + 1 < attempts {
                sleep(policy.interval());
            }
        }

        let mut err = Error::new(ErrorKind::LockTimeout)
            .with_message(format!(
                "could not acquire lock within {timeout_ms} ms"
            ))
            .with_path(&self.marker);
        if let Some(io_err) = last_error {
            err = err.with_source(io_err);
        }
        Err(err)
    }

    /// Releases the advisory lock and closes the descriptor. On failure the
    /// handle is left in an undefined state and must not be reused.
    pub fn release(&mut self) -> Result<(), Error> {
        self.locked = false;
        let file = self.file.take().ok_or_else(|| {
            Error::new(ErrorKind::Internal)
                .with_message("release without an open lock file")
                .with_path(&self.marker)
        })?;
        file.unlock().map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("could not release lock")
                .with_path(&self.marker)
                .with_source(err)
        })
    }

    /// Whether this handle believes it holds the lock. The flag is
    /// handle-local: set on successful acquisition, cleared by `release`. It
    /// cannot observe the descriptor being invalidated from outside the
    /// handle, since the OS exposes no lock-validity query.
    pub fn is_locked(&self) -> bool {
        self.locked && self.file.is_some()
    }

    fn open_marker(&mut self) -> Result<&File, Error> {
        if self.file.is_none() {
            if let Some(parent) = self.marker.parent() {
                if !parent.is_dir() {
                    std::fs::create_dir_all(parent).map_err(|err| {
                        Error::new(ErrorKind::Io).with_path(parent).with_source(err)
                    })?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(&self.marker)
                .map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("could not open lock marker")
                        .with_path(&self.marker)
                        .with_source(err)
                })?;
            self.file = Some(file);
        }
        Ok(self.file.as_ref().expect("just opened"))
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        || err.raw_os_error() == Some(libc::EAGAIN)
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::{FileLockService, RetryPolicy, LOCK_MARKER_SUFFIX};
    use crate::core::error::ErrorKind;
    use std::time::Duration;

    #[test]
    fn directory_target_maps_to_dotted_marker() {
        let dir = tempfile::tempdir().expect("tempdir");
        let handle = FileLockService::new().get_locker(dir.path()).expect("locker");
        assert_eq!(
            handle.marker_path().file_name().unwrap().to_str().unwrap(),
            LOCK_MARKER_SUFFIX
        );
        assert!(handle.marker_path().starts_with(dir.path().canonicalize().unwrap()));
    }

    #[test]
    fn file_target_maps_to_suffixed_sibling() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("file.txt");
        std::fs::write(&target, b"x").expect("write");
        let handle = FileLockService::new().get_locker(&target).expect("locker");
        assert_eq!(
            handle.marker_path().file_name().unwrap().to_str().unwrap(),
            "file.txt.plinthlock"
        );
    }

    #[test]
    fn missing_target_still_maps() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("ghost.bin");
        let handle = FileLockService::new().get_locker(&target).expect("locker");
        assert!(handle
            .marker_path()
            .to_str()
            .unwrap()
            .ends_with("ghost.bin.plinthlock"));
    }

    #[test]
    fn marker_as_directory_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join(LOCK_MARKER_SUFFIX)).expect("mkdir");
        let err = FileLockService::new().get_locker(dir.path()).expect_err("reject");
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn parent_directory_is_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("deep").join("nested").join("repo.bin");
        let handle = FileLockService::new().get_locker(&target).expect("locker");
        assert!(handle.marker_path().parent().unwrap().is_dir());
    }

    #[test]
    fn negative_timeout_fails_without_io() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("repo.bin");
        let mut handle = FileLockService::new().get_locker(&target).expect("locker");
        let err = handle.lock_timeout(-1).expect_err("precondition");
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(!handle.marker_path().exists());
    }

    #[test]
    fn lock_release_lifecycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut handle = FileLockService::new().get_locker(dir.path()).expect("locker");
        assert!(!handle.is_locked());
        handle.lock().expect("lock");
        assert!(handle.is_locked());
        handle.release().expect("release");
        assert!(!handle.is_locked());
        // The marker survives release; only the advisory lock goes away.
        assert!(handle.marker_path().exists());
    }

    #[test]
    fn timeout_lock_succeeds_uncontended() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut handle = FileLockService::new().get_locker(dir.path()).expect("locker");
        handle.lock_timeout(0).expect("uncontended");
        assert!(handle.is_locked());
        handle.release().expect("release");
    }

    #[test]
    fn attempt_count_follows_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts_for(0), 1);
        assert_eq!(policy.attempts_for(50), 2);
        assert_eq!(policy.attempts_for(60), 3);
        assert_eq!(policy.attempts_for(200), 5);

        let fine = RetryPolicy::new(Duration::from_millis(10));
        assert_eq!(fine.attempts_for(25), 4);
    }

    // flock descriptors from separate opens conflict within one process on
    // Linux, which lets the poll loop run against a real holder without a
    // second process.
    #[cfg(target_os = "linux")]
    #[test]
    fn contended_poll_exhausts_attempts_with_fake_clock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = FileLockService::new();
        let mut holder = service.get_locker(dir.path()).expect("holder");
        holder.lock().expect("hold");

        let mut waiter = service.get_locker(dir.path()).expect("waiter");
        let policy = RetryPolicy::default();
        let mut sleeps = Vec::new();
        let err = waiter
            .lock_with_policy(200, &policy, &mut |interval| sleeps.push(interval))
            .expect_err("contended");
        assert_eq!(err.kind(), ErrorKind::LockTimeout);
        // ceil(200/50) + 1 = 5 attempts, sleeping between attempts only.
        assert_eq!(sleeps.len(), 4);
        assert!(sleeps.iter().all(|d| *d == Duration::from_millis(50)));
        assert!(!waiter.is_locked());

        holder.release().expect("release");
    }
}
