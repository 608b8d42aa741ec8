//! Process-shared counting semaphore
//!
//! Thin wrapper over a POSIX named semaphore (`sem_open`). The typical use is
//! turn-taking around a shared-memory channel: the writer posts after a send,
//! the reader waits before a receive.

use std::ffi::CString;
use std::io;
use std::ptr::NonNull;
#[cfg(target_os = "linux")]
use std::time::Duration;

use super::unique_name;
use crate::error::{IpcError, IpcResult};

/// A counting semaphore shared between processes
///
/// Every instance gets its own backing name
/// (`/ipcx-sem-<pid>-<counter>-<random>`). The process that created it closes
/// and unlinks it on drop; forked copies and [`Semaphore::open`] handles only
/// close their reference.
#[derive(Debug)]
pub struct Semaphore {
    sem: NonNull<libc::sem_t>,
    name: String,
    creator_pid: Option<u32>,
}

// SAFETY: sem_wait/sem_post are thread-safe on a valid semaphore, and the
// handle stays valid until `Drop` closes it.
unsafe impl Send for Semaphore {}
// SAFETY: see above.
unsafe impl Sync for Semaphore {}

fn c_name(name: &str) -> IpcResult<CString> {
    CString::new(name).map_err(|_| IpcError::invalid(format!("name contains NUL: {name:?}")))
}

impl Semaphore {
    /// Create a semaphore with count `initial`
    ///
    /// # Errors
    ///
    /// `ResourceUnavailable` if `sem_open` fails (e.g. `initial` exceeds
    /// `SEM_VALUE_MAX`).
    pub fn create(initial: u32) -> IpcResult<Self> {
        let name = unique_name("sem");
        let cname = c_name(&name)?;

        // SAFETY: valid C string; mode and value are passed as the promoted
        // `unsigned int` the variadic signature expects.
        let sem = unsafe {
            libc::sem_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o600 as libc::c_uint,
                initial as libc::c_uint,
            )
        };
        let sem = Self::check_open(sem, &name)?;

        tracing::debug!(name = %name, initial, "Created semaphore");
        Ok(Self {
            sem,
            name,
            creator_pid: Some(std::process::id()),
        })
    }

    /// Attach to a semaphore created by another process
    ///
    /// # Errors
    ///
    /// `ResourceUnavailable` if no semaphore with that name exists.
    pub fn open(name: &str) -> IpcResult<Self> {
        let cname = c_name(name)?;
        // SAFETY: valid C string, no creation flags so no variadic arguments.
        let sem = unsafe { libc::sem_open(cname.as_ptr(), 0) };
        let sem = Self::check_open(sem, name)?;
        Ok(Self {
            sem,
            name: name.to_string(),
            creator_pid: None,
        })
    }

    fn check_open(sem: *mut libc::sem_t, name: &str) -> IpcResult<NonNull<libc::sem_t>> {
        if sem == libc::SEM_FAILED {
            return Err(IpcError::unavailable(
                format!("sem_open {name}"),
                io::Error::last_os_error(),
            ));
        }
        NonNull::new(sem).ok_or_else(|| {
            IpcError::unavailable(format!("sem_open {name}"), io::Error::last_os_error())
        })
    }

    /// Backing name other processes can pass to [`Semaphore::open`]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the count is positive, then decrement it
    ///
    /// # Errors
    ///
    /// `IoFailure` on failure, including `EINTR` when a signal interrupts
    /// the wait.
    pub fn wait(&self) -> IpcResult<()> {
        // SAFETY: `sem` is a live handle from sem_open.
        if unsafe { libc::sem_wait(self.sem.as_ptr()) } == 0 {
            Ok(())
        } else {
            Err(IpcError::last_os_error())
        }
    }

    /// Decrement the count if it is positive, without blocking
    ///
    /// Returns `false` when the count was zero.
    ///
    /// # Errors
    ///
    /// `IoFailure` for anything other than `EAGAIN`.
    pub fn try_wait(&self) -> IpcResult<bool> {
        // SAFETY: `sem` is a live handle from sem_open.
        if unsafe { libc::sem_trywait(self.sem.as_ptr()) } == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EAGAIN) {
            Ok(false)
        } else {
            Err(err.into())
        }
    }

    /// Wait at most `timeout` for the count to become positive
    ///
    /// Returns `false` if the deadline passed first. The deadline is measured
    /// against `CLOCK_REALTIME`, as `sem_timedwait` requires.
    ///
    /// # Errors
    ///
    /// `IoFailure` for anything other than `ETIMEDOUT`.
    #[cfg(target_os = "linux")]
    pub fn wait_timeout(&self, timeout: Duration) -> IpcResult<bool> {
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `now` is a valid out-pointer.
        if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
            return Err(IpcError::last_os_error());
        }

        let deadline = deadline_after(now, timeout);

        // SAFETY: `sem` is live and `deadline` is a normalized timespec.
        if unsafe { libc::sem_timedwait(self.sem.as_ptr(), &deadline) } == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ETIMEDOUT) {
            Ok(false)
        } else {
            Err(err.into())
        }
    }

    /// Increment the count, waking one waiter
    ///
    /// # Errors
    ///
    /// `IoFailure` if the count would overflow (`EOVERFLOW`).
    pub fn post(&self) -> IpcResult<()> {
        // SAFETY: `sem` is a live handle from sem_open.
        if unsafe { libc::sem_post(self.sem.as_ptr()) } == 0 {
            Ok(())
        } else {
            Err(IpcError::last_os_error())
        }
    }

    /// Current count
    ///
    /// # Errors
    ///
    /// `IoFailure` if `sem_getvalue` fails.
    #[cfg(target_os = "linux")]
    pub fn value(&self) -> IpcResult<i32> {
        let mut value: libc::c_int = 0;
        // SAFETY: `sem` is live and `value` is a valid out-pointer.
        if unsafe { libc::sem_getvalue(self.sem.as_ptr(), &mut value) } == 0 {
            Ok(value)
        } else {
            Err(IpcError::last_os_error())
        }
    }
}

/// Absolute `CLOCK_REALTIME` deadline `timeout` after `now`
///
/// Saturates at `time_t::MAX` seconds, so an oversized timeout waits
/// indefinitely instead of wrapping into the past.
#[cfg(target_os = "linux")]
fn deadline_after(now: libc::timespec, timeout: Duration) -> libc::timespec {
    const NANOS_PER_SEC: libc::c_long = 1_000_000_000;

    let secs = libc::time_t::try_from(timeout.as_secs()).unwrap_or(libc::time_t::MAX);
    let subsec = libc::c_long::try_from(timeout.subsec_nanos()).unwrap_or(NANOS_PER_SEC - 1);
    // Both terms are below one second, so the sum fits a c_long.
    let mut nanos = now.tv_nsec + subsec;
    let mut carry: libc::time_t = 0;
    if nanos >= NANOS_PER_SEC {
        nanos -= NANOS_PER_SEC;
        carry = 1;
    }

    let tv_sec = now.tv_sec.saturating_add(secs).saturating_add(carry);
    if tv_sec == libc::time_t::MAX {
        return libc::timespec {
            tv_sec,
            tv_nsec: NANOS_PER_SEC - 1,
        };
    }
    libc::timespec {
        tv_sec,
        tv_nsec: nanos,
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        // SAFETY: `sem` came from sem_open and is closed exactly once, here.
        if unsafe { libc::sem_close(self.sem.as_ptr()) } != 0 {
            tracing::warn!(
                name = %self.name,
                error = %io::Error::last_os_error(),
                "sem_close failed"
            );
        }
        if self.creator_pid != Some(std::process::id()) {
            return;
        }
        let Ok(cname) = CString::new(self.name.as_str()) else {
            return;
        };
        // SAFETY: valid C string.
        if unsafe { libc::sem_unlink(cname.as_ptr()) } != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                tracing::warn!(name = %self.name, error = %err, "sem_unlink failed");
            }
        } else {
            tracing::debug!(name = %self.name, "Unlinked semaphore");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_posts_then_waits_never_block() {
        let sem = Semaphore::create(0).unwrap();
        for _ in 0..5 {
            sem.post().unwrap();
        }
        for _ in 0..5 {
            assert!(sem.try_wait().unwrap());
        }
        assert!(!sem.try_wait().unwrap());
    }

    #[test]
    fn test_initial_value() {
        let sem = Semaphore::create(2).unwrap();
        sem.wait().unwrap();
        sem.wait().unwrap();
        assert!(!sem.try_wait().unwrap());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_wait_timeout_expires_at_zero() {
        let sem = Semaphore::create(0).unwrap();
        assert_eq!(sem.value().unwrap(), 0);
        assert!(!sem.wait_timeout(Duration::from_millis(50)).unwrap());
        sem.post().unwrap();
        assert!(sem.wait_timeout(Duration::from_millis(50)).unwrap());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_deadline_saturates_on_huge_timeouts() {
        let now = libc::timespec {
            tv_sec: 1_700_000_000,
            tv_nsec: 999_999_999,
        };
        for timeout in [Duration::MAX, Duration::from_secs(i64::MAX as u64)] {
            let deadline = deadline_after(now, timeout);
            assert_eq!(deadline.tv_sec, libc::time_t::MAX);
            assert_eq!(deadline.tv_nsec, 999_999_999);
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_deadline_carries_nanoseconds() {
        let now = libc::timespec {
            tv_sec: 10,
            tv_nsec: 900_000_000,
        };
        let deadline = deadline_after(now, Duration::new(2, 200_000_000));
        assert_eq!(deadline.tv_sec, 13);
        assert_eq!(deadline.tv_nsec, 100_000_000);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_wait_timeout_with_huge_timeout_blocks_until_post() {
        for timeout in [Duration::MAX, Duration::from_secs(i64::MAX as u64)] {
            let sem = Arc::new(Semaphore::create(0).unwrap());
            let waiter = {
                let sem = Arc::clone(&sem);
                std::thread::spawn(move || sem.wait_timeout(timeout))
            };
            std::thread::sleep(Duration::from_millis(20));
            assert!(!waiter.is_finished());
            sem.post().unwrap();
            assert!(waiter.join().unwrap().unwrap());
            assert!(!sem.try_wait().unwrap());
        }
    }

    #[test]
    fn test_wait_unblocks_on_post_from_other_thread() {
        let sem = Arc::new(Semaphore::create(0).unwrap());
        let waiter = {
            let sem = Arc::clone(&sem);
            std::thread::spawn(move || sem.wait())
        };
        std::thread::sleep(Duration::from_millis(20));
        sem.post().unwrap();
        waiter.join().unwrap().unwrap();
        assert!(!sem.try_wait().unwrap());
    }

    #[test]
    fn test_open_shares_count() {
        let sem = Semaphore::create(0).unwrap();
        let other = Semaphore::open(sem.name()).unwrap();
        other.post().unwrap();
        assert!(sem.try_wait().unwrap());
    }

    #[test]
    fn test_drop_unlinks() {
        let sem = Semaphore::create(1).unwrap();
        let name = sem.name().to_string();
        drop(sem);
        assert!(Semaphore::open(&name).is_err());
    }

    #[test]
    fn test_unique_names() {
        let a = Semaphore::create(0).unwrap();
        let b = Semaphore::create(0).unwrap();
        assert_ne!(a.name(), b.name());
    }
}
