//! Process-shared mutex
//!
//! A `pthread_mutex_t` initialized with `PTHREAD_PROCESS_SHARED` and placed in
//! shared memory, so that forked or unrelated processes can serialize on it.
//!
//! [`RawMutex`] is the bare primitive living at some address inside a
//! mapping; the shared-memory channel embeds one at offset 0 of its segment.
//! [`ProcessMutex`] is the standalone primitive callers use for turn-taking:
//! it owns a dedicated, uniquely named segment holding just the mutex.

use std::io;
use std::marker::PhantomData;
use std::mem::{size_of, MaybeUninit};
use std::ptr::NonNull;

use super::segment::{Origin, SharedSegment};
use super::unique_name;
use crate::error::{IpcError, IpcResult};

/// Bytes occupied by an embedded process-shared mutex
pub const MUTEX_FOOTPRINT: usize = size_of::<libc::pthread_mutex_t>();

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}

/// A process-shared `pthread_mutex_t` at a fixed address in shared memory
#[derive(Clone, Copy, Debug)]
pub(crate) struct RawMutex(NonNull<libc::pthread_mutex_t>);

impl RawMutex {
    /// Wrap the mutex stored at `ptr`
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null, suitably aligned and point at
    /// [`MUTEX_FOOTPRINT`] bytes of shared memory that stay mapped for as long
    /// as the returned value is used.
    pub(crate) unsafe fn from_ptr(ptr: *mut u8) -> Self {
        Self(NonNull::new_unchecked(ptr.cast()))
    }

    /// Initialize the mutex with process-shared attributes
    ///
    /// # Safety
    ///
    /// No other process may be using the mutex at this address.
    pub(crate) unsafe fn init(self) -> io::Result<()> {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        check(libc::pthread_mutexattr_init(attr.as_mut_ptr()))?;
        let mut rc =
            libc::pthread_mutexattr_setpshared(attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED);
        if rc == 0 {
            rc = libc::pthread_mutex_init(self.0.as_ptr(), attr.as_ptr());
        }
        libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
        check(rc)
    }

    /// Block until the mutex is acquired
    pub(crate) fn lock(self) -> io::Result<()> {
        // SAFETY: `from_ptr` guarantees the address stays mapped.
        check(unsafe { libc::pthread_mutex_lock(self.0.as_ptr()) })
    }

    /// Release the mutex
    pub(crate) fn unlock(self) -> io::Result<()> {
        // SAFETY: `from_ptr` guarantees the address stays mapped.
        check(unsafe { libc::pthread_mutex_unlock(self.0.as_ptr()) })
    }

    /// Destroy the mutex
    ///
    /// # Safety
    ///
    /// The mutex must be unlocked and no other process may use it afterwards.
    pub(crate) unsafe fn destroy(self) -> io::Result<()> {
        check(libc::pthread_mutex_destroy(self.0.as_ptr()))
    }
}

/// A standalone mutex usable across processes
///
/// Each instance lives in its own shared-memory object named
/// `/ipcx-mtx-<pid>-<counter>-<random>`, so concurrently live mutexes never
/// collide. Forked children inherit the mapping and can lock it directly;
/// unrelated processes attach with [`ProcessMutex::open`].
///
/// Only the process that created the mutex destroys and unlinks it on drop.
/// Copies inherited through `fork` and instances from `open` just unmap.
#[derive(Debug)]
pub struct ProcessMutex {
    raw: RawMutex,
    creator_pid: Option<u32>,
    segment: SharedSegment,
}

// SAFETY: a process-shared pthread mutex may be locked from any thread; the
// mapping backing it lives as long as `segment`.
unsafe impl Send for ProcessMutex {}
// SAFETY: see above.
unsafe impl Sync for ProcessMutex {}

impl ProcessMutex {
    /// Create a new, unlocked mutex with a unique backing name
    ///
    /// # Errors
    ///
    /// `ResourceUnavailable` if the shared memory or the mutex cannot be set up.
    pub fn create() -> IpcResult<Self> {
        let name = unique_name("mtx");
        let mut segment = SharedSegment::create_exclusive(&name, MUTEX_FOOTPRINT)?;

        // SAFETY: the segment is MUTEX_FOOTPRINT bytes, page aligned, and
        // brand new, so nobody else can be using it.
        let raw = unsafe { RawMutex::from_ptr(segment.as_ptr()) };
        if let Err(e) = unsafe { raw.init() } {
            segment.unlink_on_drop(true);
            return Err(IpcError::unavailable(
                format!("pthread_mutex_init {name}"),
                e,
            ));
        }

        tracing::debug!(name = %name, "Created process mutex");
        Ok(Self {
            raw,
            creator_pid: Some(std::process::id()),
            segment,
        })
    }

    /// Attach to a mutex created by another process
    ///
    /// # Errors
    ///
    /// `ResourceUnavailable` if no mutex with that name exists.
    pub fn open(name: &str) -> IpcResult<Self> {
        let segment = SharedSegment::open(name, MUTEX_FOOTPRINT)?;
        debug_assert_eq!(segment.origin(), Origin::Attached);

        // SAFETY: the segment holds at least MUTEX_FOOTPRINT bytes.
        let raw = unsafe { RawMutex::from_ptr(segment.as_ptr()) };
        Ok(Self {
            raw,
            creator_pid: None,
            segment,
        })
    }

    /// Backing name other processes can pass to [`ProcessMutex::open`]
    #[must_use]
    pub fn name(&self) -> &str {
        self.segment.name()
    }

    /// Block until the mutex is acquired
    ///
    /// The returned guard releases the mutex when dropped or when
    /// [`ProcessMutexGuard::unlock`] is called.
    ///
    /// # Errors
    ///
    /// `IoFailure` if `pthread_mutex_lock` fails (e.g. `EDEADLK`).
    pub fn lock(&self) -> IpcResult<ProcessMutexGuard<'_>> {
        self.raw.lock()?;
        Ok(ProcessMutexGuard {
            mutex: self,
            _not_send: PhantomData,
        })
    }

    fn is_owner(&self) -> bool {
        self.creator_pid == Some(std::process::id())
    }
}

impl Drop for ProcessMutex {
    fn drop(&mut self) {
        if !self.is_owner() {
            return;
        }
        // SAFETY: the creating process is tearing the mutex down; callers must
        // not hold it across destruction.
        if let Err(e) = unsafe { self.raw.destroy() } {
            tracing::warn!(name = %self.segment.name(), error = %e, "pthread_mutex_destroy failed");
        }
        self.segment.unlink_on_drop(true);
        tracing::debug!(name = %self.segment.name(), "Destroyed process mutex");
    }
}

/// Proof that a [`ProcessMutex`] is held by this thread
///
/// POSIX requires the locking thread to unlock, so the guard cannot be sent
/// to another thread.
#[derive(Debug)]
#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct ProcessMutexGuard<'a> {
    mutex: &'a ProcessMutex,
    _not_send: PhantomData<*const ()>,
}

impl ProcessMutexGuard<'_> {
    /// Release the mutex, reporting failure
    ///
    /// # Errors
    ///
    /// `IoFailure` if `pthread_mutex_unlock` fails.
    pub fn unlock(self) -> IpcResult<()> {
        let raw = self.mutex.raw;
        std::mem::forget(self);
        raw.unlock()?;
        Ok(())
    }
}

impl Drop for ProcessMutexGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.mutex.raw.unlock() {
            tracing::warn!(name = %self.mutex.name(), error = %e, "pthread_mutex_unlock failed");
        }
    }
}
