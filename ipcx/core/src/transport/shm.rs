//! Shared-Memory Channel
//!
//! A fixed-capacity byte buffer in a named shared-memory object, guarded by a
//! process-shared mutex embedded at the start of the mapping.
//!
//! # Layout
//!
//! ```text
//! offset 0                MUTEX_FOOTPRINT                 + capacity
//! ┌───────────────────────┬──────────────────────────────────────┐
//! │ pthread_mutex_t       │ data region                          │
//! │ (PROCESS_SHARED)      │ (raw bytes, no header)               │
//! └───────────────────────┴──────────────────────────────────────┘
//! ```
//!
//! # Semantics
//!
//! - `send` copies `len` bytes to the start of the data region under the lock
//! - `recv` copies `len` bytes out under the lock, whatever they currently
//!   are; it never waits for fresh data
//! - no length is stored, so both sides must agree on sizes out-of-band
//!
//! # Reuse of an existing segment
//!
//! Creation tries `O_CREAT | O_EXCL` first. If the name already exists the
//! segment is attached as-is and its mutex is *not* reinitialized, so a
//! second process can join a live channel. If a previous owner crashed while
//! holding the mutex, every later `send`/`recv` on that segment blocks
//! forever; there is no recovery.

use std::ptr;

use super::Transport;
use crate::error::{IpcError, IpcResult};
use crate::sync::mutex::{RawMutex, MUTEX_FOOTPRINT};
use crate::sync::segment::{validate_shm_name, Origin, SharedSegment};

/// Shared-memory channel backend
#[derive(Debug)]
pub(crate) struct ShmChannel {
    capacity: usize,
    mutex: RawMutex,
    /// Process that initialized the embedded mutex, if it was this handle
    mutex_initialized_by: Option<u32>,
    segment: SharedSegment,
}

// SAFETY: the mutex lives inside `segment`, which is Send; every access to the
// data region goes through that process-shared mutex. Not Sync: `send`/`recv`
// take `&mut self`.
unsafe impl Send for ShmChannel {}

impl ShmChannel {
    /// Create or attach to the channel called `name`
    pub(crate) fn create(name: &str, capacity: usize) -> IpcResult<Self> {
        validate_shm_name(name)?;
        if capacity == 0 {
            return Err(IpcError::invalid("shared memory capacity must be > 0"));
        }

        let mut segment = SharedSegment::create_or_open(name, capacity + MUTEX_FOOTPRINT)?;

        // SAFETY: the mapping is page aligned and at least MUTEX_FOOTPRINT
        // bytes long; it lives as long as `segment`, which we keep.
        let mutex = unsafe { RawMutex::from_ptr(segment.as_ptr()) };

        let mutex_initialized_by = if segment.origin() == Origin::Created {
            // SAFETY: we just created the object; no other process has it yet.
            if let Err(e) = unsafe { mutex.init() } {
                segment.unlink_on_drop(true);
                return Err(IpcError::unavailable(format!("pthread_mutex_init {name}"), e));
            }
            Some(std::process::id())
        } else {
            None
        };

        tracing::debug!(
            name = %name,
            capacity,
            mapped = segment.len(),
            attached = mutex_initialized_by.is_none(),
            "Shared memory channel ready"
        );

        Ok(Self {
            capacity,
            mutex,
            mutex_initialized_by,
            segment,
        })
    }

    fn data_ptr(&self) -> *mut u8 {
        // SAFETY: the mapping is `capacity + MUTEX_FOOTPRINT` bytes long.
        unsafe { self.segment.as_ptr().add(MUTEX_FOOTPRINT) }
    }

    fn check_len(&self, len: usize) -> IpcResult<()> {
        if len > self.capacity {
            return Err(IpcError::invalid(format!(
                "{len} bytes exceeds shared memory capacity of {}",
                self.capacity
            )));
        }
        Ok(())
    }

    /// Run `copy` with the embedded mutex held
    fn locked<F: FnOnce()>(&self, copy: F) -> IpcResult<()> {
        self.mutex.lock()?;
        copy();
        self.mutex.unlock()?;
        Ok(())
    }
}

impl Transport for ShmChannel {
    fn send(&mut self, data: &[u8]) -> IpcResult<usize> {
        self.check_len(data.len())?;
        let dst = self.data_ptr();
        self.locked(|| {
            // SAFETY: `data.len() <= capacity`, the data region is that long,
            // and the source is caller memory, so the ranges cannot overlap.
            unsafe { ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) }
        })?;
        Ok(data.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> IpcResult<usize> {
        self.check_len(buf.len())?;
        let src = self.data_ptr();
        let len = buf.len();
        self.locked(|| {
            // SAFETY: as in `send`, with source and destination swapped.
            unsafe { ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), len) }
        })?;
        Ok(len)
    }

    fn backing_name(&self) -> Option<&str> {
        Some(self.segment.name())
    }
}

impl Drop for ShmChannel {
    fn drop(&mut self) {
        if self.mutex_initialized_by == Some(std::process::id()) {
            // SAFETY: the initializing process tears down its mutex; the
            // mapping is still alive until `segment` drops below.
            if let Err(e) = unsafe { self.mutex.destroy() } {
                tracing::warn!(
                    name = %self.segment.name(),
                    error = %e,
                    "pthread_mutex_destroy failed"
                );
            }
        }
        // Unmap first, then unlink the name recorded at creation.
        self.segment.unlink_on_drop(true);
    }
}
