//! Named shared-memory segments
//!
//! A [`SharedSegment`] is a POSIX shared-memory object (`shm_open`) mapped
//! read-write and shared into this process. Both the shared-memory channel
//! and [`ProcessMutex`](super::ProcessMutex) sit on top of it.
//!
//! The segment records the exact name it was opened with. Unlinking always
//! uses that recorded name, never a recomputed one.

use std::ffi::c_void;
use std::fs::File;
use std::num::NonZeroUsize;
use std::ptr::NonNull;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;

use crate::error::{IpcError, IpcResult};

/// Longest name accepted for a shared-memory object (excluding the leading `/`)
pub const MAX_SHM_NAME_LEN: usize = 255;

/// How a segment came to be mapped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Origin {
    /// This call created the kernel object
    Created,
    /// The kernel object already existed and was attached to
    Attached,
}

/// A mapped, named shared-memory object
#[derive(Debug)]
pub(crate) struct SharedSegment {
    name: String,
    ptr: NonNull<c_void>,
    len: usize,
    origin: Origin,
    unlink_on_drop: bool,
}

// SAFETY: the mapping is process-wide and stays valid until `Drop`; the raw
// pointer is only dereferenced by owners that provide their own locking.
unsafe impl Send for SharedSegment {}
// SAFETY: see above; `&SharedSegment` only exposes the pointer value.
unsafe impl Sync for SharedSegment {}

/// Check that `name` is a valid portable shared-memory object name
pub(crate) fn validate_shm_name(name: &str) -> IpcResult<()> {
    let Some(rest) = name.strip_prefix('/') else {
        return Err(IpcError::invalid(format!(
            "shared-memory name must start with '/': {name}"
        )));
    };
    if rest.is_empty() || rest.contains('/') {
        return Err(IpcError::invalid(format!(
            "shared-memory name must be '/' followed by a non-empty name without '/': {name}"
        )));
    }
    if rest.len() > MAX_SHM_NAME_LEN {
        return Err(IpcError::invalid(format!(
            "shared-memory name too long ({} bytes, max {MAX_SHM_NAME_LEN})",
            rest.len()
        )));
    }
    Ok(())
}

impl SharedSegment {
    /// Create a brand-new segment of `len` bytes; fails if `name` exists
    pub(crate) fn create_exclusive(name: &str, len: usize) -> IpcResult<Self> {
        let fd = shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|e| IpcError::unavailable(format!("shm_open {name}"), e))?;
        Self::map(name, File::from(fd), len, Origin::Created)
    }

    /// Create the segment, or attach to it if it already exists
    ///
    /// Exclusive creation is attempted first. On `EEXIST` the existing object
    /// is opened read-write and its contents (including any embedded mutex)
    /// are left untouched. An existing object smaller than `len` is grown.
    pub(crate) fn create_or_open(name: &str, len: usize) -> IpcResult<Self> {
        match shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        ) {
            Ok(fd) => Self::map(name, File::from(fd), len, Origin::Created),
            Err(Errno::EEXIST) => {
                tracing::debug!(name = %name, "Shared memory exists, attaching");
                let fd = shm_open(name, OFlag::O_RDWR, Mode::empty())
                    .map_err(|e| IpcError::unavailable(format!("shm_open {name}"), e))?;
                Self::map(name, File::from(fd), len, Origin::Attached)
            }
            Err(e) => Err(IpcError::unavailable(format!("shm_open {name}"), e)),
        }
    }

    /// Attach to an existing segment that must already be at least `len` bytes
    pub(crate) fn open(name: &str, len: usize) -> IpcResult<Self> {
        let fd = shm_open(name, OFlag::O_RDWR, Mode::empty())
            .map_err(|e| IpcError::unavailable(format!("shm_open {name}"), e))?;
        let file = File::from(fd);
        let actual = file
            .metadata()
            .map_err(|e| IpcError::unavailable(format!("fstat {name}"), e))?
            .len();
        if actual < len as u64 {
            return Err(IpcError::invalid(format!(
                "shared memory {name} is {actual} bytes, expected at least {len}"
            )));
        }
        Self::map(name, file, len, Origin::Attached)
    }

    /// Size and map an open descriptor; rolls back on failure
    ///
    /// The descriptor is closed when `file` drops, whether or not mapping
    /// succeeds. A segment created by this call is unlinked on failure.
    fn map(name: &str, file: File, len: usize, origin: Origin) -> IpcResult<Self> {
        let rollback = |err: IpcError| {
            if origin == Origin::Created {
                if let Err(e) = shm_unlink(name) {
                    tracing::warn!(name = %name, error = %e, "Rollback shm_unlink failed");
                }
            }
            err
        };

        let Some(length) = NonZeroUsize::new(len) else {
            return Err(rollback(IpcError::invalid("segment length must be > 0")));
        };

        let current = file
            .metadata()
            .map_err(|e| rollback(IpcError::unavailable(format!("fstat {name}"), e)))?
            .len();
        if origin == Origin::Created || current < len as u64 {
            file.set_len(len as u64)
                .map_err(|e| rollback(IpcError::unavailable(format!("ftruncate {name}"), e)))?;
        }

        // SAFETY: fresh mapping chosen by the kernel; `file` is a valid shm
        // descriptor of at least `len` bytes.
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                0,
            )
        }
        .map_err(|e| rollback(IpcError::unavailable(format!("mmap {name}"), e)))?;

        tracing::debug!(name = %name, len, ?origin, "Mapped shared memory");
        Ok(Self {
            name: name.to_string(),
            ptr,
            len,
            origin,
            unlink_on_drop: false,
        })
    }

    /// Name the segment was opened with
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Mapped length in bytes
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Whether this mapping created the kernel object
    pub(crate) fn origin(&self) -> Origin {
        self.origin
    }

    /// Start of the mapping
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr().cast()
    }

    /// Remove the kernel object's name when this mapping is dropped
    pub(crate) fn unlink_on_drop(&mut self, unlink: bool) {
        self.unlink_on_drop = unlink;
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe the mapping created in `map`, and no
        // references into it outlive `self`.
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            tracing::warn!(name = %self.name, error = %e, "munmap failed");
        }
        if self.unlink_on_drop {
            match shm_unlink(self.name.as_str()) {
                Ok(()) => tracing::debug!(name = %self.name, "Unlinked shared memory"),
                Err(Errno::ENOENT) => {}
                Err(e) => tracing::warn!(name = %self.name, error = %e, "shm_unlink failed"),
            }
        }
    }
}
