//! Mechanism Backends
//!
//! One module per kernel mechanism. Each backend:
//!
//! - acquires its kernel resources in a `create` constructor, rolling back
//!   anything already acquired if a later step fails
//! - moves raw bytes through [`Transport::send`] / [`Transport::recv`]
//! - releases everything in `Drop`, best effort, logging failures at `warn`
//!
//! | Backend | Module | Named resource removed on drop |
//! |---|---|---|
//! | Shared memory + mutex | [`shm`] | shm object |
//! | POSIX message queue | `posix_mq` (Linux) | queue name |
//! | System V message queue | `sysv_mq` (Linux) | queue id (`IPC_RMID`) |
//! | Unnamed / named pipe | [`pipe`] | FIFO path |
//! | Unix / TCP stream socket | [`socket`] | socket path |
//!
//! No framing is added anywhere: a send moves the caller's bytes as-is.

use std::path::{Path, PathBuf};

use crate::error::IpcResult;

pub(crate) mod pipe;
#[cfg(target_os = "linux")]
pub(crate) mod posix_mq;
pub(crate) mod shm;
pub(crate) mod socket;
#[cfg(target_os = "linux")]
pub(crate) mod sysv_mq;

/// Maximum number of pending messages in a message-queue backend
pub const MAX_PENDING_MESSAGES: usize = 10;

/// Data path shared by every backend
pub(crate) trait Transport {
    /// Write `data`, returning the number of bytes accepted
    fn send(&mut self, data: &[u8]) -> IpcResult<usize>;

    /// Read into `buf`, returning the number of bytes produced
    fn recv(&mut self, buf: &mut [u8]) -> IpcResult<usize>;

    /// Name recorded at creation, if the backend has one
    fn backing_name(&self) -> Option<&str>;
}

/// Filesystem entry removed when dropped
///
/// Backends declare this as their last field so descriptors are closed
/// before the name goes away.
#[derive(Debug)]
pub(crate) struct UnlinkOnDrop(PathBuf);

impl UnlinkOnDrop {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub(crate) fn path(&self) -> &Path {
        &self.0
    }

    pub(crate) fn as_str(&self) -> Option<&str> {
        self.path().to_str()
    }
}

impl Drop for UnlinkOnDrop {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => tracing::debug!(path = ?self.0, "Removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = ?self.0, error = %e, "Failed to remove"),
        }
    }
}
