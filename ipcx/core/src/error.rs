//! Error Types
//!
//! Every channel and primitive operation reports failures through
//! [`IpcError`]. The variants mirror the failure domains of the underlying
//! kernel resources:
//!
//! - [`IpcError::InvalidArgument`]: the caller passed something unusable
//!   (missing name, zero capacity, oversized payload, empty buffer)
//! - [`IpcError::ResourceUnavailable`]: a kernel object could not be created
//!   or opened
//! - [`IpcError::Unsupported`]: the mechanism does not exist on this platform
//! - [`IpcError::IoFailure`]: a read, write, accept or lock call failed
//!
//! Failures are never retried internally. An interrupted call (`EINTR`) comes
//! back to the caller as an `IoFailure`.

use std::io;

use thiserror::Error;

use crate::config::Mechanism;

/// Result alias used throughout the crate
pub type IpcResult<T> = Result<T, IpcError>;

/// Errors produced by channels and synchronization primitives
#[derive(Debug, Error)]
pub enum IpcError {
    /// A required argument was missing, empty or out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Creating or opening a kernel resource failed
    #[error("Resource unavailable: {resource}: {source}")]
    ResourceUnavailable {
        /// Which resource was being acquired (e.g. `shm_open /myshm`)
        resource: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// The selected mechanism is not available on this platform
    #[error("Mechanism not supported on this platform: {0}")]
    Unsupported(Mechanism),

    /// A data-path syscall failed
    #[error("I/O failure: {0}")]
    IoFailure(#[from] io::Error),
}

impl IpcError {
    /// Build an `InvalidArgument` error from anything printable
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Build a `ResourceUnavailable` error for `resource`
    pub fn unavailable(resource: impl Into<String>, source: impl Into<io::Error>) -> Self {
        Self::ResourceUnavailable {
            resource: resource.into(),
            source: source.into(),
        }
    }

    /// Build an `IoFailure` from the calling thread's `errno`
    pub(crate) fn last_os_error() -> Self {
        Self::IoFailure(io::Error::last_os_error())
    }

    /// The OS error code carried by this error, if any
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::ResourceUnavailable { source, .. } | Self::IoFailure(source) => {
                source.raw_os_error()
            }
            Self::InvalidArgument(_) | Self::Unsupported(_) => None,
        }
    }

    /// Whether this is an `InvalidArgument` error
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }
}

impl From<nix::errno::Errno> for IpcError {
    fn from(errno: nix::errno::Errno) -> Self {
        Self::IoFailure(io::Error::from(errno))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_invalid_argument() {
        let err = IpcError::invalid("capacity must be > 0");
        assert_eq!(err.to_string(), "Invalid argument: capacity must be > 0");
        assert!(err.is_invalid_argument());
        assert_eq!(err.raw_os_error(), None);
    }

    #[test]
    fn test_unavailable_keeps_os_code() {
        let err = IpcError::unavailable("shm_open /x", nix::errno::Errno::EACCES);
        assert_eq!(err.raw_os_error(), Some(libc::EACCES));
        assert!(err.to_string().starts_with("Resource unavailable: shm_open /x"));
    }

    #[test]
    fn test_errno_converts_to_io_failure() {
        let err: IpcError = nix::errno::Errno::EINTR.into();
        assert!(matches!(err, IpcError::IoFailure(_)));
        assert_eq!(err.raw_os_error(), Some(libc::EINTR));
    }

    #[test]
    fn test_unsupported_names_mechanism() {
        let err = IpcError::Unsupported(Mechanism::SysvQueue);
        assert!(err.to_string().contains("sysv-queue"));
    }
}
