//! Channel Dispatch
//!
//! [`Channel`] is the one handle type callers hold. It wraps exactly one
//! backend, picked from [`ChannelConfig::mechanism`] at creation, and routes
//! every operation to it.
//!
//! # Lifecycle
//!
//! ```text
//! ChannelConfig ──create()──► Channel ──send()/recv()──► ...
//!                                │
//!                                └──close() or drop──► backend teardown
//! ```
//!
//! `close` consumes the handle, so using a channel after closing it, or
//! closing it twice, does not compile:
//!
//! ```compile_fail
//! use ipcx_core::{Channel, ChannelConfig};
//!
//! let channel = Channel::create(&ChannelConfig::unnamed_pipe("anon", 64)).unwrap();
//! channel.close();
//! channel.close();
//! ```

use std::fmt;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::net::UnixListener;
use std::path::Path;

use crate::config::{ChannelConfig, Mechanism};
use crate::error::{IpcError, IpcResult};
use crate::transport::pipe::PipeTransport;
#[cfg(target_os = "linux")]
use crate::transport::posix_mq::PosixQueue;
use crate::transport::shm::ShmChannel;
use crate::transport::socket::StreamServer;
#[cfg(target_os = "linux")]
use crate::transport::sysv_mq::SysvQueue;
use crate::transport::Transport;

/// One backend per mechanism
enum Backend {
    ShmMutex(ShmChannel),
    #[cfg(target_os = "linux")]
    PosixQueue(PosixQueue),
    #[cfg(target_os = "linux")]
    SysvQueue(SysvQueue),
    UnnamedPipe(PipeTransport),
    NamedPipe(PipeTransport),
    UnixSocket(StreamServer<UnixListener>),
    TcpSocket(StreamServer<TcpListener>),
}

impl Backend {
    fn as_transport(&mut self) -> &mut dyn Transport {
        match self {
            Self::ShmMutex(b) => b,
            #[cfg(target_os = "linux")]
            Self::PosixQueue(b) => b,
            #[cfg(target_os = "linux")]
            Self::SysvQueue(b) => b,
            Self::UnnamedPipe(b) | Self::NamedPipe(b) => b,
            Self::UnixSocket(b) => b,
            Self::TcpSocket(b) => b,
        }
    }

    fn backing_name(&self) -> Option<&str> {
        match self {
            Self::ShmMutex(b) => b.backing_name(),
            #[cfg(target_os = "linux")]
            Self::PosixQueue(b) => b.backing_name(),
            #[cfg(target_os = "linux")]
            Self::SysvQueue(b) => b.backing_name(),
            Self::UnnamedPipe(b) | Self::NamedPipe(b) => b.backing_name(),
            Self::UnixSocket(b) => b.backing_name(),
            Self::TcpSocket(b) => b.backing_name(),
        }
    }
}

/// An open cross-process channel
///
/// Created by [`Channel::create`], destroyed exactly once by
/// [`Channel::close`] or by going out of scope.
pub struct Channel {
    mechanism: Mechanism,
    capacity: usize,
    backend: Backend,
}

impl Channel {
    /// Create a channel as described by `config`
    ///
    /// The configuration is validated before any kernel resource is touched.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a missing name, zero capacity or a badly
    ///   shaped name
    /// - `Unsupported` when the mechanism does not exist on this platform
    /// - `ResourceUnavailable` when the backend cannot acquire its resources;
    ///   nothing stays allocated in that case
    pub fn create(config: &ChannelConfig) -> IpcResult<Self> {
        config.validate()?;
        if !config.mechanism.is_supported() {
            return Err(IpcError::Unsupported(config.mechanism));
        }

        let capacity = config.capacity_bytes();
        let backend = match config.mechanism {
            Mechanism::ShmMutex => {
                Backend::ShmMutex(ShmChannel::create(config.required_name()?, capacity)?)
            }

            #[cfg(target_os = "linux")]
            Mechanism::PosixQueue => {
                Backend::PosixQueue(PosixQueue::create(config.required_name()?, capacity)?)
            }

            #[cfg(target_os = "linux")]
            Mechanism::SysvQueue => {
                Backend::SysvQueue(SysvQueue::create(config.required_name()?, capacity)?)
            }

            #[cfg(not(target_os = "linux"))]
            Mechanism::PosixQueue | Mechanism::SysvQueue => {
                return Err(IpcError::Unsupported(config.mechanism));
            }

            Mechanism::UnnamedPipe => {
                Backend::UnnamedPipe(PipeTransport::unnamed(config.required_name()?)?)
            }

            Mechanism::NamedPipe => Backend::NamedPipe(PipeTransport::named(Path::new(
                config.required_name()?,
            ))?),

            Mechanism::UnixSocket => Backend::UnixSocket(StreamServer::unix(Path::new(
                config.required_name()?,
            ))?),

            Mechanism::TcpSocket => {
                Backend::TcpSocket(StreamServer::tcp(config.required_name()?, config.port)?)
            }
        };

        tracing::info!(
            mechanism = %config.mechanism,
            name = config.name.as_deref().unwrap_or_default(),
            capacity,
            "Channel created"
        );

        Ok(Self {
            mechanism: config.mechanism,
            capacity,
            backend,
        })
    }

    /// Send `data` through the channel
    ///
    /// Returns the number of bytes the backend accepted. For shared memory
    /// and message queues that is always `data.len()`; pipes and sockets may
    /// report a short write.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for empty data or data larger than the capacity of
    /// a bounded backend; `IoFailure` when the underlying call fails.
    pub fn send(&mut self, data: &[u8]) -> IpcResult<usize> {
        if data.is_empty() {
            return Err(IpcError::invalid("cannot send an empty message"));
        }
        self.backend.as_transport().send(data)
    }

    /// Receive into `buf`
    ///
    /// Returns the number of bytes written into `buf`. Shared memory always
    /// fills the whole buffer; queues deliver one message; pipes and sockets
    /// return whatever one read produced (0 means the peer is gone).
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty buffer or one the backend cannot use;
    /// `IoFailure` when the underlying call fails.
    pub fn recv(&mut self, buf: &mut [u8]) -> IpcResult<usize> {
        if buf.is_empty() {
            return Err(IpcError::invalid("cannot receive into an empty buffer"));
        }
        self.backend.as_transport().recv(buf)
    }

    /// Tear the channel down and release its kernel resources
    ///
    /// Equivalent to dropping the handle. Cleanup failures are logged, never
    /// returned.
    pub fn close(self) {
        drop(self);
    }

    /// Mechanism this channel was created with
    #[must_use]
    pub fn mechanism(&self) -> Mechanism {
        self.mechanism
    }

    /// Name, path or label recorded at creation
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.backend.backing_name()
    }

    /// Configured capacity in bytes
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bound address of a TCP channel
    ///
    /// Useful with port 0, where the kernel picks the port.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.backend {
            Backend::TcpSocket(server) => server.local_addr(),
            _ => None,
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("mechanism", &self.mechanism)
            .field("name", &self.name())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        tracing::debug!(
            mechanism = %self.mechanism,
            name = self.name().unwrap_or("-"),
            "Closing channel"
        );
    }
}
