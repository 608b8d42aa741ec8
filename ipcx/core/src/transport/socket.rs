//! Stream Socket Backends
//!
//! Server-side Unix domain and TCP sockets. Creation binds and listens; the
//! first `send` or `recv` blocks in `accept` until a peer connects, and every
//! later call talks to that single peer. Further connection attempts queue in
//! the listen backlog and are never accepted.
//!
//! Byte counts are those of one `write`/`read` call: short counts are
//! possible and a `recv` of 0 means the peer closed its end.
//!
//! # Security
//!
//! - Unix socket files are created with 0600 permissions
//! - A stale socket file at the configured path is removed before binding

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;

use super::{Transport, UnlinkOnDrop};
use crate::error::{IpcError, IpcResult};

/// A listening socket that hands out one stream per accepted peer
pub(crate) trait Listener: std::fmt::Debug {
    /// Connected stream type
    type Stream: Read + Write + std::fmt::Debug;

    /// Block until a peer connects
    fn accept_peer(&self) -> std::io::Result<Self::Stream>;
}

impl Listener for UnixListener {
    type Stream = UnixStream;

    fn accept_peer(&self) -> std::io::Result<UnixStream> {
        self.accept().map(|(stream, _addr)| stream)
    }
}

impl Listener for TcpListener {
    type Stream = TcpStream;

    fn accept_peer(&self) -> std::io::Result<TcpStream> {
        self.accept().map(|(stream, _addr)| stream)
    }
}

/// Listening socket plus the lazily accepted peer
#[derive(Debug)]
pub(crate) struct StreamServer<L: Listener> {
    peer: Option<L::Stream>,
    listener: L,
    label: String,
    /// Socket file for the Unix flavor; dropped after the descriptors
    socket_file: Option<UnlinkOnDrop>,
}

impl StreamServer<UnixListener> {
    /// Bind a Unix domain socket at `path`
    pub(crate) fn unix(path: &Path) -> IpcResult<Self> {
        if path.exists() {
            tracing::warn!(path = ?path, "Removing stale socket file");
            std::fs::remove_file(path).map_err(|e| {
                IpcError::unavailable(format!("remove stale socket {}", path.display()), e)
            })?;
        }

        let listener = UnixListener::bind(path)
            .map_err(|e| IpcError::unavailable(format!("bind {}", path.display()), e))?;
        let socket_file = UnlinkOnDrop::new(path);

        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
            discard(listener, socket_file);
            return Err(IpcError::unavailable(format!("chmod {}", path.display()), e));
        }

        tracing::info!(path = ?path, "Listening on Unix socket");
        Ok(Self {
            peer: None,
            listener,
            label: path.display().to_string(),
            socket_file: Some(socket_file),
        })
    }
}

/// Close `listener` before its socket file is removed
fn discard<T>(listener: T, socket_file: UnlinkOnDrop) {
    drop(listener);
    drop(socket_file);
}

impl StreamServer<TcpListener> {
    /// Bind a TCP socket on all interfaces at `port` (0 picks a free port)
    pub(crate) fn tcp(label: &str, port: u16) -> IpcResult<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .map_err(|e| IpcError::unavailable(format!("bind 0.0.0.0:{port}"), e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| IpcError::unavailable("getsockname", e))?;

        tracing::info!(label = %label, addr = %addr, "Listening on TCP socket");
        Ok(Self {
            peer: None,
            listener,
            label: label.to_string(),
            socket_file: None,
        })
    }

    /// Address the listener is bound to
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

impl<L: Listener> StreamServer<L> {
    /// The connected peer, accepting it first if necessary
    fn peer(&mut self) -> IpcResult<&mut L::Stream> {
        let stream = match self.peer.take() {
            Some(stream) => stream,
            None => {
                let stream = self.listener.accept_peer()?;
                tracing::debug!(label = %self.label, "Accepted peer");
                stream
            }
        };
        Ok(self.peer.insert(stream))
    }
}

impl<L: Listener> Transport for StreamServer<L> {
    fn send(&mut self, data: &[u8]) -> IpcResult<usize> {
        Ok(self.peer()?.write(data)?)
    }

    fn recv(&mut self, buf: &mut [u8]) -> IpcResult<usize> {
        Ok(self.peer()?.read(buf)?)
    }

    fn backing_name(&self) -> Option<&str> {
        match &self.socket_file {
            Some(file) => file.as_str(),
            None => Some(&self.label),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    /// Records whether its path still existed when it was dropped
    struct SeesFileOnClose<'a> {
        path: &'a Path,
        saw_file: &'a std::cell::Cell<bool>,
    }

    impl Drop for SeesFileOnClose<'_> {
        fn drop(&mut self) {
            self.saw_file.set(self.path.exists());
        }
    }

    #[test]
    fn test_discard_closes_before_unlinking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("closing.sock");
        std::fs::write(&path, b"").unwrap();
        let saw_file = std::cell::Cell::new(false);

        let listener = SeesFileOnClose {
            path: &path,
            saw_file: &saw_file,
        };
        discard(listener, UnlinkOnDrop::new(&path));

        assert!(saw_file.get());
        assert!(!path.exists());
    }

    #[test]
    fn test_unix_accepts_on_first_recv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.sock");
        let mut server = StreamServer::unix(&path).unwrap();

        let client_path = path.clone();
        let client = thread::spawn(move || {
            let mut stream = UnixStream::connect(client_path).unwrap();
            stream.write_all(b"ping").unwrap();
            let mut reply = [0u8; 4];
            stream.read_exact(&mut reply).unwrap();
            reply
        });

        let mut buf = [0u8; 4];
        let mut got = 0;
        while got < 4 {
            got += server.recv(&mut buf[got..]).unwrap();
        }
        assert_eq!(&buf, b"ping");
        assert_eq!(server.send(b"pong").unwrap(), 4);

        assert_eq!(&client.join().unwrap(), b"pong");
    }

    #[test]
    fn test_unix_socket_permissions_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perm.sock");
        let server = StreamServer::unix(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        drop(server);
        assert!(!path.exists());
    }

    #[test]
    fn test_unix_replaces_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        std::fs::write(&path, b"leftover").unwrap();

        assert!(StreamServer::unix(&path).is_ok());
    }

    #[test]
    fn test_tcp_ephemeral_port_round_trip() {
        let mut server = StreamServer::tcp("test", 0).unwrap();
        let port = server.local_addr().unwrap().port();
        assert_ne!(port, 0);

        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).unwrap();
            buf
        });

        let mut sent = 0;
        while sent < 5 {
            sent += server.send(&b"hello"[sent..]).unwrap();
        }
        assert_eq!(&client.join().unwrap(), b"hello");
        assert_eq!(server.backing_name(), Some("test"));
    }

    #[test]
    fn test_recv_after_peer_closes_returns_zero() {
        let mut server = StreamServer::tcp("eof", 0).unwrap();
        let port = server.local_addr().unwrap().port();

        thread::spawn(move || drop(TcpStream::connect(("127.0.0.1", port)).unwrap()))
            .join()
            .unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(server.recv(&mut buf).unwrap(), 0);
    }
}
