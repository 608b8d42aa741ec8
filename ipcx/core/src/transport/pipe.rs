//! Pipe Backends
//!
//! Both flavors hold a read end and a write end inside one handle:
//!
//! - unnamed: `pipe(2)`, reachable by other processes only through `fork`
//! - named: a FIFO at a filesystem path, opened by path from any process
//!
//! The named flavor opens both ends non-blocking, read end first (opening a
//! FIFO for writing with `O_NONBLOCK` fails with `ENXIO` until a reader
//! exists). A `recv` on an empty FIFO therefore returns `WouldBlock` as an
//! [`IpcError::IoFailure`](crate::IpcError::IoFailure) instead of hanging.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::errno::Errno;
use nix::sys::stat::Mode;
use nix::unistd::{mkfifo, pipe};

use super::{Transport, UnlinkOnDrop};
use crate::error::{IpcError, IpcResult};

/// Pipe backend (unnamed or named)
#[derive(Debug)]
pub(crate) struct PipeTransport {
    reader: File,
    writer: File,
    /// Log label for the unnamed flavor
    label: Option<String>,
    /// FIFO path for the named flavor; dropped after both descriptors
    fifo: Option<UnlinkOnDrop>,
}

impl PipeTransport {
    /// Create an anonymous pipe known as `label`
    pub(crate) fn unnamed(label: &str) -> IpcResult<Self> {
        let (read_fd, write_fd) = pipe().map_err(|e| IpcError::unavailable("pipe", e))?;
        tracing::debug!(label = %label, "Created unnamed pipe");
        Ok(Self {
            reader: File::from(read_fd),
            writer: File::from(write_fd),
            label: Some(label.to_owned()),
            fifo: None,
        })
    }

    /// Create (or reuse) the FIFO at `path` and open both ends
    pub(crate) fn named(path: &Path) -> IpcResult<Self> {
        let created = match mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR) {
            Ok(()) => true,
            Err(Errno::EEXIST) => false,
            Err(e) => return Err(IpcError::unavailable(format!("mkfifo {}", path.display()), e)),
        };
        // Only a FIFO this call created is removed if opening fails.
        let cleanup = created.then(|| UnlinkOnDrop::new(path));

        let open_err = |mode: &str, e: std::io::Error| {
            IpcError::unavailable(format!("open {} for {mode}", path.display()), e)
        };
        let reader = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| open_err("reading", e))?;
        let writer = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| open_err("writing", e))?;

        // From here on the handle owns the path whether or not it created it.
        let fifo = Some(cleanup.unwrap_or_else(|| UnlinkOnDrop::new(path)));
        tracing::debug!(path = %path.display(), created, "Opened named pipe");
        Ok(Self {
            reader,
            writer,
            label: None,
            fifo,
        })
    }
}

impl Transport for PipeTransport {
    fn send(&mut self, data: &[u8]) -> IpcResult<usize> {
        Ok(self.writer.write(data)?)
    }

    fn recv(&mut self, buf: &mut [u8]) -> IpcResult<usize> {
        Ok(self.reader.read(buf)?)
    }

    fn backing_name(&self) -> Option<&str> {
        match &self.fifo {
            Some(fifo) => fifo.as_str(),
            None => self.label.as_deref(),
        }
    }
}
