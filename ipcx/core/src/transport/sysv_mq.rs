//! System V Message Queue Backend
//!
//! The queue is keyed by `ftok(name, 'a')`, so the configured name must be an
//! existing filesystem path; processes passing the same path reach the same
//! queue. Every message is sent with type 1 and received in FIFO order.
//!
//! The queue's byte limit (`msg_qbytes`) is lowered to
//! `capacity * MAX_PENDING_MESSAGES` when the system default is larger, which
//! bounds the pending backlog. Raising it is never attempted.

use std::ffi::CString;
use std::io;
use std::mem::size_of;

use super::{Transport, MAX_PENDING_MESSAGES};
use crate::error::{IpcError, IpcResult};

/// Project id passed to `ftok`
const FTOK_PROJECT: libc::c_int = b'a' as libc::c_int;

/// Message type used for every message
const MESSAGE_TYPE: libc::c_long = 1;

const WORD: usize = size_of::<libc::c_long>();

/// `struct msgbuf` with room for `len` payload bytes, word aligned
struct MsgBuf {
    words: Vec<libc::c_long>,
    len: usize,
}

impl MsgBuf {
    fn new(len: usize) -> Self {
        Self {
            words: vec![0; 1 + len.div_ceil(WORD)],
            len,
        }
    }

    fn set_type(&mut self, mtype: libc::c_long) {
        self.words[0] = mtype;
    }

    fn text(&self) -> &[u8] {
        // SAFETY: `words` holds at least `len` bytes after the first word.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr().add(1).cast(), self.len) }
    }

    fn text_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `text`; the borrow is unique.
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr().add(1).cast(), self.len) }
    }

    fn as_ptr(&self) -> *const libc::c_void {
        self.words.as_ptr().cast()
    }

    fn as_mut_ptr(&mut self) -> *mut libc::c_void {
        self.words.as_mut_ptr().cast()
    }
}

/// System V message queue backend
#[derive(Debug)]
pub(crate) struct SysvQueue {
    msqid: libc::c_int,
    key_path: String,
    capacity: usize,
}

impl SysvQueue {
    /// Create (or open) the queue keyed from `path`
    pub(crate) fn create(path: &str, capacity: usize) -> IpcResult<Self> {
        let cpath = CString::new(path)
            .map_err(|_| IpcError::invalid(format!("path contains NUL: {path:?}")))?;

        // SAFETY: valid C string.
        let key = unsafe { libc::ftok(cpath.as_ptr(), FTOK_PROJECT) };
        if key == -1 {
            return Err(IpcError::unavailable(
                format!("ftok {path}"),
                io::Error::last_os_error(),
            ));
        }

        // SAFETY: plain syscall on a key value.
        let msqid = unsafe { libc::msgget(key, libc::IPC_CREAT | 0o600) };
        if msqid == -1 {
            return Err(IpcError::unavailable(
                format!("msgget {path}"),
                io::Error::last_os_error(),
            ));
        }

        let queue = Self {
            msqid,
            key_path: path.to_string(),
            capacity,
        };
        queue.limit_backlog();
        tracing::debug!(path = %path, msqid, capacity, "System V message queue ready");
        Ok(queue)
    }

    /// Lower `msg_qbytes` so at most `MAX_PENDING_MESSAGES` full messages fit
    fn limit_backlog(&self) {
        let wanted = (self.capacity * MAX_PENDING_MESSAGES) as u64;

        // SAFETY: zeroed msqid_ds is a valid out-parameter for IPC_STAT.
        let mut ds: libc::msqid_ds = unsafe { std::mem::zeroed() };
        // SAFETY: `ds` is a valid, writable msqid_ds.
        if unsafe { libc::msgctl(self.msqid, libc::IPC_STAT, &mut ds) } == -1 {
            tracing::warn!(
                msqid = self.msqid,
                error = %io::Error::last_os_error(),
                "IPC_STAT failed, keeping default queue limit"
            );
            return;
        }
        if (ds.msg_qbytes as u64) <= wanted {
            return;
        }
        ds.msg_qbytes = wanted as _;
        // SAFETY: `ds` was filled by IPC_STAT and only msg_qbytes changed.
        if unsafe { libc::msgctl(self.msqid, libc::IPC_SET, &mut ds) } == -1 {
            tracing::warn!(
                msqid = self.msqid,
                error = %io::Error::last_os_error(),
                "IPC_SET failed, keeping default queue limit"
            );
        }
    }
}

impl Transport for SysvQueue {
    fn send(&mut self, data: &[u8]) -> IpcResult<usize> {
        if data.len() > self.capacity {
            return Err(IpcError::invalid(format!(
                "{} bytes exceeds message capacity of {}",
                data.len(),
                self.capacity
            )));
        }
        let mut msg = MsgBuf::new(data.len());
        msg.set_type(MESSAGE_TYPE);
        msg.text_mut().copy_from_slice(data);

        // SAFETY: `msg` is a msgbuf with `data.len()` bytes of text.
        if unsafe { libc::msgsnd(self.msqid, msg.as_ptr(), data.len(), 0) } == -1 {
            return Err(IpcError::last_os_error());
        }
        Ok(data.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> IpcResult<usize> {
        let mut msg = MsgBuf::new(buf.len());

        // SAFETY: `msg` has room for `buf.len()` bytes of text.
        let n = unsafe { libc::msgrcv(self.msqid, msg.as_mut_ptr(), buf.len(), 0, 0) };
        if n == -1 {
            return Err(IpcError::last_os_error());
        }
        let n = n as usize;
        buf[..n].copy_from_slice(&msg.text()[..n]);
        Ok(n)
    }

    fn backing_name(&self) -> Option<&str> {
        Some(&self.key_path)
    }
}

impl Drop for SysvQueue {
    fn drop(&mut self) {
        // SAFETY: IPC_RMID ignores the buffer argument.
        if unsafe { libc::msgctl(self.msqid, libc::IPC_RMID, std::ptr::null_mut()) } == -1 {
            let err = io::Error::last_os_error();
            if !matches!(err.raw_os_error(), Some(libc::EINVAL | libc::EIDRM)) {
                tracing::warn!(msqid = self.msqid, error = %err, "IPC_RMID failed");
            }
        } else {
            tracing::debug!(path = %self.key_path, msqid = self.msqid, "Removed message queue");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_file() -> tempfile::NamedTempFile {
        tempfile::NamedTempFile::new().unwrap()
    }

    #[test]
    fn test_round_trip_preserves_boundaries() {
        let file = key_file();
        let path = file.path().to_str().unwrap();
        let mut q = SysvQueue::create(path, 32).unwrap();

        q.send(b"alpha").unwrap();
        q.send(b"beta").unwrap();

        let mut buf = [0u8; 32];
        let n = q.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"alpha");
        let n = q.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"beta");
    }

    #[test]
    fn test_oversized_send_rejected() {
        let file = key_file();
        let mut q = SysvQueue::create(file.path().to_str().unwrap(), 4).unwrap();
        assert!(q.send(b"too long").unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_short_receive_buffer_fails() {
        let file = key_file();
        let mut q = SysvQueue::create(file.path().to_str().unwrap(), 32).unwrap();
        q.send(b"0123456789").unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(q.recv(&mut buf).unwrap_err().raw_os_error(), Some(libc::E2BIG));
    }

    #[test]
    fn test_missing_key_path_fails() {
        let err = SysvQueue::create("/nonexistent/ipcx/key", 16).unwrap_err();
        assert!(matches!(err, IpcError::ResourceUnavailable { .. }));
    }

    #[test]
    fn test_drop_removes_queue() {
        let file = key_file();
        let q = SysvQueue::create(file.path().to_str().unwrap(), 16).unwrap();
        let msqid = q.msqid;
        drop(q);

        // SAFETY: zeroed msqid_ds is a valid out-parameter.
        let mut ds: libc::msqid_ds = unsafe { std::mem::zeroed() };
        assert_eq!(unsafe { libc::msgctl(msqid, libc::IPC_STAT, &mut ds) }, -1);
    }

    #[test]
    fn test_msgbuf_layout() {
        let mut msg = MsgBuf::new(3);
        msg.set_type(MESSAGE_TYPE);
        msg.text_mut().copy_from_slice(b"abc");
        assert_eq!(msg.words[0], MESSAGE_TYPE);
        assert_eq!(msg.text(), b"abc");
    }
}
