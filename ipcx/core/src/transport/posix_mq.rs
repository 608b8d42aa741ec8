//! POSIX Message Queue Backend
//!
//! Message-oriented: each `send` enqueues one message of at most `capacity`
//! bytes, each `recv` dequeues one whole message. At most
//! [`MAX_PENDING_MESSAGES`] messages wait in the queue; a further `send`
//! blocks until a receiver makes room.

use nix::errno::Errno;
use nix::mqueue::{
    mq_attr_member_t, mq_close, mq_getattr, mq_open, mq_receive, mq_send, mq_unlink, MQ_OFlag,
    MqAttr, MqdT,
};
use nix::sys::stat::Mode;

use super::{Transport, MAX_PENDING_MESSAGES};
use crate::error::{IpcError, IpcResult};

/// POSIX message queue backend
#[derive(Debug)]
pub(crate) struct PosixQueue {
    mqd: Option<MqdT>,
    name: String,
    capacity: usize,
    /// Kernel message size limit; receive buffers must be at least this big
    msg_size: usize,
}

impl PosixQueue {
    /// Create the queue `name`, or open it if it already exists
    pub(crate) fn create(name: &str, capacity: usize) -> IpcResult<Self> {
        let attr = MqAttr::new(
            0,
            MAX_PENDING_MESSAGES as mq_attr_member_t,
            capacity as mq_attr_member_t,
            0,
        );
        let (mqd, created) = match mq_open(
            name,
            MQ_OFlag::O_CREAT | MQ_OFlag::O_EXCL | MQ_OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
            Some(&attr),
        ) {
            Ok(mqd) => (mqd, true),
            Err(Errno::EEXIST) => {
                tracing::debug!(name = %name, "Message queue exists, opening");
                let mqd = mq_open(name, MQ_OFlag::O_RDWR, Mode::empty(), None)
                    .map_err(|e| IpcError::unavailable(format!("mq_open {name}"), e))?;
                (mqd, false)
            }
            Err(e) => return Err(IpcError::unavailable(format!("mq_open {name}"), e)),
        };

        let msg_size = match mq_getattr(&mqd) {
            Ok(attr) => attr.msgsize() as usize,
            Err(e) => {
                abandon(mqd, name, created);
                return Err(IpcError::unavailable(format!("mq_getattr {name}"), e));
            }
        };

        tracing::debug!(name = %name, capacity, msg_size, created, "POSIX message queue ready");
        Ok(Self {
            mqd: Some(mqd),
            name: name.to_string(),
            capacity,
            msg_size,
        })
    }

    fn mqd(&self) -> IpcResult<&MqdT> {
        self.mqd
            .as_ref()
            .ok_or_else(|| IpcError::invalid(format!("message queue {} is closed", self.name)))
    }
}

/// Release a queue that failed setup
///
/// Closes the descriptor first. The name is unlinked only if this call created
/// the queue; an attached queue belongs to someone else.
fn abandon(mqd: MqdT, name: &str, created: bool) {
    if let Err(e) = mq_close(mqd) {
        tracing::warn!(name = %name, error = %e, "mq_close failed");
    }
    if created {
        if let Err(e) = mq_unlink(name) {
            tracing::warn!(name = %name, error = %e, "mq_unlink failed");
        }
    }
}

impl Transport for PosixQueue {
    fn send(&mut self, data: &[u8]) -> IpcResult<usize> {
        if data.len() > self.capacity {
            return Err(IpcError::invalid(format!(
                "{} bytes exceeds message capacity of {}",
                data.len(),
                self.capacity
            )));
        }
        mq_send(self.mqd()?, data, 0)?;
        Ok(data.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> IpcResult<usize> {
        if buf.len() < self.msg_size {
            return Err(IpcError::invalid(format!(
                "receive buffer of {} bytes is smaller than the queue message size {}",
                buf.len(),
                self.msg_size
            )));
        }
        let mut priority = 0u32;
        Ok(mq_receive(self.mqd()?, buf, &mut priority)?)
    }

    fn backing_name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

impl Drop for PosixQueue {
    fn drop(&mut self) {
        if let Some(mqd) = self.mqd.take() {
            if let Err(e) = mq_close(mqd) {
                tracing::warn!(name = %self.name, error = %e, "mq_close failed");
            }
        }
        match mq_unlink(self.name.as_str()) {
            Ok(()) => tracing::debug!(name = %self.name, "Unlinked message queue"),
            Err(Errno::ENOENT) => {}
            Err(e) => tracing::warn!(name = %self.name, error = %e, "mq_unlink failed"),
        }
    }
}
