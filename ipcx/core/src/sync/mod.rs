//! Process-Shared Synchronization Primitives
//!
//! Building blocks for coordinating independent processes:
//!
//! - [`ProcessMutex`]: mutual exclusion across processes
//! - [`Semaphore`]: counting semaphore for ready/consumed handshakes
//!
//! Both are independent of [`Channel`](crate::Channel). The shared-memory
//! channel only guarantees that a send and a receive never interleave at the
//! byte level; ordering between them is up to the caller:
//!
//! ```no_run
//! use ipcx_core::{Channel, ChannelConfig, Semaphore};
//!
//! # fn main() -> Result<(), ipcx_core::IpcError> {
//! let ready = Semaphore::create(0)?;
//! let mut channel = Channel::create(&ChannelConfig::shm("/demo", 1024))?;
//!
//! // writer
//! channel.send(b"Hello, Shared Memory!\0")?;
//! ready.post()?;
//!
//! // reader (normally another process)
//! ready.wait()?;
//! let mut buf = [0u8; 22];
//! channel.recv(&mut buf)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Naming
//!
//! Every primitive gets a fresh backing name built from the process id, a
//! per-process counter and a random suffix. Two live instances never share a
//! name, and teardown unlinks exactly the name recorded at creation.

use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) mod mutex;
pub(crate) mod segment;
mod semaphore;

pub use mutex::{ProcessMutex, ProcessMutexGuard, MUTEX_FOOTPRINT};
pub use segment::MAX_SHM_NAME_LEN;
pub use semaphore::Semaphore;

/// Generate a backing name unique to this instance
///
/// Format: `/ipcx-<tag>-<pid>-<counter>-<8 hex digits>`. Even with the widest
/// pid and counter that is 47 bytes plus the tag, well inside
/// [`MAX_SHM_NAME_LEN`]. Platforms with a 31-byte limit are not covered.
pub(crate) fn unique_name(tag: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    format_name(tag, std::process::id(), n, rand::random())
}

fn format_name(tag: &str, pid: u32, counter: u64, salt: [u8; 4]) -> String {
    format!("/ipcx-{tag}-{pid}-{counter}-{}", hex::encode(salt))
}
