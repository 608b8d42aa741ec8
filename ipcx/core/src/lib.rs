//! ipcx Core - Uniform Cross-Process Channels
//!
//! One handle type, [`Channel`], over seven kernel IPC mechanisms. Callers
//! pick a [`Mechanism`] in a [`ChannelConfig`] and then use the same
//! `send` / `recv` / `close` calls whichever mechanism sits underneath.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Callers                                │
//! │        ipcx-demo, integration tests, your processes              │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ ChannelConfig
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                        IPCX CORE                                 │
//! │  ┌────────────────────────────┴───────────────────────────────┐  │
//! │  │                 Channel (dispatch + lifecycle)             │  │
//! │  └──┬─────────┬─────────┬─────────┬─────────┬─────────┬───────┘  │
//! │  ┌──┴───┐ ┌───┴───┐ ┌───┴───┐ ┌───┴───┐ ┌───┴───┐ ┌───┴────┐     │
//! │  │ shm  │ │ POSIX │ │ SysV  │ │ pipe  │ │ FIFO  │ │ unix / │     │
//! │  │+mutex│ │  mq   │ │  mq   │ │       │ │       │ │  tcp   │     │
//! │  └──┬───┘ └───────┘ └───────┘ └───────┘ └───────┘ └────────┘     │
//! │  ┌──┴─────────────────────────────────────────────────────────┐  │
//! │  │   sync: ProcessMutex, Semaphore, shared segments           │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use ipcx_core::{Channel, ChannelConfig};
//!
//! # fn main() -> Result<(), ipcx_core::IpcError> {
//! let mut channel = Channel::create(&ChannelConfig::shm("/myshm", 1024))?;
//! channel.send(b"hello")?;
//!
//! let mut buf = [0u8; 5];
//! channel.recv(&mut buf)?;
//! channel.close();
//! # Ok(())
//! # }
//! ```
//!
//! # Module Overview
//!
//! - [`config`]: mechanism selection, environment and TOML configuration
//! - [`error`]: the [`IpcError`] type
//! - [`sync`]: process-shared mutex and counting semaphore
//!
//! # Resource Lifecycle
//!
//! Every kernel object is released exactly once: channels by
//! [`Channel::close`] or drop, primitives by drop in the process that created
//! them. Names are recorded at creation and reused verbatim at teardown.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod channel;
pub mod config;
pub mod error;
pub mod sync;
mod transport;

pub use channel::Channel;
pub use config::{
    default_config_path, load_config, load_config_from_path, ChannelConfig, ConfigError,
    ConfigFile, Mechanism, DEFAULT_CAPACITY,
};
pub use error::{IpcError, IpcResult};
pub use sync::{ProcessMutex, ProcessMutexGuard, Semaphore, MUTEX_FOOTPRINT};
pub use transport::MAX_PENDING_MESSAGES;
