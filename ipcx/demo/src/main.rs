//! ipcx Demo - Fork-Based Channel Samples
//!
//! Two small programs built on `ipcx-core`:
//!
//! - `handoff`: the parent sends one message through a channel, posts a
//!   semaphore, and the forked child waits, receives and prints it
//! - `counter`: parent and child increment a counter kept in a shared-memory
//!   channel, serialized by a process-shared mutex
//!
//! # Usage
//!
//! ```bash
//! # Shared memory handoff with the defaults
//! ipcx-demo handoff
//!
//! # Same flow over a POSIX message queue
//! ipcx-demo handoff --mechanism posix-queue --name /ipcx-demo-q
//!
//! # Mutex-protected counter, 10k rounds per process
//! ipcx-demo counter --rounds 10000
//!
//! # Verbose logging
//! RUST_LOG=debug ipcx-demo handoff
//! ```
//!
//! # Environment Variables
//!
//! - `IPCX_CONFIG`: TOML config file (default: `$XDG_CONFIG_HOME/ipcx/config.toml`)
//! - `IPCX_MECHANISM`, `IPCX_NAME`, `IPCX_CAPACITY`: channel overrides
//! - `IPCX_LOG_LEVEL`: log level when `RUST_LOG` is unset
//! - `RUST_LOG`: full tracing filter

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use tracing::{error, info, warn};

use ipcx_core::{
    load_config, load_config_from_path, Channel, ChannelConfig, Mechanism, ProcessMutex,
    Semaphore,
};

/// ipcx Demo - cross-process channel samples
#[derive(Parser, Debug)]
#[command(name = "ipcx-demo")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "IPCX_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "IPCX_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one message from parent to child, gated by a semaphore
    Handoff {
        /// Mechanism to use (any stream socket is rejected)
        #[arg(short = 'm', long, env = "IPCX_MECHANISM")]
        mechanism: Option<Mechanism>,

        /// Resource name or path
        #[arg(short = 'n', long, env = "IPCX_NAME")]
        name: Option<String>,

        /// Channel capacity in bytes
        #[arg(long, env = "IPCX_CAPACITY")]
        capacity: Option<u32>,

        /// Text to send; a trailing NUL is appended
        #[arg(long, default_value = "Hello, Shared Memory!")]
        message: String,
    },

    /// Increment a shared counter from two processes under a mutex
    Counter {
        /// Shared-memory name for the counter
        #[arg(short = 'n', long, env = "IPCX_NAME")]
        name: Option<String>,

        /// Increments per process
        #[arg(short = 'r', long, default_value_t = 1000)]
        rounds: u64,
    },
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("ipcx_demo={level},ipcx_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Base channel settings from the config file
fn base_config(path: Option<&PathBuf>) -> Result<ChannelConfig> {
    let file = match path {
        Some(path) => load_config_from_path(path)
            .with_context(|| format!("Failed to load config file: {path:?}"))?,
        None => load_config().context("Failed to load default config file")?,
    };
    Ok(file.channel)
}

/// A name that suits `mechanism` when none was configured
///
/// For System V queues this also creates the `ftok` key file; the returned
/// [`KeyFile`] removes it again.
fn default_name(mechanism: Mechanism) -> Result<(String, Option<KeyFile>)> {
    let pid = std::process::id();
    let tmp = std::env::temp_dir();
    let name = match mechanism {
        Mechanism::ShmMutex | Mechanism::PosixQueue => format!("/ipcx-demo-{pid}"),
        Mechanism::SysvQueue => {
            // ftok needs an existing file.
            let key = tmp.join(format!("ipcx-demo-{pid}.key"));
            std::fs::File::create(&key)
                .with_context(|| format!("Failed to create key file: {key:?}"))?;
            return Ok((key.to_string_lossy().into_owned(), Some(KeyFile(key))));
        }
        Mechanism::NamedPipe => {
            let fifo = tmp.join(format!("ipcx-demo-{pid}.fifo"));
            fifo.to_string_lossy().into_owned()
        }
        Mechanism::UnnamedPipe => format!("ipcx-demo-pipe-{pid}"),
        Mechanism::UnixSocket | Mechanism::TcpSocket => {
            bail!("{mechanism} has no default name")
        }
    };
    Ok((name, None))
}

/// Temporary `ftok` key file, removed on drop
#[derive(Debug)]
struct KeyFile(PathBuf);

impl Drop for KeyFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            warn!(path = ?self.0, error = %e, "Failed to remove key file");
        }
    }
}

/// Fork, run `child` in the new process and exit with its status
fn spawn_child<F: FnOnce() -> Result<()>>(child: F) -> Result<Pid> {
    // SAFETY: the child runs `child` and leaves through `_exit`.
    match unsafe { fork() }.context("fork failed")? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => {
            let code = match child() {
                Ok(()) => 0,
                Err(e) => {
                    error!(error = %e, "Child failed");
                    1
                }
            };
            let _ = std::io::stdout().flush();
            // SAFETY: skip destructors so inherited handles are released only
            // by the parent.
            unsafe { libc::_exit(code) }
        }
    }
}

/// Wait for `pid` and turn a failed exit into an error
fn wait_child(pid: Pid) -> Result<()> {
    match waitpid(pid, None).context("waitpid failed")? {
        WaitStatus::Exited(_, 0) => Ok(()),
        WaitStatus::Exited(_, code) => bail!("child {pid} exited with status {code}"),
        other => bail!("child {pid} ended abnormally: {other:?}"),
    }
}

fn handoff(
    mut config: ChannelConfig,
    mechanism: Option<Mechanism>,
    name: Option<String>,
    capacity: Option<u32>,
    message: &str,
) -> Result<()> {
    if let Some(mechanism) = mechanism {
        config.mechanism = mechanism;
    }
    if let Some(capacity) = capacity {
        config.capacity = capacity;
    }
    if matches!(config.mechanism, Mechanism::UnixSocket | Mechanism::TcpSocket) {
        bail!(
            "{} needs a connecting peer and cannot run the handoff demo",
            config.mechanism
        );
    }
    // Declared before the channel so a key file outlives the queue it keys.
    let (name, key_file) = match name.or(config.name.take()) {
        Some(name) => (name, None),
        None => default_name(config.mechanism)?,
    };
    config.name = Some(name);

    let mut payload = message.as_bytes().to_vec();
    payload.push(0);

    info!(
        mechanism = %config.mechanism,
        name = config.name.as_deref().unwrap_or("-"),
        capacity = config.capacity,
        bytes = payload.len(),
        "Starting handoff"
    );

    let ready = Semaphore::create(0).context("Failed to create semaphore")?;
    let mut channel = Channel::create(&config)
        .with_context(|| format!("Failed to create {} channel", config.mechanism))?;

    // Shared memory copies exactly the buffer length; queues want a full
    // message-sized buffer.
    let recv_len = match config.mechanism {
        Mechanism::ShmMutex => payload.len(),
        _ => channel.capacity(),
    };

    let pid = spawn_child(|| {
        ready.wait()?;
        let mut buf = vec![0u8; recv_len];
        let n = channel.recv(&mut buf)?;
        let text = String::from_utf8_lossy(&buf[..n]);
        println!("Child received: {}", text.trim_end_matches('\0'));
        Ok(())
    })?;

    let sent = channel.send(&payload).context("send failed")?;
    info!(bytes = sent, "Parent sent message");
    ready.post()?;

    wait_child(pid)?;
    channel.close();
    drop(key_file);
    info!("Handoff complete");
    Ok(())
}

fn counter(name: Option<String>, rounds: u64) -> Result<()> {
    let name = name.unwrap_or_else(|| format!("/ipcx-demo-counter-{}", std::process::id()));
    let mutex = ProcessMutex::create().context("Failed to create mutex")?;
    let mut channel = Channel::create(&ChannelConfig::shm(&name, 8))
        .with_context(|| format!("Failed to create counter segment {name}"))?;
    channel.send(&0u64.to_ne_bytes())?;

    let bump = |channel: &mut Channel| -> Result<()> {
        for _ in 0..rounds {
            let guard = mutex.lock()?;
            let mut buf = [0u8; 8];
            channel.recv(&mut buf)?;
            channel.send(&(u64::from_ne_bytes(buf) + 1).to_ne_bytes())?;
            guard.unlock()?;
        }
        Ok(())
    };

    info!(name = %name, rounds, "Starting counter");
    let pid = spawn_child(|| bump(&mut channel))?;
    bump(&mut channel)?;
    wait_child(pid)?;

    let mut buf = [0u8; 8];
    channel.recv(&mut buf)?;
    let total = u64::from_ne_bytes(buf);
    println!("Final counter: {total} (expected {})", 2 * rounds);
    if total != 2 * rounds {
        warn!(total, expected = 2 * rounds, "Lost updates");
        bail!("counter lost updates: {total} != {}", 2 * rounds);
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("ipcx demo starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());

    let result = match args.command {
        Command::Handoff {
            mechanism,
            name,
            capacity,
            message,
        } => {
            let config = base_config(args.config.as_ref())?;
            handoff(config, mechanism, name, capacity, &message)
        }
        Command::Counter { name, rounds } => counter(name, rounds),
    };

    if let Err(e) = &result {
        error!(error = %e, "Demo failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_handoff() {
        let args = Args::try_parse_from([
            "ipcx-demo",
            "handoff",
            "--mechanism",
            "fifo",
            "--capacity",
            "64",
        ])
        .unwrap();
        match args.command {
            Command::Handoff {
                mechanism,
                capacity,
                ..
            } => {
                assert_eq!(mechanism, Some(Mechanism::NamedPipe));
                assert_eq!(capacity, Some(64));
            }
            Command::Counter { .. } => panic!("expected handoff"),
        }
    }

    #[test]
    fn test_args_reject_unknown_mechanism() {
        assert!(Args::try_parse_from(["ipcx-demo", "handoff", "-m", "smoke-signals"]).is_err());
    }

    #[test]
    fn test_default_names() {
        let (shm, key) = default_name(Mechanism::ShmMutex).unwrap();
        assert!(shm.starts_with("/ipcx-demo-"));
        assert!(key.is_none());

        let (pipe, _) = default_name(Mechanism::UnnamedPipe).unwrap();
        assert!(!pipe.is_empty());
        assert!(default_name(Mechanism::TcpSocket).is_err());
    }

    #[test]
    fn test_sysv_key_file_removed_on_drop() {
        let (name, key) = default_name(Mechanism::SysvQueue).unwrap();
        let path = PathBuf::from(&name);
        assert!(path.exists());

        drop(key);
        assert!(!path.exists());
    }

    #[test]
    fn test_base_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[channel]\nmechanism = \"pipe\"\ncapacity = 128\n").unwrap();

        let config = base_config(Some(&path)).unwrap();
        assert_eq!(config.mechanism, Mechanism::UnnamedPipe);
        assert_eq!(config.capacity, 128);
    }

    #[test]
    fn test_handoff_over_unnamed_pipe() {
        handoff(
            ChannelConfig {
                mechanism: Mechanism::UnnamedPipe,
                capacity: 64,
                ..ChannelConfig::default()
            },
            None,
            None,
            None,
            "piped",
        )
        .unwrap();
    }
}
