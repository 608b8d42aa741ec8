//! Channel Configuration
//!
//! Configuration types for selecting and configuring a channel mechanism.
//!
//! A [`ChannelConfig`] is an immutable description of intent. It is consumed
//! once by [`Channel::create`](crate::Channel::create) and never consulted
//! again; backends copy whatever they need for teardown (usually the name).
//!
//! # Sources
//!
//! - Constructors such as [`ChannelConfig::shm`] for programmatic use
//! - [`ChannelConfig::from_env`] for `IPCX_*` environment variables
//! - [`load_config`] / [`load_config_from_path`] for a TOML file

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{IpcError, IpcResult};

/// Default buffer/message capacity in bytes
pub const DEFAULT_CAPACITY: u32 = 1024;

/// Transport mechanism selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mechanism {
    /// Named shared-memory segment guarded by an embedded process-shared mutex
    #[default]
    #[serde(alias = "shm")]
    ShmMutex,

    /// POSIX message queue (`mq_open`); Linux only
    #[serde(alias = "posix-mq")]
    PosixQueue,

    /// System V message queue (`msgget`); Linux only
    ///
    /// The configured name must be an existing path, it feeds `ftok`.
    #[serde(alias = "sysv-mq")]
    SysvQueue,

    /// Anonymous pipe; shared with children through `fork`
    #[serde(alias = "pipe")]
    UnnamedPipe,

    /// FIFO special file at the configured path
    #[serde(alias = "fifo")]
    NamedPipe,

    /// Unix domain stream socket listening at the configured path
    #[serde(alias = "unix")]
    UnixSocket,

    /// TCP stream socket listening on the configured port
    #[serde(alias = "tcp")]
    TcpSocket,
}

impl Mechanism {
    /// Every mechanism, in declaration order
    pub const ALL: [Mechanism; 7] = [
        Mechanism::ShmMutex,
        Mechanism::PosixQueue,
        Mechanism::SysvQueue,
        Mechanism::UnnamedPipe,
        Mechanism::NamedPipe,
        Mechanism::UnixSocket,
        Mechanism::TcpSocket,
    ];

    /// Canonical kebab-case name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ShmMutex => "shm-mutex",
            Self::PosixQueue => "posix-queue",
            Self::SysvQueue => "sysv-queue",
            Self::UnnamedPipe => "unnamed-pipe",
            Self::NamedPipe => "named-pipe",
            Self::UnixSocket => "unix-socket",
            Self::TcpSocket => "tcp-socket",
        }
    }

    /// Whether this mechanism can be created on the current platform
    #[must_use]
    pub fn is_supported(self) -> bool {
        match self {
            Self::PosixQueue | Self::SysvQueue => cfg!(target_os = "linux"),
            _ => true,
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mechanism {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "shm-mutex" | "shm" | "shared-memory" => Ok(Self::ShmMutex),
            "posix-queue" | "posix-mq" | "mq-posix" | "mq" => Ok(Self::PosixQueue),
            "sysv-queue" | "sysv-mq" | "mq-sysv" | "sysv" => Ok(Self::SysvQueue),
            "unnamed-pipe" | "pipe" => Ok(Self::UnnamedPipe),
            "named-pipe" | "fifo" => Ok(Self::NamedPipe),
            "unix-socket" | "unix" | "socket" => Ok(Self::UnixSocket),
            "tcp-socket" | "tcp" => Ok(Self::TcpSocket),
            _ => Err(ConfigError::UnknownMechanism(s.to_string())),
        }
    }
}

/// Channel configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Which mechanism to use
    pub mechanism: Mechanism,

    /// Kernel-namespace or filesystem name of the resource
    ///
    /// Shared memory and POSIX queues want `/name`; pipes and sockets want a
    /// filesystem path; System V queues want an existing path for `ftok`.
    /// Not used by unnamed pipes.
    pub name: Option<String>,

    /// Buffer size (shared memory) or maximum message size (queues), in bytes
    pub capacity: u32,

    /// Listen port for TCP sockets (0 = ephemeral)
    pub port: u16,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            mechanism: Mechanism::default(),
            name: None,
            capacity: DEFAULT_CAPACITY,
            port: 0,
        }
    }
}

impl ChannelConfig {
    /// Configuration for an arbitrary mechanism
    pub fn new(mechanism: Mechanism, name: impl Into<String>, capacity: u32) -> Self {
        Self {
            mechanism,
            name: Some(name.into()),
            capacity,
            port: 0,
        }
    }

    /// Shared memory + mutex channel named `name` (e.g. `/myshm`)
    pub fn shm(name: impl Into<String>, capacity: u32) -> Self {
        Self::new(Mechanism::ShmMutex, name, capacity)
    }

    /// POSIX message queue named `name` (e.g. `/myqueue`)
    pub fn posix_queue(name: impl Into<String>, capacity: u32) -> Self {
        Self::new(Mechanism::PosixQueue, name, capacity)
    }

    /// System V message queue keyed from the existing path `path`
    pub fn sysv_queue(path: impl AsRef<Path>, capacity: u32) -> Self {
        Self::new(Mechanism::SysvQueue, path_string(path.as_ref()), capacity)
    }

    /// Anonymous pipe; `label` only identifies it in logs
    pub fn unnamed_pipe(label: impl Into<String>, capacity: u32) -> Self {
        Self::new(Mechanism::UnnamedPipe, label, capacity)
    }

    /// FIFO at `path`
    pub fn named_pipe(path: impl AsRef<Path>, capacity: u32) -> Self {
        Self::new(Mechanism::NamedPipe, path_string(path.as_ref()), capacity)
    }

    /// Unix domain socket listening at `path`
    pub fn unix_socket(path: impl AsRef<Path>, capacity: u32) -> Self {
        Self::new(Mechanism::UnixSocket, path_string(path.as_ref()), capacity)
    }

    /// TCP socket listening on `port`; `label` only identifies it in logs
    pub fn tcp(label: impl Into<String>, port: u16, capacity: u32) -> Self {
        Self {
            port,
            ..Self::new(Mechanism::TcpSocket, label, capacity)
        }
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `IPCX_MECHANISM`: any name accepted by [`Mechanism::from_str`]
    /// - `IPCX_NAME`: resource name or path
    /// - `IPCX_CAPACITY`: capacity in bytes
    /// - `IPCX_PORT`: TCP port
    ///
    /// Unset or unparseable variables fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            mechanism: std::env::var("IPCX_MECHANISM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.mechanism),
            name: std::env::var("IPCX_NAME").ok().or(defaults.name),
            capacity: std::env::var("IPCX_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.capacity),
            port: std::env::var("IPCX_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
        }
    }

    /// Replace the name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replace the capacity
    #[must_use]
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Replace the port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Check the invariants every mechanism relies on
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the capacity is zero or no non-empty name is
    /// configured. Every mechanism needs a name, even those that only use it
    /// as a label.
    pub fn validate(&self) -> IpcResult<()> {
        if self.capacity == 0 {
            return Err(IpcError::invalid(format!(
                "{}: capacity must be greater than zero",
                self.mechanism
            )));
        }
        if self.name.as_deref().map_or(true, str::is_empty) {
            return Err(IpcError::invalid(format!(
                "{}: a non-empty name is required",
                self.mechanism
            )));
        }
        Ok(())
    }

    /// The configured name, or `InvalidArgument` if absent
    pub(crate) fn required_name(&self) -> IpcResult<&str> {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| IpcError::invalid(format!("{}: name is required", self.mechanism)))
    }

    /// Capacity as a `usize`
    #[must_use]
    pub fn capacity_bytes(&self) -> usize {
        self.capacity as usize
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// =============================================================================
// Config file
// =============================================================================

/// Errors from loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the file failed
    #[error("Failed to read config {path:?}: {source}")]
    Io {
        /// File that was being read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`ConfigFile`]
    #[error("Failed to parse config {path:?}: {source}")]
    Parse {
        /// File that was being parsed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },

    /// A mechanism string did not match any known mechanism
    #[error("Unknown mechanism: {0}")]
    UnknownMechanism(String),
}

/// On-disk configuration layout
///
/// ```toml
/// [channel]
/// mechanism = "shm-mutex"
/// name = "/myshm"
/// capacity = 1024
/// port = 0
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Channel settings
    pub channel: ChannelConfig,
}

/// Default config file location: `$XDG_CONFIG_HOME/ipcx/config.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ipcx").join("config.toml"))
}

/// Load the config file at `path`
///
/// # Errors
///
/// `ConfigError::Io` if the file cannot be read, `ConfigError::Parse` if it is
/// not valid.
pub fn load_config_from_path(path: &Path) -> Result<ConfigFile, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the config file from [`default_config_path`]
///
/// A missing file yields the defaults.
///
/// # Errors
///
/// Same as [`load_config_from_path`] for a file that exists.
pub fn load_config() -> Result<ConfigFile, ConfigError> {
    match default_config_path() {
        Some(path) if path.exists() => {
            tracing::debug!(path = ?path, "Loading config file");
            load_config_from_path(&path)
        }
        _ => Ok(ConfigFile::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ChannelConfig::default();
        assert_eq!(config.mechanism, Mechanism::ShmMutex);
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert!(config.name.is_none());
    }

    #[test]
    fn test_mechanism_parse_aliases() {
        assert_eq!("shm".parse::<Mechanism>().unwrap(), Mechanism::ShmMutex);
        assert_eq!("POSIX_MQ".parse::<Mechanism>().unwrap(), Mechanism::PosixQueue);
        assert_eq!("fifo".parse::<Mechanism>().unwrap(), Mechanism::NamedPipe);
        assert_eq!("tcp".parse::<Mechanism>().unwrap(), Mechanism::TcpSocket);
        assert!(matches!(
            "carrier-pigeon".parse::<Mechanism>(),
            Err(ConfigError::UnknownMechanism(_))
        ));
    }

    #[test]
    fn test_mechanism_display_round_trips() {
        for mech in Mechanism::ALL {
            assert_eq!(mech.to_string().parse::<Mechanism>().unwrap(), mech);
        }
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let err = ChannelConfig::shm("/x", 0).validate().unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_validate_rejects_missing_or_empty_name() {
        for mech in Mechanism::ALL {
            let missing = ChannelConfig {
                mechanism: mech,
                ..Default::default()
            };
            assert!(missing.validate().unwrap_err().is_invalid_argument());

            let empty = ChannelConfig::new(mech, "", 16);
            assert!(empty.validate().unwrap_err().is_invalid_argument());
        }
    }

    #[test]
    fn test_unnamed_pipe_needs_a_label() {
        assert!(ChannelConfig::unnamed_pipe("anon", 64).validate().is_ok());

        let unlabeled = ChannelConfig {
            mechanism: Mechanism::UnnamedPipe,
            name: None,
            capacity: 64,
            port: 0,
        };
        assert!(unlabeled.validate().unwrap_err().is_invalid_argument());
        assert!(ChannelConfig::unnamed_pipe("", 64)
            .validate()
            .unwrap_err()
            .is_invalid_argument());
    }

    #[test]
    fn test_tcp_constructor_sets_port() {
        let config = ChannelConfig::tcp("svc", 9000, 512);
        assert_eq!(config.port, 9000);
        assert_eq!(config.mechanism, Mechanism::TcpSocket);
    }

    #[test]
    fn test_load_config_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[channel]\nmechanism = \"posix-queue\"\nname = \"/q\"\ncapacity = 256\n",
        )
        .unwrap();

        let file = load_config_from_path(&path).unwrap();
        assert_eq!(file.channel, ChannelConfig::posix_queue("/q", 256));
    }

    #[test]
    fn test_load_config_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[channel]\ncapacity = \"lots\"\n").unwrap();

        assert!(matches!(
            load_config_from_path(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config_from_path(Path::new("/nonexistent/ipcx/config.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_default_config_path_shape() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("ipcx/config.toml"));
        }
    }
}
