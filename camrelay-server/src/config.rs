//! Configuration for the camrelay server.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use camrelay_core::codec::DEFAULT_MAX_FRAME_LEN;
use camrelay_core::{
    AcceptorConfig, CamError, ConnectionConfig, DEFAULT_PORT, ProducerConfig, RelayConfig,
};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening socket and transport limits.
    pub network: NetworkConfig,
    /// Handshake settings.
    pub auth: AuthConfig,
    /// Frame relay settings.
    pub relay: RelaySettings,
    /// Where frames come from.
    pub source: SourceConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind (`0.0.0.0` for all interfaces).
    pub bind_address: String,
    /// TCP port for viewers.
    pub port: u16,
    /// Listen backlog.
    pub backlog: u32,
    /// How often the accept loop re-checks for shutdown, in milliseconds.
    pub accept_poll_ms: u64,
    /// Maximum concurrent viewers; 0 means unlimited.
    pub max_connections: usize,
    /// Largest message accepted or sent, in bytes.
    pub max_frame_bytes: usize,
    /// Deadline for writing one message, in milliseconds.
    pub write_timeout_ms: u64,
}

/// Handshake configuration. The secret itself is never stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// How long a viewer has to answer the challenge, in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Environment variable holding the shared secret. If unset, the
    /// server prompts for it.
    pub secret_env: String,
}

/// Relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// How often each viewer's relay checks for a new frame, in milliseconds.
    pub poll_interval_ms: u64,
}

/// Which frame source to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Synthetic moving test pattern.
    Pattern,
    /// Cycle through the image files in a directory.
    Directory,
}

/// Frame source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Time between captures, in milliseconds.
    pub interval_ms: u64,
    /// Test pattern width in pixels.
    pub width: u32,
    /// Test pattern height in pixels.
    pub height: u32,
    /// Image directory for the `directory` source.
    pub directory: PathBuf,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive, overridden by `RUST_LOG`.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            backlog: 5,
            accept_poll_ms: 1000,
            max_connections: 0,
            max_frame_bytes: DEFAULT_MAX_FRAME_LEN,
            write_timeout_ms: 30_000,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 30_000,
            secret_env: "CAMRELAY_SECRET".into(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Pattern,
            interval_ms: 700,
            width: 320,
            height: 240,
            directory: PathBuf::from("frames"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ServerConfig {
    /// Read and parse a TOML file.
    pub fn read(path: &Path) -> Result<Self, CamError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CamError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&contents)
            .map_err(|e| CamError::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        Self::read(path).unwrap_or_else(|e| {
            tracing::warn!("{e}; using defaults");
            Self::default()
        })
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> Result<(), CamError> {
        let text = toml::to_string_pretty(&Self::default())
            .map_err(|e| CamError::Config(e.to_string()))?;
        std::fs::write(path, text)
            .map_err(|e| CamError::Config(format!("cannot write {}: {e}", path.display())))
    }

    /// Convert network settings into an [`AcceptorConfig`].
    pub fn to_acceptor_config(&self) -> Result<AcceptorConfig, CamError> {
        let bind_address: IpAddr = self.network.bind_address.parse().map_err(|_| {
            CamError::Config(format!(
                "bind_address {:?} is not an IP address",
                self.network.bind_address
            ))
        })?;
        Ok(AcceptorConfig {
            bind_address,
            port: self.network.port,
            backlog: self.network.backlog.max(1),
            poll_interval: Duration::from_millis(self.network.accept_poll_ms.clamp(10, 5_000)),
            max_connections: self.network.max_connections,
            connection: self.to_connection_config(),
        })
    }

    pub fn to_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_frame_len: self.network.max_frame_bytes.max(1024),
            write_timeout: Duration::from_millis(self.network.write_timeout_ms.max(100)),
        }
    }

    pub fn to_relay_config(&self) -> RelayConfig {
        RelayConfig {
            poll_interval: Duration::from_millis(self.relay.poll_interval_ms.max(1)),
            handshake_timeout: Duration::from_millis(self.auth.handshake_timeout_ms.max(100)),
        }
    }

    pub fn to_producer_config(&self) -> ProducerConfig {
        ProducerConfig {
            interval: Duration::from_millis(self.source.interval_ms.max(10)),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
