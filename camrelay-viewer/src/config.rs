//! Viewer configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use camrelay_core::codec::DEFAULT_MAX_FRAME_LEN;
use camrelay_core::{CamError, ClientConfig, ConnectionConfig, DEFAULT_PORT};

/// Top-level configuration for the viewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Stream behaviour.
    pub stream: StreamConfig,
    /// Secret lookup.
    pub auth: AuthConfig,
    /// Where frames are written.
    pub output: OutputConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server address (`host:port`).
    pub server_address: String,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Largest message accepted, in bytes.
    pub max_frame_bytes: usize,
    /// Deadline for writing one message, in milliseconds.
    pub write_timeout_ms: u64,
}

/// Stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Wait for one frame before counting a miss, in milliseconds.
    pub receive_timeout_ms: u64,
    /// Consecutive misses before giving up.
    pub max_misses: u32,
}

/// Secret lookup. The secret itself is never stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Environment variable holding the shared secret. If unset, the
    /// viewer prompts for it.
    pub secret_env: String,
    /// Handshake timeout in milliseconds.
    pub handshake_timeout_ms: u64,
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving `latest.<ext>`.
    pub directory: PathBuf,
    /// Also keep every frame as `frame-<seq>.<ext>`.
    pub keep_history: bool,
}

/// Logging.
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
            server_address: format!("127.0.0.1:{DEFAULT_PORT}"),
            connect_timeout_ms: 5_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_LEN,
            write_timeout_ms: 30_000,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: 30_000,
            max_misses: 3,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_env: "CAMRELAY_SECRET".into(),
            handshake_timeout_ms: 30_000,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("camrelay-frames"),
            keep_history: false,
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

impl ViewerConfig {
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

    /// Convert into the core client's settings.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_millis(self.network.connect_timeout_ms.max(100)),
            receive_timeout: Duration::from_millis(self.stream.receive_timeout_ms.max(100)),
            handshake_timeout: Duration::from_millis(self.auth.handshake_timeout_ms.max(100)),
            max_misses: self.stream.max_misses.max(1),
            connection: ConnectionConfig {
                max_frame_len: self.network.max_frame_bytes.max(1024),
                write_timeout: Duration::from_millis(self.network.write_timeout_ms.max(100)),
            },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
