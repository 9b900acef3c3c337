//! camrelay server: entry point.
//!
//! ```text
//! camrelay-server                  Serve with camrelay-server.toml (or defaults)
//! camrelay-server --config <path>  Load a custom config TOML
//! camrelay-server --port <port>    Override the listening port
//! camrelay-server --gen-config     Write default config to stdout
//! ```
//!
//! The shared secret is read from `$CAMRELAY_SECRET` (the variable name is
//! configurable) or prompted for without echo.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use camrelay_core::{CredentialProvider, EnvCredential, FirstAvailable, PromptCredential};
use camrelay_server::config::{ServerConfig, SourceKind};
use camrelay_server::service::CamServer;
use camrelay_server::sources;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "camrelay-server", about = "camrelay webcam streaming server")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "camrelay-server.toml")]
    config: PathBuf,

    /// Listening port (overrides the config file).
    #[arg(short, long)]
    port: Option<u16>,

    /// Serve images from this directory instead of the test pattern.
    #[arg(long)]
    frames_dir: Option<PathBuf>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ServerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config; report a fallback once logging is up.
    let loaded = ServerConfig::read(&cli.config);
    let mut config = loaded.as_ref().cloned().unwrap_or_default();
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(dir) = cli.frames_dir {
        config.source.kind = SourceKind::Directory;
        config.source.directory = dir;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = &loaded {
        info!("{e}; using defaults");
    }

    info!("camrelay-server v{}", env!("CARGO_PKG_VERSION"));
    info!("port: {}", config.network.port);
    info!("source: {:?}", config.source.kind);

    // Shared secret, asked for once.
    let credentials = FirstAvailable::new(vec![
        Box::new(EnvCredential::new(config.auth.secret_env.clone())),
        Box::new(PromptCredential::default()),
    ]);
    let secret = credentials.get_secret()?;

    let mut server = CamServer::new(&config, sources::from_config(&config), secret)?;
    if let Err(e) = server.start().await {
        error!("could not start: {e}");
        return Err(e.into());
    }

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");
    server.stop().await;

    Ok(())
}
