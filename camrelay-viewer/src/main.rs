//! camrelay viewer: entry point.
//!
//! ```text
//! camrelay-viewer                    Connect using camrelay-viewer.toml (or defaults)
//! camrelay-viewer --server <addr>    Override the server address
//! camrelay-viewer --output <dir>     Override the output directory
//! camrelay-viewer --gen-config       Write default config to stdout
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use camrelay_core::{
    CamError, CredentialProvider, EnvCredential, FirstAvailable, PromptCredential,
    StreamClient, StreamEnd,
};
use camrelay_viewer::config::ViewerConfig;
use camrelay_viewer::sink::DirectorySink;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "camrelay-viewer", about = "camrelay webcam stream viewer")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "camrelay-viewer.toml")]
    config: PathBuf,

    /// Server address (`host:port`).
    #[arg(short, long)]
    server: Option<String>,

    /// Directory to write frames into.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Keep every frame, not only the latest.
    #[arg(long)]
    keep_history: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ViewerConfig::default())?;
        println!("{text}");
        return Ok(ExitCode::SUCCESS);
    }

    let loaded = ViewerConfig::read(&cli.config);
    let mut config = loaded.as_ref().cloned().unwrap_or_default();
    if let Some(addr) = cli.server {
        config.network.server_address = addr;
    }
    if let Some(dir) = cli.output {
        config.output.directory = dir;
    }
    config.output.keep_history |= cli.keep_history;

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = &loaded {
        info!("{e}; using defaults");
    }
    info!("camrelay-viewer v{}", env!("CARGO_PKG_VERSION"));

    let credentials = FirstAvailable::new(vec![
        Box::new(EnvCredential::new(config.auth.secret_env.clone())),
        Box::new(PromptCredential::default()),
    ]);
    let secret = credentials.get_secret()?;

    let mut sink = DirectorySink::create(&config.output.directory, config.output.keep_history)?;
    info!("writing frames to {}", config.output.directory.display());

    // ── 1. Connect and log in ───────────────────────────────────

    let address = config.network.server_address.clone();
    let mut client = match StreamClient::connect(&address, config.to_client_config()).await {
        Ok(client) => client,
        Err(e) => {
            error!("could not connect to {address}: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    match client.login(&secret).await {
        Ok(()) => {}
        Err(CamError::AuthFailed) => {
            error!("login refused: wrong password");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => {
            error!("login failed: {e}");
            return Ok(ExitCode::FAILURE);
        }
    }
    drop(secret);

    // ── 2. Stream until Ctrl-C or the server goes quiet ─────────

    let stop = client.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, disconnecting");
        stop.cancel();
    });

    let summary = client.stream(&mut sink).await;
    info!(
        frames = summary.frames_received,
        misses = summary.misses,
        display_errors = summary.display_errors,
        saved = sink.written(),
        "stream ended"
    );

    Ok(match summary.end {
        StreamEnd::Cancelled => ExitCode::SUCCESS,
        StreamEnd::MissLimit => {
            warn!("server stopped responding");
            ExitCode::FAILURE
        }
        StreamEnd::NotConnected => ExitCode::FAILURE,
    })
}
