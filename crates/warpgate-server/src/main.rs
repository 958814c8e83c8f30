//! Warpgate Server
//!
//! Accepts OpenAI-style and Anthropic-style chat requests and serves them
//! from the upstream chat service:
//! - `/v1/chat/completions` and `/v1/models` (OpenAI)
//! - `/v1/messages` (Anthropic)
//! - `/health` and `/metrics`
//!
//! Usage:
//! ```bash
//! # Direct egress, anonymous sessions
//! warpgate-server
//!
//! # Rotating WARP egress with registered accounts
//! WARP_PROXIES=socks5://127.0.0.1:40001,socks5://127.0.0.1:40002 \
//! WARP_CONTAINERS=warp1,warp2 USE_AUTH=true warpgate-server
//!
//! # With a config file (env vars override it, CLI flags override both)
//! warpgate-server --config warpgate.yaml --port 9000
//! ```
//!
//! Test with:
//! ```bash
//! curl http://localhost:8080/v1/chat/completions \
//!   -H "Content-Type: application/json" \
//!   -d '{"model": "gpt-5.2", "messages": [{"role": "user", "content": "Explain ownership"}], "stream": true}'
//! ```

mod app;
mod config;

use clap::Parser;
use config::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use warpgate_observability::{Metrics, init_logging};

const BANNER: &str = r#"
 __      __                              __
/  \    /  \_____ _____________   _____/  |_  ____
\   \/\/   /\__  \\_  __ \____ \ / ___\   __\/ __ \
 \        /  / __ \|  | \/  |_> > /_/  >  | \  ___/
  \__/\  /  (____  /__|  |   __/\___  /|__|  \___  >
       \/        \/      |__|  /_____/           \/
"#;

/// Warpgate - chat API translation gateway
#[derive(Parser)]
#[command(name = "warpgate-server", version)]
#[command(about = "OpenAI/Anthropic compatible gateway for a web chat upstream", long_about = None)]
#[command(before_help = BANNER)]
struct Cli {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, value_name = "FILE", env = "WARPGATE_CONFIG")]
    config: Option<String>,

    /// Listen port (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Upstream base URL (overrides BASE_URL)
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Enable debug logging (same as DEBUG=true)
    #[arg(long)]
    debug: bool,

    /// Use registered accounts instead of anonymous sessions (same as USE_AUTH=true)
    #[arg(long)]
    use_auth: bool,
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if self.debug {
            config.logging.debug = true;
        }
        if self.use_auth {
            config.use_auth = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    config.merge_env()?;
    cli.apply(&mut config);

    init_logging(&config.logging)?;

    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path);
    }
    log_startup(&config);

    let metrics = Arc::new(Metrics::new()?);
    let app = app::build_default_app(&config, metrics)?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Warpgate listening on http://{}", addr);
    info!("  OpenAI API:    http://{}/v1/chat/completions", addr);
    info!("  Anthropic API: http://{}/v1/messages", addr);
    info!("  Health check:  http://{}/health", addr);
    info!("  Metrics:       http://{}/metrics", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn log_startup(config: &ServerConfig) {
    info!("========================================");
    info!("Warpgate {} starting", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Listen port:   {}", config.port);
    info!("Upstream:      {}", config.base_url);
    info!("Egress:        {}", display_list(&config.proxies));
    info!("Containers:    {}", display_list(&config.containers));
    info!("Debug:         {}", config.logging.debug);
    info!(
        "Identity mode: {}",
        if config.use_auth { "registered" } else { "anonymous" }
    );
    info!("========================================");
}

fn display_list(value: &str) -> &str {
    if value.trim().is_empty() {
        "(none)"
    } else {
        value
    }
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "warpgate-server",
            "--port",
            "9999",
            "--base-url",
            "https://chat.example.test",
            "--debug",
        ]);
        let mut config = ServerConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.port, 9999);
        assert_eq!(config.base_url, "https://chat.example.test");
        assert!(config.logging.debug);
        assert!(!config.use_auth);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn test_display_list() {
        assert_eq!(display_list(""), "(none)");
        assert_eq!(display_list("a,b"), "a,b");
    }
}
