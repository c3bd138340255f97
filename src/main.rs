use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ratewindow::clock::{Clock, SystemClock};
use ratewindow::config::ServiceConfig;
use ratewindow::http::HttpServer;
use ratewindow::ratelimit::WindowLimiter;
use ratewindow::store::MemoryStore;

/// Per-client fixed-window rate limiting service.
#[derive(Parser, Debug)]
#[command(name = "ratewindow", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Requests admitted per client per window
    #[arg(long)]
    limit: Option<u64>,

    /// Window length in seconds
    #[arg(long)]
    window_secs: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl Args {
    /// Load the configuration file, if any, and apply command line overrides.
    fn load_config(&self) -> anyhow::Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::from_file(path)?,
            None => ServiceConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.server.listen_addr = listen;
        }
        if let Some(limit) = self.limit {
            config.limiter.limit = limit;
        }
        if let Some(window_secs) = self.window_secs {
            config.limiter.window_secs = window_secs;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);
    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting Ratewindow Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = args.load_config()?;
    info!(
        listen_addr = %config.server.listen_addr,
        window_secs = config.limiter.window_secs,
        limit = config.limiter.limit,
        "Configuration loaded"
    );

    // One clock for both the store's TTLs and the limiter's windows
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let janitor = store.spawn_janitor(config.store.cleanup_interval());

    let limiter = Arc::new(WindowLimiter::with_clock(
        config.limiter.window(),
        config.limiter.limit,
        store,
        clock,
    ));
    info!("Rate limiter initialized");

    let server = HttpServer::new(
        config.server.listen_addr,
        limiter,
        config.server.trust_proxy_headers,
    );

    // Run the server with graceful shutdown on Ctrl+C
    let result = server.serve_with_shutdown(shutdown_signal()).await;
    janitor.abort();
    result?;

    info!("Ratewindow Rate Limiting Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FILE_CONFIG: &str = r#"
server:
  listen_addr: "127.0.0.1:9000"
limiter:
  window_secs: 10
  limit: 5
"#;

    fn config_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(FILE_CONFIG.as_bytes()).unwrap();
        file
    }

    fn args(extra: &[&str]) -> Args {
        Args::parse_from(["ratewindow"].iter().chain(extra))
    }

    #[test]
    fn test_no_flags_uses_defaults() {
        let config = args(&[]).load_config().unwrap();
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn test_file_values_used_without_flags() {
        let file = config_file();
        let path = file.path().to_str().unwrap();

        let config = args(&["--config", path]).load_config().unwrap();
        assert_eq!(config.server.listen_addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.limiter.window_secs, 10);
        assert_eq!(config.limiter.limit, 5);
    }

    #[test]
    fn test_flags_override_file_values() {
        let file = config_file();
        let path = file.path().to_str().unwrap();

        let config = args(&[
            "--config",
            path,
            "--listen",
            "127.0.0.1:7000",
            "--limit",
            "100",
            "--window-secs",
            "30",
        ])
        .load_config()
        .unwrap();

        assert_eq!(config.server.listen_addr, "127.0.0.1:7000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.limiter.limit, 100);
        assert_eq!(config.limiter.window_secs, 30);
        // Untouched by flags
        assert!(config.server.trust_proxy_headers);
    }

    #[test]
    fn test_overrides_are_validated() {
        let file = config_file();
        let path = file.path().to_str().unwrap();

        assert!(args(&["--config", path, "--limit", "0"]).load_config().is_err());
        assert!(args(&["--window-secs", "0"]).load_config().is_err());
    }
}
