//! Pingwatch - continuous reachability monitor.
//!
//! Probes a fixed set of endpoints on their own intervals, keeps every
//! outcome in memory, raises rate-limited alerts for unreachable endpoints
//! and serves the collected status over HTTP.

mod config;
mod dial;
mod logging;
mod monitor;
mod notify;
mod probe;
mod status;
mod track;
mod web;

use config::Config;
use logging::LogOptions;
use monitor::Monitor;
use notify::LogSink;
use probe::NetProber;
use web::Server;

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pingwatch", about = "Continuous reachability monitor", version)]
struct Cli {
    /// Configuration file.
    #[arg(long, default_value = "configs/default.json")]
    config: PathBuf,

    /// Log file. Defaults to logs/from-<date>.log.
    #[arg(long)]
    log: Option<PathBuf>,

    /// Address for the status web server.
    #[arg(long, default_value = "0.0.0.0:8080")]
    http: SocketAddr,

    /// Log to the console only.
    #[arg(long)]
    nolog: bool,

    /// Only log lines containing this text.
    #[arg(long)]
    logfilter: Option<String>,

    /// Stop after this many seconds (0 runs until interrupted).
    #[arg(long, default_value = "0")]
    run_for: u64,

    /// Do not open the dashboard in a browser.
    #[arg(long)]
    no_browser: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let log_file = if cli.nolog {
        None
    } else {
        Some(
            cli.log
                .clone()
                .unwrap_or_else(|| logging::default_log_path(chrono::Local::now().date_naive())),
        )
    };
    logging::init(&LogOptions {
        file: log_file,
        filter: cli.logfilter.clone(),
    })?;

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration {}: {}", cli.config.display(), e);
            std::process::exit(1);
        }
    };
    let monitor = Monitor::new(config, Arc::new(NetProber), Arc::new(LogSink))?;
    tracing::info!(
        "Loaded {} servers from {}",
        monitor.endpoints().len(),
        cli.config.display()
    );

    let server = Server::new(cli.http, monitor.status());
    tokio::spawn(async move {
        if let Err(e) = server.start().await {
            tracing::error!("Web server stopped: {}", e);
        }
    });

    if !cli.no_browser {
        open_browser(&format!("http://127.0.0.1:{}", cli.http.port()));
    }

    let stop = monitor.stop_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupted, shutting down");
                stop.stop();
            }
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    monitor.run_for(Some(Duration::from_secs(cli.run_for))).await;

    Ok(())
}

fn open_browser(url: &str) {
    let opener = if cfg!(target_os = "windows") {
        "explorer"
    } else if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };

    launch(opener, url);
}

/// Run `program url` in the background. The returned task reaps the child.
fn launch(program: &'static str, url: &str) -> Option<tokio::task::JoinHandle<()>> {
    let mut child = match tokio::process::Command::new(program).arg(url).spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!("Could not open {} with {}: {}", url, program, e);
            return None;
        }
    };

    let url = url.to_string();
    Some(tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if status.success() => tracing::info!("Opened {} with {}", url, program),
            Ok(status) => tracing::warn!("{} exited with {} opening {}", program, status, url),
            Err(e) => tracing::warn!("Could not wait for {}: {}", program, e),
        }
    }))
}
