//! routekit demo server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ axum (connections, TraceLayer)
//!                         │
//!                         ▼
//!                     Pipeline (ordered layers, live-editable)
//!                         │
//!         ┌───────────────┼──────────────────────────┐
//!         ▼               ▼                          ▼
//!    tracked middleware   composed routes       registrars
//!    (bodyParser, cors,   (compose,             (health, redirects)
//!     helmet, static,      compose_resource)
//!     logger)
//!
//!     config file ──▶ loader ──▶ merger ──▶ registry install/remove
//!         ▲                                    ▲
//!         └── watcher (--watch) ── patches ────┘ (applied serially)
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc;

use routekit::config::watcher::ConfigWatcher;
use routekit::config::{load_patch, ConfigPatch};
use routekit::http::HttpServer;
use routekit::lifecycle::{resolve_port, startup, Shutdown};
use routekit::observability::logging;
use routekit::{App, HealthOptions, Redirect, ResourceSpec};

#[derive(Parser)]
#[command(name = "routekit")]
#[command(about = "Serve a routekit application", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the configuration)
    #[arg(short, long)]
    port: Option<u16>,

    /// Reapply the configuration file when it changes
    #[arg(short, long, requires = "config")]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    let cli = Cli::parse();

    tracing::info!("routekit v{} starting", env!("CARGO_PKG_VERSION"));

    let mut app = App::new();
    app.register_health(HealthOptions::new())?;
    app.redirect(Redirect::new("/", "/health"))?;
    app.compose_resource("users", ResourceSpec::crud())?;

    if let Some(path) = &cli.config {
        let patch = load_patch(path)?;
        let snapshot = app.apply_config(patch)?;
        tracing::info!(keys = snapshot.len(), path = ?path, "Configuration loaded");
    }

    let port = resolve_port(cli.port, app.config());
    let listener = startup::bind(port).await?;

    let shutdown = Shutdown::new();
    let _ctrl_c = shutdown.trigger_on_ctrl_c();

    let server = HttpServer::new(app.pipeline().clone());
    let server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    // The watcher handle must outlive the serving loop.
    let mut _watcher = None;
    let mut patches = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, rx) = ConfigWatcher::new(path);
            _watcher = Some(watcher.run()?);
            Some(rx)
        }
        _ => None,
    };

    let mut stop = shutdown.subscribe();
    loop {
        tokio::select! {
            _ = stop.recv() => break,
            Some(patch) = next_patch(&mut patches) => {
                match app.apply_config(patch) {
                    Ok(snapshot) => tracing::info!(keys = snapshot.len(), "Configuration reapplied"),
                    Err(e) => tracing::error!(error = %e, "Configuration rejected; keeping current configuration"),
                }
            }
        }
    }

    server_task.await??;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn next_patch(patches: &mut Option<mpsc::UnboundedReceiver<ConfigPatch>>) -> Option<ConfigPatch> {
    match patches {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
