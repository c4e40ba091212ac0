//! Sight
//!
//! Discovers and starts modules, then runs an app until interrupted.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use sight::{Runtime, Settings};

/// Sight service-composition runtime
#[derive(Parser, Debug)]
#[command(name = "sight")]
#[command(about = "Sight service-composition runtime", long_about = None)]
struct Args {
    /// Settings file (defaults to ./sight.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extra directory scanned for modules (repeatable)
    #[arg(short = 'm', long = "module-path")]
    module_paths: Vec<PathBuf>,

    /// App instruction file to launch
    #[arg(short, long)]
    app: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sight=info"));
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting Sight v{}", env!("CARGO_PKG_VERSION"));

    let mut settings = Settings::load(args.config.as_deref()).context("failed to load settings")?;
    settings.module_paths.extend(args.module_paths);
    if args.app.is_some() {
        settings.app = args.app;
    }

    let runtime = Runtime::builder().settings(settings).build()?;

    let report = runtime.discover().await;
    for e in &report.errors {
        warn!("Skipped module: {}", e);
    }

    let failures = runtime.start_modules();
    if !failures.is_empty() {
        warn!("{} module(s) failed to start", failures.len());
    }

    if let Some(app) = runtime.settings().app.clone() {
        match runtime.load_app(&app).await {
            Ok(app) => {
                for failure in app.failures() {
                    warn!("{} failed to {}: {}", failure.service, failure.operation, failure.message);
                }
            }
            Err(e) => {
                error!("Failed to launch {}: {}", app.display(), e);
                runtime.shutdown();
                return Err(e.into());
            }
        }
    }

    info!("Running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl+C")?;

    info!("Shutting down");
    runtime.shutdown();
    Ok(())
}
