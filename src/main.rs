//! Dispatch planner - route planning engine for last-mile delivery fleets
//!
//! Reads a customer batch and a fleet configuration, solves the capacitated
//! routing problem, and writes the planned routes with the unserved overflow.

mod cli;
mod config;
mod error;
mod services;
mod types;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use services::planner::Planner;
use services::routing::MatrixCache;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    dotenvy::dotenv().ok();

    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "planner.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,dispatch_planner=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    let config = config::Config::load(&cli.config)?;

    match cli.command {
        cli::Command::Plan { customers, output } => run_plan(config, &customers, output).await,
        cli::Command::SweepCache => run_sweep(config),
    }
}

async fn run_plan(
    config: config::Config,
    customers_path: &Path,
    output: Option<PathBuf>,
) -> Result<()> {
    let customers = services::import::read_customers(customers_path)?;
    let planner = Planner::new(config)?;

    let solution = planner.plan(customers).await?.solution;

    for route in &solution.routes {
        info!(
            "{} #{}: {} stops, {:.1} km, {:.0} min, load {:.0}",
            route.vehicle_class,
            route.vehicle_ordinal,
            route.customers.len(),
            route.distance_km,
            route.duration_minutes,
            route.load
        );
    }
    for item in &solution.overflow {
        warn!("Unserved '{}': {:?}", item.customer.id, item.reason);
    }

    let rendered =
        serde_json::to_string_pretty(&solution).context("Failed to serialize solution")?;
    match output {
        Some(path) => {
            std::fs::write(&path, rendered)
                .with_context(|| format!("Failed to write solution to {}", path.display()))?;
            info!("Solution written to {}", path.display());
        }
        None => println!("{}", rendered),
    }

    Ok(())
}

fn run_sweep(config: config::Config) -> Result<()> {
    match MatrixCache::from_settings(&config.cache) {
        Some(cache) => {
            let removed = cache.sweep()?;
            info!("Cache sweep removed {} entries", removed);
        }
        None => warn!("Matrix cache is disabled, nothing to sweep"),
    }
    Ok(())
}
