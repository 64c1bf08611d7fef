//! Stagehand CLI - resolve resource orders and boot providers from a manifest.

mod manifest;
mod simulated;

use anyhow::Result;
use clap::{Parser, Subcommand};
use stagehand_core::CollectingIssueSink;
use stagehand_execution::{DependencyResolver, StartupScheduler};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::manifest::Manifest;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(about = "Dependency-ordered resolution and startup", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the resource order of every work unit
    Resolve {
        /// Manifest path
        manifest: PathBuf,
    },
    /// Boot the manifest's providers
    Boot {
        /// Manifest path
        manifest: PathBuf,
        /// Override the maximum startup wait
        #[arg(long)]
        max_wait_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Resolve { manifest } => resolve(&Manifest::load(&manifest)?),
        Commands::Boot {
            manifest,
            max_wait_ms,
        } => {
            let mut manifest = Manifest::load(&manifest)?;
            if let Some(ms) = max_wait_ms {
                manifest.boot.max_wait = Some(Duration::from_millis(ms));
            }
            boot(manifest).await
        }
    }
}

fn resolve(manifest: &Manifest) -> Result<()> {
    let catalog = manifest.catalog()?;
    let sink = CollectingIssueSink::new();

    let report = DependencyResolver::new().resolve_all(&manifest.units, &catalog, &sink);

    for (unit, order) in &report.resolved {
        println!("{unit}");
        for (position, resource) in order.iter().enumerate() {
            println!("  {:>3}. {} ({})", position + 1, resource.name, resource.key);
        }
    }

    for issue in sink.issues() {
        eprintln!("issue: {issue}");
    }

    if !report.is_clean() {
        anyhow::bail!("{} unit(s) excluded", report.excluded.len());
    }
    Ok(())
}

async fn boot(manifest: Manifest) -> Result<()> {
    let sink = Arc::new(CollectingIssueSink::new());
    let mut scheduler = StartupScheduler::new(manifest.boot.clone()).with_issue_sink(sink.clone());
    for entry in &manifest.providers {
        scheduler.register(simulated::registration(entry));
    }
    info!(providers = scheduler.provider_count(), "Booting");

    let outcome = scheduler.run().await;

    for issue in sink.issues() {
        eprintln!("issue: {issue}");
    }

    let report = outcome?;
    for (number, group) in report.groups.iter().enumerate() {
        println!("group {}: {}", number + 1, group.join(", "));
    }
    println!(
        "boot {} finished in {} ms",
        report.boot_id,
        report.elapsed().num_milliseconds()
    );
    Ok(())
}
