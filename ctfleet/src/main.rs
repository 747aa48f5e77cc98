//! ctfleet: reconcile a fleet of containers on a hypervisor to one desired state.
//!
//! Reads a fleet file, then for every resource:
//! - queries its current status
//! - creates/starts/stops/deletes it as needed
//! - waits until it accepts TCP connections when it should be running
//!
//! Prints one line per resource and exits non-zero if any of them failed.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ctfleet::{DesiredState, FleetConfig, FleetDriver, HttpHypervisorClient, Reconciler};

/// ctfleet container reconciler
#[derive(Parser, Debug)]
#[command(name = "ctfleet", version, about)]
struct Args {
    /// Fleet file (JSON)
    #[arg(short, long, default_value = "/etc/ctfleet/fleet.json")]
    config: PathBuf,

    /// Desired lifecycle state for every resource
    #[arg(short, long, value_enum, default_value = "started")]
    state: DesiredState,

    /// Only reconcile these resource ids (can be repeated)
    #[arg(long = "id")]
    ids: Vec<u32>,

    /// Override the number of resources reconciled in parallel
    #[arg(long)]
    concurrency: Option<usize>,

    /// Print the report as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ctfleet=info,reqwest=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = FleetConfig::load(&args.config)
        .await
        .with_context(|| format!("Failed to load fleet file {}", args.config.display()))?;

    let (resources, missing) = config.select(&args.ids);
    for id in missing {
        warn!("Resource {} is not in {}", id, args.config.display());
    }

    info!(
        "Hypervisor {} (node {}), {} resource(s)",
        config.hypervisor.endpoint,
        config.hypervisor.node,
        resources.len()
    );

    let client =
        HttpHypervisorClient::new(&config.hypervisor).context("Failed to create hypervisor client")?;

    // Ctrl-C aborts in-flight retries and probes; resources stay as they are.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling reconciliation");
            signal_cancel.cancel();
        }
    });

    let reconciler =
        Reconciler::new(client, config.reconciler_settings()).with_cancellation(cancel);
    let driver = FleetDriver::new(
        Arc::new(reconciler),
        args.concurrency.unwrap_or(config.concurrency),
    );

    let report = driver.run(resources, args.state).await?;

    for line in report.lines() {
        if args.json {
            println!("{}", serde_json::to_string(&line)?);
        } else {
            println!("{}", line);
        }
    }

    Ok(if report.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
