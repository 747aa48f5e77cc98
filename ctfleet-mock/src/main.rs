use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ctfleet_mock::{AppState, create_router};

/// In-memory hypervisor API for ctfleet
#[derive(Parser, Debug)]
#[command(name = "ctfleet-mock", version, about)]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "127.0.0.1:8006")]
    listen: SocketAddr,

    /// Node name served under /nodes/{node}
    #[arg(short, long, default_value = "pve1")]
    node: String,

    /// Delay in milliseconds before accepted mutations become visible
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ctfleet_mock=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let state =
        AppState::new(args.node.clone()).with_transition_delay(Duration::from_millis(args.delay_ms));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    info!("Mock hypervisor for node {} listening on http://{}", args.node, args.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
