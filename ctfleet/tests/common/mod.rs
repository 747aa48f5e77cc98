//! Shared helpers for ctfleet integration tests against the mock hypervisor.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use ctfleet::probe::ProbeSettings;
use ctfleet::reconciler::{RetryPolicy, SettleSettings};
use ctfleet::{HttpHypervisorClient, HypervisorSettings, ReconcilerSettings, ResourceDescriptor};
use ctfleet_mock::{AppState, Resource, create_router};
use tokio::net::TcpListener;

pub const NODE: &str = "pve1";

/// Mock hypervisor API on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(AppState::new(NODE)).await
    }

    pub async fn spawn_with(state: AppState) -> Self {
        let router = create_router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx,
        }
    }

    pub fn settings(&self) -> HypervisorSettings {
        HypervisorSettings {
            endpoint: format!("http://{}/", self.addr),
            node: NODE.to_string(),
            request_timeout_secs: 5,
        }
    }

    pub fn client(&self) -> HttpHypervisorClient {
        HttpHypervisorClient::new(&self.settings()).expect("Failed to build client")
    }

    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// A listener that stands in for the resource's SSH port.
pub async fn ssh_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Settings with millisecond-scale delays so tests run in real time.
pub fn fast_settings(probe_port: u16) -> ReconcilerSettings {
    ReconcilerSettings {
        retry: RetryPolicy {
            base_delay_ms: 10,
            factor: 2,
            max_delay_ms: 50,
            max_attempts: 5,
        },
        probe: ProbeSettings {
            port: probe_port,
            interval_ms: 100,
            max_attempts: 5,
            probe_when_running: false,
        },
        settle: SettleSettings {
            poll_interval_ms: 20,
            max_polls: 50,
        },
        force_stop_fallback: true,
        call_timeout: Duration::from_secs(2),
    }
}

/// Descriptor that probes on loopback.
pub fn descriptor(id: u32) -> ResourceDescriptor {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "hostname": format!("ct-{}", id),
        "cores": 2,
        "memory_mb": 2048,
        "disk_gb": 8,
        "network": {
            "bridge": "vmbr0",
            "ip": {"mode": "static", "cidr": "127.0.0.1/8"}
        },
        "ssh_public_key": "ssh-ed25519 AAAA test@host"
    }))
    .expect("valid descriptor")
}

/// A resource as the mock would store it after a create.
pub fn seeded(id: u32, cores: u32) -> Resource {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "hostname": format!("ct-{}", id),
        "cores": cores,
        "memoryMb": 2048,
        "diskGb": 8,
        "network": {"bridge": "vmbr0", "ip": {"mode": "dhcp"}}
    }))
    .expect("valid resource")
}
