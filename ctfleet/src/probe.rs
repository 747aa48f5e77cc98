//! Readiness probing - waits until a started resource accepts TCP connections.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Probe settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// TCP port to connect to on the resource.
    pub port: u16,
    pub interval_ms: u64,
    pub max_attempts: u32,
    /// Also probe resources that were already running.
    pub probe_when_running: bool,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            port: 22,
            interval_ms: 2000,
            max_attempts: 30,
            probe_when_running: false,
        }
    }
}

impl ProbeSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
    Cancelled,
}

/// A single reachability check.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self, address: &str, port: u16) -> bool;
}

/// Plain TCP connect probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self, address: &str, port: u16) -> bool {
        match TcpStream::connect((address, port)).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Probe {}:{} failed: {}", address, port, e);
                false
            }
        }
    }
}

/// Poll `address:port` once per `interval` until it is reachable.
///
/// Attempts are paced on a fixed tick and each one is cut off at `interval`,
/// so the whole wait is bounded by `max_attempts * interval`.
pub async fn wait_ready<P: Probe + ?Sized>(
    probe: &P,
    address: &str,
    port: u16,
    interval_dur: Duration,
    max_attempts: u32,
    cancel: &CancellationToken,
) -> ProbeOutcome {
    let mut ticker = interval(interval_dur);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    for attempt in 1..=max_attempts {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return ProbeOutcome::Cancelled,
            _ = ticker.tick() => {}
        }

        let reachable = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ProbeOutcome::Cancelled,
            r = timeout(interval_dur, probe.check(address, port)) => r.unwrap_or(false),
        };

        if reachable {
            info!("{}:{} is ready after {} attempt(s)", address, port, attempt);
            return ProbeOutcome::Ready { attempts: attempt };
        }
    }

    ProbeOutcome::TimedOut {
        attempts: max_attempts,
    }
}
