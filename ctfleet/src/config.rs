//! Fleet file: hypervisor connection, tuning and the descriptor list.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::clients::HypervisorSettings;
use crate::descriptor::{ResourceDescriptor, ResourceId};
use crate::error::ConfigError;
use crate::probe::ProbeSettings;
use crate::reconciler::{ReconcilerSettings, RetryPolicy, SettleSettings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopSettings {
    /// Force-stop when a graceful stop fails or does not settle.
    pub force_fallback: bool,
}

impl Default for StopSettings {
    fn default() -> Self {
        Self {
            force_fallback: true,
        }
    }
}

fn default_concurrency() -> usize {
    4
}

/// Top-level fleet file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub hypervisor: HypervisorSettings,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub probe: ProbeSettings,
    #[serde(default)]
    pub settle: SettleSettings,
    #[serde(default)]
    pub stop: StopSettings,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    pub resources: Vec<ResourceDescriptor>,
}

impl FleetConfig {
    /// Load and validate a fleet file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: display.clone(),
                source,
            })?;
        let config: FleetConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: display,
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hypervisor.endpoint.trim().is_empty() {
            return invalid("hypervisor.endpoint", "must not be empty");
        }
        if self.hypervisor.node.trim().is_empty() {
            return invalid("hypervisor.node", "must not be empty");
        }
        if self.hypervisor.request_timeout_secs == 0 {
            return invalid("hypervisor.request_timeout_secs", "must be greater than zero");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts", "must be at least 1");
        }
        if self.retry.factor == 0 {
            return invalid("retry.factor", "must be at least 1");
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return invalid("retry.max_delay_ms", "must not be below retry.base_delay_ms");
        }
        if self.probe.max_attempts == 0 {
            return invalid("probe.max_attempts", "must be at least 1");
        }
        if self.probe.interval_ms == 0 {
            return invalid("probe.interval_ms", "must be greater than zero");
        }
        if self.probe.port == 0 {
            return invalid("probe.port", "must be non-zero");
        }
        if self.settle.max_polls == 0 {
            return invalid("settle.max_polls", "must be at least 1");
        }
        if self.concurrency == 0 {
            return invalid("concurrency", "must be at least 1");
        }
        for descriptor in &self.resources {
            descriptor.validate()?;
        }
        crate::fleet::check_unique(&self.resources)?;
        Ok(())
    }

    /// Descriptors listed in `ids` (every descriptor when `ids` is empty),
    /// together with the requested ids the fleet file does not contain.
    pub fn select(&self, ids: &[u32]) -> (Vec<ResourceDescriptor>, Vec<ResourceId>) {
        if ids.is_empty() {
            return (self.resources.clone(), Vec::new());
        }
        let wanted: BTreeSet<ResourceId> = ids.iter().copied().map(ResourceId).collect();
        let selected: Vec<ResourceDescriptor> = self
            .resources
            .iter()
            .filter(|d| wanted.contains(&d.id))
            .cloned()
            .collect();
        let missing = wanted
            .into_iter()
            .filter(|id| !selected.iter().any(|d| d.id == *id))
            .collect();
        (selected, missing)
    }

    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            retry: self.retry.clone(),
            probe: self.probe.clone(),
            settle: self.settle.clone(),
            force_stop_fallback: self.stop.force_fallback,
            call_timeout: self.hypervisor.request_timeout(),
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    })
}
