//! ctfleet: idempotent lifecycle reconciliation for containers on a remote hypervisor.
//!
//! - [`clients`]: hypervisor API boundary (query/create/start/stop/delete)
//! - [`probe`]: TCP readiness probing
//! - [`reconciler`]: observed vs desired state machine with bounded retries
//! - [`fleet`]: bounded-concurrency fan-out over many targets

pub mod clients;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod fleet;
pub mod probe;
pub mod reconciler;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use clients::{HttpHypervisorClient, HypervisorClient, HypervisorSettings};
pub use config::FleetConfig;
pub use descriptor::{ResourceConfig, ResourceDescriptor, ResourceId};
pub use error::{ApiError, ReconcileError};
pub use fleet::{FleetDriver, FleetReport};
pub use probe::{Probe, ProbeOutcome, TcpProbe, wait_ready};
pub use reconciler::{Reconciler, ReconcilerSettings};
pub use state::{Action, DesiredState, ObservedStatus, Outcome, ReconciliationResult};
