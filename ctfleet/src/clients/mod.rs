//! Clients for the hypervisor management API.
//!
//! The reconciler only talks to the hypervisor through [`HypervisorClient`]:
//! - query/config: observe a resource by id
//! - create/start/stop/delete: mutate it
//!
//! Idempotency is not expected here. Callers query before acting.

pub mod hypervisor;

use async_trait::async_trait;

use crate::descriptor::{ResourceConfig, ResourceDescriptor, ResourceId};
use crate::error::ApiResult;
use crate::state::ObservedStatus;

pub use hypervisor::{HttpHypervisorClient, HypervisorSettings};

/// RPC boundary to the hypervisor. All calls block until the hypervisor answers.
#[async_trait]
pub trait HypervisorClient: Send + Sync {
    /// Current status. A missing resource is `Absent`, not an error.
    async fn query(&self, id: ResourceId) -> ApiResult<ObservedStatus>;

    /// Hardware config of an existing resource, `None` if it does not exist.
    async fn config(&self, id: ResourceId) -> ApiResult<Option<ResourceConfig>>;

    /// Create a resource. Fails fatally if the id is taken.
    async fn create(&self, descriptor: &ResourceDescriptor) -> ApiResult<()>;

    async fn start(&self, id: ResourceId) -> ApiResult<()>;

    async fn stop(&self, id: ResourceId, graceful: bool) -> ApiResult<()>;

    async fn delete(&self, id: ResourceId) -> ApiResult<()>;
}
