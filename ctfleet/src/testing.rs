//! In-memory hypervisor and probe fakes for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::clients::HypervisorClient;
use crate::descriptor::{ResourceConfig, ResourceDescriptor, ResourceId};
use crate::error::{ApiError, ApiResult, Operation};
use crate::probe::Probe;
use crate::state::ObservedStatus;

#[derive(Default)]
struct FakeState {
    resources: HashMap<ResourceId, (ObservedStatus, ResourceConfig)>,
    calls: Vec<String>,
    /// Errors returned by the next calls of an operation, in order.
    faults: HashMap<(Operation, Option<ResourceId>), VecDeque<ApiError>>,
    /// Errors returned by the next calls of an operation after it took effect.
    lost_replies: HashMap<Operation, VecDeque<ApiError>>,
    /// Ids whose every call fails with this error.
    broken: HashMap<ResourceId, ApiError>,
    /// Graceful stops are accepted but have no effect.
    ignore_graceful_stop: bool,
    /// Statuses handed out by `query` before the real one.
    query_script: VecDeque<ObservedStatus>,
}

/// Hypervisor that applies every accepted mutation instantly.
#[derive(Default)]
pub(crate) struct FakeHypervisor {
    state: Mutex<FakeState>,
}

impl FakeHypervisor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_resource(self, descriptor: &ResourceDescriptor, status: ObservedStatus) -> Self {
        let config = config_of(descriptor);
        self.lock().resources.insert(descriptor.id, (status, config));
        self
    }

    pub(crate) fn with_config(self, id: ResourceId, status: ObservedStatus, config: ResourceConfig) -> Self {
        self.lock().resources.insert(id, (status, config));
        self
    }

    /// Fail the next call of `op` (for any id) with `error`.
    pub(crate) fn fail_next(&self, op: Operation, error: ApiError) {
        self.lock()
            .faults
            .entry((op, None))
            .or_default()
            .push_back(error);
    }

    /// Apply the next call of `op`, then answer it with `error` as if the
    /// reply got lost on the way back.
    pub(crate) fn lose_next_reply(&self, op: Operation, error: ApiError) {
        self.lock()
            .lost_replies
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Fail every call touching `id` with `error`.
    pub(crate) fn break_resource(&self, id: ResourceId, error: ApiError) {
        self.lock().broken.insert(id, error);
    }

    pub(crate) fn ignore_graceful_stop(&self) {
        self.lock().ignore_graceful_stop = true;
    }

    pub(crate) fn script_queries(&self, statuses: impl IntoIterator<Item = ObservedStatus>) {
        self.lock().query_script.extend(statuses);
    }

    pub(crate) fn status(&self, id: ResourceId) -> ObservedStatus {
        self.lock()
            .resources
            .get(&id)
            .map(|(s, _)| *s)
            .unwrap_or(ObservedStatus::Absent)
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Calls other than status and config queries.
    pub(crate) fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("query") && !c.starts_with("config"))
            .collect()
    }

    pub(crate) fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn enter(&self, op: Operation, id: ResourceId, label: String) -> ApiResult<std::sync::MutexGuard<'_, FakeState>> {
        let mut state = self.lock();
        state.calls.push(label);
        if let Some(err) = state.broken.get(&id) {
            return Err(err.clone());
        }
        if let Some(err) = state.faults.get_mut(&(op, None)).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }
}

impl FakeState {
    /// Reply of a mutation that was applied.
    fn applied(&mut self, op: Operation) -> ApiResult<()> {
        match self.lost_replies.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub(crate) fn config_of(descriptor: &ResourceDescriptor) -> ResourceConfig {
    ResourceConfig {
        hostname: descriptor.hostname.clone(),
        cores: descriptor.cores,
        memory_mb: descriptor.memory_mb,
        disk_gb: descriptor.disk_gb,
    }
}

#[async_trait]
impl HypervisorClient for FakeHypervisor {
    async fn query(&self, id: ResourceId) -> ApiResult<ObservedStatus> {
        let mut state = self.enter(Operation::Query, id, format!("query {}", id))?;
        if let Some(status) = state.query_script.pop_front() {
            return Ok(status);
        }
        Ok(state
            .resources
            .get(&id)
            .map(|(s, _)| *s)
            .unwrap_or(ObservedStatus::Absent))
    }

    async fn config(&self, id: ResourceId) -> ApiResult<Option<ResourceConfig>> {
        let state = self.enter(Operation::Config, id, format!("config {}", id))?;
        Ok(state.resources.get(&id).map(|(_, c)| c.clone()))
    }

    async fn create(&self, descriptor: &ResourceDescriptor) -> ApiResult<()> {
        let id = descriptor.id;
        let mut state = self.enter(Operation::Create, id, format!("create {}", id))?;
        if state.resources.contains_key(&id) {
            return Err(ApiError::Fatal(format!("resource {} already exists", id)));
        }
        state
            .resources
            .insert(id, (ObservedStatus::Created, config_of(descriptor)));
        state.applied(Operation::Create)
    }

    async fn start(&self, id: ResourceId) -> ApiResult<()> {
        let mut state = self.enter(Operation::Start, id, format!("start {}", id))?;
        match state.resources.get_mut(&id) {
            Some((status, _)) => {
                *status = ObservedStatus::Running;
                state.applied(Operation::Start)
            }
            None => Err(ApiError::Fatal(format!("resource {} not found", id))),
        }
    }

    async fn stop(&self, id: ResourceId, graceful: bool) -> ApiResult<()> {
        let mut state = self.enter(Operation::Stop, id, format!("stop {} graceful={}", id, graceful))?;
        let ignore = graceful && state.ignore_graceful_stop;
        match state.resources.get_mut(&id) {
            Some((status, _)) => {
                if !ignore {
                    *status = ObservedStatus::Stopped;
                }
                state.applied(Operation::Stop)
            }
            None => Err(ApiError::Fatal(format!("resource {} not found", id))),
        }
    }

    async fn delete(&self, id: ResourceId) -> ApiResult<()> {
        let mut state = self.enter(Operation::Delete, id, format!("delete {}", id))?;
        match state.resources.remove(&id) {
            Some(_) => state.applied(Operation::Delete),
            None => Err(ApiError::Fatal(format!("resource {} not found", id))),
        }
    }
}

/// Probe with a fixed answer.
pub(crate) struct StaticProbe(pub bool);

#[async_trait]
impl Probe for StaticProbe {
    async fn check(&self, _address: &str, _port: u16) -> bool {
        self.0
    }
}
