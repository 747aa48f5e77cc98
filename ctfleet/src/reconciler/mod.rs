//! Lifecycle reconciler.
//!
//! Compares the observed status of one resource (always queried fresh) with
//! the desired state, then runs the minimal step sequence from [`plan`]
//! through the hypervisor client and the readiness probe.

pub mod plan;
pub mod retry;


use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clients::HypervisorClient;
use crate::descriptor::{ResourceDescriptor, ResourceId};
use crate::error::{ApiError, ApiResult, Operation, ReconcileError};
use crate::probe::{Probe, ProbeOutcome, ProbeSettings, TcpProbe, wait_ready};
use crate::state::{Action, DesiredState, ObservedStatus, ReconciliationResult};

pub use plan::{Step, plan};
pub use retry::RetryPolicy;
use retry::{RetryError, with_retry};

/// How long to wait for an accepted mutation to show up in the status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleSettings {
    pub poll_interval_ms: u64,
    pub max_polls: u32,
}

impl Default for SettleSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            max_polls: 60,
        }
    }
}

impl SettleSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Tuning for a [`Reconciler`].
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub retry: RetryPolicy,
    pub probe: ProbeSettings,
    pub settle: SettleSettings,
    /// Force-stop when a graceful stop fails or does not settle.
    pub force_stop_fallback: bool,
    /// Upper bound for a single client call.
    pub call_timeout: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            probe: ProbeSettings::default(),
            settle: SettleSettings::default(),
            force_stop_fallback: true,
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Mutable progress of one reconciliation: last observed status and the
/// mutations that completed so far.
struct Progress {
    status: ObservedStatus,
    actions: Vec<Action>,
}

/// Reconciler driving one resource at a time towards a desired state.
pub struct Reconciler<C, P = TcpProbe> {
    client: C,
    probe: P,
    settings: ReconcilerSettings,
    cancel: CancellationToken,
}

impl<C: HypervisorClient> Reconciler<C, TcpProbe> {
    pub fn new(client: C, settings: ReconcilerSettings) -> Self {
        Self::with_probe(client, TcpProbe, settings)
    }
}

impl<C: HypervisorClient, P: Probe> Reconciler<C, P> {
    pub fn with_probe(client: C, probe: P, settings: ReconcilerSettings) -> Self {
        Self {
            client,
            probe,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `cancel` to abort in-flight retries, settle polls and probes.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Converge `descriptor` to `desired`.
    ///
    /// Never panics on hypervisor errors; failures are reported in the result
    /// together with the last observed status and the actions that completed.
    pub async fn reconcile(
        &self,
        descriptor: &ResourceDescriptor,
        desired: DesiredState,
    ) -> ReconciliationResult {
        info!(
            "Reconciling resource {} ({}) to {}",
            descriptor.id, descriptor.hostname, desired
        );

        let mut progress = Progress {
            status: ObservedStatus::Unknown,
            actions: Vec::new(),
        };

        match self.converge(descriptor, desired, &mut progress).await {
            Ok(()) => {
                if progress.actions.is_empty() {
                    info!("Resource {} already {} ({})", descriptor.id, desired, progress.status);
                } else {
                    info!(
                        "Resource {} reconciled to {} via {:?}",
                        descriptor.id, progress.status, progress.actions
                    );
                }
                ReconciliationResult::success(progress.status, progress.actions)
            }
            Err(e) => {
                error!("Reconciliation of resource {} failed: {}", descriptor.id, e);
                ReconciliationResult::failed(progress.status, progress.actions, e)
            }
        }
    }

    async fn converge(
        &self,
        descriptor: &ResourceDescriptor,
        desired: DesiredState,
        progress: &mut Progress,
    ) -> Result<(), ReconcileError> {
        descriptor.validate()?;

        let id = descriptor.id;
        progress.status = self.observe(id).await?;
        debug!("Resource {} observed as {}", id, progress.status);

        if progress.status.exists() && desired != DesiredState::Absent {
            self.check_conflict(descriptor).await?;
        }

        let steps = plan(desired, progress.status, self.settings.probe.probe_when_running);
        let client = &self.client;

        for step in steps {
            match step {
                Step::Create => {
                    info!("Creating resource {} ({})", id, descriptor.hostname);
                    self.mutate(id, Operation::Create, ObservedStatus::exists, move || {
                        client.create(descriptor)
                    })
                    .await?;
                    progress.actions.push(Action::Create);
                    self.settle(id, Operation::Create, ObservedStatus::Created, progress)
                        .await?;
                }
                Step::Start => {
                    info!("Starting resource {}", id);
                    self.mutate(id, Operation::Start, is_running, move || client.start(id))
                        .await?;
                    progress.actions.push(Action::Start);
                    self.settle(id, Operation::Start, ObservedStatus::Running, progress)
                        .await?;
                }
                Step::Stop => self.stop(id, progress).await?,
                Step::Delete => {
                    info!("Deleting resource {}", id);
                    self.mutate(id, Operation::Delete, is_absent, move || client.delete(id))
                        .await?;
                    progress.actions.push(Action::Delete);
                    self.settle(id, Operation::Delete, ObservedStatus::Absent, progress)
                        .await?;
                }
                Step::Probe => self.probe_ready(descriptor).await?,
            }
        }

        Ok(())
    }

    /// Run a client call under the retry policy, the call timeout and cancellation.
    async fn call<T, F, Fut>(&self, op: Operation, call: F) -> Result<T, ReconcileError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        with_retry(
            &self.settings.retry,
            self.settings.call_timeout,
            &self.cancel,
            op,
            call,
        )
        .await
        .map_err(|e| match e {
            RetryError::Cancelled => ReconcileError::Cancelled,
            RetryError::Api { attempts, error } => ReconcileError::from_api(op, attempts, error),
        })
    }

    /// Run a mutation under the retry policy without sending it twice.
    ///
    /// A transient failure can hide a mutation the hypervisor did apply. Before
    /// every resend the status is queried again and the call is skipped once
    /// `applied` holds. A fatal rejection of a resend ("already exists", "not
    /// found") gets the same check.
    async fn mutate<F, Fut>(
        &self,
        id: ResourceId,
        op: Operation,
        applied: fn(ObservedStatus) -> bool,
        send: F,
    ) -> Result<(), ReconcileError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ApiResult<()>>,
    {
        let client = &self.client;
        let send = &send;
        let sent = AtomicU32::new(0);
        let sent = &sent;

        self.call(op, move || async move {
            let resend = sent.fetch_add(1, Ordering::SeqCst) > 0;
            if resend && took_effect(client, id, op, applied).await? {
                return Ok(());
            }
            match send().await {
                Err(ApiError::Fatal(message)) if resend => {
                    if took_effect(client, id, op, applied).await? {
                        Ok(())
                    } else {
                        Err(ApiError::Fatal(message))
                    }
                }
                other => other,
            }
        })
        .await
    }

    /// Query a known status; `Unknown` is retried like a transient error.
    async fn observe(&self, id: ResourceId) -> Result<ObservedStatus, ReconcileError> {
        let client = &self.client;
        self.call(Operation::Query, move || async move {
            match client.query(id).await? {
                ObservedStatus::Unknown => Err(ApiError::Transient(format!(
                    "resource {} reported an unknown status",
                    id
                ))),
                status => Ok(status),
            }
        })
        .await
    }

    /// Surface drift of an existing resource instead of touching it.
    async fn check_conflict(&self, descriptor: &ResourceDescriptor) -> Result<(), ReconcileError> {
        let client = &self.client;
        let id = descriptor.id;
        let Some(existing) = self
            .call(Operation::Config, move || client.config(id))
            .await?
        else {
            return Ok(());
        };

        let drift = descriptor.drift(&existing);
        if drift.is_empty() {
            Ok(())
        } else {
            Err(ReconcileError::ResourceConflict { id, drift })
        }
    }

    /// Poll until the hypervisor reports `expected` for `id`.
    async fn settle(
        &self,
        id: ResourceId,
        op: Operation,
        expected: ObservedStatus,
        progress: &mut Progress,
    ) -> Result<(), ReconcileError> {
        let client = &self.client;
        let settle = &self.settings.settle;
        let max_polls = settle.max_polls.max(1);

        for poll in 1..=max_polls {
            progress.status = self.call(Operation::Query, move || client.query(id)).await?;
            if progress.status == expected {
                return Ok(());
            }
            debug!(
                "Resource {} is {} after {} (poll {}/{}), waiting for {}",
                id, progress.status, op, poll, max_polls, expected
            );
            if poll < max_polls {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(ReconcileError::Cancelled),
                    _ = tokio::time::sleep(settle.poll_interval()) => {}
                }
            }
        }

        Err(ReconcileError::SettleTimeout {
            op,
            expected,
            observed: progress.status,
        })
    }

    /// Graceful stop, then forced stop if allowed and the graceful one did not work.
    async fn stop(&self, id: ResourceId, progress: &mut Progress) -> Result<(), ReconcileError> {
        let client = &self.client;

        info!("Stopping resource {}", id);
        let graceful = match self
            .mutate(id, Operation::Stop, is_stopped, move || client.stop(id, true))
            .await
        {
            Ok(()) => {
                progress.actions.push(Action::Stop);
                self.settle(id, Operation::Stop, ObservedStatus::Stopped, progress)
                    .await
            }
            Err(e) => Err(e),
        };

        match graceful {
            Err(e) if self.settings.force_stop_fallback && !matches!(e, ReconcileError::Cancelled) => {
                warn!("Graceful stop of resource {} failed ({}), forcing", id, e);
                self.mutate(id, Operation::Stop, is_stopped, move || client.stop(id, false))
                    .await?;
                progress.actions.push(Action::ForceStop);
                self.settle(id, Operation::Stop, ObservedStatus::Stopped, progress)
                    .await
            }
            other => other,
        }
    }

    async fn probe_ready(&self, descriptor: &ResourceDescriptor) -> Result<(), ReconcileError> {
        let probe = &self.settings.probe;
        let address = descriptor.probe_address();
        info!(
            "Waiting for resource {} at {}:{} to accept connections",
            descriptor.id, address, probe.port
        );

        match wait_ready(
            &self.probe,
            &address,
            probe.port,
            probe.interval(),
            probe.max_attempts,
            &self.cancel,
        )
        .await
        {
            ProbeOutcome::Ready { .. } => Ok(()),
            ProbeOutcome::TimedOut { attempts } => Err(ReconcileError::ReadinessTimeout {
                address,
                port: probe.port,
                attempts,
            }),
            ProbeOutcome::Cancelled => Err(ReconcileError::Cancelled),
        }
    }
}

/// Whether an earlier, unacknowledged `op` on `id` already shows in its status.
async fn took_effect<C: HypervisorClient + ?Sized>(
    client: &C,
    id: ResourceId,
    op: Operation,
    applied: fn(ObservedStatus) -> bool,
) -> ApiResult<bool> {
    let status = client.query(id).await?;
    if applied(status) {
        info!("{} of resource {} took effect despite the failed reply ({})", op, id, status);
        Ok(true)
    } else {
        debug!("{} of resource {} not applied yet ({}), sending again", op, id, status);
        Ok(false)
    }
}

fn is_running(status: ObservedStatus) -> bool {
    status == ObservedStatus::Running
}

fn is_stopped(status: ObservedStatus) -> bool {
    status == ObservedStatus::Stopped
}

fn is_absent(status: ObservedStatus) -> bool {
    status == ObservedStatus::Absent
}
