//! Fleet driver - reconciles many independent resources with bounded concurrency.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info};

use crate::clients::HypervisorClient;
use crate::descriptor::{ResourceDescriptor, ResourceId};
use crate::error::{FleetError, ReconcileError};
use crate::probe::Probe;
use crate::reconciler::Reconciler;
use crate::state::{Action, DesiredState, ObservedStatus, Outcome, ReconciliationResult};

/// Per-target results of one fleet run.
#[derive(Debug, Default)]
pub struct FleetReport {
    pub results: BTreeMap<ResourceId, ReconciliationResult>,
}

/// One report line, also the JSON shape of `--json` output.
#[derive(Debug, Serialize)]
pub struct TargetLine<'a> {
    pub id: ResourceId,
    pub outcome: Outcome,
    pub changed: bool,
    pub status: ObservedStatus,
    pub actions: &'a [Action],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl fmt::Display for TargetLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} changed={} status={}",
            self.id, self.changed, self.status
        )?;
        if let (Some(kind), Some(error)) = (self.error_kind, &self.error) {
            write!(f, " error={}: {}", kind, error)?;
        }
        Ok(())
    }
}

impl FleetReport {
    pub fn lines(&self) -> impl Iterator<Item = TargetLine<'_>> {
        self.results.iter().map(|(id, r)| TargetLine {
            id: *id,
            outcome: r.outcome,
            changed: r.changed(),
            status: r.status,
            actions: &r.actions,
            error_kind: r.error.as_ref().map(ReconcileError::kind),
            error: r.error.as_ref().map(ToString::to_string),
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.results
            .iter()
            .filter(|(_, r)| r.is_failed())
            .map(|(id, _)| *id)
    }

    pub fn changed_count(&self) -> usize {
        self.results.values().filter(|r| r.changed()).count()
    }

    /// True when no target failed.
    pub fn success(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Runs one reconciliation per descriptor, at most `concurrency` at a time.
pub struct FleetDriver<C, P> {
    reconciler: Arc<Reconciler<C, P>>,
    concurrency: usize,
}

impl<C, P> FleetDriver<C, P>
where
    C: HypervisorClient + 'static,
    P: Probe + 'static,
{
    pub fn new(reconciler: Arc<Reconciler<C, P>>, concurrency: usize) -> Self {
        Self {
            reconciler,
            concurrency: concurrency.max(1),
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler<C, P>> {
        &self.reconciler
    }

    /// Reconcile every descriptor to `desired`.
    ///
    /// Every target is attempted; failures are collected in the report. The
    /// batch is refused up front if an id appears twice, since two workers on
    /// the same id would act on each other's stale observations.
    pub async fn run(
        &self,
        descriptors: Vec<ResourceDescriptor>,
        desired: DesiredState,
    ) -> Result<FleetReport, FleetError> {
        check_unique(&descriptors)?;

        info!(
            "Reconciling {} resource(s) to {} (concurrency {})",
            descriptors.len(),
            desired,
            self.concurrency
        );

        let results: Vec<(ResourceId, ReconciliationResult)> = stream::iter(descriptors)
            .map(|descriptor| {
                let reconciler = Arc::clone(&self.reconciler);
                let id = descriptor.id;
                async move {
                    let task = tokio::spawn(async move {
                        reconciler.reconcile(&descriptor, desired).await
                    });
                    let result = match task.await {
                        Ok(result) => result,
                        Err(e) => {
                            error!("Reconciliation task for resource {} aborted: {}", id, e);
                            ReconciliationResult::failed(
                                ObservedStatus::Unknown,
                                Vec::new(),
                                ReconcileError::Aborted(e.to_string()),
                            )
                        }
                    };
                    (id, result)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let report = FleetReport {
            results: results.into_iter().collect(),
        };
        info!(
            "Fleet run finished: {} target(s), {} changed, {} failed",
            report.results.len(),
            report.changed_count(),
            report.failed().count()
        );
        Ok(report)
    }
}

pub(crate) fn check_unique(descriptors: &[ResourceDescriptor]) -> Result<(), FleetError> {
    let mut seen = HashSet::new();
    for d in descriptors {
        if !seen.insert(d.id) {
            return Err(FleetError::DuplicateId(d.id));
        }
    }
    Ok(())
}
