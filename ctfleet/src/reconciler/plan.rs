//! The lifecycle transition table.

use crate::state::{DesiredState, ObservedStatus};

/// One step of a reconciliation plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Create,
    Start,
    /// Graceful stop, with forced fallback when configured.
    Stop,
    Delete,
    Probe,
}

impl Step {
    pub fn is_mutation(self) -> bool {
        !matches!(self, Step::Probe)
    }

    /// Status the hypervisor should report once this step has settled.
    pub fn expected_status(self) -> Option<ObservedStatus> {
        match self {
            Step::Create => Some(ObservedStatus::Created),
            Step::Start => Some(ObservedStatus::Running),
            Step::Stop => Some(ObservedStatus::Stopped),
            Step::Delete => Some(ObservedStatus::Absent),
            Step::Probe => None,
        }
    }
}

/// Ordered steps converging `observed` to `desired`. Empty means no-op.
///
/// `Unknown` has no row: the reconciler re-queries until it gets a known
/// status before planning.
pub fn plan(desired: DesiredState, observed: ObservedStatus, probe_when_running: bool) -> Vec<Step> {
    use DesiredState as D;
    use ObservedStatus as O;

    match (desired, observed) {
        (D::Present, O::Absent) => vec![Step::Create],
        (D::Present, _) => vec![],

        (D::Started, O::Absent) => vec![Step::Create, Step::Start, Step::Probe],
        (D::Started, O::Created | O::Stopped) => vec![Step::Start, Step::Probe],
        (D::Started, O::Running) if probe_when_running => vec![Step::Probe],
        (D::Started, _) => vec![],

        (D::Stopped, O::Running) => vec![Step::Stop],
        (D::Stopped, _) => vec![],

        (D::Absent, O::Created | O::Stopped) => vec![Step::Delete],
        (D::Absent, O::Running) => vec![Step::Stop, Step::Delete],
        (D::Absent, _) => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DesiredState as D;
    use ObservedStatus as O;

    #[test]
    fn test_transition_table() {
        let cases = [
            (D::Present, O::Absent, vec![Step::Create]),
            (D::Present, O::Created, vec![]),
            (D::Present, O::Running, vec![]),
            (D::Present, O::Stopped, vec![]),
            (D::Started, O::Absent, vec![Step::Create, Step::Start, Step::Probe]),
            (D::Started, O::Created, vec![Step::Start, Step::Probe]),
            (D::Started, O::Running, vec![]),
            (D::Started, O::Stopped, vec![Step::Start, Step::Probe]),
            (D::Stopped, O::Absent, vec![]),
            (D::Stopped, O::Created, vec![]),
            (D::Stopped, O::Running, vec![Step::Stop]),
            (D::Stopped, O::Stopped, vec![]),
            (D::Absent, O::Absent, vec![]),
            (D::Absent, O::Created, vec![Step::Delete]),
            (D::Absent, O::Running, vec![Step::Stop, Step::Delete]),
            (D::Absent, O::Stopped, vec![Step::Delete]),
        ];
        for (desired, observed, expected) in cases {
            assert_eq!(
                plan(desired, observed, false),
                expected,
                "desired={desired} observed={observed}"
            );
        }
    }

    #[test]
    fn test_running_probe_is_optional() {
        assert_eq!(plan(D::Started, O::Running, true), vec![Step::Probe]);
        assert!(!Step::Probe.is_mutation());
    }

    #[test]
    fn test_converged_state_plans_no_mutation() {
        // Applying a plan and re-planning from its final status must be a no-op.
        for desired in [D::Present, D::Started, D::Stopped, D::Absent] {
            for observed in [O::Absent, O::Created, O::Running, O::Stopped] {
                let steps = plan(desired, observed, false);
                let settled = steps
                    .iter()
                    .filter_map(|s| s.expected_status())
                    .last()
                    .unwrap_or(observed);
                assert!(
                    plan(desired, settled, false).iter().all(|s| !s.is_mutation()),
                    "desired={desired} observed={observed} settled={settled}"
                );
            }
        }
    }
}
