//! Property-based tests for progress ordering, status transitions and worker capacity

use proptest::prelude::*;
use refereed::pool::CapacityGauge;
use refereed::workflow::{Progress, Stage, WorkflowStatus};

const STATUSES: [WorkflowStatus; 6] = [
    WorkflowStatus::Queued,
    WorkflowStatus::Running,
    WorkflowStatus::Interrupted,
    WorkflowStatus::Failed,
    WorkflowStatus::Rejected,
    WorkflowStatus::Completed,
];

fn progress() -> impl Strategy<Value = Progress> {
    (0u32..6, 0usize..Stage::ALL.len()).prop_map(|(round, i)| Progress::new(round, Stage::ALL[i]))
}

proptest! {
    #[test]
    fn progress_orders_by_round_then_stage(a in progress(), b in progress()) {
        let expected = (a.round, a.stage).cmp(&(b.round, b.stage));
        prop_assert_eq!(a.cmp(&b), expected);
    }

    #[test]
    fn accepted_and_rejected_are_final(walk in prop::collection::vec(0usize..6, 1..30)) {
        let mut status = WorkflowStatus::Queued;
        let mut settled_final = false;
        for i in walk {
            let next = STATUSES[i];
            if status.can_transition_to(next) {
                if settled_final {
                    prop_assert_eq!(next, status);
                }
                status = next;
                settled_final = matches!(status, WorkflowStatus::Completed | WorkflowStatus::Rejected);
            }
        }
    }

    #[test]
    fn gauge_never_exceeds_capacity(
        capacity in 1usize..5,
        ops in prop::collection::vec(any::<bool>(), 0..60),
    ) {
        let gauge = CapacityGauge::new(capacity);
        let mut held = Vec::new();
        for claim in ops {
            if claim {
                match gauge.try_claim() {
                    Some(c) => held.push(c),
                    None => prop_assert_eq!(held.len(), capacity),
                }
            } else {
                held.pop();
            }
            prop_assert_eq!(gauge.in_use(), held.len());
            prop_assert!(gauge.in_use() <= gauge.capacity());
        }
    }
}
