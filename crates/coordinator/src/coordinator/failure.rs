use std::sync::Arc;

use tracing::{debug, error, info, warn};

use fanout_core::{NodeId, SubtaskErrorReport, SubtaskId};

use super::notice::Notice;
use super::Coordinator;
use crate::ledger::{Assignment, FailureOutcome, TaskAbort};

impl Coordinator {
    /// A worker reported that it could not solve its window.
    pub async fn report_error(self: &Arc<Self>, report: SubtaskErrorReport) {
        warn!(
            worker = %report.worker_id,
            subtask = %report.subtask_id,
            error = %report.error,
            "Worker reported subtask error"
        );
        let reason = if report.error.is_empty() {
            format!("worker {} reported an error", report.worker_id)
        } else {
            report.error
        };
        self.fail_subtask(&report.subtask_id, &reason).await;
    }

    /// Push one failure of a subtask through the retry policy and send
    /// whatever gets reassigned.
    pub async fn fail_subtask(self: &Arc<Self>, subtask_id: &SubtaskId, reason: &str) {
        let next = self.fail_and_route(subtask_id, reason);
        self.send_all(next).await;
    }

    /// Remove a worker that failed its health probe. Its subtask, if any,
    /// takes the failure path.
    pub async fn evict_worker(self: &Arc<Self>, worker_id: &NodeId) -> bool {
        let Some(eviction) = self.ledger.evict_worker(worker_id) else {
            return false;
        };
        if let Some((subtask_id, outcome)) = eviction.failed {
            let reason = format!("worker {worker_id} stopped answering health probes");
            let next = self.route_failure(&subtask_id, outcome, &reason);
            self.send_all(next).await;
        }
        true
    }

    pub(super) fn fail_and_route(self: &Arc<Self>, subtask_id: &SubtaskId, reason: &str) -> Vec<Assignment> {
        let outcome = self.ledger.fail_subtask(subtask_id);
        self.route_failure(subtask_id, outcome, reason)
    }

    /// Act on a ledger failure decision. Returns the windows to send next:
    /// the reassignment plus any stalled windows a freed worker can take.
    fn route_failure(self: &Arc<Self>, subtask_id: &SubtaskId, outcome: FailureOutcome, reason: &str) -> Vec<Assignment> {
        let mut next = Vec::new();
        match outcome {
            FailureOutcome::Unknown => {
                debug!(subtask = %subtask_id, "Failure for unknown or already stalled subtask ignored");
            }
            FailureOutcome::Released => {
                debug!(subtask = %subtask_id, "Failure for finished task, worker released");
            }
            FailureOutcome::Reassigned(assignment) => {
                info!(
                    subtask = %subtask_id,
                    retry = %assignment.subtask_id(),
                    worker = %assignment.worker_id,
                    errors = assignment.errors,
                    start = assignment.request.start,
                    amount = assignment.request.amount,
                    "Subtask reassigned"
                );
                next.push(assignment);
            }
            FailureOutcome::Stalled { subtask_id, errors } => {
                warn!(subtask = %subtask_id, errors, "No free worker, subtask stalled");
            }
            FailureOutcome::Aborted(abort) => self.spawn_abort_notice(abort, reason),
        }
        next.extend(self.ledger.claim_stalled());
        next
    }

    fn spawn_abort_notice(self: &Arc<Self>, abort: TaskAbort, reason: &str) {
        error!(
            owner = %abort.owner_id,
            start = abort.window.start,
            amount = abort.window.amount,
            errors = abort.errors,
            error = %reason,
            "Subtask exceeded retry threshold, task aborted"
        );
        let Some(owner) = abort.owner else {
            return;
        };
        let notice = Notice::Error(format!(
            "subtask window {} failed {} times, last error: {}",
            abort.window, abort.errors, reason
        ));
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.deliver(&owner, &notice).await;
        });
    }
}
