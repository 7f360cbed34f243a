use std::sync::Arc;

use tracing::{debug, info, warn};

use fanout_core::{CompleteSubtaskRequest, ReportStatus};

use super::notice::Notice;
use super::Coordinator;
use crate::ledger::{ResultOutcome, TaskCompletion};

impl Coordinator {
    /// Handle a worker's result report.
    pub async fn report_result(self: &Arc<Self>, report: CompleteSubtaskRequest) {
        if let Some(reason) = report.error.as_deref().filter(|e| !e.is_empty()) {
            warn!(
                worker = %report.worker_id,
                subtask = %report.subtask_id,
                error = %reason,
                "Worker reported subtask error"
            );
            self.fail_subtask(&report.subtask_id, reason).await;
            return;
        }
        if report.status == ReportStatus::Error {
            let reason = match &report.data {
                serde_json::Value::String(s) if !s.is_empty() => s.clone(),
                serde_json::Value::Null => format!("worker {} returned status error", report.worker_id),
                other => other.to_string(),
            };
            self.fail_subtask(&report.subtask_id, &reason).await;
            return;
        }

        let outcome = self.ledger.complete_subtask(&report.subtask_id, report.status);
        // The reporting worker is free again; stalled windows go first.
        self.spawn_sends(self.ledger.claim_stalled());

        match outcome {
            ResultOutcome::Forward { owner, window } => {
                debug!(
                    owner = %owner.id,
                    worker = %report.worker_id,
                    subtask = %report.subtask_id,
                    start = window.start,
                    amount = window.amount,
                    "Forwarding partial result"
                );
                self.deliver(&owner, &Notice::Partial(report.data)).await;
            }
            ResultOutcome::Exhausted(completion) => {
                info!(
                    owner = %completion.owner_id,
                    worker = %report.worker_id,
                    subtask = %report.subtask_id,
                    "Input exhausted, finishing task"
                );
                let this = Arc::clone(self);
                tokio::spawn(async move { this.finish_task(completion).await });
            }
            ResultOutcome::AlreadyFinishing => {
                debug!(subtask = %report.subtask_id, "Exhaustion reported again while task drains");
            }
            ResultOutcome::Dropped => {
                debug!(subtask = %report.subtask_id, "Result for a task that is no longer running dropped");
            }
            ResultOutcome::Unknown => {
                debug!(worker = %report.worker_id, subtask = %report.subtask_id, "Result for unknown subtask ignored");
            }
        }
    }

    /// Wait for every outstanding window of the task to resolve, then tell
    /// the owner it is done.
    pub(super) async fn finish_task(self: Arc<Self>, completion: TaskCompletion) {
        let TaskCompletion { owner_id, epoch } = completion;
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                debug!(owner = %owner_id, epoch, "Shutdown while draining task");
                return;
            }
            _ = self.ledger.wait_drained(&owner_id, epoch) => {}
        }

        match self.ledger.mark_done(&owner_id, epoch) {
            Some(owner) => {
                info!(owner = %owner_id, epoch, "Task done");
                self.deliver(&owner, &Notice::Done).await;
            }
            None => {
                debug!(owner = %owner_id, epoch, "Task ended otherwise while draining, no done notice");
            }
        }
    }
}
