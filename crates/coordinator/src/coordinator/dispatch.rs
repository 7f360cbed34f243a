use std::sync::Arc;

use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fanout_core::NodeId;

use super::Coordinator;
use crate::ledger::{Assignment, DispatchPlan};

impl Coordinator {
    pub(super) fn spawn_dispatch_loop(
        self: &Arc<Self>,
        owner_id: NodeId,
        epoch: u64,
        cancel: CancellationToken,
    ) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_dispatch_loop(owner_id, epoch, cancel).await });
    }

    /// One loop per submission. Exits when cancelled or when the task record
    /// is gone.
    async fn run_dispatch_loop(self: Arc<Self>, owner_id: NodeId, epoch: u64, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.scheduler.dispatch_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(owner = %owner_id, epoch, "Dispatch loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(owner = %owner_id, epoch, "Dispatch loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    match self.ledger.plan_dispatch(&owner_id, epoch) {
                        DispatchPlan::Assign(assignments) => self.send_all(assignments).await,
                        DispatchPlan::Exhausted { assignments, completion } => {
                            self.send_all(assignments).await;
                            let this = Arc::clone(&self);
                            tokio::spawn(async move { this.finish_task(completion).await });
                            break;
                        }
                        DispatchPlan::TaskGone => {
                            info!(owner = %owner_id, epoch, "Task no longer exists, dispatch loop exiting");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Send windows to their workers. Sends that fail are routed through the
    /// failure handler, and whatever it reassigns is sent in the next round.
    pub(super) async fn send_all(self: &Arc<Self>, assignments: Vec<Assignment>) {
        let mut pending = assignments;
        while !pending.is_empty() {
            let round = std::mem::take(&mut pending);
            let results = join_all(round.into_iter().map(|a| async move {
                let result = self.transport.dispatch(&a.target, &a.request).await;
                (a, result)
            }))
            .await;

            for (a, result) in results {
                match result {
                    Ok(()) => debug!(
                        owner = %a.owner_id,
                        worker = %a.worker_id,
                        subtask = %a.subtask_id(),
                        start = a.request.start,
                        amount = a.request.amount,
                        "Subtask dispatched"
                    ),
                    Err(e) => {
                        warn!(
                            worker = %a.worker_id,
                            subtask = %a.subtask_id(),
                            error = %e,
                            "Failed to dispatch subtask"
                        );
                        let reason = format!("dispatch to worker {} failed: {e}", a.worker_id);
                        pending.extend(self.fail_and_route(&a.subtask_id(), &reason));
                    }
                }
            }
        }
    }

    /// Send in the background; used where the caller must not wait on workers.
    pub(super) fn spawn_sends(self: &Arc<Self>, assignments: Vec<Assignment>) {
        if assignments.is_empty() {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move { this.send_all(assignments).await });
    }
}
