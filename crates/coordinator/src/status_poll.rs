//! Optional check of busy workers via their status endpoint.
//!
//! A worker that no longer says "solving" while the ledger still has it on a
//! subtask has lost that subtask; the window takes the failure path.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use fanout_core::{SubtaskId, WorkerActivity};

use crate::coordinator::Coordinator;

pub struct StatusPoller {
    coordinator: Arc<Coordinator>,
    /// Subtasks younger than this are skipped; their worker may not have
    /// picked them up yet, or may have answered and be reporting right now.
    grace: Duration,
}

impl StatusPoller {
    pub fn new(coordinator: Arc<Coordinator>, grace: Duration) -> Self {
        Self { coordinator, grace }
    }

    /// Poll every busy worker once. Returns the subtasks that were failed.
    pub async fn sweep(&self) -> Vec<SubtaskId> {
        let now = Utc::now();
        let grace = chrono::Duration::from_std(self.grace).unwrap_or(chrono::Duration::zero());
        let running: Vec<_> = self
            .coordinator
            .ledger()
            .running()
            .into_iter()
            .filter(|r| now - r.sent_at >= grace)
            .collect();

        let transport = self.coordinator.transport();
        let answers = join_all(running.iter().map(|r| async move { (r, transport.check_status(&r.target).await) })).await;

        let mut failed = Vec::new();
        for (r, answer) in answers {
            let reason = match answer {
                Ok(WorkerActivity::Solving) => continue,
                Ok(activity) => format!("worker {} reports {:?} while assigned", r.worker_id, activity),
                Err(e) => format!("status check of worker {} failed: {e}", r.worker_id),
            };
            warn!(worker = %r.worker_id, subtask = %r.subtask_id, error = %reason, "Worker lost its subtask");
            self.coordinator.fail_subtask(&r.subtask_id, &reason).await;
            failed.push(r.subtask_id);
        }
        failed
    }

    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let failed = self.sweep().await;
                    if !failed.is_empty() {
                        debug!(count = failed.len(), "Status poll failed subtasks");
                    }
                }
                _ = shutdown.cancelled() => {
                    break;
                }
            }
        }
        debug!("Status poller stopped");
    }
}
