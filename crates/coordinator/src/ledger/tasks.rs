use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use fanout_core::{FanoutError, Node, NodeId, TaskConfig};

use super::core::{Ledger, LedgerState};
use super::types::*;

impl LedgerState {
    /// Drop stalled subtasks of `owner_id`, except those of `keep_epoch`.
    pub(super) fn drop_stalled(&mut self, owner_id: &NodeId, keep_epoch: Option<u64>) -> usize {
        let before = self.subtasks.len();
        self.subtasks.retain(|_, s| {
            !(s.status == SubtaskStatus::Error && &s.owner_id == owner_id && Some(s.epoch) != keep_epoch)
        });
        before - self.subtasks.len()
    }
}

impl Ledger {
    /// Accept a task for a registered owner, replacing any previous one.
    ///
    /// The caller starts the dispatch loop on the returned token; the loop of
    /// a replaced submission is cancelled here.
    pub fn submit_task(&self, config: TaskConfig) -> Result<TaskStart, FanoutError> {
        let owner_id = config.owner_id;
        let mut state = self.lock();
        let Some(owner) = state.owners.get_mut(&owner_id) else {
            return Err(FanoutError::OwnerNotFound(owner_id.to_string()));
        };

        owner.epoch += 1;
        owner.status = TaskStatus::Running;
        owner.generator = config.generator.clone();
        owner.compute = config.compute.clone();
        owner.label = config.task_name;
        let epoch = owner.epoch;

        let payload = Arc::new(TaskPayload {
            generator: config.generator,
            compute: config.compute,
            data: config.data,
        });
        let cancel = CancellationToken::new();
        let replaced = state
            .tasks
            .insert(
                owner_id.clone(),
                TaskRecord {
                    epoch,
                    payload,
                    cursor: 0,
                    cancel: cancel.clone(),
                },
            )
            .map(|old| old.cancel.cancel())
            .is_some();
        let dropped = state.drop_stalled(&owner_id, Some(epoch));
        drop(state);

        if dropped > 0 {
            debug!(owner = %owner_id, dropped, "Dropped stalled subtasks of replaced task");
            self.notify_resolved();
        }
        info!(owner = %owner_id, epoch, replaced, "Task submitted");
        Ok(TaskStart {
            owner_id,
            epoch,
            cancel,
            replaced,
        })
    }

    /// Stop an owner's task without notifying it. Returns whether a dispatch
    /// loop was still running.
    pub fn close_task(&self, owner_id: &NodeId) -> Result<bool, FanoutError> {
        let mut state = self.lock();
        let Some(owner) = state.owners.get_mut(owner_id) else {
            return Err(FanoutError::OwnerNotFound(owner_id.to_string()));
        };
        owner.status = TaskStatus::Closed;
        let stopped = state.tasks.remove(owner_id).map(|t| t.cancel.cancel()).is_some();
        let dropped = state.drop_stalled(owner_id, None);
        drop(state);

        if dropped > 0 {
            self.notify_resolved();
        }
        info!(owner = %owner_id, stopped, "Task closed");
        Ok(stopped)
    }

    /// Mark a drained submission done. Returns the owner to notify, or `None`
    /// when the task was aborted, closed or replaced in the meantime.
    pub fn mark_done(&self, owner_id: &NodeId, epoch: u64) -> Option<Node> {
        let mut state = self.lock();
        let owner = state.owners.get_mut(owner_id)?;
        if !owner.is_live(epoch) {
            return None;
        }
        owner.status = TaskStatus::Done;
        Some(owner.node.clone())
    }

    /// Cancel every dispatch loop. Used on shutdown.
    pub fn cancel_all(&self) -> usize {
        let state = self.lock();
        for task in state.tasks.values() {
            task.cancel.cancel();
        }
        state.tasks.len()
    }
}
