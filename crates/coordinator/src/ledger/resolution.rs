use chrono::Utc;
use tracing::{debug, info, warn};

use fanout_core::{NodeId, ReportStatus, SubtaskId};

use super::core::{Ledger, LedgerState};
use super::types::*;

impl LedgerState {
    /// Take a subtask off its worker. The worker returns to the free set
    /// only while it is still registered.
    fn release(&mut self, record: &SubtaskRecord) {
        let Some(worker) = &record.worker_id else {
            return;
        };
        if self.busy.get(worker) == Some(&record.id) {
            self.busy.remove(worker);
            if self.workers.contains_key(worker) {
                self.free.insert(worker.clone());
            }
        }
    }

    fn is_live(&self, owner_id: &NodeId, epoch: u64) -> bool {
        self.owners.get(owner_id).is_some_and(|o| o.is_live(epoch))
    }
}

impl Ledger {
    /// Resolve a subtask that reported `ok` or `empty`.
    ///
    /// A late report for a stalled subtask is accepted as well; the window is
    /// then considered solved.
    pub fn complete_subtask(&self, subtask_id: &SubtaskId, status: ReportStatus) -> ResultOutcome {
        let mut state = self.lock();
        let Some(mut record) = state.subtasks.remove(subtask_id) else {
            return ResultOutcome::Unknown;
        };
        state.release(&record);
        record.status = SubtaskStatus::Done;
        record.done_at = Some(Utc::now());

        let owner_id = record.owner_id.clone();
        let outcome = match status {
            ReportStatus::Empty => {
                let current = state.tasks.get(&owner_id).is_some_and(|t| t.epoch == record.epoch);
                if current {
                    if let Some(task) = state.tasks.remove(&owner_id) {
                        task.cancel.cancel();
                    }
                    ResultOutcome::Exhausted(TaskCompletion {
                        owner_id,
                        epoch: record.epoch,
                    })
                } else if state.is_live(&owner_id, record.epoch) {
                    ResultOutcome::AlreadyFinishing
                } else {
                    ResultOutcome::Dropped
                }
            }
            _ => match state.owners.get(&owner_id) {
                Some(owner) if owner.is_live(record.epoch) => ResultOutcome::Forward {
                    owner: owner.node.clone(),
                    window: record.window,
                },
                _ => ResultOutcome::Dropped,
            },
        };
        drop(state);

        self.notify_resolved();
        debug!(
            subtask = %record.id,
            owner = %record.owner_id,
            start = record.window.start,
            amount = record.window.amount,
            ?status,
            "Subtask resolved"
        );
        outcome
    }

    /// Route one failure of a subtask: reassign, stall or abort its task.
    pub fn fail_subtask(&self, subtask_id: &SubtaskId) -> FailureOutcome {
        let mut state = self.lock();
        let outcome = self.fail_locked(&mut state, subtask_id);
        drop(state);

        if !matches!(outcome, FailureOutcome::Unknown) {
            self.notify_resolved();
        }
        outcome
    }

    fn fail_locked(&self, state: &mut LedgerState, subtask_id: &SubtaskId) -> FailureOutcome {
        let Some(mut record) = state.subtasks.remove(subtask_id) else {
            return FailureOutcome::Unknown;
        };
        if record.status != SubtaskStatus::Sent {
            // Already stalled; a duplicate error report changes nothing.
            state.subtasks.insert(record.id, record);
            return FailureOutcome::Unknown;
        }
        state.release(&record);

        if !state.is_live(&record.owner_id, record.epoch) {
            return FailureOutcome::Released;
        }

        record.errors += 1;
        if record.errors > self.err_threshold {
            return FailureOutcome::Aborted(Self::abort_locked(state, record));
        }

        match state.take_free_worker(self.selection) {
            Some(worker) => FailureOutcome::Reassigned(state.start_subtask(
                worker,
                record.owner_id,
                record.epoch,
                record.window,
                record.errors,
                record.payload,
            )),
            None => {
                let subtask_id = record.id;
                let errors = record.errors;
                record.status = SubtaskStatus::Error;
                record.worker_id = None;
                record.target = None;
                state.subtasks.insert(subtask_id, record);
                FailureOutcome::Stalled { subtask_id, errors }
            }
        }
    }

    fn abort_locked(state: &mut LedgerState, record: SubtaskRecord) -> TaskAbort {
        let owner = state.owners.get_mut(&record.owner_id).map(|owner| {
            owner.status = TaskStatus::Error;
            owner.node.clone()
        });
        if state.tasks.get(&record.owner_id).is_some_and(|t| t.epoch == record.epoch) {
            if let Some(task) = state.tasks.remove(&record.owner_id) {
                task.cancel.cancel();
            }
        }
        state.drop_stalled(&record.owner_id, None);
        TaskAbort {
            owner_id: record.owner_id,
            owner,
            window: record.window,
            errors: record.errors,
        }
    }

    /// Remove a worker from the registry and both pool sets. A subtask it
    /// was running goes through the failure path in the same critical section.
    pub fn evict_worker(&self, worker_id: &NodeId) -> Option<WorkerEviction> {
        let mut state = self.lock();
        state.workers.remove(worker_id)?;
        state.free.shift_remove(worker_id);
        let failed = match state.busy.get(worker_id).copied() {
            Some(sid) => Some((sid, self.fail_locked(&mut state, &sid))),
            None => None,
        };
        // fail_locked only releases a worker it finds busy with that subtask.
        state.busy.remove(worker_id);
        drop(state);

        if failed.is_some() {
            self.notify_resolved();
        }
        warn!(worker = %worker_id, busy = failed.is_some(), "Worker evicted");
        Some(WorkerEviction {
            worker_id: worker_id.clone(),
            failed,
        })
    }

    /// Remove an owner and everything it still had scheduled. Returns
    /// `false` for an unknown id.
    pub fn evict_owner(&self, owner_id: &NodeId) -> bool {
        let mut state = self.lock();
        if state.owners.remove(owner_id).is_none() {
            return false;
        }
        if let Some(task) = state.tasks.remove(owner_id) {
            task.cancel.cancel();
        }
        let dropped = state.drop_stalled(owner_id, None);
        drop(state);

        if dropped > 0 {
            self.notify_resolved();
        }
        info!(owner = %owner_id, "Owner evicted");
        true
    }
}
