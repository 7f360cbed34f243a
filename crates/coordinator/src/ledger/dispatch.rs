use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use fanout_core::{NodeId, SubtaskId, Window, WorkerSelection};

use super::core::{Ledger, LedgerState};
use super::types::*;

/// A worker just taken out of the free set.
pub(super) struct FreeWorker {
    pub(super) id: NodeId,
    pub(super) power: u64,
    pub(super) target: String,
}

impl LedgerState {
    /// Pop the next free worker per `selection`, skipping stale ids.
    pub(super) fn take_free_worker(&mut self, selection: WorkerSelection) -> Option<FreeWorker> {
        loop {
            let id = match selection {
                WorkerSelection::Fifo => self.free.shift_remove_index(0)?,
                WorkerSelection::ById => {
                    let id = self.free.iter().min()?.clone();
                    self.free.shift_remove(&id);
                    id
                }
            };
            if let Some(worker) = self.workers.get(&id) {
                return Some(FreeWorker {
                    power: worker.power,
                    target: worker.node.public_base(),
                    id,
                });
            }
        }
    }

    /// Bind `window` to an already-claimed worker under a fresh subtask id.
    pub(super) fn start_subtask(
        &mut self,
        worker: FreeWorker,
        owner_id: NodeId,
        epoch: u64,
        window: Window,
        errors: u32,
        payload: Arc<TaskPayload>,
    ) -> Assignment {
        let id = Uuid::new_v4();
        let request = payload.request(id, window);
        self.busy.insert(worker.id.clone(), id);
        self.subtasks.insert(
            id,
            SubtaskRecord {
                id,
                owner_id: owner_id.clone(),
                epoch,
                worker_id: Some(worker.id.clone()),
                target: Some(worker.target.clone()),
                window,
                sent_at: Some(Utc::now()),
                done_at: None,
                status: SubtaskStatus::Sent,
                errors,
                payload,
            },
        );
        Assignment {
            owner_id,
            worker_id: worker.id,
            target: worker.target,
            request,
            errors,
        }
    }

    /// Move a stalled subtask onto `worker` under a new id.
    pub(super) fn resume_stalled(&mut self, subtask_id: SubtaskId, worker: FreeWorker) -> Result<Assignment, FreeWorker> {
        match self.subtasks.remove(&subtask_id) {
            Some(old) => Ok(self.start_subtask(worker, old.owner_id, old.epoch, old.window, old.errors, old.payload)),
            None => Err(worker),
        }
    }

    /// Stalled subtasks of one submission, lowest window first.
    fn stalled_of(&self, owner_id: &NodeId, epoch: u64) -> Vec<SubtaskId> {
        let mut stalled: Vec<(u64, SubtaskId)> = self
            .subtasks
            .values()
            .filter(|s| s.status == SubtaskStatus::Error && &s.owner_id == owner_id && s.epoch == epoch)
            .map(|s| (s.window.start, s.id))
            .collect();
        stalled.sort();
        stalled.into_iter().map(|(_, id)| id).collect()
    }

    /// Return a claimed worker that ended up unused.
    pub(super) fn unclaim(&mut self, worker: FreeWorker) {
        self.free.insert(worker.id);
    }
}

impl Ledger {
    /// One dispatch tick for a task: every free worker gets a window, stalled
    /// windows of this task first, then fresh ones cut from the cursor.
    pub fn plan_dispatch(&self, owner_id: &NodeId, epoch: u64) -> DispatchPlan {
        let mut state = self.lock();
        match state.tasks.get(owner_id) {
            Some(task) if task.epoch == epoch => {}
            _ => return DispatchPlan::TaskGone,
        }
        if !state.owners.contains_key(owner_id) {
            if let Some(task) = state.tasks.remove(owner_id) {
                task.cancel.cancel();
            }
            return DispatchPlan::TaskGone;
        }

        let mut stalled = state.stalled_of(owner_id, epoch);
        stalled.reverse();
        let resumed = !stalled.is_empty();

        let mut assignments = Vec::new();
        let mut exhausted = false;
        while let Some(worker) = state.take_free_worker(self.selection) {
            if let Some(sid) = stalled.pop() {
                match state.resume_stalled(sid, worker) {
                    Ok(assignment) => assignments.push(assignment),
                    Err(worker) => state.unclaim(worker),
                }
                continue;
            }

            let Some(task) = state.tasks.get_mut(owner_id) else {
                state.unclaim(worker);
                break;
            };
            let room = u64::MAX - task.cursor;
            if room == 0 {
                state.unclaim(worker);
                exhausted = true;
                break;
            }
            let wanted = if worker.power > 0 { worker.power } else { self.default_window };
            let amount = wanted.min(room);
            let window = Window {
                start: task.cursor,
                amount,
            };
            task.cursor += amount;
            let payload = Arc::clone(&task.payload);
            assignments.push(state.start_subtask(worker, owner_id.clone(), epoch, window, 0, payload));
        }
        if exhausted {
            if let Some(task) = state.tasks.remove(owner_id) {
                task.cancel.cancel();
            }
        }
        drop(state);

        if resumed {
            self.notify_resolved();
        }
        if !assignments.is_empty() {
            debug!(owner = %owner_id, epoch, count = assignments.len(), "Dispatch tick planned");
        }
        if exhausted {
            info!(owner = %owner_id, epoch, "Cursor reached the end of the input space");
            return DispatchPlan::Exhausted {
                assignments,
                completion: TaskCompletion {
                    owner_id: owner_id.clone(),
                    epoch,
                },
            };
        }
        DispatchPlan::Assign(assignments)
    }

    /// Hand free workers to stalled subtasks of any live task. Called after
    /// every event that frees or adds a worker.
    pub fn claim_stalled(&self) -> Vec<Assignment> {
        let mut state = self.lock();
        let mut stalled: Vec<(NodeId, u64, SubtaskId, bool)> = state
            .subtasks
            .values()
            .filter(|s| s.status == SubtaskStatus::Error)
            .map(|s| {
                let live = state.owners.get(&s.owner_id).is_some_and(|o| o.is_live(s.epoch));
                (s.owner_id.clone(), s.window.start, s.id, live)
            })
            .collect();
        if stalled.is_empty() {
            return Vec::new();
        }
        stalled.sort();

        let mut orphaned = 0;
        let mut assignments = Vec::new();
        for (_, _, sid, live) in stalled {
            if !live {
                state.subtasks.remove(&sid);
                orphaned += 1;
                continue;
            }
            let Some(worker) = state.take_free_worker(self.selection) else {
                continue;
            };
            match state.resume_stalled(sid, worker) {
                Ok(assignment) => assignments.push(assignment),
                Err(worker) => state.unclaim(worker),
            }
        }
        drop(state);

        if orphaned > 0 || !assignments.is_empty() {
            debug!(resumed = assignments.len(), orphaned, "Claimed stalled subtasks");
            self.notify_resolved();
        }
        assignments
    }
}
