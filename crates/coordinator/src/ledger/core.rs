use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use indexmap::IndexSet;
use tokio::sync::Notify;
use tracing::{info, warn};

use fanout_core::{
    FanoutError, Node, NodeId, SchedulerConfig, SubtaskId, WorkerRegistration, WorkerSelection, MAX_POWER,
};

use super::types::*;

/// Everything the lock guards. Pool membership and subtask records only
/// change together, inside one critical section.
#[derive(Debug, Default)]
pub(super) struct LedgerState {
    pub(super) owners: HashMap<NodeId, OwnerRecord>,
    pub(super) workers: HashMap<NodeId, WorkerRecord>,
    /// Idle workers in the order they became free.
    pub(super) free: IndexSet<NodeId>,
    /// Worker -> the one live subtask it is running.
    pub(super) busy: HashMap<NodeId, SubtaskId>,
    pub(super) tasks: HashMap<NodeId, TaskRecord>,
    pub(super) subtasks: HashMap<SubtaskId, SubtaskRecord>,
}

/// Single source of truth for nodes, pool and work in progress.
pub struct Ledger {
    pub(super) state: Mutex<LedgerState>,
    /// Signalled whenever a subtask record goes away or changes id.
    pub(super) resolved: Notify,
    pub(super) default_window: u64,
    pub(super) err_threshold: u32,
    pub(super) selection: WorkerSelection,
}

impl Ledger {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            resolved: Notify::new(),
            default_window: config.default_window.max(1),
            err_threshold: config.err_subtask_threshold,
            selection: config.worker_selection,
        }
    }

    /// A panic elsewhere must not wedge scheduling, so poisoning is ignored.
    pub(super) fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn notify_resolved(&self) {
        self.resolved.notify_waiters();
    }

    // ── Registration ─────────────────────────────────────────────────

    /// Upsert an owner. Returns `true` for a first registration.
    pub fn register_owner(&self, node: Node) -> Result<bool, FanoutError> {
        node.validate()?;
        let mut state = self.lock();
        let id = node.id.clone();
        let created = match state.owners.get_mut(&id) {
            Some(owner) => {
                owner.node = node;
                false
            }
            None => {
                state.owners.insert(id.clone(), OwnerRecord::new(node));
                true
            }
        };
        info!(owner = %id, created, "Owner registered");
        Ok(created)
    }

    /// Upsert a worker. New and idle workers land in the free set; a busy
    /// worker keeps its subtask and the address captured when it was sent.
    pub fn register_worker(&self, registration: WorkerRegistration) -> Result<bool, FanoutError> {
        registration.node.validate()?;
        let id = registration.node.id.clone();
        let power = registration.power.min(MAX_POWER);
        if power < registration.power {
            warn!(worker = %id, declared = registration.power, power, "Declared power clamped");
        }
        let mut state = self.lock();
        let created = state
            .workers
            .insert(
                id.clone(),
                WorkerRecord {
                    node: registration.node,
                    power,
                },
            )
            .is_none();
        if !state.busy.contains_key(&id) {
            state.free.insert(id.clone());
        }
        info!(worker = %id, power, created, "Worker registered");
        Ok(created)
    }

    // ── Lookups ──────────────────────────────────────────────────────

    pub fn owner(&self, id: &NodeId) -> Option<OwnerRecord> {
        self.lock().owners.get(id).cloned()
    }

    pub fn owner_status(&self, id: &NodeId) -> Option<TaskStatus> {
        self.lock().owners.get(id).map(|o| o.status)
    }

    pub fn owner_nodes(&self) -> Vec<Node> {
        self.lock().owners.values().map(|o| o.node.clone()).collect()
    }

    pub fn worker_nodes(&self) -> Vec<Node> {
        self.lock().workers.values().map(|w| w.node.clone()).collect()
    }

    pub fn is_free(&self, worker: &NodeId) -> bool {
        self.lock().free.contains(worker)
    }

    pub fn busy_with(&self, worker: &NodeId) -> Option<SubtaskId> {
        self.lock().busy.get(worker).copied()
    }

    pub fn subtask(&self, id: &SubtaskId) -> Option<SubtaskRecord> {
        self.lock().subtasks.get(id).cloned()
    }

    /// Subtask records of one submission still sent or stalled.
    pub fn in_flight(&self, owner_id: &NodeId, epoch: u64) -> usize {
        self.lock()
            .subtasks
            .values()
            .filter(|s| &s.owner_id == owner_id && s.epoch == epoch)
            .count()
    }

    /// Subtasks currently running on a worker.
    pub fn running(&self) -> Vec<InFlight> {
        let state = self.lock();
        state
            .subtasks
            .values()
            .filter(|s| s.status == SubtaskStatus::Sent)
            .filter_map(|s| {
                Some(InFlight {
                    subtask_id: s.id,
                    worker_id: s.worker_id.clone()?,
                    target: s.target.clone()?,
                    sent_at: s.sent_at?,
                })
            })
            .collect()
    }

    /// Resolve once no subtask of `owner_id` at `epoch` remains.
    pub async fn wait_drained(&self, owner_id: &NodeId, epoch: u64) {
        loop {
            let notified = self.resolved.notified();
            tokio::pin!(notified);
            // Register before checking so a removal in between is not missed.
            notified.as_mut().enable();
            if self.in_flight(owner_id, epoch) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.lock();

        let mut owners: Vec<OwnerSnapshot> = state
            .owners
            .iter()
            .map(|(id, o)| OwnerSnapshot {
                id: id.clone(),
                label: o.label.clone(),
                status: o.status,
                epoch: o.epoch,
            })
            .collect();
        owners.sort_by(|a, b| a.id.cmp(&b.id));

        let mut workers: Vec<WorkerSnapshot> = state
            .workers
            .iter()
            .map(|(id, w)| WorkerSnapshot {
                id: id.clone(),
                power: w.power,
                busy_with: state.busy.get(id).copied(),
            })
            .collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));

        let mut tasks: Vec<TaskSnapshot> = state
            .tasks
            .iter()
            .map(|(id, t)| TaskSnapshot {
                owner_id: id.clone(),
                epoch: t.epoch,
                cursor: t.cursor,
            })
            .collect();
        tasks.sort_by(|a, b| a.owner_id.cmp(&b.owner_id));

        let mut subtasks: Vec<SubtaskSnapshot> = state
            .subtasks
            .values()
            .map(|s| SubtaskSnapshot {
                id: s.id,
                owner_id: s.owner_id.clone(),
                worker_id: s.worker_id.clone(),
                window: s.window,
                status: s.status,
                errors: s.errors,
                sent_at: s.sent_at,
            })
            .collect();
        subtasks.sort_by(|a, b| (&a.owner_id, a.window.start).cmp(&(&b.owner_id, b.window.start)));

        LedgerSnapshot {
            owners,
            workers,
            free: state.free.iter().cloned().collect(),
            tasks,
            subtasks,
        }
    }

    /// Verify the pool/ledger invariants; the error names the first violation.
    pub fn check_invariants(&self) -> Result<(), String> {
        let state = self.lock();

        for id in &state.free {
            if state.busy.contains_key(id) {
                return Err(format!("worker {id} is both free and busy"));
            }
            if !state.workers.contains_key(id) {
                return Err(format!("free worker {id} is not registered"));
            }
        }
        for id in state.workers.keys() {
            if !state.free.contains(id) && !state.busy.contains_key(id) {
                return Err(format!("worker {id} is neither free nor busy"));
            }
        }
        for (worker, sid) in &state.busy {
            match state.subtasks.get(sid) {
                Some(s) if s.worker_id.as_ref() == Some(worker) && s.status == SubtaskStatus::Sent => {}
                _ => return Err(format!("busy worker {worker} has no live subtask {sid}")),
            }
        }

        let mut holders = HashSet::new();
        for s in state.subtasks.values() {
            match (&s.worker_id, s.status) {
                (Some(worker), SubtaskStatus::Sent) => {
                    if state.busy.get(worker) != Some(&s.id) {
                        return Err(format!("subtask {} is sent but {worker} is not busy with it", s.id));
                    }
                    if !holders.insert(worker.clone()) {
                        return Err(format!("worker {worker} holds two live subtasks"));
                    }
                }
                (None, SubtaskStatus::Error) => {}
                _ => return Err(format!("subtask {} has an inconsistent state", s.id)),
            }
        }

        let mut by_task: HashMap<(&NodeId, u64), Vec<fanout_core::Window>> = HashMap::new();
        for s in state.subtasks.values() {
            by_task.entry((&s.owner_id, s.epoch)).or_default().push(s.window);
        }
        for ((owner, _), mut windows) in by_task {
            windows.sort_by_key(|w| w.start);
            for pair in windows.windows(2) {
                if pair[0].overlaps(&pair[1]) {
                    return Err(format!("task {owner} has overlapping windows {} and {}", pair[0], pair[1]));
                }
            }
        }
        Ok(())
    }
}
