use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use fanout_core::{ComputeRequest, Node, NodeId, ScriptConfig, SubtaskId, Window};

// ── Owners & workers ─────────────────────────────────────────────────

/// Lifecycle of an owner's current task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Registered, nothing submitted yet.
    Pending,
    Running,
    Error,
    Done,
    Closed,
}

#[derive(Debug, Clone)]
pub struct OwnerRecord {
    pub node: Node,
    pub generator: ScriptConfig,
    pub compute: ScriptConfig,
    pub label: String,
    pub status: TaskStatus,
    /// Submission counter; bumps on every accepted task.
    pub epoch: u64,
}

impl OwnerRecord {
    pub(super) fn new(node: Node) -> Self {
        Self {
            node,
            generator: ScriptConfig::default(),
            compute: ScriptConfig::default(),
            label: String::new(),
            status: TaskStatus::Pending,
            epoch: 0,
        }
    }

    /// Whether results and failures of `epoch` still matter to this owner.
    pub(super) fn is_live(&self, epoch: u64) -> bool {
        self.epoch == epoch && self.status == TaskStatus::Running
    }
}

#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub node: Node,
    /// Declared window size; 0 means "use the default".
    pub power: u64,
}

// ── Tasks & subtasks ─────────────────────────────────────────────────

/// Everything a worker needs besides the window. Shared by every subtask
/// of one submission so a window can be resent after the task record is gone.
#[derive(Debug)]
pub struct TaskPayload {
    pub generator: ScriptConfig,
    pub compute: ScriptConfig,
    pub data: serde_json::Value,
}

impl TaskPayload {
    pub(super) fn request(&self, subtask_id: SubtaskId, window: Window) -> ComputeRequest {
        ComputeRequest {
            subtask_id,
            generate: self.generator.clone(),
            compute: self.compute.clone(),
            data: self.data.clone(),
            amount: window.amount,
            start: window.start,
        }
    }
}

#[derive(Debug)]
pub(super) struct TaskRecord {
    pub(super) epoch: u64,
    pub(super) payload: Arc<TaskPayload>,
    /// Next unassigned work unit.
    pub(super) cursor: u64,
    pub(super) cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtaskStatus {
    /// On a worker.
    Sent,
    /// Failed and waiting for a free worker.
    Error,
    Done,
}

#[derive(Debug, Clone)]
pub struct SubtaskRecord {
    pub id: SubtaskId,
    pub owner_id: NodeId,
    pub epoch: u64,
    pub worker_id: Option<NodeId>,
    /// Worker address captured when the window was sent.
    pub target: Option<String>,
    pub window: Window,
    pub sent_at: Option<DateTime<Utc>>,
    pub done_at: Option<DateTime<Utc>>,
    pub status: SubtaskStatus,
    /// Failures so far, carried across reassignments.
    pub errors: u32,
    pub(super) payload: Arc<TaskPayload>,
}

// ── Outcomes handed back to the coordinator ──────────────────────────

/// A window bound to a worker, ready to be sent outside the lock.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub owner_id: NodeId,
    pub worker_id: NodeId,
    pub target: String,
    pub request: ComputeRequest,
    pub errors: u32,
}

impl Assignment {
    pub fn subtask_id(&self) -> SubtaskId {
        self.request.subtask_id
    }

    pub fn window(&self) -> Window {
        self.request.window()
    }
}

#[derive(Debug)]
pub enum DispatchPlan {
    Assign(Vec<Assignment>),
    /// The task record is gone or was replaced; the loop should exit.
    TaskGone,
    /// The cursor reached the end of the input space. The task record is
    /// removed and its loop cancelled; the assignments still need sending.
    Exhausted {
        assignments: Vec<Assignment>,
        completion: TaskCompletion,
    },
}

/// A task that hit the retry threshold.
#[derive(Debug)]
pub struct TaskAbort {
    pub owner_id: NodeId,
    /// `None` when the owner is no longer registered.
    pub owner: Option<Node>,
    pub window: Window,
    pub errors: u32,
}

#[derive(Debug)]
pub enum FailureOutcome {
    /// No live record under that id.
    Unknown,
    /// The subtask's task is over; the record was dropped.
    Released,
    Reassigned(Assignment),
    /// No free worker; the window waits in the ledger.
    Stalled { subtask_id: SubtaskId, errors: u32 },
    Aborted(TaskAbort),
}

/// A task whose input ran out. Its loop is already cancelled.
#[derive(Debug)]
pub struct TaskCompletion {
    pub owner_id: NodeId,
    pub epoch: u64,
}

#[derive(Debug)]
pub enum ResultOutcome {
    Unknown,
    Forward { owner: Node, window: Window },
    /// Result of a closed, aborted or replaced task.
    Dropped,
    Exhausted(TaskCompletion),
    /// Exhaustion reported again while the task is already draining.
    AlreadyFinishing,
}

/// Accepted submission.
#[derive(Debug)]
pub struct TaskStart {
    pub owner_id: NodeId,
    pub epoch: u64,
    pub cancel: CancellationToken,
    /// Whether a previous submission was still dispatching.
    pub replaced: bool,
}

/// A worker removed by the health monitor.
#[derive(Debug)]
pub struct WorkerEviction {
    pub worker_id: NodeId,
    /// The subtask it was running, already pushed through the failure path.
    pub failed: Option<(SubtaskId, FailureOutcome)>,
}

/// Busy subtask as seen by the status poller.
#[derive(Debug, Clone)]
pub struct InFlight {
    pub subtask_id: SubtaskId,
    pub worker_id: NodeId,
    pub target: String,
    pub sent_at: DateTime<Utc>,
}

// ── Snapshots ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct OwnerSnapshot {
    pub id: NodeId,
    pub label: String,
    pub status: TaskStatus,
    pub epoch: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub id: NodeId,
    pub power: u64,
    pub busy_with: Option<SubtaskId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub owner_id: NodeId,
    pub epoch: u64,
    pub cursor: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubtaskSnapshot {
    pub id: SubtaskId,
    pub owner_id: NodeId,
    pub worker_id: Option<NodeId>,
    pub window: Window,
    pub status: SubtaskStatus,
    pub errors: u32,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Point-in-time copy of the whole ledger, served by `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerSnapshot {
    pub owners: Vec<OwnerSnapshot>,
    pub workers: Vec<WorkerSnapshot>,
    pub free: Vec<NodeId>,
    pub tasks: Vec<TaskSnapshot>,
    pub subtasks: Vec<SubtaskSnapshot>,
}
