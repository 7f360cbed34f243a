//! Shared fixtures: a recording in-memory transport and node builders.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use fanout_coordinator::{Coordinator, NodeTransport, TransportError};
use fanout_core::{
    ComputeRequest, Node, NodeId, SchedulerConfig, ScriptConfig, TaskConfig, TransportConfig, WorkerActivity,
    WorkerRegistration,
};

pub const TIMEOUT: Duration = Duration::from_secs(3);
pub const SETTLE: Duration = Duration::from_millis(80);

/// Records every outbound call. Dispatches can be made to fail, probes to
/// report a node unreachable, and status checks to return a chosen activity.
#[derive(Default)]
pub struct MockTransport {
    dispatches: Mutex<Vec<(String, ComputeRequest)>>,
    dispatch_attempts: AtomicUsize,
    failing_dispatches: AtomicUsize,
    partials: Mutex<Vec<(NodeId, Value)>>,
    done: Mutex<Vec<NodeId>>,
    errors: Mutex<Vec<(NodeId, String)>>,
    unreachable: Mutex<HashSet<NodeId>>,
    activity: Mutex<HashMap<String, WorkerActivity>>,
}

fn refused() -> TransportError {
    TransportError::Status {
        status: 503,
        body: "connection refused".into(),
    }
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` dispatch attempts fail.
    pub fn fail_next_dispatches(&self, n: usize) {
        self.failing_dispatches.store(n, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, id: &str) {
        self.unreachable.lock().unwrap().insert(id.into());
    }

    pub fn set_activity(&self, target: &str, activity: WorkerActivity) {
        self.activity.lock().unwrap().insert(target.to_string(), activity);
    }

    /// Successful dispatches as `(target, request)`.
    pub fn dispatches(&self) -> Vec<(String, ComputeRequest)> {
        self.dispatches.lock().unwrap().clone()
    }

    pub fn dispatch_attempts(&self) -> usize {
        self.dispatch_attempts.load(Ordering::SeqCst)
    }

    pub fn partials(&self) -> Vec<(NodeId, Value)> {
        self.partials.lock().unwrap().clone()
    }

    pub fn done(&self) -> Vec<NodeId> {
        self.done.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<(NodeId, String)> {
        self.errors.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeTransport for MockTransport {
    async fn dispatch(&self, target: &str, request: &ComputeRequest) -> Result<(), TransportError> {
        self.dispatch_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_dispatches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(refused());
        }
        self.dispatches
            .lock()
            .unwrap()
            .push((target.to_string(), request.clone()));
        Ok(())
    }

    async fn forward_partial(&self, owner: &Node, data: &Value) -> Result<(), TransportError> {
        self.partials.lock().unwrap().push((owner.id.clone(), data.clone()));
        Ok(())
    }

    async fn notify_done(&self, owner: &Node) -> Result<(), TransportError> {
        self.done.lock().unwrap().push(owner.id.clone());
        Ok(())
    }

    async fn notify_error(&self, owner: &Node, reason: &str) -> Result<(), TransportError> {
        self.errors.lock().unwrap().push((owner.id.clone(), reason.to_string()));
        Ok(())
    }

    async fn probe(&self, node: &Node) -> Result<(), TransportError> {
        if self.unreachable.lock().unwrap().contains(&node.id) {
            return Err(refused());
        }
        Ok(())
    }

    async fn check_status(&self, target: &str) -> Result<WorkerActivity, TransportError> {
        Ok(self
            .activity
            .lock()
            .unwrap()
            .get(target)
            .copied()
            .unwrap_or(WorkerActivity::Solving))
    }
}

// ── Builders ─────────────────────────────────────────────────────────

/// Worker whose dispatch target is `http://{id}:9000`.
pub fn worker(id: &str, power: u64) -> WorkerRegistration {
    WorkerRegistration {
        node: Node::new(id, id, 9000, 9001),
        power,
    }
}

pub fn target(worker_id: &str) -> String {
    format!("http://{worker_id}:9000")
}

pub fn owner(id: &str) -> Node {
    Node::new(id, id, 7000, 7001)
}

pub fn seed() -> Value {
    json!({"matrix": [[0, 3, 4], [3, 0, 5], [4, 5, 0]]})
}

pub fn task(owner: &str) -> TaskConfig {
    TaskConfig {
        owner_id: owner.into(),
        generator: ScriptConfig {
            script: "function permutation(i) { return i; }".into(),
            func_name: "permutation".into(),
        },
        compute: ScriptConfig {
            script: "function cost(route) { return route; }".into(),
            func_name: "cost".into(),
        },
        data: seed(),
        task_name: "tsp".into(),
    }
}

/// Dispatch loop ticking every 20ms.
pub fn fast_scheduler() -> SchedulerConfig {
    SchedulerConfig {
        dispatch_interval_ms: 20,
        ..SchedulerConfig::default()
    }
}

/// Dispatch loop that ticks once on start and then practically never.
pub fn single_tick_scheduler() -> SchedulerConfig {
    SchedulerConfig {
        dispatch_interval_ms: 3_600_000,
        ..SchedulerConfig::default()
    }
}

pub fn quick_delivery() -> TransportConfig {
    TransportConfig {
        timeout_secs: 1,
        notify_retries: 2,
        notify_backoff_ms: 5,
    }
}

pub fn coordinator(scheduler: SchedulerConfig, transport: &Arc<MockTransport>) -> Arc<Coordinator> {
    Coordinator::new(scheduler, quick_delivery(), Arc::clone(transport) as Arc<dyn NodeTransport>)
}

/// Poll `check` until it holds or [`TIMEOUT`] passes.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
