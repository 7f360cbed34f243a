//! Scheduling engine: drives the [`Ledger`] and performs the network I/O its
//! decisions call for.
//!
//! - `dispatch`: per-task dispatch loops and sending windows to workers
//! - `failure`: routing subtask failures into reassignment or task abort
//! - `completion`: worker results, partial forwarding and the completion drain
//! - `notice`: owner notifications with retry

mod completion;
mod dispatch;
mod failure;
mod notice;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use fanout_core::{FanoutError, Node, NodeId, SchedulerConfig, TaskConfig, TransportConfig, WorkerRegistration};

use crate::ledger::{Ledger, LedgerSnapshot};
use crate::transport::NodeTransport;

/// Owns the ledger and the outbound transport. Shared as `Arc<Coordinator>`
/// between HTTP handlers, dispatch loops and health monitors.
pub struct Coordinator {
    ledger: Ledger,
    transport: Arc<dyn NodeTransport>,
    scheduler: SchedulerConfig,
    /// Retry policy for owner notifications.
    delivery: TransportConfig,
    /// Stops background work that is not tied to one task.
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(scheduler: SchedulerConfig, delivery: TransportConfig, transport: Arc<dyn NodeTransport>) -> Arc<Self> {
        Arc::new(Self {
            ledger: Ledger::new(&scheduler),
            transport,
            scheduler,
            delivery,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn transport(&self) -> &Arc<dyn NodeTransport> {
        &self.transport
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.ledger.snapshot()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    // ── Node registry ────────────────────────────────────────────────

    pub fn register_owner(&self, node: Node) -> Result<(), FanoutError> {
        self.ledger.register_owner(node)?;
        Ok(())
    }

    /// Register a worker and put it to work on a stalled window if any.
    pub fn register_worker(self: &Arc<Self>, registration: WorkerRegistration) -> Result<(), FanoutError> {
        self.ledger.register_worker(registration)?;
        self.spawn_sends(self.ledger.claim_stalled());
        Ok(())
    }

    /// Drop an owner that failed its health probe.
    pub fn evict_owner(&self, owner_id: &NodeId) -> bool {
        self.ledger.evict_owner(owner_id)
    }

    // ── Tasks ────────────────────────────────────────────────────────

    /// Accept a task and start its dispatch loop.
    pub fn submit_task(self: &Arc<Self>, config: TaskConfig) -> Result<(), FanoutError> {
        let start = self.ledger.submit_task(config)?;
        self.spawn_dispatch_loop(start.owner_id, start.epoch, start.cancel);
        Ok(())
    }

    pub fn close_task(&self, owner_id: &NodeId) -> Result<(), FanoutError> {
        self.ledger.close_task(owner_id)?;
        Ok(())
    }

    /// Cancel every dispatch loop and background drain.
    pub fn shutdown(&self) {
        let loops = self.ledger.cancel_all();
        self.shutdown.cancel();
        info!(loops, "Coordinator stopped");
    }
}
