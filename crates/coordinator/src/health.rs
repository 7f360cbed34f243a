//! Liveness probing of registered owners and workers.
//!
//! One [`HealthMonitor`] per node class. Each sweep probes every node of
//! that class concurrently and evicts nodes that missed
//! `failure_threshold` probes in a row.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fanout_core::{HealthConfig, NodeId};

use crate::coordinator::Coordinator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    Owner,
    Worker,
}

impl std::fmt::Display for NodeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeClass::Owner => write!(f, "owner"),
            NodeClass::Worker => write!(f, "worker"),
        }
    }
}

/// Result of one probe cycle.
#[derive(Debug, Default, Clone)]
pub struct SweepReport {
    pub online: usize,
    pub disconnected: Vec<NodeId>,
}

pub struct HealthMonitor {
    coordinator: Arc<Coordinator>,
    class: NodeClass,
    failure_threshold: u32,
    /// Consecutive failed probes per node.
    misses: HashMap<NodeId, u32>,
}

impl HealthMonitor {
    pub fn new(coordinator: Arc<Coordinator>, class: NodeClass, config: &HealthConfig) -> Self {
        Self {
            coordinator,
            class,
            failure_threshold: config.failure_threshold.max(1),
            misses: HashMap::new(),
        }
    }

    /// Probe every node of this class once.
    pub async fn sweep(&mut self) -> SweepReport {
        let ledger = self.coordinator.ledger();
        let nodes = match self.class {
            NodeClass::Owner => ledger.owner_nodes(),
            NodeClass::Worker => ledger.worker_nodes(),
        };
        self.misses.retain(|id, _| nodes.iter().any(|n| &n.id == id));

        let transport = self.coordinator.transport();
        let results = join_all(nodes.iter().map(|node| async move { (&node.id, transport.probe(node).await) })).await;

        let mut report = SweepReport::default();
        for (id, result) in results {
            match result {
                Ok(()) => {
                    self.misses.remove(id);
                    report.online += 1;
                }
                Err(e) => {
                    let misses = self.misses.entry(id.clone()).or_insert(0);
                    *misses += 1;
                    if *misses < self.failure_threshold {
                        debug!(class = %self.class, node = %id, misses = *misses, error = %e, "Health probe failed");
                        report.online += 1;
                        continue;
                    }
                    self.misses.remove(id);
                    warn!(class = %self.class, node = %id, error = %e, "Node unreachable, evicting");
                    let evicted = match self.class {
                        NodeClass::Owner => self.coordinator.evict_owner(id),
                        NodeClass::Worker => self.coordinator.evict_worker(id).await,
                    };
                    if evicted {
                        report.disconnected.push(id.clone());
                    }
                }
            }
        }

        if report.disconnected.is_empty() {
            debug!(class = %self.class, online = report.online, disconnected = 0, "Health sweep");
        } else {
            info!(
                class = %self.class,
                online = report.online,
                disconnected = report.disconnected.len(),
                "Health sweep"
            );
        }
        report
    }

    /// Sweep on `interval` until `shutdown` fires.
    pub async fn run(mut self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        // Nodes just registered; give them one interval.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.cancelled() => {
                    break;
                }
            }
        }
        debug!(class = %self.class, "Health monitor stopped");
    }
}

/// Start the owner and worker monitors.
pub fn spawn_monitors(
    coordinator: &Arc<Coordinator>,
    config: &HealthConfig,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    [NodeClass::Owner, NodeClass::Worker]
        .into_iter()
        .map(|class| {
            let monitor = HealthMonitor::new(Arc::clone(coordinator), class, config);
            tokio::spawn(monitor.run(config.check_interval(), shutdown.clone()))
        })
        .collect()
}
