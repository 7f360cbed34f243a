use tracing::{debug, warn};

use fanout_core::Node;

use super::Coordinator;
use crate::transport::TransportError;

/// Something an owner is told.
#[derive(Debug, Clone)]
pub(super) enum Notice {
    Partial(serde_json::Value),
    Done,
    Error(String),
}

impl Notice {
    fn kind(&self) -> &'static str {
        match self {
            Notice::Partial(_) => "partial",
            Notice::Done => "task done",
            Notice::Error(_) => "task error",
        }
    }
}

impl Coordinator {
    async fn send_notice(&self, owner: &Node, notice: &Notice) -> Result<(), TransportError> {
        match notice {
            Notice::Partial(data) => self.transport.forward_partial(owner, data).await,
            Notice::Done => self.transport.notify_done(owner).await,
            Notice::Error(reason) => self.transport.notify_error(owner, reason).await,
        }
    }

    /// Best-effort delivery with exponential backoff. Returns whether the
    /// owner acknowledged.
    pub(super) async fn deliver(&self, owner: &Node, notice: &Notice) -> bool {
        let attempts = self.delivery.notify_retries.saturating_add(1);
        for attempt in 1..=attempts {
            match self.send_notice(owner, notice).await {
                Ok(()) => {
                    debug!(owner = %owner.id, kind = notice.kind(), attempt, "Owner notified");
                    return true;
                }
                Err(e) if attempt < attempts => {
                    debug!(owner = %owner.id, kind = notice.kind(), attempt, error = %e, "Owner notification failed, retrying");
                    tokio::time::sleep(self.delivery.backoff(attempt)).await;
                }
                Err(e) => {
                    warn!(owner = %owner.id, kind = notice.kind(), attempts, error = %e, "Giving up on owner notification");
                }
            }
        }
        false
    }
}
