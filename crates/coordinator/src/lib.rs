//! Fan-out coordinator: registers owners and workers, cuts open-ended tasks
//! into windows, hands them to free workers, retries failures and tells
//! owners when their task is done.

pub mod api;
pub mod coordinator;
pub mod health;
pub mod ledger;
pub mod router;
pub mod server;
pub mod status_poll;
pub mod transport;

pub use coordinator::Coordinator;
pub use ledger::Ledger;
pub use transport::{HttpTransport, NodeTransport, TransportError};
