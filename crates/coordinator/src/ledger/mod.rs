//! Node registry, capacity pool and task/subtask ledger behind one lock.
//!
//! Split into focused submodules:
//! - `core`: Ledger struct, registration, lookups and snapshots
//! - `tasks`: submission, close and completion bookkeeping
//! - `dispatch`: cutting windows and claiming stalled subtasks for free workers
//! - `resolution`: results, failures and evictions
//!
//! No method awaits while the lock is held; callers do their network I/O on the
//! [`Assignment`]s and outcomes handed back.

mod core;
mod dispatch;
mod resolution;
mod tasks;
mod types;
#[cfg(test)]
mod tests;

pub use self::core::Ledger;
pub use self::types::*;
