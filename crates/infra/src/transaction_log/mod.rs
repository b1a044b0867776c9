//! Append-only transaction log boundary.
//!
//! The log is the authoritative record of every balance mutation and the
//! storage layer behind idempotency: at most one append per idempotency key
//! ever succeeds. Records are immutable once terminal; the only permitted
//! mutation is the `Pending -> Committed` / `Pending -> Failed` transition
//! performed on behalf of the engine.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryTransactionLog;
pub use r#trait::{Pagination, TransactionLog, TransactionLogError};
