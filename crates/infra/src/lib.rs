//! Infrastructure layer: storage contracts, in-memory backends, and the
//! ledger engine orchestration.

pub mod account_store;
pub mod engine;
pub mod idempotency;
pub mod recovery;
pub mod transaction_log;


pub use account_store::{AccountStore, AccountStoreError, InMemoryAccountStore};
pub use engine::{Deadline, HistoryPage, LedgerEngine, OperationOutcome, RetryPolicy};
pub use transaction_log::{
    InMemoryTransactionLog, Pagination, TransactionLog, TransactionLogError,
};
