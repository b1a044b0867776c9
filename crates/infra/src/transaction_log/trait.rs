use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use corebank_core::{AccountId, IdempotencyKey, TransactionId};
use corebank_ledger::{BalanceSnapshot, FailureReason, Transaction};

/// Transaction log operation error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransactionLogError {
    /// A record with this idempotency key already exists. Carries the
    /// existing record so the caller can resolve the duplicate by replay
    /// instead of a second lookup.
    #[error("idempotency key already reserved by transaction {}", .existing.id)]
    DuplicateKey { existing: Box<Transaction> },

    #[error("transaction not found")]
    NotFound,

    /// Attempted transition on an already-terminal record.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// The record failed structural validation on append.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Lock poisoning or storage faults.
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Pagination window for history queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of records to return.
    pub limit: u32,
    /// Offset into the account's chronological history (0-based).
    pub offset: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50, // Safe default
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u64>) -> Self {
        Self {
            limit: limit.unwrap_or(50).min(500), // Cap for safety
            offset: offset.unwrap_or(0),
        }
    }
}

/// Append-only, ordered transaction log keyed by idempotency token.
///
/// ## Contract
///
/// - `append` persists a `Pending` record and assigns it the next log
///   sequence number. It must be atomic with respect to concurrent appends
///   sharing the same idempotency key: at most one ever succeeds, the rest
///   fail with `DuplicateKey` carrying the winning record.
/// - `mark_committed` / `mark_failed` are the only permitted transitions,
///   each `Pending -> terminal` exactly once.
/// - `list_by_account` is chronological (log order), restartable, and
///   paginated for audit/history use.
/// - `list_pending_older_than` feeds the recovery pass with reservations
///   left behind by crashed or abandoned operations.
pub trait TransactionLog: Send + Sync {
    /// Append a `Pending` record, reserving its idempotency key.
    fn append(&self, transaction: Transaction) -> Result<Transaction, TransactionLogError>;

    fn lookup(&self, id: TransactionId) -> Result<Transaction, TransactionLogError>;

    fn lookup_by_key(&self, key: &IdempotencyKey) -> Result<Transaction, TransactionLogError>;

    fn list_by_account(
        &self,
        account_id: AccountId,
        page: Pagination,
    ) -> Result<Vec<Transaction>, TransactionLogError>;

    /// `Pending -> Committed`, recording the balances observed at commit.
    fn mark_committed(
        &self,
        id: TransactionId,
        balances: Vec<BalanceSnapshot>,
    ) -> Result<Transaction, TransactionLogError>;

    /// `Pending -> Failed`, recording why.
    fn mark_failed(
        &self,
        id: TransactionId,
        reason: FailureReason,
    ) -> Result<Transaction, TransactionLogError>;

    fn list_pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, TransactionLogError>;
}

impl<L> TransactionLog for Arc<L>
where
    L: TransactionLog + ?Sized,
{
    fn append(&self, transaction: Transaction) -> Result<Transaction, TransactionLogError> {
        (**self).append(transaction)
    }

    fn lookup(&self, id: TransactionId) -> Result<Transaction, TransactionLogError> {
        (**self).lookup(id)
    }

    fn lookup_by_key(&self, key: &IdempotencyKey) -> Result<Transaction, TransactionLogError> {
        (**self).lookup_by_key(key)
    }

    fn list_by_account(
        &self,
        account_id: AccountId,
        page: Pagination,
    ) -> Result<Vec<Transaction>, TransactionLogError> {
        (**self).list_by_account(account_id, page)
    }

    fn mark_committed(
        &self,
        id: TransactionId,
        balances: Vec<BalanceSnapshot>,
    ) -> Result<Transaction, TransactionLogError> {
        (**self).mark_committed(id, balances)
    }

    fn mark_failed(
        &self,
        id: TransactionId,
        reason: FailureReason,
    ) -> Result<Transaction, TransactionLogError> {
        (**self).mark_failed(id, reason)
    }

    fn list_pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, TransactionLogError> {
        (**self).list_pending_older_than(cutoff)
    }
}
