//! Domain error model.

use thiserror::Error;

use crate::money::Money;

/// Result type used across the domain layer.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Domain-level error.
///
/// Keep this focused on deterministic business failures (validation,
/// preconditions, conflicts). Infrastructure faults are carried in the
/// `Store`/`Log` variants without leaking backend types into the domain.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A requested account or transaction does not exist.
    #[error("not found")]
    NotFound,

    /// The account is frozen; balance-mutating operations are rejected.
    #[error("account is frozen")]
    AccountFrozen,

    /// The account is closed; all operations except reads are rejected.
    #[error("account is closed")]
    AccountClosed,

    /// A monetary amount failed validation (non-positive, overflow, or
    /// currency mismatch).
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The debited account does not cover the requested amount.
    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: Money, requested: Money },

    /// The transfer request itself is malformed (e.g. self-transfer).
    #[error("invalid transfer: {0}")]
    InvalidTransfer(String),

    /// The bounded retry budget was exhausted under contention.
    #[error("concurrency retry budget exhausted")]
    ConcurrencyExhausted,

    /// The caller-supplied deadline expired before commit.
    #[error("deadline exceeded before commit")]
    DeadlineExceeded,

    /// A ledger invariant was violated. Fatal for the affected account:
    /// it is quarantined pending manual reconciliation.
    #[error("ledger inconsistency detected: {0}")]
    Inconsistent(String),

    /// An identifier or idempotency key failed to parse at the boundary.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// An account status transition is not allowed (e.g. reopening a
    /// closed account, closing an account with a non-zero balance).
    #[error("invalid status transition: {0}")]
    InvalidTransition(String),

    /// Account store backend fault (lock poisoning, storage error).
    #[error("account store failure: {0}")]
    Store(String),

    /// Transaction log backend fault.
    #[error("transaction log failure: {0}")]
    Log(String),
}

impl LedgerError {
    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }

    pub fn invalid_transfer(msg: impl Into<String>) -> Self {
        Self::InvalidTransfer(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Self::Inconsistent(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
