//! Ledger domain model (accounts, double-entry transactions).
//!
//! Pure domain logic only: no IO, no locking, no persistence concerns.

pub mod account;
pub mod transaction;

pub use account::{Account, AccountStatus};
pub use transaction::{
    BalanceSnapshot, Entry, FailureReason, Transaction, TransactionKind, TransactionStatus,
};
