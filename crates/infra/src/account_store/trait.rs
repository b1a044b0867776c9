use std::sync::Arc;

use thiserror::Error;

use corebank_core::{AccountId, Money};
use corebank_ledger::{Account, AccountStatus};

/// Account store operation error.
///
/// These are **infrastructure errors** (missing keys, stale versions,
/// backend faults) as opposed to domain errors (validation, invariants).
/// The engine maps them into the domain taxonomy at its boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccountStoreError {
    #[error("account not found")]
    NotFound,

    /// The optimistic concurrency check failed: the stored version moved
    /// past `expected` before this write landed.
    #[error("version conflict: expected {expected}, actual {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    /// The record to be stored failed the store's structural checks
    /// (e.g. negative initial balance on create).
    #[error("invalid record: {0}")]
    Invalid(String),

    /// Lock poisoning or storage faults.
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Optimistic-concurrency-controlled account storage.
///
/// A pure key-value abstraction: it holds no business logic about
/// transaction validity. Implementations may back it with an in-memory map
/// guarded by per-process synchronization (tests/dev) or a transactional
/// external store (production); the engine is agnostic as long as
/// `compare_and_swap` is truly atomic.
///
/// ## Contract
///
/// - `get` returns the current snapshot or `NotFound`.
/// - `compare_and_swap` updates the balance and increments the version
///   **only if** the stored version equals `expected_version`; otherwise it
///   fails with `VersionConflict` and no side effects. This is the
///   linearization point for all balance mutations: each successful swap
///   observes the immediately preceding committed state via its version
///   check, so concurrent writers serialize through conflicts and retries,
///   never through silent lost updates.
/// - `create` allocates a fresh account at version 1.
/// - `set_status` transitions lifecycle status under the same version
///   discipline (a status flip also bumps the version, which keeps balance
///   CAS honest against concurrent freezes).
pub trait AccountStore: Send + Sync {
    fn get(&self, account_id: AccountId) -> Result<Account, AccountStoreError>;

    fn create(
        &self,
        initial_balance: Money,
        status: AccountStatus,
    ) -> Result<Account, AccountStoreError>;

    /// Atomically replace the balance if the stored version matches.
    /// On success returns the updated snapshot with `version ==
    /// expected_version + 1`.
    fn compare_and_swap(
        &self,
        account_id: AccountId,
        expected_version: u64,
        new_balance: Money,
    ) -> Result<Account, AccountStoreError>;

    /// Atomically replace the status if the stored version matches.
    fn set_status(
        &self,
        account_id: AccountId,
        expected_version: u64,
        status: AccountStatus,
    ) -> Result<Account, AccountStoreError>;
}

impl<S> AccountStore for Arc<S>
where
    S: AccountStore + ?Sized,
{
    fn get(&self, account_id: AccountId) -> Result<Account, AccountStoreError> {
        (**self).get(account_id)
    }

    fn create(
        &self,
        initial_balance: Money,
        status: AccountStatus,
    ) -> Result<Account, AccountStoreError> {
        (**self).create(initial_balance, status)
    }

    fn compare_and_swap(
        &self,
        account_id: AccountId,
        expected_version: u64,
        new_balance: Money,
    ) -> Result<Account, AccountStoreError> {
        (**self).compare_and_swap(account_id, expected_version, new_balance)
    }

    fn set_status(
        &self,
        account_id: AccountId,
        expected_version: u64,
        status: AccountStatus,
    ) -> Result<Account, AccountStoreError> {
        (**self).set_status(account_id, expected_version, status)
    }
}
