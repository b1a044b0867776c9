//! Ledger engine (application-level orchestration).
//!
//! The engine is the only writer of balances and transaction records. It
//! composes the `AccountStore` and `TransactionLog` traits and implements
//! the write-ahead protocol that keeps them consistent without a multi-key
//! transactional backend.
//!
//! ## Operation Flow
//!
//! ```text
//! Request (deposit / withdraw / transfer)
//!   ↓
//! 1. Validate typed inputs (amount, currencies, self-transfer)
//!   ↓
//! 2. Idempotency replay check (committed → recorded result,
//!    failed → recorded failure, in-flight → bounded poll)
//!   ↓
//! 3. Read affected account(s) in ascending-id order; status precheck
//!   ↓
//! 4. Reserve a Pending record in the log (at most one append per key
//!    ever succeeds; a lost race re-enters step 2)
//!   ↓
//! 5. Bounded compare-and-swap retry loop, re-reading fresh state each
//!    attempt (funds and status are never checked against stale reads)
//!   ↓
//! 6. Mark the record Committed (or Failed, with the recorded reason)
//! ```
//!
//! ## Why reserve before applying?
//!
//! The log reservation and the balance update cannot be made atomic as a
//! unit without a transactional backend, so ordering decides what a crash
//! can leave behind. Reserving the idempotency key first means a concurrent
//! retry can never double-apply a balance change: the second `append` loses
//! the race and resolves to replay. The cost is that a crash strands a
//! `Pending` record, which the recovery pass ages out (see `recovery`).
//!
//! ## Concurrency model
//!
//! Per-account mutations serialize through the store's version check: each
//! successful compare-and-swap observes the immediately preceding committed
//! state, so concurrent operations on one account retry through conflicts
//! instead of losing updates. Transfers read both accounts in ascending
//! `AccountId` order, so opposite-direction transfers cannot deadlock. All
//! retries are bounded; the engine never blocks indefinitely and holds no
//! lock across calls into the store or log.

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use corebank_core::{AccountId, IdempotencyKey, LedgerError, LedgerResult, Money, TransactionId};
use corebank_ledger::{
    Account, AccountStatus, BalanceSnapshot, FailureReason, Transaction, TransactionStatus,
};

use crate::account_store::{AccountStore, AccountStoreError};
use crate::idempotency::{self, Replay};
use crate::transaction_log::{Pagination, TransactionLog, TransactionLogError};

impl From<AccountStoreError> for LedgerError {
    fn from(value: AccountStoreError) -> Self {
        match value {
            AccountStoreError::NotFound => LedgerError::NotFound,
            // Conflicts are normally consumed by the retry loop; one that
            // escapes means the budget is spent.
            AccountStoreError::VersionConflict { .. } => LedgerError::ConcurrencyExhausted,
            AccountStoreError::Invalid(msg) => LedgerError::InvalidAmount(msg),
            AccountStoreError::Backend(msg) => LedgerError::Store(msg),
        }
    }
}

impl From<TransactionLogError> for LedgerError {
    fn from(value: TransactionLogError) -> Self {
        match value {
            TransactionLogError::NotFound => LedgerError::NotFound,
            TransactionLogError::InvalidTransition(msg) => LedgerError::InvalidTransition(msg),
            // Duplicates are resolved by replay before this conversion runs.
            TransactionLogError::DuplicateKey { existing } => LedgerError::Log(format!(
                "unresolved duplicate key for transaction {}",
                existing.id
            )),
            TransactionLogError::InvalidRecord(msg) => LedgerError::Log(msg),
            TransactionLogError::Backend(msg) => LedgerError::Log(msg),
        }
    }
}

/// Bounded retry budget for optimistic-concurrency conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 16 }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Compensation (undoing a half-applied transfer) gets a larger budget
    /// than the forward path: giving up there strands money.
    fn compensation_attempts(&self) -> u32 {
        self.max_attempts.saturating_mul(4)
    }
}

/// Caller-supplied deadline. Expiry before commit aborts cleanly.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline; retries are still bounded by `RetryPolicy`.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn within(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|t| Instant::now() >= t)
    }
}

/// Result record returned to the (out-of-scope) API layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    /// Balance(s) observed at commit, one per affected account.
    pub balances: Vec<BalanceSnapshot>,
}

impl OperationOutcome {
    fn from_record(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.id,
            status: tx.status,
            balances: tx.resulting_balances.clone(),
        }
    }
}

/// One page of an account's chronological transaction history.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub transactions: Vec<Transaction>,
    /// Opaque token for the next page; `None` when this page is the last.
    pub next_page_token: Option<String>,
}

/// Orchestrates deposits, withdrawals, and transfers atomically against the
/// account store and transaction log.
///
/// The engine holds no interior mutable state; a single instance is shared
/// across threads behind the injected store/log handles.
#[derive(Debug)]
pub struct LedgerEngine<S, L> {
    accounts: S,
    log: L,
    retry: RetryPolicy,
}

impl<S, L> LedgerEngine<S, L> {
    pub fn new(accounts: S, log: L) -> Self {
        Self {
            accounts,
            log,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(accounts: S, log: L, retry: RetryPolicy) -> Self {
        Self {
            accounts,
            log,
            retry,
        }
    }

    pub fn into_parts(self) -> (S, L) {
        (self.accounts, self.log)
    }

    pub fn accounts(&self) -> &S {
        &self.accounts
    }

    pub fn log(&self) -> &L {
        &self.log
    }
}

impl<S, L> LedgerEngine<S, L>
where
    S: AccountStore,
    L: TransactionLog,
{
    /// Credit `amount` to an account. Strictly positive amounts only.
    pub fn deposit(
        &self,
        account_id: AccountId,
        amount: Money,
        idempotency_key: IdempotencyKey,
        deadline: Deadline,
    ) -> LedgerResult<OperationOutcome> {
        let tx = Transaction::deposit(account_id, amount, idempotency_key, Utc::now())?;
        self.execute_single(tx, deadline)
    }

    /// Debit `amount` from an account; fails with `InsufficientFunds` if
    /// the balance read in the same attempt does not cover it.
    pub fn withdraw(
        &self,
        account_id: AccountId,
        amount: Money,
        idempotency_key: IdempotencyKey,
        deadline: Deadline,
    ) -> LedgerResult<OperationOutcome> {
        let tx = Transaction::withdrawal(account_id, amount, idempotency_key, Utc::now())?;
        self.execute_single(tx, deadline)
    }

    /// Deposit/withdrawal execution: one account, one entry.
    fn execute_single(&self, tx: Transaction, deadline: Deadline) -> LedgerResult<OperationOutcome> {
        if let Some(outcome) = self.replay_by_key(&tx.idempotency_key, deadline)? {
            return Ok(outcome);
        }

        let entry = &tx.entries[0];
        let account_id = entry.account_id;
        let delta = entry.delta;
        // The positive magnitude, for the InsufficientFunds record.
        let requested = if delta.is_negative() {
            delta
                .negate()
                .map_err(|e| LedgerError::invalid_amount(e.to_string()))?
        } else {
            delta
        };

        // Cheap rejections before consuming the idempotency key: unknown
        // account, wrong currency, non-active status.
        let account = self.accounts.get(account_id)?;
        if delta.currency() != account.balance.currency() {
            return Err(LedgerError::invalid_amount(format!(
                "amount currency {} does not match account currency {}",
                delta.currency(),
                account.balance.currency()
            )));
        }
        account.ensure_active()?;

        let reserved = match self.log.append(tx) {
            Ok(reserved) => reserved,
            Err(TransactionLogError::DuplicateKey { existing }) => {
                return self.resolve_existing(*existing, deadline);
            }
            Err(e) => return Err(e.into()),
        };

        for _attempt in 0..self.retry.max_attempts {
            if deadline.is_expired() {
                return Err(self.fail_reservation(reserved.id, FailureReason::DeadlineExceeded));
            }

            let account = self.accounts.get(account_id)?;
            if let Err(status_err) = account.ensure_active() {
                let reason = match status_err {
                    LedgerError::AccountClosed => FailureReason::AccountClosed,
                    _ => FailureReason::AccountFrozen,
                };
                return Err(self.fail_reservation(reserved.id, reason));
            }

            let new_balance = match account.balance.checked_add(&delta) {
                Ok(balance) => balance,
                Err(corebank_core::MoneyError::Overflow) => {
                    return Err(self.fail_reservation(reserved.id, FailureReason::AmountOverflow));
                }
                Err(e) => {
                    // Account currency is immutable; reaching this is an
                    // invariant violation, not a user error.
                    return Err(LedgerError::inconsistent(e.to_string()));
                }
            };
            if new_balance.is_negative() {
                return Err(self.fail_reservation(
                    reserved.id,
                    FailureReason::InsufficientFunds {
                        available: account.balance,
                        requested,
                    },
                ));
            }

            match self
                .accounts
                .compare_and_swap(account_id, account.version, new_balance)
            {
                Ok(updated) => {
                    return self.commit_reservation(
                        reserved.id,
                        vec![BalanceSnapshot {
                            account_id,
                            balance: updated.balance,
                        }],
                    );
                }
                Err(AccountStoreError::VersionConflict { expected, actual }) => {
                    debug!(%account_id, expected, actual, "balance CAS conflict, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(self.fail_reservation(reserved.id, FailureReason::RetriesExhausted))
    }

    /// Move `amount` between two accounts as one balanced transaction:
    /// either both balances move and the record commits, or neither does.
    pub fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Money,
        idempotency_key: IdempotencyKey,
        deadline: Deadline,
    ) -> LedgerResult<OperationOutcome> {
        let tx = Transaction::transfer(from, to, amount, idempotency_key, Utc::now())?;

        if let Some(outcome) = self.replay_by_key(&tx.idempotency_key, deadline)? {
            return Ok(outcome);
        }

        // Cheap rejections before consuming the idempotency key.
        let (from_account, to_account) = self.read_pair(from, to)?;
        for account in [&from_account, &to_account] {
            if amount.currency() != account.balance.currency() {
                return Err(LedgerError::invalid_amount(format!(
                    "amount currency {} does not match account {} currency {}",
                    amount.currency(),
                    account.id,
                    account.balance.currency()
                )));
            }
            account.ensure_active()?;
        }

        let reserved = match self.log.append(tx) {
            Ok(reserved) => reserved,
            Err(TransactionLogError::DuplicateKey { existing }) => {
                return self.resolve_existing(*existing, deadline);
            }
            Err(e) => return Err(e.into()),
        };

        for _attempt in 0..self.retry.max_attempts {
            if deadline.is_expired() {
                return Err(self.fail_reservation(reserved.id, FailureReason::DeadlineExceeded));
            }

            let (from_account, to_account) = self.read_pair(from, to)?;
            for account in [&from_account, &to_account] {
                if let Err(status_err) = account.ensure_active() {
                    let reason = match status_err {
                        LedgerError::AccountClosed => FailureReason::AccountClosed,
                        _ => FailureReason::AccountFrozen,
                    };
                    return Err(self.fail_reservation(reserved.id, reason));
                }
            }

            let from_new = match from_account.balance.checked_sub(&amount) {
                Ok(balance) => balance,
                Err(_) => {
                    return Err(self.fail_reservation(reserved.id, FailureReason::AmountOverflow));
                }
            };
            if from_new.is_negative() {
                return Err(self.fail_reservation(
                    reserved.id,
                    FailureReason::InsufficientFunds {
                        available: from_account.balance,
                        requested: amount,
                    },
                ));
            }
            let to_new = match to_account.balance.checked_add(&amount) {
                Ok(balance) => balance,
                Err(_) => {
                    return Err(self.fail_reservation(reserved.id, FailureReason::AmountOverflow));
                }
            };

            // Debit first: no interleaving ever observes more money in the
            // system than was deposited.
            let debited = match self
                .accounts
                .compare_and_swap(from, from_account.version, from_new)
            {
                Ok(updated) => updated,
                Err(AccountStoreError::VersionConflict { expected, actual }) => {
                    debug!(account_id = %from, expected, actual, "debit CAS conflict, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match self
                .accounts
                .compare_and_swap(to, to_account.version, to_new)
            {
                Ok(credited) => {
                    return self.commit_reservation(
                        reserved.id,
                        vec![
                            BalanceSnapshot {
                                account_id: from,
                                balance: debited.balance,
                            },
                            BalanceSnapshot {
                                account_id: to,
                                balance: credited.balance,
                            },
                        ],
                    );
                }
                Err(AccountStoreError::VersionConflict { expected, actual }) => {
                    debug!(account_id = %to, expected, actual, "credit CAS conflict, compensating debit");
                    self.compensate_debit(from, amount, reserved.id)?;
                    continue;
                }
                Err(e) => {
                    // Backend fault mid-transfer: restore the debit before
                    // surfacing the error.
                    self.compensate_debit(from, amount, reserved.id)?;
                    return Err(e.into());
                }
            }
        }

        Err(self.fail_reservation(reserved.id, FailureReason::RetriesExhausted))
    }

    /// Undo a debit whose matching credit did not land. Runs on a larger
    /// retry budget; exhausting it means the debited amount is unaccounted
    /// for, which quarantines the account.
    fn compensate_debit(
        &self,
        account_id: AccountId,
        amount: Money,
        transaction_id: TransactionId,
    ) -> LedgerResult<()> {
        for _attempt in 0..self.retry.compensation_attempts() {
            let account = match self.accounts.get(account_id) {
                Ok(account) => account,
                Err(e) => {
                    self.quarantine(account_id, transaction_id);
                    return Err(LedgerError::inconsistent(format!(
                        "compensation read failed for account {account_id}: {e}"
                    )));
                }
            };
            let restored = match account.balance.checked_add(&amount) {
                Ok(balance) => balance,
                Err(e) => {
                    self.quarantine(account_id, transaction_id);
                    return Err(LedgerError::inconsistent(format!(
                        "compensation arithmetic failed for account {account_id}: {e}"
                    )));
                }
            };
            match self
                .accounts
                .compare_and_swap(account_id, account.version, restored)
            {
                Ok(_) => return Ok(()),
                Err(AccountStoreError::VersionConflict { .. }) => {
                    std::thread::yield_now();
                    continue;
                }
                Err(e) => {
                    self.quarantine(account_id, transaction_id);
                    return Err(LedgerError::inconsistent(format!(
                        "compensation write failed for account {account_id}: {e}"
                    )));
                }
            }
        }

        self.quarantine(account_id, transaction_id);
        Err(LedgerError::inconsistent(format!(
            "could not restore debited amount {amount} to account {account_id}"
        )))
    }

    /// Freeze an account pending manual reconciliation. Best effort: the
    /// invariant violation is already being surfaced to the caller.
    fn quarantine(&self, account_id: AccountId, transaction_id: TransactionId) {
        error!(
            %account_id,
            %transaction_id,
            "ledger inconsistency: freezing account pending manual reconciliation"
        );
        for _attempt in 0..self.retry.max_attempts {
            match self.accounts.get(account_id) {
                Ok(account) if account.status == AccountStatus::Frozen => return,
                Ok(account) => {
                    match self
                        .accounts
                        .set_status(account_id, account.version, AccountStatus::Frozen)
                    {
                        Ok(_) => return,
                        Err(AccountStoreError::VersionConflict { .. }) => continue,
                        Err(e) => {
                            warn!(%account_id, error = %e, "failed to quarantine account");
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(%account_id, error = %e, "failed to quarantine account");
                    return;
                }
            }
        }
    }

    /// Read two accounts in ascending-id order. The fixed global order is
    /// what makes opposite-direction transfers between the same pair unable
    /// to deadlock, and it is kept even though the in-memory store takes no
    /// long-held locks (a transactional backend will).
    fn read_pair(&self, from: AccountId, to: AccountId) -> LedgerResult<(Account, Account)> {
        let (lo, hi) = if from < to { (from, to) } else { (to, from) };
        let lo_account = self.accounts.get(lo)?;
        let hi_account = self.accounts.get(hi)?;
        if lo == from {
            Ok((lo_account, hi_account))
        } else {
            Ok((hi_account, lo_account))
        }
    }

    /// Replay check before reservation.
    fn replay_by_key(
        &self,
        key: &IdempotencyKey,
        deadline: Deadline,
    ) -> LedgerResult<Option<OperationOutcome>> {
        match idempotency::classify(&self.log, key)? {
            Replay::Fresh => Ok(None),
            Replay::Committed(tx) => Ok(Some(OperationOutcome::from_record(&tx))),
            Replay::Failed(tx) => Err(recorded_failure(&tx)),
            Replay::InFlight(tx) => self.await_in_flight(*tx, deadline).map(Some),
        }
    }

    /// Resolve an `append` that lost the reservation race.
    fn resolve_existing(
        &self,
        existing: Transaction,
        deadline: Deadline,
    ) -> LedgerResult<OperationOutcome> {
        match idempotency::classify_record(existing) {
            Replay::Fresh => unreachable!("classify_record never returns Fresh"),
            Replay::Committed(tx) => Ok(OperationOutcome::from_record(&tx)),
            Replay::Failed(tx) => Err(recorded_failure(&tx)),
            Replay::InFlight(tx) => self.await_in_flight(*tx, deadline),
        }
    }

    /// Another caller holds the reservation. Poll briefly for its terminal
    /// state; if it stays pending past the budget, report contention rather
    /// than blocking.
    fn await_in_flight(
        &self,
        reservation: Transaction,
        deadline: Deadline,
    ) -> LedgerResult<OperationOutcome> {
        for _attempt in 0..self.retry.max_attempts {
            if deadline.is_expired() {
                return Err(LedgerError::DeadlineExceeded);
            }
            std::thread::sleep(Duration::from_millis(1));
            let current = self.log.lookup(reservation.id)?;
            match current.status {
                TransactionStatus::Committed => {
                    return Ok(OperationOutcome::from_record(&current));
                }
                TransactionStatus::Failed => return Err(recorded_failure(&current)),
                TransactionStatus::Pending => continue,
            }
        }
        Err(LedgerError::ConcurrencyExhausted)
    }

    fn commit_reservation(
        &self,
        transaction_id: TransactionId,
        balances: Vec<BalanceSnapshot>,
    ) -> LedgerResult<OperationOutcome> {
        match self.log.mark_committed(transaction_id, balances) {
            Ok(committed) => {
                debug!(%transaction_id, sequence = committed.sequence, "transaction committed");
                Ok(OperationOutcome::from_record(&committed))
            }
            Err(e) => {
                // The balance moved but the record refused to commit (e.g.
                // the recovery pass aged it out mid-flight). The affected
                // accounts need reconciliation.
                for account_id in touched_accounts(&self.log, transaction_id) {
                    self.quarantine(account_id, transaction_id);
                }
                Err(LedgerError::inconsistent(format!(
                    "balance applied but commit mark failed for {transaction_id}: {e}"
                )))
            }
        }
    }

    /// Mark a reservation failed and return the failure as the typed error
    /// the caller sees (and that replays of this key will see).
    fn fail_reservation(&self, transaction_id: TransactionId, reason: FailureReason) -> LedgerError {
        let err = reason.as_error();
        if let Err(mark_err) = self.log.mark_failed(transaction_id, reason) {
            warn!(%transaction_id, error = %mark_err, "could not mark reservation failed");
        }
        err
    }

    // ---- queries & account lifecycle -------------------------------------

    pub fn get_account(&self, account_id: AccountId) -> LedgerResult<Account> {
        Ok(self.accounts.get(account_id)?)
    }

    /// Chronological, paginated transaction history for audit use. The
    /// page token is opaque to callers; `None` starts from the beginning.
    pub fn transaction_history(
        &self,
        account_id: AccountId,
        page_token: Option<&str>,
        limit: Option<u32>,
    ) -> LedgerResult<HistoryPage> {
        // Surface NotFound for unknown accounts instead of an empty page.
        self.accounts.get(account_id)?;

        let offset = match page_token {
            None => 0,
            Some(token) => token
                .parse::<u64>()
                .map_err(|_| LedgerError::invalid_id("PageToken: malformed token"))?,
        };
        let page = Pagination::new(limit, Some(offset));
        let transactions = self.log.list_by_account(account_id, page)?;

        let next_page_token = if transactions.len() as u64 == u64::from(page.limit) {
            Some((offset + transactions.len() as u64).to_string())
        } else {
            None
        };

        Ok(HistoryPage {
            transactions,
            next_page_token,
        })
    }

    /// Open a new `Active` account. Initial balance must be non-negative.
    pub fn open_account(&self, initial_balance: Money) -> LedgerResult<Account> {
        let account = self
            .accounts
            .create(initial_balance, AccountStatus::Active)?;
        info!(account_id = %account.id, balance = %account.balance, "account opened");
        Ok(account)
    }

    pub fn freeze_account(&self, account_id: AccountId) -> LedgerResult<Account> {
        self.transition_status(account_id, AccountStatus::Frozen)
    }

    pub fn unfreeze_account(&self, account_id: AccountId) -> LedgerResult<Account> {
        self.transition_status(account_id, AccountStatus::Active)
    }

    /// Close an account. Requires a zero balance; `Closed` is terminal.
    pub fn close_account(&self, account_id: AccountId) -> LedgerResult<Account> {
        self.transition_status(account_id, AccountStatus::Closed)
    }

    fn transition_status(
        &self,
        account_id: AccountId,
        target: AccountStatus,
    ) -> LedgerResult<Account> {
        for _attempt in 0..self.retry.max_attempts {
            let account = self.accounts.get(account_id)?;
            if target == AccountStatus::Closed {
                account.ensure_closable()?;
            }
            if !account.status.can_transition_to(target) {
                return Err(LedgerError::invalid_transition(format!(
                    "{} -> {} is not allowed",
                    account.status, target
                )));
            }
            match self.accounts.set_status(account_id, account.version, target) {
                Ok(updated) => {
                    info!(%account_id, status = %updated.status, "account status changed");
                    return Ok(updated);
                }
                Err(AccountStoreError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(LedgerError::ConcurrencyExhausted)
    }
}

/// The typed error recorded on a failed transaction record.
fn recorded_failure(tx: &Transaction) -> LedgerError {
    match &tx.failure {
        Some(reason) => reason.as_error(),
        None => LedgerError::inconsistent(format!(
            "failed transaction {} carries no failure reason",
            tx.id
        )),
    }
}

/// Account ids touched by a transaction, for quarantine after a commit-mark
/// failure.
fn touched_accounts<L: TransactionLog>(log: &L, transaction_id: TransactionId) -> Vec<AccountId> {
    log.lookup(transaction_id)
        .map(|tx| tx.entries.iter().map(|e| e.account_id).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use corebank_core::Currency;
    use corebank_ledger::TransactionKind;

    use crate::account_store::InMemoryAccountStore;
    use crate::transaction_log::InMemoryTransactionLog;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn money(minor: i64) -> Money {
        Money::new(minor, usd())
    }

    fn key(s: &str) -> IdempotencyKey {
        IdempotencyKey::new(s).unwrap()
    }

    fn engine() -> LedgerEngine<InMemoryAccountStore, InMemoryTransactionLog> {
        LedgerEngine::new(InMemoryAccountStore::new(), InMemoryTransactionLog::new())
    }

    #[test]
    fn deposit_commits_and_reports_resulting_balance() {
        let engine = engine();
        let account = engine.open_account(money(0)).unwrap();

        let outcome = engine
            .deposit(account.id, money(500), key("d1"), Deadline::none())
            .unwrap();

        assert_eq!(outcome.status, TransactionStatus::Committed);
        assert_eq!(outcome.balances.len(), 1);
        assert_eq!(outcome.balances[0].balance, money(500));
        assert_eq!(engine.get_account(account.id).unwrap().balance, money(500));
    }

    #[test]
    fn withdrawal_beyond_balance_fails_and_leaves_balance_untouched() {
        let engine = engine();
        let account = engine.open_account(money(1_000)).unwrap();

        let err = engine
            .withdraw(account.id, money(1_200), key("w1"), Deadline::none())
            .unwrap_err();

        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                available: money(1_000),
                requested: money(1_200),
            }
        );
        assert_eq!(engine.get_account(account.id).unwrap().balance, money(1_000));
    }

    #[test]
    fn transfer_moves_funds_with_two_balanced_entries() {
        let engine = engine();
        let a = engine.open_account(money(1_000)).unwrap();
        let b = engine.open_account(money(0)).unwrap();

        let outcome = engine
            .transfer(a.id, b.id, money(300), key("t1"), Deadline::none())
            .unwrap();

        assert_eq!(engine.get_account(a.id).unwrap().balance, money(700));
        assert_eq!(engine.get_account(b.id).unwrap().balance, money(300));

        let record = engine
            .transaction_history(a.id, None, None)
            .unwrap()
            .transactions
            .remove(0);
        assert_eq!(record.id, outcome.transaction_id);
        assert_eq!(record.kind, TransactionKind::Transfer);
        assert_eq!(record.entries.len(), 2);
        assert_eq!(record.delta_for(a.id), Some(money(-300)));
        assert_eq!(record.delta_for(b.id), Some(money(300)));
    }

    #[test]
    fn replaying_a_committed_deposit_returns_the_original_outcome() {
        let engine = engine();
        let account = engine.open_account(money(0)).unwrap();

        let first = engine
            .deposit(account.id, money(100), key("k1"), Deadline::none())
            .unwrap();
        let second = engine
            .deposit(account.id, money(100), key("k1"), Deadline::none())
            .unwrap();

        // Identical reported result, applied exactly once.
        assert_eq!(first, second);
        assert_eq!(engine.get_account(account.id).unwrap().balance, money(100));

        let history = engine.transaction_history(account.id, None, None).unwrap();
        assert_eq!(history.transactions.len(), 1);
    }

    #[test]
    fn replaying_a_failed_withdrawal_reports_the_recorded_failure() {
        let engine = engine();
        let account = engine.open_account(money(50)).unwrap();

        let first = engine
            .withdraw(account.id, money(100), key("w1"), Deadline::none())
            .unwrap_err();
        // Fund the account afterwards; the key stays terminal.
        engine
            .deposit(account.id, money(1_000), key("fund"), Deadline::none())
            .unwrap();
        let replay = engine
            .withdraw(account.id, money(100), key("w1"), Deadline::none())
            .unwrap_err();

        assert_eq!(first, replay);
        assert!(matches!(replay, LedgerError::InsufficientFunds { .. }));
    }

    #[test]
    fn frozen_account_rejects_mutations_without_consuming_the_key() {
        let engine = engine();
        let account = engine.open_account(money(100)).unwrap();
        engine.freeze_account(account.id).unwrap();

        let err = engine
            .deposit(account.id, money(10), key("f1"), Deadline::none())
            .unwrap_err();
        assert_eq!(err, LedgerError::AccountFrozen);

        // Pre-reservation rejection: the key is still fresh afterwards.
        engine.unfreeze_account(account.id).unwrap();
        let outcome = engine
            .deposit(account.id, money(10), key("f1"), Deadline::none())
            .unwrap();
        assert_eq!(outcome.status, TransactionStatus::Committed);
    }

    #[test]
    fn unknown_account_is_not_found() {
        let engine = engine();
        let err = engine
            .deposit(AccountId::new(), money(10), key("k"), Deadline::none())
            .unwrap_err();
        assert_eq!(err, LedgerError::NotFound);
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let engine = engine();
        let account = engine.open_account(money(0)).unwrap();
        for minor in [0i64, -10] {
            let err = engine
                .deposit(account.id, money(minor), key("k"), Deadline::none())
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidAmount(_)));
        }
    }

    #[test]
    fn currency_mismatch_is_rejected_before_reservation() {
        let engine = engine();
        let account = engine.open_account(money(100)).unwrap();
        let eur = Money::new(10, Currency::new("EUR").unwrap());

        let err = engine
            .deposit(account.id, eur, key("c1"), Deadline::none())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));

        let history = engine.transaction_history(account.id, None, None).unwrap();
        assert!(history.transactions.is_empty());
    }

    #[test]
    fn self_transfer_is_rejected() {
        let engine = engine();
        let account = engine.open_account(money(100)).unwrap();
        let err = engine
            .transfer(account.id, account.id, money(10), key("s1"), Deadline::none())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransfer(_)));
    }

    #[test]
    fn transfer_into_frozen_destination_is_rejected() {
        let engine = engine();
        let a = engine.open_account(money(100)).unwrap();
        let b = engine.open_account(money(0)).unwrap();
        engine.freeze_account(b.id).unwrap();

        let err = engine
            .transfer(a.id, b.id, money(50), key("t1"), Deadline::none())
            .unwrap_err();
        assert_eq!(err, LedgerError::AccountFrozen);
        assert_eq!(engine.get_account(a.id).unwrap().balance, money(100));
    }

    #[test]
    fn expired_deadline_aborts_cleanly_before_any_balance_change() {
        let engine = engine();
        let account = engine.open_account(money(100)).unwrap();

        let err = engine
            .deposit(
                account.id,
                money(10),
                key("d1"),
                Deadline::at(Instant::now() - Duration::from_millis(1)),
            )
            .unwrap_err();

        assert_eq!(err, LedgerError::DeadlineExceeded);
        assert_eq!(engine.get_account(account.id).unwrap().balance, money(100));

        // The reservation is recorded as failed for audit.
        let history = engine.transaction_history(account.id, None, None).unwrap();
        assert_eq!(history.transactions.len(), 1);
        assert_eq!(history.transactions[0].status, TransactionStatus::Failed);
        assert_eq!(
            history.transactions[0].failure,
            Some(FailureReason::DeadlineExceeded)
        );
    }

    #[test]
    fn account_lifecycle_open_freeze_unfreeze_close() {
        let engine = engine();
        let account = engine.open_account(money(100)).unwrap();

        engine.freeze_account(account.id).unwrap();
        assert_eq!(
            engine.get_account(account.id).unwrap().status,
            AccountStatus::Frozen
        );

        engine.unfreeze_account(account.id).unwrap();
        engine
            .withdraw(account.id, money(100), key("drain"), Deadline::none())
            .unwrap();

        let closed = engine.close_account(account.id).unwrap();
        assert_eq!(closed.status, AccountStatus::Closed);

        let err = engine
            .deposit(account.id, money(10), key("late"), Deadline::none())
            .unwrap_err();
        assert_eq!(err, LedgerError::AccountClosed);
    }

    #[test]
    fn close_with_remaining_balance_is_rejected() {
        let engine = engine();
        let account = engine.open_account(money(10)).unwrap();
        let err = engine.close_account(account.id).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition(_)));
    }

    #[test]
    fn history_paginates_with_opaque_tokens() {
        let engine = engine();
        let account = engine.open_account(money(0)).unwrap();
        for i in 0..5 {
            engine
                .deposit(account.id, money(100), key(&format!("k{i}")), Deadline::none())
                .unwrap();
        }

        let page1 = engine
            .transaction_history(account.id, None, Some(2))
            .unwrap();
        assert_eq!(page1.transactions.len(), 2);
        let token1 = page1.next_page_token.expect("more pages");

        let page2 = engine
            .transaction_history(account.id, Some(&token1), Some(2))
            .unwrap();
        assert_eq!(page2.transactions.len(), 2);
        assert!(page2.transactions[0].sequence > page1.transactions[1].sequence);

        let token2 = page2.next_page_token.expect("more pages");
        let page3 = engine
            .transaction_history(account.id, Some(&token2), Some(2))
            .unwrap();
        assert_eq!(page3.transactions.len(), 1);
        assert!(page3.next_page_token.is_none());

        let err = engine
            .transaction_history(account.id, Some("not-a-token"), None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidId(_)));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 64,
                ..ProptestConfig::default()
            })]

            /// Property: any interleaving of valid deposits and withdrawals
            /// keeps the balance non-negative and equal to the sum of
            /// committed deltas.
            #[test]
            fn balance_tracks_committed_deltas_and_never_goes_negative(
                ops in prop::collection::vec((any::<bool>(), 1i64..10_000), 1..40)
            ) {
                let engine = engine();
                let account = engine.open_account(money(0)).unwrap();
                let mut expected: i64 = 0;

                for (i, (is_deposit, amount)) in ops.iter().enumerate() {
                    let k = key(&format!("op-{i}"));
                    if *is_deposit {
                        engine
                            .deposit(account.id, money(*amount), k, Deadline::none())
                            .unwrap();
                        expected += amount;
                    } else {
                        match engine.withdraw(account.id, money(*amount), k, Deadline::none()) {
                            Ok(_) => expected -= amount,
                            Err(LedgerError::InsufficientFunds { .. }) => {
                                prop_assert!(expected < *amount);
                            }
                            Err(other) => panic!("unexpected failure: {other:?}"),
                        }
                    }

                    let balance = engine.get_account(account.id).unwrap().balance;
                    prop_assert!(!balance.is_negative());
                    prop_assert_eq!(balance, money(expected));
                }
            }
        }
    }

    #[test]
    fn outcome_balances_match_committed_snapshots() {
        let engine = engine();
        let a = engine.open_account(money(1_000)).unwrap();
        let b = engine.open_account(money(0)).unwrap();

        let outcome = engine
            .transfer(a.id, b.id, money(250), key("t1"), Deadline::none())
            .unwrap();

        let by_id: std::collections::HashMap<_, _> = outcome
            .balances
            .iter()
            .map(|s| (s.account_id, s.balance))
            .collect();
        assert_eq!(by_id[&a.id], money(750));
        assert_eq!(by_id[&b.id], money(250));
    }
}
