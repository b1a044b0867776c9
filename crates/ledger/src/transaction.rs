//! Transaction records and double-entry validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use corebank_core::{AccountId, IdempotencyKey, LedgerError, LedgerResult, Money, TransactionId};

/// Kind of balance mutation a transaction performs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Transfer,
}

/// Lifecycle of a transaction record.
///
/// `Pending -> Committed` or `Pending -> Failed`; terminal states only,
/// no further transitions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Committed,
    Failed,
}

/// Why a reserved transaction ended up `Failed`.
///
/// Recorded on the log entry so replaying the same idempotency key reports
/// the same typed failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum FailureReason {
    InsufficientFunds { available: Money, requested: Money },
    AccountFrozen,
    AccountClosed,
    RetriesExhausted,
    DeadlineExceeded,
    /// The mutation would overflow the fixed-point balance representation.
    AmountOverflow,
    /// Recovery pass aged out a reservation left behind by a crash.
    StaleReservation,
}

impl FailureReason {
    /// The typed error a caller sees when this failure is replayed.
    pub fn as_error(&self) -> LedgerError {
        match self {
            FailureReason::InsufficientFunds {
                available,
                requested,
            } => LedgerError::InsufficientFunds {
                available: *available,
                requested: *requested,
            },
            FailureReason::AccountFrozen => LedgerError::AccountFrozen,
            FailureReason::AccountClosed => LedgerError::AccountClosed,
            FailureReason::RetriesExhausted => LedgerError::ConcurrencyExhausted,
            FailureReason::DeadlineExceeded => LedgerError::DeadlineExceeded,
            FailureReason::AmountOverflow => {
                LedgerError::invalid_amount("balance would overflow")
            }
            FailureReason::StaleReservation => LedgerError::ConcurrencyExhausted,
        }
    }
}

/// One (account, delta) pair of a transaction. Deltas may be negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub account_id: AccountId,
    pub delta: Money,
}

/// Balance observed at commit time, recorded so a replayed request reports
/// the same result as the original.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub account_id: AccountId,
    pub balance: Money,
}

/// Double-entry transaction record.
///
/// Owned exclusively by the ledger engine: created `Pending`, transitioned
/// exactly once to `Committed` or `Failed`, never mutated afterwards, never
/// deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub idempotency_key: IdempotencyKey,
    pub kind: TransactionKind,
    pub entries: Vec<Entry>,
    pub status: TransactionStatus,
    pub failure: Option<FailureReason>,
    /// Per-account balances observed at commit (empty until committed).
    pub resulting_balances: Vec<BalanceSnapshot>,
    /// Position in the transaction log, assigned on append (0 until then).
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Single positive-delta entry crediting `account_id`.
    pub fn deposit(
        account_id: AccountId,
        amount: Money,
        idempotency_key: IdempotencyKey,
        created_at: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        ensure_strictly_positive(&amount)?;
        Ok(Self::pending(
            TransactionKind::Deposit,
            vec![Entry {
                account_id,
                delta: amount,
            }],
            idempotency_key,
            created_at,
        ))
    }

    /// Single negative-delta entry debiting `account_id`.
    pub fn withdrawal(
        account_id: AccountId,
        amount: Money,
        idempotency_key: IdempotencyKey,
        created_at: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        ensure_strictly_positive(&amount)?;
        let delta = amount
            .negate()
            .map_err(|e| LedgerError::invalid_amount(e.to_string()))?;
        Ok(Self::pending(
            TransactionKind::Withdrawal,
            vec![Entry { account_id, delta }],
            idempotency_key,
            created_at,
        ))
    }

    /// Balanced debit/credit pair: equal magnitude, opposite sign.
    pub fn transfer(
        from: AccountId,
        to: AccountId,
        amount: Money,
        idempotency_key: IdempotencyKey,
        created_at: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        if from == to {
            return Err(LedgerError::invalid_transfer(
                "source and destination accounts are the same",
            ));
        }
        ensure_strictly_positive(&amount)?;
        let debit = amount
            .negate()
            .map_err(|e| LedgerError::invalid_amount(e.to_string()))?;
        Ok(Self::pending(
            TransactionKind::Transfer,
            vec![
                Entry {
                    account_id: from,
                    delta: debit,
                },
                Entry {
                    account_id: to,
                    delta: amount,
                },
            ],
            idempotency_key,
            created_at,
        ))
    }

    fn pending(
        kind: TransactionKind,
        entries: Vec<Entry>,
        idempotency_key: IdempotencyKey,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            idempotency_key,
            kind,
            entries,
            status: TransactionStatus::Pending,
            failure: None,
            resulting_balances: Vec::new(),
            sequence: 0,
            created_at,
        }
    }

    /// Check the structural invariants of this record.
    ///
    /// - Deposit/Withdrawal carry exactly one entry, Transfer exactly two.
    /// - All entries share one currency.
    /// - Transfer entries sum to exactly zero (double-entry balance).
    pub fn validate(&self) -> LedgerResult<()> {
        match (self.kind, self.entries.len()) {
            (TransactionKind::Deposit, 1) | (TransactionKind::Withdrawal, 1) => {}
            (TransactionKind::Transfer, 2) => {}
            (kind, n) => {
                return Err(LedgerError::inconsistent(format!(
                    "{kind:?} transaction has {n} entries"
                )));
            }
        }

        let currency = self.entries[0].delta.currency();
        // Widen to i128 so the sum itself cannot overflow.
        let mut sum: i128 = 0;
        for entry in &self.entries {
            if entry.delta.currency() != currency {
                return Err(LedgerError::invalid_amount(
                    "transaction entries mix currencies",
                ));
            }
            if entry.delta.is_zero() {
                return Err(LedgerError::invalid_amount(
                    "transaction entry has zero delta",
                ));
            }
            sum += i128::from(entry.delta.minor_units());
        }

        if self.kind == TransactionKind::Transfer && sum != 0 {
            return Err(LedgerError::inconsistent(format!(
                "transfer entries sum to {sum}, expected 0"
            )));
        }
        Ok(())
    }

    /// Net delta this transaction applies to `account_id` (zero if the
    /// account is not involved).
    pub fn delta_for(&self, account_id: AccountId) -> Option<Money> {
        self.entries
            .iter()
            .find(|e| e.account_id == account_id)
            .map(|e| e.delta)
    }

    pub fn touches(&self, account_id: AccountId) -> bool {
        self.entries.iter().any(|e| e.account_id == account_id)
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    /// `Pending -> Committed`, recording the balances observed at commit.
    /// Any other starting state is an error.
    pub fn into_committed(mut self, balances: Vec<BalanceSnapshot>) -> LedgerResult<Self> {
        if self.status != TransactionStatus::Pending {
            return Err(LedgerError::invalid_transition(format!(
                "cannot commit a {:?} transaction",
                self.status
            )));
        }
        self.status = TransactionStatus::Committed;
        self.resulting_balances = balances;
        Ok(self)
    }

    /// `Pending -> Failed`, recording why.
    pub fn into_failed(mut self, reason: FailureReason) -> LedgerResult<Self> {
        if self.status != TransactionStatus::Pending {
            return Err(LedgerError::invalid_transition(format!(
                "cannot fail a {:?} transaction",
                self.status
            )));
        }
        self.status = TransactionStatus::Failed;
        self.failure = Some(reason);
        Ok(self)
    }
}

fn ensure_strictly_positive(amount: &Money) -> LedgerResult<()> {
    if !amount.is_positive() {
        return Err(LedgerError::invalid_amount(format!(
            "amount must be strictly positive, got {amount}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use corebank_core::Currency;
    use proptest::prelude::*;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn key(s: &str) -> IdempotencyKey {
        IdempotencyKey::new(s).unwrap()
    }

    #[test]
    fn deposit_carries_one_positive_entry() {
        let acc = AccountId::new();
        let tx = Transaction::deposit(acc, Money::new(100, usd()), key("k1"), Utc::now()).unwrap();
        assert_eq!(tx.kind, TransactionKind::Deposit);
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.entries.len(), 1);
        assert_eq!(tx.delta_for(acc), Some(Money::new(100, usd())));
        tx.validate().unwrap();
    }

    #[test]
    fn withdrawal_negates_the_amount() {
        let acc = AccountId::new();
        let tx =
            Transaction::withdrawal(acc, Money::new(250, usd()), key("k1"), Utc::now()).unwrap();
        assert_eq!(tx.delta_for(acc), Some(Money::new(-250, usd())));
        tx.validate().unwrap();
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let acc = AccountId::new();
        for minor in [0i64, -5] {
            let err = Transaction::deposit(acc, Money::new(minor, usd()), key("k"), Utc::now())
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidAmount(_)));
        }
    }

    #[test]
    fn self_transfer_is_rejected() {
        let acc = AccountId::new();
        let err = Transaction::transfer(acc, acc, Money::new(10, usd()), key("k"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransfer(_)));
    }

    #[test]
    fn transfer_entries_are_balanced() {
        let from = AccountId::new();
        let to = AccountId::new();
        let tx = Transaction::transfer(from, to, Money::new(300, usd()), key("k"), Utc::now())
            .unwrap();
        assert_eq!(tx.entries.len(), 2);
        assert_eq!(tx.delta_for(from), Some(Money::new(-300, usd())));
        assert_eq!(tx.delta_for(to), Some(Money::new(300, usd())));
        tx.validate().unwrap();
    }

    #[test]
    fn status_transitions_are_terminal() {
        let acc = AccountId::new();
        let tx = Transaction::deposit(acc, Money::new(1, usd()), key("k"), Utc::now()).unwrap();

        let committed = tx.into_committed(vec![]).unwrap();
        assert_eq!(committed.status, TransactionStatus::Committed);
        assert!(committed.clone().into_committed(vec![]).is_err());
        assert!(committed.into_failed(FailureReason::RetriesExhausted).is_err());

        let tx2 = Transaction::deposit(acc, Money::new(1, usd()), key("k2"), Utc::now()).unwrap();
        let failed = tx2.into_failed(FailureReason::AccountFrozen).unwrap();
        assert_eq!(failed.status, TransactionStatus::Failed);
        assert_eq!(failed.failure, Some(FailureReason::AccountFrozen));
        assert!(failed.into_committed(vec![]).is_err());
    }

    #[test]
    fn validate_catches_tampered_entries() {
        let from = AccountId::new();
        let to = AccountId::new();
        let mut tx = Transaction::transfer(from, to, Money::new(300, usd()), key("k"), Utc::now())
            .unwrap();
        tx.entries[1].delta = Money::new(299, usd());
        assert!(matches!(tx.validate(), Err(LedgerError::Inconsistent(_))));
    }

    #[test]
    fn failure_reason_replays_as_the_original_error() {
        let reason = FailureReason::InsufficientFunds {
            available: Money::new(100, usd()),
            requested: Money::new(200, usd()),
        };
        assert_eq!(
            reason.as_error(),
            LedgerError::InsufficientFunds {
                available: Money::new(100, usd()),
                requested: Money::new(200, usd()),
            }
        );
    }

    proptest! {
        /// Property: for any positive amount, a transfer's entries sum to
        /// exactly zero (double-entry balance).
        #[test]
        fn transfer_deltas_sum_to_zero(amount in 1i64..1_000_000_000_000) {
            let tx = Transaction::transfer(
                AccountId::new(),
                AccountId::new(),
                Money::new(amount, usd()),
                key("prop"),
                Utc::now(),
            ).unwrap();

            let sum: i128 = tx
                .entries
                .iter()
                .map(|e| i128::from(e.delta.minor_units()))
                .sum();
            prop_assert_eq!(sum, 0);
            prop_assert!(tx.validate().is_ok());
        }
    }
}
