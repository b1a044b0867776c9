//! Idempotency guard: deduplicates retried client requests.
//!
//! The guard is a thin classification over the transaction log's unique-key
//! contract. It owns no state: the log's reserve-on-append atomicity is
//! the actual deduplication mechanism; this module turns a lookup into the
//! decision the engine acts on.

use corebank_core::IdempotencyKey;
use corebank_ledger::{Transaction, TransactionStatus};

use crate::transaction_log::{TransactionLog, TransactionLogError};

/// What a prior record under the same idempotency key means for a new
/// request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replay {
    /// No record under this key; proceed to reserve it.
    Fresh,
    /// A committed record exists: return its recorded result, do not
    /// re-execute.
    Committed(Box<Transaction>),
    /// A failed record exists: report the recorded failure, never retry
    /// under the same key.
    Failed(Box<Transaction>),
    /// A reservation exists but has not reached a terminal state: another
    /// caller is mid-flight (or crashed; the recovery pass ages those out).
    InFlight(Box<Transaction>),
}

/// Classify the state of `key` in the log.
pub fn classify<L: TransactionLog>(
    log: &L,
    key: &IdempotencyKey,
) -> Result<Replay, TransactionLogError> {
    match log.lookup_by_key(key) {
        Ok(tx) => Ok(classify_record(tx)),
        Err(TransactionLogError::NotFound) => Ok(Replay::Fresh),
        Err(e) => Err(e),
    }
}

/// Classify an already-fetched record (used when `append` returns
/// `DuplicateKey` with the winning record in hand).
pub fn classify_record(tx: Transaction) -> Replay {
    match tx.status {
        TransactionStatus::Committed => Replay::Committed(Box::new(tx)),
        TransactionStatus::Failed => Replay::Failed(Box::new(tx)),
        TransactionStatus::Pending => Replay::InFlight(Box::new(tx)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use corebank_core::{AccountId, Currency, Money};
    use corebank_ledger::{BalanceSnapshot, FailureReason};

    use crate::transaction_log::InMemoryTransactionLog;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn key(s: &str) -> IdempotencyKey {
        IdempotencyKey::new(s).unwrap()
    }

    fn reserve(log: &InMemoryTransactionLog, account: AccountId, k: &str) -> Transaction {
        log.append(
            Transaction::deposit(account, Money::new(100, usd()), key(k), Utc::now()).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn unknown_key_is_fresh() {
        let log = InMemoryTransactionLog::new();
        assert_eq!(classify(&log, &key("k")).unwrap(), Replay::Fresh);
    }

    #[test]
    fn pending_reservation_is_in_flight() {
        let log = InMemoryTransactionLog::new();
        let tx = reserve(&log, AccountId::new(), "k");
        match classify(&log, &key("k")).unwrap() {
            Replay::InFlight(seen) => assert_eq!(seen.id, tx.id),
            other => panic!("expected InFlight, got {other:?}"),
        }
    }

    #[test]
    fn terminal_records_classify_by_status() {
        let log = InMemoryTransactionLog::new();
        let acc = AccountId::new();

        let committed = reserve(&log, acc, "done");
        log.mark_committed(
            committed.id,
            vec![BalanceSnapshot {
                account_id: acc,
                balance: Money::new(100, usd()),
            }],
        )
        .unwrap();
        assert!(matches!(
            classify(&log, &key("done")).unwrap(),
            Replay::Committed(_)
        ));

        let failed = reserve(&log, acc, "failed");
        log.mark_failed(failed.id, FailureReason::AccountFrozen).unwrap();
        match classify(&log, &key("failed")).unwrap() {
            Replay::Failed(tx) => assert_eq!(tx.failure, Some(FailureReason::AccountFrozen)),
            other => panic!("expected Failed, got {other:?}"),
        }
    }
}
