use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use corebank_core::{AccountId, IdempotencyKey, TransactionId};
use corebank_ledger::{BalanceSnapshot, FailureReason, Transaction, TransactionStatus};

use super::r#trait::{Pagination, TransactionLog, TransactionLogError};

#[derive(Debug, Default)]
struct LogState {
    /// Append order; sequence n lives at index n - 1.
    order: Vec<TransactionId>,
    by_id: HashMap<TransactionId, Transaction>,
    by_key: HashMap<IdempotencyKey, TransactionId>,
}

/// In-memory append-only transaction log.
///
/// Intended for tests/dev. A single `RwLock` over the state makes the
/// reserve-the-key step of `append` atomic with respect to concurrent
/// appends sharing the same idempotency key.
#[derive(Debug, Default)]
pub struct InMemoryTransactionLog {
    state: RwLock<LogState>,
}

impl InMemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> TransactionLogError {
        TransactionLogError::Backend("lock poisoned".to_string())
    }

    fn transition(
        &self,
        id: TransactionId,
        apply: impl FnOnce(Transaction) -> Result<Transaction, corebank_core::LedgerError>,
    ) -> Result<Transaction, TransactionLogError> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        let record = state
            .by_id
            .get(&id)
            .cloned()
            .ok_or(TransactionLogError::NotFound)?;

        let updated =
            apply(record).map_err(|e| TransactionLogError::InvalidTransition(e.to_string()))?;
        state.by_id.insert(id, updated.clone());
        Ok(updated)
    }
}

impl TransactionLog for InMemoryTransactionLog {
    fn append(&self, transaction: Transaction) -> Result<Transaction, TransactionLogError> {
        if !transaction.is_pending() {
            return Err(TransactionLogError::InvalidRecord(format!(
                "append requires a pending record, got {:?}",
                transaction.status
            )));
        }
        transaction
            .validate()
            .map_err(|e| TransactionLogError::InvalidRecord(e.to_string()))?;

        let mut state = self.state.write().map_err(|_| Self::poisoned())?;

        if let Some(existing_id) = state.by_key.get(&transaction.idempotency_key) {
            let existing = state.by_id.get(existing_id).cloned().ok_or_else(|| {
                TransactionLogError::Backend("key index points at a missing record".to_string())
            })?;
            return Err(TransactionLogError::DuplicateKey {
                existing: Box::new(existing),
            });
        }

        let mut stored = transaction;
        stored.sequence = state.order.len() as u64 + 1;
        state.order.push(stored.id);
        state
            .by_key
            .insert(stored.idempotency_key.clone(), stored.id);
        state.by_id.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn lookup(&self, id: TransactionId) -> Result<Transaction, TransactionLogError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        state
            .by_id
            .get(&id)
            .cloned()
            .ok_or(TransactionLogError::NotFound)
    }

    fn lookup_by_key(&self, key: &IdempotencyKey) -> Result<Transaction, TransactionLogError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        state
            .by_key
            .get(key)
            .and_then(|id| state.by_id.get(id))
            .cloned()
            .ok_or(TransactionLogError::NotFound)
    }

    fn list_by_account(
        &self,
        account_id: AccountId,
        page: Pagination,
    ) -> Result<Vec<Transaction>, TransactionLogError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.by_id.get(id))
            .filter(|tx| tx.touches(account_id))
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    fn mark_committed(
        &self,
        id: TransactionId,
        balances: Vec<BalanceSnapshot>,
    ) -> Result<Transaction, TransactionLogError> {
        self.transition(id, |tx| tx.into_committed(balances))
    }

    fn mark_failed(
        &self,
        id: TransactionId,
        reason: FailureReason,
    ) -> Result<Transaction, TransactionLogError> {
        self.transition(id, |tx| tx.into_failed(reason))
    }

    fn list_pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, TransactionLogError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.by_id.get(id))
            .filter(|tx| tx.status == TransactionStatus::Pending && tx.created_at < cutoff)
            .cloned()
            .collect())
    }
}
