use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use corebank_core::{AccountId, Money};
use corebank_ledger::{Account, AccountStatus};

use super::r#trait::{AccountStore, AccountStoreError};

/// In-memory account store.
///
/// Intended for tests/dev. A single `RwLock` over the map makes every
/// `compare_and_swap` atomic; per-key sharding would be the next step if
/// this were ever on a hot path.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<AccountId, Account>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> AccountStoreError {
        AccountStoreError::Backend("lock poisoned".to_string())
    }
}

impl AccountStore for InMemoryAccountStore {
    fn get(&self, account_id: AccountId) -> Result<Account, AccountStoreError> {
        let accounts = self.accounts.read().map_err(|_| Self::poisoned())?;
        accounts
            .get(&account_id)
            .cloned()
            .ok_or(AccountStoreError::NotFound)
    }

    fn create(
        &self,
        initial_balance: Money,
        status: AccountStatus,
    ) -> Result<Account, AccountStoreError> {
        let account = Account::open(AccountId::new(), initial_balance, status, Utc::now())
            .map_err(|e| AccountStoreError::Invalid(e.to_string()))?;

        let mut accounts = self.accounts.write().map_err(|_| Self::poisoned())?;
        accounts.insert(account.id, account.clone());
        Ok(account)
    }

    fn compare_and_swap(
        &self,
        account_id: AccountId,
        expected_version: u64,
        new_balance: Money,
    ) -> Result<Account, AccountStoreError> {
        let mut accounts = self.accounts.write().map_err(|_| Self::poisoned())?;
        let account = accounts
            .get_mut(&account_id)
            .ok_or(AccountStoreError::NotFound)?;

        if account.version != expected_version {
            return Err(AccountStoreError::VersionConflict {
                expected: expected_version,
                actual: account.version,
            });
        }

        account.balance = new_balance;
        account.version += 1;
        Ok(account.clone())
    }

    fn set_status(
        &self,
        account_id: AccountId,
        expected_version: u64,
        status: AccountStatus,
    ) -> Result<Account, AccountStoreError> {
        let mut accounts = self.accounts.write().map_err(|_| Self::poisoned())?;
        let account = accounts
            .get_mut(&account_id)
            .ok_or(AccountStoreError::NotFound)?;

        if account.version != expected_version {
            return Err(AccountStoreError::VersionConflict {
                expected: expected_version,
                actual: account.version,
            });
        }

        account.status = status;
        account.version += 1;
        Ok(account.clone())
    }
}
