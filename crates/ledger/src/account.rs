//! Account record and status rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use corebank_core::{AccountId, Entity, LedgerError, LedgerResult, Money};

/// Lifecycle status of an account.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Frozen,
    Closed,
}

impl AccountStatus {
    /// Allowed lifecycle transitions. `Closed` is terminal.
    pub fn can_transition_to(self, to: AccountStatus) -> bool {
        use AccountStatus::*;
        matches!(
            (self, to),
            (Active, Frozen) | (Frozen, Active) | (Active, Closed) | (Frozen, Closed)
        )
    }
}

impl core::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            AccountStatus::Active => "active",
            AccountStatus::Frozen => "frozen",
            AccountStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Account snapshot: identity, balance, status, optimistic-concurrency
/// version.
///
/// The account store is the only writer of `balance` and `version`; the
/// balance of any account is always the sum of committed transaction deltas
/// applied since creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: Money,
    pub status: AccountStatus,
    /// Incremented on every successful mutation; compare-and-swap input.
    pub version: u64,
    pub opened_at: DateTime<Utc>,
}

impl Entity for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Account {
    /// Open a new account. Initial balance must be non-negative.
    pub fn open(
        id: AccountId,
        initial_balance: Money,
        status: AccountStatus,
        opened_at: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        if initial_balance.is_negative() {
            return Err(LedgerError::invalid_amount(
                "initial balance must be non-negative",
            ));
        }
        Ok(Self {
            id,
            balance: initial_balance,
            status,
            version: 1,
            opened_at,
        })
    }

    /// Reject balance mutation unless the account is `Active`.
    pub fn ensure_active(&self) -> LedgerResult<()> {
        match self.status {
            AccountStatus::Active => Ok(()),
            AccountStatus::Frozen => Err(LedgerError::AccountFrozen),
            AccountStatus::Closed => Err(LedgerError::AccountClosed),
        }
    }

    /// Closing requires a zero balance; remaining funds must be withdrawn
    /// or transferred out first.
    pub fn ensure_closable(&self) -> LedgerResult<()> {
        if self.status == AccountStatus::Closed {
            return Err(LedgerError::AccountClosed);
        }
        if !self.balance.is_zero() {
            return Err(LedgerError::invalid_transition(format!(
                "cannot close account with non-zero balance {}",
                self.balance
            )));
        }
        Ok(())
    }
}
