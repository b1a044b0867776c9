//! Recovery pass for crash-interrupted reservations.
//!
//! A crash between log reservation and commit mark leaves a `Pending`
//! record behind. This pass ages those out: anything pending past the
//! cutoff is marked `Failed(StaleReservation)` with a warning: never
//! silently discarded, and never blindly re-applied (replaying balance
//! deltas is not verifiably idempotent without a transactional backend).
//!
//! Run it periodically from a maintenance job, with a cutoff comfortably
//! larger than any operation deadline so in-flight work is never aged out
//! from under a live caller.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use corebank_core::{LedgerResult, TransactionId};
use corebank_ledger::FailureReason;

use crate::account_store::AccountStore;
use crate::engine::LedgerEngine;
use crate::transaction_log::{TransactionLog, TransactionLogError};

impl<S, L> LedgerEngine<S, L>
where
    S: AccountStore,
    L: TransactionLog,
{
    /// Fail every reservation still `Pending` from before `cutoff`.
    /// Returns the ids of the records that were aged out.
    pub fn recover_stale(&self, cutoff: DateTime<Utc>) -> LedgerResult<Vec<TransactionId>> {
        let stale = self.log().list_pending_older_than(cutoff)?;
        let mut recovered = Vec::with_capacity(stale.len());

        for record in stale {
            match self
                .log()
                .mark_failed(record.id, FailureReason::StaleReservation)
            {
                Ok(_) => {
                    warn!(
                        transaction_id = %record.id,
                        idempotency_key = %record.idempotency_key,
                        created_at = %record.created_at,
                        "aged out stale pending reservation"
                    );
                    recovered.push(record.id);
                }
                // Lost a race against the owning operation reaching a
                // terminal state; nothing to recover.
                Err(TransactionLogError::InvalidTransition(_)) => {
                    debug!(transaction_id = %record.id, "reservation settled before recovery");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(recovered)
    }
}
