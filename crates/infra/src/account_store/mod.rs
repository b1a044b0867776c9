//! Account storage boundary.
//!
//! This module defines an infrastructure-facing abstraction for reading and
//! atomically updating account records without making any storage
//! assumptions. The ledger engine is the only writer of balances and
//! versions; the store enforces nothing beyond version-checked atomicity.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryAccountStore;
pub use r#trait::{AccountStore, AccountStoreError};
