//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// An `Account` keeps its identity while its balance and status change;
/// two accounts with equal balances are still distinct entities.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
