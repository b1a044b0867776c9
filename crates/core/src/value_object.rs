//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value** - identity does
/// not matter, only the attribute values do. `Money { minor_units: 100,
/// currency: USD }` is the canonical example in this codebase: any two
/// hundred-cent USD values are interchangeable.
///
/// To "modify" a value object, construct a new one (see `Money::checked_add`).
/// Immutability makes them safe to copy across threads and keeps ledger
/// arithmetic free of aliasing surprises.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
