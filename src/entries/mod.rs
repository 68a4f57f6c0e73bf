//! Safe access to database entries.
//!
//! Everything read from a transaction comes back as a [`Value`], a view of
//! engine memory that is checked before each access.
mod value;
pub use value::{Value, ValueRef};

/// A key/data pair read from a transaction.
pub type Pair<'tx> = (Value<'tx>, Value<'tx>);
