//! Persistence contract consumed by the link engine and its SQLite
//! implementation.
//!
//! # Responsibility
//! - Define the store operations the cloner and link state manager need.
//! - Keep SQL details, ordering and transaction handling inside the store.
//!
//! # Invariants
//! - Sibling listings are deterministic: `position ASC`, then insertion order.
//! - Set-based writes never touch rows outside the given `NodeScope`.
//! - `run_in_transaction` joins an already open transaction instead of
//!   nesting one.

pub mod content_repo;
