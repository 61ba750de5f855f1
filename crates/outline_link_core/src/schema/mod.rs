//! Content schema configuration and type resolution.
//!
//! # Responsibility
//! - Load and validate static schema configuration (`config`).
//! - Answer level/compatibility questions about schemas (`catalog`).
//! - Decide the target type of a node copied across repositories
//!   (`resolver`).
//!
//! # Invariants
//! - Everything here is pure: answers depend on configuration only, never
//!   on stored outline data.

pub mod catalog;
pub mod config;
pub mod resolver;
