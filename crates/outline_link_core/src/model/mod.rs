//! Outline domain model shared by store, cloner and link state manager.
//!
//! # Responsibility
//! - Define the node shape common to activities and content elements.
//! - Define the write-side value types passed to the store.
//!
//! # Invariants
//! - Every node is identified by a stable `NodeId`.
//! - Deletion is represented by soft-delete tombstones until purged.

pub mod node;
pub mod repository;
