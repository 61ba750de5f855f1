//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate content store calls into link and outline use-cases.
//! - Keep callers decoupled from storage details.

pub mod link_service;
pub mod link_state;
pub mod outline_service;
pub mod tree_cloner;
