//! Core domain logic for outline content linking.
//! This crate is the single source of truth for link invariants.

pub mod db;
pub mod hooks;
pub mod logging;
pub mod model;
pub mod repo;
pub mod schema;
pub mod service;

pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use hooks::LinkAware;
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::node::{
    ContentNode, LinkContext, LinkUpdate, NewNode, NodeId, NodeKind, NodePatch, NodeScope,
    SourceLink, WriteOptions,
};
pub use model::repository::{Repository, RepositoryId};
pub use repo::content_repo::{ContentStore, SqliteContentStore, StoreError, StoreResult};
pub use schema::catalog::{SchemaCatalog, StaticSchemaCatalog};
pub use schema::config::{OutlineLevel, SchemaConfig, SchemaConfigError, SchemaDefinition};
pub use schema::resolver::{resolve_type, TypeResolutionError};
pub use service::link_service::{LinkError, LinkService};
pub use service::link_state::LinkStateManager;
pub use service::outline_service::{ContentEdit, OutlineService, OutlineServiceError};
pub use service::tree_cloner::TreeCloner;

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
