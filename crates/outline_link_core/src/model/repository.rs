//! Repository (content owner) model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable repository identifier.
pub type RepositoryId = Uuid;

/// A repository owns one outline tree and is bound to one content schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,
    pub name: String,
    /// Schema id resolved against the configured `SchemaCatalog`.
    pub schema_id: String,
}

impl Repository {
    /// Creates a repository record with a generated id.
    pub fn new(name: impl Into<String>, schema_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            schema_id: schema_id.into(),
        }
    }

    /// Whether both repositories share the same content schema.
    pub fn shares_schema_with(&self, other: &Repository) -> bool {
        self.schema_id == other.schema_id
    }
}
