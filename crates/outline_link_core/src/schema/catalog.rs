//! Schema catalog contract and static implementation.

use crate::schema::config::{OutlineLevel, SchemaConfig, SchemaConfigError};
use std::collections::{BTreeMap, BTreeSet};

/// Read-only view of repository schemas consumed by the link engine.
pub trait SchemaCatalog {
    /// Whether `node_type` is part of the outline hierarchy of any schema.
    /// Everything else is a container-class type.
    fn is_outline_activity(&self, node_type: &str) -> bool;

    /// Whether `node_type` may sit under `parent_type` (root when `None`)
    /// in `schema_id`.
    fn is_type_allowed_at_level(
        &self,
        node_type: &str,
        schema_id: &str,
        parent_type: Option<&str>,
    ) -> bool;

    /// First level of `target_schema_id` that accepts `node_type` under
    /// `parent_type`, in declaration order.
    fn compatible_target_type(
        &self,
        node_type: &str,
        target_schema_id: &str,
        parent_type: Option<&str>,
    ) -> Option<String>;
}

/// Catalog compiled from a validated `SchemaConfig`.
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaCatalog {
    schemas: BTreeMap<String, Vec<OutlineLevel>>,
    outline_types: BTreeSet<String>,
}

impl StaticSchemaCatalog {
    /// Validates `config` and builds the lookup tables.
    pub fn from_config(config: SchemaConfig) -> Result<Self, SchemaConfigError> {
        config.validate()?;

        let mut catalog = Self::default();
        for schema in config.schemas {
            catalog.outline_types.extend(
                schema
                    .outline
                    .iter()
                    .map(|level| level.node_type.clone()),
            );
            catalog.schemas.insert(schema.id, schema.outline);
        }
        Ok(catalog)
    }

    pub fn schema_ids(&self) -> Vec<String> {
        self.schemas.keys().cloned().collect()
    }

    fn level(&self, schema_id: &str, node_type: &str) -> Option<&OutlineLevel> {
        self.schemas
            .get(schema_id)?
            .iter()
            .find(|level| level.node_type == node_type)
    }
}

impl SchemaCatalog for StaticSchemaCatalog {
    fn is_outline_activity(&self, node_type: &str) -> bool {
        self.outline_types.contains(node_type)
    }

    fn is_type_allowed_at_level(
        &self,
        node_type: &str,
        schema_id: &str,
        parent_type: Option<&str>,
    ) -> bool {
        self.level(schema_id, node_type)
            .is_some_and(|level| level.allows_parent(parent_type))
    }

    fn compatible_target_type(
        &self,
        node_type: &str,
        target_schema_id: &str,
        parent_type: Option<&str>,
    ) -> Option<String> {
        self.schemas
            .get(target_schema_id)?
            .iter()
            .find(|level| level.allows_parent(parent_type) && level.accepts(node_type))
            .map(|level| level.node_type.clone())
    }
}
