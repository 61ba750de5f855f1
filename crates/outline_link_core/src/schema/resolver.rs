//! Target type resolution for linked copies.

use crate::schema::catalog::SchemaCatalog;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Type resolution failures. Both are client errors raised before any write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeResolutionError {
    /// Same schema, but the type is not allowed under `parent_type`.
    TypeNotAllowed {
        node_type: String,
        schema_id: String,
        parent_type: Option<String>,
    },
    /// Different schemas and no configured mapping exists.
    NoCompatibleType {
        node_type: String,
        schema_id: String,
        parent_type: Option<String>,
    },
}

impl Display for TypeResolutionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TypeNotAllowed {
                node_type,
                schema_id,
                parent_type,
            } => write!(
                f,
                "type `{node_type}` is not allowed under `{}` in schema `{schema_id}`",
                parent_type.as_deref().unwrap_or("<root>")
            ),
            Self::NoCompatibleType {
                node_type,
                schema_id,
                parent_type,
            } => write!(
                f,
                "no type compatible with `{node_type}` under `{}` in schema `{schema_id}`",
                parent_type.as_deref().unwrap_or("<root>")
            ),
        }
    }
}

impl Error for TypeResolutionError {}

/// Resolves the type a copied node takes at its target location.
///
/// Container-class (non-outline) types pass through unchanged. Outline
/// types are checked against the shared schema, or mapped through the
/// target schema's compatibility table when the schemas differ.
pub fn resolve_type<C: SchemaCatalog + ?Sized>(
    catalog: &C,
    source_type: &str,
    target_schema_id: &str,
    parent_type: Option<&str>,
    is_same_schema: bool,
) -> Result<String, TypeResolutionError> {
    if !catalog.is_outline_activity(source_type) {
        return Ok(source_type.to_string());
    }

    if is_same_schema {
        if catalog.is_type_allowed_at_level(source_type, target_schema_id, parent_type) {
            return Ok(source_type.to_string());
        }
        return Err(TypeResolutionError::TypeNotAllowed {
            node_type: source_type.to_string(),
            schema_id: target_schema_id.to_string(),
            parent_type: parent_type.map(str::to_string),
        });
    }

    catalog
        .compatible_target_type(source_type, target_schema_id, parent_type)
        .ok_or_else(|| TypeResolutionError::NoCompatibleType {
            node_type: source_type.to_string(),
            schema_id: target_schema_id.to_string(),
            parent_type: parent_type.map(str::to_string),
        })
}

#[cfg(test)]
mod tests {
    use super::{resolve_type, TypeResolutionError};
    use crate::schema::catalog::StaticSchemaCatalog;
    use crate::schema::config::SchemaConfig;

    fn catalog() -> StaticSchemaCatalog {
        let config = SchemaConfig::from_json_str(
            r#"{"schemas":[
                {"id":"course","outline":[
                    {"type":"MODULE","root":true},
                    {"type":"PAGE","parents":["MODULE"]}
                ]},
                {"id":"wiki","outline":[
                    {"type":"TOPIC","root":true,"parents":["TOPIC"],"compatible_with":["MODULE","PAGE"]}
                ]}
            ]}"#,
        )
        .expect("valid config");
        StaticSchemaCatalog::from_config(config).expect("catalog")
    }

    #[test]
    fn container_types_pass_through_any_schema() {
        let catalog = catalog();
        for same in [true, false] {
            assert_eq!(
                resolve_type(&catalog, "SECTION", "wiki", Some("TOPIC"), same),
                Ok("SECTION".to_string())
            );
        }
    }

    #[test]
    fn same_schema_checks_level() {
        let catalog = catalog();
        assert_eq!(
            resolve_type(&catalog, "PAGE", "course", Some("MODULE"), true),
            Ok("PAGE".to_string())
        );
        assert_eq!(
            resolve_type(&catalog, "PAGE", "course", None, true),
            Err(TypeResolutionError::TypeNotAllowed {
                node_type: "PAGE".to_string(),
                schema_id: "course".to_string(),
                parent_type: None,
            })
        );
    }

    #[test]
    fn cross_schema_maps_or_fails() {
        let catalog = catalog();
        assert_eq!(
            resolve_type(&catalog, "PAGE", "wiki", Some("TOPIC"), false),
            Ok("TOPIC".to_string())
        );
        let err = resolve_type(&catalog, "TOPIC", "course", None, false)
            .expect_err("course has no mapping for TOPIC");
        assert!(matches!(err, TypeResolutionError::NoCompatibleType { .. }));
    }

    #[test]
    fn resolution_is_deterministic() {
        let catalog = catalog();
        let inputs = [
            ("PAGE", "course", Some("MODULE"), true),
            ("PAGE", "course", None, true),
            ("MODULE", "wiki", None, false),
            ("TOPIC", "course", Some("MODULE"), false),
            ("SECTION", "course", None, false),
        ];
        for (node_type, schema, parent, same) in inputs {
            let first = resolve_type(&catalog, node_type, schema, parent, same);
            let second = resolve_type(&catalog, node_type, schema, parent, same);
            assert_eq!(first, second);
        }
    }
}
