//! Schema configuration document.
//!
//! A configuration is a JSON document listing schemas and, for each one,
//! the outline levels it allows:
//!
//! ```json
//! {
//!   "schemas": [
//!     {
//!       "id": "course",
//!       "outline": [
//!         { "type": "MODULE", "root": true },
//!         { "type": "PAGE", "root": true, "parents": ["MODULE"], "compatible_with": ["LESSON"] }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! Types not listed in any `outline` are container-class types and are
//! never validated against a level.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.\-]*$").expect("valid identifier regex"));

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub schemas: Vec<SchemaDefinition>,
}

/// One repository schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub id: String,
    /// Outline levels in declaration order. Order matters for compatibility
    /// lookups: the first matching level wins.
    #[serde(default)]
    pub outline: Vec<OutlineLevel>,
}

/// One outline activity type and where it may appear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineLevel {
    #[serde(rename = "type")]
    pub node_type: String,
    /// Allowed at repository root (no parent activity).
    #[serde(default)]
    pub root: bool,
    /// Outline types of the same schema this type may be nested under.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Foreign types this level accepts when content is linked in from a
    /// repository with a different schema.
    #[serde(default)]
    pub compatible_with: Vec<String>,
}

impl OutlineLevel {
    /// Whether this level accepts a child of `parent_type` (root when `None`).
    pub fn allows_parent(&self, parent_type: Option<&str>) -> bool {
        match parent_type {
            None => self.root,
            Some(parent) => self.parents.iter().any(|value| value == parent),
        }
    }

    /// Whether a node of `source_type` may become this level.
    pub fn accepts(&self, source_type: &str) -> bool {
        self.node_type == source_type || self.compatible_with.iter().any(|v| v == source_type)
    }
}

/// Schema configuration load/validation errors.
#[derive(Debug)]
pub enum SchemaConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    InvalidIdentifier(String),
    DuplicateSchema(String),
    DuplicateType {
        schema_id: String,
        node_type: String,
    },
    UnknownParentType {
        schema_id: String,
        node_type: String,
        parent_type: String,
    },
    UnreachableType {
        schema_id: String,
        node_type: String,
    },
}

impl Display for SchemaConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read schema config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid schema config: {err}"),
            Self::InvalidIdentifier(value) => write!(f, "invalid schema identifier `{value}`"),
            Self::DuplicateSchema(id) => write!(f, "schema declared twice: {id}"),
            Self::DuplicateType {
                schema_id,
                node_type,
            } => write!(f, "schema `{schema_id}` declares type `{node_type}` twice"),
            Self::UnknownParentType {
                schema_id,
                node_type,
                parent_type,
            } => write!(
                f,
                "schema `{schema_id}` type `{node_type}` names unknown parent `{parent_type}`"
            ),
            Self::UnreachableType {
                schema_id,
                node_type,
            } => write!(
                f,
                "schema `{schema_id}` type `{node_type}` is neither a root nor has parents"
            ),
        }
    }
}

impl Error for SchemaConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SchemaConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

impl SchemaConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(value: &str) -> Result<Self, SchemaConfigError> {
        let config: Self = serde_json::from_str(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SchemaConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SchemaConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Checks identifiers, duplicates and parent references.
    pub fn validate(&self) -> Result<(), SchemaConfigError> {
        let mut schema_ids = HashSet::new();
        for schema in &self.schemas {
            ensure_identifier(&schema.id)?;
            if !schema_ids.insert(schema.id.as_str()) {
                return Err(SchemaConfigError::DuplicateSchema(schema.id.clone()));
            }

            let mut types = HashSet::new();
            for level in &schema.outline {
                ensure_identifier(&level.node_type)?;
                if !types.insert(level.node_type.as_str()) {
                    return Err(SchemaConfigError::DuplicateType {
                        schema_id: schema.id.clone(),
                        node_type: level.node_type.clone(),
                    });
                }
                if !level.root && level.parents.is_empty() {
                    return Err(SchemaConfigError::UnreachableType {
                        schema_id: schema.id.clone(),
                        node_type: level.node_type.clone(),
                    });
                }
                for foreign in &level.compatible_with {
                    ensure_identifier(foreign)?;
                }
            }

            for level in &schema.outline {
                if let Some(parent) = level
                    .parents
                    .iter()
                    .find(|parent| !types.contains(parent.as_str()))
                {
                    return Err(SchemaConfigError::UnknownParentType {
                        schema_id: schema.id.clone(),
                        node_type: level.node_type.clone(),
                        parent_type: parent.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn ensure_identifier(value: &str) -> Result<(), SchemaConfigError> {
    if IDENTIFIER_RE.is_match(value) {
        Ok(())
    } else {
        Err(SchemaConfigError::InvalidIdentifier(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::{SchemaConfig, SchemaConfigError};

    #[test]
    fn parses_levels_with_defaults() {
        let config = SchemaConfig::from_json_str(
            r#"{"schemas":[{"id":"course","outline":[
                {"type":"MODULE","root":true},
                {"type":"PAGE","parents":["MODULE"]}
            ]}]}"#,
        )
        .expect("valid config");

        let page = &config.schemas[0].outline[1];
        assert!(!page.root);
        assert!(page.compatible_with.is_empty());
        assert!(page.allows_parent(Some("MODULE")));
        assert!(!page.allows_parent(None));
    }

    #[test]
    fn rejects_unknown_parent() {
        let err = SchemaConfig::from_json_str(
            r#"{"schemas":[{"id":"course","outline":[
                {"type":"PAGE","parents":["CHAPTER"]}
            ]}]}"#,
        )
        .expect_err("unknown parent must fail");
        assert!(matches!(
            err,
            SchemaConfigError::UnknownParentType { ref parent_type, .. } if parent_type == "CHAPTER"
        ));
    }

    #[test]
    fn rejects_duplicate_schema_and_bad_identifier() {
        let err = SchemaConfig::from_json_str(r#"{"schemas":[{"id":"a"},{"id":"a"}]}"#)
            .expect_err("duplicate schema must fail");
        assert!(matches!(err, SchemaConfigError::DuplicateSchema(ref id) if id == "a"));

        let err = SchemaConfig::from_json_str(r#"{"schemas":[{"id":"has space"}]}"#)
            .expect_err("bad identifier must fail");
        assert!(matches!(err, SchemaConfigError::InvalidIdentifier(_)));
    }

    #[test]
    fn rejects_level_without_placement() {
        let err = SchemaConfig::from_json_str(
            r#"{"schemas":[{"id":"course","outline":[{"type":"ORPHAN"}]}]}"#,
        )
        .expect_err("unplaceable type must fail");
        assert!(matches!(err, SchemaConfigError::UnreachableType { .. }));
    }

    #[test]
    fn reports_parse_errors() {
        let err = SchemaConfig::from_json_str("{").expect_err("truncated json must fail");
        assert!(matches!(err, SchemaConfigError::Parse(_)));
    }
}
