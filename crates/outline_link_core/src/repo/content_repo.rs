//! Content store contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist repositories, activities and content elements.
//! - Provide set-based updates for cascading link state changes.
//! - Expose an atomic execution wrapper for multi-step operations.
//!
//! # Invariants
//! - Default reads skip soft-deleted rows.
//! - Detach patches only change rows that are currently linked.
//! - `modified_at` moves only on non-library content edits.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::node::{
    ContentNode, LinkUpdate, NewNode, NodeId, NodeKind, NodePatch, NodeScope, WriteOptions,
};
use crate::model::repository::{Repository, RepositoryId};
use log::debug;
use rusqlite::types::Value as SqlValue;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const ACTIVITY_SELECT_SQL: &str = "SELECT
    id,
    repository_id,
    parent_id,
    NULL AS container_id,
    type,
    position,
    data,
    meta,
    refs,
    is_linked_copy,
    source_id,
    source_modified_at,
    detached,
    is_deleted,
    modified_at,
    created_at,
    updated_at
FROM activities";

const ELEMENT_SELECT_SQL: &str = "SELECT
    id,
    repository_id,
    NULL AS parent_id,
    activity_id AS container_id,
    type,
    position,
    data,
    meta,
    refs,
    is_linked_copy,
    source_id,
    source_modified_at,
    detached,
    is_deleted,
    modified_at,
    created_at,
    updated_at
FROM content_elements";

const NOW_MS_SQL: &str = "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)";

/// Result type used by content store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from content store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Row addressed by a write does not exist.
    NodeNotFound { kind: NodeKind, id: NodeId },
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Input or persisted data cannot be mapped to the model.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NodeNotFound { kind, id } => write!(f, "{} not found: {id}", kind.as_str()),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "content store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "content store requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "content store requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid content data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Persistence operations consumed by the link engine.
pub trait ContentStore {
    /// Loads one repository.
    fn find_repository(&self, id: RepositoryId) -> StoreResult<Option<Repository>>;
    /// Persists one repository record.
    fn create_repository(&self, repository: &Repository) -> StoreResult<()>;
    /// Loads one node by id.
    fn find_by_id(
        &self,
        kind: NodeKind,
        id: NodeId,
        include_deleted: bool,
    ) -> StoreResult<Option<ContentNode>>;
    /// Creates one node and returns it as persisted.
    fn create(&self, kind: NodeKind, attrs: &NewNode, opts: WriteOptions)
        -> StoreResult<ContentNode>;
    /// Applies `patch` to every row in `scope`; returns the changed row count.
    fn update(
        &self,
        kind: NodeKind,
        scope: &NodeScope,
        patch: &NodePatch,
        opts: WriteOptions,
    ) -> StoreResult<usize>;
    /// Lists active child activities of `activity_id`, `position ASC`.
    fn children(&self, activity_id: NodeId, include_detached: bool)
        -> StoreResult<Vec<ContentNode>>;
    /// Lists active content elements owned by `activity_id`, `position ASC`.
    fn content_elements(&self, activity_id: NodeId) -> StoreResult<Vec<ContentNode>>;
    /// Ids of every activity below `activity_id` (the root excluded),
    /// regardless of deleted/detached flags.
    fn descendant_ids(&self, activity_id: NodeId) -> StoreResult<Vec<NodeId>>;
    /// Ids of every element owned by one of `activity_ids`, regardless of
    /// deleted/detached flags.
    fn element_ids_in(&self, activity_ids: &[NodeId]) -> StoreResult<Vec<NodeId>>;
    /// Every still-linked node of `kind` whose `source_id` is `source_id`.
    fn linked_copies_of(&self, kind: NodeKind, source_id: NodeId) -> StoreResult<Vec<ContentNode>>;
    /// Permanently deletes rows in `scope`; returns the deleted row count.
    fn remove(&self, kind: NodeKind, scope: &NodeScope) -> StoreResult<usize>;
    /// Runs `f` atomically. Commits on `Ok`, rolls back on `Err`.
    fn run_in_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<StoreError>;
}

/// SQLite-backed content store.
pub struct SqliteContentStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteContentStore<'conn> {
    /// Creates store from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_content_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl ContentStore for SqliteContentStore<'_> {
    fn find_repository(&self, id: RepositoryId) -> StoreResult<Option<Repository>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT name, schema_id
                 FROM repositories
                 WHERE id = ?1;",
                [id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.map(|(name, schema_id)| Repository {
            id,
            name,
            schema_id,
        }))
    }

    fn create_repository(&self, repository: &Repository) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO repositories (id, name, schema_id) VALUES (?1, ?2, ?3);",
            params![
                repository.id.to_string(),
                repository.name.as_str(),
                repository.schema_id.as_str(),
            ],
        )?;
        Ok(())
    }

    fn find_by_id(
        &self,
        kind: NodeKind,
        id: NodeId,
        include_deleted: bool,
    ) -> StoreResult<Option<ContentNode>> {
        let mut stmt = self.conn.prepare(&format!(
            "{}
             WHERE id = ?1
               AND (?2 = 1 OR is_deleted = 0);",
            select_sql(kind)
        ))?;
        let mut rows = stmt.query(params![id.to_string(), bool_to_int(include_deleted)])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_node_row(row, kind)?));
        }
        Ok(None)
    }

    fn create(
        &self,
        kind: NodeKind,
        attrs: &NewNode,
        opts: WriteOptions,
    ) -> StoreResult<ContentNode> {
        if kind == NodeKind::ContentElement && attrs.owner_id.is_none() {
            return Err(StoreError::InvalidData(
                "content element requires a container activity".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        self.conn.execute(
            &format!(
                "INSERT INTO {} (
                    id,
                    repository_id,
                    {},
                    type,
                    position,
                    data,
                    meta,
                    refs,
                    is_linked_copy,
                    source_id,
                    source_modified_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
                table_name(kind),
                owner_column(kind)
            ),
            params![
                id.to_string(),
                attrs.repository_id.to_string(),
                attrs.owner_id.map(|value| value.to_string()),
                attrs.node_type.as_str(),
                attrs.position,
                json_to_db(&attrs.data)?,
                json_to_db(&attrs.meta)?,
                json_to_db(&attrs.refs)?,
                bool_to_int(attrs.link.is_some()),
                attrs.link.map(|link| link.source_id.to_string()),
                attrs.link.map(|link| link.source_modified_at),
            ],
        )?;
        debug!(
            "event=node_create module=store kind={} id={id} linked={} library_update={}",
            kind.as_str(),
            attrs.link.is_some(),
            opts.library_update
        );

        self.find_by_id(kind, id, false)?
            .ok_or(StoreError::NodeNotFound { kind, id })
    }

    fn update(
        &self,
        kind: NodeKind,
        scope: &NodeScope,
        patch: &NodePatch,
        opts: WriteOptions,
    ) -> StoreResult<usize> {
        if scope.is_empty() || patch.is_empty() {
            return Ok(0);
        }

        let mut assignments: Vec<String> = Vec::new();
        let mut bind_values: Vec<SqlValue> = Vec::new();
        let mut linked_only = false;

        for (column, value) in [
            ("data", &patch.data),
            ("meta", &patch.meta),
            ("refs", &patch.refs),
        ] {
            if let Some(value) = value {
                assignments.push(format!("{column} = ?"));
                bind_values.push(SqlValue::Text(json_to_db(value)?));
            }
        }
        if let Some(position) = patch.position {
            assignments.push("position = ?".to_string());
            bind_values.push(SqlValue::Real(position));
        }
        if let Some(parent_id) = patch.parent_id {
            if kind != NodeKind::Activity {
                return Err(StoreError::InvalidData(
                    "only activities can be reparented".to_string(),
                ));
            }
            assignments.push("parent_id = ?".to_string());
            bind_values.push(match parent_id {
                Some(parent_id) => SqlValue::Text(parent_id.to_string()),
                None => SqlValue::Null,
            });
        }
        match patch.link {
            Some(LinkUpdate::Detach) => {
                assignments.push("is_linked_copy = 0".to_string());
                assignments.push("source_modified_at = NULL".to_string());
                linked_only = true;
            }
            Some(LinkUpdate::Resync { source_modified_at }) => {
                assignments.push("source_modified_at = ?".to_string());
                bind_values.push(SqlValue::Integer(source_modified_at));
                linked_only = true;
            }
            None => {}
        }
        for (column, flag) in [("detached", patch.detached), ("is_deleted", patch.is_deleted)] {
            if let Some(flag) = flag {
                assignments.push(format!("{column} = ?"));
                bind_values.push(SqlValue::Integer(bool_to_int(flag)));
            }
        }
        if patch.edits_content() && !opts.library_update {
            assignments.push(format!("modified_at = {NOW_MS_SQL}"));
        }
        assignments.push(format!("updated_at = {NOW_MS_SQL}"));

        let (scope_column, ids) = match scope {
            NodeScope::Ids(ids) => ("id", ids),
            NodeScope::Containers(ids) => (owner_column(kind), ids),
        };
        let mut sql = format!(
            "UPDATE {} SET {} WHERE {scope_column} IN ({})",
            table_name(kind),
            assignments.join(", "),
            placeholders(ids.len())
        );
        bind_values.extend(ids.iter().map(|id| SqlValue::Text(id.to_string())));
        if linked_only {
            sql.push_str(" AND is_linked_copy = 1");
        }
        sql.push(';');

        let changed = self.conn.execute(&sql, params_from_iter(bind_values))?;
        debug!(
            "event=node_update module=store kind={} scope_size={} changed={changed} library_update={}",
            kind.as_str(),
            ids.len(),
            opts.library_update
        );
        Ok(changed)
    }

    fn children(
        &self,
        activity_id: NodeId,
        include_detached: bool,
    ) -> StoreResult<Vec<ContentNode>> {
        query_nodes(
            self.conn,
            NodeKind::Activity,
            &format!(
                "{ACTIVITY_SELECT_SQL}
                 WHERE parent_id = ?1
                   AND is_deleted = 0
                   AND (?2 = 1 OR detached = 0)
                 ORDER BY position ASC, rowid ASC;"
            ),
            params![activity_id.to_string(), bool_to_int(include_detached)],
        )
    }

    fn content_elements(&self, activity_id: NodeId) -> StoreResult<Vec<ContentNode>> {
        query_nodes(
            self.conn,
            NodeKind::ContentElement,
            &format!(
                "{ELEMENT_SELECT_SQL}
                 WHERE activity_id = ?1
                   AND is_deleted = 0
                 ORDER BY position ASC, rowid ASC;"
            ),
            params![activity_id.to_string()],
        )
    }

    fn descendant_ids(&self, activity_id: NodeId) -> StoreResult<Vec<NodeId>> {
        let mut stmt = self.conn.prepare(
            "WITH RECURSIVE subtree(id) AS (
                SELECT id
                FROM activities
                WHERE parent_id = ?1
                UNION ALL
                SELECT child.id
                FROM activities child
                INNER JOIN subtree parent ON child.parent_id = parent.id
            )
            SELECT id FROM subtree;",
        )?;
        let mut rows = stmt.query([activity_id.to_string()])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            ids.push(parse_uuid(&value, "activities.id")?);
        }
        Ok(ids)
    }

    fn element_ids_in(&self, activity_ids: &[NodeId]) -> StoreResult<Vec<NodeId>> {
        if activity_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id
             FROM content_elements
             WHERE activity_id IN ({})
             ORDER BY rowid ASC;",
            placeholders(activity_ids.len())
        ))?;
        let mut rows = stmt.query(params_from_iter(
            activity_ids.iter().map(|id| id.to_string()),
        ))?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            ids.push(parse_uuid(&value, "content_elements.id")?);
        }
        Ok(ids)
    }

    fn linked_copies_of(&self, kind: NodeKind, source_id: NodeId) -> StoreResult<Vec<ContentNode>> {
        query_nodes(
            self.conn,
            kind,
            &format!(
                "{}
                 WHERE source_id = ?1
                   AND is_linked_copy = 1
                 ORDER BY rowid ASC;",
                select_sql(kind)
            ),
            params![source_id.to_string()],
        )
    }

    fn remove(&self, kind: NodeKind, scope: &NodeScope) -> StoreResult<usize> {
        if scope.is_empty() {
            return Ok(0);
        }
        let (scope_column, ids) = match scope {
            NodeScope::Ids(ids) => ("id", ids),
            NodeScope::Containers(ids) => (owner_column(kind), ids),
        };
        let removed = self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE {scope_column} IN ({});",
                table_name(kind),
                placeholders(ids.len())
            ),
            params_from_iter(ids.iter().map(|id| id.to_string())),
        )?;
        Ok(removed)
    }

    fn run_in_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<StoreError>,
    {
        if !self.conn.is_autocommit() {
            return f(self);
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        // Dropping `tx` on the error path rolls the transaction back.
        let value = f(self)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }
}

fn query_nodes(
    conn: &Connection,
    kind: NodeKind,
    sql: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<ContentNode>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(parse_node_row(row, kind)?);
    }
    Ok(items)
}

fn parse_node_row(row: &Row<'_>, kind: NodeKind) -> StoreResult<ContentNode> {
    let table = table_name(kind);
    let id_text: String = row.get("id")?;
    let repository_text: String = row.get("repository_id")?;

    let parse_optional_uuid = |column: &'static str| -> StoreResult<Option<Uuid>> {
        row.get::<_, Option<String>>(column)?
            .map(|value| parse_uuid(&value, column))
            .transpose()
    };

    Ok(ContentNode {
        id: parse_uuid(&id_text, "id")?,
        kind,
        repository_id: parse_uuid(&repository_text, "repository_id")?,
        parent_id: parse_optional_uuid("parent_id")?,
        container_id: parse_optional_uuid("container_id")?,
        node_type: row.get("type")?,
        position: row.get("position")?,
        data: json_from_db(row, "data", table)?,
        meta: json_from_db(row, "meta", table)?,
        refs: json_from_db(row, "refs", table)?,
        is_linked_copy: parse_flag(row, "is_linked_copy", table)?,
        source_id: parse_optional_uuid("source_id")?,
        source_modified_at: row.get("source_modified_at")?,
        detached: parse_flag(row, "detached", table)?,
        is_deleted: parse_flag(row, "is_deleted", table)?,
        modified_at: row.get("modified_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_flag(row: &Row<'_>, column: &'static str, table: &'static str) -> StoreResult<bool> {
    match row.get::<_, i64>(column)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(StoreError::InvalidData(format!(
            "invalid {column} value `{other}` in {table}.{column}"
        ))),
    }
}

fn json_from_db(row: &Row<'_>, column: &'static str, table: &'static str) -> StoreResult<Value> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw).map_err(|err| {
        StoreError::InvalidData(format!("invalid json in {table}.{column}: {err}"))
    })
}

fn json_to_db(value: &Value) -> StoreResult<String> {
    serde_json::to_string(value)
        .map_err(|err| StoreError::InvalidData(format!("unserializable payload: {err}")))
}

fn parse_uuid(value: &str, column: &'static str) -> StoreResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| StoreError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn select_sql(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Activity => ACTIVITY_SELECT_SQL,
        NodeKind::ContentElement => ELEMENT_SELECT_SQL,
    }
}

fn table_name(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Activity => "activities",
        NodeKind::ContentElement => "content_elements",
    }
}

fn owner_column(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Activity => "parent_id",
        NodeKind::ContentElement => "activity_id",
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

const NODE_COLUMNS: &[&str] = &[
    "id",
    "repository_id",
    "type",
    "position",
    "data",
    "meta",
    "refs",
    "is_linked_copy",
    "source_id",
    "source_modified_at",
    "detached",
    "is_deleted",
    "modified_at",
    "created_at",
    "updated_at",
];

fn ensure_content_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for (table, owner) in [
        ("repositories", None),
        ("activities", Some("parent_id")),
        ("content_elements", Some("activity_id")),
    ] {
        if !table_exists(conn, table)? {
            return Err(StoreError::MissingRequiredTable(table));
        }
        let Some(owner) = owner else {
            continue;
        };
        for column in NODE_COLUMNS.iter().copied().chain(std::iter::once(owner)) {
            if !table_has_column(conn, table, column)? {
                return Err(StoreError::MissingRequiredColumn { table, column });
            }
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
