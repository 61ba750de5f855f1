//! Content node model shared by activities and content elements.
//!
//! # Responsibility
//! - Define the read model returned by the content store.
//! - Define write-side values (`NewNode`, `NodePatch`, `NodeScope`).
//! - Carry the explicit hook-suppression flag (`WriteOptions`).
//!
//! # Invariants
//! - `is_linked_copy == true` implies `source_id.is_some()`.
//! - `source_modified_at` is `None` whenever `is_linked_copy == false`.
//! - Activities use `parent_id`; content elements use `container_id`.

use crate::model::repository::RepositoryId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Stable identifier for activities and content elements.
pub type NodeId = Uuid;

/// Entity kind of a content node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Outline node (module, page, section...) that may own children.
    Activity,
    /// Leaf content unit owned by one activity.
    ContentElement,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Activity => "activity",
            Self::ContentElement => "content_element",
        }
    }
}

/// Persisted content node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub repository_id: RepositoryId,
    /// Structural parent. Activity only; `None` for roots.
    pub parent_id: Option<NodeId>,
    /// Owning activity. Content element only.
    pub container_id: Option<NodeId>,
    /// Serialized as `type` to match schema naming.
    #[serde(rename = "type")]
    pub node_type: String,
    pub position: f64,
    pub data: Value,
    pub meta: Value,
    pub refs: Value,
    pub is_linked_copy: bool,
    /// Origin of this copy. Kept after detach as provenance only.
    pub source_id: Option<NodeId>,
    /// Source `modified_at` captured at clone or last refresh.
    pub source_modified_at: Option<i64>,
    /// Set when the structural parent was soft-deleted.
    pub detached: bool,
    pub is_deleted: bool,
    /// Epoch ms of the last content edit.
    pub modified_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ContentNode {
    /// Parent activity for activities, container activity for elements.
    pub fn owner_id(&self) -> Option<NodeId> {
        match self.kind {
            NodeKind::Activity => self.parent_id,
            NodeKind::ContentElement => self.container_id,
        }
    }
}

/// Link snapshot written on a freshly cloned node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLink {
    pub source_id: NodeId,
    pub source_modified_at: i64,
}

/// Attributes for creating one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub repository_id: RepositoryId,
    /// `parent_id` for activities, `container_id` for elements.
    pub owner_id: Option<NodeId>,
    pub node_type: String,
    pub position: f64,
    pub data: Value,
    pub meta: Value,
    pub refs: Value,
    pub link: Option<SourceLink>,
}

impl NewNode {
    /// New plain (unlinked) node with empty payloads.
    pub fn new(
        repository_id: RepositoryId,
        owner_id: Option<NodeId>,
        node_type: impl Into<String>,
        position: f64,
    ) -> Self {
        Self {
            repository_id,
            owner_id,
            node_type: node_type.into(),
            position,
            data: empty_object(),
            meta: empty_object(),
            refs: empty_object(),
            link: None,
        }
    }

    /// Linked copy of `source` placed under `owner_id` in `repository_id`.
    ///
    /// `data` and `meta` are deep-copied; `refs` start empty because
    /// references do not transfer across repositories.
    pub fn linked_copy_of(
        source: &ContentNode,
        repository_id: RepositoryId,
        owner_id: Option<NodeId>,
        node_type: impl Into<String>,
        position: f64,
    ) -> Self {
        Self {
            repository_id,
            owner_id,
            node_type: node_type.into(),
            position,
            data: source.data.clone(),
            meta: source.meta.clone(),
            refs: empty_object(),
            link: Some(SourceLink {
                source_id: source.id,
                source_modified_at: source.modified_at,
            }),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Link bookkeeping carried by a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkUpdate {
    /// `Linked -> Detached`. Only rows that are currently linked change;
    /// `source_id` is kept.
    Detach,
    /// Refreshes the snapshot of a still-linked copy.
    Resync { source_modified_at: i64 },
}

/// Partial update applied by `ContentStore::update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePatch {
    pub data: Option<Value>,
    pub meta: Option<Value>,
    pub refs: Option<Value>,
    pub position: Option<f64>,
    /// Reparent an activity. `Some(None)` moves it to the root level.
    pub parent_id: Option<Option<NodeId>>,
    pub link: Option<LinkUpdate>,
    pub detached: Option<bool>,
    pub is_deleted: Option<bool>,
}

impl NodePatch {
    /// Patch severing the link of every matched node.
    pub fn detach_link() -> Self {
        Self {
            link: Some(LinkUpdate::Detach),
            ..Self::default()
        }
    }

    /// Whether the patch touches node content (as opposed to placement or
    /// link bookkeeping).
    pub fn edits_content(&self) -> bool {
        self.data.is_some() || self.meta.is_some() || self.refs.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Row selection for set-based store writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeScope {
    /// Rows with one of the given ids.
    Ids(Vec<NodeId>),
    /// Rows owned by one of the given activities (`parent_id` for
    /// activities, `activity_id` for elements).
    Containers(Vec<NodeId>),
}

impl NodeScope {
    pub fn one(id: NodeId) -> Self {
        Self::Ids(vec![id])
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Ids(ids) | Self::Containers(ids) => ids.is_empty(),
        }
    }
}

/// Per-write flags threaded through every store write and hook guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Write issued by the link engine itself (clone, unlink, refresh).
    /// Suppresses "edit breaks link" guards and does not bump `modified_at`.
    pub library_update: bool,
}

impl WriteOptions {
    /// Regular author edit.
    pub fn user() -> Self {
        Self {
            library_update: false,
        }
    }

    /// Link-engine write.
    pub fn library() -> Self {
        Self {
            library_update: true,
        }
    }
}

/// Caller context carried for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkContext {
    /// Acting user, when known. Logged as an id only.
    pub actor_id: Option<String>,
}

impl LinkContext {
    pub fn system() -> Self {
        Self::default()
    }

    pub fn actor(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
        }
    }

    pub(crate) fn actor_label(&self) -> &str {
        self.actor_id.as_deref().unwrap_or("system")
    }
}

pub(crate) fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}
