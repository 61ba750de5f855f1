//! Outline editing use-case service.
//!
//! # Responsibility
//! - Create, edit, move and delete activities and content elements.
//! - Call the link-aware guards before every mutation so edits made to
//!   linked copies break their links as required.
//!
//! # Invariants
//! - Parent activity must exist in the same repository as the child.
//! - Outline types must be allowed at their level in the repository schema.
//! - Move operations must not create parent-child cycles.
//! - Guard and mutation commit or roll back together.

use crate::hooks::LinkAware;
use crate::model::node::{
    ContentNode, LinkContext, NewNode, NodeId, NodeKind, NodePatch, NodeScope, WriteOptions,
};
use crate::model::repository::{Repository, RepositoryId};
use crate::repo::content_repo::{ContentStore, StoreError};
use crate::schema::catalog::SchemaCatalog;
use crate::service::link_service::{LinkError, LinkService};
use crate::service::link_state::LinkStateManager;
use log::info;
use serde_json::Value;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from outline editing operations.
#[derive(Debug)]
pub enum OutlineServiceError {
    /// Target node does not exist (or is soft-deleted).
    NodeNotFound { kind: NodeKind, id: NodeId },
    /// Repository does not exist.
    RepositoryNotFound(RepositoryId),
    /// Parent activity does not exist.
    ParentNotFound(NodeId),
    /// Parent activity lives in another repository.
    ParentRepositoryMismatch {
        parent_id: NodeId,
        repository_id: RepositoryId,
    },
    /// Type is not allowed at the requested level.
    TypeNotAllowed {
        node_type: String,
        schema_id: String,
        parent_type: Option<String>,
    },
    /// Move operation would create a cycle.
    CycleDetected { node_id: NodeId, parent_id: NodeId },
    /// Link guard failure.
    Link(LinkError),
    /// Storage failure.
    Store(StoreError),
}

impl Display for OutlineServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeNotFound { kind, id } => write!(f, "{} not found: {id}", kind.as_str()),
            Self::RepositoryNotFound(id) => write!(f, "repository not found: {id}"),
            Self::ParentNotFound(id) => write!(f, "parent activity not found: {id}"),
            Self::ParentRepositoryMismatch {
                parent_id,
                repository_id,
            } => write!(
                f,
                "parent {parent_id} does not belong to repository {repository_id}"
            ),
            Self::TypeNotAllowed {
                node_type,
                schema_id,
                parent_type,
            } => write!(
                f,
                "type `{node_type}` is not allowed under `{}` in schema `{schema_id}`",
                parent_type.as_deref().unwrap_or("<root>")
            ),
            Self::CycleDetected { node_id, parent_id } => write!(
                f,
                "move would create cycle: node {node_id} under parent {parent_id}"
            ),
            Self::Link(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for OutlineServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Link(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<LinkError> for OutlineServiceError {
    fn from(value: LinkError) -> Self {
        match value {
            LinkError::Store(err) => Self::Store(err),
            other => Self::Link(other),
        }
    }
}

impl From<StoreError> for OutlineServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NodeNotFound { kind, id } => Self::NodeNotFound { kind, id },
            other => Self::Store(other),
        }
    }
}

/// Content payload edit. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentEdit {
    pub data: Option<Value>,
    pub meta: Option<Value>,
    pub refs: Option<Value>,
}

impl ContentEdit {
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_none() && self.meta.is_none() && self.refs.is_none()
    }

    fn into_patch(self) -> NodePatch {
        NodePatch {
            data: self.data,
            meta: self.meta,
            refs: self.refs,
            ..NodePatch::default()
        }
    }
}

/// Outline editing facade over the link engine.
pub struct OutlineService<S: ContentStore, C: SchemaCatalog> {
    links: LinkService<S, C>,
}

impl<S: ContentStore, C: SchemaCatalog> LinkAware for OutlineService<S, C> {
    type Store = S;

    fn link_state(&self) -> LinkStateManager<'_, S> {
        self.links.state()
    }
}

impl<S: ContentStore, C: SchemaCatalog> OutlineService<S, C> {
    pub fn new(links: LinkService<S, C>) -> Self {
        Self { links }
    }

    /// Link engine sharing this service's store.
    pub fn links(&self) -> &LinkService<S, C> {
        &self.links
    }

    fn store(&self) -> &S {
        self.links.store()
    }

    /// Creates one activity under optional parent.
    #[allow(clippy::too_many_arguments)]
    pub fn create_activity(
        &self,
        repository_id: RepositoryId,
        parent_id: Option<NodeId>,
        node_type: &str,
        position: f64,
        data: Value,
        ctx: &LinkContext,
        opts: WriteOptions,
    ) -> Result<ContentNode, OutlineServiceError> {
        let repository = self.require_repository(repository_id)?;
        let parent = match parent_id {
            Some(parent_id) => Some(self.require_parent(parent_id, &repository)?),
            None => None,
        };
        self.ensure_type_allowed(
            node_type,
            &repository,
            parent.as_ref().map(|parent| parent.node_type.as_str()),
        )?;

        self.store().run_in_transaction(|store| -> Result<ContentNode, OutlineServiceError> {
            self.guard_child_insert(parent_id, ctx, opts)?;
            let attrs =
                NewNode::new(repository_id, parent_id, node_type, position).with_data(data);
            Ok(store.create(NodeKind::Activity, &attrs, opts)?)
        })
    }

    /// Creates one content element owned by `activity_id`.
    pub fn create_element(
        &self,
        activity_id: NodeId,
        node_type: &str,
        position: f64,
        data: Value,
        ctx: &LinkContext,
        opts: WriteOptions,
    ) -> Result<ContentNode, OutlineServiceError> {
        let activity = self.require_node(NodeKind::Activity, activity_id)?;
        if self.links.catalog().is_outline_activity(node_type) {
            let repository = self.require_repository(activity.repository_id)?;
            return Err(OutlineServiceError::TypeNotAllowed {
                node_type: node_type.to_string(),
                schema_id: repository.schema_id,
                parent_type: Some(activity.node_type),
            });
        }

        self.store().run_in_transaction(|store| -> Result<ContentNode, OutlineServiceError> {
            self.guard_structural_change(activity_id, ctx, opts)?;
            let attrs = NewNode::new(activity.repository_id, Some(activity_id), node_type, position)
                .with_data(data);
            Ok(store.create(NodeKind::ContentElement, &attrs, opts)?)
        })
    }

    /// Edits the content of one activity. Only the edited node is detached.
    pub fn update_activity(
        &self,
        activity_id: NodeId,
        edit: ContentEdit,
        opts: WriteOptions,
    ) -> Result<ContentNode, OutlineServiceError> {
        self.update_content(NodeKind::Activity, activity_id, edit, opts)
    }

    /// Edits the content of one content element. Its container and siblings
    /// stay linked.
    pub fn update_element(
        &self,
        element_id: NodeId,
        edit: ContentEdit,
        opts: WriteOptions,
    ) -> Result<ContentNode, OutlineServiceError> {
        self.update_content(NodeKind::ContentElement, element_id, edit, opts)
    }

    /// Moves one activity under optional parent at `position`.
    pub fn move_activity(
        &self,
        activity_id: NodeId,
        new_parent_id: Option<NodeId>,
        position: f64,
        ctx: &LinkContext,
        opts: WriteOptions,
    ) -> Result<ContentNode, OutlineServiceError> {
        let node = self.require_node(NodeKind::Activity, activity_id)?;
        let repository = self.require_repository(node.repository_id)?;
        let new_parent = match new_parent_id {
            Some(parent_id) => {
                if self.would_create_cycle(activity_id, parent_id)? {
                    return Err(OutlineServiceError::CycleDetected {
                        node_id: activity_id,
                        parent_id,
                    });
                }
                Some(self.require_parent(parent_id, &repository)?)
            }
            None => None,
        };
        self.ensure_type_allowed(
            &node.node_type,
            &repository,
            new_parent.as_ref().map(|parent| parent.node_type.as_str()),
        )?;

        self.store().run_in_transaction(|store| -> Result<ContentNode, OutlineServiceError> {
            self.guard_structural_change(activity_id, ctx, opts)?;
            self.guard_child_insert(node.parent_id, ctx, opts)?;
            self.guard_child_insert(new_parent_id, ctx, opts)?;
            let patch = NodePatch {
                parent_id: Some(new_parent_id),
                position: Some(position),
                ..NodePatch::default()
            };
            store.update(NodeKind::Activity, &NodeScope::one(activity_id), &patch, opts)?;
            self.reload(store, NodeKind::Activity, activity_id)
        })
    }

    /// Soft-deletes one activity and marks every descendant as detached.
    ///
    /// Copies of any node in the deleted subtree are unlinked and returned.
    pub fn delete_activity(
        &self,
        activity_id: NodeId,
        ctx: &LinkContext,
        opts: WriteOptions,
    ) -> Result<Vec<ContentNode>, OutlineServiceError> {
        let node = self.require_node(NodeKind::Activity, activity_id)?;

        self.store().run_in_transaction(|store| -> Result<Vec<ContentNode>, OutlineServiceError> {
            self.guard_structural_change(activity_id, ctx, opts)?;
            self.guard_child_insert(node.parent_id, ctx, opts)?;
            let unlinked = self.unlink_copies_of_subtree(store, activity_id)?;

            let deleted = NodePatch {
                is_deleted: Some(true),
                ..NodePatch::default()
            };
            store.update(NodeKind::Activity, &NodeScope::one(activity_id), &deleted, opts)?;

            let descendants = store.descendant_ids(activity_id)?;
            let detached = NodePatch {
                detached: Some(true),
                ..NodePatch::default()
            };
            let detached_count =
                store.update(NodeKind::Activity, &NodeScope::Ids(descendants), &detached, opts)?;
            info!(
                "event=activity_delete module=outline status=ok activity_id={activity_id} detached={detached_count} unlinked_copies={} actor={}",
                unlinked.len(),
                ctx.actor_label()
            );
            Ok(unlinked)
        })
    }

    /// Soft-deletes one content element, unlinking its copies.
    pub fn delete_element(
        &self,
        element_id: NodeId,
        ctx: &LinkContext,
        opts: WriteOptions,
    ) -> Result<Vec<ContentNode>, OutlineServiceError> {
        let element = self.require_node(NodeKind::ContentElement, element_id)?;

        self.store().run_in_transaction(|store| -> Result<Vec<ContentNode>, OutlineServiceError> {
            if let Some(activity_id) = element.container_id {
                self.guard_structural_change(activity_id, ctx, opts)?;
            }
            let unlinked = self.guard_source_removal(element_id)?;
            let deleted = NodePatch {
                is_deleted: Some(true),
                ..NodePatch::default()
            };
            store.update(NodeKind::ContentElement, &NodeScope::one(element_id), &deleted, opts)?;
            Ok(unlinked)
        })
    }

    /// Permanently removes one activity subtree with its elements.
    ///
    /// Copies of every removed node are detached first and returned for
    /// observer notification. Works on soft-deleted activities too.
    pub fn purge_activity(
        &self,
        activity_id: NodeId,
        ctx: &LinkContext,
    ) -> Result<Vec<ContentNode>, OutlineServiceError> {
        self.store()
            .find_by_id(NodeKind::Activity, activity_id, true)?
            .ok_or(OutlineServiceError::NodeNotFound {
                kind: NodeKind::Activity,
                id: activity_id,
            })?;

        self.store().run_in_transaction(|store| -> Result<Vec<ContentNode>, OutlineServiceError> {
            self.guard_structural_change(activity_id, ctx, WriteOptions::user())?;
            let affected = self.unlink_copies_of_subtree(store, activity_id)?;

            let mut activity_ids = vec![activity_id];
            activity_ids.extend(store.descendant_ids(activity_id)?);
            let elements =
                store.remove(NodeKind::ContentElement, &NodeScope::Containers(activity_ids.clone()))?;
            let activities = store.remove(NodeKind::Activity, &NodeScope::Ids(activity_ids))?;
            info!(
                "event=activity_purge module=outline status=ok activity_id={activity_id} activities={activities} elements={elements} unlinked_copies={} actor={}",
                affected.len(),
                ctx.actor_label()
            );
            Ok(affected)
        })
    }

    /// Unlinks copies of every activity and element under `activity_id`,
    /// skipping copies that live inside the same subtree.
    fn unlink_copies_of_subtree(
        &self,
        store: &S,
        activity_id: NodeId,
    ) -> Result<Vec<ContentNode>, OutlineServiceError> {
        let mut activity_ids = vec![activity_id];
        activity_ids.extend(store.descendant_ids(activity_id)?);
        let element_ids = store.element_ids_in(&activity_ids)?;

        let subtree: HashSet<NodeId> = activity_ids
            .iter()
            .chain(element_ids.iter())
            .copied()
            .collect();
        let mut unlinked = Vec::new();
        for source_id in activity_ids.iter().chain(element_ids.iter()) {
            unlinked.extend(self.guard_source_removal(*source_id)?);
        }
        unlinked.retain(|copy| !subtree.contains(&copy.id));
        Ok(unlinked)
    }

    fn update_content(
        &self,
        kind: NodeKind,
        id: NodeId,
        edit: ContentEdit,
        opts: WriteOptions,
    ) -> Result<ContentNode, OutlineServiceError> {
        let node = self.require_node(kind, id)?;
        if edit.is_empty() {
            return Ok(node);
        }

        self.store().run_in_transaction(|store| -> Result<ContentNode, OutlineServiceError> {
            self.guard_content_edit(&node, opts)?;
            store.update(kind, &NodeScope::one(id), &edit.into_patch(), opts)?;
            self.reload(store, kind, id)
        })
    }

    fn reload(
        &self,
        store: &S,
        kind: NodeKind,
        id: NodeId,
    ) -> Result<ContentNode, OutlineServiceError> {
        store
            .find_by_id(kind, id, false)?
            .ok_or(OutlineServiceError::NodeNotFound { kind, id })
    }

    fn require_node(&self, kind: NodeKind, id: NodeId) -> Result<ContentNode, OutlineServiceError> {
        self.reload(self.store(), kind, id)
    }

    fn require_repository(
        &self,
        repository_id: RepositoryId,
    ) -> Result<Repository, OutlineServiceError> {
        self.store()
            .find_repository(repository_id)?
            .ok_or(OutlineServiceError::RepositoryNotFound(repository_id))
    }

    fn require_parent(
        &self,
        parent_id: NodeId,
        repository: &Repository,
    ) -> Result<ContentNode, OutlineServiceError> {
        let parent = self
            .store()
            .find_by_id(NodeKind::Activity, parent_id, false)?
            .ok_or(OutlineServiceError::ParentNotFound(parent_id))?;
        if parent.repository_id != repository.id {
            return Err(OutlineServiceError::ParentRepositoryMismatch {
                parent_id,
                repository_id: repository.id,
            });
        }
        Ok(parent)
    }

    fn ensure_type_allowed(
        &self,
        node_type: &str,
        repository: &Repository,
        parent_type: Option<&str>,
    ) -> Result<(), OutlineServiceError> {
        let catalog = self.links.catalog();
        if !catalog.is_outline_activity(node_type)
            || catalog.is_type_allowed_at_level(node_type, &repository.schema_id, parent_type)
        {
            return Ok(());
        }
        Err(OutlineServiceError::TypeNotAllowed {
            node_type: node_type.to_string(),
            schema_id: repository.schema_id.clone(),
            parent_type: parent_type.map(str::to_string),
        })
    }

    fn would_create_cycle(
        &self,
        node_id: NodeId,
        candidate_parent_id: NodeId,
    ) -> Result<bool, OutlineServiceError> {
        let mut visited = HashSet::new();
        let mut cursor = Some(candidate_parent_id);
        while let Some(current) = cursor {
            if current == node_id {
                return Ok(true);
            }
            if !visited.insert(current) {
                return Ok(true);
            }

            let node = self
                .store()
                .find_by_id(NodeKind::Activity, current, false)?
                .ok_or(OutlineServiceError::ParentNotFound(current))?;
            cursor = node.parent_id;
        }
        Ok(false)
    }
}
