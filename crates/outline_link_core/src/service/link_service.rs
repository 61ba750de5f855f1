//! Link service facade.
//!
//! # Responsibility
//! - Own the injected store and schema catalog.
//! - Expose link, unlink and refresh use-cases to API and hook callers.
//!
//! # Invariants
//! - Every exposed operation is atomic (one transaction, or joins the
//!   caller's open transaction).
//! - Errors raised before the first write leave the store untouched.

use crate::model::node::{
    ContentNode, LinkContext, LinkUpdate, NodeId, NodeKind, NodePatch, NodeScope, WriteOptions,
};
use crate::model::repository::RepositoryId;
use crate::repo::content_repo::{ContentStore, StoreError};
use crate::schema::catalog::SchemaCatalog;
use crate::schema::resolver::TypeResolutionError;
use crate::service::link_state::LinkStateManager;
use crate::service::tree_cloner::TreeCloner;
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from link and unlink operations.
#[derive(Debug)]
pub enum LinkError {
    /// Link source activity does not exist.
    SourceNotFound(NodeId),
    /// Unlink/refresh target activity does not exist.
    ActivityNotFound(NodeId),
    /// Refresh target content element does not exist.
    ElementNotFound(NodeId),
    /// Source or target repository does not exist.
    RepositoryNotFound(RepositoryId),
    /// Target parent activity does not exist.
    ParentNotFound(NodeId),
    /// Target parent lives in another repository than the link target.
    ParentRepositoryMismatch {
        parent_id: NodeId,
        repository_id: RepositoryId,
    },
    /// Target parent is the source activity or one of its descendants.
    TargetInsideSource { source_id: NodeId, parent_id: NodeId },
    /// Same-schema type rejected at the target level.
    TypeNotAllowed {
        node_type: String,
        schema_id: String,
        parent_type: Option<String>,
    },
    /// Cross-schema type has no configured mapping.
    NoCompatibleType {
        node_type: String,
        schema_id: String,
        parent_type: Option<String>,
    },
    /// Storage failure; the transaction has been rolled back.
    Store(StoreError),
}

impl LinkError {
    /// Whether the caller sent an invalid request (as opposed to a storage
    /// failure it may retry).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Store(_))
    }
}

impl Display for LinkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceNotFound(id) => write!(f, "link source not found: {id}"),
            Self::ActivityNotFound(id) => write!(f, "activity not found: {id}"),
            Self::ElementNotFound(id) => write!(f, "content element not found: {id}"),
            Self::RepositoryNotFound(id) => write!(f, "repository not found: {id}"),
            Self::ParentNotFound(id) => write!(f, "target parent not found: {id}"),
            Self::ParentRepositoryMismatch {
                parent_id,
                repository_id,
            } => write!(
                f,
                "target parent {parent_id} does not belong to repository {repository_id}"
            ),
            Self::TargetInsideSource {
                source_id,
                parent_id,
            } => write!(
                f,
                "target parent {parent_id} is inside link source {source_id}"
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
            Self::NoCompatibleType {
                node_type,
                schema_id,
                parent_type,
            } => write!(
                f,
                "no type compatible with `{node_type}` under `{}` in schema `{schema_id}`",
                parent_type.as_deref().unwrap_or("<root>")
            ),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for LinkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for LinkError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<TypeResolutionError> for LinkError {
    fn from(value: TypeResolutionError) -> Self {
        match value {
            TypeResolutionError::TypeNotAllowed {
                node_type,
                schema_id,
                parent_type,
            } => Self::TypeNotAllowed {
                node_type,
                schema_id,
                parent_type,
            },
            TypeResolutionError::NoCompatibleType {
                node_type,
                schema_id,
                parent_type,
            } => Self::NoCompatibleType {
                node_type,
                schema_id,
                parent_type,
            },
        }
    }
}

/// Constructed link engine: one instance per store handle.
pub struct LinkService<S: ContentStore, C: SchemaCatalog> {
    store: S,
    catalog: C,
}

impl<S: ContentStore, C: SchemaCatalog> LinkService<S, C> {
    pub fn new(store: S, catalog: C) -> Self {
        Self { store, catalog }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Link state manager bound to this service's store.
    pub fn state(&self) -> LinkStateManager<'_, S> {
        LinkStateManager::new(&self.store)
    }

    /// Tree cloner bound to this service's store and catalog.
    pub fn cloner(&self) -> TreeCloner<'_, S, C> {
        TreeCloner::new(&self.store, &self.catalog)
    }

    /// See [`TreeCloner::link_activity`].
    pub fn link_activity(
        &self,
        source_id: NodeId,
        target_repository_id: RepositoryId,
        parent_id: Option<NodeId>,
        position: f64,
        ctx: &LinkContext,
    ) -> Result<Vec<ContentNode>, LinkError> {
        self.cloner()
            .link_activity(source_id, target_repository_id, parent_id, position, ctx)
    }

    pub fn unlink_activity(
        &self,
        activity_id: NodeId,
        ctx: &LinkContext,
    ) -> Result<ContentNode, LinkError> {
        self.state().unlink_activity(activity_id, ctx)
    }

    pub fn find_link_entry_point(
        &self,
        node: &ContentNode,
    ) -> Result<Option<ContentNode>, LinkError> {
        self.state().find_link_entry_point(node)
    }

    pub fn unlink_parent_if_linked(
        &self,
        parent_id: NodeId,
        ctx: &LinkContext,
    ) -> Result<Option<ContentNode>, LinkError> {
        self.state().unlink_parent_if_linked(parent_id, ctx)
    }

    pub fn unlink_activity_if_linked(
        &self,
        activity_id: NodeId,
        ctx: &LinkContext,
    ) -> Result<Option<ContentNode>, LinkError> {
        self.state().unlink_activity_if_linked(activity_id, ctx)
    }

    pub fn unlink_copies_of_source(&self, source_id: NodeId) -> Result<Vec<ContentNode>, LinkError> {
        self.state().unlink_copies_of_source(source_id)
    }

    pub fn detach_on_edit(&self, node: &ContentNode) -> Result<bool, LinkError> {
        self.state().detach_on_edit(node)
    }

    /// Whether the source of a linked copy changed after the copy's last
    /// clone or refresh. Unlinked nodes are never outdated.
    pub fn is_outdated(&self, node: &ContentNode) -> Result<bool, LinkError> {
        if !node.is_linked_copy {
            return Ok(false);
        }
        let source = self.load_source(node)?;
        Ok(source_changed_since_snapshot(node, &source))
    }

    /// Copies `data` and `meta` from the source into a stale linked copy.
    ///
    /// Library write: the copy stays linked and only its snapshot moves.
    /// Returns `false` when the node is unlinked or already current.
    pub fn pull_source_changes(
        &self,
        kind: NodeKind,
        node_id: NodeId,
        ctx: &LinkContext,
    ) -> Result<bool, LinkError> {
        let node = self
            .store
            .find_by_id(kind, node_id, false)?
            .ok_or(match kind {
                NodeKind::Activity => LinkError::ActivityNotFound(node_id),
                NodeKind::ContentElement => LinkError::ElementNotFound(node_id),
            })?;
        if !node.is_linked_copy {
            return Ok(false);
        }
        let source = self.load_source(&node)?;
        if !source_changed_since_snapshot(&node, &source) {
            return Ok(false);
        }

        let patch = NodePatch {
            data: Some(source.data.clone()),
            meta: Some(source.meta.clone()),
            link: Some(LinkUpdate::Resync {
                source_modified_at: source.modified_at,
            }),
            ..NodePatch::default()
        };
        self.store.run_in_transaction(|store| -> Result<(), LinkError> {
            store.update(kind, &NodeScope::one(node.id), &patch, WriteOptions::library())?;
            Ok(())
        })?;
        info!(
            "event=pull_source_changes module=link status=ok kind={} node_id={node_id} source_id={} actor={}",
            kind.as_str(),
            source.id,
            ctx.actor_label()
        );
        Ok(true)
    }

    fn load_source(&self, node: &ContentNode) -> Result<ContentNode, LinkError> {
        let source_id = node.source_id.ok_or_else(|| {
            StoreError::InvalidData(format!("linked copy {} has no source_id", node.id))
        })?;
        self.store
            .find_by_id(node.kind, source_id, false)?
            .ok_or(LinkError::SourceNotFound(source_id))
    }
}

fn source_changed_since_snapshot(copy: &ContentNode, source: &ContentNode) -> bool {
    copy.source_modified_at
        .map_or(true, |snapshot| source.modified_at > snapshot)
}
