//! Tree cloner: creates linked copies of an activity subtree.
//!
//! # Responsibility
//! - Validate the link target (repository, parent, placement).
//! - Unlink a linked target parent before inserting under it.
//! - Clone activities and their elements parent-before-child, resolving the
//!   target type of every node.
//!
//! # Invariants
//! - Parent unlink and clone commit or roll back together.
//! - Creation order is pre-order; the root is always first.
//! - Clone writes are library writes and never trigger edit guards.

use crate::model::node::{ContentNode, LinkContext, NewNode, NodeId, NodeKind, WriteOptions};
use crate::model::repository::{Repository, RepositoryId};
use crate::repo::content_repo::ContentStore;
use crate::schema::catalog::SchemaCatalog;
use crate::schema::resolver::resolve_type;
use crate::service::link_service::LinkError;
use crate::service::link_state::LinkStateManager;
use log::{error, info};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// Borrowed view over store and schema catalog that performs link requests.
pub struct TreeCloner<'s, S: ContentStore, C: SchemaCatalog> {
    store: &'s S,
    catalog: &'s C,
}

/// Activity waiting to be cloned, with the already created copy of its
/// parent (`None` only for a root placed at repository level).
struct PendingClone {
    source: ContentNode,
    position: f64,
    parent: Option<PlacedParent>,
}

#[derive(Clone)]
struct PlacedParent {
    id: NodeId,
    node_type: String,
}

impl<'s, S: ContentStore, C: SchemaCatalog> TreeCloner<'s, S, C> {
    pub fn new(store: &'s S, catalog: &'s C) -> Self {
        Self { store, catalog }
    }

    /// Links the subtree rooted at `source_id` into `target_repository_id`,
    /// under `parent_id` (repository root when `None`) at `position`.
    ///
    /// Returns every created activity and element, root first, in creation
    /// order.
    pub fn link_activity(
        &self,
        source_id: NodeId,
        target_repository_id: RepositoryId,
        parent_id: Option<NodeId>,
        position: f64,
        ctx: &LinkContext,
    ) -> Result<Vec<ContentNode>, LinkError> {
        let started_at = Instant::now();
        info!(
            "event=link_activity module=link status=start source_id={source_id} target_repository_id={target_repository_id} actor={}",
            ctx.actor_label()
        );

        let result =
            self.link_activity_inner(source_id, target_repository_id, parent_id, position, ctx);
        match &result {
            Ok(created) => info!(
                "event=link_activity module=link status=ok source_id={source_id} created={} duration_ms={}",
                created.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=link_activity module=link status=error source_id={source_id} client_error={} duration_ms={} error={err}",
                err.is_client_error(),
                started_at.elapsed().as_millis()
            ),
        }
        result
    }

    fn link_activity_inner(
        &self,
        source_id: NodeId,
        target_repository_id: RepositoryId,
        parent_id: Option<NodeId>,
        position: f64,
        ctx: &LinkContext,
    ) -> Result<Vec<ContentNode>, LinkError> {
        let source = self
            .store
            .find_by_id(NodeKind::Activity, source_id, false)?
            .ok_or(LinkError::SourceNotFound(source_id))?;
        let source_repository = self.require_repository(source.repository_id)?;
        let target_repository = self.require_repository(target_repository_id)?;
        let parent = match parent_id {
            Some(parent_id) => Some(self.require_target_parent(parent_id, &target_repository)?),
            None => None,
        };
        if let Some(parent) = &parent {
            self.ensure_parent_outside_source(&source, parent)?;
        }
        let is_same_schema = source_repository.shares_schema_with(&target_repository);

        self.store.run_in_transaction(|store| -> Result<Vec<ContentNode>, LinkError> {
            if let Some(parent) = &parent {
                LinkStateManager::new(store).unlink_parent_if_linked(parent.id, ctx)?;
            }
            self.clone_tree(source, &target_repository, parent.as_ref(), position, is_same_schema)
        })
    }

    fn clone_tree(
        &self,
        root: ContentNode,
        target: &Repository,
        target_parent: Option<&ContentNode>,
        position: f64,
        is_same_schema: bool,
    ) -> Result<Vec<ContentNode>, LinkError> {
        let opts = WriteOptions::library();
        let mut created = Vec::new();
        let mut id_map: HashMap<NodeId, NodeId> = HashMap::new();
        let mut stack = vec![PendingClone {
            source: root,
            position,
            parent: target_parent.map(|parent| PlacedParent {
                id: parent.id,
                node_type: parent.node_type.clone(),
            }),
        }];

        while let Some(pending) = stack.pop() {
            let PendingClone {
                source,
                position,
                parent,
            } = pending;
            if id_map.contains_key(&source.id) {
                continue;
            }

            let node_type = self.resolve(
                &source.node_type,
                target,
                parent.as_ref().map(|parent| parent.node_type.as_str()),
                is_same_schema,
            )?;
            let attrs = NewNode::linked_copy_of(
                &source,
                target.id,
                parent.as_ref().map(|parent| parent.id),
                node_type,
                position,
            );
            let copy = self.store.create(NodeKind::Activity, &attrs, opts)?;
            id_map.insert(source.id, copy.id);
            let placed = PlacedParent {
                id: copy.id,
                node_type: copy.node_type.clone(),
            };
            created.push(copy);

            for element in self.store.content_elements(source.id)? {
                let element_type = self.resolve(
                    &element.node_type,
                    target,
                    Some(placed.node_type.as_str()),
                    is_same_schema,
                )?;
                let attrs = NewNode::linked_copy_of(
                    &element,
                    target.id,
                    Some(placed.id),
                    element_type,
                    element.position,
                );
                created.push(self.store.create(NodeKind::ContentElement, &attrs, opts)?);
            }

            // Reversed so the lowest position is popped, and created, first.
            for child in self.store.children(source.id, false)?.into_iter().rev() {
                stack.push(PendingClone {
                    position: child.position,
                    source: child,
                    parent: Some(placed.clone()),
                });
            }
        }

        Ok(created)
    }

    fn resolve(
        &self,
        source_type: &str,
        target: &Repository,
        parent_type: Option<&str>,
        is_same_schema: bool,
    ) -> Result<String, LinkError> {
        resolve_type(
            self.catalog,
            source_type,
            &target.schema_id,
            parent_type,
            is_same_schema,
        )
        .map_err(LinkError::from)
    }

    fn require_repository(&self, repository_id: RepositoryId) -> Result<Repository, LinkError> {
        self.store
            .find_repository(repository_id)?
            .ok_or(LinkError::RepositoryNotFound(repository_id))
    }

    fn require_target_parent(
        &self,
        parent_id: NodeId,
        target: &Repository,
    ) -> Result<ContentNode, LinkError> {
        let parent = self
            .store
            .find_by_id(NodeKind::Activity, parent_id, false)?
            .ok_or(LinkError::ParentNotFound(parent_id))?;
        if parent.repository_id != target.id {
            return Err(LinkError::ParentRepositoryMismatch {
                parent_id,
                repository_id: target.id,
            });
        }
        Ok(parent)
    }

    /// Rejects a target parent that is the source itself or one of its
    /// descendants; the clone would otherwise walk into its own copies.
    fn ensure_parent_outside_source(
        &self,
        source: &ContentNode,
        parent: &ContentNode,
    ) -> Result<(), LinkError> {
        let mut visited = HashSet::new();
        let mut cursor = Some(parent.id);
        while let Some(current) = cursor {
            if current == source.id {
                return Err(LinkError::TargetInsideSource {
                    source_id: source.id,
                    parent_id: parent.id,
                });
            }
            if !visited.insert(current) {
                break;
            }
            cursor = self
                .store
                .find_by_id(NodeKind::Activity, current, false)?
                .and_then(|node| node.parent_id);
        }
        Ok(())
    }
}
