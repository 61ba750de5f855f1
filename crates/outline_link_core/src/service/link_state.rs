//! Link state manager: the `Linked -> Detached` state machine.
//!
//! # Responsibility
//! - Sever one node, a whole linked subtree, or every copy of a removed
//!   source.
//! - Resolve the link entry point (root of the linked subtree) of any node.
//!
//! # Invariants
//! - Detaching keeps `source_id` and clears `source_modified_at`.
//! - There is no transition back to `Linked`.
//! - Tree-wide unlinks are one bulk update per entity kind.

use crate::model::node::{
    ContentNode, LinkContext, NodeId, NodeKind, NodePatch, NodeScope, WriteOptions,
};
use crate::repo::content_repo::ContentStore;
use crate::service::link_service::LinkError;
use log::{info, warn};
use std::collections::HashSet;
use std::time::Instant;

/// Borrowed view over a store that owns link/unlink transitions.
pub struct LinkStateManager<'s, S: ContentStore> {
    store: &'s S,
}

impl<'s, S: ContentStore> LinkStateManager<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Unlinks the subtree rooted at `activity_id`.
    ///
    /// Returns the node unchanged, without writing, when it is not a linked
    /// copy.
    pub fn unlink_activity(
        &self,
        activity_id: NodeId,
        ctx: &LinkContext,
    ) -> Result<ContentNode, LinkError> {
        let node = self
            .store
            .find_by_id(NodeKind::Activity, activity_id, false)?
            .ok_or(LinkError::ActivityNotFound(activity_id))?;
        if !node.is_linked_copy {
            return Ok(node);
        }

        self.unlink_tree(&node, ctx)?;
        self.store
            .find_by_id(NodeKind::Activity, activity_id, false)?
            .ok_or(LinkError::ActivityNotFound(activity_id))
    }

    /// Highest contiguous linked ancestor of `node`, `node` included.
    ///
    /// Returns `None` when `node` itself is not linked. The walk stops at the
    /// first ancestor that is not a linked copy. Elements walk through their
    /// container activity.
    pub fn find_link_entry_point(
        &self,
        node: &ContentNode,
    ) -> Result<Option<ContentNode>, LinkError> {
        if !node.is_linked_copy {
            return Ok(None);
        }

        let mut visited = HashSet::from([node.id]);
        let mut entry_point = node.clone();
        while let Some(owner_id) = entry_point.owner_id() {
            if !visited.insert(owner_id) {
                warn!(
                    "event=entry_point_cycle module=link status=error node_id={} at={owner_id}",
                    node.id
                );
                break;
            }
            match self
                .store
                .find_by_id(NodeKind::Activity, owner_id, false)?
            {
                Some(owner) if owner.is_linked_copy => entry_point = owner,
                _ => break,
            }
        }
        Ok(Some(entry_point))
    }

    /// Detaches `root`, every descendant activity and every element owned by
    /// any of them. Runs inside the caller's transaction when one is open.
    pub fn unlink_tree(&self, root: &ContentNode, ctx: &LinkContext) -> Result<(), LinkError> {
        let started_at = Instant::now();
        let opts = WriteOptions::library();
        let detach = NodePatch::detach_link();

        self.store.run_in_transaction(|store| -> Result<(), LinkError> {
            let descendants = store.descendant_ids(root.id)?;
            let root_changed =
                store.update(NodeKind::Activity, &NodeScope::one(root.id), &detach, opts)?;
            let activities = store.update(
                NodeKind::Activity,
                &NodeScope::Ids(descendants.clone()),
                &detach,
                opts,
            )?;

            let mut containers = descendants;
            containers.push(root.id);
            let elements = store.update(
                NodeKind::ContentElement,
                &NodeScope::Containers(containers),
                &detach,
                opts,
            )?;

            info!(
                "event=unlink_tree module=link status=ok root_id={} actor={} activities={} elements={} duration_ms={}",
                root.id,
                ctx.actor_label(),
                root_changed + activities,
                elements,
                started_at.elapsed().as_millis()
            );
            Ok(())
        })
    }

    /// Unlinks the linked tree `parent_id` belongs to, if any.
    pub fn unlink_parent_if_linked(
        &self,
        parent_id: NodeId,
        ctx: &LinkContext,
    ) -> Result<Option<ContentNode>, LinkError> {
        self.unlink_entry_point_of(parent_id, ctx)
    }

    /// Unlinks the linked tree `activity_id` belongs to, if any.
    pub fn unlink_activity_if_linked(
        &self,
        activity_id: NodeId,
        ctx: &LinkContext,
    ) -> Result<Option<ContentNode>, LinkError> {
        self.unlink_entry_point_of(activity_id, ctx)
    }

    /// Detaches every still-linked copy of a permanently removed source.
    ///
    /// Copies keep `source_id` as provenance. Returns the affected copies
    /// reloaded after the detach.
    pub fn unlink_copies_of_source(&self, source_id: NodeId) -> Result<Vec<ContentNode>, LinkError> {
        self.store.run_in_transaction(|store| -> Result<Vec<ContentNode>, LinkError> {
            let mut copies = store.linked_copies_of(NodeKind::Activity, source_id)?;
            copies.extend(store.linked_copies_of(NodeKind::ContentElement, source_id)?);
            if copies.is_empty() {
                return Ok(copies);
            }

            let detach = NodePatch::detach_link();
            let mut affected = Vec::with_capacity(copies.len());
            for kind in [NodeKind::Activity, NodeKind::ContentElement] {
                let ids: Vec<NodeId> = copies
                    .iter()
                    .filter(|copy| copy.kind == kind)
                    .map(|copy| copy.id)
                    .collect();
                store.update(kind, &NodeScope::Ids(ids.clone()), &detach, WriteOptions::library())?;
                for id in ids {
                    if let Some(node) = store.find_by_id(kind, id, true)? {
                        affected.push(node);
                    }
                }
            }

            info!(
                "event=unlink_source_copies module=link status=ok source_id={source_id} copies={}",
                affected.len()
            );
            Ok(affected)
        })
    }

    /// Detaches one edited node, leaving its parent and children linked.
    ///
    /// Returns `false` without writing when `node` is not linked.
    pub fn detach_on_edit(&self, node: &ContentNode) -> Result<bool, LinkError> {
        if !node.is_linked_copy {
            return Ok(false);
        }

        self.store.update(
            node.kind,
            &NodeScope::one(node.id),
            &NodePatch::detach_link(),
            WriteOptions::library(),
        )?;
        info!(
            "event=detach_on_edit module=link status=ok kind={} node_id={}",
            node.kind.as_str(),
            node.id
        );
        Ok(true)
    }

    fn unlink_entry_point_of(
        &self,
        activity_id: NodeId,
        ctx: &LinkContext,
    ) -> Result<Option<ContentNode>, LinkError> {
        let Some(node) = self
            .store
            .find_by_id(NodeKind::Activity, activity_id, false)?
        else {
            return Ok(None);
        };
        let Some(entry_point) = self.find_link_entry_point(&node)? else {
            return Ok(None);
        };

        self.unlink_tree(&entry_point, ctx)?;
        Ok(Some(entry_point))
    }
}
