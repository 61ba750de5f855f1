//! Link-aware mutation guards.
//!
//! # Responsibility
//! - Give every mutation path one explicit capability to call into the link
//!   state manager before it commits its own change.
//!
//! # Invariants
//! - Guards run inside the mutation's transaction; a failing mutation rolls
//!   the unlink back with it.
//! - Library writes (`WriteOptions::library_update`) never break links.
//! - Content edits detach only the edited node; structural edits unlink the
//!   whole linked tree through its entry point.

use crate::model::node::{ContentNode, LinkContext, NodeId, WriteOptions};
use crate::repo::content_repo::ContentStore;
use crate::service::link_service::LinkError;
use crate::service::link_state::LinkStateManager;

/// Capability implemented by mutation paths that touch outline content.
pub trait LinkAware {
    type Store: ContentStore;

    /// Link state manager bound to the store this path writes to.
    fn link_state(&self) -> LinkStateManager<'_, Self::Store>;

    /// Call before editing `node`'s own content.
    ///
    /// Returns whether the node was detached.
    fn guard_content_edit(
        &self,
        node: &ContentNode,
        opts: WriteOptions,
    ) -> Result<bool, LinkError> {
        if opts.library_update {
            return Ok(false);
        }
        self.link_state().detach_on_edit(node)
    }

    /// Call before moving, deleting or changing the element set of
    /// `activity_id`.
    ///
    /// Returns the unlinked entry point, if the activity was in a linked tree.
    fn guard_structural_change(
        &self,
        activity_id: NodeId,
        ctx: &LinkContext,
        opts: WriteOptions,
    ) -> Result<Option<ContentNode>, LinkError> {
        if opts.library_update {
            return Ok(None);
        }
        self.link_state().unlink_activity_if_linked(activity_id, ctx)
    }

    /// Call before inserting a child activity under `parent_id`.
    fn guard_child_insert(
        &self,
        parent_id: Option<NodeId>,
        ctx: &LinkContext,
        opts: WriteOptions,
    ) -> Result<Option<ContentNode>, LinkError> {
        match parent_id {
            Some(parent_id) if !opts.library_update => {
                self.link_state().unlink_parent_if_linked(parent_id, ctx)
            }
            _ => Ok(None),
        }
    }

    /// Call before deleting or purging `source_id`.
    ///
    /// Returns the copies that lost their link, for observer notification.
    fn guard_source_removal(&self, source_id: NodeId) -> Result<Vec<ContentNode>, LinkError> {
        self.link_state().unlink_copies_of_source(source_id)
    }
}
