//! Arena-style ownership of the CST: every node lives in one flat `Vec` owned
//! by the [`Cst`], and node identity is an index into that vec rather than a
//! reference. Edits and undo therefore never fight the borrow checker: an
//! `Edit` names the node it targets by [`NodeId`], not by `&CstNode`.

use pyshift_text_size::TextRange;
use rustc_hash::FxHashMap;

use crate::node::CstKind;

/// Index into a [`Cst`]'s node arena. Stable for the lifetime of the tree
/// that produced it; a `commit()` that rewrites part of the tree hands back a
/// *new* `Cst` with its own ids, so stale ids from before a commit are never
/// silently reinterpreted against the wrong tree.
///
/// Serializing a `NodeId` (behind the `serde` feature, for the Patch Store's
/// persisted `Edit`s) only makes sense when the id is later rehydrated
/// against a reparse of the *same* source text — the Patch Store's own
/// parse-check on load enforces exactly that before any id is dereferenced.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("arena has fewer than u32::MAX nodes"))
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StoredNode {
    pub(crate) range: TextRange,
    pub(crate) kind: CstKind,
    pub(crate) parent: Option<NodeId>,
}

/// The node arena backing a [`crate::Cst`]. Append-only during parsing and
/// during a single `commit()`'s lowering pass; never mutated node-by-node
/// from the outside, only through the queued [`crate::edit::Edit`] API.
#[derive(Debug, Clone, Default)]
pub struct Arena {
    nodes: Vec<StoredNode>,
}

impl Arena {
    pub(crate) fn push(&mut self, range: TextRange, kind: CstKind, parent: Option<NodeId>) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(StoredNode { range, kind, parent });
        id
    }

    pub(crate) fn get(&self, id: NodeId) -> &StoredNode {
        &self.nodes[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> &mut StoredNode {
        &mut self.nodes[id.index()]
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (NodeId, &StoredNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId::new(i), node))
    }

    /// Every node in arena order, for callers outside this crate (the Usage
    /// Index, transformers) that need to walk the whole tree rather than
    /// follow [`CstKind::children`] from a known root.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &CstKind, TextRange)> {
        self.nodes.iter().enumerate().map(|(i, node)| (NodeId::new(i), &node.kind, node.range))
    }

    /// Parent-link lookup, used by matchers that need syntactic context (e.g.
    /// "is this call the argument of a decorator?").
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).parent
    }

    /// The exact byte range a node was parsed from, used by [`crate::edit::EditBatch`]
    /// to splice a replacement over it.
    pub fn get_node_range(&self, id: NodeId) -> TextRange {
        self.get(id).range
    }

    /// The node's [`CstKind`], for matchers walking the tree outside this crate.
    pub fn kind(&self, id: NodeId) -> &CstKind {
        &self.get(id).kind
    }
}

/// A lightweight index from node id to its recorded range, handed to callers
/// that need position metadata without borrowing the whole arena (e.g. for
/// diagnostics).
pub type RangeIndex = FxHashMap<NodeId, TextRange>;
