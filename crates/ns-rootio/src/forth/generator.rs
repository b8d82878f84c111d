//! Tree builder driven by the per-type contributors.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Contributors add
//! nodes under the *active* node and move the active pointer as they descend
//! into nested types, saving and restoring it on an explicit stack.

use crate::error::{Result, RootError};
use crate::forth::node::{Node, NodeKind};
use crate::forth::program::CompiledModel;

/// Index of a node in a [`ForthGenerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug)]
struct Slot {
    /// Node data; its `children` vector is unused inside the arena.
    node: Node,
    children: Vec<NodeId>,
}

/// Builds one node tree for one type.
///
/// Single writer: contributors run one at a time, in the order the type's
/// fields are streamed.
#[derive(Debug)]
pub struct ForthGenerator {
    slots: Vec<Slot>,
    active: NodeId,
    stack: Vec<NodeId>,
    orphaned: usize,
    incomplete: bool,
}

const TOP: NodeId = NodeId(0);

impl Default for ForthGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ForthGenerator {
    /// A generator holding only `TOP`, which is active.
    pub fn new() -> Self {
        Self {
            slots: vec![Slot { node: Node::new(NodeKind::Top), children: Vec::new() }],
            active: TOP,
            stack: Vec::new(),
            orphaned: 0,
            incomplete: false,
        }
    }

    /// The root node.
    pub fn top(&self) -> NodeId {
        TOP
    }

    /// The current insertion point.
    pub fn active_node(&self) -> NodeId {
        self.active
    }

    /// Node data of `id`.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.slots[id.0].node
    }

    /// Mutable node data of `id`, for decorating an already-registered node.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.slots[id.0].node
    }

    /// Children of `id`, in order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.slots[id.0].children
    }

    /// Register `node` under every node whose kind equals the active node's.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let parent = self.node(self.active).kind.clone();
        self.add_node_under(node, &parent)
    }

    /// Register `node` under every node of kind `parent`.
    ///
    /// The whole tree is searched depth-first from `TOP`. A matching parent
    /// that already has a child of the same kind is left alone and that child's
    /// id is returned. Matching parents are not searched further. When no
    /// parent matches, nothing is attached; the returned id then refers to a
    /// detached node.
    pub fn add_node_under(&mut self, node: Node, parent: &NodeKind) -> NodeId {
        let mut parents = Vec::new();
        self.find_parents(TOP, parent, &node.kind, &mut parents);

        let kind = node.kind.clone();
        let id = self.insert(node);
        if parents.is_empty() {
            self.orphaned += 1;
            log::warn!("no parent {parent} for node {kind}; node left detached");
            return id;
        }

        let mut existing = None;
        let mut attached = false;
        for p in parents {
            let duplicate =
                self.slots[p.0].children.iter().copied().find(|&c| self.node(c).kind == kind);
            match duplicate {
                Some(c) => {
                    existing.get_or_insert(c);
                }
                None => {
                    self.slots[p.0].children.push(id);
                    attached = true;
                }
            }
        }
        match existing {
            Some(c) if !attached => c,
            _ => id,
        }
    }

    fn find_parents(&self, current: NodeId, parent: &NodeKind, new: &NodeKind, out: &mut Vec<NodeId>) {
        let kind = &self.node(current).kind;
        if kind == parent && kind != new {
            if !out.contains(&current) {
                out.push(current);
            }
            return;
        }
        for &child in &self.slots[current.0].children {
            self.find_parents(child, parent, new, out);
        }
    }

    /// Move a node and its owned subtree into the arena.
    fn insert(&mut self, mut node: Node) -> NodeId {
        let children = std::mem::take(&mut node.children);
        let id = NodeId(self.slots.len());
        self.slots.push(Slot { node, children: Vec::new() });
        let child_ids = children.into_iter().map(|c| self.insert(c)).collect();
        self.slots[id.0].children = child_ids;
        id
    }

    /// Jump to `id`.
    pub fn set_active_node(&mut self, id: NodeId) {
        self.active = id;
    }

    /// Save the active node, then jump to `id`.
    pub fn push_active_node(&mut self, id: NodeId) {
        self.stack.push(self.active);
        self.active = id;
    }

    /// Restore the most recently saved active node.
    pub fn pop_active_node(&mut self) -> Result<()> {
        self.active = self
            .stack
            .pop()
            .ok_or_else(|| RootError::CodeGeneration("pop_active_node on an empty stack".into()))?;
        Ok(())
    }

    /// Clear the stack and return to `TOP`.
    pub fn reset_active_node(&mut self) {
        self.active = TOP;
        self.stack.clear();
    }

    /// Depth of the saved-node stack.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Start contributing for a new entry.
    pub fn begin_entry(&mut self) {
        self.reset_active_node();
        self.incomplete = false;
    }

    /// Record that the current entry left part of the layout unobserved.
    pub fn mark_incomplete(&mut self) {
        self.incomplete = true;
    }

    /// Whether the current entry left part of the layout unobserved.
    pub fn is_incomplete(&self) -> bool {
        self.incomplete
    }

    /// How many `add_node` calls found no parent.
    pub fn orphaned_nodes(&self) -> usize {
        self.orphaned
    }

    /// Copy the tree reachable from `TOP` into an owned [`Node`].
    pub fn model(&self) -> Node {
        self.freeze(TOP)
    }

    fn freeze(&self, id: NodeId) -> Node {
        let slot = &self.slots[id.0];
        let mut node = slot.node.clone();
        node.children = slot.children.iter().map(|&c| self.freeze(c)).collect();
        node
    }

    /// Freeze the tree and derive its program and form.
    pub fn compile(&self) -> Result<CompiledModel> {
        CompiledModel::new(self.model())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forth::form::Form;
    use crate::model::Primitive;

    fn field(name: &str) -> Node {
        Node::new(NodeKind::Field(name.into()))
    }

    #[test]
    fn add_under_active_and_descend() {
        let mut g = ForthGenerator::new();
        let a = g.add_node(field("a"));
        g.set_active_node(a);
        let b = g.add_node(field("b"));
        assert_eq!(g.children(g.top()), &[a]);
        assert_eq!(g.children(a), &[b]);
    }

    #[test]
    fn insertion_is_idempotent() {
        let mut g = ForthGenerator::new();
        let first = g.add_node(field("x"));
        let second = g.add_node(field("x"));
        assert_eq!(first, second);
        assert_eq!(g.children(g.top()).len(), 1);
        assert_eq!(g.model().children.len(), 1);
    }

    #[test]
    fn missing_parent_is_a_silent_no_op() {
        let mut g = ForthGenerator::new();
        g.add_node(field("a"));
        let before = g.model();
        g.add_node_under(field("z"), &NodeKind::Field("nowhere".into()));
        assert_eq!(g.model(), before);
        assert_eq!(g.orphaned_nodes(), 1);
    }

    #[test]
    fn every_matching_parent_receives_the_node() {
        let mut g = ForthGenerator::new();
        let p1 = g.add_node(Node::new(NodeKind::BaseClass("A".into())));
        g.set_active_node(p1);
        g.add_node(field("shared"));
        g.reset_active_node();
        let p2 = g.add_node(field("other"));
        g.set_active_node(p2);
        g.add_node(field("shared"));

        let leaf = g.add_node_under(field("leaf"), &NodeKind::Field("shared".into()));
        let model = g.model();
        assert_eq!(model.children[0].children[0].children[0].kind, NodeKind::Field("leaf".into()));
        assert_eq!(model.children[1].children[0].children[0].kind, NodeKind::Field("leaf".into()));
        assert_eq!(g.node(leaf).kind, NodeKind::Field("leaf".into()));
    }

    #[test]
    fn node_with_parent_kind_is_not_nested_in_itself() {
        let mut g = ForthGenerator::new();
        let a = g.add_node(field("a"));
        g.set_active_node(a);
        let again = g.add_node(field("a"));
        assert_eq!(g.children(a), &[] as &[NodeId]);
        assert_eq!(g.orphaned_nodes(), 1);
        assert_ne!(again, a);
    }

    #[test]
    fn push_pop_restores_lifo() {
        let mut g = ForthGenerator::new();
        let a = g.add_node(field("a"));
        let b = g.add_node(field("b"));
        g.push_active_node(a);
        g.push_active_node(b);
        assert_eq!(g.active_node(), b);
        g.pop_active_node().unwrap();
        assert_eq!(g.active_node(), a);
        g.pop_active_node().unwrap();
        assert_eq!(g.active_node(), g.top());
        assert!(matches!(g.pop_active_node(), Err(RootError::CodeGeneration(_))));
    }

    #[test]
    fn reset_clears_stack() {
        let mut g = ForthGenerator::new();
        let a = g.add_node(field("a"));
        g.push_active_node(a);
        g.mark_incomplete();
        g.begin_entry();
        assert_eq!(g.active_node(), g.top());
        assert_eq!(g.stack_depth(), 0);
        assert!(!g.is_incomplete());
    }

    #[test]
    fn subtree_is_moved_into_arena() {
        let mut g = ForthGenerator::new();
        let parent = g.add_node(field("p").with_child(field("c")));
        assert_eq!(g.children(parent).len(), 1);
        let c = g.children(parent)[0];
        g.set_active_node(c);
        g.add_node(field("grandchild"));
        assert_eq!(g.model().size(), 4);
    }

    #[test]
    fn compile_derives_form_and_program() {
        let mut g = ForthGenerator::new();
        let leaf = field("node1")
            .with_form(Form::numpy(Primitive::Int32).with_form_key("node1"))
            .with_header("output node1-data int32\n")
            .with_pre("stream !i-> node1-data\n");
        g.add_node(leaf);
        let compiled = g.compile().unwrap();
        assert_eq!(compiled.form, Form::numpy(Primitive::Int32).with_form_key("node1"));
        assert_eq!(compiled.program.code, "stream !i-> node1-data\n");
        assert_eq!(compiled.form_keys(), vec!["node1"]);
    }
}
