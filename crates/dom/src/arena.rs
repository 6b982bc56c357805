//! Arena-based storage for the live document tree
//!
//! Removing a node only detaches it, so a `NodeId` stays a stable identity
//! while the node is reachable. That is what lets the reconciler prove that
//! a persistent element survived a transition as the *same* element.
//! Nodes that are no longer reachable are released in bulk with
//! `release_unreachable`; their slots go on a free list and are reused.
//!
//! ## Memory Layout
//!
//! ```text
//! Arena: Vec<Option<DomNode>>
//!        [Node0][None][Node2]...     free: [1]
//!         ↑ 4-byte index, not 8-byte pointer
//! ```

use crate::error::{DomError, Result};
use crate::types::{DomNode, NodeId, NodeType};

/// Arena allocator for DOM nodes
#[derive(Debug)]
pub struct DomArena {
    /// Node slots, `None` once released (cache-friendly)
    nodes: Vec<Option<DomNode>>,

    /// Released slots, reused before the arena grows
    free: Vec<NodeId>,
}

impl DomArena {
    /// Create a new empty arena
    pub fn new() -> Self {
        Self::with_capacity(1024) // Pre-allocate for typical page
    }

    /// Create arena with specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            free: Vec::new(),
        }
    }

    /// Add a detached node to the arena, returns its ID
    pub fn add_node(&mut self, mut node: DomNode) -> Result<NodeId> {
        let node_id = match self.free.pop() {
            Some(node_id) => node_id,
            None => NodeId::try_from(self.nodes.len()).map_err(|_| DomError::ArenaFull)?,
        };
        node.node_id = node_id;
        node.parent_id = None;
        node.children_ids.clear();

        let slot = node_id as usize;
        if slot == self.nodes.len() {
            self.nodes.push(Some(node));
        } else {
            self.nodes[slot] = Some(node);
        }
        Ok(node_id)
    }

    /// Get node by ID (immutable)
    pub fn get(&self, node_id: NodeId) -> Result<&DomNode> {
        self.nodes
            .get(node_id as usize)
            .and_then(Option::as_ref)
            .ok_or(DomError::NodeNotFound(node_id))
    }

    /// Get node by ID (mutable)
    pub fn get_mut(&mut self, node_id: NodeId) -> Result<&mut DomNode> {
        self.nodes
            .get_mut(node_id as usize)
            .and_then(Option::as_mut)
            .ok_or(DomError::NodeNotFound(node_id))
    }

    /// True while `node_id` names a live node
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.get(node_id).is_ok()
    }

    /// Number of live nodes, attached or not
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Check if arena is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocated slots, live or free
    pub fn slots(&self) -> usize {
        self.nodes.len()
    }

    /// Child IDs of a node, copied out so the caller may mutate the tree
    pub fn child_ids(&self, node_id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.get(node_id)?.children_ids.to_vec())
    }

    /// Get children of a node
    pub fn children(&self, node_id: NodeId) -> Result<Vec<&DomNode>> {
        let node = self.get(node_id)?;
        node.children_ids
            .iter()
            .map(|&child_id| self.get(child_id))
            .collect()
    }

    /// True if `ancestor` is `node_id` or one of its ancestors
    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, node_id: NodeId) -> Result<bool> {
        let mut current = Some(node_id);
        while let Some(id) = current {
            if id == ancestor {
                return Ok(true);
            }
            current = self.get(id)?.parent_id;
        }
        Ok(false)
    }

    /// Detach a node from its parent. Detaching a detached node is a no-op.
    pub fn detach(&mut self, node_id: NodeId) -> Result<()> {
        let parent_id = match self.get(node_id)?.parent_id {
            Some(parent_id) => parent_id,
            None => return Ok(()),
        };

        let parent = self.get_mut(parent_id)?;
        parent.children_ids.retain(|child| *child != node_id);
        self.get_mut(node_id)?.parent_id = None;
        Ok(())
    }

    /// Append `child` as the last child of `parent`, moving it if attached elsewhere
    pub fn append_child(&mut self, parent_id: NodeId, child_id: NodeId) -> Result<()> {
        self.get(parent_id)?;
        if self.is_inclusive_ancestor(child_id, parent_id)? {
            return Err(DomError::HierarchyRequest {
                parent: parent_id,
                child: child_id,
            });
        }

        self.detach(child_id)?;
        self.get_mut(child_id)?.parent_id = Some(parent_id);
        self.get_mut(parent_id)?.children_ids.push(child_id);
        Ok(())
    }

    /// Release every node that cannot be reached from `root_id`
    ///
    /// Released ids become invalid and their slots are handed out again by
    /// `add_node`. Returns how many nodes were released.
    pub fn release_unreachable(&mut self, root_id: NodeId) -> Result<usize> {
        let mut reachable = vec![false; self.nodes.len()];
        self.traverse_df(root_id, |node| {
            reachable[node.node_id as usize] = true;
            Ok(())
        })?;

        let mut released = 0;
        for (slot, node) in self.nodes.iter_mut().enumerate().rev() {
            if node.is_some() && !reachable[slot] {
                *node = None;
                // Slots below the u32 limit by construction
                self.free.push(slot as NodeId);
                released += 1;
            }
        }
        Ok(released)
    }

    /// Pre-order walk from `start_id`, iterative so deep pages cannot overflow the stack
    pub fn traverse_df<F>(&self, start_id: NodeId, mut visit: F) -> Result<()>
    where
        F: FnMut(&DomNode) -> Result<()>,
    {
        let mut stack = vec![start_id];

        while let Some(node_id) = stack.pop() {
            let node = self.get(node_id)?;
            visit(node)?;

            // Push children in reverse order (so they're visited left-to-right)
            for &child_id in node.children_ids.iter().rev() {
                stack.push(child_id);
            }
        }

        Ok(())
    }

    /// Descendants of `start_id` (inclusive) matching predicate, in tree order
    pub fn find_in<F>(&self, start_id: NodeId, predicate: F) -> Result<Vec<NodeId>>
    where
        F: Fn(&DomNode) -> bool,
    {
        let mut found = Vec::new();
        self.traverse_df(start_id, |node| {
            if predicate(node) {
                found.push(node.node_id);
            }
            Ok(())
        })?;
        Ok(found)
    }

    /// Find all elements by tag name below `start_id`
    pub fn find_by_tag(&self, start_id: NodeId, tag: &str) -> Result<Vec<NodeId>> {
        self.find_in(start_id, |node| {
            node.node_type == NodeType::Element && node.node_name.eq_ignore_ascii_case(tag)
        })
    }

    /// Find the first element carrying `name="value"` below `start_id`
    pub fn find_by_attr(&self, start_id: NodeId, name: &str, value: &str) -> Result<Option<NodeId>> {
        Ok(self
            .find_in(start_id, |node| node.is_element() && node.attr(name) == Some(value))?
            .into_iter()
            .next())
    }
}

impl Default for DomArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> (DomArena, NodeId, NodeId, NodeId) {
        let mut arena = DomArena::new();
        let root = arena.add_node(DomNode::element("div")).unwrap();
        let child1 = arena.add_node(DomNode::element("span")).unwrap();
        let child2 = arena.add_node(DomNode::element("span")).unwrap();
        arena.append_child(root, child1).unwrap();
        arena.append_child(root, child2).unwrap();
        (arena, root, child1, child2)
    }

    #[test]
    fn test_arena_basic() {
        let mut arena = DomArena::new();
        let id = arena.add_node(DomNode::element("div")).unwrap();
        assert_eq!(id, 0);

        let retrieved = arena.get(id).unwrap();
        assert_eq!(retrieved.node_name, "div");
        assert_eq!(retrieved.node_id, id);
    }

    #[test]
    fn test_traverse_df() {
        let (arena, root, _, _) = tree();

        let mut visited = Vec::new();
        arena
            .traverse_df(root, |node| {
                visited.push(node.node_name.clone());
                Ok(())
            })
            .unwrap();

        assert_eq!(visited, vec!["div", "span", "span"]);
    }

    #[test]
    fn test_append_moves_node() {
        let (mut arena, root, child1, child2) = tree();

        arena.append_child(child2, child1).unwrap();
        assert_eq!(arena.child_ids(root).unwrap(), vec![child2]);
        assert_eq!(arena.get(child1).unwrap().parent_id, Some(child2));
    }

    #[test]
    fn test_append_rejects_cycle() {
        let (mut arena, root, child1, _) = tree();
        let err = arena.append_child(child1, root).unwrap_err();
        assert!(matches!(err, DomError::HierarchyRequest { .. }));
    }

    #[test]
    fn test_detach_keeps_node_alive() {
        let (mut arena, root, child1, child2) = tree();

        arena.detach(child1).unwrap();
        arena.detach(child1).unwrap();

        assert_eq!(arena.child_ids(root).unwrap(), vec![child2]);
        assert!(arena.get(child1).unwrap().parent_id.is_none());
    }

    #[test]
    fn test_release_unreachable_frees_detached_subtrees() {
        let (mut arena, root, child1, child2) = tree();
        let text = arena.add_node(DomNode::text("hello")).unwrap();
        arena.append_child(child1, text).unwrap();
        arena.detach(child1).unwrap();

        assert_eq!(arena.release_unreachable(root).unwrap(), 2);
        assert_eq!(arena.len(), 2);
        assert!(!arena.contains(child1));
        assert!(!arena.contains(text));
        assert!(matches!(arena.get(child1), Err(DomError::NodeNotFound(_))));
        assert_eq!(arena.child_ids(root).unwrap(), vec![child2]);
    }

    #[test]
    fn test_released_slots_are_reused() {
        let (mut arena, root, child1, _) = tree();
        arena.detach(child1).unwrap();
        arena.release_unreachable(root).unwrap();

        let reused = arena.add_node(DomNode::text("again")).unwrap();
        assert_eq!(reused, child1);
        assert_eq!(arena.get(reused).unwrap().node_value, "again");
        assert_eq!(arena.slots(), 3);
        assert_eq!(arena.len(), 3);
    }

    #[test]
    fn test_find_by_attr() {
        let (mut arena, root, _, child2) = tree();
        arena.get_mut(child2).unwrap().set_attr("persist-id", "nav");

        assert_eq!(arena.find_by_attr(root, "persist-id", "nav").unwrap(), Some(child2));
        assert_eq!(arena.find_by_tag(root, "SPAN").unwrap().len(), 2);
    }
}
