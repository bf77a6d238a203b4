use crate::format::types::{NodeArena, NodeId};

/// Rebuilds the node tree from keyframer records.
///
/// Records arrive in preorder, each tagged with its depth. `open[d]` is the
/// most recent node seen at depth `d`, so a new node at depth `d` belongs to
/// `open[d - 1]`.
#[derive(Debug, Default)]
pub struct HierarchyResolver {
    open: Vec<NodeId>,
}

impl HierarchyResolver {
    pub fn new() -> Self { Self::default() }

    /// Attaches `node` according to `depth` and returns its parent.
    ///
    /// Negative depths reset the tree state and hang the node off the root.
    /// A depth deeper than the open chain attaches to the deepest open node.
    pub fn attach(&mut self, arena: &mut NodeArena, node: NodeId, depth: i16) -> NodeId {
        if depth < 0 {
            self.open.clear();
        } else {
            let depth = depth as usize;
            if depth > self.open.len() {
                log::warn!(
                    "Node depth {} skips levels (open chain {}), attaching to deepest node",
                    depth,
                    self.open.len()
                );
            }
            self.open.truncate(depth);
        }
        let parent = self.open.last().copied().unwrap_or(NodeId::ROOT);
        arena.attach(parent, node);
        self.open.push(node);
        parent
    }

    pub fn reset(&mut self) { self.open.clear(); }
}
