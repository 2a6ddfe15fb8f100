//! CFG analysis module
//!
//! Dominators, post-dominators and natural loops. The analyses run on a bare
//! [`Shape`] graph so the same code serves the raw block graph and the lifted
//! flow graph after switch recognition has rewired it.

use petgraph::algo::dominators::{self, Dominators};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet};

/// Structural edges only; node indices match the graph it was taken from
pub type Shape = DiGraph<(), ()>;

/// Traversal state of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitState {
    Unvisited,
    InProgress,
    Structured,
}

/// Compute dominators from `root`
pub fn analyze_dominators(shape: &Shape, root: NodeIndex) -> Dominators<NodeIndex> {
    dominators::simple_fast(shape, root)
}

/// Whether `a` dominates `b` (reflexive)
pub fn dominates(doms: &Dominators<NodeIndex>, a: NodeIndex, b: NodeIndex) -> bool {
    let mut current = Some(b);
    while let Some(node) = current {
        if node == a {
            return true;
        }
        current = doms.immediate_dominator(node);
    }
    false
}

/// Post-dominator analysis results
#[derive(Debug, Clone)]
pub struct PostDominatorAnalysis {
    pub immediate_post_dominators: HashMap<NodeIndex, NodeIndex>,
}

impl PostDominatorAnalysis {
    /// Check if a node post-dominates another node
    pub fn dominates(&self, post_dominator: NodeIndex, node: NodeIndex) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == post_dominator {
                return true;
            }
            current = self.immediate_post_dominators.get(&n).copied();
        }
        false
    }

    /// Get the immediate post-dominator of a node
    pub fn immediate_post_dominator(&self, node: NodeIndex) -> Option<NodeIndex> {
        self.immediate_post_dominators.get(&node).copied()
    }
}

/// Post-dominators relative to a virtual sink joined to every node without
/// successors. Nodes that cannot reach the sink have no post-dominator.
pub fn analyze_post_dominators(shape: &Shape) -> PostDominatorAnalysis {
    let count = shape.node_count();
    let mut reversed = Shape::with_capacity(count + 1, shape.edge_count() + count);
    for _ in 0..=count {
        reversed.add_node(());
    }
    let sink = NodeIndex::new(count);
    for edge in shape.edge_references() {
        reversed.add_edge(edge.target(), edge.source(), ());
    }
    for node in shape.node_indices() {
        if shape.neighbors(node).next().is_none() {
            reversed.add_edge(sink, node, ());
        }
    }

    let doms = dominators::simple_fast(&reversed, sink);
    let immediate_post_dominators = shape
        .node_indices()
        .filter_map(|node| {
            let ipdom = doms.immediate_dominator(node)?;
            (ipdom != sink).then_some((node, ipdom))
        })
        .collect();
    PostDominatorAnalysis {
        immediate_post_dominators,
    }
}

/// Natural loop information
#[derive(Debug, Clone)]
pub struct Loop {
    pub header: NodeIndex,
    pub body_nodes: HashSet<NodeIndex>,
    /// (latch, header) pairs
    pub back_edges: Vec<(NodeIndex, NodeIndex)>,
}

impl Loop {
    pub fn contains(&self, node: NodeIndex) -> bool {
        self.body_nodes.contains(&node)
    }

    pub fn latches(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.back_edges.iter().map(|(latch, _)| *latch)
    }
}

/// Loop analysis results
#[derive(Debug, Clone, Default)]
pub struct LoopAnalysis {
    /// Outer loops before the loops they contain
    pub loops: Vec<Loop>,
    /// node -> loop indices, outermost first
    pub node_to_loops: HashMap<NodeIndex, Vec<usize>>,
    /// Retreating edges whose target does not dominate their source
    pub irreducible_edges: Vec<(NodeIndex, NodeIndex)>,
}

impl LoopAnalysis {
    /// Get all loops containing a specific node
    pub fn get_loops_containing_node(&self, node: NodeIndex) -> &[usize] {
        self.node_to_loops
            .get(&node)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Check if a node is part of any loop
    pub fn is_node_in_loop(&self, node: NodeIndex) -> bool {
        self.node_to_loops.contains_key(&node)
    }

    /// Get the innermost loop containing a node
    pub fn get_innermost_loop(&self, node: NodeIndex) -> Option<&Loop> {
        self.node_to_loops
            .get(&node)
            .and_then(|indices| indices.last())
            .map(|&idx| &self.loops[idx])
    }

    /// Loop headed by `header`
    pub fn loop_for_header(&self, header: NodeIndex) -> Option<&Loop> {
        self.loops.iter().find(|l| l.header == header)
    }
}

/// Find loops with a DFS that marks nodes `InProgress` while on the stack:
/// an edge into an `InProgress` node is a back-edge and its target a header.
pub fn find_natural_loops(
    shape: &Shape,
    root: NodeIndex,
    doms: &Dominators<NodeIndex>,
) -> LoopAnalysis {
    struct Frame {
        node: NodeIndex,
        succs: Vec<NodeIndex>,
        next: usize,
    }

    let mut state = vec![VisitState::Unvisited; shape.node_count()];
    let mut retreating = Vec::new();
    let mut stack = vec![Frame {
        node: root,
        succs: shape.neighbors(root).collect(),
        next: 0,
    }];
    state[root.index()] = VisitState::InProgress;

    while let Some(frame) = stack.last_mut() {
        if frame.next < frame.succs.len() {
            let (from, to) = (frame.node, frame.succs[frame.next]);
            frame.next += 1;
            match state[to.index()] {
                VisitState::Unvisited => {
                    state[to.index()] = VisitState::InProgress;
                    stack.push(Frame {
                        node: to,
                        succs: shape.neighbors(to).collect(),
                        next: 0,
                    });
                }
                VisitState::InProgress => retreating.push((from, to)),
                VisitState::Structured => {}
            }
        } else {
            let node = frame.node;
            stack.pop();
            state[node.index()] = VisitState::Structured;
        }
    }

    let mut analysis = LoopAnalysis::default();
    let mut by_header: HashMap<NodeIndex, Vec<(NodeIndex, NodeIndex)>> = HashMap::new();
    for (latch, header) in retreating {
        if dominates(doms, header, latch) {
            by_header.entry(header).or_default().push((latch, header));
        } else {
            log::debug!(
                "Irreducible edge {} -> {}",
                latch.index(),
                header.index()
            );
            analysis.irreducible_edges.push((latch, header));
        }
    }

    let mut loops: Vec<Loop> = by_header
        .into_iter()
        .map(|(header, back_edges)| {
            let body_nodes = natural_loop_body(shape, header, &back_edges);
            Loop {
                header,
                body_nodes,
                back_edges,
            }
        })
        .collect();
    loops.sort_by(|a, b| {
        b.body_nodes
            .len()
            .cmp(&a.body_nodes.len())
            .then(a.header.index().cmp(&b.header.index()))
    });

    for (i, l) in loops.iter().enumerate() {
        for node in &l.body_nodes {
            analysis.node_to_loops.entry(*node).or_default().push(i);
        }
    }
    analysis.loops = loops;
    analysis
}

/// Header plus every node that reaches a latch without passing the header
fn natural_loop_body(
    shape: &Shape,
    header: NodeIndex,
    back_edges: &[(NodeIndex, NodeIndex)],
) -> HashSet<NodeIndex> {
    let mut body = HashSet::new();
    body.insert(header);
    let mut work: Vec<NodeIndex> = back_edges.iter().map(|(latch, _)| *latch).collect();
    while let Some(node) = work.pop() {
        if body.insert(node) {
            work.extend(shape.neighbors_directed(node, petgraph::Direction::Incoming));
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(n: usize, edges: &[(usize, usize)]) -> Shape {
        let mut g = Shape::new();
        for _ in 0..n {
            g.add_node(());
        }
        for (a, b) in edges {
            g.add_edge(NodeIndex::new(*a), NodeIndex::new(*b), ());
        }
        g
    }

    #[test]
    fn finds_nested_loops_outer_first() {
        // 0 -> 1 -> 2 -> 3 -> 2, 3 -> 4 -> 1, 4 -> 5
        let g = shape(6, &[(0, 1), (1, 2), (2, 3), (3, 2), (3, 4), (4, 1), (4, 5)]);
        let doms = analyze_dominators(&g, NodeIndex::new(0));
        let loops = find_natural_loops(&g, NodeIndex::new(0), &doms);
        assert_eq!(loops.loops.len(), 2);
        assert_eq!(loops.loops[0].header, NodeIndex::new(1));
        assert_eq!(loops.loops[1].header, NodeIndex::new(2));
        assert_eq!(
            loops.get_innermost_loop(NodeIndex::new(3)).map(|l| l.header),
            Some(NodeIndex::new(2))
        );
        assert!(!loops.is_node_in_loop(NodeIndex::new(5)));
    }

    #[test]
    fn irreducible_edges_are_not_loops() {
        // 0 -> 1, 0 -> 2, 1 -> 2, 2 -> 1
        let g = shape(3, &[(0, 1), (0, 2), (1, 2), (2, 1)]);
        let doms = analyze_dominators(&g, NodeIndex::new(0));
        let loops = find_natural_loops(&g, NodeIndex::new(0), &doms);
        assert!(loops.loops.is_empty());
        assert_eq!(loops.irreducible_edges.len(), 1);
    }

    #[test]
    fn post_dominator_of_diamond_is_join() {
        let g = shape(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let pdoms = analyze_post_dominators(&g);
        assert_eq!(
            pdoms.immediate_post_dominator(NodeIndex::new(0)),
            Some(NodeIndex::new(3))
        );
        assert!(pdoms.dominates(NodeIndex::new(3), NodeIndex::new(1)));
        assert_eq!(pdoms.immediate_post_dominator(NodeIndex::new(3)), None);
    }

    #[test]
    fn early_return_leaves_branch_without_post_dominator() {
        // 0 -> 1 (return), 0 -> 2 -> 3 (return)
        let g = shape(4, &[(0, 1), (0, 2), (2, 3)]);
        let pdoms = analyze_post_dominators(&g);
        assert_eq!(pdoms.immediate_post_dominator(NodeIndex::new(0)), None);
        assert_eq!(
            pdoms.immediate_post_dominator(NodeIndex::new(2)),
            Some(NodeIndex::new(3))
        );
    }
}
