//! Region analysis over the lifted flow graph
//!
//! Switch recognition and condition folding rewire the graph after the CFG
//! analyses ran, so dominators, post-dominators, loops and dominance
//! frontiers are recomputed here once, right before structuring.

use crate::cfg::analysis::{
    analyze_dominators, analyze_post_dominators, dominates, find_natural_loops, Loop,
    LoopAnalysis, PostDominatorAnalysis,
};
use crate::cfg::flow::FlowGraph;
use petgraph::algo::dominators::Dominators;
use petgraph::graph::NodeIndex;
use smallvec::SmallVec;
use std::collections::HashMap;

pub struct RegionAnalyzer {
    root: NodeIndex,
    dominators: Dominators<NodeIndex>,
    post_dominators: PostDominatorAnalysis,
    loops: LoopAnalysis,
    predecessors: HashMap<NodeIndex, SmallVec<[NodeIndex; 2]>>,
    frontiers: HashMap<NodeIndex, Vec<NodeIndex>>,
}

impl RegionAnalyzer {
    pub fn new(graph: &FlowGraph) -> Self {
        let (shape, root) = graph.shape_with_root();
        let dominators = analyze_dominators(&shape, root);
        let post_dominators = analyze_post_dominators(&shape);
        let loops = find_natural_loops(&shape, root, &dominators);
        let predecessors = graph.predecessors();
        let mut analyzer = Self {
            root,
            dominators,
            post_dominators,
            loops,
            predecessors,
            frontiers: HashMap::new(),
        };
        analyzer.frontiers = analyzer.compute_frontiers(graph);
        log::trace!(
            "Region analysis: {} loops, {} irreducible edges",
            analyzer.loops.loops.len(),
            analyzer.loops.irreducible_edges.len()
        );
        analyzer
    }

    /// Dominance frontiers (Cooper, Harvey and Kennedy)
    fn compute_frontiers(&self, graph: &FlowGraph) -> HashMap<NodeIndex, Vec<NodeIndex>> {
        let mut frontiers: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        for node in graph.live_nodes() {
            let preds = self.predecessors(node);
            if preds.len() < 2 {
                continue;
            }
            let Some(idom) = self.dominators.immediate_dominator(node) else {
                continue;
            };
            for &pred in preds {
                let mut runner = pred;
                while runner != idom && self.is_reachable(runner) {
                    let frontier = frontiers.entry(runner).or_default();
                    if !frontier.contains(&node) {
                        frontier.push(node);
                    }
                    match self.dominators.immediate_dominator(runner) {
                        Some(next) => runner = next,
                        None => break,
                    }
                }
            }
        }
        frontiers
    }

    fn is_reachable(&self, node: NodeIndex) -> bool {
        node == self.root || self.dominators.immediate_dominator(node).is_some()
    }

    /// Whether `a` dominates `b` (reflexive)
    pub fn dominates(&self, a: NodeIndex, b: NodeIndex) -> bool {
        self.is_reachable(b) && dominates(&self.dominators, a, b)
    }

    pub fn strictly_dominates(&self, a: NodeIndex, b: NodeIndex) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Whether every path from `node` to an exit passes `post_dominator`
    pub fn post_dominates(&self, post_dominator: NodeIndex, node: NodeIndex) -> bool {
        self.post_dominators.dominates(post_dominator, node)
    }

    pub fn immediate_post_dominator(&self, node: NodeIndex) -> Option<NodeIndex> {
        self.post_dominators.immediate_post_dominator(node)
    }

    pub fn frontier(&self, node: NodeIndex) -> &[NodeIndex] {
        self.frontiers.get(&node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn predecessors(&self, node: NodeIndex) -> &[NodeIndex] {
        self.predecessors
            .get(&node)
            .map(|p| p.as_slice())
            .unwrap_or(&[])
    }

    pub fn loop_for_header(&self, header: NodeIndex) -> Option<&Loop> {
        self.loops.loop_for_header(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use crate::cfg::flow::{FlowNode, Terminator};

    fn n(i: usize) -> NodeIndex {
        NodeIndex::new(i)
    }

    fn diamond() -> FlowGraph {
        FlowGraph {
            nodes: vec![
                FlowNode::new(
                    0,
                    vec![],
                    Terminator::Branch {
                        condition: Expr::bool(true),
                        then_target: n(1),
                        else_target: n(2),
                    },
                ),
                FlowNode::new(4, vec![Expr::int(1)], Terminator::Goto(n(3))),
                FlowNode::new(8, vec![Expr::int(2)], Terminator::Goto(n(3))),
                FlowNode::new(12, vec![], Terminator::Return(None)),
            ],
            entry: n(0),
        }
    }

    #[test]
    fn diamond_merge_is_in_both_arm_frontiers() {
        let analyzer = RegionAnalyzer::new(&diamond());
        assert_eq!(analyzer.frontier(n(1)), &[n(3)]);
        assert_eq!(analyzer.frontier(n(2)), &[n(3)]);
        assert!(analyzer.frontier(n(0)).is_empty());
        assert_eq!(analyzer.immediate_post_dominator(n(0)), Some(n(3)));
        assert!(analyzer.strictly_dominates(n(0), n(3)));
        assert!(!analyzer.dominates(n(1), n(3)));
    }
}
