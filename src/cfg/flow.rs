//! Lifted flow graph
//!
//! The lifter turns every basic block into expression statements plus a
//! [`Terminator`]. Switch recognition and short-circuit folding rewrite this
//! graph; the structurer consumes it. Node indices are the CFG's indices, so
//! diagnostics can always point back at an IL block.

use crate::ast::{Expr, LocalId};
use crate::cfg::analysis::Shape;
use crate::cfg::switch_analysis::SwitchInfo;
use crate::il::Offset;
use petgraph::graph::NodeIndex;
use smallvec::SmallVec;
use std::collections::HashMap;

/// How control leaves a lifted block
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Goto(NodeIndex),
    Branch {
        condition: Expr,
        then_target: NodeIndex,
        else_target: NodeIndex,
    },
    /// Raw IL `switch` table; `value - k` selects `targets[value - k]`
    JumpTable {
        value: Expr,
        targets: Vec<NodeIndex>,
        default: NodeIndex,
    },
    /// Recognized switch dispatch
    Switch(Box<SwitchInfo>),
    Return(Option<Expr>),
    Throw(Option<Expr>),
    Leave(NodeIndex),
    EndFinally,
}

impl Terminator {
    pub fn successors(&self) -> SmallVec<[NodeIndex; 2]> {
        let mut out: SmallVec<[NodeIndex; 2]> = SmallVec::new();
        let mut push = |n: NodeIndex| {
            if !out.contains(&n) {
                out.push(n);
            }
        };
        match self {
            Terminator::Goto(t) | Terminator::Leave(t) => push(*t),
            Terminator::Branch {
                then_target,
                else_target,
                ..
            } => {
                push(*then_target);
                push(*else_target);
            }
            Terminator::JumpTable {
                targets, default, ..
            } => {
                for t in targets {
                    push(*t);
                }
                push(*default);
            }
            Terminator::Switch(info) => {
                for t in info.targets() {
                    push(t);
                }
            }
            Terminator::Return(_) | Terminator::Throw(_) | Terminator::EndFinally => {}
        }
        out
    }

    /// Redirect every edge to `from` so it points at `to`
    pub fn retarget(&mut self, from: NodeIndex, to: NodeIndex) {
        let fix = |n: &mut NodeIndex| {
            if *n == from {
                *n = to;
            }
        };
        match self {
            Terminator::Goto(t) | Terminator::Leave(t) => fix(t),
            Terminator::Branch {
                then_target,
                else_target,
                ..
            } => {
                fix(then_target);
                fix(else_target);
            }
            Terminator::JumpTable {
                targets, default, ..
            } => {
                targets.iter_mut().for_each(fix);
                fix(default);
            }
            Terminator::Switch(info) => info.retarget(from, to),
            Terminator::Return(_) | Terminator::Throw(_) | Terminator::EndFinally => {}
        }
    }

    pub fn is_exit(&self) -> bool {
        matches!(self, Terminator::Return(_) | Terminator::Throw(_))
    }

    /// Expressions evaluated by the terminator
    pub fn exprs(&self) -> SmallVec<[&Expr; 1]> {
        let mut out = SmallVec::new();
        match self {
            Terminator::Branch { condition, .. } => out.push(condition),
            Terminator::JumpTable { value, .. } => out.push(value),
            Terminator::Switch(info) => out.push(&info.discriminant),
            Terminator::Return(Some(e)) | Terminator::Throw(Some(e)) => out.push(e),
            _ => {}
        }
        out
    }
}

/// One lifted basic block
#[derive(Debug, Clone)]
pub struct FlowNode {
    pub offset: Offset,
    pub statements: Vec<Expr>,
    pub terminator: Terminator,
    /// Folded into another node (or the synthetic exit)
    pub removed: bool,
    /// Exception region whose handler starts here
    pub handler_of: Option<usize>,
}

impl FlowNode {
    pub fn new(offset: Offset, statements: Vec<Expr>, terminator: Terminator) -> Self {
        Self {
            offset,
            statements,
            terminator,
            removed: false,
            handler_of: None,
        }
    }

    /// No statements, just a two-way branch
    pub fn is_condition_only(&self) -> bool {
        self.statements.is_empty() && matches!(self.terminator, Terminator::Branch { .. })
    }

    /// No statements and an unconditional jump
    pub fn is_forwarder(&self) -> Option<NodeIndex> {
        match self.terminator {
            Terminator::Goto(t) if self.statements.is_empty() => Some(t),
            _ => None,
        }
    }

    pub fn reads_local(&self, local: LocalId) -> bool {
        self.statements.iter().any(|s| s.reads_local(local))
            || self.terminator.exprs().iter().any(|e| e.reads_local(local))
    }
}

/// Lifted graph of one method
#[derive(Debug, Clone)]
pub struct FlowGraph {
    pub nodes: Vec<FlowNode>,
    pub entry: NodeIndex,
}

impl FlowGraph {
    pub fn node(&self, n: NodeIndex) -> &FlowNode {
        &self.nodes[n.index()]
    }

    pub fn node_mut(&mut self, n: NodeIndex) -> &mut FlowNode {
        &mut self.nodes[n.index()]
    }

    /// Append a synthetic node
    pub fn add_node(&mut self, node: FlowNode) -> NodeIndex {
        self.nodes.push(node);
        NodeIndex::new(self.nodes.len() - 1)
    }

    /// Nodes still part of the graph, in IL order
    pub fn live_nodes(&self) -> Vec<NodeIndex> {
        let mut nodes: Vec<NodeIndex> = (0..self.nodes.len())
            .map(NodeIndex::new)
            .filter(|n| !self.node(*n).removed)
            .collect();
        nodes.sort_by_key(|n| (self.node(*n).offset, n.index()));
        nodes
    }

    pub fn successors(&self, n: NodeIndex) -> SmallVec<[NodeIndex; 2]> {
        self.node(n).terminator.successors()
    }

    /// Distinct predecessors of every live node
    pub fn predecessors(&self) -> HashMap<NodeIndex, SmallVec<[NodeIndex; 2]>> {
        let mut preds: HashMap<NodeIndex, SmallVec<[NodeIndex; 2]>> = HashMap::new();
        for n in self.live_nodes() {
            for s in self.successors(n) {
                let entry = preds.entry(s).or_default();
                if !entry.contains(&n) {
                    entry.push(n);
                }
            }
        }
        preds
    }

    /// Entry plus every handler entry
    pub fn roots(&self) -> Vec<NodeIndex> {
        let mut roots = vec![self.entry];
        roots.extend(
            self.live_nodes()
                .into_iter()
                .filter(|n| self.node(*n).handler_of.is_some() && *n != self.entry),
        );
        roots
    }

    /// Structural shape with a virtual root (last index) feeding every root,
    /// so handler bodies get dominators too
    pub fn shape_with_root(&self) -> (Shape, NodeIndex) {
        let mut shape = Shape::with_capacity(self.nodes.len() + 1, self.nodes.len() * 2);
        for _ in 0..=self.nodes.len() {
            shape.add_node(());
        }
        for n in self.live_nodes() {
            for s in self.successors(n) {
                shape.add_edge(n, s, ());
            }
        }
        let root = NodeIndex::new(self.nodes.len());
        for r in self.roots() {
            shape.add_edge(root, r, ());
        }
        (shape, root)
    }

    /// Nodes reachable from the roots
    pub fn reachable(&self) -> Vec<bool> {
        let mut seen = vec![false; self.nodes.len()];
        let mut work = self.roots();
        while let Some(n) = work.pop() {
            if seen[n.index()] || self.node(n).removed {
                continue;
            }
            seen[n.index()] = true;
            work.extend(self.successors(n));
        }
        seen
    }

    /// Redirect jumps through empty forwarding blocks to their final target
    /// and drop the forwarders nothing reaches anymore. Forwarders starting
    /// at a `pinned` offset (protected range starts) are kept.
    pub fn thread_forwarders(&mut self, pinned: &[Offset]) {
        let before = self.reachable();
        let live = self.live_nodes();
        for n in live {
            let succs = self.successors(n);
            for s in succs {
                let mut target = s;
                let mut hops = 0;
                while let Some(next) = self.node(target).is_forwarder() {
                    let node = self.node(target);
                    if next == target
                        || hops > self.nodes.len()
                        || node.handler_of.is_some()
                        || pinned.contains(&node.offset)
                    {
                        break;
                    }
                    target = next;
                    hops += 1;
                }
                if target != s {
                    self.node_mut(n).terminator.retarget(s, target);
                }
            }
        }
        let after = self.reachable();
        for (i, node) in self.nodes.iter_mut().enumerate() {
            if before[i] && !after[i] {
                node.removed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(i: usize) -> NodeIndex {
        NodeIndex::new(i)
    }

    #[test]
    fn forwarders_are_threaded() {
        let mut graph = FlowGraph {
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
                FlowNode::new(4, vec![], Terminator::Goto(n(2))),
                FlowNode::new(8, vec![], Terminator::Return(None)),
            ],
            entry: n(0),
        };
        graph.thread_forwarders(&[]);
        assert_eq!(graph.successors(n(0)).as_slice(), &[n(2)]);
        assert!(graph.node(n(1)).removed);
    }

    #[test]
    fn predecessors_are_distinct() {
        let graph = FlowGraph {
            nodes: vec![
                FlowNode::new(
                    0,
                    vec![],
                    Terminator::JumpTable {
                        value: Expr::int(0),
                        targets: vec![n(1), n(1)],
                        default: n(1),
                    },
                ),
                FlowNode::new(4, vec![], Terminator::Return(None)),
            ],
            entry: n(0),
        };
        let preds = graph.predecessors();
        assert_eq!(preds[&n(1)].as_slice(), &[n(0)]);
    }
}
