//! Short-circuit condition folding
//!
//! `a && b` and `a || b` compile to two condition-only blocks that share a
//! target. Folding them back into one branch lets the structurer see a
//! single `if`/loop condition. Runs after switch recognition, so dispatch
//! chains are matched before their comparisons are merged.

use crate::ast::{BinaryOp, Expr};
use crate::cfg::flow::{FlowGraph, Terminator};
use petgraph::graph::NodeIndex;

/// Fold short-circuit conditions until nothing changes; returns the number
/// of blocks merged
pub fn fold_short_circuits(graph: &mut FlowGraph) -> usize {
    let mut merged = 0;
    loop {
        let mut changed = false;
        let preds = graph.predecessors();
        let mut nodes = graph.live_nodes();
        nodes.reverse();
        for node in nodes {
            if graph.node(node).removed {
                continue;
            }
            let Terminator::Branch {
                then_target,
                else_target,
                ..
            } = graph.node(node).terminator
            else {
                continue;
            };
            if then_target == else_target {
                continue;
            }
            for inner in [else_target, then_target] {
                let single_pred = preds.get(&inner).map_or(false, |p| p.len() == 1);
                if inner == node || !single_pred || graph.node(inner).handler_of.is_some() {
                    continue;
                }
                if try_fold(graph, node, inner) {
                    merged += 1;
                    changed = true;
                    break;
                }
            }
        }
        if !changed {
            return merged;
        }
    }
}

fn try_fold(graph: &mut FlowGraph, outer: NodeIndex, inner: NodeIndex) -> bool {
    if !graph.node(inner).is_condition_only() {
        return false;
    }
    let (
        Terminator::Branch {
            condition: c1,
            then_target: t1,
            else_target: e1,
        },
        Terminator::Branch {
            condition: c2,
            then_target: t2,
            else_target: e2,
        },
    ) = (&graph.node(outer).terminator, &graph.node(inner).terminator)
    else {
        return false;
    };
    let (t1, e1, t2, e2) = (*t1, *e1, *t2, *e2);

    let folded = if inner == e1 && t2 == t1 {
        // c1 || c2
        Some((BinaryOp::LogicalOr, c2.clone(), t1, e2))
    } else if inner == e1 && e2 == t1 {
        // c1 || !c2
        Some((BinaryOp::LogicalOr, c2.clone().negate(), t1, t2))
    } else if inner == t1 && e2 == e1 {
        // c1 && c2
        Some((BinaryOp::LogicalAnd, c2.clone(), t2, e1))
    } else if inner == t1 && t2 == e1 {
        // c1 && !c2
        Some((BinaryOp::LogicalAnd, c2.clone().negate(), e2, e1))
    } else {
        None
    };
    let Some((op, right, then_target, else_target)) = folded else {
        return false;
    };
    if then_target == inner || else_target == inner {
        return false;
    }

    let condition = Expr::binary(op, c1.clone(), right);
    log::trace!(
        "Folded IL_{:04x} into IL_{:04x} with {}",
        graph.node(inner).offset,
        graph.node(outer).offset,
        op.symbol()
    );
    graph.node_mut(outer).terminator = Terminator::Branch {
        condition,
        then_target,
        else_target,
    };
    graph.node_mut(inner).removed = true;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::LocalId;
    use crate::cfg::flow::FlowNode;

    fn n(i: usize) -> NodeIndex {
        NodeIndex::new(i)
    }

    fn var(i: u32) -> Expr {
        Expr::Local(LocalId(i))
    }

    fn branch(offset: u32, c: Expr, t: usize, e: usize) -> FlowNode {
        FlowNode::new(
            offset,
            vec![],
            Terminator::Branch {
                condition: c,
                then_target: n(t),
                else_target: n(e),
            },
        )
    }

    fn ret(offset: u32) -> FlowNode {
        FlowNode::new(offset, vec![Expr::int(offset as i64)], Terminator::Return(None))
    }

    #[test]
    fn or_then_and_folds_into_one_condition() {
        // a || (b && c)
        let mut graph = FlowGraph {
            nodes: vec![
                branch(0, var(0), 3, 1),
                branch(4, var(1), 2, 4),
                branch(8, var(2), 3, 4),
                ret(12),
                ret(16),
            ],
            entry: n(0),
        };
        assert_eq!(fold_short_circuits(&mut graph), 2);
        let expected = Expr::binary(
            BinaryOp::LogicalOr,
            var(0),
            Expr::binary(BinaryOp::LogicalAnd, var(1), var(2)),
        );
        assert_eq!(
            graph.node(n(0)).terminator,
            Terminator::Branch {
                condition: expected,
                then_target: n(3),
                else_target: n(4),
            }
        );
        assert!(graph.node(n(1)).removed && graph.node(n(2)).removed);
    }

    #[test]
    fn blocks_with_statements_are_not_folded() {
        let mut inner = branch(4, var(1), 2, 3);
        inner.statements.push(Expr::int(1));
        let mut graph = FlowGraph {
            nodes: vec![branch(0, var(0), 1, 3), inner, ret(8), ret(12)],
            entry: n(0),
        };
        assert_eq!(fold_short_circuits(&mut graph), 0);
    }
}
