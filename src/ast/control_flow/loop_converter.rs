//! Natural loops to `while`, `do`/`while`, `for` and `while (true)`
//!
//! The loop shape decides where `continue` lands: the header for `while`
//! loops, the latch for `do`/`while`, the increment block for `for`. Exits
//! that only return or throw stay inside the body. If more than one real
//! exit remains, the extra ones leave through an exit flag that is tested
//! right after the loop.

use super::scope::{LoopScope, Scope};
use super::Structurer;
use crate::ast::{BinaryOp, Expr, LocalId, LocalKind, LoopConstruct, LoopKind, Stmt, StmtId};
use crate::cfg::analysis::VisitState;
use crate::cfg::flow::Terminator;
use crate::error::Result;
use crate::metadata::{PrimitiveType, TypeSig};
use petgraph::graph::NodeIndex;
use std::collections::HashSet;

/// Exit regions larger than this are not pulled into the loop
const MAX_OWNED_EXIT_REGION: usize = 256;

/// Increment statements a `for` header may carry
const MAX_FOR_INCREMENTS: usize = 2;

#[derive(Debug, Clone)]
enum LoopShape {
    /// Condition-only header; `increment` is the latch of a `for`
    While {
        condition: Expr,
        body_entry: NodeIndex,
        exit: NodeIndex,
        increment: Option<NodeIndex>,
    },
    DoWhile {
        latch: NodeIndex,
        condition: Expr,
        exit: NodeIndex,
    },
    Infinite,
}

impl<'a, 'r> Structurer<'a, 'r> {
    pub(super) fn is_pending_loop_header(&self, node: NodeIndex) -> bool {
        self.is_unvisited(node)
            && !self.scopes.has_loop(node)
            && self.analyzer.loop_for_header(node).is_some()
    }

    pub(super) fn structure_loop(
        &mut self,
        header: NodeIndex,
        exit: Option<NodeIndex>,
        out: &mut Vec<StmtId>,
    ) -> Result<Option<NodeIndex>> {
        let Some(natural) = self.analyzer.loop_for_header(header).cloned() else {
            return self.emit_block(header, exit, out);
        };
        let body = natural.body_nodes.clone();
        let shape = self.loop_shape(header, &natural.back_edges, &body);

        let exits = self.loop_exits(&body);
        let primary = match &shape {
            LoopShape::While { exit, .. } | LoopShape::DoWhile { exit, .. } => Some(*exit),
            LoopShape::Infinite => None,
        };
        let owned = self.owned_exit_blocks(header, &body, &exits, primary);
        let real_exits: Vec<NodeIndex> = exits
            .iter()
            .copied()
            .filter(|x| !owned.contains(x) && !self.is_duplicable_exit(*x))
            .collect();
        let primary = primary.or_else(|| self.busiest_exit(&body, &real_exits));
        let flag_exits: Vec<NodeIndex> = real_exits
            .iter()
            .copied()
            .filter(|x| Some(*x) != primary)
            .collect();
        let flag = if flag_exits.is_empty() {
            None
        } else {
            log::debug!(
                "Loop at IL_{:04x} has {} exits; selecting them through a flag",
                self.offset_of(header),
                flag_exits.len() + 1
            );
            Some(
                self.context
                    .new_local(LocalKind::LoopFlag, Some(TypeSig::Primitive(PrimitiveType::I4))),
            )
        };

        let (kind, continue_target) = match &shape {
            LoopShape::While {
                increment: Some(latch),
                ..
            } => (LoopKind::For, *latch),
            LoopShape::While { .. } | LoopShape::Infinite => (LoopKind::While, header),
            LoopShape::DoWhile { latch, .. } => (LoopKind::DoWhile, *latch),
        };
        log::debug!(
            "Loop at IL_{:04x}: {:?}, {} blocks, break target {:?}",
            self.offset_of(header),
            kind,
            body.len(),
            primary.map(|p| self.offset_of(p))
        );

        let initializer = match &shape {
            LoopShape::While {
                increment: Some(latch),
                ..
            } => self.take_initializer(*latch, out),
            _ => None,
        };
        self.reserve_label(header, out);
        if let Some(flag) = flag {
            let reset = self
                .ast
                .alloc(Stmt::Expr(Expr::assign(Expr::Local(flag), Expr::int(0))));
            out.push(reset);
        }

        self.state[header.index()] = VisitState::InProgress;
        self.scopes.push(Scope::Loop(LoopScope {
            header,
            continue_target,
            break_target: primary,
            body,
            owned,
            flag,
            flag_exits: flag_exits.clone(),
        }));
        let built = self.loop_body(header, &shape);
        self.scopes.pop();
        self.state[header.index()] = VisitState::Structured;
        let (body_items, condition, increment) = built?;

        let body_block = self.ast.block(body_items);
        let stmt = self.ast.alloc(Stmt::Loop(LoopConstruct {
            kind,
            condition,
            body: body_block,
            initializer,
            increment,
            binding: None,
        }));
        out.push(stmt);

        if let Some(flag) = flag {
            self.emit_flag_dispatch(flag, &flag_exits, out)?;
        }
        Ok(primary)
    }

    fn loop_body(
        &mut self,
        header: NodeIndex,
        shape: &LoopShape,
    ) -> Result<(Vec<StmtId>, Option<Expr>, Vec<Expr>)> {
        let mut items = Vec::new();
        match shape.clone() {
            LoopShape::While {
                condition,
                body_entry,
                increment,
                ..
            } => {
                let body_exit = increment.unwrap_or(header);
                if let Some(latch) = increment {
                    self.consumed.insert(latch);
                }
                if body_entry != header {
                    self.structure_region(body_entry, Some(body_exit), &mut items)?;
                }
                let increment = match increment {
                    Some(latch) => {
                        self.state[latch.index()] = VisitState::Structured;
                        self.graph.node(latch).statements.clone()
                    }
                    None => Vec::new(),
                };
                Ok((items, Some(condition), increment))
            }
            LoopShape::DoWhile {
                latch, condition, ..
            } => {
                self.consumed.insert(latch);
                if latch == header {
                    self.emit_block(header, None, &mut items)?;
                } else {
                    self.continue_from(header, Some(latch), &mut items)?;
                    if self.is_unvisited(latch) {
                        self.emit_block(latch, None, &mut items)?;
                    }
                }
                Ok((items, Some(condition), Vec::new()))
            }
            LoopShape::Infinite => {
                self.continue_from(header, Some(header), &mut items)?;
                Ok((items, None, Vec::new()))
            }
        }
    }

    fn loop_shape(
        &self,
        header: NodeIndex,
        back_edges: &[(NodeIndex, NodeIndex)],
        body: &HashSet<NodeIndex>,
    ) -> LoopShape {
        let head = self.graph.node(header);
        if let Terminator::Branch {
            condition,
            then_target,
            else_target,
        } = &head.terminator
        {
            let oriented = match (body.contains(then_target), body.contains(else_target)) {
                (true, false) => Some((condition.clone(), *then_target, *else_target)),
                (false, true) => Some((condition.clone().negate(), *else_target, *then_target)),
                _ => None,
            };
            if let (true, Some((condition, body_entry, exit))) = (head.statements.is_empty(), oriented) {
                let increment = match back_edges {
                    [(latch, _)] => Some(*latch)
                        .filter(|l| *l != body_entry && self.is_increment_block(*l, header, &condition)),
                    _ => None,
                };
                return LoopShape::While {
                    condition,
                    body_entry,
                    exit,
                    increment,
                };
            }
        }

        if let [(latch, _)] = back_edges {
            let latch_node = self.graph.node(*latch);
            if let Terminator::Branch {
                condition,
                then_target,
                else_target,
            } = &latch_node.terminator
            {
                let single_entry = *latch == header
                    || latch_node.statements.is_empty()
                    || self.analyzer.predecessors(*latch).len() == 1;
                if single_entry {
                    if *then_target == header && !body.contains(else_target) {
                        return LoopShape::DoWhile {
                            latch: *latch,
                            condition: condition.clone(),
                            exit: *else_target,
                        };
                    }
                    if *else_target == header && !body.contains(then_target) {
                        return LoopShape::DoWhile {
                            latch: *latch,
                            condition: condition.clone().negate(),
                            exit: *then_target,
                        };
                    }
                }
            }
        }
        LoopShape::Infinite
    }

    /// A latch that only updates locals and jumps back: the `for` increment
    fn is_increment_block(&self, latch: NodeIndex, header: NodeIndex, condition: &Expr) -> bool {
        let node = self.graph.node(latch);
        if node.terminator != Terminator::Goto(header)
            || node.statements.is_empty()
            || node.statements.len() > MAX_FOR_INCREMENTS
            || node.handler_of.is_some()
        {
            return false;
        }
        let targets: Vec<LocalId> = node
            .statements
            .iter()
            .filter_map(assigned_local)
            .collect();
        if targets.len() != node.statements.len() {
            return false;
        }
        let shared = self.analyzer.predecessors(latch).len() > 1;
        shared || targets.iter().any(|t| condition.reads_local(*t))
    }

    /// `i = 0` right before the loop, assigning a local the increment updates
    fn take_initializer(&mut self, latch: NodeIndex, out: &mut Vec<StmtId>) -> Option<StmtId> {
        let updated: Vec<LocalId> = self
            .graph
            .node(latch)
            .statements
            .iter()
            .filter_map(assigned_local)
            .collect();
        let position = out.iter().rposition(|id| !matches!(self.ast[*id], Stmt::Nop))?;
        let id = out[position];
        let Stmt::Expr(Expr::Assign { target, value }) = &self.ast[id] else {
            return None;
        };
        let local = target.as_local()?;
        if !updated.contains(&local) || value.reads_local(local) {
            return None;
        }
        out.remove(position);
        Some(id)
    }

    /// Distinct blocks outside the body that the body jumps to, in IL order
    fn loop_exits(&self, body: &HashSet<NodeIndex>) -> Vec<NodeIndex> {
        let mut members: Vec<NodeIndex> = body.iter().copied().collect();
        members.sort_by_key(|n| (self.offset_of(*n), n.index()));
        let mut exits = Vec::new();
        for node in members {
            for succ in self.graph.successors(node) {
                if !body.contains(&succ) && !self.graph.node(succ).removed && !exits.contains(&succ) {
                    exits.push(succ);
                }
            }
        }
        exits.sort_by_key(|n| (self.offset_of(*n), n.index()));
        exits
    }

    /// Exit regions entered only from the loop that never come back to
    /// shared code; they are structured inside the body
    fn owned_exit_blocks(
        &self,
        header: NodeIndex,
        body: &HashSet<NodeIndex>,
        exits: &[NodeIndex],
        primary: Option<NodeIndex>,
    ) -> HashSet<NodeIndex> {
        let mut owned = HashSet::new();
        for &exit in exits {
            if Some(exit) == primary {
                continue;
            }
            let mut region = HashSet::new();
            let mut work = vec![exit];
            let mut closed = true;
            while let Some(node) = work.pop() {
                if !region.insert(node) {
                    continue;
                }
                if region.len() > MAX_OWNED_EXIT_REGION
                    || body.contains(&node)
                    || Some(node) == primary
                    || !self.analyzer.strictly_dominates(header, node)
                    || self.graph.node(node).handler_of.is_some()
                {
                    closed = false;
                    break;
                }
                work.extend(self.graph.successors(node));
            }
            let entered_from_loop = region.iter().all(|n| {
                self.analyzer
                    .predecessors(*n)
                    .iter()
                    .all(|p| body.contains(p) || region.contains(p))
            });
            if closed && entered_from_loop {
                owned.extend(region);
            }
        }
        owned
    }

    /// Exit with the most edges from the body, earliest first on ties
    fn busiest_exit(&self, body: &HashSet<NodeIndex>, exits: &[NodeIndex]) -> Option<NodeIndex> {
        exits.iter().copied().max_by(|a, b| {
            let count = |x: NodeIndex| {
                self.analyzer
                    .predecessors(x)
                    .iter()
                    .filter(|p| body.contains(p))
                    .count()
            };
            count(*a)
                .cmp(&count(*b))
                .then_with(|| self.offset_of(*b).cmp(&self.offset_of(*a)))
        })
    }

    /// `if (flag == k) { .. }` for every secondary exit
    fn emit_flag_dispatch(
        &mut self,
        flag: LocalId,
        exits: &[NodeIndex],
        out: &mut Vec<StmtId>,
    ) -> Result<()> {
        for (i, &target) in exits.iter().enumerate() {
            let condition = Expr::binary(BinaryOp::Eq, Expr::Local(flag), Expr::int(i as i64 + 1));
            let block = self.region_block(target, None)?;
            let stmt = self.ast.alloc(Stmt::If {
                condition,
                then_branch: block,
                else_branch: None,
            });
            out.push(stmt);
        }
        Ok(())
    }
}

fn assigned_local(statement: &Expr) -> Option<LocalId> {
    match statement {
        Expr::Assign { target, .. }
        | Expr::CompoundAssign { target, .. }
        | Expr::IncDec { target, .. } => target.as_local(),
        _ => None,
    }
}
