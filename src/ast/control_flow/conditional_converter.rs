//! Two-way branches to `if`/`else`
//!
//! The follow of a branch is where both arms meet again. The immediate
//! post-dominator is used when the enclosing region can still structure it;
//! otherwise arms that leave the region are ignored and the merge point is
//! taken from the dominance frontiers of the remaining arms.

use super::scope::Transfer;
use super::Structurer;
use crate::ast::{Expr, Stmt, StmtId};
use crate::error::Result;
use petgraph::graph::NodeIndex;
use std::collections::HashSet;

/// Give up proving an arm closed past this many blocks
const MAX_CLOSED_REGION: usize = 512;

impl<'a, 'r> Structurer<'a, 'r> {
    pub(super) fn structure_branch(
        &mut self,
        head: NodeIndex,
        condition: Expr,
        then_target: NodeIndex,
        else_target: NodeIndex,
        exit: Option<NodeIndex>,
        out: &mut Vec<StmtId>,
    ) -> Result<Option<NodeIndex>> {
        if then_target == else_target {
            if condition.has_side_effects() {
                let id = self.ast.alloc(Stmt::Expr(condition));
                out.push(id);
            }
            return Ok(Some(then_target));
        }

        // The arm laid out first reads as the then-branch
        let (mut condition, mut then_target, mut else_target) =
            if self.offset_of(else_target) < self.offset_of(then_target) {
                (condition.negate(), else_target, then_target)
            } else {
                (condition, then_target, else_target)
            };

        // An arm that is only a loop jump reads as `if (c) break;` and the
        // other arm continues in place
        for (jump, rest, test) in [
            (then_target, else_target, condition.clone()),
            (else_target, then_target, condition.clone().negate()),
        ] {
            let transfer = self.classify(jump, exit);
            if matches!(
                transfer,
                Transfer::Break | Transfer::Continue | Transfer::FlagBreak(..)
            ) && matches!(self.classify(rest, exit), Transfer::Inline)
            {
                let mut jump_items = Vec::new();
                self.emit_transfer(transfer, &mut jump_items);
                let block = self.ast.block(jump_items);
                self.emit_if(test, block, None, out);
                return Ok(Some(rest));
            }
        }

        let follow = self.find_follow(head, &[then_target, else_target], exit);
        if follow == Some(then_target) {
            std::mem::swap(&mut then_target, &mut else_target);
            condition = condition.negate();
        }
        let arm_exit = follow.or(exit);
        log::trace!(
            "if at IL_{:04x}: then IL_{:04x}, else IL_{:04x}, follow {:?}",
            self.offset_of(head),
            self.offset_of(then_target),
            self.offset_of(else_target),
            follow.map(|f| self.offset_of(f))
        );

        let then_block = self.region_block(then_target, arm_exit)?;
        let else_block = if Some(else_target) == follow {
            None
        } else {
            Some(self.region_block(else_target, arm_exit)?)
        };
        self.emit_if(condition, then_block, else_block, out);
        Ok(follow)
    }

    /// Append an `if`, dropping empty arms and hoisting the else-branch when
    /// the then-branch never completes
    pub(super) fn emit_if(
        &mut self,
        condition: Expr,
        then_block: StmtId,
        else_block: Option<StmtId>,
        out: &mut Vec<StmtId>,
    ) {
        let else_block = else_block.filter(|e| !self.is_empty_block(*e));
        let (condition, then_block, else_block) = match else_block {
            Some(e) if self.is_empty_block(then_block) => (condition.negate(), e, None),
            _ => (condition, then_block, else_block),
        };
        if self.is_empty_block(then_block) {
            if condition.has_side_effects() {
                let id = self.ast.alloc(Stmt::Expr(condition));
                out.push(id);
            }
            return;
        }

        let hoist = else_block.filter(|_| !self.ast.can_complete(then_block));
        let stmt = self.ast.alloc(Stmt::If {
            condition,
            then_branch: then_block,
            else_branch: if hoist.is_some() { None } else { else_block },
        });
        out.push(stmt);
        if let Some(e) = hoist {
            out.extend(self.ast.as_list(e));
        }
    }

    /// Block without any statement besides label placeholders
    pub(super) fn is_empty_block(&self, id: StmtId) -> bool {
        self.ast
            .as_list(id)
            .iter()
            .all(|i| matches!(self.ast[*i], Stmt::Nop))
    }

    /// Where control continues after a construct whose arms start at `targets`
    pub(super) fn find_follow(
        &self,
        head: NodeIndex,
        targets: &[NodeIndex],
        exit: Option<NodeIndex>,
    ) -> Option<NodeIndex> {
        let ipdom = self
            .analyzer
            .immediate_post_dominator(head)
            .filter(|p| !self.graph.node(*p).removed);
        if let Some(p) = ipdom {
            if matches!(self.classify(p, exit), Transfer::End | Transfer::Inline) {
                return Some(p);
            }
        }

        let open: Vec<NodeIndex> = targets
            .iter()
            .copied()
            .filter(|t| !self.is_terminating(*t, exit))
            .collect();
        match open.as_slice() {
            [] => ipdom,
            [single] => Some(*single),
            _ => self.frontier_follow(head, &open, exit).or(ipdom),
        }
    }

    /// Whether an arm starting at `start` never flows into code outside the
    /// blocks it dominates (it returns, throws or jumps out of the region)
    pub(super) fn is_terminating(&self, start: NodeIndex, exit: Option<NodeIndex>) -> bool {
        if !matches!(self.classify(start, exit), Transfer::Inline) {
            return true;
        }
        let mut seen = HashSet::new();
        let mut work = vec![start];
        while let Some(node) = work.pop() {
            if !seen.insert(node) {
                continue;
            }
            if seen.len() > MAX_CLOSED_REGION {
                return false;
            }
            for succ in self.graph.successors(node) {
                if !matches!(self.classify(succ, exit), Transfer::Inline) {
                    continue;
                }
                if !self.analyzer.dominates(start, succ) {
                    return false;
                }
                work.push(succ);
            }
        }
        true
    }

    /// Merge point among the dominance frontiers of the open arms
    fn frontier_follow(
        &self,
        head: NodeIndex,
        open: &[NodeIndex],
        exit: Option<NodeIndex>,
    ) -> Option<NodeIndex> {
        let (raw, candidates) = self.frontier_candidates(head, open, exit);
        if candidates.is_empty() {
            return exit.filter(|e| raw.contains(e));
        }
        if let Some(c) = candidates.iter().find(|c| {
            candidates
                .iter()
                .all(|o| o == *c || self.analyzer.post_dominates(**c, *o))
        }) {
            return Some(*c);
        }
        candidates.into_iter().max_by(|a, b| {
            let pa = self.analyzer.predecessors(*a).len();
            let pb = self.analyzer.predecessors(*b).len();
            pa.cmp(&pb)
                .then_with(|| self.offset_of(*b).cmp(&self.offset_of(*a)))
        })
    }

    /// Dominance frontiers of the open arms, and the blocks among them that
    /// `head` still dominates and that can be structured in place
    pub(super) fn frontier_candidates(
        &self,
        head: NodeIndex,
        open: &[NodeIndex],
        exit: Option<NodeIndex>,
    ) -> (Vec<NodeIndex>, Vec<NodeIndex>) {
        let mut raw: Vec<NodeIndex> = Vec::new();
        for &target in open {
            if self.analyzer.strictly_dominates(head, target) {
                raw.extend_from_slice(self.analyzer.frontier(target));
            } else {
                raw.push(target);
            }
        }
        raw.sort();
        raw.dedup();

        let candidates = raw
            .iter()
            .copied()
            .filter(|c| {
                *c != head
                    && !self.graph.node(*c).removed
                    && self.analyzer.strictly_dominates(head, *c)
                    && matches!(self.classify(*c, exit), Transfer::Inline)
            })
            .collect();
        (raw, candidates)
    }
}
