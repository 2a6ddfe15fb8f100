//! Block sequencing
//!
//! A region is a run of blocks followed until control leaves it: through a
//! jump the enclosing scopes can express, or by reaching the region's exit.
//! [`Structurer::classify`] decides, for each edge, whether the target is
//! structured in place or reached through `break`/`continue`/`goto`.

use super::scope::{Scope, Transfer};
use super::Structurer;
use crate::ast::{Expr, Stmt, StmtId};
use crate::cfg::analysis::VisitState;
use crate::cfg::flow::Terminator;
use crate::error::{Error, Result};
use petgraph::graph::NodeIndex;

impl<'a, 'r> Structurer<'a, 'r> {
    /// Structure blocks starting at `start` until control leaves the region
    pub(super) fn structure_region(
        &mut self,
        start: NodeIndex,
        exit: Option<NodeIndex>,
        out: &mut Vec<StmtId>,
    ) -> Result<()> {
        let mut current = Some(start);
        while let Some(node) = current {
            current = match self.classify(node, exit) {
                Transfer::Inline => self.emit_node(node, exit, out)?,
                transfer => {
                    self.emit_transfer(transfer, out);
                    None
                }
            };
        }
        Ok(())
    }

    /// Like [`Self::structure_region`], but a section head of the enclosing
    /// switch is structured instead of jumped to
    pub(super) fn structure_from(
        &mut self,
        start: NodeIndex,
        exit: Option<NodeIndex>,
        out: &mut Vec<StmtId>,
    ) -> Result<()> {
        match self.classify(start, exit) {
            Transfer::Inline => {}
            Transfer::Goto(target) if self.is_unvisited(target) && self.is_section_head(target) => {}
            transfer => {
                self.emit_transfer(transfer, out);
                return Ok(());
            }
        }
        self.continue_from(start, exit, out)
    }

    /// Emit `start` unconditionally, then follow the region
    pub(super) fn continue_from(
        &mut self,
        start: NodeIndex,
        exit: Option<NodeIndex>,
        out: &mut Vec<StmtId>,
    ) -> Result<()> {
        if let Some(next) = self.emit_node(start, exit, out)? {
            self.structure_region(next, exit, out)?;
        }
        Ok(())
    }

    /// Structure a region into a fresh block statement
    pub(super) fn region_block(
        &mut self,
        start: NodeIndex,
        exit: Option<NodeIndex>,
    ) -> Result<StmtId> {
        let mut items = Vec::new();
        self.structure_region(start, exit, &mut items)?;
        Ok(self.ast.block(items))
    }

    /// Decide how control gets from the current position to `target`
    pub(super) fn classify(&self, target: NodeIndex, exit: Option<NodeIndex>) -> Transfer {
        if Some(target) == exit {
            return Transfer::End;
        }
        if let Some(scope) = self.scopes.innermost_breakable() {
            if self.scopes.break_target() == Some(target) {
                return Transfer::Break;
            }
            if let Scope::Loop(l) = scope {
                if let Some((flag, value)) = l.flag_value(target) {
                    return Transfer::FlagBreak(flag, value);
                }
            }
        }
        if let Some(l) = self.scopes.innermost_loop() {
            if l.continue_target == target {
                return Transfer::Continue;
            }
        }
        if self.is_section_head(target) {
            return Transfer::Goto(target);
        }

        let jump = if self.is_duplicable_exit(target) {
            Transfer::Duplicate(target)
        } else {
            Transfer::Goto(target)
        };
        if !self.is_unvisited(target) || self.consumed.contains(&target) {
            return jump;
        }
        let outside = match self.scopes.innermost_container() {
            Some(Scope::Loop(l)) => !l.contains(target),
            Some(Scope::Protected(range)) => !range.contains(self.offset_of(target)),
            _ => false,
        };
        if outside {
            return jump;
        }
        Transfer::Inline
    }

    pub(super) fn is_section_head(&self, node: NodeIndex) -> bool {
        self.scopes
            .innermost_switch()
            .map_or(false, |s| s.section_heads.contains(&node))
    }

    /// Return or throw of a plain value with nothing else in the block
    pub(super) fn is_duplicable_exit(&self, node: NodeIndex) -> bool {
        let flow = self.graph.node(node);
        if flow.removed || flow.handler_of.is_some() || !flow.statements.is_empty() {
            return false;
        }
        let simple = |e: &Expr| matches!(e, Expr::Local(_) | Expr::Arg(_) | Expr::Const(_) | Expr::This);
        match &flow.terminator {
            Terminator::Return(None) => true,
            Terminator::Return(Some(value)) | Terminator::Throw(Some(value)) => simple(value),
            _ => false,
        }
    }

    pub(super) fn emit_transfer(&mut self, transfer: Transfer, out: &mut Vec<StmtId>) {
        let stmt = match transfer {
            Transfer::End => return,
            Transfer::Break => Stmt::Break,
            Transfer::Continue => Stmt::Continue,
            Transfer::FlagBreak(flag, value) => {
                let set = self
                    .ast
                    .alloc(Stmt::Expr(Expr::assign(Expr::Local(flag), Expr::int(value))));
                out.push(set);
                Stmt::Break
            }
            Transfer::Duplicate(target) => match self.graph.node(target).terminator.clone() {
                Terminator::Return(value) => {
                    self.duplicated.insert(target);
                    Stmt::Return(value)
                }
                Terminator::Throw(value) => {
                    self.duplicated.insert(target);
                    Stmt::Throw(value)
                }
                _ => self.goto(target),
            },
            Transfer::Goto(target) => self.goto(target),
            Transfer::Inline => return,
        };
        let id = self.ast.alloc(stmt);
        out.push(id);
    }

    fn goto(&mut self, target: NodeIndex) -> Stmt {
        self.goto_targets.insert(target);
        Stmt::Goto(self.label_of(target))
    }

    /// Structure the construct starting at `node`; returns where the
    /// enclosing sequence continues
    pub(super) fn emit_node(
        &mut self,
        node: NodeIndex,
        exit: Option<NodeIndex>,
        out: &mut Vec<StmtId>,
    ) -> Result<Option<NodeIndex>> {
        if let Some(region) = self.try_region_at(node) {
            return self.structure_try(region, node, out);
        }
        if self.is_pending_loop_header(node) {
            return self.structure_loop(node, exit, out);
        }
        self.emit_block(node, exit, out)
    }

    /// Reserve the position a label for `node` would take
    pub(super) fn reserve_label(&mut self, node: NodeIndex, out: &mut Vec<StmtId>) {
        if !self.label_slots.contains_key(&node) {
            let slot = self.ast.alloc(Stmt::Nop);
            self.label_slots.insert(node, slot);
            out.push(slot);
        }
    }

    /// Statements of one block, then its terminator
    pub(super) fn emit_block(
        &mut self,
        node: NodeIndex,
        exit: Option<NodeIndex>,
        out: &mut Vec<StmtId>,
    ) -> Result<Option<NodeIndex>> {
        if self.is_unvisited(node) {
            self.state[node.index()] = VisitState::Structured;
        }
        self.reserve_label(node, out);

        let flow = self.graph.node(node);
        let statements = flow.statements.clone();
        let terminator = flow.terminator.clone();
        let offset = flow.offset;
        for statement in statements {
            let id = self.ast.alloc(Stmt::Expr(statement));
            out.push(id);
        }
        if self.consumed.contains(&node) {
            return Ok(None);
        }

        match terminator {
            Terminator::Goto(target) | Terminator::Leave(target) => Ok(Some(target)),
            Terminator::Return(value) => {
                let id = self.ast.alloc(Stmt::Return(value));
                out.push(id);
                Ok(None)
            }
            Terminator::Throw(value) => {
                let id = self.ast.alloc(Stmt::Throw(value));
                out.push(id);
                Ok(None)
            }
            Terminator::EndFinally => Ok(None),
            Terminator::Branch {
                condition,
                then_target,
                else_target,
            } => self.structure_branch(node, condition, then_target, else_target, exit, out),
            Terminator::Switch(info) => self.structure_switch(node, *info, exit, out),
            Terminator::JumpTable { .. } => Err(Error::invalid_flow(
                offset,
                "jump table survived switch recognition",
            )),
        }
    }
}
