//! Exception regions to `try`/`catch`/`finally`
//!
//! The protected blocks and every handler are structured as separate
//! regions ending at the `leave` continuation. `finally` handlers end at
//! `endfinally`. Filter clauses are written as plain catches.

use super::scope::{RangeScope, Scope};
use super::Structurer;
use crate::ast::{CatchClause, Expr, LocalId, LocalKind, Stmt, StmtId, TryConstruct, TypeRef};
use crate::cfg::exception_analysis::is_catch;
use crate::cfg::flow::Terminator;
use crate::error::{Error, Result};
use crate::metadata::{ExceptionRegionKind, TypeSig};
use petgraph::graph::NodeIndex;
use std::collections::HashMap;

impl<'a, 'r> Structurer<'a, 'r> {
    /// Try region starting at `node` that is not structured yet. A loop
    /// whose body reaches past the protected range is structured first.
    pub(super) fn try_region_at(&self, node: NodeIndex) -> Option<usize> {
        if !self.is_unvisited(node) {
            return None;
        }
        let region = self
            .exceptions
            .region_starting_at(self.offset_of(node), &self.active_regions)?;
        if self.is_pending_loop_header(node) {
            let range = &self.exceptions.regions[region];
            let contained = self.analyzer.loop_for_header(node).map_or(true, |l| {
                l.body_nodes.iter().all(|n| range.protects(self.offset_of(*n)))
            });
            if !contained {
                return None;
            }
        }
        Some(region)
    }

    pub(super) fn structure_try(
        &mut self,
        region: usize,
        start: NodeIndex,
        out: &mut Vec<StmtId>,
    ) -> Result<Option<NodeIndex>> {
        let group = self.exceptions.regions[region].clone();
        let continuation = self.leave_continuation(&group.handlers, group.try_offset, group.try_end);
        log::debug!(
            "try at IL_{:04x}..IL_{:04x}: {} handlers, continues at {:?}",
            group.try_offset,
            group.try_end,
            group.handlers.len(),
            continuation.map(|c| self.offset_of(c))
        );

        self.reserve_label(start, out);
        self.active_regions.push(region);
        let built = self.try_parts(&group.handlers, group.try_offset, group.try_end, start, continuation);
        self.active_regions.retain(|r| *r != region);
        let (body, catches, finally) = built?;

        let stmt = self.ast.alloc(Stmt::Try(TryConstruct {
            body,
            catches,
            finally,
        }));
        out.push(stmt);
        Ok(continuation)
    }

    fn try_parts(
        &mut self,
        handlers: &[usize],
        try_offset: u32,
        try_end: u32,
        start: NodeIndex,
        continuation: Option<NodeIndex>,
    ) -> Result<(StmtId, Vec<CatchClause>, Option<StmtId>)> {
        let mut items = Vec::new();
        self.scopes.push(Scope::Protected(RangeScope {
            start: try_offset,
            end: try_end,
        }));
        let result = self.continue_from(start, continuation, &mut items);
        self.scopes.pop();
        result?;
        let body = self.ast.block(items);

        let mut catches = Vec::new();
        let mut finally = None;
        for &index in handlers {
            let clause = self.regions[index].clone();
            let Some(&entry) = self.handler_entries.get(&index) else {
                return Err(Error::invalid_flow(
                    clause.handler_offset,
                    "exception handler has no entry block",
                ));
            };
            let variable = if is_catch(&clause) {
                self.bind_catch_variable(entry)
            } else {
                None
            };

            let mut items = Vec::new();
            self.scopes.push(Scope::Protected(RangeScope {
                start: clause.handler_offset,
                end: clause.handler_end(),
            }));
            let handler_exit = if is_catch(&clause) { continuation } else { None };
            let result = self.structure_from(entry, handler_exit, &mut items);
            self.scopes.pop();
            result?;
            let block = self.ast.block(items);

            match clause.kind {
                ExceptionRegionKind::Catch { exception_type } => catches.push(CatchClause {
                    exception_type: exception_type
                        .map(|t| TypeRef::from_sig(&TypeSig::Named(t), &self.resolver)),
                    variable,
                    body: block,
                }),
                ExceptionRegionKind::Filter { .. } => catches.push(CatchClause {
                    exception_type: None,
                    variable,
                    body: block,
                }),
                ExceptionRegionKind::Finally | ExceptionRegionKind::Fault => finally = Some(block),
            }
        }
        Ok((body, catches, finally))
    }

    /// Most common `leave` target outside the protected range and handlers
    fn leave_continuation(&self, handlers: &[usize], try_offset: u32, try_end: u32) -> Option<NodeIndex> {
        let inside = |offset: u32| {
            (try_offset..try_end).contains(&offset)
                || handlers
                    .iter()
                    .any(|h| self.regions[*h].handler_contains(offset))
        };
        let mut counts: HashMap<NodeIndex, usize> = HashMap::new();
        for node in self.graph.live_nodes() {
            let flow = self.graph.node(node);
            if !inside(flow.offset) {
                continue;
            }
            if let Terminator::Leave(target) = flow.terminator {
                if !inside(self.offset_of(target)) {
                    *counts.entry(target).or_default() += 1;
                }
            }
        }
        counts.into_iter().max_by(|(a, ca), (b, cb)| {
            ca.cmp(cb)
                .then_with(|| self.offset_of(*b).cmp(&self.offset_of(*a)))
        }).map(|(n, _)| n)
    }

    /// The variable a catch clause binds: the local the handler stores the
    /// exception into first, or the exception value itself when it is used
    fn bind_catch_variable(&mut self, entry: NodeIndex) -> Option<LocalId> {
        let exception = |context: &crate::ast::MethodContext, e: &Expr| {
            e.as_local()
                .filter(|l| matches!(context.local(*l).kind, LocalKind::Exception))
        };
        let stored = match self.graph.node(entry).statements.first() {
            Some(Expr::Assign { target, value }) => target
                .as_local()
                .filter(|_| exception(&*self.context, value).is_some()),
            _ => None,
        };
        if let Some(variable) = stored {
            self.graph.node_mut(entry).statements.remove(0);
            return Some(variable);
        }
        self.context
            .locals
            .iter()
            .enumerate()
            .map(|(i, _)| LocalId(i as u32))
            .filter(|l| matches!(self.context.local(*l).kind, LocalKind::Exception))
            .find(|l| self.graph.node(entry).reads_local(*l))
    }
}
