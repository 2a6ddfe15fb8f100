//! Control flow structuring
//!
//! The structurer walks the lifted flow graph from the entry and rebuilds
//! nested statements:
//! - two-way branches become `if`/`else` (see [`conditional_converter`])
//! - natural loops become `while`, `do`/`while`, `for` or `while (true)`
//!   (see [`loop_converter`])
//! - recognized dispatch becomes `switch` (see [`switch_converter`])
//! - exception regions become `try`/`catch`/`finally`
//!   (see [`exception_converter`])
//!
//! Blocks are visited once. A block reached again, or reached from a place
//! where no structured jump can express the edge, gets a label and a `goto`.

// Infrastructure modules
pub mod region_analyzer;
pub mod scope;

// Control flow converters
pub mod block_converter;
pub mod conditional_converter;
pub mod exception_converter;
pub mod loop_converter;
pub mod switch_converter;

pub use region_analyzer::RegionAnalyzer;
pub use scope::{LoopScope, RangeScope, Scope, ScopeStack, SwitchScope, Transfer};

use crate::ast::{Ast, Label, MethodContext, Stmt, StmtId};
use crate::cfg::analysis::VisitState;
use crate::cfg::exception_analysis::{analyze_exception_regions, ExceptionAnalysis};
use crate::cfg::flow::FlowGraph;
use crate::error::{Error, Result};
use crate::metadata::{ExceptionRegion, ResolverContext};
use petgraph::graph::NodeIndex;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Statement tree of one method, before the optimization passes
#[derive(Debug)]
pub struct StructuredBody {
    pub ast: Ast,
    pub body: StmtId,
    pub diagnostics: Vec<Error>,
}

/// Structure a lifted method body
pub fn structure_method(
    graph: FlowGraph,
    context: &mut MethodContext,
    resolver: ResolverContext<'_>,
    regions: &[ExceptionRegion],
) -> Result<StructuredBody> {
    Structurer::new(graph, context, resolver, regions).run()
}

pub struct Structurer<'a, 'r> {
    graph: FlowGraph,
    context: &'a mut MethodContext,
    resolver: ResolverContext<'r>,
    regions: &'a [ExceptionRegion],
    analyzer: RegionAnalyzer,
    exceptions: ExceptionAnalysis,
    /// Exception clause index -> first block of its handler
    handler_entries: HashMap<usize, NodeIndex>,
    labels: HashMap<NodeIndex, Label>,
    ast: Ast,
    state: Vec<VisitState>,
    scopes: ScopeStack,
    active_regions: Vec<usize>,
    /// Placeholder slot in front of each emitted block, turned into a label
    /// when some `goto` targets the block
    label_slots: HashMap<NodeIndex, StmtId>,
    goto_targets: BTreeSet<NodeIndex>,
    /// Latches whose terminator became a loop condition or increment
    consumed: HashSet<NodeIndex>,
    /// Return/throw blocks written out as copies at every jump
    duplicated: HashSet<NodeIndex>,
    diagnostics: Vec<Error>,
}

impl<'a, 'r> Structurer<'a, 'r> {
    pub fn new(
        graph: FlowGraph,
        context: &'a mut MethodContext,
        resolver: ResolverContext<'r>,
        regions: &'a [ExceptionRegion],
    ) -> Self {
        let analyzer = RegionAnalyzer::new(&graph);
        let exceptions = analyze_exception_regions(regions);

        let mut handler_entries = HashMap::new();
        let mut labels = HashMap::new();
        let mut seen_offsets = HashSet::new();
        for node in graph.live_nodes() {
            let flow = graph.node(node);
            if let Some(region) = flow.handler_of {
                handler_entries.insert(region, node);
            }
            let label = if seen_offsets.insert(flow.offset) {
                Label(flow.offset)
            } else {
                Label(Label::SYNTHETIC | node.index() as u32)
            };
            labels.insert(node, label);
        }

        let state = vec![VisitState::Unvisited; graph.nodes.len()];
        Self {
            graph,
            context,
            resolver,
            regions,
            analyzer,
            exceptions,
            handler_entries,
            labels,
            ast: Ast::new(),
            state,
            scopes: ScopeStack::default(),
            active_regions: Vec::new(),
            label_slots: HashMap::new(),
            goto_targets: BTreeSet::new(),
            consumed: HashSet::new(),
            duplicated: HashSet::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn run(mut self) -> Result<StructuredBody> {
        let mut items = Vec::new();
        let entry = self.graph.entry;
        self.continue_from(entry, None, &mut items)?;
        self.emit_pending_gotos(&mut items)?;
        self.report_unreachable(&mut items);
        self.place_labels()?;
        if self.scopes.depth() != 0 {
            return Err(Error::internal("unbalanced scope stack after structuring"));
        }

        let body = self.ast.block(items);
        log::debug!(
            "Structured {}: {} statements, {} labels, {} diagnostics",
            self.context.name,
            self.ast.len(),
            self.goto_targets.len(),
            self.diagnostics.len()
        );
        Ok(StructuredBody {
            ast: self.ast,
            body,
            diagnostics: self.diagnostics,
        })
    }

    /// Blocks only reached by `goto` are appended after the structured body.
    /// The body never completes normally, so nothing falls into them.
    fn emit_pending_gotos(&mut self, items: &mut Vec<StmtId>) -> Result<()> {
        loop {
            let pending = self
                .goto_targets
                .iter()
                .copied()
                .find(|n| self.state[n.index()] == VisitState::Unvisited);
            let Some(node) = pending else {
                return Ok(());
            };
            log::trace!("Appending goto target {}", self.label_of(node));
            self.continue_from(node, None, items)?;
        }
    }

    /// Every live block is emitted, copied at its jumps, or replaced by a
    /// stub comment with a diagnostic
    fn report_unreachable(&mut self, items: &mut Vec<StmtId>) {
        let reachable = self.graph.reachable();
        for node in self.graph.live_nodes() {
            if self.state[node.index()] != VisitState::Unvisited || self.duplicated.contains(&node) {
                continue;
            }
            let offset = self.graph.node(node).offset;
            let error = Error::UnreachableBlock { offset };
            if reachable[node.index()] {
                log::warn!(
                    "{}: block IL_{:04x} is reachable but was not structured",
                    self.context.name,
                    offset
                );
            } else {
                log::warn!("{}: {}", self.context.name, error);
            }
            self.diagnostics.push(error);
            let comment = self
                .ast
                .alloc(Stmt::Comment(format!("unreachable code at IL_{:04x}", offset)));
            items.push(comment);
        }
    }

    fn place_labels(&mut self) -> Result<()> {
        for node in self.goto_targets.clone() {
            let label = self.label_of(node);
            let Some(slot) = self.label_slots.get(&node).copied() else {
                return Err(Error::internal(format!(
                    "no position for label {} in {}",
                    label, self.context.name
                )));
            };
            self.ast.replace(slot, Stmt::Label(label));
        }
        Ok(())
    }

    pub(super) fn label_of(&self, node: NodeIndex) -> Label {
        self.labels
            .get(&node)
            .copied()
            .unwrap_or(Label(Label::SYNTHETIC | node.index() as u32))
    }

    pub(super) fn offset_of(&self, node: NodeIndex) -> u32 {
        self.graph.node(node).offset
    }

    pub(super) fn is_unvisited(&self, node: NodeIndex) -> bool {
        self.state[node.index()] == VisitState::Unvisited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::flow::{FlowNode, Terminator};
    use crate::error::ErrorKind;
    use crate::metadata::{InMemoryMetadata, InstructionStream, MethodId};

    fn n(i: usize) -> NodeIndex {
        NodeIndex::new(i)
    }

    fn context() -> MethodContext {
        MethodContext::new(&InstructionStream {
            method: MethodId(1),
            name: "C::M".into(),
            instructions: Vec::new(),
            locals: Vec::new(),
            parameters: Vec::new(),
            has_this: false,
            returns_value: false,
            code_size: 8,
        })
    }

    fn straight_line() -> FlowGraph {
        FlowGraph {
            nodes: vec![
                FlowNode::new(0, vec![], Terminator::Goto(n(1))),
                FlowNode::new(4, vec![], Terminator::Return(None)),
            ],
            entry: n(0),
        }
    }

    #[test]
    fn reachable_block_left_unvisited_gets_a_stub() {
        let metadata = InMemoryMetadata::new();
        let mut context = context();
        let resolver = ResolverContext::new(&metadata, &metadata);
        let mut structurer = Structurer::new(straight_line(), &mut context, resolver, &[]);
        structurer.state[0] = VisitState::Structured;

        let mut items = Vec::new();
        structurer.report_unreachable(&mut items);
        assert_eq!(items.len(), 1);
        assert_eq!(
            structurer.ast[items[0]],
            Stmt::Comment("unreachable code at IL_0004".into())
        );
        assert!(matches!(
            structurer.diagnostics[..],
            [Error::UnreachableBlock { offset: 4 }]
        ));
    }

    #[test]
    fn copied_exit_is_not_reported() {
        let metadata = InMemoryMetadata::new();
        let mut context = context();
        let resolver = ResolverContext::new(&metadata, &metadata);
        let mut structurer = Structurer::new(straight_line(), &mut context, resolver, &[]);
        structurer.state[0] = VisitState::Structured;
        structurer.duplicated.insert(n(1));

        let mut items = Vec::new();
        structurer.report_unreachable(&mut items);
        assert!(items.is_empty());
        assert!(structurer.diagnostics.is_empty());
    }

    #[test]
    fn goto_without_label_position_is_an_internal_error() {
        let metadata = InMemoryMetadata::new();
        let mut context = context();
        let resolver = ResolverContext::new(&metadata, &metadata);
        let mut structurer = Structurer::new(straight_line(), &mut context, resolver, &[]);
        structurer.goto_targets.insert(n(1));

        let error = structurer.place_labels().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Internal);
    }
}
