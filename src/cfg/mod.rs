//! Control Flow Graph (CFG) module
//!
//! This module handles building and analyzing control flow graphs from CIL
//! instruction streams, and the lifted flow graph the structurer consumes.

pub mod analysis;
pub mod block;
pub mod builder;
pub mod conditional_analysis;
pub mod exception_analysis;
pub mod flow;
pub mod switch_analysis;
pub mod visualization;

pub use block::{Block, Terminal};
pub use flow::{FlowGraph, FlowNode, Terminator};

use crate::error::{Error, Result};
use crate::il::Offset;
use crate::metadata::{ExceptionRegion, InstructionStream};
use analysis::{LoopAnalysis, PostDominatorAnalysis, Shape};
use petgraph::algo::dominators::Dominators;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

/// Edge kind in the control flow graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeKind {
    /// Unconditional jump
    Uncond,
    /// Conditional jump (true branch)
    True,
    /// Conditional jump (false branch)
    False,
    /// Switch table entry
    Switch(usize),
    /// Fallthrough past a switch table
    Default,
    /// Fallthrough to next block
    Fall,
    /// `leave` out of a protected region or handler
    Leave,
    /// Protected block to the entry of its handler
    ExceptionHandler,
}

/// Coarse origin of an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOrigin {
    Branch,
    Fallthrough,
    Jump,
    ExceptionHandler,
}

impl EdgeKind {
    pub fn origin(&self) -> EdgeOrigin {
        match self {
            EdgeKind::True | EdgeKind::False | EdgeKind::Switch(_) | EdgeKind::Default => {
                EdgeOrigin::Branch
            }
            EdgeKind::Fall => EdgeOrigin::Fallthrough,
            EdgeKind::Uncond | EdgeKind::Leave => EdgeOrigin::Jump,
            EdgeKind::ExceptionHandler => EdgeOrigin::ExceptionHandler,
        }
    }

    /// Exception edges annotate blocks; they are never ordinary branches
    pub fn is_structural(&self) -> bool {
        self.origin() != EdgeOrigin::ExceptionHandler
    }
}

/// Block graph of one method body
#[derive(Debug)]
pub struct Cfg {
    /// The underlying graph
    graph: DiGraph<Block, EdgeKind>,
    entry: NodeIndex,
    exit: NodeIndex,
    regions: Vec<ExceptionRegion>,
    block_starts: HashMap<Offset, NodeIndex>,
}

impl Cfg {
    /// Build the CFG of a method body
    pub fn build(stream: &InstructionStream, regions: &[ExceptionRegion]) -> Result<Self> {
        let mut builder = builder::CfgBuilder::new(stream, regions);
        let graph = builder.build()?;
        let exit = builder
            .exit_node()
            .ok_or_else(|| Error::internal("CFG built without exit node"))?;
        let block_starts = builder.block_starts().clone();
        let entry = stream
            .instructions
            .first()
            .and_then(|i| block_starts.get(&i.offset).copied())
            .ok_or_else(|| Error::invalid_flow(0, "method has no entry block"))?;
        Ok(Self {
            graph,
            entry,
            exit,
            regions: regions.to_vec(),
            block_starts,
        })
    }

    /// Get the underlying graph
    pub fn graph(&self) -> &DiGraph<Block, EdgeKind> {
        &self.graph
    }

    pub fn entry(&self) -> NodeIndex {
        self.entry
    }

    pub fn exit(&self) -> NodeIndex {
        self.exit
    }

    pub fn regions(&self) -> &[ExceptionRegion] {
        &self.regions
    }

    /// Block starting at an IL offset
    pub fn block_at(&self, offset: Offset) -> Option<NodeIndex> {
        self.block_starts.get(&offset).copied()
    }

    /// Number of real blocks (EXIT excluded)
    pub fn block_count(&self) -> usize {
        self.graph.node_count() - 1
    }

    /// Real blocks in offset order
    pub fn blocks_in_order(&self) -> Vec<NodeIndex> {
        let mut nodes: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|n| !self.graph[*n].is_exit())
            .collect();
        nodes.sort_by_key(|n| self.graph[*n].start_offset);
        nodes
    }

    /// Structural successors with their edge kinds
    pub fn successors(&self, node: NodeIndex) -> Vec<(NodeIndex, EdgeKind)> {
        let mut out: Vec<(NodeIndex, EdgeKind)> = self
            .graph
            .edges(node)
            .filter(|e| e.weight().is_structural())
            .map(|e| (e.target(), e.weight().clone()))
            .collect();
        out.reverse();
        out
    }

    /// Graph with exception edges removed, rooted at the entry and handlers
    pub fn structural_shape(&self) -> Shape {
        let mut shape = Shape::with_capacity(self.graph.node_count(), self.graph.edge_count());
        for _ in self.graph.node_indices() {
            shape.add_node(());
        }
        for edge in self.graph.edge_references() {
            if edge.weight().is_structural() {
                shape.add_edge(edge.source(), edge.target(), ());
            }
        }
        shape
    }

    /// Analyze dominators for the CFG
    pub fn analyze_dominators(&self) -> Dominators<NodeIndex> {
        analysis::analyze_dominators(&self.structural_shape(), self.entry)
    }

    /// Post-dominators relative to EXIT
    pub fn analyze_post_dominators(&self) -> PostDominatorAnalysis {
        analysis::analyze_post_dominators(&self.structural_shape())
    }

    /// Find natural loops in the CFG
    pub fn find_natural_loops(&self) -> LoopAnalysis {
        let shape = self.structural_shape();
        let doms = analysis::analyze_dominators(&shape, self.entry);
        analysis::find_natural_loops(&shape, self.entry, &doms)
    }

    /// Export CFG to DOT format for visualization
    pub fn to_dot(&self) -> String {
        visualization::generate_dot(&self.graph, &visualization::DotOptions::default())
    }
}
