//! CFG builder module
//!
//! Splits an instruction stream into basic blocks at every leader and links
//! them by the kind of transfer that ends each block.

use crate::cfg::{Block, EdgeKind};
use crate::error::{Error, Result};
use crate::il::{Instruction, Offset, Opcode};
use crate::metadata::{ExceptionRegion, InstructionStream};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap, HashSet};

/// CFG builder for one method body
pub struct CfgBuilder<'a> {
    stream: &'a InstructionStream,
    regions: &'a [ExceptionRegion],
    /// Mapping from block start offset to node index
    block_starts: HashMap<Offset, NodeIndex>,
    /// Exit node for the current method
    exit_node: Option<NodeIndex>,
}

impl<'a> CfgBuilder<'a> {
    pub fn new(stream: &'a InstructionStream, regions: &'a [ExceptionRegion]) -> Self {
        CfgBuilder {
            stream,
            regions,
            block_starts: HashMap::new(),
            exit_node: None,
        }
    }

    /// Build the graph; malformed branch data aborts the method
    pub fn build(&mut self) -> Result<DiGraph<Block, EdgeKind>> {
        self.block_starts.clear();
        self.exit_node = None;

        let instructions = &self.stream.instructions;
        let mut graph = DiGraph::new();
        if instructions.is_empty() {
            return Err(Error::invalid_flow(0, "method body is empty"));
        }

        // Step 1: Every branch target must land on an instruction boundary
        self.validate_targets(instructions)?;

        // Step 2: Find leaders (basic block entry points)
        let leaders = self.find_leaders(instructions);

        // Step 3: Create basic blocks
        let blocks = self.create_blocks(instructions, &leaders);

        // Step 4: Add blocks to graph
        for block in blocks {
            self.add_block(&mut graph, block);
        }

        // Step 5: Add synthetic EXIT node
        let exit_node = graph.add_node(Block::new_exit());
        self.exit_node = Some(exit_node);

        // Step 6: Add edges between blocks and connect terminators to EXIT
        self.add_edges(&mut graph)?;

        // Step 7: Annotate protected blocks and add exception handler edges
        self.add_exception_handler_edges(&mut graph)?;

        log::debug!(
            "Built CFG for {}: {} blocks, {} edges",
            self.stream.name,
            graph.node_count() - 1,
            graph.edge_count()
        );
        Ok(graph)
    }

    pub fn exit_node(&self) -> Option<NodeIndex> {
        self.exit_node
    }

    pub fn block_starts(&self) -> &HashMap<Offset, NodeIndex> {
        &self.block_starts
    }

    fn validate_targets(&self, instructions: &[Instruction]) -> Result<()> {
        let starts: HashSet<Offset> = instructions.iter().map(|i| i.offset).collect();
        for insn in instructions {
            for target in insn.branch_targets() {
                if !starts.contains(&target) {
                    return Err(Error::invalid_flow(
                        insn.offset,
                        format!("branch target IL_{:04x} is not an instruction start", target),
                    ));
                }
            }
        }
        let code_end = self.stream.code_size;
        for region in self.regions {
            for boundary in [
                region.try_offset,
                region.try_end(),
                region.handler_offset,
                region.handler_end(),
            ] {
                if boundary != code_end && !starts.contains(&boundary) {
                    return Err(Error::invalid_flow(
                        boundary,
                        "exception region boundary is not an instruction start",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Find basic block leaders
    pub fn find_leaders(&self, instructions: &[Instruction]) -> BTreeSet<Offset> {
        let mut leaders = BTreeSet::new();
        leaders.insert(instructions[0].offset);

        for insn in instructions {
            if insn.is_block_end() {
                leaders.extend(insn.branch_targets());
                leaders.insert(insn.next_offset());
            }
        }

        for region in self.regions {
            leaders.insert(region.try_offset);
            leaders.insert(region.try_end());
            leaders.insert(region.handler_offset);
            leaders.insert(region.handler_end());
        }

        // Leaders past the last instruction start nothing
        let code_end = instructions
            .last()
            .map(|i| i.next_offset())
            .unwrap_or_default();
        leaders.retain(|&offset| offset < code_end);
        leaders
    }

    /// Create basic blocks from leaders
    pub fn create_blocks(
        &self,
        instructions: &[Instruction],
        leaders: &BTreeSet<Offset>,
    ) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut current: Vec<Instruction> = Vec::new();
        for insn in instructions {
            if leaders.contains(&insn.offset) && !current.is_empty() {
                let start = current[0].offset;
                blocks.push(Block::new(start, std::mem::take(&mut current)));
            }
            current.push(insn.clone());
        }
        if !current.is_empty() {
            let start = current[0].offset;
            blocks.push(Block::new(start, current));
        }
        blocks
    }

    fn add_block(&mut self, graph: &mut DiGraph<Block, EdgeKind>, block: Block) {
        let start = block.start_offset;
        let node = graph.add_node(block);
        self.block_starts.insert(start, node);
    }

    fn node_at(&self, offset: Offset, from: Offset) -> Result<NodeIndex> {
        self.block_starts.get(&offset).copied().ok_or_else(|| {
            Error::invalid_flow(from, format!("no block starts at IL_{:04x}", offset))
        })
    }

    fn add_edges(&self, graph: &mut DiGraph<Block, EdgeKind>) -> Result<()> {
        let exit = self
            .exit_node
            .ok_or_else(|| Error::internal("exit node missing"))?;
        let nodes: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|n| !graph[*n].is_exit())
            .collect();

        for node in nodes {
            let (last, next) = match graph[node].last_instruction() {
                Some(last) => (last.clone(), last.next_offset()),
                None => continue,
            };
            let fallthrough = || {
                self.block_starts.get(&next).copied().ok_or_else(|| {
                    Error::invalid_flow(last.offset, "control falls off the end of the method")
                })
            };

            match &last.opcode {
                Opcode::Br(target) => {
                    graph.add_edge(node, self.node_at(*target, last.offset)?, EdgeKind::Uncond);
                }
                Opcode::Leave(target) => {
                    graph.add_edge(node, self.node_at(*target, last.offset)?, EdgeKind::Leave);
                }
                Opcode::BrTrue(target) | Opcode::BrFalse(target) | Opcode::BranchCmp { target, .. } => {
                    graph.add_edge(node, self.node_at(*target, last.offset)?, EdgeKind::True);
                    graph.add_edge(node, fallthrough()?, EdgeKind::False);
                }
                Opcode::Switch(targets) => {
                    for (i, target) in targets.iter().enumerate() {
                        graph.add_edge(node, self.node_at(*target, last.offset)?, EdgeKind::Switch(i));
                    }
                    graph.add_edge(node, fallthrough()?, EdgeKind::Default);
                }
                Opcode::Ret | Opcode::Throw | Opcode::Rethrow | Opcode::EndFinally => {
                    graph.add_edge(node, exit, EdgeKind::Uncond);
                }
                _ => {
                    graph.add_edge(node, fallthrough()?, EdgeKind::Fall);
                }
            }
        }
        Ok(())
    }

    fn add_exception_handler_edges(&self, graph: &mut DiGraph<Block, EdgeKind>) -> Result<()> {
        for (index, region) in self.regions.iter().enumerate() {
            let handler = self.node_at(region.handler_offset, region.handler_offset)?;
            if graph[handler].handler_of.is_none() {
                graph[handler].handler_of = Some(index);
            }
            let protected: Vec<NodeIndex> = graph
                .node_indices()
                .filter(|n| !graph[*n].is_exit() && region.protects(graph[*n].start_offset))
                .collect();
            for node in protected {
                graph[node].protected_by.push(index);
                graph.add_edge(node, handler, EdgeKind::ExceptionHandler);
            }
        }
        Ok(())
    }
}
