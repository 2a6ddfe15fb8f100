//! DOT export for method graphs
//!
//! Blocks are labelled with their IL offset range and instructions. Protected
//! blocks are shaded and handler entries get a double border, so the shape of
//! the exception regions survives in the picture.

use crate::cfg::{Block, EdgeKind, Terminal};
use petgraph::graph::DiGraph;
use petgraph::visit::EdgeRef;
use std::fmt::Write;

/// What to put in the DOT output
#[derive(Debug, Clone)]
pub struct DotOptions {
    /// Print the instructions of every block, not only its offsets
    pub instructions: bool,
    /// Shade blocks by exception region membership
    pub regions: bool,
}

impl Default for DotOptions {
    fn default() -> Self {
        Self {
            instructions: true,
            regions: true,
        }
    }
}

pub fn generate_dot(graph: &DiGraph<Block, EdgeKind>, options: &DotOptions) -> String {
    let mut dot = String::from("digraph CFG {\n  node [shape=box, fontname=\"monospace\"];\n");

    for node in graph.node_indices() {
        let block = &graph[node];
        let mut attributes = vec![format!("label=\"{}\"", block_label(block, options))];
        if block.is_exit() {
            attributes.push("shape=ellipse".to_string());
        } else if options.regions {
            if block.handler_of.is_some() {
                attributes.push("peripheries=2".to_string());
            }
            if !block.protected_by.is_empty() {
                attributes.push("style=filled, fillcolor=\"#eeeeee\"".to_string());
            }
        }
        let _ = writeln!(dot, "  n{} [{}];", node.index(), attributes.join(", "));
    }

    for edge in graph.edge_references() {
        let kind = edge.weight();
        let _ = write!(dot, "  n{} -> n{}", edge.source().index(), edge.target().index());
        match edge_label(kind) {
            Some(label) => {
                let _ = write!(dot, " [label=\"{}\"", label);
            }
            None => dot.push_str(" ["),
        }
        if *kind == EdgeKind::ExceptionHandler {
            dot.push_str(", style=dashed");
        }
        dot.push_str("];\n");
    }

    dot.push_str("}\n");
    dot
}

fn block_label(block: &Block, options: &DotOptions) -> String {
    if block.is_exit() {
        return "EXIT".to_string();
    }
    let mut label = format!("IL_{:04x}..IL_{:04x}", block.start_offset, block.end_offset);
    match block.terminal() {
        Some(Terminal::Return) => label.push_str(" (ret)"),
        Some(Terminal::Throw) => label.push_str(" (throw)"),
        Some(Terminal::EndFinally) => label.push_str(" (endfinally)"),
        None => {}
    }
    if let Some(region) = block.handler_of {
        let _ = write!(label, "\\lhandler of region {}", region);
    }
    if options.instructions {
        for insn in &block.instructions {
            label.push_str("\\l");
            label.push_str(&insn.to_string().replace('\\', "\\\\").replace('"', "\\\""));
        }
    }
    label.push_str("\\l");
    label
}

fn edge_label(kind: &EdgeKind) -> Option<String> {
    Some(match kind {
        EdgeKind::Uncond => return None,
        EdgeKind::True => "T".to_string(),
        EdgeKind::False => "F".to_string(),
        EdgeKind::Switch(idx) => format!("case {}", idx),
        EdgeKind::Default => "default".to_string(),
        EdgeKind::Fall => "fall".to_string(),
        EdgeKind::Leave => "leave".to_string(),
        EdgeKind::ExceptionHandler => "exc".to_string(),
    })
}
