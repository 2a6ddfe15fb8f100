//! Inspect the control flow graph of one method

use crate::cfg::Cfg;
use crate::error::Result;
use crate::metadata::{InMemoryMetadata, MetadataSource, MethodId};
use anyhow::Context;
use std::path::Path;

/// Build and describe the control flow graph of one method in a fixture
pub fn cfg(input_path: &Path, method: u32, output_dot: Option<&Path>) -> anyhow::Result<()> {
    let metadata = InMemoryMetadata::load(input_path)
        .with_context(|| format!("could not load {}", input_path.display()))?;
    if !metadata.method_ids().contains(&MethodId(method)) {
        anyhow::bail!("method {:08x} has no body in {}", method, input_path.display());
    }
    let report = describe(&metadata, MethodId(method), output_dot)?;
    print!("{}", report);
    Ok(())
}

/// Text report of a method's blocks, edges and loops
pub fn describe(
    metadata: &dyn MetadataSource,
    method: MethodId,
    output_dot: Option<&Path>,
) -> Result<String> {
    let stream = metadata.get_method_body(method)?;
    let regions = metadata.get_exception_regions(method)?;
    let mut out = String::new();
    out.push_str(&format!("Method {} ({})\n", stream.name, method));
    out.push_str(&format!("  Instructions: {}\n", stream.instructions.len()));

    let cfg = Cfg::build(&stream, &regions)?;
    out.push_str(&format!("  Basic blocks: {}\n", cfg.block_count()));
    out.push_str(&format!("  Edges: {}\n", cfg.graph().edge_count()));
    for (i, node) in cfg.blocks_in_order().into_iter().enumerate() {
        let block = &cfg.graph()[node];
        let successors: Vec<String> = cfg
            .successors(node)
            .into_iter()
            .filter(|(target, _)| !cfg.graph()[*target].is_exit())
            .map(|(target, kind)| format!("IL_{:04x} ({:?})", cfg.graph()[target].start_offset, kind))
            .collect();
        out.push_str(&format!(
            "    Block {}: IL_{:04x}-IL_{:04x} ({} instructions) -> [{}]\n",
            i,
            block.start_offset,
            block.end_offset,
            block.instructions.len(),
            successors.join(", ")
        ));
    }

    let loops = cfg.find_natural_loops();
    if !loops.loops.is_empty() {
        out.push_str(&format!("  Natural loops: {} found\n", loops.loops.len()));
        for l in &loops.loops {
            out.push_str(&format!(
                "    Loop: header IL_{:04x}, {} blocks\n",
                cfg.graph()[l.header].start_offset,
                l.body_nodes.len()
            ));
        }
    }
    if !loops.irreducible_edges.is_empty() {
        out.push_str(&format!(
            "  Irreducible edges: {}\n",
            loops.irreducible_edges.len()
        ));
    }
    if !regions.is_empty() {
        out.push_str(&format!("  Exception regions: {}\n", regions.len()));
    }

    if let Some(dot_path) = output_dot {
        std::fs::write(dot_path, cfg.to_dot())?;
        out.push_str(&format!("  DOT exported to: {}\n", dot_path.display()));
    }
    Ok(out)
}
