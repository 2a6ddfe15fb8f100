//! Optimization passes over the structured statement tree
//!
//! Each pass rewrites the arena in place. The pipeline order matters:
//! jumps are resolved before switch expressions are recognized, and
//! declarations are placed before the block normalizer decides which
//! blocks may be flattened.

mod block_normalizer;
mod compound_assignment;
mod declarations;
mod foreach;
mod goto_case;
mod operator_rewriting;
mod switch_expression;

pub use block_normalizer::{normalize_blocks, BlockNormalizerPass};
pub use compound_assignment::{fold_compound_assignments, CompoundAssignmentPass};
pub use declarations::{place_declarations, DeclarationPass};
pub use foreach::{recognize_foreach, ForeachPass};
pub use goto_case::{resolve_switch_gotos, GotoCasePass};
pub use operator_rewriting::{rewrite_operator_calls, OperatorRewritingPass};
pub use switch_expression::{recognize_switch_expressions, section_value, SwitchExpressionPass};

use crate::ast::{Ast, Expr, LocalId, MethodContext, Stmt, StmtId};
use crate::config::DecompilerSettings;
use crate::error::{Error, Result};
use crate::metadata::ResolverContext;

/// Everything a pass may read or rewrite for one method
pub struct PassContext<'a, 'r> {
    pub ast: &'a mut Ast,
    pub body: StmtId,
    pub context: &'a mut MethodContext,
    pub resolver: ResolverContext<'r>,
    pub settings: &'a DecompilerSettings,
    /// Recoverable problems found while rewriting
    pub diagnostics: &'a mut Vec<Error>,
}

/// Trait for optimization passes
pub trait OptimizationPass {
    /// Get the name of this optimization pass
    fn name(&self) -> &'static str;

    /// Run the pass, returning the number of rewrites it made
    fn run(&mut self, ctx: &mut PassContext<'_, '_>) -> Result<usize>;

    /// Check if this pass should run under the given settings
    fn should_run(&self, _settings: &DecompilerSettings) -> bool {
        true
    }
}

/// Passes in pipeline order
pub fn default_passes() -> Vec<Box<dyn OptimizationPass>> {
    vec![
        Box::new(OperatorRewritingPass),
        Box::new(GotoCasePass),
        Box::new(ForeachPass),
        Box::new(SwitchExpressionPass),
        Box::new(CompoundAssignmentPass),
        Box::new(DeclarationPass),
        Box::new(BlockNormalizerPass),
    ]
}

/// Run every enabled pass once, in order
pub fn run_passes(
    ctx: &mut PassContext<'_, '_>,
    passes: &mut [Box<dyn OptimizationPass>],
) -> Result<()> {
    for pass in passes.iter_mut() {
        if !pass.should_run(ctx.settings) {
            log::trace!("Skipping {} for {}", pass.name(), ctx.context.name);
            continue;
        }
        let rewrites = pass.run(ctx)?;
        log::debug!("{} on {}: {} rewrites", pass.name(), ctx.context.name, rewrites);
    }
    Ok(())
}

/// Every block statement reachable from `root`, outermost first
pub(crate) fn blocks(ast: &Ast, root: StmtId) -> Vec<StmtId> {
    ast.descendants(root)
        .into_iter()
        .filter(|id| matches!(ast[*id], Stmt::Block(_)))
        .collect()
}

/// Items of a block without emptied slots
pub(crate) fn live_items(ast: &Ast, block: StmtId) -> Vec<StmtId> {
    ast.as_list(block)
        .into_iter()
        .filter(|i| !matches!(ast[*i], Stmt::Nop))
        .collect()
}

/// Apply `f` to every expression of every statement under `root`
pub(crate) fn for_each_expr_mut(ast: &mut Ast, root: StmtId, f: &mut dyn FnMut(&mut Expr)) {
    for id in ast.descendants(root) {
        for expr in ast.exprs_mut(id) {
            f(expr);
        }
    }
}

/// Occurrences of a local in the expressions under `root`
pub(crate) fn count_local_in(ast: &Ast, root: StmtId, local: LocalId) -> usize {
    ast.descendants(root)
        .into_iter()
        .map(|id| {
            ast.exprs(id)
                .into_iter()
                .map(|e| e.count_local(local))
                .sum::<usize>()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_counts_cover_nested_statements() {
        let mut ast = Ast::new();
        let x = Expr::Local(LocalId(0));
        let inner = ast.alloc(Stmt::Expr(Expr::assign(x.clone(), Expr::int(1))));
        let then_block = ast.block(vec![inner]);
        let cond = ast.alloc(Stmt::If {
            condition: Expr::binary(crate::ast::BinaryOp::Lt, x.clone(), Expr::int(3)),
            then_branch: then_block,
            else_branch: None,
        });
        let root = ast.block(vec![cond]);
        assert_eq!(count_local_in(&ast, root, LocalId(0)), 2);
        assert_eq!(blocks(&ast, root), vec![root, then_block]);
    }
}
