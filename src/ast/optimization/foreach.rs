//! Enumerator loops to `foreach`
//!
//! ```text
//! e = coll.GetEnumerator();
//! try {                                  // optional
//!     while (e.MoveNext()) { v = e.Current; ... }
//! } finally { if (e != null) e.Dispose(); }
//! ```
//!
//! becomes `foreach (var v in coll) { ... }` when `e` is used nowhere else
//! and `v` does not outlive the loop.

use super::{count_local_in, live_items, OptimizationPass, PassContext};
use crate::ast::{
    Ast, Expr, ForeachBinding, LocalId, LoopKind, Stmt, StmtId,
};
use crate::config::DecompilerSettings;
use crate::error::Result;

pub struct ForeachPass;

impl OptimizationPass for ForeachPass {
    fn name(&self) -> &'static str {
        "Foreach"
    }

    fn should_run(&self, settings: &DecompilerSettings) -> bool {
        settings.foreach_statements
    }

    fn run(&mut self, ctx: &mut PassContext<'_, '_>) -> Result<usize> {
        Ok(recognize_foreach(ctx.ast, ctx.body))
    }
}

/// Matched pieces of one enumerator loop
struct EnumeratorLoop {
    init: StmtId,
    /// The `try` wrapper, or the loop itself when there is none
    outer: StmtId,
    outer_index: usize,
    looped: StmtId,
    current: StmtId,
    variable: LocalId,
    collection: Expr,
}

pub fn recognize_foreach(ast: &mut Ast, root: StmtId) -> usize {
    let mut rewrites = 0;
    for block in super::blocks(ast, root) {
        let mut index = 0;
        while index < ast.items(block).len() {
            let item = ast.items(block)[index];
            if let Some(found) = match_at(ast, root, block, item) {
                apply(ast, block, found);
                rewrites += 1;
            }
            index += 1;
        }
    }
    rewrites
}

fn call_on<'a>(expr: &'a Expr, name: &str) -> Option<&'a Expr> {
    match expr {
        Expr::Call {
            method,
            receiver: Some(receiver),
            args,
        } if method.name == name && args.is_empty() => Some(receiver),
        _ => None,
    }
}

fn strip_cast(expr: &Expr) -> &Expr {
    match expr {
        Expr::Cast { operand, .. } => operand,
        other => other,
    }
}

fn match_at(ast: &Ast, root: StmtId, block: StmtId, init: StmtId) -> Option<EnumeratorLoop> {
    let Stmt::Expr(Expr::Assign { target, value }) = &ast[init] else {
        return None;
    };
    let enumerator = target.as_local()?;
    let collection = call_on(value, "GetEnumerator")?.clone();

    let items = ast.items(block);
    let position = items.iter().position(|i| *i == init)?;
    let (outer_index, outer) = items
        .iter()
        .enumerate()
        .skip(position + 1)
        .find(|(_, i)| ast[**i] != Stmt::Nop)
        .map(|(n, i)| (n, *i))?;

    let (looped, finally) = match &ast[outer] {
        Stmt::Loop(_) => (outer, None),
        Stmt::Try(t) if t.catches.is_empty() && t.finally.is_some() => {
            match live_items(ast, t.body).as_slice() {
                [only] if matches!(ast[*only], Stmt::Loop(_)) => (*only, t.finally),
                _ => return None,
            }
        }
        _ => return None,
    };
    let Stmt::Loop(l) = &ast[looped] else {
        return None;
    };
    if l.kind != LoopKind::While || l.initializer.is_some() || !l.increment.is_empty() {
        return None;
    }
    let moved = call_on(l.condition.as_ref()?, "MoveNext")?;
    if moved.as_local() != Some(enumerator) {
        return None;
    }

    let current = *live_items(ast, l.body).first()?;
    let Stmt::Expr(Expr::Assign { target, value }) = &ast[current] else {
        return None;
    };
    let variable = target.as_local()?;
    if call_on(strip_cast(value), "get_Current")?.as_local() != Some(enumerator) {
        return None;
    }

    // The enumerator lives only in the pattern
    let mut expected = 3;
    if let Some(f) = finally {
        let disposes = ast.descendants(f).into_iter().any(|id| {
            ast.exprs(id)
                .into_iter()
                .any(|e| e.any(&|x| call_on(x, "Dispose").is_some()))
        });
        if !disposes {
            return None;
        }
        expected += count_local_in(ast, f, enumerator);
    }
    if count_local_in(ast, root, enumerator) != expected {
        return None;
    }
    // The element variable does not outlive the loop
    if count_local_in(ast, root, variable) != count_local_in(ast, l.body, variable)
        || collection.reads_local(variable)
    {
        return None;
    }

    Some(EnumeratorLoop {
        init,
        outer,
        outer_index,
        looped,
        current,
        variable,
        collection,
    })
}

fn apply(ast: &mut Ast, block: StmtId, found: EnumeratorLoop) {
    log::debug!("foreach over enumerator in {:?}", found.init);
    ast[found.init] = Stmt::Nop;
    ast[found.current] = Stmt::Nop;
    if let Stmt::Loop(l) = &mut ast[found.looped] {
        l.kind = LoopKind::Foreach;
        l.condition = None;
        l.binding = Some(ForeachBinding {
            variable: found.variable,
            collection: found.collection,
        });
    }
    if found.outer != found.looped {
        if let Stmt::Block(items) = &mut ast[block] {
            items[found.outer_index] = found.looped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{LoopConstruct, MethodRef, TryConstruct};
    use crate::metadata::Token;
    use smallvec::SmallVec;

    fn call(receiver: Expr, name: &str) -> Expr {
        Expr::Call {
            method: MethodRef {
                token: Token(0x0A00_0001),
                name: name.into(),
                declaring_type: None,
                return_type: None,
                operator: None,
                out_params: SmallVec::new(),
            },
            receiver: Some(Box::new(receiver)),
            args: Vec::new(),
        }
    }

    /// `e = list.GetEnumerator(); try { while (e.MoveNext()) { v = e.Current; use(v); } } finally { e.Dispose(); }`
    fn enumerator_loop(ast: &mut Ast, with_try: bool) -> (StmtId, StmtId) {
        let list = Expr::Arg(0);
        let e = Expr::Local(LocalId(0));
        let v = Expr::Local(LocalId(1));
        let init = ast.alloc(Stmt::Expr(Expr::assign(e.clone(), call(list, "GetEnumerator"))));
        let current = ast.alloc(Stmt::Expr(Expr::assign(v.clone(), call(e.clone(), "get_Current"))));
        let use_v = ast.alloc(Stmt::Expr(call(v, "Use")));
        let body = ast.block(vec![current, use_v]);
        let looped = ast.alloc(Stmt::Loop(LoopConstruct {
            kind: LoopKind::While,
            condition: Some(call(e.clone(), "MoveNext")),
            body,
            initializer: None,
            increment: Vec::new(),
            binding: None,
        }));
        let outer = if with_try {
            let try_body = ast.block(vec![looped]);
            let dispose = ast.alloc(Stmt::Expr(call(e, "Dispose")));
            let finally = ast.block(vec![dispose]);
            ast.alloc(Stmt::Try(TryConstruct {
                body: try_body,
                catches: Vec::new(),
                finally: Some(finally),
            }))
        } else {
            looped
        };
        (looped, ast.block(vec![init, outer]))
    }

    #[test]
    fn disposing_enumerator_loop_becomes_foreach() {
        let mut ast = Ast::new();
        let (looped, root) = enumerator_loop(&mut ast, true);
        assert_eq!(recognize_foreach(&mut ast, root), 1);
        assert_eq!(ast.items(root)[1], looped);
        let Stmt::Loop(l) = &ast[looped] else {
            panic!("not a loop");
        };
        assert_eq!(l.kind, LoopKind::Foreach);
        assert_eq!(
            l.binding,
            Some(ForeachBinding {
                variable: LocalId(1),
                collection: Expr::Arg(0)
            })
        );
    }

    #[test]
    fn plain_enumerator_loop_becomes_foreach() {
        let mut ast = Ast::new();
        let (_, root) = enumerator_loop(&mut ast, false);
        assert_eq!(recognize_foreach(&mut ast, root), 1);
    }

    #[test]
    fn element_used_after_loop_blocks_rewrite() {
        let mut ast = Ast::new();
        let (_, root) = enumerator_loop(&mut ast, false);
        let after = ast.alloc(Stmt::Return(Some(Expr::Local(LocalId(1)))));
        if let Stmt::Block(items) = &mut ast[root] {
            items.push(after);
        }
        assert_eq!(recognize_foreach(&mut ast, root), 0);
    }
}
