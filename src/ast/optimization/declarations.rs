//! Variable declaration placement
//!
//! Every variable is declared in the innermost block that contains all of
//! its uses, right before the first statement using it. When that statement
//! is a plain assignment the declaration absorbs it (`int x = 5;`); a `for`
//! initializer or an `out` argument becomes the declaration itself. A
//! variable that may be read before it is written keeps a declaration at
//! the top of the method.
//!
//! Switch sections share one scope in C#, so a section that gains a
//! declaration is wrapped in its own block.

use super::{OptimizationPass, PassContext};
use crate::ast::{
    Ast, Expr, LocalId, LocalKind, LoopKind, MethodContext, Stmt, StmtId, TypeRef,
};
use crate::error::Result;
use crate::metadata::ResolverContext;
use std::collections::{BTreeMap, HashMap, HashSet};

pub struct DeclarationPass;

impl OptimizationPass for DeclarationPass {
    fn name(&self) -> &'static str {
        "Declarations"
    }

    fn run(&mut self, ctx: &mut PassContext<'_, '_>) -> Result<usize> {
        Ok(place_declarations(ctx.ast, ctx.body, ctx.context, ctx.resolver))
    }
}

/// Position of a use: the chain of (block, item index) from the root
type UsePath = Vec<(StmtId, usize)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Occurrence {
    Read,
    Write,
    Out,
}

#[derive(Default)]
struct UseMap {
    uses: HashMap<LocalId, Vec<UsePath>>,
    /// Declared by the construct binding them or by an earlier run
    declared: HashSet<LocalId>,
}

impl UseMap {
    fn collect(ast: &Ast, root: StmtId) -> Self {
        let mut map = UseMap::default();
        let mut path = Vec::new();
        map.visit(ast, root, &mut path);
        map
    }

    fn visit(&mut self, ast: &Ast, id: StmtId, path: &mut UsePath) {
        for expr in ast.exprs(id) {
            expr.walk(&mut |e| match e {
                Expr::Local(l) => self.uses.entry(*l).or_default().push(path.clone()),
                Expr::Out {
                    target,
                    declare: true,
                } => {
                    if let Some(l) = target.as_local() {
                        self.declared.insert(l);
                    }
                }
                _ => {}
            });
        }
        match &ast[id] {
            Stmt::Block(items) => {
                for (i, item) in items.iter().enumerate() {
                    path.push((id, i));
                    self.visit(ast, *item, path);
                    path.pop();
                }
                return;
            }
            Stmt::Declare { local, .. } => {
                self.declared.insert(*local);
            }
            Stmt::Loop(l) => {
                if let Some(b) = &l.binding {
                    self.declared.insert(b.variable);
                }
            }
            Stmt::Try(t) => {
                self.declared.extend(t.catches.iter().filter_map(|c| c.variable));
            }
            _ => {}
        }
        for child in ast.children(id) {
            self.visit(ast, child, path);
        }
    }
}

/// Innermost block holding every use, and the index of the first item using it
fn common_block(paths: &[UsePath]) -> Option<(StmtId, usize, bool)> {
    let first = paths.first()?;
    let mut depth = 0;
    while depth + 1 < first.len()
        && paths
            .iter()
            .all(|p| p.len() > depth + 1 && p[depth + 1].0 == first[depth + 1].0)
        && paths.iter().all(|p| p[depth].1 == first[depth].1)
    {
        depth += 1;
    }
    let block = first[depth].0;
    let index = paths.iter().map(|p| p[depth].1).min()?;
    let single_item = paths.iter().all(|p| p[depth].1 == index);
    Some((block, index, single_item))
}

/// First occurrence of `local` in evaluation order
fn expr_first(expr: &Expr, local: LocalId) -> Option<Occurrence> {
    match expr {
        Expr::Local(l) if *l == local => Some(Occurrence::Read),
        Expr::Assign { target, value } if target.as_local() == Some(local) => {
            expr_first(value, local).or(Some(Occurrence::Write))
        }
        Expr::Out { target, .. } if target.as_local() == Some(local) => Some(Occurrence::Out),
        other => other
            .children()
            .into_iter()
            .find_map(|c| expr_first(c, local)),
    }
}

fn stmt_first(ast: &Ast, id: StmtId, local: LocalId) -> Option<Occurrence> {
    let exprs_first = |id: StmtId| {
        ast.exprs(id)
            .into_iter()
            .find_map(|e| expr_first(e, local))
    };
    match &ast[id] {
        Stmt::Loop(l) => {
            let init = l.initializer.and_then(|i| stmt_first(ast, i, local));
            let condition = l.condition.as_ref().and_then(|c| expr_first(c, local));
            let collection = l.binding.as_ref().and_then(|b| expr_first(&b.collection, local));
            let body = stmt_first(ast, l.body, local);
            let increment = l.increment.iter().find_map(|e| expr_first(e, local));
            if l.kind == LoopKind::DoWhile {
                init.or(body).or(condition).or(increment)
            } else {
                init.or(collection).or(condition).or(body).or(increment)
            }
        }
        _ => exprs_first(id).or_else(|| {
            ast.children(id)
                .into_iter()
                .find_map(|c| stmt_first(ast, c, local))
        }),
    }
}

/// Mark the first `out` argument writing `local` as a declaration
fn declare_out(ast: &mut Ast, id: StmtId, local: LocalId) -> bool {
    let mut done = false;
    for expr in ast.exprs_mut(id) {
        expr.walk_mut(&mut |e| {
            if let Expr::Out { target, declare } = e {
                if !done && target.as_local() == Some(local) {
                    *declare = true;
                    done = true;
                }
            }
        });
    }
    done
}

pub fn place_declarations(
    ast: &mut Ast,
    root: StmtId,
    context: &MethodContext,
    resolver: ResolverContext<'_>,
) -> usize {
    let map = UseMap::collect(ast, root);
    let mut locals: Vec<LocalId> = map
        .uses
        .keys()
        .copied()
        .filter(|l| !map.declared.contains(l))
        .filter(|l| !matches!(context.local(*l).kind, LocalKind::Exception))
        .collect();
    locals.sort();

    let declared_type = |l: LocalId| {
        context
            .local(l)
            .ty
            .as_ref()
            .map(|ty| TypeRef::from_sig(ty, &resolver))
    };

    // block -> (index, declaration) pairs to insert
    let mut inserts: BTreeMap<StmtId, Vec<(usize, StmtId)>> = BTreeMap::new();
    let mut placed = 0;
    for local in locals {
        let Some((block, index, single_item)) = common_block(&map.uses[&local]) else {
            continue;
        };
        let ty = declared_type(local);
        let items = ast.items(block).to_vec();
        let first = items[index..]
            .iter()
            .find_map(|i| stmt_first(ast, *i, local));
        placed += 1;

        if first != Some(Occurrence::Read) {
            let item = items[index];
            if let Stmt::Expr(Expr::Assign { target, value }) = &ast[item] {
                if target.as_local() == Some(local) && !value.reads_local(local) {
                    let init = (**value).clone();
                    ast[item] = Stmt::Declare {
                        local,
                        ty,
                        init: Some(init),
                    };
                    continue;
                }
            }
            if let Some(init) = for_initializer(ast, item, local) {
                if single_item {
                    if let Stmt::Expr(Expr::Assign { value, .. }) = &ast[init] {
                        let value = (**value).clone();
                        ast[init] = Stmt::Declare {
                            local,
                            ty,
                            init: Some(value),
                        };
                        continue;
                    }
                }
            }
            let out_capable = matches!(
                ast[item],
                Stmt::Expr(_) | Stmt::If { .. } | Stmt::Return(_) | Stmt::Declare { .. }
            );
            if out_capable
                && single_item
                && stmt_first(ast, item, local) == Some(Occurrence::Out)
                && declare_out(ast, item, local)
            {
                continue;
            }
            let decl = ast.alloc(Stmt::Declare {
                local,
                ty,
                init: None,
            });
            inserts.entry(block).or_default().push((index, decl));
        } else {
            log::trace!(
                "{} may be read before it is written; declaring at method start",
                context.local_name(local)
            );
            let decl = ast.alloc(Stmt::Declare {
                local,
                ty,
                init: None,
            });
            inserts.entry(root).or_default().push((0, decl));
        }
    }

    for (block, mut decls) in inserts {
        decls.sort_by_key(|(index, _)| *index);
        let old = ast.items(block).to_vec();
        let mut items = Vec::with_capacity(old.len() + decls.len());
        let mut pending = decls.into_iter().peekable();
        for (i, item) in old.into_iter().enumerate() {
            while let Some((_, decl)) = pending.next_if(|(index, _)| *index == i) {
                items.push(decl);
            }
            items.push(item);
        }
        items.extend(pending.map(|(_, decl)| decl));
        ast[block] = Stmt::Block(items);
    }

    wrap_declaring_sections(ast, root);
    placed
}

/// `for` loop at `item` whose initializer assigns `local` from a value not
/// reading it
fn for_initializer(ast: &Ast, item: StmtId, local: LocalId) -> Option<StmtId> {
    let Stmt::Loop(l) = &ast[item] else {
        return None;
    };
    if l.kind != LoopKind::For {
        return None;
    }
    let init = l.initializer?;
    match &ast[init] {
        Stmt::Expr(Expr::Assign { target, value })
            if target.as_local() == Some(local) && !value.reads_local(local) =>
        {
            Some(init)
        }
        _ => None,
    }
}

/// Whether a statement declares a variable in the enclosing scope
pub(crate) fn declares(ast: &Ast, id: StmtId) -> bool {
    match &ast[id] {
        Stmt::Declare { .. } => true,
        _ => ast.exprs(id).into_iter().any(|e| {
            e.any(&|x| matches!(x, Expr::Out { declare: true, .. }))
        }),
    }
}

fn wrap_declaring_sections(ast: &mut Ast, root: StmtId) {
    let switches: Vec<StmtId> = ast
        .descendants(root)
        .into_iter()
        .filter(|id| matches!(ast[*id], Stmt::Switch(_)))
        .collect();
    for id in switches {
        let bodies: Vec<StmtId> = match &ast[id] {
            Stmt::Switch(s) => s.sections.iter().map(|sec| sec.body).collect(),
            _ => continue,
        };
        for body in bodies {
            let items = ast.items(body).to_vec();
            if items.iter().any(|i| declares(ast, *i)) {
                let inner = ast.block(items);
                ast[body] = Stmt::Block(vec![inner]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, CaseLabel, LoopConstruct, SwitchConstruct, SwitchKind, SwitchSection};
    use crate::metadata::{
        InMemoryMetadata, InstructionStream, LocalSig, MethodId, PrimitiveType, TypeSig,
    };

    fn context(count: usize) -> MethodContext {
        MethodContext::new(&InstructionStream {
            method: MethodId(1),
            name: "C::M".into(),
            instructions: Vec::new(),
            locals: (0..count)
                .map(|_| LocalSig {
                    name: None,
                    ty: TypeSig::Primitive(PrimitiveType::I4),
                })
                .collect(),
            parameters: Vec::new(),
            has_this: false,
            returns_value: true,
            code_size: 0,
        })
    }

    fn x() -> Expr {
        Expr::Local(LocalId(0))
    }

    #[test]
    fn first_assignment_becomes_initializer() {
        let metadata = InMemoryMetadata::new();
        let resolver = ResolverContext::new(&metadata, &metadata);
        let mut ast = Ast::new();
        let assign = ast.alloc(Stmt::Expr(Expr::assign(x(), Expr::int(5))));
        let ret = ast.alloc(Stmt::Return(Some(x())));
        let root = ast.block(vec![assign, ret]);
        place_declarations(&mut ast, root, &context(1), resolver);
        assert_eq!(
            ast[assign],
            Stmt::Declare {
                local: LocalId(0),
                ty: Some(TypeRef::Primitive(PrimitiveType::I4)),
                init: Some(Expr::int(5)),
            }
        );
    }

    #[test]
    fn for_initializer_declares_loop_variable() {
        let metadata = InMemoryMetadata::new();
        let resolver = ResolverContext::new(&metadata, &metadata);
        let mut ast = Ast::new();
        let init = ast.alloc(Stmt::Expr(Expr::assign(x(), Expr::int(0))));
        let body = ast.block(vec![]);
        let looped = ast.alloc(Stmt::Loop(LoopConstruct {
            kind: LoopKind::For,
            condition: Some(Expr::binary(BinaryOp::Lt, x(), Expr::int(10))),
            body,
            initializer: Some(init),
            increment: vec![Expr::IncDec {
                target: Box::new(x()),
                increment: true,
                prefix: false,
            }],
            binding: None,
        }));
        let root = ast.block(vec![looped]);
        place_declarations(&mut ast, root, &context(1), resolver);
        assert!(matches!(ast[init], Stmt::Declare { init: Some(_), .. }));
        assert_eq!(ast.items(root), &[looped]);
    }

    #[test]
    fn variable_assigned_in_both_arms_is_declared_before_the_if() {
        let metadata = InMemoryMetadata::new();
        let resolver = ResolverContext::new(&metadata, &metadata);
        let mut ast = Ast::new();
        let a = ast.alloc(Stmt::Expr(Expr::assign(x(), Expr::int(1))));
        let b = ast.alloc(Stmt::Expr(Expr::assign(x(), Expr::int(2))));
        let then_branch = ast.block(vec![a]);
        let else_branch = ast.block(vec![b]);
        let branch = ast.alloc(Stmt::If {
            condition: Expr::Arg(0),
            then_branch,
            else_branch: Some(else_branch),
        });
        let ret = ast.alloc(Stmt::Return(Some(x())));
        let root = ast.block(vec![branch, ret]);
        place_declarations(&mut ast, root, &context(1), resolver);
        let items = ast.items(root);
        assert_eq!(items.len(), 3);
        assert!(matches!(ast[items[0]], Stmt::Declare { init: None, .. }));
    }

    #[test]
    fn declaring_switch_section_is_wrapped_in_a_block() {
        let metadata = InMemoryMetadata::new();
        let resolver = ResolverContext::new(&metadata, &metadata);
        let mut ast = Ast::new();
        let assign = ast.alloc(Stmt::Expr(Expr::assign(x(), Expr::int(1))));
        let ret = ast.alloc(Stmt::Return(Some(x())));
        let body = ast.block(vec![assign, ret]);
        let switch = ast.alloc(Stmt::Switch(SwitchConstruct {
            discriminant: Expr::Arg(0),
            sections: vec![SwitchSection {
                labels: [CaseLabel::Int(1)].into_iter().collect(),
                body,
            }],
            kind: SwitchKind::Statement,
        }));
        let root = ast.block(vec![switch]);
        place_declarations(&mut ast, root, &context(1), resolver);
        let items = ast.items(body);
        assert_eq!(items.len(), 1);
        assert!(matches!(ast[items[0]], Stmt::Block(_)));
    }
}
