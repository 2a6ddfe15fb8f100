//! Block normalization
//!
//! Last pass of the pipeline. It removes emptied slots, unused labels and
//! jumps to the very next statement, flattens nested blocks that open no
//! scope, drops a trailing `return;` from void methods and decides where
//! braces are written. Running it twice changes nothing the second time.
//!
//! Brace policy without `always_use_braces`: an `if`/`else if`/`else` chain
//! drops its braces only when every branch is a single statement, and a
//! `then` branch that would leave an `else` dangling keeps them. `do`/`while`
//! bodies always keep braces.

use super::declarations::declares;
use super::{OptimizationPass, PassContext};
use crate::ast::{Ast, Label, LoopKind, Stmt, StmtId};
use crate::config::DecompilerSettings;
use crate::error::Result;
use std::collections::HashSet;

/// Upper bound on cleanup rounds; each round only ever shrinks the tree
const MAX_ROUNDS: usize = 16;

pub struct BlockNormalizerPass;

impl OptimizationPass for BlockNormalizerPass {
    fn name(&self) -> &'static str {
        "BlockNormalizer"
    }

    fn run(&mut self, ctx: &mut PassContext<'_, '_>) -> Result<usize> {
        Ok(normalize_blocks(
            ctx.ast,
            ctx.body,
            ctx.settings,
            ctx.context.returns_value,
        ))
    }
}

pub fn normalize_blocks(
    ast: &mut Ast,
    root: StmtId,
    settings: &DecompilerSettings,
    returns_value: bool,
) -> usize {
    let mut total = 0;
    for _ in 0..MAX_ROUNDS {
        let changes = drop_jumps_to_next(ast, root)
            + prune_labels(ast, root)
            + flatten(ast, root)
            + drop_empty_else(ast, root)
            + if returns_value {
                0
            } else {
                drop_trailing_return(ast, root)
            };
        total += changes;
        if changes == 0 {
            break;
        }
    }
    total += collapse_else_if(ast, root);
    total += apply_brace_policy(ast, root, settings);
    total
}

fn prune_labels(ast: &mut Ast, root: StmtId) -> usize {
    let all = ast.descendants(root);
    let referenced: HashSet<Label> = all
        .iter()
        .filter_map(|id| match ast[*id] {
            Stmt::Goto(label) => Some(label),
            _ => None,
        })
        .collect();
    let mut pruned = 0;
    for id in all {
        if let Stmt::Label(label) = ast[id] {
            if !referenced.contains(&label) {
                ast[id] = Stmt::Nop;
                pruned += 1;
            }
        }
    }
    pruned
}

/// `goto L; L:` loses the goto
fn drop_jumps_to_next(ast: &mut Ast, root: StmtId) -> usize {
    let mut dropped = 0;
    for block in super::blocks(ast, root) {
        let items = super::live_items(ast, block);
        for pair in items.windows(2) {
            if let (Stmt::Goto(target), Stmt::Label(label)) = (&ast[pair[0]], &ast[pair[1]]) {
                if target == label {
                    ast[pair[0]] = Stmt::Nop;
                    dropped += 1;
                }
            }
        }
    }
    dropped
}

/// Splice nested blocks that declare nothing into their parent and drop `Nop`s
fn flatten(ast: &mut Ast, root: StmtId) -> usize {
    let mut changes = 0;
    // Innermost first, so spliced blocks are already flat
    for block in super::blocks(ast, root).into_iter().rev() {
        let old = ast.items(block).to_vec();
        let mut items = Vec::with_capacity(old.len());
        let mut changed = false;
        for item in old {
            match &ast[item] {
                Stmt::Nop => changed = true,
                Stmt::Block(inner) if !inner.iter().any(|i| declares(ast, *i)) => {
                    items.extend(inner.iter().copied());
                    changed = true;
                }
                _ => items.push(item),
            }
        }
        if changed {
            ast[block] = Stmt::Block(items);
            changes += 1;
        }
    }
    changes
}

fn is_empty_block(ast: &Ast, id: StmtId) -> bool {
    matches!(&ast[id], Stmt::Block(items) if items.is_empty())
}

fn drop_empty_else(ast: &mut Ast, root: StmtId) -> usize {
    let mut dropped = 0;
    for id in ast.descendants(root) {
        let empty = match &ast[id] {
            Stmt::If {
                else_branch: Some(e),
                ..
            } => is_empty_block(ast, *e),
            _ => false,
        };
        if empty {
            if let Stmt::If { else_branch, .. } = &mut ast[id] {
                *else_branch = None;
                dropped += 1;
            }
        }
    }
    dropped
}

fn drop_trailing_return(ast: &mut Ast, root: StmtId) -> usize {
    let items = super::live_items(ast, root);
    match items.as_slice() {
        // `L: return;` stays so the label keeps a statement
        [.., before, _] if matches!(ast[*before], Stmt::Label(_)) => 0,
        [.., last] if ast[*last] == Stmt::Return(None) => {
            ast[*last] = Stmt::Nop;
            1
        }
        _ => 0,
    }
}

/// `else { if .. }` becomes `else if ..`
fn collapse_else_if(ast: &mut Ast, root: StmtId) -> usize {
    let mut collapsed = 0;
    for id in ast.descendants(root) {
        let Stmt::If {
            else_branch: Some(e),
            ..
        } = &ast[id]
        else {
            continue;
        };
        let nested = match ast.items(*e) {
            [only] if matches!(ast[*only], Stmt::If { .. }) => *only,
            _ => continue,
        };
        if let Stmt::If { else_branch, .. } = &mut ast[id] {
            *else_branch = Some(nested);
            collapsed += 1;
        }
    }
    collapsed
}

/// Statements allowed as a brace-less branch or loop body
fn embeddable(ast: &Ast, id: StmtId) -> bool {
    !matches!(
        ast[id],
        Stmt::Nop | Stmt::Block(_) | Stmt::Declare { .. } | Stmt::Label(_) | Stmt::Comment(_)
    ) && !declares(ast, id)
}

/// The single statement a branch consists of
fn sole_statement(ast: &Ast, branch: StmtId) -> Option<StmtId> {
    match &ast[branch] {
        Stmt::Block(items) => match items.as_slice() {
            [only] if embeddable(ast, *only) => Some(*only),
            _ => None,
        },
        _ if embeddable(ast, branch) => Some(branch),
        _ => None,
    }
}

/// Whether a statement written without braces ends in an `if` lacking an
/// `else`, which would capture a following `else`
fn ends_with_open_if(ast: &Ast, id: StmtId) -> bool {
    match &ast[id] {
        Stmt::If {
            else_branch: None, ..
        } => true,
        Stmt::If {
            else_branch: Some(e),
            ..
        } => ends_with_open_if(ast, *e),
        Stmt::Loop(l) if l.kind != LoopKind::DoWhile => ends_with_open_if(ast, l.body),
        _ => false,
    }
}

/// Ifs of an `else if` chain and its final `else`
fn if_chain(ast: &Ast, head: StmtId) -> (Vec<StmtId>, Option<StmtId>) {
    let mut ifs = vec![head];
    let mut current = head;
    loop {
        match &ast[current] {
            Stmt::If {
                else_branch: Some(e),
                ..
            } if matches!(ast[*e], Stmt::If { .. }) => {
                current = *e;
                ifs.push(current);
            }
            Stmt::If { else_branch, .. } => return (ifs, *else_branch),
            _ => return (ifs, None),
        }
    }
}

fn then_of(ast: &Ast, id: StmtId) -> Option<StmtId> {
    match &ast[id] {
        Stmt::If { then_branch, .. } => Some(*then_branch),
        _ => None,
    }
}

fn set_then(ast: &mut Ast, id: StmtId, branch: StmtId) {
    if let Stmt::If { then_branch, .. } = &mut ast[id] {
        *then_branch = branch;
    }
}

fn set_else(ast: &mut Ast, id: StmtId, branch: StmtId) {
    if let Stmt::If { else_branch, .. } = &mut ast[id] {
        *else_branch = Some(branch);
    }
}

fn apply_brace_policy(ast: &mut Ast, root: StmtId, settings: &DecompilerSettings) -> usize {
    let all = ast.descendants(root);
    let else_ifs: HashSet<StmtId> = all
        .iter()
        .filter_map(|id| match &ast[*id] {
            Stmt::If {
                else_branch: Some(e),
                ..
            } if matches!(ast[*e], Stmt::If { .. }) => Some(*e),
            _ => None,
        })
        .collect();

    let mut changes = 0;
    // Innermost first: a branch's shape is final before its parent decides
    for id in all.into_iter().rev() {
        let looped = match &ast[id] {
            Stmt::Loop(l) => Some((l.kind, l.body)),
            _ => None,
        };
        match looped {
            None if matches!(ast[id], Stmt::If { .. }) && !else_ifs.contains(&id) => {
                changes += brace_if_chain(ast, id, settings);
            }
            Some((kind, body)) => {
                let target = if settings.always_use_braces || kind == LoopKind::DoWhile {
                    braced(ast, body)
                } else {
                    sole_statement(ast, body).unwrap_or(body)
                };
                if target != body {
                    if let Stmt::Loop(l) = &mut ast[id] {
                        l.body = target;
                    }
                    changes += 1;
                }
            }
            _ => {}
        }
    }
    changes
}

/// Block form of a branch, wrapping a bare statement
fn braced(ast: &mut Ast, branch: StmtId) -> StmtId {
    match ast[branch] {
        Stmt::Block(_) => branch,
        _ => ast.block(vec![branch]),
    }
}

fn brace_if_chain(ast: &mut Ast, head: StmtId, settings: &DecompilerSettings) -> usize {
    let (ifs, final_else) = if_chain(ast, head);
    let mut changes = 0;

    if settings.always_use_braces {
        for id in &ifs {
            if let Some(then_branch) = then_of(ast, *id) {
                let wrapped = braced(ast, then_branch);
                if wrapped != then_branch {
                    set_then(ast, *id, wrapped);
                    changes += 1;
                }
            }
        }
        if let (Some(last), Some(e)) = (ifs.last(), final_else) {
            let wrapped = braced(ast, e);
            if wrapped != e {
                set_else(ast, *last, wrapped);
                changes += 1;
            }
        }
        return changes;
    }

    let has_else = |index: usize| index + 1 < ifs.len() || final_else.is_some();
    let mut thens = Vec::with_capacity(ifs.len());
    for (index, id) in ifs.iter().enumerate() {
        let Some(single) = then_of(ast, *id).and_then(|t| sole_statement(ast, t)) else {
            return 0;
        };
        if has_else(index) && ends_with_open_if(ast, single) {
            return 0;
        }
        thens.push(single);
    }
    let otherwise = match final_else {
        Some(e) => match sole_statement(ast, e) {
            Some(single) => Some(single),
            None => return 0,
        },
        None => None,
    };

    for (id, single) in ifs.iter().zip(thens) {
        if then_of(ast, *id) != Some(single) {
            set_then(ast, *id, single);
            changes += 1;
        }
    }
    if let (Some(last), Some(e), Some(single)) = (ifs.last(), final_else, otherwise) {
        if e != single {
            set_else(ast, *last, single);
            changes += 1;
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, LocalId, LoopConstruct};

    fn call_stmt(ast: &mut Ast, n: i64) -> StmtId {
        ast.alloc(Stmt::Expr(Expr::assign(Expr::Local(LocalId(0)), Expr::int(n))))
    }

    fn if_stmt(ast: &mut Ast, then_branch: StmtId, else_branch: Option<StmtId>) -> StmtId {
        ast.alloc(Stmt::If {
            condition: Expr::Arg(0),
            then_branch,
            else_branch,
        })
    }

    fn defaults() -> DecompilerSettings {
        DecompilerSettings::default()
    }

    #[test]
    fn nested_blocks_and_nops_are_flattened() {
        let mut ast = Ast::new();
        let a = call_stmt(&mut ast, 1);
        let b = call_stmt(&mut ast, 2);
        let nop = ast.alloc(Stmt::Nop);
        let inner = ast.block(vec![b, nop]);
        let root = ast.block(vec![a, inner]);
        normalize_blocks(&mut ast, root, &defaults(), true);
        assert_eq!(ast.items(root), &[a, b]);
    }

    #[test]
    fn block_with_declaration_is_kept() {
        let mut ast = Ast::new();
        let decl = ast.alloc(Stmt::Declare {
            local: LocalId(0),
            ty: None,
            init: Some(Expr::int(1)),
        });
        let inner = ast.block(vec![decl]);
        let root = ast.block(vec![inner]);
        normalize_blocks(&mut ast, root, &defaults(), true);
        assert_eq!(ast.items(root), &[inner]);
    }

    #[test]
    fn jump_to_next_statement_and_its_label_disappear() {
        let mut ast = Ast::new();
        let jump = ast.alloc(Stmt::Goto(Label(0x10)));
        let label = ast.alloc(Stmt::Label(Label(0x10)));
        let ret = ast.alloc(Stmt::Return(Some(Expr::int(0))));
        let root = ast.block(vec![jump, label, ret]);
        normalize_blocks(&mut ast, root, &defaults(), true);
        assert_eq!(ast.items(root), &[ret]);
    }

    #[test]
    fn trailing_return_in_void_method_is_dropped() {
        let mut ast = Ast::new();
        let a = call_stmt(&mut ast, 1);
        let ret = ast.alloc(Stmt::Return(None));
        let root = ast.block(vec![a, ret]);
        normalize_blocks(&mut ast, root, &defaults(), false);
        assert_eq!(ast.items(root), &[a]);
    }

    #[test]
    fn single_statement_chain_loses_braces_and_collapses_else_if() {
        let mut ast = Ast::new();
        let a = call_stmt(&mut ast, 1);
        let b = call_stmt(&mut ast, 2);
        let c = call_stmt(&mut ast, 3);
        let (ta, tb, tc) = (ast.block(vec![a]), ast.block(vec![b]), ast.block(vec![c]));
        let inner = if_stmt(&mut ast, tb, Some(tc));
        let else_block = ast.block(vec![inner]);
        let outer = if_stmt(&mut ast, ta, Some(else_block));
        let root = ast.block(vec![outer]);
        normalize_blocks(&mut ast, root, &defaults(), true);
        assert_eq!(
            ast[outer],
            Stmt::If {
                condition: Expr::Arg(0),
                then_branch: a,
                else_branch: Some(inner),
            }
        );
        assert_eq!(
            ast[inner],
            Stmt::If {
                condition: Expr::Arg(0),
                then_branch: b,
                else_branch: Some(c),
            }
        );
    }

    #[test]
    fn multi_statement_branch_keeps_braces_on_whole_chain() {
        let mut ast = Ast::new();
        let a = call_stmt(&mut ast, 1);
        let b = call_stmt(&mut ast, 2);
        let c = call_stmt(&mut ast, 3);
        let then_branch = ast.block(vec![a]);
        let else_branch = ast.block(vec![b, c]);
        let branch = if_stmt(&mut ast, then_branch, Some(else_branch));
        let root = ast.block(vec![branch]);
        normalize_blocks(&mut ast, root, &defaults(), true);
        assert!(matches!(ast[branch], Stmt::If { then_branch: t, .. } if t == then_branch));
    }

    #[test]
    fn dangling_else_keeps_braces() {
        let mut ast = Ast::new();
        let a = call_stmt(&mut ast, 1);
        let b = call_stmt(&mut ast, 2);
        let inner_then = ast.block(vec![a]);
        let inner = if_stmt(&mut ast, inner_then, None);
        let then_branch = ast.block(vec![inner]);
        let else_branch = ast.block(vec![b]);
        let outer = if_stmt(&mut ast, then_branch, Some(else_branch));
        let root = ast.block(vec![outer]);
        normalize_blocks(&mut ast, root, &defaults(), true);
        assert!(matches!(ast[outer], Stmt::If { then_branch: t, .. } if t == then_branch));
        // The inner if has no else of its own and loses its braces
        assert!(matches!(ast[inner], Stmt::If { then_branch: t, .. } if t == a));
    }

    #[test]
    fn always_use_braces_wraps_bare_bodies() {
        let mut ast = Ast::new();
        let a = call_stmt(&mut ast, 1);
        let looped = ast.alloc(Stmt::Loop(LoopConstruct {
            kind: LoopKind::While,
            condition: Some(Expr::Arg(0)),
            body: a,
            initializer: None,
            increment: Vec::new(),
            binding: None,
        }));
        let root = ast.block(vec![looped]);
        let settings = DecompilerSettings {
            always_use_braces: true,
            ..DecompilerSettings::default()
        };
        normalize_blocks(&mut ast, root, &settings, true);
        let Stmt::Loop(l) = &ast[looped] else {
            panic!("not a loop");
        };
        assert_eq!(ast.items(l.body), &[a]);
    }

    #[test]
    fn second_run_changes_nothing() {
        let mut ast = Ast::new();
        let a = call_stmt(&mut ast, 1);
        let b = call_stmt(&mut ast, 2);
        let c = call_stmt(&mut ast, 3);
        let nop = ast.alloc(Stmt::Nop);
        let body = ast.block(vec![a]);
        let looped = ast.alloc(Stmt::Loop(LoopConstruct {
            kind: LoopKind::While,
            condition: Some(Expr::Arg(0)),
            body,
            initializer: None,
            increment: Vec::new(),
            binding: None,
        }));
        let then_branch = ast.block(vec![looped]);
        let inner_else = ast.block(vec![b, c]);
        let inner = if_stmt(&mut ast, then_branch, Some(inner_else));
        let nested = ast.block(vec![inner, nop]);
        let label = ast.alloc(Stmt::Label(Label(0x20)));
        let ret = ast.alloc(Stmt::Return(None));
        let root = ast.block(vec![nested, label, ret]);
        assert!(normalize_blocks(&mut ast, root, &defaults(), false) > 0);
        let snapshot = ast.clone();
        assert_eq!(normalize_blocks(&mut ast, root, &defaults(), false), 0);
        let before: Vec<_> = snapshot.descendants(root).into_iter().map(|id| snapshot[id].clone()).collect();
        let after: Vec<_> = ast.descendants(root).into_iter().map(|id| ast[id].clone()).collect();
        assert_eq!(before, after);
    }
}
