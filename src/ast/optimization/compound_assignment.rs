//! `x = x op y` to `x op= y`, and increments
//!
//! Folding only applies when the target can be evaluated twice without a
//! difference (locals, parameters, `this` and field/element chains over
//! them) and never through a user-defined operator.
//!
//! With increments enabled, `x = x + 1` becomes `x++`, and the temporaries
//! the lifter introduces for an increment used as a value are folded back:
//! `t = x; x = x + 1; use(t)` is `use(x++)`, `t = x + 1; x = t; use(t)` is
//! `use(++x)`.

use super::{count_local_in, live_items, OptimizationPass, PassContext};
use crate::ast::{Ast, BinaryOp, Expr, LocalId, MethodContext, Stmt, StmtId};
use crate::error::Result;

pub struct CompoundAssignmentPass;

impl OptimizationPass for CompoundAssignmentPass {
    fn name(&self) -> &'static str {
        "CompoundAssignment"
    }

    fn run(&mut self, ctx: &mut PassContext<'_, '_>) -> Result<usize> {
        Ok(fold_compound_assignments(
            ctx.ast,
            ctx.body,
            ctx.context,
            ctx.settings.introduce_increment_and_decrement,
        ))
    }
}

pub fn fold_compound_assignments(
    ast: &mut Ast,
    root: StmtId,
    context: &MethodContext,
    increments: bool,
) -> usize {
    let mut rewrites = 0;
    if increments {
        for block in super::blocks(ast, root) {
            rewrites += fold_increment_temporaries(ast, root, block, context);
        }
    }

    // Statement level: the value is discarded, so increments are postfix
    for id in ast.descendants(root) {
        match &mut ast[id] {
            Stmt::Expr(expr) => {
                if fold_top(expr, increments) {
                    rewrites += 1;
                }
            }
            Stmt::Loop(l) => {
                for expr in &mut l.increment {
                    if fold_top(expr, increments) {
                        rewrites += 1;
                    }
                }
            }
            _ => {}
        }
    }

    super::for_each_expr_mut(ast, root, &mut |expr| {
        expr.walk_mut(&mut |e| {
            if let Some(folded) = compound_form(e, increments, true) {
                *e = folded;
                rewrites += 1;
            }
        });
    });
    rewrites
}

fn fold_top(expr: &mut Expr, increments: bool) -> bool {
    match compound_form(expr, increments, false) {
        Some(folded) => {
            *expr = folded;
            true
        }
        None => false,
    }
}

/// Compound or increment form of `x = x op y`
fn compound_form(expr: &Expr, increments: bool, prefix: bool) -> Option<Expr> {
    let Expr::Assign { target, value } = expr else {
        return None;
    };
    let Expr::Binary {
        op,
        left,
        right,
        method: None,
    } = value.as_ref()
    else {
        return None;
    };
    if left != target || !target.is_side_effect_free_target() || !op.has_compound_form() {
        return None;
    }
    if increments {
        if let Some(increment) = unit_step(*op, right) {
            return Some(Expr::IncDec {
                target: target.clone(),
                increment,
                prefix,
            });
        }
    }
    Some(Expr::CompoundAssign {
        op: *op,
        target: target.clone(),
        value: right.clone(),
    })
}

/// `Some(true)` for `+ 1`, `Some(false)` for `- 1`
fn unit_step(op: BinaryOp, right: &Expr) -> Option<bool> {
    match (op, right.as_int()) {
        (BinaryOp::Add, Some(1)) => Some(true),
        (BinaryOp::Sub, Some(1)) => Some(false),
        _ => None,
    }
}

/// Target and direction of `x = base ± 1`
fn step_of(expr: &Expr) -> Option<(&Expr, &Expr, bool)> {
    let (target, value) = expr.as_assignment()?;
    let Expr::Binary {
        op,
        left,
        right,
        method: None,
    } = value
    else {
        return None;
    };
    Some((target, left.as_ref(), unit_step(*op, right)?))
}

fn assigned_temp<'a>(ast: &'a Ast, id: StmtId, context: &MethodContext) -> Option<(LocalId, &'a Expr)> {
    let Stmt::Expr(expr) = &ast[id] else {
        return None;
    };
    let (target, value) = expr.as_assignment()?;
    let temp = target.as_local().filter(|t| context.is_synthetic(*t))?;
    Some((temp, value))
}

/// Statement kinds that evaluate their expressions exactly once
fn evaluates_once(stmt: &Stmt) -> bool {
    matches!(
        stmt,
        Stmt::Expr(_)
            | Stmt::Return(_)
            | Stmt::Throw(_)
            | Stmt::If { .. }
            | Stmt::Declare { .. }
            | Stmt::Switch(_)
    )
}

fn fold_increment_temporaries(
    ast: &mut Ast,
    root: StmtId,
    block: StmtId,
    context: &MethodContext,
) -> usize {
    let mut rewrites = 0;
    let items = live_items(ast, block);
    let mut k = 0;
    while k + 2 < items.len() {
        let (first, second, user) = (items[k], items[k + 1], items[k + 2]);
        match value_increment(ast, root, first, second, user, context) {
            Some((temp, replacement)) => {
                for expr in ast.exprs_mut(user) {
                    expr.substitute_local(temp, &replacement);
                }
                ast[first] = Stmt::Nop;
                ast[second] = Stmt::Nop;
                rewrites += 1;
                k += 3;
            }
            None => k += 1,
        }
    }
    rewrites
}

/// The temporary and the increment expression replacing it in `user`
fn value_increment(
    ast: &Ast,
    root: StmtId,
    first: StmtId,
    second: StmtId,
    user: StmtId,
    context: &MethodContext,
) -> Option<(LocalId, Expr)> {
    let (temp, saved) = assigned_temp(ast, first, context)?;
    let Stmt::Expr(update) = &ast[second] else {
        return None;
    };
    if !evaluates_once(&ast[user]) {
        return None;
    }
    let uses_in_user: usize = ast.exprs(user).iter().map(|e| e.count_local(temp)).sum();
    if uses_in_user != 1 {
        return None;
    }

    let (target, increment, prefix, temp_reads) = if let Some((target, base, increment)) =
        step_of(update)
    {
        // t = x; x = x + 1  (or x = t + 1)
        if saved != target || (base != target && base.as_local() != Some(temp)) {
            return None;
        }
        let reads = if base.as_local() == Some(temp) { 1 } else { 0 };
        (target.clone(), increment, false, reads)
    } else {
        // t = x + 1; x = t
        let (target, value) = update.as_assignment()?;
        if value.as_local() != Some(temp) {
            return None;
        }
        let Expr::Binary {
            op,
            left,
            right,
            method: None,
        } = saved
        else {
            return None;
        };
        let increment = unit_step(*op, right)?;
        if left.as_ref() != target {
            return None;
        }
        (target.clone(), increment, true, 1)
    };

    if !target.is_side_effect_free_target() || target.reads_local(temp) {
        return None;
    }
    if count_local_in(ast, root, temp) != 2 + temp_reads {
        return None;
    }
    if ast.exprs(user).iter().any(|e| e.any(&|x| *x == target)) {
        return None;
    }
    Some((
        temp,
        Expr::IncDec {
            target: Box::new(target),
            increment,
            prefix,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::LocalKind;
    use crate::metadata::{InstructionStream, LocalSig, MethodId, PrimitiveType, TypeSig, Token};

    fn context() -> MethodContext {
        let int = TypeSig::Primitive(PrimitiveType::I4);
        MethodContext::new(&InstructionStream {
            method: MethodId(1),
            name: "C::M".into(),
            instructions: Vec::new(),
            locals: vec![
                LocalSig { name: Some("i".into()), ty: int.clone() },
                LocalSig { name: Some("total".into()), ty: int },
            ],
            parameters: Vec::new(),
            has_this: false,
            returns_value: false,
            code_size: 0,
        })
    }

    fn i() -> Expr {
        Expr::Local(LocalId(0))
    }

    fn stmt_block(ast: &mut Ast, stmts: Vec<Stmt>) -> StmtId {
        let items = stmts.into_iter().map(|s| ast.alloc(s)).collect();
        ast.block(items)
    }

    #[test]
    fn plus_one_statement_becomes_postfix_increment() {
        let mut ast = Ast::new();
        let root = stmt_block(
            &mut ast,
            vec![Stmt::Expr(Expr::assign(i(), Expr::binary(BinaryOp::Add, i(), Expr::int(1))))],
        );
        fold_compound_assignments(&mut ast, root, &context(), true);
        assert_eq!(
            ast[ast.items(root)[0]],
            Stmt::Expr(Expr::IncDec {
                target: Box::new(i()),
                increment: true,
                prefix: false
            })
        );
    }

    #[test]
    fn increments_disabled_gives_compound_form() {
        let mut ast = Ast::new();
        let root = stmt_block(
            &mut ast,
            vec![Stmt::Expr(Expr::assign(i(), Expr::binary(BinaryOp::Add, i(), Expr::int(1))))],
        );
        fold_compound_assignments(&mut ast, root, &context(), false);
        assert!(matches!(
            &ast[ast.items(root)[0]],
            Stmt::Expr(Expr::CompoundAssign { op: BinaryOp::Add, .. })
        ));
    }

    #[test]
    fn user_defined_operator_is_not_folded() {
        let mut ast = Ast::new();
        let total = Expr::Local(LocalId(1));
        let value = Expr::Binary {
            op: BinaryOp::Add,
            left: Box::new(total.clone()),
            right: Box::new(i()),
            method: Some(Token(0x0600_0003)),
        };
        let root = stmt_block(&mut ast, vec![Stmt::Expr(Expr::assign(total, value))]);
        assert_eq!(fold_compound_assignments(&mut ast, root, &context(), true), 0);
    }

    #[test]
    fn element_chain_with_call_receiver_is_not_folded() {
        let mut ast = Ast::new();
        let call = Expr::Call {
            method: crate::ast::MethodRef {
                token: Token(0x0A00_0001),
                name: "Next".into(),
                declaring_type: None,
                return_type: None,
                operator: None,
                out_params: smallvec::SmallVec::new(),
            },
            receiver: None,
            args: Vec::new(),
        };
        let element = Expr::ArrayElement {
            array: Box::new(Expr::Arg(0)),
            index: Box::new(call),
        };
        let root = stmt_block(
            &mut ast,
            vec![Stmt::Expr(Expr::assign(
                element.clone(),
                Expr::binary(BinaryOp::Mul, element, Expr::int(2)),
            ))],
        );
        assert_eq!(fold_compound_assignments(&mut ast, root, &context(), true), 0);
    }

    #[test]
    fn postfix_increment_used_as_index() {
        let mut ctx = context();
        let temp = ctx.new_local(LocalKind::Temporary, None);
        let mut ast = Ast::new();
        let store = Expr::assign(
            Expr::ArrayElement {
                array: Box::new(Expr::Arg(0)),
                index: Box::new(Expr::Local(temp)),
            },
            Expr::int(7),
        );
        let root = stmt_block(
            &mut ast,
            vec![
                Stmt::Expr(Expr::assign(Expr::Local(temp), i())),
                Stmt::Expr(Expr::assign(i(), Expr::binary(BinaryOp::Add, i(), Expr::int(1)))),
                Stmt::Expr(store),
            ],
        );
        fold_compound_assignments(&mut ast, root, &ctx, true);
        let live = live_items(&ast, root);
        assert_eq!(live.len(), 1);
        let expected = Expr::assign(
            Expr::ArrayElement {
                array: Box::new(Expr::Arg(0)),
                index: Box::new(Expr::IncDec {
                    target: Box::new(i()),
                    increment: true,
                    prefix: false,
                }),
            },
            Expr::int(7),
        );
        assert_eq!(ast[live[0]], Stmt::Expr(expected));
    }
}
