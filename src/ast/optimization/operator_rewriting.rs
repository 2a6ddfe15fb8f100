//! Calls to user-defined operator methods back to operator syntax
//!
//! `op_Addition(a, b)` becomes `a + b` and remembers the method, so later
//! passes can tell it apart from a primitive operator (compound assignment
//! must not fold it). Conversion operators become casts; implicit ones
//! disappear entirely.

use super::{for_each_expr_mut, OptimizationPass, PassContext};
use crate::ast::{Ast, BinaryOp, Expr, Stmt, StmtId, TypeRef, UnaryOp};
use crate::error::Result;
use crate::metadata::{ConversionKind, OperatorKind, ResolverContext};

pub struct OperatorRewritingPass;

impl OptimizationPass for OperatorRewritingPass {
    fn name(&self) -> &'static str {
        "OperatorRewriting"
    }

    fn run(&mut self, ctx: &mut PassContext<'_, '_>) -> Result<usize> {
        Ok(rewrite_operator_calls(
            ctx.ast,
            ctx.body,
            ctx.resolver,
            ctx.settings.introduce_increment_and_decrement,
        ))
    }
}

/// Rewrite operator calls under `root`, returning the number rewritten
pub fn rewrite_operator_calls(
    ast: &mut Ast,
    root: StmtId,
    resolver: ResolverContext<'_>,
    increments: bool,
) -> usize {
    let mut rewrites = 0;
    if increments {
        for id in ast.descendants(root) {
            if let Stmt::Expr(expr) = &mut ast[id] {
                if let Some(inc) = increment_statement(expr) {
                    *expr = inc;
                    rewrites += 1;
                }
            }
        }
    }
    for_each_expr_mut(ast, root, &mut |expr| {
        expr.walk_mut(&mut |e| {
            if rewrite_call(e, &resolver) {
                rewrites += 1;
            }
        });
    });
    rewrites
}

fn rewrite_call(expr: &mut Expr, resolver: &ResolverContext<'_>) -> bool {
    let Expr::Call {
        method,
        receiver: None,
        args,
    } = expr
    else {
        return false;
    };
    let Some(kind) = method.operator else {
        return false;
    };
    let token = method.token;

    let replacement = match (kind, args.len()) {
        (OperatorKind::Conversion(ConversionKind::Implicit), 1) => args.pop(),
        (OperatorKind::Conversion(ConversionKind::Explicit), 1) => {
            match (method.return_type.clone(), args.pop()) {
                (Some(ty), Some(operand)) => Some(Expr::Cast {
                    ty: TypeRef::from_sig(&ty, resolver),
                    operand: Box::new(operand),
                }),
                (None, Some(operand)) => {
                    args.push(operand);
                    None
                }
                _ => None,
            }
        }
        (kind, 2) => BinaryOp::from_operator(kind).and_then(|op| {
            let right = args.pop()?;
            let left = args.pop()?;
            Some(Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                method: Some(token),
            })
        }),
        (kind, 1) => UnaryOp::from_operator(kind).and_then(|op| {
            let operand = args.pop()?;
            Some(Expr::Unary {
                op,
                operand: Box::new(operand),
                method: Some(token),
            })
        }),
        _ => None,
    };
    match replacement {
        Some(r) => {
            *expr = r;
            true
        }
        None => false,
    }
}

/// `x = op_Increment(x)` as a statement is `x++`
fn increment_statement(expr: &Expr) -> Option<Expr> {
    let (target, value) = expr.as_assignment()?;
    let Expr::Call {
        method,
        receiver: None,
        args,
    } = value
    else {
        return None;
    };
    let increment = match method.operator? {
        OperatorKind::Increment => true,
        OperatorKind::Decrement => false,
        _ => return None,
    };
    if args.len() != 1 || args[0] != *target || !target.is_side_effect_free_target() {
        return None;
    }
    Some(Expr::IncDec {
        target: Box::new(target.clone()),
        increment,
        prefix: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{LocalId, MethodRef};
    use crate::metadata::{InMemoryMetadata, Token, TypeSig};
    use smallvec::SmallVec;

    fn op_call(name: &str, kind: OperatorKind, args: Vec<Expr>) -> Expr {
        Expr::Call {
            method: MethodRef {
                token: Token(0x0600_0009),
                name: name.into(),
                declaring_type: Some("Money".into()),
                return_type: Some(TypeSig::Named(Token(0x0200_0002))),
                operator: Some(kind),
                out_params: SmallVec::new(),
            },
            receiver: None,
            args,
        }
    }

    #[test]
    fn binary_operator_call_keeps_its_method() {
        let metadata = InMemoryMetadata::new();
        let resolver = ResolverContext::new(&metadata, &metadata);
        let a = Expr::Local(LocalId(0));
        let b = Expr::Local(LocalId(1));
        let mut ast = Ast::new();
        let stmt = ast.alloc(Stmt::Return(Some(op_call(
            "op_Addition",
            OperatorKind::Addition,
            vec![a.clone(), b.clone()],
        ))));
        let root = ast.block(vec![stmt]);
        assert_eq!(rewrite_operator_calls(&mut ast, root, resolver, true), 1);
        assert_eq!(
            ast[stmt],
            Stmt::Return(Some(Expr::Binary {
                op: BinaryOp::Add,
                left: Box::new(a),
                right: Box::new(b),
                method: Some(Token(0x0600_0009)),
            }))
        );
    }

    #[test]
    fn implicit_conversion_disappears() {
        let metadata = InMemoryMetadata::new();
        let resolver = ResolverContext::new(&metadata, &metadata);
        let a = Expr::Local(LocalId(0));
        let mut ast = Ast::new();
        let stmt = ast.alloc(Stmt::Return(Some(op_call(
            "op_Implicit",
            OperatorKind::Conversion(ConversionKind::Implicit),
            vec![a.clone()],
        ))));
        let root = ast.block(vec![stmt]);
        rewrite_operator_calls(&mut ast, root, resolver, true);
        assert_eq!(ast[stmt], Stmt::Return(Some(a)));
    }

    #[test]
    fn increment_operator_statement_becomes_postfix() {
        let metadata = InMemoryMetadata::new();
        let resolver = ResolverContext::new(&metadata, &metadata);
        let x = Expr::Local(LocalId(0));
        let mut ast = Ast::new();
        let stmt = ast.alloc(Stmt::Expr(Expr::assign(
            x.clone(),
            op_call("op_Increment", OperatorKind::Increment, vec![x.clone()]),
        )));
        let root = ast.block(vec![stmt]);
        rewrite_operator_calls(&mut ast, root, resolver, true);
        assert!(matches!(
            &ast[stmt],
            Stmt::Expr(Expr::IncDec { increment: true, prefix: false, .. })
        ));
    }
}
