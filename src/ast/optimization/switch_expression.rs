//! Value-producing switches
//!
//! A switch with a `default` whose every section is a single `return v`
//! reads as `return d switch { ... };`. One whose every section is
//! `x = v; break;` for the same `x` reads as `x = d switch { ... };`. Only the
//! kind changes here; the section bodies keep their statements and the
//! printer picks the values out of them.

use super::{live_items, OptimizationPass, PassContext};
use crate::ast::{Ast, Expr, Stmt, StmtId, SwitchKind, ValueSink};
use crate::config::DecompilerSettings;
use crate::error::Result;

pub struct SwitchExpressionPass;

impl OptimizationPass for SwitchExpressionPass {
    fn name(&self) -> &'static str {
        "SwitchExpressions"
    }

    fn should_run(&self, settings: &DecompilerSettings) -> bool {
        settings.expression_switches
    }

    fn run(&mut self, ctx: &mut PassContext<'_, '_>) -> Result<usize> {
        Ok(recognize_switch_expressions(ctx.ast, ctx.body))
    }
}

pub fn recognize_switch_expressions(ast: &mut Ast, root: StmtId) -> usize {
    let mut rewrites = 0;
    for id in ast.descendants(root) {
        let Stmt::Switch(switch) = &ast[id] else {
            continue;
        };
        if switch.kind != SwitchKind::Statement || !switch.sections.iter().any(|s| s.is_default()) {
            continue;
        }
        let bodies: Vec<StmtId> = switch.sections.iter().map(|s| s.body).collect();
        let Some(sink) = value_sink(ast, &bodies) else {
            continue;
        };
        log::trace!("switch expression with sink {:?}", sink);
        if let Stmt::Switch(switch) = &mut ast[id] {
            switch.kind = SwitchKind::ExpressionValue(sink);
            rewrites += 1;
        }
    }
    rewrites
}

/// Value a section hands back
pub fn section_value<'a>(ast: &'a Ast, body: StmtId) -> Option<&'a Expr> {
    let items = live_items(ast, body);
    match items.as_slice() {
        [only] => match &ast[*only] {
            Stmt::Return(Some(value)) => Some(value),
            _ => None,
        },
        [assign, brk] if ast[*brk] == Stmt::Break => match &ast[*assign] {
            Stmt::Expr(Expr::Assign { value, .. }) => Some(value),
            _ => None,
        },
        _ => None,
    }
}

fn value_sink(ast: &Ast, bodies: &[StmtId]) -> Option<ValueSink> {
    let mut sink: Option<ValueSink> = None;
    for body in bodies {
        let items = live_items(ast, *body);
        let this = match items.as_slice() {
            [only] => match &ast[*only] {
                Stmt::Return(Some(_)) => ValueSink::Return,
                _ => return None,
            },
            [assign, brk] if ast[*brk] == Stmt::Break => match &ast[*assign] {
                Stmt::Expr(Expr::Assign { target, value })
                    if target.is_side_effect_free_target() && !value.any(&|e| e == target.as_ref()) =>
                {
                    ValueSink::Assign((**target).clone())
                }
                _ => return None,
            },
            _ => return None,
        };
        match &sink {
            None => sink = Some(this),
            Some(existing) if *existing == this => {}
            Some(_) => return None,
        }
    }
    sink
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CaseLabel, LocalId, SwitchConstruct, SwitchSection};

    fn switch(ast: &mut Ast, bodies: Vec<(CaseLabel, Vec<Stmt>)>) -> (StmtId, StmtId) {
        let sections = bodies
            .into_iter()
            .map(|(label, stmts)| {
                let items = stmts.into_iter().map(|s| ast.alloc(s)).collect();
                SwitchSection {
                    labels: [label].into_iter().collect(),
                    body: ast.block(items),
                }
            })
            .collect();
        let id = ast.alloc(Stmt::Switch(SwitchConstruct {
            discriminant: Expr::Local(LocalId(0)),
            sections,
            kind: SwitchKind::Statement,
        }));
        (id, ast.block(vec![id]))
    }

    #[test]
    fn returning_sections_become_return_switch() {
        let mut ast = Ast::new();
        let (id, root) = switch(
            &mut ast,
            vec![
                (CaseLabel::Int(1), vec![Stmt::Return(Some(Expr::string("one")))]),
                (CaseLabel::Default, vec![Stmt::Return(Some(Expr::string("many")))]),
            ],
        );
        assert_eq!(recognize_switch_expressions(&mut ast, root), 1);
        let Stmt::Switch(s) = &ast[id] else {
            panic!("not a switch");
        };
        assert_eq!(s.kind, SwitchKind::ExpressionValue(ValueSink::Return));
        assert_eq!(section_value(&ast, s.sections[0].body), Some(&Expr::string("one")));
    }

    #[test]
    fn assignments_to_different_targets_stay_statements() {
        let mut ast = Ast::new();
        let set = |local: u32, v: i64| {
            vec![
                Stmt::Expr(Expr::assign(Expr::Local(LocalId(local)), Expr::int(v))),
                Stmt::Break,
            ]
        };
        let (_, root) = switch(
            &mut ast,
            vec![(CaseLabel::Int(1), set(1, 10)), (CaseLabel::Default, set(2, 20))],
        );
        assert_eq!(recognize_switch_expressions(&mut ast, root), 0);
    }

    #[test]
    fn switch_without_default_is_not_an_expression() {
        let mut ast = Ast::new();
        let (_, root) = switch(
            &mut ast,
            vec![(CaseLabel::Int(1), vec![Stmt::Return(Some(Expr::int(1)))])],
        );
        assert_eq!(recognize_switch_expressions(&mut ast, root), 0);
    }
}
