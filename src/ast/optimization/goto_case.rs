//! Jumps between switch sections
//!
//! The structurer emits a plain `goto` whenever a section continues in a
//! sibling section. Here those jumps become `goto case`/`goto default`, an
//! empty section that only jumps into the next one becomes a fallthrough
//! label, and sections are put into their final order.
//!
//! A jump into the middle of a sibling section has no `goto case` form. The
//! switch is then lowered to explicit dispatch (`if (d == c) goto L;` per
//! label followed by the labelled section bodies) and an `UnresolvedGoto`
//! diagnostic is recorded.

use super::{live_items, OptimizationPass, PassContext};
use crate::ast::{
    Ast, BinaryOp, CaseLabel, Expr, Label, LocalKind, MethodContext, Stmt, StmtId,
    SwitchConstruct, SwitchSection,
};
use crate::error::{Error, Result};
use std::collections::HashMap;

pub struct GotoCasePass;

impl OptimizationPass for GotoCasePass {
    fn name(&self) -> &'static str {
        "GotoCaseResolution"
    }

    fn run(&mut self, ctx: &mut PassContext<'_, '_>) -> Result<usize> {
        Ok(resolve_switch_gotos(
            ctx.ast,
            ctx.body,
            ctx.context,
            ctx.diagnostics,
        ))
    }
}

/// Resolve section-to-section jumps of every switch under `root`
pub fn resolve_switch_gotos(
    ast: &mut Ast,
    root: StmtId,
    context: &mut MethodContext,
    diagnostics: &mut Vec<Error>,
) -> usize {
    let mut labels = DispatchLabels::scan(ast, root);
    let switches: Vec<StmtId> = ast
        .descendants(root)
        .into_iter()
        .filter(|id| matches!(ast[*id], Stmt::Switch(_)))
        .collect();

    let mut rewrites = 0;
    // Innermost first, so a lowered outer switch still sees finished inner ones
    for id in switches.into_iter().rev() {
        let Stmt::Switch(switch) = &ast[id] else {
            continue;
        };
        let switch = switch.clone();
        match plan_jumps(ast, &switch) {
            Ok(jumps) => {
                rewrites += jumps.len();
                for (stmt, replacement) in jumps {
                    ast[stmt] = replacement;
                }
                let sections = merge_fallthrough(ast, switch.sections);
                let sections = order_sections(ast, sections);
                if let Stmt::Switch(s) = &mut ast[id] {
                    s.sections = sections;
                }
            }
            Err(target) => {
                log::warn!(
                    "{}: jump to {} enters the middle of a switch section; using explicit dispatch",
                    context.name,
                    target
                );
                diagnostics.push(Error::UnresolvedGoto {
                    target: target.0 & !Label::DISPATCH,
                });
                let lowered = lower_to_dispatch(ast, switch, context, &mut labels);
                ast[id] = Stmt::Block(lowered);
                rewrites += 1;
            }
        }
    }
    rewrites
}

/// Replacement for every `goto` that targets a sibling section start, or the
/// label that makes the switch unresolvable
fn plan_jumps(ast: &Ast, switch: &SwitchConstruct) -> std::result::Result<Vec<(StmtId, Stmt)>, Label> {
    let mut starts: HashMap<Label, usize> = HashMap::new();
    let mut owner: HashMap<Label, usize> = HashMap::new();
    for (i, section) in switch.sections.iter().enumerate() {
        if let Some(label) = start_label(ast, section.body) {
            starts.insert(label, i);
        }
        for id in ast.descendants(section.body) {
            if let Stmt::Label(label) = ast[id] {
                owner.entry(label).or_insert(i);
            }
        }
    }

    let mut jumps = Vec::new();
    for (i, section) in switch.sections.iter().enumerate() {
        for id in own_statements(ast, section.body, false) {
            let Stmt::Goto(label) = ast[id] else {
                continue;
            };
            if let Some(&target) = starts.get(&label) {
                jumps.push((id, goto_section(&switch.sections[target])));
            } else if owner.get(&label).is_some_and(|o| *o != i) {
                return Err(label);
            }
        }
    }
    Ok(jumps)
}

/// `goto case` for the smallest label of a section, `goto default` when it
/// has no other label
fn goto_section(section: &SwitchSection) -> Stmt {
    section
        .labels
        .iter()
        .filter(|l| **l != CaseLabel::Default)
        .min_by(|a, b| a.order_key().cmp(&b.order_key()))
        .map_or(Stmt::GotoDefault, |l| Stmt::GotoCase(l.clone()))
}

/// Label placed before the first statement of a section
fn start_label(ast: &Ast, body: StmtId) -> Option<Label> {
    let first = *live_items(ast, body).first()?;
    match &ast[first] {
        Stmt::Label(label) => Some(*label),
        Stmt::Block(_) => start_label(ast, first),
        _ => None,
    }
}

/// Statements of a section that belong to this switch: nested switches own
/// their jumps, and loops additionally own `break` when `stop_at_loops`
fn own_statements(ast: &Ast, root: StmtId, stop_at_loops: bool) -> Vec<StmtId> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        out.push(id);
        match &ast[id] {
            Stmt::Switch(_) if id != root => {}
            Stmt::Loop(_) if stop_at_loops => {}
            _ => stack.extend(ast.children(id).into_iter().rev()),
        }
    }
    out
}

fn target_section(ast: &Ast, body: StmtId, sections: &[SwitchSection]) -> Option<usize> {
    let items = live_items(ast, body);
    let [only] = items.as_slice() else {
        return None;
    };
    match &ast[*only] {
        Stmt::GotoCase(label) => sections.iter().position(|s| s.labels.contains(label)),
        Stmt::GotoDefault => sections.iter().position(|s| s.is_default()),
        _ => None,
    }
}

/// Sections that only jump into the section right after them share its body
fn merge_fallthrough(ast: &Ast, mut sections: Vec<SwitchSection>) -> Vec<SwitchSection> {
    let mut i = 0;
    while i + 1 < sections.len() {
        if target_section(ast, sections[i].body, &sections) == Some(i + 1) {
            let merged = sections.remove(i);
            let next = &mut sections[i];
            let mut labels = merged.labels;
            labels.extend(next.labels.drain(..));
            next.labels = labels;
        } else {
            i += 1;
        }
    }
    sections
}

fn is_single_break(ast: &Ast, body: StmtId) -> bool {
    matches!(live_items(ast, body).as_slice(), [only] if ast[*only] == Stmt::Break)
}

/// Ascending by smallest label, `default` after the cases and sections that
/// only `break` last
fn order_sections(ast: &Ast, mut sections: Vec<SwitchSection>) -> Vec<SwitchSection> {
    for section in &mut sections {
        section
            .labels
            .sort_by(|a, b| a.order_key().cmp(&b.order_key()));
    }
    sections.sort_by(|a, b| {
        let key = |s: &SwitchSection| (is_single_break(ast, s.body), s.is_default());
        key(a).cmp(&key(b)).then_with(|| {
            a.first_label()
                .map(CaseLabel::order_key)
                .cmp(&b.first_label().map(CaseLabel::order_key))
        })
    });
    sections
}

/// Allocator for labels of lowered switches
struct DispatchLabels {
    next: u32,
}

impl DispatchLabels {
    fn scan(ast: &Ast, root: StmtId) -> Self {
        let next = ast
            .descendants(root)
            .into_iter()
            .filter_map(|id| match ast[id] {
                Stmt::Label(Label(raw)) if raw & Label::DISPATCH == Label::DISPATCH => {
                    Some((raw & !Label::DISPATCH) + 1)
                }
                _ => None,
            })
            .max()
            .unwrap_or(0);
        Self { next }
    }

    fn fresh(&mut self) -> Label {
        let label = Label(Label::DISPATCH | self.next);
        self.next += 1;
        label
    }
}

fn label_value(label: &CaseLabel) -> Option<Expr> {
    match label {
        CaseLabel::Int(v) => Some(Expr::int(*v)),
        CaseLabel::String(s) => Some(Expr::string(s.clone())),
        CaseLabel::Null => Some(Expr::null()),
        CaseLabel::Default => None,
    }
}

/// Statements replacing a switch whose jumps cannot be written as `goto case`
fn lower_to_dispatch(
    ast: &mut Ast,
    switch: SwitchConstruct,
    context: &mut MethodContext,
    labels: &mut DispatchLabels,
) -> Vec<StmtId> {
    let mut items = Vec::new();
    let discriminant = if switch.discriminant.is_side_effect_free_target() {
        switch.discriminant
    } else {
        let ty = context.expr_type(&switch.discriminant);
        let temp = context.new_local(LocalKind::Temporary, ty);
        items.push(ast.alloc(Stmt::Expr(Expr::assign(
            Expr::Local(temp),
            switch.discriminant,
        ))));
        Expr::Local(temp)
    };

    let end = labels.fresh();
    let entries: Vec<(Label, bool)> = switch
        .sections
        .iter()
        .map(|s| match start_label(ast, s.body) {
            Some(existing) => (existing, false),
            None => (labels.fresh(), true),
        })
        .collect();

    let mut fallback = end;
    for (section, (label, _)) in switch.sections.iter().zip(&entries) {
        if section.is_default() {
            fallback = *label;
        }
        for case in &section.labels {
            let Some(value) = label_value(case) else {
                continue;
            };
            let jump = ast.alloc(Stmt::Goto(*label));
            let then_branch = ast.block(vec![jump]);
            items.push(ast.alloc(Stmt::If {
                condition: Expr::binary(BinaryOp::Eq, discriminant.clone(), value),
                then_branch,
                else_branch: None,
            }));
        }
    }
    items.push(ast.alloc(Stmt::Goto(fallback)));

    for (section, (label, fresh)) in switch.sections.iter().zip(&entries) {
        if *fresh {
            items.push(ast.alloc(Stmt::Label(*label)));
        }
        for id in own_statements(ast, section.body, true) {
            if ast[id] == Stmt::Break {
                ast[id] = Stmt::Goto(end);
            }
        }
        items.push(section.body);
    }
    items.push(ast.alloc(Stmt::Label(end)));
    items
}
