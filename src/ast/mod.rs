//! Statement tree
//!
//! Statements live in an arena ([`Ast`]) and refer to each other by
//! [`StmtId`]. Passes rewrite slots in place or allocate new nodes; nothing
//! holds parent pointers, so removing a node never leaves another pass with a
//! dangling reference.

pub mod context;
pub mod control_flow;
pub mod expr;
pub mod instructions;
pub mod optimization;
pub mod printer;

pub use context::{LocalInfo, LocalKind, MethodContext};
pub use expr::{
    BinaryOp, Constant, Expr, FieldRef, LocalId, MethodRef, TypeRef, UnaryOp,
};

use crate::error::Error;
use crate::metadata::MethodId;
use smallvec::SmallVec;
use std::fmt;
use std::ops::{Index, IndexMut};

/// Arena index of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtId(pub u32);

/// Jump label, named after the IL offset of the block it marks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl Label {
    /// Block that shares its IL offset with another block (node index below)
    pub const SYNTHETIC: u32 = 0x8000_0000;
    /// Section entry or end of a switch lowered to explicit dispatch
    pub const DISPATCH: u32 = 0xC000_0000;
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 & Label::DISPATCH == Label::DISPATCH {
            write!(f, "D_{}", self.0 & !Label::DISPATCH)
        } else if self.0 & Label::SYNTHETIC != 0 {
            write!(f, "L_{}", self.0 & !Label::SYNTHETIC)
        } else {
            write!(f, "IL_{:04x}", self.0)
        }
    }
}

/// One label of a switch section
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CaseLabel {
    Int(i64),
    String(String),
    Null,
    Default,
}

impl CaseLabel {
    /// Sort key: integers ascending, then strings, then null, default last
    pub fn order_key(&self) -> (u8, i64, &str) {
        match self {
            CaseLabel::Int(v) => (0, *v, ""),
            CaseLabel::String(s) => (1, 0, s.as_str()),
            CaseLabel::Null => (2, 0, ""),
            CaseLabel::Default => (3, 0, ""),
        }
    }
}

impl fmt::Display for CaseLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseLabel::Int(v) => write!(f, "{}", v),
            CaseLabel::String(s) => write!(f, "{:?}", s),
            CaseLabel::Null => write!(f, "null"),
            CaseLabel::Default => write!(f, "default"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    While,
    DoWhile,
    For,
    Foreach,
}

/// Element variable and collection of a `foreach`
#[derive(Debug, Clone, PartialEq)]
pub struct ForeachBinding {
    pub variable: LocalId,
    pub collection: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopConstruct {
    pub kind: LoopKind,
    /// `None` means `while (true)`
    pub condition: Option<Expr>,
    pub body: StmtId,
    /// `for` initializer statement (expression or declaration)
    pub initializer: Option<StmtId>,
    pub increment: Vec<Expr>,
    pub binding: Option<ForeachBinding>,
}

/// How a switch hands back its result
#[derive(Debug, Clone, PartialEq)]
pub enum SwitchKind {
    Statement,
    /// Every section yields a value: `return d switch {..}` or `x = d switch {..}`
    ExpressionValue(ValueSink),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueSink {
    Return,
    Assign(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchSection {
    pub labels: SmallVec<[CaseLabel; 2]>,
    pub body: StmtId,
}

impl SwitchSection {
    pub fn is_default(&self) -> bool {
        self.labels.contains(&CaseLabel::Default)
    }

    /// Smallest label by [`CaseLabel::order_key`]
    pub fn first_label(&self) -> Option<&CaseLabel> {
        self.labels.iter().min_by(|a, b| a.order_key().cmp(&b.order_key()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchConstruct {
    pub discriminant: Expr,
    pub sections: Vec<SwitchSection>,
    pub kind: SwitchKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub exception_type: Option<TypeRef>,
    pub variable: Option<LocalId>,
    pub body: StmtId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TryConstruct {
    pub body: StmtId,
    pub catches: Vec<CatchClause>,
    pub finally: Option<StmtId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Emptied slot
    Nop,
    Expr(Expr),
    /// `T x = init;`, or `var x = init;` when the type is unknown
    Declare {
        local: LocalId,
        ty: Option<TypeRef>,
        init: Option<Expr>,
    },
    Block(Vec<StmtId>),
    If {
        condition: Expr,
        then_branch: StmtId,
        else_branch: Option<StmtId>,
    },
    Loop(LoopConstruct),
    Switch(SwitchConstruct),
    Try(TryConstruct),
    Break,
    Continue,
    Return(Option<Expr>),
    /// `None` rethrows the current exception
    Throw(Option<Expr>),
    Goto(Label),
    GotoCase(CaseLabel),
    GotoDefault,
    Label(Label),
    Comment(String),
}

impl Stmt {
    /// Statements after which control never reaches the next statement
    pub fn is_jump(&self) -> bool {
        matches!(
            self,
            Stmt::Break
                | Stmt::Continue
                | Stmt::Return(_)
                | Stmt::Throw(_)
                | Stmt::Goto(_)
                | Stmt::GotoCase(_)
                | Stmt::GotoDefault
        )
    }
}

/// Arena of statements for one method
#[derive(Debug, Clone, Default)]
pub struct Ast {
    nodes: Vec<Stmt>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, stmt: Stmt) -> StmtId {
        let id = StmtId(self.nodes.len() as u32);
        self.nodes.push(stmt);
        id
    }

    pub fn block(&mut self, items: Vec<StmtId>) -> StmtId {
        self.alloc(Stmt::Block(items))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Swap in a new statement, returning the old one
    pub fn replace(&mut self, id: StmtId, stmt: Stmt) -> Stmt {
        std::mem::replace(&mut self.nodes[id.0 as usize], stmt)
    }

    /// Take a statement out, leaving a `Nop`
    pub fn take(&mut self, id: StmtId) -> Stmt {
        self.replace(id, Stmt::Nop)
    }

    /// Items of a block statement (empty slice for anything else)
    pub fn items(&self, id: StmtId) -> &[StmtId] {
        match &self[id] {
            Stmt::Block(items) => items,
            _ => &[],
        }
    }

    /// Items of a block, or the statement itself when it is not a block
    pub fn as_list(&self, id: StmtId) -> Vec<StmtId> {
        match &self[id] {
            Stmt::Block(items) => items.clone(),
            _ => vec![id],
        }
    }

    /// Child statements in source order
    pub fn children(&self, id: StmtId) -> SmallVec<[StmtId; 4]> {
        let mut out = SmallVec::new();
        match &self[id] {
            Stmt::Block(items) => out.extend(items.iter().copied()),
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                out.push(*then_branch);
                if let Some(e) = else_branch {
                    out.push(*e);
                }
            }
            Stmt::Loop(l) => {
                if let Some(init) = l.initializer {
                    out.push(init);
                }
                out.push(l.body);
            }
            Stmt::Switch(s) => out.extend(s.sections.iter().map(|sec| sec.body)),
            Stmt::Try(t) => {
                out.push(t.body);
                out.extend(t.catches.iter().map(|c| c.body));
                if let Some(f) = t.finally {
                    out.push(f);
                }
            }
            _ => {}
        }
        out
    }

    /// Pre-order list of every statement reachable from `root`
    pub fn descendants(&self, root: StmtId) -> Vec<StmtId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            let children = self.children(id);
            for child in children.into_iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Expressions owned directly by a statement
    pub fn exprs(&self, id: StmtId) -> SmallVec<[&Expr; 2]> {
        let mut out = SmallVec::new();
        match &self[id] {
            Stmt::Expr(e) | Stmt::Return(Some(e)) | Stmt::Throw(Some(e)) => out.push(e),
            Stmt::Declare { init: Some(e), .. } => out.push(e),
            Stmt::If { condition, .. } => out.push(condition),
            Stmt::Loop(l) => {
                if let Some(c) = &l.condition {
                    out.push(c);
                }
                out.extend(l.increment.iter());
                if let Some(b) = &l.binding {
                    out.push(&b.collection);
                }
            }
            Stmt::Switch(s) => {
                out.push(&s.discriminant);
                if let SwitchKind::ExpressionValue(ValueSink::Assign(target)) = &s.kind {
                    out.push(target);
                }
            }
            _ => {}
        }
        out
    }

    /// Expressions owned directly by a statement, mutably
    pub fn exprs_mut(&mut self, id: StmtId) -> SmallVec<[&mut Expr; 2]> {
        let mut out = SmallVec::new();
        match &mut self[id] {
            Stmt::Expr(e) | Stmt::Return(Some(e)) | Stmt::Throw(Some(e)) => out.push(e),
            Stmt::Declare { init: Some(e), .. } => out.push(e),
            Stmt::If { condition, .. } => out.push(condition),
            Stmt::Loop(l) => {
                if let Some(c) = &mut l.condition {
                    out.push(c);
                }
                out.extend(l.increment.iter_mut());
                if let Some(b) = &mut l.binding {
                    out.push(&mut b.collection);
                }
            }
            Stmt::Switch(s) => {
                out.push(&mut s.discriminant);
                if let SwitchKind::ExpressionValue(ValueSink::Assign(target)) = &mut s.kind {
                    out.push(target);
                }
            }
            _ => {}
        }
        out
    }

    /// Whether control can leave the end of this statement normally
    pub fn can_complete(&self, id: StmtId) -> bool {
        match &self[id] {
            s if s.is_jump() => false,
            Stmt::Block(items) => match items.iter().rev().find(|i| !matches!(self[**i], Stmt::Nop | Stmt::Comment(_))) {
                Some(last) => self.can_complete(*last) || self.contains_label(id),
                None => true,
            },
            Stmt::If {
                then_branch,
                else_branch: Some(else_branch),
                ..
            } => self.can_complete(*then_branch) || self.can_complete(*else_branch),
            Stmt::Loop(l) if l.condition.is_none() && l.kind != LoopKind::Foreach => {
                self.breaks_out(l.body)
            }
            Stmt::Try(t) => {
                self.can_complete(t.body) || t.catches.iter().any(|c| self.can_complete(c.body))
            }
            Stmt::Switch(s) => match s.kind {
                SwitchKind::ExpressionValue(ValueSink::Return) => false,
                _ => {
                    !s.sections.iter().any(|sec| sec.is_default())
                        || s.sections
                            .iter()
                            .any(|sec| self.can_complete(sec.body) || self.breaks_out(sec.body))
                }
            },
            _ => true,
        }
    }

    fn contains_label(&self, id: StmtId) -> bool {
        self.items(id)
            .iter()
            .any(|i| matches!(self[*i], Stmt::Label(_)))
    }

    /// Whether a loop body contains a `break` bound to that loop
    fn breaks_out(&self, body: StmtId) -> bool {
        let mut stack = vec![body];
        while let Some(id) = stack.pop() {
            match &self[id] {
                Stmt::Break => return true,
                Stmt::Goto(_) => return true,
                Stmt::Loop(_) | Stmt::Switch(_) => {}
                _ => stack.extend(self.children(id)),
            }
        }
        false
    }
}

impl Index<StmtId> for Ast {
    type Output = Stmt;

    fn index(&self, id: StmtId) -> &Stmt {
        &self.nodes[id.0 as usize]
    }
}

impl IndexMut<StmtId> for Ast {
    fn index_mut(&mut self, id: StmtId) -> &mut Stmt {
        &mut self.nodes[id.0 as usize]
    }
}

/// Finished statement tree of one method
#[derive(Debug, Clone)]
pub struct MethodAst {
    pub method: MethodId,
    pub context: MethodContext,
    pub ast: Ast,
    pub body: StmtId,
    /// Recoverable problems resolved by a fallback
    pub diagnostics: Vec<Error>,
}

impl MethodAst {
    /// Every statement of the method body in pre-order
    pub fn statements(&self) -> impl Iterator<Item = (StmtId, &Stmt)> + '_ {
        self.ast
            .descendants(self.body)
            .into_iter()
            .map(move |id| (id, &self.ast[id]))
    }

    /// All switch statements in pre-order
    pub fn switches(&self) -> Vec<&SwitchConstruct> {
        self.statements()
            .filter_map(|(_, s)| match s {
                Stmt::Switch(sw) => Some(sw),
                _ => None,
            })
            .collect()
    }

    /// All loops in pre-order
    pub fn loops(&self) -> Vec<&LoopConstruct> {
        self.statements()
            .filter_map(|(_, s)| match s {
                Stmt::Loop(l) => Some(l),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_leaves_nop_and_keeps_ids_stable() {
        let mut ast = Ast::new();
        let a = ast.alloc(Stmt::Break);
        let b = ast.alloc(Stmt::Continue);
        let block = ast.block(vec![a, b]);
        assert_eq!(ast.take(a), Stmt::Break);
        assert_eq!(ast[a], Stmt::Nop);
        assert_eq!(ast[b], Stmt::Continue);
        assert_eq!(ast.items(block), &[a, b]);
    }

    #[test]
    fn descendants_are_pre_order() {
        let mut ast = Ast::new();
        let inner = ast.alloc(Stmt::Return(None));
        let then_block = ast.block(vec![inner]);
        let cond = ast.alloc(Stmt::If {
            condition: Expr::bool(true),
            then_branch: then_block,
            else_branch: None,
        });
        let root = ast.block(vec![cond]);
        assert_eq!(ast.descendants(root), vec![root, cond, then_block, inner]);
    }

    #[test]
    fn blocks_ending_in_jumps_do_not_complete() {
        let mut ast = Ast::new();
        let ret = ast.alloc(Stmt::Return(None));
        let block = ast.block(vec![ret]);
        assert!(!ast.can_complete(block));
        let empty = ast.block(vec![]);
        assert!(ast.can_complete(empty));
    }

    #[test]
    fn case_labels_sort_ints_before_default() {
        let mut labels = vec![CaseLabel::Default, CaseLabel::Int(5), CaseLabel::Int(-2)];
        labels.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        assert_eq!(
            labels,
            vec![CaseLabel::Int(-2), CaseLabel::Int(5), CaseLabel::Default]
        );
    }
}
