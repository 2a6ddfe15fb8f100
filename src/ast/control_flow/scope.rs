//! Enclosing constructs while a region is being structured
//!
//! `break` binds to the innermost loop or switch, `continue` to the innermost
//! loop. Protected ranges keep blocks of a `try` body or handler from being
//! inlined across the region boundary.

use crate::ast::LocalId;
use crate::il::Offset;
use petgraph::graph::NodeIndex;
use std::collections::HashSet;

/// How control reaches a block from the statement being built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// The block is the region's exit; control simply falls out
    End,
    Break,
    Continue,
    /// Leave a loop through a secondary exit: `flag = k; break;`
    FlagBreak(LocalId, i64),
    Goto(NodeIndex),
    /// Copy a small return/throw block instead of jumping to it
    Duplicate(NodeIndex),
    /// Structure the block here
    Inline,
}

#[derive(Debug, Clone)]
pub struct LoopScope {
    pub header: NodeIndex,
    pub continue_target: NodeIndex,
    pub break_target: Option<NodeIndex>,
    pub body: HashSet<NodeIndex>,
    /// Blocks outside the natural loop that only the loop reaches
    pub owned: HashSet<NodeIndex>,
    pub flag: Option<LocalId>,
    pub flag_exits: Vec<NodeIndex>,
}

impl LoopScope {
    pub fn contains(&self, node: NodeIndex) -> bool {
        self.body.contains(&node) || self.owned.contains(&node)
    }

    /// Flag value selecting a secondary exit (1-based)
    pub fn flag_value(&self, target: NodeIndex) -> Option<(LocalId, i64)> {
        let flag = self.flag?;
        self.flag_exits
            .iter()
            .position(|e| *e == target)
            .map(|i| (flag, i as i64 + 1))
    }
}

#[derive(Debug, Clone)]
pub struct SwitchScope {
    pub follow: Option<NodeIndex>,
    pub section_heads: Vec<NodeIndex>,
}

/// `[start, end)` of a try body or handler
#[derive(Debug, Clone, Copy)]
pub struct RangeScope {
    pub start: Offset,
    pub end: Offset,
}

impl RangeScope {
    pub fn contains(&self, offset: Offset) -> bool {
        self.start <= offset && offset < self.end
    }
}

#[derive(Debug, Clone)]
pub enum Scope {
    Loop(LoopScope),
    Switch(SwitchScope),
    Protected(RangeScope),
}

#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    pub fn push(&mut self, scope: Scope) {
        self.scopes.push(scope);
    }

    pub fn pop(&mut self) -> Option<Scope> {
        self.scopes.pop()
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Innermost loop or switch
    pub fn innermost_breakable(&self) -> Option<&Scope> {
        self.scopes
            .iter()
            .rev()
            .find(|s| matches!(s, Scope::Loop(_) | Scope::Switch(_)))
    }

    pub fn break_target(&self) -> Option<NodeIndex> {
        match self.innermost_breakable()? {
            Scope::Loop(l) => l.break_target,
            Scope::Switch(s) => s.follow,
            Scope::Protected(_) => None,
        }
    }

    pub fn innermost_loop(&self) -> Option<&LoopScope> {
        self.scopes.iter().rev().find_map(|s| match s {
            Scope::Loop(l) => Some(l),
            _ => None,
        })
    }

    pub fn innermost_switch(&self) -> Option<&SwitchScope> {
        self.scopes.iter().rev().find_map(|s| match s {
            Scope::Switch(sw) => Some(sw),
            _ => None,
        })
    }

    /// Innermost scope that limits which blocks may be structured in place:
    /// a loop body or a protected range
    pub fn innermost_container(&self) -> Option<&Scope> {
        self.scopes
            .iter()
            .rev()
            .find(|s| matches!(s, Scope::Loop(_) | Scope::Protected(_)))
    }

    pub fn has_loop(&self, header: NodeIndex) -> bool {
        self.scopes
            .iter()
            .any(|s| matches!(s, Scope::Loop(l) if l.header == header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(i: usize) -> NodeIndex {
        NodeIndex::new(i)
    }

    fn loop_scope() -> LoopScope {
        LoopScope {
            header: n(1),
            continue_target: n(4),
            break_target: Some(n(9)),
            body: [n(1), n(2), n(3), n(4)].into_iter().collect(),
            owned: HashSet::new(),
            flag: None,
            flag_exits: Vec::new(),
        }
    }

    #[test]
    fn break_binds_to_switch_inside_loop() {
        let mut scopes = ScopeStack::default();
        scopes.push(Scope::Loop(loop_scope()));
        scopes.push(Scope::Switch(SwitchScope {
            follow: Some(n(3)),
            section_heads: vec![n(2)],
        }));
        assert_eq!(scopes.break_target(), Some(n(3)));
        assert_eq!(scopes.innermost_loop().map(|l| l.continue_target), Some(n(4)));
        scopes.pop();
        assert_eq!(scopes.break_target(), Some(n(9)));
        assert!(scopes.has_loop(n(1)));
    }

    #[test]
    fn flag_values_start_at_one() {
        let mut scope = loop_scope();
        scope.flag = Some(LocalId(7));
        scope.flag_exits = vec![n(10), n(11)];
        assert_eq!(scope.flag_value(n(11)), Some((LocalId(7), 2)));
        assert_eq!(scope.flag_value(n(9)), None);
    }
}
