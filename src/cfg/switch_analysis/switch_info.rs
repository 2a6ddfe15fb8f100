//! Common types for switch information
//!
//! Produced by the recognizers, consumed by the structurer through
//! [`crate::cfg::Terminator::Switch`].

use crate::ast::{CaseLabel, Expr};
use petgraph::graph::NodeIndex;
use smallvec::SmallVec;

/// A constant a case compares against
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CaseKey {
    Int(i64),
    String(String),
    Null,
}

impl CaseKey {
    pub fn to_label(&self) -> CaseLabel {
        match self {
            CaseKey::Int(v) => CaseLabel::Int(*v),
            CaseKey::String(s) => CaseLabel::String(s.clone()),
            CaseKey::Null => CaseLabel::Null,
        }
    }
}

/// How the compiler lowered the dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    /// `switch` opcode, possibly behind range checks
    JumpTable,
    /// Equality and range comparisons only
    Comparisons,
    /// `string ==` chain
    StringChain,
    /// `ComputeStringHash` buckets with a compare per bucket
    StringHash,
}

/// Keys that share one target block
#[derive(Debug, Clone, PartialEq)]
pub struct CaseInfo {
    pub keys: SmallVec<[CaseKey; 4]>,
    pub target_block: NodeIndex,
}

/// Information about a detected switch pattern
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchInfo {
    /// The value the switch dispatches on, as written in the output
    pub discriminant: Expr,
    /// Cases in ascending key order; keys are pairwise distinct
    pub cases: Vec<CaseInfo>,
    /// Target of every unmatched value
    pub default_block: NodeIndex,
    /// Comparison blocks folded into the head
    pub dispatch_blocks: Vec<NodeIndex>,
    pub kind: DispatchKind,
}

impl SwitchInfo {
    /// Case targets then the default, without duplicates
    pub fn targets(&self) -> Vec<NodeIndex> {
        let mut out: Vec<NodeIndex> = Vec::with_capacity(self.cases.len() + 1);
        for case in &self.cases {
            if !out.contains(&case.target_block) {
                out.push(case.target_block);
            }
        }
        if !out.contains(&self.default_block) {
            out.push(self.default_block);
        }
        out
    }

    /// Case whose target is `block`
    pub fn case_for(&self, block: NodeIndex) -> Option<&CaseInfo> {
        self.cases.iter().find(|c| c.target_block == block)
    }

    pub fn retarget(&mut self, from: NodeIndex, to: NodeIndex) {
        for case in &mut self.cases {
            if case.target_block == from {
                case.target_block = to;
            }
        }
        if self.default_block == from {
            self.default_block = to;
        }
    }

    pub fn key_count(&self) -> usize {
        self.cases.iter().map(|c| c.keys.len()).sum()
    }

    /// Build from `(key, target)` pairs, grouping keys per target
    pub fn from_pairs(
        discriminant: Expr,
        mut pairs: Vec<(CaseKey, NodeIndex)>,
        default_block: NodeIndex,
        dispatch_blocks: Vec<NodeIndex>,
        kind: DispatchKind,
    ) -> Self {
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        let mut cases: Vec<CaseInfo> = Vec::new();
        for (key, target) in pairs {
            match cases.iter_mut().find(|c| c.target_block == target) {
                Some(case) => case.keys.push(key),
                None => cases.push(CaseInfo {
                    keys: SmallVec::from_elem(key, 1),
                    target_block: target,
                }),
            }
        }
        Self {
            discriminant,
            cases,
            default_block,
            dispatch_blocks,
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_are_grouped_by_target_in_key_order() {
        let a = NodeIndex::new(1);
        let b = NodeIndex::new(2);
        let info = SwitchInfo::from_pairs(
            Expr::int(0),
            vec![(CaseKey::Int(7), a), (CaseKey::Int(1), b), (CaseKey::Int(3), a)],
            NodeIndex::new(9),
            vec![],
            DispatchKind::Comparisons,
        );
        assert_eq!(info.cases.len(), 2);
        assert_eq!(info.cases[0].target_block, b);
        assert_eq!(info.cases[1].keys.as_slice(), &[CaseKey::Int(3), CaseKey::Int(7)]);
        assert_eq!(info.targets(), vec![b, a, NodeIndex::new(9)]);
        assert_eq!(info.key_count(), 3);
    }
}
