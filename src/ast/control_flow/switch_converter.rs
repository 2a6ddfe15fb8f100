//! Recognized dispatch to `switch` statements
//!
//! Every distinct target becomes one section carrying all labels that lead
//! there. Sections are structured without a region exit, so reaching the
//! follow always produces an explicit `break`; jumps into another section
//! come out as `goto` and are rewritten to `goto case` afterwards.
//!
//! The follow is never a block that another section falls into or shares
//! code with.

use super::scope::{Scope, SwitchScope, Transfer};
use super::Structurer;
use crate::ast::{CaseLabel, Stmt, StmtId, SwitchConstruct, SwitchKind, SwitchSection};
use crate::cfg::switch_analysis::SwitchInfo;
use crate::error::Result;
use petgraph::graph::NodeIndex;
use smallvec::SmallVec;
use std::collections::HashSet;

/// Stop following a section's blocks past this many
const MAX_SECTION_SEARCH: usize = 512;

impl<'a, 'r> Structurer<'a, 'r> {
    pub(super) fn structure_switch(
        &mut self,
        head: NodeIndex,
        info: SwitchInfo,
        exit: Option<NodeIndex>,
        out: &mut Vec<StmtId>,
    ) -> Result<Option<NodeIndex>> {
        let targets = info.targets();
        let follow = self.switch_follow(head, &info, &targets, exit);

        let mut heads: Vec<NodeIndex> = targets
            .iter()
            .copied()
            .filter(|t| Some(*t) != follow)
            .collect();
        heads.sort_by_key(|n| (self.offset_of(*n), n.index()));
        log::debug!(
            "switch at IL_{:04x}: {} sections, {} labels, follow {:?}",
            self.offset_of(head),
            heads.len(),
            info.key_count(),
            follow.map(|f| self.offset_of(f))
        );

        self.scopes.push(Scope::Switch(SwitchScope {
            follow,
            section_heads: heads.clone(),
        }));
        let sections = self.switch_sections(&info, &heads);
        self.scopes.pop();
        let mut sections = sections?;

        // Labels whose case does nothing but leave the switch
        if let Some(f) = follow {
            if let Some(case) = info.case_for(f) {
                let brk = self.ast.alloc(Stmt::Break);
                let labels = case.keys.iter().map(|k| k.to_label()).collect();
                sections.push(SwitchSection {
                    labels,
                    body: self.ast.block(vec![brk]),
                });
            }
        }

        let stmt = self.ast.alloc(Stmt::Switch(SwitchConstruct {
            discriminant: info.discriminant,
            sections,
            kind: SwitchKind::Statement,
        }));
        out.push(stmt);
        Ok(follow)
    }

    fn switch_sections(
        &mut self,
        info: &SwitchInfo,
        heads: &[NodeIndex],
    ) -> Result<Vec<SwitchSection>> {
        let mut sections = Vec::with_capacity(heads.len());
        for &target in heads {
            let mut labels: SmallVec<[CaseLabel; 2]> = info
                .case_for(target)
                .map(|c| c.keys.iter().map(|k| k.to_label()).collect())
                .unwrap_or_default();
            if target == info.default_block {
                labels.push(CaseLabel::Default);
            }
            let mut items = Vec::new();
            self.structure_from(target, None, &mut items)?;
            sections.push(SwitchSection {
                labels,
                body: self.ast.block(items),
            });
        }
        Ok(sections)
    }

    /// Where control continues after the switch. Candidates are the immediate
    /// post-dominator and the merge points of the open sections, and only those
    /// that close the sections are kept. A post-dominator without a label of
    /// its own wins, otherwise the candidate laid out last.
    fn switch_follow(
        &self,
        head: NodeIndex,
        info: &SwitchInfo,
        targets: &[NodeIndex],
        exit: Option<NodeIndex>,
    ) -> Option<NodeIndex> {
        let ipdom = self
            .analyzer
            .immediate_post_dominator(head)
            .filter(|p| !self.graph.node(*p).removed);
        if let Some(p) = ipdom {
            if self.classify(p, exit) == Transfer::End {
                return Some(p);
            }
        }

        let sections: Vec<NodeIndex> = targets
            .iter()
            .copied()
            .filter(|t| self.classify(*t, exit) == Transfer::Inline)
            .collect();
        let open: Vec<NodeIndex> = targets
            .iter()
            .copied()
            .filter(|t| !self.is_terminating(*t, exit))
            .collect();

        let (raw, mut candidates) = self.frontier_candidates(head, &open, exit);
        if let [single] = open.as_slice() {
            if self.classify(*single, exit) == Transfer::Inline {
                candidates.push(*single);
            }
        }
        candidates.extend(ipdom.filter(|p| self.classify(*p, exit) == Transfer::Inline));
        candidates.sort();
        candidates.dedup();
        candidates.retain(|c| self.closes_sections(*c, &sections, exit));

        let unlabelled = |n: NodeIndex| n != info.default_block && info.case_for(n).is_none();
        let best = candidates
            .into_iter()
            .max_by_key(|c| (Some(*c) == ipdom && unlabelled(*c), self.offset_of(*c)));
        if let Some(c) = best.or_else(|| exit.filter(|e| raw.contains(e))) {
            return Some(c);
        }
        if let Some(p) = ipdom.filter(|p| self.classify(*p, exit) != Transfer::Inline) {
            return Some(p);
        }

        // Cases that all return: unmatched values continue after the switch
        let default = info.default_block;
        (info.case_for(default).is_none()
            && self.classify(default, exit) == Transfer::Inline
            && self.closes_sections(default, &sections, exit))
        .then_some(default)
    }

    /// Whether `follow` can be hoisted after the switch: it must not lead
    /// into any other section, and no two sections may share a block before
    /// reaching it.
    fn closes_sections(
        &self,
        follow: NodeIndex,
        sections: &[NodeIndex],
        exit: Option<NodeIndex>,
    ) -> bool {
        if self.classify(follow, exit) != Transfer::Inline {
            return true;
        }
        let others: HashSet<NodeIndex> = sections
            .iter()
            .copied()
            .filter(|s| *s != follow)
            .collect();
        if self.section_blocks(follow, &others, exit).1 {
            return false;
        }

        let mut stops = others.clone();
        stops.insert(follow);
        let mut claimed = HashSet::new();
        for &section in &others {
            let (blocks, _) = self.section_blocks(section, &stops, exit);
            if blocks.into_iter().any(|b| !claimed.insert(b)) {
                return false;
            }
        }
        true
    }

    /// Blocks structured in place from `start` until control reaches one of
    /// `stops`, and whether it reaches one
    fn section_blocks(
        &self,
        start: NodeIndex,
        stops: &HashSet<NodeIndex>,
        exit: Option<NodeIndex>,
    ) -> (HashSet<NodeIndex>, bool) {
        let mut seen = HashSet::from([start]);
        let mut work = vec![start];
        let mut reached = false;
        while let Some(node) = work.pop() {
            if seen.len() > MAX_SECTION_SEARCH {
                break;
            }
            for succ in self.graph.successors(node) {
                if stops.contains(&succ) {
                    reached = true;
                } else if self.classify(succ, exit) == Transfer::Inline && seen.insert(succ) {
                    work.push(succ);
                }
            }
        }
        (seen, reached)
    }
}
