//! Switch pattern detection on the lifted flow graph
//!
//! A candidate is a dispatch tree: a head plus condition-only blocks that are
//! reached through a single edge and all test one discriminant. Propagating
//! the set of possible discriminant values down the tree gives every target
//! block its label set; the target receiving the unbounded remainder is the
//! default. Equality chains, range checks, offset jump tables and mixtures of
//! the three all reduce to the same mapping.

use super::string_switch;
use super::switch_info::{CaseKey, DispatchKind, SwitchInfo};
use super::value_set::LongSet;
use crate::ast::{BinaryOp, Expr, LocalKind, MethodContext, MethodRef, TypeRef, UnaryOp};
use crate::cfg::flow::{FlowGraph, FlowNode, Terminator};
use crate::config::DecompilerSettings;
use crate::error::Error;
use crate::metadata::{KnownType, OperatorKind, PrimitiveType, ResolverContext, TypeSig};
use petgraph::graph::NodeIndex;
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

/// Largest label set a non-default section may carry
pub const MAX_VALUES_PER_SECTION: u128 = 100;

/// A compiler jump table with `n` entries is read as a switch only when at
/// most `n / MAX_JUMP_TABLE_SLACK` of them fall back to the default
pub const MAX_JUMP_TABLE_SLACK: usize = 4;

/// Comparison-only dispatch needs at least this many equality tests
pub const MIN_EQUALITY_COMPARISONS: usize = 2;

/// Chains longer than this are not treated as a boolean condition tail
const MAX_CONDITION_TAIL: usize = 8;

pub(super) type Predecessors = HashMap<NodeIndex, SmallVec<[NodeIndex; 2]>>;

/// Value domain of a discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Domain {
    Signed,
    /// `uint` string hash; `ldc.i4` constants are reinterpreted as unsigned
    Hash32,
}

impl Domain {
    fn universe(self) -> LongSet {
        match self {
            Domain::Signed => LongSet::full(),
            Domain::Hash32 => LongSet::range(0, u32::MAX as i64),
        }
    }

    fn constant(self, value: i64) -> i64 {
        match self {
            Domain::Hash32 if value < 0 && value >= i32::MIN as i64 => value + (1i64 << 32),
            _ => value,
        }
    }
}

/// Values reaching each exit of a dispatch tree
#[derive(Debug, Default)]
pub(super) struct DispatchTree {
    pub leaves: Vec<(NodeIndex, LongSet)>,
    /// Dispatch blocks below the root
    pub inner: Vec<NodeIndex>,
    pub equality_compares: usize,
    /// Entry targets of every jump table in the tree
    pub tables: Vec<Vec<NodeIndex>>,
    visited: HashSet<NodeIndex>,
}

impl DispatchTree {
    fn add_leaf(&mut self, target: NodeIndex, set: LongSet) {
        match self.leaves.iter_mut().find(|(t, _)| *t == target) {
            Some((_, existing)) => *existing = existing.union(&set),
            None => self.leaves.push((target, set)),
        }
    }

    /// The one leaf too large to be a case section
    pub fn default_leaf(&self) -> Option<NodeIndex> {
        let mut large = self
            .leaves
            .iter()
            .filter(|(_, set)| set.len() > MAX_VALUES_PER_SECTION);
        let default = large.next()?;
        if large.next().is_some() {
            log::debug!("Dispatch has more than one unbounded target");
            return None;
        }
        Some(default.0)
    }
}

/// Walks a dispatch tree below a root block
pub(super) struct TreeWalker<'g> {
    pub graph: &'g FlowGraph,
    pub preds: &'g Predecessors,
    pub lowered: &'g HashSet<NodeIndex>,
    pub domain: Domain,
    pub discriminant: &'g Expr,
}

impl TreeWalker<'_> {
    /// `None` when the root does not test the discriminant or a dispatch edge
    /// can never be taken
    pub fn walk(&self, root: NodeIndex) -> Option<DispatchTree> {
        let mut tree = DispatchTree::default();
        self.explore(root, true, self.domain.universe(), &mut tree)?;
        Some(tree)
    }

    fn is_inner(&self, node: NodeIndex, tree: &DispatchTree) -> bool {
        let flow = self.graph.node(node);
        !tree.visited.contains(&node)
            && !flow.removed
            && flow.statements.is_empty()
            && flow.handler_of.is_none()
            && !self.lowered.contains(&node)
            && self.preds.get(&node).map_or(false, |p| p.len() == 1)
    }

    fn explore(
        &self,
        node: NodeIndex,
        root: bool,
        set: LongSet,
        tree: &mut DispatchTree,
    ) -> Option<()> {
        if set.is_empty() {
            log::trace!("Dispatch edge into {} is never taken", node.index());
            return None;
        }
        if !root && !self.is_inner(node, tree) {
            tree.add_leaf(node, set);
            return Some(());
        }

        match &self.graph.node(node).terminator {
            Terminator::Branch {
                condition,
                then_target,
                else_target,
            } => {
                let Some((taken, equality)) =
                    condition_set(condition, self.discriminant, self.domain)
                else {
                    if root {
                        return None;
                    }
                    tree.add_leaf(node, set);
                    return Some(());
                };
                tree.visited.insert(node);
                if !root {
                    tree.inner.push(node);
                }
                if equality {
                    tree.equality_compares += 1;
                }
                self.explore(*then_target, false, set.intersect(&taken), tree)?;
                self.explore(*else_target, false, set.intersect(&taken.complement()), tree)
            }
            Terminator::JumpTable {
                value,
                targets,
                default,
            } if self.domain == Domain::Signed => {
                let (base, k) = value.split_offset();
                if base != self.discriminant || targets.is_empty() {
                    if root {
                        return None;
                    }
                    tree.add_leaf(node, set);
                    return Some(());
                }
                tree.visited.insert(node);
                if !root {
                    tree.inner.push(node);
                }
                tree.tables.push(targets.clone());
                let last = k.checked_add(targets.len() as i64 - 1)?;
                for (i, target) in targets.iter().enumerate() {
                    let value = k + i as i64;
                    if set.contains(value) {
                        tree.add_leaf(*target, LongSet::point(value));
                    }
                }
                let outside = LongSet::range(k, last).complement();
                self.explore(*default, false, set.intersect(&outside), tree)
            }
            _ => {
                if root {
                    return None;
                }
                tree.add_leaf(node, set);
                Some(())
            }
        }
    }
}

fn mirror(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::Le => BinaryOp::Ge,
        BinaryOp::Ge => BinaryOp::Le,
        other => other,
    }
}

fn relation_set(op: BinaryOp, c: i64) -> LongSet {
    match op {
        BinaryOp::Eq => LongSet::point(c),
        BinaryOp::Ne => LongSet::point(c).complement(),
        BinaryOp::Lt => LongSet::below(c),
        BinaryOp::Le => LongSet::range(i64::MIN, c),
        BinaryOp::Gt => LongSet::above(c),
        _ => LongSet::range(c, i64::MAX),
    }
}

fn is_unsigned_cast(expr: &Expr) -> Option<&Expr> {
    match expr {
        Expr::Cast {
            ty: TypeRef::Primitive(PrimitiveType::U4 | PrimitiveType::U8),
            operand,
        } => Some(operand),
        _ => None,
    }
}

/// Values of `discriminant` for which `condition` holds, and whether the test
/// is an equality
pub(super) fn condition_set(
    condition: &Expr,
    discriminant: &Expr,
    domain: Domain,
) -> Option<(LongSet, bool)> {
    match condition {
        Expr::Unary {
            op: UnaryOp::Not,
            operand,
            method: None,
        } => condition_set(operand, discriminant, domain).map(|(s, eq)| (s.complement(), eq)),
        Expr::Binary {
            op,
            left,
            right,
            method: None,
        } if op.is_comparison() => {
            if let Some(c) = right.as_int() {
                compare_set(*op, left, c, discriminant, domain)
            } else if let Some(c) = left.as_int() {
                compare_set(mirror(*op), right, c, discriminant, domain)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn compare_set(
    op: BinaryOp,
    operand: &Expr,
    c: i64,
    discriminant: &Expr,
    domain: Domain,
) -> Option<(LongSet, bool)> {
    let equality = matches!(op, BinaryOp::Eq | BinaryOp::Ne);
    if operand == discriminant {
        return Some((relation_set(op, domain.constant(c)), equality));
    }
    if let Some(inner) = is_unsigned_cast(operand) {
        if inner == discriminant {
            return Some((relation_set(op, domain.constant(c)), equality));
        }
        // (uint)(x - k) <= c  <=>  k <= x <= k + c
        let (base, k) = inner.split_offset();
        if base != discriminant || domain != Domain::Signed || c < 0 || equality {
            return None;
        }
        let up_to = |hi: i64| LongSet::range(k, hi);
        let at_most = up_to(k.checked_add(c)?);
        let below = if c == 0 {
            LongSet::empty()
        } else {
            up_to(k.checked_add(c - 1)?)
        };
        let set = match op {
            BinaryOp::Le => at_most,
            BinaryOp::Gt => at_most.complement(),
            BinaryOp::Lt => below,
            _ => below.complement(),
        };
        return Some((set, false));
    }
    if equality && domain == Domain::Signed {
        let (base, k) = operand.split_offset();
        if base == discriminant && k != 0 {
            return Some((relation_set(op, c.checked_add(k)?), true));
        }
    }
    None
}

/// The non-constant side of a head comparison, with offsets stripped
pub(super) fn compared_operand(condition: &Expr) -> Option<&Expr> {
    match condition {
        Expr::Unary {
            op: UnaryOp::Not,
            operand,
            method: None,
        } => compared_operand(operand),
        Expr::Binary {
            op,
            left,
            right,
            method: None,
        } if op.is_comparison() => {
            let operand: &Expr = if right.as_int().is_some() {
                left
            } else if left.as_int().is_some() {
                right
            } else {
                return None;
            };
            let operand = is_unsigned_cast(operand).unwrap_or(operand);
            Some(operand.split_offset().0)
        }
        _ => None,
    }
}

/// A recognized dispatch, not yet written into the graph
#[derive(Debug)]
pub(super) struct Candidate {
    pub discriminant: Expr,
    pub pairs: Vec<(CaseKey, NodeIndex)>,
    pub default: NodeIndex,
    pub dispatch_blocks: Vec<NodeIndex>,
    pub kind: DispatchKind,
    /// Head statement indices that belong to the dispatch
    pub consumed: Vec<usize>,
    /// Statements of removed dispatch blocks that must survive
    pub hoisted: Vec<Expr>,
}

/// Switch detector for one method
pub struct SwitchDetector<'a> {
    pub(super) resolver: ResolverContext<'a>,
    settings: &'a DecompilerSettings,
    pub(super) lowered: HashSet<NodeIndex>,
    diagnostics: Vec<Error>,
}

impl<'a> SwitchDetector<'a> {
    pub fn new(resolver: ResolverContext<'a>, settings: &'a DecompilerSettings) -> Self {
        Self {
            resolver,
            settings,
            lowered: HashSet::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Rewrite every recognized dispatch into a [`Terminator::Switch`] and
    /// lower the jump tables that do not read as source switches. Returns the
    /// recoverable diagnostics.
    pub fn run(mut self, graph: &mut FlowGraph, context: &mut MethodContext) -> Vec<Error> {
        let mut preds = graph.predecessors();
        for head in graph.live_nodes() {
            if graph.node(head).removed || self.lowered.contains(&head) {
                continue;
            }
            match self.detect(graph, &preds, head) {
                Some(candidate) => {
                    self.apply(graph, head, candidate);
                    preds = graph.predecessors();
                }
                None => {
                    if matches!(graph.node(head).terminator, Terminator::JumpTable { .. }) {
                        self.lower_jump_table(graph, context, head);
                        preds = graph.predecessors();
                    }
                }
            }
        }
        self.diagnostics
    }

    fn detect(
        &mut self,
        graph: &FlowGraph,
        preds: &Predecessors,
        head: NodeIndex,
    ) -> Option<Candidate> {
        if self.settings.switch_statement_on_string {
            if let Some(candidate) = string_switch::detect(self, graph, preds, head) {
                return Some(candidate);
            }
        }
        if let Some(candidate) = self.detect_nullable(graph, preds, head) {
            return Some(candidate);
        }
        self.detect_integer(graph, preds, head)
    }

    fn detect_integer(
        &mut self,
        graph: &FlowGraph,
        preds: &Predecessors,
        head: NodeIndex,
    ) -> Option<Candidate> {
        let discriminant = match &graph.node(head).terminator {
            Terminator::Branch { condition, .. } => compared_operand(condition)?,
            Terminator::JumpTable { value, .. } => value.split_offset().0,
            _ => return None,
        }
        .clone();
        let walker = TreeWalker {
            graph,
            preds,
            lowered: &self.lowered,
            domain: Domain::Signed,
            discriminant: &discriminant,
        };
        let tree = walker.walk(head)?;
        let dispatch_blocks = tree.inner.clone();
        self.integer_candidate(graph, preds, head, discriminant, tree, dispatch_blocks, None)
    }

    /// `if (v.HasValue) switch (v.GetValueOrDefault()) ...` with the null
    /// target as `case null` when it is not the default
    fn detect_nullable(
        &mut self,
        graph: &FlowGraph,
        preds: &Predecessors,
        head: NodeIndex,
    ) -> Option<Candidate> {
        let Terminator::Branch {
            condition,
            then_target,
            else_target,
        } = &graph.node(head).terminator
        else {
            return None;
        };
        let (value, positive) = self.has_value_test(condition)?;
        let (value_target, null_target) = if positive {
            (*then_target, *else_target)
        } else {
            (*else_target, *then_target)
        };
        let node = graph.node(value_target);
        if !self.is_dispatch_block(graph, preds, value_target) {
            return None;
        }

        let (compare, temp) = match node.statements.as_slice() {
            [] => {
                let operand = match &node.terminator {
                    Terminator::Branch { condition, .. } => compared_operand(condition)?,
                    Terminator::JumpTable { value, .. } => value.split_offset().0,
                    _ => return None,
                };
                if !self.is_get_value_or_default(operand, &value) {
                    return None;
                }
                (operand.clone(), None)
            }
            [stmt @ Expr::Assign { target, value: read }]
                if target.as_local().is_some() && self.is_get_value_or_default(read, &value) =>
            {
                ((**target).clone(), Some(stmt.clone()))
            }
            _ => return None,
        };

        let walker = TreeWalker {
            graph,
            preds,
            lowered: &self.lowered,
            domain: Domain::Signed,
            discriminant: &compare,
        };
        let tree = walker.walk(value_target)?;
        let mut dispatch_blocks = tree.inner.clone();
        dispatch_blocks.push(value_target);
        let mut candidate = self.integer_candidate(
            graph,
            preds,
            head,
            value,
            tree,
            dispatch_blocks,
            Some(null_target),
        )?;

        if let (Some(stmt), Some(local)) = (temp, compare.as_local()) {
            let mut excluded = candidate.dispatch_blocks.clone();
            excluded.push(head);
            if local_read_outside(graph, local, &excluded)
                || graph.node(head).statements.iter().any(|s| s.reads_local(local))
            {
                candidate.hoisted.push(stmt);
            }
        }
        log::debug!(
            "Nullable switch at IL_{:04x} (null label: {})",
            graph.node(head).offset,
            candidate.pairs.iter().any(|(k, _)| *k == CaseKey::Null)
        );
        Some(candidate)
    }

    #[allow(clippy::too_many_arguments)]
    fn integer_candidate(
        &mut self,
        graph: &FlowGraph,
        preds: &Predecessors,
        head: NodeIndex,
        discriminant: Expr,
        tree: DispatchTree,
        dispatch_blocks: Vec<NodeIndex>,
        null_target: Option<NodeIndex>,
    ) -> Option<Candidate> {
        if !dispatch_blocks.is_empty() && discriminant.has_side_effects() {
            return None;
        }
        let default = tree.default_leaf()?;
        let kind = if tree.tables.is_empty() {
            DispatchKind::Comparisons
        } else {
            DispatchKind::JumpTable
        };

        let mut pairs: Vec<(CaseKey, NodeIndex)> = Vec::new();
        for (target, set) in &tree.leaves {
            if *target != default {
                pairs.extend(set.values().map(|v| (CaseKey::Int(v), *target)));
            }
        }

        match kind {
            DispatchKind::Comparisons => {
                if tree.equality_compares < MIN_EQUALITY_COMPARISONS {
                    log::trace!(
                        "IL_{:04x}: {} equality tests, not a switch",
                        graph.node(head).offset,
                        tree.equality_compares
                    );
                    return None;
                }
                if !self.settings.sparse_integer_switch && !is_contiguous(&pairs) {
                    log::trace!(
                        "IL_{:04x}: sparse label set with sparse switches disabled",
                        graph.node(head).offset
                    );
                    return None;
                }
            }
            _ => {
                for table in &tree.tables {
                    let used = table.iter().filter(|t| **t != default).count();
                    if used == 0 || table.len() > MAX_JUMP_TABLE_SLACK * used {
                        log::debug!(
                            "IL_{:04x}: jump table of {} entries with {} cases is too sparse",
                            graph.node(head).offset,
                            table.len(),
                            used
                        );
                        return None;
                    }
                }
            }
        }

        if let Some(null_target) = null_target {
            if null_target != default {
                pairs.push((CaseKey::Null, null_target));
            }
        }

        let candidate = Candidate {
            discriminant,
            pairs,
            default,
            dispatch_blocks,
            kind,
            consumed: Vec::new(),
            hoisted: Vec::new(),
        };
        self.validate(graph, preds, head, candidate)
    }

    /// Checks shared by every dispatch kind
    pub(super) fn validate(
        &mut self,
        graph: &FlowGraph,
        preds: &Predecessors,
        head: NodeIndex,
        candidate: Candidate,
    ) -> Option<Candidate> {
        let sections: HashSet<NodeIndex> = candidate
            .pairs
            .iter()
            .map(|(_, t)| *t)
            .filter(|t| *t != candidate.default)
            .collect();
        if sections.is_empty() {
            return None;
        }
        let from_comparisons = matches!(
            candidate.kind,
            DispatchKind::Comparisons | DispatchKind::StringChain
        );
        if from_comparisons && sections.len() < 2 {
            log::trace!(
                "IL_{:04x}: single section, left as if",
                graph.node(head).offset
            );
            return None;
        }

        let mut exits: HashSet<NodeIndex> = sections.clone();
        exits.insert(candidate.default);
        let mut ordered: Vec<NodeIndex> = sections.into_iter().collect();
        ordered.sort_by_key(|n| n.index());
        for section in ordered {
            if is_condition_tail(graph, preds, section, &exits) {
                let offset = graph.node(head).offset;
                let message = format!(
                    "block IL_{:04x} combines the dispatch with another condition",
                    graph.node(section).offset
                );
                log::debug!("Rejected switch at IL_{:04x}: {}", offset, message);
                self.diagnostics
                    .push(Error::AmbiguousSwitchShape { offset, message });
                return None;
            }
        }
        Some(candidate)
    }

    /// Block that may be folded into a dispatch tree
    pub(super) fn is_dispatch_block(
        &self,
        graph: &FlowGraph,
        preds: &Predecessors,
        node: NodeIndex,
    ) -> bool {
        let flow = graph.node(node);
        !flow.removed
            && flow.handler_of.is_none()
            && !self.lowered.contains(&node)
            && preds.get(&node).map_or(false, |p| p.len() == 1)
    }

    /// Whether a resolved call is declared on the given framework type
    pub(super) fn declared_on(&self, method: &MethodRef, known: KnownType) -> bool {
        self.resolver
            .method(method.token)
            .map(|m| self.resolver.declared_on(&m, known))
            .unwrap_or(false)
    }

    fn has_value_test(&self, condition: &Expr) -> Option<(Expr, bool)> {
        match condition {
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
                method: None,
            } => self.has_value_test(operand).map(|(v, p)| (v, !p)),
            Expr::Call {
                method,
                receiver: Some(receiver),
                args,
            } if args.is_empty()
                && method.name == "get_HasValue"
                && self.declared_on(method, KnownType::Nullable) =>
            {
                Some(((**receiver).clone(), true))
            }
            _ => None,
        }
    }

    fn is_get_value_or_default(&self, expr: &Expr, value: &Expr) -> bool {
        match expr {
            Expr::Call {
                method,
                receiver: Some(receiver),
                args,
            } => {
                args.is_empty()
                    && method.name == "GetValueOrDefault"
                    && receiver.as_ref() == value
                    && self.declared_on(method, KnownType::Nullable)
            }
            _ => false,
        }
    }

    fn apply(&mut self, graph: &mut FlowGraph, head: NodeIndex, candidate: Candidate) {
        let Candidate {
            discriminant,
            pairs,
            default,
            dispatch_blocks,
            kind,
            mut consumed,
            hoisted,
        } = candidate;

        {
            let node = graph.node_mut(head);
            consumed.sort_unstable();
            for index in consumed.into_iter().rev() {
                if index < node.statements.len() {
                    node.statements.remove(index);
                }
            }
            node.statements.extend(hoisted);
        }
        for block in &dispatch_blocks {
            graph.node_mut(*block).removed = true;
        }

        let mut info = SwitchInfo::from_pairs(discriminant, pairs, default, dispatch_blocks, kind);
        self.inline_discriminant(graph, head, &mut info);
        info.discriminant = self.convert_discriminant(info.discriminant);

        log::debug!(
            "Switch at IL_{:04x}: {:?}, {} labels in {} cases, default IL_{:04x}",
            graph.node(head).offset,
            info.kind,
            info.key_count(),
            info.cases.len(),
            graph.node(info.default_block).offset
        );
        graph.node_mut(head).terminator = Terminator::Switch(Box::new(info));
    }

    /// `tmp = e; switch (tmp)` becomes `switch (e)` when `tmp` is read nowhere else
    fn inline_discriminant(&self, graph: &mut FlowGraph, head: NodeIndex, info: &mut SwitchInfo) {
        let Some(local) = info.discriminant.as_local() else {
            return;
        };
        let statements = &graph.node(head).statements;
        let Some((last, earlier)) = statements.split_last() else {
            return;
        };
        let Some((target, value)) = last.as_assignment() else {
            return;
        };
        if target.as_local() != Some(local) || earlier.iter().any(|s| s.reads_local(local)) {
            return;
        }
        let mut excluded = info.dispatch_blocks.clone();
        excluded.push(head);
        if local_read_outside(graph, local, &excluded) {
            return;
        }
        let value = value.clone();
        graph.node_mut(head).statements.pop();
        info.discriminant = value;
    }

    /// A user-defined conversion on the discriminant is written as a cast,
    /// whichever kind of conversion the type declares
    fn convert_discriminant(&self, discriminant: Expr) -> Expr {
        let converted = match &discriminant {
            Expr::Call {
                method,
                receiver: None,
                args,
            } if args.len() == 1
                && matches!(method.operator, Some(OperatorKind::Conversion(_))) =>
            {
                self.resolver
                    .method(method.token)
                    .ok()
                    .and_then(|symbol| symbol.declaring_type)
                    .and_then(|declaring| {
                        self.resolver
                            .types
                            .get_conversion_operators(&TypeSig::Named(declaring))
                            .into_iter()
                            .find(|op| op.method == method.token)
                    })
                    .map(|op| Expr::Cast {
                        ty: TypeRef::from_sig(&op.target, &self.resolver),
                        operand: Box::new(args[0].clone()),
                    })
            }
            _ => None,
        };
        converted.unwrap_or(discriminant)
    }

    /// Replace a jump table that is not a source switch by an if-chain
    fn lower_jump_table(
        &mut self,
        graph: &mut FlowGraph,
        context: &mut MethodContext,
        node: NodeIndex,
    ) {
        let Terminator::JumpTable {
            value,
            targets,
            default,
        } = graph.node(node).terminator.clone()
        else {
            return;
        };
        let (base, k) = value.split_offset();
        let subject = if base.has_side_effects() {
            let ty = context.expr_type(base);
            let temp = context.new_local(LocalKind::Temporary, ty);
            graph
                .node_mut(node)
                .statements
                .push(Expr::assign(Expr::Local(temp), base.clone()));
            Expr::Local(temp)
        } else {
            base.clone()
        };

        let mut groups: Vec<(NodeIndex, Vec<i64>)> = Vec::new();
        for (i, target) in targets.iter().enumerate() {
            if *target == default {
                continue;
            }
            let value = k.wrapping_add(i as i64);
            match groups.iter_mut().find(|(t, _)| t == target) {
                Some((_, values)) => values.push(value),
                None => groups.push((*target, vec![value])),
            }
        }

        let offset = graph.node(node).offset;
        let mut else_target = default;
        let mut head_terminator = Terminator::Goto(default);
        for (i, (target, values)) in groups.iter().enumerate().rev() {
            let Some(condition) = values
                .iter()
                .map(|v| Expr::binary(BinaryOp::Eq, subject.clone(), Expr::int(*v)))
                .reduce(|a, b| Expr::binary(BinaryOp::LogicalOr, a, b))
            else {
                continue;
            };
            let terminator = Terminator::Branch {
                condition,
                then_target: *target,
                else_target,
            };
            if i == 0 {
                head_terminator = terminator;
            } else {
                let added = graph.add_node(FlowNode::new(offset, Vec::new(), terminator));
                self.lowered.insert(added);
                else_target = added;
            }
        }
        graph.node_mut(node).terminator = head_terminator;
        self.lowered.insert(node);
        log::debug!(
            "Lowered jump table at IL_{:04x} into {} comparisons",
            offset,
            groups.len()
        );
    }
}

/// Whether a live block outside `excluded` reads `local`
pub(super) fn local_read_outside(
    graph: &FlowGraph,
    local: crate::ast::LocalId,
    excluded: &[NodeIndex],
) -> bool {
    graph
        .live_nodes()
        .into_iter()
        .filter(|n| !excluded.contains(n))
        .any(|n| graph.node(n).reads_local(local))
}

fn is_contiguous(pairs: &[(CaseKey, NodeIndex)]) -> bool {
    let values: Vec<i64> = pairs
        .iter()
        .filter_map(|(k, _)| match k {
            CaseKey::Int(v) => Some(*v),
            _ => None,
        })
        .collect();
    match (values.iter().min(), values.iter().max()) {
        (Some(lo), Some(hi)) => (*hi as i128 - *lo as i128 + 1) == values.len() as i128,
        _ => true,
    }
}

/// A section that is nothing but further conditions whose every exit is
/// another section or the default: `i == 1 || (i == 2 && a)`
fn is_condition_tail(
    graph: &FlowGraph,
    preds: &Predecessors,
    start: NodeIndex,
    exits: &HashSet<NodeIndex>,
) -> bool {
    let mut stack = vec![start];
    let mut seen = HashSet::new();
    while let Some(node) = stack.pop() {
        if !seen.insert(node) {
            continue;
        }
        if seen.len() > MAX_CONDITION_TAIL {
            return false;
        }
        let flow = graph.node(node);
        if !flow.is_condition_only() {
            return false;
        }
        if node != start && preds.get(&node).map_or(true, |p| p.len() != 1) {
            return false;
        }
        for succ in flow.terminator.successors() {
            if succ == start {
                return false;
            }
            if !exits.contains(&succ) {
                stack.push(succ);
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::LocalId;

    fn x() -> Expr {
        Expr::Local(LocalId(0))
    }

    #[test]
    fn equality_and_range_tests_become_value_sets() {
        let eq = Expr::binary(BinaryOp::Eq, x(), Expr::int(3));
        assert_eq!(
            condition_set(&eq, &x(), Domain::Signed),
            Some((LongSet::point(3), true))
        );
        let gt = Expr::binary(BinaryOp::Lt, Expr::int(10), x());
        assert_eq!(
            condition_set(&gt, &x(), Domain::Signed),
            Some((LongSet::above(10), false))
        );
        let other = Expr::binary(BinaryOp::Eq, Expr::Local(LocalId(1)), Expr::int(3));
        assert_eq!(condition_set(&other, &x(), Domain::Signed), None);
    }

    #[test]
    fn unsigned_range_check_covers_offset_window() {
        // (uint)(x - 5) > 3  <=>  x outside [5, 8]
        let check = Expr::binary(
            BinaryOp::Gt,
            Expr::Cast {
                ty: TypeRef::Primitive(PrimitiveType::U4),
                operand: Box::new(Expr::binary(BinaryOp::Sub, x(), Expr::int(5))),
            },
            Expr::int(3),
        );
        let (set, equality) = condition_set(&check, &x(), Domain::Signed).unwrap();
        assert!(!equality);
        assert_eq!(set, LongSet::range(5, 8).complement());
        assert_eq!(compared_operand(&check), Some(&x()));
    }

    #[test]
    fn hash_constants_are_read_as_unsigned() {
        let check = Expr::binary(BinaryOp::Eq, x(), Expr::int(-1));
        let (set, _) = condition_set(&check, &x(), Domain::Hash32).unwrap();
        assert_eq!(set, LongSet::point(u32::MAX as i64));
    }

    #[test]
    fn contiguity_ignores_order() {
        let n = NodeIndex::new(0);
        let pairs = vec![(CaseKey::Int(3), n), (CaseKey::Int(1), n), (CaseKey::Int(2), n)];
        assert!(is_contiguous(&pairs));
        let sparse = vec![(CaseKey::Int(1), n), (CaseKey::Int(10), n)];
        assert!(!is_contiguous(&sparse));
    }
}
