//! String switch detection
//!
//! Two compiler lowerings describe the same logical switch: a chain of
//! `string ==` calls, and a `ComputeStringHash` dispatch whose buckets each
//! hold such a chain. The hash and its buckets never appear in the output.

use super::switch_detector::{
    local_read_outside, Candidate, Domain, Predecessors, SwitchDetector, TreeWalker,
    MIN_EQUALITY_COMPARISONS,
};
use super::switch_info::{CaseKey, DispatchKind};
use crate::ast::{BinaryOp, Constant, Expr, LocalId, UnaryOp};
use crate::cfg::flow::{FlowGraph, Terminator};
use crate::metadata::KnownType;
use petgraph::graph::NodeIndex;

const FNV_OFFSET_BASIS: u32 = 2166136261;
const FNV_PRIME: u32 = 16777619;

/// Hash used by compiler-generated string switches (FNV-1a over UTF-16 units)
pub fn compute_string_hash(value: &str) -> u32 {
    value.encode_utf16().fold(FNV_OFFSET_BASIS, |hash, unit| {
        (hash ^ unit as u32).wrapping_mul(FNV_PRIME)
    })
}

/// One `subject == key` test
struct StringTest<'e> {
    subject: &'e Expr,
    key: CaseKey,
    /// The then-edge is taken on a match
    positive: bool,
}

fn string_test<'e>(detector: &SwitchDetector<'_>, condition: &'e Expr) -> Option<StringTest<'e>> {
    match condition {
        Expr::Unary {
            op: UnaryOp::Not,
            operand,
            method: None,
        } => string_test(detector, operand).map(|t| StringTest {
            positive: !t.positive,
            ..t
        }),
        Expr::Call {
            method,
            receiver: None,
            args,
        } if args.len() == 2
            && matches!(method.name.as_str(), "op_Equality" | "Equals")
            && detector.declared_on(method, KnownType::String) =>
        {
            match (&args[0], &args[1]) {
                (subject, Expr::Const(Constant::String(s)))
                | (Expr::Const(Constant::String(s)), subject) => Some(StringTest {
                    subject,
                    key: CaseKey::String(s.clone()),
                    positive: true,
                }),
                _ => None,
            }
        }
        Expr::Binary {
            op: op @ (BinaryOp::Eq | BinaryOp::Ne),
            left,
            right,
            method: None,
        } if right.is_null() && !left.is_null() => Some(StringTest {
            subject: left,
            key: CaseKey::Null,
            positive: *op == BinaryOp::Eq,
        }),
        _ => None,
    }
}

/// Follow `string ==` tests from `start` and return the block reached when
/// none matches. `start` must itself be a test.
#[allow(clippy::too_many_arguments)]
fn walk_chain<'g>(
    detector: &SwitchDetector<'_>,
    graph: &'g FlowGraph,
    preds: &Predecessors,
    start: NodeIndex,
    start_is_head: bool,
    subject: &mut Option<&'g Expr>,
    pairs: &mut Vec<(CaseKey, NodeIndex)>,
    dispatch: &mut Vec<NodeIndex>,
) -> Option<NodeIndex> {
    let mut node = start;
    let mut first = true;
    loop {
        let is_head = first && start_is_head;
        let flow = graph.node(node);
        let eligible = is_head
            || (flow.is_condition_only() && detector.is_dispatch_block(graph, preds, node));
        let test = match &flow.terminator {
            Terminator::Branch {
                condition,
                then_target,
                else_target,
            } if eligible => string_test(detector, condition)
                .filter(|t| subject.map_or(true, |s| s == t.subject))
                .map(|t| (t, *then_target, *else_target)),
            _ => None,
        };
        let Some((test, then_target, else_target)) = test else {
            return if first { None } else { Some(node) };
        };
        if pairs.iter().any(|(k, _)| *k == test.key) {
            log::trace!("Duplicate string label at IL_{:04x}", flow.offset);
            return None;
        }
        *subject = Some(test.subject);
        let (hit, miss) = if test.positive {
            (then_target, else_target)
        } else {
            (else_target, then_target)
        };
        pairs.push((test.key, hit));
        if !is_head {
            dispatch.push(node);
        }
        if miss == start || dispatch.contains(&miss) {
            return None;
        }
        first = false;
        node = miss;
    }
}

pub(super) fn detect(
    detector: &mut SwitchDetector<'_>,
    graph: &FlowGraph,
    preds: &Predecessors,
    head: NodeIndex,
) -> Option<Candidate> {
    match detect_hash(detector, graph, preds, head) {
        Some(candidate) => Some(candidate),
        None => detect_chain(detector, graph, preds, head),
    }
}

fn detect_chain(
    detector: &mut SwitchDetector<'_>,
    graph: &FlowGraph,
    preds: &Predecessors,
    head: NodeIndex,
) -> Option<Candidate> {
    let mut subject = None;
    let mut pairs = Vec::new();
    let mut dispatch = Vec::new();
    let default = walk_chain(
        detector,
        graph,
        preds,
        head,
        true,
        &mut subject,
        &mut pairs,
        &mut dispatch,
    )?;
    let subject = subject?.clone();
    let string_labels = pairs
        .iter()
        .filter(|(k, _)| matches!(k, CaseKey::String(_)))
        .count();
    if string_labels < MIN_EQUALITY_COMPARISONS {
        return None;
    }
    if !dispatch.is_empty() && subject.has_side_effects() {
        return None;
    }
    pairs.retain(|(k, t)| !(*k == CaseKey::Null && *t == default));
    let candidate = Candidate {
        discriminant: subject,
        pairs,
        default,
        dispatch_blocks: dispatch,
        kind: DispatchKind::StringChain,
        consumed: Vec::new(),
        hoisted: Vec::new(),
    };
    detector.validate(graph, preds, head, candidate)
}

/// `h = ComputeStringHash(s)` as `(h, s)`
fn hash_statement<'e>(detector: &SwitchDetector<'_>, stmt: &'e Expr) -> Option<(LocalId, &'e Expr)> {
    let (target, value) = stmt.as_assignment()?;
    let local = target.as_local()?;
    match value {
        Expr::Call {
            method,
            receiver: None,
            args,
        } if args.len() == 1 && method.name == "ComputeStringHash" => {
            let generated = detector.declared_on(method, KnownType::PrivateImplementationDetails)
                || method.declaring_type.as_deref() == Some(KnownType::PrivateImplementationDetails.full_name());
            generated.then_some((local, &args[0]))
        }
        _ => None,
    }
}

/// Optional `if (s == null)` in front of the hash computation
fn leading_null_test<'g>(
    detector: &SwitchDetector<'_>,
    graph: &'g FlowGraph,
    preds: &Predecessors,
    head: NodeIndex,
) -> Option<(NodeIndex, &'g Expr, NodeIndex)> {
    let Terminator::Branch {
        condition,
        then_target,
        else_target,
    } = &graph.node(head).terminator
    else {
        return None;
    };
    let test = string_test(detector, condition)?;
    if test.key != CaseKey::Null {
        return None;
    }
    let (null_target, other) = if test.positive {
        (*then_target, *else_target)
    } else {
        (*else_target, *then_target)
    };
    let next = graph.node(other);
    if !detector.is_dispatch_block(graph, preds, other) || next.statements.len() != 1 {
        return None;
    }
    Some((other, test.subject, null_target))
}

fn detect_hash(
    detector: &mut SwitchDetector<'_>,
    graph: &FlowGraph,
    preds: &Predecessors,
    head: NodeIndex,
) -> Option<Candidate> {
    let null_test = leading_null_test(detector, graph, preds, head);
    let hash_node = null_test.map_or(head, |(n, _, _)| n);
    let statements = &graph.node(hash_node).statements;
    let hash_index = statements.len().checked_sub(1)?;
    let (hash_local, subject) = hash_statement(detector, &statements[hash_index])?;
    if let Some((_, tested, _)) = null_test {
        if tested != subject {
            return None;
        }
    }
    if subject.has_side_effects() {
        return None;
    }

    let hash = Expr::Local(hash_local);
    let walker = TreeWalker {
        graph,
        preds,
        lowered: &detector.lowered,
        domain: Domain::Hash32,
        discriminant: &hash,
    };
    let tree = walker.walk(hash_node)?;
    let default = tree.default_leaf()?;

    let mut dispatch = tree.inner.clone();
    if hash_node != head {
        dispatch.push(hash_node);
    }
    let mut pairs: Vec<(CaseKey, NodeIndex)> = Vec::new();
    for (bucket, values) in &tree.leaves {
        if *bucket == default {
            continue;
        }
        let mut bucket_pairs = Vec::new();
        let mut bucket_subject = Some(subject);
        let miss = walk_chain(
            detector,
            graph,
            preds,
            *bucket,
            false,
            &mut bucket_subject,
            &mut bucket_pairs,
            &mut dispatch,
        )?;
        if miss != default {
            log::trace!(
                "Hash bucket at IL_{:04x} does not fall back to the default",
                graph.node(*bucket).offset
            );
            return None;
        }
        for (key, target) in bucket_pairs {
            if let CaseKey::String(s) = &key {
                if !values.contains(compute_string_hash(s) as i64) {
                    log::debug!("Label {:?} is not in its hash bucket", s);
                    return None;
                }
            }
            if pairs.iter().any(|(k, _)| *k == key) {
                return None;
            }
            pairs.push((key, target));
        }
    }
    if let Some((_, _, null_target)) = null_test {
        if null_target != default && !pairs.iter().any(|(k, _)| *k == CaseKey::Null) {
            pairs.push((CaseKey::Null, null_target));
        }
    }

    let mut excluded = dispatch.clone();
    excluded.push(head);
    let hash_used = local_read_outside(graph, hash_local, &excluded)
        || statements[..hash_index]
            .iter()
            .any(|s| s.reads_local(hash_local));
    let (consumed, hoisted) = match (hash_node == head, hash_used) {
        (true, false) => (vec![hash_index], Vec::new()),
        (true, true) => (Vec::new(), Vec::new()),
        (false, false) => (Vec::new(), Vec::new()),
        (false, true) => (Vec::new(), vec![statements[hash_index].clone()]),
    };

    log::debug!(
        "String hash switch at IL_{:04x}: {} labels",
        graph.node(head).offset,
        pairs.len()
    );
    let candidate = Candidate {
        discriminant: subject.clone(),
        pairs,
        default,
        dispatch_blocks: dispatch,
        kind: DispatchKind::StringHash,
        consumed,
        hoisted,
    };
    detector.validate(graph, preds, head, candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_hash_matches_fnv1a() {
        assert_eq!(compute_string_hash(""), 0x811c_9dc5);
        assert_eq!(compute_string_hash("a"), 0xe40c_292c);
        assert_eq!(compute_string_hash("hello"), 0x4f9f_2cab);
    }

    #[test]
    fn string_hash_uses_utf16_units() {
        assert_eq!(compute_string_hash("\u{e4}"), 0x610b_5af3);
    }
}
