//! Switch pattern analysis module
//!
//! This module recognizes source-level switches in the lifted flow graph:
//! - Integer dispatch: equality chains, range checks and `switch` jump tables
//!   (possibly behind `x - k` offsets and unsigned range checks)
//! - Nullable dispatch: `HasValue` guard in front of an integer dispatch
//! - String dispatch: `string ==` chains and `ComputeStringHash` buckets
//!
//! Jump tables that do not read as a source switch are lowered to if-chains
//! so the structurer never sees a raw table.

pub mod string_switch; // String chains and hash buckets
pub mod switch_detector; // Dispatch trees, nullable guards, policy checks
pub mod switch_info; // Common types for switch information
pub mod value_set; // Interval sets over i64

pub use string_switch::compute_string_hash;
pub use switch_detector::{
    SwitchDetector, MAX_JUMP_TABLE_SLACK, MAX_VALUES_PER_SECTION, MIN_EQUALITY_COMPARISONS,
};
pub use switch_info::*;
pub use value_set::LongSet;

use crate::ast::MethodContext;
use crate::cfg::FlowGraph;
use crate::config::DecompilerSettings;
use crate::error::Error;
use crate::metadata::ResolverContext;

/// Run switch recognition over a lifted graph, returning recoverable diagnostics
pub fn detect_switches(
    graph: &mut FlowGraph,
    context: &mut MethodContext,
    resolver: ResolverContext<'_>,
    settings: &DecompilerSettings,
) -> Vec<Error> {
    SwitchDetector::new(resolver, settings).run(graph, context)
}
