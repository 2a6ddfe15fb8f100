//! Exception region grouping
//!
//! Clauses that protect the same range form one `try` statement. A C#
//! `try/catch/finally` is two groups: the catch group nested inside the
//! range protected by the finally.

use crate::il::Offset;
use crate::metadata::{ExceptionRegion, ExceptionRegionKind};

/// Clauses sharing one protected range
#[derive(Debug, Clone, PartialEq)]
pub struct TryRegion {
    pub try_offset: Offset,
    pub try_end: Offset,
    /// Indices into the method's exception regions, in declaration order
    pub handlers: Vec<usize>,
}

impl TryRegion {
    pub fn protects(&self, offset: Offset) -> bool {
        self.try_offset <= offset && offset < self.try_end
    }

    fn len(&self) -> u32 {
        self.try_end - self.try_offset
    }
}

/// Try regions of one method, outermost first
#[derive(Debug, Clone, Default)]
pub struct ExceptionAnalysis {
    pub regions: Vec<TryRegion>,
}

impl ExceptionAnalysis {
    /// Outermost region starting at `offset` that is not in `active`
    pub fn region_starting_at(&self, offset: Offset, active: &[usize]) -> Option<usize> {
        self.regions
            .iter()
            .enumerate()
            .find(|(i, r)| r.try_offset == offset && !active.contains(i))
            .map(|(i, _)| i)
    }

    /// Innermost try region whose protected range contains `offset`
    pub fn innermost_protecting(&self, offset: Offset) -> Option<usize> {
        self.regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.protects(offset))
            .min_by_key(|(_, r)| r.len())
            .map(|(i, _)| i)
    }
}

/// Whether a clause is written as `catch` (filters included)
pub fn is_catch(region: &ExceptionRegion) -> bool {
    matches!(
        region.kind,
        ExceptionRegionKind::Catch { .. } | ExceptionRegionKind::Filter { .. }
    )
}

/// Group clauses by protected range
pub fn analyze_exception_regions(regions: &[ExceptionRegion]) -> ExceptionAnalysis {
    let mut grouped: Vec<TryRegion> = Vec::new();
    for (index, region) in regions.iter().enumerate() {
        match grouped
            .iter_mut()
            .find(|g| g.try_offset == region.try_offset && g.try_end == region.try_end())
        {
            Some(group) => group.handlers.push(index),
            None => grouped.push(TryRegion {
                try_offset: region.try_offset,
                try_end: region.try_end(),
                handlers: vec![index],
            }),
        }
    }
    grouped.sort_by(|a, b| {
        a.try_offset
            .cmp(&b.try_offset)
            .then(b.try_end.cmp(&a.try_end))
    });
    log::trace!("{} exception clauses in {} try regions", regions.len(), grouped.len());
    ExceptionAnalysis { regions: grouped }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(kind: ExceptionRegionKind, try_offset: u32, try_length: u32, handler: u32) -> ExceptionRegion {
        ExceptionRegion {
            kind,
            try_offset,
            try_length,
            handler_offset: handler,
            handler_length: 4,
        }
    }

    #[test]
    fn catch_and_finally_form_nested_groups() {
        let regions = vec![
            region(ExceptionRegionKind::Catch { exception_type: None }, 0, 10, 10),
            region(ExceptionRegionKind::Finally, 0, 14, 14),
        ];
        let analysis = analyze_exception_regions(&regions);
        assert_eq!(analysis.regions.len(), 2);
        assert_eq!(analysis.regions[0].handlers, vec![1]);
        assert_eq!(analysis.regions[1].handlers, vec![0]);
        assert_eq!(analysis.region_starting_at(0, &[]), Some(0));
        assert_eq!(analysis.region_starting_at(0, &[0]), Some(1));
        assert_eq!(analysis.innermost_protecting(4), Some(1));
    }

    #[test]
    fn clauses_on_one_range_share_a_group() {
        let regions = vec![
            region(ExceptionRegionKind::Catch { exception_type: None }, 0, 10, 10),
            region(ExceptionRegionKind::Filter { filter_offset: 14 }, 0, 10, 18),
        ];
        let analysis = analyze_exception_regions(&regions);
        assert_eq!(analysis.regions.len(), 1);
        assert_eq!(analysis.regions[0].handlers, vec![0, 1]);
        assert!(is_catch(&regions[1]));
    }
}
