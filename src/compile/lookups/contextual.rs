//! Helpers shared by the contextual (chain) compilers of both tables.

use crate::otl::{CoverageBuilder, CoverageId};
use crate::pattern::{ClassRec, GPat};

/// A contextual pattern split into its three regions.
///
/// Positions are partitioned left to right by their role bits; the
/// regions are contiguous and marked positions fall inside the input.
pub(crate) struct Partition<'a> {
    pub backtrack: Vec<&'a ClassRec>,
    pub input: Vec<&'a ClassRec>,
    pub lookahead: Vec<&'a ClassRec>,
    /// Index within the input region of the first marked position.
    pub first_marked_index: usize,
}

pub(crate) fn partition_rule(pat: &GPat) -> Partition<'_> {
    Partition {
        backtrack: pat.backtrack().collect(),
        input: pat.input().collect(),
        lookahead: pat.lookahead().collect(),
        first_marked_index: pat.input().position(|c| c.marked).unwrap_or(0),
    }
}

/// Build one coverage table per position of a region.
pub(crate) fn region_coverages(
    positions: &[&ClassRec],
    cov: &mut CoverageBuilder,
) -> Vec<CoverageId> {
    positions
        .iter()
        .map(|position| {
            cov.begin();
            for gid in position.glyph_ids() {
                cov.add_glyph(gid);
            }
            cov.end()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::GlyphId;

    fn position(gid: u16, role: &str) -> ClassRec {
        let mut cr = ClassRec::from_glyph(GlyphId::new(gid));
        match role {
            "backtrack" => cr.backtrack = true,
            "input" => cr.input = true,
            "marked" => {
                cr.input = true;
                cr.marked = true;
            }
            "lookahead" => cr.lookahead = true,
            _ => unreachable!(),
        }
        cr
    }

    #[test]
    fn partition_regions() {
        let mut pat = GPat::new();
        pat.add_class(position(1, "backtrack"));
        pat.add_class(position(2, "input"));
        pat.add_class(position(3, "marked"));
        pat.add_class(position(4, "lookahead"));
        pat.has_marked = true;

        let partition = partition_rule(&pat);
        assert_eq!(partition.backtrack.len(), 1);
        assert_eq!(partition.input.len(), 2);
        assert_eq!(partition.lookahead.len(), 1);
        assert_eq!(partition.first_marked_index, 1);
    }
}
