//! Coverage tables: accumulation, deduplication, and serialization.

use std::collections::HashMap;

use crate::common::GlyphId;

use super::writer::OtlWriter;

/// A stable handle to a coverage table within one builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct CoverageId(u16);

/// Accumulates the coverage tables of one table section.
///
/// Tables are content-addressed: `end()` returns the id of an existing
/// table when one with the same glyph set was interned before. Offsets
/// within the section are assigned as tables are interned and never move.
#[derive(Clone, Debug, Default)]
pub(crate) struct CoverageBuilder {
    tables: Vec<Coverage>,
    dedup: HashMap<Vec<GlyphId>, CoverageId>,
    pending: Vec<GlyphId>,
    size: u32,
}

#[derive(Clone, Debug)]
struct Coverage {
    glyphs: Vec<GlyphId>,
    offset: u32,
}

impl CoverageBuilder {
    pub(crate) fn begin(&mut self) {
        self.pending.clear();
    }

    pub(crate) fn add_glyph(&mut self, gid: GlyphId) {
        self.pending.push(gid);
    }

    /// Finish the pending coverage table, returning its id.
    pub(crate) fn end(&mut self) -> CoverageId {
        let mut glyphs = std::mem::take(&mut self.pending);
        glyphs.sort_unstable();
        glyphs.dedup();
        self.intern(glyphs)
    }

    /// Intern an already-collected glyph set.
    pub(crate) fn intern(&mut self, mut glyphs: Vec<GlyphId>) -> CoverageId {
        glyphs.sort_unstable();
        glyphs.dedup();
        if let Some(id) = self.dedup.get(&glyphs) {
            return *id;
        }
        let id = CoverageId(self.tables.len() as u16);
        let offset = self.size;
        self.size += coverage_size(&glyphs);
        self.dedup.insert(glyphs.clone(), id);
        self.tables.push(Coverage { glyphs, offset });
        id
    }

    /// Offset of a table within the coverage section.
    pub(crate) fn offset_of(&self, id: CoverageId) -> u32 {
        self.tables[id.0 as usize].offset
    }

    pub(crate) fn total_size(&self) -> u32 {
        self.size
    }

    pub(crate) fn write(&self, w: &mut OtlWriter) {
        for table in &self.tables {
            write_coverage(w, &table.glyphs);
        }
    }
}

/// Contiguous gid runs of a sorted glyph list, for format 2.
fn ranges(glyphs: &[GlyphId]) -> Vec<(u16, u16, u16)> {
    let mut out: Vec<(u16, u16, u16)> = Vec::new();
    for (i, gid) in glyphs.iter().enumerate() {
        let gid = gid.to_u16();
        match out.last_mut() {
            Some((_, end, _)) if *end + 1 == gid => *end = gid,
            _ => out.push((gid, gid, i as u16)),
        }
    }
    out
}

/// Serialized size of a coverage table over a sorted glyph list.
pub(crate) fn coverage_size(glyphs: &[GlyphId]) -> u32 {
    let format_1 = 4 + 2 * glyphs.len() as u32;
    let format_2 = 4 + 6 * ranges(glyphs).len() as u32;
    format_1.min(format_2)
}

/// Write a coverage table, choosing the denser format.
pub(crate) fn write_coverage(w: &mut OtlWriter, glyphs: &[GlyphId]) {
    let ranges = ranges(glyphs);
    let format_1 = 4 + 2 * glyphs.len() as u32;
    let format_2 = 4 + 6 * ranges.len() as u32;
    if format_1 <= format_2 {
        w.u16(1);
        w.u16(glyphs.len() as u16);
        for gid in glyphs {
            w.u16(gid.to_u16());
        }
    } else {
        w.u16(2);
        w.u16(ranges.len() as u16);
        for (start, end, start_index) in ranges {
            w.u16(start);
            w.u16(end);
            w.u16(start_index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gids(ids: &[u16]) -> Vec<GlyphId> {
        ids.iter().copied().map(GlyphId::new).collect()
    }

    #[test]
    fn dedup_returns_same_id() {
        let mut builder = CoverageBuilder::default();
        builder.begin();
        builder.add_glyph(GlyphId::new(3));
        builder.add_glyph(GlyphId::new(1));
        let a = builder.end();

        // same set, different order and with a duplicate
        builder.begin();
        builder.add_glyph(GlyphId::new(1));
        builder.add_glyph(GlyphId::new(3));
        builder.add_glyph(GlyphId::new(1));
        let b = builder.end();
        assert_eq!(a, b);
        assert_eq!(builder.total_size(), 8);
    }

    #[test]
    fn format_choice() {
        // a dense run serializes as one range
        assert_eq!(coverage_size(&gids(&[1, 2, 3, 4, 5, 6])), 10);
        // scattered glyphs stay in format 1
        assert_eq!(coverage_size(&gids(&[1, 5, 9])), 10);

        let mut w = OtlWriter::new();
        write_coverage(&mut w, &gids(&[1, 2, 3, 4, 5, 6]));
        assert_eq!(w.into_bytes()[..4], [0, 2, 0, 1]);

        let mut w = OtlWriter::new();
        write_coverage(&mut w, &gids(&[1, 5]));
        assert_eq!(w.into_bytes()[..4], [0, 1, 0, 2]);
    }

    #[test]
    fn offsets_are_stable() {
        let mut builder = CoverageBuilder::default();
        let a = builder.intern(gids(&[1]));
        let b = builder.intern(gids(&[2, 7]));
        assert_eq!(builder.offset_of(a), 0);
        assert_eq!(builder.offset_of(b), 6);
        let mut w = OtlWriter::new();
        builder.write(&mut w);
        assert_eq!(w.len(), builder.total_size());
    }
}
