//! Class definition tables, shared by GPOS pair positioning and GDEF.

use std::collections::{BTreeMap, HashMap};

use crate::common::GlyphId;

use super::writer::OtlWriter;

/// A stable handle to a class table within one builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ClassTableId(u16);

/// Accumulates the class definition tables of one table section, with the
/// same content-addressed dedup scheme as coverage tables.
#[derive(Clone, Debug, Default)]
pub(crate) struct ClassDefBuilder {
    tables: Vec<ClassTable>,
    dedup: HashMap<Vec<(GlyphId, u16)>, ClassTableId>,
    size: u32,
}

#[derive(Clone, Debug)]
struct ClassTable {
    mapping: BTreeMap<GlyphId, u16>,
    offset: u32,
}

impl ClassDefBuilder {
    /// Intern a glyph → class mapping. Class 0 entries are implicit and
    /// dropped.
    pub(crate) fn intern(&mut self, mapping: &BTreeMap<GlyphId, u16>) -> ClassTableId {
        let key: Vec<(GlyphId, u16)> = mapping
            .iter()
            .filter(|(_, cls)| **cls != 0)
            .map(|(g, c)| (*g, *c))
            .collect();
        if let Some(id) = self.dedup.get(&key) {
            return *id;
        }
        let mapping: BTreeMap<GlyphId, u16> = key.iter().copied().collect();
        let id = ClassTableId(self.tables.len() as u16);
        let offset = self.size;
        self.size += class_def_size(&mapping);
        self.dedup.insert(key, id);
        self.tables.push(ClassTable { mapping, offset });
        id
    }

    pub(crate) fn offset_of(&self, id: ClassTableId) -> u32 {
        self.tables[id.0 as usize].offset
    }

    pub(crate) fn total_size(&self) -> u32 {
        self.size
    }

    pub(crate) fn write(&self, w: &mut OtlWriter) {
        for table in &self.tables {
            write_class_def(w, &table.mapping);
        }
    }
}

fn class_ranges(mapping: &BTreeMap<GlyphId, u16>) -> Vec<(u16, u16, u16)> {
    let mut out: Vec<(u16, u16, u16)> = Vec::new();
    for (gid, cls) in mapping {
        let gid = gid.to_u16();
        match out.last_mut() {
            Some((_, end, prev_cls)) if *end + 1 == gid && *prev_cls == *cls => *end = gid,
            _ => out.push((gid, gid, *cls)),
        }
    }
    out
}

/// Serialized size of a class definition table (class 0 entries dropped).
pub(crate) fn class_def_size(mapping: &BTreeMap<GlyphId, u16>) -> u32 {
    if mapping.is_empty() {
        return 6;
    }
    let first = mapping.keys().next().unwrap().to_u16();
    let last = mapping.keys().next_back().unwrap().to_u16();
    let format_1 = 6 + 2 * (last - first + 1) as u32;
    let format_2 = 4 + 6 * class_ranges(mapping).len() as u32;
    format_1.min(format_2)
}

/// Write a class definition table, choosing the denser format. Glyphs not
/// in the mapping get the implicit class 0.
pub(crate) fn write_class_def(w: &mut OtlWriter, mapping: &BTreeMap<GlyphId, u16>) {
    if mapping.is_empty() {
        // an empty format 1 table
        w.u16(1);
        w.u16(0);
        w.u16(0);
        return;
    }
    let first = mapping.keys().next().unwrap().to_u16();
    let last = mapping.keys().next_back().unwrap().to_u16();
    let ranges = class_ranges(mapping);
    let format_1 = 6 + 2 * (last - first + 1) as u32;
    let format_2 = 4 + 6 * ranges.len() as u32;
    if format_1 <= format_2 {
        w.u16(1);
        w.u16(first);
        w.u16(last - first + 1);
        for gid in first..=last {
            w.u16(mapping.get(&GlyphId::new(gid)).copied().unwrap_or(0));
        }
    } else {
        w.u16(2);
        w.u16(ranges.len() as u16);
        for (start, end, cls) in ranges {
            w.u16(start);
            w.u16(end);
            w.u16(cls);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(pairs: &[(u16, u16)]) -> BTreeMap<GlyphId, u16> {
        pairs.iter().map(|(g, c)| (GlyphId::new(*g), *c)).collect()
    }

    #[test]
    fn size_matches_write() {
        for m in [
            mapping(&[(1, 1), (2, 1), (3, 2)]),
            mapping(&[(10, 1), (500, 2)]),
            mapping(&[]),
        ] {
            let mut w = OtlWriter::new();
            write_class_def(&mut w, &m);
            assert_eq!(w.len(), class_def_size(&m), "{m:?}");
        }
    }

    #[test]
    fn class_zero_dropped_on_intern() {
        let mut builder = ClassDefBuilder::default();
        let a = builder.intern(&mapping(&[(1, 1), (9, 0)]));
        let b = builder.intern(&mapping(&[(1, 1)]));
        assert_eq!(a, b);
    }
}
