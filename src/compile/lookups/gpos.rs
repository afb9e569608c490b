//! The GPOS lookup compiler.

use std::collections::BTreeMap;

use crate::common::tags::TAG_UNDEF;
use crate::common::GlyphId;
use crate::diagnostic::Diagnostic;
use crate::otl::{
    write_lookup_records, ClassTableId, CoverageId, ExtResources, LookupRecord, OtlTable,
    OtlWriter, SubtableBody, WriteCtx,
};
use crate::pattern::ClassRec;

use super::contextual::{partition_rule, region_coverages};
use super::gsub::chain3_size;
use super::{
    AnchorTable, Label, LabelAllocator, LookupKind, Payload, PosValue, SizeParamsData,
    SubtableInfo,
};

#[derive(Clone, Debug)]
pub(crate) struct PairValueRecord {
    pub second: GlyphId,
    pub v1: PosValue,
    pub v2: PosValue,
}

/// One serialized GPOS subtable.
#[derive(Clone, Debug)]
pub(crate) enum GposBody {
    Single1 {
        coverage: CoverageId,
        format: u16,
        value: PosValue,
    },
    Single2 {
        coverage: CoverageId,
        format: u16,
        values: Vec<PosValue>,
    },
    Pair1 {
        coverage: CoverageId,
        format1: u16,
        format2: u16,
        sets: Vec<Vec<PairValueRecord>>,
    },
    Pair2 {
        coverage: CoverageId,
        format1: u16,
        format2: u16,
        class_def1: ClassTableId,
        class_def2: ClassTableId,
        /// indexed `[class1][class2]`, row and column 0 included
        matrix: Vec<Vec<(PosValue, PosValue)>>,
    },
    Cursive1 {
        coverage: CoverageId,
        records: Vec<(Option<AnchorTable>, Option<AnchorTable>)>,
    },
    MarkBase1 {
        mark_coverage: CoverageId,
        base_coverage: CoverageId,
        class_count: u16,
        marks: Vec<(u16, AnchorTable)>,
        bases: Vec<Vec<Option<AnchorTable>>>,
    },
    MarkLig1 {
        mark_coverage: CoverageId,
        lig_coverage: CoverageId,
        class_count: u16,
        marks: Vec<(u16, AnchorTable)>,
        ligs: Vec<Vec<Vec<Option<AnchorTable>>>>,
    },
    MarkMark1 {
        mark_coverage: CoverageId,
        mark2_coverage: CoverageId,
        class_count: u16,
        marks: Vec<(u16, AnchorTable)>,
        mark2s: Vec<Vec<Option<AnchorTable>>>,
    },
    Chain3 {
        backtrack: Vec<CoverageId>,
        input: Vec<CoverageId>,
        lookahead: Vec<CoverageId>,
        records: Vec<LookupRecord>,
    },
    SizeParams(SizeParamsData),
}

fn mark_array_size(marks: &[(u16, AnchorTable)]) -> u32 {
    2 + 4 * marks.len() as u32 + marks.iter().map(|(_, a)| a.size()).sum::<u32>()
}

fn anchor_row_size(row: &[Option<AnchorTable>]) -> u32 {
    row.iter().flatten().map(AnchorTable::size).sum::<u32>()
}

fn base_array_size(bases: &[Vec<Option<AnchorTable>>], class_count: u16) -> u32 {
    2 + bases.len() as u32 * class_count as u32 * 2
        + bases.iter().map(|row| anchor_row_size(row)).sum::<u32>()
}

fn lig_attach_size(components: &[Vec<Option<AnchorTable>>], class_count: u16) -> u32 {
    2 + components.len() as u32 * class_count as u32 * 2
        + components.iter().map(|row| anchor_row_size(row)).sum::<u32>()
}

fn lig_array_size(ligs: &[Vec<Vec<Option<AnchorTable>>>], class_count: u16) -> u32 {
    2 + 2 * ligs.len() as u32
        + ligs
            .iter()
            .map(|components| lig_attach_size(components, class_count))
            .sum::<u32>()
}

impl SubtableBody for GposBody {
    fn size(&self) -> u32 {
        match self {
            GposBody::Single1 { format, .. } => 6 + PosValue::size(*format),
            GposBody::Single2 { format, values, .. } => {
                8 + values.len() as u32 * PosValue::size(*format)
            }
            GposBody::Pair1 {
                format1,
                format2,
                sets,
                ..
            } => {
                let record = 2 + PosValue::size(*format1) + PosValue::size(*format2);
                10 + 2 * sets.len() as u32
                    + sets
                        .iter()
                        .map(|records| 2 + records.len() as u32 * record)
                        .sum::<u32>()
            }
            GposBody::Pair2 {
                format1,
                format2,
                matrix,
                ..
            } => {
                let class1_count = matrix.len() as u32;
                let class2_count = matrix.first().map(Vec::len).unwrap_or(0) as u32;
                16 + class1_count * class2_count * (PosValue::size(*format1) + PosValue::size(*format2))
            }
            GposBody::Cursive1 { records, .. } => {
                6 + 4 * records.len() as u32
                    + records
                        .iter()
                        .map(|(entry, exit)| {
                            entry.map(|a| a.size()).unwrap_or(0) + exit.map(|a| a.size()).unwrap_or(0)
                        })
                        .sum::<u32>()
            }
            GposBody::MarkBase1 {
                class_count,
                marks,
                bases,
                ..
            } => 12 + mark_array_size(marks) + base_array_size(bases, *class_count),
            GposBody::MarkLig1 {
                class_count,
                marks,
                ligs,
                ..
            } => 12 + mark_array_size(marks) + lig_array_size(ligs, *class_count),
            GposBody::MarkMark1 {
                class_count,
                marks,
                mark2s,
                ..
            } => 12 + mark_array_size(marks) + base_array_size(mark2s, *class_count),
            GposBody::Chain3 {
                backtrack,
                input,
                lookahead,
                records,
            } => chain3_size(backtrack.len(), input.len(), lookahead.len(), records.len()),
            GposBody::SizeParams(_) => 10,
        }
    }

    fn write(&self, w: &mut OtlWriter, ctx: &WriteCtx, sink: &mut Vec<Diagnostic>) {
        match self {
            GposBody::Single1 {
                coverage,
                format,
                value,
            } => {
                w.u16(1);
                w.u16(ctx.coverage_offset(*coverage, "coverage table", sink));
                w.u16(*format);
                value.write(w, *format);
            }
            GposBody::Single2 {
                coverage,
                format,
                values,
            } => {
                w.u16(2);
                w.u16(ctx.coverage_offset(*coverage, "coverage table", sink));
                w.u16(*format);
                w.u16(values.len() as u16);
                for value in values {
                    value.write(w, *format);
                }
            }
            GposBody::Pair1 {
                coverage,
                format1,
                format2,
                sets,
            } => {
                let record = 2 + PosValue::size(*format1) + PosValue::size(*format2);
                w.u16(1);
                w.u16(ctx.coverage_offset(*coverage, "coverage table", sink));
                w.u16(*format1);
                w.u16(*format2);
                w.u16(sets.len() as u16);
                let mut off = 10 + 2 * sets.len() as u32;
                for records in sets {
                    w.u16(ctx.check(off, "pair set", sink));
                    off += 2 + records.len() as u32 * record;
                }
                for records in sets {
                    w.u16(records.len() as u16);
                    for rec in records {
                        w.u16(rec.second.to_u16());
                        rec.v1.write(w, *format1);
                        rec.v2.write(w, *format2);
                    }
                }
            }
            GposBody::Pair2 {
                coverage,
                format1,
                format2,
                class_def1,
                class_def2,
                matrix,
            } => {
                w.u16(2);
                w.u16(ctx.coverage_offset(*coverage, "coverage table", sink));
                w.u16(*format1);
                w.u16(*format2);
                w.u16(ctx.class_offset(*class_def1, "class definition table", sink));
                w.u16(ctx.class_offset(*class_def2, "class definition table", sink));
                w.u16(matrix.len() as u16);
                w.u16(matrix.first().map(Vec::len).unwrap_or(0) as u16);
                for row in matrix {
                    for (v1, v2) in row {
                        v1.write(w, *format1);
                        v2.write(w, *format2);
                    }
                }
            }
            GposBody::Cursive1 { coverage, records } => {
                w.u16(1);
                w.u16(ctx.coverage_offset(*coverage, "coverage table", sink));
                w.u16(records.len() as u16);
                let mut cursor = 6 + 4 * records.len() as u32;
                let mut offsets = Vec::with_capacity(records.len());
                for (entry, exit) in records {
                    let entry_off = entry.map(|a| {
                        let off = cursor;
                        cursor += a.size();
                        off
                    });
                    let exit_off = exit.map(|a| {
                        let off = cursor;
                        cursor += a.size();
                        off
                    });
                    offsets.push((entry_off, exit_off));
                }
                for (entry_off, exit_off) in &offsets {
                    w.u16(entry_off.map(|o| ctx.check(o, "anchor table", sink)).unwrap_or(0));
                    w.u16(exit_off.map(|o| ctx.check(o, "anchor table", sink)).unwrap_or(0));
                }
                for (entry, exit) in records {
                    if let Some(anchor) = entry {
                        anchor.write(w);
                    }
                    if let Some(anchor) = exit {
                        anchor.write(w);
                    }
                }
            }
            GposBody::MarkBase1 {
                mark_coverage,
                base_coverage,
                class_count,
                marks,
                bases,
            } => {
                w.u16(1);
                w.u16(ctx.coverage_offset(*mark_coverage, "mark coverage table", sink));
                w.u16(ctx.coverage_offset(*base_coverage, "base coverage table", sink));
                w.u16(*class_count);
                w.u16(12);
                w.u16(ctx.check(12 + mark_array_size(marks), "base array", sink));
                write_mark_array(w, marks);
                write_anchor_matrix(w, bases, *class_count);
            }
            GposBody::MarkLig1 {
                mark_coverage,
                lig_coverage,
                class_count,
                marks,
                ligs,
            } => {
                w.u16(1);
                w.u16(ctx.coverage_offset(*mark_coverage, "mark coverage table", sink));
                w.u16(ctx.coverage_offset(*lig_coverage, "ligature coverage table", sink));
                w.u16(*class_count);
                w.u16(12);
                w.u16(ctx.check(12 + mark_array_size(marks), "ligature array", sink));
                write_mark_array(w, marks);
                // LigatureArray: attach tables indexed by ligature
                w.u16(ligs.len() as u16);
                let mut off = 2 + 2 * ligs.len() as u32;
                for components in ligs {
                    w.u16(off as u16);
                    off += lig_attach_size(components, *class_count);
                }
                for components in ligs {
                    write_anchor_matrix(w, components, *class_count);
                }
            }
            GposBody::MarkMark1 {
                mark_coverage,
                mark2_coverage,
                class_count,
                marks,
                mark2s,
            } => {
                w.u16(1);
                w.u16(ctx.coverage_offset(*mark_coverage, "mark coverage table", sink));
                w.u16(ctx.coverage_offset(*mark2_coverage, "mark coverage table", sink));
                w.u16(*class_count);
                w.u16(12);
                w.u16(ctx.check(12 + mark_array_size(marks), "mark array", sink));
                write_mark_array(w, marks);
                write_anchor_matrix(w, mark2s, *class_count);
            }
            GposBody::Chain3 {
                backtrack,
                input,
                lookahead,
                records,
            } => {
                w.u16(3);
                w.u16(backtrack.len() as u16);
                for id in backtrack.iter().rev() {
                    w.u16(ctx.coverage_offset(*id, "backtrack coverage table", sink));
                }
                w.u16(input.len() as u16);
                for id in input {
                    w.u16(ctx.coverage_offset(*id, "input coverage table", sink));
                }
                w.u16(lookahead.len() as u16);
                for id in lookahead {
                    w.u16(ctx.coverage_offset(*id, "lookahead coverage table", sink));
                }
                write_lookup_records(w, records);
            }
            GposBody::SizeParams(params) => {
                w.u16(params.design_size);
                w.u16(params.subfamily_id);
                w.u16(params.name_id);
                w.u16(params.range_start);
                w.u16(params.range_end);
            }
        }
    }

    fn lookup_records_mut(&mut self) -> Option<&mut Vec<LookupRecord>> {
        match self {
            GposBody::Chain3 { records, .. } => Some(records),
            _ => None,
        }
    }
}

/// MarkArray: records (class + anchor offset from the array start)
/// followed by the anchors.
fn write_mark_array(w: &mut OtlWriter, marks: &[(u16, AnchorTable)]) {
    w.u16(marks.len() as u16);
    let mut off = 2 + 4 * marks.len() as u32;
    for (class, anchor) in marks {
        w.u16(*class);
        w.u16(off as u16);
        off += anchor.size();
    }
    for (_, anchor) in marks {
        anchor.write(w);
    }
}

/// BaseArray / Mark2Array / one LigatureAttach: a count, per-row anchor
/// offsets (one per class, 0 when absent), then the anchors.
fn write_anchor_matrix(w: &mut OtlWriter, rows: &[Vec<Option<AnchorTable>>], class_count: u16) {
    w.u16(rows.len() as u16);
    let mut off = 2 + rows.len() as u32 * class_count as u32 * 2;
    for row in rows {
        debug_assert_eq!(row.len(), class_count as usize);
        for anchor in row {
            match anchor {
                Some(a) => {
                    w.u16(off as u16);
                    off += a.size();
                }
                None => w.u16(0),
            }
        }
    }
    for row in rows {
        for anchor in row.iter().flatten() {
            anchor.write(w);
        }
    }
}

/// The GPOS side of the compile.
#[derive(Debug, Default)]
pub(crate) struct Gpos {
    pub table: OtlTable<GposBody>,
    pub anon_subtables: Vec<SubtableInfo>,
}

impl Gpos {
    pub(crate) fn lookup_end(
        &mut self,
        mut si: SubtableInfo,
        labels: &mut LabelAllocator,
        sink: &mut Vec<Diagnostic>,
    ) {
        if si.is_reference {
            self.table.push(si.meta(), None, None);
            return;
        }
        log::debug!("GPOS lookup end: {:?} in {}", si.kind, si.id_text);
        match si.kind {
            LookupKind::GposSingle => self.fill_single(&si, sink),
            LookupKind::GposPair => self.fill_pair(&mut si, sink),
            LookupKind::GposCursive => self.fill_cursive(&si, sink),
            LookupKind::GposMarkToBase | LookupKind::GposMarkToLig | LookupKind::GposMarkToMark => {
                self.fill_mark_attach(&si, sink)
            }
            LookupKind::GposChain => self.fill_chain(&si, labels, sink),
            LookupKind::GposSizeParam => {
                if let Payload::SizeParams(params) = &si.payload {
                    let body = GposBody::SizeParams(*params);
                    self.table.push(si.meta(), Some(body), None);
                }
            }
            _ => unreachable!("GSUB kind in GPOS lookup"),
        }
    }

    pub(crate) fn create_anon_lookups(
        &mut self,
        labels: &mut LabelAllocator,
        sink: &mut Vec<Diagnostic>,
    ) {
        for si in std::mem::take(&mut self.anon_subtables) {
            self.lookup_end(si, labels, sink);
        }
    }

    pub(crate) fn build(&mut self, sink: &mut Vec<Diagnostic>) -> Option<Vec<u8>> {
        self.table.build(sink)
    }

    fn resources(&self, si: &SubtableInfo) -> Option<ExtResources> {
        si.use_extension.then(ExtResources::default)
    }

    fn fill_single(&mut self, si: &SubtableInfo, sink: &mut Vec<Diagnostic>) {
        let Payload::SinglePos(entries) = &si.payload else {
            return;
        };
        if entries.is_empty() {
            return;
        }
        let mut values: BTreeMap<GlyphId, PosValue> = BTreeMap::new();
        for (glyphs, value) in entries {
            for gid in glyphs.glyph_ids() {
                match values.insert(gid, *value) {
                    Some(prev) if prev == *value => sink.push(Diagnostic::note(
                        si.loc.clone(),
                        format!(
                            "Removing duplicate single position in {}: {}",
                            si.id_text, gid
                        ),
                    )),
                    Some(_) => sink.push(Diagnostic::error(
                        si.loc.clone(),
                        format!(
                            "Duplicate target glyph for single position in {}: {}",
                            si.id_text, gid
                        ),
                    )),
                    None => (),
                }
            }
        }

        let format = values.values().fold(0, |acc, v| acc | v.format());
        let mut ext = self.resources(si);
        let coverage = {
            let cov = ext
                .as_mut()
                .map(|r| &mut r.coverage)
                .unwrap_or(&mut self.table.coverage);
            cov.intern(values.keys().copied().collect())
        };
        let first = *values.values().next().unwrap();
        let body = if values.values().all(|v| *v == first) {
            GposBody::Single1 {
                coverage,
                format,
                value: first,
            }
        } else {
            GposBody::Single2 {
                coverage,
                format,
                values: values.values().copied().collect(),
            }
        };
        self.table.update_max_context(1);
        self.table.push(si.meta(), Some(body), ext);
    }

    fn fill_pair(&mut self, si: &mut SubtableInfo, sink: &mut Vec<Diagnostic>) {
        let Payload::PairPos(accum) = std::mem::replace(&mut si.payload, Payload::None) else {
            return;
        };

        // specific glyph pairs, format 1
        if !accum.glyph_pairs.is_empty() {
            let mut pairs: BTreeMap<(GlyphId, GlyphId), (PosValue, PosValue)> = BTreeMap::new();
            for pair in &accum.glyph_pairs {
                match pairs.get(&(pair.first, pair.second)) {
                    Some(prev) if *prev == (pair.v1, pair.v2) => sink.push(Diagnostic::note(
                        si.loc.clone(),
                        format!(
                            "Removing duplicate pair position in {}: {} {}",
                            si.id_text, pair.first, pair.second
                        ),
                    )),
                    Some(_) => sink.push(Diagnostic::warning(
                        si.loc.clone(),
                        format!(
                            "Pair position rule repeated with different values in {}: {} {}; \
                             the first rule wins",
                            si.id_text, pair.first, pair.second
                        ),
                    )),
                    None => {
                        pairs.insert((pair.first, pair.second), (pair.v1, pair.v2));
                    }
                }
            }
            let format1 = pairs.values().fold(0, |acc, (v1, _)| acc | v1.format());
            let format2 = pairs.values().fold(0, |acc, (_, v2)| acc | v2.format());
            let mut sets: Vec<Vec<PairValueRecord>> = Vec::new();
            let mut firsts: Vec<GlyphId> = Vec::new();
            for ((first, second), (v1, v2)) in pairs {
                let record = PairValueRecord { second, v1, v2 };
                if firsts.last() == Some(&first) {
                    sets.last_mut().unwrap().push(record);
                } else {
                    firsts.push(first);
                    sets.push(vec![record]);
                }
            }
            let mut ext = self.resources(si);
            let coverage = {
                let cov = ext
                    .as_mut()
                    .map(|r| &mut r.coverage)
                    .unwrap_or(&mut self.table.coverage);
                cov.intern(firsts)
            };
            let body = GposBody::Pair1 {
                coverage,
                format1,
                format2,
                sets,
            };
            self.table.push(si.meta(), Some(body), ext);
        }

        // class pairs, format 2; authored `subtable;` breaks start new
        // segments and therefore new subtables
        for segment in &accum.class_segments {
            if segment.is_empty() {
                continue;
            }
            let mut class1: Vec<Vec<GlyphId>> = Vec::new();
            let mut class2: Vec<Vec<GlyphId>> = Vec::new();
            let mut cells: BTreeMap<(u16, u16), (PosValue, PosValue)> = BTreeMap::new();
            for pair in segment {
                let c1 = intern_class(&mut class1, pair.first.glyph_ids().collect());
                let c2 = intern_class(&mut class2, pair.second.glyph_ids().collect());
                match cells.get(&(c1, c2)) {
                    Some(prev) if *prev == (pair.v1, pair.v2) => sink.push(Diagnostic::note(
                        si.loc.clone(),
                        format!("Removing duplicate pair position in {}", si.id_text),
                    )),
                    Some(_) => sink.push(Diagnostic::warning(
                        si.loc.clone(),
                        format!(
                            "Class pair rule repeated with different values in {}; \
                             the first rule wins",
                            si.id_text
                        ),
                    )),
                    None => {
                        cells.insert((c1, c2), (pair.v1, pair.v2));
                    }
                }
            }
            let format1 = cells.values().fold(0, |acc, (v1, _)| acc | v1.format());
            let format2 = cells.values().fold(0, |acc, (_, v2)| acc | v2.format());
            let mut matrix =
                vec![vec![(PosValue::default(), PosValue::default()); class2.len() + 1];
                    class1.len() + 1];
            for ((c1, c2), values) in &cells {
                matrix[*c1 as usize][*c2 as usize] = *values;
            }

            let mut ext = self.resources(si);
            let (coverage, class_def1, class_def2) = {
                let (cov, classes) = match ext.as_mut() {
                    Some(r) => (&mut r.coverage, &mut r.classes),
                    None => (&mut self.table.coverage, &mut self.table.classes),
                };
                let coverage =
                    cov.intern(class1.iter().flatten().copied().collect::<Vec<_>>());
                let class_def1 = classes.intern(&class_mapping(&class1));
                let class_def2 = classes.intern(&class_mapping(&class2));
                (coverage, class_def1, class_def2)
            };
            let body = GposBody::Pair2 {
                coverage,
                format1,
                format2,
                class_def1,
                class_def2,
                matrix,
            };
            self.table.push(si.meta(), Some(body), ext);
        }
        self.table.update_max_context(2);
    }

    fn fill_cursive(&mut self, si: &SubtableInfo, sink: &mut Vec<Diagnostic>) {
        let Payload::Cursive(entries) = &si.payload else {
            return;
        };
        if entries.is_empty() {
            return;
        }
        let mut records: BTreeMap<GlyphId, (Option<AnchorTable>, Option<AnchorTable>)> =
            BTreeMap::new();
        for entry in entries {
            for gid in entry.glyphs.glyph_ids() {
                if records.insert(gid, (entry.entry, entry.exit)).is_some() {
                    sink.push(Diagnostic::error(
                        si.loc.clone(),
                        format!(
                            "Duplicate glyph in cursive attachment in {}: {}",
                            si.id_text, gid
                        ),
                    ));
                }
            }
        }
        let mut ext = self.resources(si);
        let coverage = {
            let cov = ext
                .as_mut()
                .map(|r| &mut r.coverage)
                .unwrap_or(&mut self.table.coverage);
            cov.intern(records.keys().copied().collect())
        };
        let body = GposBody::Cursive1 {
            coverage,
            records: records.into_values().collect(),
        };
        self.table.update_max_context(1);
        self.table.push(si.meta(), Some(body), ext);
    }

    fn fill_mark_attach(&mut self, si: &SubtableInfo, sink: &mut Vec<Diagnostic>) {
        let Payload::MarkAttach(accum) = &si.payload else {
            return;
        };
        if accum.mark_classes.is_empty() || accum.bases.is_empty() {
            return;
        }
        let class_count = accum.mark_classes.len() as u16;

        let mut marks: BTreeMap<GlyphId, (u16, AnchorTable)> = BTreeMap::new();
        for (idx, (name, node)) in accum.mark_classes.iter().enumerate() {
            debug_assert!(node.marknode && node.used_mark_class);
            for glyph in &node.glyphs {
                let Some(anchor) = glyph.anchor.as_ref().and_then(AnchorTable::from_mark_info)
                else {
                    continue;
                };
                match marks.insert(glyph.gid, (idx as u16, anchor)) {
                    Some((prev_class, _)) if prev_class != idx as u16 => {
                        sink.push(Diagnostic::error(
                            si.loc.clone(),
                            format!(
                                "In {} glyph {} is in mark class '{}' but already \
                                 assigned to another class in this lookup",
                                si.id_text, glyph.gid, name
                            ),
                        ));
                    }
                    _ => (),
                }
            }
        }

        let mut bases: BTreeMap<GlyphId, Vec<Vec<Option<AnchorTable>>>> = BTreeMap::new();
        for base in &accum.bases {
            debug_assert!(base.base.basenode);
            let components: Vec<Vec<Option<AnchorTable>>> = base
                .components
                .iter()
                .map(|component| {
                    let mut row = vec![None; class_count as usize];
                    for (class, anchor) in component {
                        row[*class as usize] = *anchor;
                    }
                    row
                })
                .collect();
            for gid in base.base.glyph_ids() {
                if bases.contains_key(&gid) {
                    sink.push(Diagnostic::warning(
                        si.loc.clone(),
                        format!(
                            "Duplicate base glyph in {}: {}; the first statement wins",
                            si.id_text, gid
                        ),
                    ));
                } else {
                    bases.insert(gid, components.clone());
                }
            }
        }

        let mut ext = self.resources(si);
        let (mark_coverage, base_coverage) = {
            let cov = ext
                .as_mut()
                .map(|r| &mut r.coverage)
                .unwrap_or(&mut self.table.coverage);
            (
                cov.intern(marks.keys().copied().collect()),
                cov.intern(bases.keys().copied().collect()),
            )
        };
        let marks: Vec<(u16, AnchorTable)> = marks.into_values().collect();
        let body = match si.kind {
            LookupKind::GposMarkToLig => GposBody::MarkLig1 {
                mark_coverage,
                lig_coverage: base_coverage,
                class_count,
                marks,
                ligs: bases.into_values().collect(),
            },
            LookupKind::GposMarkToMark => GposBody::MarkMark1 {
                mark_coverage,
                mark2_coverage: base_coverage,
                class_count,
                marks,
                mark2s: bases.into_values().map(|mut c| c.remove(0)).collect(),
            },
            _ => GposBody::MarkBase1 {
                mark_coverage,
                base_coverage,
                class_count,
                marks,
                bases: bases.into_values().map(|mut c| c.remove(0)).collect(),
            },
        };
        self.table.update_max_context(2);
        self.table.push(si.meta(), Some(body), ext);
    }

    fn fill_chain(
        &mut self,
        si: &SubtableInfo,
        labels: &mut LabelAllocator,
        sink: &mut Vec<Diagnostic>,
    ) {
        let rules = si.payload.rules().to_vec();
        for rule in &rules {
            let partition = partition_rule(&rule.targ);
            let mut records: Vec<LookupRecord> = Vec::new();
            for (idx, position) in partition.input.iter().enumerate() {
                if !position.metrics.is_empty() {
                    let value = PosValue::from_metrics(&position.metrics, false);
                    let label = self.add_anon_pos_rule(si, (*position).clone(), value, labels, sink);
                    records.push(LookupRecord::new(idx as u16, label));
                }
                for label in &position.lookup_labels {
                    records.push(LookupRecord::new(idx as u16, *label));
                }
            }
            let mut ext = self.resources(si);
            let (backtrack, input, lookahead) = {
                let cov = ext
                    .as_mut()
                    .map(|r| &mut r.coverage)
                    .unwrap_or(&mut self.table.coverage);
                (
                    region_coverages(&partition.backtrack, cov),
                    region_coverages(&partition.input, cov),
                    region_coverages(&partition.lookahead, cov),
                )
            };
            self.table
                .update_max_context((partition.input.len() + partition.lookahead.len()) as u16);
            let body = GposBody::Chain3 {
                backtrack,
                input,
                lookahead,
                records,
            };
            self.table.push(si.meta(), Some(body), ext);
        }
    }

    /// Synthesize (or extend) the anonymous single-position lookup behind
    /// an inline value record in a chain rule.
    fn add_anon_pos_rule(
        &mut self,
        cur: &SubtableInfo,
        position: ClassRec,
        value: PosValue,
        labels: &mut LabelAllocator,
        sink: &mut Vec<Diagnostic>,
    ) -> Label {
        if let Some(last) = self.anon_subtables.last_mut() {
            if last.kind == LookupKind::GposSingle
                && last.lookup_flag == cur.lookup_flag
                && last.mark_set_index == cur.mark_set_index
                && last.parent_feat_tag == Some(cur.feature)
                && try_add_single_pos_to_anon(last, &position, value)
            {
                return last.label;
            }
        }
        let label = match labels.next_anon() {
            Some(label) => label,
            None => {
                sink.push(Diagnostic::fatal(
                    cur.loc.clone(),
                    "out of anonymous lookup labels",
                ));
                Label::Anon(super::ANON_LKP_END)
            }
        };
        let mut asi = SubtableInfo {
            script: TAG_UNDEF,
            language: TAG_UNDEF,
            feature: TAG_UNDEF,
            kind: LookupKind::GposSingle,
            lookup_flag: cur.lookup_flag,
            mark_set_index: cur.mark_set_index,
            label,
            is_reference: false,
            use_extension: cur.use_extension,
            parent_feat_tag: Some(cur.feature),
            loc: cur.loc.clone(),
            id_text: format!("feature '{}'", cur.feature),
            payload: Payload::SinglePos(vec![(position, value)]),
        };
        // role bits are meaningless in the anonymous lookup
        if let Payload::SinglePos(entries) = &mut asi.payload {
            for (cr, _) in entries {
                cr.marked = false;
                cr.input = false;
            }
        }
        self.anon_subtables.push(asi);
        label
    }
}

fn try_add_single_pos_to_anon(si: &mut SubtableInfo, position: &ClassRec, value: PosValue) -> bool {
    let Payload::SinglePos(entries) = &mut si.payload else {
        return false;
    };
    for (existing, existing_value) in entries.iter() {
        for gid in position.glyph_ids() {
            if existing.glyph_in_class(gid) && *existing_value != value {
                return false;
            }
        }
    }
    entries.push((position.clone(), value));
    true
}

/// Class sets of one side of a class-pair subtable, numbered from 1 in
/// first-use order; class 0 stays implicit.
fn intern_class(classes: &mut Vec<Vec<GlyphId>>, glyphs: Vec<GlyphId>) -> u16 {
    match classes.iter().position(|c| *c == glyphs) {
        Some(idx) => idx as u16 + 1,
        None => {
            classes.push(glyphs);
            classes.len() as u16
        }
    }
}

fn class_mapping(classes: &[Vec<GlyphId>]) -> BTreeMap<GlyphId, u16> {
    let mut mapping = BTreeMap::new();
    for (idx, class) in classes.iter().enumerate() {
        for gid in class {
            mapping.insert(*gid, idx as u16 + 1);
        }
    }
    mapping
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::SourceLocation;
    use crate::otl::{ClassDefBuilder, CoverageBuilder};

    use super::super::X_ADVANCE;

    fn written_length(
        body: &GposBody,
        coverage: &CoverageBuilder,
        classes: &ClassDefBuilder,
    ) -> u32 {
        let loc = SourceLocation::default();
        let ctx = WriteCtx {
            coverage,
            classes,
            cov_base: 0,
            class_base: 0,
            loc: &loc,
            id_text: "test subtable",
        };
        let mut w = OtlWriter::new();
        let mut sink = Vec::new();
        body.write(&mut w, &ctx, &mut sink);
        assert!(sink.is_empty(), "no overflows expected: {sink:?}");
        w.len()
    }

    /// The layout pass trusts `size()`; every write must produce exactly
    /// that many bytes, anchors and their internal offsets included.
    #[test]
    fn body_sizes_match_written_length() {
        let mut coverage = CoverageBuilder::default();
        let classes = ClassDefBuilder::default();
        let cov = coverage.intern(vec![GlyphId::new(1), GlyphId::new(2)]);
        let plain = AnchorTable {
            format: 1,
            x: 10,
            y: 20,
            contourpoint: 0,
        };
        let on_point = AnchorTable {
            format: 2,
            x: -5,
            y: 650,
            contourpoint: 3,
        };
        let value = PosValue {
            x_advance: -40,
            ..Default::default()
        };

        let bodies = vec![
            GposBody::Single2 {
                coverage: cov,
                format: X_ADVANCE,
                values: vec![value, PosValue::default()],
            },
            GposBody::Cursive1 {
                coverage: cov,
                records: vec![(Some(plain), None), (None, Some(on_point))],
            },
            GposBody::MarkBase1 {
                mark_coverage: cov,
                base_coverage: cov,
                class_count: 2,
                marks: vec![(0, plain), (1, on_point)],
                bases: vec![vec![Some(plain), None], vec![None, Some(on_point)]],
            },
            GposBody::MarkLig1 {
                mark_coverage: cov,
                lig_coverage: cov,
                class_count: 1,
                marks: vec![(0, plain)],
                ligs: vec![vec![vec![Some(on_point)], vec![None]]],
            },
        ];
        for body in &bodies {
            assert_eq!(body.size(), written_length(body, &coverage, &classes), "{body:?}");
        }
    }

    #[test]
    fn anon_single_pos_reuse_rejects_conflicts() {
        let mut si = SubtableInfo {
            script: TAG_UNDEF,
            language: TAG_UNDEF,
            feature: TAG_UNDEF,
            kind: LookupKind::GposSingle,
            lookup_flag: 0,
            mark_set_index: None,
            label: Label::Anon(0x2000),
            is_reference: false,
            use_extension: false,
            parent_feat_tag: None,
            loc: SourceLocation::default(),
            id_text: String::from("feature 'test'"),
            payload: Payload::SinglePos(Vec::new()),
        };
        let value = PosValue {
            x_advance: -25,
            ..Default::default()
        };
        let other = PosValue {
            x_advance: 10,
            ..Default::default()
        };

        let b = ClassRec::from_glyph(GlyphId::new(2));
        assert!(try_add_single_pos_to_anon(&mut si, &b, value));
        // a different glyph with any value is compatible
        let d = ClassRec::from_glyph(GlyphId::new(4));
        assert!(try_add_single_pos_to_anon(&mut si, &d, other));
        // the same glyph with the same value merges
        assert!(try_add_single_pos_to_anon(&mut si, &b, value));
        // the same glyph with a different value forces a new lookup
        assert!(!try_add_single_pos_to_anon(&mut si, &b, other));
    }
}
