//! The GSUB lookup compiler: from accumulated rules to subtables.

use crate::common::tags::TAG_UNDEF;
use crate::common::GlyphId;
use crate::diagnostic::Diagnostic;
use crate::otl::{
    write_lookup_records, CoverageBuilder, CoverageId, ExtResources, LookupRecord, OtlTable,
    OtlWriter, SubtableBody, WriteCtx,
};
use crate::pattern::{ClassRec, GPat};

use super::contextual::{partition_rule, region_coverages};
use super::{CvParamsData, Label, LabelAllocator, LookupKind, Payload, Rule, SubtableInfo};

/// A ligature: the replacement glyph and the components after the first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Ligature {
    pub lig_glyph: GlyphId,
    pub components: Vec<GlyphId>,
}

/// One serialized GSUB subtable.
#[derive(Clone, Debug)]
pub(crate) enum GsubBody {
    Single1 {
        coverage: CoverageId,
        delta: i16,
    },
    Single2 {
        coverage: CoverageId,
        substitutes: Vec<GlyphId>,
    },
    Multiple1 {
        coverage: CoverageId,
        sequences: Vec<Vec<GlyphId>>,
    },
    Alternate1 {
        coverage: CoverageId,
        alternate_sets: Vec<Vec<GlyphId>>,
    },
    Ligature1 {
        coverage: CoverageId,
        sets: Vec<Vec<Ligature>>,
    },
    Chain3 {
        backtrack: Vec<CoverageId>,
        input: Vec<CoverageId>,
        lookahead: Vec<CoverageId>,
        records: Vec<LookupRecord>,
    },
    Reverse1 {
        input: CoverageId,
        backtrack: Vec<CoverageId>,
        lookahead: Vec<CoverageId>,
        substitutes: Vec<GlyphId>,
    },
    FeatureNames {
        name_id: u16,
    },
    CvParams(CvParamsData),
}

impl SubtableBody for GsubBody {
    fn size(&self) -> u32 {
        match self {
            GsubBody::Single1 { .. } => 6,
            GsubBody::Single2 { substitutes, .. } => 6 + 2 * substitutes.len() as u32,
            GsubBody::Multiple1 { sequences, .. } => multiple_size(
                sequences.len(),
                sequences.iter().map(Vec::len).sum(),
            ),
            GsubBody::Alternate1 { alternate_sets, .. } => multiple_size(
                alternate_sets.len(),
                alternate_sets.iter().map(Vec::len).sum(),
            ),
            GsubBody::Ligature1 { sets, .. } => {
                6 + 2 * sets.len() as u32
                    + sets
                        .iter()
                        .map(|ligs| {
                            2 + 2 * ligs.len() as u32
                                + ligs
                                    .iter()
                                    .map(|l| 4 + 2 * l.components.len() as u32)
                                    .sum::<u32>()
                        })
                        .sum::<u32>()
            }
            GsubBody::Chain3 {
                backtrack,
                input,
                lookahead,
                records,
            } => chain3_size(backtrack.len(), input.len(), lookahead.len(), records.len()),
            GsubBody::Reverse1 {
                backtrack,
                lookahead,
                substitutes,
                ..
            } => 10 + 2 * (backtrack.len() + lookahead.len() + substitutes.len()) as u32,
            GsubBody::FeatureNames { .. } => 4,
            GsubBody::CvParams(params) => params.size(),
        }
    }

    fn write(&self, w: &mut OtlWriter, ctx: &WriteCtx, sink: &mut Vec<Diagnostic>) {
        match self {
            GsubBody::Single1 { coverage, delta } => {
                w.u16(1);
                w.u16(ctx.coverage_offset(*coverage, "coverage table", sink));
                w.i16(*delta);
            }
            GsubBody::Single2 {
                coverage,
                substitutes,
            } => {
                w.u16(2);
                w.u16(ctx.coverage_offset(*coverage, "coverage table", sink));
                w.u16(substitutes.len() as u16);
                for gid in substitutes {
                    w.u16(gid.to_u16());
                }
            }
            GsubBody::Multiple1 {
                coverage,
                sequences,
            } => write_sequence_sets(w, ctx, sink, *coverage, 1, sequences),
            GsubBody::Alternate1 {
                coverage,
                alternate_sets,
            } => write_sequence_sets(w, ctx, sink, *coverage, 1, alternate_sets),
            GsubBody::Ligature1 { coverage, sets } => {
                w.u16(1);
                w.u16(ctx.coverage_offset(*coverage, "coverage table", sink));
                w.u16(sets.len() as u16);
                let mut off = 6 + 2 * sets.len() as u32;
                for ligs in sets {
                    w.u16(ctx.check(off, "ligature set", sink));
                    off += 2
                        + 2 * ligs.len() as u32
                        + ligs
                            .iter()
                            .map(|l| 4 + 2 * l.components.len() as u32)
                            .sum::<u32>();
                }
                for ligs in sets {
                    w.u16(ligs.len() as u16);
                    let mut lig_off = 2 + 2 * ligs.len() as u32;
                    for lig in ligs {
                        w.u16(lig_off as u16);
                        lig_off += 4 + 2 * lig.components.len() as u32;
                    }
                    for lig in ligs {
                        w.u16(lig.lig_glyph.to_u16());
                        // the first component is carried by the coverage
                        w.u16(lig.components.len() as u16 + 1);
                        for gid in &lig.components {
                            w.u16(gid.to_u16());
                        }
                    }
                }
            }
            GsubBody::Chain3 {
                backtrack,
                input,
                lookahead,
                records,
            } => {
                w.u16(3);
                w.u16(backtrack.len() as u16);
                // backtrack coverages are written closest-first
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
            GsubBody::Reverse1 {
                input,
                backtrack,
                lookahead,
                substitutes,
            } => {
                w.u16(1);
                w.u16(ctx.coverage_offset(*input, "coverage table", sink));
                w.u16(backtrack.len() as u16);
                for id in backtrack.iter().rev() {
                    w.u16(ctx.coverage_offset(*id, "backtrack coverage table", sink));
                }
                w.u16(lookahead.len() as u16);
                for id in lookahead {
                    w.u16(ctx.coverage_offset(*id, "lookahead coverage table", sink));
                }
                w.u16(substitutes.len() as u16);
                for gid in substitutes {
                    w.u16(gid.to_u16());
                }
            }
            GsubBody::FeatureNames { name_id } => {
                w.u16(0);
                w.u16(*name_id);
            }
            GsubBody::CvParams(params) => {
                w.u16(0);
                w.u16(params.feat_ui_label_name_id);
                w.u16(params.feat_ui_tooltip_text_name_id);
                w.u16(params.sample_text_name_id);
                w.u16(params.num_named_parameters);
                w.u16(params.first_param_ui_label_name_id);
                w.u16(params.char_values.len() as u16);
                for value in &params.char_values {
                    // 24-bit unicode values
                    w.u8((value >> 16) as u8);
                    w.u16(*value as u16);
                }
            }
        }
    }

    fn lookup_records_mut(&mut self) -> Option<&mut Vec<LookupRecord>> {
        match self {
            GsubBody::Chain3 { records, .. } => Some(records),
            _ => None,
        }
    }
}

fn multiple_size(count: usize, total_glyphs: usize) -> u32 {
    6 + 4 * count as u32 + 2 * total_glyphs as u32
}

pub(crate) fn chain3_size(n_back: usize, n_input: usize, n_look: usize, n_records: usize) -> u32 {
    10 + 2 * (n_back + n_input + n_look) as u32 + 4 * n_records as u32
}

/// Shared layout of Multiple format 1 and Alternate format 1.
fn write_sequence_sets(
    w: &mut OtlWriter,
    ctx: &WriteCtx,
    sink: &mut Vec<Diagnostic>,
    coverage: CoverageId,
    format: u16,
    sets: &[Vec<GlyphId>],
) {
    w.u16(format);
    w.u16(ctx.coverage_offset(coverage, "coverage table", sink));
    w.u16(sets.len() as u16);
    let mut off = 6 + 2 * sets.len() as u32;
    for set in sets {
        w.u16(ctx.check(off, "sequence table", sink));
        off += 2 + 2 * set.len() as u32;
    }
    for set in sets {
        w.u16(set.len() as u16);
        for gid in set {
            w.u16(gid.to_u16());
        }
    }
}

/// The GSUB side of the compile: subtable entries plus deferred anonymous
/// lookups synthesized from contextual rules.
#[derive(Debug, Default)]
pub(crate) struct Gsub {
    pub table: OtlTable<GsubBody>,
    pub anon_subtables: Vec<SubtableInfo>,
    /// Overridable for tests; real fonts use 0xFFFF.
    pub subtable_size_limit: u32,
}

impl Gsub {
    pub(crate) fn new(subtable_size_limit: u32) -> Self {
        Gsub {
            subtable_size_limit,
            ..Default::default()
        }
    }

    /// Add a rule to the accumulator, enumerating if the OT format needs
    /// it.
    pub(crate) fn add_rule(
        si: &mut SubtableInfo,
        targ: GPat,
        repl: Option<GPat>,
        sink: &mut Vec<Diagnostic>,
    ) {
        match si.kind {
            LookupKind::GsubSingle => {
                let Payload::Singles(singles) = &mut si.payload else {
                    unreachable!("single accumulator");
                };
                let repl = repl.unwrap_or_default();
                let targ_cr = &targ.classes[0];
                let repl_cr = &repl.classes[0];
                for (i, t) in targ_cr.glyphs.iter().enumerate() {
                    // a single replacement glyph applies to every target
                    let r = repl_cr.glyphs[i.min(repl_cr.glyphs.len() - 1)].gid;
                    match singles.insert(t.gid, r) {
                        Some(prev) if prev == r => {
                            sink.push(Diagnostic::note(
                                si.loc.clone(),
                                format!(
                                    "Removing duplicate single substitution in {}: {}, {}",
                                    si.id_text, t.gid, r
                                ),
                            ));
                        }
                        Some(_) => {
                            sink.push(Diagnostic::error(
                                si.loc.clone(),
                                format!(
                                    "Duplicate target glyph for single substitution in {}: {}",
                                    si.id_text, t.gid
                                ),
                            ));
                        }
                        None => (),
                    }
                }
            }
            LookupKind::GsubLigature => {
                let length = targ.pattern_len();
                if targ.classes.iter().any(ClassRec::is_multi_class) {
                    let repl_gid = repl
                        .as_ref()
                        .map(|r| r.classes[0].glyphs[0].gid)
                        .unwrap_or(GlyphId::NOTDEF);
                    for product in targ.cross_product() {
                        let mut pat = GPat::new();
                        for gid in product {
                            pat.add_class(ClassRec::from_glyph(gid));
                        }
                        si.payload.rules_mut().push(Rule {
                            targ: pat,
                            repl: Some(GPat::from_glyph(repl_gid)),
                            length,
                        });
                    }
                } else {
                    si.payload.rules_mut().push(Rule { targ, repl, length });
                }
            }
            _ => si.payload.rules_mut().push(Rule::new(targ, repl)),
        }
    }

    /// Compile the accumulator into subtable entries.
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
        log::debug!("GSUB lookup end: {:?} in {}", si.kind, si.id_text);
        match si.kind {
            LookupKind::GsubSingle => self.fill_single(&si, sink),
            LookupKind::GsubMultiple => self.fill_sequences(&mut si, false, sink),
            LookupKind::GsubAlternate => self.fill_sequences(&mut si, true, sink),
            LookupKind::GsubLigature => self.fill_ligature(&mut si, sink),
            LookupKind::GsubChain => self.fill_chain(&si, labels, sink),
            LookupKind::GsubReverse => self.fill_reverse(&mut si, sink),
            LookupKind::GsubFeatureNames => {
                if let Payload::FeatureNames { name_id } = &si.payload {
                    let body = GsubBody::FeatureNames { name_id: *name_id };
                    self.table.push(si.meta(), Some(body), None);
                }
            }
            LookupKind::GsubCvParam => {
                if let Payload::CvParams(params) = &si.payload {
                    self.table
                        .push(si.meta(), Some(GsubBody::CvParams(params.clone())), None);
                }
            }
            _ => unreachable!("GPOS kind in GSUB lookup"),
        }
    }

    /// Compile the deferred anonymous lookups; they always follow every
    /// user-defined lookup in the subtable order.
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

    fn resources(&mut self, si: &SubtableInfo) -> Option<ExtResources> {
        si.use_extension.then(ExtResources::default)
    }

    fn fill_single(&mut self, si: &SubtableInfo, _sink: &mut Vec<Diagnostic>) {
        let Payload::Singles(singles) = &si.payload else {
            return;
        };
        if singles.is_empty() {
            return;
        }
        self.table.update_max_context(1);
        let mut ext = self.resources(si);
        let coverage = {
            let cov = ext
                .as_mut()
                .map(|r| &mut r.coverage)
                .unwrap_or(&mut self.table.coverage);
            cov.intern(singles.keys().copied().collect())
        };

        let mut delta: Option<i32> = None;
        let mut constant = true;
        for (t, r) in singles {
            let d = r.to_u16() as i32 - t.to_u16() as i32;
            match delta {
                None => delta = Some(d),
                Some(prev) if prev != d => {
                    constant = false;
                    break;
                }
                _ => (),
            }
        }
        let body = if constant {
            GsubBody::Single1 {
                coverage,
                delta: delta.unwrap_or(0) as i16,
            }
        } else {
            GsubBody::Single2 {
                coverage,
                substitutes: singles.values().copied().collect(),
            }
        };
        self.table.push(si.meta(), Some(body), ext);
    }

    /// Multiple and Alternate share their sort, duplicate policy, and
    /// automatic subtable breaking.
    fn fill_sequences(&mut self, si: &mut SubtableInfo, alternate: bool, sink: &mut Vec<Diagnostic>) {
        let rules = si.payload.rules_mut();
        if rules.is_empty() {
            return;
        }
        rules.sort_by_key(first_target_gid);
        let what = if alternate { "alternate" } else { "multiple" };
        for pair in rules.windows(2) {
            if first_target_gid(&pair[0]) == first_target_gid(&pair[1]) {
                sink.push(Diagnostic::fatal(
                    si.loc.clone(),
                    format!(
                        "Duplicate target glyph for {} substitution in {}: {}",
                        what,
                        si.id_text,
                        first_target_gid(&pair[0])
                    ),
                ));
            }
        }

        let replacement = |rule: &Rule| -> Vec<GlyphId> {
            let repl = rule.repl.as_ref();
            if alternate {
                // the choice set is one class, order-preserving
                repl.map(|r| r.classes[0].glyph_ids().collect()).unwrap_or_default()
            } else {
                // the replacement is a glyph sequence
                repl.map(|r| r.classes.iter().map(|c| c.glyphs[0].gid).collect())
                    .unwrap_or_default()
            }
        };

        let rules = std::mem::take(si.payload.rules_mut());
        let mut start = 0usize;
        let mut glyphs_so_far = 0usize;
        for j in 0..rules.len() {
            let rule_glyphs = replacement(&rules[j]).len();
            let with_rule = multiple_size(j - start + 1, glyphs_so_far + rule_glyphs);
            if with_rule > self.subtable_size_limit {
                // the overflowing rule starts the next subtable
                sink.push(Diagnostic::note(
                    si.loc.clone(),
                    format!(
                        "{} substitution subtable in {} split at the 64k offset limit",
                        what, si.id_text
                    ),
                ));
                self.emit_sequence_subtable(si, &rules[start..j], alternate, &replacement);
                start = j;
                glyphs_so_far = rule_glyphs;
            } else {
                glyphs_so_far += rule_glyphs;
            }
        }
        self.emit_sequence_subtable(si, &rules[start..], alternate, &replacement);
        self.table.update_max_context(1);
    }

    fn emit_sequence_subtable(
        &mut self,
        si: &SubtableInfo,
        rules: &[Rule],
        alternate: bool,
        replacement: &dyn Fn(&Rule) -> Vec<GlyphId>,
    ) {
        if rules.is_empty() {
            return;
        }
        let mut ext = self.resources(si);
        let coverage = {
            let cov = ext
                .as_mut()
                .map(|r| &mut r.coverage)
                .unwrap_or(&mut self.table.coverage);
            cov.intern(rules.iter().map(first_target_gid).collect())
        };
        let sets: Vec<Vec<GlyphId>> = rules.iter().map(replacement).collect();
        let body = if alternate {
            GsubBody::Alternate1 {
                coverage,
                alternate_sets: sets,
            }
        } else {
            GsubBody::Multiple1 {
                coverage,
                sequences: sets,
            }
        };
        self.table.push(si.meta(), Some(body), ext);
    }

    fn fill_ligature(&mut self, si: &mut SubtableInfo, sink: &mut Vec<Diagnostic>) {
        let rules = si.payload.rules_mut();
        if rules.is_empty() {
            return;
        }
        // first glyph ascending, longer patterns first, then remaining gids
        rules.sort_by(|a, b| cmp_ligature(a, b));

        let mut i = 1;
        while i < rules.len() {
            if cmp_ligature(&rules[i - 1], &rules[i]) == std::cmp::Ordering::Equal {
                let prev_repl = rule_replacement_gid(&rules[i - 1]);
                let curr_repl = rule_replacement_gid(&rules[i]);
                if prev_repl == curr_repl {
                    sink.push(Diagnostic::note(
                        si.loc.clone(),
                        format!(
                            "Removing duplicate ligature substitution in {}: {}",
                            si.id_text, prev_repl
                        ),
                    ));
                } else {
                    sink.push(Diagnostic::fatal(
                        si.loc.clone(),
                        format!(
                            "Duplicate target sequence but different replacement glyphs \
                             in ligature substitutions in {}",
                            si.id_text
                        ),
                    ));
                }
                rules.remove(i);
            } else {
                i += 1;
            }
        }

        let mut sets: Vec<Vec<Ligature>> = Vec::new();
        let mut coverage_glyphs: Vec<GlyphId> = Vec::new();
        for rule in rules.iter() {
            let first = first_target_gid(rule);
            let lig = Ligature {
                lig_glyph: rule_replacement_gid(rule),
                components: rule.targ.classes[1..]
                    .iter()
                    .map(|c| c.glyphs[0].gid)
                    .collect(),
            };
            self.table.update_max_context(rule.length);
            if coverage_glyphs.last() == Some(&first) {
                sets.last_mut().unwrap().push(lig);
            } else {
                coverage_glyphs.push(first);
                sets.push(vec![lig]);
            }
        }

        let mut ext = self.resources(si);
        let coverage = {
            let cov = ext
                .as_mut()
                .map(|r| &mut r.coverage)
                .unwrap_or(&mut self.table.coverage);
            cov.intern(coverage_glyphs)
        };
        let body = GsubBody::Ligature1 { coverage, sets };
        if body.size() > self.subtable_size_limit {
            sink.push(Diagnostic::fatal(
                si.loc.clone(),
                format!(
                    "in {} ligature rules overflow the 64k subtable limit and cannot be split",
                    si.id_text
                ),
            ));
        }
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
            if let Some(repl) = &rule.repl {
                debug_assert!(rule.targ.has_marked);
                let marked: Vec<ClassRec> = partition
                    .input
                    .iter()
                    .filter(|c| c.marked)
                    .map(|c| (*c).clone())
                    .collect();
                let label = self.add_anon_rule(si, marked, repl.clone(), labels, sink);
                records.push(LookupRecord::new(partition.first_marked_index as u16, label));
            } else if rule.targ.lookup_node {
                for (idx, position) in partition.input.iter().enumerate() {
                    for label in &position.lookup_labels {
                        records.push(LookupRecord::new(idx as u16, *label));
                    }
                }
            }
            // ignore clauses carry no substitutions at all
            debug_assert!(!rule.targ.ignore_clause || records.is_empty());
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
            let body = GsubBody::Chain3 {
                backtrack,
                input,
                lookahead,
                records,
            };
            self.table.push(si.meta(), Some(body), ext);
        }
    }

    /// Synthesize (or extend) the anonymous lookup carrying an inline
    /// replacement from a chain rule; returns the label to reference.
    ///
    /// The most recently created anonymous accumulator is reused when the
    /// kind, flags, filtering set, and parent feature all match and the
    /// new rule does not conflict with what it already holds.
    fn add_anon_rule(
        &mut self,
        cur: &SubtableInfo,
        marked: Vec<ClassRec>,
        repl: GPat,
        labels: &mut LabelAllocator,
        sink: &mut Vec<Diagnostic>,
    ) -> Label {
        let kind = if marked.len() == 1 {
            if repl.classes.len() > 1 {
                LookupKind::GsubMultiple
            } else {
                LookupKind::GsubSingle
            }
        } else {
            LookupKind::GsubLigature
        };

        if let Some(last) = self.anon_subtables.last_mut() {
            if last.kind == kind
                && last.lookup_flag == cur.lookup_flag
                && last.mark_set_index == cur.mark_set_index
                && last.parent_feat_tag == Some(cur.feature)
            {
                let appended = match kind {
                    LookupKind::GsubSingle => try_add_single_to_anon(last, &marked[0], &repl),
                    LookupKind::GsubLigature => try_add_ligature_to_anon(last, &marked, &repl),
                    _ => false,
                };
                if appended {
                    return last.label;
                }
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
        log::debug!("synthesizing anonymous {kind:?} lookup for {}", cur.id_text);
        let mut asi = SubtableInfo {
            script: TAG_UNDEF,
            language: TAG_UNDEF,
            feature: TAG_UNDEF,
            kind,
            lookup_flag: cur.lookup_flag,
            mark_set_index: cur.mark_set_index,
            label,
            is_reference: false,
            use_extension: cur.use_extension,
            parent_feat_tag: Some(cur.feature),
            loc: cur.loc.clone(),
            id_text: format!("feature '{}'", cur.feature),
            payload: Payload::for_kind(kind),
        };
        match kind {
            LookupKind::GsubSingle | LookupKind::GsubLigature => {
                let mut targ = GPat::new();
                for cr in marked {
                    targ.add_class(cr);
                }
                Gsub::add_rule(&mut asi, targ, Some(repl), sink);
            }
            _ => {
                let targ = GPat::from_class(marked.into_iter().next().unwrap());
                asi.payload.rules_mut().push(Rule::new(targ, Some(repl)));
            }
        }
        self.anon_subtables.push(asi);
        label
    }

    fn fill_reverse(&mut self, si: &mut SubtableInfo, _sink: &mut Vec<Diagnostic>) {
        let rules = si.payload.rules().to_vec();
        for rule in &rules {
            let partition = partition_rule(&rule.targ);
            let input = match partition.input.first() {
                Some(input) => *input,
                None => continue,
            };
            // pair targets with their replacements, then order by target
            // gid so the substitute array tracks the sorted coverage
            let mut pairs: Vec<(GlyphId, GlyphId)> = Vec::new();
            if let Some(repl) = &rule.repl {
                let repl_glyphs = &repl.classes[0].glyphs;
                for (i, t) in input.glyphs.iter().enumerate() {
                    let r = repl_glyphs[i.min(repl_glyphs.len() - 1)].gid;
                    pairs.push((t.gid, r));
                }
            }
            pairs.sort_unstable();
            pairs.dedup();

            let mut ext = self.resources(si);
            let (input_cov, backtrack, lookahead) = {
                let cov: &mut CoverageBuilder = ext
                    .as_mut()
                    .map(|r| &mut r.coverage)
                    .unwrap_or(&mut self.table.coverage);
                (
                    cov.intern(input.glyph_ids().collect()),
                    region_coverages(&partition.backtrack, cov),
                    region_coverages(&partition.lookahead, cov),
                )
            };
            self.table
                .update_max_context((1 + partition.lookahead.len()) as u16);
            let body = GsubBody::Reverse1 {
                input: input_cov,
                backtrack,
                lookahead,
                substitutes: pairs.into_iter().map(|(_, r)| r).collect(),
            };
            self.table.push(si.meta(), Some(body), ext);
        }
    }
}

fn try_add_single_to_anon(si: &mut SubtableInfo, targ: &ClassRec, repl: &GPat) -> bool {
    let Payload::Singles(singles) = &mut si.payload else {
        return false;
    };
    let repl_glyphs = &repl.classes[0].glyphs;
    let mut needed = Vec::new();
    for (i, t) in targ.glyphs.iter().enumerate() {
        let r = repl_glyphs[i.min(repl_glyphs.len() - 1)].gid;
        match singles.get(&t.gid) {
            // same target mapped elsewhere: the rule needs its own lookup
            Some(prev) if *prev != r => return false,
            Some(_) => (),
            None => needed.push((t.gid, r)),
        }
    }
    singles.extend(needed);
    true
}

fn try_add_ligature_to_anon(si: &mut SubtableInfo, marked: &[ClassRec], repl: &GPat) -> bool {
    let repl_gid = repl.classes[0].glyphs[0].gid;
    let mut pat = GPat::new();
    for cr in marked {
        pat.add_class(cr.clone());
    }

    let mut fresh: Vec<Vec<GlyphId>> = Vec::new();
    {
        let Payload::Rules(rules) = &si.payload else {
            return false;
        };
        'product: for tuple in pat.cross_product() {
            for rule in rules {
                let existing: Vec<GlyphId> =
                    rule.targ.classes.iter().map(|c| c.glyphs[0].gid).collect();
                if existing[0] != tuple[0] {
                    continue;
                }
                let shared = existing
                    .iter()
                    .zip(&tuple)
                    .take_while(|(a, b)| a == b)
                    .count();
                if shared == existing.len() && shared == tuple.len() {
                    if rule_replacement_gid(rule) == repl_gid {
                        // identical rule already present
                        continue 'product;
                    }
                    return false;
                }
                if shared == existing.len() || shared == tuple.len() {
                    // one target sequence is a prefix of the other
                    return false;
                }
            }
            fresh.push(tuple);
        }
    }

    let length = marked.len() as u16;
    let rules = si.payload.rules_mut();
    for tuple in fresh {
        let mut targ = GPat::new();
        for gid in tuple {
            targ.add_class(ClassRec::from_glyph(gid));
        }
        rules.push(Rule {
            targ,
            repl: Some(GPat::from_glyph(repl_gid)),
            length,
        });
    }
    true
}

fn first_target_gid(rule: &Rule) -> GlyphId {
    rule.targ.classes[0].glyphs[0].gid
}

fn rule_replacement_gid(rule: &Rule) -> GlyphId {
    rule.repl
        .as_ref()
        .map(|r| r.classes[0].glyphs[0].gid)
        .unwrap_or(GlyphId::NOTDEF)
}

/// Sort by first gid ascending, pattern length descending, then the
/// remaining gids ascending.
fn cmp_ligature(a: &Rule, b: &Rule) -> std::cmp::Ordering {
    first_target_gid(a)
        .cmp(&first_target_gid(b))
        .then_with(|| b.length.cmp(&a.length))
        .then_with(|| {
            let a_rest = a.targ.classes.iter().map(|c| c.glyphs[0].gid);
            let b_rest = b.targ.classes.iter().map(|c| c.glyphs[0].gid);
            a_rest.cmp(b_rest)
        })
}

