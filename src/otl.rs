//! The OTL backbone: offset layout and serialization of GSUB/GPOS.
//!
//! The kind-specific compilers in `compile::lookups` append subtable
//! entries (meta + body) to an [`OtlTable`]; `build()` then runs the
//! layout pass — grouping subtables into lookups, assembling the script /
//! feature / lookup lists, resolving labels to lookup indices, assigning
//! byte offsets — and serializes everything.
//!
//! Table layout, in file order: header, ScriptList, FeatureList, feature
//! parameter subtables, LookupList, lookup subtables (extension records
//! in place of wrapped subtables), coverage tables, class tables, then
//! the extension section where each wrapped subtable is followed by its
//! own coverage and class tables. Feature parameters sit *before* the
//! LookupList; some tools depend on that placement.

use std::collections::{BTreeMap, HashMap, HashSet};

use font_types::Tag;
use indexmap::IndexMap;

use crate::common::tags::{LANG_DFLT, TAG_STANDALONE, TAG_UNDEF};
use crate::compile::lookups::Label;
use crate::diagnostic::{Diagnostic, SourceLocation};

pub(crate) mod classdef;
pub(crate) mod coverage;
pub(crate) mod writer;

pub(crate) use classdef::{ClassDefBuilder, ClassTableId};
pub(crate) use coverage::{CoverageBuilder, CoverageId};
pub(crate) use writer::OtlWriter;

pub(crate) const RIGHT_TO_LEFT: u16 = 0x0001;
pub(crate) const IGNORE_BASE_GLYPHS: u16 = 0x0002;
pub(crate) const IGNORE_LIGATURES: u16 = 0x0004;
pub(crate) const IGNORE_MARKS: u16 = 0x0008;
pub(crate) const USE_MARK_FILTERING_SET: u16 = 0x0010;
pub(crate) const MARK_ATTACHMENT_TYPE_MASK: u16 = 0xFF00;

const HEADER_SIZE: u32 = 10;

/// A `SubstLookupRecord` / `PosLookupRecord` of a contextual subtable.
///
/// While rules accumulate, the target is a [`Label`]; the layout pass
/// rewrites it to the resolved lookup index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct LookupRecord {
    pub sequence_index: u16,
    pub lookup: RecordLookup,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RecordLookup {
    Label(Label),
    Index(u16),
}

impl LookupRecord {
    pub(crate) fn new(sequence_index: u16, label: Label) -> Self {
        LookupRecord {
            sequence_index,
            lookup: RecordLookup::Label(label),
        }
    }

    fn index(&self) -> u16 {
        match self.lookup {
            RecordLookup::Index(idx) => idx,
            // unresolved records have already been reported as fatal
            RecordLookup::Label(_) => 0,
        }
    }
}

/// Everything the layout pass needs to know about one subtable, minus
/// its body.
#[derive(Clone, Debug)]
pub(crate) struct SubtableMeta {
    pub script: Tag,
    pub language: Tag,
    pub feature: Tag,
    pub label: Label,
    /// This entry re-registers an existing lookup for another
    /// script/language; it carries no body.
    pub is_ref: bool,
    /// The declared lookup type; the extension type when wrapped.
    pub lookup_type: u16,
    /// The wrapped type when extension-wrapped, else 0.
    pub wrapped_type: u16,
    pub lookup_flag: u16,
    pub mark_set_index: Option<u16>,
    pub is_feature_param: bool,
    pub loc: SourceLocation,
    /// Human-readable context for overflow messages.
    pub id_text: String,
}

/// Private coverage/class storage for an extension-wrapped subtable.
#[derive(Clone, Debug, Default)]
pub(crate) struct ExtResources {
    pub coverage: CoverageBuilder,
    pub classes: ClassDefBuilder,
}

#[derive(Clone, Debug)]
pub(crate) struct Entry<B> {
    pub meta: SubtableMeta,
    pub body: Option<B>,
    pub ext: Option<Box<ExtResources>>,
    offset: u32,
    param_offset: u32,
    ext_offset: u32,
}

/// Write-time context handed to subtable bodies.
pub(crate) struct WriteCtx<'a> {
    pub coverage: &'a CoverageBuilder,
    pub classes: &'a ClassDefBuilder,
    /// Distance from the start of the subtable being written to the start
    /// of its coverage area.
    pub cov_base: u32,
    pub class_base: u32,
    pub loc: &'a SourceLocation,
    pub id_text: &'a str,
}

impl WriteCtx<'_> {
    /// Resolve a coverage id to an offset relative to the subtable start,
    /// reporting an overflow as fatal.
    pub(crate) fn coverage_offset(
        &self,
        id: CoverageId,
        what: &str,
        sink: &mut Vec<Diagnostic>,
    ) -> u16 {
        self.check(self.cov_base + self.coverage.offset_of(id), what, sink)
    }

    pub(crate) fn class_offset(
        &self,
        id: ClassTableId,
        what: &str,
        sink: &mut Vec<Diagnostic>,
    ) -> u16 {
        self.check(self.class_base + self.classes.offset_of(id), what, sink)
    }

    pub(crate) fn check(&self, offset: u32, what: &str, sink: &mut Vec<Diagnostic>) -> u16 {
        if offset > 0xFFFF {
            sink.push(Diagnostic::fatal(
                self.loc.clone(),
                format!(
                    "in {} rules cause an offset overflow ({:#x}) to a {}",
                    self.id_text, offset, what
                ),
            ));
        }
        offset as u16
    }
}

/// One subtable kind's body: knows its serialized size and how to write
/// itself.
pub(crate) trait SubtableBody {
    fn size(&self) -> u32;
    fn write(&self, w: &mut OtlWriter, ctx: &WriteCtx, sink: &mut Vec<Diagnostic>);
    /// Contextual bodies expose their lookup records for label resolution.
    fn lookup_records_mut(&mut self) -> Option<&mut Vec<LookupRecord>> {
        None
    }
}

/// One OTL table (GSUB or GPOS) being accumulated and laid out.
#[derive(Clone, Debug)]
pub(crate) struct OtlTable<B> {
    pub entries: Vec<Entry<B>>,
    pub coverage: CoverageBuilder,
    pub classes: ClassDefBuilder,
    pub max_context: u16,
}

impl<B> Default for OtlTable<B> {
    fn default() -> Self {
        OtlTable {
            entries: Vec::new(),
            coverage: CoverageBuilder::default(),
            classes: ClassDefBuilder::default(),
            max_context: 0,
        }
    }
}

struct LookupAssembly {
    lookup_type: u16,
    lookup_flag: u16,
    mark_set_index: Option<u16>,
    subtable_offsets: Vec<u32>,
}

impl LookupAssembly {
    fn table_size(&self) -> u32 {
        6 + 2 * self.subtable_offsets.len() as u32
            + if self.lookup_flag & USE_MARK_FILTERING_SET != 0 {
                2
            } else {
                0
            }
    }
}

impl<B: SubtableBody> OtlTable<B> {
    pub(crate) fn push(&mut self, meta: SubtableMeta, body: Option<B>, ext: Option<ExtResources>) {
        self.entries.push(Entry {
            meta,
            body,
            ext: ext.map(Box::new),
            offset: 0,
            param_offset: 0,
            ext_offset: 0,
        });
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn update_max_context(&mut self, n: u16) {
        self.max_context = self.max_context.max(n);
    }

    /// The final layout-and-write pass.
    pub(crate) fn build(&mut self, sink: &mut Vec<Diagnostic>) -> Option<Vec<u8>> {
        if self.entries.is_empty() {
            return None;
        }

        // assign offsets within the three body sections
        let mut sub_off = 0u32;
        let mut param_off = 0u32;
        let mut ext_off = 0u32;
        for entry in &mut self.entries {
            if entry.meta.is_ref {
                continue;
            }
            let Some(body) = &entry.body else { continue };
            if entry.meta.is_feature_param {
                entry.param_offset = param_off;
                param_off += body.size();
            } else if entry.meta.wrapped_type != 0 {
                entry.offset = sub_off;
                sub_off += 8;
                entry.ext_offset = ext_off;
                let resources = entry.ext.as_ref().expect("extension entries carry resources");
                ext_off += body.size()
                    + resources.coverage.total_size()
                    + resources.classes.total_size();
            } else {
                entry.offset = sub_off;
                sub_off += body.size();
            }
        }
        let subtable_section_size = sub_off;
        let param_section_size = param_off;

        // group subtables into lookups; a contiguous label run is one lookup
        let mut lookups: Vec<LookupAssembly> = Vec::new();
        let mut label_map: HashMap<Label, u16> = HashMap::new();
        let mut last_label: Option<Label> = None;
        for entry in &self.entries {
            if entry.meta.is_ref || entry.meta.is_feature_param || entry.body.is_none() {
                continue;
            }
            if last_label == Some(entry.meta.label) {
                lookups
                    .last_mut()
                    .unwrap()
                    .subtable_offsets
                    .push(entry.offset);
            } else {
                debug_assert!(
                    !label_map.contains_key(&entry.meta.label),
                    "label defined in two non-adjacent runs"
                );
                label_map.insert(entry.meta.label, lookups.len() as u16);
                lookups.push(LookupAssembly {
                    lookup_type: entry.meta.lookup_type,
                    lookup_flag: entry.meta.lookup_flag,
                    mark_set_index: entry.meta.mark_set_index,
                    subtable_offsets: vec![entry.offset],
                });
                last_label = Some(entry.meta.label);
            }
        }
        log::debug!(
            "OTL layout: {} lookups, {} subtable bytes, {} coverage bytes",
            lookups.len(),
            subtable_section_size,
            self.coverage.total_size()
        );

        // resolve labels inside contextual lookup records
        let mut referenced: HashSet<Label> = HashSet::new();
        for entry in &mut self.entries {
            if entry.meta.is_ref {
                referenced.insert(entry.meta.label);
            }
            let loc = entry.meta.loc.clone();
            if let Some(records) = entry.body.as_mut().and_then(B::lookup_records_mut) {
                for record in records {
                    if let RecordLookup::Label(label) = record.lookup {
                        referenced.insert(label);
                        match label_map.get(&label) {
                            Some(idx) => record.lookup = RecordLookup::Index(*idx),
                            None => sink.push(Diagnostic::fatal(
                                loc.clone(),
                                format!("lookup reference {label:?} was never defined"),
                            )),
                        }
                    }
                }
            }
        }

        // standalone lookups nobody ever referenced
        for entry in &self.entries {
            if entry.meta.script == TAG_STANDALONE
                && !entry.meta.is_ref
                && entry.body.is_some()
                && !referenced.contains(&entry.meta.label)
            {
                sink.push(Diagnostic::warning(
                    entry.meta.loc.clone(),
                    format!("standalone {} is never referenced", entry.meta.id_text),
                ));
            }
        }

        // collect (script, language, feature) -> lookup indices
        let mut keys: IndexMap<(Tag, Tag, Tag), Vec<u16>> = IndexMap::new();
        let mut param_by_feature: HashMap<Tag, u32> = HashMap::new();
        for entry in &self.entries {
            let meta = &entry.meta;
            if meta.script == TAG_UNDEF || meta.script == TAG_STANDALONE {
                continue;
            }
            let key = (meta.script, meta.language, meta.feature);
            if meta.is_feature_param {
                // placeholder registrations re-use the real entry's offset
                if entry.body.is_some() {
                    param_by_feature.insert(meta.feature, entry.param_offset);
                }
                keys.entry(key).or_default();
                continue;
            }
            let Some(&idx) = label_map.get(&meta.label) else {
                sink.push(Diagnostic::fatal(
                    meta.loc.clone(),
                    format!("lookup reference in {} was never defined", meta.id_text),
                ));
                continue;
            };
            let indices = keys.entry(key).or_default();
            if !indices.contains(&idx) {
                indices.push(idx);
            }
        }

        // feature records in tag order, shared across language systems when
        // the lookup list matches
        let mut sorted_keys: Vec<_> = keys.into_iter().collect();
        sorted_keys.sort_by_key(|((s, l, f), _)| (*f, *s, *l));
        let mut feature_records: IndexMap<(Tag, Vec<u16>), u16> = IndexMap::new();
        let mut scripts: BTreeMap<Tag, BTreeMap<Tag, Vec<u16>>> = BTreeMap::new();
        for ((script, language, feature), indices) in sorted_keys {
            let next = feature_records.len() as u16;
            let feature_idx = *feature_records
                .entry((feature, indices.clone()))
                .or_insert(next);
            scripts
                .entry(script)
                .or_default()
                .entry(language)
                .or_default()
                .push(feature_idx);
        }

        // section positions
        let script_list = build_script_list(&scripts);
        let feature_list_size: u32 = 2
            + feature_records
                .keys()
                .map(|(_, lookups)| 6 + 4 + 2 * lookups.len() as u32)
                .sum::<u32>();
        let script_list_base = HEADER_SIZE;
        let feature_list_base = script_list_base + script_list.len() as u32;
        let param_base = feature_list_base + feature_list_size;
        let lookup_list_base = param_base + param_section_size;
        let lookup_list_size: u32 =
            2 + 2 * lookups.len() as u32 + lookups.iter().map(LookupAssembly::table_size).sum::<u32>();
        let subtable_base = lookup_list_base + lookup_list_size;
        let coverage_base = subtable_base + subtable_section_size;
        let class_base = coverage_base + self.coverage.total_size();
        let ext_base = class_base + self.classes.total_size();

        let default_loc = SourceLocation::default();
        let header_ctx = WriteCtx {
            coverage: &self.coverage,
            classes: &self.classes,
            cov_base: 0,
            class_base: 0,
            loc: &default_loc,
            id_text: "table header",
        };

        let mut w = OtlWriter::new();
        w.u32(0x0001_0000);
        w.u16(header_ctx.check(script_list_base, "script list", sink));
        w.u16(header_ctx.check(feature_list_base, "feature list", sink));
        w.u16(header_ctx.check(lookup_list_base, "lookup list", sink));
        w.extend(&script_list);

        // FeatureList
        w.u16(feature_records.len() as u16);
        let mut feature_table_offsets = Vec::with_capacity(feature_records.len());
        let mut table_off = 2 + 6 * feature_records.len() as u32;
        for (_, lookup_indices) in feature_records.keys() {
            feature_table_offsets.push(table_off);
            table_off += 4 + 2 * lookup_indices.len() as u32;
        }
        for ((tag, _), table_off) in feature_records.keys().zip(&feature_table_offsets) {
            w.tag(*tag);
            w.u16(header_ctx.check(*table_off, "feature table", sink));
        }
        for ((tag, lookup_indices), table_off) in
            feature_records.keys().zip(&feature_table_offsets)
        {
            let table_abs = feature_list_base + table_off;
            let param = match param_by_feature.get(tag) {
                Some(param_offset) => {
                    let rel = param_base + param_offset - table_abs;
                    header_ctx.check(rel, "feature parameter subtable", sink)
                }
                None => 0,
            };
            w.u16(param);
            w.u16(lookup_indices.len() as u16);
            for idx in lookup_indices {
                w.u16(*idx);
            }
        }
        debug_assert_eq!(w.len(), param_base, "feature list size miscalculation");

        // feature parameter subtables
        for entry in &self.entries {
            if !entry.meta.is_feature_param || entry.meta.is_ref {
                continue;
            }
            if let Some(body) = &entry.body {
                let ctx = WriteCtx {
                    coverage: &self.coverage,
                    classes: &self.classes,
                    cov_base: 0,
                    class_base: 0,
                    loc: &entry.meta.loc,
                    id_text: &entry.meta.id_text,
                };
                body.write(&mut w, &ctx, sink);
            }
        }
        debug_assert_eq!(w.len(), lookup_list_base, "feature params size miscalculation");

        // LookupList
        w.u16(lookups.len() as u16);
        let mut lookup_table_off = 2 + 2 * lookups.len() as u32;
        let mut lookup_table_offsets = Vec::new();
        for lookup in &lookups {
            w.u16(header_ctx.check(lookup_table_off, "lookup table", sink));
            lookup_table_offsets.push(lookup_table_off);
            lookup_table_off += lookup.table_size();
        }
        for (lookup, table_off) in lookups.iter().zip(&lookup_table_offsets) {
            let table_abs = lookup_list_base + table_off;
            w.u16(lookup.lookup_type);
            w.u16(lookup.lookup_flag);
            w.u16(lookup.subtable_offsets.len() as u16);
            for sub in &lookup.subtable_offsets {
                let rel = subtable_base + sub - table_abs;
                w.u16(header_ctx.check(rel, "lookup subtable", sink));
            }
            if lookup.lookup_flag & USE_MARK_FILTERING_SET != 0 {
                w.u16(lookup.mark_set_index.unwrap_or(0));
            }
        }
        debug_assert_eq!(w.len(), subtable_base, "lookup list size miscalculation");

        // main subtable section
        for entry in &self.entries {
            if entry.meta.is_ref || entry.meta.is_feature_param {
                continue;
            }
            let Some(body) = &entry.body else { continue };
            if entry.meta.wrapped_type != 0 {
                // extension record: the real subtable lives in the
                // extension section
                let target = (ext_base + entry.ext_offset) - (subtable_base + entry.offset);
                w.u16(1);
                w.u16(entry.meta.wrapped_type);
                w.u32(target);
            } else {
                let ctx = WriteCtx {
                    coverage: &self.coverage,
                    classes: &self.classes,
                    cov_base: coverage_base - (subtable_base + entry.offset),
                    class_base: class_base - (subtable_base + entry.offset),
                    loc: &entry.meta.loc,
                    id_text: &entry.meta.id_text,
                };
                body.write(&mut w, &ctx, sink);
            }
        }
        debug_assert_eq!(w.len(), coverage_base, "subtable section size miscalculation");

        self.coverage.write(&mut w);
        self.classes.write(&mut w);
        debug_assert_eq!(w.len(), ext_base, "coverage/class section size miscalculation");

        // extension section: each subtable immediately followed by its own
        // coverage and class tables
        for entry in &self.entries {
            if entry.meta.is_ref || entry.meta.wrapped_type == 0 {
                continue;
            }
            let (Some(body), Some(resources)) = (&entry.body, &entry.ext) else {
                continue;
            };
            let ctx = WriteCtx {
                coverage: &resources.coverage,
                classes: &resources.classes,
                cov_base: body.size(),
                class_base: body.size() + resources.coverage.total_size(),
                loc: &entry.meta.loc,
                id_text: &entry.meta.id_text,
            };
            body.write(&mut w, &ctx, sink);
            resources.coverage.write(&mut w);
            resources.classes.write(&mut w);
        }

        Some(w.into_bytes())
    }
}

/// Serialize the ScriptList; all offsets are internal to it.
fn build_script_list(scripts: &BTreeMap<Tag, BTreeMap<Tag, Vec<u16>>>) -> Vec<u8> {
    let mut w = OtlWriter::new();
    w.u16(scripts.len() as u16);
    let mut script_off = 2 + 6 * scripts.len() as u32;
    for (tag, languages) in scripts {
        w.tag(*tag);
        w.u16(script_off as u16);
        script_off += script_table_size(languages);
    }
    for languages in scripts.values() {
        let n_records = languages.keys().filter(|l| **l != LANG_DFLT).count() as u32;
        let mut lang_off = 4 + 6 * n_records;
        // DefaultLangSys comes first in the table body
        match languages.get(&LANG_DFLT) {
            Some(_) => {
                w.u16(lang_off as u16);
                lang_off += lang_sys_size(&languages[&LANG_DFLT]);
            }
            None => w.u16(0),
        }
        w.u16(n_records as u16);
        for (tag, features) in languages {
            if *tag == LANG_DFLT {
                continue;
            }
            w.tag(*tag);
            w.u16(lang_off as u16);
            lang_off += lang_sys_size(features);
        }
        if let Some(features) = languages.get(&LANG_DFLT) {
            write_lang_sys(&mut w, features);
        }
        for (tag, features) in languages {
            if *tag == LANG_DFLT {
                continue;
            }
            write_lang_sys(&mut w, features);
        }
    }
    w.into_bytes()
}

fn script_table_size(languages: &BTreeMap<Tag, Vec<u16>>) -> u32 {
    let n_records = languages.keys().filter(|l| **l != LANG_DFLT).count() as u32;
    4 + 6 * n_records + languages.values().map(|f| lang_sys_size(f)).sum::<u32>()
}

fn lang_sys_size(features: &[u16]) -> u32 {
    6 + 2 * features.len() as u32
}

fn write_lang_sys(w: &mut OtlWriter, features: &[u16]) {
    w.u16(0); // lookupOrderOffset, reserved
    w.u16(0xFFFF); // no required feature
    w.u16(features.len() as u16);
    for idx in features {
        w.u16(*idx);
    }
}

/// Write a lookup record array (count followed by records).
pub(crate) fn write_lookup_records(w: &mut OtlWriter, records: &[LookupRecord]) {
    w.u16(records.len() as u16);
    for record in records {
        w.u16(record.sequence_index);
        w.u16(record.index());
    }
}
