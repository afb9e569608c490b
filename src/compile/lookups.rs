//! The lookup accumulator and the types shared by both lookup compilers.

use std::collections::BTreeMap;

use font_types::Tag;
use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::common::GlyphId;
use crate::diagnostic::SourceLocation;
use crate::otl::SubtableMeta;
use crate::pattern::{AnchorMarkInfo, ClassRec, GPat, MetricsInfo};

pub(crate) mod contextual;
pub(crate) mod gpos;
pub(crate) mod gsub;

pub(crate) const NAMED_LKP_BEG: u16 = 0;
pub(crate) const NAMED_LKP_END: u16 = 0x1FFF;
pub(crate) const ANON_LKP_BEG: u16 = NAMED_LKP_END + 1;
pub(crate) const ANON_LKP_END: u16 = 0x7FFE;

/// The identity of a lookup.
///
/// Named lookups are numbered in authoring order as the feature file names
/// them; anonymous lookups are numbered by the compiler for sub-lookups
/// implied by contextual rules. Whether a use of a label is a definition
/// or a reference is tracked alongside it, not packed into the value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum Label {
    Named(u16),
    Anon(u16),
}

/// Allocates labels; named and anonymous ranges never collide.
#[derive(Clone, Debug)]
pub(crate) struct LabelAllocator {
    next_named: u16,
    next_anon: u16,
}

impl Default for LabelAllocator {
    fn default() -> Self {
        LabelAllocator {
            next_named: NAMED_LKP_BEG,
            next_anon: ANON_LKP_BEG,
        }
    }
}

impl LabelAllocator {
    pub(crate) fn next_named(&mut self) -> Option<Label> {
        if self.next_named > NAMED_LKP_END {
            return None;
        }
        let label = Label::Named(self.next_named);
        self.next_named += 1;
        Some(label)
    }

    pub(crate) fn next_anon(&mut self) -> Option<Label> {
        if self.next_anon > ANON_LKP_END {
            return None;
        }
        let label = Label::Anon(self.next_anon);
        self.next_anon += 1;
        Some(label)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TableTag {
    Gsub,
    Gpos,
}

/// The lookup kinds of both tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LookupKind {
    GsubSingle,
    GsubMultiple,
    GsubAlternate,
    GsubLigature,
    GsubChain,
    GsubReverse,
    GsubFeatureNames,
    GsubCvParam,
    GposSingle,
    GposPair,
    GposCursive,
    GposMarkToBase,
    GposMarkToLig,
    GposMarkToMark,
    GposChain,
    GposSizeParam,
}

impl LookupKind {
    pub(crate) fn table(&self) -> TableTag {
        use LookupKind::*;
        match self {
            GsubSingle | GsubMultiple | GsubAlternate | GsubLigature | GsubChain | GsubReverse
            | GsubFeatureNames | GsubCvParam => TableTag::Gsub,
            _ => TableTag::Gpos,
        }
    }

    /// The lookup type declared in the LookupList.
    pub(crate) fn ot_type(&self) -> u16 {
        use LookupKind::*;
        match self {
            GsubSingle => 1,
            GsubMultiple => 2,
            GsubAlternate => 3,
            GsubLigature => 4,
            GsubChain => 6,
            GsubReverse => 8,
            GposSingle => 1,
            GposPair => 2,
            GposCursive => 3,
            GposMarkToBase => 4,
            GposMarkToLig => 5,
            GposMarkToMark => 6,
            // context rules compile through the chain format
            GposChain => 8,
            GsubFeatureNames | GsubCvParam | GposSizeParam => 0,
        }
    }

    pub(crate) fn extension_type(&self) -> u16 {
        match self.table() {
            TableTag::Gsub => 7,
            TableTag::Gpos => 9,
        }
    }

    pub(crate) fn is_feature_param(&self) -> bool {
        matches!(
            self,
            LookupKind::GsubFeatureNames | LookupKind::GsubCvParam | LookupKind::GposSizeParam
        )
    }
}

/// A rule held by the accumulator: a target pattern and an optional
/// replacement.
#[derive(Clone, Debug)]
pub(crate) struct Rule {
    pub targ: GPat,
    pub repl: Option<GPat>,
    /// target pattern length, cached for the ligature sort
    pub length: u16,
}

impl Rule {
    pub(crate) fn new(targ: GPat, repl: Option<GPat>) -> Self {
        let length = targ.pattern_len();
        Rule { targ, repl, length }
    }
}

/// A compiled positioning value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct PosValue {
    pub x_placement: i16,
    pub y_placement: i16,
    pub x_advance: i16,
    pub y_advance: i16,
}

pub(crate) const X_PLACEMENT: u16 = 0x0001;
pub(crate) const Y_PLACEMENT: u16 = 0x0002;
pub(crate) const X_ADVANCE: u16 = 0x0004;
pub(crate) const Y_ADVANCE: u16 = 0x0008;

impl PosValue {
    /// Build from raw metrics. One metric is an advance on the writing
    /// axis; two are placement and advance on that axis; four (or ten,
    /// with the unserialized device slots) are the full record.
    pub(crate) fn from_metrics(mi: &MetricsInfo, vertical: bool) -> PosValue {
        let m = &mi.metrics;
        match m.len() {
            0 => PosValue::default(),
            1 if vertical => PosValue {
                y_advance: m[0],
                ..Default::default()
            },
            1 => PosValue {
                x_advance: m[0],
                ..Default::default()
            },
            2 if vertical => PosValue {
                y_placement: m[0],
                y_advance: m[1],
                ..Default::default()
            },
            2 => PosValue {
                x_placement: m[0],
                x_advance: m[1],
                ..Default::default()
            },
            _ => PosValue {
                x_placement: m[0],
                y_placement: m[1],
                x_advance: m[2],
                y_advance: m[3],
            },
        }
    }

    /// The value format bits for the non-zero fields.
    pub(crate) fn format(&self) -> u16 {
        let mut bits = 0;
        if self.x_placement != 0 {
            bits |= X_PLACEMENT;
        }
        if self.y_placement != 0 {
            bits |= Y_PLACEMENT;
        }
        if self.x_advance != 0 {
            bits |= X_ADVANCE;
        }
        if self.y_advance != 0 {
            bits |= Y_ADVANCE;
        }
        bits
    }

    pub(crate) fn size(format: u16) -> u32 {
        2 * format.count_ones()
    }

    /// Write the fields selected by `format`.
    pub(crate) fn write(&self, w: &mut crate::otl::OtlWriter, format: u16) {
        if format & X_PLACEMENT != 0 {
            w.i16(self.x_placement);
        }
        if format & Y_PLACEMENT != 0 {
            w.i16(self.y_placement);
        }
        if format & X_ADVANCE != 0 {
            w.i16(self.x_advance);
        }
        if format & Y_ADVANCE != 0 {
            w.i16(self.y_advance);
        }
    }
}

/// A compiled anchor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AnchorTable {
    pub format: u16,
    pub x: i16,
    pub y: i16,
    pub contourpoint: u16,
}

impl AnchorTable {
    pub(crate) fn from_mark_info(info: &AnchorMarkInfo) -> Option<AnchorTable> {
        if info.format == 0 {
            return None;
        }
        Some(AnchorTable {
            format: info.format as u16,
            x: info.x,
            y: info.y,
            contourpoint: info.contourpoint,
        })
    }

    pub(crate) fn size(&self) -> u32 {
        match self.format {
            2 => 8,
            // device offsets are written as NULL
            3 => 10,
            _ => 6,
        }
    }

    pub(crate) fn write(&self, w: &mut crate::otl::OtlWriter) {
        w.u16(self.format);
        w.i16(self.x);
        w.i16(self.y);
        match self.format {
            2 => w.u16(self.contourpoint),
            3 => {
                w.u16(0);
                w.u16(0);
            }
            _ => (),
        }
    }
}

/// Glyph-pair positioning accumulation; `segments` splits mirror
/// authored `subtable;` breaks in class kerning.
#[derive(Clone, Debug, Default)]
pub(crate) struct PairAccum {
    pub glyph_pairs: Vec<GlyphPair>,
    pub class_segments: Vec<Vec<ClassPair>>,
}

#[derive(Clone, Debug)]
pub(crate) struct GlyphPair {
    pub first: GlyphId,
    pub second: GlyphId,
    pub v1: PosValue,
    pub v2: PosValue,
}

#[derive(Clone, Debug)]
pub(crate) struct ClassPair {
    pub first: ClassRec,
    pub second: ClassRec,
    pub v1: PosValue,
    pub v2: PosValue,
}

#[derive(Clone, Debug)]
pub(crate) struct CursiveEntry {
    pub glyphs: ClassRec,
    pub entry: Option<AnchorTable>,
    pub exit: Option<AnchorTable>,
}

/// Mark attachment accumulation shared by the three mark-to-* kinds.
///
/// Mark classes are indexed in first-use order within the lookup; each is
/// a [`ClassRec`] whose glyphs carry their own anchors.
#[derive(Clone, Debug, Default)]
pub(crate) struct MarkAttachAccum {
    pub mark_classes: IndexMap<SmolStr, ClassRec>,
    pub bases: Vec<BaseRec>,
}

impl MarkAttachAccum {
    /// The index for a mark class name, registering it on first use.
    pub(crate) fn class_index(&mut self, name: &SmolStr) -> u16 {
        match self.mark_classes.get_index_of(name) {
            Some(idx) => idx as u16,
            None => {
                self.mark_classes.insert(name.clone(), ClassRec::new());
                (self.mark_classes.len() - 1) as u16
            }
        }
    }
}

/// One base (or ligature, or base mark) statement's worth of attachment
/// data: the base position and, per component, the anchors keyed by mark
/// class index. Non-ligature kinds have exactly one component.
#[derive(Clone, Debug)]
pub(crate) struct BaseRec {
    pub base: ClassRec,
    pub components: Vec<Vec<(u16, Option<AnchorTable>)>>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct CvParamsData {
    pub feat_ui_label_name_id: u16,
    pub feat_ui_tooltip_text_name_id: u16,
    pub sample_text_name_id: u16,
    pub num_named_parameters: u16,
    pub first_param_ui_label_name_id: u16,
    pub char_values: Vec<u32>,
}

impl CvParamsData {
    pub(crate) fn size(&self) -> u32 {
        7 * 2 + 3 * self.char_values.len() as u32
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct SizeParamsData {
    pub design_size: u16,
    pub subfamily_id: u16,
    pub name_id: u16,
    pub range_start: u16,
    pub range_end: u16,
}

/// The kind-specific contents of the accumulator.
#[derive(Clone, Debug)]
pub(crate) enum Payload {
    /// reference placeholders carry no data
    None,
    Rules(Vec<Rule>),
    Singles(BTreeMap<GlyphId, GlyphId>),
    SinglePos(Vec<(ClassRec, PosValue)>),
    PairPos(PairAccum),
    Cursive(Vec<CursiveEntry>),
    MarkAttach(MarkAttachAccum),
    FeatureNames { name_id: u16 },
    CvParams(CvParamsData),
    SizeParams(SizeParamsData),
}

impl Payload {
    pub(crate) fn for_kind(kind: LookupKind) -> Payload {
        use LookupKind::*;
        match kind {
            GsubSingle => Payload::Singles(BTreeMap::new()),
            GsubMultiple | GsubAlternate | GsubLigature | GsubChain | GsubReverse
            | GposChain => Payload::Rules(Vec::new()),
            GposSingle => Payload::SinglePos(Vec::new()),
            GposPair => Payload::PairPos(PairAccum::default()),
            GposCursive => Payload::Cursive(Vec::new()),
            GposMarkToBase | GposMarkToLig | GposMarkToMark => {
                Payload::MarkAttach(MarkAttachAccum::default())
            }
            GsubFeatureNames => Payload::FeatureNames { name_id: 0 },
            GsubCvParam => Payload::CvParams(CvParamsData::default()),
            GposSizeParam => Payload::SizeParams(SizeParamsData::default()),
        }
    }

    pub(crate) fn rules(&self) -> &[Rule] {
        match self {
            Payload::Rules(rules) => rules,
            _ => &[],
        }
    }

    pub(crate) fn rules_mut(&mut self) -> &mut Vec<Rule> {
        match self {
            Payload::Rules(rules) => rules,
            _ => panic!("payload is not rule-based"),
        }
    }
}

/// The transient unit the driver fills: one lookup's worth of rules,
/// created at lookup begin and compiled into subtables at lookup end.
#[derive(Clone, Debug)]
pub(crate) struct SubtableInfo {
    pub script: Tag,
    pub language: Tag,
    pub feature: Tag,
    pub kind: LookupKind,
    pub lookup_flag: u16,
    pub mark_set_index: Option<u16>,
    pub label: Label,
    pub is_reference: bool,
    pub use_extension: bool,
    /// For anonymous lookups, the feature whose contextual rule spawned
    /// them.
    pub parent_feat_tag: Option<Tag>,
    pub loc: SourceLocation,
    pub id_text: String,
    pub payload: Payload,
}

impl SubtableInfo {
    pub(crate) fn meta(&self) -> SubtableMeta {
        let wrapped = self.use_extension && !self.is_reference && !self.kind.is_feature_param();
        SubtableMeta {
            script: self.script,
            language: self.language,
            feature: self.feature,
            label: self.label,
            is_ref: self.is_reference,
            lookup_type: if wrapped {
                self.kind.extension_type()
            } else {
                self.kind.ot_type()
            },
            wrapped_type: if wrapped { self.kind.ot_type() } else { 0 },
            lookup_flag: self.lookup_flag,
            mark_set_index: self.mark_set_index,
            is_feature_param: self.kind.is_feature_param(),
            loc: self.loc.clone(),
            id_text: self.id_text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_ranges() {
        let mut labels = LabelAllocator::default();
        assert_eq!(labels.next_named(), Some(Label::Named(0)));
        assert_eq!(labels.next_named(), Some(Label::Named(1)));
        assert_eq!(labels.next_anon(), Some(Label::Anon(0x2000)));
        assert_eq!(labels.next_anon(), Some(Label::Anon(0x2001)));
    }

    #[test]
    fn value_format_bits() {
        let v = PosValue::from_metrics(&MetricsInfo::new(vec![-50]), false);
        assert_eq!(v.format(), X_ADVANCE);
        let v = PosValue::from_metrics(&MetricsInfo::new(vec![-50]), true);
        assert_eq!(v.format(), Y_ADVANCE);
        let v = PosValue::from_metrics(&MetricsInfo::new(vec![1, 2, 3, 4]), false);
        assert_eq!(v.format(), 0x000F);
        assert_eq!(PosValue::size(v.format()), 8);
    }
}
