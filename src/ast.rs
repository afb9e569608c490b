//! The typed statement tree consumed by the compiler.
//!
//! The feature-file grammar and parser live outside this crate; whatever
//! parses the text is expected to produce this tree. Statements appear in
//! source order, and every node carries the [`SourceLocation`] diagnostics
//! will point at. Glyphs are still raw names or CIDs here: resolution
//! against the glyph inventory happens in the compiler, so that unknown
//! glyphs can be reported with the right location.

use font_types::Tag;
use smol_str::SmolStr;

use crate::diagnostic::SourceLocation;

/// The root of a parsed feature file, after include resolution.
#[derive(Clone, Debug, Default)]
pub struct Root {
    pub statements: Vec<Statement>,
}

#[derive(Clone, Debug)]
pub enum Statement {
    LanguageSystem(LanguageSystem),
    GlyphClassDef(GlyphClassDef),
    MarkClassDef(MarkClassDef),
    AnchorDef(AnchorDef),
    ValueRecordDef(ValueRecordDef),
    Feature(FeatureBlock),
    Lookup(LookupBlock),
    Table(TableBlock),
}

#[derive(Clone, Debug)]
pub struct LanguageSystem {
    pub script: Tag,
    pub language: Tag,
    pub loc: SourceLocation,
}

/// `@name = [ ... ];`
#[derive(Clone, Debug)]
pub struct GlyphClassDef {
    pub name: SmolStr,
    pub members: GlyphClass,
    pub loc: SourceLocation,
}

/// `markClass [glyphs] <anchor> @name;`
#[derive(Clone, Debug)]
pub struct MarkClassDef {
    pub members: GlyphOrClass,
    pub anchor: Anchor,
    pub name: SmolStr,
    pub loc: SourceLocation,
}

/// `anchorDef x y [contourpoint n] name;`
#[derive(Clone, Debug)]
pub struct AnchorDef {
    pub name: SmolStr,
    pub x: i16,
    pub y: i16,
    pub contourpoint: Option<u16>,
    pub loc: SourceLocation,
}

/// `valueRecordDef <...> name;`
#[derive(Clone, Debug)]
pub struct ValueRecordDef {
    pub name: SmolStr,
    pub metrics: Vec<i16>,
    pub loc: SourceLocation,
}

/// A single glyph reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Glyph {
    Named(SmolStr),
    Cid(u16),
    /// The explicit `NULL` glyph
    Null,
}

/// One item inside a glyph class literal.
#[derive(Clone, Debug)]
pub enum GlyphClassItem {
    Glyph(Glyph),
    /// `first - last`, either two names or two CIDs
    Range { start: Glyph, end: Glyph },
    /// `@name`
    ClassRef(SmolStr),
}

/// `[ ... ]` or `@name`
#[derive(Clone, Debug)]
pub enum GlyphClass {
    Literal(Vec<GlyphClassItem>),
    Named(SmolStr),
}

/// A pattern element that is either a glyph or a glyph class.
#[derive(Clone, Debug)]
pub enum GlyphOrClass {
    Glyph(Glyph),
    Class(GlyphClass),
}

/// `feature tag [useExtension] { ... } tag;`
#[derive(Clone, Debug)]
pub struct FeatureBlock {
    pub tag: Tag,
    pub use_extension: bool,
    pub statements: Vec<FeatureItem>,
    pub loc: SourceLocation,
}

/// `lookup NAME [useExtension] { ... } NAME;`
#[derive(Clone, Debug)]
pub struct LookupBlock {
    pub name: SmolStr,
    /// The label closing the block; must match `name`.
    pub end_name: SmolStr,
    pub use_extension: bool,
    pub statements: Vec<FeatureItem>,
    pub loc: SourceLocation,
}

#[derive(Clone, Debug)]
pub enum FeatureItem {
    Script { tag: Tag, loc: SourceLocation },
    Language(Language),
    LookupFlag(LookupFlagStatement),
    /// `subtable;`
    SubtableBreak { loc: SourceLocation },
    /// a nested named lookup definition
    Lookup(LookupBlock),
    /// `lookup NAME;`
    LookupRef { name: SmolStr, loc: SourceLocation },
    GlyphClassDef(GlyphClassDef),
    MarkClassDef(MarkClassDef),
    /// `feature tag;` (only meaningful inside `aalt`)
    FeatureRef { tag: Tag, loc: SourceLocation },
    Gsub(GsubStatement),
    Gpos(GposStatement),
    /// `featureNames { ... };` (ss## features)
    FeatureNames { names: Vec<NameSpec>, loc: SourceLocation },
    /// `cvParameters { ... };` (cv## features)
    CvParameters(CvParameters),
    /// `parameters ...;` (size feature)
    SizeParameters(SizeParameters),
    /// `sizemenuname ...;`
    SizeMenuName(NameSpec),
}

#[derive(Clone, Debug)]
pub struct Language {
    pub tag: Tag,
    pub exclude_dflt: bool,
    pub loc: SourceLocation,
}

#[derive(Clone, Debug)]
pub struct LookupFlagStatement {
    /// `lookupflag N;`
    pub bits: Option<u16>,
    pub values: Vec<LookupFlagValue>,
    pub loc: SourceLocation,
}

#[derive(Clone, Debug)]
pub enum LookupFlagValue {
    RightToLeft,
    IgnoreBaseGlyphs,
    IgnoreLigatures,
    IgnoreMarks,
    MarkAttachmentType(GlyphClass),
    UseMarkFilteringSet(GlyphClass),
}

#[derive(Clone, Debug)]
pub enum GsubStatement {
    Type1(Gsub1),
    Type2(Gsub2),
    Type3(Gsub3),
    Type4(Gsub4),
    Type6(Gsub6),
    Type8(Gsub8),
    Ignore(Ignore),
}

/// `sub a by b;` / `sub [a b] by [c d];`
#[derive(Clone, Debug)]
pub struct Gsub1 {
    pub target: GlyphOrClass,
    pub replacement: GlyphOrClass,
    pub loc: SourceLocation,
}

/// `sub f_i by f i;`
#[derive(Clone, Debug)]
pub struct Gsub2 {
    pub target: Glyph,
    pub replacement: Vec<Glyph>,
    pub loc: SourceLocation,
}

/// `sub a from [a.1 a.2];`
#[derive(Clone, Debug)]
pub struct Gsub3 {
    pub target: Glyph,
    pub alternates: GlyphClass,
    pub loc: SourceLocation,
}

/// `sub f i by f_i;`
#[derive(Clone, Debug)]
pub struct Gsub4 {
    pub target: Vec<GlyphOrClass>,
    pub replacement: Glyph,
    pub loc: SourceLocation,
}

/// A chaining contextual substitution rule.
#[derive(Clone, Debug)]
pub struct Gsub6 {
    pub backtrack: Vec<GlyphOrClass>,
    pub input: Vec<ContextItem>,
    pub lookahead: Vec<GlyphOrClass>,
    /// The inline `by ...` replacement, if any.
    pub replacement: Vec<GlyphOrClass>,
    pub loc: SourceLocation,
}

/// One marked input position of a contextual rule.
#[derive(Clone, Debug)]
pub struct ContextItem {
    pub target: GlyphOrClass,
    /// Direct `lookup NAME` references attached to this position.
    pub lookups: Vec<SmolStr>,
    /// Inline value record (contextual positioning only).
    pub value: Option<ValueRecord>,
}

/// `rsub A B' C by D;`
#[derive(Clone, Debug)]
pub struct Gsub8 {
    pub backtrack: Vec<GlyphOrClass>,
    pub input: GlyphOrClass,
    pub lookahead: Vec<GlyphOrClass>,
    pub replacement: GlyphOrClass,
    pub loc: SourceLocation,
}

/// `ignore sub ...;` / `ignore pos ...;`
#[derive(Clone, Debug)]
pub struct Ignore {
    pub rules: Vec<IgnoreRule>,
    pub loc: SourceLocation,
}

#[derive(Clone, Debug)]
pub struct IgnoreRule {
    pub backtrack: Vec<GlyphOrClass>,
    pub input: Vec<GlyphOrClass>,
    pub lookahead: Vec<GlyphOrClass>,
    pub loc: SourceLocation,
}

#[derive(Clone, Debug)]
pub enum GposStatement {
    Type1(Gpos1),
    Type2(Gpos2),
    Type3(Gpos3),
    Type4(Gpos4),
    Type5(Gpos5),
    Type6(Gpos6),
    Type8(Gpos8),
    Ignore(Ignore),
}

/// `pos glyph <value>;`
#[derive(Clone, Debug)]
pub struct Gpos1 {
    pub target: GlyphOrClass,
    pub value: ValueRecord,
    pub loc: SourceLocation,
}

/// `pos first <v1> second <v2>;` / `enum pos ...`
#[derive(Clone, Debug)]
pub struct Gpos2 {
    pub first: GlyphOrClass,
    pub first_value: ValueRecord,
    pub second: GlyphOrClass,
    pub second_value: Option<ValueRecord>,
    pub enumerated: bool,
    pub loc: SourceLocation,
}

/// `pos cursive glyph <entry> <exit>;`
#[derive(Clone, Debug)]
pub struct Gpos3 {
    pub target: GlyphOrClass,
    pub entry: Anchor,
    pub exit: Anchor,
    pub loc: SourceLocation,
}

/// `pos base glyph <anchor> mark @M ...;`
#[derive(Clone, Debug)]
pub struct Gpos4 {
    pub base: GlyphOrClass,
    pub attachments: Vec<AnchorMark>,
    pub loc: SourceLocation,
}

/// `pos ligature glyph <anchor> mark @M ... ligComponent ...;`
#[derive(Clone, Debug)]
pub struct Gpos5 {
    pub base: GlyphOrClass,
    /// One entry per ligature component.
    pub components: Vec<Vec<AnchorMark>>,
    pub loc: SourceLocation,
}

/// `pos mark glyph <anchor> mark @M ...;`
#[derive(Clone, Debug)]
pub struct Gpos6 {
    pub base: GlyphOrClass,
    pub attachments: Vec<AnchorMark>,
    pub loc: SourceLocation,
}

/// A chaining contextual positioning rule.
#[derive(Clone, Debug)]
pub struct Gpos8 {
    pub backtrack: Vec<GlyphOrClass>,
    pub input: Vec<ContextItem>,
    pub lookahead: Vec<GlyphOrClass>,
    pub loc: SourceLocation,
}

/// An `<anchor ...> mark @CLASS` pair; a lone NULL anchor carries no class.
#[derive(Clone, Debug)]
pub struct AnchorMark {
    pub anchor: Anchor,
    pub mark_class: Option<SmolStr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Anchor {
    Coord { x: i16, y: i16 },
    ContourPoint { x: i16, y: i16, point: u16 },
    /// Device-adjusted anchor; the deltas are not represented and the
    /// device offsets serialize as NULL.
    Device { x: i16, y: i16 },
    Named(SmolStr),
    Null,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueRecord {
    /// `<n>` or a bare number
    Metrics(Vec<i16>),
    /// `<name>`
    Named(SmolStr),
}

/// A name table string with optional platform/encoding/language ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameSpec {
    pub platform_id: Option<u16>,
    pub encoding_and_language: Option<(u16, u16)>,
    pub string: SmolStr,
    pub loc: SourceLocation,
}

#[derive(Clone, Debug)]
pub struct CvParameters {
    pub ui_label: Vec<NameSpec>,
    pub tooltip: Vec<NameSpec>,
    pub sample_text: Vec<NameSpec>,
    pub param_labels: Vec<Vec<NameSpec>>,
    pub characters: Vec<u32>,
    pub loc: SourceLocation,
}

#[derive(Clone, Debug)]
pub struct SizeParameters {
    /// Design size in decipoints.
    pub design_size: u16,
    pub subfamily_id: u16,
    pub range_start: u16,
    pub range_end: u16,
    pub loc: SourceLocation,
}

#[derive(Clone, Debug)]
pub enum TableBlock {
    Gdef { items: Vec<GdefItem>, loc: SourceLocation },
    Base { items: Vec<BaseItem>, loc: SourceLocation },
    Stat { items: Vec<StatItem>, loc: SourceLocation },
    Name { records: Vec<NameRecord>, loc: SourceLocation },
    Os2 { items: Vec<Os2Item>, loc: SourceLocation },
    Head { font_revision: f64, loc: SourceLocation },
    Hhea { items: Vec<MetricItem>, loc: SourceLocation },
    Vhea { items: Vec<MetricItem>, loc: SourceLocation },
    Vmtx { items: Vec<VmtxItem>, loc: SourceLocation },
}

#[derive(Clone, Debug)]
pub enum GdefItem {
    GlyphClassDef {
        base: Option<GlyphClass>,
        ligature: Option<GlyphClass>,
        mark: Option<GlyphClass>,
        component: Option<GlyphClass>,
        loc: SourceLocation,
    },
    Attach {
        target: GlyphOrClass,
        points: Vec<u16>,
        loc: SourceLocation,
    },
    LigatureCaretByPos {
        target: GlyphOrClass,
        carets: Vec<i16>,
        loc: SourceLocation,
    },
    LigatureCaretByIndex {
        target: GlyphOrClass,
        carets: Vec<u16>,
        loc: SourceLocation,
    },
}

#[derive(Clone, Debug)]
pub enum BaseItem {
    HorizTagList(Vec<Tag>),
    HorizScriptList(Vec<BaseScriptRecord>),
    VertTagList(Vec<Tag>),
    VertScriptList(Vec<BaseScriptRecord>),
}

#[derive(Clone, Debug)]
pub struct BaseScriptRecord {
    pub script: Tag,
    pub default_baseline: Tag,
    pub values: Vec<i16>,
}

#[derive(Clone, Debug)]
pub enum StatItem {
    ElidedFallbackName { names: Vec<NameSpec>, loc: SourceLocation },
    ElidedFallbackNameId { id: u16, loc: SourceLocation },
    DesignAxis {
        tag: Tag,
        ordering: u16,
        names: Vec<NameSpec>,
        loc: SourceLocation,
    },
    AxisValue {
        flags: u16,
        names: Vec<NameSpec>,
        locations: Vec<AxisLocation>,
        loc: SourceLocation,
    },
}

/// An axis location in a STAT `AxisValue` block. Values are 16.16 fixed,
/// carried here as `f64`.
#[derive(Clone, Debug)]
pub enum AxisLocation {
    Value { tag: Tag, value: f64 },
    MinMax { tag: Tag, nominal: f64, min: f64, max: f64 },
    Linked { tag: Tag, value: f64, linked: f64 },
}

#[derive(Clone, Debug)]
pub struct NameRecord {
    pub name_id: u16,
    pub spec: NameSpec,
}

#[derive(Clone, Debug)]
pub enum Os2Item {
    FsType(u16),
    WeightClass(u16),
    WidthClass(u16),
    LowerOpSize(u16),
    UpperOpSize(u16),
    Panose([u8; 10]),
    UnicodeRange(Vec<u8>),
    CodePageRange(Vec<u16>),
    TypoAscender(i16),
    TypoDescender(i16),
    TypoLineGap(i16),
    XHeight(i16),
    CapHeight(i16),
    WinAscent(u16),
    WinDescent(u16),
    FamilyClass(i16),
    Vendor(SmolStr),
}

#[derive(Clone, Debug)]
pub struct MetricItem {
    pub keyword: MetricKeyword,
    pub value: i16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKeyword {
    CaretOffset,
    Ascender,
    Descender,
    LineGap,
    VertTypoAscender,
    VertTypoDescender,
    VertTypoLineGap,
}

#[derive(Clone, Debug)]
pub struct VmtxItem {
    pub keyword: VmtxKeyword,
    pub glyph: Glyph,
    pub value: i16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmtxKeyword {
    VertOriginY,
    VertAdvanceY,
}

impl GlyphOrClass {
    pub fn is_class(&self) -> bool {
        matches!(self, GlyphOrClass::Class(_))
    }
}

impl From<Glyph> for GlyphOrClass {
    fn from(src: Glyph) -> Self {
        GlyphOrClass::Glyph(src)
    }
}

impl Glyph {
    pub fn named(name: &str) -> Self {
        Glyph::Named(name.into())
    }
}
