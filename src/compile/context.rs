//! The feature-file driver: a visitor over the statement tree.
//!
//! The driver owns all authoring state (current feature, script, language,
//! lookup flags, the open lookup accumulator) and every named registry.
//! Rules are validated here and appended to the accumulator; closing a
//! lookup hands the accumulator to the kind-specific compiler.

use std::collections::BTreeMap;

use font_types::Tag;
use indexmap::{IndexMap, IndexSet};
use smol_str::SmolStr;

use crate::ast;
use crate::common::tags::{
    self, LANG_DFLT, MAC_PLATFORM_ID, SCRIPT_DFLT, TAG_STANDALONE, WIN_PLATFORM_ID,
};
use crate::common::{GlyphId, GlyphMap};
use crate::diagnostic::{Diagnostic, SourceLocation};
use crate::pattern::{AnchorMarkInfo, ClassRec, GPat, GlyphRec, MetricsInfo};

use super::glyph_range;
use super::lookups::gpos::Gpos;
use super::lookups::gsub::Gsub;
use super::lookups::{
    AnchorTable, BaseRec, CursiveEntry, CvParamsData, GlyphPair, Label, LabelAllocator,
    LookupKind, Payload, PosValue, Rule, SizeParamsData, SubtableInfo, TableTag,
};
use super::tables::{
    gdef::GlyphClassId, to_fixed, BaseBuilder, BaseScriptRecord, CaretValue, GdefBuilder,
    HeadBuilder, HheaBuilder, NameSpec, StatBuilder, Tables, VheaBuilder,
};
use super::{Compilation, Opts};
use crate::otl::{
    IGNORE_BASE_GLYPHS, IGNORE_LIGATURES, IGNORE_MARKS, MARK_ATTACHMENT_TYPE_MASK, RIGHT_TO_LEFT,
    USE_MARK_FILTERING_SET,
};

/// Flags global over the whole file.
#[derive(Clone, Copy, Debug, Default)]
struct GlobalFlags {
    seen_feature: bool,
    seen_lang_sys: bool,
    seen_gdef_gc: bool,
    seen_ignore_class_flag: bool,
    seen_mark_class_flag: bool,
    seen_non_dflt_script_lang: bool,
}

/// Everything later references need to know about a closed lookup.
#[derive(Clone, Debug)]
pub(crate) struct LookupState {
    kind: LookupKind,
    lookup_flag: u16,
    mark_set_index: Option<u16>,
    label: Label,
    use_extension: bool,
    loc: SourceLocation,
    id_text: String,
}

#[derive(Clone, Debug)]
struct NamedLookup {
    state: Option<LookupState>,
}

#[derive(Clone, Debug, Default)]
struct MarkClassEntry {
    members: Vec<(GlyphId, AnchorMarkInfo)>,
    used: bool,
}

#[derive(Clone, Debug, Default)]
struct AaltState {
    seen: bool,
    use_extension: bool,
    loc: SourceLocation,
    /// referenced feature tags, in authoring order, with a used flag
    features: IndexMap<Tag, bool>,
    /// target gid -> (alternate gid, priority index)
    rules: BTreeMap<GlyphId, Vec<(GlyphId, i16)>>,
}

/// Tracks whether a bare metric currently means a vertical advance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum SpecialVerticalFeatureState {
    #[default]
    Ready,
    Root,
    InnerLookup,
}

impl SpecialVerticalFeatureState {
    fn begin_feature(&mut self, tag: Tag) {
        if tags::is_vertical_feature(tag) {
            *self = Self::Root;
        }
    }

    fn end_feature(&mut self) {
        *self = Self::Ready;
    }

    fn begin_lookup_block(&mut self) {
        if *self == Self::Root {
            *self = Self::InnerLookup;
        }
    }

    fn end_lookup_block(&mut self) {
        if *self == Self::InnerLookup {
            *self = Self::Root;
        }
    }

    fn in_eligible_vertical_feature(&self) -> bool {
        *self == Self::Root
    }
}

pub(crate) struct CompilationCtx<'a> {
    glyph_map: &'a GlyphMap,
    pub(crate) errors: Vec<Diagnostic>,
    had_error: bool,
    aborted: bool,

    tables: Tables,
    gsub: Gsub,
    gpos: Gpos,
    labels: LabelAllocator,

    g_flags: GlobalFlags,
    default_lang_systems: IndexSet<(Tag, Tag)>,

    cur_feature: Option<Tag>,
    cur_script: Tag,
    cur_language: Tag,
    cur_lookup_flag: u16,
    cur_mark_filter_set: Option<u16>,
    cur_systems: Vec<(Tag, Tag)>,
    cur_named_lookup: Option<SmolStr>,
    named_label_pending: Option<Label>,
    cur_use_extension: bool,
    accumulator: Option<SubtableInfo>,
    dflt_lookups: Vec<LookupState>,
    seen_old_dflt: bool,
    vertical_feature: SpecialVerticalFeatureState,

    named_lookups: IndexMap<SmolStr, NamedLookup>,
    glyph_class_defs: IndexMap<SmolStr, ClassRec>,
    mark_classes: IndexMap<SmolStr, MarkClassEntry>,
    anchor_defs: IndexMap<SmolStr, AnchorTable>,
    value_defs: IndexMap<SmolStr, MetricsInfo>,

    mark_attach_classes: IndexMap<Vec<GlyphId>, u16>,
    mark_filter_sets: IndexMap<Vec<GlyphId>, u16>,

    aalt: AaltState,
    vertical_overrides: BTreeMap<GlyphId, i16>,
}

impl<'a> CompilationCtx<'a> {
    pub(crate) fn new(glyph_map: &'a GlyphMap, opts: Opts) -> Self {
        CompilationCtx {
            glyph_map,
            gsub: Gsub::new(opts.max_subtable_size),
            errors: Vec::new(),
            had_error: false,
            aborted: false,
            tables: Tables::default(),
            gpos: Gpos::default(),
            labels: LabelAllocator::default(),
            g_flags: GlobalFlags::default(),
            default_lang_systems: IndexSet::new(),
            cur_feature: None,
            cur_script: SCRIPT_DFLT,
            cur_language: LANG_DFLT,
            cur_lookup_flag: 0,
            cur_mark_filter_set: None,
            cur_systems: Vec::new(),
            cur_named_lookup: None,
            named_label_pending: None,
            cur_use_extension: false,
            accumulator: None,
            dflt_lookups: Vec::new(),
            seen_old_dflt: false,
            vertical_feature: SpecialVerticalFeatureState::default(),
            named_lookups: IndexMap::new(),
            glyph_class_defs: IndexMap::new(),
            mark_classes: IndexMap::new(),
            anchor_defs: IndexMap::new(),
            value_defs: IndexMap::new(),
            mark_attach_classes: IndexMap::new(),
            mark_filter_sets: IndexMap::new(),
            aalt: AaltState::default(),
            vertical_overrides: BTreeMap::new(),
        }
    }

    pub(crate) fn compile(&mut self, root: &ast::Root) {
        for statement in &root.statements {
            if self.aborted {
                break;
            }
            match statement {
                ast::Statement::LanguageSystem(ls) => self.add_language_system(ls),
                ast::Statement::GlyphClassDef(def) => self.define_glyph_class(def),
                ast::Statement::MarkClassDef(def) => self.define_mark_class(def),
                ast::Statement::AnchorDef(def) => self.define_named_anchor(def),
                ast::Statement::ValueRecordDef(def) => self.define_value_record(def),
                ast::Statement::Feature(block) => self.resolve_feature(block),
                ast::Statement::Lookup(block) => self.resolve_lookup_block(block, false),
                ast::Statement::Table(block) => self.resolve_table(block),
            }
        }
        if !self.aborted {
            if self.g_flags.seen_non_dflt_script_lang && !self.g_flags.seen_lang_sys {
                self.warning(
                    SourceLocation::default(),
                    "non-default scripts or languages are used, but no languagesystem \
                     statements were specified",
                );
            }
            self.create_aalt();
            self.gsub.create_anon_lookups(&mut self.labels, &mut self.errors);
            self.gpos.create_anon_lookups(&mut self.labels, &mut self.errors);
            self.sync_error_state();
        }
    }

    pub(crate) fn build(mut self) -> Result<Compilation, Vec<Diagnostic>> {
        self.sync_error_state();
        if self.had_error {
            return Err(self.errors);
        }

        let gsub = self.gsub.build(&mut self.errors);
        let gpos = self.gpos.build(&mut self.errors);
        let max_context = self
            .gsub
            .table
            .max_context
            .max(self.gpos.table.max_context);

        let gdef = self.finish_gdef();
        let base = self.tables.base.as_ref().map(BaseBuilder::build);
        let stat = match self.tables.stat.clone() {
            Some(stat) => match stat.build(&mut self.tables.name) {
                Ok(bytes) => Some(bytes),
                Err(missing_id) => {
                    self.errors.push(Diagnostic::fatal(
                        SourceLocation::default(),
                        format!("ElidedFallbackNameID {missing_id} does not exist in the font"),
                    ));
                    None
                }
            },
            None => None,
        };
        let name = self.tables.name.build();

        let mut vmtx = self.tables.vmtx.clone();
        for (gid, advance) in &self.vertical_overrides {
            vmtx.advances_y.push((*gid, *advance));
        }

        self.sync_error_state();
        if self.had_error {
            return Err(self.errors);
        }
        Ok(Compilation {
            warnings: self.errors,
            gsub,
            gpos,
            gdef,
            base,
            stat,
            name,
            os2: self.tables.os2,
            head: self.tables.head,
            hhea: self.tables.hhea,
            vhea: self.tables.vhea,
            vmtx,
            max_context,
        })
    }

    // ------------------------------------------------------------------
    // diagnostics
    // ------------------------------------------------------------------

    fn warning(&mut self, loc: SourceLocation, message: impl Into<String>) {
        self.errors.push(Diagnostic::warning(loc, message));
    }

    fn error(&mut self, loc: SourceLocation, message: impl Into<String>) {
        self.had_error = true;
        self.errors.push(Diagnostic::error(loc, message));
    }

    fn fatal(&mut self, loc: SourceLocation, message: impl Into<String>) {
        self.had_error = true;
        self.aborted = true;
        self.errors.push(Diagnostic::fatal(loc, message));
    }

    /// Pick up errors pushed directly into the sink by the compilers.
    fn sync_error_state(&mut self) {
        if !self.had_error {
            self.had_error = self.errors.iter().any(Diagnostic::is_error);
        }
        if !self.aborted {
            self.aborted = self.errors.iter().any(Diagnostic::is_fatal);
        }
    }

    fn id_text(&self) -> String {
        let mut out = match self.cur_feature {
            Some(tag) => format!("feature '{tag}'"),
            None => String::from("standalone"),
        };
        if let Some(name) = &self.cur_named_lookup {
            out.push_str(" lookup ");
            out.push_str(name);
        }
        out
    }

    // ------------------------------------------------------------------
    // language systems and top-level state
    // ------------------------------------------------------------------

    fn add_language_system(&mut self, ls: &ast::LanguageSystem) {
        if self.g_flags.seen_feature {
            self.error(
                ls.loc.clone(),
                "languagesystem must be specified before the first feature block",
            );
            return;
        }
        let mut language = ls.language;
        if language == tags::LANG_DFLT_OLD && ls.script != SCRIPT_DFLT {
            self.report_old_dflt(&ls.loc);
            language = LANG_DFLT;
        }
        self.g_flags.seen_lang_sys = true;
        if ls.script != SCRIPT_DFLT {
            self.g_flags.seen_non_dflt_script_lang = true;
        }
        if !self.default_lang_systems.insert((ls.script, language)) {
            self.warning(
                ls.loc.clone(),
                format!(
                    "duplicate languagesystem statement: {} {}",
                    ls.script, language
                ),
            );
        }
    }

    /// The old syntax is corrected and warned about, once.
    fn report_old_dflt(&mut self, loc: &SourceLocation) {
        if !self.seen_old_dflt {
            self.warning(
                loc.clone(),
                "'DFLT' is not a valid language tag; interpreting it as 'dflt'",
            );
            self.seen_old_dflt = true;
        }
    }

    fn default_systems(&self) -> Vec<(Tag, Tag)> {
        if self.default_lang_systems.is_empty() {
            vec![(SCRIPT_DFLT, LANG_DFLT)]
        } else {
            self.default_lang_systems.iter().copied().collect()
        }
    }

    // ------------------------------------------------------------------
    // features
    // ------------------------------------------------------------------

    fn resolve_feature(&mut self, block: &ast::FeatureBlock) {
        self.g_flags.seen_feature = true;
        if block.tag == tags::AALT {
            self.resolve_aalt_feature(block);
            return;
        }
        self.start_feature(block.tag);
        if block.tag == tags::SIZE {
            self.resolve_size_feature(block);
        } else {
            for item in &block.statements {
                if self.aborted {
                    break;
                }
                self.resolve_feature_item(item);
            }
        }
        self.end_feature();
    }

    fn start_feature(&mut self, tag: Tag) {
        debug_assert!(self.accumulator.is_none());
        self.cur_feature = Some(tag);
        self.cur_script = SCRIPT_DFLT;
        self.cur_language = LANG_DFLT;
        self.cur_lookup_flag = 0;
        self.cur_mark_filter_set = None;
        self.cur_systems = self.default_systems();
        self.dflt_lookups.clear();
        self.vertical_feature.begin_feature(tag);
        log::debug!("feature '{tag}' begins");
    }

    fn end_feature(&mut self) {
        self.close_lookup();
        self.cur_feature = None;
        self.cur_lookup_flag = 0;
        self.cur_mark_filter_set = None;
        self.cur_systems.clear();
        self.dflt_lookups.clear();
        self.vertical_feature.end_feature();
    }

    fn resolve_feature_item(&mut self, item: &ast::FeatureItem) {
        match item {
            ast::FeatureItem::Script { tag, loc } => self.set_script(*tag, loc),
            ast::FeatureItem::Language(stmt) => self.set_language(stmt),
            ast::FeatureItem::LookupFlag(stmt) => self.set_lookup_flag(stmt),
            ast::FeatureItem::SubtableBreak { loc } => self.subtable_break(loc),
            ast::FeatureItem::Lookup(block) => self.resolve_lookup_block(block, true),
            ast::FeatureItem::LookupRef { name, loc } => self.resolve_lookup_ref(name, loc),
            ast::FeatureItem::GlyphClassDef(def) => self.define_glyph_class(def),
            ast::FeatureItem::MarkClassDef(def) => self.define_mark_class(def),
            ast::FeatureItem::FeatureRef { loc, .. } => self.error(
                loc.clone(),
                "feature references are only allowed in the aalt feature",
            ),
            ast::FeatureItem::Gsub(stmt) => self.add_gsub_statement(stmt),
            ast::FeatureItem::Gpos(stmt) => self.add_gpos_statement(stmt),
            ast::FeatureItem::FeatureNames { names, loc } => {
                self.resolve_feature_names(names, loc)
            }
            ast::FeatureItem::CvParameters(params) => self.resolve_cv_parameters(params),
            ast::FeatureItem::SizeParameters(params) => self.error(
                params.loc.clone(),
                "parameters are only allowed in the size feature",
            ),
            ast::FeatureItem::SizeMenuName(spec) => self.error(
                spec.loc.clone(),
                "sizemenuname is only allowed in the size feature",
            ),
        }
    }

    fn set_script(&mut self, script: Tag, loc: &SourceLocation) {
        let Some(feature) = self.cur_feature else {
            self.error(loc.clone(), "script statements are only allowed in features");
            return;
        };
        if feature == tags::AALT || feature == tags::SIZE {
            self.error(
                loc.clone(),
                format!("script statements are not allowed in feature '{feature}'"),
            );
            return;
        }
        if self.cur_named_lookup.is_some() {
            self.error(loc.clone(), "script statements are not allowed in lookup blocks");
            return;
        }
        self.close_lookup();
        if script != SCRIPT_DFLT {
            self.g_flags.seen_non_dflt_script_lang = true;
        }
        self.cur_script = script;
        self.cur_language = LANG_DFLT;
        self.cur_systems = vec![(script, LANG_DFLT)];
    }

    fn set_language(&mut self, stmt: &ast::Language) {
        let Some(feature) = self.cur_feature else {
            self.error(
                stmt.loc.clone(),
                "language statements are only allowed in features",
            );
            return;
        };
        if feature == tags::AALT || feature == tags::SIZE {
            self.error(
                stmt.loc.clone(),
                format!("language statements are not allowed in feature '{feature}'"),
            );
            return;
        }
        if self.cur_named_lookup.is_some() {
            self.error(
                stmt.loc.clone(),
                "language statements are not allowed in lookup blocks",
            );
            return;
        }
        self.close_lookup();
        let mut language = stmt.tag;
        if language == tags::LANG_DFLT_OLD {
            self.report_old_dflt(&stmt.loc);
            language = LANG_DFLT;
        }
        self.cur_language = language;
        self.cur_systems = vec![(self.cur_script, language)];

        if language != LANG_DFLT && !stmt.exclude_dflt {
            // replay the script's default lookups under the new language
            for state in self.dflt_lookups.clone() {
                self.emit_ref(&state, self.cur_script, language, feature);
            }
        }
    }

    fn set_lookup_flag(&mut self, stmt: &ast::LookupFlagStatement) {
        self.close_lookup();
        if let Some(bits) = stmt.bits {
            self.cur_lookup_flag = bits;
            self.cur_mark_filter_set = None;
            return;
        }
        let mut flag = 0u16;
        let mut filter_set = None;
        for value in &stmt.values {
            match value {
                ast::LookupFlagValue::RightToLeft => flag |= RIGHT_TO_LEFT,
                ast::LookupFlagValue::IgnoreBaseGlyphs => {
                    self.g_flags.seen_ignore_class_flag = true;
                    flag |= IGNORE_BASE_GLYPHS;
                }
                ast::LookupFlagValue::IgnoreLigatures => {
                    self.g_flags.seen_ignore_class_flag = true;
                    flag |= IGNORE_LIGATURES;
                }
                ast::LookupFlagValue::IgnoreMarks => {
                    self.g_flags.seen_ignore_class_flag = true;
                    flag |= IGNORE_MARKS;
                }
                ast::LookupFlagValue::MarkAttachmentType(class) => {
                    self.g_flags.seen_mark_class_flag = true;
                    if let Some(cr) = self.resolve_glyph_class(class, &stmt.loc) {
                        let id = self.mark_attach_class_id(&cr, &stmt.loc);
                        // the last MarkAttachmentType statement wins
                        flag = (flag & !MARK_ATTACHMENT_TYPE_MASK) | (id << 8);
                    }
                }
                ast::LookupFlagValue::UseMarkFilteringSet(class) => {
                    if let Some(cr) = self.resolve_glyph_class(class, &stmt.loc) {
                        let index = self.mark_filter_set_index(&cr);
                        flag |= USE_MARK_FILTERING_SET;
                        filter_set = Some(index);
                    }
                }
            }
        }
        self.cur_lookup_flag = flag;
        self.cur_mark_filter_set = filter_set;
    }

    fn mark_attach_class_id(&mut self, cr: &ClassRec, loc: &SourceLocation) -> u16 {
        let set = sorted_glyph_set(cr);
        if let Some(id) = self.mark_attach_classes.get(&set) {
            return *id;
        }
        let id = self.mark_attach_classes.len() as u16 + 1;
        if id > 15 {
            self.error(
                loc.clone(),
                "MarkAttachmentType can reference at most 15 distinct classes",
            );
            return 15;
        }
        self.mark_attach_classes.insert(set, id);
        id
    }

    fn mark_filter_set_index(&mut self, cr: &ClassRec) -> u16 {
        let set = sorted_glyph_set(cr);
        if let Some(index) = self.mark_filter_sets.get(&set) {
            return *index;
        }
        let index = self.mark_filter_sets.len() as u16;
        self.mark_filter_sets.insert(set, index);
        index
    }

    fn subtable_break(&mut self, loc: &SourceLocation) {
        match self.accumulator.as_mut() {
            Some(si) if si.kind == LookupKind::GposPair => {
                if let Payload::PairPos(accum) = &mut si.payload {
                    accum.class_segments.push(Vec::new());
                }
            }
            _ => self.warning(
                loc.clone(),
                "subtable statement is not supported in this context",
            ),
        }
    }

    // ------------------------------------------------------------------
    // lookups
    // ------------------------------------------------------------------

    fn resolve_lookup_block(&mut self, block: &ast::LookupBlock, in_feature: bool) {
        if block.name != block.end_name {
            self.error(
                block.loc.clone(),
                format!(
                    "lookup block closing label '{}' does not match '{}'",
                    block.end_name, block.name
                ),
            );
        }
        if self.cur_feature == Some(tags::AALT) {
            self.error(block.loc.clone(), "lookups are not allowed in the aalt feature");
            return;
        }
        self.close_lookup();
        if self.named_lookups.contains_key(&block.name) {
            self.error(
                block.loc.clone(),
                format!("duplicate lookup name: {}", block.name),
            );
            return;
        }
        let Some(label) = self.labels.next_named() else {
            self.fatal(block.loc.clone(), "too many named lookups");
            return;
        };

        let saved_systems = (!in_feature).then(|| {
            std::mem::replace(&mut self.cur_systems, vec![(TAG_STANDALONE, TAG_STANDALONE)])
        });
        if !in_feature {
            self.cur_lookup_flag = 0;
            self.cur_mark_filter_set = None;
        }
        self.cur_named_lookup = Some(block.name.clone());
        self.named_label_pending = Some(label);
        self.cur_use_extension = block.use_extension;
        self.vertical_feature.begin_lookup_block();

        for item in &block.statements {
            if self.aborted {
                break;
            }
            match item {
                ast::FeatureItem::Script { loc, .. } | ast::FeatureItem::Language(ast::Language { loc, .. }) => {
                    self.error(
                        loc.clone(),
                        "script and language statements are not allowed in lookup blocks",
                    )
                }
                other => self.resolve_feature_item(other),
            }
        }

        let state = self.close_lookup();
        self.named_lookups
            .insert(block.name.clone(), NamedLookup { state });
        self.cur_named_lookup = None;
        self.named_label_pending = None;
        self.cur_use_extension = false;
        self.vertical_feature.end_lookup_block();
        if let Some(systems) = saved_systems {
            self.cur_systems = systems;
            self.cur_lookup_flag = 0;
            self.cur_mark_filter_set = None;
        }
    }

    fn resolve_lookup_ref(&mut self, name: &SmolStr, loc: &SourceLocation) {
        let Some(feature) = self.cur_feature else {
            self.warning(loc.clone(), "lookup reference outside a feature does nothing");
            return;
        };
        self.close_lookup();
        let state = match self.named_lookups.get(name) {
            Some(NamedLookup { state: Some(state) }) => state.clone(),
            Some(NamedLookup { state: None }) => {
                self.warning(loc.clone(), format!("lookup '{name}' has no rules"));
                return;
            }
            None => {
                self.error(loc.clone(), format!("lookup '{name}' is not defined"));
                return;
            }
        };
        for (script, language) in self.cur_systems.clone() {
            self.emit_ref(&state, script, language, feature);
        }
        if self.cur_language == LANG_DFLT {
            self.dflt_lookups.push(state);
        }
    }

    /// Emit a reference subtable record re-registering `state`'s lookup
    /// under another script/language.
    fn emit_ref(&mut self, state: &LookupState, script: Tag, language: Tag, feature: Tag) {
        let si = SubtableInfo {
            script,
            language,
            feature,
            kind: state.kind,
            lookup_flag: state.lookup_flag,
            mark_set_index: state.mark_set_index,
            label: state.label,
            is_reference: true,
            use_extension: state.use_extension,
            parent_feat_tag: None,
            loc: state.loc.clone(),
            id_text: state.id_text.clone(),
            payload: Payload::None,
        };
        match state.kind.table() {
            TableTag::Gsub => self.gsub.lookup_end(si, &mut self.labels, &mut self.errors),
            TableTag::Gpos => self.gpos.lookup_end(si, &mut self.labels, &mut self.errors),
        }
    }

    /// Make sure an accumulator of this kind is open, closing a
    /// mismatched one first.
    fn ensure_accumulator(&mut self, kind: LookupKind, loc: &SourceLocation) {
        if matches!(&self.accumulator, Some(si) if si.kind == kind) {
            return;
        }
        if self.accumulator.is_some() && self.cur_named_lookup.is_some() {
            self.error(
                loc.clone(),
                "rules of different types are not allowed in one lookup block",
            );
        }
        self.close_lookup();
        let label = match self.named_label_pending.take() {
            Some(label) => label,
            None => match self.labels.next_anon() {
                Some(label) => label,
                None => {
                    self.fatal(loc.clone(), "out of lookup labels");
                    return;
                }
            },
        };
        let (script, language) = self
            .cur_systems
            .first()
            .copied()
            .unwrap_or((SCRIPT_DFLT, LANG_DFLT));
        self.accumulator = Some(SubtableInfo {
            script,
            language,
            feature: self.cur_feature.unwrap_or(TAG_STANDALONE),
            kind,
            lookup_flag: self.cur_lookup_flag,
            mark_set_index: self.cur_mark_filter_set,
            label,
            is_reference: false,
            use_extension: self.cur_use_extension,
            parent_feat_tag: None,
            loc: loc.clone(),
            id_text: self.id_text(),
            payload: Payload::for_kind(kind),
        });
    }

    /// Close the open accumulator: run the kind compiler, re-register the
    /// lookup for the remaining active language systems, and remember it
    /// for DFLT replay.
    fn close_lookup(&mut self) -> Option<LookupState> {
        let si = self.accumulator.take()?;
        if payload_is_empty(&si.payload) {
            return None;
        }
        let state = LookupState {
            kind: si.kind,
            lookup_flag: si.lookup_flag,
            mark_set_index: si.mark_set_index,
            label: si.label,
            use_extension: si.use_extension,
            loc: si.loc.clone(),
            id_text: si.id_text.clone(),
        };

        if si.feature == tags::VRT2 && si.kind == LookupKind::GsubSingle {
            self.seed_vertical_advances(&si);
        }

        let feature = si.feature;
        match si.kind.table() {
            TableTag::Gsub => self.gsub.lookup_end(si, &mut self.labels, &mut self.errors),
            TableTag::Gpos => self.gpos.lookup_end(si, &mut self.labels, &mut self.errors),
        }
        self.sync_error_state();

        for (script, language) in self.cur_systems.clone().iter().skip(1) {
            self.emit_ref(&state, *script, *language, feature);
        }
        if self.cur_language == LANG_DFLT && self.cur_feature.is_some() {
            self.dflt_lookups.push(state.clone());
        }
        Some(state)
    }

    /// The `vrt2` side effect: a substitution target's horizontal advance
    /// becomes the replacement's vertical advance, unless one is set.
    fn seed_vertical_advances(&mut self, si: &SubtableInfo) {
        let Payload::Singles(singles) = &si.payload else {
            return;
        };
        for (target, replacement) in singles {
            if self.glyph_map.v_advance(*replacement).is_none()
                && !self.vertical_overrides.contains_key(replacement)
            {
                self.vertical_overrides
                    .insert(*replacement, -self.glyph_map.h_advance(*target));
            }
        }
    }

    // ------------------------------------------------------------------
    // named objects
    // ------------------------------------------------------------------

    fn define_glyph_class(&mut self, def: &ast::GlyphClassDef) {
        let Some(mut cr) = self.resolve_glyph_class(&def.members, &def.loc) else {
            return;
        };
        cr.gclass = true;
        if self.glyph_class_defs.contains_key(&def.name) {
            self.error(
                def.loc.clone(),
                format!("duplicate glyph class definition: @{}", def.name),
            );
            return;
        }
        self.glyph_class_defs.insert(def.name.clone(), cr);
    }

    fn define_mark_class(&mut self, def: &ast::MarkClassDef) {
        let Some(members) = self.resolve_glyph_or_class(&def.members, &def.loc) else {
            return;
        };
        let Some(anchor) = self.resolve_anchor(&def.anchor, &def.loc) else {
            self.error(
                def.loc.clone(),
                "a markClass definition requires a non-NULL anchor",
            );
            return;
        };
        if self.mark_classes.get(&def.name).is_some_and(|e| e.used) {
            self.error(
                def.loc.clone(),
                format!(
                    "mark class @{} cannot be extended after it has been used in a rule",
                    def.name
                ),
            );
            return;
        }
        let info = AnchorMarkInfo {
            format: anchor.format as u32,
            x: anchor.x,
            y: anchor.y,
            contourpoint: anchor.contourpoint,
            mark_class_name: def.name.clone(),
            ..Default::default()
        };
        let entry = self.mark_classes.entry(def.name.clone()).or_default();
        for gid in members.glyph_ids() {
            entry.members.push((gid, info.clone()));
        }
    }

    fn define_named_anchor(&mut self, def: &ast::AnchorDef) {
        let anchor = match def.contourpoint {
            Some(point) => AnchorTable {
                format: 2,
                x: def.x,
                y: def.y,
                contourpoint: point,
            },
            None => AnchorTable {
                format: 1,
                x: def.x,
                y: def.y,
                contourpoint: 0,
            },
        };
        if self.anchor_defs.insert(def.name.clone(), anchor).is_some() {
            self.error(
                def.loc.clone(),
                format!("duplicate anchor definition: {}", def.name),
            );
        }
    }

    fn define_value_record(&mut self, def: &ast::ValueRecordDef) {
        if !matches!(def.metrics.len(), 1 | 2 | 4 | 10) {
            self.error(
                def.loc.clone(),
                "a value record holds 1, 2, 4 or 10 metrics",
            );
            return;
        }
        if self
            .value_defs
            .insert(def.name.clone(), MetricsInfo::new(def.metrics.clone()))
            .is_some()
        {
            self.error(
                def.loc.clone(),
                format!("duplicate value record definition: {}", def.name),
            );
        }
    }

    // ------------------------------------------------------------------
    // glyph and pattern resolution
    // ------------------------------------------------------------------

    fn resolve_glyph(&mut self, glyph: &ast::Glyph, loc: &SourceLocation) -> Option<GlyphId> {
        match glyph {
            ast::Glyph::Named(name) => match self.glyph_map.get_name(name) {
                Some(gid) => Some(gid),
                None => {
                    self.error(loc.clone(), format!("glyph '{name}' not in the font"));
                    None
                }
            },
            ast::Glyph::Cid(cid) => match self.glyph_map.get_cid(*cid) {
                Some(gid) => Some(gid),
                None => {
                    self.error(loc.clone(), format!("CID {cid} not in the font"));
                    None
                }
            },
            ast::Glyph::Null => Some(GlyphId::NOTDEF),
        }
    }

    fn resolve_glyph_or_class(
        &mut self,
        item: &ast::GlyphOrClass,
        loc: &SourceLocation,
    ) -> Option<ClassRec> {
        match item {
            ast::GlyphOrClass::Glyph(glyph) => {
                let gid = self.resolve_glyph(glyph, loc)?;
                Some(ClassRec::from_glyph(gid))
            }
            ast::GlyphOrClass::Class(class) => self.resolve_glyph_class(class, loc),
        }
    }

    fn resolve_glyph_class(
        &mut self,
        class: &ast::GlyphClass,
        loc: &SourceLocation,
    ) -> Option<ClassRec> {
        match class {
            ast::GlyphClass::Named(name) => self.resolve_named_glyph_class(name, loc),
            ast::GlyphClass::Literal(items) => self.resolve_glyph_class_literal(items, loc),
        }
    }

    fn resolve_named_glyph_class(
        &mut self,
        name: &SmolStr,
        loc: &SourceLocation,
    ) -> Option<ClassRec> {
        if let Some(cr) = self.glyph_class_defs.get(name) {
            return Some(cr.clone());
        }
        if let Some(mark_class) = self.mark_classes.get(name) {
            let mut cr = ClassRec::new();
            cr.gclass = true;
            for (gid, info) in &mark_class.members {
                cr.glyphs.push(GlyphRec {
                    gid: *gid,
                    anchor: Some(info.clone()),
                });
            }
            cr.mark_class_name = Some(name.clone());
            return Some(cr);
        }
        self.error(loc.clone(), format!("glyph class @{name} is not defined"));
        None
    }

    fn resolve_glyph_class_literal(
        &mut self,
        items: &[ast::GlyphClassItem],
        loc: &SourceLocation,
    ) -> Option<ClassRec> {
        let mut cr = ClassRec::new();
        cr.gclass = true;
        for item in items {
            match item {
                ast::GlyphClassItem::Glyph(glyph) => {
                    if let Some(gid) = self.resolve_glyph(glyph, loc) {
                        cr.add_glyph(gid);
                    }
                }
                ast::GlyphClassItem::ClassRef(name) => {
                    if let Some(other) = self.resolve_named_glyph_class(name, loc) {
                        cr.concat(&other);
                    }
                }
                ast::GlyphClassItem::Range { start, end } => {
                    self.add_glyphs_from_range(start, end, &mut cr, loc);
                }
            }
        }
        Some(cr)
    }

    fn add_glyphs_from_range(
        &mut self,
        start: &ast::Glyph,
        end: &ast::Glyph,
        cr: &mut ClassRec,
        loc: &SourceLocation,
    ) {
        let mut missing: Vec<String> = Vec::new();
        let result = match (start, end) {
            (ast::Glyph::Cid(start), ast::Glyph::Cid(end)) => {
                glyph_range::cid(*start, *end, |cid| match self.glyph_map.get_cid(cid) {
                    Some(gid) => cr.add_glyph(gid),
                    None => missing.push(format!("cid{cid:05}")),
                })
            }
            (ast::Glyph::Named(start), ast::Glyph::Named(end)) => {
                glyph_range::named(start, end, |name| match self.glyph_map.get_name(name) {
                    Some(gid) => cr.add_glyph(gid),
                    None => missing.push(name.to_string()),
                })
            }
            _ => Err("invalid glyph range endpoints".into()),
        };
        if let Err(message) = result {
            self.error(loc.clone(), message);
        }
        for name in missing {
            self.error(
                loc.clone(),
                format!("range member '{name}' does not exist in the font"),
            );
        }
    }

    fn resolve_anchor(
        &mut self,
        anchor: &ast::Anchor,
        loc: &SourceLocation,
    ) -> Option<AnchorTable> {
        match anchor {
            ast::Anchor::Coord { x, y } => Some(AnchorTable {
                format: 1,
                x: *x,
                y: *y,
                contourpoint: 0,
            }),
            ast::Anchor::ContourPoint { x, y, point } => Some(AnchorTable {
                format: 2,
                x: *x,
                y: *y,
                contourpoint: *point,
            }),
            ast::Anchor::Device { x, y } => Some(AnchorTable {
                format: 3,
                x: *x,
                y: *y,
                contourpoint: 0,
            }),
            ast::Anchor::Named(name) => match self.anchor_defs.get(name) {
                Some(anchor) => Some(*anchor),
                None => {
                    self.error(loc.clone(), format!("anchor '{name}' is not defined"));
                    None
                }
            },
            ast::Anchor::Null => None,
        }
    }

    fn resolve_value_record(
        &mut self,
        record: &ast::ValueRecord,
        loc: &SourceLocation,
    ) -> MetricsInfo {
        let raw = match record {
            ast::ValueRecord::Metrics(metrics) => {
                if !matches!(metrics.len(), 1 | 2 | 4 | 10) {
                    self.error(loc.clone(), "a value record holds 1, 2, 4 or 10 metrics");
                    return MetricsInfo::default();
                }
                MetricsInfo::new(metrics.clone())
            }
            ast::ValueRecord::Named(name) => match self.value_defs.get(name) {
                Some(metrics) => metrics.clone(),
                None => {
                    self.error(loc.clone(), format!("value record '{name}' is not defined"));
                    return MetricsInfo::default();
                }
            },
        };
        // in the special vertical features a short record positions along
        // the vertical axis; normalize to the four-metric form here so the
        // lookup compilers never need feature context
        if self.vertical_feature.in_eligible_vertical_feature() {
            match raw.metrics.len() {
                1 => return MetricsInfo::new(vec![0, 0, 0, raw.metrics[0]]),
                2 => return MetricsInfo::new(vec![0, raw.metrics[0], 0, raw.metrics[1]]),
                _ => (),
            }
        }
        raw
    }

    fn resolve_chain_lookups(&mut self, names: &[SmolStr], loc: &SourceLocation) -> Vec<Label> {
        let mut labels = Vec::new();
        for name in names {
            match self.named_lookups.get(name) {
                Some(NamedLookup { state: Some(state) }) => labels.push(state.label),
                Some(NamedLookup { state: None }) => {
                    self.warning(loc.clone(), format!("lookup '{name}' has no rules"))
                }
                None => self.error(loc.clone(), format!("lookup '{name}' is not defined")),
            }
        }
        labels
    }

    fn with_accumulator(
        &mut self,
        kind: LookupKind,
        loc: &SourceLocation,
        f: impl FnOnce(&mut SubtableInfo, &mut Vec<Diagnostic>),
    ) {
        self.ensure_accumulator(kind, loc);
        let Some(mut si) = self.accumulator.take() else {
            return;
        };
        f(&mut si, &mut self.errors);
        self.accumulator = Some(si);
        self.sync_error_state();
    }

    // ------------------------------------------------------------------
    // substitution statements
    // ------------------------------------------------------------------

    fn add_gsub_statement(&mut self, stmt: &ast::GsubStatement) {
        match stmt {
            ast::GsubStatement::Type1(rule) => self.add_single_sub(rule),
            ast::GsubStatement::Type2(rule) => self.add_multiple_sub(rule),
            ast::GsubStatement::Type3(rule) => self.add_alternate_sub(rule),
            ast::GsubStatement::Type4(rule) => self.add_ligature_sub(rule),
            ast::GsubStatement::Type6(rule) => self.add_contextual_sub(rule),
            ast::GsubStatement::Type8(rule) => self.add_reverse_sub(rule),
            ast::GsubStatement::Ignore(rule) => {
                self.add_ignore_rules(rule, LookupKind::GsubChain)
            }
        }
    }

    /// The shared target/replacement shape checks of single-style rules.
    fn validate_single_pair(
        &mut self,
        target: &ast::GlyphOrClass,
        replacement: &ast::GlyphOrClass,
        loc: &SourceLocation,
    ) -> Option<(ClassRec, ClassRec)> {
        if matches!(target, ast::GlyphOrClass::Glyph(ast::Glyph::Null)) {
            self.error(loc.clone(), "NULL is not a valid substitution target");
            return None;
        }
        let targ = self.resolve_glyph_or_class(target, loc)?;
        let repl = self.resolve_glyph_or_class(replacement, loc)?;
        if targ.glyphs.is_empty() || repl.glyphs.is_empty() {
            return None;
        }
        if !targ.is_class() && repl.is_class() && repl.class_size() > 1 {
            self.error(loc.clone(), "cannot substitute a glyph by a glyph class");
            return None;
        }
        if repl.class_size() > 1 && targ.class_size() != repl.class_size() {
            self.error(
                loc.clone(),
                format!(
                    "replacement class length ({}) differs from target class length ({})",
                    repl.class_size(),
                    targ.class_size()
                ),
            );
            return None;
        }
        Some((targ, repl))
    }

    fn add_single_sub(&mut self, rule: &ast::Gsub1) {
        let Some((targ, repl)) = self.validate_single_pair(&rule.target, &rule.replacement, &rule.loc)
        else {
            return;
        };
        self.store_aalt_rule_info(&targ, &repl, false);
        if self.had_error {
            return;
        }
        self.with_accumulator(LookupKind::GsubSingle, &rule.loc, move |si, errors| {
            Gsub::add_rule(si, GPat::from_class(targ), Some(GPat::from_class(repl)), errors);
        });
    }

    fn add_multiple_sub(&mut self, rule: &ast::Gsub2) {
        let Some(target) = self.resolve_glyph(&rule.target, &rule.loc) else {
            return;
        };
        if rule.replacement.is_empty() {
            self.error(rule.loc.clone(), "multiple substitution requires replacement glyphs");
            return;
        }
        let mut repl = GPat::new();
        for glyph in &rule.replacement {
            match self.resolve_glyph(glyph, &rule.loc) {
                Some(gid) => repl.add_class(ClassRec::from_glyph(gid)),
                None => return,
            }
        }
        if self.had_error {
            return;
        }
        self.with_accumulator(LookupKind::GsubMultiple, &rule.loc, move |si, errors| {
            Gsub::add_rule(si, GPat::from_glyph(target), Some(repl), errors);
        });
    }

    fn add_alternate_sub(&mut self, rule: &ast::Gsub3) {
        let Some(target) = self.resolve_glyph(&rule.target, &rule.loc) else {
            return;
        };
        let Some(alternates) = self.resolve_glyph_class(&rule.alternates, &rule.loc) else {
            return;
        };
        let targ = ClassRec::from_glyph(target);
        self.store_aalt_rule_info(&targ, &alternates, true);
        if self.had_error {
            return;
        }
        self.with_accumulator(LookupKind::GsubAlternate, &rule.loc, move |si, errors| {
            Gsub::add_rule(
                si,
                GPat::from_class(targ),
                Some(GPat::from_class(alternates)),
                errors,
            );
        });
    }

    fn add_ligature_sub(&mut self, rule: &ast::Gsub4) {
        if rule.target.len() < 2 {
            self.error(rule.loc.clone(), "ligature substitution requires at least two targets");
            return;
        }
        let mut targ = GPat::new();
        for item in &rule.target {
            match self.resolve_glyph_or_class(item, &rule.loc) {
                Some(cr) if !cr.glyphs.is_empty() => targ.add_class(cr),
                _ => return,
            }
        }
        let Some(replacement) = self.resolve_glyph(&rule.replacement, &rule.loc) else {
            return;
        };
        if self.had_error {
            return;
        }
        self.with_accumulator(LookupKind::GsubLigature, &rule.loc, move |si, errors| {
            Gsub::add_rule(si, targ, Some(GPat::from_glyph(replacement)), errors);
        });
    }

    fn add_contextual_sub(&mut self, rule: &ast::Gsub6) {
        if rule.input.is_empty() {
            self.error(
                rule.loc.clone(),
                "a contextual substitution needs at least one marked glyph",
            );
            return;
        }
        let mut targ = GPat::new();
        for item in &rule.backtrack {
            match self.resolve_glyph_or_class(item, &rule.loc) {
                Some(mut cr) => {
                    cr.backtrack = true;
                    targ.add_class(cr);
                }
                None => return,
            }
        }
        let mut has_direct_lookups = false;
        for item in &rule.input {
            let Some(mut cr) = self.resolve_glyph_or_class(&item.target, &rule.loc) else {
                return;
            };
            cr.input = true;
            cr.marked = true;
            targ.has_marked = true;
            cr.lookup_labels = self.resolve_chain_lookups(&item.lookups, &rule.loc);
            if cr.has_lookups() {
                has_direct_lookups = true;
                targ.lookup_node = true;
            }
            targ.add_class(cr);
        }
        for item in &rule.lookahead {
            match self.resolve_glyph_or_class(item, &rule.loc) {
                Some(mut cr) => {
                    cr.lookahead = true;
                    targ.add_class(cr);
                }
                None => return,
            }
        }

        let repl = if rule.replacement.is_empty() {
            None
        } else {
            if has_direct_lookups {
                self.error(
                    rule.loc.clone(),
                    "an inline replacement cannot be combined with direct lookup references",
                );
                return;
            }
            let mut repl = GPat::new();
            for item in &rule.replacement {
                match self.resolve_glyph_or_class(item, &rule.loc) {
                    Some(cr) if !cr.glyphs.is_empty() => repl.add_class(cr),
                    _ => return,
                }
            }
            let marked_count = rule.input.len();
            if marked_count > 1 && (repl.classes.len() != 1 || repl.classes[0].glyphs.len() != 1) {
                self.error(
                    rule.loc.clone(),
                    "a contextual ligature substitution must replace the marked glyphs \
                     with a single glyph",
                );
                return;
            }
            if marked_count == 1 && repl.classes.len() == 1 {
                let input_len = targ.marked().next().map(|c| c.glyphs.len()).unwrap_or(1);
                let repl_len = repl.classes[0].glyphs.len();
                if repl_len > 1 && repl_len != input_len {
                    self.error(
                        rule.loc.clone(),
                        format!(
                            "replacement class length ({repl_len}) differs from target \
                             class length ({input_len})"
                        ),
                    );
                    return;
                }
            }
            Some(repl)
        };
        if self.had_error {
            return;
        }
        self.with_accumulator(LookupKind::GsubChain, &rule.loc, move |si, _| {
            si.payload.rules_mut().push(Rule::new(targ, repl));
        });
    }

    fn add_reverse_sub(&mut self, rule: &ast::Gsub8) {
        let Some((input, repl)) = self.validate_single_pair(&rule.input, &rule.replacement, &rule.loc)
        else {
            return;
        };
        let mut targ = GPat::new();
        for item in &rule.backtrack {
            match self.resolve_glyph_or_class(item, &rule.loc) {
                Some(mut cr) => {
                    cr.backtrack = true;
                    targ.add_class(cr);
                }
                None => return,
            }
        }
        let mut input = input;
        input.input = true;
        input.marked = true;
        targ.has_marked = true;
        targ.add_class(input);
        for item in &rule.lookahead {
            match self.resolve_glyph_or_class(item, &rule.loc) {
                Some(mut cr) => {
                    cr.lookahead = true;
                    targ.add_class(cr);
                }
                None => return,
            }
        }
        if self.had_error {
            return;
        }
        self.with_accumulator(LookupKind::GsubReverse, &rule.loc, move |si, _| {
            si.payload
                .rules_mut()
                .push(Rule::new(targ, Some(GPat::from_class(repl))));
        });
    }

    fn add_ignore_rules(&mut self, stmt: &ast::Ignore, kind: LookupKind) {
        for rule in &stmt.rules {
            let mut targ = GPat::new();
            targ.ignore_clause = true;
            let mut ok = true;
            for item in &rule.backtrack {
                match self.resolve_glyph_or_class(item, &rule.loc) {
                    Some(mut cr) => {
                        cr.backtrack = true;
                        targ.add_class(cr);
                    }
                    None => ok = false,
                }
            }
            for item in &rule.input {
                match self.resolve_glyph_or_class(item, &rule.loc) {
                    Some(mut cr) => {
                        cr.input = true;
                        cr.marked = true;
                        targ.has_marked = true;
                        targ.add_class(cr);
                    }
                    None => ok = false,
                }
            }
            for item in &rule.lookahead {
                match self.resolve_glyph_or_class(item, &rule.loc) {
                    Some(mut cr) => {
                        cr.lookahead = true;
                        targ.add_class(cr);
                    }
                    None => ok = false,
                }
            }
            if !ok || self.had_error {
                continue;
            }
            self.with_accumulator(kind, &rule.loc, move |si, _| {
                si.payload.rules_mut().push(Rule::new(targ, None));
            });
        }
    }

    // ------------------------------------------------------------------
    // positioning statements
    // ------------------------------------------------------------------

    fn add_gpos_statement(&mut self, stmt: &ast::GposStatement) {
        match stmt {
            ast::GposStatement::Type1(rule) => self.add_single_pos(rule),
            ast::GposStatement::Type2(rule) => self.add_pair_pos(rule),
            ast::GposStatement::Type3(rule) => self.add_cursive_pos(rule),
            ast::GposStatement::Type4(rule) => {
                self.add_mark_attach(
                    LookupKind::GposMarkToBase,
                    &rule.base,
                    std::slice::from_ref(&rule.attachments),
                    &rule.loc,
                )
            }
            ast::GposStatement::Type5(rule) => self.add_mark_attach(
                LookupKind::GposMarkToLig,
                &rule.base,
                &rule.components,
                &rule.loc,
            ),
            ast::GposStatement::Type6(rule) => {
                self.add_mark_attach(
                    LookupKind::GposMarkToMark,
                    &rule.base,
                    std::slice::from_ref(&rule.attachments),
                    &rule.loc,
                )
            }
            ast::GposStatement::Type8(rule) => self.add_contextual_pos(rule),
            ast::GposStatement::Ignore(rule) => {
                self.add_ignore_rules(rule, LookupKind::GposChain)
            }
        }
    }

    fn add_single_pos(&mut self, rule: &ast::Gpos1) {
        let Some(targ) = self.resolve_glyph_or_class(&rule.target, &rule.loc) else {
            return;
        };
        let metrics = self.resolve_value_record(&rule.value, &rule.loc);
        let value = PosValue::from_metrics(&metrics, false);
        if self.had_error {
            return;
        }
        self.with_accumulator(LookupKind::GposSingle, &rule.loc, move |si, _| {
            if let Payload::SinglePos(entries) = &mut si.payload {
                entries.push((targ, value));
            }
        });
    }

    fn add_pair_pos(&mut self, rule: &ast::Gpos2) {
        let Some(first) = self.resolve_glyph_or_class(&rule.first, &rule.loc) else {
            return;
        };
        let Some(second) = self.resolve_glyph_or_class(&rule.second, &rule.loc) else {
            return;
        };
        let m1 = self.resolve_value_record(&rule.first_value, &rule.loc);
        let v1 = PosValue::from_metrics(&m1, false);
        let v2 = match &rule.second_value {
            Some(value) => {
                let metrics = self.resolve_value_record(value, &rule.loc);
                PosValue::from_metrics(&metrics, false)
            }
            None => PosValue::default(),
        };
        if first.glyphs.is_empty() || second.glyphs.is_empty() || self.had_error {
            return;
        }
        let mut pat = GPat::new();
        pat.add_class(first);
        pat.add_class(second);
        pat.enumerate = rule.enumerated;
        let specific = pat.enumerate
            || (pat.classes[0].class_size() == 1 && pat.classes[1].class_size() == 1);
        self.with_accumulator(LookupKind::GposPair, &rule.loc, move |si, _| {
            let Payload::PairPos(accum) = &mut si.payload else {
                return;
            };
            let (first, second) = (&pat.classes[0], &pat.classes[1]);
            if specific {
                for g1 in first.glyph_ids() {
                    for g2 in second.glyph_ids() {
                        accum.glyph_pairs.push(GlyphPair {
                            first: g1,
                            second: g2,
                            v1,
                            v2,
                        });
                    }
                }
            } else {
                if accum.class_segments.is_empty() {
                    accum.class_segments.push(Vec::new());
                }
                accum
                    .class_segments
                    .last_mut()
                    .unwrap()
                    .push(super::lookups::ClassPair {
                        first: first.clone(),
                        second: second.clone(),
                        v1,
                        v2,
                    });
            }
        });
    }

    fn add_cursive_pos(&mut self, rule: &ast::Gpos3) {
        let Some(targ) = self.resolve_glyph_or_class(&rule.target, &rule.loc) else {
            return;
        };
        let entry = self.resolve_anchor(&rule.entry, &rule.loc);
        let exit = self.resolve_anchor(&rule.exit, &rule.loc);
        if self.had_error {
            return;
        }
        self.with_accumulator(LookupKind::GposCursive, &rule.loc, move |si, _| {
            if let Payload::Cursive(entries) = &mut si.payload {
                entries.push(CursiveEntry {
                    glyphs: targ,
                    entry,
                    exit,
                });
            }
        });
    }

    fn add_mark_attach(
        &mut self,
        kind: LookupKind,
        base: &ast::GlyphOrClass,
        components: &[Vec<ast::AnchorMark>],
        loc: &SourceLocation,
    ) {
        let Some(mut base_cr) = self.resolve_glyph_or_class(base, loc) else {
            return;
        };
        base_cr.basenode = true;
        // resolve anchors and mark classes up front; the class members are
        // frozen from here on
        let mut resolved: Vec<Vec<(SmolStr, AnchorTable)>> = Vec::new();
        let mut mark_nodes: IndexMap<SmolStr, ClassRec> = IndexMap::new();
        for component in components {
            let mut list = Vec::new();
            for attachment in component {
                let anchor = self.resolve_anchor(&attachment.anchor, loc);
                let Some(name) = &attachment.mark_class else {
                    // a bare NULL anchor: a component with no attachments
                    continue;
                };
                let Some(anchor) = anchor else {
                    self.error(loc.clone(), "mark attachment requires a non-NULL anchor");
                    continue;
                };
                if !self.mark_classes.contains_key(name) {
                    self.error(loc.clone(), format!("mark class @{name} is not defined"));
                    continue;
                }
                if !mark_nodes.contains_key(name) {
                    let mut node = self
                        .resolve_named_glyph_class(name, loc)
                        .unwrap_or_default();
                    node.marknode = true;
                    node.used_mark_class = true;
                    mark_nodes.insert(name.clone(), node);
                    if let Some(entry) = self.mark_classes.get_mut(name) {
                        entry.used = true;
                    }
                }
                list.push((name.clone(), anchor));
            }
            resolved.push(list);
        }
        if self.had_error {
            return;
        }
        self.with_accumulator(kind, loc, move |si, _| {
            let Payload::MarkAttach(accum) = &mut si.payload else {
                return;
            };
            let components: Vec<Vec<(u16, Option<AnchorTable>)>> = resolved
                .iter()
                .map(|list| {
                    list.iter()
                        .map(|(name, anchor)| {
                            let index = accum.class_index(name);
                            if let Some((_, node)) =
                                accum.mark_classes.get_index_mut(index as usize)
                            {
                                if node.glyphs.is_empty() {
                                    *node = mark_nodes.get(name).cloned().unwrap_or_default();
                                }
                            }
                            (index, Some(*anchor))
                        })
                        .collect()
                })
                .collect();
            accum.bases.push(BaseRec {
                base: base_cr,
                components,
            });
        });
    }

    fn add_contextual_pos(&mut self, rule: &ast::Gpos8) {
        if rule.input.is_empty() {
            self.error(
                rule.loc.clone(),
                "a contextual position needs at least one marked glyph",
            );
            return;
        }
        let mut targ = GPat::new();
        for item in &rule.backtrack {
            match self.resolve_glyph_or_class(item, &rule.loc) {
                Some(mut cr) => {
                    cr.backtrack = true;
                    targ.add_class(cr);
                }
                None => return,
            }
        }
        for item in &rule.input {
            let Some(mut cr) = self.resolve_glyph_or_class(&item.target, &rule.loc) else {
                return;
            };
            cr.input = true;
            cr.marked = true;
            targ.has_marked = true;
            if let Some(value) = &item.value {
                cr.metrics = self.resolve_value_record(value, &rule.loc);
            }
            cr.lookup_labels = self.resolve_chain_lookups(&item.lookups, &rule.loc);
            if cr.has_lookups() {
                targ.lookup_node = true;
            }
            targ.add_class(cr);
        }
        for item in &rule.lookahead {
            match self.resolve_glyph_or_class(item, &rule.loc) {
                Some(mut cr) => {
                    cr.lookahead = true;
                    targ.add_class(cr);
                }
                None => return,
            }
        }
        if self.had_error {
            return;
        }
        self.with_accumulator(LookupKind::GposChain, &rule.loc, move |si, _| {
            si.payload.rules_mut().push(Rule::new(targ, None));
        });
    }

    // ------------------------------------------------------------------
    // aalt
    // ------------------------------------------------------------------

    fn resolve_aalt_feature(&mut self, block: &ast::FeatureBlock) {
        self.aalt.seen = true;
        self.aalt.loc = block.loc.clone();
        self.aalt.use_extension = block.use_extension;
        self.cur_feature = Some(tags::AALT);
        for item in &block.statements {
            match item {
                ast::FeatureItem::FeatureRef { tag, loc } => {
                    if *tag == tags::AALT {
                        self.error(loc.clone(), "aalt cannot reference itself");
                    } else if self.aalt.features.contains_key(tag) {
                        self.warning(
                            loc.clone(),
                            format!("feature '{tag}' already referenced in aalt"),
                        );
                    } else {
                        self.aalt.features.insert(*tag, false);
                    }
                }
                ast::FeatureItem::Gsub(ast::GsubStatement::Type1(rule)) => {
                    if let Some((targ, repl)) =
                        self.validate_single_pair(&rule.target, &rule.replacement, &rule.loc)
                    {
                        self.store_aalt_rule_info(&targ, &repl, false);
                    }
                }
                ast::FeatureItem::Gsub(ast::GsubStatement::Type3(rule)) => {
                    let target = self.resolve_glyph(&rule.target, &rule.loc);
                    let alternates = self.resolve_glyph_class(&rule.alternates, &rule.loc);
                    if let (Some(target), Some(alternates)) = (target, alternates) {
                        let targ = ClassRec::from_glyph(target);
                        self.store_aalt_rule_info(&targ, &alternates, true);
                    }
                }
                ast::FeatureItem::Gsub(_) | ast::FeatureItem::Gpos(_) => self.error(
                    block.loc.clone(),
                    "only single and alternate substitutions are allowed in aalt",
                ),
                ast::FeatureItem::Lookup(inner) => {
                    self.error(inner.loc.clone(), "lookups are not allowed in aalt")
                }
                ast::FeatureItem::LookupRef { loc, .. } => {
                    self.error(loc.clone(), "lookups are not allowed in aalt")
                }
                ast::FeatureItem::Script { loc, .. } => self.error(
                    loc.clone(),
                    "script statements are not allowed in feature 'aalt'",
                ),
                ast::FeatureItem::Language(stmt) => self.error(
                    stmt.loc.clone(),
                    "language statements are not allowed in feature 'aalt'",
                ),
                ast::FeatureItem::GlyphClassDef(def) => self.define_glyph_class(def),
                other => {
                    let loc = feature_item_loc(other);
                    self.error(loc, "statement not allowed in feature 'aalt'");
                }
            }
        }
        self.cur_feature = None;
    }

    /// Record a single or alternate substitution for later aalt folding.
    fn store_aalt_rule_info(&mut self, targ: &ClassRec, repl: &ClassRec, alternate: bool) {
        let Some(feature) = self.cur_feature else {
            return;
        };
        // direct rules in the aalt block take priority over harvested ones
        let index = if feature == tags::AALT {
            -1
        } else {
            match self.aalt.features.get_index_of(&feature) {
                Some(idx) => idx as i16,
                None => return,
            }
        };
        if let Some(used) = self.aalt.features.get_mut(&feature) {
            *used = true;
        }
        if alternate {
            let target = targ.glyphs[0].gid;
            for alt in repl.glyph_ids() {
                self.aalt.rules.entry(target).or_default().push((alt, index));
            }
        } else {
            for (i, t) in targ.glyphs.iter().enumerate() {
                let alt = repl.glyphs[i.min(repl.glyphs.len() - 1)].gid;
                self.aalt.rules.entry(t.gid).or_default().push((alt, index));
            }
        }
    }

    /// After every other feature has compiled, fold the recorded
    /// alternates into the aalt lookup.
    fn create_aalt(&mut self) {
        if !self.aalt.seen {
            return;
        }
        for (tag, used) in self.aalt.features.clone() {
            if !used {
                self.warning(
                    self.aalt.loc.clone(),
                    format!(
                        "feature '{tag}' referenced in aalt contributed no single or \
                         alternate substitutions"
                    ),
                );
            }
        }
        if self.aalt.rules.is_empty() {
            self.warning(self.aalt.loc.clone(), "aalt feature has no rules");
            return;
        }

        // per target: order by priority, then drop duplicate alternates
        let mut folded: BTreeMap<GlyphId, Vec<GlyphId>> = BTreeMap::new();
        for (target, infos) in &self.aalt.rules {
            let mut infos = infos.clone();
            infos.sort_by_key(|(_, index)| *index);
            let mut alternates = Vec::new();
            for (gid, _) in infos {
                if !alternates.contains(&gid) {
                    alternates.push(gid);
                }
            }
            folded.insert(*target, alternates);
        }

        let all_single = folded.values().all(|alts| alts.len() == 1);
        let Some(label) = self.labels.next_anon() else {
            self.fatal(self.aalt.loc.clone(), "out of lookup labels");
            return;
        };
        let (kind, payload) = if all_single {
            (
                LookupKind::GsubSingle,
                Payload::Singles(folded.into_iter().map(|(t, alts)| (t, alts[0])).collect()),
            )
        } else {
            let rules = folded
                .into_iter()
                .map(|(target, alternates)| {
                    let mut repl = ClassRec::new();
                    repl.gclass = true;
                    for alt in alternates {
                        repl.add_glyph(alt);
                    }
                    Rule::new(GPat::from_glyph(target), Some(GPat::from_class(repl)))
                })
                .collect();
            (LookupKind::GsubAlternate, Payload::Rules(rules))
        };

        let systems = self.default_systems();
        let (first, rest) = systems.split_first().expect("never empty");
        let si = SubtableInfo {
            script: first.0,
            language: first.1,
            feature: tags::AALT,
            kind,
            lookup_flag: 0,
            mark_set_index: None,
            label,
            is_reference: false,
            use_extension: self.aalt.use_extension,
            parent_feat_tag: None,
            loc: self.aalt.loc.clone(),
            id_text: "feature 'aalt'".into(),
            payload,
        };
        let state = LookupState {
            kind,
            lookup_flag: 0,
            mark_set_index: None,
            label,
            use_extension: self.aalt.use_extension,
            loc: self.aalt.loc.clone(),
            id_text: "feature 'aalt'".into(),
        };
        self.gsub.lookup_end(si, &mut self.labels, &mut self.errors);
        for (script, language) in rest {
            self.emit_ref(&state, *script, *language, tags::AALT);
        }
        self.sync_error_state();
    }

    // ------------------------------------------------------------------
    // feature parameters
    // ------------------------------------------------------------------

    fn resolve_name_spec(&mut self, spec: &ast::NameSpec) -> Option<NameSpec> {
        let platform_id = spec.platform_id.unwrap_or(WIN_PLATFORM_ID);
        if platform_id != WIN_PLATFORM_ID && platform_id != MAC_PLATFORM_ID {
            self.error(
                spec.loc.clone(),
                format!("platform id must be 1 or 3, not {platform_id}"),
            );
            return None;
        }
        let (encoding_id, language_id) = spec.encoding_and_language.unwrap_or({
            if platform_id == MAC_PLATFORM_ID {
                (0, 0)
            } else {
                (1, 0x0409)
            }
        });
        Some(NameSpec {
            platform_id,
            encoding_id,
            language_id,
            string: spec.string.clone(),
        })
    }

    /// Emit a feature parameter subtable, plus placeholder registrations
    /// for every remaining active language system.
    fn emit_feature_param(&mut self, kind: LookupKind, payload: Payload, loc: &SourceLocation) {
        let Some(feature) = self.cur_feature else {
            return;
        };
        let Some(label) = self.labels.next_anon() else {
            self.fatal(loc.clone(), "out of lookup labels");
            return;
        };
        let systems = self.cur_systems.clone();
        for (i, (script, language)) in systems.iter().enumerate() {
            let si = SubtableInfo {
                script: *script,
                language: *language,
                feature,
                kind,
                lookup_flag: 0,
                mark_set_index: None,
                label,
                is_reference: false,
                use_extension: false,
                parent_feat_tag: None,
                loc: loc.clone(),
                id_text: self.id_text(),
                payload: if i == 0 { payload.clone() } else { Payload::None },
            };
            if i == 0 {
                match kind.table() {
                    TableTag::Gsub => {
                        self.gsub.lookup_end(si, &mut self.labels, &mut self.errors)
                    }
                    TableTag::Gpos => {
                        self.gpos.lookup_end(si, &mut self.labels, &mut self.errors)
                    }
                }
            } else {
                match kind.table() {
                    TableTag::Gsub => self.gsub.table.push(si.meta(), None, None),
                    TableTag::Gpos => self.gpos.table.push(si.meta(), None, None),
                }
            }
        }
    }

    fn resolve_feature_names(&mut self, names: &[ast::NameSpec], loc: &SourceLocation) {
        let Some(feature) = self.cur_feature else {
            return;
        };
        if !tags::is_stylistic_set(feature) {
            self.fatal(
                loc.clone(),
                format!(
                    "a featureNames block is only allowed in Stylistic Set (ssXX) \
                     features; it is being used in feature '{feature}'"
                ),
            );
            return;
        }
        let specs: Vec<NameSpec> = names
            .iter()
            .filter_map(|spec| self.resolve_name_spec(spec))
            .collect();
        if specs.is_empty() {
            self.warning(loc.clone(), "featureNames block has no names");
            return;
        }
        let name_id = self.tables.name.add_anon_group(&specs);
        if !self.tables.name.has_windows_default(name_id) {
            self.fatal(
                loc.clone(),
                format!(
                    "Missing Windows default name for 'featureNames' nameid {name_id} \
                     in feature '{feature}'"
                ),
            );
            return;
        }
        self.close_lookup();
        self.emit_feature_param(
            LookupKind::GsubFeatureNames,
            Payload::FeatureNames { name_id },
            loc,
        );
    }

    fn resolve_cv_parameters(&mut self, params: &ast::CvParameters) {
        let Some(feature) = self.cur_feature else {
            return;
        };
        if !tags::is_character_variant(feature) {
            self.fatal(
                params.loc.clone(),
                format!(
                    "a cvParameters block is only allowed in Character Variant (cvXX) \
                     features; it is being used in feature '{feature}'"
                ),
            );
            return;
        }
        let mut data = CvParamsData::default();
        let add_group = |ctx: &mut Self, specs: &[ast::NameSpec]| -> u16 {
            if specs.is_empty() {
                return 0;
            }
            let resolved: Vec<NameSpec> = specs
                .iter()
                .filter_map(|spec| ctx.resolve_name_spec(spec))
                .collect();
            ctx.tables.name.add_anon_group(&resolved)
        };
        data.feat_ui_label_name_id = add_group(self, &params.ui_label);
        data.feat_ui_tooltip_text_name_id = add_group(self, &params.tooltip);
        data.sample_text_name_id = add_group(self, &params.sample_text);
        if let Some((head, rest)) = params.param_labels.split_first() {
            data.first_param_ui_label_name_id = add_group(self, head);
            for group in rest {
                add_group(self, group);
            }
        }
        data.num_named_parameters = params.param_labels.len() as u16;
        data.char_values = params.characters.clone();

        for name_id in [
            data.feat_ui_label_name_id,
            data.feat_ui_tooltip_text_name_id,
            data.sample_text_name_id,
            data.first_param_ui_label_name_id,
        ] {
            if name_id != 0 && !self.tables.name.has_windows_default(name_id) {
                self.fatal(
                    params.loc.clone(),
                    format!(
                        "Missing Windows default name for 'cvParameters' nameid {name_id} \
                         in feature '{feature}'"
                    ),
                );
                return;
            }
        }
        self.close_lookup();
        self.emit_feature_param(
            LookupKind::GsubCvParam,
            Payload::CvParams(data),
            &params.loc,
        );
    }

    fn resolve_size_feature(&mut self, block: &ast::FeatureBlock) {
        let mut params: Option<SizeParamsData> = None;
        let mut menu_names: Vec<NameSpec> = Vec::new();
        for item in &block.statements {
            match item {
                ast::FeatureItem::SizeParameters(p) => {
                    params = Some(SizeParamsData {
                        design_size: p.design_size,
                        subfamily_id: p.subfamily_id,
                        name_id: 0,
                        range_start: p.range_start,
                        range_end: p.range_end,
                    });
                }
                ast::FeatureItem::SizeMenuName(spec) => {
                    if let Some(resolved) = self.resolve_name_spec(spec) {
                        menu_names.push(resolved);
                    }
                }
                other => {
                    let loc = feature_item_loc(other);
                    self.error(
                        loc,
                        "the size feature can only contain parameters and sizemenuname",
                    );
                }
            }
        }
        let Some(mut data) = params else {
            self.error(
                block.loc.clone(),
                "the size feature requires a parameters statement",
            );
            return;
        };
        if data.subfamily_id != 0 {
            if menu_names.is_empty() {
                self.error(
                    block.loc.clone(),
                    "a size feature with a subfamily identifier requires sizemenuname strings",
                );
                return;
            }
            data.name_id = self.tables.name.add_anon_group(&menu_names);
        } else if !menu_names.is_empty() {
            self.warning(
                block.loc.clone(),
                "sizemenuname strings are ignored when the subfamily identifier is 0",
            );
        }
        self.emit_feature_param(
            LookupKind::GposSizeParam,
            Payload::SizeParams(data),
            &block.loc,
        );
    }

    // ------------------------------------------------------------------
    // tables
    // ------------------------------------------------------------------

    fn resolve_table(&mut self, block: &ast::TableBlock) {
        match block {
            ast::TableBlock::Gdef { items, .. } => self.resolve_gdef(items),
            ast::TableBlock::Base { items, .. } => self.resolve_base(items),
            ast::TableBlock::Stat { items, loc } => self.resolve_stat(items, loc),
            ast::TableBlock::Name { records, .. } => {
                for record in records {
                    if let Some(spec) = self.resolve_name_spec(&record.spec) {
                        self.tables.name.add(record.name_id, spec);
                    }
                }
            }
            ast::TableBlock::Os2 { items, loc } => self.resolve_os2(items, loc),
            ast::TableBlock::Head { font_revision, .. } => {
                self.tables.head = Some(HeadBuilder {
                    font_revision: to_fixed(*font_revision),
                });
            }
            ast::TableBlock::Hhea { items, .. } => {
                let mut hhea = HheaBuilder::default();
                for item in items {
                    match item.keyword {
                        ast::MetricKeyword::CaretOffset => hhea.caret_offset = Some(item.value),
                        ast::MetricKeyword::Ascender => hhea.ascender = Some(item.value),
                        ast::MetricKeyword::Descender => hhea.descender = Some(item.value),
                        ast::MetricKeyword::LineGap => hhea.line_gap = Some(item.value),
                        _ => (),
                    }
                }
                self.tables.hhea = Some(hhea);
            }
            ast::TableBlock::Vhea { items, .. } => {
                let mut vhea = VheaBuilder::default();
                for item in items {
                    match item.keyword {
                        ast::MetricKeyword::VertTypoAscender => {
                            vhea.vert_typo_ascender = Some(item.value)
                        }
                        ast::MetricKeyword::VertTypoDescender => {
                            vhea.vert_typo_descender = Some(item.value)
                        }
                        ast::MetricKeyword::VertTypoLineGap => {
                            vhea.vert_typo_line_gap = Some(item.value)
                        }
                        _ => (),
                    }
                }
                self.tables.vhea = Some(vhea);
            }
            ast::TableBlock::Vmtx { items, loc } => {
                for item in items {
                    let Some(gid) = self.resolve_glyph(&item.glyph, loc) else {
                        continue;
                    };
                    match item.keyword {
                        ast::VmtxKeyword::VertOriginY => {
                            self.tables.vmtx.origins_y.push((gid, item.value))
                        }
                        ast::VmtxKeyword::VertAdvanceY => {
                            self.tables.vmtx.advances_y.push((gid, item.value))
                        }
                    }
                }
            }
        }
    }

    fn resolve_gdef(&mut self, items: &[ast::GdefItem]) {
        let mut gdef = self.tables.gdef.take().unwrap_or_default();
        for item in items {
            match item {
                ast::GdefItem::GlyphClassDef {
                    base,
                    ligature,
                    mark,
                    component,
                    loc,
                } => {
                    self.g_flags.seen_gdef_gc = true;
                    let classes = [
                        (base, GlyphClassId::Base),
                        (ligature, GlyphClassId::Ligature),
                        (mark, GlyphClassId::Mark),
                        (component, GlyphClassId::Component),
                    ];
                    for (class, id) in classes {
                        let Some(class) = class else { continue };
                        let Some(cr) = self.resolve_glyph_class(class, loc) else {
                            continue;
                        };
                        for gid in cr.glyph_ids() {
                            if let Err((glyph, prev)) = gdef.add_glyph_class(gid, id) {
                                self.error(
                                    loc.clone(),
                                    format!(
                                        "glyph {glyph} is already in GDEF glyph class {prev}"
                                    ),
                                );
                            }
                        }
                    }
                }
                ast::GdefItem::Attach { target, points, loc } => {
                    let Some(cr) = self.resolve_glyph_or_class(target, loc) else {
                        continue;
                    };
                    for gid in cr.glyph_ids() {
                        gdef.attach.entry(gid).or_default().extend(points.iter());
                    }
                }
                ast::GdefItem::LigatureCaretByPos { target, carets, loc } => {
                    let values = carets.iter().map(|c| CaretValue::Coordinate(*c)).collect();
                    self.add_ligature_carets(&mut gdef, target, values, loc);
                }
                ast::GdefItem::LigatureCaretByIndex { target, carets, loc } => {
                    let values = carets.iter().map(|c| CaretValue::PointIndex(*c)).collect();
                    self.add_ligature_carets(&mut gdef, target, values, loc);
                }
            }
        }
        self.tables.gdef = Some(gdef);
    }

    fn add_ligature_carets(
        &mut self,
        gdef: &mut GdefBuilder,
        target: &ast::GlyphOrClass,
        carets: Vec<CaretValue>,
        loc: &SourceLocation,
    ) {
        let Some(cr) = self.resolve_glyph_or_class(target, loc) else {
            return;
        };
        for gid in cr.glyph_ids() {
            if !gdef.set_ligature_carets(gid, carets.clone()) {
                self.warning(
                    loc.clone(),
                    format!("duplicate ligature caret statement for {gid}; the first wins"),
                );
            }
        }
    }

    fn resolve_base(&mut self, items: &[ast::BaseItem]) {
        let mut base = self.tables.base.take().unwrap_or_default();
        for item in items {
            match item {
                ast::BaseItem::HorizTagList(list) => base.horiz_tag_list = list.clone(),
                ast::BaseItem::HorizScriptList(records) => {
                    base.horiz_script_list = records
                        .iter()
                        .map(|r| BaseScriptRecord {
                            script: r.script,
                            default_baseline_tag: r.default_baseline,
                            values: r.values.clone(),
                        })
                        .collect()
                }
                ast::BaseItem::VertTagList(list) => base.vert_tag_list = list.clone(),
                ast::BaseItem::VertScriptList(records) => {
                    base.vert_script_list = records
                        .iter()
                        .map(|r| BaseScriptRecord {
                            script: r.script,
                            default_baseline_tag: r.default_baseline,
                            values: r.values.clone(),
                        })
                        .collect()
                }
            }
        }
        self.tables.base = Some(base);
    }

    fn resolve_stat(&mut self, items: &[ast::StatItem], loc: &SourceLocation) {
        use super::tables::{AxisLocation, AxisRecord, AxisValue, StatFallbackName};
        let mut fallback: Option<StatFallbackName> = None;
        let mut records = Vec::new();
        let mut values = Vec::new();
        for item in items {
            match item {
                ast::StatItem::ElidedFallbackName { names, .. } => {
                    let specs = names
                        .iter()
                        .filter_map(|spec| self.resolve_name_spec(spec))
                        .collect();
                    fallback = Some(StatFallbackName::Record(specs));
                }
                ast::StatItem::ElidedFallbackNameId { id, .. } => {
                    fallback = Some(StatFallbackName::Id(*id));
                }
                ast::StatItem::DesignAxis {
                    tag,
                    ordering,
                    names,
                    ..
                } => {
                    records.push(AxisRecord {
                        tag: *tag,
                        ordering: *ordering,
                        name: names
                            .iter()
                            .filter_map(|spec| self.resolve_name_spec(spec))
                            .collect(),
                    });
                }
                ast::StatItem::AxisValue {
                    flags,
                    names,
                    locations,
                    loc,
                } => {
                    let name = names
                        .iter()
                        .filter_map(|spec| self.resolve_name_spec(spec))
                        .collect();
                    let Some(location) = self.resolve_axis_location(locations, loc) else {
                        continue;
                    };
                    values.push(AxisValue {
                        flags: *flags,
                        name,
                        location,
                    });
                }
            }
        }
        let Some(fallback_name) = fallback else {
            self.error(
                loc.clone(),
                "the STAT table requires an ElidedFallbackName or ElidedFallbackNameID",
            );
            return;
        };
        self.tables.stat = Some(StatBuilder {
            fallback_name,
            records,
            values,
        });
    }

    fn resolve_axis_location(
        &mut self,
        locations: &[ast::AxisLocation],
        loc: &SourceLocation,
    ) -> Option<super::tables::AxisLocation> {
        use super::tables::AxisLocation as Resolved;
        if locations.len() > 1 {
            // multiple locations make a format 4 record; each must be a
            // plain value
            let mut resolved = Vec::new();
            for location in locations {
                match location {
                    ast::AxisLocation::Value { tag, value } => {
                        resolved.push((*tag, to_fixed(*value)))
                    }
                    _ => {
                        self.error(
                            loc.clone(),
                            "a multi-axis AxisValue can only contain plain location values",
                        );
                        return None;
                    }
                }
            }
            return Some(Resolved::Four(resolved));
        }
        match locations.first() {
            Some(ast::AxisLocation::Value { tag, value }) => Some(Resolved::One {
                tag: *tag,
                value: to_fixed(*value),
            }),
            Some(ast::AxisLocation::MinMax {
                tag,
                nominal,
                min,
                max,
            }) => Some(Resolved::Two {
                tag: *tag,
                nominal: to_fixed(*nominal),
                min: to_fixed(*min),
                max: to_fixed(*max),
            }),
            Some(ast::AxisLocation::Linked { tag, value, linked }) => Some(Resolved::Three {
                tag: *tag,
                value: to_fixed(*value),
                linked: to_fixed(*linked),
            }),
            None => {
                self.error(loc.clone(), "an AxisValue requires a location");
                None
            }
        }
    }

    fn resolve_os2(&mut self, items: &[ast::Os2Item], loc: &SourceLocation) {
        let mut os2 = self.tables.os2.take().unwrap_or_default();
        for item in items {
            match item {
                ast::Os2Item::FsType(v) => os2.fs_type = *v,
                ast::Os2Item::WeightClass(v) => os2.weight_class = *v,
                ast::Os2Item::WidthClass(v) => os2.width_class = *v,
                ast::Os2Item::LowerOpSize(v) => os2.lower_op_size = Some(*v),
                ast::Os2Item::UpperOpSize(v) => os2.upper_op_size = Some(*v),
                ast::Os2Item::Panose(v) => os2.panose = *v,
                ast::Os2Item::UnicodeRange(bits) => {
                    for bit in bits {
                        os2.set_unicode_range_bit(*bit);
                    }
                }
                ast::Os2Item::CodePageRange(pages) => {
                    for page in pages {
                        if !os2.add_code_page(*page) {
                            self.warning(
                                loc.clone(),
                                format!("unrecognized code page number {page}"),
                            );
                        }
                    }
                }
                ast::Os2Item::TypoAscender(v) => os2.typo_ascender = *v,
                ast::Os2Item::TypoDescender(v) => os2.typo_descender = *v,
                ast::Os2Item::TypoLineGap(v) => os2.typo_line_gap = *v,
                ast::Os2Item::XHeight(v) => os2.x_height = *v,
                ast::Os2Item::CapHeight(v) => os2.cap_height = *v,
                ast::Os2Item::WinAscent(v) => os2.win_ascent = *v,
                ast::Os2Item::WinDescent(v) => os2.win_descent = *v,
                ast::Os2Item::FamilyClass(v) => os2.family_class = *v,
                ast::Os2Item::Vendor(v) => os2.vendor_id = v.clone(),
            }
        }
        self.tables.os2 = Some(os2);
    }

    /// Assemble the final GDEF: the authored table, plus the classes
    /// synthesized from mark-class participation and the sets derived
    /// from lookupflag statements.
    fn finish_gdef(&mut self) -> Option<Vec<u8>> {
        let mut gdef = self.tables.gdef.take().unwrap_or_default();
        if !self.g_flags.seen_gdef_gc {
            for entry in self.mark_classes.values() {
                for (gid, _) in &entry.members {
                    gdef.glyph_classes
                        .entry(*gid)
                        .or_insert(GlyphClassId::Mark as u16);
                }
            }
        }
        if (self.g_flags.seen_ignore_class_flag || self.g_flags.seen_mark_class_flag)
            && gdef.glyph_classes.is_empty()
        {
            self.warning(
                SourceLocation::default(),
                "lookupflag statements filter by glyph class, but no GDEF glyph classes \
                 are defined or inferable",
            );
        }
        let mark_attach_classes: Vec<(Vec<GlyphId>, u16)> = self
            .mark_attach_classes
            .iter()
            .map(|(set, id)| (set.clone(), *id))
            .collect();
        for (set, id) in &mark_attach_classes {
            for gid in set {
                if let Some(prev) = gdef.mark_attach_class.insert(*gid, *id) {
                    if prev != *id {
                        self.warning(
                            SourceLocation::default(),
                            format!("glyph {gid} is in more than one mark attachment class"),
                        );
                        gdef.mark_attach_class.insert(*gid, prev);
                    }
                }
            }
        }
        for set in self.mark_filter_sets.keys() {
            gdef.mark_glyph_sets.push(set.clone());
        }
        (!gdef.is_empty()).then(|| gdef.build())
    }
}

/// A class's glyphs as a sorted, deduplicated set.
fn sorted_glyph_set(cr: &ClassRec) -> Vec<GlyphId> {
    let mut set = cr.clone();
    set.make_unique();
    set.glyph_ids().collect()
}

fn feature_item_loc(item: &ast::FeatureItem) -> SourceLocation {
    match item {
        ast::FeatureItem::Script { loc, .. }
        | ast::FeatureItem::SubtableBreak { loc }
        | ast::FeatureItem::LookupRef { loc, .. }
        | ast::FeatureItem::FeatureRef { loc, .. }
        | ast::FeatureItem::FeatureNames { loc, .. } => loc.clone(),
        ast::FeatureItem::Language(stmt) => stmt.loc.clone(),
        ast::FeatureItem::LookupFlag(stmt) => stmt.loc.clone(),
        ast::FeatureItem::Lookup(block) => block.loc.clone(),
        ast::FeatureItem::GlyphClassDef(def) => def.loc.clone(),
        ast::FeatureItem::MarkClassDef(def) => def.loc.clone(),
        ast::FeatureItem::Gsub(_) | ast::FeatureItem::Gpos(_) => SourceLocation::default(),
        ast::FeatureItem::CvParameters(params) => params.loc.clone(),
        ast::FeatureItem::SizeParameters(params) => params.loc.clone(),
        ast::FeatureItem::SizeMenuName(spec) => spec.loc.clone(),
    }
}

fn payload_is_empty(payload: &Payload) -> bool {
    match payload {
        Payload::None => true,
        Payload::Rules(rules) => rules.is_empty(),
        Payload::Singles(singles) => singles.is_empty(),
        Payload::SinglePos(entries) => entries.is_empty(),
        Payload::PairPos(accum) => {
            accum.glyph_pairs.is_empty() && accum.class_segments.iter().all(Vec::is_empty)
        }
        Payload::Cursive(entries) => entries.is_empty(),
        Payload::MarkAttach(accum) => accum.bases.is_empty(),
        Payload::FeatureNames { .. } | Payload::CvParams(_) | Payload::SizeParams(_) => false,
    }
}
