//! Compiling a statement tree into OpenType layout tables.

use crate::ast;
use crate::common::GlyphMap;
use crate::diagnostic::Diagnostic;

pub(crate) mod context;
pub mod error;
pub(crate) mod glyph_range;
pub(crate) mod lookups;
pub(crate) mod tables;

use context::CompilationCtx;
pub use error::CompileError;
pub use tables::{
    BaseBuilder, GdefBuilder, HeadBuilder, HheaBuilder, NameBuilder, Os2Builder, StatBuilder,
    VheaBuilder, VmtxBuilder,
};

/// Compilation options.
#[derive(Clone, Debug)]
pub struct Opts {
    /// The subtable size at which automatic breaking kicks in.
    ///
    /// This is 0xFFFF in real fonts; tests lower it to exercise the
    /// breaking logic without enormous inputs.
    pub max_subtable_size: u32,
}

impl Default for Opts {
    fn default() -> Self {
        Opts {
            max_subtable_size: 0xFFFF,
        }
    }
}

impl Opts {
    pub fn new() -> Self {
        Opts::default()
    }

    pub fn max_subtable_size(mut self, size: u32) -> Self {
        self.max_subtable_size = size;
        self
    }
}

/// The result of a successful compile.
///
/// GSUB, GPOS, GDEF, BASE, STAT and name are serialized tables; the
/// remaining members are builder outputs the host merges into the tables
/// it writes itself.
#[derive(Clone, Debug)]
pub struct Compilation {
    /// Notes and warnings produced along the way.
    pub warnings: Vec<Diagnostic>,
    pub gsub: Option<Vec<u8>>,
    pub gpos: Option<Vec<u8>>,
    pub gdef: Option<Vec<u8>>,
    pub base: Option<Vec<u8>>,
    pub stat: Option<Vec<u8>>,
    pub name: Option<Vec<u8>>,
    pub os2: Option<Os2Builder>,
    pub head: Option<HeadBuilder>,
    pub hhea: Option<HheaBuilder>,
    pub vhea: Option<VheaBuilder>,
    /// Vertical metrics, including advances seeded by `vrt2`.
    pub vmtx: VmtxBuilder,
    /// For the OS/2 usMaxContext field.
    pub max_context: u16,
}

/// Compile a statement tree against a glyph inventory.
pub fn compile(root: &ast::Root, glyph_map: &GlyphMap) -> Result<Compilation, CompileError> {
    compile_with_opts(root, glyph_map, Opts::default())
}

pub fn compile_with_opts(
    root: &ast::Root,
    glyph_map: &GlyphMap,
    opts: Opts,
) -> Result<Compilation, CompileError> {
    let mut ctx = CompilationCtx::new(glyph_map, opts);
    ctx.compile(root);
    ctx.build().map_err(|errors| CompileError { errors })
}

#[cfg(test)]
mod tests {
    use font_types::Tag;

    use super::*;
    use crate::ast::*;
    use crate::common::GlyphName;
    use crate::diagnostic::SourceLocation;

    fn loc() -> SourceLocation {
        SourceLocation::default()
    }

    fn test_font() -> GlyphMap {
        [
            ".notdef", "A", "B", "C", "D", "a", "b", "c", "d", "f", "i", "f_i", "f_ii", "A.sc",
            "B.sc", "C.sc", "A.alt", "acute", "grave", "space",
        ]
        .iter()
        .map(|name| GlyphName::from(*name))
        .collect()
    }

    fn glyph(name: &str) -> GlyphOrClass {
        GlyphOrClass::Glyph(Glyph::named(name))
    }

    fn class(names: &[&str]) -> GlyphOrClass {
        GlyphOrClass::Class(GlyphClass::Literal(
            names
                .iter()
                .map(|n| GlyphClassItem::Glyph(Glyph::named(n)))
                .collect(),
        ))
    }

    fn sub1(target: GlyphOrClass, replacement: GlyphOrClass) -> FeatureItem {
        FeatureItem::Gsub(GsubStatement::Type1(Gsub1 {
            target,
            replacement,
            loc: loc(),
        }))
    }

    fn feature(tag: &[u8; 4], statements: Vec<FeatureItem>) -> Statement {
        Statement::Feature(FeatureBlock {
            tag: Tag::new(tag),
            use_extension: false,
            statements,
            loc: loc(),
        })
    }

    fn compile_ok(statements: Vec<Statement>) -> Compilation {
        let root = Root { statements };
        compile(&root, &test_font()).expect("compile failed")
    }

    // -------------------- a tiny GSUB reader for assertions ------------

    fn read_u16(bytes: &[u8], pos: usize) -> u16 {
        u16::from_be_bytes([bytes[pos], bytes[pos + 1]])
    }

    fn read_u32(bytes: &[u8], pos: usize) -> u32 {
        u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
    }

    struct Lookup {
        lookup_type: u16,
        subtables: Vec<usize>,
    }

    /// Parse the lookup list of a GSUB/GPOS table; subtable positions are
    /// absolute within the table.
    fn parse_lookups(bytes: &[u8]) -> Vec<Lookup> {
        let lookup_list = read_u16(bytes, 8) as usize;
        let count = read_u16(bytes, lookup_list) as usize;
        (0..count)
            .map(|i| {
                let table = lookup_list + read_u16(bytes, lookup_list + 2 + 2 * i) as usize;
                let lookup_type = read_u16(bytes, table);
                let sub_count = read_u16(bytes, table + 4) as usize;
                let subtables = (0..sub_count)
                    .map(|j| table + read_u16(bytes, table + 6 + 2 * j) as usize)
                    .collect();
                Lookup {
                    lookup_type,
                    subtables,
                }
            })
            .collect()
    }

    /// (script, language, feature) triples with their lookup indices.
    fn parse_features(bytes: &[u8]) -> Vec<(Tag, Tag, Tag, Vec<u16>)> {
        let script_list = read_u16(bytes, 4) as usize;
        let feature_list = read_u16(bytes, 6) as usize;

        let feature_count = read_u16(bytes, feature_list) as usize;
        let features: Vec<(Tag, Vec<u16>)> = (0..feature_count)
            .map(|i| {
                let rec = feature_list + 2 + 6 * i;
                let tag = Tag::new(&[
                    bytes[rec], bytes[rec + 1], bytes[rec + 2], bytes[rec + 3],
                ]);
                let table = feature_list + read_u16(bytes, rec + 4) as usize;
                let count = read_u16(bytes, table + 2) as usize;
                let lookups = (0..count)
                    .map(|j| read_u16(bytes, table + 4 + 2 * j))
                    .collect();
                (tag, lookups)
            })
            .collect();

        let mut out = Vec::new();
        let script_count = read_u16(bytes, script_list) as usize;
        for i in 0..script_count {
            let rec = script_list + 2 + 6 * i;
            let script_tag = Tag::new(&[
                bytes[rec], bytes[rec + 1], bytes[rec + 2], bytes[rec + 3],
            ]);
            let script = script_list + read_u16(bytes, rec + 4) as usize;
            let mut lang_systems: Vec<(Tag, usize)> = Vec::new();
            let default_off = read_u16(bytes, script) as usize;
            if default_off != 0 {
                lang_systems.push((Tag::new(b"dflt"), script + default_off));
            }
            let lang_count = read_u16(bytes, script + 2) as usize;
            for j in 0..lang_count {
                let lang_rec = script + 4 + 6 * j;
                let lang_tag = Tag::new(&[
                    bytes[lang_rec],
                    bytes[lang_rec + 1],
                    bytes[lang_rec + 2],
                    bytes[lang_rec + 3],
                ]);
                lang_systems.push((lang_tag, script + read_u16(bytes, lang_rec + 4) as usize));
            }
            for (lang_tag, lang_sys) in lang_systems {
                let count = read_u16(bytes, lang_sys + 4) as usize;
                for k in 0..count {
                    let feature_idx = read_u16(bytes, lang_sys + 6 + 2 * k) as usize;
                    let (tag, lookups) = &features[feature_idx];
                    out.push((script_tag, lang_tag, *tag, lookups.clone()));
                }
            }
        }
        out
    }

    // ------------------------------- scenarios -------------------------

    #[test]
    fn constant_delta_single_uses_format_1() {
        let compiled = compile_ok(vec![feature(
            b"test",
            vec![sub1(class(&["A", "B", "C"]), class(&["A.sc", "B.sc", "C.sc"]))],
        )]);
        let gsub = compiled.gsub.expect("gsub produced");
        let lookups = parse_lookups(&gsub);
        assert_eq!(lookups.len(), 1);
        assert_eq!(lookups[0].lookup_type, 1);
        let subtable = lookups[0].subtables[0];
        assert_eq!(read_u16(&gsub, subtable), 1, "format 1");
        let map = test_font();
        let expected_delta =
            map.get_name("A.sc").unwrap().to_u16() as i32 - map.get_name("A").unwrap().to_u16() as i32;
        assert_eq!(read_u16(&gsub, subtable + 4) as i16 as i32, expected_delta);
    }

    #[test]
    fn mixed_delta_single_falls_to_format_2() {
        let compiled = compile_ok(vec![feature(
            b"test",
            vec![
                sub1(glyph("A"), glyph("a")),
                sub1(glyph("B"), glyph("c")),
            ],
        )]);
        let gsub = compiled.gsub.unwrap();
        let lookups = parse_lookups(&gsub);
        let subtable = lookups[0].subtables[0];
        assert_eq!(read_u16(&gsub, subtable), 2, "format 2");
        assert_eq!(read_u16(&gsub, subtable + 4), 2, "glyph count");
    }

    #[test]
    fn ligature_cross_product() {
        let compiled = compile_ok(vec![feature(
            b"liga",
            vec![FeatureItem::Gsub(GsubStatement::Type4(Gsub4 {
                target: vec![class(&["f", "f_i"]), glyph("i")],
                replacement: Glyph::named("f_ii"),
                loc: loc(),
            }))],
        )]);
        let gsub = compiled.gsub.unwrap();
        let lookups = parse_lookups(&gsub);
        assert_eq!(lookups[0].lookup_type, 4);
        let subtable = lookups[0].subtables[0];
        // two ligature sets, one per first glyph
        assert_eq!(read_u16(&gsub, subtable + 4), 2);
        let map = test_font();
        let f_ii = map.get_name("f_ii").unwrap().to_u16();
        // first set starts with the lower first-glyph id (f)
        let set = subtable + read_u16(&gsub, subtable + 6) as usize;
        assert_eq!(read_u16(&gsub, set), 1, "one ligature in the set");
        let lig = set + read_u16(&gsub, set + 2) as usize;
        assert_eq!(read_u16(&gsub, lig), f_ii);
        assert_eq!(read_u16(&gsub, lig + 2), 2, "component count");
    }

    #[test]
    fn chain_inline_replacement_synthesizes_anon_lookup() {
        let compiled = compile_ok(vec![feature(
            b"test",
            vec![FeatureItem::Gsub(GsubStatement::Type6(Gsub6 {
                backtrack: vec![glyph("A")],
                input: vec![ContextItem {
                    target: glyph("B"),
                    lookups: vec![],
                    value: None,
                }],
                lookahead: vec![glyph("C")],
                replacement: vec![glyph("D")],
                loc: loc(),
            }))],
        )]);
        let gsub = compiled.gsub.unwrap();
        let lookups = parse_lookups(&gsub);
        assert_eq!(lookups.len(), 2, "chain lookup plus anonymous single");
        assert_eq!(lookups[0].lookup_type, 6);
        assert_eq!(lookups[1].lookup_type, 1);

        let chain = lookups[0].subtables[0];
        assert_eq!(read_u16(&gsub, chain), 3, "chain format 3");
        let backtrack_count = read_u16(&gsub, chain + 2) as usize;
        assert_eq!(backtrack_count, 1);
        let input_count = read_u16(&gsub, chain + 4 + 2 * backtrack_count) as usize;
        assert_eq!(input_count, 1);
        let lookahead_at = chain + 6 + 2 * backtrack_count + 2 * input_count;
        let lookahead_count = read_u16(&gsub, lookahead_at) as usize;
        assert_eq!(lookahead_count, 1);
        let records_at = lookahead_at + 2 + 2 * lookahead_count;
        assert_eq!(read_u16(&gsub, records_at), 1, "one lookup record");
        assert_eq!(read_u16(&gsub, records_at + 2), 0, "sequence index");
        assert_eq!(read_u16(&gsub, records_at + 4), 1, "anon lookup index");

        // the anonymous lookup maps B -> D
        let anon = lookups[1].subtables[0];
        let map = test_font();
        let expected = map.get_name("D").unwrap().to_u16() as i32
            - map.get_name("B").unwrap().to_u16() as i32;
        assert_eq!(read_u16(&gsub, anon), 1);
        assert_eq!(read_u16(&gsub, anon + 4) as i16 as i32, expected);

        // only the chain lookup is registered with the feature
        let features = parse_features(&gsub);
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].3, vec![0]);
    }

    fn aalt_root(smcp_repl: &str, c2sc_repl: &str) -> Vec<Statement> {
        vec![
            Statement::Feature(FeatureBlock {
                tag: Tag::new(b"aalt"),
                use_extension: false,
                statements: vec![
                    FeatureItem::FeatureRef {
                        tag: Tag::new(b"smcp"),
                        loc: loc(),
                    },
                    FeatureItem::FeatureRef {
                        tag: Tag::new(b"c2sc"),
                        loc: loc(),
                    },
                ],
                loc: loc(),
            }),
            feature(b"smcp", vec![sub1(glyph("A"), glyph(smcp_repl))]),
            feature(b"c2sc", vec![sub1(glyph("A"), glyph(c2sc_repl))]),
        ]
    }

    #[test]
    fn aalt_deduplicates_to_single() {
        let compiled = compile_ok(aalt_root("A.sc", "A.sc"));
        let gsub = compiled.gsub.unwrap();
        let lookups = parse_lookups(&gsub);
        // smcp, c2sc, aalt
        assert_eq!(lookups.len(), 3);
        assert_eq!(lookups[2].lookup_type, 1, "aalt folds to a single lookup");
        let features = parse_features(&gsub);
        let aalt = features
            .iter()
            .find(|(_, _, f, _)| *f == Tag::new(b"aalt"))
            .expect("aalt registered");
        assert_eq!(aalt.3, vec![2]);
    }

    #[test]
    fn aalt_alternates_preserve_authoring_order() {
        let compiled = compile_ok(aalt_root("A.sc", "A.alt"));
        let gsub = compiled.gsub.unwrap();
        let lookups = parse_lookups(&gsub);
        assert_eq!(lookups[2].lookup_type, 3, "alternate lookup");
        let subtable = lookups[2].subtables[0];
        assert_eq!(read_u16(&gsub, subtable), 1);
        assert_eq!(read_u16(&gsub, subtable + 4), 1, "one alternate set");
        let set = subtable + read_u16(&gsub, subtable + 6) as usize;
        assert_eq!(read_u16(&gsub, set), 2, "two alternates");
        let map = test_font();
        // smcp was referenced first, so its alternate comes first
        assert_eq!(read_u16(&gsub, set + 2), map.get_name("A.sc").unwrap().to_u16());
        assert_eq!(read_u16(&gsub, set + 4), map.get_name("A.alt").unwrap().to_u16());
    }

    #[test]
    fn extension_wrapping() {
        let compiled = compile_ok(vec![feature(
            b"test",
            vec![FeatureItem::Lookup(LookupBlock {
                name: "EXT".into(),
                end_name: "EXT".into(),
                use_extension: true,
                statements: vec![sub1(glyph("A"), glyph("a"))],
                loc: loc(),
            })],
        )]);
        let gsub = compiled.gsub.unwrap();
        let lookups = parse_lookups(&gsub);
        assert_eq!(lookups[0].lookup_type, 7, "extension lookup type");
        let record = lookups[0].subtables[0];
        assert_eq!(read_u16(&gsub, record), 1, "extension format");
        assert_eq!(read_u16(&gsub, record + 2), 1, "wrapped type");
        let target = record + read_u32(&gsub, record + 4) as usize;
        assert_eq!(read_u16(&gsub, target), 1, "wrapped single subst format 1");
    }

    #[test]
    fn multiple_sub_breaks_at_size_limit() {
        let statements = vec![feature(
            b"test",
            vec![
                FeatureItem::Gsub(GsubStatement::Type2(Gsub2 {
                    target: Glyph::named("f_i"),
                    replacement: vec![Glyph::named("f"), Glyph::named("i")],
                    loc: loc(),
                })),
                FeatureItem::Gsub(GsubStatement::Type2(Gsub2 {
                    target: Glyph::named("f_ii"),
                    replacement: vec![Glyph::named("f"), Glyph::named("i"), Glyph::named("i")],
                    loc: loc(),
                })),
            ],
        )];
        let root = Root { statements };
        // a limit that fits one rule but not two
        let compiled =
            compile_with_opts(&root, &test_font(), Opts::new().max_subtable_size(20)).unwrap();
        let gsub = compiled.gsub.unwrap();
        let lookups = parse_lookups(&gsub);
        assert_eq!(lookups.len(), 1);
        assert_eq!(lookups[0].subtables.len(), 2, "split into two subtables");
        for subtable in &lookups[0].subtables {
            assert_eq!(read_u16(&gsub, *subtable), 1);
            assert_eq!(read_u16(&gsub, subtable + 4), 1, "one sequence each");
        }
    }

    #[test]
    fn language_statement_replays_default_lookups() {
        let statements = vec![feature(
            b"test",
            vec![
                sub1(glyph("A"), glyph("a")),
                FeatureItem::Script {
                    tag: Tag::new(b"latn"),
                    loc: loc(),
                },
                FeatureItem::Language(Language {
                    tag: Tag::new(b"DEU "),
                    exclude_dflt: false,
                    loc: loc(),
                }),
                sub1(glyph("B"), glyph("b")),
            ],
        )];
        let compiled = compile_ok(statements);
        let gsub = compiled.gsub.unwrap();
        let features = parse_features(&gsub);
        let deu = features
            .iter()
            .find(|(s, l, _, _)| *s == Tag::new(b"latn") && *l == Tag::new(b"DEU "))
            .expect("DEU registered");
        assert_eq!(deu.3, vec![0, 1], "default lookup replayed before the new one");
    }

    #[test]
    fn exclude_dflt_suppresses_replay() {
        let statements = vec![feature(
            b"test",
            vec![
                sub1(glyph("A"), glyph("a")),
                FeatureItem::Script {
                    tag: Tag::new(b"latn"),
                    loc: loc(),
                },
                FeatureItem::Language(Language {
                    tag: Tag::new(b"DEU "),
                    exclude_dflt: true,
                    loc: loc(),
                }),
                sub1(glyph("B"), glyph("b")),
            ],
        )];
        let compiled = compile_ok(statements);
        let gsub = compiled.gsub.unwrap();
        let features = parse_features(&gsub);
        let deu = features
            .iter()
            .find(|(s, l, _, _)| *s == Tag::new(b"latn") && *l == Tag::new(b"DEU "))
            .expect("DEU registered");
        assert_eq!(deu.3, vec![1], "only the rule after the language statement");
    }

    #[test]
    fn mark_class_frozen_after_use() {
        let mark_def = |name: &str| {
            Statement::MarkClassDef(MarkClassDef {
                members: glyph("acute"),
                anchor: Anchor::Coord { x: 0, y: 600 },
                name: name.into(),
                loc: loc(),
            })
        };
        let statements = vec![
            mark_def("TOP"),
            feature(
                b"mark",
                vec![FeatureItem::Gpos(GposStatement::Type4(Gpos4 {
                    base: glyph("A"),
                    attachments: vec![AnchorMark {
                        anchor: Anchor::Coord { x: 250, y: 700 },
                        mark_class: Some("TOP".into()),
                    }],
                    loc: loc(),
                }))],
            ),
            mark_def("TOP"),
        ];
        let root = Root { statements };
        let result = compile(&root, &test_font());
        let error = result.err().expect("extending a used mark class fails");
        assert!(error
            .errors
            .iter()
            .any(|d| d.text().contains("cannot be extended")));
    }

    #[test]
    fn vrt2_seeds_vertical_advances() {
        let map: GlyphMap = [".notdef", "A", "A.vert"]
            .iter()
            .map(|n| GlyphName::from(*n))
            .collect();
        let map = map.with_horizontal_advances(vec![600, 520, 520]);
        let root = Root {
            statements: vec![feature(b"vrt2", vec![sub1(glyph("A"), glyph("A.vert"))])],
        };
        let compiled = compile(&root, &map).unwrap();
        let a_vert = map.get_name("A.vert").unwrap();
        assert!(compiled
            .vmtx
            .advances_y
            .contains(&(a_vert, -520)));
    }

    fn pos1(target: GlyphOrClass, value: i16) -> FeatureItem {
        FeatureItem::Gpos(GposStatement::Type1(Gpos1 {
            target,
            value: ValueRecord::Metrics(vec![value]),
            loc: loc(),
        }))
    }

    #[test]
    fn single_pos_shared_value_uses_format_1() {
        let compiled = compile_ok(vec![feature(
            b"kern",
            vec![pos1(class(&["A", "B"]), -40)],
        )]);
        let gpos = compiled.gpos.expect("gpos produced");
        let lookups = parse_lookups(&gpos);
        assert_eq!(lookups.len(), 1);
        assert_eq!(lookups[0].lookup_type, 1);
        let subtable = lookups[0].subtables[0];
        assert_eq!(read_u16(&gpos, subtable), 1, "format 1");
        assert_eq!(read_u16(&gpos, subtable + 4), 0x0004, "x-advance only");
        assert_eq!(read_u16(&gpos, subtable + 6) as i16, -40);
    }

    #[test]
    fn single_pos_distinct_values_fall_to_format_2() {
        let compiled = compile_ok(vec![feature(
            b"kern",
            vec![pos1(glyph("A"), -40), pos1(glyph("B"), -60)],
        )]);
        let gpos = compiled.gpos.unwrap();
        let lookups = parse_lookups(&gpos);
        let subtable = lookups[0].subtables[0];
        assert_eq!(read_u16(&gpos, subtable), 2, "format 2");
        assert_eq!(read_u16(&gpos, subtable + 4), 0x0004);
        assert_eq!(read_u16(&gpos, subtable + 6), 2, "value count");
        // values track the gid-sorted coverage
        assert_eq!(read_u16(&gpos, subtable + 8) as i16, -40);
        assert_eq!(read_u16(&gpos, subtable + 10) as i16, -60);
    }

    #[test]
    fn glyph_pair_uses_format_1() {
        let compiled = compile_ok(vec![feature(
            b"kern",
            vec![FeatureItem::Gpos(GposStatement::Type2(Gpos2 {
                first: glyph("A"),
                first_value: ValueRecord::Metrics(vec![-50]),
                second: glyph("B"),
                second_value: None,
                enumerated: false,
                loc: loc(),
            }))],
        )]);
        let gpos = compiled.gpos.unwrap();
        let lookups = parse_lookups(&gpos);
        assert_eq!(lookups[0].lookup_type, 2);
        let subtable = lookups[0].subtables[0];
        assert_eq!(read_u16(&gpos, subtable), 1, "format 1");
        assert_eq!(read_u16(&gpos, subtable + 4), 0x0004, "value format 1");
        assert_eq!(read_u16(&gpos, subtable + 6), 0, "value format 2");
        assert_eq!(read_u16(&gpos, subtable + 8), 1, "one pair set");
        let set = subtable + read_u16(&gpos, subtable + 10) as usize;
        assert_eq!(read_u16(&gpos, set), 1, "one pair value record");
        let map = test_font();
        assert_eq!(read_u16(&gpos, set + 2), map.get_name("B").unwrap().to_u16());
        assert_eq!(read_u16(&gpos, set + 4) as i16, -50);
    }

    #[test]
    fn class_pair_uses_format_2() {
        let compiled = compile_ok(vec![feature(
            b"kern",
            vec![FeatureItem::Gpos(GposStatement::Type2(Gpos2 {
                first: class(&["A", "B"]),
                first_value: ValueRecord::Metrics(vec![-30]),
                second: class(&["C", "D"]),
                second_value: None,
                enumerated: false,
                loc: loc(),
            }))],
        )]);
        let gpos = compiled.gpos.unwrap();
        let lookups = parse_lookups(&gpos);
        assert_eq!(lookups[0].lookup_type, 2);
        let subtable = lookups[0].subtables[0];
        assert_eq!(read_u16(&gpos, subtable), 2, "format 2");
        assert_eq!(read_u16(&gpos, subtable + 4), 0x0004);
        assert_eq!(read_u16(&gpos, subtable + 12), 2, "class 1 count");
        assert_eq!(read_u16(&gpos, subtable + 14), 2, "class 2 count");
        // the only populated cell is [1][1]; class 0 rows stay empty
        assert_eq!(read_u16(&gpos, subtable + 16) as i16, 0);
        assert_eq!(read_u16(&gpos, subtable + 22) as i16, -30);
        // both first glyphs are class 1 in the side-1 class definition
        let class_def1 = subtable + read_u16(&gpos, subtable + 8) as usize;
        let map = test_font();
        assert_eq!(read_u16(&gpos, class_def1), 1, "class def format 1");
        assert_eq!(
            read_u16(&gpos, class_def1 + 2),
            map.get_name("A").unwrap().to_u16()
        );
        assert_eq!(read_u16(&gpos, class_def1 + 4), 2, "glyph count");
        assert_eq!(read_u16(&gpos, class_def1 + 6), 1);
        assert_eq!(read_u16(&gpos, class_def1 + 8), 1);
    }

    #[test]
    fn mark_to_base_layout() {
        let compiled = compile_ok(vec![
            Statement::MarkClassDef(MarkClassDef {
                members: glyph("acute"),
                anchor: Anchor::Coord { x: 0, y: 600 },
                name: "TOP".into(),
                loc: loc(),
            }),
            feature(
                b"mark",
                vec![FeatureItem::Gpos(GposStatement::Type4(Gpos4 {
                    base: glyph("A"),
                    attachments: vec![AnchorMark {
                        anchor: Anchor::Coord { x: 250, y: 700 },
                        mark_class: Some("TOP".into()),
                    }],
                    loc: loc(),
                }))],
            ),
        ]);
        let gpos = compiled.gpos.unwrap();
        let lookups = parse_lookups(&gpos);
        assert_eq!(lookups[0].lookup_type, 4);
        let subtable = lookups[0].subtables[0];
        assert_eq!(read_u16(&gpos, subtable), 1, "format 1");
        assert_eq!(read_u16(&gpos, subtable + 6), 1, "one mark class");
        let mark_array = subtable + read_u16(&gpos, subtable + 8) as usize;
        let base_array = subtable + read_u16(&gpos, subtable + 10) as usize;
        assert_eq!(mark_array, subtable + 12, "mark array follows the header");

        assert_eq!(read_u16(&gpos, mark_array), 1, "one mark record");
        assert_eq!(read_u16(&gpos, mark_array + 2), 0, "mark class index");
        let mark_anchor = mark_array + read_u16(&gpos, mark_array + 4) as usize;
        assert_eq!(read_u16(&gpos, mark_anchor), 1, "anchor format 1");
        assert_eq!(read_u16(&gpos, mark_anchor + 2) as i16, 0);
        assert_eq!(read_u16(&gpos, mark_anchor + 4) as i16, 600);

        assert_eq!(read_u16(&gpos, base_array), 1, "one base record");
        let base_anchor = base_array + read_u16(&gpos, base_array + 2) as usize;
        assert_eq!(read_u16(&gpos, base_anchor), 1);
        assert_eq!(read_u16(&gpos, base_anchor + 2) as i16, 250);
        assert_eq!(read_u16(&gpos, base_anchor + 4) as i16, 700);

        // the mark glyph class is inferable for GDEF
        assert!(compiled.gdef.is_some());
    }

    #[test]
    fn contextual_pos_value_synthesizes_anon_lookup() {
        let rule = |marked: &str| {
            FeatureItem::Gpos(GposStatement::Type8(Gpos8 {
                backtrack: vec![glyph("A")],
                input: vec![ContextItem {
                    target: glyph(marked),
                    lookups: vec![],
                    value: Some(ValueRecord::Metrics(vec![-25])),
                }],
                lookahead: vec![glyph("C")],
                loc: loc(),
            }))
        };
        let compiled = compile_ok(vec![feature(b"test", vec![rule("B"), rule("D")])]);
        let gpos = compiled.gpos.unwrap();
        let lookups = parse_lookups(&gpos);
        assert_eq!(lookups.len(), 2, "chain lookup plus anonymous single pos");
        assert_eq!(lookups[0].lookup_type, 8);
        assert_eq!(lookups[0].subtables.len(), 2, "one subtable per rule");
        assert_eq!(lookups[1].lookup_type, 1);

        for chain in &lookups[0].subtables {
            assert_eq!(read_u16(&gpos, *chain), 3, "chain format 3");
            // one backtrack, one input, one lookahead coverage each
            let records_at = chain + 14;
            assert_eq!(read_u16(&gpos, records_at), 1, "one lookup record");
            assert_eq!(read_u16(&gpos, records_at + 2), 0, "sequence index");
            assert_eq!(read_u16(&gpos, records_at + 4), 1, "anon lookup index");
        }

        // both rules share one anonymous lookup; its coverage holds both
        // marked glyphs and the value applies to each
        let anon = lookups[1].subtables[0];
        assert_eq!(read_u16(&gpos, anon), 1, "single pos format 1");
        assert_eq!(read_u16(&gpos, anon + 4), 0x0004);
        assert_eq!(read_u16(&gpos, anon + 6) as i16, -25);
        let coverage = anon + read_u16(&gpos, anon + 2) as usize;
        let map = test_font();
        assert_eq!(read_u16(&gpos, coverage), 1, "coverage format 1");
        assert_eq!(read_u16(&gpos, coverage + 2), 2, "both marked glyphs");
        assert_eq!(
            read_u16(&gpos, coverage + 4),
            map.get_name("B").unwrap().to_u16()
        );
        assert_eq!(
            read_u16(&gpos, coverage + 6),
            map.get_name("D").unwrap().to_u16()
        );
    }
}
