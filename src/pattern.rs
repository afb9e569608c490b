//! Glyph patterns: sequences of glyph classes with per-position roles.

use smol_str::SmolStr;

use crate::common::GlyphId;
use crate::compile::lookups::Label;

/// Anchor data attached to a glyph in a mark attachment rule.
///
/// Ordering and equality consider the contour point only for format 2,
/// which is the only format that stores one.
#[derive(Clone, Debug, Default)]
pub struct AnchorMarkInfo {
    /// 1 = coordinates, 2 = coordinates + contour point, 3 = coordinates
    /// + device offsets (written as NULL)
    pub format: u32,
    pub mark_class_index: i32,
    pub component_index: i32,
    pub x: i16,
    pub y: i16,
    pub contourpoint: u16,
    pub mark_class_name: SmolStr,
}

impl AnchorMarkInfo {
    fn key(&self) -> (i32, i32, u32, i16, i16, u16) {
        let cp = if self.format == 2 { self.contourpoint } else { 0 };
        (
            self.component_index,
            self.mark_class_index,
            self.format,
            self.x,
            self.y,
            cp,
        )
    }
}

impl PartialEq for AnchorMarkInfo {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for AnchorMarkInfo {}

impl PartialOrd for AnchorMarkInfo {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AnchorMarkInfo {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

/// A positioning value: 1, 2, 4 or 10 signed 16-bit metrics.
///
/// One metric is a bare advance; two are placement and advance on the
/// writing axis; four are the full x/y placement and advance; ten add the
/// device slots, which are carried but serialized as NULL offsets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricsInfo {
    pub metrics: Vec<i16>,
}

impl MetricsInfo {
    pub fn new(metrics: Vec<i16>) -> Self {
        MetricsInfo { metrics }
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// One glyph in a pattern position, with optional anchor data.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GlyphRec {
    pub gid: GlyphId,
    pub anchor: Option<AnchorMarkInfo>,
}

impl GlyphRec {
    pub fn new(gid: GlyphId) -> Self {
        GlyphRec { gid, anchor: None }
    }
}

/// One position in a glyph pattern: an ordered glyph sequence plus the
/// role of the position within the rule.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassRec {
    pub glyphs: Vec<GlyphRec>,
    /// Direct lookup references attached to this position, with their
    /// reference-ness already resolved.
    pub lookup_labels: Vec<Label>,
    pub metrics: MetricsInfo,
    pub mark_class_name: Option<SmolStr>,
    /// Position is marked (') in a contextual rule
    pub marked: bool,
    /// Position was authored as a glyph class
    pub gclass: bool,
    pub backtrack: bool,
    pub input: bool,
    pub lookahead: bool,
    /// Base glyph position of a mark attachment rule
    pub basenode: bool,
    /// Mark class position of a mark attachment rule
    pub marknode: bool,
    /// The mark class participated in a position rule; no further glyphs
    /// may be added to it
    pub used_mark_class: bool,
}

impl ClassRec {
    pub fn new() -> Self {
        ClassRec::default()
    }

    pub fn from_glyph(gid: GlyphId) -> Self {
        ClassRec {
            glyphs: vec![GlyphRec::new(gid)],
            ..Default::default()
        }
    }

    pub fn add_glyph(&mut self, gid: GlyphId) {
        debug_assert!(!self.used_mark_class);
        self.glyphs.push(GlyphRec::new(gid));
    }

    pub fn concat(&mut self, other: &ClassRec) {
        self.glyphs.extend(other.glyphs.iter().cloned());
    }

    pub fn glyph_in_class(&self, gid: GlyphId) -> bool {
        self.glyphs.iter().any(|g| g.gid == gid)
    }

    pub fn is_glyph(&self) -> bool {
        self.glyphs.len() == 1 && !self.gclass
    }

    pub fn is_multi_class(&self) -> bool {
        self.glyphs.len() > 1
    }

    pub fn is_class(&self) -> bool {
        self.is_multi_class() || self.gclass
    }

    pub fn has_lookups(&self) -> bool {
        !self.lookup_labels.is_empty()
    }

    pub fn class_size(&self) -> usize {
        self.glyphs.len()
    }

    pub fn sort(&mut self) {
        self.glyphs.sort_by_key(|g| g.gid);
    }

    /// Remove duplicate glyphs after sorting; the removed gids are
    /// returned so the caller can report them.
    pub fn make_unique(&mut self) -> Vec<GlyphId> {
        self.sort();
        let mut removed = Vec::new();
        let mut seen_last: Option<GlyphId> = None;
        self.glyphs.retain(|g| {
            if seen_last == Some(g.gid) {
                removed.push(g.gid);
                false
            } else {
                seen_last = Some(g.gid);
                true
            }
        });
        removed
    }

    pub fn glyph_ids(&self) -> impl Iterator<Item = GlyphId> + '_ {
        self.glyphs.iter().map(|g| g.gid)
    }
}

/// An ordered sequence of pattern positions, with sequence-level flags.
///
/// Contextual patterns are partitioned left to right into contiguous
/// backtrack, input, and lookahead regions, identified by the role bits on
/// each position; marked positions are always a subsequence of the input.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GPat {
    pub classes: Vec<ClassRec>,
    /// Sequence has at least one marked position
    pub has_marked: bool,
    /// Sequence is an ignore clause
    pub ignore_clause: bool,
    /// Pattern uses direct lookup references
    pub lookup_node: bool,
    /// Class should be enumerated
    pub enumerate: bool,
}

impl GPat {
    pub fn new() -> Self {
        GPat::default()
    }

    pub fn from_glyph(gid: GlyphId) -> Self {
        GPat {
            classes: vec![ClassRec::from_glyph(gid)],
            ..Default::default()
        }
    }

    pub fn from_class(cr: ClassRec) -> Self {
        GPat {
            classes: vec![cr],
            ..Default::default()
        }
    }

    pub fn add_class(&mut self, cr: ClassRec) {
        self.classes.push(cr);
    }

    pub fn pattern_len(&self) -> u16 {
        self.classes.len() as u16
    }

    /// Iterate positions in the backtrack region, in authoring order.
    pub fn backtrack(&self) -> impl Iterator<Item = &ClassRec> {
        self.classes.iter().filter(|c| c.backtrack)
    }

    pub fn input(&self) -> impl Iterator<Item = &ClassRec> {
        self.classes.iter().filter(|c| c.input)
    }

    pub fn marked(&self) -> impl Iterator<Item = &ClassRec> {
        self.classes.iter().filter(|c| c.marked)
    }

    pub fn lookahead(&self) -> impl Iterator<Item = &ClassRec> {
        self.classes.iter().filter(|c| c.lookahead)
    }

    /// A lazy iterator over the cartesian product of the positions.
    ///
    /// Tuples are yielded in lexicographic index order; the first tuple is
    /// all zeros. The iterator is finite and not restartable.
    pub fn cross_product(&self) -> CrossProduct<'_> {
        CrossProduct::new(self.classes.iter().collect())
    }
}

/// See [`GPat::cross_product`].
pub struct CrossProduct<'a> {
    classes: Vec<&'a ClassRec>,
    indices: Vec<usize>,
    first: bool,
    done: bool,
}

impl<'a> CrossProduct<'a> {
    pub fn new(classes: Vec<&'a ClassRec>) -> Self {
        let indices = vec![0; classes.len()];
        let done = classes.iter().any(|c| c.glyphs.is_empty()) || classes.is_empty();
        CrossProduct {
            classes,
            indices,
            first: true,
            done,
        }
    }

}

impl Iterator for CrossProduct<'_> {
    type Item = Vec<GlyphId>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.first {
            // lexicographic index order: the rightmost position varies fastest
            let mut i = self.classes.len();
            loop {
                if i == 0 {
                    self.done = true;
                    return None;
                }
                i -= 1;
                self.indices[i] += 1;
                if self.indices[i] < self.classes[i].glyphs.len() {
                    break;
                }
                self.indices[i] = 0;
            }
        }
        self.first = false;
        Some(
            self.classes
                .iter()
                .zip(&self.indices)
                .map(|(cls, &idx)| cls.glyphs[idx].gid)
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(ids: &[u16]) -> ClassRec {
        let mut cr = ClassRec::new();
        for id in ids {
            cr.add_glyph(GlyphId::new(*id));
        }
        cr.gclass = ids.len() > 1;
        cr
    }

    #[test]
    fn glyph_class_predicates() {
        assert!(class(&[1]).is_glyph());
        assert!(!class(&[1]).is_class());
        assert!(class(&[1, 2]).is_class());
        let mut single_authored_as_class = class(&[4]);
        single_authored_as_class.gclass = true;
        assert!(single_authored_as_class.is_class());
        assert!(!single_authored_as_class.is_glyph());
    }

    #[test]
    fn make_unique_reports_duplicates() {
        let mut cr = class(&[5, 3, 5, 1, 3]);
        let removed = cr.make_unique();
        assert_eq!(removed, vec![GlyphId::new(3), GlyphId::new(5)]);
        assert_eq!(
            cr.glyph_ids().collect::<Vec<_>>(),
            vec![GlyphId::new(1), GlyphId::new(3), GlyphId::new(5)]
        );
    }

    #[test]
    fn cross_product_order() {
        let mut pat = GPat::new();
        pat.add_class(class(&[1]));
        pat.add_class(class(&[2, 3, 4]));
        pat.add_class(class(&[8, 9]));

        let all: Vec<Vec<u16>> = pat
            .cross_product()
            .map(|tuple| tuple.iter().map(|g| g.to_u16()).collect())
            .collect();
        assert_eq!(
            all,
            vec![
                vec![1, 2, 8],
                vec![1, 2, 9],
                vec![1, 3, 8],
                vec![1, 3, 9],
                vec![1, 4, 8],
                vec![1, 4, 9],
            ]
        );
    }

    #[test]
    fn cross_product_is_finite_for_empty_class() {
        let mut pat = GPat::new();
        pat.add_class(class(&[1]));
        pat.add_class(class(&[]));
        assert_eq!(pat.cross_product().count(), 0);
    }
}
