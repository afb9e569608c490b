//! Building the GDEF table.
//!
//! GDEF may be declared explicitly in the input, or synthesized during
//! compilation from mark-class participation and the glyphs seen by the
//! mark attachment lookups.

use std::collections::{BTreeMap, BTreeSet};

use crate::common::GlyphId;
use crate::otl::classdef::write_class_def;
use crate::otl::coverage::{coverage_size, write_coverage};
use crate::otl::writer::OtlWriter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum GlyphClassId {
    Base = 1,
    Ligature = 2,
    Mark = 3,
    Component = 4,
}

/// A ligature caret position, by coordinate or by contour point index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaretValue {
    Coordinate(i16),
    PointIndex(u16),
}

impl CaretValue {
    fn sort_key(&self) -> i32 {
        match self {
            CaretValue::Coordinate(c) => *c as i32,
            CaretValue::PointIndex(p) => *p as i32,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct GdefBuilder {
    pub glyph_classes: BTreeMap<GlyphId, u16>,
    pub attach: BTreeMap<GlyphId, BTreeSet<u16>>,
    pub ligature_pos: BTreeMap<GlyphId, Vec<CaretValue>>,
    pub mark_attach_class: BTreeMap<GlyphId, u16>,
    pub mark_glyph_sets: Vec<Vec<GlyphId>>,
}

impl GdefBuilder {
    pub fn is_empty(&self) -> bool {
        self.glyph_classes.is_empty()
            && self.attach.is_empty()
            && self.ligature_pos.is_empty()
            && self.mark_attach_class.is_empty()
            && self.mark_glyph_sets.is_empty()
    }

    /// Assign a glyph class, reporting the previous class on conflict.
    pub fn add_glyph_class(
        &mut self,
        glyph: GlyphId,
        class: GlyphClassId,
    ) -> Result<(), (GlyphId, u16)> {
        match self.glyph_classes.insert(glyph, class as u16) {
            Some(prev) if prev != class as u16 => Err((glyph, prev)),
            _ => Ok(()),
        }
    }

    /// Insert caret values for a ligature glyph; carets are stored sorted.
    pub fn set_ligature_carets(&mut self, glyph: GlyphId, mut carets: Vec<CaretValue>) -> bool {
        carets.sort_by_key(CaretValue::sort_key);
        if self.ligature_pos.contains_key(&glyph) {
            return false;
        }
        self.ligature_pos.insert(glyph, carets);
        true
    }

    pub fn build(&self) -> Vec<u8> {
        let version_12 = !self.mark_glyph_sets.is_empty();
        let header_size: u32 = if version_12 { 14 } else { 12 };

        let class_def_size = (!self.glyph_classes.is_empty())
            .then(|| crate::otl::classdef::class_def_size(&self.glyph_classes))
            .unwrap_or(0);
        let attach_list_size = self.attach_list_size();
        let lig_caret_size = self.lig_caret_list_size();
        let mark_attach_size = (!self.mark_attach_class.is_empty())
            .then(|| crate::otl::classdef::class_def_size(&self.mark_attach_class))
            .unwrap_or(0);

        let class_def_off = header_size;
        let attach_off = class_def_off + class_def_size;
        let lig_caret_off = attach_off + attach_list_size;
        let mark_attach_off = lig_caret_off + lig_caret_size;
        let mark_sets_off = mark_attach_off + mark_attach_size;

        let mut w = OtlWriter::new();
        w.u16(1);
        w.u16(if version_12 { 2 } else { 0 });
        w.u16(if class_def_size != 0 { class_def_off as u16 } else { 0 });
        w.u16(if attach_list_size != 0 { attach_off as u16 } else { 0 });
        w.u16(if lig_caret_size != 0 { lig_caret_off as u16 } else { 0 });
        w.u16(if mark_attach_size != 0 { mark_attach_off as u16 } else { 0 });
        if version_12 {
            w.u16(mark_sets_off as u16);
        }

        if !self.glyph_classes.is_empty() {
            write_class_def(&mut w, &self.glyph_classes);
        }
        self.write_attach_list(&mut w);
        self.write_lig_caret_list(&mut w);
        if !self.mark_attach_class.is_empty() {
            write_class_def(&mut w, &self.mark_attach_class);
        }
        if version_12 {
            self.write_mark_glyph_sets(&mut w);
        }
        w.into_bytes()
    }

    fn attach_list_size(&self) -> u32 {
        if self.attach.is_empty() {
            return 0;
        }
        let glyphs: Vec<GlyphId> = self.attach.keys().copied().collect();
        4 + 2 * self.attach.len() as u32
            + self
                .attach
                .values()
                .map(|points| 2 + 2 * points.len() as u32)
                .sum::<u32>()
            + coverage_size(&glyphs)
    }

    fn write_attach_list(&self, w: &mut OtlWriter) {
        if self.attach.is_empty() {
            return;
        }
        let glyphs: Vec<GlyphId> = self.attach.keys().copied().collect();
        let mut off = 4 + 2 * self.attach.len() as u32;
        let mut point_offsets = Vec::new();
        for points in self.attach.values() {
            point_offsets.push(off);
            off += 2 + 2 * points.len() as u32;
        }
        // coverage table follows the attach point tables
        w.u16(off as u16);
        w.u16(self.attach.len() as u16);
        for point_off in &point_offsets {
            w.u16(*point_off as u16);
        }
        for points in self.attach.values() {
            w.u16(points.len() as u16);
            for point in points {
                w.u16(*point);
            }
        }
        write_coverage(w, &glyphs);
    }

    fn lig_caret_list_size(&self) -> u32 {
        if self.ligature_pos.is_empty() {
            return 0;
        }
        let glyphs: Vec<GlyphId> = self.ligature_pos.keys().copied().collect();
        4 + 2 * self.ligature_pos.len() as u32
            + self
                .ligature_pos
                .values()
                .map(|carets| 2 + 6 * carets.len() as u32)
                .sum::<u32>()
            + coverage_size(&glyphs)
    }

    fn write_lig_caret_list(&self, w: &mut OtlWriter) {
        if self.ligature_pos.is_empty() {
            return;
        }
        let glyphs: Vec<GlyphId> = self.ligature_pos.keys().copied().collect();
        let mut off = 4 + 2 * self.ligature_pos.len() as u32;
        let mut glyph_offsets = Vec::new();
        for carets in self.ligature_pos.values() {
            glyph_offsets.push(off);
            off += 2 + 6 * carets.len() as u32;
        }
        w.u16(off as u16);
        w.u16(self.ligature_pos.len() as u16);
        for glyph_off in &glyph_offsets {
            w.u16(*glyph_off as u16);
        }
        for carets in self.ligature_pos.values() {
            // LigGlyph: caret value offsets then the 4-byte caret tables
            w.u16(carets.len() as u16);
            let mut caret_off = 2 + 2 * carets.len() as u32;
            for _ in carets {
                w.u16(caret_off as u16);
                caret_off += 4;
            }
            for caret in carets {
                match caret {
                    CaretValue::Coordinate(coord) => {
                        w.u16(1);
                        w.i16(*coord);
                    }
                    CaretValue::PointIndex(point) => {
                        w.u16(2);
                        w.u16(*point);
                    }
                }
            }
        }
        write_coverage(w, &glyphs);
    }

    fn write_mark_glyph_sets(&self, w: &mut OtlWriter) {
        w.u16(1);
        w.u16(self.mark_glyph_sets.len() as u16);
        let mut off = 4 + 4 * self.mark_glyph_sets.len() as u32;
        for set in &self.mark_glyph_sets {
            w.u32(off);
            off += coverage_size(set);
        }
        for set in &self.mark_glyph_sets {
            write_coverage(w, set);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_and_carets() {
        let mut gdef = GdefBuilder::default();
        gdef.add_glyph_class(GlyphId::new(5), GlyphClassId::Mark).unwrap();
        assert!(gdef
            .add_glyph_class(GlyphId::new(5), GlyphClassId::Base)
            .is_err());
        assert!(gdef.set_ligature_carets(
            GlyphId::new(9),
            vec![CaretValue::Coordinate(400), CaretValue::Coordinate(200)],
        ));
        assert_eq!(
            gdef.ligature_pos[&GlyphId::new(9)],
            vec![CaretValue::Coordinate(200), CaretValue::Coordinate(400)]
        );
        let bytes = gdef.build();
        // version 1.0 header
        assert_eq!(&bytes[..4], &[0, 1, 0, 0]);
    }

    #[test]
    fn mark_sets_bump_version() {
        let mut gdef = GdefBuilder::default();
        gdef.mark_glyph_sets.push(vec![GlyphId::new(3)]);
        let bytes = gdef.build();
        assert_eq!(&bytes[..4], &[0, 1, 0, 2]);
    }
}
