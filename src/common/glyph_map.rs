//! The glyph inventory: mapping raw glyph identifiers to `GlyphId`s.

use std::collections::HashMap;
use std::iter::FromIterator;

use super::{GlyphId, GlyphIdent, GlyphName};

/// A glyph map for resolving names or CIDs encountered in a feature file to
/// the glyph ids that will be used in the final font.
///
/// The map may also carry per-glyph advance data; this is consulted by the
/// handful of rules with metric side effects (the `vrt2` feature seeds
/// vertical advances from horizontal ones).
///
/// The simplest way to construct this type is by calling `collect()` on an
/// iterator of names or cids.
#[derive(Clone, Debug, Default)]
pub struct GlyphMap {
    names: HashMap<GlyphName, GlyphId>,
    cids: HashMap<u16, GlyphId>,
    h_advances: Vec<i16>,
    v_advances: Vec<Option<i16>>,
}

impl GlyphMap {
    /// The total number of glyphs.
    pub fn len(&self) -> usize {
        self.names.len() + self.cids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.cids.is_empty()
    }

    pub fn glyph_count(&self) -> u16 {
        self.len() as u16
    }

    /// Attach horizontal advances, indexed by glyph id.
    pub fn with_horizontal_advances(mut self, advances: Vec<i16>) -> Self {
        self.h_advances = advances;
        self
    }

    /// Attach vertical advances, indexed by glyph id. `None` means the
    /// glyph has no vertical advance set.
    pub fn with_vertical_advances(mut self, advances: Vec<Option<i16>>) -> Self {
        self.v_advances = advances;
        self
    }

    pub fn get(&self, key: &GlyphIdent) -> Option<GlyphId> {
        match key {
            GlyphIdent::Name(name) => self.get_name(name),
            GlyphIdent::Cid(cid) => self.get_cid(*cid),
        }
    }

    pub fn get_name(&self, name: &str) -> Option<GlyphId> {
        self.names.get(name).copied()
    }

    pub fn get_cid(&self, cid: u16) -> Option<GlyphId> {
        self.cids.get(&cid).copied()
    }

    pub fn contains(&self, key: &GlyphIdent) -> bool {
        self.get(key).is_some()
    }

    pub fn h_advance(&self, gid: GlyphId) -> i16 {
        self.h_advances.get(gid.to_u16() as usize).copied().unwrap_or(0)
    }

    pub fn v_advance(&self, gid: GlyphId) -> Option<i16> {
        self.v_advances.get(gid.to_u16() as usize).copied().flatten()
    }
}

impl FromIterator<GlyphName> for GlyphMap {
    fn from_iter<T: IntoIterator<Item = GlyphName>>(iter: T) -> Self {
        GlyphMap {
            names: iter
                .into_iter()
                .enumerate()
                .map(|(i, name)| (name, GlyphId::new(i as u16)))
                .collect(),
            ..Default::default()
        }
    }
}

impl FromIterator<u16> for GlyphMap {
    fn from_iter<T: IntoIterator<Item = u16>>(iter: T) -> Self {
        GlyphMap {
            cids: iter
                .into_iter()
                .enumerate()
                .map(|(i, cid)| (cid, GlyphId::new(i as u16)))
                .collect(),
            ..Default::default()
        }
    }
}

impl FromIterator<GlyphIdent> for GlyphMap {
    fn from_iter<T: IntoIterator<Item = GlyphIdent>>(iter: T) -> Self {
        let mut names = HashMap::new();
        let mut cids = HashMap::new();
        for (i, ident) in iter.into_iter().enumerate() {
            let id = GlyphId::new(i as u16);
            match ident {
                GlyphIdent::Name(name) => {
                    names.insert(name, id);
                }
                GlyphIdent::Cid(cid) => {
                    cids.insert(cid, id);
                }
            }
        }
        GlyphMap {
            names,
            cids,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_map_assigns_ids_in_order() {
        let map: GlyphMap = [".notdef", "A", "B"]
            .iter()
            .map(|s| GlyphName::from(*s))
            .collect();
        assert_eq!(map.get_name("A"), Some(GlyphId::new(1)));
        assert_eq!(map.get_name("C"), None);
        assert_eq!(map.glyph_count(), 3);
    }
}
