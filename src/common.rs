//! Types and helpers shared across modules

use std::fmt::{Display, Formatter};

use smol_str::SmolStr;

pub(crate) mod tags;

mod glyph_map;

pub use glyph_map::GlyphMap;

/// A glyph name.
pub type GlyphName = SmolStr;

/// A 16-bit glyph index.
///
/// The reserved value [`GlyphId::UNDEF`] means "no glyph"; it never refers
/// to an actual glyph in the font.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlyphId(u16);

impl GlyphId {
    /// The `.notdef` glyph, always glyph zero.
    pub const NOTDEF: GlyphId = GlyphId(0);
    /// Reserved sentinel for "no glyph".
    pub const UNDEF: GlyphId = GlyphId(0xFFFF);

    pub const fn new(raw: u16) -> Self {
        GlyphId(raw)
    }

    pub const fn to_u16(self) -> u16 {
        self.0
    }
}

impl Display for GlyphId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "gid{}", self.0)
    }
}

/// Either a glyph name or a CID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GlyphIdent {
    /// A glyph name
    Name(GlyphName),
    /// A CID
    Cid(u16),
}

impl<T: Into<GlyphName>> From<T> for GlyphIdent {
    fn from(src: T) -> Self {
        GlyphIdent::Name(src.into())
    }
}

impl Display for GlyphIdent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GlyphIdent::Name(name) => write!(f, "{name}"),
            GlyphIdent::Cid(cid) => write!(f, "cid{cid:05}"),
        }
    }
}
