//! Tag constants and tag classification helpers

use font_types::Tag;

pub const SCRIPT_DFLT: Tag = Tag::new(b"DFLT");
pub const LANG_DFLT: Tag = Tag::new(b"dflt");

/// The old, pre-2.5 spelling of the default language tag.
pub const LANG_DFLT_OLD: Tag = Tag::new(b"DFLT");

/// Sorts after every valid tag; cannot collide with one because tag
/// characters are restricted to ASCII 32..=126.
pub const TAG_UNDEF: Tag = Tag::new(&[0xFF; 4]);

/// Script/language/feature stamp for lookups defined outside any feature.
pub const TAG_STANDALONE: Tag = Tag::new(&[0x01; 4]);

pub const AALT: Tag = Tag::new(b"aalt");
pub const SIZE: Tag = Tag::new(b"size");
pub const VRT2: Tag = Tag::new(b"vrt2");

pub const WIN_PLATFORM_ID: u16 = 3;
pub const MAC_PLATFORM_ID: u16 = 1;
pub const WIN_DEFAULT_ENCODING_ID: u16 = 1;
pub const WIN_DEFAULT_LANGUAGE_ID: u16 = 0x0409;

/// `ss01`..=`ss99`
pub fn is_stylistic_set(tag: Tag) -> bool {
    let b = tag.to_be_bytes();
    b[0] == b's' && b[1] == b's' && two_digit_suffix(b).is_some_and(|n| (1..=99).contains(&n))
}

/// `cv01`..=`cv99`
pub fn is_character_variant(tag: Tag) -> bool {
    let b = tag.to_be_bytes();
    b[0] == b'c' && b[1] == b'v' && two_digit_suffix(b).is_some_and(|n| (1..=99).contains(&n))
}

fn two_digit_suffix(bytes: [u8; 4]) -> Option<u16> {
    if bytes[2].is_ascii_digit() && bytes[3].is_ascii_digit() {
        Some((bytes[2] - b'0') as u16 * 10 + (bytes[3] - b'0') as u16)
    } else {
        None
    }
}

/// The features in which a bare metric means a vertical advance.
pub fn is_vertical_feature(tag: Tag) -> bool {
    const VERTICAL: [Tag; 4] = [
        Tag::new(b"valt"),
        Tag::new(b"vhal"),
        Tag::new(b"vkrn"),
        Tag::new(b"vpal"),
    ];
    VERTICAL.contains(&tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_classification() {
        assert!(is_stylistic_set(Tag::new(b"ss01")));
        assert!(is_stylistic_set(Tag::new(b"ss99")));
        assert!(!is_stylistic_set(Tag::new(b"ss00")));
        assert!(!is_stylistic_set(Tag::new(b"ssxx")));
        assert!(is_character_variant(Tag::new(b"cv42")));
        assert!(!is_character_variant(Tag::new(b"cvar")));
    }

    #[test]
    fn undef_sorts_last() {
        assert!(TAG_UNDEF > Tag::new(b"zzzz"));
        assert!(TAG_STANDALONE < Tag::new(b"DFLT"));
    }
}
