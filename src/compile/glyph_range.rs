//! Expanding glyph ranges like `A - Z` or `u0041 - u005A`.
//!
//! To avoid allocating per member, the caller passes a callback invoked
//! with each name in the range; the caller resolves the names against the
//! glyph inventory.

use std::ops::Range;

/// Iterate the cids in a cid range.
pub(crate) fn cid(start: u16, end: u16, mut callback: impl FnMut(u16)) -> Result<(), String> {
    if start >= end {
        return Err("Range end must be greater than start".into());
    }
    for i in start..=end {
        callback(i);
    }
    Ok(())
}

/// Iterate the names in a named range.
///
/// The endpoint names must have equal length and differ in exactly one
/// contiguous field: either a single letter (both lowercase or both
/// uppercase) or a run of decimal digits.
pub(crate) fn named(start: &str, end: &str, callback: impl FnMut(&str)) -> Result<(), String> {
    if start.len() != end.len() {
        return Err("glyph range endpoints must have equal length".into());
    }
    let diff_range = get_diff_range(start, end);

    if diff_range.len() == 1 {
        let one = start.as_bytes()[diff_range.start];
        let two = end.as_bytes()[diff_range.start];
        if one >= two {
            return Err("glyph range end must be greater than start".into());
        }
        if one.is_ascii_alphabetic() && two.is_ascii_alphabetic() && ((one > b'Z') == (two > b'Z'))
        {
            alpha_range(start, end, diff_range, callback);
            return Ok(());
        }
    }
    let one = &start[diff_range.clone()];
    let two = &end[diff_range.clone()];
    match (one.parse::<u16>(), two.parse::<u16>()) {
        (Ok(one), Ok(two)) if one < two => num_range(start, one..two + 1, diff_range, callback),
        _ => {
            return Err(
                "range glyphs must differ by a single letter a-z or A-Z, or by a run of \
                 decimal digits"
                    .into(),
            )
        }
    }
    Ok(())
}

fn alpha_range(start: &str, end: &str, sub_range: Range<usize>, mut out: impl FnMut(&str)) {
    let mut template = start.to_string();
    let start_char = start.as_bytes()[sub_range.start] as char;
    let end_char = end.as_bytes()[sub_range.start] as char;
    for chr in start_char..=end_char {
        debug_assert_eq!(chr.len_utf8(), 1);
        // all-ascii names are validated above, so this swaps one byte
        unsafe {
            chr.encode_utf8(&mut template.as_bytes_mut()[sub_range.start..sub_range.end]);
        }
        out(&template);
    }
}

fn num_range(
    start: &str,
    sub_range: Range<u16>,
    text_range: Range<usize>,
    mut out: impl FnMut(&str),
) {
    let mut temp = String::new();
    let mut template = start.to_string();

    use std::fmt::Write;
    let width = text_range.len();
    for val in sub_range {
        temp.clear();
        write!(&mut temp, "{val:0width$}").unwrap();
        template.replace_range(text_range.clone(), &temp);
        out(&template);
    }
}

/// The single maximal span where the two strings differ.
fn get_diff_range(one: &str, two: &str) -> Range<usize> {
    assert_eq!(one.len(), two.len());
    let front = one
        .bytes()
        .zip(two.bytes())
        .take_while(|(a, b)| a == b)
        .count();
    let back_matching = one
        .bytes()
        .rev()
        .zip(two.bytes().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let back = one.len() - back_matching;
    if back <= front {
        return 0..0;
    }
    // when the differing field is numeric, expand the start backwards over
    // shared digits so 'glyph08' - 'glyph11' diffs over the whole number
    let mut start = front;
    if one.as_bytes()[front].is_ascii_digit() && two.as_bytes()[front].is_ascii_digit() {
        start -= one[..front]
            .bytes()
            .rev()
            .take_while(u8::is_ascii_digit)
            .count();
    }
    start..back
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(start: &str, end: &str) -> Result<Vec<String>, String> {
        let mut out = Vec::new();
        named(start, end, |name| out.push(name.to_string()))?;
        Ok(out)
    }

    #[test]
    fn alpha() {
        assert_eq!(collect("a", "d").unwrap(), ["a", "b", "c", "d"]);
        assert_eq!(
            collect("a.sc", "c.sc").unwrap(),
            ["a.sc", "b.sc", "c.sc"]
        );
    }

    #[test]
    fn numeric() {
        assert_eq!(
            collect("glyph08", "glyph11").unwrap(),
            ["glyph08", "glyph09", "glyph10", "glyph11"]
        );
    }

    #[test]
    fn rejects_bad_ranges() {
        assert!(collect("a", "a").is_err());
        assert!(collect("d", "a").is_err());
        assert!(collect("a", "ab.sc").is_err());
        assert!(collect("A", "z").is_err());
    }

    #[test]
    fn cids() {
        let mut out = Vec::new();
        cid(17, 21, |c| out.push(c)).unwrap();
        assert_eq!(out, [17, 18, 19, 20, 21]);
        assert!(cid(5, 5, |_| ()).is_err());
    }
}
