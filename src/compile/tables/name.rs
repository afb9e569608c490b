//! Building the name table.

use smol_str::SmolStr;

use crate::common::tags::{
    MAC_PLATFORM_ID, WIN_DEFAULT_ENCODING_ID, WIN_DEFAULT_LANGUAGE_ID, WIN_PLATFORM_ID,
};
use crate::otl::writer::OtlWriter;

/// A resolved name table string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameSpec {
    pub platform_id: u16,
    pub encoding_id: u16,
    pub language_id: u16,
    pub string: SmolStr,
}

impl NameSpec {
    pub fn is_windows_default(&self) -> bool {
        self.platform_id == WIN_PLATFORM_ID
            && self.encoding_id == WIN_DEFAULT_ENCODING_ID
            && self.language_id == WIN_DEFAULT_LANGUAGE_ID
    }
}

/// Accumulates name records; ids 256 and up are handed out for the
/// anonymous strings referenced from feature parameters, STAT, and the
/// size feature.
#[derive(Clone, Debug)]
pub struct NameBuilder {
    records: Vec<(u16, NameSpec)>,
    last_anon_id: u16,
}

impl Default for NameBuilder {
    fn default() -> Self {
        NameBuilder {
            records: Vec::new(),
            last_anon_id: 255,
        }
    }
}

impl NameBuilder {
    pub fn add(&mut self, name_id: u16, spec: NameSpec) {
        // ids 1..=6 belong to the host application
        if !(1..=6).contains(&name_id) {
            self.last_anon_id = self.last_anon_id.max(name_id);
            self.records.push((name_id, spec));
        }
    }

    /// Add a group of specs under a freshly allocated name id.
    pub fn add_anon_group(&mut self, entries: &[NameSpec]) -> u16 {
        let name_id = self.next_name_id();
        for spec in entries {
            self.add(name_id, spec.clone());
        }
        name_id
    }

    pub fn next_name_id(&self) -> u16 {
        self.last_anon_id + 1
    }

    pub fn contains_id(&self, id: u16) -> bool {
        self.records.iter().any(|(name_id, _)| *name_id == id)
    }

    /// Whether the id resolves to a record with a Windows default
    /// (platform 3, encoding 1, language 0x409) entry.
    pub fn has_windows_default(&self, id: u16) -> bool {
        self.records
            .iter()
            .any(|(name_id, spec)| *name_id == id && spec.is_windows_default())
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize as a format 0 name table.
    pub fn build(&self) -> Option<Vec<u8>> {
        if self.records.is_empty() {
            return None;
        }
        let mut records: Vec<(u16, &NameSpec)> =
            self.records.iter().map(|(id, spec)| (*id, spec)).collect();
        records.sort_by_key(|(id, spec)| {
            (spec.platform_id, spec.encoding_id, spec.language_id, *id)
        });

        let mut string_data: Vec<u8> = Vec::new();
        let mut w = OtlWriter::new();
        w.u16(0);
        w.u16(records.len() as u16);
        w.u16(6 + 12 * records.len() as u16);
        for (id, spec) in &records {
            let encoded = encode_string(spec);
            let offset = string_data.len() as u16;
            w.u16(spec.platform_id);
            w.u16(spec.encoding_id);
            w.u16(spec.language_id);
            w.u16(*id);
            w.u16(encoded.len() as u16);
            w.u16(offset);
            string_data.extend(encoded);
        }
        w.extend(&string_data);
        Some(w.into_bytes())
    }
}

/// Encode a string for its platform, decoding the feature-file escape
/// sequences (`\XXXX` on Windows, `\XX` on Macintosh).
fn encode_string(spec: &NameSpec) -> Vec<u8> {
    let s = spec.string.trim_matches('"');
    if spec.platform_id == MAC_PLATFORM_ID {
        decode_mac(s)
    } else {
        decode_win(s)
            .into_iter()
            .flat_map(u16::to_be_bytes)
            .collect()
    }
}

fn decode_win(s: &str) -> Vec<u16> {
    let mut out = Vec::with_capacity(s.len());
    let mut work = s;
    while !work.is_empty() {
        match work.bytes().position(|b| b == b'\\') {
            Some(pos) if work.len() >= pos + 5 => {
                out.extend(work[..pos].encode_utf16());
                match u16::from_str_radix(&work[pos + 1..pos + 5], 16) {
                    Ok(num) => out.push(num),
                    Err(_) => out.extend(work[pos..pos + 5].encode_utf16()),
                }
                work = &work[pos + 5..];
            }
            _ => {
                out.extend(work.encode_utf16());
                break;
            }
        }
    }
    out
}

fn decode_mac(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    let mut work = s;
    while !work.is_empty() {
        match work.bytes().position(|b| b == b'\\') {
            Some(pos) if work.len() >= pos + 3 => {
                out.extend_from_slice(work[..pos].as_bytes());
                match u8::from_str_radix(&work[pos + 1..pos + 3], 16) {
                    Ok(num) => out.push(num),
                    Err(_) => out.extend_from_slice(work[pos..pos + 3].as_bytes()),
                }
                work = &work[pos + 3..];
            }
            _ => {
                out.extend_from_slice(work.as_bytes());
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn win_spec(s: &str) -> NameSpec {
        NameSpec {
            platform_id: 3,
            encoding_id: 1,
            language_id: 0x409,
            string: s.into(),
        }
    }

    #[test]
    fn anon_ids_start_after_255() {
        let mut names = NameBuilder::default();
        let id = names.add_anon_group(&[win_spec("Fancy")]);
        assert_eq!(id, 256);
        let id2 = names.add_anon_group(&[win_spec("Fancier")]);
        assert_eq!(id2, 257);
        assert!(names.has_windows_default(256));
    }

    #[test]
    fn explicit_high_id_advances_allocator() {
        let mut names = NameBuilder::default();
        names.add(300, win_spec("explicit"));
        assert_eq!(names.next_name_id(), 301);
    }

    #[test]
    fn win_escapes() {
        assert_eq!(decode_win("A\\00e9B"), vec![b'A' as u16, 0x00e9, b'B' as u16]);
    }

    #[test]
    fn reserved_ids_are_dropped() {
        let mut names = NameBuilder::default();
        names.add(1, win_spec("family"));
        assert!(names.is_empty());
        names.add(9, win_spec("designer"));
        assert!(names.contains_id(9));
    }
}
