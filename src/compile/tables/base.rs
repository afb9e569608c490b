//! Building the BASE table.

use font_types::Tag;

use crate::otl::writer::OtlWriter;

use super::BaseScriptRecord;

#[derive(Clone, Debug, Default)]
pub struct BaseBuilder {
    pub horiz_tag_list: Vec<Tag>,
    pub horiz_script_list: Vec<BaseScriptRecord>,
    pub vert_tag_list: Vec<Tag>,
    pub vert_script_list: Vec<BaseScriptRecord>,
}

impl BaseBuilder {
    pub fn is_empty(&self) -> bool {
        self.horiz_tag_list.is_empty() && self.vert_tag_list.is_empty()
    }

    /// Serialize as BASE version 1.0.
    pub fn build(&self) -> Vec<u8> {
        let horiz = axis_table(&self.horiz_tag_list, &self.horiz_script_list);
        let vert = axis_table(&self.vert_tag_list, &self.vert_script_list);

        let mut w = OtlWriter::new();
        w.u32(0x0001_0000);
        let mut off = 8u32;
        match &horiz {
            Some(table) => {
                w.u16(off as u16);
                off += table.len() as u32;
            }
            None => w.u16(0),
        }
        match &vert {
            Some(_) => w.u16(off as u16),
            None => w.u16(0),
        }
        if let Some(table) = horiz {
            w.extend(&table);
        }
        if let Some(table) = vert {
            w.extend(&table);
        }
        w.into_bytes()
    }
}

/// One Axis table: BaseTagList plus BaseScriptList; offsets are internal.
fn axis_table(tags: &[Tag], scripts: &[BaseScriptRecord]) -> Option<Vec<u8>> {
    if tags.is_empty() {
        return None;
    }
    let mut sorted_tags: Vec<Tag> = tags.to_vec();
    sorted_tags.sort_unstable();
    let mut sorted_scripts: Vec<&BaseScriptRecord> = scripts.iter().collect();
    sorted_scripts.sort_unstable_by_key(|record| record.script);

    let tag_list_size = 2 + 4 * sorted_tags.len() as u32;
    let mut w = OtlWriter::new();
    w.u16(4); // baseTagListOffset
    w.u16((4 + tag_list_size) as u16); // baseScriptListOffset

    w.u16(sorted_tags.len() as u16);
    for tag in &sorted_tags {
        w.tag(*tag);
    }

    // BaseScriptList: records, then one BaseScript per script, each with
    // a BaseValues table of format 1 coordinates
    w.u16(sorted_scripts.len() as u16);
    let mut script_off = 2 + 6 * sorted_scripts.len() as u32;
    for record in &sorted_scripts {
        w.tag(record.script);
        w.u16(script_off as u16);
        // BaseScript (6) + BaseValues (4 + 2n) + BaseCoords (4 each)
        script_off += 6 + 4 + 2 * record.values.len() as u32 + 4 * record.values.len() as u32;
    }
    for record in &sorted_scripts {
        let default_index = sorted_tags
            .iter()
            .position(|t| *t == record.default_baseline_tag)
            .unwrap_or(0) as u16;
        // BaseScript
        w.u16(6); // baseValuesOffset
        w.u16(0); // defaultMinMaxOffset
        w.u16(0); // baseLangSysCount
        // BaseValues
        w.u16(default_index);
        w.u16(record.values.len() as u16);
        let mut coord_off = 4 + 2 * record.values.len() as u32;
        for _ in &record.values {
            w.u16(coord_off as u16);
            coord_off += 4;
        }
        for value in &record.values {
            w.u16(1); // BaseCoord format 1
            w.i16(*value);
        }
    }
    Some(w.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_layout() {
        let builder = BaseBuilder {
            horiz_tag_list: vec![Tag::new(b"romn"), Tag::new(b"ideo")],
            horiz_script_list: vec![BaseScriptRecord {
                script: Tag::new(b"latn"),
                default_baseline_tag: Tag::new(b"romn"),
                values: vec![-120, 0],
            }],
            ..Default::default()
        };
        let bytes = builder.build();
        assert_eq!(&bytes[..4], &[0, 1, 0, 0]);
        // horizontal axis present, vertical absent
        assert_eq!(&bytes[4..6], &[0, 8]);
        assert_eq!(&bytes[6..8], &[0, 0]);
        // tag list is sorted: ideo before romn
        assert_eq!(&bytes[14..18], b"ideo");
        // the default baseline index points at romn after the sort
        let script_start = 8 + 4 + 10 + 2 + 6;
        let base_values = script_start + 6;
        assert_eq!(bytes[base_values + 1], 1);
    }
}
