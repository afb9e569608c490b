//! Building the STAT table.

use font_types::Tag;

use crate::otl::writer::OtlWriter;

use super::NameSpec;

#[derive(Clone, Debug)]
pub struct StatBuilder {
    pub fallback_name: StatFallbackName,
    pub records: Vec<AxisRecord>,
    pub values: Vec<AxisValue>,
}

#[derive(Clone, Debug)]
pub enum StatFallbackName {
    Id(u16),
    Record(Vec<NameSpec>),
}

#[derive(Clone, Debug)]
pub struct AxisRecord {
    pub tag: Tag,
    pub ordering: u16,
    pub name: Vec<NameSpec>,
}

#[derive(Clone, Debug)]
pub struct AxisValue {
    pub flags: u16,
    pub name: Vec<NameSpec>,
    pub location: AxisLocation,
}

/// An axis value location; values are raw 16.16 fixed.
#[derive(Clone, Debug)]
pub enum AxisLocation {
    One { tag: Tag, value: i32 },
    Two { tag: Tag, nominal: i32, min: i32, max: i32 },
    Three { tag: Tag, value: i32, linked: i32 },
    Four(Vec<(Tag, i32)>),
}

/// A STAT table ready to serialize: name ids already resolved.
pub(crate) struct ResolvedStat {
    pub elided_fallback_name_id: u16,
    /// sorted by tag
    pub axes: Vec<(Tag, u16, u16)>,
    pub values: Vec<(u16, u16, AxisLocation)>,
}

impl ResolvedStat {
    fn axis_index(&self, tag: Tag) -> u16 {
        self.axes
            .iter()
            .position(|(axis_tag, _, _)| *axis_tag == tag)
            .unwrap_or(0) as u16
    }

    fn value_size(location: &AxisLocation) -> u32 {
        match location {
            AxisLocation::One { .. } => 12,
            AxisLocation::Two { .. } => 20,
            AxisLocation::Three { .. } => 16,
            AxisLocation::Four(locations) => 8 + 6 * locations.len() as u32,
        }
    }

    /// Serialize as STAT version 1.2.
    pub(crate) fn build(&self) -> Vec<u8> {
        const HEADER: u32 = 20;
        let axes_size = 8 * self.axes.len() as u32;
        let offsets_size = 2 * self.values.len() as u32;

        let mut w = OtlWriter::new();
        w.u16(1);
        w.u16(2);
        w.u16(8); // designAxisSize
        w.u16(self.axes.len() as u16);
        w.u32(if self.axes.is_empty() { 0 } else { HEADER });
        w.u16(self.values.len() as u16);
        w.u32(if self.values.is_empty() { 0 } else { HEADER + axes_size });
        w.u16(self.elided_fallback_name_id);

        for (tag, name_id, ordering) in &self.axes {
            w.tag(*tag);
            w.u16(*name_id);
            w.u16(*ordering);
        }

        // axis value offsets are relative to the start of the offsets array
        let mut off = offsets_size;
        for (_, _, location) in &self.values {
            w.u16(off as u16);
            off += Self::value_size(location);
        }
        for (flags, name_id, location) in &self.values {
            match location {
                AxisLocation::One { tag, value } => {
                    w.u16(1);
                    w.u16(self.axis_index(*tag));
                    w.u16(*flags);
                    w.u16(*name_id);
                    w.i32(*value);
                }
                AxisLocation::Two { tag, nominal, min, max } => {
                    w.u16(2);
                    w.u16(self.axis_index(*tag));
                    w.u16(*flags);
                    w.u16(*name_id);
                    w.i32(*nominal);
                    w.i32(*min);
                    w.i32(*max);
                }
                AxisLocation::Three { tag, value, linked } => {
                    w.u16(3);
                    w.u16(self.axis_index(*tag));
                    w.u16(*flags);
                    w.u16(*name_id);
                    w.i32(*value);
                    w.i32(*linked);
                }
                AxisLocation::Four(locations) => {
                    w.u16(4);
                    w.u16(locations.len() as u16);
                    w.u16(*flags);
                    w.u16(*name_id);
                    for (tag, value) in locations {
                        w.u16(self.axis_index(*tag));
                        w.i32(*value);
                    }
                }
            }
        }
        w.into_bytes()
    }
}

impl StatBuilder {
    /// Resolve name records against the name builder and serialize.
    pub(crate) fn build(
        &self,
        names: &mut super::NameBuilder,
    ) -> Result<Vec<u8>, u16> {
        let elided_fallback_name_id = match &self.fallback_name {
            StatFallbackName::Id(id) if names.contains_id(*id) => *id,
            StatFallbackName::Id(id) => return Err(*id),
            StatFallbackName::Record(specs) => names.add_anon_group(specs),
        };

        let mut axes: Vec<(Tag, u16, u16)> = self
            .records
            .iter()
            .map(|record| (record.tag, names.add_anon_group(&record.name), record.ordering))
            .collect();
        axes.sort_unstable_by_key(|(tag, _, _)| *tag);

        let values = self
            .values
            .iter()
            .map(|value| {
                (
                    value.flags,
                    names.add_anon_group(&value.name),
                    value.location.clone(),
                )
            })
            .collect();

        Ok(ResolvedStat {
            elided_fallback_name_id,
            axes,
            values,
        }
        .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_axis_order() {
        let stat = ResolvedStat {
            elided_fallback_name_id: 256,
            axes: vec![(Tag::new(b"opsz"), 257, 0), (Tag::new(b"wght"), 258, 1)],
            values: vec![(0, 259, AxisLocation::One { tag: Tag::new(b"wght"), value: 0x190_0000 })],
        };
        let bytes = stat.build();
        assert_eq!(&bytes[..8], &[0, 1, 0, 2, 0, 8, 0, 2]);
        // one axis value, located after the two axis records
        let value_offsets_at = 20 + 16;
        assert_eq!(&bytes[value_offsets_at..value_offsets_at + 2], &[0, 2]);
        // format 1 record referencing axis index 1 (wght)
        assert_eq!(&bytes[value_offsets_at + 2..value_offsets_at + 6], &[0, 1, 0, 1]);
    }
}
