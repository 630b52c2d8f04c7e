use bon::Builder;

use crate::{atom::FourCC, error::Error, parser::ParseAtom, writer::SerializeAtom};

pub const ELST: &[u8; 4] = b"elst";

#[derive(Default, Debug, Clone)]
pub struct EditListAtom {
    /// Version of the elst atom format (0 or 1)
    pub version: u8,
    pub flags: [u8; 3],
    pub entries: Vec<EditEntry>,
}

#[derive(Debug, Clone, PartialEq, Builder)]
pub struct EditEntry {
    /// Duration of this edit segment (in movie timescale units)
    pub segment_duration: u64,
    /// Starting time within the media (in media timescale units)
    /// -1 indicates an empty edit (no media displayed)
    #[builder(default = 0)]
    pub media_time: i64,
    /// Playback rate, fixed-point 16.16
    #[builder(default = 0x00010000)]
    pub media_rate: u32,
}

impl EditListAtom {
    pub fn new(entries: impl Into<Vec<EditEntry>>) -> Self {
        Self {
            entries: entries.into(),
            ..Default::default()
        }
    }

    /// Sum of all segment durations, in movie timescale units.
    pub fn total_duration(&self) -> u64 {
        self.entries
            .iter()
            .fold(0u64, |acc, e| acc.saturating_add(e.segment_duration))
    }
}

impl ParseAtom for EditListAtom {
    fn parse(atom_type: FourCC, body: &[u8]) -> Result<Self, Error> {
        if atom_type != ELST {
            return Err(Error::atom_parsing(atom_type, "expected elst"));
        }
        parser::parse_elst_data(atom_type, body)
    }
}

impl SerializeAtom for EditListAtom {
    fn atom_type(&self) -> FourCC {
        FourCC(*ELST)
    }

    fn into_body_bytes(self) -> Vec<u8> {
        serializer::serialize_elst_data(self)
    }
}

mod serializer {
    use super::EditListAtom;
    use crate::atom::util::serializer::{be_u32, be_u32_len, be_u32_or_u64};

    pub fn serialize_elst_data(atom: EditListAtom) -> Vec<u8> {
        let version = if atom.entries.iter().any(|e| {
            e.segment_duration > u64::from(u32::MAX) || i32::try_from(e.media_time).is_err()
        }) {
            1
        } else {
            atom.version
        };

        let mut data = Vec::new();
        data.push(version);
        data.extend(atom.flags);
        data.extend(be_u32_len(atom.entries.len()));
        for entry in atom.entries {
            data.extend(be_u32_or_u64(version, entry.segment_duration));
            if version == 1 {
                data.extend(entry.media_time.to_be_bytes());
            } else {
                data.extend((entry.media_time as i32).to_be_bytes());
            }
            data.extend(be_u32(entry.media_rate));
        }
        data
    }
}

mod parser {
    use winnow::{
        binary::{be_i32, be_i64, be_u32},
        combinator::seq,
        error::StrContext,
        ModalResult, Parser,
    };

    use super::{EditEntry, EditListAtom};
    use crate::{
        atom::{
            util::parser::{be_u32_or_u64, counted, flags3, parse_fully, version_0_or_1, Stream},
            FourCC,
        },
        error::Error,
    };

    pub fn parse_elst_data(atom_type: FourCC, input: &[u8]) -> Result<EditListAtom, Error> {
        parse_fully(atom_type, input, |input: &mut Stream<'_>| {
            let version = version_0_or_1.parse_next(input)?;
            let flags = flags3.parse_next(input)?;
            let entries = counted(move |input: &mut Stream<'_>| entry(version, input))
                .context(StrContext::Label("entries"))
                .parse_next(input)?;
            Ok(EditListAtom {
                version,
                flags,
                entries,
            })
        })
    }

    fn entry(version: u8, input: &mut Stream<'_>) -> ModalResult<EditEntry> {
        seq!(EditEntry {
            segment_duration: be_u32_or_u64(version)
                .context(StrContext::Label("segment_duration")),
            media_time: media_time(version).context(StrContext::Label("media_time")),
            media_rate: be_u32.context(StrContext::Label("media_rate")),
        })
        .parse_next(input)
    }

    fn media_time<'i>(
        version: u8,
    ) -> impl Parser<Stream<'i>, i64, winnow::error::ErrMode<winnow::error::ContextError>> {
        move |input: &mut Stream<'i>| {
            if version == 1 {
                be_i64.parse_next(input)
            } else {
                be_i32.map(i64::from).parse_next(input)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_duration_v0() {
        let elst = EditListAtom::new(vec![
            EditEntry::builder().segment_duration(1_000).media_time(-1).build(),
            EditEntry::builder().segment_duration(9_000).build(),
        ]);
        let bytes = elst.into_body_bytes();
        assert_eq!(bytes[0], 0);
        assert_eq!(bytes.len(), 8 + 2 * 12);

        let parsed = EditListAtom::parse(FourCC(*ELST), &bytes).unwrap();
        assert_eq!(parsed.total_duration(), 10_000);
        assert_eq!(parsed.entries[0].media_time, -1);
    }

    #[test]
    fn test_total_duration_v1() {
        let elst = EditListAtom::new(vec![EditEntry::builder()
            .segment_duration(u64::from(u32::MAX) + 10)
            .build()]);
        let bytes = elst.into_body_bytes();
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes.len(), 8 + 20);

        let parsed = EditListAtom::parse(FourCC(*ELST), &bytes).unwrap();
        assert_eq!(parsed.total_duration(), u64::from(u32::MAX) + 10);
    }
}
