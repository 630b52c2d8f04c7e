use bon::Builder;

use crate::{
    atom::{
        util::{mp4_timestamp_now, seconds},
        FourCC,
    },
    error::Error,
    parser::ParseAtom,
    writer::SerializeAtom,
};

pub const MDHD: FourCC = FourCC::new(b"mdhd");

/// Packed ISO-639-2 code for "und"
pub const LANGUAGE_UNDETERMINED: u16 = 0x55c4;

#[derive(Debug, Clone, Builder)]
pub struct MediaHeaderAtom {
    #[builder(default = 0)]
    pub version: u8,
    #[builder(default = [0u8; 3])]
    pub flags: [u8; 3],
    #[builder(default = mp4_timestamp_now())]
    pub creation_time: u64,
    #[builder(default = mp4_timestamp_now())]
    pub modification_time: u64,
    /// Media time units per second
    pub timescale: u32,
    /// Media duration in `timescale` units
    pub duration: u64,
    #[builder(default = LANGUAGE_UNDETERMINED)]
    pub language: u16,
    #[builder(default = 0)]
    pub quality: u16,
}

impl MediaHeaderAtom {
    pub fn duration_seconds(&self) -> f64 {
        seconds(self.duration, self.timescale)
    }
}

impl ParseAtom for MediaHeaderAtom {
    fn parse(atom_type: FourCC, body: &[u8]) -> Result<Self, Error> {
        if atom_type != MDHD {
            return Err(Error::atom_parsing(atom_type, "expected mdhd"));
        }
        parser::parse_mdhd_data(atom_type, body)
    }
}

impl SerializeAtom for MediaHeaderAtom {
    fn atom_type(&self) -> FourCC {
        MDHD
    }

    fn into_body_bytes(self) -> Vec<u8> {
        serializer::serialize_mdhd_data(self)
    }
}

mod serializer {
    use super::MediaHeaderAtom;
    use crate::atom::util::serializer::{be_u32, be_u32_or_u64};

    pub fn serialize_mdhd_data(mdhd: MediaHeaderAtom) -> Vec<u8> {
        let needs_64_bit = [mdhd.creation_time, mdhd.modification_time, mdhd.duration]
            .iter()
            .any(|v| *v > u64::from(u32::MAX));
        let version = if needs_64_bit { 1 } else { mdhd.version };

        let mut data = Vec::with_capacity(36);
        data.push(version);
        data.extend(mdhd.flags);
        data.extend(be_u32_or_u64(version, mdhd.creation_time));
        data.extend(be_u32_or_u64(version, mdhd.modification_time));
        data.extend(be_u32(mdhd.timescale));
        data.extend(be_u32_or_u64(version, mdhd.duration));
        data.extend(mdhd.language.to_be_bytes());
        data.extend(mdhd.quality.to_be_bytes());
        data
    }
}

mod parser {
    use winnow::{
        binary::{be_u16, be_u32},
        combinator::{empty, opt, seq},
        error::StrContext,
        Parser,
    };

    use super::{MediaHeaderAtom, LANGUAGE_UNDETERMINED};
    use crate::{
        atom::{
            util::parser::{be_u32_or_u64, flags3, parse_fully, rest_vec, version_0_or_1, Stream},
            FourCC,
        },
        error::Error,
    };

    pub fn parse_mdhd_data(atom_type: FourCC, input: &[u8]) -> Result<MediaHeaderAtom, Error> {
        parse_fully(atom_type, input, |input: &mut Stream<'_>| {
            let version = version_0_or_1.parse_next(input)?;
            let mdhd = seq!(MediaHeaderAtom {
                version: empty.value(version),
                flags: flags3,
                creation_time: be_u32_or_u64(version).context(StrContext::Label("creation_time")),
                modification_time: be_u32_or_u64(version)
                    .context(StrContext::Label("modification_time")),
                timescale: be_u32.context(StrContext::Label("timescale")),
                duration: be_u32_or_u64(version).context(StrContext::Label("duration")),
                language: opt(be_u16).map(|l| l.unwrap_or(LANGUAGE_UNDETERMINED)),
                quality: opt(be_u16).map(Option::unwrap_or_default),
            })
            .parse_next(input)?;
            // some writers pad the box
            rest_vec.parse_next(input)?;
            Ok(mdhd)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serialize() {
        let mdhd = MediaHeaderAtom::builder()
            .creation_time(0)
            .modification_time(0)
            .timescale(30_000)
            .duration(100 * 1001)
            .build();
        let bytes = mdhd.into_body_bytes();
        assert_eq!(bytes.len(), 24);

        let parsed = MediaHeaderAtom::parse(MDHD, &bytes).unwrap();
        assert_eq!(parsed.timescale, 30_000);
        assert_eq!(parsed.duration, 100_100);
        assert_eq!(parsed.language, LANGUAGE_UNDETERMINED);
    }

    #[test]
    fn test_parse_truncated_language() {
        let mut bytes = MediaHeaderAtom::builder()
            .timescale(1000)
            .duration(5)
            .build()
            .into_body_bytes();
        bytes.truncate(20);
        let parsed = MediaHeaderAtom::parse(MDHD, &bytes).unwrap();
        assert_eq!(parsed.duration, 5);
        assert_eq!(parsed.quality, 0);
    }
}
