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

pub const MVHD: FourCC = FourCC::new(b"mvhd");

const IDENTITY_MATRIX: [u32; 9] = [0x00010000, 0, 0, 0, 0x00010000, 0, 0, 0, 0x40000000];

/// reserved (10) + matrix (36) + pre-defined (24) + next track id (4)
fn default_tail() -> Vec<u8> {
    let mut tail = vec![0u8; 10];
    tail.extend(IDENTITY_MATRIX.iter().flat_map(|v| v.to_be_bytes()));
    tail.extend([0u8; 24]);
    tail.extend(3u32.to_be_bytes());
    tail
}

#[derive(Debug, Clone, Builder)]
pub struct MovieHeaderAtom {
    /// Version of the mvhd atom format (0 or 1)
    #[builder(default = 0)]
    pub version: u8,
    #[builder(default = [0u8; 3])]
    pub flags: [u8; 3],
    /// When the movie was created (seconds since Jan 1, 1904 UTC)
    #[builder(default = mp4_timestamp_now())]
    pub creation_time: u64,
    #[builder(default = mp4_timestamp_now())]
    pub modification_time: u64,
    /// Number of time units per second
    pub timescale: u32,
    /// Duration of the movie in timescale units
    pub duration: u64,
    /// Playback rate, fixed-point 16.16
    #[builder(default = 0x00010000)]
    pub rate: u32,
    /// Volume, fixed-point 8.8
    #[builder(default = 0x0100)]
    pub volume: u16,
    /// Everything after the volume field, kept byte for byte
    #[builder(default = default_tail())]
    pub tail: Vec<u8>,
}

impl MovieHeaderAtom {
    pub fn duration_seconds(&self) -> f64 {
        seconds(self.duration, self.timescale)
    }

    /// Next track id, when the tail is long enough to carry one.
    pub fn next_track_id(&self) -> Option<u32> {
        let start = self.tail.len().checked_sub(4)?;
        let bytes: [u8; 4] = self.tail.get(start..)?.try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }
}

impl ParseAtom for MovieHeaderAtom {
    fn parse(atom_type: FourCC, body: &[u8]) -> Result<Self, Error> {
        if atom_type != MVHD {
            return Err(Error::atom_parsing(atom_type, "expected mvhd"));
        }
        parser::parse_mvhd_data(atom_type, body)
    }
}

impl SerializeAtom for MovieHeaderAtom {
    fn atom_type(&self) -> FourCC {
        MVHD
    }

    fn into_body_bytes(self) -> Vec<u8> {
        serializer::serialize_mvhd_data(self)
    }
}

mod serializer {
    use super::MovieHeaderAtom;
    use crate::atom::util::serializer::{be_u32, be_u32_or_u64};

    pub fn serialize_mvhd_data(mvhd: MovieHeaderAtom) -> Vec<u8> {
        // widen to version 1 when a field no longer fits in 32 bits
        let needs_64_bit = [mvhd.creation_time, mvhd.modification_time, mvhd.duration]
            .iter()
            .any(|v| *v > u64::from(u32::MAX));
        let version = if needs_64_bit { 1 } else { mvhd.version };

        let mut data = Vec::with_capacity(112);
        data.push(version);
        data.extend(mvhd.flags);
        data.extend(be_u32_or_u64(version, mvhd.creation_time));
        data.extend(be_u32_or_u64(version, mvhd.modification_time));
        data.extend(be_u32(mvhd.timescale));
        data.extend(be_u32_or_u64(version, mvhd.duration));
        data.extend(be_u32(mvhd.rate));
        data.extend(mvhd.volume.to_be_bytes());
        data.extend(mvhd.tail);
        data
    }
}

mod parser {
    use winnow::{
        binary::{be_u16, be_u32},
        combinator::seq,
        error::StrContext,
        Parser,
    };

    use super::MovieHeaderAtom;
    use crate::{
        atom::{
            util::parser::{
                be_u32_or_u64, flags3, parse_fully, rest_vec, version_0_or_1, Stream,
            },
            FourCC,
        },
        error::Error,
    };

    pub fn parse_mvhd_data(atom_type: FourCC, input: &[u8]) -> Result<MovieHeaderAtom, Error> {
        parse_fully(atom_type, input, |input: &mut Stream<'_>| {
            let version = version_0_or_1.parse_next(input)?;
            seq!(MovieHeaderAtom {
                version: winnow::combinator::empty.value(version),
                flags: flags3,
                creation_time: be_u32_or_u64(version).context(StrContext::Label("creation_time")),
                modification_time: be_u32_or_u64(version)
                    .context(StrContext::Label("modification_time")),
                timescale: be_u32.context(StrContext::Label("timescale")),
                duration: be_u32_or_u64(version).context(StrContext::Label("duration")),
                rate: be_u32.context(StrContext::Label("rate")),
                volume: be_u16.context(StrContext::Label("volume")),
                tail: rest_vec,
            })
            .parse_next(input)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let mvhd = MovieHeaderAtom::builder()
            .creation_time(0)
            .modification_time(0)
            .timescale(1000)
            .duration(10_000)
            .build();
        assert_eq!(mvhd.next_track_id(), Some(3));
        let bytes = mvhd.into_body_bytes();
        assert_eq!(bytes.len(), 100);

        let parsed = MovieHeaderAtom::parse(MVHD, &bytes).unwrap();
        assert_eq!(parsed.timescale, 1000);
        assert_eq!(parsed.duration, 10_000);
        assert_eq!(parsed.duration_seconds(), 10.0);
    }

    #[test]
    fn test_widens_to_version_1() {
        let mvhd = MovieHeaderAtom::builder()
            .creation_time(0)
            .modification_time(0)
            .timescale(90_000)
            .duration(u64::from(u32::MAX) + 1)
            .build();
        let bytes = mvhd.into_body_bytes();
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes.len(), 112);
        let parsed = MovieHeaderAtom::parse(MVHD, &bytes).unwrap();
        assert_eq!(parsed.duration, u64::from(u32::MAX) + 1);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut bytes = MovieHeaderAtom::builder()
            .timescale(1)
            .duration(1)
            .build()
            .into_body_bytes();
        bytes[0] = 2;
        assert!(MovieHeaderAtom::parse(MVHD, &bytes).is_err());
    }
}
