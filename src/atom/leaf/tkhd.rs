use bon::Builder;

use crate::{
    atom::{util::mp4_timestamp_now, FourCC},
    error::Error,
    parser::ParseAtom,
    writer::SerializeAtom,
};

pub const TKHD: FourCC = FourCC::new(b"tkhd");

/// Track enabled, in movie, in preview
pub const DEFAULT_FLAGS: [u8; 3] = [0, 0, 7];

const IDENTITY_MATRIX: [u32; 9] = [0x00010000, 0, 0, 0, 0x00010000, 0, 0, 0, 0x40000000];

/// reserved (8) + layer (2) + alternate group (2) + volume (2) + reserved (2) + matrix (36)
pub const LAYOUT_SIZE: usize = 52;

fn default_layout(volume: u16) -> [u8; LAYOUT_SIZE] {
    let mut layout = [0u8; LAYOUT_SIZE];
    layout[12..14].copy_from_slice(&volume.to_be_bytes());
    for (i, v) in IDENTITY_MATRIX.iter().enumerate() {
        layout[16 + i * 4..20 + i * 4].copy_from_slice(&v.to_be_bytes());
    }
    layout
}

#[derive(Debug, Clone, Builder)]
pub struct TrackHeaderAtom {
    #[builder(default = 0)]
    pub version: u8,
    #[builder(default = DEFAULT_FLAGS)]
    pub flags: [u8; 3],
    #[builder(default = mp4_timestamp_now())]
    pub creation_time: u64,
    #[builder(default = mp4_timestamp_now())]
    pub modification_time: u64,
    pub track_id: u32,
    #[builder(default = 0)]
    pub reserved: u32,
    /// Duration in movie timescale units
    pub duration: u64,
    /// Layer, alternate group, volume and matrix, kept byte for byte
    #[builder(default = default_layout(0))]
    pub layout: [u8; LAYOUT_SIZE],
    /// Fixed-point 16.16
    #[builder(default = 0)]
    pub width: u32,
    /// Fixed-point 16.16
    #[builder(default = 0)]
    pub height: u32,
}

impl TrackHeaderAtom {
    /// Layout for an audio track: full volume, identity matrix.
    pub fn audio_layout() -> [u8; LAYOUT_SIZE] {
        default_layout(0x0100)
    }

    /// Width in whole pixels.
    pub fn pixel_width(&self) -> u32 {
        self.width >> 16
    }

    /// Height in whole pixels.
    pub fn pixel_height(&self) -> u32 {
        self.height >> 16
    }
}

impl ParseAtom for TrackHeaderAtom {
    fn parse(atom_type: FourCC, body: &[u8]) -> Result<Self, Error> {
        if atom_type != TKHD {
            return Err(Error::atom_parsing(atom_type, "expected tkhd"));
        }
        parser::parse_tkhd_data(atom_type, body)
    }
}

impl SerializeAtom for TrackHeaderAtom {
    fn atom_type(&self) -> FourCC {
        TKHD
    }

    fn into_body_bytes(self) -> Vec<u8> {
        serializer::serialize_tkhd_data(self)
    }
}

mod serializer {
    use super::TrackHeaderAtom;
    use crate::atom::util::serializer::{be_u32, be_u32_or_u64};

    pub fn serialize_tkhd_data(tkhd: TrackHeaderAtom) -> Vec<u8> {
        let needs_64_bit = [tkhd.creation_time, tkhd.modification_time, tkhd.duration]
            .iter()
            .any(|v| *v > u64::from(u32::MAX));
        let version = if needs_64_bit { 1 } else { tkhd.version };

        let mut data = Vec::with_capacity(96);
        data.push(version);
        data.extend(tkhd.flags);
        data.extend(be_u32_or_u64(version, tkhd.creation_time));
        data.extend(be_u32_or_u64(version, tkhd.modification_time));
        data.extend(be_u32(tkhd.track_id));
        data.extend(be_u32(tkhd.reserved));
        data.extend(be_u32_or_u64(version, tkhd.duration));
        data.extend(tkhd.layout);
        data.extend(be_u32(tkhd.width));
        data.extend(be_u32(tkhd.height));
        data
    }
}

mod parser {
    use winnow::{binary::be_u32, combinator::seq, error::StrContext, Parser};

    use super::TrackHeaderAtom;
    use crate::{
        atom::{
            util::parser::{
                be_u32_or_u64, byte_array, flags3, parse_fully, rest_vec, version_0_or_1, Stream,
            },
            FourCC,
        },
        error::Error,
    };

    pub fn parse_tkhd_data(atom_type: FourCC, input: &[u8]) -> Result<TrackHeaderAtom, Error> {
        parse_fully(atom_type, input, |input: &mut Stream<'_>| {
            let version = version_0_or_1.parse_next(input)?;
            let tkhd = seq!(TrackHeaderAtom {
                version: winnow::combinator::empty.value(version),
                flags: flags3,
                creation_time: be_u32_or_u64(version).context(StrContext::Label("creation_time")),
                modification_time: be_u32_or_u64(version)
                    .context(StrContext::Label("modification_time")),
                track_id: be_u32.context(StrContext::Label("track_id")),
                reserved: be_u32,
                duration: be_u32_or_u64(version).context(StrContext::Label("duration")),
                layout: byte_array.context(StrContext::Label("layout")),
                width: be_u32.context(StrContext::Label("width")),
                height: be_u32.context(StrContext::Label("height")),
            })
            .parse_next(input)?;
            rest_vec.parse_next(input)?;
            Ok(tkhd)
        })
    }
}
