//! Visual and audio sample entries, the children of `stsd` named after their codec (`avc1`,
//! `mp4a`, ...). Only the fixed leading fields are decoded; codec configuration boxes that follow
//! them stay opaque.

use crate::{
    atom::{schema, FourCC},
    error::Error,
    parser::ParseAtom,
};

/// Fields shared by every sample entry: reserved (6) and data reference index (2)
const SAMPLE_ENTRY_HEADER: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualSampleEntry {
    pub codec: FourCC,
    pub data_reference_index: u16,
    /// Width in pixels (body offset 24)
    pub width: u16,
    /// Height in pixels (body offset 26)
    pub height: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioSampleEntry {
    pub codec: FourCC,
    pub data_reference_index: u16,
    pub channel_count: u16,
    /// Bits per sample
    pub sample_size: u16,
    /// Sample rate in Hz, decoded from 16.16 fixed point
    pub sample_rate: f64,
}

impl ParseAtom for VisualSampleEntry {
    fn parse(atom_type: FourCC, body: &[u8]) -> Result<Self, Error> {
        if !schema::VIDEO_CODECS.contains(&atom_type) {
            return Err(Error::atom_parsing(atom_type, "not a video sample entry"));
        }
        parser::parse_visual_entry(atom_type, body)
    }
}

impl ParseAtom for AudioSampleEntry {
    fn parse(atom_type: FourCC, body: &[u8]) -> Result<Self, Error> {
        if !schema::AUDIO_CODECS.contains(&atom_type) {
            return Err(Error::atom_parsing(atom_type, "not an audio sample entry"));
        }
        parser::parse_audio_entry(atom_type, body)
    }
}

mod parser {
    use winnow::{
        binary::{be_u16, be_u32},
        combinator::{empty, seq},
        error::StrContext,
        token::take,
        Parser,
    };

    use super::{AudioSampleEntry, VisualSampleEntry, SAMPLE_ENTRY_HEADER};
    use crate::{
        atom::{
            util::parser::{parse_fully, rest_vec, Stream, FIXED_POINT_16X16_SCALE},
            FourCC,
        },
        error::Error,
    };

    pub fn parse_visual_entry(
        atom_type: FourCC,
        input: &[u8],
    ) -> Result<VisualSampleEntry, Error> {
        parse_fully(atom_type, input, move |input: &mut Stream<'_>| {
            let entry = seq!(VisualSampleEntry {
                codec: empty.value(atom_type),
                _: take(SAMPLE_ENTRY_HEADER - 2),
                data_reference_index: be_u16,
                // pre-defined, reserved, pre-defined[3]
                _: take(16usize),
                width: be_u16.context(StrContext::Label("width")),
                height: be_u16.context(StrContext::Label("height")),
            })
            .parse_next(input)?;
            rest_vec.parse_next(input)?;
            Ok(entry)
        })
    }

    pub fn parse_audio_entry(atom_type: FourCC, input: &[u8]) -> Result<AudioSampleEntry, Error> {
        parse_fully(atom_type, input, move |input: &mut Stream<'_>| {
            let entry = seq!(AudioSampleEntry {
                codec: empty.value(atom_type),
                _: take(SAMPLE_ENTRY_HEADER - 2),
                data_reference_index: be_u16,
                // version, revision, vendor
                _: take(8usize),
                channel_count: be_u16.context(StrContext::Label("channel_count")),
                sample_size: be_u16.context(StrContext::Label("sample_size")),
                // compression id, packet size
                _: take(4usize),
                sample_rate: be_u32
                    .map(|rate| f64::from(rate) / f64::from(FIXED_POINT_16X16_SCALE))
                    .context(StrContext::Label("sample_rate")),
            })
            .parse_next(input)?;
            rest_vec.parse_next(input)?;
            Ok(entry)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visual_body() -> Vec<u8> {
        let mut body = vec![0u8; 6];
        body.extend(1u16.to_be_bytes());
        body.extend([0u8; 16]);
        body.extend(1920u16.to_be_bytes());
        body.extend(1080u16.to_be_bytes());
        body.extend([0u8; 50]);
        body
    }

    #[test]
    fn test_visual_entry() {
        let entry = VisualSampleEntry::parse(FourCC(*b"avc1"), &visual_body()).unwrap();
        assert_eq!(entry.width, 1920);
        assert_eq!(entry.height, 1080);
        assert_eq!(entry.data_reference_index, 1);
        assert!(VisualSampleEntry::parse(FourCC(*b"mp4a"), &visual_body()).is_err());
    }

    #[test]
    fn test_audio_entry() {
        let mut body = vec![0u8; 6];
        body.extend(1u16.to_be_bytes());
        body.extend([0u8; 8]);
        body.extend(2u16.to_be_bytes());
        body.extend(16u16.to_be_bytes());
        body.extend([0u8; 4]);
        body.extend((44_100u32 << 16).to_be_bytes());
        let entry = AudioSampleEntry::parse(FourCC(*b"mp4a"), &body).unwrap();
        assert_eq!(entry.channel_count, 2);
        assert_eq!(entry.sample_size, 16);
        assert_eq!(entry.sample_rate, 44_100.0);
    }

    #[test]
    fn test_short_entry() {
        assert!(VisualSampleEntry::parse(FourCC(*b"avc1"), &[0u8; 20]).is_err());
    }
}
