use bon::Builder;
use std::fmt;

use crate::{atom::FourCC, error::Error, parser::ParseAtom, writer::SerializeAtom};

pub const HDLR: &[u8; 4] = b"hdlr";

pub const HANDLER_VIDEO: &[u8; 4] = b"vide";
pub const HANDLER_AUDIO: &[u8; 4] = b"soun";
pub const HANDLER_TIMECODE: &[u8; 4] = b"tmcd";

/// Body offset of the component subtype
pub const SUBTYPE_OFFSET: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerType {
    Video,
    Audio,
    Timecode,
    Unknown([u8; 4]),
}

impl Default for HandlerType {
    fn default() -> Self {
        Self::Unknown([0u8; 4])
    }
}

impl HandlerType {
    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        match bytes {
            HANDLER_VIDEO => HandlerType::Video,
            HANDLER_AUDIO => HandlerType::Audio,
            HANDLER_TIMECODE => HandlerType::Timecode,
            _ => HandlerType::Unknown(*bytes),
        }
    }

    /// Reads the subtype out of a (possibly partial) hdlr body.
    pub fn from_body(body: &[u8]) -> Option<Self> {
        let bytes: [u8; 4] = body
            .get(SUBTYPE_OFFSET..SUBTYPE_OFFSET + 4)?
            .try_into()
            .ok()?;
        Some(Self::from_bytes(&bytes))
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        match self {
            HandlerType::Video => *HANDLER_VIDEO,
            HandlerType::Audio => *HANDLER_AUDIO,
            HandlerType::Timecode => *HANDLER_TIMECODE,
            HandlerType::Unknown(bytes) => *bytes,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, HandlerType::Unknown(_))
    }
}

impl fmt::Display for HandlerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerType::Video => f.write_str("Video"),
            HandlerType::Audio => f.write_str("Audio"),
            HandlerType::Timecode => f.write_str("Timecode"),
            HandlerType::Unknown(bytes) => write!(f, "Unknown({})", FourCC(*bytes)),
        }
    }
}

/// Handler Reference Atom (hdlr)
#[derive(Default, Debug, Clone, Builder)]
pub struct HandlerReferenceAtom {
    #[builder(default = 0)]
    pub version: u8,
    #[builder(default = [0u8; 3])]
    pub flags: [u8; 3],
    /// Component type (`mhlr` in QuickTime files, zero in ISO files)
    #[builder(default = [0u8; 4])]
    pub component_type: [u8; 4],
    pub handler_type: HandlerType,
    #[builder(default = [0u8; 12])]
    pub reserved: [u8; 12],
    /// Name, kept as raw bytes (C string or Pascal string depending on the writer)
    #[builder(default = b"\0".to_vec())]
    pub name: Vec<u8>,
}

impl ParseAtom for HandlerReferenceAtom {
    fn parse(atom_type: FourCC, body: &[u8]) -> Result<Self, Error> {
        if atom_type != HDLR {
            return Err(Error::atom_parsing(atom_type, "expected hdlr"));
        }
        parser::parse_hdlr_data(atom_type, body)
    }
}

impl SerializeAtom for HandlerReferenceAtom {
    fn atom_type(&self) -> FourCC {
        FourCC(*HDLR)
    }

    fn into_body_bytes(self) -> Vec<u8> {
        let mut data = Vec::with_capacity(24 + self.name.len());
        data.push(self.version);
        data.extend(self.flags);
        data.extend(self.component_type);
        data.extend(self.handler_type.to_bytes());
        data.extend(self.reserved);
        data.extend(self.name);
        data
    }
}

mod parser {
    use winnow::{combinator::seq, error::StrContext, Parser};

    use super::{HandlerReferenceAtom, HandlerType};
    use crate::{
        atom::{
            util::parser::{byte_array, flags3, parse_fully, rest_vec, version, Stream},
            FourCC,
        },
        error::Error,
    };

    pub fn parse_hdlr_data(
        atom_type: FourCC,
        input: &[u8],
    ) -> Result<HandlerReferenceAtom, Error> {
        parse_fully(atom_type, input, |input: &mut Stream<'_>| {
            seq!(HandlerReferenceAtom {
                version: version,
                flags: flags3,
                component_type: byte_array.context(StrContext::Label("component_type")),
                handler_type: byte_array
                    .map(|bytes: [u8; 4]| HandlerType::from_bytes(&bytes))
                    .context(StrContext::Label("handler_type")),
                reserved: byte_array.context(StrContext::Label("reserved")),
                name: rest_vec,
            })
            .parse_next(input)
        })
    }
}
