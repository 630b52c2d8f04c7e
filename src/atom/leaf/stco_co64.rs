use bon::bon;
use derive_more::{Deref, DerefMut};
use std::fmt;

use crate::{
    atom::{util::DebugList, FourCC},
    error::Error,
    parser::ParseAtom,
    writer::SerializeAtom,
};

pub const STCO: &[u8; 4] = b"stco";
pub const CO64: &[u8; 4] = b"co64";

#[derive(Default, Clone, PartialEq, Eq, Deref, DerefMut)]
pub struct ChunkOffsets(Vec<u64>);

impl ChunkOffsets {
    pub fn into_inner(self) -> Vec<u64> {
        self.0
    }

    pub fn inner(&self) -> &[u64] {
        &self.0
    }
}

impl From<Vec<u64>> for ChunkOffsets {
    fn from(value: Vec<u64>) -> Self {
        Self(value)
    }
}

impl FromIterator<u64> for ChunkOffsets {
    fn from_iter<T: IntoIterator<Item = u64>>(iter: T) -> Self {
        Self(Vec::from_iter(iter))
    }
}

impl fmt::Debug for ChunkOffsets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&DebugList(&self.0, 10), f)
    }
}

/// Chunk Offset Atom - absolute file offsets of chunks, 32-bit (stco) or 64-bit (co64)
#[derive(Default, Debug, Clone)]
pub struct ChunkOffsetAtom {
    pub version: u8,
    pub flags: [u8; 3],
    pub chunk_offsets: ChunkOffsets,
    /// Whether this uses 64-bit offsets (co64) or 32-bit (stco)
    pub is_64bit: bool,
}

#[bon]
impl ChunkOffsetAtom {
    #[builder]
    pub fn new(
        #[builder(default = 0)] version: u8,
        #[builder(default = [0u8; 3])] flags: [u8; 3],
        #[builder(with = FromIterator::from_iter)] chunk_offsets: Vec<u64>,
        #[builder(default = false)] is_64bit: bool,
    ) -> Self {
        Self {
            version,
            flags,
            chunk_offsets: chunk_offsets.into(),
            is_64bit,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_offsets.len()
    }

    /// Offsets must be strictly increasing and lie inside the file.
    pub fn is_consistent(&self, file_size: u64) -> bool {
        self.chunk_offsets.windows(2).all(|w| w[0] < w[1])
            && self.chunk_offsets.iter().all(|offset| *offset < file_size)
    }
}

impl ParseAtom for ChunkOffsetAtom {
    fn parse(atom_type: FourCC, body: &[u8]) -> Result<Self, Error> {
        match &atom_type.0 {
            STCO => parser::parse_chunk_offsets(atom_type, body, false),
            CO64 => parser::parse_chunk_offsets(atom_type, body, true),
            _ => Err(Error::atom_parsing(atom_type, "expected stco or co64")),
        }
    }
}

impl SerializeAtom for ChunkOffsetAtom {
    fn atom_type(&self) -> FourCC {
        if self.is_64bit {
            FourCC(*CO64)
        } else {
            FourCC(*STCO)
        }
    }

    fn into_body_bytes(self) -> Vec<u8> {
        serializer::serialize_stco_co64_data(self)
    }
}

mod serializer {
    use super::ChunkOffsetAtom;
    use crate::atom::util::serializer::{be_u32, be_u32_len};

    pub fn serialize_stco_co64_data(atom: ChunkOffsetAtom) -> Vec<u8> {
        let width = if atom.is_64bit { 8 } else { 4 };
        let mut data = Vec::with_capacity(8 + atom.chunk_offsets.len() * width);
        data.push(atom.version);
        data.extend(atom.flags);
        data.extend(be_u32_len(atom.chunk_offsets.len()));
        for offset in atom.chunk_offsets.0 {
            if atom.is_64bit {
                data.extend(offset.to_be_bytes());
            } else {
                data.extend(be_u32(u32::try_from(offset).unwrap_or(u32::MAX)));
            }
        }
        data
    }
}

mod parser {
    use winnow::{
        binary::be_u64,
        combinator::{empty, seq},
        error::StrContext,
        Parser,
    };

    use super::{ChunkOffsetAtom, ChunkOffsets};
    use crate::{
        atom::{
            util::parser::{be_u32_as_u64, counted, flags3, parse_fully, version, Stream},
            FourCC,
        },
        error::Error,
    };

    pub fn parse_chunk_offsets(
        atom_type: FourCC,
        input: &[u8],
        is_64bit: bool,
    ) -> Result<ChunkOffsetAtom, Error> {
        parse_fully(atom_type, input, move |input: &mut Stream<'_>| {
            seq!(ChunkOffsetAtom {
                version: version,
                flags: flags3,
                chunk_offsets: offsets(is_64bit)
                    .map(ChunkOffsets)
                    .context(StrContext::Label("chunk_offsets")),
                is_64bit: empty.value(is_64bit),
            })
            .parse_next(input)
        })
    }

    fn offsets<'i>(
        is_64bit: bool,
    ) -> impl Parser<Stream<'i>, Vec<u64>, winnow::error::ErrMode<winnow::error::ContextError>>
    {
        move |input: &mut Stream<'i>| {
            if is_64bit {
                counted(be_u64).parse_next(input)
            } else {
                counted(be_u32_as_u64).parse_next(input)
            }
        }
    }
}
