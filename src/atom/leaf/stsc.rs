use bon::{bon, Builder};
use derive_more::{Deref, DerefMut};
use std::fmt;

use crate::{
    atom::{util::DebugList, FourCC},
    error::Error,
    parser::ParseAtom,
    writer::SerializeAtom,
};

pub const STSC: &[u8; 4] = b"stsc";

#[derive(Default, Clone, PartialEq, Eq, Deref, DerefMut)]
pub struct SampleToChunkEntries(Vec<SampleToChunkEntry>);

impl SampleToChunkEntries {
    pub fn inner(&self) -> &[SampleToChunkEntry] {
        &self.0
    }
}

impl From<Vec<SampleToChunkEntry>> for SampleToChunkEntries {
    fn from(inner: Vec<SampleToChunkEntry>) -> Self {
        Self(inner)
    }
}

impl fmt::Debug for SampleToChunkEntries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&DebugList(&self.0, 10), f)
    }
}

/// Sample-to-Chunk entry - maps samples to chunks
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct SampleToChunkEntry {
    /// First chunk number (1-based) that uses this entry
    pub first_chunk: u32,
    /// Number of samples in each chunk
    pub samples_per_chunk: u32,
    /// Sample description index (1-based, references stsd atom)
    #[builder(default = 1)]
    pub sample_description_index: u32,
}

/// Sample-to-Chunk Atom - contains sample-to-chunk mapping table
///
/// Entries are kept in ascending `first_chunk` order; lookups scan from the back, which gives the
/// same answer as scanning a descending list from the front.
#[derive(Default, Debug, Clone)]
pub struct SampleToChunkAtom {
    /// Version of the stsc atom format (0)
    pub version: u8,
    /// Flags for the stsc atom (usually all zeros)
    pub flags: [u8; 3],
    /// List of sample-to-chunk entries
    pub entries: SampleToChunkEntries,
}

#[bon]
impl SampleToChunkAtom {
    #[builder]
    pub fn new(
        #[builder(default = 0)] version: u8,
        #[builder(default = [0u8; 3])] flags: [u8; 3],
        #[builder(with = FromIterator::from_iter)] entries: Vec<SampleToChunkEntry>,
    ) -> Self {
        Self {
            version,
            flags,
            entries: entries.into(),
        }
    }

    /// Builds a table with one run per change in the per-chunk sample count.
    ///
    /// Runs always reference sample description 1.
    pub fn from_chunk_sample_counts(counts: impl IntoIterator<Item = u32>) -> Self {
        let mut entries: Vec<SampleToChunkEntry> = Vec::new();
        for (index, count) in counts.into_iter().enumerate() {
            if entries.last().map(|e| e.samples_per_chunk) != Some(count) {
                entries.push(SampleToChunkEntry {
                    first_chunk: index as u32 + 1,
                    samples_per_chunk: count,
                    sample_description_index: 1,
                });
            }
        }
        Self {
            version: 0,
            flags: [0u8; 3],
            entries: entries.into(),
        }
    }

    /// Sorts entries by `first_chunk` so lookups are well defined on tables written out of order.
    pub(crate) fn normalize(&mut self) {
        self.entries.sort_by_key(|e| e.first_chunk);
    }

    /// Returns the entry that applies to the 1-based `chunk_number`: the one with the greatest
    /// `first_chunk` not exceeding it.
    pub fn entry_for_chunk(&self, chunk_number: u32) -> Option<&SampleToChunkEntry> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.first_chunk <= chunk_number)
    }

    /// Expands the table into a per-chunk sample count for `chunk_count` chunks.
    pub fn chunk_sample_counts(&self, chunk_count: usize) -> Vec<u32> {
        (1..=chunk_count as u32)
            .map(|chunk_number| {
                self.entry_for_chunk(chunk_number)
                    .map_or(0, |entry| entry.samples_per_chunk)
            })
            .collect()
    }
}

impl ParseAtom for SampleToChunkAtom {
    fn parse(atom_type: FourCC, body: &[u8]) -> Result<Self, Error> {
        if atom_type != STSC {
            return Err(Error::atom_parsing(atom_type, "expected stsc"));
        }
        parser::parse_stsc_data(atom_type, body)
    }
}

impl SerializeAtom for SampleToChunkAtom {
    fn atom_type(&self) -> FourCC {
        FourCC(*STSC)
    }

    fn into_body_bytes(self) -> Vec<u8> {
        serializer::serialize_stsc_data(self)
    }
}

mod serializer {
    use super::SampleToChunkAtom;
    use crate::atom::util::serializer::{be_u32, be_u32_len};

    pub fn serialize_stsc_data(atom: SampleToChunkAtom) -> Vec<u8> {
        let mut data = Vec::with_capacity(8 + atom.entries.len() * 12);
        data.push(atom.version);
        data.extend(atom.flags);
        data.extend(be_u32_len(atom.entries.len()));
        for entry in atom.entries.0 {
            data.extend(be_u32(entry.first_chunk));
            data.extend(be_u32(entry.samples_per_chunk));
            data.extend(be_u32(entry.sample_description_index));
        }
        data
    }
}

mod parser {
    use winnow::{binary::be_u32, combinator::seq, error::StrContext, Parser};

    use super::{SampleToChunkAtom, SampleToChunkEntries, SampleToChunkEntry};
    use crate::{
        atom::{
            util::parser::{counted, flags3, parse_fully, version, Stream},
            FourCC,
        },
        error::Error,
    };

    pub fn parse_stsc_data(atom_type: FourCC, input: &[u8]) -> Result<SampleToChunkAtom, Error> {
        parse_fully(atom_type, input, |input: &mut Stream<'_>| {
            seq!(SampleToChunkAtom {
                version: version,
                flags: flags3,
                entries: counted(entry)
                    .map(SampleToChunkEntries)
                    .context(StrContext::Label("entries")),
            })
            .parse_next(input)
        })
    }

    fn entry(input: &mut Stream<'_>) -> winnow::ModalResult<SampleToChunkEntry> {
        seq!(SampleToChunkEntry {
            first_chunk: be_u32
                .verify(|first_chunk| *first_chunk > 0)
                .context(StrContext::Label("first_chunk")),
            samples_per_chunk: be_u32.context(StrContext::Label("samples_per_chunk")),
            sample_description_index: be_u32.context(StrContext::Label("sample_description_index")),
        })
        .parse_next(input)
    }
}
