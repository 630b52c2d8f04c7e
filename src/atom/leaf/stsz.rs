use derive_more::{Deref, DerefMut};
use std::fmt;

use crate::{
    atom::{util::DebugList, FourCC},
    error::Error,
    parser::ParseAtom,
    writer::SerializeAtom,
};

pub const STSZ: &[u8; 4] = b"stsz";

#[derive(Clone, Default, PartialEq, Eq, Deref, DerefMut)]
pub struct SampleEntrySizes(Vec<u32>);

impl SampleEntrySizes {
    pub fn inner(&self) -> &[u32] {
        &self.0
    }
}

impl From<Vec<u32>> for SampleEntrySizes {
    fn from(value: Vec<u32>) -> Self {
        SampleEntrySizes(value)
    }
}

impl fmt::Debug for SampleEntrySizes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&DebugList(&self.0, 10), f)
    }
}

/// Sample Size Atom (stsz)
///
/// Holds either one size shared by every sample (`sample_size != 0`) or a per-sample table.
#[derive(Default, Debug, Clone)]
pub struct SampleSizeAtom {
    pub version: u8,
    pub flags: [u8; 3],
    /// Constant size of every sample, or 0 when `entry_sizes` holds per-sample sizes
    pub sample_size: u32,
    pub sample_count: u32,
    pub entry_sizes: SampleEntrySizes,
}

impl SampleSizeAtom {
    /// Builds a per-sample table from `sizes`.
    pub fn from_sizes(sizes: Vec<u32>) -> Self {
        Self {
            version: 0,
            flags: [0u8; 3],
            sample_size: 0,
            sample_count: u32::try_from(sizes.len()).unwrap_or(u32::MAX),
            entry_sizes: sizes.into(),
        }
    }

    pub fn uniform(sample_size: u32, sample_count: u32) -> Self {
        Self {
            version: 0,
            flags: [0u8; 3],
            sample_size,
            sample_count,
            entry_sizes: SampleEntrySizes::default(),
        }
    }

    pub fn is_uniform(&self) -> bool {
        self.sample_size != 0
    }

    /// Number of samples described by the table.
    pub fn sample_count(&self) -> usize {
        if self.is_uniform() {
            self.sample_count as usize
        } else {
            self.entry_sizes.len()
        }
    }

    /// Every sample size, expanding a uniform table.
    pub fn sizes(&self) -> Vec<u32> {
        if self.is_uniform() {
            vec![self.sample_size; self.sample_count as usize]
        } else {
            self.entry_sizes.to_vec()
        }
    }
}

impl ParseAtom for SampleSizeAtom {
    fn parse(atom_type: FourCC, body: &[u8]) -> Result<Self, Error> {
        if atom_type != STSZ {
            return Err(Error::atom_parsing(atom_type, "expected stsz"));
        }
        parser::parse_stsz_data(atom_type, body)
    }
}

impl SerializeAtom for SampleSizeAtom {
    fn atom_type(&self) -> FourCC {
        FourCC(*STSZ)
    }

    fn into_body_bytes(self) -> Vec<u8> {
        serializer::serialize_stsz_data(self)
    }
}

mod serializer {
    use super::SampleSizeAtom;
    use crate::atom::util::serializer::be_u32;

    pub fn serialize_stsz_data(atom: SampleSizeAtom) -> Vec<u8> {
        let mut data = Vec::with_capacity(12 + atom.entry_sizes.len() * 4);
        data.push(atom.version);
        data.extend(atom.flags);
        data.extend(be_u32(atom.sample_size));
        data.extend(be_u32(atom.sample_count));
        if atom.sample_size == 0 {
            for size in atom.entry_sizes.0 {
                data.extend(be_u32(size));
            }
        }
        data
    }
}

mod parser {
    use winnow::{
        binary::be_u32,
        combinator::{repeat, trace},
        error::StrContext,
        ModalResult, Parser,
    };

    use super::{SampleEntrySizes, SampleSizeAtom};
    use crate::{
        atom::{
            util::parser::{flags3, parse_fully, version, Stream},
            FourCC,
        },
        error::Error,
    };

    pub fn parse_stsz_data(atom_type: FourCC, input: &[u8]) -> Result<SampleSizeAtom, Error> {
        parse_fully(atom_type, input, stsz)
    }

    fn stsz(input: &mut Stream<'_>) -> ModalResult<SampleSizeAtom> {
        trace("stsz", move |input: &mut Stream<'_>| {
            let version = version.parse_next(input)?;
            let flags = flags3.parse_next(input)?;
            let sample_size = be_u32
                .context(StrContext::Label("sample_size"))
                .parse_next(input)?;
            let sample_count = be_u32
                .context(StrContext::Label("sample_count"))
                .parse_next(input)?;
            let entry_sizes: Vec<u32> = if sample_size == 0 {
                repeat(sample_count as usize, be_u32)
                    .context(StrContext::Label("entry_sizes"))
                    .parse_next(input)?
            } else {
                Vec::new()
            };
            Ok(SampleSizeAtom {
                version,
                flags,
                sample_size,
                sample_count,
                entry_sizes: SampleEntrySizes(entry_sizes),
            })
        })
        .parse_next(input)
    }
}
