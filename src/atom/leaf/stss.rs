use bon::bon;
use derive_more::{Deref, DerefMut};
use std::fmt;

use crate::{
    atom::{util::DebugList, FourCC},
    error::Error,
    parser::ParseAtom,
    writer::SerializeAtom,
};

pub const STSS: &[u8; 4] = b"stss";

#[derive(Default, Clone, PartialEq, Eq, Deref, DerefMut)]
pub struct SyncSamples(Vec<u32>);

impl SyncSamples {
    pub fn inner(&self) -> &[u32] {
        &self.0
    }
}

impl fmt::Debug for SyncSamples {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&DebugList(&self.0, 10), f)
    }
}

/// Sync Sample Atom (stss) - 1-based indices of random access samples, ascending
#[derive(Default, Debug, Clone)]
pub struct SyncSampleAtom {
    pub version: u8,
    pub flags: [u8; 3],
    pub sample_numbers: SyncSamples,
}

#[bon]
impl SyncSampleAtom {
    #[builder]
    pub fn new(
        #[builder(default = 0)] version: u8,
        #[builder(default = [0u8; 3])] flags: [u8; 3],
        #[builder(with = FromIterator::from_iter)] sample_numbers: Vec<u32>,
    ) -> Self {
        let mut sample_numbers = sample_numbers;
        sample_numbers.sort_unstable();
        Self {
            version,
            flags,
            sample_numbers: SyncSamples(sample_numbers),
        }
    }

    /// Renumbers the table for an output that starts at source sample `first_sample` and holds
    /// `sample_count` samples.
    ///
    /// Entries that fall before the window or past its end are dropped, and sample 1 is always
    /// present so the output starts on a sync point.
    pub fn shifted(&self, first_sample: u32, sample_count: u32) -> Self {
        let shift = i64::from(first_sample) - 1;
        let mut sample_numbers: Vec<u32> = self
            .sample_numbers
            .iter()
            .map(|n| i64::from(*n) - shift)
            .filter(|n| *n > 0 && *n <= i64::from(sample_count))
            .filter_map(|n| u32::try_from(n).ok())
            .collect();
        if sample_numbers.first() != Some(&1) {
            sample_numbers.insert(0, 1);
        }
        Self {
            version: self.version,
            flags: self.flags,
            sample_numbers: SyncSamples(sample_numbers),
        }
    }
}

impl ParseAtom for SyncSampleAtom {
    fn parse(atom_type: FourCC, body: &[u8]) -> Result<Self, Error> {
        if atom_type != STSS {
            return Err(Error::atom_parsing(atom_type, "expected stss"));
        }
        let mut atom = parser::parse_stss_data(atom_type, body)?;
        atom.sample_numbers.sort_unstable();
        Ok(atom)
    }
}

impl SerializeAtom for SyncSampleAtom {
    fn atom_type(&self) -> FourCC {
        FourCC(*STSS)
    }

    fn into_body_bytes(self) -> Vec<u8> {
        let mut data = Vec::with_capacity(8 + self.sample_numbers.len() * 4);
        data.push(self.version);
        data.extend(self.flags);
        data.extend(crate::atom::util::serializer::be_u32_len(
            self.sample_numbers.len(),
        ));
        for n in self.sample_numbers.0 {
            data.extend(n.to_be_bytes());
        }
        data
    }
}

mod parser {
    use winnow::{binary::be_u32, combinator::seq, error::StrContext, Parser};

    use super::{SyncSampleAtom, SyncSamples};
    use crate::{
        atom::{
            util::parser::{counted, flags3, parse_fully, version, Stream},
            FourCC,
        },
        error::Error,
    };

    pub fn parse_stss_data(atom_type: FourCC, input: &[u8]) -> Result<SyncSampleAtom, Error> {
        parse_fully(atom_type, input, |input: &mut Stream<'_>| {
            seq!(SyncSampleAtom {
                version: version,
                flags: flags3,
                sample_numbers: counted(be_u32)
                    .map(SyncSamples)
                    .context(StrContext::Label("sample_numbers")),
            })
            .parse_next(input)
        })
    }
}
