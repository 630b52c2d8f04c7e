use bon::{bon, Builder};
use derive_more::{Deref, DerefMut};
use std::fmt;

use crate::{
    atom::{util::DebugList, FourCC},
    error::Error,
    parser::ParseAtom,
    writer::SerializeAtom,
};

pub const STTS: &[u8; 4] = b"stts";
pub const CTTS: &[u8; 4] = b"ctts";

#[derive(Default, Clone, PartialEq, Eq, Deref, DerefMut)]
pub struct TimeToSampleEntries(Vec<TimeToSampleEntry>);

impl From<Vec<TimeToSampleEntry>> for TimeToSampleEntries {
    fn from(entries: Vec<TimeToSampleEntry>) -> Self {
        Self(entries)
    }
}

impl TimeToSampleEntries {
    pub fn inner(&self) -> &[TimeToSampleEntry] {
        &self.0
    }
}

impl fmt::Debug for TimeToSampleEntries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&DebugList(&self.0, 10), f)
    }
}

/// Defines the delta for a consecutive run of samples
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct TimeToSampleEntry {
    /// Number of consecutive samples sharing the same delta
    pub sample_count: u32,
    /// Duration (stts) or composition offset (ctts) of each sample, in media timescale units
    pub sample_duration: u32,
}

/// Time-to-Sample (stts) atom, also used for Composition Offset (ctts) which shares its layout
#[derive(Default, Debug, Clone)]
pub struct TimeToSampleAtom {
    pub version: u8,
    pub flags: [u8; 3],
    pub entries: TimeToSampleEntries,
    /// Whether this is a ctts (composition offset) table
    pub is_composition: bool,
}

#[bon]
impl TimeToSampleAtom {
    #[builder]
    pub fn new(
        #[builder(default = 0)] version: u8,
        #[builder(default = [0u8; 3])] flags: [u8; 3],
        #[builder(with = FromIterator::from_iter)] entries: Vec<TimeToSampleEntry>,
        #[builder(default = false)] is_composition: bool,
    ) -> Self {
        Self {
            version,
            flags,
            entries: entries.into(),
            is_composition,
        }
    }

    /// Run-length encodes a flat list of per-sample deltas, merging consecutive equal values.
    pub fn from_deltas(deltas: &[u32], is_composition: bool) -> Self {
        let mut entries: Vec<TimeToSampleEntry> = Vec::new();
        for &delta in deltas {
            match entries.last_mut() {
                Some(entry) if entry.sample_duration == delta => entry.sample_count += 1,
                _ => entries.push(TimeToSampleEntry {
                    sample_count: 1,
                    sample_duration: delta,
                }),
            }
        }
        Self {
            version: 0,
            flags: [0u8; 3],
            entries: entries.into(),
            is_composition,
        }
    }

    /// Total number of samples described by the table.
    pub fn sample_count(&self) -> u64 {
        self.entries.iter().map(|e| e.sample_count as u64).sum()
    }

    /// Sum of all deltas (only meaningful for stts). Saturates on corrupted run lengths.
    pub fn total_duration(&self) -> u64 {
        self.entries.iter().fold(0u64, |total, e| {
            total.saturating_add(e.sample_count as u64 * e.sample_duration as u64)
        })
    }

    /// Returns a table describing `count` samples starting at the 0-based `start` sample.
    ///
    /// The window is clamped to the samples the table actually describes. Runs are clipped in
    /// place, so a corrupted run length never has to be materialized.
    pub fn slice(&self, start: usize, count: usize) -> Self {
        let start = start as u64;
        let end = start.saturating_add(count as u64);
        let mut entries: Vec<TimeToSampleEntry> = Vec::new();
        let mut run_start = 0u64;
        for entry in self.entries.iter() {
            if run_start >= end {
                break;
            }
            let run_end = run_start + entry.sample_count as u64;
            let kept = run_end.min(end).saturating_sub(run_start.max(start));
            run_start = run_end;
            if kept == 0 {
                continue;
            }
            // kept never exceeds the source run length
            let kept = kept as u32;
            match entries.last_mut() {
                Some(last) if last.sample_duration == entry.sample_duration => {
                    last.sample_count = last.sample_count.saturating_add(kept)
                }
                _ => entries.push(TimeToSampleEntry {
                    sample_count: kept,
                    sample_duration: entry.sample_duration,
                }),
            }
        }
        Self {
            version: self.version,
            flags: self.flags,
            entries: entries.into(),
            is_composition: self.is_composition,
        }
    }

    /// Returns the 0-based index of the sample whose decode interval contains `time`.
    pub fn sample_at_time(&self, time: u64) -> Option<u64> {
        let mut elapsed = 0u64;
        let mut sample_index = 0u64;
        for entry in self.entries.iter() {
            let run = entry.sample_count as u64 * entry.sample_duration as u64;
            if time < elapsed.saturating_add(run) {
                let within = (time - elapsed) / (entry.sample_duration as u64).max(1);
                return Some(sample_index + within);
            }
            elapsed = elapsed.saturating_add(run);
            sample_index += entry.sample_count as u64;
        }
        None
    }
}

impl ParseAtom for TimeToSampleAtom {
    fn parse(atom_type: FourCC, body: &[u8]) -> Result<Self, Error> {
        match &atom_type.0 {
            STTS => parser::parse_stts_data(atom_type, body, false),
            CTTS => parser::parse_stts_data(atom_type, body, true),
            _ => Err(Error::atom_parsing(atom_type, "expected stts or ctts")),
        }
    }
}

impl SerializeAtom for TimeToSampleAtom {
    fn atom_type(&self) -> FourCC {
        if self.is_composition {
            FourCC(*CTTS)
        } else {
            FourCC(*STTS)
        }
    }

    fn into_body_bytes(self) -> Vec<u8> {
        serializer::serialize_stts_data(self)
    }
}

mod serializer {
    use super::TimeToSampleAtom;
    use crate::atom::util::serializer::{be_u32, be_u32_len};

    pub fn serialize_stts_data(atom: TimeToSampleAtom) -> Vec<u8> {
        let mut data = Vec::with_capacity(8 + atom.entries.len() * 8);
        data.push(atom.version);
        data.extend(atom.flags);
        data.extend(be_u32_len(atom.entries.len()));
        for entry in atom.entries.0 {
            data.extend(be_u32(entry.sample_count));
            data.extend(be_u32(entry.sample_duration));
        }
        data
    }
}

mod parser {
    use winnow::{binary::be_u32, combinator::seq, error::StrContext, Parser};

    use super::{TimeToSampleAtom, TimeToSampleEntries, TimeToSampleEntry};
    use crate::{
        atom::{
            util::parser::{counted, flags3, parse_fully, version, Stream},
            FourCC,
        },
        error::Error,
    };

    pub fn parse_stts_data(
        atom_type: FourCC,
        input: &[u8],
        is_composition: bool,
    ) -> Result<TimeToSampleAtom, Error> {
        parse_fully(
            atom_type,
            input,
            move |input: &mut Stream<'_>| {
                seq!(TimeToSampleAtom {
                    version: version,
                    flags: flags3,
                    entries: counted(entry)
                        .map(TimeToSampleEntries)
                        .context(StrContext::Label("entries")),
                    is_composition: winnow::combinator::empty.value(is_composition),
                })
                .parse_next(input)
            },
        )
    }

    fn entry(input: &mut Stream<'_>) -> winnow::ModalResult<TimeToSampleEntry> {
        seq!(TimeToSampleEntry {
            sample_count: be_u32.context(StrContext::Label("sample_count")),
            sample_duration: be_u32.context(StrContext::Label("sample_duration")),
        })
        .parse_next(input)
    }
}
