/*!
 * Decodes the binary sample tables with bounded-effort corruption checks. A table that fails any
 * check is marked broken and dropped from the atom list, which leaves its track looking exactly as
 * if the table were absent.
 */

use tracing::{debug, trace};

use crate::{
    atom::{
        leaf::{
            stco_co64::{CO64, STCO},
            stsc::STSC,
            stss::STSS,
            stsz::STSZ,
            stts::{CTTS, STTS},
        },
        Atom, AtomId, Atoms, ChunkOffsetAtom, FourCC, SampleSizeAtom, SampleToChunkAtom,
        SyncSampleAtom, TableEntries, TimeToSampleAtom,
    },
    config::Config,
    diagnostics::{Diagnostics, Stage},
    error::{Error, ErrorKind, Result},
    parser::ParseAtom,
    reader::ChunkedReader,
};

/// Entry count ceiling for chunk offsets, sample sizes and time deltas.
pub const MAX_ENTRIES: u32 = 1_048_576;
/// Entry count ceiling for sample-to-chunk and sync sample tables.
pub const MAX_SPARSE_ENTRIES: u32 = 8_192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableKind {
    TimeToSample,
    SampleToChunk,
    SampleSize,
    ChunkOffset32,
    ChunkOffset64,
    SyncSample,
}

impl TableKind {
    fn of(atom_type: FourCC) -> Option<Self> {
        match &atom_type.0 {
            STTS | CTTS => Some(TableKind::TimeToSample),
            STSC => Some(TableKind::SampleToChunk),
            STSZ => Some(TableKind::SampleSize),
            STCO => Some(TableKind::ChunkOffset32),
            CO64 => Some(TableKind::ChunkOffset64),
            STSS => Some(TableKind::SyncSample),
            _ => None,
        }
    }

    /// Body offset of the entry count.
    fn count_offset(self) -> usize {
        match self {
            TableKind::SampleSize => 8,
            _ => 4,
        }
    }

    fn entry_width(self) -> u64 {
        match self {
            TableKind::TimeToSample | TableKind::ChunkOffset64 => 8,
            TableKind::SampleToChunk => 12,
            _ => 4,
        }
    }

    fn max_entries(self) -> u32 {
        match self {
            TableKind::SampleToChunk | TableKind::SyncSample => MAX_SPARSE_ENTRIES,
            _ => MAX_ENTRIES,
        }
    }
}

fn be_u32_at(body: &[u8], offset: usize) -> Option<u32> {
    let bytes: [u8; 4] = body.get(offset..offset + 4)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Outcome of decoding one table.
enum Decoded {
    Entries(TableEntries),
    Broken(String),
}

/// Decodes every sample table in `atoms`, one read at a time in offset order, then removes the
/// broken ones.
///
/// A table that can't be read is reported through [`Diagnostics::report`] and removed like a
/// broken one when errors are ignored.
pub async fn decode_tables<R: ChunkedReader>(
    reader: &mut R,
    atoms: &mut Atoms,
    config: &Config,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let file_size = reader.size();
    let table_ids: Vec<(AtomId, TableKind)> = atoms
        .ids()
        .filter_map(|id| {
            let atom = atoms.get(id)?;
            TableKind::of(atom.atom_type).map(|kind| (id, kind))
        })
        .collect();

    let mut decoded = 0usize;
    for (id, kind) in table_ids {
        let Some(atom) = atoms.get(id) else { continue };
        let outcome = decode_table(reader, atom, kind, file_size).await;
        let Some(atom) = atoms.get_mut(id) else { continue };
        match outcome {
            Err(err) => {
                diagnostics.report(Stage::SampleTable, config, err)?;
                atom.broken = true;
            }
            Ok(Decoded::Entries(entries)) => {
                trace!(atom_type = %atom.atom_type, offset = atom.offset, "decoded table");
                atom.entries = Some(entries);
                decoded += 1;
            }
            Ok(Decoded::Broken(reason)) => {
                atom.broken = true;
                diagnostics.push(
                    Stage::SampleTable,
                    ErrorKind::BrokenTable,
                    format!("{} at offset {}: {reason}", atom.atom_type, atom.offset),
                );
            }
        }
    }

    let before = atoms.len();
    atoms.retain(|atom| !atom.broken);
    debug!(decoded, broken = before - atoms.len(), "sample tables decoded");
    Ok(())
}

async fn decode_table<R: ChunkedReader>(
    reader: &mut R,
    atom: &Atom,
    kind: TableKind,
    file_size: u64,
) -> Result<Decoded> {
    let body = atom.body();
    let count_offset = kind.count_offset();
    let Some(count) = be_u32_at(body, count_offset) else {
        return Ok(Decoded::Broken("header is truncated".to_string()));
    };
    if count == 0 {
        return Ok(Decoded::Broken("entry count is zero".to_string()));
    }
    if count > kind.max_entries() {
        return Ok(Decoded::Broken(format!(
            "entry count {count} exceeds {}",
            kind.max_entries()
        )));
    }

    // a uniform sample size carries no table
    if kind == TableKind::SampleSize {
        if let Some(sample_size) = be_u32_at(body, 4).filter(|size| *size != 0) {
            return Ok(Decoded::Entries(
                SampleSizeAtom::uniform(sample_size, count).into(),
            ));
        }
    }

    let table_len = count_offset as u64 + 4 + u64::from(count) * kind.entry_width();
    let data = if body.len() as u64 >= table_len {
        body[..table_len as usize].to_vec()
    } else {
        let len = table_len as usize;
        let offset = atom.body_offset();
        let data = reader
            .read_at(offset, len)
            .await
            .map_err(|err| Error::io(err, offset, len))?;
        if data.len() < len {
            return Ok(Decoded::Broken(format!(
                "short read, {} of {len} bytes",
                data.len()
            )));
        }
        data
    };

    let parsed = match kind {
        TableKind::TimeToSample => {
            TimeToSampleAtom::parse(atom.atom_type, &data).map(TableEntries::from)
        }
        TableKind::SampleToChunk => SampleToChunkAtom::parse(atom.atom_type, &data).map(|mut stsc| {
            stsc.normalize();
            stsc.into()
        }),
        TableKind::SampleSize => SampleSizeAtom::parse(atom.atom_type, &data).map(TableEntries::from),
        TableKind::ChunkOffset32 | TableKind::ChunkOffset64 => {
            ChunkOffsetAtom::parse(atom.atom_type, &data).map(TableEntries::from)
        }
        TableKind::SyncSample => SyncSampleAtom::parse(atom.atom_type, &data).map(TableEntries::from),
    };
    let entries = match parsed {
        Ok(entries) => entries,
        Err(err) => return Ok(Decoded::Broken(err.to_string())),
    };

    match &entries {
        TableEntries::ChunkOffset(stco) if !stco.is_consistent(file_size) => Ok(Decoded::Broken(
            "chunk offsets are not increasing or point past the end of the file".to_string(),
        )),
        TableEntries::SampleSize(stsz) if stsz.entry_sizes.contains(&0) => {
            Ok(Decoded::Broken("sample size table has a zero entry".to_string()))
        }
        _ => Ok(Decoded::Entries(entries)),
    }
}
