/*!
 * Discovers box headers in a byte stream delivered in fixed-size chunks.
 *
 * Every position whose four bytes spell a known box type is a candidate; the four bytes before it
 * are read as the box size. Bytes near the end of a chunk are carried into the next one so a
 * header straddling a boundary is seen whole.
 */

use std::{collections::HashMap, ops::Range};
use tracing::{debug, trace};

use crate::{
    atom::{schema, Atom, FourCC, RawData},
    config::Config,
    diagnostics::{Diagnostics, Stage},
    error::{Error, ErrorKind, Result},
    parser::ParseObserver,
    reader::ChunkedReader,
};

const MDAT: FourCC = FourCC::new(b"mdat");

#[derive(Debug, Default)]
pub struct ScanResult {
    /// Atoms in scan order (ascending offset)
    pub atoms: Vec<Atom>,
    /// Byte range of the first media-data box large enough to be the real one
    pub mdat: Option<Range<u64>>,
}

pub struct Scanner {
    file_size: u64,
    prefix_size: usize,
    /// Bytes not yet fully scanned, starting at absolute offset `base`
    pending: Vec<u8>,
    base: u64,
    /// Next candidate type-code position within `pending`
    scan_from: usize,
    consumed: u64,
    last_percent: Option<u8>,
    ordinals: HashMap<FourCC, usize>,
    result: ScanResult,
}

impl Scanner {
    pub fn new(file_size: u64, prefix_size: usize) -> Self {
        Self {
            file_size,
            prefix_size,
            pending: Vec::new(),
            base: 0,
            scan_from: 4,
            consumed: 0,
            last_percent: None,
            ordinals: HashMap::new(),
            result: ScanResult::default(),
        }
    }

    /// Bytes kept back at the end of every non-final chunk: the longest prefix plus the 4 byte type
    /// code, or the extended size field, whichever is longer.
    fn carry(&self) -> usize {
        self.prefix_size.max(8) + 4
    }

    /// Scans the next chunk of the file. Chunks must be fed in order and `is_last` set on the final
    /// one.
    pub fn feed(&mut self, chunk: &[u8], is_last: bool) {
        self.pending.extend_from_slice(chunk);
        self.consumed += chunk.len() as u64;

        let len = self.pending.len();
        let limit = if is_last {
            len
        } else {
            len.saturating_sub(self.carry())
        };

        let mut pos = self.scan_from;
        while pos < limit && pos + 4 <= len {
            if let Some(descriptor) = schema::lookup(&self.pending[pos..pos + 4]) {
                if let Some(atom) = self.candidate(pos, descriptor.name) {
                    self.accept(atom);
                }
            }
            pos += 1;
        }
        self.scan_from = self.scan_from.max(limit);

        let drained = self.scan_from.saturating_sub(4).min(len);
        self.pending.drain(..drained);
        self.base += drained as u64;
        self.scan_from -= drained;
    }

    /// Reads the header around a type code found at `pos`.
    fn candidate(&self, pos: usize, atom_type: FourCC) -> Option<Atom> {
        let size_bytes: [u8; 4] = self.pending.get(pos - 4..pos)?.try_into().ok()?;
        let mut size = u64::from(u32::from_be_bytes(size_bytes));
        let mut header_size = 8u8;
        if size == 1 {
            let extended: [u8; 8] = self.pending.get(pos + 4..pos + 12)?.try_into().ok()?;
            size = u64::from_be_bytes(extended);
            header_size = 16;
        }
        if size >= self.file_size || size < u64::from(header_size) {
            return None;
        }

        let offset = self.base + (pos - 4) as u64;
        let data_len = (size - 8).min(self.prefix_size as u64) as usize;
        let prefix_end = self.pending.len().min(pos + 4 + data_len);
        let mut atom = Atom::new(atom_type, offset, size, header_size);
        atom.prefix = RawData(self.pending[pos + 4..prefix_end].to_vec());
        Some(atom)
    }

    fn accept(&mut self, mut atom: Atom) {
        if let Some(mdat) = &self.result.mdat {
            atom.in_mdat = atom.offset > mdat.start && atom.offset < mdat.end;
        } else if atom.atom_type == MDAT && atom.size > self.file_size / 2 {
            self.result.mdat = Some(atom.offset..atom.next());
        }

        let ordinal = self.ordinals.entry(atom.atom_type).or_insert(0);
        atom.id = *ordinal;
        *ordinal += 1;

        trace!(
            atom_type = %atom.atom_type,
            offset = atom.offset,
            size = atom.size,
            in_mdat = atom.in_mdat,
            "found atom"
        );
        self.result.atoms.push(atom);
    }

    /// Returns the next progress percentage when it advanced past the last one reported.
    pub fn progress_tick(&mut self) -> Option<u8> {
        let percent = if self.file_size == 0 {
            100
        } else {
            (self.consumed.min(self.file_size) * 100 / self.file_size) as u8
        };
        if self.last_percent.is_some_and(|last| percent <= last) {
            return None;
        }
        self.last_percent = Some(percent);
        Some(percent)
    }

    pub fn finish(self) -> ScanResult {
        debug!(
            atoms = self.result.atoms.len(),
            mdat = ?self.result.mdat,
            "scan complete"
        );
        self.result
    }
}

/// Scans the whole file in `config.chunk_size` reads, reporting progress to `observer`.
///
/// A failed read ends the scan early. When errors are ignored the failure is recorded and the atoms
/// found before it are kept.
pub async fn scan<R, O>(
    reader: &mut R,
    config: &Config,
    observer: &mut O,
    diagnostics: &mut Diagnostics,
) -> Result<ScanResult>
where
    R: ChunkedReader,
    O: ParseObserver,
{
    let file_size = reader.size();
    let chunk_size = config.chunk_size.max(1);
    let mut scanner = Scanner::new(file_size, config.prefix_size);

    let mut offset = 0u64;
    while offset < file_size {
        let len = chunk_size.min((file_size - offset) as usize);
        let chunk = match reader.read_at(offset, len).await {
            Ok(chunk) if !chunk.is_empty() => chunk,
            Ok(_) => {
                diagnostics.report(
                    Stage::Scanner,
                    config,
                    Error::new(ErrorKind::Io).at(offset, len),
                )?;
                scanner.feed(&[], true);
                break;
            }
            Err(err) => {
                diagnostics.report(Stage::Scanner, config, Error::io(err, offset, len))?;
                scanner.feed(&[], true);
                break;
            }
        };
        offset += chunk.len() as u64;
        scanner.feed(&chunk, offset >= file_size);
        if let Some(percent) = scanner.progress_tick() {
            observer.on_progress(percent);
        }
    }
    if file_size == 0 {
        if let Some(percent) = scanner.progress_tick() {
            observer.on_progress(percent);
        }
    }
    Ok(scanner.finish())
}
