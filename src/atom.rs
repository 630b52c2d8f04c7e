pub mod leaf;
pub mod schema;
pub(crate) mod util;

use derive_more::Deref;
use std::fmt;

pub use self::{
    leaf::{
        AudioSampleEntry, ChunkOffsetAtom, EditListAtom, FileTypeAtom, HandlerReferenceAtom,
        HandlerType, MediaHeaderAtom, MovieHeaderAtom, SampleSizeAtom, SampleToChunkAtom,
        SyncSampleAtom, TimeToSampleAtom, TrackHeaderAtom, VisualSampleEntry,
    },
    util::FourCC,
};

/// Index of an [`Atom`] in its owning [`Atoms`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AtomId(pub(crate) usize);

impl AtomId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Decoded sample table attached to an atom by the sample table decoder.
#[derive(Debug, Clone)]
pub enum TableEntries {
    TimeToSample(TimeToSampleAtom),
    SampleToChunk(SampleToChunkAtom),
    SampleSize(SampleSizeAtom),
    ChunkOffset(ChunkOffsetAtom),
    SyncSample(SyncSampleAtom),
}

impl From<TimeToSampleAtom> for TableEntries {
    fn from(atom: TimeToSampleAtom) -> Self {
        TableEntries::TimeToSample(atom)
    }
}

impl From<SampleToChunkAtom> for TableEntries {
    fn from(atom: SampleToChunkAtom) -> Self {
        TableEntries::SampleToChunk(atom)
    }
}

impl From<SampleSizeAtom> for TableEntries {
    fn from(atom: SampleSizeAtom) -> Self {
        TableEntries::SampleSize(atom)
    }
}

impl From<ChunkOffsetAtom> for TableEntries {
    fn from(atom: ChunkOffsetAtom) -> Self {
        TableEntries::ChunkOffset(atom)
    }
}

impl From<SyncSampleAtom> for TableEntries {
    fn from(atom: SyncSampleAtom) -> Self {
        TableEntries::SyncSample(atom)
    }
}

#[derive(Clone)]
pub struct RawData(pub Vec<u8>);

impl fmt::Debug for RawData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[u8; {}]", self.0.len())
    }
}

/// A box discovered by the scanner.
#[derive(Debug, Clone)]
pub struct Atom {
    pub atom_type: FourCC,
    /// Absolute file offset of the box header
    pub offset: u64,
    /// Total size including the header
    pub size: u64,
    /// 8, or 16 when the box uses an extended 64-bit size
    pub header_size: u8,
    /// Up to `prefix_size` bytes starting right after the type code
    pub prefix: RawData,
    /// Whether the box lies inside the media-data box
    pub in_mdat: bool,
    /// Whether this is the file's final box
    pub last: bool,
    pub entries: Option<TableEntries>,
    pub broken: bool,
    pub level: Option<u8>,
    /// Set when the box sits at a level its schema entry doesn't allow
    pub misplaced: bool,
    pub parent: Option<AtomId>,
    /// Ordinal among atoms of the same type, in scan order
    pub id: usize,
    /// Inserted by the validator in place of a box that couldn't be found
    pub synthetic: bool,
}

impl Atom {
    pub fn new(atom_type: FourCC, offset: u64, size: u64, header_size: u8) -> Self {
        Self {
            atom_type,
            offset,
            size,
            header_size,
            prefix: RawData(Vec::new()),
            in_mdat: false,
            last: false,
            entries: None,
            broken: false,
            level: None,
            misplaced: false,
            parent: None,
            id: 0,
            synthetic: false,
        }
    }

    /// Offset of the sibling that follows this box.
    pub fn next(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }

    /// Absolute offset of the first body byte.
    pub fn body_offset(&self) -> u64 {
        self.offset + self.header_size as u64
    }

    pub fn body_size(&self) -> u64 {
        self.size.saturating_sub(self.header_size as u64)
    }

    /// Buffered body bytes (the prefix minus any extended size field).
    pub fn body(&self) -> &[u8] {
        let skip = (self.header_size as usize).saturating_sub(8);
        self.prefix.0.get(skip..).unwrap_or_default()
    }

    /// Whether the buffered prefix holds the entire body.
    pub fn is_fully_buffered(&self) -> bool {
        self.body().len() as u64 >= self.body_size()
    }

    pub fn contains(&self, other: &Atom) -> bool {
        other.offset >= self.offset + 8 && other.next() <= self.next()
    }
}

/// Flat, offset-ordered arena of atoms. Parent links are [`AtomId`] indices into the arena.
#[derive(Debug, Default, Clone, Deref)]
pub struct Atoms(Vec<Atom>);

impl Atoms {
    /// Builds an arena from atoms already sorted by offset.
    pub(crate) fn from_sorted(atoms: Vec<Atom>) -> Self {
        debug_assert!(atoms.windows(2).all(|w| w[0].offset <= w[1].offset));
        Self(atoms)
    }

    pub fn into_inner(self) -> Vec<Atom> {
        self.0
    }

    pub fn get(&self, id: AtomId) -> Option<&Atom> {
        self.0.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: AtomId) -> Option<&mut Atom> {
        self.0.get_mut(id.0)
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, Atom> {
        self.0.iter_mut()
    }

    pub fn ids(&self) -> impl Iterator<Item = AtomId> + '_ {
        (0..self.0.len()).map(AtomId)
    }

    pub fn find(&self, atom_type: &[u8; 4]) -> impl Iterator<Item = (AtomId, &Atom)> + '_ {
        let atom_type = FourCC(*atom_type);
        self.0
            .iter()
            .enumerate()
            .filter(move |(_, atom)| atom.atom_type == atom_type)
            .map(|(index, atom)| (AtomId(index), atom))
    }

    pub fn first_of(&self, atom_type: &[u8; 4]) -> Option<&Atom> {
        self.find(atom_type).map(|(_, atom)| atom).next()
    }

    /// Finds the atom whose header starts at `offset`.
    pub fn at_offset(&self, offset: u64) -> Option<AtomId> {
        let start = self.0.partition_point(|atom| atom.offset < offset);
        self.0
            .get(start)
            .filter(|atom| atom.offset == offset)
            .map(|_| AtomId(start))
    }

    pub fn children(&self, parent: AtomId) -> impl Iterator<Item = (AtomId, &Atom)> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(move |(_, atom)| atom.parent == Some(parent))
            .map(|(index, atom)| (AtomId(index), atom))
    }

    /// The media-data box, if one survived validation.
    pub fn mdat(&self) -> Option<&Atom> {
        self.first_of(b"mdat")
    }

    /// Inserts an atom keeping offset order, and returns its id. Parent links are shifted accordingly.
    pub(crate) fn insert(&mut self, atom: Atom) -> AtomId {
        let index = self.0.partition_point(|a| a.offset <= atom.offset);
        self.0.insert(index, atom);
        for a in self.0.iter_mut() {
            if let Some(parent) = a.parent.as_mut() {
                if parent.0 >= index {
                    parent.0 += 1;
                }
            }
        }
        AtomId(index)
    }

    /// Keeps only the atoms matching `keep`, remapping parent links. Parents that are removed become `None`.
    pub(crate) fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Atom) -> bool,
    {
        let mut remap = Vec::with_capacity(self.0.len());
        let mut next_index = 0usize;
        for atom in self.0.iter() {
            if keep(atom) {
                remap.push(Some(next_index));
                next_index += 1;
            } else {
                remap.push(None);
            }
        }
        let mut index = 0usize;
        self.0.retain(|_| {
            let keep = remap[index].is_some();
            index += 1;
            keep
        });
        for atom in self.0.iter_mut() {
            atom.parent = atom
                .parent
                .and_then(|parent| remap.get(parent.0).copied().flatten())
                .map(AtomId);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(atom_type: &[u8; 4], offset: u64, size: u64) -> Atom {
        Atom::new(FourCC(*atom_type), offset, size, 8)
    }

    #[test]
    fn test_body_skips_extended_size() {
        let mut a = Atom::new(FourCC(*b"mdat"), 0, 32, 16);
        a.prefix = RawData(vec![0, 0, 0, 0, 0, 0, 0, 32, 1, 2, 3]);
        assert_eq!(a.body(), &[1, 2, 3]);
        assert_eq!(a.body_offset(), 16);
        assert!(!a.is_fully_buffered());
    }

    #[test]
    fn test_retain_remaps_parents() {
        let mut atoms = Atoms::from_sorted(vec![
            atom(b"moov", 0, 100),
            atom(b"free", 8, 8),
            atom(b"trak", 16, 84),
            atom(b"tkhd", 24, 20),
        ]);
        atoms.0[2].parent = Some(AtomId(0));
        atoms.0[3].parent = Some(AtomId(2));
        atoms.retain(|a| a.atom_type != b"free");
        assert_eq!(atoms.len(), 3);
        assert_eq!(atoms[1].parent, Some(AtomId(0)));
        assert_eq!(atoms[2].parent, Some(AtomId(1)));
    }

    #[test]
    fn test_insert_shifts_parents() {
        let mut atoms = Atoms::from_sorted(vec![atom(b"ftyp", 0, 16), atom(b"mvhd", 24, 20)]);
        atoms.0[1].parent = Some(AtomId(0));
        let id = atoms.insert(atom(b"moov", 16, 100));
        assert_eq!(id, AtomId(1));
        assert_eq!(atoms[2].parent, Some(AtomId(0)));
        assert_eq!(atoms.at_offset(16), Some(AtomId(1)));
        assert_eq!(atoms.at_offset(17), None);
    }
}
