/*!
 * Groups validated atoms into per-track sets.
 *
 * Runs of consecutive sample table and codec boxes form candidate spans. Each span then absorbs the
 * header boxes that precede it within its `trak`, gets classified as video, audio or timecode, and
 * is merged into that track's atom set.
 */

use derive_more::Display;
use tracing::{debug, trace};

use crate::{
    atom::{
        leaf::{hdlr::HDLR, stco_co64::CO64, stsc::STSC, stss::STSS, stsz::STSZ, stts::{CTTS, STTS}},
        schema, Atom, AtomId, Atoms, ChunkOffsetAtom, FourCC, HandlerType, SampleSizeAtom,
        SampleToChunkAtom, SyncSampleAtom, TableEntries, TimeToSampleAtom,
    },
    config::Config,
    diagnostics::{Diagnostics, Stage},
    error::{Error, ErrorKind, Result},
};

const fn fourcc(name: &[u8; 4]) -> FourCC {
    FourCC::new(name)
}

/// Box types that make up the body of a track's sample table.
const TABLE_TYPES: &[FourCC] = &[
    fourcc(b"stsd"),
    fourcc(b"stts"),
    fourcc(b"stsc"),
    fourcc(b"stsz"),
    fourcc(b"stco"),
    fourcc(b"ctts"),
    fourcc(b"stss"),
    fourcc(b"sdtp"),
    fourcc(b"co64"),
];

/// Header boxes a span picks up while walking backwards.
const HEADER_TYPES: &[FourCC] = &[
    fourcc(b"hdlr"),
    fourcc(b"tkhd"),
    fourcc(b"mdhd"),
    fourcc(b"vmhd"),
    fourcc(b"smhd"),
    fourcc(b"nmhd"),
    fourcc(b"gmhd"),
    fourcc(b"edts"),
    fourcc(b"elst"),
    fourcc(b"dref"),
    fourcc(b"tref"),
    fourcc(b"tmcd"),
];

const TRAK: FourCC = fourcc(b"trak");
const VMHD: FourCC = fourcc(b"vmhd");
const SMHD: FourCC = fourcc(b"smhd");
const NMHD: FourCC = fourcc(b"nmhd");
const GMHD: FourCC = fourcc(b"gmhd");
const TKHD: FourCC = fourcc(b"tkhd");

fn is_codec(atom_type: FourCC) -> bool {
    schema::VIDEO_CODECS.contains(&atom_type)
        || schema::VIDEO_CODEC_EXTENSIONS.contains(&atom_type)
        || schema::AUDIO_CODECS.contains(&atom_type)
        || schema::AUDIO_CODEC_EXTENSIONS.contains(&atom_type)
}

fn is_chain_member(atom_type: FourCC) -> bool {
    TABLE_TYPES.contains(&atom_type)
        || is_codec(atom_type)
        || schema::TIMECODE_CODECS.contains(&atom_type)
        || schema::is_filler(atom_type)
}

/// Types that end the backward walk: anything belonging to another span, a track boundary or a
/// top level box.
fn stops_walk(atom_type: FourCC) -> bool {
    TABLE_TYPES.contains(&atom_type)
        || atom_type == TRAK
        || is_codec(atom_type)
        || schema::LEVEL0.contains(&atom_type)
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackKind {
    #[display("video")]
    Video,
    #[display("audio")]
    Audio,
    #[display("timecode")]
    Timecode,
}

impl TrackKind {
    pub const ALL: [TrackKind; 3] = [TrackKind::Video, TrackKind::Audio, TrackKind::Timecode];

    /// 0 for video, 1 for audio, 2 for timecode.
    pub fn index(self) -> usize {
        match self {
            TrackKind::Video => 0,
            TrackKind::Audio => 1,
            TrackKind::Timecode => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn handler_type(self) -> HandlerType {
        match self {
            TrackKind::Video => HandlerType::Video,
            TrackKind::Audio => HandlerType::Audio,
            TrackKind::Timecode => HandlerType::Timecode,
        }
    }

    fn from_handler(handler: HandlerType) -> Option<Self> {
        match handler {
            HandlerType::Video => Some(TrackKind::Video),
            HandlerType::Audio => Some(TrackKind::Audio),
            HandlerType::Timecode => Some(TrackKind::Timecode),
            HandlerType::Unknown(_) => None,
        }
    }
}

/// The atoms of one track, at most one per box type.
#[derive(Debug, Clone)]
pub struct Track {
    pub kind: TrackKind,
    atoms: Vec<AtomId>,
}

impl Track {
    fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            atoms: Vec::new(),
        }
    }

    pub fn atom_ids(&self) -> &[AtomId] {
        &self.atoms
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Adds a span's atoms, replacing any atom of the same type already held.
    fn merge(&mut self, atoms: &Atoms, span: &[AtomId]) {
        for &id in span {
            let Some(atom_type) = atoms.get(id).map(|atom| atom.atom_type) else {
                continue;
            };
            let existing = self
                .atoms
                .iter()
                .position(|held| atoms.get(*held).map(|atom| atom.atom_type) == Some(atom_type));
            match existing {
                Some(index) => self.atoms[index] = id,
                None => self.atoms.push(id),
            }
        }
        self.atoms.sort();
    }
}

/// Video, audio and timecode tracks; any of them may be empty.
#[derive(Debug, Clone)]
pub struct Tracks([Track; 3]);

impl Default for Tracks {
    fn default() -> Self {
        Self(TrackKind::ALL.map(Track::new))
    }
}

impl Tracks {
    pub fn get(&self, kind: TrackKind) -> &Track {
        &self.0[kind.index()]
    }

    fn get_mut(&mut self, kind: TrackKind) -> &mut Track {
        &mut self.0[kind.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.0.iter()
    }

    pub fn view<'a>(&'a self, atoms: &'a Atoms, kind: TrackKind) -> TrackView<'a> {
        TrackView {
            kind,
            track: self.get(kind),
            atoms,
        }
    }
}

/// Borrowed view of one track's atoms with typed access to its decoded tables.
#[derive(Clone, Copy)]
pub struct TrackView<'a> {
    pub kind: TrackKind,
    track: &'a Track,
    atoms: &'a Atoms,
}

impl<'a> TrackView<'a> {
    pub fn is_empty(&self) -> bool {
        self.track.is_empty()
    }

    pub fn atoms(&self) -> impl Iterator<Item = &'a Atom> + 'a {
        let atoms = self.atoms;
        self.track.atoms.iter().filter_map(move |id| atoms.get(*id))
    }

    pub fn atom(&self, atom_type: &[u8; 4]) -> Option<&'a Atom> {
        self.atoms().find(|atom| atom.atom_type == atom_type)
    }

    fn entries(&self, atom_type: &[u8; 4]) -> Option<&'a TableEntries> {
        self.atom(atom_type).and_then(|atom| atom.entries.as_ref())
    }

    pub fn stts(&self) -> Option<&'a TimeToSampleAtom> {
        match self.entries(STTS) {
            Some(TableEntries::TimeToSample(stts)) => Some(stts),
            _ => None,
        }
    }

    pub fn ctts(&self) -> Option<&'a TimeToSampleAtom> {
        match self.entries(CTTS) {
            Some(TableEntries::TimeToSample(ctts)) => Some(ctts),
            _ => None,
        }
    }

    pub fn stsc(&self) -> Option<&'a SampleToChunkAtom> {
        match self.entries(STSC) {
            Some(TableEntries::SampleToChunk(stsc)) => Some(stsc),
            _ => None,
        }
    }

    pub fn stsz(&self) -> Option<&'a SampleSizeAtom> {
        match self.entries(STSZ) {
            Some(TableEntries::SampleSize(stsz)) => Some(stsz),
            _ => None,
        }
    }

    /// The 32-bit chunk offset table, or the 64-bit one when there is none.
    pub fn chunk_offsets(&self) -> Option<&'a ChunkOffsetAtom> {
        [b"stco", CO64]
            .into_iter()
            .find_map(|atom_type| match self.entries(atom_type) {
                Some(TableEntries::ChunkOffset(stco)) => Some(stco),
                _ => None,
            })
    }

    pub fn stss(&self) -> Option<&'a SyncSampleAtom> {
        match self.entries(STSS) {
            Some(TableEntries::SyncSample(stss)) => Some(stss),
            _ => None,
        }
    }

    /// The sample entry box naming the track's codec.
    pub fn codec(&self) -> Option<&'a Atom> {
        self.atoms().find(|atom| {
            schema::VIDEO_CODECS.contains(&atom.atom_type)
                || schema::AUDIO_CODECS.contains(&atom.atom_type)
        })
    }

    /// Number of samples, from the sample size table or else the time-to-sample table.
    pub fn sample_count(&self) -> u32 {
        if let Some(stsz) = self.stsz() {
            return u32::try_from(stsz.sample_count()).unwrap_or(u32::MAX);
        }
        self.stts()
            .map(|stts| u32::try_from(stts.sample_count()).unwrap_or(u32::MAX))
            .unwrap_or(0)
    }
}

/// Splits the atom list into runs of consecutive sample table and codec boxes. Fillers don't break
/// a run; a repeated box type starts a new one.
fn find_spans(atoms: &Atoms) -> Vec<Vec<AtomId>> {
    let mut spans = Vec::new();
    let mut current: Vec<AtomId> = Vec::new();
    let mut current_types: Vec<FourCC> = Vec::new();

    let mut close = |current: &mut Vec<AtomId>, current_types: &mut Vec<FourCC>| {
        if current.len() > 1 {
            spans.push(std::mem::take(current));
        } else {
            current.clear();
        }
        current_types.clear();
    };

    for (index, atom) in atoms.iter().enumerate() {
        let atom_type = atom.atom_type;
        if !is_chain_member(atom_type) {
            close(&mut current, &mut current_types);
            continue;
        }
        if schema::is_filler(atom_type) {
            continue;
        }
        if current_types.contains(&atom_type) {
            close(&mut current, &mut current_types);
        }
        current.push(AtomId(index));
        current_types.push(atom_type);
    }
    close(&mut current, &mut current_types);
    spans
}

/// Walks backwards from the start of `span` collecting header boxes until a boundary is hit.
fn extend_backward(atoms: &Atoms, span: Vec<AtomId>) -> Vec<AtomId> {
    let Some(first) = span.iter().min().copied() else {
        return span;
    };
    let mut headers = Vec::new();
    for index in (0..first.index()).rev() {
        let atom_type = atoms[index].atom_type;
        if stops_walk(atom_type) {
            break;
        }
        if HEADER_TYPES.contains(&atom_type) {
            headers.push(AtomId(index));
        }
    }
    headers.reverse();
    headers.extend(span);
    headers
}

fn handler_of(atom: &Atom) -> Option<HandlerType> {
    HandlerType::from_body(atom.body())
}

/// Reads the track id out of a track header, honoring the version's field widths.
fn track_id(tkhd: &Atom) -> Option<u32> {
    let body = tkhd.body();
    let offset = if body.first() == Some(&1) { 20 } else { 12 };
    let bytes: [u8; 4] = body.get(offset..offset + 4)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

fn classify(atoms: &Atoms, span: &[AtomId]) -> Option<TrackKind> {
    let members = || span.iter().filter_map(|id| atoms.get(*id));

    if members().any(|atom| atom.atom_type == VMHD || schema::VIDEO_CODECS.contains(&atom.atom_type)) {
        return Some(TrackKind::Video);
    }
    if members().any(|atom| atom.atom_type == SMHD || schema::AUDIO_CODECS.contains(&atom.atom_type)) {
        return Some(TrackKind::Audio);
    }
    if members().any(|atom| atom.atom_type == NMHD || atom.atom_type == GMHD) {
        return Some(TrackKind::Timecode);
    }
    if let Some(kind) = members()
        .filter(|atom| atom.atom_type == TKHD)
        .filter_map(track_id)
        .find_map(|id| id.checked_sub(1).and_then(|index| TrackKind::from_index(index as usize)))
    {
        return Some(kind);
    }
    members()
        .filter(|atom| atom.atom_type == HDLR)
        .filter_map(handler_of)
        .find_map(TrackKind::from_handler)
}

/// Groups `atoms` into tracks. Reports [`ErrorKind::TracksNotFound`] when neither a video nor an
/// audio track could be reconstructed.
pub fn reconstruct(
    atoms: &Atoms,
    config: &Config,
    diagnostics: &mut Diagnostics,
) -> Result<Tracks> {
    let mut tracks = Tracks::default();

    for span in find_spans(atoms) {
        let span: Vec<AtomId> = extend_backward(atoms, span)
            .into_iter()
            .filter(|id| {
                atoms.get(*id).is_some_and(|atom| {
                    atom.atom_type != HDLR || handler_of(atom).is_some_and(|h| h.is_known())
                })
            })
            .collect();

        let Some(kind) = classify(atoms, &span) else {
            debug!(
                first = ?span.first().and_then(|id| atoms.get(*id)).map(|atom| atom.offset),
                len = span.len(),
                "dropping unclassified span"
            );
            continue;
        };
        trace!(%kind, len = span.len(), "classified span");
        tracks.get_mut(kind).merge(atoms, &span);
    }

    for track in tracks.iter() {
        debug!(kind = %track.kind, atoms = track.atoms.len(), "track reconstructed");
    }

    if tracks.get(TrackKind::Video).is_empty() && tracks.get(TrackKind::Audio).is_empty() {
        diagnostics.report(Stage::Tracks, config, Error::new(ErrorKind::TracksNotFound))?;
    }
    Ok(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::RawData;

    fn atom(atom_type: &[u8; 4], offset: u64, size: u64, body: &[u8]) -> Atom {
        let mut atom = Atom::new(FourCC(*atom_type), offset, size, 8);
        atom.prefix = RawData(body.to_vec());
        atom
    }

    fn hdlr_body(subtype: &[u8; 4]) -> Vec<u8> {
        let mut body = vec![0u8; 8];
        body.extend(subtype);
        body.extend([0u8; 13]);
        body
    }

    fn tkhd_body(track_id: u32) -> Vec<u8> {
        let mut body = vec![0u8; 84];
        body[12..16].copy_from_slice(&track_id.to_be_bytes());
        body
    }

    /// Lays out a trak holding the given header and table box types, one after another.
    fn trak(offset: u64, headers: &[(&[u8; 4], Vec<u8>)], tables: &[&[u8; 4]]) -> Vec<Atom> {
        let mut atoms = vec![atom(b"trak", offset, 1000, &[])];
        let mut pos = offset + 8;
        for (atom_type, body) in headers {
            atoms.push(atom(atom_type, pos, 20, body));
            pos += 20;
        }
        for atom_type in tables {
            atoms.push(atom(atom_type, pos, 20, &[]));
            pos += 20;
        }
        atoms
    }

    fn types(atoms: &Atoms, track: &Track) -> Vec<String> {
        track
            .atom_ids()
            .iter()
            .map(|id| atoms[id.index()].atom_type.to_string())
            .collect()
    }

    #[test]
    fn test_classifies_by_media_header_and_codec() {
        let mut list = trak(
            0,
            &[(b"tkhd", tkhd_body(7)), (b"hdlr", hdlr_body(b"vide")), (b"vmhd", vec![])],
            &[b"stsd", b"avc1", b"avcC", b"stts", b"stsc", b"stsz", b"stco"],
        );
        list.extend(trak(
            1000,
            &[(b"tkhd", tkhd_body(9)), (b"hdlr", hdlr_body(b"soun"))],
            &[b"stsd", b"mp4a", b"esds", b"stts", b"stsc", b"stsz", b"stco"],
        ));
        let atoms = Atoms::from_sorted(list);
        let mut diagnostics = Diagnostics::new();
        let tracks = reconstruct(&atoms, &Config::default(), &mut diagnostics).unwrap();

        assert!(diagnostics.is_empty());
        assert_eq!(
            types(&atoms, tracks.get(TrackKind::Video)),
            vec!["tkhd", "hdlr", "vmhd", "stsd", "avc1", "avcC", "stts", "stsc", "stsz", "stco"]
        );
        let audio = tracks.view(&atoms, TrackKind::Audio);
        assert_eq!(audio.codec().map(|a| a.atom_type.to_string()), Some("mp4a".to_string()));
        assert!(tracks.get(TrackKind::Timecode).is_empty());
    }

    #[test]
    fn test_falls_back_to_track_id_then_handler() {
        // no media header or codec boxes: the track id decides
        let mut list = trak(0, &[(b"tkhd", tkhd_body(2))], &[b"stts", b"stsz"]);
        // unknown track id: the handler decides
        list.extend(trak(
            1000,
            &[(b"tkhd", tkhd_body(40)), (b"hdlr", hdlr_body(b"vide"))],
            &[b"stts", b"stsz"],
        ));
        let atoms = Atoms::from_sorted(list);
        let tracks = reconstruct(&atoms, &Config::default(), &mut Diagnostics::new()).unwrap();
        assert_eq!(types(&atoms, tracks.get(TrackKind::Audio)), vec!["tkhd", "stts", "stsz"]);
        assert_eq!(
            types(&atoms, tracks.get(TrackKind::Video)),
            vec!["tkhd", "hdlr", "stts", "stsz"]
        );
    }

    #[test]
    fn test_drops_foreign_handlers_and_single_boxes() {
        let mut list = trak(
            0,
            &[
                (b"hdlr", hdlr_body(b"vide")),
                (b"vmhd", vec![]),
                (b"hdlr", hdlr_body(b"alis")),
            ],
            &[b"stts", b"free", b"stsz"],
        );
        // a lone table box never forms a span
        list.push(atom(b"udta", 1500, 20, &[]));
        list.push(atom(b"stco", 2000, 20, &[]));
        let atoms = Atoms::from_sorted(list);
        let tracks = reconstruct(&atoms, &Config::default(), &mut Diagnostics::new()).unwrap();
        assert_eq!(
            types(&atoms, tracks.get(TrackKind::Video)),
            vec!["hdlr", "vmhd", "stts", "stsz"]
        );
    }

    #[test]
    fn test_later_span_replaces_same_types() {
        let mut list = trak(0, &[(b"vmhd", vec![])], &[b"stts", b"stsz"]);
        list.extend(trak(1000, &[(b"vmhd", vec![])], &[b"stts", b"stsz", b"stss"]));
        let atoms = Atoms::from_sorted(list);
        let tracks = reconstruct(&atoms, &Config::default(), &mut Diagnostics::new()).unwrap();
        let offsets: Vec<u64> = tracks
            .view(&atoms, TrackKind::Video)
            .atoms()
            .map(|atom| atom.offset)
            .collect();
        assert_eq!(offsets, vec![1008, 1028, 1048, 1068]);
    }

    #[test]
    fn test_reports_missing_tracks() {
        let atoms = Atoms::from_sorted(vec![atom(b"ftyp", 0, 20, &[]), atom(b"free", 20, 20, &[])]);
        let mut diagnostics = Diagnostics::new();
        let tracks = reconstruct(&atoms, &Config::default(), &mut diagnostics).unwrap();
        assert!(tracks.iter().all(Track::is_empty));
        assert!(diagnostics.contains(ErrorKind::TracksNotFound));

        let strict = Config::builder().ignore_errors(false).build();
        let err = reconstruct(&atoms, &strict, &mut Diagnostics::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TracksNotFound);
    }
}
