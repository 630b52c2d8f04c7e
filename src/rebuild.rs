/*!
 * Assembles a new, self-consistent file header around the surviving media chunks.
 *
 * The chunk list is narrowed to an optional frame range, the per-track sample tables are recomputed
 * for what is left, and the static [template](crate::template) is filled in node by node. Nodes
 * whose source box is missing are synthesized, a track without atoms is kept as a `skip` box, and
 * the chunk offset tables are finally pointed into the new media data box.
 */

use std::ops::Range;
use tracing::{debug, trace};

use crate::{
    atom::{
        leaf::{ftyp::FTYP, mvhd::MVHD},
        util::serializer::atom_header,
        Atom, ChunkOffsetAtom, FileTypeAtom, FourCC, HandlerReferenceAtom, MediaHeaderAtom,
        MovieHeaderAtom, SampleSizeAtom, SampleToChunkAtom, TimeToSampleAtom, TrackHeaderAtom,
    },
    chunk_offset_builder::{build_chunk_offsets, Chunk},
    config::Config,
    diagnostics::{Diagnostics, Stage},
    error::{Error, ErrorKind, Result},
    frame::FrameLocation,
    parser::{ParseAtom, ParsedMp4},
    reader::ChunkedReader,
    template::{NodeId, TEMPLATE},
    track::{TrackKind, TrackView},
    writer::SerializeAtom,
};

/// Opaque filler type standing in for nodes with nothing to describe.
const SKIP: FourCC = FourCC::new(b"skip");

/// User type of the marker box placed after `ftyp`.
pub const MARKER_USER_TYPE: &[u8; 16] = b"mp4-repair-build";

/// Body of the `free` box reserved after the movie box.
const FREE_SPACE: usize = 1016;

const MEDIA_DATA_HEADER: u64 = 16;

/// Output of a rebuild: the header buffer plus the source byte ranges that follow it.
#[derive(Debug)]
pub struct Rebuilt {
    /// Every node up to and including the media data header
    pub header: Vec<u8>,
    /// Surviving chunk bytes in the source file, in output order
    pub payload: Vec<Range<u64>>,
    /// Surviving chunks after boundary trimming, with their source offsets
    pub chunks: Vec<Chunk>,
    /// Size of the media data box body
    pub data_size: u64,
    pub diagnostics: Diagnostics,
}

impl Rebuilt {
    /// Total size of the rebuilt file.
    pub fn file_size(&self) -> u64 {
        self.header.len() as u64 + self.data_size
    }
}

/// Per-track timing recomputed for the surviving samples.
#[derive(Debug, Default)]
struct TrackTiming {
    stts: Option<TimeToSampleAtom>,
    ctts: Option<TimeToSampleAtom>,
    samples: u32,
    duration: u64,
}

impl TrackTiming {
    fn compute(view: &TrackView<'_>, chunks: &[Chunk]) -> Self {
        let track_chunks: Vec<&Chunk> = chunks.iter().filter(|c| c.track == view.kind).collect();
        let Some(first) = track_chunks.iter().map(|c| c.samples.start).min() else {
            return Self::default();
        };
        let count: usize = track_chunks.iter().map(|c| c.samples.sizes.len()).sum();
        let start = first.saturating_sub(1) as usize;

        let stts = view.stts().map(|stts| stts.slice(start, count));
        let ctts = view.ctts().map(|ctts| ctts.slice(start, count));
        let samples = stts.as_ref().map_or(count as u64, TimeToSampleAtom::sample_count);
        let samples = u32::try_from(samples).unwrap_or(u32::MAX);
        let duration = stts.as_ref().map_or(0, TimeToSampleAtom::total_duration);
        Self {
            stts,
            ctts,
            samples,
            duration,
        }
    }
}

/// Narrows `chunks` to the ones between the start and end frame's chunks and trims the boundary
/// chunks down to the selected samples.
fn select_chunks(
    chunks: &[Chunk],
    start: Option<&FrameLocation>,
    end: Option<&FrameLocation>,
) -> Vec<Chunk> {
    let mut selected: Vec<Chunk> = chunks
        .iter()
        .filter(|chunk| start.map_or(true, |start| chunk.offset >= start.chunk_start()))
        .filter(|chunk| end.map_or(true, |end| chunk.offset <= end.chunk_start()))
        .cloned()
        .collect();

    let boundary = |chunks: &[Chunk], location: &FrameLocation| -> Option<usize> {
        chunks.iter().position(|chunk| {
            chunk.track == TrackKind::Video && chunk.index == location.video.index
        })
    };

    // end first, so a range inside one chunk is cut from both sides
    if let Some(end) = end {
        if let Some(index) = boundary(&selected, end) {
            let chunk = &mut selected[index];
            chunk.size = end.chunk_offset + end.length as u64;
            chunk.samples.count = end.chunk_position;
            chunk.samples.sizes.truncate(end.chunk_position as usize);
        }
    }
    if let Some(start) = start {
        if let Some(index) = boundary(&selected, start) {
            let chunk = &mut selected[index];
            let skipped = start.chunk_position.saturating_sub(1);
            chunk.size = chunk.size.saturating_sub(start.chunk_offset);
            chunk.offset = start.offset;
            chunk.samples.start = start.sample;
            chunk.samples.count = chunk.samples.count.saturating_sub(skipped);
            let skipped = (skipped as usize).min(chunk.samples.sizes.len());
            chunk.samples.sizes.drain(..skipped);
        }
    }
    selected
}

/// Scales `value` by `to / from`, rounding to the nearest integer.
fn rescale(value: u64, from: u64, to: u64) -> Option<u64> {
    (from != 0).then(|| (value as f64 / from as f64 * to as f64).round() as u64)
}

/// Full body of a source atom, from its buffered prefix when possible.
async fn source_body<R: ChunkedReader>(reader: &mut R, atom: &Atom) -> Result<Vec<u8>> {
    let len = atom.body_size() as usize;
    if atom.is_fully_buffered() {
        return Ok(atom.body()[..len].to_vec());
    }
    let offset = atom.body_offset();
    trace!(atom_type = %atom.atom_type, offset, len, "reading atom body");
    let body = reader
        .read_at(offset, len)
        .await
        .map_err(|err| Error::io(err, offset, len))?;
    if body.len() < len {
        return Err(Error::new(ErrorKind::Io).at(offset, len));
    }
    Ok(body)
}

/// A realized template node: its type and the bytes that follow its 8 byte header.
#[derive(Debug, Clone)]
struct Node {
    name: FourCC,
    body: Vec<u8>,
}

impl Node {
    fn new(name: FourCC, body: Vec<u8>) -> Self {
        Self { name, body }
    }

    fn skip(body: Vec<u8>) -> Self {
        Self::new(SKIP, body)
    }

    fn container(name: FourCC) -> Self {
        Self::new(name, Vec::new())
    }

    fn from_atom<A: SerializeAtom>(atom: A) -> Self {
        Self::new(atom.atom_type(), atom.into_body_bytes())
    }
}

struct NodeBuilder<'a, R> {
    reader: &'a mut R,
    parsed: &'a ParsedMp4,
    start: Option<&'a FrameLocation>,
    chunks: &'a [Chunk],
    timing: [TrackTiming; 2],
    movie_timescale: u32,
    movie_duration: Option<u64>,
    diagnostics: Diagnostics,
}

impl<'a, R: ChunkedReader> NodeBuilder<'a, R> {
    fn timing(&self, kind: TrackKind) -> &TrackTiming {
        match kind {
            TrackKind::Audio => &self.timing[1],
            _ => &self.timing[0],
        }
    }

    fn view(&self, kind: TrackKind) -> TrackView<'a> {
        let parsed: &'a ParsedMp4 = self.parsed;
        parsed.tracks.view(&parsed.atoms, kind)
    }

    fn track_chunks(&self, kind: TrackKind) -> impl Iterator<Item = &'a Chunk> + 'a {
        let chunks: &'a [Chunk] = self.chunks;
        chunks.iter().filter(move |chunk| chunk.track == kind)
    }

    fn media_timescale(&self, kind: TrackKind) -> Option<u32> {
        let params = &self.parsed.params;
        match kind {
            TrackKind::Video => params.video.mdhd_timescale,
            _ => params.audio.mdhd_timescale,
        }
        .filter(|timescale| *timescale != 0)
    }

    /// Parses a source atom, recording a diagnostic and returning `None` when it doesn't parse.
    async fn parse_source<T: ParseAtom>(&mut self, atom: &Atom) -> Result<Option<T>> {
        let body = source_body(self.reader, atom).await?;
        match T::parse(atom.atom_type, &body) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(err) => {
                self.diagnostics.push(
                    Stage::Rebuild,
                    ErrorKind::AtomParsing,
                    format!("{} at offset {}: {err}", atom.atom_type, atom.offset),
                );
                Ok(None)
            }
        }
    }

    /// Copies a source atom's body verbatim, or falls back to `default`.
    async fn copy_or(&mut self, atom: Option<&Atom>, name: FourCC, default: Vec<u8>) -> Result<Node> {
        match atom {
            Some(atom) => Ok(Node::new(name, source_body(self.reader, atom).await?)),
            None => Ok(Node::new(name, default)),
        }
    }

    async fn ftyp(&mut self) -> Result<Node> {
        let parsed: &'a ParsedMp4 = self.parsed;
        let atom = parsed.atoms.first_of(FTYP).filter(|atom| !atom.synthetic);
        match atom {
            Some(atom) => Ok(Node::new(atom.atom_type, source_body(self.reader, atom).await?)),
            None => Ok(Node::from_atom(FileTypeAtom::default())),
        }
    }

    async fn mvhd(&mut self) -> Result<Node> {
        let parsed: &'a ParsedMp4 = self.parsed;
        let source = parsed
            .atoms
            .first_of(&MVHD.into_bytes())
            .filter(|atom| !atom.synthetic);
        let parsed = match source {
            Some(atom) => self.parse_source::<MovieHeaderAtom>(atom).await?,
            None => None,
        };
        let video_duration = self.timing(TrackKind::Video).duration;
        let mvhd = match parsed {
            Some(mut mvhd) => {
                if let Some(duration) = self.movie_duration {
                    mvhd.duration = duration;
                }
                mvhd
            }
            None => MovieHeaderAtom::builder()
                .timescale(self.movie_timescale)
                .duration(self.movie_duration.unwrap_or(video_duration))
                .build(),
        };
        Ok(Node::from_atom(mvhd))
    }

    /// Track duration expressed in the movie timescale.
    fn track_duration(&self, kind: TrackKind) -> Option<u64> {
        let media_timescale = self.media_timescale(kind)?;
        rescale(
            self.timing(kind).duration,
            u64::from(media_timescale),
            u64::from(self.movie_timescale),
        )
    }

    async fn tkhd(&mut self, kind: TrackKind) -> Result<Node> {
        let duration = self.track_duration(kind);
        let parsed = match self.view(kind).atom(b"tkhd") {
            Some(atom) => match self.parse_source::<TrackHeaderAtom>(atom).await? {
                Some(tkhd) => Some(tkhd),
                None => return self.copy_or(Some(atom), atom.atom_type, Vec::new()).await,
            },
            None => None,
        };
        let tkhd = match parsed {
            Some(mut tkhd) => {
                if let Some(duration) = duration {
                    tkhd.duration = duration;
                }
                tkhd
            }
            None => {
                let duration = duration.unwrap_or_default();
                let track_id = kind.index() as u32 + 1;
                match kind {
                    TrackKind::Video => {
                        let entry = self.parsed.params.video_entry.as_ref();
                        TrackHeaderAtom::builder()
                            .track_id(track_id)
                            .duration(duration)
                            .width(entry.map_or(0, |entry| u32::from(entry.width) << 16))
                            .height(entry.map_or(0, |entry| u32::from(entry.height) << 16))
                            .build()
                    }
                    _ => TrackHeaderAtom::builder()
                        .track_id(track_id)
                        .duration(duration)
                        .layout(TrackHeaderAtom::audio_layout())
                        .build(),
                }
            }
        };
        Ok(Node::from_atom(tkhd))
    }

    async fn mdhd(&mut self, kind: TrackKind) -> Result<Node> {
        let duration = self.timing(kind).duration;
        let parsed = match self.view(kind).atom(b"mdhd") {
            Some(atom) => self.parse_source::<MediaHeaderAtom>(atom).await?,
            None => None,
        };
        let mdhd = match parsed {
            Some(mut mdhd) => {
                mdhd.duration = duration;
                mdhd
            }
            None => {
                let sample_rate = match kind {
                    TrackKind::Audio => self
                        .parsed
                        .params
                        .audio_entry
                        .as_ref()
                        .map(|entry| entry.sample_rate.round() as u32),
                    _ => None,
                };
                let timescale = self
                    .media_timescale(kind)
                    .or(sample_rate)
                    .filter(|timescale| *timescale != 0)
                    .unwrap_or(self.movie_timescale);
                MediaHeaderAtom::builder()
                    .timescale(timescale)
                    .duration(duration)
                    .build()
            }
        };
        Ok(Node::from_atom(mdhd))
    }

    async fn hdlr(&mut self, kind: TrackKind) -> Result<Node> {
        let source = self.view(kind).atoms().filter(|atom| atom.atom_type == b"hdlr").last();
        match source {
            Some(atom) => self.copy_or(Some(atom), atom.atom_type, Vec::new()).await,
            None => Ok(Node::from_atom(
                HandlerReferenceAtom::builder()
                    .handler_type(kind.handler_type())
                    .build(),
            )),
        }
    }

    /// The sample description header: version, flags and a single entry.
    fn stsd(&self, kind: TrackKind) -> Node {
        let mut body = self
            .view(kind)
            .atom(b"stsd")
            .and_then(|atom| atom.body().get(..8))
            .map(<[u8]>::to_vec)
            .unwrap_or_default();
        body.resize(8, 0);
        let entries: u32 = if self.view(kind).codec().is_some() { 1 } else { 0 };
        body[4..8].copy_from_slice(&entries.to_be_bytes());
        Node::new(FourCC::new(b"stsd"), body)
    }

    async fn codec(&mut self, kind: TrackKind) -> Result<Option<Node>> {
        match self.view(kind).codec() {
            Some(atom) => Ok(Some(Node::new(
                atom.atom_type,
                source_body(self.reader, atom).await?,
            ))),
            None => Ok(None),
        }
    }

    fn timing_table(&self, kind: TrackKind, composition: bool) -> Node {
        let timing = self.timing(kind);
        let table = if composition { &timing.ctts } else { &timing.stts };
        match table {
            Some(table) => Node::from_atom(table.clone()),
            None if composition => Node::skip(vec![0; 8]),
            None => Node::from_atom(TimeToSampleAtom::from_deltas(&[], false)),
        }
    }

    fn stsc(&self, kind: TrackKind) -> Node {
        let counts = self
            .track_chunks(kind)
            .map(|chunk| u32::try_from(chunk.samples.sizes.len()).unwrap_or(u32::MAX));
        Node::from_atom(SampleToChunkAtom::from_chunk_sample_counts(counts))
    }

    fn stsz(&self, kind: TrackKind) -> Node {
        let sizes: Vec<u32> = self
            .track_chunks(kind)
            .flat_map(|chunk| chunk.samples.sizes.iter().copied())
            .collect();
        Node::from_atom(SampleSizeAtom::from_sizes(sizes))
    }

    /// Chunk offsets of the track, relative to `base`.
    fn co64(&self, kind: TrackKind, output_offsets: &[u64], base: u64) -> Node {
        let offsets: Vec<u64> = if self.view(kind).chunk_offsets().is_some() {
            self.chunks
                .iter()
                .zip(output_offsets)
                .filter(|(chunk, _)| chunk.track == kind)
                .map(|(_, offset)| offset + base)
                .collect()
        } else {
            Vec::new()
        };
        Node::from_atom(
            ChunkOffsetAtom::builder()
                .chunk_offsets(offsets)
                .is_64bit(true)
                .build(),
        )
    }

    fn stss(&self, kind: TrackKind) -> Node {
        match self.view(kind).stss() {
            Some(stss) => {
                let first_sample = self.start.map_or(1, |start| start.sample);
                Node::from_atom(stss.shifted(first_sample, self.timing(kind).samples))
            }
            None => Node::skip(vec![0; 8]),
        }
    }

    async fn realize(&mut self, id: NodeId, output_offsets: &[u64], data_size: u64) -> Result<Option<Node>> {
        let template = id.node();
        let kind = template.track;
        let node = match (id, kind) {
            (NodeId::Ftyp, _) => self.ftyp().await?,
            (NodeId::Uuid, _) => Node::new(template.name, MARKER_USER_TYPE.to_vec()),
            (NodeId::Mvhd, _) => self.mvhd().await?,
            (NodeId::VideoTrak | NodeId::AudioTrak, Some(kind)) => {
                if self.view(kind).is_empty() {
                    debug!(%kind, "track has no atoms, emitting skip");
                    Node::container(SKIP)
                } else {
                    Node::container(template.name)
                }
            }
            (NodeId::VideoTkhd | NodeId::AudioTkhd, Some(kind)) => self.tkhd(kind).await?,
            (NodeId::VideoMdhd | NodeId::AudioMdhd, Some(kind)) => self.mdhd(kind).await?,
            (NodeId::VideoHdlr | NodeId::AudioHdlr, Some(kind)) => self.hdlr(kind).await?,
            (NodeId::VideoVmhd, Some(kind)) => {
                let source = self.view(kind).atom(b"vmhd");
                self.copy_or(source, template.name, vec![0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0])
                    .await?
            }
            (NodeId::AudioSmhd, Some(kind)) => {
                let source = self.view(kind).atom(b"smhd");
                self.copy_or(source, template.name, vec![0; 8]).await?
            }
            (NodeId::VideoStsd | NodeId::AudioStsd, Some(kind)) => self.stsd(kind),
            (NodeId::VideoCodec | NodeId::AudioCodec, Some(kind)) => {
                return self.codec(kind).await;
            }
            (NodeId::VideoCtts, Some(kind)) => self.timing_table(kind, true),
            (NodeId::VideoStts | NodeId::AudioStts, Some(kind)) => self.timing_table(kind, false),
            (NodeId::VideoStsc | NodeId::AudioStsc, Some(kind)) => self.stsc(kind),
            (NodeId::VideoStsz | NodeId::AudioStsz, Some(kind)) => self.stsz(kind),
            (NodeId::VideoStco | NodeId::AudioStco, Some(kind)) => {
                self.co64(kind, output_offsets, 0)
            }
            (NodeId::VideoStss, Some(kind)) => self.stss(kind),
            (NodeId::Free, _) => Node::new(template.name, vec![0; FREE_SPACE]),
            (NodeId::Mdat, _) => Node::new(
                template.name,
                (MEDIA_DATA_HEADER + data_size).to_be_bytes().to_vec(),
            ),
            _ => Node::container(template.name),
        };
        Ok(Some(node))
    }
}

/// Total size of a node: its header and body plus the sizes of its children.
fn node_size(id: NodeId, nodes: &[Option<Node>], memo: &mut [Option<u64>]) -> u64 {
    if let Some(size) = memo[id.index()] {
        return size;
    }
    let Some(node) = &nodes[id.index()] else {
        memo[id.index()] = Some(0);
        return 0;
    };
    let size = match id {
        NodeId::Mdat => MEDIA_DATA_HEADER,
        _ => {
            let children: u64 = TEMPLATE
                .iter()
                .filter(|child| child.parent == Some(id))
                .map(|child| node_size(child.id, nodes, memo))
                .sum();
            8 + node.body.len() as u64 + children
        }
    };
    memo[id.index()] = Some(size);
    size
}

fn serialize_node(id: NodeId, node: &Node, size: u64, out: &mut Vec<u8>) {
    match id {
        NodeId::Mdat => {
            out.extend(1u32.to_be_bytes());
            out.extend(node.name.into_bytes());
        }
        _ => out.extend(atom_header(node.name.into_bytes(), size - 8)),
    }
    out.extend_from_slice(&node.body);
}

/// Rebuilds the file around the chunks between `start` and `end` (inclusive frame locations).
/// Without bounds the whole file is rebuilt.
pub async fn rebuild<R: ChunkedReader>(
    reader: &mut R,
    parsed: &ParsedMp4,
    start: Option<&FrameLocation>,
    end: Option<&FrameLocation>,
    config: &Config,
) -> Result<Rebuilt> {
    let mut diagnostics = Diagnostics::new();

    let chunks = select_chunks(&parsed.chunks, start, end);
    if chunks.is_empty() {
        diagnostics.report(Stage::Rebuild, config, Error::new(ErrorKind::NoChunks))?;
    }
    let output_offsets = build_chunk_offsets(&chunks, 0);
    let data_size: u64 = chunks.iter().map(|chunk| chunk.size).sum();

    let video = parsed.tracks.view(&parsed.atoms, TrackKind::Video);
    let audio = parsed.tracks.view(&parsed.atoms, TrackKind::Audio);
    let timing = [
        TrackTiming::compute(&video, &chunks),
        TrackTiming::compute(&audio, &chunks),
    ];

    let source_video_samples: u64 = parsed
        .chunks
        .iter()
        .filter(|chunk| chunk.track == TrackKind::Video)
        .map(|chunk| chunk.samples.sizes.len() as u64)
        .sum();
    let params = &parsed.params;
    let movie_duration = params.mvhd_duration.and_then(|duration| {
        rescale(duration, source_video_samples, u64::from(timing[0].samples))
    });
    let movie_timescale = params
        .mvhd_timescale
        .or(params.video.mdhd_timescale)
        .filter(|timescale| *timescale != 0)
        .unwrap_or(1000);
    debug!(
        chunks = chunks.len(),
        data_size,
        video_samples = timing[0].samples,
        audio_samples = timing[1].samples,
        ?movie_duration,
        "rebuilding"
    );

    let mut builder = NodeBuilder {
        reader,
        parsed,
        start,
        chunks: &chunks,
        timing,
        movie_timescale,
        movie_duration,
        diagnostics,
    };

    let mut nodes: Vec<Option<Node>> = Vec::with_capacity(TEMPLATE.len());
    for template in TEMPLATE {
        let node = builder
            .realize(template.id, &output_offsets, data_size)
            .await?;
        trace!(
            id = ?template.id,
            name = ?node.as_ref().map(|node| node.name),
            "node realized"
        );
        nodes.push(node);
    }

    let mut memo = vec![None; TEMPLATE.len()];
    for template in TEMPLATE {
        node_size(template.id, &nodes, &mut memo);
    }

    // chunk offset tables point past the media data header
    let media_offset: u64 = TEMPLATE
        .iter()
        .take(NodeId::Mdat.index())
        .filter_map(|template| nodes[template.id.index()].as_ref())
        .map(|node| 8 + node.body.len() as u64)
        .sum();
    let base = media_offset + MEDIA_DATA_HEADER;
    for (id, kind) in [
        (NodeId::VideoStco, TrackKind::Video),
        (NodeId::AudioStco, TrackKind::Audio),
    ] {
        nodes[id.index()] = Some(builder.co64(kind, &output_offsets, base));
    }

    let mut header = Vec::with_capacity((base as usize).saturating_add(FREE_SPACE));
    for template in TEMPLATE {
        if let Some(node) = &nodes[template.id.index()] {
            let size = memo[template.id.index()].unwrap_or_default();
            serialize_node(template.id, node, size, &mut header);
        }
    }
    debug_assert_eq!(header.len() as u64, base);

    let diagnostics = builder.diagnostics;
    let payload = chunks.iter().map(Chunk::byte_range).collect();
    Ok(Rebuilt {
        header,
        payload,
        data_size,
        chunks,
        diagnostics,
    })
}
