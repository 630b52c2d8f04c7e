use std::ops::Range;

use crate::{
    atom::{Atoms, ChunkOffsetAtom, SampleSizeAtom, SampleToChunkAtom},
    track::{TrackKind, Tracks},
};

/// Consecutive samples held by one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRange {
    /// 1-based index of the first sample
    pub start: u32,
    pub count: u32,
    /// Byte size of each sample, sliced from the sample size table
    pub sizes: Vec<u32>,
}

impl SampleRange {
    /// 1-based index one past the last sample.
    pub fn end(&self) -> u32 {
        self.start.saturating_add(self.count)
    }

    pub fn contains(&self, sample: u32) -> bool {
        sample >= self.start && sample < self.end()
    }

    pub fn byte_len(&self) -> u64 {
        self.sizes.iter().map(|size| *size as u64).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub track: TrackKind,
    /// 1-based index within the owning track
    pub index: u32,
    /// Absolute offset of the chunk's bytes in the source file
    pub offset: u64,
    pub size: u64,
    pub samples: SampleRange,
}

impl Chunk {
    pub fn byte_range(&self) -> Range<u64> {
        self.offset..self.offset.saturating_add(self.size)
    }
}

struct ChunkOffsetBuilderTrack<'a> {
    kind: TrackKind,
    offsets: &'a ChunkOffsetAtom,
    stsc: Option<&'a SampleToChunkAtom>,
    sizes: Vec<u32>,
}

/// Merges the chunk offset tables of several tracks into one offset-ordered chunk list.
#[derive(Default)]
pub struct ChunkOffsetBuilder<'a> {
    tracks: Vec<ChunkOffsetBuilderTrack<'a>>,
}

impl<'a> ChunkOffsetBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tracks: Vec::with_capacity(capacity),
        }
    }

    pub fn add_track(
        &mut self,
        kind: TrackKind,
        offsets: &'a ChunkOffsetAtom,
        stsc: Option<&'a SampleToChunkAtom>,
        stsz: Option<&'a SampleSizeAtom>,
    ) {
        self.tracks.push(ChunkOffsetBuilderTrack {
            kind,
            offsets,
            stsc,
            sizes: stsz.map(SampleSizeAtom::sizes).unwrap_or_default(),
        })
    }

    /// Builds the chunk list in ascending offset order. Each chunk runs up to the next chunk of any
    /// track; the last one runs up to `media_end`.
    pub fn build_chunks(&self, media_end: u64) -> Vec<Chunk> {
        let mut placed: Vec<(u64, usize, u32)> = self
            .tracks
            .iter()
            .enumerate()
            .flat_map(|(track_index, track)| {
                track
                    .offsets
                    .chunk_offsets
                    .iter()
                    .zip(1u32..)
                    .map(move |(offset, index)| (*offset, track_index, index))
            })
            .collect();
        placed.sort_by_key(|(offset, track_index, _)| (*offset, *track_index));

        let ends: Vec<u64> = placed
            .iter()
            .skip(1)
            .map(|(offset, _, _)| *offset)
            .chain(std::iter::once(media_end))
            .collect();

        // running 1-based sample index per track
        let mut next_sample = vec![1u32; self.tracks.len()];
        placed
            .into_iter()
            .zip(ends)
            .map(|((offset, track_index, index), end)| {
                let track = &self.tracks[track_index];
                let count = track
                    .stsc
                    .and_then(|stsc| stsc.entry_for_chunk(index))
                    .map_or(0, |entry| entry.samples_per_chunk);
                let start = next_sample[track_index];
                next_sample[track_index] = start.saturating_add(count);

                let first = (start as usize - 1).min(track.sizes.len());
                let last = first.saturating_add(count as usize).min(track.sizes.len());
                Chunk {
                    track: track.kind,
                    index,
                    offset,
                    size: end.saturating_sub(offset),
                    samples: SampleRange {
                        start,
                        count,
                        sizes: track.sizes[first..last].to_vec(),
                    },
                }
            })
            .collect()
    }
}

/// Builds the chunk list for the video and audio tracks. Tracks without a chunk offset table
/// contribute no chunks.
pub fn build_chunks(atoms: &Atoms, tracks: &Tracks, media_end: u64) -> Vec<Chunk> {
    let views = [TrackKind::Video, TrackKind::Audio].map(|kind| tracks.view(atoms, kind));
    let mut builder = ChunkOffsetBuilder::with_capacity(views.len());
    for view in &views {
        if let Some(offsets) = view.chunk_offsets() {
            builder.add_track(view.kind, offsets, view.stsc(), view.stsz());
        }
    }
    builder.build_chunks(media_end)
}

/// Lays `chunks` out back to back from `start_offset`, returning each chunk's new offset.
pub fn build_chunk_offsets(chunks: &[Chunk], start_offset: u64) -> Vec<u64> {
    chunks
        .iter()
        .scan(start_offset, |current_offset, chunk| {
            let chunk_offset = *current_offset;
            *current_offset += chunk.size;
            Some(chunk_offset)
        })
        .collect()
}

/// New offsets of one track's chunks, in track order, when `chunks` are laid out from
/// `start_offset`.
pub fn track_chunk_offsets(chunks: &[Chunk], kind: TrackKind, start_offset: u64) -> Vec<u64> {
    chunks
        .iter()
        .zip(build_chunk_offsets(chunks, start_offset))
        .filter(|(chunk, _)| chunk.track == kind)
        .map(|(_, offset)| offset)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::leaf::stsc::SampleToChunkEntry;

    fn stsc(entries: &[(u32, u32)]) -> SampleToChunkAtom {
        SampleToChunkAtom::builder()
            .entries(entries.iter().map(|(first_chunk, samples_per_chunk)| {
                SampleToChunkEntry::builder()
                    .first_chunk(*first_chunk)
                    .samples_per_chunk(*samples_per_chunk)
                    .build()
            }))
            .build()
    }

    fn offsets(offsets: Vec<u64>) -> ChunkOffsetAtom {
        ChunkOffsetAtom::builder().chunk_offsets(offsets).build()
    }

    #[test]
    fn test_single_track_chunks() {
        let stsc = stsc(&[(1, 2), (3, 3)]);
        let stsz = SampleSizeAtom::from_sizes(vec![100, 200, 150, 250, 300, 400, 500]);
        let stco = offsets(vec![1000, 1300, 1700]);

        let mut builder = ChunkOffsetBuilder::new();
        builder.add_track(TrackKind::Video, &stco, Some(&stsc), Some(&stsz));
        let chunks = builder.build_chunks(2900);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].samples.sizes, vec![100, 200]);
        assert_eq!(chunks[1].samples.start, 3);
        assert_eq!(chunks[1].size, 400);
        assert_eq!(chunks[2].samples.start, 5);
        assert_eq!(chunks[2].samples.count, 3);
        assert_eq!(chunks[2].size, 1200);
        for chunk in &chunks {
            assert_eq!(chunk.samples.byte_len(), chunk.size);
        }
    }

    #[test]
    fn test_interleaved_tracks() {
        let video_stsc = stsc(&[(1, 2)]);
        let video_stsz = SampleSizeAtom::from_sizes(vec![100, 200, 150, 250]);
        let video_stco = offsets(vec![1000, 1600]);
        let audio_stsc = stsc(&[(1, 1)]);
        let audio_stsz = SampleSizeAtom::uniform(300, 2);
        let audio_stco = offsets(vec![1300, 2000]);

        let mut builder = ChunkOffsetBuilder::with_capacity(2);
        builder.add_track(TrackKind::Video, &video_stco, Some(&video_stsc), Some(&video_stsz));
        builder.add_track(TrackKind::Audio, &audio_stco, Some(&audio_stsc), Some(&audio_stsz));
        let chunks = builder.build_chunks(2300);

        let order: Vec<(TrackKind, u32, u64)> = chunks
            .iter()
            .map(|chunk| (chunk.track, chunk.index, chunk.size))
            .collect();
        assert_eq!(
            order,
            vec![
                (TrackKind::Video, 1, 300),
                (TrackKind::Audio, 1, 300),
                (TrackKind::Video, 2, 400),
                (TrackKind::Audio, 2, 300),
            ]
        );
        assert_eq!(chunks[3].samples.start, 2);

        assert_eq!(build_chunk_offsets(&chunks, 48), vec![48, 348, 648, 1048]);
        assert_eq!(track_chunk_offsets(&chunks, TrackKind::Audio, 0), vec![300, 1000]);
    }

    #[test]
    fn test_missing_tables() {
        let stco = offsets(vec![10, 20]);
        let mut builder = ChunkOffsetBuilder::new();
        builder.add_track(TrackKind::Audio, &stco, None, None);
        let chunks = builder.build_chunks(15);
        assert_eq!(chunks[0].samples.count, 0);
        assert!(chunks[0].samples.sizes.is_empty());
        // the last offset lies past the media end
        assert_eq!(chunks[1].size, 0);
    }
}
