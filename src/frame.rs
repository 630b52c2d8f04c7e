//! Maps video sample indices and presentation times to byte locations.

use crate::{
    atom::util::scaled,
    chunk_offset_builder::Chunk,
    error::{Error, ErrorKind, Result},
    track::{TrackKind, TrackView},
};

/// Where one video sample lives in the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLocation {
    /// 1-based global sample index
    pub sample: u32,
    /// 1-based position of the sample within its chunk
    pub chunk_position: u32,
    /// Bytes before the sample within its chunk
    pub chunk_offset: u64,
    /// Absolute offset of the sample
    pub offset: u64,
    pub length: u32,
    pub video: Chunk,
    /// First audio chunk stored after the video chunk
    pub audio: Option<Chunk>,
}

impl FrameLocation {
    /// Absolute offset of the chunk holding the sample.
    pub fn chunk_start(&self) -> u64 {
        self.video.offset
    }
}

/// Locates the 1-based video sample `index` among `chunks`.
pub fn locate_frame(chunks: &[Chunk], video: &TrackView<'_>, index: u32) -> Result<FrameLocation> {
    let (Some(stsz), Some(_), Some(_)) = (video.stsz(), video.stsc(), video.chunk_offsets()) else {
        return Err(Error::new(ErrorKind::FrameInfoUnavailable));
    };
    if chunks.is_empty() {
        return Err(Error::new(ErrorKind::FrameInfoUnavailable));
    }

    let sample_count = stsz.sample_count();
    if index == 0 || index as usize > sample_count {
        return Err(Error::new(ErrorKind::IndexOutOfRange));
    }

    let chunk = chunks
        .iter()
        .find(|chunk| chunk.track == TrackKind::Video && chunk.samples.contains(index))
        .ok_or_else(|| Error::new(ErrorKind::ChunkNotFound))?;
    let audio = chunks
        .iter()
        .find(|candidate| candidate.track == TrackKind::Audio && candidate.offset > chunk.offset)
        .cloned();

    let position = (index - chunk.samples.start) as usize;
    let chunk_offset: u64 = chunk.samples.sizes.iter().take(position).map(|size| *size as u64).sum();
    let length = chunk.samples.sizes.get(position).copied().unwrap_or(0);

    Ok(FrameLocation {
        sample: index,
        chunk_position: position as u32 + 1,
        chunk_offset,
        offset: chunk.offset + chunk_offset,
        length,
        video: chunk.clone(),
        audio,
    })
}

/// Returns the 1-based video sample whose decode interval contains `seconds`.
pub fn frame_at_time(video: &TrackView<'_>, timescale: u32, seconds: f64) -> Result<u32> {
    let stts = video
        .stts()
        .filter(|_| timescale != 0)
        .ok_or_else(|| Error::new(ErrorKind::FrameInfoUnavailable))?;
    let time = scaled(seconds, timescale);
    let sample = stts
        .sample_at_time(time)
        .ok_or_else(|| Error::new(ErrorKind::IndexOutOfRange))?;
    u32::try_from(sample + 1).map_err(|_| Error::new(ErrorKind::IndexOutOfRange))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        atom::{
            leaf::stsc::SampleToChunkEntry, Atom, Atoms, ChunkOffsetAtom, FourCC, SampleSizeAtom,
            SampleToChunkAtom, TimeToSampleAtom,
        },
        chunk_offset_builder::build_chunks,
        config::Config,
        diagnostics::Diagnostics,
        track::{reconstruct, Tracks},
    };

    /// A video track with 3 chunks of 4 samples followed by an audio track with 3 chunks of 1
    /// sample, interleaved in the media data.
    fn fixture() -> (Atoms, Tracks, Vec<Chunk>) {
        let table = |atom_type: &[u8; 4], offset: u64, entries: crate::atom::TableEntries| {
            let mut atom = Atom::new(FourCC(*atom_type), offset, 16, 8);
            atom.entries = Some(entries);
            atom
        };
        let stsc = |per_chunk: u32| {
            SampleToChunkAtom::builder()
                .entries(vec![SampleToChunkEntry::builder()
                    .first_chunk(1)
                    .samples_per_chunk(per_chunk)
                    .build()])
                .build()
        };
        let atoms = Atoms::from_sorted(vec![
            Atom::new(FourCC(*b"vmhd"), 0, 16, 8),
            table(b"stts", 16, TimeToSampleAtom::from_deltas(&[512; 12], false).into()),
            table(b"stsc", 32, stsc(4).into()),
            table(b"stsz", 48, SampleSizeAtom::from_sizes((1..=12).map(|i| i * 10).collect()).into()),
            table(
                b"stco",
                64,
                ChunkOffsetAtom::builder()
                    .chunk_offsets(vec![1000, 1200, 1500])
                    .build()
                    .into(),
            ),
            Atom::new(FourCC(*b"trak"), 80, 16, 8),
            Atom::new(FourCC(*b"smhd"), 96, 16, 8),
            table(b"stsc", 112, stsc(1).into()),
            table(b"stsz", 128, SampleSizeAtom::uniform(50, 3).into()),
            table(
                b"stco",
                144,
                ChunkOffsetAtom::builder()
                    .chunk_offsets(vec![1100, 1400, 1900])
                    .build()
                    .into(),
            ),
        ]);
        let tracks = reconstruct(&atoms, &Config::default(), &mut Diagnostics::new()).unwrap();
        let chunks = build_chunks(&atoms, &tracks, 1950);
        (atoms, tracks, chunks)
    }

    #[test]
    fn test_locates_sample_within_chunk() {
        let (atoms, tracks, chunks) = fixture();
        let video = tracks.view(&atoms, TrackKind::Video);
        let location = locate_frame(&chunks, &video, 7).unwrap();
        assert_eq!(location.video.index, 2);
        assert_eq!(location.chunk_position, 3);
        // samples 5 and 6 precede it: 50 + 60
        assert_eq!(location.chunk_offset, 110);
        assert_eq!(location.offset, 1310);
        assert_eq!(location.length, 70);
        assert_eq!(location.audio.map(|chunk| chunk.offset), Some(1400));
    }

    #[test]
    fn test_out_of_range() {
        let (atoms, tracks, chunks) = fixture();
        let video = tracks.view(&atoms, TrackKind::Video);
        let before = chunks.clone();
        for index in [0, 13] {
            let err = locate_frame(&chunks, &video, index).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::IndexOutOfRange);
        }
        assert_eq!(chunks, before);
    }

    #[test]
    fn test_unavailable_without_tables() {
        let (atoms, tracks, _) = fixture();
        let audio_as_video = tracks.view(&atoms, TrackKind::Timecode);
        let err = locate_frame(&[], &audio_as_video, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FrameInfoUnavailable);
    }

    #[test]
    fn test_frame_at_time() {
        let (atoms, tracks, _) = fixture();
        let video = tracks.view(&atoms, TrackKind::Video);
        // 512 ticks per sample at 12800 ticks per second = 25 fps
        assert_eq!(frame_at_time(&video, 12_800, 0.0).unwrap(), 1);
        assert_eq!(frame_at_time(&video, 12_800, 0.1).unwrap(), 3);
        assert_eq!(
            frame_at_time(&video, 12_800, 10.0).unwrap_err().kind(),
            ErrorKind::IndexOutOfRange
        );
    }
}
