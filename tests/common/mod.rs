#![allow(dead_code)]

use bon::Builder;
use futures_util::io::Cursor;

use mp4_repair::{
    atom::{
        ChunkOffsetAtom, FileTypeAtom, HandlerReferenceAtom, HandlerType, MediaHeaderAtom,
        MovieHeaderAtom, SampleSizeAtom, SampleToChunkAtom, SyncSampleAtom, TimeToSampleAtom,
        TrackHeaderAtom,
    },
    writer::SerializeAtom,
    Config, ParsedMp4, Parser, SeekableReader,
};

pub type MemoryReader = SeekableReader<Cursor<Vec<u8>>>;

pub const VIDEO_TIMESCALE: u32 = 600;
pub const VIDEO_DELTA: u32 = 20;
pub const AUDIO_TIMESCALE: u32 = 12_000;
pub const AUDIO_DELTA: u32 = 1_000;
pub const WIDTH: u16 = 320;
pub const HEIGHT: u16 = 240;

/// Describes a small interleaved movie: one video chunk, then one audio chunk, and so on.
#[derive(Debug, Clone, Builder)]
pub struct Fixture {
    #[builder(default = 60)]
    pub video_frames: u32,
    #[builder(default = 10)]
    pub frames_per_chunk: u32,
    #[builder(default = true)]
    pub audio: bool,
    #[builder(default = 4)]
    pub audio_samples_per_chunk: u32,
    #[builder(default = 10)]
    pub sync_interval: u32,
    /// Vary the video frame durations and add composition offsets
    #[builder(default = false)]
    pub varying_timing: bool,
}

pub struct Movie {
    pub bytes: Vec<u8>,
    pub video_sizes: Vec<u32>,
    pub video_offsets: Vec<u64>,
    pub audio_offsets: Vec<u64>,
    /// Offset of the first byte of media data
    pub data_start: u64,
}

pub fn boxed(atom_type: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut data = ((body.len() + 8) as u32).to_be_bytes().to_vec();
    data.extend(atom_type);
    data.extend(body);
    data
}

fn container(atom_type: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    boxed(atom_type, &children.concat())
}

/// Frame duration of video sample `index` (0-based) when timing varies: 20 for the first 20
/// frames, 10 for the next 20 and 30 after that.
pub fn varying_delta(index: u32) -> u32 {
    match index {
        0..=19 => 20,
        20..=39 => 10,
        _ => 30,
    }
}

/// Composition offset of video sample `index` (0-based): runs of four 0s and four 20s.
pub fn composition_offset(index: u32) -> u32 {
    if (index / 4) % 2 == 0 {
        0
    } else {
        20
    }
}

/// Size of video sample `index` (0-based).
pub fn video_sample_size(index: u32) -> u32 {
    100 + index % 7
}

pub const AUDIO_SAMPLE_SIZE: u32 = 50;

/// Payload byte for sample `index`. The high bit keeps media data from spelling a box type.
fn fill(index: u32) -> u8 {
    0x80 | (index % 0x7f) as u8
}

fn visual_entry() -> Vec<u8> {
    let mut body = vec![0u8; 6];
    body.extend(1u16.to_be_bytes());
    body.extend([0u8; 16]);
    body.extend(WIDTH.to_be_bytes());
    body.extend(HEIGHT.to_be_bytes());
    body.extend(0x0048_0000u32.to_be_bytes());
    body.extend(0x0048_0000u32.to_be_bytes());
    body.extend([0u8; 4]);
    body.extend(1u16.to_be_bytes());
    body.extend([0u8; 32]);
    body.extend(0x0018u16.to_be_bytes());
    body.extend((-1i16).to_be_bytes());
    body
}

fn audio_entry() -> Vec<u8> {
    let mut body = vec![0u8; 6];
    body.extend(1u16.to_be_bytes());
    body.extend([0u8; 8]);
    body.extend(2u16.to_be_bytes());
    body.extend(16u16.to_be_bytes());
    body.extend([0u8; 4]);
    body.extend((AUDIO_TIMESCALE << 16).to_be_bytes());
    body
}

fn sample_description(codec: &[u8; 4], entry: Vec<u8>) -> Vec<u8> {
    let mut body = vec![0u8; 4];
    body.extend(1u32.to_be_bytes());
    body.extend(boxed(codec, &entry));
    boxed(b"stsd", &body)
}

impl Fixture {
    fn video_chunk_counts(&self) -> Vec<u32> {
        let mut counts = Vec::new();
        let mut left = self.video_frames;
        while left > 0 {
            let count = left.min(self.frames_per_chunk);
            counts.push(count);
            left -= count;
        }
        counts
    }

    fn video_deltas(&self) -> Vec<u32> {
        (0..self.video_frames)
            .map(|i| {
                if self.varying_timing {
                    varying_delta(i)
                } else {
                    VIDEO_DELTA
                }
            })
            .collect()
    }

    fn video_duration(&self) -> u64 {
        self.video_deltas().iter().map(|delta| u64::from(*delta)).sum()
    }

    fn video_trak(&self, offsets: &[u64]) -> Vec<u8> {
        let frames = self.video_frames;
        let duration = self.video_duration();
        let tkhd = TrackHeaderAtom::builder()
            .creation_time(0)
            .modification_time(0)
            .track_id(1)
            .duration(duration * 1000 / u64::from(VIDEO_TIMESCALE))
            .width(u32::from(WIDTH) << 16)
            .height(u32::from(HEIGHT) << 16)
            .build()
            .into_bytes();
        let mdhd = MediaHeaderAtom::builder()
            .creation_time(0)
            .modification_time(0)
            .timescale(VIDEO_TIMESCALE)
            .duration(duration)
            .build()
            .into_bytes();
        let hdlr = HandlerReferenceAtom::builder()
            .handler_type(HandlerType::Video)
            .build()
            .into_bytes();
        let vmhd = boxed(b"vmhd", &[0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]);

        let sizes: Vec<u32> = (0..frames).map(video_sample_size).collect();
        let sync: Vec<u32> = (0..frames)
            .step_by(self.sync_interval.max(1) as usize)
            .map(|i| i + 1)
            .collect();
        let mut children = vec![
            sample_description(b"avc1", visual_entry()),
            TimeToSampleAtom::from_deltas(&self.video_deltas(), false).into_bytes(),
        ];
        if self.varying_timing {
            let composition: Vec<u32> = (0..frames).map(composition_offset).collect();
            children.push(TimeToSampleAtom::from_deltas(&composition, true).into_bytes());
        }
        children.extend([
            SyncSampleAtom::builder().sample_numbers(sync).build().into_bytes(),
            SampleToChunkAtom::from_chunk_sample_counts(self.video_chunk_counts()).into_bytes(),
            SampleSizeAtom::from_sizes(sizes).into_bytes(),
            ChunkOffsetAtom::builder()
                .chunk_offsets(offsets.to_vec())
                .build()
                .into_bytes(),
        ]);
        let stbl = container(b"stbl", &children);
        let minf = container(b"minf", &[vmhd, stbl]);
        let mdia = container(b"mdia", &[mdhd, hdlr, minf]);
        container(b"trak", &[tkhd, mdia])
    }

    fn audio_trak(&self, offsets: &[u64]) -> Vec<u8> {
        let samples = offsets.len() as u32 * self.audio_samples_per_chunk;
        let duration = u64::from(samples * AUDIO_DELTA);
        let tkhd = TrackHeaderAtom::builder()
            .creation_time(0)
            .modification_time(0)
            .track_id(2)
            .duration(duration * 1000 / u64::from(AUDIO_TIMESCALE))
            .layout(TrackHeaderAtom::audio_layout())
            .build()
            .into_bytes();
        let mdhd = MediaHeaderAtom::builder()
            .creation_time(0)
            .modification_time(0)
            .timescale(AUDIO_TIMESCALE)
            .duration(duration)
            .build()
            .into_bytes();
        let hdlr = HandlerReferenceAtom::builder()
            .handler_type(HandlerType::Audio)
            .build()
            .into_bytes();
        let smhd = boxed(b"smhd", &[0u8; 8]);

        let stbl = container(
            b"stbl",
            &[
                sample_description(b"mp4a", audio_entry()),
                TimeToSampleAtom::from_deltas(&vec![AUDIO_DELTA; samples as usize], false)
                    .into_bytes(),
                SampleToChunkAtom::from_chunk_sample_counts(
                    offsets.iter().map(|_| self.audio_samples_per_chunk),
                )
                .into_bytes(),
                SampleSizeAtom::uniform(AUDIO_SAMPLE_SIZE, samples).into_bytes(),
                ChunkOffsetAtom::builder()
                    .chunk_offsets(offsets.to_vec())
                    .build()
                    .into_bytes(),
            ],
        );
        let minf = container(b"minf", &[smhd, stbl]);
        let mdia = container(b"mdia", &[mdhd, hdlr, minf]);
        container(b"trak", &[tkhd, mdia])
    }

    fn header(&self, video_offsets: &[u64], audio_offsets: &[u64]) -> Vec<u8> {
        let mvhd = MovieHeaderAtom::builder()
            .creation_time(0)
            .modification_time(0)
            .timescale(1000)
            .duration(self.video_duration() * 1000 / u64::from(VIDEO_TIMESCALE))
            .build()
            .into_bytes();
        let mut moov = vec![mvhd, self.video_trak(video_offsets)];
        if self.audio {
            moov.push(self.audio_trak(audio_offsets));
        }

        let mut header = FileTypeAtom::default().into_bytes();
        header.extend(container(b"moov", &moov));
        header.extend(boxed(b"free", &[0u8; 1024]));
        header
    }

    /// Lays out the file, then fills in chunk offsets once the header size is known.
    pub fn build(&self) -> Movie {
        let counts = self.video_chunk_counts();
        let audio_chunks = if self.audio { counts.len() } else { 0 };

        let placeholder = self.header(&vec![0; counts.len()], &vec![0; audio_chunks]);
        let data_start = placeholder.len() as u64 + 8;

        let mut data = Vec::new();
        let mut video_offsets = Vec::new();
        let mut audio_offsets = Vec::new();
        let mut sample = 0u32;
        for (chunk, count) in counts.iter().enumerate() {
            video_offsets.push(data_start + data.len() as u64);
            for _ in 0..*count {
                data.extend(vec![fill(sample); video_sample_size(sample) as usize]);
                sample += 1;
            }
            if chunk < audio_chunks {
                audio_offsets.push(data_start + data.len() as u64);
                let len = (AUDIO_SAMPLE_SIZE * self.audio_samples_per_chunk) as usize;
                data.extend(vec![0xF0; len]);
            }
        }

        let mut bytes = self.header(&video_offsets, &audio_offsets);
        assert_eq!(bytes.len() as u64 + 8, data_start);
        bytes.extend(boxed(b"mdat", &data));

        Movie {
            bytes,
            video_sizes: (0..self.video_frames).map(video_sample_size).collect(),
            video_offsets,
            audio_offsets,
            data_start,
        }
    }
}

pub async fn reader(bytes: Vec<u8>) -> MemoryReader {
    SeekableReader::new(Cursor::new(bytes))
        .await
        .expect("in-memory reader")
}

pub async fn parse(bytes: Vec<u8>) -> (Parser<MemoryReader>, ParsedMp4) {
    parse_with(bytes, Config::default()).await
}

pub async fn parse_with(bytes: Vec<u8>, config: Config) -> (Parser<MemoryReader>, ParsedMp4) {
    let mut parser = Parser::new(reader(bytes).await, config);
    let parsed = parser.parse().await.expect("parse");
    (parser, parsed)
}
