use tracing::{debug, info};

use crate::{
    atom::{Atom, Atoms, FourCC},
    chunk_offset_builder::{build_chunks, Chunk},
    config::Config,
    diagnostics::Diagnostics,
    error::{Error, ErrorKind, Result},
    frame::{self, FrameLocation},
    media_params::{MediaInfo, MediaParams},
    reader::ChunkedReader,
    rebuild::{rebuild, Rebuilt},
    sample_table::decode_tables,
    samples::{list_samples, SampleInfo},
    scanner::scan,
    track::{reconstruct, TrackKind, TrackView, Tracks},
    tree::AtomTree,
    validator::{validate, HeaderSpot, Validated},
};

/// Synchronous parse of a fully buffered atom body
pub trait ParseAtom: Sized {
    fn parse(atom_type: FourCC, body: &[u8]) -> Result<Self, Error>;
}

/// Receives lifecycle notifications while a file is parsed.
///
/// Every method defaults to doing nothing.
pub trait ParseObserver {
    fn on_parse_start(&mut self) {}

    /// Scan progress in percent. Ticks never decrease and end at 100.
    fn on_progress(&mut self, _percent: u8) {}

    fn on_parse_end(&mut self, _parsed: &ParsedMp4) {}
}

impl ParseObserver for () {}

/// Runs the parse pipeline over a [`ChunkedReader`].
pub struct Parser<R> {
    reader: R,
    config: Config,
}

impl<R: ChunkedReader> Parser<R> {
    pub fn new(reader: R, config: Config) -> Self {
        Parser { reader, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    pub async fn parse(&mut self) -> Result<ParsedMp4> {
        self.parse_with(&mut ()).await
    }

    /// Scans, validates and decodes the file, then reconstructs its tracks and chunks.
    pub async fn parse_with<O: ParseObserver>(&mut self, observer: &mut O) -> Result<ParsedMp4> {
        observer.on_parse_start();
        let mut diagnostics = Diagnostics::new();
        let file_size = self.reader.size();

        let scanned = scan(&mut self.reader, &self.config, observer, &mut diagnostics).await?;
        let Validated { mut atoms, spot } =
            validate(scanned, file_size, &self.config, &mut diagnostics)?;
        decode_tables(&mut self.reader, &mut atoms, &self.config, &mut diagnostics).await?;

        let tracks = reconstruct(&atoms, &self.config, &mut diagnostics)?;
        let media_end = atoms.mdat().map_or(file_size, Atom::next).min(file_size);
        let chunks = build_chunks(&atoms, &tracks, media_end);
        let params = MediaParams::aggregate(&atoms, &tracks, &mut diagnostics);

        info!(
            atoms = atoms.len(),
            chunks = chunks.len(),
            diagnostics = diagnostics.len(),
            "parsed"
        );
        let parsed = ParsedMp4 {
            file_size,
            atoms,
            tracks,
            chunks,
            params,
            diagnostics,
            spot,
        };
        observer.on_parse_end(&parsed);
        Ok(parsed)
    }

    pub async fn rebuild(
        &mut self,
        parsed: &ParsedMp4,
        start: Option<&FrameLocation>,
        end: Option<&FrameLocation>,
    ) -> Result<Rebuilt> {
        parsed.rebuild(&mut self.reader, start, end, &self.config).await
    }

    pub async fn cut_frames(&mut self, parsed: &ParsedMp4, start: u32, end: u32) -> Result<Rebuilt> {
        parsed
            .cut_frames(&mut self.reader, start, end, &self.config)
            .await
    }

    pub async fn cut_time(&mut self, parsed: &ParsedMp4, start: f64, end: f64) -> Result<Rebuilt> {
        parsed
            .cut_time(&mut self.reader, start, end, &self.config)
            .await
    }

    pub async fn samples(&mut self, parsed: &ParsedMp4) -> Result<Vec<SampleInfo>> {
        parsed.samples(&mut self.reader).await
    }
}

/// Everything the parse pipeline recovered from one file.
#[derive(Debug)]
pub struct ParsedMp4 {
    pub file_size: u64,
    pub atoms: Atoms,
    pub tracks: Tracks,
    /// Chunks of the video and audio tracks in ascending offset order
    pub chunks: Vec<Chunk>,
    pub params: MediaParams,
    pub diagnostics: Diagnostics,
    pub spot: Option<HeaderSpot>,
}

impl ParsedMp4 {
    pub fn track(&self, kind: TrackKind) -> TrackView<'_> {
        self.tracks.view(&self.atoms, kind)
    }

    /// Number of video samples.
    pub fn frame_count(&self) -> u32 {
        self.track(TrackKind::Video).sample_count()
    }

    pub fn info(&self) -> MediaInfo {
        self.params.info()
    }

    pub fn tree(&self) -> AtomTree {
        AtomTree::new(&self.atoms)
    }

    /// Locates the 1-based video sample `index`.
    pub fn locate_frame(&self, index: u32) -> Result<FrameLocation> {
        frame::locate_frame(&self.chunks, &self.track(TrackKind::Video), index)
    }

    /// Maps a presentation time in seconds to a 1-based video sample.
    pub fn frame_at_time(&self, seconds: f64) -> Result<u32> {
        let timescale = self
            .params
            .video
            .mdhd_timescale
            .filter(|timescale| *timescale != 0)
            .or_else(|| self.params.video_timescale.map(|timescale| timescale as u32))
            .unwrap_or_default();
        frame::frame_at_time(&self.track(TrackKind::Video), timescale, seconds)
    }

    pub async fn rebuild<R: ChunkedReader>(
        &self,
        reader: &mut R,
        start: Option<&FrameLocation>,
        end: Option<&FrameLocation>,
        config: &Config,
    ) -> Result<Rebuilt> {
        rebuild(reader, self, start, end, config).await
    }

    /// Rebuilds the file keeping video samples `start..=end`, clamped to the available frames.
    pub async fn cut_frames<R: ChunkedReader>(
        &self,
        reader: &mut R,
        start: u32,
        end: u32,
        config: &Config,
    ) -> Result<Rebuilt> {
        let start = start.max(1);
        let end = end.min(self.frame_count());
        if end < start {
            return Err(Error::new(ErrorKind::InvalidFrameRange));
        }
        let first = self.locate_frame(start)?;
        let last = self.locate_frame(end)?;
        debug!(start, end, "cutting frames");
        self.rebuild(reader, Some(&first), Some(&last), config).await
    }

    /// Rebuilds the file keeping the frames shown between `start` and `end` seconds. An end past
    /// the last frame keeps everything up to it.
    pub async fn cut_time<R: ChunkedReader>(
        &self,
        reader: &mut R,
        start: f64,
        end: f64,
        config: &Config,
    ) -> Result<Rebuilt> {
        let first = self.frame_at_time(start.max(0.0))?;
        let last = match self.frame_at_time(end) {
            Err(err) if err.kind() == ErrorKind::IndexOutOfRange => self.frame_count(),
            frame => frame?,
        };
        self.cut_frames(reader, first, last, config).await
    }

    /// Lists every sample of every chunk, reading each chunk once.
    pub async fn samples<R: ChunkedReader>(&self, reader: &mut R) -> Result<Vec<SampleInfo>> {
        list_samples(reader, &self.chunks).await
    }
}

#[cfg(test)]
mod tests {
    use futures_util::io::Cursor;

    use super::*;
    use crate::reader::SeekableReader;

    fn boxed(atom_type: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut data = ((body.len() + 8) as u32).to_be_bytes().to_vec();
        data.extend(atom_type);
        data.extend(body);
        data
    }

    #[derive(Default)]
    struct Events(Vec<String>);

    impl ParseObserver for Events {
        fn on_parse_start(&mut self) {
            self.0.push("start".to_string());
        }

        fn on_progress(&mut self, percent: u8) {
            if percent == 100 {
                self.0.push("100".to_string());
            }
        }

        fn on_parse_end(&mut self, parsed: &ParsedMp4) {
            self.0.push(format!("end {}", parsed.file_size));
        }
    }

    #[tokio::test]
    async fn test_lifecycle_notifications() {
        let mut file = boxed(b"ftyp", b"isom\0\0\0\0isom");
        file.extend(boxed(b"free", &[0u8; 16]));
        let size = file.len();
        let reader = SeekableReader::new(Cursor::new(file)).await.unwrap();
        let mut parser = Parser::new(reader, Config::default());
        let mut events = Events::default();
        let parsed = parser.parse_with(&mut events).await.unwrap();

        assert_eq!(events.0, vec!["start".to_string(), "100".to_string(), format!("end {size}")]);
        assert!(parsed.diagnostics.contains(ErrorKind::TracksNotFound));
        assert!(parsed.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_strict_mode_stops_on_garbage() {
        let reader = SeekableReader::new(Cursor::new(vec![0u8; 256])).await.unwrap();
        let config = Config::builder().ignore_errors(false).build();
        let err = Parser::new(reader, config).parse().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoAtoms);
    }
}
