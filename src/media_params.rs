/*!
 * Cross-checks the redundant duration, timescale and dimension fields of the header boxes.
 *
 * Every quantity is resolved as the median of its non-zero candidates, so one corrupted field
 * can't drag the result away the way it would drag a mean.
 */

use std::fmt;
use tracing::debug;

use crate::{
    atom::{
        leaf::{elst::ELST, ftyp::FTYP, mdhd::MDHD, mvhd::MVHD, tkhd::TKHD},
        util::{median, seconds},
        Atom, Atoms, AudioSampleEntry, EditListAtom, FileTypeAtom, FourCC, MediaHeaderAtom,
        MovieHeaderAtom, TrackHeaderAtom, VisualSampleEntry,
    },
    diagnostics::{Diagnostics, Stage},
    error::ErrorKind,
    parser::ParseAtom,
    track::{TrackKind, TrackView, Tracks},
};

/// Median of the non-zero candidates. Zero marks a field that was never filled in.
fn nonzero_median<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = u64>,
{
    median(values.into_iter().filter(|value| *value != 0))
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Parses a fully buffered atom, recording a diagnostic when its body doesn't parse.
fn parse_buffered<T: ParseAtom>(atom: &Atom, diagnostics: &mut Diagnostics) -> Option<T> {
    let body = atom.body();
    let body = body.get(..atom.body_size() as usize).unwrap_or(body);
    match T::parse(atom.atom_type, body) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            diagnostics.push(
                Stage::MediaParams,
                ErrorKind::AtomParsing,
                format!("{} at offset {}: {err}", atom.atom_type, atom.offset),
            );
            None
        }
    }
}

/// Header fields read from one track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackParams {
    pub tkhd_duration: Option<u64>,
    pub mdhd_duration: Option<u64>,
    pub mdhd_timescale: Option<u32>,
    pub elst_duration: Option<u64>,
    /// Whole pixels from the track header
    pub tkhd_width: Option<u32>,
    pub tkhd_height: Option<u32>,
    pub sample_count: u32,
}

impl TrackParams {
    fn read(view: &TrackView<'_>, diagnostics: &mut Diagnostics) -> Self {
        let mut params = TrackParams {
            sample_count: view.sample_count(),
            ..Default::default()
        };
        if let Some(tkhd) = view
            .atom(&TKHD.into_bytes())
            .and_then(|atom| parse_buffered::<TrackHeaderAtom>(atom, diagnostics))
        {
            params.tkhd_duration = Some(tkhd.duration);
            params.tkhd_width = Some(tkhd.pixel_width());
            params.tkhd_height = Some(tkhd.pixel_height());
        }
        if let Some(mdhd) = view
            .atom(&MDHD.into_bytes())
            .and_then(|atom| parse_buffered::<MediaHeaderAtom>(atom, diagnostics))
        {
            params.mdhd_duration = Some(mdhd.duration);
            params.mdhd_timescale = Some(mdhd.timescale);
        }
        if let Some(elst) = view
            .atom(ELST)
            .and_then(|atom| parse_buffered::<EditListAtom>(atom, diagnostics))
        {
            params.elst_duration = Some(elst.total_duration());
        }
        params
    }
}

/// Raw candidates plus the values resolved from them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaParams {
    pub mvhd_duration: Option<u64>,
    pub mvhd_timescale: Option<u32>,
    pub video: TrackParams,
    pub audio: TrackParams,
    pub video_entry: Option<VisualSampleEntry>,
    pub audio_entry: Option<AudioSampleEntry>,
    pub brands: Vec<FourCC>,

    /// Median of every duration field
    pub duration: Option<f64>,
    /// Median of the durations describing the video track and the movie
    pub video_duration: Option<f64>,
    pub audio_duration: Option<f64>,
    pub video_timescale: Option<f64>,
    pub audio_timescale: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    /// Shortest of the movie and track header durations, in movie timescale units
    pub main_duration: Option<u64>,
}

impl MediaParams {
    /// Reads every header box of the file and its video and audio tracks, then resolves them.
    pub fn aggregate(atoms: &Atoms, tracks: &Tracks, diagnostics: &mut Diagnostics) -> Self {
        let mut params = MediaParams::default();

        if let Some(mvhd) = atoms
            .first_of(&MVHD.into_bytes())
            .filter(|atom| !atom.synthetic)
            .and_then(|atom| parse_buffered::<MovieHeaderAtom>(atom, diagnostics))
        {
            params.mvhd_duration = Some(mvhd.duration);
            params.mvhd_timescale = Some(mvhd.timescale);
        }
        if let Some(ftyp) = atoms
            .first_of(FTYP)
            .and_then(|atom| parse_buffered::<FileTypeAtom>(atom, diagnostics))
        {
            params.brands = ftyp.brands();
        }

        let video = tracks.view(atoms, TrackKind::Video);
        let audio = tracks.view(atoms, TrackKind::Audio);
        params.video = TrackParams::read(&video, diagnostics);
        params.audio = TrackParams::read(&audio, diagnostics);
        params.video_entry = video
            .codec()
            .and_then(|atom| parse_buffered::<VisualSampleEntry>(atom, diagnostics));
        params.audio_entry = audio
            .codec()
            .and_then(|atom| parse_buffered::<AudioSampleEntry>(atom, diagnostics));

        params.resolve();
        debug!(
            duration = ?params.duration,
            main_duration = ?params.main_duration,
            width = ?params.width,
            height = ?params.height,
            "media params resolved"
        );
        params
    }

    fn resolve(&mut self) {
        let (video, audio) = (&self.video, &self.audio);

        self.duration = nonzero_median(
            [
                video.mdhd_duration,
                video.tkhd_duration,
                video.elst_duration,
                audio.tkhd_duration,
                audio.elst_duration,
                self.mvhd_duration,
            ]
            .into_iter()
            .flatten(),
        );
        self.video_duration = nonzero_median(
            [
                video.mdhd_duration,
                video.tkhd_duration,
                video.elst_duration,
                self.mvhd_duration,
            ]
            .into_iter()
            .flatten(),
        );
        self.audio_duration =
            nonzero_median([audio.tkhd_duration, audio.elst_duration].into_iter().flatten());
        self.video_timescale = nonzero_median(
            [video.mdhd_timescale, self.mvhd_timescale]
                .into_iter()
                .flatten()
                .map(u64::from),
        );
        let sample_rate = self
            .audio_entry
            .as_ref()
            .map(|entry| entry.sample_rate.round() as u64);
        self.audio_timescale = nonzero_median(
            [audio.mdhd_timescale.map(u64::from), sample_rate]
                .into_iter()
                .flatten(),
        );

        let codec_width = self.video_entry.as_ref().map(|entry| u32::from(entry.width));
        let codec_height = self.video_entry.as_ref().map(|entry| u32::from(entry.height));
        self.width = nonzero_median(
            [video.tkhd_width, codec_width]
                .into_iter()
                .flatten()
                .map(u64::from),
        );
        self.height = nonzero_median(
            [video.tkhd_height, codec_height]
                .into_iter()
                .flatten()
                .map(u64::from),
        );

        self.main_duration = [self.mvhd_duration, video.tkhd_duration, audio.tkhd_duration]
            .into_iter()
            .flatten()
            .filter(|duration| *duration != 0)
            .min();
    }

    /// Timescale the main duration is expressed in.
    fn movie_timescale(&self) -> Option<u32> {
        self.mvhd_timescale
            .filter(|timescale| *timescale != 0)
            .or_else(|| self.video_timescale.map(|timescale| timescale as u32))
    }

    /// Playback length in seconds, unrounded.
    pub fn length_seconds(&self) -> Option<f64> {
        let duration = self.main_duration?;
        let timescale = self.movie_timescale()?;
        Some(seconds(duration, timescale)).filter(|length| *length > 0.0)
    }

    pub fn info(&self) -> MediaInfo {
        let length = self.length_seconds();
        let frame_count = self.video.sample_count;
        let frame_rate = length
            .filter(|_| frame_count != 0)
            .map(|length| round_to(frame_count as f64 / length, 3));
        MediaInfo {
            brands: self.brands.iter().map(ToString::to_string).collect(),
            length_seconds: length.map(|length| round_to(length, 2)),
            frame_rate,
            frame_count,
            video_codec: self.video_entry.as_ref().map(|entry| entry.codec),
            width: self.width.map(|width| width as u32),
            height: self.height.map(|height| height as u32),
            audio_codec: self.audio_entry.as_ref().map(|entry| entry.codec),
            channels: self.audio_entry.as_ref().map(|entry| entry.channel_count),
            sample_size: self.audio_entry.as_ref().map(|entry| entry.sample_size),
            sample_rate: self.audio_entry.as_ref().map(|entry| entry.sample_rate),
        }
    }
}

/// Summary of the file for display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub brands: Vec<String>,
    /// Rounded to 2 decimals
    pub length_seconds: Option<f64>,
    /// Rounded to 3 decimals
    pub frame_rate: Option<f64>,
    pub frame_count: u32,
    pub video_codec: Option<FourCC>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub audio_codec: Option<FourCC>,
    pub channels: Option<u16>,
    pub sample_size: Option<u16>,
    pub sample_rate: Option<f64>,
}

impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "brands:      {}", self.brands.join(", "))?;
        if let Some(length) = self.length_seconds {
            writeln!(f, "length:      {length:.2} s")?;
        }
        writeln!(f, "frames:      {}", self.frame_count)?;
        if let Some(frame_rate) = self.frame_rate {
            writeln!(f, "frame rate:  {frame_rate:.3} fps")?;
        }
        if let Some(codec) = self.video_codec {
            write!(f, "video:       {codec}")?;
            if let (Some(width), Some(height)) = (self.width, self.height) {
                write!(f, " {width}x{height}")?;
            }
            writeln!(f)?;
        }
        if let Some(codec) = self.audio_codec {
            write!(f, "audio:       {codec}")?;
            if let Some(channels) = self.channels {
                write!(f, " {channels} ch")?;
            }
            if let Some(sample_size) = self.sample_size {
                write!(f, " {sample_size} bit")?;
            }
            if let Some(sample_rate) = self.sample_rate {
                write!(f, " {sample_rate} Hz")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
