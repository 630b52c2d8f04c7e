/*!
 * Skeleton of a rebuilt file: one ftyp, one uuid marker, a moov holding a video and an audio
 * track, a free box and the media data header.
 *
 * Nodes are listed in output order. A node either carries bytes of its own (`copy`) or is a bare
 * 8 byte container header; either way its final size also counts its children.
 */

use crate::{atom::FourCC, track::TrackKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeId {
    Ftyp,
    Uuid,
    Moov,
    Mvhd,
    VideoTrak,
    VideoTkhd,
    VideoMdia,
    VideoMdhd,
    VideoHdlr,
    VideoMinf,
    VideoVmhd,
    VideoStbl,
    VideoStsd,
    VideoCodec,
    VideoCtts,
    VideoStts,
    VideoStsc,
    VideoStsz,
    VideoStco,
    VideoStss,
    AudioTrak,
    AudioTkhd,
    AudioMdia,
    AudioMdhd,
    AudioHdlr,
    AudioMinf,
    AudioSmhd,
    AudioStbl,
    AudioStsd,
    AudioCodec,
    AudioStts,
    AudioStsc,
    AudioStsz,
    AudioStco,
    Free,
    Mdat,
}

#[derive(Debug)]
pub struct TemplateNode {
    pub id: NodeId,
    /// Box type; codec nodes are renamed after the source codec at rebuild time
    pub name: FourCC,
    pub level: u8,
    pub parent: Option<NodeId>,
    /// Whether the node carries bytes of its own rather than only a container header
    pub copy: bool,
    pub track: Option<TrackKind>,
}

const fn node(
    id: NodeId,
    name: &[u8; 4],
    level: u8,
    parent: Option<NodeId>,
    copy: bool,
    track: Option<TrackKind>,
) -> TemplateNode {
    TemplateNode {
        id,
        name: FourCC::new(name),
        level,
        parent,
        copy,
        track,
    }
}

const VIDEO: Option<TrackKind> = Some(TrackKind::Video);
const AUDIO: Option<TrackKind> = Some(TrackKind::Audio);

use NodeId::*;

pub const TEMPLATE: &[TemplateNode] = &[
    node(Ftyp, b"ftyp", 0, None, true, None),
    node(Uuid, b"uuid", 0, None, true, None),
    node(Moov, b"moov", 0, None, false, None),
    node(Mvhd, b"mvhd", 1, Some(Moov), true, None),
    node(VideoTrak, b"trak", 1, Some(Moov), false, VIDEO),
    node(VideoTkhd, b"tkhd", 2, Some(VideoTrak), true, VIDEO),
    node(VideoMdia, b"mdia", 2, Some(VideoTrak), false, VIDEO),
    node(VideoMdhd, b"mdhd", 3, Some(VideoMdia), true, VIDEO),
    node(VideoHdlr, b"hdlr", 3, Some(VideoMdia), true, VIDEO),
    node(VideoMinf, b"minf", 3, Some(VideoMdia), false, VIDEO),
    node(VideoVmhd, b"vmhd", 4, Some(VideoMinf), true, VIDEO),
    node(VideoStbl, b"stbl", 4, Some(VideoMinf), false, VIDEO),
    node(VideoStsd, b"stsd", 5, Some(VideoStbl), true, VIDEO),
    node(VideoCodec, b"avc1", 6, Some(VideoStsd), true, VIDEO),
    node(VideoCtts, b"ctts", 5, Some(VideoStbl), true, VIDEO),
    node(VideoStts, b"stts", 5, Some(VideoStbl), true, VIDEO),
    node(VideoStsc, b"stsc", 5, Some(VideoStbl), true, VIDEO),
    node(VideoStsz, b"stsz", 5, Some(VideoStbl), true, VIDEO),
    node(VideoStco, b"co64", 5, Some(VideoStbl), true, VIDEO),
    node(VideoStss, b"stss", 5, Some(VideoStbl), true, VIDEO),
    node(AudioTrak, b"trak", 1, Some(Moov), false, AUDIO),
    node(AudioTkhd, b"tkhd", 2, Some(AudioTrak), true, AUDIO),
    node(AudioMdia, b"mdia", 2, Some(AudioTrak), false, AUDIO),
    node(AudioMdhd, b"mdhd", 3, Some(AudioMdia), true, AUDIO),
    node(AudioHdlr, b"hdlr", 3, Some(AudioMdia), true, AUDIO),
    node(AudioMinf, b"minf", 3, Some(AudioMdia), false, AUDIO),
    node(AudioSmhd, b"smhd", 4, Some(AudioMinf), true, AUDIO),
    node(AudioStbl, b"stbl", 4, Some(AudioMinf), false, AUDIO),
    node(AudioStsd, b"stsd", 5, Some(AudioStbl), true, AUDIO),
    node(AudioCodec, b"mp4a", 6, Some(AudioStsd), true, AUDIO),
    node(AudioStts, b"stts", 5, Some(AudioStbl), true, AUDIO),
    node(AudioStsc, b"stsc", 5, Some(AudioStbl), true, AUDIO),
    node(AudioStsz, b"stsz", 5, Some(AudioStbl), true, AUDIO),
    node(AudioStco, b"co64", 5, Some(AudioStbl), true, AUDIO),
    node(Free, b"free", 0, None, true, None),
    node(Mdat, b"mdat", 0, None, true, None),
];

impl NodeId {
    /// Position of the node in [`TEMPLATE`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn node(self) -> &'static TemplateNode {
        &TEMPLATE[self.index()]
    }
}

pub fn children(parent: NodeId) -> impl Iterator<Item = &'static TemplateNode> {
    TEMPLATE
        .iter()
        .filter(move |node| node.parent == Some(parent))
}
