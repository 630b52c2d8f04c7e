/*!
 * Typed views of the leaf boxes the pipeline decodes or synthesizes.
 */

pub mod elst;
pub mod ftyp;
pub mod hdlr;
pub mod mdhd;
pub mod mvhd;
pub mod sample_entry;
pub mod stco_co64;
pub mod stsc;
pub mod stss;
pub mod stsz;
pub mod stts;
pub mod tkhd;

pub use self::{
    elst::EditListAtom,
    ftyp::FileTypeAtom,
    hdlr::{HandlerReferenceAtom, HandlerType},
    mdhd::MediaHeaderAtom,
    mvhd::MovieHeaderAtom,
    sample_entry::{AudioSampleEntry, VisualSampleEntry},
    stco_co64::ChunkOffsetAtom,
    stsc::SampleToChunkAtom,
    stss::SyncSampleAtom,
    stsz::SampleSizeAtom,
    stts::TimeToSampleAtom,
    tkhd::TrackHeaderAtom,
};
