use std::fmt;
use tracing::trace;

use crate::{
    atom::util::DebugList,
    chunk_offset_builder::Chunk,
    error::{Error, ErrorKind, Result},
    reader::ChunkedReader,
    track::TrackKind,
};

/// Number of leading bytes kept from every sample.
pub const PREVIEW_SIZE: usize = 24;

/// One sample as stored in the source file.
#[derive(Clone, PartialEq, Eq)]
pub struct SampleInfo {
    pub track: TrackKind,
    /// 1-based index of the owning chunk within its track
    pub chunk: u32,
    /// Bytes before the sample within its chunk
    pub offset: u64,
    pub size: u32,
    pub preview: Vec<u8>,
}

impl SampleInfo {
    /// The preview with non-printable bytes replaced by dots.
    pub fn preview_text(&self) -> String {
        self.preview
            .iter()
            .map(|b| if b.is_ascii_graphic() || *b == b' ' { *b as char } else { '.' })
            .collect()
    }
}

impl fmt::Debug for SampleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleInfo")
            .field("track", &self.track)
            .field("chunk", &self.chunk)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("preview", &DebugList(&self.preview, 8))
            .finish()
    }
}

impl fmt::Display for SampleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} chunk {} +{} size {} {}",
            self.track,
            self.chunk,
            self.offset,
            self.size,
            self.preview_text()
        )
    }
}

/// Reads every chunk once, in order, and lists its samples.
pub async fn list_samples<R: ChunkedReader>(reader: &mut R, chunks: &[Chunk]) -> Result<Vec<SampleInfo>> {
    let mut samples = Vec::new();
    for chunk in chunks {
        let len = usize::try_from(chunk.size).map_err(|_| Error::new(ErrorKind::Io))?;
        trace!(track = %chunk.track, index = chunk.index, offset = chunk.offset, len, "reading chunk");
        let data = reader
            .read_at(chunk.offset, len)
            .await
            .map_err(|err| Error::io(err, chunk.offset, len))?;

        let mut offset = 0u64;
        for size in &chunk.samples.sizes {
            let start = (offset as usize).min(data.len());
            let end = start.saturating_add(PREVIEW_SIZE).min(data.len());
            samples.push(SampleInfo {
                track: chunk.track,
                chunk: chunk.index,
                offset,
                size: *size,
                preview: data[start..end].to_vec(),
            });
            offset += *size as u64;
        }
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use futures_util::io::Cursor;

    use super::*;
    use crate::{chunk_offset_builder::SampleRange, reader::SeekableReader};

    #[tokio::test]
    async fn test_list_samples() {
        let mut file = vec![0u8; 8];
        file.extend(b"first sample with a long payload");
        file.extend(b"\x00\x01two");
        let chunk = Chunk {
            track: TrackKind::Video,
            index: 1,
            offset: 8,
            size: 37,
            samples: SampleRange {
                start: 1,
                count: 2,
                sizes: vec![32, 5],
            },
        };
        let mut reader = SeekableReader::new(Cursor::new(file)).await.unwrap();
        let samples = list_samples(&mut reader, &[chunk]).await.unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].preview.len(), PREVIEW_SIZE);
        assert_eq!(samples[0].preview_text(), "first sample with a long");
        assert_eq!(samples[1].offset, 32);
        assert_eq!(samples[1].preview_text(), "..two");
        assert_eq!(samples[1].to_string(), "video chunk 1 +32 size 5 ..two");
    }
}
