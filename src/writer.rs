use derive_more::Display;
use futures_io::AsyncWrite;
use futures_util::AsyncWriteExt;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    atom::{
        util::{serializer::atom_header, RangeCollection},
        FourCC,
    },
    config::Config,
    error::{Error, ErrorKind},
    reader::ChunkedReader,
    rebuild::Rebuilt,
};

#[derive(Debug, Error)]
#[error("{kind}{}", self.source.as_ref().map(|e| format!(" ({e})")).unwrap_or_default())]
pub struct WriteError {
    /// The kind of error that occurred during writing.
    kind: WriteErrorKind,
    /// The source error that caused this error.
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Display)]
pub enum WriteErrorKind {
    #[display("I/O error")]
    Io,
}

impl From<std::io::Error> for WriteError {
    fn from(err: std::io::Error) -> Self {
        WriteError {
            kind: WriteErrorKind::Io,
            source: Some(Box::new(err)),
        }
    }
}

pub trait SerializeAtom: Sized {
    /// [FourCC] representing atom type
    fn atom_type(&self) -> FourCC;

    /// Serialize an atom's body
    fn into_body_bytes(self) -> Vec<u8>;

    /// Serialize an atom into bytes
    fn into_bytes(self) -> Vec<u8> {
        let atom_type = self.atom_type();
        let mut body = self.into_body_bytes();
        let mut header = atom_header(atom_type.into_bytes(), body.len() as u64);
        header.append(&mut body);
        header
    }
}

/// Output sink: receives the header buffer, then payload buffers in emission order.
pub struct Mp4Writer<W> {
    writer: W,
    offset: u64,
}

impl<W: AsyncWrite + Unpin> Mp4Writer<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, offset: 0 }
    }

    pub fn current_offset(&self) -> u64 {
        self.offset
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub async fn flush(&mut self) -> Result<(), WriteError> {
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn write_atom<A: SerializeAtom>(&mut self, atom: A) -> Result<(), WriteError> {
        let bytes = atom.into_bytes();
        self.write_raw(&bytes).await
    }

    pub async fn write_raw(&mut self, data: &[u8]) -> Result<(), WriteError> {
        self.writer.write_all(data).await?;
        self.offset += data.len() as u64;
        Ok(())
    }
}

/// Writes a rebuilt file: the header buffer, then every surviving payload range copied from
/// `reader`.
///
/// Adjacent ranges are coalesced and copied in reads of at most `config.chunk_size` bytes, one read
/// in flight at a time. Returns the number of bytes written.
pub async fn write_rebuilt<R, W>(
    reader: &mut R,
    rebuilt: &Rebuilt,
    writer: &mut Mp4Writer<W>,
    config: &Config,
) -> Result<u64, Error>
where
    R: ChunkedReader,
    W: AsyncWrite + Unpin,
{
    let start = writer.current_offset();
    writer.write_raw(&rebuilt.header).await?;

    let mut ranges = RangeCollection::default();
    for range in rebuilt.payload.iter().cloned() {
        ranges.insert(range);
    }
    debug!(
        header = rebuilt.header.len(),
        ranges = ranges.len(),
        "writing rebuilt file"
    );

    let step = config.chunk_size.max(1) as u64;
    for range in ranges.iter() {
        let mut offset = range.start;
        while offset < range.end {
            let len = (range.end - offset).min(step) as usize;
            trace!(offset, len, "copying payload");
            let data = reader
                .read_at(offset, len)
                .await
                .map_err(|err| Error::io(err, offset, len))?;
            if data.len() < len {
                return Err(Error::new(ErrorKind::Io).at(offset, len));
            }
            writer.write_raw(&data).await?;
            offset += len as u64;
        }
    }
    writer.flush().await?;
    Ok(writer.current_offset() - start)
}

#[cfg(test)]
mod tests {
    use futures_util::io::Cursor;
    use std::io;

    use super::*;
    use crate::{atom::SampleSizeAtom, diagnostics::Diagnostics};

    /// In-memory source that records every read.
    struct Recording {
        data: Vec<u8>,
        reads: Vec<(u64, usize)>,
    }

    impl ChunkedReader for Recording {
        fn size(&self) -> u64 {
            self.data.len() as u64
        }

        async fn read_at(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
            self.reads.push((offset, len));
            let start = (offset as usize).min(self.data.len());
            let end = start.saturating_add(len).min(self.data.len());
            Ok(self.data[start..end].to_vec())
        }
    }

    fn rebuilt(payload: Vec<std::ops::Range<u64>>) -> Rebuilt {
        Rebuilt {
            header: b"head".to_vec(),
            data_size: payload.iter().map(|range| range.end - range.start).sum(),
            payload,
            chunks: Vec::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    #[tokio::test]
    async fn test_coalesces_and_splits_payload() {
        let mut reader = Recording {
            data: (0..100u8).collect(),
            reads: Vec::new(),
        };
        let rebuilt = rebuilt(vec![10..20, 20..35, 50..55]);
        let config = Config::builder().chunk_size(10).build();
        let mut writer = Mp4Writer::new(Cursor::new(Vec::new()));

        let written = write_rebuilt(&mut reader, &rebuilt, &mut writer, &config)
            .await
            .unwrap();
        assert_eq!(written, rebuilt.file_size());
        assert_eq!(reader.reads, vec![(10, 10), (20, 10), (30, 5), (50, 5)]);

        let bytes = writer.into_inner().into_inner();
        assert_eq!(&bytes[..4], b"head");
        let expected: Vec<u8> = (10..35u8).chain(50..55).collect();
        assert_eq!(&bytes[4..], &expected[..]);
    }

    #[tokio::test]
    async fn test_short_payload_read_fails() {
        let mut reader = Recording {
            data: vec![0; 30],
            reads: Vec::new(),
        };
        let rebuilt = rebuilt(vec![20..40]);
        let mut writer = Mp4Writer::new(Cursor::new(Vec::new()));
        let err = write_rebuilt(&mut reader, &rebuilt, &mut writer, &Config::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.location(), Some((20, 20)));
    }

    #[tokio::test]
    async fn test_write_atom_tracks_offset() {
        let mut writer = Mp4Writer::new(Cursor::new(Vec::new()));
        writer
            .write_atom(SampleSizeAtom::from_sizes(vec![4, 8]))
            .await
            .unwrap();
        assert_eq!(writer.current_offset(), 28);
        let bytes = writer.into_inner().into_inner();
        assert_eq!(&bytes[4..8], b"stsz");
    }
}
