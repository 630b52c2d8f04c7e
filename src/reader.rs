use futures_io::{AsyncRead, AsyncSeek};
use futures_util::io::{AsyncReadExt, AsyncSeekExt};
use std::future::Future;
use std::io::{self, SeekFrom};

/// Random access byte source the pipeline reads from.
///
/// Every stage awaits at most one read at a time.
pub trait ChunkedReader: Send {
    /// Total size of the underlying file.
    fn size(&self) -> u64;

    /// Reads `len` bytes starting at `offset`. Fewer bytes are returned only at end of file.
    fn read_at(
        &mut self,
        offset: u64,
        len: usize,
    ) -> impl Future<Output = io::Result<Vec<u8>>> + Send;
}

/// [`ChunkedReader`] over any seekable async stream.
pub struct SeekableReader<R> {
    reader: R,
    size: u64,
    position: Option<u64>,
}

impl<R: AsyncRead + AsyncSeek + Unpin + Send> SeekableReader<R> {
    /// Wraps `reader`, determining the file size by seeking to its end.
    pub async fn new(mut reader: R) -> io::Result<Self> {
        let size = reader.seek(SeekFrom::End(0)).await?;
        Ok(Self {
            reader,
            size,
            position: Some(size),
        })
    }

    pub fn with_size(reader: R, size: u64) -> Self {
        Self {
            reader,
            size,
            position: None,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: AsyncRead + AsyncSeek + Unpin + Send> ChunkedReader for SeekableReader<R> {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read_at(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let len = len.min(self.size.saturating_sub(offset) as usize);
        let mut data = vec![0u8; len];
        if len == 0 {
            return Ok(data);
        }
        // sequential reads don't need a seek
        if self.position != Some(offset) {
            self.reader.seek(SeekFrom::Start(offset)).await?;
        }
        self.position = None;
        let mut filled = 0;
        while filled < len {
            let n = self.reader.read(&mut data[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        data.truncate(filled);
        self.position = Some(offset + filled as u64);
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::io::Cursor;

    use super::*;

    #[tokio::test]
    async fn test_read_at() {
        let data: Vec<u8> = (0u8..100).collect();
        let mut reader = SeekableReader::new(Cursor::new(data)).await.unwrap();
        assert_eq!(reader.size(), 100);
        assert_eq!(reader.read_at(10, 3).await.unwrap(), vec![10, 11, 12]);
        assert_eq!(reader.read_at(13, 2).await.unwrap(), vec![13, 14]);
        assert_eq!(reader.read_at(0, 1).await.unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn test_short_read_at_end() {
        let mut reader = SeekableReader::new(Cursor::new(vec![1u8; 10])).await.unwrap();
        assert_eq!(reader.read_at(8, 5).await.unwrap().len(), 2);
        assert!(reader.read_at(20, 5).await.unwrap().is_empty());
    }
}
