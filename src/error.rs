use derive_more::Display;
use thiserror::Error;

use crate::atom::FourCC;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
#[error(
    "{kind}{}",
    self.location.map(|(offset, length)|
        format!(" at offset {offset} with length {length}")).unwrap_or_default()
)]
pub struct Error {
    /// The kind of error that occurred.
    pub(crate) kind: ErrorKind,
    /// location is the (offset, length) of the input data related to the error
    pub(crate) location: Option<(u64, usize)>,
    /// The source error that caused this error.
    #[source]
    pub(crate) source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("I/O error")]
    Io,
    #[display("Unsupported format or damaged file")]
    NoAtoms,
    #[display("Header not found")]
    HeaderNotFound,
    #[display("Next atom not found")]
    NextAtomNotFound,
    #[display("Invalid level")]
    InvalidLevel,
    #[display("Broken sample table")]
    BrokenTable,
    #[display("Tracks not found")]
    TracksNotFound,
    #[display("Unable to retrieve frame information")]
    FrameInfoUnavailable,
    #[display("Frame index is outside the range of available frames")]
    IndexOutOfRange,
    #[display("The chunk with the frame is not found")]
    ChunkNotFound,
    #[display("End frame must be equal or greater than start frame")]
    InvalidFrameRange,
    #[display("No chunks were found")]
    NoChunks,
    #[display("Atom parsing failed")]
    AtomParsing,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            location: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn location(&self) -> Option<(u64, usize)> {
        self.location
    }

    pub(crate) fn at(mut self, offset: u64, length: usize) -> Self {
        self.location = Some((offset, length));
        self
    }

    pub(crate) fn with_source<E>(mut self, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.source = Some(source.into());
        self
    }

    pub(crate) fn io(err: std::io::Error, offset: u64, length: usize) -> Self {
        Self::new(ErrorKind::Io).at(offset, length).with_source(err)
    }

    pub(crate) fn atom_parsing(atom_type: FourCC, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::new(ErrorKind::AtomParsing).with_source(format!("{atom_type}: {message}"))
    }

    pub(crate) fn from_winnow(
        atom_type: FourCC,
        error: winnow::error::ParseError<
            winnow::LocatingSlice<&winnow::Bytes>,
            winnow::error::ContextError,
        >,
    ) -> Self {
        let offset = error.offset();
        Self::atom_parsing(atom_type, error.inner().to_string()).at(offset as u64, 0)
    }
}

impl From<crate::writer::WriteError> for Error {
    fn from(err: crate::writer::WriteError) -> Self {
        Self::new(ErrorKind::Io).with_source(err)
    }
}
