pub mod atom;
pub mod chunk_offset_builder;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod frame;
pub mod media_params;
pub mod parser;
pub mod reader;
pub mod rebuild;
pub mod sample_table;
pub mod samples;
pub mod scanner;
pub mod template;
pub mod track;
pub mod tree;
pub mod validator;
pub mod writer;

pub use atom::{Atom, AtomId, Atoms, FourCC};
pub use config::Config;
pub use diagnostics::{Diagnostic, Diagnostics, Stage};
pub use error::{Error, ErrorKind, Result};
pub use frame::FrameLocation;
pub use media_params::{MediaInfo, MediaParams};
pub use parser::{ParseObserver, ParsedMp4, Parser};
pub use reader::{ChunkedReader, SeekableReader};
pub use rebuild::Rebuilt;
pub use track::TrackKind;
pub use writer::{write_rebuilt, Mp4Writer, WriteError};
