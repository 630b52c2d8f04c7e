use derive_more::Display;
use std::fmt;
use tracing::warn;

use crate::{
    config::Config,
    error::{Error, ErrorKind, Result},
};

/// Pipeline stage a diagnostic originates from.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    #[display("scanner")]
    Scanner,
    #[display("validator")]
    Validator,
    #[display("sample table")]
    SampleTable,
    #[display("tracks")]
    Tracks,
    #[display("media params")]
    MediaParams,
    #[display("frame locator")]
    FrameLocator,
    #[display("rebuild")]
    Rebuild,
    #[display("writer")]
    Writer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.message)
    }
}

/// Ordered list of faults recorded while parsing or rebuilding.
///
/// Structural faults are always recorded and never returned. Operational faults pass through
/// [`Diagnostics::report`], which records them or hands them back depending on
/// [`Config::ignore_errors`].
#[derive(Debug, Default, Clone)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a recoverable structural fault.
    pub(crate) fn push(&mut self, stage: Stage, kind: ErrorKind, message: impl Into<String>) {
        let diagnostic = Diagnostic {
            stage,
            kind,
            message: message.into(),
        };
        warn!(%stage, kind = %kind, "{}", diagnostic.message);
        self.0.push(diagnostic);
    }

    /// Records an operational fault, or returns it when errors aren't being ignored.
    pub(crate) fn report(&mut self, stage: Stage, config: &Config, err: Error) -> Result<()> {
        if !config.ignore_errors {
            return Err(err);
        }
        self.push(stage, err.kind(), err.to_string());
        Ok(())
    }

    pub(crate) fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, kind: ErrorKind) -> bool {
        self.0.iter().any(|d| d.kind == kind)
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_records_when_ignoring() {
        let mut diagnostics = Diagnostics::new();
        let config = Config::default();
        diagnostics
            .report(Stage::Scanner, &config, Error::new(ErrorKind::NoAtoms))
            .unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics.contains(ErrorKind::NoAtoms));
        assert_eq!(
            diagnostics.iter().next().unwrap().to_string(),
            "scanner: Unsupported format or damaged file"
        );
    }

    #[test]
    fn test_report_returns_when_strict() {
        let mut diagnostics = Diagnostics::new();
        let config = Config::builder().ignore_errors(false).build();
        let err = diagnostics
            .report(Stage::FrameLocator, &config, Error::new(ErrorKind::IndexOutOfRange))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexOutOfRange);
        assert!(diagnostics.is_empty());
    }
}
