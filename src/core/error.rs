//! Purpose: Single error type shared by framing, pickle decoding, and JSON conversion.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`.
//! Role: Carries the failure category plus enough context (offset, path) to diagnose it.
//! Invariants: Exit codes per kind are stable once published.
use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    FileAccess,
    TruncatedHeader,
    TruncatedPayload,
    MalformedPayload,
    UnsupportedType,
    Io,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    path: Option<PathBuf>,
    offset: Option<u64>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            path: None,
            offset: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Moves a payload-relative offset into the coordinates of the enclosing buffer.
    pub fn shift_offset(mut self, delta: u64) -> Self {
        self.offset = self.offset.map(|offset| offset.saturating_add(delta));
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        if let Some(offset) = self.offset {
            write!(f, " (offset: {offset})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::FileAccess => 3,
        ErrorKind::TruncatedHeader => 4,
        ErrorKind::TruncatedPayload => 5,
        ErrorKind::MalformedPayload => 6,
        ErrorKind::UnsupportedType => 7,
        ErrorKind::Io => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, to_exit_code};

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::FileAccess, 3),
            (ErrorKind::TruncatedHeader, 4),
            (ErrorKind::TruncatedPayload, 5),
            (ErrorKind::MalformedPayload, 6),
            (ErrorKind::UnsupportedType, 7),
            (ErrorKind::Io, 8),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn display_includes_context() {
        let err = Error::new(ErrorKind::MalformedPayload)
            .with_message("unknown opcode 0xff")
            .with_offset(3)
            .shift_offset(4);
        assert_eq!(err.offset(), Some(7));
        assert_eq!(
            err.to_string(),
            "MalformedPayload: unknown opcode 0xff (offset: 7)"
        );
    }

    #[test]
    fn shift_without_offset_is_noop() {
        let err = Error::new(ErrorKind::UnsupportedType).shift_offset(4);
        assert_eq!(err.offset(), None);
    }
}
