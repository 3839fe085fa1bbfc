//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
use std::error::Error as StdError;
use std::fmt;

/// Generic error causes of the driver core.
///
/// Every fallible operation returns one of these; there are no panics on the
/// error paths of public operations. `InsufficientDmaBuffer` is the retryable
/// backpressure signal: the caller is expected to resize its output buffer
/// (the required size is reported out of band) and try again.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Caller contract violation.
    InvalidParameter,

    /// Memory allocation or identifier-space exhaustion.
    InsufficientResources,

    /// The caller-supplied output buffer is too small. Retryable.
    InsufficientDmaBuffer,

    /// Command-stream validation failure.
    IllegalInstruction,

    /// The device lacks a required capability.
    NotSupported,

    /// The device stopped responding or reported an unrecoverable error.
    DeviceLost,

    /// A bounded wait elapsed.
    Timeout,
}

impl ErrorKind {
    fn as_str(&self) -> &'static str {
        match *self {
            ErrorKind::InvalidParameter => "invalid parameter",
            ErrorKind::InsufficientResources => "insufficient resources",
            ErrorKind::InsufficientDmaBuffer => "insufficient DMA buffer",
            ErrorKind::IllegalInstruction => "illegal instruction in command stream",
            ErrorKind::NotSupported => "not supported by the device",
            ErrorKind::DeviceLost => "device lost",
            ErrorKind::Timeout => "timed out",
        }
    }
}

/// The generic error type used throughout GaSVGA.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    error: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, error: None }
    }

    pub fn with_detail<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self {
            kind,
            error: Some(error.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn get_ref(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        use std::ops::Deref;
        self.error.as_ref().map(Deref::deref)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref error) = self.error {
            write!(fmt, "{}: {}", self.kind.as_str(), error)
        } else {
            write!(fmt, "{}", self.kind.as_str())
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.error
            .as_ref()
            .map(|x| &**x as &(dyn StdError + 'static))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let e = Error::with_detail(ErrorKind::InvalidParameter, "bad sid");
        assert!(e.to_string().contains("bad sid"));
        assert_eq!(e.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn from_kind() {
        let e: Error = ErrorKind::Timeout.into();
        assert_eq!(e.kind(), ErrorKind::Timeout);
        assert!(e.get_ref().is_none());
    }
}
