//! Error types returned by the multiplexing engine.

use std::{fmt, io};

/// Convenience alias for results produced by this workspace.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Enum with all possible engine errors.
#[derive(Debug)]
pub enum ErrorKind {
    /// Wrapper around a std io error.
    IOError(io::Error),
    /// A payload length exceeds what the separator's three-byte form can
    /// express. The offending packet must be segmented or rejected by the
    /// caller; other packets are unaffected.
    LengthTooLarge {
        /// The length that could not be encoded.
        length: usize,
        /// The maximum length the separator form supports at this position.
        max: usize,
    },
    /// An incoming bundle ended before its structure said it would. The
    /// entire bundle is discarded because position tracking cannot be
    /// trusted past the fault.
    Truncated(DecodingErrorKind),
    /// A blast sequence id wrapped into a still-unconfirmed older entry.
    /// Indicates the retry ceiling is too large relative to the wrap period.
    SequenceReuse(u16),
    /// The configuration is internally inconsistent.
    InvalidConfig(&'static str),
}

/// Which structural element a decoder was reading when the buffer ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodingErrorKind {
    /// The separator byte chain.
    Separator,
    /// The protocol field.
    ProtocolField,
    /// A sub-packet payload.
    Payload,
}

impl fmt::Display for DecodingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodingErrorKind::Separator => write!(f, "separator"),
            DecodingErrorKind::ProtocolField => write!(f, "protocol field"),
            DecodingErrorKind::Payload => write!(f, "payload"),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::IOError(e) => write!(f, "an IO error occurred: {}", e),
            ErrorKind::LengthTooLarge { length, max } => {
                write!(f, "payload length {} exceeds separator capacity {}", length, max)
            }
            ErrorKind::Truncated(kind) => {
                write!(f, "bundle truncated while reading {}", kind)
            }
            ErrorKind::SequenceReuse(seq) => {
                write!(f, "sequence id {} wrapped into an unconfirmed entry", seq)
            }
            ErrorKind::InvalidConfig(reason) => write!(f, "invalid configuration: {}", reason),
        }
    }
}

impl std::error::Error for ErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ErrorKind::IOError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ErrorKind {
    fn from(inner: io::Error) -> Self {
        ErrorKind::IOError(inner)
    }
}
