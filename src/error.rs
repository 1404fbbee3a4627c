//! Error types shared by every stream adapter in this crate.
//!
//! Rather than pull in a derive-macro crate, the error type here follows the
//! same shape used throughout this project's history: a public [`Error`]
//! struct pairing an internal [`Repr`] with an [`Operation`] tag recording
//! which call produced it.

use std::error;
use std::fmt;
use std::io;

/// The call site that produced an [`Error`].
///
/// Used purely for diagnostics: two errors with the same underlying cause but
/// different operations are still distinguishable in logs and in `Display`
/// output.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Operation {
    Read,
    Write,
    Input,
    Dispose,
    Flush,
    Seek,
    Tell,
    Length,
    Checkpoint,
    New,
    Close,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Input => "input",
            Operation::Dispose => "dispose",
            Operation::Flush => "flush",
            Operation::Seek => "seek",
            Operation::Tell => "tell",
            Operation::Length => "length",
            Operation::Checkpoint => "checkpoint",
            Operation::New => "new",
            Operation::Close => "close",
        };
        f.write_str(s)
    }
}

enum Repr {
    Io(io::Error),
    InvalidArgument(&'static str),
    Message(String),
    AlreadyClosed,
    Unsupported,
    #[cfg(feature = "http")]
    Transport(curl::Error),
}

/// The error type returned by fallible operations in this crate.
pub struct Error {
    repr: Repr,
    op: Operation,
}

impl Error {
    pub fn io(op: Operation, err: io::Error) -> Self {
        Error { repr: Repr::Io(err), op }
    }

    pub fn invalid_argument(op: Operation, msg: &'static str) -> Self {
        Error { repr: Repr::InvalidArgument(msg), op }
    }

    pub fn message(op: Operation, msg: impl Into<String>) -> Self {
        Error { repr: Repr::Message(msg.into()), op }
    }

    pub fn already_closed(op: Operation) -> Self {
        Error { repr: Repr::AlreadyClosed, op }
    }

    pub fn unsupported(op: Operation) -> Self {
        Error { repr: Repr::Unsupported, op }
    }

    #[cfg(feature = "http")]
    pub fn transport(op: Operation, err: curl::Error) -> Self {
        Error { repr: Repr::Transport(err), op }
    }

    /// The call site that produced this error.
    pub fn operation(&self) -> Operation {
        self.op
    }

    /// `true` if this error indicates the operation is not implemented by the
    /// adapter it was called on.
    pub fn is_unsupported(&self) -> bool {
        matches!(self.repr, Repr::Unsupported)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Error");
        d.field("operation", &self.op);
        match &self.repr {
            Repr::Io(e) => d.field("io", e).finish(),
            Repr::InvalidArgument(m) => d.field("invalid_argument", m).finish(),
            Repr::Message(m) => d.field("message", m).finish(),
            Repr::AlreadyClosed => d.field("kind", &"already_closed").finish(),
            Repr::Unsupported => d.field("kind", &"unsupported").finish(),
            #[cfg(feature = "http")]
            Repr::Transport(e) => d.field("transport", e).finish(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Io(e) => write!(f, "{}: {}", self.op, e),
            Repr::InvalidArgument(m) => write!(f, "{}: invalid argument: {}", self.op, m),
            Repr::Message(m) => write!(f, "{}: {}", self.op, m),
            Repr::AlreadyClosed => write!(f, "{}: already closed", self.op),
            Repr::Unsupported => write!(f, "{}: not supported by this stream", self.op),
            #[cfg(feature = "http")]
            Repr::Transport(e) => write!(f, "{}: transport error: {}", self.op, e),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            Repr::Io(e) => Some(e),
            #[cfg(feature = "http")]
            Repr::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        match e.repr {
            Repr::Io(io_err) => io_err,
            Repr::InvalidArgument(m) => io::Error::new(io::ErrorKind::InvalidInput, m),
            Repr::Message(m) => io::Error::new(io::ErrorKind::Other, m),
            Repr::AlreadyClosed => {
                io::Error::new(io::ErrorKind::Other, "already closed")
            }
            Repr::Unsupported => {
                io::Error::new(io::ErrorKind::Other, "operation not supported")
            }
            #[cfg(feature = "http")]
            Repr::Transport(t) => io::Error::new(io::ErrorKind::Other, t),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_operation() {
        let e = Error::invalid_argument(Operation::Seek, "negative offset");
        let s = format!("{}", e);
        assert!(s.contains("seek"));
        assert!(s.contains("negative offset"));
    }

    #[test]
    fn unsupported_roundtrip() {
        let e = Error::unsupported(Operation::Checkpoint);
        assert!(e.is_unsupported());
        assert_eq!(e.operation(), Operation::Checkpoint);
    }
}
