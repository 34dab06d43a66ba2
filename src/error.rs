//! The error type of the harness.
//!
//! Everything fallible in the library returns [`Error`]. Faults which are reported
//! instead of returned (see [`crate::config::ErrorSink`]) carry one too.

use crate::prelude::*;

/// An error from the server, the handler registry, or the process runner.
#[derive(Debug)]
pub enum Error {
    /// An input-output error was encountered while reading or writing.
    Io(io::Error),
    /// The TLS configuration couldn't be built, or a handshake failed.
    Tls(rustls::Error),
    /// A parse error from [`utils::parse`].
    Parse(utils::parse::Error),
    /// A `POST` request declared no content length, or one that isn't a number.
    ///
    /// Contains the raw header value, if any.
    InvalidContentLength(Option<String>),
    /// A handler source unit couldn't be read or isn't a valid manifest.
    HandlerLoad {
        /// The handler source unit.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },
    /// A manifest names a handler the [`HandlerCatalog`] doesn't know.
    UnknownHandler(String),
    /// A handler returned an error.
    HandlerFault(String),
    /// A handler panicked while handling a request.
    HandlerPanicked(String),
    /// The program of a [`ProcessSpec`] couldn't be started.
    Spawn {
        /// The program which failed to start.
        program: String,
        /// The error from the OS.
        source: io::Error,
    },
    /// The certificate chain or private key is missing or malformed.
    Certificate(String),
}
impl Error {
    /// Creates a [`Error::HandlerFault`] from anything displayable.
    ///
    /// Convenient for handlers to map their own errors.
    pub fn handler(message: impl Display) -> Self {
        Self::HandlerFault(message.to_string())
    }
    /// Is this a transport fault which should be silently discarded?
    ///
    /// Broken pipes and connection resets are the peer hanging up.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }
}
impl From<io::Error> for Error {
    #[inline]
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}
impl From<rustls::Error> for Error {
    #[inline]
    fn from(err: rustls::Error) -> Self {
        Self::Tls(err)
    }
}
impl From<utils::parse::Error> for Error {
    #[inline]
    fn from(err: utils::parse::Error) -> Self {
        Self::Parse(err)
    }
}
impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::Io(io) | Error::Spawn { source: io, .. } => io,
            Error::Parse(err) => err.into(),
            Error::InvalidContentLength(_) => {
                io::Error::new(io::ErrorKind::InvalidData, err.to_string())
            }
            _ => io::Error::new(io::ErrorKind::Other, err.to_string()),
        }
    }
}
impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => {
                f.write_str("std::io: ")?;
                Display::fmt(err, f)
            }
            Self::Tls(err) => {
                f.write_str("rustls: ")?;
                Display::fmt(err, f)
            }
            Self::Parse(err) => {
                f.write_str("parse: ")?;
                Display::fmt(err, f)
            }
            Self::InvalidContentLength(value) => {
                write!(f, "no or invalid content-length in POST ({value:?})")
            }
            Self::HandlerLoad { path, message } => {
                write!(f, "failed to load handler {}: {message}", path.display())
            }
            Self::UnknownHandler(name) => write!(f, "no handler named {name:?} in the catalog"),
            Self::HandlerFault(message) => write!(f, "handler failed: {message}"),
            Self::HandlerPanicked(message) => write!(f, "handler panicked: {message}"),
            Self::Spawn { program, source } => {
                write!(f, "failed to start {program:?}: {source}")
            }
            Self::Certificate(message) => write!(f, "certificate: {message}"),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) | Self::Spawn { source: err, .. } => Some(err),
            Self::Tls(err) => Some(err),
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}
