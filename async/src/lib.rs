//! Async bits for the fixture harness.
//!
//! This includes a [`read`] module for reading `HTTP/1` request heads and bodies
//! and a [`mod@write`] module for writing `HTTP/1` responses.

#![deny(
    unreachable_pub,
    missing_debug_implementations,
    missing_docs,
    clippy::pedantic
)]
#![allow(clippy::missing_panics_doc)]

pub mod prelude;

/// Writes HTTP/1 [`Response`](http::Response)s to a [`AsyncWrite`](tokio::io::AsyncWrite).
pub mod write {
    use crate::prelude::*;

    async fn headers(headers: &HeaderMap, mut writer: impl AsyncWrite + Unpin) -> io::Result<()> {
        for (name, value) in headers {
            writer.write_all(name.as_str().as_bytes()).await?;
            writer.write_all(b": ").await?;
            writer.write_all(value.as_bytes()).await?;
            writer.write_all(b"\r\n").await?;
        }
        Ok(())
    }
    /// The status line always names a HTTP/1 version; we never speak anything else.
    fn version(version: Version) -> &'static [u8] {
        match version {
            Version::HTTP_09 | Version::HTTP_10 => &b"HTTP/1.0"[..],
            _ => &b"HTTP/1.1"[..],
        }
    }
    macro_rules! write_bytes {
        ($writer:expr, $($bytes:expr $(,)?)+) => {
            $(
                $writer.write_all($bytes).await?;
            )*
        };
    }

    /// Writes `response` with `body` to `writer` and flushes it.
    ///
    /// Writer should be buffered.
    ///
    /// # Errors
    ///
    /// Will pass any errors emitted from `writer`.
    pub async fn response<T>(
        response: &Response<T>,
        body: &[u8],
        mut writer: impl AsyncWrite + Unpin,
    ) -> io::Result<()> {
        let reason = response
            .status()
            .canonical_reason()
            .unwrap_or("")
            .as_bytes();

        write_bytes!(
            writer,
            version(response.version()),
            b" ",
            response.status().as_str().as_bytes(),
            b" ",
            reason,
            b"\r\n"
        );

        headers(response.headers(), &mut writer).await?;

        write_bytes!(writer, b"\r\n", body);
        writer.flush().await
    }
}

/// Reads HTTP/1 request heads and bodies from a [`AsyncRead`](tokio::io::AsyncRead)er.
pub mod read {
    use crate::prelude::*;
    use utils::parse::{self, RequestHead};

    /// An error while reading a request.
    #[derive(Debug)]
    pub enum Error {
        /// The peer closed the connection before sending a single byte.
        Closed,
        /// The underlying stream failed.
        Io(io::Error),
        /// The bytes read aren't a valid request head.
        Parse(parse::Error),
    }
    impl From<io::Error> for Error {
        fn from(err: io::Error) -> Self {
            Self::Io(err)
        }
    }
    impl From<parse::Error> for Error {
        fn from(err: parse::Error) -> Self {
            Self::Parse(err)
        }
    }
    impl Display for Error {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            match self {
                Self::Closed => f.write_str("connection closed before a request was sent"),
                Self::Io(err) => Display::fmt(err, f),
                Self::Parse(err) => Display::fmt(err, f),
            }
        }
    }
    impl std::error::Error for Error {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            match self {
                Self::Closed => None,
                Self::Io(err) => Some(err),
                Self::Parse(err) => Some(err),
            }
        }
    }

    /// Whether `bytes` hold a whole head: a request line followed by an empty line,
    /// or a complete HTTP/0.9 request line (no version).
    pub(crate) fn head_complete(bytes: &[u8]) -> bool {
        if contains_two_newlines(bytes) {
            return true;
        }
        let Some(line_end) = bytes.iter().position(|b| *b == chars::LF) else {
            return false;
        };
        bytes[..line_end]
            .split(|b| *b == chars::SPACE || *b == chars::CR)
            .filter(|part| !part.is_empty())
            .count()
            < 3
    }

    pub(crate) fn contains_two_newlines(bytes: &[u8]) -> bool {
        let mut in_row = 0_u8;
        for byte in bytes.iter().copied() {
            match byte {
                chars::LF if in_row == 0 => in_row += 1,
                chars::LF => return true,
                chars::CR => {}
                _ => in_row = 0,
            }
        }
        false
    }

    /// Reads a request head from `reader`.
    ///
    /// Returns the parsed head and any bytes read past it, which are the start of the body.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] if the stream ends before any byte arrives.
    /// - [`Error::Parse`] with [`parse::Error::HeaderTooLong`] if no complete head fits in
    ///   `max_len` bytes, with [`parse::Error::UnexpectedEnd`] if the stream ends inside the
    ///   head, or any other parse error of the head.
    /// - [`Error::Io`] for errors from `reader`.
    pub async fn request(
        mut reader: impl AsyncRead + Unpin,
        max_len: usize,
    ) -> Result<(RequestHead, Bytes), Error> {
        let mut buffer = BytesMut::with_capacity(512);

        loop {
            if buffer.len() >= max_len {
                return Err(parse::Error::HeaderTooLong.into());
            }
            let read = reader.read_buf(&mut buffer).await?;
            if read == 0 {
                if buffer.is_empty() {
                    return Err(Error::Closed);
                }
                return Err(parse::Error::UnexpectedEnd.into());
            }
            if head_complete(&buffer) {
                break;
            }
        }

        let buffer = buffer.freeze();
        let (head, head_len) = parse::request_head(&buffer)?;
        Ok((head, buffer.slice(head_len..)))
    }

    /// The most [`body`] reserves ahead of the bytes actually received.
    pub const BODY_CHUNK: usize = 64 * 1024;

    /// Reads a body of exactly `len` bytes, of which `start` was already read
    /// together with the head.
    ///
    /// Any bytes in `start` past `len` are dropped.
    /// The buffer grows as bytes arrive, so a large declared `len` alone allocates
    /// at most [`BODY_CHUNK`] bytes.
    ///
    /// # Errors
    ///
    /// Returns an [`io::ErrorKind::UnexpectedEof`] error if the stream ends early,
    /// and passes any errors from `reader`.
    pub async fn body(
        mut reader: impl AsyncRead + Unpin,
        start: Bytes,
        len: usize,
    ) -> io::Result<Bytes> {
        if start.len() >= len {
            return Ok(start.slice(..len));
        }
        let mut buffer = BytesMut::with_capacity(len.min(BODY_CHUNK).max(start.len()));
        buffer.extend_from_slice(&start);
        while buffer.len() < len {
            if buffer.capacity() == buffer.len() {
                buffer.reserve((len - buffer.len()).min(BODY_CHUNK));
            }
            let mut limited = (&mut reader).take((len - buffer.len()) as u64);
            if limited.read_buf(&mut buffer).await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended before the declared content length",
                ));
            }
        }
        Ok(buffer.freeze())
    }
}
