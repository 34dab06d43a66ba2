//! Parsing of HTTP/1 request heads, request targets, and queries.
//!
//! The request target is kept as the raw string the client sent. We never build a
//! [`http::Uri`] from it, since test clients deliberately send targets `Uri` rejects.

use crate::prelude::*;

/// A general error from parsing.
#[derive(Debug)]
pub enum Error {
    /// No path was parsed as part of a request.
    NoPath,
    /// The stream ended before the head was complete.
    UnexpectedEnd,
    /// The head is too long.
    ///
    /// 'head' is the data before `\r\n\r\n`, and
    /// may be invalid data not containing a `\r\n\r\n`
    HeaderTooLong,
    /// The [`Method`] is invalid
    InvalidMethod,
    /// The [`Version`] is invalid
    InvalidVersion,
    /// A syntax error in the data.
    ///
    /// Often means the request isn't what we expect;
    /// maybe it's transmitted over HTTPS.
    Syntax,
    /// There are illegal bytes in a [`HeaderName`]
    IllegalName,
    /// There are illegal bytes in a [`HeaderValue`]
    IllegalValue,
}
impl Error {
    /// Gets a string representation of [`Error`].
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoPath => "no path was supplied in the request",
            Self::UnexpectedEnd => "stream is exhausted",
            Self::HeaderTooLong => "header is too long",
            Self::InvalidMethod => "method is invalid",
            Self::InvalidVersion => "version is invalid",
            Self::Syntax => {
                "invalid syntax of data. The input might unexpectedly \
                be encrypted (HTTPS) or compressed (HTTP/2)"
            }
            Self::IllegalName => "header name invalid",
            Self::IllegalValue => "header value invalid",
        }
    }
}
impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
impl std::error::Error for Error {}
impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::UnexpectedEnd => io::Error::new(io::ErrorKind::UnexpectedEof, err.as_str()),
            _ => io::Error::new(io::ErrorKind::InvalidData, err.as_str()),
        }
    }
}

/// The head of a request: the request line and the headers.
#[derive(Debug)]
#[must_use]
pub struct RequestHead {
    /// The request method.
    pub method: Method,
    /// The request target, exactly as sent (lossily converted to UTF-8).
    pub target: String,
    /// The protocol version of the request.
    pub version: Version,
    /// The request headers. Duplicates are kept.
    pub headers: HeaderMap,
}

/// Parses a [`Version`].
#[inline]
#[must_use]
pub fn version(bytes: &[u8]) -> Option<Version> {
    Some(match bytes {
        b"HTTP/0.9" => Version::HTTP_09,
        b"HTTP/1.0" => Version::HTTP_10,
        b"HTTP/1.1" => Version::HTTP_11,
        b"HTTP/2" | b"HTTP/2.0" => Version::HTTP_2,
        b"HTTP/3" | b"HTTP/3.0" => Version::HTTP_3,
        _ => return None,
    })
}

/// Strips a trailing `\r` from `line`.
fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(&[chars::CR]).unwrap_or(line)
}
fn trim_whitespace(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if *first == chars::SPACE || *first == chars::TAB {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if *last == chars::SPACE || *last == chars::TAB {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}

/// Parses the head of a request from `bytes`.
///
/// Returns the head and the number of bytes it occupies; the body starts right after.
///
/// An HTTP/0.9 request (`GET /path` without a version) ends at its request line.
///
/// # Errors
///
/// Returns [`Error::UnexpectedEnd`] if `bytes` doesn't contain an empty line ending the head,
/// and the other variants of [`Error`] if the request line or a header is malformed.
pub fn request_head(bytes: &[u8]) -> Result<(RequestHead, usize), Error> {
    let line_end = bytes
        .iter()
        .position(|b| *b == chars::LF)
        .ok_or(Error::UnexpectedEnd)?;
    let line = trim_cr(&bytes[..line_end]);

    let mut parts = line.split(|b| *b == chars::SPACE).filter(|p| !p.is_empty());
    let method = parts.next().ok_or(Error::Syntax)?;
    let method = Method::from_bytes(method).map_err(|_| Error::InvalidMethod)?;
    let target = parts.next().ok_or(Error::NoPath)?;
    // HTTP/0.9 requests carry no version and no headers; the request line is the head.
    let (version, simple) = match parts.next() {
        Some(v) => (version(v).ok_or(Error::InvalidVersion)?, false),
        None if method == Method::GET => (Version::HTTP_09, true),
        None => return Err(Error::InvalidMethod),
    };
    if parts.next().is_some() {
        return Err(Error::Syntax);
    }

    let (headers, headers_len) = if simple {
        (HeaderMap::new(), 0)
    } else {
        headers(&bytes[line_end + 1..])?
    };

    Ok((
        RequestHead {
            method,
            target: String::from_utf8_lossy(target).into_owned(),
            version,
            headers,
        },
        line_end + 1 + headers_len,
    ))
}

/// Parses headers until an empty line.
///
/// Returns the headers and the number of bytes they (and the empty line) occupy.
///
/// # Errors
///
/// Returns [`Error::UnexpectedEnd`] if no empty line is found, and
/// [`Error::IllegalName`] or [`Error::IllegalValue`] if a header is malformed.
pub fn headers(bytes: &[u8]) -> Result<(HeaderMap, usize), Error> {
    let mut headers = HeaderMap::new();
    let mut pos = 0;
    loop {
        let rest = &bytes[pos..];
        let line_end = rest
            .iter()
            .position(|b| *b == chars::LF)
            .ok_or(Error::UnexpectedEnd)?;
        let line = trim_cr(&rest[..line_end]);
        pos += line_end + 1;
        if line.is_empty() {
            return Ok((headers, pos));
        }
        let colon = line
            .iter()
            .position(|b| *b == chars::COLON)
            .ok_or(Error::IllegalName)?;
        let name = HeaderName::from_bytes(trim_whitespace(&line[..colon]))
            .map_err(|_| Error::IllegalName)?;
        let value = HeaderValue::from_bytes(trim_whitespace(&line[colon + 1..]))
            .map_err(|_| Error::IllegalValue)?;
        headers.append(name, value);
    }
}

/// A request target split into its path, query, and fragment.
///
/// Nothing is decoded.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[must_use]
pub struct Target<'a> {
    /// Everything before the first `?` or `#`.
    pub path: &'a str,
    /// Everything between the first `?` and the first `#` after it. Empty if absent.
    pub query: &'a str,
    /// Everything after the first `#`. Empty if absent.
    pub fragment: &'a str,
}
impl<'a> Target<'a> {
    /// Splits `target`.
    pub fn split(target: &'a str) -> Self {
        let (rest, fragment) = target.split_once('#').unwrap_or((target, ""));
        let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
        Self {
            path,
            query,
            fragment,
        }
    }
}

/// Parses `query` into name-value pairs, in order.
///
/// Fields are separated by `&`. `+` is decoded to a space and percent escapes are decoded.
/// Pairs with an empty value are skipped, and an empty query gives no pairs.
///
/// # Errors
///
/// Returns the offending field if a field has no `=`. An empty field in a
/// non-empty query (e.g. `a=1&&b=2`) is an error too.
pub fn query_pairs(query: &str) -> Result<Vec<(String, String)>, String> {
    fn decode(s: &str) -> String {
        percent_decode(&s.replace('+', " ")).into_owned()
    }

    let mut pairs = Vec::new();
    if query.is_empty() {
        return Ok(pairs);
    }
    for field in query.split('&') {
        let Some((name, value)) = field.split_once('=') else {
            return Err(field.to_owned());
        };
        if value.is_empty() {
            continue;
        }
        pairs.push((decode(name), decode(value)));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_head() {
        let raw = b"POST /echo?x=1#top HTTP/1.1\r\n\
            Host: localhost:4040\r\n\
            Content-Length: 5\r\n\
            X-Dup: a\r\n\
            x-dup: b\r\n\
            \r\n\
            hello";
        let (head, len) = request_head(raw).unwrap();
        assert_eq!(head.method, Method::POST);
        assert_eq!(head.target, "/echo?x=1#top");
        assert_eq!(head.version, Version::HTTP_11);
        assert_eq!(head.headers.get("host").unwrap(), "localhost:4040");
        assert_eq!(head.headers.get("CONTENT-LENGTH").unwrap(), "5");
        assert_eq!(head.headers.get_all("x-dup").iter().count(), 2);
        assert_eq!(&raw[len..], b"hello");
    }

    #[test]
    fn bare_lf_and_odd_targets() {
        let raw = b"GET /url-encoding?/%83y%81[%83W HTTP/1.0\n\n";
        let (head, len) = request_head(raw).unwrap();
        assert_eq!(head.target, "/url-encoding?/%83y%81[%83W");
        assert_eq!(head.version, Version::HTTP_10);
        assert!(head.headers.is_empty());
        assert_eq!(len, raw.len());
    }

    #[test]
    fn simple_request() {
        let raw = b"GET /hello.html\r\n";
        let (head, len) = request_head(raw).unwrap();
        assert_eq!(head.method, Method::GET);
        assert_eq!(head.target, "/hello.html");
        assert_eq!(head.version, Version::HTTP_09);
        assert!(head.headers.is_empty());
        assert_eq!(len, raw.len());

        assert!(matches!(
            request_head(b"POST /echo\r\n"),
            Err(Error::InvalidMethod)
        ));
    }

    #[test]
    fn head_errors() {
        assert!(matches!(
            request_head(b"GET / HTTP/1.1\r\nhost: x\r\n"),
            Err(Error::UnexpectedEnd)
        ));
        assert!(matches!(
            request_head(b"GET / HTTP/9\r\n\r\n"),
            Err(Error::InvalidVersion)
        ));
        assert!(matches!(
            request_head(b"G(T / HTTP/1.1\r\n\r\n"),
            Err(Error::InvalidMethod)
        ));
        assert!(matches!(request_head(b"GET\r\n\r\n"), Err(Error::NoPath)));
        assert!(matches!(
            request_head(b"GET / HTTP/1.1\r\nno colon here\r\n\r\n"),
            Err(Error::IllegalName)
        ));
    }

    #[test]
    fn split_target() {
        assert_eq!(
            Target::split("/a/b?c=d#e"),
            Target {
                path: "/a/b",
                query: "c=d",
                fragment: "e"
            }
        );
        assert_eq!(
            Target::split("/a#frag?not-query"),
            Target {
                path: "/a",
                query: "",
                fragment: "frag?not-query"
            }
        );
        assert_eq!(Target::split("/plain").query, "");
    }

    #[test]
    fn parse_query() {
        let pairs = query_pairs("status=302&Location=%2Fsomewhere+else&empty=").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("status".to_owned(), "302".to_owned()),
                ("Location".to_owned(), "/somewhere else".to_owned()),
            ]
        );
        assert_eq!(query_pairs("").unwrap(), vec![]);
        assert_eq!(query_pairs("404"), Err("404".to_owned()));
        assert_eq!(query_pairs("a=1&&b=2"), Err(String::new()));
    }
}
