//! Utility functions for the fixture harness.
//!
//! This includes
//! - commonly used [`chars`],
//! - percent coding of request paths ([`percent_decode`] and [`percent_encode_path`]),
//! - [`hardcoded_error_body`] to get a hard-coded error response,
//! - header helpers such as [`replace_header`] and [`content_length`],
//! - [`http_date`] to format `date` and `last-modified` headers.
//! - [`CleanDebug`] and it's trait [`AsCleanDebug`] to get a [`Debug`] implementation wired to the
//!   item's [`Display`] implementation.
#![deny(
    unreachable_pub,
    missing_debug_implementations,
    missing_docs,
    clippy::pedantic
)]
#![allow(clippy::missing_panics_doc)]

pub mod parse;
pub mod prelude;
use prelude::*;

pub use parse::{query_pairs, request_head, RequestHead, Target};

/// Common characters expressed as a single byte each, according to UTF-8.
pub mod chars {
    /// Tab
    pub const TAB: u8 = 9;
    /// Line feed
    pub const LF: u8 = 10;
    /// Carrage return
    pub const CR: u8 = 13;
    /// ` `
    pub const SPACE: u8 = 32;
    /// `:`
    pub const COLON: u8 = 58;
}

/// Implements [`Debug`] from the [`Display`] implementation of `value`.
///
/// Can be used to give fields a arbitrary [`mod@str`] without surrounding quotes,
/// for example in [`fmt::DebugStruct::field`].
pub struct CleanDebug<'a, T: ?Sized + Display>(&'a T);
impl<'a, T: ?Sized + Display> CleanDebug<'a, T> {
    /// Creates a new wrapper around `value` with [`Debug`] implemented as [`Display`].
    #[inline]
    pub fn new(value: &'a T) -> Self {
        Self(value)
    }
}
impl<T: ?Sized + Display> Debug for CleanDebug<'_, T> {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self.0, f)
    }
}
/// Trait to enable `.as_clean` to get a [`CleanDebug`] for the variable.
pub trait AsCleanDebug {
    /// Get a [`CleanDebug`] for Self.
    ///
    /// # Examples
    ///
    /// ```
    /// # use kvarn_harness_utils::prelude::*;
    /// let sink = "[error sink]";
    /// assert_eq!(format!("{:?}", sink.as_clean()), sink);
    /// ```
    fn as_clean(&self) -> CleanDebug<Self>
    where
        Self: Display,
    {
        CleanDebug::new(self)
    }
}
impl<T: Display> AsCleanDebug for T {}

/// Characters left as-is by [`percent_encode_path`].
///
/// Everything but ASCII alphanumerics and `/ _ . - ~` is escaped.
pub const PATH_SET: &percent_encoding::AsciiSet = &percent_encoding::NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~');

/// Decodes the percent encoding of `s`.
///
/// Invalid UTF-8 in the decoded bytes is replaced with `U+FFFD`.
#[must_use]
pub fn percent_decode(s: &str) -> Cow<'_, str> {
    percent_encoding::percent_decode_str(s).decode_utf8_lossy()
}
/// Percent encodes `s` using [`PATH_SET`].
#[must_use]
pub fn percent_encode_path(s: &str) -> Cow<'_, str> {
    percent_encoding::utf8_percent_encode(s, PATH_SET).into()
}

/// Escapes `&`, `<`, and `>` for embedding `s` in HTML.
#[must_use]
pub fn html_escape(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>']) {
        return Cow::Borrowed(s);
    }
    let mut escaped = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// Get a hardcoded error message.
///
/// `message` is HTML escaped before it's inserted.
#[must_use]
pub fn hardcoded_error_body(code: StatusCode, message: Option<&str>) -> Bytes {
    let mut body = BytesMut::with_capacity(200);
    let reason = code.canonical_reason();

    body.extend(b"<html><head><title>");
    body.extend(code.as_str().as_bytes());
    body.extend(b" ");
    if let Some(reason) = reason {
        body.extend(reason.as_bytes());
    }

    body.extend(b"</title></head><body><center><h1>");
    body.extend(code.as_str().as_bytes());
    body.extend(b" ");
    if let Some(reason) = reason {
        body.extend(reason.as_bytes());
    }
    body.extend(b"</h1><hr>");

    if let Some(message) = message {
        body.extend(b"<p>");
        body.extend(html_escape(message).as_bytes());
        body.extend(b"</p>");
    }

    body.extend(b"</center></body></html>");

    body.freeze()
}

/// Replaces the header `name` with `new` in `headers`.
///
/// Removes all other occurrences of `name`.
/// Pass [`HeaderName`]s by reference, e.g. `&header::SERVER`.
#[inline]
pub fn replace_header<K: header::IntoHeaderName + Copy>(
    headers: &mut HeaderMap,
    name: K,
    new: HeaderValue,
) {
    match headers.entry(name) {
        header::Entry::Vacant(slot) => {
            slot.insert(new);
        }
        header::Entry::Occupied(slot) => {
            slot.remove_entry_mult();
            headers.insert(name, new);
        }
    }
}
/// Sets the `content-length` of `headers` to `len`.
///
/// See [`replace_header`] for details.
#[inline]
pub fn set_content_length(headers: &mut HeaderMap, len: usize) {
    replace_header(headers, &header::CONTENT_LENGTH, HeaderValue::from(len));
}
/// Gets the declared `content-length` of `headers`.
///
/// Returns [`None`] if the header is missing or isn't a non-negative integer.
#[must_use]
pub fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .map(HeaderValue::to_str)
        .and_then(Result::ok)
        .map(str::trim)
        .map(str::parse)
        .and_then(Result::ok)
}

/// Does a request of type `method` carry a body we have to read?
///
/// Only `POST` requests declare a body to the fixture server.
#[inline]
#[must_use]
pub fn method_has_request_body(method: &Method) -> bool {
    *method == Method::POST
}
/// Does a response to a request of type `method` have a body?
#[inline]
#[must_use]
pub fn method_has_response_body(method: &Method) -> bool {
    *method != Method::HEAD
}

/// Formats `date` as an HTTP date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
#[must_use]
pub fn http_date(date: time::OffsetDateTime) -> String {
    let format = time::macros::format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    date.to_offset(time::UtcOffset::UTC)
        .format(format)
        .unwrap_or_default()
}
