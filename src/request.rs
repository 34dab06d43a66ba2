//! The inbound request handed to handlers.

use crate::prelude::*;
use utils::{RequestHead, Target};

/// An immutable view of one inbound request.
///
/// The request target is kept exactly as the client sent it ([`Self::raw_path`]),
/// since test clients probe how odd targets are passed along.
#[derive(Debug)]
#[must_use]
pub struct Request {
    method: Method,
    version: Version,
    address: SocketAddr,
    raw_path: String,
    path: String,
    has_query: bool,
    has_fragment: bool,
    headers: HeaderMap,
    body: Option<Bytes>,
    secure: bool,
}
impl Request {
    /// Creates a request from a parsed head. The body is set with [`Self::with_body`].
    pub fn new(head: RequestHead, address: SocketAddr, secure: bool) -> Self {
        let RequestHead {
            method,
            target,
            version,
            headers,
        } = head;
        let split = Target::split(&target);
        let path = utils::percent_decode(split.path).into_owned();
        let before_fragment = target.split_once('#').map_or(target.as_str(), |(rest, _)| rest);
        let has_query = before_fragment.contains('?');
        let has_fragment = before_fragment.len() < target.len();
        Self {
            method,
            version,
            address,
            raw_path: target,
            path,
            has_query,
            has_fragment,
            headers,
            body: None,
            secure,
        }
    }
    /// Attaches the body read after the head.
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    /// The request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }
    /// The protocol version the client used.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }
    /// The peer's address.
    #[must_use]
    pub fn address(&self) -> SocketAddr {
        self.address
    }
    /// The request target exactly as sent, including query and fragment.
    #[must_use]
    pub fn raw_path(&self) -> &str {
        &self.raw_path
    }
    /// The percent-decoded path, without query and fragment.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
    /// The raw query, without the `?`. Empty if there is none.
    #[must_use]
    pub fn query(&self) -> &str {
        self.target().query
    }
    /// The raw fragment, without the `#`. Empty if there is none.
    #[must_use]
    pub fn fragment(&self) -> &str {
        self.target().fragment
    }
    /// The raw target split into path, query, and fragment.
    pub fn target(&self) -> Target<'_> {
        Target::split(&self.raw_path)
    }
    /// Whether the raw target contains a query (`?`), even an empty one.
    #[must_use]
    pub fn has_query(&self) -> bool {
        self.has_query
    }
    /// Whether the raw target contains a fragment (`#`), even an empty one.
    #[must_use]
    pub fn has_fragment(&self) -> bool {
        self.has_fragment
    }
    /// The request headers. Lookup is case-insensitive.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
    /// Gets the first value of the header `name`, if it's valid UTF-8.
    #[must_use]
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
    /// The body, present only for requests which declare one (`POST`).
    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
    /// Whether the request arrived over TLS.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }
    /// `https` or `http`.
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }
}
