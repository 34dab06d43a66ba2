//! Describes the request back to the client.

use crate::prelude::*;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Answers `application/json` describing the request.
///
/// The object has the fields
/// `command`, `version`, `origin` (`[ip, port]`), `url` (the raw target), `path`,
/// `params` (always empty), `query`, `fragment`, `headers` (values right-trimmed),
/// and `postdata` (the body as UTF-8, or `null`).
#[derive(Debug)]
pub struct Echo;

/// Serializes headers as an object in the order they were received.
///
/// For repeated headers, the last value is used.
struct Headers<'a>(&'a HeaderMap);
impl Serialize for Headers<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.keys_len()))?;
        for name in self.0.keys() {
            if let Some(value) = self.0.get_all(name).iter().last() {
                map.serialize_entry(
                    name.as_str(),
                    String::from_utf8_lossy(value.as_bytes()).trim_end(),
                )?;
            }
        }
        map.end()
    }
}

#[derive(serde::Serialize)]
struct Description<'a> {
    command: &'a str,
    version: String,
    origin: (String, u16),
    url: &'a str,
    path: &'a str,
    params: &'a str,
    query: &'a str,
    fragment: &'a str,
    headers: Headers<'a>,
    postdata: Option<Cow<'a, str>>,
}

impl Handler for Echo {
    fn handle<'a>(&'a self, request: &'a Request) -> RetFut<'a, Result<Response<Bytes>, Error>> {
        box_fut!({
            let target = request.target();
            let description = Description {
                command: request.method().as_str(),
                version: format!("{:?}", request.version()),
                origin: (request.address().ip().to_string(), request.address().port()),
                url: request.raw_path(),
                path: target.path,
                params: "",
                query: target.query,
                fragment: target.fragment,
                headers: Headers(request.headers()),
                postdata: request.body().map(|body| String::from_utf8_lossy(body)),
            };
            let mut body = serde_json::to_vec_pretty(&description).map_err(Error::handler)?;
            body.push(chars::LF);
            super::response(StatusCode::OK, "application/json", body)
        })
    }
}
