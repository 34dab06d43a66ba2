//! The built-in fixture handlers.
//!
//! Each is registered in [`HandlerCatalog::default`] under the name given here.
//! A handler source unit names one of them, e.g. `echo.hook` containing nothing
//! (the handler defaults to the file stem) serves [`echo::Echo`] at `/echo`.
//!
//! - `delay` - [`delay::Delay`]
//! - `echo` - [`echo::Echo`]
//! - `status` - [`status::Status`]
//! - `url-encoding` - [`url_encoding::UrlEncoding`]

use crate::prelude::*;

pub mod delay;
pub mod echo;
pub mod status;
pub mod url_encoding;

/// Adds the built-in handlers to `catalog`.
pub fn register(catalog: &mut HandlerCatalog) {
    catalog
        .insert_handler("delay", Arc::new(delay::Delay))
        .insert_handler("echo", Arc::new(echo::Echo))
        .insert_handler("status", Arc::new(status::Status))
        .insert_handler("url-encoding", Arc::new(url_encoding::UrlEncoding));
}

/// Builds a response with `content-type` and an exact `content-length`.
pub(crate) fn response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Result<Response<Bytes>, Error> {
    let body = body.into();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, body.len())
        .body(body)
        .map_err(Error::handler)
}
