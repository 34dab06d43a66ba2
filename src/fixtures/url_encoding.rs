//! Probe pages for how clients encode non-UTF-8 URLs.
//!
//! All queries are Shift_JIS percent-encoded words, compared byte for byte
//! with what the client sent.

use crate::prelude::*;

/// Serves the Shift_JIS URL-encoding probe pages, selected by the raw query.
///
/// | query | page |
/// |---|---|
/// | `/` | `302` to `?/%83y%81[%83W` |
/// | `/f` | a frameset of `?/%98g` and `?/%95s%96%D1%82%C8%98_%91%88` |
/// | `/r` | a page loading the script `?/%8F%91` |
/// | `/re` | a page loading the images `?/%8C%CC%8F%E1` and `?/%89i%8Bv` |
/// | `/%83y%81[%83W`, `/%98g` | `PASS` |
/// | `/%95s%96%D1%82%C8%98_%91%88` | `FRAME` |
/// | `/%8F%91` | a script writing `PASS` |
/// | `/%8C%CC%8F%E1` | `500` |
/// | `/%89i%8Bv` | `204` after 5 seconds |
///
/// Anything else is a `404` naming the raw path.
#[derive(Debug)]
pub struct UrlEncoding;

const HTML: &str = "text/html; charset=utf-8";

fn page(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Result<Response<Bytes>, Error> {
    super::response(status, content_type, body)
}
fn html(body: &'static str) -> Result<Response<Bytes>, Error> {
    page(StatusCode::OK, HTML, body)
}
fn redirect(target: &'static str) -> Result<Response<Bytes>, Error> {
    let mut response = page(
        StatusCode::FOUND,
        HTML,
        format!(
            "<!doctype html><a href=\"{}\">Go here</a>",
            utils::html_escape(target)
        ),
    )?;
    response
        .headers_mut()
        .insert(header::LOCATION, HeaderValue::from_static(target));
    Ok(response)
}

impl Handler for UrlEncoding {
    fn handle<'a>(&'a self, request: &'a Request) -> RetFut<'a, Result<Response<Bytes>, Error>> {
        box_fut!({
            match request.query() {
                "/" => redirect("?/%83y%81[%83W"),
                "/f" => html(
                    "<!doctype html public \"-//W3C//DTD HTML 4.01 Frameset//EN\" \
                    \"http://www.w3.org/TR/html4/frameset.dtd\">\
                    <html><head><title>framed</title></head>\
                    <frameset cols=\"50%,50%\">\
                    <frame src=\"?/%98g\" name=\"a\">\
                    <frame src=\"?/%95s%96%D1%82%C8%98_%91%88\" name=\"b\">\
                    </frameset>",
                ),
                "/r" => html("<!doctype html><script src=\"?/%8F%91\"></script>"),
                "/re" => html(
                    "<!doctype html>\
                    <img src=\"?/%8C%CC%8F%E1\">\
                    <img src=\"?/%89i%8Bv\">",
                ),
                "/%83y%81[%83W" | "/%98g" => html("<!doctype html><h1>PASS</h1>"),
                "/%95s%96%D1%82%C8%98_%91%88" => html("<!doctype html><h1>FRAME</h1>"),
                "/%8F%91" => page(
                    StatusCode::OK,
                    "application/javascript",
                    "window.onload=function(){document.body.innerHTML=\"<h1>PASS</h1>\";};",
                ),
                "/%8C%CC%8F%E1" => page(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    HTML,
                    "<!doctype html>internal server error",
                ),
                "/%89i%8Bv" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    page(StatusCode::NO_CONTENT, HTML, "")
                }
                _ => page(
                    StatusCode::NOT_FOUND,
                    HTML,
                    format!(
                        "<!doctype html><title>404 Not Found</title><p>URL not found: {}</p>",
                        utils::html_escape(request.raw_path())
                    ),
                ),
            }
        })
    }
}
