//! Answers with a chosen status and extra headers.

use crate::prelude::*;

/// Answers with the status and headers named in the query.
///
/// `?status=302&Location=/elsewhere` answers `302` with the header `Location: /elsewhere`.
/// `status` may be given once; `Content-Type` and `Content-Length` can't be overridden.
/// A bare `?404` works too. Anything else answers `400` with the reason in the body.
///
/// The body is `<!doctype html><h1>Status: N</h1>`, followed by a `<pre>` listing the
/// extra headers, if any.
#[derive(Debug)]
pub struct Status;

struct Parsed {
    status: StatusCode,
    headers: Vec<(String, String)>,
}

fn parse(query: &str) -> Result<Parsed, String> {
    let pairs = utils::query_pairs(query).map_err(|field| format!("bad query field: {field:?}"))?;
    let mut status = None;
    let mut headers = Vec::new();
    for (name, value) in pairs {
        match name.as_str() {
            "status" => {
                if status.is_some() {
                    return Err("status can only be specified once".into());
                }
                status = Some(status_code(&value)?);
            }
            "Content-Type" | "Content-Length" => {
                return Err(format!("cannot override {name}"));
            }
            _ => headers.push((name, value)),
        }
    }
    Ok(Parsed {
        status: status.unwrap_or(StatusCode::OK),
        headers,
    })
}
fn status_code(value: &str) -> Result<StatusCode, String> {
    let code: u16 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid status code: {value:?}"))?;
    StatusCode::from_u16(code).map_err(|_| format!("invalid status code: {code}"))
}

fn status_body(status: StatusCode) -> String {
    format!("<!doctype html><h1>Status: {}</h1>", status.as_u16())
}

impl Handler for Status {
    fn handle<'a>(&'a self, request: &'a Request) -> RetFut<'a, Result<Response<Bytes>, Error>> {
        box_fut!({
            let query = request.query();
            let (status, headers, body) = match parse(query) {
                Ok(Parsed { status, headers }) => {
                    let mut body = status_body(status);
                    if !headers.is_empty() {
                        body.push_str("<pre>");
                        for (name, value) in &headers {
                            body.push_str(&utils::html_escape(&format!("{name}: {value}\n")));
                        }
                        body.push_str("</pre>");
                    }
                    (status, headers, body)
                }
                Err(message) => match status_code(query) {
                    Ok(status) => (status, Vec::new(), status_body(status)),
                    Err(_) => {
                        let mut body = status_body(StatusCode::BAD_REQUEST);
                        body.push_str("<pre>");
                        body.push_str(&utils::html_escape(&message));
                        body.push_str("</pre>");
                        (StatusCode::BAD_REQUEST, Vec::new(), body)
                    }
                },
            };

            let mut response = super::response(status, "text/html; charset=utf-8", body)?;
            for (name, value) in headers {
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(Error::handler)?;
                let value = HeaderValue::from_str(&value).map_err(Error::handler)?;
                response.headers_mut().append(name, value);
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{body, request};
    use super::*;

    async fn get(target: &str) -> Response<Bytes> {
        let raw = format!("GET {target} HTTP/1.1\r\n\r\n");
        Status.handle(&request(raw.as_bytes())).await.unwrap()
    }

    #[tokio::test]
    async fn plain() {
        let response = get("/status").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(&response), "<!doctype html><h1>Status: 200</h1>");
        assert_eq!(
            response.headers()["content-type"],
            "text/html; charset=utf-8"
        );
    }

    #[tokio::test]
    async fn status_and_headers() {
        let response = get("/status?status=302&Location=%2Fsomewhere&X-Note=a+%3Cb%3E").await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()["location"], "/somewhere");
        assert_eq!(response.headers()["x-note"], "a <b>");
        assert_eq!(
            body(&response),
            "<!doctype html><h1>Status: 302</h1>\
            <pre>Location: /somewhere\nX-Note: a &lt;b&gt;\n</pre>"
        );
    }

    #[tokio::test]
    async fn bare_code() {
        let response = get("/status?404").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body(&response), "<!doctype html><h1>Status: 404</h1>");
    }

    #[tokio::test]
    async fn refusals() {
        for (target, reason) in [
            ("/status?status=200&status=201", "status can only be specified once"),
            ("/status?Content-Type=text/plain", "cannot override Content-Type"),
            ("/status?Content-Length=4", "cannot override Content-Length"),
            ("/status?status=abc", "invalid status code: \"abc\""),
            ("/status?nonsense", "bad query field: \"nonsense\""),
        ] {
            let response = get(target).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{target}");
            let body = body(&response);
            assert!(body.starts_with("<!doctype html><h1>Status: 400</h1><pre>"));
            assert!(body.contains(reason), "{target}: {body}");
        }
    }
}
