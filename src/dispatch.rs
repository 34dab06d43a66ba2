//! Per-request logic: static files, directories, and handlers.
//!
//! The server reads the head, checks it with [`check_head`], reads the body,
//! and hands the [`Request`] to [`Dispatcher::dispatch`]. The response is shaped
//! by [`finalize`] before it's written.

use crate::prelude::{threading::*, *};

/// Creates a response with `code` and a hardcoded HTML body mentioning `message`.
pub fn error_response(code: StatusCode, message: Option<&str>) -> Response<Bytes> {
    let body = utils::hardcoded_error_body(code, message);
    let mut response = Response::new(body);
    *response.status_mut() = code;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

/// Checks whether the request with `method` and `headers` can be served,
/// before its body is read.
///
/// Returns the length of the body to read, if the method has one.
///
/// # Errors
///
/// Returns the response to send instead of dispatching:
/// - `501` for methods other than `GET`, `HEAD`, and `POST`.
/// - `400` (`text/plain`) if a `POST` doesn't declare a valid `content-length`.
pub fn check_head(method: &Method, headers: &HeaderMap) -> Result<Option<usize>, Response<Bytes>> {
    if ![Method::GET, Method::HEAD, Method::POST].contains(method) {
        return Err(error_response(
            StatusCode::NOT_IMPLEMENTED,
            Some(&format!("Unsupported method ({:?})", method.as_str())),
        ));
    }
    if !utils::method_has_request_body(method) {
        return Ok(None);
    }
    match utils::content_length(headers) {
        Some(len) => Ok(Some(len)),
        None => {
            let value = headers
                .get(header::CONTENT_LENGTH)
                .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());
            let error = Error::InvalidContentLength(value);
            debug!("Refusing request: {error}");
            let value = match &error {
                Error::InvalidContentLength(Some(value)) => format!("{value:?}"),
                _ => "None".to_owned(),
            };
            let mut response = Response::new(Bytes::from(format!(
                "No or invalid Content-Length in POST ({value})"
            )));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            Err(response)
        }
    }
}

/// Adds the headers every response has and strips the body of responses to `HEAD`.
///
/// `server`, `date`, and `connection: close` are always set.
/// `content-length` is set to the length of the body if the handler left it out.
/// Requests older than HTTP/1.1 (`version`) are answered with `HTTP/1.0`.
pub fn finalize(
    mut response: Response<Bytes>,
    method: &Method,
    version: Version,
) -> Response<Bytes> {
    *response.version_mut() = match version {
        Version::HTTP_09 | Version::HTTP_10 => Version::HTTP_10,
        _ => Version::HTTP_11,
    };
    let len = response.body().len();
    let headers = response.headers_mut();
    if !headers.contains_key(header::CONTENT_LENGTH) {
        utils::set_content_length(headers, len);
    }
    utils::replace_header(
        headers,
        &header::SERVER,
        HeaderValue::from_static(concat!("kvarn-harness/", env!("CARGO_PKG_VERSION"))),
    );
    if let Ok(date) = HeaderValue::from_str(&utils::http_date(time::OffsetDateTime::now_utc())) {
        utils::replace_header(headers, &header::DATE, date);
    }
    utils::replace_header(headers, &header::CONNECTION, HeaderValue::from_static("close"));

    if !utils::method_has_response_body(method) {
        *response.body_mut() = Bytes::new();
    }
    response
}

/// Gets the content type of the file at `path` from its extension.
#[must_use]
pub fn content_type(path: &Path) -> Cow<'static, str> {
    let extension = path
        .extension()
        .map(|extension| extension.to_string_lossy().to_ascii_lowercase());
    match extension.as_deref() {
        Some("htm" | "html") => "text/html".into(),
        Some("css") => "text/css".into(),
        Some("js") => "application/javascript".into(),
        Some("json") => "application/json".into(),
        _ => mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .into(),
    }
}

/// Serves requests from the fixture root.
#[must_use]
pub struct Dispatcher {
    resolver: Resolver,
    registry: HandlerRegistry,
    verbosity: Verbosity,
    error_sink: ErrorSink,
}
impl Debug for Dispatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("resolver", &self.resolver)
            .field("registry", &self.registry)
            .field("verbosity", &self.verbosity)
            .field("error_sink", &"[error sink]".as_clean())
            .finish()
    }
}
impl Dispatcher {
    /// Creates a dispatcher resolving with `resolver` and loading handlers from `registry`.
    pub fn new(
        resolver: Resolver,
        registry: HandlerRegistry,
        verbosity: Verbosity,
        error_sink: ErrorSink,
    ) -> Self {
        Self {
            resolver,
            registry,
            verbosity,
            error_sink,
        }
    }
    /// The handler registry.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }
    /// The path resolver.
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Answers `request`.
    ///
    /// 1. Paths naming handler source units are `404`.
    /// 2. Existing files are served, and directories redirected to have a trailing
    ///    slash, or served as their index or a listing.
    /// 3. If `<path>.hook` exists, the handler it names answers.
    /// 4. Else, `404`.
    ///
    /// A handler which fails to load, returns an error, or panics results in a `500`,
    /// and the fault is reported to the [`ErrorSink`].
    pub async fn dispatch(&self, request: Arc<Request>) -> Response<Bytes> {
        let path = self.resolver.resolve(request.raw_path());
        if self.verbosity.echoes() {
            info!(
                "## {}: {} {} -> {path}",
                if request.is_secure() { "HTTPS" } else { "HTTP" },
                request.method(),
                request.raw_path(),
            );
        }

        if path.is_handler_source() {
            return self.not_found(&request);
        }

        match tokio::fs::metadata(path.as_path()).await {
            Ok(meta) if meta.is_dir() => return self.directory(&request, &path).await,
            Ok(meta) if meta.is_file() && !path.is_directory_hint() => {
                return match file(path.as_path(), &meta).await {
                    Ok(response) => response,
                    Err(err) => self.fault(&request, path.as_path(), err),
                };
            }
            _ => {}
        }

        let source = path.handler_source();
        if !path.is_directory_hint() && tokio::fs::metadata(&source).await.is_ok() {
            return match self.handle(&source, Arc::clone(&request)).await {
                Ok(response) => response,
                Err(err) => self.fault(&request, &source, err),
            };
        }

        self.not_found(&request)
    }

    async fn handle(&self, source: &Path, request: Arc<Request>) -> Result<Response<Bytes>, Error> {
        let handler = self.registry.load(source).await?;
        // A task of its own, so a panic is caught.
        let task = spawn(async move { handler.handle(&request).await });
        match task.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => {
                let panic = err.into_panic();
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_owned());
                Err(Error::HandlerPanicked(message))
            }
            Err(err) => Err(Error::HandlerFault(err.to_string())),
        }
    }

    fn fault(&self, request: &Request, source: &Path, error: Error) -> Response<Bytes> {
        (self.error_sink)(Fault {
            scheme: request.scheme(),
            address: Some(request.address()),
            error,
        });
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            Some(&format!("Internal Server Error in {}", source.display())),
        )
    }
    fn not_found(&self, request: &Request) -> Response<Bytes> {
        error_response(
            StatusCode::NOT_FOUND,
            Some(&format!("File not found: {}", request.raw_path())),
        )
    }

    async fn directory(&self, request: &Request, path: &CanonicalPath) -> Response<Bytes> {
        if !path.is_directory_hint() {
            let target = request.target();
            let mut location = String::with_capacity(request.raw_path().len() + 1);
            location.push_str(target.path);
            location.push('/');
            location.push_str(&request.raw_path()[target.path.len()..]);
            let mut response = error_response(StatusCode::MOVED_PERMANENTLY, None);
            match HeaderValue::from_str(&location) {
                Ok(location) => {
                    response.headers_mut().insert(header::LOCATION, location);
                }
                Err(_) => return self.not_found(request),
            }
            return response;
        }

        for index in ["index.html", "index.htm"] {
            let index = path.as_path().join(index);
            if let Ok(meta) = tokio::fs::metadata(&index).await {
                if meta.is_file() {
                    return match file(&index, &meta).await {
                        Ok(response) => response,
                        Err(err) => self.fault(request, &index, err),
                    };
                }
            }
        }

        match listing(request, path.as_path()).await {
            Ok(response) => response,
            Err(err) => self.fault(request, path.as_path(), err),
        }
    }
}

async fn file(path: &Path, meta: &std::fs::Metadata) -> Result<Response<Bytes>, Error> {
    let contents = tokio::fs::read(path).await?;
    let mut response = Response::new(Bytes::from(contents));
    let headers = response.headers_mut();
    if let Ok(content_type) = HeaderValue::from_str(&content_type(path)) {
        headers.insert(header::CONTENT_TYPE, content_type);
    }
    let len = response.body().len();
    utils::set_content_length(response.headers_mut(), len);
    if let Ok(modified) = meta.modified() {
        let modified = utils::http_date(time::OffsetDateTime::from(modified));
        if let Ok(modified) = HeaderValue::from_str(&modified) {
            response.headers_mut().insert(header::LAST_MODIFIED, modified);
        }
    }
    Ok(response)
}

async fn listing(request: &Request, path: &Path) -> Result<Response<Bytes>, Error> {
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(path).await?;
    while let Some(entry) = dir.next_entry().await? {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(resolve::HANDLER_SUFFIX) {
            continue;
        }
        if entry.file_type().await?.is_dir() {
            name.push('/');
        }
        entries.push(name);
    }
    entries.sort_unstable_by_key(|name| name.to_lowercase());

    let title = format!(
        "Directory listing for {}",
        utils::html_escape(request.path())
    );
    let mut body = format!(
        "<!DOCTYPE HTML>\n<html>\n<head>\n\
        <meta http-equiv=\"Content-Type\" content=\"text/html; charset=utf-8\">\n\
        <title>{title}</title>\n</head>\n<body>\n<h1>{title}</h1>\n<hr>\n<ul>\n"
    );
    for name in &entries {
        body.push_str(&format!(
            "<li><a href=\"{}\">{}</a></li>\n",
            utils::percent_encode_path(name),
            utils::html_escape(name)
        ));
    }
    body.push_str("</ul>\n<hr>\n</body>\n</html>\n");

    let mut response = Response::new(Bytes::from(body));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    Ok(response)
}
