//! Handlers and the registry which loads them.
//!
//! A path without a static file is served by a handler if a *handler source unit*
//! (`<path>.hook`) exists next to where the file would be. The unit is a TOML manifest
//! naming a handler in the [`HandlerCatalog`]:
//!
//! ```toml
//! # echo.hook; `handler` defaults to the file stem
//! handler = "echo"
//!
//! [headers]
//! cache-control = "no-store"
//! ```
//!
//! The [`HandlerRegistry`] loads each unit at most once and keeps the handler for
//! the lifetime of the server.

use crate::prelude::{threading::*, *};
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::BTreeMap;

/// A boxed future, returned by [`Handler::handle`].
pub type RetFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Boxes the async block `$code`, capturing by move.
///
/// Shorthand for implementing [`Handler::handle`]:
///
/// ```
/// use kvarn_harness::prelude::*;
///
/// struct Hello;
/// impl Handler for Hello {
///     fn handle<'a>(&'a self, _: &'a Request) -> RetFut<'a, Result<Response<Bytes>, Error>> {
///         box_fut!({
///             Response::builder()
///                 .body(Bytes::from_static(b"hello\n"))
///                 .map_err(Error::handler)
///         })
///     }
/// }
/// ```
#[macro_export]
macro_rules! box_fut {
    ($code:block) => {
        Box::pin(async move { $code })
    };
}

/// Generates responses for a path.
///
/// The handler produces the complete response. The server adds
/// `server`, `date`, `connection: close`, and a `content-length` if it's missing.
pub trait Handler: Send + Sync {
    /// Answers `request`.
    ///
    /// An `Err` becomes a `500` naming the handler source, and is reported to the
    /// [`ErrorSink`]. So does a panic.
    fn handle<'a>(&'a self, request: &'a Request) -> RetFut<'a, Result<Response<Bytes>, Error>>;
}

/// The identifier of a loaded handler.
///
/// It's `fixtures.` followed by the path of the handler source unit relative to the
/// fixture root, with `/`, `\`, `-`, `.`, and `%` replaced by `_`.
/// This means `a-b.hook` and `a_b.hook` share a key; the first one loaded wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[must_use]
pub struct HandlerKey(CompactString);
impl HandlerKey {
    /// The key of the handler source unit at `source`, under `root`.
    pub fn from_source(root: &Path, source: &Path) -> Self {
        let relative = source.strip_prefix(root).unwrap_or(source);
        let relative = relative.to_string_lossy();
        let mut key = CompactString::new("fixtures.");
        key.extend(relative.chars().map(|c| match c {
            '/' | '\\' | '-' | '.' | '%' => '_',
            c => c,
        }));
        Self(key)
    }
    /// The key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl Display for HandlerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    handler: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

/// A parsed handler source unit.
#[derive(Debug, Clone)]
#[must_use]
pub struct Manifest {
    path: PathBuf,
    handler: String,
    headers: HeaderMap,
}
impl Manifest {
    /// Parses the manifest at `path` from `text`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandlerLoad`] if `text` isn't valid TOML, has unknown fields,
    /// or has headers which aren't valid HTTP.
    pub fn parse(path: impl Into<PathBuf>, text: &str) -> Result<Self, Error> {
        let path = path.into();
        let load_error = |message: String| Error::HandlerLoad {
            path: path.clone(),
            message,
        };
        let raw: RawManifest = toml::from_str(text).map_err(|err| load_error(err.to_string()))?;

        let mut headers = HeaderMap::with_capacity(raw.headers.len());
        for (name, value) in &raw.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| load_error(format!("invalid header name {name:?}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| load_error(format!("invalid value of header {name}")))?;
            headers.insert(name, value);
        }

        let handler = match raw.handler {
            Some(handler) => handler,
            None => path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .ok_or_else(|| load_error("no handler named and no file stem".into()))?,
        };

        Ok(Self {
            path,
            handler,
            headers,
        })
    }
    /// Reads and parses the manifest at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandlerLoad`] if the file can't be read, and the errors of [`Self::parse`].
    pub async fn load(path: &Path) -> Result<Self, Error> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| Error::HandlerLoad {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        Self::parse(path, &text)
    }
    /// The path of the handler source unit.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
    /// The name of the handler in the [`HandlerCatalog`].
    #[must_use]
    pub fn handler(&self) -> &str {
        &self.handler
    }
    /// Extra headers added to every response of the handler.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// Creates a handler from its [`Manifest`].
pub type HandlerFactory = Arc<dyn Fn(&Manifest) -> Result<Arc<dyn Handler>, Error> + Send + Sync>;

/// The handlers manifests can name.
///
/// [`HandlerCatalog::default`] contains the built-in [`fixtures`].
#[derive(Clone)]
#[must_use]
pub struct HandlerCatalog {
    factories: HashMap<CompactString, HandlerFactory>,
}
impl HandlerCatalog {
    /// A catalog without any handlers.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }
    /// Adds the handler `name`, created by `factory`. Replaces any previous handler of that name.
    pub fn insert(
        &mut self,
        name: impl Into<CompactString>,
        factory: impl Fn(&Manifest) -> Result<Arc<dyn Handler>, Error> + Send + Sync + 'static,
    ) -> &mut Self {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }
    /// Adds the handler `name` which is the same for every manifest naming it.
    pub fn insert_handler(
        &mut self,
        name: impl Into<CompactString>,
        handler: Arc<dyn Handler>,
    ) -> &mut Self {
        self.insert(name, move |_| Ok(Arc::clone(&handler)))
    }
    /// Whether the catalog contains `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
    /// Creates the handler `manifest` names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownHandler`] if the catalog doesn't contain it,
    /// and any error from the factory.
    pub fn instantiate(&self, manifest: &Manifest) -> Result<Arc<dyn Handler>, Error> {
        let factory = self
            .factories
            .get(manifest.handler())
            .ok_or_else(|| Error::UnknownHandler(manifest.handler().to_owned()))?;
        factory(manifest)
    }
}
impl Default for HandlerCatalog {
    fn default() -> Self {
        let mut catalog = Self::empty();
        fixtures::register(&mut catalog);
        catalog
    }
}
impl Debug for HandlerCatalog {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().map(CompactString::as_str).collect();
        names.sort_unstable();
        f.debug_struct("HandlerCatalog")
            .field("factories", &names)
            .finish()
    }
}

/// Adds headers from the manifests to the responses of the wrapped handler.
///
/// Headers the handler set itself are left alone.
struct WithHeaders {
    inner: Arc<dyn Handler>,
    headers: HeaderMap,
}
impl Handler for WithHeaders {
    fn handle<'a>(&'a self, request: &'a Request) -> RetFut<'a, Result<Response<Bytes>, Error>> {
        box_fut!({
            let mut response = self.inner.handle(request).await?;
            let headers = response.headers_mut();
            for (name, value) in &self.headers {
                if !headers.contains_key(name) {
                    headers.insert(name, value.clone());
                }
            }
            Ok(response)
        })
    }
}

/// Lazily loads and caches handlers, keyed by [`HandlerKey`].
///
/// Each key is initialised at most once, even under concurrent first loads;
/// every caller gets the same [`Arc`]. Failed loads aren't cached.
#[must_use]
pub struct HandlerRegistry {
    root: PathBuf,
    catalog: HandlerCatalog,
    package_headers: HeaderMap,
    entries: DashMap<HandlerKey, Arc<OnceCell<Arc<dyn Handler>>>>,
}
impl HandlerRegistry {
    /// Creates a registry for the handler source units under `root`.
    ///
    /// The package unit `__init__.hook` at `root` is read now, if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandlerLoad`] if the package unit exists but can't be read or parsed.
    pub async fn new(root: impl Into<PathBuf>, catalog: HandlerCatalog) -> Result<Self, Error> {
        let root = root.into();
        let package = root.join(format!(
            "{}{}",
            resolve::PACKAGE_UNIT_STEM,
            resolve::HANDLER_SUFFIX
        ));
        let package_headers = match tokio::fs::metadata(&package).await {
            Ok(_) => {
                let manifest = Manifest::load(&package).await?;
                debug!("Loaded package unit {}", package.display());
                manifest.headers
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => HeaderMap::new(),
            Err(err) => {
                return Err(Error::HandlerLoad {
                    path: package,
                    message: err.to_string(),
                })
            }
        };
        Ok(Self {
            root,
            catalog,
            package_headers,
            entries: DashMap::new(),
        })
    }
    /// The fixture root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
    /// Loads the handler of the handler source unit at `source`.
    ///
    /// Returns the cached handler if the key of `source` was loaded before.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandlerLoad`] if the unit can't be read or parsed,
    /// [`Error::UnknownHandler`] if it names a handler not in the catalog,
    /// and any error from the handler's factory.
    pub async fn load(&self, source: &Path) -> Result<Arc<dyn Handler>, Error> {
        let key = HandlerKey::from_source(&self.root, source);
        // The map's guard must not be held across the await.
        let cell = Arc::clone(&self.entries.entry(key.clone()).or_default());
        let handler = cell
            .get_or_try_init(|| self.initialize(source, &key))
            .await?;
        Ok(Arc::clone(handler))
    }
    async fn initialize(&self, source: &Path, key: &HandlerKey) -> Result<Arc<dyn Handler>, Error> {
        let manifest = Manifest::load(source).await?;
        let handler = self.catalog.instantiate(&manifest)?;

        let mut headers = self.package_headers.clone();
        for (name, value) in manifest.headers() {
            headers.insert(name, value.clone());
        }
        debug!(
            "Loaded handler {key} ({:?}) from {}",
            manifest.handler(),
            source.display()
        );
        if headers.is_empty() {
            Ok(handler)
        } else {
            Ok(Arc::new(WithHeaders {
                inner: handler,
                headers,
            }))
        }
    }
    /// Whether the handler with `key` is loaded.
    #[must_use]
    pub fn is_loaded(&self, key: &HandlerKey) -> bool {
        self.entries
            .get(key)
            .map_or(false, |cell| cell.initialized())
    }
    /// The number of loaded handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }
    /// Whether no handler is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
impl Debug for HandlerRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("root", &self.root)
            .field("catalog", &self.catalog)
            .field("package_headers", &self.package_headers)
            .field("loaded", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn www() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("www")
    }

    struct Counted;
    impl Handler for Counted {
        fn handle<'a>(&'a self, _: &'a Request) -> RetFut<'a, Result<Response<Bytes>, Error>> {
            box_fut!({
                Response::builder()
                    .header("x-counted", "handler")
                    .body(Bytes::from_static(b"counted\n"))
                    .map_err(Error::handler)
            })
        }
    }

    fn counting_catalog(count: &Arc<AtomicUsize>) -> HandlerCatalog {
        let mut catalog = HandlerCatalog::default();
        let count = Arc::clone(count);
        catalog.insert("counted", move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Counted) as Arc<dyn Handler>)
        });
        catalog
    }

    #[test]
    fn keys() {
        let root = Path::new("/srv/www");
        assert_eq!(
            HandlerKey::from_source(root, Path::new("/srv/www/url-encoding.hook")).as_str(),
            "fixtures.url_encoding_hook"
        );
        assert_eq!(
            HandlerKey::from_source(root, Path::new("/srv/www/sub/a%20b.hook")).as_str(),
            "fixtures.sub_a_20b_hook"
        );
        assert_eq!(
            HandlerKey::from_source(root, Path::new("/srv/www/a-b.hook")),
            HandlerKey::from_source(root, Path::new("/srv/www/a_b.hook")),
        );
    }

    #[test]
    fn manifests() {
        let manifest = Manifest::parse("/srv/www/echo.hook", "").unwrap();
        assert_eq!(manifest.handler(), "echo");
        assert!(manifest.headers().is_empty());

        let manifest = Manifest::parse(
            "/srv/www/other.hook",
            "handler = \"status\"\n[headers]\nx-fixture = \"yes\"\n",
        )
        .unwrap();
        assert_eq!(manifest.handler(), "status");
        assert_eq!(manifest.headers().get("x-fixture").unwrap(), "yes");

        assert!(matches!(
            Manifest::parse("/srv/www/bad.hook", "handler = ["),
            Err(Error::HandlerLoad { .. })
        ));
        assert!(matches!(
            Manifest::parse("/srv/www/bad.hook", "[headers]\n\"bad name\" = \"x\"\n"),
            Err(Error::HandlerLoad { .. })
        ));
        assert!(matches!(
            Manifest::parse("/srv/www/bad.hook", "unknown = 1\n"),
            Err(Error::HandlerLoad { .. })
        ));
    }

    #[test]
    fn catalog() {
        let catalog = HandlerCatalog::default();
        for name in ["delay", "echo", "status", "url-encoding"] {
            assert!(catalog.contains(name), "{name}");
        }
        let manifest = Manifest::parse("/srv/www/x.hook", "handler = \"nope\"").unwrap();
        assert!(matches!(
            catalog.instantiate(&manifest),
            Err(Error::UnknownHandler(name)) if name == "nope"
        ));
        assert!(!HandlerCatalog::empty().contains("echo"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_loads_initialize_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(
            HandlerRegistry::new(www(), counting_catalog(&count))
                .await
                .unwrap(),
        );
        let source = www().join("counted.hook");

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let source = source.clone();
                spawn(async move { registry.load(&source).await.unwrap() })
            })
            .collect();
        let mut handlers = Vec::new();
        for task in tasks {
            handlers.push(task.await.unwrap());
        }

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(handlers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
        assert!(registry.is_loaded(&HandlerKey::from_source(&www(), &source)));

        // Loading again later returns the cached handler.
        let again = registry.load(&source).await.unwrap();
        assert!(Arc::ptr_eq(&again, &handlers[0]));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_loads_are_not_cached() {
        let registry = HandlerRegistry::new(www(), HandlerCatalog::default())
            .await
            .unwrap();
        let broken = www().join("broken.hook");
        assert!(matches!(
            registry.load(&broken).await,
            Err(Error::HandlerLoad { .. })
        ));
        assert!(matches!(
            registry.load(&www().join("missing.hook")).await,
            Err(Error::HandlerLoad { .. })
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn manifest_and_package_headers() {
        let count = Arc::new(AtomicUsize::new(0));
        let registry = HandlerRegistry::new(www(), counting_catalog(&count))
            .await
            .unwrap();
        let handler = registry.load(&www().join("counted.hook")).await.unwrap();
        let request = crate::request::tests::request(b"GET /counted HTTP/1.1\r\n\r\n");
        let response = handler.handle(&request).await.unwrap();
        let headers = response.headers();
        // from the package unit
        assert_eq!(headers.get("x-fixture-package").unwrap(), "harness");
        // the unit overrides the package unit
        assert_eq!(headers.get("x-fixture-source").unwrap(), "counted");
        // the handler's own header wins
        assert_eq!(headers.get("x-counted").unwrap(), "handler");
    }
}
