//! Maps request paths to files under the fixture root.
//!
//! See [`Resolver::resolve`] for the algorithm. The result never leaves the root,
//! whatever the client sends.

use crate::prelude::*;
use std::sync::Mutex;

/// The suffix of handler source units.
pub const HANDLER_SUFFIX: &str = ".hook";
/// The stem of the package initialisation unit.
pub const PACKAGE_UNIT_STEM: &str = "__init__";

/// A path inside the fixture root, as resolved from a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct CanonicalPath {
    path: PathBuf,
    directory_hint: bool,
}
impl CanonicalPath {
    /// The filesystem path, without any trailing separator.
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.path
    }
    /// Whether the request path ended in `/`.
    #[must_use]
    pub fn is_directory_hint(&self) -> bool {
        self.directory_hint
    }
    /// Whether this path names a handler source unit, directly or as a package unit.
    ///
    /// These must never be served.
    #[must_use]
    pub fn is_handler_source(&self) -> bool {
        let path = self.path.as_os_str().to_string_lossy();
        path.ends_with(HANDLER_SUFFIX) || path.ends_with(PACKAGE_UNIT_STEM)
    }
    /// The handler source unit which would implement this path.
    #[must_use]
    pub fn handler_source(&self) -> PathBuf {
        let mut source = self.path.clone().into_os_string();
        source.push(HANDLER_SUFFIX);
        source.into()
    }
}
impl Display for CanonicalPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.path.display(), f)?;
        if self.directory_hint {
            f.write_str("/")?;
        }
        Ok(())
    }
}

/// Resolves request paths relative to a fixture root.
///
/// The most recent resolution is cached, since a request is usually resolved
/// several times while being dispatched.
#[derive(Debug)]
#[must_use]
pub struct Resolver {
    root: PathBuf,
    last: Option<Mutex<Option<(String, CanonicalPath)>>>,
}
impl Resolver {
    /// Creates a new resolver serving from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            last: Some(Mutex::new(None)),
        }
    }
    /// Disables the cache of the last resolution.
    pub fn without_cache(mut self) -> Self {
        self.last = None;
        self
    }
    /// The fixture root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `raw`, the request target as sent by the client.
    ///
    /// 1. The query and fragment are removed.
    /// 2. The path is percent decoded, percent encoded again, and lower-cased.
    /// 3. `.` and `..` segments are collapsed. A `..` at the top is dropped,
    ///    as are empty segments.
    /// 4. The remaining segments are joined onto the root.
    ///
    /// A trailing `/` is kept as [`CanonicalPath::is_directory_hint`].
    pub fn resolve(&self, raw: &str) -> CanonicalPath {
        if let Some(last) = &self.last {
            if let Ok(last) = last.lock() {
                if let Some((cached_raw, cached)) = &*last {
                    if cached_raw == raw {
                        return cached.clone();
                    }
                }
            }
        }

        let resolved = self.resolve_uncached(raw);

        if let Some(last) = &self.last {
            if let Ok(mut last) = last.lock() {
                *last = Some((raw.to_owned(), resolved.clone()));
            }
        }
        resolved
    }
    fn resolve_uncached(&self, raw: &str) -> CanonicalPath {
        let end = raw.find(['?', '#']).unwrap_or(raw.len());
        let path = &raw[..end];

        let decoded = utils::percent_decode(path);
        let path = utils::percent_encode_path(&decoded).to_ascii_lowercase();
        let directory_hint = path.ends_with('/');

        let mut segments: Vec<&str> = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                segment => segments.push(segment),
            }
        }

        let mut resolved = self.root.clone();
        resolved.extend(segments);
        CanonicalPath {
            path: resolved,
            directory_hint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> Resolver {
        Resolver::new("/srv/www")
    }

    #[test]
    fn plain() {
        let path = resolver().resolve("/index.html");
        assert_eq!(path.as_path(), Path::new("/srv/www/index.html"));
        assert!(!path.is_directory_hint());
        assert_eq!(resolver().resolve("").as_path(), Path::new("/srv/www"));
    }

    #[test]
    fn query_and_fragment() {
        let resolver = resolver();
        assert_eq!(
            resolver.resolve("/echo?a=b/../../x#frag").as_path(),
            Path::new("/srv/www/echo")
        );
        assert_eq!(
            resolver.resolve("/page#x?y").as_path(),
            Path::new("/srv/www/page")
        );
    }

    #[test]
    fn traversal() {
        let resolver = resolver();
        for raw in [
            "/../../etc/passwd",
            "../etc/passwd",
            "/a/../../../etc/passwd",
            "/%2e%2e/%2E%2E/etc/passwd",
            "/..%2f..%2fetc/passwd",
            "//etc/passwd",
            "/./etc/./passwd",
        ] {
            let path = resolver.resolve(raw);
            assert!(path.as_path().starts_with("/srv/www"), "{raw} -> {path}");
            assert!(!path.as_path().components().any(|c| c.as_os_str() == ".."));
            assert_eq!(path.as_path(), Path::new("/srv/www/etc/passwd"), "{raw}");
        }
    }

    #[test]
    fn case_and_encoding() {
        let resolver = resolver();
        assert_eq!(
            resolver.resolve("/Dir/Echo").as_path(),
            Path::new("/srv/www/dir/echo")
        );
        assert_eq!(
            resolver.resolve("/a%20b/caf%C3%A9").as_path(),
            Path::new("/srv/www/a%20b/caf%c3%a9")
        );
        assert_eq!(
            resolver.resolve("/a b").as_path(),
            Path::new("/srv/www/a%20b")
        );
    }

    #[test]
    fn directory_hint() {
        let path = resolver().resolve("/subdir/");
        assert!(path.is_directory_hint());
        assert_eq!(path.as_path(), Path::new("/srv/www/subdir"));
        assert_eq!(path.to_string(), "/srv/www/subdir/");
    }

    #[test]
    fn handler_sources() {
        let resolver = resolver();
        assert!(resolver.resolve("/echo.hook").is_handler_source());
        assert!(resolver.resolve("/ECHO.HOOK?x").is_handler_source());
        assert!(resolver.resolve("/__init__").is_handler_source());
        assert!(resolver.resolve("/sub/__init__").is_handler_source());
        assert!(!resolver.resolve("/echo").is_handler_source());
        assert_eq!(
            resolver.resolve("/echo").handler_source(),
            Path::new("/srv/www/echo.hook")
        );
    }

    #[test]
    fn cache_is_transparent() {
        let cached = resolver();
        let uncached = resolver().without_cache();
        for raw in ["/a/b", "/a/b", "/../c/", "/a/b", "/D?x"] {
            assert_eq!(cached.resolve(raw), uncached.resolve(raw));
        }
    }
}
