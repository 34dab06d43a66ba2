//! Configuration of the fixture server.
//!
//! A [`ServerConfig`] is built with [`ServerConfig::builder`] and is immutable once the
//! server starts.

use crate::prelude::*;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// The certificate chain and private key of the TLS listener.
#[derive(Debug)]
pub struct TlsMaterial {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}
impl TlsMaterial {
    /// Parses a PEM encoded certificate chain and private key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] if `chain` contains no certificates,
    /// if `key` contains no private key, or if either is malformed.
    pub fn from_pem(chain: &[u8], key: &[u8]) -> Result<Self, Error> {
        let chain = rustls_pemfile::certs(&mut io::Cursor::new(chain))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| Error::Certificate(format!("malformed certificate chain: {err}")))?;
        if chain.is_empty() {
            return Err(Error::Certificate(
                "no certificates in the certificate chain".into(),
            ));
        }
        let key = rustls_pemfile::private_key(&mut io::Cursor::new(key))
            .map_err(|err| Error::Certificate(format!("malformed private key: {err}")))?
            .ok_or_else(|| Error::Certificate("no private key found".into()))?;
        Ok(Self { chain, key })
    }
    /// Reads the PEM files at `chain` and `key`. See [`Self::from_pem`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] naming the file if it can't be read,
    /// and the errors of [`Self::from_pem`].
    pub fn from_pem_files(chain: impl AsRef<Path>, key: impl AsRef<Path>) -> Result<Self, Error> {
        fn read(path: &Path) -> Result<Vec<u8>, Error> {
            std::fs::read(path)
                .map_err(|err| Error::Certificate(format!("{}: {err}", path.display())))
        }
        Self::from_pem(&read(chain.as_ref())?, &read(key.as_ref())?)
    }
    /// The certificate chain, leaf first.
    #[must_use]
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }
    /// Builds the rustls config of the TLS listener.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if the key doesn't match the certificate or isn't supported.
    pub fn server_config(&self) -> Result<Arc<rustls::ServerConfig>, Error> {
        let config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(self.chain.clone(), self.key.clone_key())?;
        Ok(Arc::new(config))
    }
}

/// How much the server and the process runner tell.
///
/// At [`Verbosity::ECHO`] and above, every request is logged as `## HTTP: GET /raw -> path`,
/// captured output lines are echoed as they arrive, and exit statuses are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Verbosity(pub u8);
impl Verbosity {
    /// Nothing beyond faults.
    pub const QUIET: Self = Self(0);
    /// The level at which requests and output lines are echoed.
    pub const ECHO: Self = Self(3);

    /// Whether requests and output lines are echoed.
    #[must_use]
    pub fn echoes(self) -> bool {
        self >= Self::ECHO
    }
}

/// A connection or handler fault, reported to the [`ErrorSink`].
#[derive(Debug)]
pub struct Fault {
    /// `http` or `https`.
    pub scheme: &'static str,
    /// The peer of the connection, if it was known.
    pub address: Option<SocketAddr>,
    /// What went wrong.
    pub error: Error,
}
impl Display for Fault {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(address) => write!(f, "{} connection from {address}: {}", self.scheme, self.error),
            None => write!(f, "{}: {}", self.scheme, self.error),
        }
    }
}

/// Receives every fault which isn't the peer simply hanging up.
///
/// It's called from connection tasks and must not block.
pub type ErrorSink = Arc<dyn Fn(Fault) + Send + Sync>;

/// The [`ErrorSink`] used if none is set: it logs the fault at `error` level.
#[must_use]
pub fn log_error_sink() -> ErrorSink {
    Arc::new(|fault: Fault| error!("{fault}"))
}

/// The configuration of a [`crate::Server`].
#[must_use]
pub struct ServerConfig {
    pub(crate) root: PathBuf,
    pub(crate) tls: TlsMaterial,
    pub(crate) verbosity: Verbosity,
    pub(crate) error_sink: ErrorSink,
    pub(crate) catalog: HandlerCatalog,
    pub(crate) shutdown_grace: Duration,
    pub(crate) max_head_len: usize,
    pub(crate) max_body_len: usize,
    pub(crate) resolver_cache: bool,
}
impl ServerConfig {
    /// Starts building a config serving `root` with the TLS listener using `tls`.
    pub fn builder(root: impl Into<PathBuf>, tls: TlsMaterial) -> ServerConfigBuilder {
        ServerConfigBuilder {
            config: Self {
                root: root.into(),
                tls,
                verbosity: Verbosity::QUIET,
                error_sink: log_error_sink(),
                catalog: HandlerCatalog::default(),
                shutdown_grace: Duration::from_secs(5),
                max_head_len: 16 * 1024,
                max_body_len: 16 * 1024 * 1024,
                resolver_cache: true,
            },
        }
    }
    /// The fixture root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
    /// The TLS material of the secure listener.
    pub fn tls(&self) -> &TlsMaterial {
        &self.tls
    }
    /// The verbosity of request logging.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }
    /// The sink receiving faults.
    #[must_use]
    pub fn error_sink(&self) -> &ErrorSink {
        &self.error_sink
    }
    /// The handlers manifests can name.
    pub fn catalog(&self) -> &HandlerCatalog {
        &self.catalog
    }
    /// How long [`crate::RunningServer::shutdown`] waits for in-flight connections.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }
    /// The maximum length of a request head.
    #[must_use]
    pub fn max_head_len(&self) -> usize {
        self.max_head_len
    }
    /// The maximum declared `content-length` of a request body.
    #[must_use]
    pub fn max_body_len(&self) -> usize {
        self.max_body_len
    }
}
impl Debug for ServerConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("root", &self.root)
            .field("tls", &self.tls)
            .field("verbosity", &self.verbosity)
            .field("error_sink", &"[error sink]".as_clean())
            .field("catalog", &self.catalog)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("max_head_len", &self.max_head_len)
            .field("max_body_len", &self.max_body_len)
            .field("resolver_cache", &self.resolver_cache)
            .finish()
    }
}

/// Builder of [`ServerConfig`]. Created by [`ServerConfig::builder`].
#[derive(Debug)]
#[must_use]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}
impl ServerConfigBuilder {
    /// Sets the verbosity. Defaults to [`Verbosity::QUIET`].
    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.config.verbosity = verbosity;
        self
    }
    /// Sets the sink receiving faults. Defaults to [`log_error_sink`].
    pub fn error_sink(mut self, sink: impl Fn(Fault) + Send + Sync + 'static) -> Self {
        self.config.error_sink = Arc::new(sink);
        self
    }
    /// Sets the handlers manifests can name. Defaults to the built-in [`fixtures`].
    pub fn catalog(mut self, catalog: HandlerCatalog) -> Self {
        self.config.catalog = catalog;
        self
    }
    /// Sets how long a shutdown waits for in-flight connections. Defaults to 5 seconds.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }
    /// Sets the maximum length of a request head. Defaults to 16KiB.
    pub fn max_head_len(mut self, len: usize) -> Self {
        self.config.max_head_len = len;
        self
    }
    /// Sets the maximum declared length of a request body. Defaults to 16MiB.
    ///
    /// Larger requests are answered with `413` without reading the body.
    pub fn max_body_len(mut self, len: usize) -> Self {
        self.config.max_body_len = len;
        self
    }
    /// Disables caching the last path resolution.
    pub fn disable_resolver_cache(mut self) -> Self {
        self.config.resolver_cache = false;
        self
    }
    /// Finishes the config.
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_material() {
        let err = TlsMaterial::from_pem(b"", b"").unwrap_err();
        assert!(matches!(err, Error::Certificate(_)));
        assert!(err.to_string().contains("no certificates"));

        let err = TlsMaterial::from_pem_files("/nonexistent/cert.pem", "/nonexistent/key.pem")
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/cert.pem"));
    }

    #[test]
    fn verbosity() {
        assert!(!Verbosity::QUIET.echoes());
        assert!(!Verbosity(2).echoes());
        assert!(Verbosity(3).echoes());
        assert!(Verbosity(7).echoes());
    }

    #[test]
    fn fault_display() {
        let fault = Fault {
            scheme: "https",
            address: Some(SocketAddr::from(([127, 0, 0, 1], 4040))),
            error: Error::handler("boom"),
        };
        assert_eq!(
            fault.to_string(),
            "https connection from 127.0.0.1:4040: handler failed: boom"
        );
    }
}
