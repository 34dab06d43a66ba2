//! Helpers for integration-testing the fixture harness.
//!
//! Here, you can easily spin up a new server with a fresh self-signed certificate
//! and send a request to it in under 5 lines.

#![deny(clippy::all, clippy::perf, clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]

use kvarn_harness::prelude::*;
use rustls::pki_types::CertificateDer;

macro_rules! impl_methods {
    ($($method: ident $secure: ident $name: ident),*) => {
        $(
            /// Make a request to `path` on the plain listener with the selected method.
            pub fn $method(&self, path: impl AsRef<str>) -> reqwest::RequestBuilder {
                let client = self.client().build().unwrap();
                client.request(reqwest::Method::$name, self.url(path))
            }
            /// Make a request to `path` on the TLS listener with the selected method.
            pub fn $secure(&self, path: impl AsRef<str>) -> reqwest::RequestBuilder {
                let client = self.client().build().unwrap();
                client.request(reqwest::Method::$name, self.secure_url(path))
            }
        )*
    };
}

/// A server started by [`ServerBuilder::run`] to connect to.
///
/// Dropping it stops the listeners.
pub struct Server {
    server: Option<RunningServer>,
    certificate: CertificateDer<'static>,
    root: PathBuf,
    // also update Debug implementation when adding fields
}
impl Server {
    impl_methods!(get get_secure GET, post post_secure POST, head head_secure HEAD, put put_secure PUT);

    /// Get a [`reqwest::ClientBuilder`] with the [`Self::cert`] accepted.
    ///
    /// Redirects aren't followed.
    pub fn client(&self) -> reqwest::ClientBuilder {
        let cert = reqwest::Certificate::from_der(self.cert()).unwrap();
        reqwest::Client::builder()
            .add_root_certificate(cert)
            .redirect(reqwest::redirect::Policy::none())
    }
    /// Builds a URL to the plain listener with `path`.
    pub fn url(&self, path: impl AsRef<str>) -> reqwest::Url {
        Self::join(&self.running().http_base(), path.as_ref())
    }
    /// Builds a URL to the TLS listener with `path`.
    pub fn secure_url(&self, path: impl AsRef<str>) -> reqwest::Url {
        Self::join(&self.running().https_base(), path.as_ref())
    }
    fn join(base: &str, path: &str) -> reqwest::Url {
        // `base` ends with a slash
        let string = format!("{base}{}", path.strip_prefix('/').unwrap_or(path));
        reqwest::Url::parse(&string).unwrap()
    }
    /// Gets the ports of the listeners.
    #[must_use]
    pub fn ports(&self) -> Ports {
        self.running().ports()
    }
    /// Gets the certificate of the TLS listener.
    #[must_use]
    pub fn cert(&self) -> &CertificateDer<'static> {
        &self.certificate
    }
    /// The fixture root served.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
    /// Gets the [`RunningServer`] handle, e.g. for [`RunningServer::environment`].
    #[must_use]
    pub fn running(&self) -> &RunningServer {
        self.server
            .as_ref()
            .expect("the server is only taken when shutting down")
    }

    /// Shuts the server down gracefully, waiting for in-flight connections.
    pub async fn shutdown(mut self) {
        if let Some(server) = self.server.take() {
            server.shutdown().await;
        }
    }
}
impl Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Server")
            .field("server", &self.server)
            .field("certificate", &"[internal certificate]".as_clean())
            .field("root", &self.root)
            .finish()
    }
}

/// A builder struct for starting a test [`Server`].
#[must_use = "run the server"]
pub struct ServerBuilder {
    root: PathBuf,
    catalog: HandlerCatalog,
    verbosity: Verbosity,
    shutdown_grace: Option<Duration>,
    error_sink: Option<ErrorSink>,
}
impl ServerBuilder {
    /// Creates a new builder serving `tests/www` with the default [`HandlerCatalog`].
    /// Use `Self::default()` for the same configuration.
    pub fn new() -> Self {
        let _ = env_logger::Builder::new()
            .parse_filters("rustls=warn,debug")
            .is_test(true)
            .parse_default_env()
            .try_init();
        Self {
            root: PathBuf::from("tests/www"),
            catalog: HandlerCatalog::default(),
            verbosity: Verbosity::QUIET,
            shutdown_grace: None,
            error_sink: None,
        }
    }
    /// Serves `root` instead of `tests/www`.
    pub fn path(mut self, root: impl AsRef<Path>) -> Self {
        self.root = root.as_ref().to_path_buf();
        self
    }
    /// Modifies the internal [`HandlerCatalog`] with `mutation`.
    pub fn with_catalog(mut self, mutation: impl FnOnce(&mut HandlerCatalog)) -> Self {
        mutation(&mut self.catalog);
        self
    }
    /// Sets the [`Verbosity`] of the server.
    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }
    /// Sets how long [`Server::shutdown`] waits for in-flight connections.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = Some(grace);
        self
    }
    /// Reports faults to `sink` instead of the log.
    pub fn error_sink(mut self, sink: impl Fn(Fault) + Send + Sync + 'static) -> Self {
        self.error_sink = Some(Arc::new(sink));
        self
    }

    /// Starts a fixture server with the current configuration and a new
    /// self-signed certificate for `localhost`.
    ///
    /// The returned [`Server`] can make requests to the server, streamlining
    /// the process of testing.
    pub async fn run(self) -> Server {
        let Self {
            root,
            catalog,
            verbosity,
            shutdown_grace,
            error_sink,
        } = self;

        let self_signed_cert =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let certificate = self_signed_cert.cert.der().clone();
        let tls = TlsMaterial::from_pem(
            self_signed_cert.cert.pem().as_bytes(),
            self_signed_cert.key_pair.serialize_pem().as_bytes(),
        )
        .unwrap();

        let mut config = ServerConfig::builder(&root, tls)
            .catalog(catalog)
            .verbosity(verbosity);
        if let Some(grace) = shutdown_grace {
            config = config.shutdown_grace(grace);
        }
        if let Some(sink) = error_sink {
            config = config.error_sink(move |fault| sink(fault));
        }

        let server = kvarn_harness::Server::new(config.build())
            .start()
            .await
            .unwrap();
        println!(
            "Running on {} and {}",
            server.http_base(),
            server.https_base()
        );
        Server {
            server: Some(server),
            certificate,
            root,
        }
    }
}
impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
impl From<HandlerCatalog> for ServerBuilder {
    fn from(catalog: HandlerCatalog) -> Self {
        Self::new().with_catalog(|c| *c = catalog)
    }
}

/// The testing prelude.
/// Also imports `kvarn_harness::prelude::*`.
pub mod prelude {
    pub use super::{Server, ServerBuilder};
    #[doc(hidden)]
    pub use kvarn_harness::prelude::*;
    pub use reqwest;
}
