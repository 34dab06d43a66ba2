//! The dual-protocol fixture server.
//!
//! [`Server::start`] binds a plain and a TLS listener on ephemeral `localhost` ports and
//! serves each connection on a task of its own. One request is served per connection.

use crate::prelude::{networking::*, threading::*, *};
use shutdown::{Manager, State};
use std::net::Ipv4Addr;
use tokio_rustls::TlsAcceptor;

/// The ports the listeners are bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ports {
    /// The plain HTTP listener.
    pub http: u16,
    /// The HTTPS listener.
    pub https: u16,
}

/// Everything connection tasks share.
struct Shared {
    dispatcher: Dispatcher,
    max_head_len: usize,
    max_body_len: usize,
    error_sink: ErrorSink,
    manager: Arc<Manager>,
}
impl Shared {
    fn report(&self, fault: Fault) {
        (self.error_sink)(fault);
    }
}

/// A fixture server, ready to [start](Self::start).
#[derive(Debug)]
#[must_use]
pub struct Server {
    config: ServerConfig,
}
impl Server {
    /// Creates a server from `config`.
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Binds the listeners and starts serving.
    ///
    /// The ports are published in the returned [`RunningServer`].
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS material is unusable, if the package unit
    /// (`__init__.hook`) is malformed, or if binding a listener fails.
    pub async fn start(self) -> Result<RunningServer, Error> {
        let ServerConfig {
            root,
            tls,
            verbosity,
            error_sink,
            catalog,
            shutdown_grace,
            max_head_len,
            max_body_len,
            resolver_cache,
        } = self.config;

        let manager = Manager::new().build();
        manager.set_state(State::Starting);

        let acceptor = TlsAcceptor::from(tls.server_config()?);
        let registry = HandlerRegistry::new(&root, catalog).await?;
        let mut resolver = Resolver::new(&root);
        if !resolver_cache {
            resolver = resolver.without_cache();
        }

        let plain = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let secure = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let ports = Ports {
            http: plain.local_addr()?.port(),
            https: secure.local_addr()?.port(),
        };

        let shared = Arc::new(Shared {
            dispatcher: Dispatcher::new(resolver, registry, verbosity, Arc::clone(&error_sink)),
            max_head_len,
            max_body_len,
            error_sink,
            manager: Arc::clone(&manager),
        });

        let listeners = vec![
            spawn(accept(plain, None, Arc::clone(&shared))),
            spawn(accept(secure, Some(acceptor), shared)),
        ];

        let server = RunningServer {
            ports,
            manager,
            shutdown_grace,
            listeners,
        };
        if verbosity.echoes() {
            info!("## HTTP server at {}", server.http_base());
            info!("## HTTPS server at {}", server.https_base());
        } else {
            debug!(
                "Serving {} at {} and {}",
                root.display(),
                server.http_base(),
                server.https_base()
            );
        }
        server.manager.set_state(State::Running);
        Ok(server)
    }
}

/// A handle to a started server.
///
/// Dropping it stops the listeners without waiting for in-flight connections.
/// Use [`Self::shutdown`] to wait for them.
#[derive(Debug)]
#[must_use]
pub struct RunningServer {
    ports: Ports,
    manager: Arc<Manager>,
    shutdown_grace: Duration,
    listeners: Vec<JoinHandle<()>>,
}
impl RunningServer {
    /// The ports the listeners are bound to.
    #[must_use]
    pub fn ports(&self) -> Ports {
        self.ports
    }
    /// The base URL of the plain listener, e.g. `http://localhost:4040/`.
    #[must_use]
    pub fn http_base(&self) -> String {
        format!("http://localhost:{}/", self.ports.http)
    }
    /// The base URL of the TLS listener, e.g. `https://localhost:4041/`.
    #[must_use]
    pub fn https_base(&self) -> String {
        format!("https://localhost:{}/", self.ports.https)
    }
    /// The environment telling a program under test where the server is:
    /// `TEST_HTTP_BASE` and `TEST_HTTPS_BASE`.
    #[must_use]
    pub fn environment(&self) -> [(&'static str, String); 2] {
        [
            ("TEST_HTTP_BASE", self.http_base()),
            ("TEST_HTTPS_BASE", self.https_base()),
        ]
    }
    /// The current state.
    #[must_use]
    pub fn state(&self) -> State {
        self.manager.state()
    }
    /// The shutdown manager, to observe state changes and connection counts.
    #[must_use]
    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    /// Stops accepting and waits for in-flight connections, for at most the
    /// configured grace period. Connections still running after that are abandoned.
    ///
    /// Returns in [`State::Stopped`].
    pub async fn shutdown(mut self) {
        self.manager.shutdown();
        for listener in std::mem::take(&mut self.listeners) {
            if let Err(err) = listener.await {
                warn!("Listener task failed: {err}");
            }
        }
        if !self.manager.wait_idle(self.shutdown_grace).await {
            warn!(
                "Abandoning {} connections after the shutdown grace period",
                self.manager.connections()
            );
        }
        self.manager.set_state(State::Stopped);
        info!("Server stopped");
    }
}
impl Drop for RunningServer {
    fn drop(&mut self) {
        self.manager.shutdown();
    }
}

async fn accept(listener: TcpListener, acceptor: Option<TlsAcceptor>, shared: Arc<Shared>) {
    let scheme = if acceptor.is_some() { "https" } else { "http" };
    let mut state = shared.manager.subscribe();
    loop {
        tokio::select! {
            biased;
            () = shutdown::stopping(&mut state) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, address)) => {
                    trace!("Accepting {scheme} connection from {address}");
                    let guard = shared.manager.add_connection();
                    let acceptor = acceptor.clone();
                    let shared = Arc::clone(&shared);
                    spawn(async move {
                        connection(stream, address, acceptor, &shared).await;
                        drop(guard);
                    });
                }
                Err(err) => {
                    shared.report(Fault {
                        scheme,
                        address: None,
                        error: err.into(),
                    });
                    // Don't spin if e.g. we're out of file descriptors.
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
    debug!("Stopped accepting {scheme} connections");
}

async fn connection(
    stream: TcpStream,
    address: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    shared: &Shared,
) {
    let scheme = if acceptor.is_some() { "https" } else { "http" };
    let mut stream = match Encryption::new_tcp(stream, acceptor.as_ref()).await {
        Ok(stream) => stream,
        Err(err) => {
            debug!("TLS handshake with {address} failed: {err}");
            return;
        }
    };
    match serve(&mut stream, address, shared).await {
        Ok(()) => {}
        Err(err) if err.is_disconnect() => {
            debug!("{scheme} connection from {address} dropped: {err}");
        }
        Err(Error::Io(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
            debug!("{address} closed the connection before sending the whole body");
        }
        Err(err) => shared.report(Fault {
            scheme,
            address: Some(address),
            error: err,
        }),
    }
}

async fn serve(
    stream: &mut Encryption,
    address: SocketAddr,
    shared: &Shared,
) -> Result<(), Error> {
    let (head, rest) = match read::request(&mut *stream, shared.max_head_len).await {
        Ok(read) => read,
        Err(read::Error::Closed) => {
            debug!("{address} closed the connection without sending a request");
            return Ok(());
        }
        Err(read::Error::Io(err)) => return Err(err.into()),
        Err(read::Error::Parse(err)) => {
            debug!("Malformed request from {address}: {err}");
            let response = dispatch::error_response(StatusCode::BAD_REQUEST, Some(err.as_str()));
            return respond(stream, response, &Method::GET, Version::HTTP_11).await;
        }
    };

    let body_len = match dispatch::check_head(&head.method, &head.headers) {
        Ok(len) => len,
        Err(response) => return respond(stream, response, &head.method, head.version).await,
    };
    if let Some(len) = body_len.filter(|len| *len > shared.max_body_len) {
        debug!("Refusing a body of {len} bytes from {address}");
        let response = dispatch::error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            Some(&format!("Request body too large ({len} bytes)")),
        );
        return respond(stream, response, &head.method, head.version).await;
    }

    let method = head.method.clone();
    let version = head.version;
    let mut request = Request::new(head, address, stream.is_secure());
    if let Some(len) = body_len {
        let body = read::body(&mut *stream, rest, len).await?;
        request = request.with_body(body);
    }

    let response = shared.dispatcher.dispatch(Arc::new(request)).await;
    respond(stream, response, &method, version).await
}

async fn respond(
    stream: &mut Encryption,
    response: Response<Bytes>,
    method: &Method,
    version: Version,
) -> Result<(), Error> {
    let response = dispatch::finalize(response, method, version);
    let mut writer = tokio::io::BufWriter::new(&mut *stream);
    write::response(&response, response.body(), &mut writer).await?;
    drop(writer);
    if let Err(err) = stream.shutdown().await {
        trace!("Failed to shut the stream down: {err}");
    }
    Ok(())
}
