//! A fixture harness for driving HTTP clients under test.
//!
//! The harness has two halves:
//! - a [`Server`] listening on two ephemeral `localhost` ports, one plain and one TLS,
//!   serving static fixture files and dispatching to [`Handler`]s selected by path, and
//! - a [`ProcessRunner`] which runs the program under test, drains its output
//!   concurrently, and terminates it when it overruns its timeout.
//!
//! The program learns where the server is through [`RunningServer::environment`].
//!
//! # Serving
//!
//! Requests are mapped to the fixture root by the [`Resolver`]. Existing files are served
//! as-is. A request for `/foo` where `foo.hook` exists is answered by the handler the
//! manifest names (see [`registry`]). Handler sources are never served.
//!
//! ```no_run
//! use kvarn_harness::prelude::*;
//!
//! # async fn run() -> Result<(), Error> {
//! let tls = TlsMaterial::from_pem_files("certs/localhost.crt", "certs/localhost.key")?;
//! let server = Server::new(ServerConfig::builder("www", tls).build())
//!     .start()
//!     .await?;
//!
//! let result = ProcessRunner::new()
//!     .run(
//!         ProcessSpec::new("./client")
//!             .envs(server.environment())
//!             .timeout(Duration::from_secs(30)),
//!     )
//!     .await?;
//! println!("{}", result.stdout.join("\n"));
//!
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```
#![deny(
    unreachable_pub,
    missing_debug_implementations,
    missing_docs,
    clippy::pedantic
)]
#![allow(clippy::missing_panics_doc, clippy::module_name_repetitions)]

pub mod config;
pub mod dispatch;
pub mod encryption;
pub mod error;
pub mod fixtures;
pub mod prelude;
pub mod process;
pub mod registry;
pub mod request;
pub mod resolve;
pub mod server;
pub mod shutdown;

pub use dispatch::Dispatcher;
pub use encryption::Encryption;
pub use error::Error;
pub use process::{ExitStatus, ProcessResult, ProcessRunner, ProcessSpec};
pub use server::{Ports, RunningServer, Server};
