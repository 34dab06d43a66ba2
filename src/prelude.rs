//! ## **The Harness Prelude**
//!
//! The purpose of this module is to *simplify*, *make modules dependencies obvious*,
//! and *keep consistency* in the development of the fixture harness.
//!
//! Niche preludes can be found as submodules, including
//! * a networking prelude
//! * a threading prelude

// External commonly used dependencies
pub use bytes::{Bytes, BytesMut};
pub use compact_str::CompactString;
pub use http;
pub use http::{
    header, header::HeaderName, HeaderMap, HeaderValue, Method, Response, StatusCode, Version,
};
pub use kvarn_harness_async::{read, write};
pub use kvarn_harness_utils::{self as utils, chars, prelude::AsCleanDebug};
pub use log::*;
pub use std::borrow::Cow;
pub use std::collections::HashMap;
pub use std::fmt::{self, Debug, Display, Formatter};
pub use std::io;
pub use std::net::{self, IpAddr, SocketAddr};
pub use std::path::{Path, PathBuf};
pub use std::str;
pub use std::sync::Arc;
pub use std::time::{Duration, Instant};
pub use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
pub use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

// Modules
pub use crate::config;
pub use crate::dispatch;
pub use crate::encryption;
pub use crate::fixtures;
pub use crate::process;
pub use crate::registry;
pub use crate::resolve;
pub use crate::shutdown;

// Crate types
pub use crate::box_fut;
pub use crate::*;
pub use config::{ErrorSink, Fault, ServerConfig, TlsMaterial, Verbosity};
pub use registry::{Handler, HandlerCatalog, HandlerKey, HandlerRegistry, RetFut};
pub use request::Request;
pub use resolve::{CanonicalPath, Resolver};

/// ## **The Harness *Networking* Prelude**
///
/// The purpose of this module is to expose Tokio network types used in the server.
pub mod networking {
    pub use tokio::net::{TcpListener, TcpStream};
}

/// ## **The Harness *Threading* Prelude**
///
/// The purpose of this module is to expose common threading types.
pub mod threading {
    pub use std::sync::atomic::{self, AtomicUsize, Ordering};
    pub use tokio::sync::{watch, Notify, OnceCell};
    pub use tokio::task::{spawn, JoinHandle};
}
