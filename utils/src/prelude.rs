//! Prelude for the fixture harness utilities.
//!
//! This imports the [`http`] and [`bytes`] types used throughout, together with
//! everything in the crate root.
pub use bytes::{Bytes, BytesMut};
pub use http::{
    self, header, header::HeaderName, HeaderMap, HeaderValue, Method, Request, Response,
    StatusCode, Version,
};
pub use std::borrow::Cow;
pub use std::fmt::{self, Debug, Display, Formatter};
pub use std::io::{self, Write};
pub use std::path::{Path, PathBuf};
pub use std::str;

pub use crate::*;
