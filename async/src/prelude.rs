//! Prelude for the async HTTP/1 helpers.
//!
//! This includes all the imports from [`kvarn_harness_utils::prelude`].
//! It also imports async-related [`std`] items and the common [`tokio`] items.

pub use kvarn_harness_utils as utils;
pub use kvarn_harness_utils::prelude::*;
pub use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
pub use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
