//! Encryption for incoming traffic, implemented through streams.
//!
//! Based on [`tokio_rustls`]. [`Encryption`] implements both [`AsyncRead`] and [`AsyncWrite`]
//! so the connection logic doesn't care which listener a connection came from.
use crate::prelude::{networking::*, *};
use tokio_rustls::{server::TlsStream, TlsAcceptor};

/// A possibly encrypted stream.
#[derive(Debug)]
pub enum Encryption {
    /// A TLS encrypted TCP stream.
    TcpTls(Box<TlsStream<TcpStream>>),
    /// A unencrypted TCP stream for use with
    /// non-secure HTTP.
    Tcp(TcpStream),
}
impl Encryption {
    /// Creates a new [`Encryption`] from a `tcp` connection.
    ///
    /// # Errors
    ///
    /// Will return an error if the TLS handshake failed, if `acceptor.is_some()`.
    pub async fn new_tcp(stream: TcpStream, acceptor: Option<&TlsAcceptor>) -> io::Result<Self> {
        match acceptor {
            None => Ok(Self::Tcp(stream)),
            Some(acceptor) => {
                trace!("Trying to handshake");
                let stream = acceptor.accept(stream).await?;
                trace!("Successful handshake");
                Ok(Self::TcpTls(Box::new(stream)))
            }
        }
    }
    /// Whether the stream is encrypted.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        matches!(self, Self::TcpTls(_))
    }
}
impl AsyncRead for Encryption {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Self::TcpTls(tls) => Pin::new(tls.as_mut()).poll_read(cx, buf),
        }
    }
}
impl AsyncWrite for Encryption {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Self::TcpTls(tls) => Pin::new(tls.as_mut()).poll_write(cx, buf),
        }
    }
    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_flush(cx),
            Self::TcpTls(tls) => Pin::new(tls.as_mut()).poll_flush(cx),
        }
    }
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Self::TcpTls(tls) => Pin::new(tls.as_mut()).poll_shutdown(cx),
        }
    }
    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<Result<usize, io::Error>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_write_vectored(cx, bufs),
            Self::TcpTls(tls) => Pin::new(tls.as_mut()).poll_write_vectored(cx, bufs),
        }
    }
    fn is_write_vectored(&self) -> bool {
        match self {
            Self::Tcp(s) => s.is_write_vectored(),
            Self::TcpTls(tls) => tls.is_write_vectored(),
        }
    }
}
