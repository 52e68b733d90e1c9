//! Network stream abstraction for TCP and TLS connections
//!
//! This module provides `NetworkStream`, a unified type that can represent
//! either a plain TCP connection or a TLS-encrypted connection. Both legs
//! of a proxied session use it, so the pipelines never care whether the
//! SSL upgrade has happened yet.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::server::TlsStream as ServerTlsStream;

/// A network stream that can be either plain TCP or TLS-encrypted
///
/// The TLS variants are boxed to reduce the size difference between
/// variants, as `TlsStream` is significantly larger than `TcpStream`.
pub enum NetworkStream {
    /// Plain TCP connection
    Tcp(TcpStream),
    /// TLS-encrypted connection (server-side, accepted from a client)
    ServerTls(Box<ServerTlsStream<TcpStream>>),
    /// TLS-encrypted connection (client-side, connected to the database)
    ClientTls(Box<ClientTlsStream<TcpStream>>),
    /// In-memory stream, used by unit tests to exercise the pipelines
    /// without real sockets
    #[cfg(test)]
    Mem(tokio::io::DuplexStream),
}

impl NetworkStream {
    /// Create a new TCP stream wrapper
    pub fn tcp(stream: TcpStream) -> Self {
        NetworkStream::Tcp(stream)
    }

    /// Wrap an in-memory duplex stream for tests.
    #[cfg(test)]
    pub(crate) fn mem(stream: tokio::io::DuplexStream) -> Self {
        NetworkStream::Mem(stream)
    }

    /// Check if this stream is TLS-encrypted
    pub fn is_encrypted(&self) -> bool {
        matches!(
            self,
            NetworkStream::ServerTls(_) | NetworkStream::ClientTls(_)
        )
    }

    /// Get the TLS protocol version if this is a TLS stream
    pub fn tls_version(&self) -> Option<&'static str> {
        let version = match self {
            NetworkStream::Tcp(_) => return None,
            NetworkStream::ServerTls(tls) => tls.get_ref().1.protocol_version(),
            NetworkStream::ClientTls(tls) => tls.get_ref().1.protocol_version(),
            #[cfg(test)]
            NetworkStream::Mem(_) => return None,
        };
        version.map(|v| match v {
            rustls::ProtocolVersion::TLSv1_2 => "TLSv1.2",
            rustls::ProtocolVersion::TLSv1_3 => "TLSv1.3",
            _ => "TLS (unknown version)",
        })
    }

    /// Extract the TCP stream for TLS upgrade
    ///
    /// Returns `Ok(TcpStream)` if this is a plain TCP stream. Returns
    /// `Err(self)` if TLS is already in use; a session is upgraded at most
    /// once.
    pub fn into_tcp(self) -> Result<TcpStream, Self> {
        match self {
            NetworkStream::Tcp(stream) => Ok(stream),
            other => Err(other),
        }
    }
}

impl AsyncRead for NetworkStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetworkStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            NetworkStream::ServerTls(stream) => Pin::new(stream).poll_read(cx, buf),
            NetworkStream::ClientTls(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(test)]
            NetworkStream::Mem(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NetworkStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            NetworkStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            NetworkStream::ServerTls(stream) => Pin::new(stream).poll_write(cx, buf),
            NetworkStream::ClientTls(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(test)]
            NetworkStream::Mem(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetworkStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            NetworkStream::ServerTls(stream) => Pin::new(stream).poll_flush(cx),
            NetworkStream::ClientTls(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(test)]
            NetworkStream::Mem(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetworkStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            NetworkStream::ServerTls(stream) => Pin::new(stream).poll_shutdown(cx),
            NetworkStream::ClientTls(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(test)]
            NetworkStream::Mem(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_stream_is_not_encrypted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (accepted, _) = listener.accept().await.unwrap();
        let _client = connect.await.unwrap();

        let stream = NetworkStream::tcp(accepted);
        assert!(!stream.is_encrypted());
        assert!(stream.tls_version().is_none());
        assert!(stream.into_tcp().is_ok());
    }
}
