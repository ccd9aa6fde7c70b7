//! Transport streams: plain TCP or rustls TLS.

#![allow(clippy::missing_errors_doc)]

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::{Error, Result};

/// Transport security for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// Plaintext. Only for testing or trusted networks.
    None,
    /// Plaintext connect, then STARTTLS before authenticating.
    StartTls,
    /// TLS from the first byte (port 993).
    #[default]
    Implicit,
}

/// A stream that is either plaintext or TLS.
pub enum ImapStream {
    /// Plaintext TCP stream.
    Plain(TcpStream),
    /// TLS-encrypted stream (boxed to reduce enum size).
    Tls(Box<TlsStream<TcpStream>>),
}

impl ImapStream {
    /// Wraps a plaintext stream in TLS, for STARTTLS.
    pub async fn upgrade_to_tls(self, host: &str) -> Result<Self> {
        match self {
            Self::Plain(tcp) => Ok(Self::Tls(Box::new(tls_handshake(host, tcp).await?))),
            Self::Tls(_) => Err(Error::Protocol("stream is already TLS".to_string())),
        }
    }

    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl AsyncRead for ImapStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ImapStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Creates a TLS connector trusting the webpki root set.
#[must_use]
pub fn create_tls_connector() -> TlsConnector {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

async fn tls_handshake(host: &str, tcp: TcpStream) -> Result<TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(host.to_string())?;
    Ok(create_tls_connector().connect(server_name, tcp).await?)
}

/// Connects with TLS from the start.
pub async fn connect_tls(host: &str, port: u16) -> Result<ImapStream> {
    let tcp = TcpStream::connect((host, port)).await?;
    Ok(ImapStream::Tls(Box::new(tls_handshake(host, tcp).await?)))
}

/// Connects without TLS (for STARTTLS or testing).
pub async fn connect_plain(host: &str, port: u16) -> Result<ImapStream> {
    let tcp = TcpStream::connect((host, port)).await?;
    Ok(ImapStream::Plain(tcp))
}
