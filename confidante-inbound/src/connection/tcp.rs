use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use anyhow::{anyhow, Error};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::rustls::{ProtocolVersion, ServerConfig};
use tokio_rustls::server::TlsStream;
use tokio_rustls::{Accept, TlsAcceptor};

use confidante_core::xmpp::stream::Connection;

enum Socket {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// A bare TCP socket, upgradeable to TLS with the server's preconfigured
/// [`ServerConfig`] (certificate/key already loaded, client-cert
/// verification already wired, per `confidante_backend::settings`).
pub struct TcpConnection {
    socket: Socket,
    tls_config: Arc<ServerConfig>,
}

impl TcpConnection {
    pub fn new(socket: TcpStream, tls_config: Arc<ServerConfig>) -> Self {
        TcpConnection {
            socket: Socket::Plain(socket),
            tls_config,
        }
    }
}

impl Connection for TcpConnection {
    type Upgrade = TcpConnectionUpgrade;

    fn upgrade(self) -> Result<Self::Upgrade, Error> {
        match self.socket {
            Socket::Plain(socket) => {
                let accept = TlsAcceptor::from(self.tls_config.clone()).accept(socket);
                Ok(TcpConnectionUpgrade {
                    accept,
                    tls_config: self.tls_config,
                })
            }
            Socket::Tls(_) => Err(anyhow!("connection is already secure")),
        }
    }

    fn is_starttls_allowed(&self) -> bool {
        matches!(self.socket, Socket::Plain(_))
    }

    fn is_secure(&self) -> bool {
        matches!(self.socket, Socket::Tls(_))
    }

    fn is_authenticated(&self) -> bool {
        match &self.socket {
            Socket::Plain(_) => false,
            Socket::Tls(socket) => socket.get_ref().1.peer_certificates().is_some(),
        }
    }

    /// `tls-exporter` per RFC 9266: only defined for TLS 1.3, so earlier
    /// versions fall back to no channel binding rather than the weaker
    /// `tls-unique`, which rustls does not expose.
    fn channel_binding(&self) -> Option<Vec<u8>> {
        let Socket::Tls(socket) = &self.socket else {
            return None;
        };
        let (_, connection) = socket.get_ref();

        if connection.protocol_version() != Some(ProtocolVersion::TLSv1_3) {
            return None;
        }

        connection
            .export_keying_material(vec![0u8; 32], b"EXPORTER-Channel-Binding", None)
            .ok()
    }
}

impl AsyncRead for TcpConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut self.socket {
            Socket::Plain(socket) => Pin::new(socket).poll_read(cx, buf),
            Socket::Tls(socket) => Pin::new(socket).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TcpConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match &mut self.socket {
            Socket::Plain(socket) => Pin::new(socket).poll_write(cx, buf),
            Socket::Tls(socket) => Pin::new(socket).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut self.socket {
            Socket::Plain(socket) => Pin::new(socket).poll_flush(cx),
            Socket::Tls(socket) => Pin::new(socket).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut self.socket {
            Socket::Plain(socket) => Pin::new(socket).poll_shutdown(cx),
            Socket::Tls(socket) => Pin::new(socket).poll_shutdown(cx),
        }
    }
}

pub struct TcpConnectionUpgrade {
    accept: Accept<TcpStream>,
    tls_config: Arc<ServerConfig>,
}

impl std::future::Future for TcpConnectionUpgrade {
    type Output = Result<TcpConnection, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let tls_stream = ready!(Pin::new(&mut self.accept).poll(cx))?;
        Poll::Ready(Ok(TcpConnection {
            socket: Socket::Tls(Box::new(tls_stream)),
            tls_config: self.tls_config.clone(),
        }))
    }
}
