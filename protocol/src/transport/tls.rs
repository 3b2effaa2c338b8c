//! # Optional TLS Pass-Through
//!
//! `NetKernelOptions.tls`, when set, wraps accepted and outbound sockets in
//! a `rustls` stream before framing. This is a pass-through: the crate
//! carries no certificate-management subsystem of its own, matching the
//! "optional TLS configuration passed to the socket layer" boundary — a
//! caller builds the `rustls` configs however it sees fit and hands them in.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Blanket trait so a plain `TcpStream` and a `TlsStream<TcpStream>` can
/// sit behind one boxed type that `Framed` wraps uniformly.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Caller-supplied TLS material. Either side may be omitted: a node that
/// only dials out needs no `server` config, one that only accepts needs no
/// `client` config.
#[derive(Clone, Default)]
pub struct TlsConfig {
    pub server: Option<Arc<rustls::ServerConfig>>,
    pub client: Option<Arc<rustls::ClientConfig>>,
}

/// Wraps an accepted socket in TLS if `tls.server` is configured, otherwise
/// passes it through unchanged.
pub async fn accept(stream: TcpStream, tls: Option<&TlsConfig>) -> std::io::Result<BoxedStream> {
    match tls.and_then(|t| t.server.clone()) {
        Some(cfg) => {
            let acceptor = TlsAcceptor::from(cfg);
            let tls_stream = acceptor.accept(stream).await?;
            Ok(Box::new(tls_stream))
        }
        None => Ok(Box::new(stream)),
    }
}

/// Wraps a dialed socket in TLS if `tls.client` is configured, otherwise
/// passes it through unchanged. `domain` is used as the SNI server name;
/// it must be a DNS name, not a bare IP literal, for the TLS case.
pub async fn connect(
    stream: TcpStream,
    domain: &str,
    tls: Option<&TlsConfig>,
) -> std::io::Result<BoxedStream> {
    match tls.and_then(|t| t.client.clone()) {
        Some(cfg) => {
            let connector = TlsConnector::from(cfg);
            let server_name = ServerName::try_from(domain.to_string())
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
            let tls_stream = connector.connect(server_name, stream).await?;
            Ok(Box::new(tls_stream))
        }
        None => Ok(Box::new(stream)),
    }
}
