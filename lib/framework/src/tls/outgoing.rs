use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use super::{MaybeTls, TlsError};

pub type MaybeTlsStream = MaybeTls<TcpStream, TlsStream<TcpStream>>;

/// A ready to use client side TLS context.
#[derive(Clone)]
pub struct TlsConnector {
    pub(super) inner: tokio_rustls::TlsConnector,
    /// Overrides the host part of the dialed address for SNI and verification
    pub(super) server_name: Option<String>,
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("server_name", &self.server_name)
            .finish()
    }
}

/// Dial `addr`, which looks like `host:port`, and run the TLS handshake
/// when a connector is given.
pub async fn connect(addr: &str, tls: Option<&TlsConnector>) -> Result<MaybeTlsStream, TlsError> {
    let stream = TcpStream::connect(addr).await.map_err(TlsError::Connect)?;
    // commands are tiny and latency bound
    let _ = stream.set_nodelay(true);

    let Some(connector) = tls else {
        return Ok(MaybeTls::Raw { raw: stream });
    };

    let name = match &connector.server_name {
        Some(name) => name.clone(),
        None => host_of(addr).to_string(),
    };
    let server_name =
        ServerName::try_from(name.clone()).map_err(|_| TlsError::InvalidServerName(name))?;

    let stream = connector
        .inner
        .connect(server_name, stream)
        .await
        .map_err(TlsError::Handshake)?;

    debug!(message = "negotiated TLS", addr);

    Ok(MaybeTls::Tls { tls: stream })
}

fn host_of(addr: &str) -> &str {
    let host = match addr.rsplit_once(':') {
        Some((host, _port)) => host,
        None => addr,
    };

    host.trim_start_matches('[').trim_end_matches(']')
}
