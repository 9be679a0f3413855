mod maybe_tls;
mod outgoing;
mod settings;

use std::path::PathBuf;

pub use maybe_tls::MaybeTls;
pub use outgoing::{MaybeTlsStream, TlsConnector, connect};
pub use settings::TlsConfig;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("could not read {note} file {filename:?}: {err}")]
    FileReadFailed {
        note: &'static str,
        filename: PathBuf,
        err: std::io::Error,
    },
    #[error("client certificate is missing a key")]
    MissingKey,
    #[error("private key is given without a certificate")]
    MissingCertificate,
    #[error("could not parse certificate in {filename:?}: {reason}")]
    CertificateParse { filename: PathBuf, reason: String },
    #[error("could not parse private key in {filename:?}: {reason}")]
    PrivateKeyParse { filename: PathBuf, reason: String },
    #[error("load native root certificates failed: {0}")]
    NativeCerts(String),
    #[error("error building TLS config: {0}")]
    TlsBuild(rustls::Error),
    #[error("error adding a certificate to the root store: {0}")]
    AddCertToStore(rustls::Error),
    #[error("invalid server name {0:?}")]
    InvalidServerName(String),
    #[error("TLS handshake failed: {0}")]
    Handshake(std::io::Error),
    #[error(transparent)]
    Connect(std::io::Error),
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    const CA_FILE: &str = "tests/ca/ca.cert.pem";

    #[tokio::test]
    async fn send_and_recv() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(
            TlsConfig::test_server_config().server_config().unwrap(),
        ));

        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let mut stream = acceptor.accept(sock).await.unwrap();
            let mut buf = [0u8; 6];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
            stream.flush().await.unwrap();
        });

        let config = TlsConfig {
            enabled: true,
            ca_file: Some(CA_FILE.into()),
            server_name: Some("localhost".into()),
            ..Default::default()
        };
        let connector = config.connector().unwrap().unwrap();
        let mut stream = connect(&addr.to_string(), Some(&connector)).await.unwrap();
        assert!(stream.is_tls());

        stream.write_all(b"foobar").await.unwrap();
        let mut received = [0u8; 6];
        stream.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"foobar");
    }

    #[tokio::test]
    async fn untrusted_server_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(
            TlsConfig::test_server_config().server_config().unwrap(),
        ));

        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let _ = acceptor.accept(sock).await;
        });

        // the leaf certificate is not a CA, so nothing chains to it
        let config = TlsConfig {
            enabled: true,
            ca_file: Some("tests/ca/localhost.cert.pem".into()),
            server_name: Some("localhost".into()),
            ..Default::default()
        };
        let connector = config.connector().unwrap().unwrap();
        let err = connect(&addr.to_string(), Some(&connector))
            .await
            .unwrap_err();
        assert!(matches!(err, TlsError::Handshake(_)), "{err}");

        // unless verification is turned off
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(
            TlsConfig::test_server_config().server_config().unwrap(),
        ));
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let _ = acceptor.accept(sock).await;
        });

        let config = TlsConfig {
            enabled: true,
            insecure: true,
            ..Default::default()
        };
        let connector = config.connector().unwrap().unwrap();
        connect(&addr.to_string(), Some(&connector)).await.unwrap();
    }

    #[tokio::test]
    async fn plain_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stream = connect(&addr.to_string(), None).await.unwrap();
        assert!(!stream.is_tls());
    }
}
