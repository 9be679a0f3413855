use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
    ServerName, UnixTime,
};
use rustls::{ClientConfig, DigitallySignedStruct, Error, RootCertStore, SignatureScheme};
use serde::{Deserialize, Serialize};

use super::TlsError;
use super::outgoing::TlsConnector;

/// Transport security for outgoing connections.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    /// Connect with TLS.
    #[serde(default)]
    pub enabled: bool,

    /// Skip verification of the server certificate and host name.
    ///
    /// Do NOT set this to true unless you understand the risks.
    #[serde(default)]
    pub insecure: bool,

    /// Path to a PEM file with the CA certificates to trust. The system
    /// roots are used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,

    /// Path to a PEM client certificate, requires `key_file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<PathBuf>,

    /// Path to the PEM private key of `cert_file`, in PKCS#8, PKCS#1 or
    /// SEC1 format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,

    /// Name used for SNI and certificate verification instead of the host
    /// part of the dialed address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

impl TlsConfig {
    #[cfg(any(test, feature = "test-util"))]
    pub fn test_server_config() -> Self {
        let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/ca");
        TlsConfig {
            enabled: true,
            cert_file: Some(format!("{dir}/localhost.cert.pem").into()),
            key_file: Some(format!("{dir}/localhost.key.pem").into()),
            ..TlsConfig::default()
        }
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn test_client_config() -> Self {
        let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/ca");
        TlsConfig {
            enabled: true,
            ca_file: Some(format!("{dir}/ca.cert.pem").into()),
            server_name: Some("localhost".into()),
            ..TlsConfig::default()
        }
    }

    /// Checks that can run before any file is touched.
    pub fn validate(&self) -> Result<(), TlsError> {
        match (&self.cert_file, &self.key_file) {
            (Some(_), None) => Err(TlsError::MissingKey),
            (None, Some(_)) => Err(TlsError::MissingCertificate),
            _ => Ok(()),
        }
    }

    /// Build the connector, `None` when TLS is disabled.
    pub fn connector(&self) -> Result<Option<TlsConnector>, TlsError> {
        if !self.enabled {
            return Ok(None);
        }

        let config = self.client_config()?;

        Ok(Some(TlsConnector {
            inner: tokio_rustls::TlsConnector::from(Arc::new(config)),
            server_name: self.server_name.clone(),
        }))
    }

    pub fn client_config(&self) -> Result<ClientConfig, TlsError> {
        self.validate()?;

        let provider = provider();
        let mut root_store = RootCertStore::empty();
        if let Some(ca_file) = &self.ca_file {
            for cert in load_certs(ca_file)? {
                root_store.add(cert).map_err(TlsError::AddCertToStore)?;
            }
        } else if !self.insecure {
            let result = rustls_native_certs::load_native_certs();
            if result.certs.is_empty() && !result.errors.is_empty() {
                warn!(
                    message = "native root CA certificate loading errors",
                    errs = ?result.errors
                );

                return Err(TlsError::NativeCerts(format!("{:?}", result.errors)));
            }

            let (_added, ignored) = root_store.add_parsable_certificates(result.certs);
            if ignored > 0 {
                debug!(message = "ignored unparsable native certificates", ignored);
            }
        }

        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(TlsError::TlsBuild)?
            .with_root_certificates(root_store);

        let mut config = match (&self.cert_file, &self.key_file) {
            (Some(cert_file), Some(key_file)) => {
                let certs = load_certs(cert_file)?;
                let key = load_private_key(key_file)?;

                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(TlsError::TlsBuild)?
            }
            _ => builder.with_no_client_auth(),
        };

        if self.insecure {
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(InsecureVerifier {
                    schemes: provider
                        .signature_verification_algorithms
                        .supported_schemes(),
                }));
        }

        Ok(config)
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn server_config(&self) -> Result<rustls::ServerConfig, TlsError> {
        let (Some(cert_file), Some(key_file)) = (&self.cert_file, &self.key_file) else {
            return Err(TlsError::MissingCertificate);
        };

        rustls::ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(TlsError::TlsBuild)?
            .with_no_client_auth()
            .with_single_cert(load_certs(cert_file)?, load_private_key(key_file)?)
            .map_err(TlsError::TlsBuild)
    }
}

/// Accepts any server certificate, used when `insecure` is set.
#[derive(Debug)]
struct InsecureVerifier {
    schemes: Vec<SignatureScheme>,
}

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}

fn read_pem(note: &'static str, filename: &Path) -> Result<Vec<pem::Pem>, TlsError> {
    let content = fs::read(filename).map_err(|err| TlsError::FileReadFailed {
        note,
        filename: filename.to_path_buf(),
        err,
    })?;

    pem::parse_many(content).map_err(|err| {
        let reason = err.to_string();
        match note {
            "key" => TlsError::PrivateKeyParse {
                filename: filename.to_path_buf(),
                reason,
            },
            _ => TlsError::CertificateParse {
                filename: filename.to_path_buf(),
                reason,
            },
        }
    })
}

fn load_certs(filename: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = read_pem("certificate", filename)?
        .into_iter()
        .filter(|p| p.tag() == "CERTIFICATE")
        .map(|p| CertificateDer::from(p.into_contents()))
        .collect::<Vec<_>>();

    if certs.is_empty() {
        return Err(TlsError::CertificateParse {
            filename: filename.to_path_buf(),
            reason: "no certificate found in PEM file".to_string(),
        });
    }

    Ok(certs)
}

fn load_private_key(filename: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    read_pem("key", filename)?
        .into_iter()
        .find_map(|p| match p.tag() {
            "PRIVATE KEY" => Some(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
                p.into_contents(),
            ))),
            "RSA PRIVATE KEY" => Some(PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(
                p.into_contents(),
            ))),
            "EC PRIVATE KEY" => Some(PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(
                p.into_contents(),
            ))),
            _ => None,
        })
        .ok_or_else(|| TlsError::PrivateKeyParse {
            filename: filename.to_path_buf(),
            reason: "no private key found in PEM file".to_string(),
        })
}
