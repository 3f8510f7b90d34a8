use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use tokio_rustls::rustls::client::WebPkiServerVerifier;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{self, CryptoProvider, WebPkiSupportedAlgorithms};
use tokio_rustls::rustls::pki_types::{
    CertificateDer, CertificateRevocationListDer, PrivateKeyDer, ServerName, UnixTime,
};
use tokio_rustls::rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, Error, RootCertStore,
    SignatureScheme, version,
};

use crate::api::client::config::{SslConfig, SslMode};
use crate::error::{GaussWireError, GaussWireResult};
use crate::tokio::TlsConnector;

/// Verifies the certificate chain and revocation lists but accepts a
/// certificate issued for any hostname.
///
/// Used for `sslmode=verify-ca`, and for `require` when a root certificate
/// is configured.
#[derive(Debug, Clone)]
pub struct SkipHostnameVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl SkipHostnameVerifier {
    pub fn new(inner: Arc<WebPkiServerVerifier>) -> Self {
        Self { inner }
    }
}

fn is_name_mismatch(e: &CertificateError) -> bool {
    matches!(
        e,
        CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
    )
}

impl ServerCertVerifier for SkipHostnameVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        // the hostname is checked last, a mismatch means the chain is valid
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(Error::InvalidCertificate(e)) if is_name_mismatch(&e) => {
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Accepts any server certificate. The handshake signatures are still
/// checked against the presented certificate.
///
/// Used for `sslmode` `allow`, `prefer` and `require` without a root
/// certificate. These modes encrypt the session but do not protect against
/// a man in the middle.
#[derive(Debug, Clone)]
pub struct NoopVerifier {
    supported: WebPkiSupportedAlgorithms,
}

impl NoopVerifier {
    pub fn new_with_provider(provider: &CryptoProvider) -> Self {
        Self {
            supported: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for NoopVerifier {
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
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.supported)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.supported)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported.supported_schemes()
    }
}

#[cfg(feature = "_aws-lc-rs")]
fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(crypto::aws_lc_rs::default_provider())
}

#[cfg(all(feature = "_ring", not(feature = "_aws-lc-rs")))]
fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(crypto::ring::default_provider())
}

fn open(path: &Path, what: &str) -> GaussWireResult<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| GaussWireError::InvalidConfig(format!("{what} {}: {e}", path.display())))
}

fn load_certs(path: &Path, what: &str) -> GaussWireResult<Vec<CertificateDer<'static>>> {
    let mut reader = open(path, what)?;
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| GaussWireError::InvalidConfig(format!("{what} {}: {e}", path.display())))
}

fn load_key(path: &Path) -> GaussWireResult<PrivateKeyDer<'static>> {
    let mut reader = open(path, "sslkey")?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| GaussWireError::InvalidConfig(format!("sslkey {}: {e}", path.display())))?
        .ok_or_else(|| {
            GaussWireError::InvalidConfig(format!("sslkey {}: no private key", path.display()))
        })
}

fn load_crls(path: &Path) -> GaussWireResult<Vec<CertificateRevocationListDer<'static>>> {
    let mut reader = open(path, "sslcrl")?;
    rustls_pemfile::crls(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| GaussWireError::InvalidConfig(format!("sslcrl {}: {e}", path.display())))
}

fn webpki_verifier(
    ssl: &SslConfig,
    root_cert: &Path,
    provider: Arc<CryptoProvider>,
) -> GaussWireResult<Arc<WebPkiServerVerifier>> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(root_cert, "sslrootcert")? {
        roots.add(cert)?;
    }

    let mut builder = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider);
    if let Some(crl) = &ssl.crl {
        builder = builder.with_crls(load_crls(crl)?);
    }
    builder
        .build()
        .map_err(|e| GaussWireError::InvalidConfig(format!("sslrootcert {e}")))
}

/// Build the TLS connector for an `sslmode`.
///
/// `verify-ca` and `verify-full` require `sslrootcert`. A client
/// certificate is presented when both `sslcert` and `sslkey` are set.
pub fn tls_connector(ssl: &SslConfig) -> GaussWireResult<TlsConnector> {
    let provider = crypto_provider();
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&version::TLS12, &version::TLS13])?;

    let builder = match (ssl.mode, &ssl.root_cert) {
        (SslMode::VerifyFull, Some(root_cert)) => {
            builder.with_webpki_verifier(webpki_verifier(ssl, root_cert, provider)?)
        }
        (SslMode::VerifyCa | SslMode::Require, Some(root_cert)) => {
            let verifier = webpki_verifier(ssl, root_cert, provider)?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipHostnameVerifier::new(verifier)))
        }
        (SslMode::VerifyCa | SslMode::VerifyFull, None) => {
            return Err(GaussWireError::InvalidConfig(
                "sslrootcert is required for sslmode verify-ca and verify-full".to_owned(),
            ));
        }
        _ => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoopVerifier::new_with_provider(
                &provider,
            ))),
    };

    let config = match (&ssl.cert, &ssl.key) {
        (Some(cert), Some(key)) => {
            debug!("presenting client certificate {}", cert.display());
            builder.with_client_auth_cert(load_certs(cert, "sslcert")?, load_key(key)?)?
        }
        _ => builder.with_no_client_auth(),
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_modes() {
        let mut ssl = SslConfig::default();
        assert!(tls_connector(&ssl).is_ok());

        ssl.mode = SslMode::Require;
        assert!(tls_connector(&ssl).is_ok());

        ssl.mode = SslMode::VerifyFull;
        assert!(matches!(
            tls_connector(&ssl),
            Err(GaussWireError::InvalidConfig(_))
        ));

        ssl.mode = SslMode::VerifyCa;
        ssl.root_cert = Some("/nonexistent/root.crt".into());
        assert!(matches!(
            tls_connector(&ssl),
            Err(GaussWireError::InvalidConfig(_))
        ));
    }
}
