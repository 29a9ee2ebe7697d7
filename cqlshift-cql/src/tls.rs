//! TLS transport support for the session.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use tokio_rustls::rustls::{
    ClientConfig, DigitallySignedStruct, Error as RustlsError, RootCertStore, SignatureScheme,
};
use tokio_rustls::TlsConnector;

use crate::error::{CqlError, CqlResult};
use crate::session::TlsSettings;

/// Wrap an established TCP connection in a TLS handshake.
pub(crate) async fn connect(
    host: &str,
    tcp: TcpStream,
    settings: &TlsSettings,
) -> CqlResult<TlsStream<TcpStream>> {
    let config = client_config(settings)?;
    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| CqlError::Tls(format!("invalid server name {host}: {e}")))?;

    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| CqlError::Tls(format!("TLS handshake with {host} failed: {e}")))
}

fn client_config(settings: &TlsSettings) -> CqlResult<ClientConfig> {
    let builder = ClientConfig::builder();
    let builder = if settings.skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification))
    } else {
        builder.with_root_certificates(load_roots(&settings.ca_cert)?)
    };

    match (&settings.client_cert, &settings.client_key) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(read_certs(cert)?, read_key(key)?)
            .map_err(|e| CqlError::Tls(format!("invalid client certificate: {e}"))),
        _ => Ok(builder.with_no_client_auth()),
    }
}

fn load_roots(path: &Path) -> CqlResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in read_certs(path)? {
        roots.add(cert).map_err(|e| {
            CqlError::Tls(format!("invalid CA certificate in {}: {e}", path.display()))
        })?;
    }
    if roots.is_empty() {
        return Err(CqlError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(roots)
}

fn read_certs(path: &Path) -> CqlResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| CqlError::Tls(format!("failed to read {}: {e}", path.display())))?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CqlError::Tls(format!("failed to parse {}: {e}", path.display())))
}

fn read_key(path: &Path) -> CqlResult<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| CqlError::Tls(format!("failed to read {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| CqlError::Tls(format!("failed to parse {}: {e}", path.display())))?
        .ok_or_else(|| CqlError::Tls(format!("no private key found in {}", path.display())))
}

/// Accept-anything verifier backing the `skip_verify` option.
#[derive(Debug)]
struct NoVerification;

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, RustlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
