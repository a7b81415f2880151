//! TLS connector for `wss://` endpoints.

use crate::config::TlsClientConfig;
use crate::error::ClientError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::RootCertStore;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_tungstenite::Connector;

/// Builds the connector for a configured endpoint.
///
/// Returns `None` when the defaults apply: plain `ws://`, or `wss://` verified
/// against the bundled webpki roots.
pub fn connector_for(config: &TlsClientConfig) -> Result<Option<Connector>, ClientError> {
    if !config.is_customized() {
        return Ok(None);
    }
    let client_config = if config.insecure {
        tracing::warn!("Using insecure TLS (certificate verification disabled)");
        insecure_client_config()
    } else {
        client_config(config)?
    };
    Ok(Some(Connector::Rustls(Arc::new(client_config))))
}

fn client_config(config: &TlsClientConfig) -> Result<rustls::ClientConfig, ClientError> {
    let root_store = if let Some(ref ca_path) = config.ca_cert_path {
        let certs = load_certs(ca_path)?;
        let mut store = RootCertStore::empty();
        for cert in certs {
            store
                .add(cert)
                .map_err(|e| ClientError::TlsConfig(format!("invalid CA cert: {}", e)))?;
        }
        store
    } else {
        let mut store = RootCertStore::empty();
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        store
    };

    let builder = rustls::ClientConfig::builder().with_root_certificates(root_store);

    if let (Some(cert_path), Some(key_path)) = (&config.client_cert_path, &config.client_key_path)
    {
        let certs = load_certs(cert_path)?;
        let key = load_private_key(key_path)?;
        builder
            .with_client_auth_cert(certs, key)
            .map_err(|e| ClientError::TlsConfig(format!("invalid client cert/key: {}", e)))
    } else {
        Ok(builder.with_no_client_auth())
    }
}

fn insecure_client_config() -> rustls::ClientConfig {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::UnixTime;
    use rustls::DigitallySignedStruct;

    #[derive(Debug)]
    struct AcceptAnyCert;

    impl ServerCertVerifier for AcceptAnyCert {
        fn verify_server_cert(
            &self,
            _: &CertificateDer<'_>,
            _: &[CertificateDer<'_>],
            _: &ServerName<'_>,
            _: &[u8],
            _: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _: &[u8],
            _: &CertificateDer<'_>,
            _: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _: &[u8],
            _: &CertificateDer<'_>,
            _: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
            vec![
                rustls::SignatureScheme::RSA_PKCS1_SHA256,
                rustls::SignatureScheme::RSA_PKCS1_SHA384,
                rustls::SignatureScheme::RSA_PKCS1_SHA512,
                rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
                rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
                rustls::SignatureScheme::RSA_PSS_SHA256,
                rustls::SignatureScheme::RSA_PSS_SHA384,
                rustls::SignatureScheme::RSA_PSS_SHA512,
                rustls::SignatureScheme::ED25519,
            ]
        }
    }

    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth()
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ClientError> {
    let file = File::open(path)
        .map_err(|e| ClientError::TlsConfig(format!("cannot open cert file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ClientError::TlsConfig(format!("invalid cert file {:?}: {}", path, e)))
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ClientError> {
    let file = File::open(path)
        .map_err(|e| ClientError::TlsConfig(format!("cannot open key file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ClientError::TlsConfig(format!("invalid key file {:?}: {}", path, e)))?
        .ok_or_else(|| ClientError::TlsConfig(format!("no private key found in {:?}", path)))
}
