//! TLS dialer for the remote gateway

use crate::{LocalProxyConfig, ProxyError};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{ResolvesClientCert, WebPkiServerVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::sign::CertifiedKey;
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use std::time::Duration;
use tlsroute_cert::CertificateSet;
use tlsroute_proto::Context;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        // Err means another provider is already installed
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Dials the gateway and completes the TLS handshake.
///
/// Built once per session; every accepted connection shares the same
/// connector, so the certificate set is parsed into signing keys only once.
#[derive(Clone)]
pub struct UpstreamDialer {
    addr: String,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    dial_timeout: Duration,
}

impl UpstreamDialer {
    /// Build a dialer from a config that already passed `check_and_set_defaults`
    pub fn new(config: &LocalProxyConfig) -> Result<Self, ProxyError> {
        ensure_crypto_provider();

        let sni = config.sni.clone().unwrap_or_default();
        let verify_name = config.verify_name.clone().unwrap_or_else(|| sni.clone());

        let server_name = ServerName::try_from(sni.clone())
            .map_err(|e| ProxyError::Config(format!("invalid SNI {:?}: {}", sni, e)))?;

        let verifier: Arc<dyn ServerCertVerifier> = if config.insecure_skip_verify {
            debug!("Gateway certificate verification disabled");
            SkipVerification::new()
        } else {
            let webpki = build_webpki_verifier(&config.root_certs)?;
            if verify_name != sni {
                let name = ServerName::try_from(verify_name.clone()).map_err(|e| {
                    ProxyError::Config(format!("invalid gateway name {:?}: {}", verify_name, e))
                })?;
                Arc::new(GatewayNameVerifier {
                    inner: webpki,
                    name,
                })
            } else {
                webpki
            }
        };

        let builder = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier);

        let mut tls_config = if config.certs.is_empty() {
            builder.with_no_client_auth()
        } else {
            builder.with_client_cert_resolver(Arc::new(CertificateSetResolver::new(
                &config.certs,
            )?))
        };
        tls_config.alpn_protocols = config
            .alpn_protocols
            .iter()
            .map(|p| p.as_bytes().to_vec())
            .collect();

        Ok(Self {
            addr: config.remote_proxy_addr.clone(),
            server_name,
            connector: TlsConnector::from(Arc::new(tls_config)),
            dial_timeout: config.dial_timeout,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    /// Connect and handshake, bounded by the dial timeout and by `ctx`.
    ///
    /// Failures are terminal: there is no retry. Dropping the in-flight
    /// future on timeout or cancellation closes the half-open socket.
    pub async fn dial(&self, ctx: &Context) -> Result<TlsStream<TcpStream>, ProxyError> {
        let attempt = async {
            let tcp = TcpStream::connect(&self.addr)
                .await
                .map_err(|source| ProxyError::ConnectFailed {
                    addr: self.addr.clone(),
                    source,
                })?;
            let _ = tcp.set_nodelay(true);

            self.connector
                .connect(self.server_name.clone(), tcp)
                .await
                .map_err(|e| ProxyError::Handshake {
                    addr: self.addr.clone(),
                    reason: e.to_string(),
                })
        };

        match ctx.run(tokio::time::timeout(self.dial_timeout, attempt)).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProxyError::DialTimeout {
                addr: self.addr.clone(),
                timeout: self.dial_timeout,
            }),
            Err(err) => Err(ProxyError::Canceled(err)),
        }
    }
}

/// ALPN protocol the gateway selected, if any
pub fn negotiated_alpn(stream: &TlsStream<TcpStream>) -> Option<String> {
    stream
        .get_ref()
        .1
        .alpn_protocol()
        .map(|p| String::from_utf8_lossy(p).into_owned())
}

fn build_webpki_verifier(
    root_certs: &[CertificateDer<'static>],
) -> Result<Arc<WebPkiServerVerifier>, ProxyError> {
    let mut roots = RootCertStore::empty();
    if root_certs.is_empty() {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    } else {
        for cert in root_certs {
            roots
                .add(cert.clone())
                .map_err(|e| ProxyError::Tls(format!("invalid root certificate: {}", e)))?;
        }
    }

    WebPkiServerVerifier::builder_with_provider(
        Arc::new(roots),
        Arc::new(rustls::crypto::ring::default_provider()),
    )
    .build()
    .map_err(|e| ProxyError::Tls(e.to_string()))
}

/// Verifies the gateway certificate against the gateway host name while the
/// handshake carries routing metadata in SNI.
#[derive(Debug)]
struct GatewayNameVerifier {
    inner: Arc<WebPkiServerVerifier>,
    name: ServerName<'static>,
}

impl ServerCertVerifier for GatewayNameVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.inner
            .verify_server_cert(end_entity, intermediates, &self.name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

// Insecure TLS verifier, only used when explicitly requested
#[derive(Debug)]
struct SkipVerification {
    provider: CryptoProvider,
}

impl SkipVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            provider: rustls::crypto::ring::default_provider(),
        })
    }
}

impl ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Offers the first certificate whose key can sign with a scheme the gateway accepts
#[derive(Debug)]
struct CertificateSetResolver {
    keys: Vec<Arc<CertifiedKey>>,
}

impl CertificateSetResolver {
    fn new(certs: &CertificateSet) -> Result<Self, ProxyError> {
        let keys = certs
            .iter()
            .map(|cert| {
                let signing_key = rustls::crypto::ring::sign::any_supported_type(&cert.private_key)
                    .map_err(|e| ProxyError::Tls(format!("unsupported client key: {}", e)))?;
                Ok(Arc::new(CertifiedKey::new(
                    cert.cert_chain.clone(),
                    signing_key,
                )))
            })
            .collect::<Result<Vec<_>, ProxyError>>()?;
        Ok(Self { keys })
    }
}

impl ResolvesClientCert for CertificateSetResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        self.keys
            .iter()
            .find(|key| key.key.choose_scheme(sigschemes).is_some())
            .cloned()
    }

    fn has_certs(&self) -> bool {
        !self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlsroute_proto::Protocol;

    #[tokio::test]
    async fn test_dialer_uses_route_sni() {
        let mut config = LocalProxyConfig::new("127.0.0.1:443", Protocol::Raw)
            .with_sni("db.internal.example.com")
            .with_insecure_skip_verify(true);
        config.check_and_set_defaults().unwrap();

        let dialer = UpstreamDialer::new(&config).unwrap();
        assert_eq!(
            dialer.server_name,
            ServerName::try_from("db.internal.example.com").unwrap()
        );
        assert_eq!(dialer.addr(), "127.0.0.1:443");
    }

    #[tokio::test]
    async fn test_cancelled_context_aborts_dial() {
        let mut config = LocalProxyConfig::new("198.18.0.254:1234", Protocol::Raw);
        config.check_and_set_defaults().unwrap();
        let dialer = UpstreamDialer::new(&config).unwrap();

        let ctx = Context::background();
        ctx.cancel();
        let err = dialer.dial(&ctx).await.unwrap_err();
        assert!(matches!(err, ProxyError::Canceled(_)));
    }
}
