//! Local proxy session configuration

use crate::observer::{ProxyObserver, TracingObserver};
use crate::ProxyError;
use rustls::pki_types::CertificateDer;
use std::sync::Arc;
use std::time::Duration;
use tlsroute_cert::{CertError, CertificateSet};
use tlsroute_proto::{Context, Protocol, RouteSelection};
use tokio::net::TcpListener;

/// Used whenever a dial timeout of zero is configured
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Where local connections come from. Exactly one source per session.
#[derive(Debug)]
pub enum LocalEndpoint {
    /// A listener bound by the caller
    Listener(TcpListener),
    /// Bind `127.0.0.1:<port>`; port 0 picks an ephemeral port
    Loopback { port: u16 },
    /// The calling process's own stdin/stdout
    Stdio,
}

impl Default for LocalEndpoint {
    fn default() -> Self {
        LocalEndpoint::Loopback { port: 0 }
    }
}

/// Local proxy configuration
pub struct LocalProxyConfig {
    /// Gateway address (`host:port`)
    pub remote_proxy_addr: String,

    /// Logical protocol being tunneled
    pub protocol: Protocol,

    /// Ordered ALPN candidates; the first one the gateway accepts wins
    pub alpn_protocols: Vec<String>,

    /// SNI value; defaults to the gateway host
    pub sni: Option<String>,

    /// Name the gateway certificate is verified against; defaults to the gateway host
    pub verify_name: Option<String>,

    /// Client certificates presented during the handshake
    pub certs: CertificateSet,

    /// Trusted roots; empty means the bundled webpki roots
    pub root_certs: Vec<CertificateDer<'static>>,

    /// Skip gateway certificate verification (explicit opt-in only)
    pub insecure_skip_verify: bool,

    /// Bound on TCP connect + TLS handshake; zero means [`DEFAULT_DIAL_TIMEOUT`]
    pub dial_timeout: Duration,

    /// Close a connection after this long without traffic in one direction
    pub idle_timeout: Option<Duration>,

    pub local: LocalEndpoint,

    pub parent_context: Context,

    pub observer: Arc<dyn ProxyObserver>,
}

impl LocalProxyConfig {
    pub fn new(remote_proxy_addr: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            remote_proxy_addr: remote_proxy_addr.into(),
            protocol,
            alpn_protocols: protocol.alpn_candidates(),
            sni: None,
            verify_name: None,
            certs: CertificateSet::empty(),
            root_certs: Vec::new(),
            insecure_skip_verify: false,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            idle_timeout: None,
            local: LocalEndpoint::default(),
            parent_context: Context::background(),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Apply a computed route (ALPN candidates and SNI)
    pub fn with_route(mut self, route: RouteSelection) -> Self {
        self.alpn_protocols = route.alpn_protocols;
        self.sni = Some(route.server_name);
        self
    }

    pub fn with_alpn_protocols(mut self, protocols: Vec<String>) -> Self {
        self.alpn_protocols = protocols;
        self
    }

    pub fn with_sni(mut self, sni: impl Into<String>) -> Self {
        self.sni = Some(sni.into());
        self
    }

    pub fn with_verify_name(mut self, name: impl Into<String>) -> Self {
        self.verify_name = Some(name.into());
        self
    }

    pub fn with_certs(mut self, certs: CertificateSet) -> Self {
        self.certs = certs;
        self
    }

    pub fn with_root_certs(mut self, roots: Vec<CertificateDer<'static>>) -> Self {
        self.root_certs = roots;
        self
    }

    /// Disable gateway certificate verification (INSECURE - development only!)
    pub fn with_insecure_skip_verify(mut self, insecure: bool) -> Self {
        self.insecure_skip_verify = insecure;
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn with_listener(mut self, listener: TcpListener) -> Self {
        self.local = LocalEndpoint::Listener(listener);
        self
    }

    pub fn with_loopback_port(mut self, port: u16) -> Self {
        self.local = LocalEndpoint::Loopback { port };
        self
    }

    pub fn with_stdio(mut self) -> Self {
        self.local = LocalEndpoint::Stdio;
        self
    }

    pub fn with_context(mut self, ctx: Context) -> Self {
        self.parent_context = ctx;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProxyObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Validate the configuration and fill in defaults.
    ///
    /// Runs before any socket is opened: configuration and certificate
    /// validity errors surface here, never from the accept loop.
    pub fn check_and_set_defaults(&mut self) -> Result<(), ProxyError> {
        let (host, _) = split_host_port(&self.remote_proxy_addr)?;

        if self.alpn_protocols.is_empty() {
            return Err(ProxyError::Config(
                "at least one ALPN protocol is required".to_string(),
            ));
        }
        if self.dial_timeout.is_zero() {
            self.dial_timeout = DEFAULT_DIAL_TIMEOUT;
        }
        if self.sni.as_deref().map_or(true, str::is_empty) {
            self.sni = Some(host.clone());
        }
        if self.verify_name.as_deref().map_or(true, str::is_empty) {
            self.verify_name = Some(host);
        }

        if self.protocol.requires_client_cert() && self.certs.is_empty() {
            return Err(ProxyError::Certificate(CertError::NotFound(format!(
                "{} proxy requires a client certificate, please login first. 'tlsroute login'",
                self.protocol
            ))));
        }
        self.certs.ensure_not_expired(chrono::Utc::now())?;

        Ok(())
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts
pub fn split_host_port(addr: &str) -> Result<(String, u16), ProxyError> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| ProxyError::Config(format!("missing port in address {:?}", addr)))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(ProxyError::Config(format!("missing host in address {:?}", addr)));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| ProxyError::Config(format!("invalid port in address {:?}", addr)))?;
    Ok((host.to_string(), port))
}
