//! SSH proxy command support
//!
//! Used as an OpenSSH `ProxyCommand`. When the gateway supports TLS routing
//! the shell connection is tunneled over the calling process's stdin/stdout
//! ([`TunnelStrategy`]); otherwise an external `ssh` client is spawned against
//! the legacy SSH proxy port ([`SubprocessStrategy`]).

pub mod subprocess;
pub mod tunnel;

pub use subprocess::SubprocessStrategy;
pub use tunnel::TunnelStrategy;

use async_trait::async_trait;
use rustls::pki_types::CertificateDer;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;
use tlsroute_cert::CertificateSet;
use tlsroute_proto::Context;
use tlsroute_proxy::{split_host_port, ForwardStats, ProxyError, DEFAULT_DIAL_TIMEOUT};

#[derive(Debug, Error)]
pub enum SshError {
    #[error("Invalid SSH target {0:?}: expected [login@]host:port")]
    InvalidTarget(String),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
}

/// Node the caller wants to reach, as passed by OpenSSH (`%r@%h:%p`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub login: Option<String>,
    pub host: String,
    pub port: u16,
}

impl SshTarget {
    /// Parse `[login@]host:port`
    pub fn parse(input: &str) -> Result<Self, SshError> {
        let (login, host_port) = match input.rsplit_once('@') {
            Some((login, rest)) if !login.is_empty() => (Some(login.to_string()), rest),
            Some((_, rest)) => (None, rest),
            None => (None, input),
        };
        let (host, port) =
            split_host_port(host_port).map_err(|_| SshError::InvalidTarget(input.to_string()))?;
        Ok(Self { login, host, port })
    }
}

/// Strip the synthetic `.<proxy_host>` and then `.<site>` suffixes that
/// generated SSH configs append to node names.
pub fn clean_target_host(host: &str, proxy_host: &str, site: &str) -> String {
    let host = strip_dotted_suffix(host, proxy_host);
    strip_dotted_suffix(host, site).to_string()
}

fn strip_dotted_suffix<'a>(host: &'a str, suffix: &str) -> &'a str {
    if suffix.is_empty() {
        return host;
    }
    host.strip_suffix(suffix)
        .and_then(|rest| rest.strip_suffix('.'))
        .unwrap_or(host)
}

/// Session and profile metadata both strategies need
#[derive(Clone)]
pub struct SshProxyParams {
    /// Gateway web address (`host:port`) used for TLS routing
    pub gateway_addr: String,
    /// Legacy SSH proxy address (`host:port`)
    pub ssh_proxy_addr: String,
    /// Proxy host name stripped from node names
    pub proxy_host: String,
    /// Cluster (site) the node belongs to
    pub cluster: String,
    /// Login used when the target does not name one
    pub login: Option<String>,
    pub known_hosts: PathBuf,
    pub insecure: bool,
    pub root_certs: Vec<CertificateDer<'static>>,
    pub certs: CertificateSet,
    pub dial_timeout: Duration,
    pub context: Context,
}

impl SshProxyParams {
    pub fn new(
        gateway_addr: impl Into<String>,
        proxy_host: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Self {
        let gateway_addr = gateway_addr.into();
        Self {
            ssh_proxy_addr: gateway_addr.clone(),
            gateway_addr,
            proxy_host: proxy_host.into(),
            cluster: cluster.into(),
            login: None,
            known_hosts: PathBuf::from("known_hosts"),
            insecure: false,
            root_certs: Vec::new(),
            certs: CertificateSet::empty(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            context: Context::background(),
        }
    }

    pub fn with_ssh_proxy_addr(mut self, addr: impl Into<String>) -> Self {
        self.ssh_proxy_addr = addr.into();
        self
    }

    pub fn with_login(mut self, login: impl Into<String>) -> Self {
        let login = login.into();
        self.login = (!login.is_empty()).then_some(login);
        self
    }

    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = path.into();
        self
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn with_root_certs(mut self, roots: Vec<CertificateDer<'static>>) -> Self {
        self.root_certs = roots;
        self
    }

    pub fn with_certs(mut self, certs: CertificateSet) -> Self {
        self.certs = certs;
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_context(mut self, ctx: Context) -> Self {
        self.context = ctx;
        self
    }

    /// Target with its host cleaned and the login resolved
    pub fn resolve(&self, target: &SshTarget) -> SshTarget {
        SshTarget {
            login: target.login.clone().or_else(|| self.login.clone()),
            host: clean_target_host(&target.host, &self.proxy_host, &self.cluster),
            port: target.port,
        }
    }
}

/// How a strategy finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SshProxyOutcome {
    /// The stdio tunnel closed
    Tunneled(ForwardStats),
    /// The external client exited with this status
    Exited(ExitStatus),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SshProxyStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Connect the calling process's stdin/stdout to `target`
    async fn proxy(&self, target: &SshTarget) -> Result<SshProxyOutcome, SshError>;
}

/// Pick the strategy once, from the gateway's TLS routing capability.
/// The flag is trusted as given; nothing is probed here.
pub fn select_strategy(
    tls_routing_enabled: bool,
    params: SshProxyParams,
) -> Box<dyn SshProxyStrategy> {
    if tls_routing_enabled {
        Box::new(TunnelStrategy::new(params))
    } else {
        Box::new(SubprocessStrategy::new(params))
    }
}
