use crate::ClientError;
use std::time::Duration;

/// Used whenever a dial timeout of zero is configured
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Used whenever a request timeout of zero is configured
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Gateway web API client configuration
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Gateway addresses (`host:port`), tried in order
    pub addrs: Vec<String>,

    /// Bound on establishing the TCP connection; zero means [`DEFAULT_DIAL_TIMEOUT`]
    pub dial_timeout: Duration,

    /// Bound on a whole request, redirects included; zero means [`DEFAULT_REQUEST_TIMEOUT`]
    pub request_timeout: Duration,

    /// Accept any gateway certificate (INSECURE - development only!)
    pub insecure: bool,

    /// Extra PEM-encoded CA trusted for the gateway certificate
    pub root_ca_pem: Option<Vec<u8>>,
}

impl ClientConfig {
    pub fn new(addrs: Vec<String>) -> Self {
        Self {
            addrs,
            ..Default::default()
        }
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn with_root_ca_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.root_ca_pem = Some(pem.into());
        self
    }

    pub fn check_and_set_defaults(&mut self) -> Result<(), ClientError> {
        if self.addrs.is_empty() {
            return Err(ClientError::Config(
                "at least one gateway address is required".to_string(),
            ));
        }
        if let Some(addr) = self.addrs.iter().find(|a| !a.contains(':')) {
            return Err(ClientError::Config(format!(
                "missing port in gateway address {:?}",
                addr
            )));
        }
        if self.dial_timeout.is_zero() {
            self.dial_timeout = DEFAULT_DIAL_TIMEOUT;
        }
        if self.request_timeout.is_zero() {
            self.request_timeout = DEFAULT_REQUEST_TIMEOUT;
        }
        Ok(())
    }
}
