use crate::{ClientConfig, ClientError};
use serde::{Deserialize, Serialize};
use tlsroute_proto::Context;
use tracing::{debug, warn};

/// Redirects followed before a request is abandoned
const MAX_REDIRECTS: usize = 10;

/// `GET /webapi/ping` response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    pub cluster_name: String,
    #[serde(default)]
    pub server_version: String,
    #[serde(default)]
    pub proxy: ProxySettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Gateway multiplexes all protocols over its web port
    #[serde(default)]
    pub tls_routing_enabled: bool,
    #[serde(default)]
    pub ssh: SshProxySettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshProxySettings {
    #[serde(default)]
    pub public_addr: String,
    #[serde(default)]
    pub listen_addr: String,
}

pub struct GatewayClient {
    config: ClientConfig,
    http: reqwest::Client,
}

impl GatewayClient {
    pub fn new(mut config: ClientConfig) -> Result<Self, ClientError> {
        config.check_and_set_defaults()?;

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(config.dial_timeout)
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .danger_accept_invalid_certs(config.insecure);
        if let Some(pem) = &config.root_ca_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| ClientError::Config(format!("invalid root CA: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetch gateway capabilities.
    ///
    /// Addresses are tried in order until one accepts a connection. Each
    /// request, redirects included, is bounded by the request timeout and
    /// by `ctx`.
    pub async fn ping(&self, ctx: &Context) -> Result<PingResponse, ClientError> {
        let mut last_err = None;
        for addr in &self.config.addrs {
            match ctx.run(self.ping_addr(addr)).await? {
                Ok(resp) => return Ok(resp),
                Err(err @ ClientError::Connect { .. }) => {
                    warn!("{}", err);
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| ClientError::Config("no gateway addresses".to_string())))
    }

    async fn ping_addr(&self, addr: &str) -> Result<PingResponse, ClientError> {
        let url = format!("https://{}/webapi/ping", addr);
        debug!("Pinging gateway at {}", url);

        let resp = self.http.get(&url).send().await.map_err(|e| {
            if e.is_connect() {
                ClientError::Connect {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                }
            } else if e.is_timeout() {
                ClientError::Timeout {
                    addr: addr.to_string(),
                    timeout: self.config.request_timeout,
                }
            } else {
                ClientError::Request(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                addr: addr.to_string(),
                status: status.as_u16(),
            });
        }

        resp.json::<PingResponse>().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout {
                    addr: addr.to_string(),
                    timeout: self.config.request_timeout,
                }
            } else {
                ClientError::Request(e.to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_response_defaults() {
        let resp: PingResponse = serde_json::from_str(r#"{"cluster_name":"root"}"#).unwrap();
        assert_eq!(resp.cluster_name, "root");
        assert!(!resp.proxy.tls_routing_enabled);
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let client =
            GatewayClient::new(ClientConfig::new(vec!["198.18.0.254:1234".to_string()])).unwrap();
        let ctx = Context::background();
        ctx.cancel();
        assert!(matches!(
            client.ping(&ctx).await,
            Err(ClientError::Canceled)
        ));
    }
}
