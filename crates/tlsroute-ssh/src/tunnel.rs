//! Shell traffic tunneled through the TLS routing gateway

use crate::{SshError, SshProxyOutcome, SshProxyParams, SshProxyStrategy, SshTarget};
use async_trait::async_trait;
use std::sync::Arc;
use tlsroute_proto::{Protocol, TargetDescriptor};
use tlsroute_proxy::{split_host_port, LocalProxy, LocalProxyConfig, ProxyObserver, TracingObserver};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

pub struct TunnelStrategy {
    params: SshProxyParams,
    observer: Arc<dyn ProxyObserver>,
}

impl TunnelStrategy {
    pub fn new(params: SshProxyParams) -> Self {
        Self {
            params,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProxyObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Session config for `target`: shell ALPN, routing SNI, stdio endpoint
    pub fn session_config(&self, target: &SshTarget) -> Result<LocalProxyConfig, SshError> {
        let target = self.params.resolve(target);
        let (gateway_host, _) = split_host_port(&self.params.gateway_addr)?;

        let mut descriptor = TargetDescriptor::new(Protocol::Shell, target.host, target.port)
            .with_cluster(self.params.cluster.clone());
        if let Some(login) = target.login {
            descriptor = descriptor.with_login(login);
        }
        let route = descriptor
            .select(&gateway_host)
            .map_err(tlsroute_proxy::ProxyError::from)?;
        debug!("Tunneling to {} via {}", descriptor.routing_string(), self.params.gateway_addr);

        Ok(
            LocalProxyConfig::new(self.params.gateway_addr.clone(), Protocol::Shell)
                .with_route(route)
                .with_verify_name(gateway_host)
                .with_certs(self.params.certs.clone())
                .with_root_certs(self.params.root_certs.clone())
                .with_insecure_skip_verify(self.params.insecure)
                .with_dial_timeout(self.params.dial_timeout)
                .with_context(self.params.context.clone())
                .with_observer(self.observer.clone())
                .with_stdio(),
        )
    }

    /// Tunnel an arbitrary stream pair instead of the process's stdin/stdout
    pub async fn proxy_stream<R, W>(
        &self,
        target: &SshTarget,
        reader: R,
        writer: W,
    ) -> Result<SshProxyOutcome, SshError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let proxy = LocalProxy::new(self.session_config(target)?).await?;
        let result = proxy.proxy_stream(reader, writer).await;
        proxy.stop_all();
        Ok(SshProxyOutcome::Tunneled(result?))
    }
}

#[async_trait]
impl SshProxyStrategy for TunnelStrategy {
    fn name(&self) -> &'static str {
        "tunnel"
    }

    async fn proxy(&self, target: &SshTarget) -> Result<SshProxyOutcome, SshError> {
        self.proxy_stream(target, tokio::io::stdin(), tokio::io::stdout())
            .await
    }
}
