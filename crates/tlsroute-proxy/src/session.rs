//! Proxy session: accept loop and per-connection forwarding

use crate::dialer::{negotiated_alpn, UpstreamDialer};
use crate::forward::{pipe, ForwardStats};
use crate::observer::{ProxyEvent, ProxyObserver};
use crate::shutdown::ShutdownCoordinator;
use crate::{LocalEndpoint, LocalProxyConfig, ProxyError};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tlsroute_proto::{Context, Protocol};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// How long `start` waits for in-flight connections after shutdown
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Pause after a failed accept
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

struct Shared {
    dialer: UpstreamDialer,
    coordinator: Arc<ShutdownCoordinator>,
    observer: Arc<dyn ProxyObserver>,
    idle_timeout: Option<Duration>,
}

/// A local proxy session.
///
/// Owns exactly one local connection source: a loopback listener or the
/// process's stdin/stdout.
pub struct LocalProxy {
    shared: Arc<Shared>,
    protocol: Protocol,
    local_addr: Option<SocketAddr>,
    stdio: bool,
    tracker: TaskTracker,
    watching: AtomicBool,
}

impl LocalProxy {
    /// Validate `config`, prepare the TLS dialer and bind the local listener.
    ///
    /// Configuration and certificate errors are returned here, before any
    /// connection to the gateway is attempted.
    pub async fn new(mut config: LocalProxyConfig) -> Result<Self, ProxyError> {
        config.check_and_set_defaults()?;
        let dialer = UpstreamDialer::new(&config)?;

        let coordinator = Arc::new(ShutdownCoordinator::new(
            config.parent_context.child(),
            config.observer.clone(),
        ));

        let (local_addr, stdio) = match config.local {
            LocalEndpoint::Listener(listener) => {
                let addr = listener.local_addr()?;
                coordinator.set_listener(Arc::new(listener));
                (Some(addr), false)
            }
            LocalEndpoint::Loopback { port } => {
                let listener = bind_with_retry(port).await?;
                let addr = listener.local_addr()?;
                coordinator.set_listener(Arc::new(listener));
                (Some(addr), false)
            }
            LocalEndpoint::Stdio => (None, true),
        };

        debug!(
            "Prepared {} proxy to {} (SNI {})",
            config.protocol,
            config.remote_proxy_addr,
            config.sni.as_deref().unwrap_or_default()
        );

        Ok(Self {
            shared: Arc::new(Shared {
                dialer,
                coordinator,
                observer: config.observer,
                idle_timeout: config.idle_timeout,
            }),
            protocol: config.protocol,
            local_addr,
            stdio,
            tracker: TaskTracker::new(),
            watching: AtomicBool::new(false),
        })
    }

    /// Address of the local listener; `None` in stdio mode
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shared.coordinator
    }

    pub fn active_connections(&self) -> usize {
        self.shared.coordinator.registry().len()
    }

    /// Stop accepting and close every active connection. Safe to call repeatedly.
    pub fn stop_all(&self) -> bool {
        self.shared.coordinator.stop_all()
    }

    /// Run the session until the parent context finishes or `stop_all` is called.
    ///
    /// In stdio mode this proxies the single stdin/stdout connection and
    /// returns its dial error, if any. In listener mode connection failures
    /// are reported to the observer and never end the loop.
    pub async fn start(&self) -> Result<(), ProxyError> {
        self.spawn_watcher();

        if self.stdio {
            let result = self
                .proxy_stream(tokio::io::stdin(), tokio::io::stdout())
                .await;
            self.stop_all();
            return result.map(|_| ());
        }

        let Some(listener) = self.shared.coordinator.listener() else {
            debug!("Session stopped before start");
            return Ok(());
        };
        if let Some(addr) = self.local_addr {
            self.shared
                .observer
                .on_event(&ProxyEvent::Listening { addr });
        }

        let ctx = self.shared.coordinator.context().clone();
        loop {
            let accepted = tokio::select! {
                _ = ctx.done() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    let (reader, writer) = stream.into_split();
                    let shared = self.shared.clone();
                    self.tracker.spawn(async move {
                        // Errors were already reported to the observer
                        let _ = serve(shared, reader, writer, Some(peer)).await;
                    });
                }
                Err(e) => {
                    self.shared.observer.on_event(&ProxyEvent::AcceptFailed {
                        error: e.to_string(),
                    });
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }

        drop(listener);
        self.stop_all();

        self.tracker.close();
        if tokio::time::timeout(STOP_GRACE, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "{} connections still open {:?} after shutdown",
                self.tracker.len(),
                STOP_GRACE
            );
        }
        info!("Local proxy session finished");
        Ok(())
    }

    /// Proxy one already-established local stream pair through the gateway.
    ///
    /// Cancelling the parent context aborts the dial or closes the stream pair.
    pub async fn proxy_stream<R, W>(&self, reader: R, writer: W) -> Result<ForwardStats, ProxyError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.spawn_watcher();
        serve(self.shared.clone(), reader, writer, None).await
    }

    // Stops the session once the parent context is cancelled or its deadline
    // passes. At most one watcher runs per session.
    fn spawn_watcher(&self) {
        if self.watching.swap(true, Ordering::SeqCst) {
            return;
        }
        let coordinator = self.shared.coordinator.clone();
        tokio::spawn(async move {
            let reason = coordinator.context().done().await;
            debug!("Session context finished: {}", reason);
            coordinator.stop_all();
        });
    }
}

async fn serve<R, W>(
    shared: Arc<Shared>,
    reader: R,
    writer: W,
    peer: Option<SocketAddr>,
) -> Result<ForwardStats, ProxyError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    // Independent of the session token; only the registry cancels it
    let done = CancellationToken::new();
    let Some(id) = shared.coordinator.registry().register(done.clone()) else {
        return Err(ProxyError::Canceled(tlsroute_proto::ContextError::Canceled));
    };
    shared.observer.on_event(&ProxyEvent::Accepted { id, peer });

    // A forced close also aborts an in-progress handshake
    let upstream = match shared.dialer.dial(&Context::from_token(done.clone())).await {
        Ok(upstream) => upstream,
        Err(e) => {
            shared.coordinator.registry().remove(id);
            shared.observer.on_event(&ProxyEvent::UpstreamFailed {
                id,
                error: e.to_string(),
            });
            return Err(e);
        }
    };
    shared.observer.on_event(&ProxyEvent::UpstreamConnected {
        id,
        alpn: negotiated_alpn(&upstream),
    });

    let stats = pipe(
        (reader, writer),
        tokio::io::split(upstream),
        done,
        shared.idle_timeout,
    )
    .await;

    shared.coordinator.registry().remove(id);
    shared
        .observer
        .on_event(&ProxyEvent::ConnectionClosed { id, stats });
    Ok(stats)
}

async fn bind_with_retry(port: u16) -> Result<TcpListener, ProxyError> {
    let bind_addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);

    // Retry to ride out a previous session's socket lingering in TIME_WAIT
    for attempt in 1..=3 {
        match TcpListener::bind(bind_addr).await {
            Ok(listener) => {
                if attempt > 1 {
                    info!("Bound to {} on attempt {}/3", bind_addr, attempt);
                }
                return Ok(listener);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse && attempt < 3 => {
                warn!(
                    "Port {} is in use (attempt {}/3), retrying in 1 second...",
                    port, attempt
                );
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => {
                return Err(ProxyError::BindError {
                    address: bind_addr.ip().to_string(),
                    port,
                    reason: e.to_string(),
                });
            }
        }
    }

    Err(ProxyError::BindError {
        address: bind_addr.ip().to_string(),
        port,
        reason: "Address in use after 3 retry attempts".to_string(),
    })
}
