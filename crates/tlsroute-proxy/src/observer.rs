//! Session lifecycle events
//!
//! The proxy never writes to a process-global logger directly; it reports
//! through an injected [`ProxyObserver`]. [`TracingObserver`] forwards events
//! to `tracing` and is the default.

use crate::forward::ForwardStats;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyEvent {
    /// Local listener is accepting connections
    Listening { addr: SocketAddr },

    /// A local connection was accepted (`peer` is `None` for stdio)
    Accepted { id: u64, peer: Option<SocketAddr> },

    /// Accepting a local connection failed; the loop keeps running
    AcceptFailed { error: String },

    /// Gateway handshake completed with the negotiated ALPN protocol
    UpstreamConnected { id: u64, alpn: Option<String> },

    /// Dialing the gateway failed for one local connection
    UpstreamFailed { id: u64, error: String },

    /// Both directions of a proxied connection are finished
    ConnectionClosed { id: u64, stats: ForwardStats },

    /// Session stopped; `closed_connections` were force-closed
    Stopped { closed_connections: usize },
}

pub trait ProxyObserver: Send + Sync {
    fn on_event(&self, event: &ProxyEvent);
}

/// Default observer that logs through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ProxyObserver for TracingObserver {
    fn on_event(&self, event: &ProxyEvent) {
        match event {
            ProxyEvent::Listening { addr } => {
                info!("Local proxy listening on {}", addr);
            }
            ProxyEvent::Accepted { id, peer } => match peer {
                Some(peer) => debug!(connection_id = id, "Accepted connection from {}", peer),
                None => debug!(connection_id = id, "Proxying stdin/stdout"),
            },
            ProxyEvent::AcceptFailed { error } => {
                warn!("Failed to accept connection: {}", error);
            }
            ProxyEvent::UpstreamConnected { id, alpn } => {
                debug!(
                    connection_id = id,
                    "Connected to gateway (ALPN: {})",
                    alpn.as_deref().unwrap_or("none")
                );
            }
            ProxyEvent::UpstreamFailed { id, error } => {
                warn!(connection_id = id, "Failed to dial gateway: {}", error);
            }
            ProxyEvent::ConnectionClosed { id, stats } => {
                debug!(
                    connection_id = id,
                    bytes_sent = stats.sent,
                    bytes_received = stats.received,
                    "Connection closed"
                );
            }
            ProxyEvent::Stopped { closed_connections } => {
                info!(
                    "Local proxy stopped ({} active connections closed)",
                    closed_connections
                );
            }
        }
    }
}
