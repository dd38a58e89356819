//! Local TLS routing proxy
//!
//! Accepts plaintext connections on a loopback listener (or uses the calling
//! process's stdin/stdout), dials the remote gateway over TLS advertising the
//! target protocol through ALPN, and forwards bytes in both directions until
//! either side closes or the session is cancelled.

pub mod banner;
pub mod config;
pub mod dialer;
pub mod forward;
pub mod observer;
pub mod registry;
pub mod session;
pub mod shutdown;

pub use banner::DbProxyBanner;
pub use config::{split_host_port, LocalEndpoint, LocalProxyConfig, DEFAULT_DIAL_TIMEOUT};
pub use dialer::UpstreamDialer;
pub use forward::ForwardStats;
pub use observer::{ProxyEvent, ProxyObserver, TracingObserver};
pub use registry::ConnectionRegistry;
pub use session::LocalProxy;
pub use shutdown::ShutdownCoordinator;

use thiserror::Error;
use tlsroute_cert::CertError;
use tlsroute_proto::{ContextError, ProtoError};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Protocol(#[from] ProtoError),

    #[error(transparent)]
    Certificate(#[from] CertError),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different --port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },

    #[error("Failed to connect to gateway {addr}: {source}")]
    ConnectFailed {
        addr: String,
        source: std::io::Error,
    },

    #[error("Timed out after {timeout:?} dialing gateway {addr}")]
    DialTimeout {
        addr: String,
        timeout: std::time::Duration,
    },

    #[error("TLS handshake with gateway {addr} failed: {reason}")]
    Handshake { addr: String, reason: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("{0}")]
    Canceled(#[from] ContextError),
}
