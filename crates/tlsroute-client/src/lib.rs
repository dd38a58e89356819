//! Gateway web API client
//!
//! Only what the proxy commands need: discovering whether the gateway
//! multiplexes protocols over one TLS port, and where its SSH proxy listens.

pub mod client;
pub mod config;

pub use client::{GatewayClient, PingResponse, ProxySettings, SshProxySettings};
pub use config::{ClientConfig, DEFAULT_DIAL_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};

use std::time::Duration;
use thiserror::Error;
use tlsroute_proto::ContextError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to connect to gateway {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("Gateway {addr} did not answer within {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error("Gateway {addr} returned {status}")]
    Status { addr: String, status: u16 },

    #[error("Request to gateway failed: {0}")]
    Request(String),

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("context canceled")]
    Canceled,
}

impl From<ContextError> for ClientError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Canceled => ClientError::Canceled,
            ContextError::DeadlineExceeded => ClientError::DeadlineExceeded,
        }
    }
}
