//! Protocol selection for the TLS routing proxy
//!
//! Maps logical target categories (shell, database wire dialects, HTTP apps,
//! raw passthrough) to the ALPN tokens and SNI routing values that the remote
//! gateway uses to dispatch a connection before any application byte is sent.

pub mod context;
pub mod protocol;
pub mod target;

pub use context::{Context, ContextError};
pub use protocol::{DatabaseProtocol, Protocol};
pub use target::{decode_routing_sni, encode_routing_sni, RouteSelection, TargetDescriptor};

use thiserror::Error;

/// SNI suffix under which shell routing metadata is encoded
pub const ROUTING_SNI_SUFFIX: &str = "ssh.tlsroute.local";

/// Maximum length of a DNS name carried in the SNI extension
pub const MAX_SNI_LEN: usize = 253;

/// Maximum length of a single DNS label
pub const MAX_LABEL_LEN: usize = 63;

/// Protocol selection errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    #[error("unsupported protocol {0:?}; supported protocols: ssh, postgres, mysql, mongodb, app, tcp")]
    UnsupportedProtocol(String),

    #[error("routing metadata for {0:?} does not fit in the SNI field ({MAX_SNI_LEN} bytes max)")]
    RoutingTooLong(String),

    #[error("invalid routing SNI: {0}")]
    InvalidRoutingSni(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),
}
