//! Logical protocol categories and their ALPN tokens

use crate::ProtoError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// ALPN token for interactive shell traffic
pub const ALPN_PROXY_SSH: &str = "tlsroute-proxy-ssh";
/// ALPN token for the PostgreSQL wire protocol
pub const ALPN_POSTGRES: &str = "tlsroute-postgres";
/// ALPN token for the MySQL wire protocol
pub const ALPN_MYSQL: &str = "tlsroute-mysql";
/// ALPN token for the MongoDB wire protocol
pub const ALPN_MONGODB: &str = "tlsroute-mongodb";
/// ALPN token for HTTP application traffic
pub const ALPN_HTTP: &str = "http/1.1";
/// ALPN token for raw TCP passthrough
pub const ALPN_TCP: &str = "tlsroute-tcp";

/// Database wire dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseProtocol {
    Postgres,
    Mysql,
    Mongodb,
}

impl DatabaseProtocol {
    pub fn alpn_token(&self) -> &'static str {
        match self {
            DatabaseProtocol::Postgres => ALPN_POSTGRES,
            DatabaseProtocol::Mysql => ALPN_MYSQL,
            DatabaseProtocol::Mongodb => ALPN_MONGODB,
        }
    }
}

impl std::fmt::Display for DatabaseProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseProtocol::Postgres => write!(f, "postgres"),
            DatabaseProtocol::Mysql => write!(f, "mysql"),
            DatabaseProtocol::Mongodb => write!(f, "mongodb"),
        }
    }
}

/// Logical target category tunneled through the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Interactive shell (SSH) traffic
    Shell,
    /// Database wire protocol
    Database(DatabaseProtocol),
    /// HTTP application traffic
    App,
    /// Raw TCP passthrough
    Raw,
}

impl Protocol {
    /// Canonical ALPN token advertised for this category
    pub fn alpn_token(&self) -> &'static str {
        match self {
            Protocol::Shell => ALPN_PROXY_SSH,
            Protocol::Database(db) => db.alpn_token(),
            Protocol::App => ALPN_HTTP,
            Protocol::Raw => ALPN_TCP,
        }
    }

    /// Ordered ALPN candidates, most preferred first
    pub fn alpn_candidates(&self) -> Vec<String> {
        vec![self.alpn_token().to_string()]
    }

    /// Whether the gateway demands a client certificate for this category.
    ///
    /// Database and raw proxies may bootstrap without one; HTTP apps are
    /// authenticated purely by the client certificate.
    pub fn requires_client_cert(&self) -> bool {
        matches!(self, Protocol::App)
    }

    /// Whether routing metadata travels in the SNI field
    pub fn routes_by_sni(&self) -> bool {
        matches!(self, Protocol::Shell)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Shell => write!(f, "ssh"),
            Protocol::Database(db) => write!(f, "{}", db),
            Protocol::App => write!(f, "app"),
            Protocol::Raw => write!(f, "tcp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ssh" | "shell" => Ok(Protocol::Shell),
            "postgres" | "postgresql" => Ok(Protocol::Database(DatabaseProtocol::Postgres)),
            "mysql" => Ok(Protocol::Database(DatabaseProtocol::Mysql)),
            "mongodb" | "mongo" => Ok(Protocol::Database(DatabaseProtocol::Mongodb)),
            "app" | "http" => Ok(Protocol::App),
            "tcp" | "raw" => Ok(Protocol::Raw),
            _ => Err(ProtoError::UnsupportedProtocol(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpn_tokens() {
        assert_eq!(Protocol::Shell.alpn_token(), "tlsroute-proxy-ssh");
        assert_eq!(
            Protocol::Database(DatabaseProtocol::Postgres).alpn_token(),
            "tlsroute-postgres"
        );
        assert_eq!(
            Protocol::Database(DatabaseProtocol::Mysql).alpn_token(),
            "tlsroute-mysql"
        );
        assert_eq!(
            Protocol::Database(DatabaseProtocol::Mongodb).alpn_token(),
            "tlsroute-mongodb"
        );
        assert_eq!(Protocol::App.alpn_token(), "http/1.1");
        assert_eq!(Protocol::Raw.alpn_token(), "tlsroute-tcp");
    }

    #[test]
    fn test_parse_protocol() {
        assert_eq!("ssh".parse::<Protocol>().unwrap(), Protocol::Shell);
        assert_eq!(
            "Postgres".parse::<Protocol>().unwrap(),
            Protocol::Database(DatabaseProtocol::Postgres)
        );
        assert_eq!("http".parse::<Protocol>().unwrap(), Protocol::App);
        assert_eq!("raw".parse::<Protocol>().unwrap(), Protocol::Raw);
    }

    #[test]
    fn test_unsupported_protocol() {
        let err = "redis".parse::<Protocol>().unwrap_err();
        assert_eq!(err, ProtoError::UnsupportedProtocol("redis".to_string()));
        assert!(err.to_string().contains("supported protocols"));
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for protocol in [
            Protocol::Shell,
            Protocol::Database(DatabaseProtocol::Mysql),
            Protocol::App,
            Protocol::Raw,
        ] {
            assert_eq!(protocol.to_string().parse::<Protocol>().unwrap(), protocol);
        }
    }

    #[test]
    fn test_client_cert_requirement() {
        assert!(Protocol::App.requires_client_cert());
        assert!(!Protocol::Database(DatabaseProtocol::Postgres).requires_client_cert());
        assert!(!Protocol::Raw.requires_client_cert());
    }
}
