//! Target descriptors and SNI routing metadata
//!
//! Many logical protocols share one externally visible gateway port, so the
//! routing decision has to be made from handshake metadata alone. The ALPN
//! extension only carries a short token; richer shell routing data (host,
//! port, login, cluster) is hex-encoded into DNS labels and sent as the SNI.

use crate::{ProtoError, Protocol, MAX_LABEL_LEN, MAX_SNI_LEN, ROUTING_SNI_SUFFIX};
use tracing::trace;

/// What the caller wants to reach through the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub login: Option<String>,
    pub cluster: Option<String>,
}

/// Handshake metadata computed for a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSelection {
    /// Ordered ALPN candidates
    pub alpn_protocols: Vec<String>,
    /// Value sent in the SNI extension
    pub server_name: String,
}

impl TargetDescriptor {
    pub fn new(protocol: Protocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            host: host.into(),
            port,
            login: None,
            cluster: None,
        }
    }

    pub fn with_login(mut self, login: impl Into<String>) -> Self {
        let login = login.into();
        self.login = (!login.is_empty()).then_some(login);
        self
    }

    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        let cluster = cluster.into();
        self.cluster = (!cluster.is_empty()).then_some(cluster);
        self
    }

    /// `[login@]host:port[@cluster]`
    pub fn routing_string(&self) -> String {
        let mut routing = String::new();
        if let Some(login) = &self.login {
            routing.push_str(login);
            routing.push('@');
        }
        routing.push_str(&format!("{}:{}", self.host, self.port));
        if let Some(cluster) = &self.cluster {
            routing.push('@');
            routing.push_str(cluster);
        }
        routing
    }

    /// Compute the ALPN candidates and SNI for this target.
    ///
    /// `gateway_host` is the plain hostname of the remote gateway; it is used
    /// as SNI for every category that does not route by SNI.
    pub fn select(&self, gateway_host: &str) -> Result<RouteSelection, ProtoError> {
        if self.host.is_empty() {
            return Err(ProtoError::InvalidTarget("host must not be empty".to_string()));
        }

        let server_name = if self.protocol.routes_by_sni() {
            encode_routing_sni(&self.routing_string())?
        } else {
            gateway_host.to_string()
        };

        trace!(
            protocol = %self.protocol,
            sni = %server_name,
            "Selected route for {}",
            self.host
        );

        Ok(RouteSelection {
            alpn_protocols: self.protocol.alpn_candidates(),
            server_name,
        })
    }
}

/// Encode a routing string into a DNS name under [`ROUTING_SNI_SUFFIX`]
pub fn encode_routing_sni(routing: &str) -> Result<String, ProtoError> {
    let encoded = hex::encode(routing.as_bytes());
    if encoded.is_empty() {
        return Err(ProtoError::InvalidTarget("empty routing string".to_string()));
    }

    let mut labels: Vec<&str> = encoded
        .as_bytes()
        .chunks(MAX_LABEL_LEN)
        // hex output is ASCII, so every chunk is valid UTF-8
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
        .collect();
    labels.push(ROUTING_SNI_SUFFIX);

    let sni = labels.join(".");
    if sni.len() > MAX_SNI_LEN {
        return Err(ProtoError::RoutingTooLong(routing.to_string()));
    }
    Ok(sni)
}

/// Recover the routing string from an SNI produced by [`encode_routing_sni`]
pub fn decode_routing_sni(sni: &str) -> Result<String, ProtoError> {
    let prefix = sni
        .strip_suffix(ROUTING_SNI_SUFFIX)
        .and_then(|p| p.strip_suffix('.'))
        .ok_or_else(|| ProtoError::InvalidRoutingSni(sni.to_string()))?;

    let joined: String = prefix.split('.').collect();
    let bytes =
        hex::decode(&joined).map_err(|e| ProtoError::InvalidRoutingSni(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ProtoError::InvalidRoutingSni(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DatabaseProtocol;

    #[test]
    fn test_routing_string_full() {
        let target = TargetDescriptor::new(Protocol::Shell, "node1", 3022)
            .with_login("root")
            .with_cluster("leaf.example.com");
        assert_eq!(target.routing_string(), "root@node1:3022@leaf.example.com");
    }

    #[test]
    fn test_routing_string_without_login_or_cluster() {
        let target = TargetDescriptor::new(Protocol::Shell, "node1", 22)
            .with_login("")
            .with_cluster("");
        assert_eq!(target.routing_string(), "node1:22");
    }

    #[test]
    fn test_shell_selection_encodes_routing_in_sni() {
        let target = TargetDescriptor::new(Protocol::Shell, "node1", 22).with_login("alice");
        let selection = target.select("proxy.example.com").unwrap();

        assert_eq!(selection.alpn_protocols, vec!["tlsroute-proxy-ssh"]);
        assert!(selection.server_name.ends_with(ROUTING_SNI_SUFFIX));
        assert_eq!(
            decode_routing_sni(&selection.server_name).unwrap(),
            "alice@node1:22"
        );
    }

    #[test]
    fn test_database_selection_uses_gateway_host() {
        let target = TargetDescriptor::new(
            Protocol::Database(DatabaseProtocol::Postgres),
            "db.internal",
            5432,
        );
        let selection = target.select("proxy.example.com").unwrap();
        assert_eq!(selection.server_name, "proxy.example.com");
        assert_eq!(selection.alpn_protocols, vec!["tlsroute-postgres"]);
    }

    #[test]
    fn test_long_routing_is_split_into_labels() {
        let host = "a".repeat(60);
        let sni = encode_routing_sni(&format!("{}:22", host)).unwrap();
        assert!(sni.split('.').all(|label| label.len() <= MAX_LABEL_LEN));
        assert_eq!(decode_routing_sni(&sni).unwrap(), format!("{}:22", host));
    }

    #[test]
    fn test_routing_too_long() {
        let host = "h".repeat(200);
        let err = encode_routing_sni(&host).unwrap_err();
        assert!(matches!(err, ProtoError::RoutingTooLong(_)));
    }

    #[test]
    fn test_decode_rejects_foreign_sni() {
        assert!(decode_routing_sni("proxy.example.com").is_err());
        assert!(decode_routing_sni("zz.ssh.tlsroute.local").is_err());
    }

    #[test]
    fn test_empty_host_rejected() {
        let target = TargetDescriptor::new(Protocol::Raw, "", 80);
        assert!(matches!(
            target.select("proxy"),
            Err(ProtoError::InvalidTarget(_))
        ));
    }
}
