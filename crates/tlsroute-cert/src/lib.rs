//! Client certificate material for the TLS routing proxy
//!
//! Loads already-issued certificates either from an explicit cert/key file
//! pair or from the local credential store, and validates them once before
//! any connection is dialed. Issuance and renewal happen elsewhere.

pub mod cached;
pub mod files;
pub mod store;

pub use cached::load_cached;
pub use files::{load_ca_certs, load_from_files, parse_pem_pair};
pub use store::{CredentialStore, FsCredentialStore, KeyPaths, MemoryCredentialStore};

use chrono::{DateTime, Utc};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;

/// Certificates expiring within this window are treated as already expired,
/// so a handshake never completes with a certificate that lapses mid-flight.
pub const NEAR_EXPIRY_BUFFER: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum CertError {
    #[error("{0}")]
    BadParameter(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Expired(String),

    #[error("Failed to parse certificate: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Certificate chain with its private key and leaf expiry
#[derive(Debug)]
pub struct Certificate {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
    pub not_after: DateTime<Utc>,
}

impl Certificate {
    /// Build from DER parts, reading the expiry from the leaf certificate
    pub fn new(
        cert_chain: Vec<CertificateDer<'static>>,
        private_key: PrivateKeyDer<'static>,
    ) -> Result<Self, CertError> {
        let leaf = cert_chain
            .first()
            .ok_or_else(|| CertError::Parse("certificate chain is empty".to_string()))?;
        let not_after = leaf_not_after(leaf)?;
        Ok(Self {
            cert_chain,
            private_key,
            not_after,
        })
    }

    /// True when the certificate expires within `buffer` of `now`
    pub fn expires_within(&self, now: DateTime<Utc>, buffer: std::time::Duration) -> bool {
        let buffer = chrono::Duration::from_std(buffer).unwrap_or(chrono::Duration::zero());
        self.not_after - now < buffer
    }
}

impl Clone for Certificate {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            private_key: self.private_key.clone_key(),
            not_after: self.not_after,
        }
    }
}

/// Ordered set of client certificates presented to the gateway
#[derive(Debug, Clone, Default)]
pub struct CertificateSet {
    certs: Vec<Certificate>,
}

impl CertificateSet {
    pub fn new(certs: Vec<Certificate>) -> Self {
        Self { certs }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Certificate> {
        self.certs.iter()
    }

    /// Reject certificates that are expired or about to expire
    pub fn ensure_not_expired(&self, now: DateTime<Utc>) -> Result<(), CertError> {
        for cert in &self.certs {
            if cert.expires_within(now, NEAR_EXPIRY_BUFFER) {
                return Err(CertError::Expired(format!(
                    "certificate expired at {}, please re-login with 'tlsroute login'",
                    cert.not_after.to_rfc3339()
                )));
            }
        }
        Ok(())
    }
}

impl From<Certificate> for CertificateSet {
    fn from(cert: Certificate) -> Self {
        Self { certs: vec![cert] }
    }
}

fn leaf_not_after(leaf: &CertificateDer<'_>) -> Result<DateTime<Utc>, CertError> {
    let (_, parsed) = x509_parser::parse_x509_certificate(leaf.as_ref())
        .map_err(|e| CertError::Parse(e.to_string()))?;
    let timestamp = parsed.validity().not_after.timestamp();
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| CertError::Parse(format!("invalid expiry timestamp {}", timestamp)))
}
