//! Loading certificates from an explicit cert/key file pair

use crate::{CertError, Certificate, CertificateSet};
use rustls::pki_types::CertificateDer;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

/// Load a certificate set from PEM files.
///
/// Supplying neither path yields an empty set. Supplying exactly one is a
/// parameter error: a key pair cannot be built from a single file.
pub fn load_from_files(
    cert_path: Option<&Path>,
    key_path: Option<&Path>,
) -> Result<CertificateSet, CertError> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(CertificateSet::empty()),
        (Some(cert), Some(key)) => (cert, key),
        _ => {
            return Err(CertError::BadParameter(
                "both --cert-file and --key-file are required".to_string(),
            ))
        }
    };

    debug!(
        "Loading client certificate from {:?} (key {:?})",
        cert_path, key_path
    );

    let cert_pem = std::fs::read(cert_path)?;
    let key_pem = std::fs::read(key_path)?;
    let cert = parse_pem_pair(&cert_pem, &key_pem)?;
    Ok(CertificateSet::from(cert))
}

/// Parse a PEM certificate chain and a PEM private key into a [`Certificate`]
pub fn parse_pem_pair(cert_pem: &[u8], key_pem: &[u8]) -> Result<Certificate, CertError> {
    let cert_chain = rustls_pemfile::certs(&mut BufReader::new(cert_pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CertError::Parse(format!("Failed to parse certs: {}", e)))?;
    if cert_chain.is_empty() {
        return Err(CertError::Parse("no certificate found in PEM data".to_string()));
    }

    let private_key = rustls_pemfile::private_key(&mut BufReader::new(key_pem))
        .map_err(|e| CertError::Parse(format!("Failed to parse key: {}", e)))?
        .ok_or_else(|| CertError::Parse("No private key found".to_string()))?;

    Certificate::new(cert_chain, private_key)
}

/// Load trusted CA certificates from a PEM bundle
pub fn load_ca_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, CertError> {
    let pem = std::fs::read(path)?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(pem.as_slice()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CertError::Parse(format!("Failed to parse CA bundle {:?}: {}", path, e)))?;
    if certs.is_empty() {
        return Err(CertError::Parse(format!("no CA certificate found in {:?}", path)));
    }
    Ok(certs)
}
