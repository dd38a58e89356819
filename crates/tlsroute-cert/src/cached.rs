//! Loading per-application certificates from the credential store

use crate::{parse_pem_pair, CertError, Certificate, CredentialStore, NEAR_EXPIRY_BUFFER};
use chrono::Utc;
use tlsroute_proto::Protocol;
use tracing::debug;

/// Load a previously issued certificate for `name` in `cluster`.
///
/// Fails with `NotFound` (and the login command to run) when nothing has been
/// issued, and with `Expired` when the certificate is within
/// [`NEAR_EXPIRY_BUFFER`] of its expiry.
pub fn load_cached(
    store: &dyn CredentialStore,
    protocol: Protocol,
    cluster: &str,
    name: &str,
) -> Result<Certificate, CertError> {
    let (kind, login_hint, cert_pem) = match protocol {
        Protocol::App => (
            "application",
            format!("tlsroute app login {}", name),
            store.app_cert_pem(cluster, name)?,
        ),
        Protocol::Database(_) => (
            "database",
            format!("tlsroute db login {}", name),
            store.db_cert_pem(cluster, name)?,
        ),
        Protocol::Shell | Protocol::Raw => {
            return Err(CertError::BadParameter(format!(
                "protocol {} has no cached per-target certificates",
                protocol
            )))
        }
    };

    let cert_pem = match cert_pem {
        Some(pem) if !pem.is_empty() => pem,
        _ => {
            return Err(CertError::NotFound(format!(
                "please login into the {} first. '{}'",
                kind, login_hint
            )))
        }
    };

    let key_pem = store.private_key_pem()?.ok_or_else(|| {
        CertError::NotFound("not logged in, please login first. 'tlsroute login'".to_string())
    })?;

    let cert = parse_pem_pair(&cert_pem, &key_pem).map_err(|e| match e {
        CertError::Parse(reason) => CertError::NotFound(format!(
            "invalid certificate ({}) - please login to the {} again. '{}'",
            reason, kind, login_hint
        )),
        other => other,
    })?;

    if cert.expires_within(Utc::now(), NEAR_EXPIRY_BUFFER) {
        return Err(CertError::Expired(format!(
            "{} {} certificate has expired, please re-login to the {} using '{}'",
            kind, name, kind, login_hint
        )));
    }

    debug!(
        "Loaded cached {} certificate for {} (expires {})",
        kind,
        name,
        cert.not_after.to_rfc3339()
    );
    Ok(cert)
}
