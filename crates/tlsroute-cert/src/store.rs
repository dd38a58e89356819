//! Local credential storage
//!
//! Credentials live under a profile home (default `~/.tlsroute`):
//!
//! ```text
//! <home>/known_hosts
//! <home>/keys/<proxy>/<user>                               private key
//! <home>/keys/<proxy>/<user>-x509.pem                      cluster TLS cert
//! <home>/keys/<proxy>/<user>-app/<cluster>/<app>-x509.pem  app certs
//! <home>/keys/<proxy>/<user>-db/<cluster>/<db>-x509.pem    database certs
//! <home>/keys/<proxy>/cas/<cluster>.pem                    cluster CA
//! ```

use crate::CertError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::trace;

/// Well-known credential file locations for one proxy/user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPaths {
    home: PathBuf,
    proxy_host: String,
    username: String,
}

impl KeyPaths {
    pub fn new(
        home: impl Into<PathBuf>,
        proxy_host: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            home: home.into(),
            proxy_host: proxy_host.into(),
            username: username.into(),
        }
    }

    /// `~/.tlsroute`, if a home directory can be determined
    pub fn default_home() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".tlsroute"))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn known_hosts_path(&self) -> PathBuf {
        self.home.join("known_hosts")
    }

    pub fn proxy_key_dir(&self) -> PathBuf {
        self.home.join("keys").join(&self.proxy_host)
    }

    pub fn user_key_path(&self) -> PathBuf {
        self.proxy_key_dir().join(&self.username)
    }

    pub fn tls_cert_path(&self) -> PathBuf {
        self.proxy_key_dir()
            .join(format!("{}-x509.pem", self.username))
    }

    pub fn app_cert_path(&self, cluster: &str, app: &str) -> PathBuf {
        self.proxy_key_dir()
            .join(format!("{}-app", self.username))
            .join(cluster)
            .join(format!("{}-x509.pem", app))
    }

    pub fn db_cert_path(&self, cluster: &str, database: &str) -> PathBuf {
        self.proxy_key_dir()
            .join(format!("{}-db", self.username))
            .join(cluster)
            .join(format!("{}-x509.pem", database))
    }

    pub fn ca_cert_path(&self, cluster: &str) -> PathBuf {
        self.proxy_key_dir()
            .join("cas")
            .join(format!("{}.pem", cluster))
    }
}

/// Read access to previously issued credentials.
///
/// `Ok(None)` means the credential has never been issued.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialStore: Send + Sync {
    fn private_key_pem(&self) -> Result<Option<Vec<u8>>, CertError>;

    fn app_cert_pem(&self, cluster: &str, app: &str) -> Result<Option<Vec<u8>>, CertError>;

    fn db_cert_pem(&self, cluster: &str, database: &str) -> Result<Option<Vec<u8>>, CertError>;
}

/// Credential store backed by the profile directory
#[derive(Debug, Clone)]
pub struct FsCredentialStore {
    paths: KeyPaths,
}

impl FsCredentialStore {
    pub fn new(paths: KeyPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &KeyPaths {
        &self.paths
    }

    fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, CertError> {
        trace!("Reading credential file {:?}", path);
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CertError::Io(e)),
        }
    }
}

impl CredentialStore for FsCredentialStore {
    fn private_key_pem(&self) -> Result<Option<Vec<u8>>, CertError> {
        Self::read_optional(&self.paths.user_key_path())
    }

    fn app_cert_pem(&self, cluster: &str, app: &str) -> Result<Option<Vec<u8>>, CertError> {
        Self::read_optional(&self.paths.app_cert_path(cluster, app))
    }

    fn db_cert_pem(&self, cluster: &str, database: &str) -> Result<Option<Vec<u8>>, CertError> {
        Self::read_optional(&self.paths.db_cert_path(cluster, database))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MemoryKey {
    App(String, String),
    Database(String, String),
}

/// In-memory credential store
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    private_key: RwLock<Option<Vec<u8>>>,
    certs: RwLock<HashMap<MemoryKey, Vec<u8>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_private_key(&self, pem: impl Into<Vec<u8>>) {
        if let Ok(mut key) = self.private_key.write() {
            *key = Some(pem.into());
        }
    }

    pub fn add_app_cert(&self, cluster: &str, app: &str, pem: impl Into<Vec<u8>>) {
        if let Ok(mut certs) = self.certs.write() {
            certs.insert(
                MemoryKey::App(cluster.to_string(), app.to_string()),
                pem.into(),
            );
        }
    }

    pub fn add_db_cert(&self, cluster: &str, database: &str, pem: impl Into<Vec<u8>>) {
        if let Ok(mut certs) = self.certs.write() {
            certs.insert(
                MemoryKey::Database(cluster.to_string(), database.to_string()),
                pem.into(),
            );
        }
    }

    fn get(&self, key: &MemoryKey) -> Result<Option<Vec<u8>>, CertError> {
        let certs = self
            .certs
            .read()
            .map_err(|_| CertError::NotFound("credential store lock poisoned".to_string()))?;
        Ok(certs.get(key).cloned())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn private_key_pem(&self) -> Result<Option<Vec<u8>>, CertError> {
        let key = self
            .private_key
            .read()
            .map_err(|_| CertError::NotFound("credential store lock poisoned".to_string()))?;
        Ok(key.clone())
    }

    fn app_cert_pem(&self, cluster: &str, app: &str) -> Result<Option<Vec<u8>>, CertError> {
        self.get(&MemoryKey::App(cluster.to_string(), app.to_string()))
    }

    fn db_cert_pem(&self, cluster: &str, database: &str) -> Result<Option<Vec<u8>>, CertError> {
        self.get(&MemoryKey::Database(
            cluster.to_string(),
            database.to_string(),
        ))
    }
}
