//! Active profile: which gateway, cluster and identity the proxy commands use
//!
//! Stored in `<home>/profile.json` next to the credential directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tlsroute_cert::KeyPaths;
use tlsroute_proxy::split_host_port;

/// Default port of the legacy SSH proxy listener
const DEFAULT_SSH_PROXY_PORT: u16 = 3023;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Gateway web address (`host:port`)
    #[serde(default)]
    pub proxy_addr: String,

    /// Legacy SSH proxy address; defaults to the gateway host on port 3023
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_proxy_addr: Option<String>,

    /// Cluster the user is currently working with
    #[serde(default)]
    pub cluster: String,

    /// Root cluster whose CA signs the gateway certificate; defaults to `cluster`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cluster: Option<String>,

    /// Identity whose credentials live under `keys/<proxy>/`
    #[serde(default)]
    pub username: String,

    /// Default SSH login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,

    /// Pinned TLS routing capability; probed from the gateway when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_routing_enabled: Option<bool>,
}

impl Profile {
    pub fn path(home: &Path) -> PathBuf {
        home.join("profile.json")
    }

    /// Load the profile, or an empty one if none was saved yet
    pub fn load(home: &Path) -> Result<Self> {
        let path = Self::path(home);
        if !path.exists() {
            return Ok(Self::default());
        }

        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read profile: {:?}", path))?;
        serde_json::from_str(&json).with_context(|| format!("Failed to parse profile: {:?}", path))
    }

    pub fn save(&self, home: &Path) -> Result<()> {
        fs::create_dir_all(home)
            .with_context(|| format!("Failed to create profile directory: {:?}", home))?;

        let path = Self::path(home);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize profile")?;
        fs::write(&path, json).with_context(|| format!("Failed to write profile: {:?}", path))?;
        Ok(())
    }

    /// Gateway host without the port
    pub fn proxy_host(&self) -> Result<String> {
        if self.proxy_addr.is_empty() {
            anyhow::bail!("no gateway configured, pass --proxy or set TLSROUTE_PROXY");
        }
        let (host, _) = split_host_port(&self.proxy_addr)
            .with_context(|| format!("Invalid gateway address {:?}", self.proxy_addr))?;
        Ok(host)
    }

    pub fn ssh_proxy_addr(&self) -> Result<String> {
        match &self.ssh_proxy_addr {
            Some(addr) => Ok(addr.clone()),
            None => Ok(format!("{}:{}", self.proxy_host()?, DEFAULT_SSH_PROXY_PORT)),
        }
    }

    pub fn root_cluster(&self) -> &str {
        self.root_cluster.as_deref().unwrap_or(&self.cluster)
    }

    pub fn key_paths(&self, home: &Path) -> Result<KeyPaths> {
        if self.username.is_empty() {
            anyhow::bail!("not logged in, please login first. 'tlsroute login'");
        }
        Ok(KeyPaths::new(home, self.proxy_host()?, self.username.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Profile {
        Profile {
            proxy_addr: "proxy.example.com:3080".to_string(),
            cluster: "leaf".to_string(),
            root_cluster: Some("root".to_string()),
            username: "alice".to_string(),
            login: Some("ubuntu".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let profile = sample();
        profile.save(dir.path()).unwrap();

        assert_eq!(Profile::load(dir.path()).unwrap(), profile);
    }

    #[test]
    fn test_missing_profile_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Profile::load(dir.path()).unwrap(), Profile::default());
    }

    #[test]
    fn test_derived_addresses() {
        let profile = sample();
        assert_eq!(profile.proxy_host().unwrap(), "proxy.example.com");
        assert_eq!(profile.ssh_proxy_addr().unwrap(), "proxy.example.com:3023");
        assert_eq!(profile.root_cluster(), "root");

        let paths = profile.key_paths(Path::new("/tmp/home")).unwrap();
        assert_eq!(
            paths.user_key_path(),
            PathBuf::from("/tmp/home/keys/proxy.example.com/alice")
        );
    }

    #[test]
    fn test_unconfigured_gateway() {
        let err = Profile::default().proxy_host().unwrap_err();
        assert!(err.to_string().contains("--proxy"));
    }
}
