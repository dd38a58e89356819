//! Banner printed once a database tunnel is ready

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Connection details an operator needs to point a database client at the
/// local tunnel
#[derive(Debug, Clone)]
pub struct DbProxyBanner {
    pub database: String,
    pub address: SocketAddr,
    pub ca_file: PathBuf,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

impl fmt::Display for DbProxyBanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Started DB proxy on {}", self.address)?;
        writeln!(f)?;
        writeln!(
            f,
            "Use following credentials to connect to the {} proxy:",
            self.database
        )?;
        writeln!(f, "  ca_file={}", self.ca_file.display())?;
        writeln!(f, "  cert_file={}", self.cert_file.display())?;
        writeln!(f, "  key_file={}", self.key_file.display())
    }
}
