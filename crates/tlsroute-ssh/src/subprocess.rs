//! Legacy fallback: hand the connection to an external `ssh` client

use crate::{SshError, SshProxyOutcome, SshProxyParams, SshProxyStrategy, SshTarget};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tlsroute_proxy::split_host_port;
use tokio::process::Command;
use tracing::debug;

pub struct SubprocessStrategy {
    params: SshProxyParams,
    program: PathBuf,
}

impl SubprocessStrategy {
    pub fn new(params: SshProxyParams) -> Self {
        Self {
            params,
            program: PathBuf::from("ssh"),
        }
    }

    /// Use a specific client binary instead of `ssh` from `PATH`
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Client arguments: `[-l login] -A -o UserKnownHostsFile=<path> -p <port>
    /// <proxy-host> -s proxy:<host>:<port>@<cluster>`
    pub fn command_args(&self, target: &SshTarget) -> Result<Vec<String>, SshError> {
        let target = self.params.resolve(target);
        let (ssh_host, ssh_port) = split_host_port(&self.params.ssh_proxy_addr)?;

        let mut args = Vec::new();
        if let Some(login) = target.login {
            args.push("-l".to_string());
            args.push(login);
        }
        args.extend([
            "-A".to_string(),
            "-o".to_string(),
            format!("UserKnownHostsFile={}", self.params.known_hosts.display()),
            "-p".to_string(),
            ssh_port.to_string(),
            ssh_host,
            "-s".to_string(),
            format!(
                "proxy:{}:{}@{}",
                target.host, target.port, self.params.cluster
            ),
        ]);
        Ok(args)
    }
}

#[async_trait]
impl SshProxyStrategy for SubprocessStrategy {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    /// Runs the client with inherited stdio and returns its exit status as is
    async fn proxy(&self, target: &SshTarget) -> Result<SshProxyOutcome, SshError> {
        let args = self.command_args(target)?;
        debug!("Running {} {}", self.program.display(), args.join(" "));

        let status = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| SshError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        debug!("{} exited with {}", self.program.display(), status);
        Ok(SshProxyOutcome::Exited(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SshProxyParams {
        SshProxyParams::new("proxy.example.com:3080", "proxy.example.com", "example.com")
            .with_ssh_proxy_addr("proxy.example.com:3023")
            .with_known_hosts("/home/alice/.tlsroute/known_hosts")
    }

    #[test]
    fn test_command_args_with_login() {
        let strategy = SubprocessStrategy::new(params().with_login("root"));
        let args = strategy
            .command_args(&SshTarget::parse("node1.proxy.example.com:22").unwrap())
            .unwrap();

        assert_eq!(
            args,
            vec![
                "-l",
                "root",
                "-A",
                "-o",
                "UserKnownHostsFile=/home/alice/.tlsroute/known_hosts",
                "-p",
                "3023",
                "proxy.example.com",
                "-s",
                "proxy:node1:22@example.com",
            ]
        );
    }

    #[test]
    fn test_command_args_without_login() {
        let strategy = SubprocessStrategy::new(params());
        let args = strategy
            .command_args(&SshTarget::parse("node1:22").unwrap())
            .unwrap();
        assert_eq!(args[0], "-A");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let strategy =
            SubprocessStrategy::new(params()).with_program("/nonexistent/tlsroute-test-ssh");
        let err = strategy
            .proxy(&SshTarget::parse("node1:22").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::Spawn { .. }));
    }
}
