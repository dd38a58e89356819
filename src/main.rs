//! tlsroute CLI - local proxies through a TLS routing gateway
//!
//! Runs plaintext loopback listeners (or an SSH `ProxyCommand` over
//! stdin/stdout) and tunnels each connection to the gateway over TLS.

mod profile;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use profile::Profile;
use rustls::pki_types::CertificateDer;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tlsroute_cert::{load_ca_certs, load_cached, load_from_files, CertificateSet, FsCredentialStore};
use tlsroute_client::{ClientConfig, GatewayClient};
use tlsroute_proto::{Context, Protocol};
use tlsroute_proxy::{DbProxyBanner, LocalProxy, LocalProxyConfig};
use tlsroute_ssh::{select_strategy, SshProxyOutcome, SshProxyParams, SshTarget};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// tlsroute - Reach cluster resources through a single TLS port
#[derive(Parser, Debug)]
#[command(name = "tlsroute")]
#[command(about = "tlsroute - Reach cluster resources through a single TLS port")]
#[command(version)]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Profile directory (default: ~/.tlsroute)
    #[arg(long, global = true, env = "TLSROUTE_HOME")]
    home: Option<PathBuf>,

    /// Gateway address (e.g., proxy.example.com:3080)
    #[arg(long, global = true, env = "TLSROUTE_PROXY")]
    proxy: Option<String>,

    /// Cluster to operate on
    #[arg(long, global = true, env = "TLSROUTE_CLUSTER")]
    cluster: Option<String>,

    /// Identity whose credentials are used
    #[arg(long, global = true, env = "TLSROUTE_USER")]
    user: Option<String>,

    /// Default SSH login
    #[arg(long, global = true, env = "TLSROUTE_LOGIN")]
    login: Option<String>,

    /// Skip gateway certificate verification (insecure, for development only)
    #[arg(long, global = true)]
    insecure: bool,

    /// Gateway dial timeout in seconds (0 uses the default)
    #[arg(long, global = true, default_value = "0")]
    dial_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a local proxy to a cluster resource
    Proxy {
        #[command(subcommand)]
        command: ProxyCommands,
    },

    /// Show or update the active profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ProxyCommands {
    /// SSH ProxyCommand: tunnel stdin/stdout to a node
    #[command(long_about = r#"
Connect stdin/stdout to an SSH node through the gateway. Intended to be
used as an OpenSSH ProxyCommand:

  Host *.proxy.example.com
      ProxyCommand tlsroute proxy ssh %r@%h:%p

When the gateway does not support TLS routing, the legacy SSH proxy port is
used through the system ssh client instead.
    "#)]
    Ssh {
        /// Target node as [login@]host:port
        target: String,

        /// Override the gateway's TLS routing capability
        #[arg(long)]
        tls_routing: Option<bool>,
    },

    /// Start a local database proxy
    Db {
        /// Database service name
        database: String,

        /// Database wire protocol (postgres, mysql, mongodb)
        #[arg(long, default_value = "postgres")]
        protocol: String,

        /// Local port to listen on (random if not set)
        #[arg(long)]
        port: Option<u16>,

        /// Client certificate presented to the gateway
        #[arg(long)]
        cert_file: Option<PathBuf>,

        /// Private key for --cert-file
        #[arg(long)]
        key_file: Option<PathBuf>,
    },

    /// Start a local proxy to an HTTP application
    App {
        /// Application name
        app: String,

        /// Local port to listen on (random if not set)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileCommands {
    /// Print the active profile
    Show,

    /// Persist the global --proxy/--cluster/--user/--login flags
    Set {
        /// Legacy SSH proxy address
        #[arg(long)]
        ssh_proxy: Option<String>,

        /// Root cluster name, if different from --cluster
        #[arg(long)]
        root_cluster: Option<String>,

        /// Pin the gateway's TLS routing capability
        #[arg(long)]
        tls_routing: Option<bool>,
    },
}

/// Setup logging with the specified log level.
///
/// Logs go to stderr: stdout carries tunnel data for `proxy ssh`.
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

/// Global flags layered over the saved profile
struct Settings {
    home: PathBuf,
    profile: Profile,
    insecure: bool,
    dial_timeout: Duration,
}

impl Settings {
    fn resolve(cli: &Cli) -> Result<Self> {
        let home = match &cli.home {
            Some(home) => home.clone(),
            None => tlsroute_cert::KeyPaths::default_home()
                .context("Failed to determine home directory, pass --home")?,
        };

        let mut profile = Profile::load(&home)?;
        if let Some(proxy) = &cli.proxy {
            profile.proxy_addr = proxy.clone();
        }
        if let Some(cluster) = &cli.cluster {
            profile.cluster = cluster.clone();
        }
        if let Some(user) = &cli.user {
            profile.username = user.clone();
        }
        if let Some(login) = &cli.login {
            profile.login = Some(login.clone());
        }

        Ok(Self {
            home,
            profile,
            insecure: cli.insecure,
            dial_timeout: Duration::from_secs(cli.dial_timeout),
        })
    }

    /// CA bundle of the root cluster, when one was saved at login
    fn root_certs(&self) -> Result<Vec<CertificateDer<'static>>> {
        let paths = self.profile.key_paths(&self.home)?;
        let path = paths.ca_cert_path(self.profile.root_cluster());
        if !path.exists() {
            debug!("No cluster CA at {:?}, using system roots", path);
            return Ok(Vec::new());
        }
        Ok(load_ca_certs(&path)?)
    }
}

/// Cancelled on Ctrl+C
fn root_context() -> Context {
    let ctx = Context::background();
    let on_signal = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
            on_signal.cancel();
        }
    });
    ctx
}

async fn proxy_db(
    settings: &Settings,
    ctx: Context,
    database: &str,
    protocol: &str,
    port: Option<u16>,
    cert_file: Option<&Path>,
    key_file: Option<&Path>,
) -> Result<()> {
    let protocol = Protocol::from_str(protocol)?;
    if !matches!(protocol, Protocol::Database(_)) {
        anyhow::bail!("{} is not a database protocol", protocol);
    }

    // Parameter errors surface before anything touches the network
    let certs = load_from_files(cert_file, key_file)?;
    let paths = settings.profile.key_paths(&settings.home)?;

    let config = LocalProxyConfig::new(settings.profile.proxy_addr.clone(), protocol)
        .with_certs(certs)
        .with_root_certs(settings.root_certs()?)
        .with_insecure_skip_verify(settings.insecure)
        .with_dial_timeout(settings.dial_timeout)
        .with_loopback_port(port.unwrap_or(0))
        .with_context(ctx);
    let proxy = LocalProxy::new(config)
        .await
        .context("Failed to start database proxy")?;

    let banner = DbProxyBanner {
        database: database.to_string(),
        address: proxy
            .local_addr()
            .context("database proxy has no listener")?,
        ca_file: paths.ca_cert_path(settings.profile.root_cluster()),
        cert_file: cert_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| paths.db_cert_path(&settings.profile.cluster, database)),
        key_file: key_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| paths.user_key_path()),
    };
    print!("{}", banner);

    proxy.start().await?;
    Ok(())
}

async fn proxy_app(settings: &Settings, ctx: Context, app: &str, port: Option<u16>) -> Result<()> {
    let paths = settings.profile.key_paths(&settings.home)?;
    let store = FsCredentialStore::new(paths);
    let cert = load_cached(&store, Protocol::App, &settings.profile.cluster, app)?;

    let config = LocalProxyConfig::new(settings.profile.proxy_addr.clone(), Protocol::App)
        .with_certs(CertificateSet::from(cert))
        .with_root_certs(settings.root_certs()?)
        .with_insecure_skip_verify(settings.insecure)
        .with_dial_timeout(settings.dial_timeout)
        .with_loopback_port(port.unwrap_or(0))
        .with_context(ctx);
    let proxy = LocalProxy::new(config)
        .await
        .context("Failed to start application proxy")?;

    if let Some(addr) = proxy.local_addr() {
        println!("Proxying connections to {} on {}", app, addr);
    }

    if let Err(e) = proxy.start().await {
        warn!("Failed to start local proxy: {}", e);
    }
    Ok(())
}

/// Returns the exit code of the legacy ssh client, if one ran
async fn proxy_ssh(
    settings: &Settings,
    ctx: Context,
    target: &str,
    tls_routing: Option<bool>,
) -> Result<Option<i32>> {
    let target = SshTarget::parse(target)?;
    let profile = &settings.profile;
    let paths = profile.key_paths(&settings.home)?;

    let tls_routing_enabled = match tls_routing.or(profile.tls_routing_enabled) {
        Some(enabled) => enabled,
        None => probe_tls_routing(settings, &ctx).await?,
    };

    // The cluster certificate authenticates the shell tunnel when present
    let (cert_path, key_path) = (paths.tls_cert_path(), paths.user_key_path());
    let certs = if cert_path.exists() && key_path.exists() {
        load_from_files(Some(&cert_path), Some(&key_path))?
    } else {
        CertificateSet::empty()
    };

    let mut params =
        SshProxyParams::new(profile.proxy_addr.clone(), profile.proxy_host()?, profile.cluster.clone())
            .with_ssh_proxy_addr(profile.ssh_proxy_addr()?)
            .with_known_hosts(paths.known_hosts_path())
            .with_insecure(settings.insecure)
            .with_root_certs(settings.root_certs()?)
            .with_certs(certs)
            .with_dial_timeout(settings.dial_timeout)
            .with_context(ctx);
    if let Some(login) = &profile.login {
        params = params.with_login(login.clone());
    }

    let strategy = select_strategy(tls_routing_enabled, params);
    debug!("Using {} strategy for {}", strategy.name(), target.host);

    match strategy.proxy(&target).await? {
        SshProxyOutcome::Tunneled(stats) => {
            debug!(
                "Tunnel closed ({} bytes sent, {} received)",
                stats.sent, stats.received
            );
            Ok(None)
        }
        SshProxyOutcome::Exited(status) => Ok(Some(exit_code(status))),
    }
}

/// Process exit code mirroring the ssh client's status; a child killed by
/// signal N maps to 128 + N as in a shell
fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

async fn probe_tls_routing(settings: &Settings, ctx: &Context) -> Result<bool> {
    let mut config = ClientConfig::new(vec![settings.profile.proxy_addr.clone()])
        .with_dial_timeout(settings.dial_timeout)
        .with_insecure(settings.insecure);
    let ca_path = settings
        .profile
        .key_paths(&settings.home)?
        .ca_cert_path(settings.profile.root_cluster());
    if ca_path.exists() {
        let pem = std::fs::read(&ca_path)
            .with_context(|| format!("Failed to read cluster CA: {:?}", ca_path))?;
        config = config.with_root_ca_pem(pem);
    }

    let client = GatewayClient::new(config)?;
    let ping = client
        .ping(ctx)
        .await
        .context("Failed to query gateway capabilities")?;
    debug!(
        "Gateway {} (cluster {}) TLS routing: {}",
        settings.profile.proxy_addr, ping.cluster_name, ping.proxy.tls_routing_enabled
    );
    Ok(ping.proxy.tls_routing_enabled)
}

fn profile_command(settings: Settings, command: ProfileCommands) -> Result<()> {
    let mut profile = settings.profile;
    match command {
        ProfileCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        ProfileCommands::Set {
            ssh_proxy,
            root_cluster,
            tls_routing,
        } => {
            if ssh_proxy.is_some() {
                profile.ssh_proxy_addr = ssh_proxy;
            }
            if root_cluster.is_some() {
                profile.root_cluster = root_cluster;
            }
            if tls_routing.is_some() {
                profile.tls_routing_enabled = tls_routing;
            }
            profile.proxy_host()?;
            profile.save(&settings.home)?;
            info!("Saved profile to {:?}", Profile::path(&settings.home));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let settings = Settings::resolve(&cli)?;

    match cli.command {
        Commands::Profile { command } => profile_command(settings, command),
        Commands::Proxy { command } => {
            let ctx = root_context();
            match command {
                ProxyCommands::Ssh {
                    target,
                    tls_routing,
                } => {
                    if let Some(code) = proxy_ssh(&settings, ctx, &target, tls_routing).await? {
                        std::process::exit(code);
                    }
                    Ok(())
                }
                ProxyCommands::Db {
                    database,
                    protocol,
                    port,
                    cert_file,
                    key_file,
                } => {
                    proxy_db(
                        &settings,
                        ctx,
                        &database,
                        &protocol,
                        port,
                        cert_file.as_deref(),
                        key_file.as_deref(),
                    )
                    .await
                }
                ProxyCommands::App { app, port } => proxy_app(&settings, ctx, &app, port).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_exit_code_follows_shell_convention() {
        use std::os::unix::process::ExitStatusExt;
        use std::process::ExitStatus;

        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        // Raw wait status 9: terminated by SIGKILL
        assert_eq!(exit_code(ExitStatus::from_raw(9)), 137);
        assert_eq!(exit_code(ExitStatus::from_raw(15)), 143);
    }

    #[test]
    fn test_global_flags_override_profile() {
        let home = tempfile::tempdir().unwrap();
        Profile {
            proxy_addr: "old.example.com:443".to_string(),
            cluster: "root".to_string(),
            username: "alice".to_string(),
            ..Default::default()
        }
        .save(home.path())
        .unwrap();

        let cli = Cli::try_parse_from([
            "tlsroute",
            "--home",
            home.path().to_str().unwrap(),
            "--proxy",
            "proxy.example.com:3080",
            "--login",
            "ubuntu",
            "proxy",
            "ssh",
            "node1:3022",
        ])
        .unwrap();
        let settings = Settings::resolve(&cli).unwrap();

        assert_eq!(settings.profile.proxy_addr, "proxy.example.com:3080");
        assert_eq!(settings.profile.cluster, "root");
        assert_eq!(settings.profile.login.as_deref(), Some("ubuntu"));
        assert_eq!(settings.dial_timeout, Duration::ZERO);
    }

    #[test]
    fn test_missing_cluster_ca_uses_system_roots() {
        let home = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "tlsroute",
            "--home",
            home.path().to_str().unwrap(),
            "--proxy",
            "proxy.example.com:3080",
            "--user",
            "alice",
            "profile",
            "show",
        ])
        .unwrap();
        let settings = Settings::resolve(&cli).unwrap();
        assert!(settings.root_certs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_db_proxy_rejects_non_database_protocol() {
        let home = tempfile::tempdir().unwrap();
        let settings = Settings {
            home: home.path().to_path_buf(),
            profile: Profile {
                proxy_addr: "proxy.example.com:3080".to_string(),
                username: "alice".to_string(),
                ..Default::default()
            },
            insecure: false,
            dial_timeout: Duration::ZERO,
        };

        let err = proxy_db(&settings, Context::background(), "orders", "ssh", None, None, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a database protocol"));
    }
}
