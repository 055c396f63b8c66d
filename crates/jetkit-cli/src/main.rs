#![deny(unsafe_code)]

//! jetkit CLI: the MQTT-to-syslog bridge daemon and the router API clients.
//!
//! `main` is synchronous on purpose. `jetkit bridge` detaches from the
//! terminal by forking, which must happen while the process has a single
//! thread, so the tokio runtime is only built afterwards.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use jetkit_config::routes::RoutesFile;
use jetkit_config::{AppConfig, BridgeConfig, RouterConfig};
use jetkit_core::daemon::{Daemonizer, Detached, Foreground};
use jetkit_core::logging::init_file_logging;
use jetkit_core::supervisor::EXIT_OK;
use jetkit_core::{SequenceAllocator, Supervisor, build_info};
use jetkit_rpc::op::{DEFAULT_COMMAND, render_reply};
use jetkit_rpc::{
    DryRunRouter, OpCommandRequest, OutputFormat, Password, RouteVerb, RouterClient, Session,
};

/// jetkit: Junos JET demo clients and MQTT bridge.
#[derive(Parser)]
#[command(name = "jetkit", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "jetkit.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward MQTT messages to the system log, as a background daemon.
    Bridge(BridgeArgs),

    /// Add or remove the BGP static routes in a routes file.
    Routes(RoutesArgs),

    /// Run an operational command on the router.
    Op(OpArgs),

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },

    /// Print version and build information.
    Version,
}

#[derive(Args)]
struct BridgeArgs {
    /// MQTT broker host.
    #[arg(long)]
    host: Option<String>,

    /// MQTT broker port.
    #[arg(long)]
    port: Option<u16>,

    /// Topic to subscribe to.
    #[arg(long)]
    topic: Option<String>,

    /// Stay attached to the terminal and log to stderr.
    #[arg(long)]
    foreground: bool,
}

impl BridgeArgs {
    fn apply(&self, bridge: &mut BridgeConfig) {
        if let Some(host) = &self.host {
            bridge.host.clone_from(host);
        }
        if let Some(port) = self.port {
            bridge.port = port;
        }
        if let Some(topic) = &self.topic {
            bridge.topic.clone_from(topic);
        }
    }
}

/// Router session flags; each overrides `[router]` in the config file.
#[derive(Args)]
struct RouterArgs {
    /// Hostname or IP address of the router.
    #[arg(long)]
    host: Option<String>,

    /// Port the RPC server is listening on.
    #[arg(long)]
    port: Option<u16>,

    /// Username for authentication.
    #[arg(long)]
    user: Option<String>,

    /// Client id of the session.
    #[arg(long = "cid")]
    client_id: Option<String>,

    /// Per-call timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Password. Prompted for when not given here or in the config file.
    #[arg(long)]
    passwd: Option<String>,

    /// Directory with client.crt, client.key and CA.crt. Enables TLS.
    #[arg(long)]
    certdir: Option<String>,
}

impl RouterArgs {
    fn apply(self, router: &mut RouterConfig) {
        if let Some(host) = self.host {
            router.host = host;
        }
        if let Some(port) = self.port {
            router.port = port;
        }
        if let Some(user) = self.user {
            router.user = user;
        }
        if let Some(client_id) = self.client_id {
            router.client_id = client_id;
        }
        if let Some(timeout) = self.timeout {
            router.timeout_secs = timeout;
        }
        if self.passwd.is_some() {
            router.password = self.passwd;
        }
        if self.certdir.is_some() {
            router.cert_dir = self.certdir;
        }
    }
}

#[derive(Args)]
struct RoutesArgs {
    /// File containing the routes.
    #[arg(long, default_value = "routes.toml")]
    routesfile: PathBuf,

    /// `add` or `del`.
    #[arg(long, default_value = "add")]
    verb: String,

    #[command(flatten)]
    router: RouterArgs,
}

#[derive(Args)]
struct OpArgs {
    /// Operational command to run.
    #[arg(long, default_value = DEFAULT_COMMAND)]
    command: String,

    /// Reply format: xml, json or cli.
    #[arg(long, default_value = "xml")]
    format: String,

    #[command(flatten)]
    router: RouterArgs,
}

fn main() -> Result<()> {
    let Cli {
        config,
        verbose,
        command,
    } = Cli::parse();

    let command = match command {
        Commands::Bridge(args) => {
            let status = cmd_bridge(&config, verbose, &args)?;
            std::process::exit(status);
        }
        command => command,
    };

    init_stderr_logging(verbose, "info");
    let runtime = tokio::runtime::Runtime::new().context("failed to create Tokio runtime")?;
    runtime.block_on(async move {
        match command {
            Commands::Routes(args) => cmd_routes(&config, args).await,
            Commands::Op(args) => cmd_op(&config, args).await,
            Commands::Config { show } => cmd_config(&config, show),
            Commands::Version => {
                println!("jetkit {}", build_info::version_string());
                Ok(())
            }
            Commands::Bridge(_) => unreachable!("the bridge runs before the client runtime"),
        }
    })
}

fn filter_for(verbose: u8, configured: &str) -> String {
    match verbose {
        0 => configured.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

fn init_stderr_logging(verbose: u8, configured: &str) {
    let filter = filter_for(verbose, configured);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Load and validate the bridge configuration, with paths fixed against the
/// current directory before the child changes into `work_dir`.
fn bridge_config(config_path: &Path, args: &BridgeArgs) -> Result<AppConfig> {
    let mut config = load_config_blocking(config_path)?;
    args.apply(&mut config.bridge);
    config.validate()?;
    config
        .daemon
        .resolve_work_dir()
        .context("failed to resolve the working directory")?;
    Ok(config)
}

/// Runs the bridge to completion and returns the process exit status.
///
/// Everything up to the detach runs before any runtime or logging exists.
fn cmd_bridge(config_path: &Path, verbose: u8, args: &BridgeArgs) -> Result<i32> {
    let config = bridge_config(config_path, args)?;
    let level = filter_for(verbose, &config.logging.level);

    let supervisor = Supervisor::new(config);
    let detached = if args.foreground {
        init_stderr_logging(verbose, &level);
        supervisor.detach(&Foreground::from_config(&supervisor.config().daemon))
    } else {
        let daemonizer = Daemonizer::from_config(&supervisor.config().daemon)?;
        supervisor.detach(&daemonizer)
    }
    .context("failed to start the bridge")?;

    let pid_file = match detached {
        Detached::Parent => return Ok(EXIT_OK),
        Detached::Child(pid_file) => pid_file,
    };

    let log = match supervisor.open_log() {
        Ok(log) => log,
        Err(e) => {
            let _ = pid_file.release();
            return Err(e).context("failed to open the log file");
        }
    };
    if !args.foreground {
        init_file_logging(log.clone(), &level)
            .map_err(|e| anyhow::anyhow!("failed to install file logging: {e}"))?;
    }
    info!(version = %build_info::version_string(), pid = std::process::id(), "Bridge starting");

    let runtime = tokio::runtime::Runtime::new().context("failed to create Tokio runtime")?;
    Ok(runtime.block_on(supervisor.run(pid_file, log)))
}

/// Resolve the router session: config file, then flags, then a password prompt.
fn session(config_path: &Path, router_args: RouterArgs) -> Result<Session> {
    let mut router = load_config_blocking(config_path)?.router;
    router_args.apply(&mut router);

    let password = Password::from_stdin(router.password.as_deref())?;
    Ok(Session::from_config(&router, password)?)
}

async fn cmd_routes(config_path: &Path, args: RoutesArgs) -> Result<()> {
    let verb = RouteVerb::parse_lenient(&args.verb);
    let session = session(config_path, args.router)?;
    let routes = RoutesFile::load(&args.routesfile)
        .await
        .with_context(|| format!("failed to load {}", args.routesfile.display()))?;

    let router = DryRunRouter::stdout();
    let client = RouterClient::new(&router, &session);
    client.login().await?;

    let cookies = SequenceAllocator::spawn();
    let result = client.push_routes(&routes, verb, &cookies).await;
    cookies.stop().await;

    let reply = result?;
    info!(status = %reply.status, "Result");
    Ok(())
}

async fn cmd_op(config_path: &Path, args: OpArgs) -> Result<()> {
    let format = OutputFormat::parse_lenient(&args.format);
    let session = session(config_path, args.router)?;

    let router = DryRunRouter::stdout();
    let client = RouterClient::new(&router, &session);
    client.login().await?;

    let reply = client
        .run_op_command(&OpCommandRequest::new(args.command, format))
        .await?;
    print!("{}", render_reply(&reply));
    Ok(())
}

fn cmd_config(config_path: &Path, show: bool) -> Result<()> {
    let mut config = load_config_blocking(config_path)?;
    if show {
        if config.router.password.is_some() {
            config.router.password = Some("[REDACTED]".to_string());
        }
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

fn load_config_blocking(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load_blocking(path)
            .with_context(|| format!("invalid configuration in {}", path.display()))
    } else {
        Ok(AppConfig::default())
    }
}
