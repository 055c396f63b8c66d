#![deny(unsafe_code)]

//! Configuration loading and validation for jetkit.
//!
//! Loads TOML configuration files and validates them. [`AppConfig`] holds the
//! settings for the MQTT bridge daemon and the router session shared by the
//! RPC clients; the [`routes`] module parses the BGP static routes file.

/// BGP static routes file (`routes.toml`).
pub mod routes;

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// MQTT bridge configuration.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// External log forwarder invocation.
    #[serde(default)]
    pub forwarder: ForwarderConfig,

    /// Daemonization: working directory, PID file, log file.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Router RPC session configuration.
    #[serde(default)]
    pub router: RouterConfig,
}

/// What the bridge does when forwarding a message to the system log fails.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardErrorPolicy {
    /// Stop the listener and shut the daemon down with a non-zero status.
    #[default]
    Exit,
    /// Log the failure and keep listening.
    Continue,
}

/// Configuration for the MQTT bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// MQTT broker host.
    #[serde(default = "default_bridge_host")]
    pub host: String,

    /// MQTT broker port.
    #[serde(default = "default_bridge_port")]
    pub port: u16,

    /// Topic to subscribe to.
    #[serde(default = "default_bridge_topic")]
    pub topic: String,

    /// MQTT client identifier.
    #[serde(default = "default_bridge_client_id")]
    pub client_id: String,

    /// Seconds to wait for workers after shutdown begins (0 = wait forever).
    #[serde(default)]
    pub shutdown_grace_secs: u64,

    /// Policy applied when the log forwarder fails.
    #[serde(default)]
    pub on_forward_error: ForwardErrorPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: default_bridge_host(),
            port: default_bridge_port(),
            topic: default_bridge_topic(),
            client_id: default_bridge_client_id(),
            shutdown_grace_secs: 0,
            on_forward_error: ForwardErrorPolicy::default(),
        }
    }
}

impl BridgeConfig {
    /// Broker address in `tcp://host:port` form, for diagnostics.
    pub fn broker_url(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}

fn default_bridge_host() -> String {
    "127.0.0.1".to_string()
}

fn default_bridge_port() -> u16 {
    1883
}

fn default_bridge_topic() -> String {
    "junos/MQTTBridge".to_string()
}

fn default_bridge_client_id() -> String {
    "junos-jet-bridge".to_string()
}

/// How received messages are handed to the host's system log.
///
/// The forwarder is invoked as `<program> -d <tag>[<pid>] -e <event> <message>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    /// Executable to run, resolved through `PATH`.
    #[serde(default = "default_forwarder_program")]
    pub program: String,

    /// Daemon tag; the process id is appended in brackets.
    #[serde(default = "default_forwarder_tag")]
    pub tag: String,

    /// Event identifier attached to every message.
    #[serde(default = "default_forwarder_event")]
    pub event: String,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            program: default_forwarder_program(),
            tag: default_forwarder_tag(),
            event: default_forwarder_event(),
        }
    }
}

fn default_forwarder_program() -> String {
    "logger".to_string()
}

fn default_forwarder_tag() -> String {
    "gojetmqttbridge".to_string()
}

fn default_forwarder_event() -> String {
    "MSG_RECVD".to_string()
}

/// Daemonization settings for the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Working directory of the detached child.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,

    /// PID file path, relative to `work_dir` unless absolute.
    #[serde(default = "default_pid_file")]
    pub pid_file: String,

    /// Log file path, relative to `work_dir` unless absolute.
    #[serde(default = "default_log_file")]
    pub log_file: String,

    /// File receiving the detached child's stdout and stderr (panics and
    /// other untraced output), relative to `work_dir` unless absolute. Never
    /// rotated.
    #[serde(default = "default_stdio_file")]
    pub stdio_file: String,

    /// File-mode creation mask of the detached child.
    #[serde(default = "default_umask")]
    pub umask: u32,

    /// Interval between log file rotations, in seconds.
    #[serde(default = "default_rotate_interval_secs")]
    pub rotate_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            pid_file: default_pid_file(),
            log_file: default_log_file(),
            stdio_file: default_stdio_file(),
            umask: default_umask(),
            rotate_interval_secs: default_rotate_interval_secs(),
        }
    }
}

impl DaemonConfig {
    /// PID file path resolved against the working directory.
    pub fn pid_path(&self) -> std::path::PathBuf {
        Path::new(&self.work_dir).join(&self.pid_file)
    }

    /// Log file path resolved against the working directory.
    pub fn log_path(&self) -> std::path::PathBuf {
        Path::new(&self.work_dir).join(&self.log_file)
    }

    /// Stdout/stderr capture file resolved against the working directory.
    pub fn stdio_path(&self) -> std::path::PathBuf {
        Path::new(&self.work_dir).join(&self.stdio_file)
    }

    /// Make `work_dir` absolute against the current directory.
    ///
    /// Must happen before detaching: the child changes into `work_dir`, after
    /// which a relative `work_dir` would be resolved twice.
    pub fn resolve_work_dir(&mut self) -> std::io::Result<()> {
        self.work_dir = std::path::absolute(&self.work_dir)?
            .display()
            .to_string();
        Ok(())
    }
}

fn default_work_dir() -> String {
    "./".to_string()
}

fn default_pid_file() -> String {
    "pid".to_string()
}

fn default_log_file() -> String {
    "log".to_string()
}

fn default_stdio_file() -> String {
    "stdio".to_string()
}

fn default_umask() -> u32 {
    0o027
}

fn default_rotate_interval_secs() -> u64 {
    24 * 60 * 60
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Router RPC session configuration shared by the route and op-command clients.
#[derive(Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Hostname or IP address of the router.
    #[serde(default = "default_router_host")]
    pub host: String,

    /// Port the RPC server listens on.
    #[serde(default = "default_router_port")]
    pub port: u16,

    /// Username for authentication.
    #[serde(default = "default_router_user")]
    pub user: String,

    /// Client id of the session.
    #[serde(default = "default_router_client_id")]
    pub client_id: String,

    /// Per-call timeout in seconds.
    #[serde(default = "default_router_timeout_secs")]
    pub timeout_secs: u64,

    /// Password. Prompted for on stdin when absent.
    #[serde(default)]
    pub password: Option<String>,

    /// Directory holding `client.crt`, `client.key` and `CA.crt`.
    /// TLS is used only when this is set.
    #[serde(default)]
    pub cert_dir: Option<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            host: default_router_host(),
            port: default_router_port(),
            user: default_router_user(),
            client_id: default_router_client_id(),
            timeout_secs: default_router_timeout_secs(),
            password: None,
            cert_dir: None,
        }
    }
}

impl std::fmt::Debug for RouterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("client_id", &self.client_id)
            .field("timeout_secs", &self.timeout_secs)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("cert_dir", &self.cert_dir)
            .finish()
    }
}

impl RouterConfig {
    /// Target address in `host:port` form.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_router_host() -> String {
    "127.0.0.1".to_string()
}

fn default_router_port() -> u16 {
    32767
}

fn default_router_user() -> String {
    "jet".to_string()
}

fn default_router_client_id() -> String {
    "42".to_string()
}

fn default_router_timeout_secs() -> u64 {
    10
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Load configuration with blocking I/O.
    ///
    /// The bridge reads its configuration before it detaches, when no async
    /// runtime exists yet.
    pub fn load_blocking(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge.host.is_empty() {
            return Err(ConfigError::Validation(
                "bridge.host must not be empty".to_string(),
            ));
        }
        if self.bridge.port == 0 {
            return Err(ConfigError::Validation(
                "bridge.port must be non-zero".to_string(),
            ));
        }
        if self.bridge.topic.is_empty() {
            return Err(ConfigError::Validation(
                "bridge.topic must not be empty".to_string(),
            ));
        }
        if self.bridge.client_id.is_empty() {
            return Err(ConfigError::Validation(
                "bridge.client_id must not be empty".to_string(),
            ));
        }

        if self.forwarder.program.is_empty() {
            return Err(ConfigError::Validation(
                "forwarder.program must not be empty".to_string(),
            ));
        }
        if self.forwarder.event.is_empty() {
            return Err(ConfigError::Validation(
                "forwarder.event must not be empty".to_string(),
            ));
        }

        if self.daemon.pid_file.is_empty() {
            return Err(ConfigError::Validation(
                "daemon.pid_file must not be empty".to_string(),
            ));
        }
        if self.daemon.log_file.is_empty() {
            return Err(ConfigError::Validation(
                "daemon.log_file must not be empty".to_string(),
            ));
        }
        if self.daemon.stdio_file.is_empty()
            || self.daemon.stdio_path() == self.daemon.log_path()
        {
            return Err(ConfigError::Validation(
                "daemon.stdio_file must be set and differ from daemon.log_file".to_string(),
            ));
        }
        if self.daemon.umask > 0o777 {
            return Err(ConfigError::Validation(format!(
                "daemon.umask must be at most 0o777, got {:#o}",
                self.daemon.umask
            )));
        }
        if self.daemon.rotate_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "daemon.rotate_interval_secs must be non-zero".to_string(),
            ));
        }

        if self.router.host.is_empty() {
            return Err(ConfigError::Validation(
                "router.host must not be empty".to_string(),
            ));
        }
        if self.router.port == 0 {
            return Err(ConfigError::Validation(
                "router.port must be non-zero".to_string(),
            ));
        }
        if self.router.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "router.timeout_secs must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}
