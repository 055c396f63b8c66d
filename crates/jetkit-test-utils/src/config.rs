//! Configuration builders for tests.

use std::path::Path;

use jetkit_config::{AppConfig, ForwardErrorPolicy};

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .topic("t1")
///     .work_dir(dir.path())
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn topic(mut self, topic: &str) -> Self {
        self.config.bridge.topic = topic.to_string();
        self
    }

    pub fn broker(mut self, host: &str, port: u16) -> Self {
        self.config.bridge.host = host.to_string();
        self.config.bridge.port = port;
        self
    }

    pub fn on_forward_error(mut self, policy: ForwardErrorPolicy) -> Self {
        self.config.bridge.on_forward_error = policy;
        self
    }

    pub fn shutdown_grace_secs(mut self, secs: u64) -> Self {
        self.config.bridge.shutdown_grace_secs = secs;
        self
    }

    pub fn forwarder_program(mut self, program: &str) -> Self {
        self.config.forwarder.program = program.to_string();
        self
    }

    pub fn work_dir(mut self, dir: &Path) -> Self {
        self.config.daemon.work_dir = dir.display().to_string();
        self
    }

    pub fn rotate_interval_secs(mut self, secs: u64) -> Self {
        self.config.daemon.rotate_interval_secs = secs;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
