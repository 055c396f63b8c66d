//! Forwarding received messages to the host's system log.
//!
//! The bridge does not speak the system-log protocol itself. [`LoggerCommand`]
//! hands each message to an external executable (`logger` by default), which
//! keeps the bridge independent of how the host's event daemon stores logs.

use std::process::Stdio;

use tracing::debug;

use jetkit_config::ForwarderConfig;

use crate::BoxFuture;

/// Errors from forwarding a message.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with code {code}: {stderr}")]
    Failed {
        program: String,
        code: i32,
        stderr: String,
    },
}

/// Sink for messages received from the bus.
pub trait LogForwarder: Send + Sync {
    /// Forward one message. A failure affects this message only; what happens
    /// next is up to the caller's policy.
    fn forward<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), ForwardError>>;
}

/// Runs `<program> -d <tag>[<pid>] -e <event> <text>` for every message.
#[derive(Debug, Clone)]
pub struct LoggerCommand {
    program: String,
    daemon_tag: String,
    event: String,
}

impl LoggerCommand {
    /// Build the invocation for the current process.
    pub fn new(config: &ForwarderConfig) -> Self {
        Self::with_pid(config, std::process::id())
    }

    /// Build the invocation with an explicit process id in the tag.
    pub fn with_pid(config: &ForwarderConfig, pid: u32) -> Self {
        Self {
            program: config.program.clone(),
            daemon_tag: format!("{}[{pid}]", config.tag),
            event: config.event.clone(),
        }
    }

    /// Arguments passed to the program for `text`.
    pub fn args<'a>(&'a self, text: &'a str) -> [&'a str; 5] {
        ["-d", &self.daemon_tag, "-e", &self.event, text]
    }
}

impl LogForwarder for LoggerCommand {
    fn forward<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), ForwardError>> {
        Box::pin(async move {
            let output = tokio::process::Command::new(&self.program)
                .args(self.args(text))
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await
                .map_err(|source| ForwardError::Spawn {
                    program: self.program.clone(),
                    source,
                })?;

            if !output.status.success() {
                return Err(ForwardError::Failed {
                    program: self.program.clone(),
                    code: output.status.code().unwrap_or(-1),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }

            debug!(program = %self.program, len = text.len(), "Message forwarded");
            Ok(())
        })
    }
}
