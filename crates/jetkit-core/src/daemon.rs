//! Detaching the bridge into the background.
//!
//! [`Detacher::spawn_detached`] must be called before any tokio runtime is
//! created: forking a process that already runs worker threads leaves the
//! child with a runtime whose threads no longer exist.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use daemonize::{Daemonize, Outcome};
use tracing::{debug, info};

use jetkit_config::DaemonConfig;

/// Errors from detaching and PID file handling.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("failed to detach: {0}")]
    Detach(String),

    #[error("PID file {path}: {source}")]
    PidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which side of the detach the caller is on.
#[derive(Debug)]
pub enum Detached {
    /// The original process; it should exit with status 0.
    Parent,
    /// The process that keeps running, owning the PID file.
    Child(PidFile),
}

/// Puts the process into the background.
pub trait Detacher {
    fn spawn_detached(&self) -> Result<Detached, DaemonError>;
}

/// PID file written for the running bridge. Removed by [`release`](Self::release).
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Record the current process id at `path`.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, DaemonError> {
        let path = path.into();
        std::fs::write(&path, format!("{}\n", std::process::id())).map_err(|source| {
            DaemonError::PidFile {
                path: path.clone(),
                source,
            }
        })?;
        Ok(Self { path })
    }

    /// Take ownership of a PID file someone else wrote.
    pub fn adopt(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file. A file that is already gone is not an error.
    pub fn release(self) -> Result<(), DaemonError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "PID file removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(DaemonError::PidFile {
                path: self.path,
                source,
            }),
        }
    }
}

/// Double-forks via `daemonize`, changing into the working directory,
/// setting the umask, and pointing stdout/stderr at the stdio file.
///
/// The stdio file is kept apart from the traced log: rotation only reopens
/// the tracing writer, so inherited descriptors would follow the renamed file.
#[derive(Debug, Clone)]
pub struct Daemonizer {
    work_dir: PathBuf,
    pid_path: PathBuf,
    stdio_path: PathBuf,
    umask: u32,
}

impl Daemonizer {
    /// Resolve every path against the current directory before forking, since
    /// the child changes directory.
    pub fn from_config(config: &DaemonConfig) -> Result<Self, DaemonError> {
        Ok(Self {
            work_dir: std::path::absolute(&config.work_dir)?,
            pid_path: std::path::absolute(config.pid_path())?,
            stdio_path: std::path::absolute(config.stdio_path())?,
            umask: config.umask,
        })
    }
}

impl Detacher for Daemonizer {
    fn spawn_detached(&self) -> Result<Detached, DaemonError> {
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.stdio_path)?;
        let stderr = stdout.try_clone()?;

        let daemon = Daemonize::new()
            .pid_file(&self.pid_path)
            .working_directory(&self.work_dir)
            .umask(self.umask)
            .stdout(stdout)
            .stderr(stderr);

        match daemon.execute() {
            Outcome::Parent(Ok(parent)) => {
                if parent.first_child_exit_code != 0 {
                    return Err(DaemonError::Detach(format!(
                        "child exited with code {}",
                        parent.first_child_exit_code
                    )));
                }
                Ok(Detached::Parent)
            }
            Outcome::Parent(Err(e)) | Outcome::Child(Err(e)) => {
                Err(DaemonError::Detach(e.to_string()))
            }
            Outcome::Child(Ok(_)) => Ok(Detached::Child(PidFile::adopt(&self.pid_path))),
        }
    }
}

/// Stays in the foreground and writes the PID file itself.
#[derive(Debug, Clone)]
pub struct Foreground {
    pid_path: PathBuf,
}

impl Foreground {
    pub fn new(pid_path: impl Into<PathBuf>) -> Self {
        Self {
            pid_path: pid_path.into(),
        }
    }

    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(config.pid_path())
    }
}

impl Detacher for Foreground {
    fn spawn_detached(&self) -> Result<Detached, DaemonError> {
        let pid_file = PidFile::create(&self.pid_path)?;
        info!(pid = std::process::id(), path = %self.pid_path.display(), "Running in foreground");
        Ok(Detached::Child(pid_file))
    }
}
