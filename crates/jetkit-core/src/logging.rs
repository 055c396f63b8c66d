//! The daemon's log file.
//!
//! [`RotatingLog`] is a `tracing_subscriber` [`MakeWriter`] over a file that
//! can be renamed aside and reopened while the subscriber keeps writing.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// Append-only log file that can be rotated in place.
#[derive(Debug, Clone)]
pub struct RotatingLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl RotatingLog {
    /// Open (or create) the log at `path` for appending.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path the current file is moved to on rotation.
    pub fn rotated_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".1");
        PathBuf::from(name)
    }

    /// Move the current file to `<path>.1` (replacing any previous one) and
    /// start a fresh file at `<path>`.
    pub fn rotate(&self) -> io::Result<()> {
        let mut file = self.lock();
        file.flush()?;
        std::fs::rename(&self.path, self.rotated_path())?;
        *file = open_append(&self.path)?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Writer handed out per event by [`RotatingLog`].
pub struct LogWriter<'a> {
    log: &'a RotatingLog,
}

impl Write for LogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.log.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.log.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingLog {
    type Writer = LogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter { log: self }
    }
}

/// Install the global subscriber writing plain text into `log`.
///
/// `RUST_LOG` takes precedence over `level`.
pub fn init_file_logging(
    log: RotatingLog,
    level: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_ansi(false)
        .with_writer(log)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rotate_moves_file_aside_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let log = RotatingLog::open(dir.path().join("log")).unwrap();

        log.make_writer().write_all(b"before\n").unwrap();
        log.rotate().unwrap();
        log.make_writer().write_all(b"after\n").unwrap();

        let rotated = std::fs::read_to_string(dir.path().join("log.1")).unwrap();
        let current = std::fs::read_to_string(dir.path().join("log")).unwrap();
        assert_eq!(rotated, "before\n");
        assert_eq!(current, "after\n");
    }

    #[test]
    fn test_second_rotation_replaces_previous() {
        let dir = tempfile::tempdir().unwrap();
        let log = RotatingLog::open(dir.path().join("log")).unwrap();

        log.make_writer().write_all(b"one\n").unwrap();
        log.rotate().unwrap();
        log.make_writer().write_all(b"two\n").unwrap();
        log.rotate().unwrap();

        let rotated = std::fs::read_to_string(log.rotated_path()).unwrap();
        assert_eq!(rotated, "two\n");
        assert_eq!(std::fs::read_to_string(log.path()).unwrap(), "");
    }

    #[test]
    fn test_open_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        std::fs::write(&path, "old\n").unwrap();

        let log = RotatingLog::open(&path).unwrap();
        log.make_writer().write_all(b"new\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old\nnew\n");
    }
}
