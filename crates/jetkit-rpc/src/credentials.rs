use std::fmt;
use std::io::{BufRead, IsTerminal, Write};
use std::os::fd::AsFd;
use std::path::Path;
use std::time::Duration;

use nix::sys::termios::{LocalFlags, SetArg, Termios, tcgetattr, tcsetattr};
use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

use jetkit_config::RouterConfig;

use crate::RpcError;

/// Login password, cleared from memory on drop and never printed.
#[derive(Clone)]
pub struct Password {
    inner: String,
}

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: value.into(),
        }
    }

    /// Use `configured` when present, otherwise prompt on `prompt` and read
    /// one line from `input`.
    pub fn resolve(
        configured: Option<&str>,
        input: &mut dyn BufRead,
        prompt: &mut dyn Write,
    ) -> Result<Self, RpcError> {
        if let Some(password) = configured.filter(|p| !p.is_empty()) {
            return Ok(Self::new(password));
        }

        write!(prompt, "Enter Password: ")
            .and_then(|()| prompt.flush())
            .map_err(|e| RpcError::Credentials(format!("cannot prompt for password: {e}")))?;

        let mut line = Zeroizing::new(String::new());
        input
            .read_line(&mut line)
            .map_err(|e| RpcError::Credentials(format!("cannot read password: {e}")))?;
        Ok(Self::new(line.trim_end_matches(['\r', '\n'])))
    }

    /// [`resolve`](Self::resolve) against the process's stdin and stderr.
    /// When stdin is a terminal, typed characters are not echoed.
    pub fn from_stdin(configured: Option<&str>) -> Result<Self, RpcError> {
        if let Some(password) = configured.filter(|p| !p.is_empty()) {
            return Ok(Self::new(password));
        }

        let stdin = std::io::stdin();
        let echo = if stdin.is_terminal() {
            match EchoOff::disable(stdin.as_fd()) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    warn!(error = %e, "Cannot turn off terminal echo");
                    None
                }
            }
        } else {
            None
        };
        let password = Self::resolve(None, &mut stdin.lock(), &mut std::io::stderr());
        if echo.is_some() {
            // The user's newline was not echoed either.
            let _ = writeln!(std::io::stderr());
        }
        password
    }

    pub fn expose(&self) -> &str {
        &self.inner
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}

impl Drop for Password {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}

/// Terminal echo switched off on `fd` until dropped.
struct EchoOff<F: AsFd> {
    fd: F,
    saved: Termios,
}

impl<F: AsFd> EchoOff<F> {
    fn disable(fd: F) -> nix::Result<Self> {
        let saved = tcgetattr(&fd)?;
        let mut quiet = saved.clone();
        quiet.local_flags.remove(LocalFlags::ECHO);
        tcsetattr(&fd, SetArg::TCSANOW, &quiet)?;
        Ok(Self { fd, saved })
    }
}

impl<F: AsFd> Drop for EchoOff<F> {
    fn drop(&mut self) {
        if let Err(e) = tcsetattr(&self.fd, SetArg::TCSANOW, &self.saved) {
            warn!(error = %e, "Failed to restore terminal echo");
        }
    }
}

/// Client certificate, key and CA loaded from a certificate directory.
pub struct TlsMaterial {
    pub client_cert: Vec<u8>,
    pub client_key: Zeroizing<Vec<u8>>,
    pub ca_cert: Vec<u8>,
    /// Name the server certificate is verified against.
    pub server_name: String,
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("client_cert", &self.client_cert.len())
            .field("client_key", &"[REDACTED]")
            .field("ca_cert", &self.ca_cert.len())
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl TlsMaterial {
    /// Read `client.crt`, `client.key` and `CA.crt` from `dir`.
    pub fn load(dir: &Path, server_name: &str) -> Result<Self, RpcError> {
        let client_cert = read_pem(&dir.join("client.crt"))?;
        let client_key = Zeroizing::new(read_pem(&dir.join("client.key"))?);
        let ca_cert = read_pem(&dir.join("CA.crt"))?;
        debug!(dir = %dir.display(), server_name, "Loaded TLS material");
        Ok(Self {
            client_cert,
            client_key,
            ca_cert,
            server_name: server_name.to_string(),
        })
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, RpcError> {
    let bytes = std::fs::read(path)
        .map_err(|e| RpcError::Credentials(format!("cannot read {}: {e}", path.display())))?;
    if !bytes.windows(11).any(|w| w == b"-----BEGIN ") {
        return Err(RpcError::Credentials(format!(
            "{} does not contain a PEM block",
            path.display()
        )));
    }
    Ok(bytes)
}

/// Everything needed to open a session with the router.
#[derive(Debug)]
pub struct Session {
    pub endpoint: String,
    pub user: String,
    pub client_id: String,
    pub password: Password,
    pub timeout: Duration,
    pub tls: Option<TlsMaterial>,
}

impl Session {
    /// Build a session from `config`. TLS material is loaded only when a
    /// certificate directory is configured.
    pub fn from_config(config: &RouterConfig, password: Password) -> Result<Self, RpcError> {
        let tls = config
            .cert_dir
            .as_deref()
            .filter(|dir| !dir.is_empty())
            .map(|dir| TlsMaterial::load(Path::new(dir), &config.host))
            .transpose()?;
        Ok(Self {
            endpoint: config.endpoint(),
            user: config.user.clone(),
            client_id: config.client_id.clone(),
            password,
            timeout: Duration::from_secs(config.timeout_secs),
            tls,
        })
    }
}
