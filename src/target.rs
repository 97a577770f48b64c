//! Remote host connection parameters.
//!
//! A `HostTarget` names where to connect; a `Credential` says how to
//! authenticate. Both are built once per invocation and handed to the
//! session constructor. Secret material never appears in `Debug` output.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Address, port and login user of a remote host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
}

impl HostTarget {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
        }
    }

    /// Target describing the local machine, used with the local transport.
    pub fn local() -> Self {
        let user = std::env::var("USER").unwrap_or_else(|_| "local".to_string());
        Self::new("localhost", 0, user)
    }

    /// `host:port` form suitable for socket resolution.
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for HostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// How to authenticate against the remote host.
#[derive(Clone)]
pub enum Credential {
    /// Password authentication. The value comes from the environment.
    Password(String),
    /// Public-key authentication from a private key file.
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
    /// No credential (local transport only).
    None,
}

impl Credential {
    /// Short label for logs and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Password(_) => "password",
            Credential::KeyFile { .. } => "key",
            Credential::None => "none",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(<redacted>)"),
            Credential::KeyFile { path, passphrase } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            Credential::None => f.write_str("None"),
        }
    }
}
