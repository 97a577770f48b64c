//! Typed error hierarchy for remote-ops.
//!
//! - `TransportError`: failures of the wire underneath a session
//! - `OpsError`: what a caller of `RemoteSession` sees (connection, command,
//!   timeout, container lookup and closed-session failures)
//! - `PlanError`: malformed command lists and plan files
//!
//! `Severity` orders these for the process exit code.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Errors raised by a `Connector` or `Transport` implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SSH protocol error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("authentication failed for user '{user}' ({method})")]
    Auth { user: String, method: &'static str },

    #[error("could not resolve address {0}")]
    Resolve(String),

    #[error("timed out after {}s while connecting", .0.as_secs())]
    ConnectTimeout(Duration),

    #[error("command was cancelled")]
    Cancelled,

    #[error("connection lost: {0}")]
    Lost(String),

    #[error("transport is closed")]
    Closed,

    #[error("background task failed: {0}")]
    Task(String),
}

/// Errors reported by a `RemoteSession`.
#[derive(Debug, Error)]
pub enum OpsError {
    #[error("connection to {host}:{port} failed: {source}")]
    Connection {
        host: String,
        port: u16,
        #[source]
        source: TransportError,
    },

    #[error("`{command}` on {host} exited with status {exit_status}")]
    Command {
        host: String,
        command: String,
        exit_status: i32,
        stderr: String,
    },

    #[error("`{command}` on {host} timed out after {}s", .after.as_secs_f64())]
    Timeout {
        host: String,
        command: String,
        after: Duration,
    },

    #[error("container lookup `{query}` on {host} failed: {reason}")]
    ContainerLookup {
        host: String,
        query: String,
        reason: String,
    },

    #[error("session to {host} is closed")]
    SessionClosed { host: String },
}

impl OpsError {
    pub fn severity(&self) -> Severity {
        match self {
            OpsError::Command { .. } | OpsError::ContainerLookup { .. } => Severity::CommandFailed,
            OpsError::Timeout { .. } => Severity::TimedOut,
            OpsError::Connection { .. } | OpsError::SessionClosed { .. } => {
                Severity::ConnectionFailed
            }
        }
    }
}

/// Errors from building a `Plan`.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("no commands given")]
    Empty,

    #[error("step {index} has an empty command")]
    EmptyCommand { index: usize },

    #[error("step 0 cannot depend on a previous step")]
    FirstStepDependent,

    #[error("step {index} has a container query with no filters")]
    EmptyContainerQuery { index: usize },

    #[error("failed to read plan file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse plan file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Worst-first ordering of run results; maps to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    CommandFailed,
    TimedOut,
    ConnectionFailed,
}

/// Exit code for configuration and input errors raised before a session starts.
pub const EXIT_CONFIG_ERROR: u8 = 5;

impl Severity {
    pub fn exit_code(self) -> u8 {
        match self {
            Severity::Success => 0,
            Severity::CommandFailed => 1,
            Severity::TimedOut => 3,
            Severity::ConnectionFailed => 4,
        }
    }
}
