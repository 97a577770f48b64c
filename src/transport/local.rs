//! Local `sh -c` transport.
//!
//! Runs each command as a child process of this one. Used for `--local`
//! dry runs and for exercising the CLI end to end without an SSH server.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

use super::{CommandOutput, Connector, OutputStream, StreamTarget, StreamWriter, Transport};
use crate::errors::TransportError;
use crate::target::{Credential, HostTarget};

/// Opens `LocalTransport`s. Credentials are ignored.
#[derive(Debug, Clone)]
pub struct LocalConnector {
    shell: String,
}

impl LocalConnector {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for LocalConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(
        &self,
        _target: &HostTarget,
        _credential: &Credential,
    ) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(LocalTransport {
            shell: self.shell.clone(),
            closed: false,
        }))
    }
}

pub struct LocalTransport {
    shell: String,
    closed: bool,
}

async fn drain<R>(mut reader: R, mut writer: Option<StreamWriter>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut collected = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&buf[..n]);
        if let Some(writer) = writer.as_mut() {
            writer.write(&buf[..n]);
        }
    }
    if let Some(writer) = writer.as_mut() {
        writer.finish();
    }
    Ok(collected)
}

#[async_trait]
impl Transport for LocalTransport {
    async fn exec(
        &mut self,
        command: &str,
        stream: Option<StreamTarget>,
    ) -> Result<CommandOutput, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        debug!(shell = %self.shell, command, "spawning local command");

        // kill_on_drop keeps a cancelled exec from leaving the child running.
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Task("child stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::Task("child stderr was not captured".to_string()))?;

        let (out, err) = tokio::try_join!(
            drain(stdout, stream.as_ref().map(|t| t.writer(OutputStream::Stdout))),
            drain(stderr, stream.as_ref().map(|t| t.writer(OutputStream::Stderr))),
        )?;
        let status = child.wait().await?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&out).into_owned(),
            stderr: String::from_utf8_lossy(&err).into_owned(),
            exit_status: status.code().unwrap_or(-1),
        })
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
