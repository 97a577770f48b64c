//! SSH transport on `ssh2`.
//!
//! One `ssh2::Session` per transport; each exec opens a fresh channel on it,
//! so commands share the authenticated connection but never each other's
//! streams. libssh2 is blocking, so all work runs on the blocking pool.
//!
//! The exec loop puts the session in non-blocking mode and drains stdout and
//! stderr alternately until the channel reports EOF. A shared cancellation
//! flag, set by `close` (or by dropping the transport), ends the loop early.
//! A command killed by a signal reports `128 + signo` as its exit status.

use std::io::{ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ssh2::Session;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{CommandOutput, Connector, OutputStream, StreamTarget, StreamWriter, Transport};
use crate::errors::TransportError;
use crate::target::{Credential, HostTarget};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const READ_BUF_SIZE: usize = 16 * 1024;

/// Opens `SshTransport`s.
#[derive(Debug, Clone)]
pub struct SshConnector {
    /// Bound on TCP connect and on each blocking libssh2 call.
    io_timeout: Duration,
}

impl SshConnector {
    pub fn new(io_timeout: Duration) -> Self {
        Self { io_timeout }
    }
}

fn millis(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

fn open_session(
    target: &HostTarget,
    credential: &Credential,
    io_timeout: Duration,
) -> Result<Session, TransportError> {
    let addr = target
        .socket_addr()
        .to_socket_addrs()
        .map_err(|_| TransportError::Resolve(target.socket_addr()))?
        .next()
        .ok_or_else(|| TransportError::Resolve(target.socket_addr()))?;

    debug!(%addr, "opening TCP connection");
    let tcp = TcpStream::connect_timeout(&addr, io_timeout).map_err(|e| match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::ConnectTimeout(io_timeout),
        _ => TransportError::Io(e),
    })?;

    let mut session = Session::new()?;
    session.set_timeout(millis(io_timeout));
    session.set_tcp_stream(tcp);
    session.handshake()?;

    let auth = match credential {
        Credential::Password(password) => session.userauth_password(&target.user, password),
        Credential::KeyFile { path, passphrase } => {
            session.userauth_pubkey_file(&target.user, None, path, passphrase.as_deref())
        }
        Credential::None => {
            return Err(TransportError::Auth {
                user: target.user.clone(),
                method: credential.kind(),
            });
        }
    };
    if let Err(e) = auth {
        debug!(error = %e, "authentication rejected");
        return Err(TransportError::Auth {
            user: target.user.clone(),
            method: credential.kind(),
        });
    }
    if !session.authenticated() {
        return Err(TransportError::Auth {
            user: target.user.clone(),
            method: credential.kind(),
        });
    }
    Ok(session)
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(
        &self,
        target: &HostTarget,
        credential: &Credential,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let target = target.clone();
        let credential = credential.clone();
        let io_timeout = self.io_timeout;
        let session =
            tokio::task::spawn_blocking(move || open_session(&target, &credential, io_timeout))
                .await
                .map_err(|e| TransportError::Task(e.to_string()))??;
        Ok(Box::new(SshTransport {
            session,
            io_timeout,
            cancel: Arc::new(AtomicBool::new(false)),
            inflight: None,
            closed: false,
        }))
    }
}

type ExecTask = JoinHandle<Result<CommandOutput, TransportError>>;

pub struct SshTransport {
    session: Session,
    io_timeout: Duration,
    cancel: Arc<AtomicBool>,
    /// The blocking exec of the last `exec` call, kept so that an exec whose
    /// future was dropped can be stopped before the session is reused.
    inflight: Option<ExecTask>,
    closed: bool,
}

impl SshTransport {
    /// Stop an abandoned exec thread and wait for it to release the session.
    async fn settle(&mut self) {
        let Some(task) = self.inflight.take() else {
            return;
        };
        self.cancel.store(true, Ordering::SeqCst);
        match tokio::time::timeout(self.io_timeout, task).await {
            Ok(_) => debug!("abandoned exec stopped"),
            Err(_) => warn!(
                timeout_ms = self.io_timeout.as_millis() as u64,
                "abandoned exec did not stop in time"
            ),
        }
    }
}

/// Read whatever is available without blocking. Returns bytes read.
fn pump<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    collected: &mut Vec<u8>,
    writer: Option<&mut StreamWriter>,
) -> Result<usize, TransportError> {
    match reader.read(buf) {
        Ok(0) => Ok(0),
        Ok(n) => {
            collected.extend_from_slice(&buf[..n]);
            if let Some(writer) = writer {
                writer.write(&buf[..n]);
            }
            Ok(n)
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(TransportError::Lost(e.to_string())),
    }
}

fn signal_number(name: &str) -> Option<i32> {
    let name = name.strip_prefix("SIG").unwrap_or(name);
    let number = match name {
        "HUP" => 1,
        "INT" => 2,
        "QUIT" => 3,
        "ILL" => 4,
        "TRAP" => 5,
        "ABRT" => 6,
        "BUS" => 7,
        "FPE" => 8,
        "KILL" => 9,
        "USR1" => 10,
        "SEGV" => 11,
        "USR2" => 12,
        "PIPE" => 13,
        "ALRM" => 14,
        "TERM" => 15,
        _ => return None,
    };
    Some(number)
}

/// Exit status of a command that may have died from a signal.
///
/// The server sends `exit-signal` instead of `exit-status` in that case and
/// libssh2 reports status 0, so a signal maps to `128 + signo` the way a
/// shell reports it, or -1 for signals without a known number.
fn status_from(exit_status: i32, signal: Option<&str>) -> i32 {
    match signal {
        None => exit_status,
        Some(name) => signal_number(name).map_or(-1, |n| 128 + n),
    }
}

fn exec_blocking(
    session: &Session,
    command: &str,
    cancel: &AtomicBool,
    stream: Option<StreamTarget>,
) -> Result<CommandOutput, TransportError> {
    session.set_blocking(true);
    let mut channel = session.channel_session()?;
    channel.exec(command)?;

    session.set_blocking(false);
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut out_writer = stream.as_ref().map(|t| t.writer(OutputStream::Stdout));
    let mut err_writer = stream.as_ref().map(|t| t.writer(OutputStream::Stderr));
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        if cancel.load(Ordering::SeqCst) {
            return Err(TransportError::Cancelled);
        }
        let read_out = pump(&mut channel, &mut buf, &mut stdout, out_writer.as_mut())?;
        let read_err = pump(
            &mut channel.stderr(),
            &mut buf,
            &mut stderr,
            err_writer.as_mut(),
        )?;
        if read_out + read_err == 0 {
            if channel.eof() {
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
    for writer in [out_writer.as_mut(), err_writer.as_mut()].into_iter().flatten() {
        writer.finish();
    }

    session.set_blocking(true);
    channel.wait_close()?;
    let signal = channel.exit_signal()?.exit_signal;
    let exit_status = status_from(channel.exit_status()?, signal.as_deref());

    let mut stderr = String::from_utf8_lossy(&stderr).into_owned();
    if let Some(name) = &signal {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!("killed by signal {}\n", name));
    }

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr,
        exit_status,
    })
}

#[async_trait]
impl Transport for SshTransport {
    async fn exec(
        &mut self,
        command: &str,
        stream: Option<StreamTarget>,
    ) -> Result<CommandOutput, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.inflight.is_some() {
            self.settle().await;
            self.cancel.store(false, Ordering::SeqCst);
        }
        let session = self.session.clone();
        let cancel = Arc::clone(&self.cancel);
        let command = command.to_string();
        let task = self.inflight.insert(tokio::task::spawn_blocking(move || {
            exec_blocking(&session, &command, &cancel, stream)
        }));
        let joined = task.await;
        self.inflight = None;
        joined.map_err(|e| TransportError::Task(e.to_string()))?
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.store(true, Ordering::SeqCst);
        // The exec loop must leave the session before it goes back to
        // blocking mode, or a pending read would hold the session lock.
        self.settle().await;
        let session = self.session.clone();
        let disconnect = tokio::task::spawn_blocking(move || {
            session.set_blocking(true);
            session.disconnect(None, "remote-ops session closed", None)
        })
        .await;
        match disconnect {
            Ok(Ok(())) => debug!("ssh session disconnected"),
            Ok(Err(e)) => warn!(error = %e, "ssh disconnect failed"),
            Err(e) => warn!(error = %e, "ssh disconnect task failed"),
        }
    }
}

impl Drop for SshTransport {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}
