//! Scripted in-memory transport for sequencing tests.
//!
//! Understands a tiny command language so tests read naturally:
//! `echo X` prints `X\n`, `exit N` exits with N, `hang` never completes
//! (`hang X` streams `X\n` first), `drop` fails the connection, `true`
//! succeeds silently. Anything else can be given a canned response with
//! `respond`, or made to hang or fail with `hang_on` and `fail_on`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{CommandOutput, Connector, OutputStream, StreamTarget, Transport};
use crate::errors::TransportError;
use crate::target::{Credential, HostTarget};

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub executed: Vec<String>,
    pub closed: bool,
    pub connects: usize,
    responses: HashMap<String, CommandOutput>,
    hanging: Vec<String>,
    failing: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockConnector {
    state: Arc<Mutex<MockState>>,
    refuse: bool,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector whose every connect attempt fails authentication.
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn respond(self, command: &str, output: CommandOutput) -> Self {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(command.to_string(), output);
        self
    }

    /// Make every command starting with `prefix` hang.
    pub fn hang_on(self, prefix: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .hanging
            .push(prefix.to_string());
        self
    }

    /// Make every command starting with `prefix` lose the connection.
    pub fn fail_on(self, prefix: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing
            .push(prefix.to_string());
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        target: &HostTarget,
        credential: &Credential,
    ) -> Result<Box<dyn Transport>, TransportError> {
        self.state.lock().unwrap().connects += 1;
        if self.refuse {
            return Err(TransportError::Auth {
                user: target.user.clone(),
                method: credential.kind(),
            });
        }
        Ok(Box::new(MockTransport {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

fn simulate(command: &str) -> CommandOutput {
    if let Some(text) = command.strip_prefix("echo ") {
        return CommandOutput {
            stdout: format!("{}\n", text),
            ..Default::default()
        };
    }
    if let Some(code) = command.strip_prefix("exit ") {
        return CommandOutput {
            stderr: format!("exited {}\n", code),
            exit_status: code.trim().parse().unwrap_or(1),
            ..Default::default()
        };
    }
    CommandOutput::default()
}

#[async_trait]
impl Transport for MockTransport {
    async fn exec(
        &mut self,
        command: &str,
        stream: Option<StreamTarget>,
    ) -> Result<CommandOutput, TransportError> {
        let (canned, hangs, fails) = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(TransportError::Closed);
            }
            state.executed.push(command.to_string());
            let hangs = state.hanging.iter().any(|p| command.starts_with(p.as_str()));
            let fails = state.failing.iter().any(|p| command.starts_with(p.as_str()));
            (state.responses.get(command).cloned(), hangs, fails)
        };
        if command == "hang" || hangs {
            std::future::pending::<()>().await;
        }
        if let Some(partial) = command.strip_prefix("hang ") {
            if let Some(target) = &stream {
                target.send(OutputStream::Stdout, &format!("{}\n", partial));
            }
            std::future::pending::<()>().await;
        }
        if command == "drop" || fails {
            return Err(TransportError::Lost("peer reset".to_string()));
        }
        let output = canned.unwrap_or_else(|| simulate(command));
        if let Some(target) = stream {
            if !output.stdout.is_empty() {
                target.send(OutputStream::Stdout, &output.stdout);
            }
            if !output.stderr.is_empty() {
                target.send(OutputStream::Stderr, &output.stderr);
            }
        }
        Ok(output)
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}
