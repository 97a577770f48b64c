//! `RemoteSession`: one authenticated channel, one ordered plan.
//!
//! The session owns its transport exclusively and runs one command at a
//! time. Each command is awaited until the transport reports completion,
//! bounded by a timeout. A timeout or transport failure closes the session;
//! steps after it are reported as not run and later `run` calls are
//! rejected.

pub mod report;

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::container::{ContainerQuery, ContainerSummary, exec_in_container, parse_ps_output};
use crate::errors::{OpsError, TransportError};
use crate::plan::{Plan, Step, StepKind};
use crate::target::{Credential, HostTarget};
use crate::transport::{
    Connector, OutputChunk, OutputSink, OutputStream, StreamTarget, Transport,
};
use crate::util::truncate_command;

pub use report::{SessionReport, StepOutcome, StepReport};

/// Timeouts applied by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Default bound on each remote command.
    pub command_timeout: Duration,
    /// Bound on opening the transport.
    pub connect_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(15),
        }
    }
}

/// Everything captured so far, split by stream.
fn partial_output(captured: &mut mpsc::UnboundedReceiver<OutputChunk>) -> (String, String) {
    let mut stdout = String::new();
    let mut stderr = String::new();
    while let Ok(chunk) = captured.try_recv() {
        match chunk.stream {
            OutputStream::Stdout => stdout.push_str(&chunk.data),
            OutputStream::Stderr => stderr.push_str(&chunk.data),
        }
    }
    (stdout, stderr)
}

pub struct RemoteSession {
    target: HostTarget,
    transport: Option<Box<dyn Transport>>,
    options: SessionOptions,
    sink: Option<OutputSink>,
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("target", &self.target)
            .field("closed", &self.is_closed())
            .field("options", &self.options)
            .finish()
    }
}

impl RemoteSession {
    /// Open a session. Fails with `OpsError::Connection` before any command
    /// runs if the host cannot be reached or rejects the credential.
    pub async fn connect(
        connector: &dyn Connector,
        target: HostTarget,
        credential: &Credential,
        options: SessionOptions,
    ) -> Result<Self, OpsError> {
        info!(host = %target, auth = credential.kind(), "connecting");
        let connecting = connector.connect(&target, credential);
        let transport = match tokio::time::timeout(options.connect_timeout, connecting).await {
            Ok(Ok(transport)) => transport,
            Ok(Err(source)) => {
                warn!(host = %target, error = %source, "connection failed");
                return Err(OpsError::Connection {
                    host: target.host.clone(),
                    port: target.port,
                    source,
                });
            }
            Err(_) => {
                warn!(host = %target, "connection timed out");
                return Err(OpsError::Connection {
                    host: target.host.clone(),
                    port: target.port,
                    source: TransportError::ConnectTimeout(options.connect_timeout),
                });
            }
        };
        debug!(host = %target, "connected");
        Ok(Self {
            target,
            transport: Some(transport),
            options,
            sink: None,
        })
    }

    /// Forward live output of every step to `sink`.
    pub fn with_output_sink(mut self, sink: OutputSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn target(&self) -> &HostTarget {
        &self.target
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// Close the transport. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            debug!(host = %self.target, "closing session");
            transport.close().await;
        }
    }

    fn ensure_open(&self) -> Result<(), OpsError> {
        if self.is_closed() {
            return Err(OpsError::SessionClosed {
                host: self.target.host.clone(),
            });
        }
        Ok(())
    }

    /// Execute `plan` in order and report every step.
    ///
    /// A step marked `depends_on_previous` runs only if the step before it
    /// succeeded. Non-zero exits of independent steps do not stop the run.
    pub async fn run(&mut self, plan: &Plan) -> Result<SessionReport, OpsError> {
        self.ensure_open()?;
        let mut report = SessionReport::new(self.target.clone());
        let span = info_span!("session", host = %self.target, run_id = %report.run_id);
        self.run_steps(plan, &mut report).instrument(span).await;
        Ok(report)
    }

    async fn run_steps(&mut self, plan: &Plan, report: &mut SessionReport) {
        let mut previous_succeeded = false;
        for (index, step) in plan.steps().iter().enumerate() {
            if self.is_closed() {
                report.push(StepReport::new(index, step, StepOutcome::NotRun));
                previous_succeeded = false;
                continue;
            }
            if step.depends_on_previous && !previous_succeeded {
                info!(step = index, "skipping: previous step did not succeed");
                report.push(StepReport::new(
                    index,
                    step,
                    StepOutcome::Skipped {
                        blocked_by: index.saturating_sub(1),
                    },
                ));
                previous_succeeded = false;
                continue;
            }

            info!(step = index, command = %truncate_command(step.command(), 80), "running step");
            let started = Instant::now();
            let (outcome, container) = self.execute_step(index, step).await;
            let elapsed = started.elapsed();
            match &outcome {
                StepOutcome::Succeeded { .. } => {
                    info!(step = index, elapsed_ms = elapsed.as_millis() as u64, "step succeeded")
                }
                StepOutcome::Failed { output } => {
                    warn!(step = index, exit_status = output.exit_status, "step failed")
                }
                other => warn!(step = index, outcome = ?other, "step did not complete"),
            }
            previous_succeeded = outcome.is_success();
            report.push(
                StepReport::new(index, step, outcome)
                    .with_container(container)
                    .with_duration(elapsed),
            );
        }
    }

    async fn execute_step(&mut self, index: usize, step: &Step) -> (StepOutcome, Option<String>) {
        let timeout = step.timeout.unwrap_or(self.options.command_timeout);
        match &step.kind {
            StepKind::Shell { command } => {
                (self.exec_bounded(index, command, timeout, true).await, None)
            }
            StepKind::InContainer { query, command } => {
                let id = match self.resolve_container(index, query, timeout).await {
                    Ok(id) => id,
                    Err(outcome) => return (outcome, None),
                };
                let wrapped = exec_in_container(&id, command);
                (
                    self.exec_bounded(index, &wrapped, timeout, true).await,
                    Some(id),
                )
            }
        }
    }

    /// Run one command under `timeout`. On timeout or transport failure the
    /// session is closed before returning.
    async fn exec_bounded(
        &mut self,
        index: usize,
        command: &str,
        timeout: Duration,
        stream: bool,
    ) -> StepOutcome {
        let Some(transport) = self.transport.as_mut() else {
            return StepOutcome::NotRun;
        };
        // Every exec is captured; a timed-out step reports what it printed.
        let (capture, mut captured) = mpsc::unbounded_channel();
        let mut target = StreamTarget::new(capture, index);
        if stream {
            if let Some(sink) = self.sink.clone() {
                target = target.also_to(sink);
            }
        }
        match tokio::time::timeout(timeout, transport.exec(command, Some(target))).await {
            Ok(Ok(output)) if output.success() => StepOutcome::Succeeded { output },
            Ok(Ok(output)) => StepOutcome::Failed { output },
            Ok(Err(e)) => {
                warn!(step = index, error = %e, "transport failed, closing session");
                self.close().await;
                StepOutcome::TransportFailed {
                    reason: e.to_string(),
                }
            }
            Err(_) => {
                warn!(step = index, timeout_ms = timeout.as_millis() as u64, "command timed out, closing session");
                self.close().await;
                let (stdout, stderr) = partial_output(&mut captured);
                StepOutcome::TimedOut {
                    after: timeout,
                    stdout,
                    stderr,
                }
            }
        }
    }

    /// Look up the one container matching `query`. Zero or several matches
    /// fail the step.
    async fn resolve_container(
        &mut self,
        index: usize,
        query: &ContainerQuery,
        timeout: Duration,
    ) -> Result<String, StepOutcome> {
        let lookup = query.to_command();
        debug!(step = index, %query, "resolving container");
        let lookup_failed = |reason: String| StepOutcome::LookupFailed {
            query: query.to_string(),
            reason,
        };
        let output = match self.exec_bounded(index, &lookup, timeout, false).await {
            StepOutcome::Succeeded { output } => output,
            StepOutcome::Failed { output } => {
                return Err(lookup_failed(format!(
                    "docker ps exited with status {}: {}",
                    output.exit_status,
                    output.stderr.trim()
                )));
            }
            other => return Err(other),
        };
        let containers = parse_ps_output(&output.stdout)
            .map_err(|e| lookup_failed(format!("unreadable docker ps output ({})", e)))?;
        match containers.as_slice() {
            [only] => {
                debug!(step = index, container = only.short_id(), "container resolved");
                Ok(only.id.clone())
            }
            [] => Err(lookup_failed("no container matches".to_string())),
            many => Err(lookup_failed(format!(
                "{} containers match: {}",
                many.len(),
                many.iter()
                    .map(|c| c.names.join(","))
                    .collect::<Vec<_>>()
                    .join("; ")
            ))),
        }
    }

    /// List containers matching `query` as structured rows.
    pub async fn find_containers(
        &mut self,
        query: &ContainerQuery,
    ) -> Result<Vec<ContainerSummary>, OpsError> {
        self.ensure_open()?;
        let lookup = query.to_command();
        let timeout = self.options.command_timeout;
        let outcome = self.exec_bounded(0, &lookup, timeout, false).await;
        let output = match outcome {
            StepOutcome::Succeeded { output } => output,
            StepOutcome::NotRun => {
                return Err(OpsError::SessionClosed {
                    host: self.target.host.clone(),
                });
            }
            other => {
                return Err(other
                    .to_error(&self.target, &lookup)
                    .unwrap_or_else(|| OpsError::SessionClosed {
                        host: self.target.host.clone(),
                    }));
            }
        };
        parse_ps_output(&output.stdout).map_err(|e| OpsError::ContainerLookup {
            host: self.target.host.clone(),
            query: query.to_string(),
            reason: e.to_string(),
        })
    }
}
