//! Per-step and per-run results.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::{OpsError, Severity, TransportError};
use crate::plan::Step;
use crate::target::HostTarget;
use crate::transport::CommandOutput;

/// What happened to one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Ran to completion with exit status 0.
    Succeeded { output: CommandOutput },
    /// Ran to completion with a non-zero exit status.
    Failed { output: CommandOutput },
    /// No completion signal within the bound; the session was closed.
    /// Carries whatever output arrived before the deadline.
    TimedOut {
        after: Duration,
        stdout: String,
        stderr: String,
    },
    /// The container query matched zero or several containers.
    LookupFailed { query: String, reason: String },
    /// The transport failed mid-run; the session was closed.
    TransportFailed { reason: String },
    /// Not executed because the step it depends on did not succeed.
    Skipped { blocked_by: usize },
    /// Not executed because the session closed earlier in the run.
    NotRun,
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded { .. })
    }

    /// Whether a command was actually started for this step.
    pub fn ran(&self) -> bool {
        !matches!(self, StepOutcome::Skipped { .. } | StepOutcome::NotRun)
    }

    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            StepOutcome::Succeeded { output } | StepOutcome::Failed { output } => Some(output),
            _ => None,
        }
    }

    /// Skipped and not-run steps are consequences of an earlier failure that
    /// is already counted, so they do not raise the severity themselves.
    pub fn severity(&self) -> Severity {
        match self {
            StepOutcome::Succeeded { .. } | StepOutcome::Skipped { .. } | StepOutcome::NotRun => {
                Severity::Success
            }
            StepOutcome::Failed { .. } | StepOutcome::LookupFailed { .. } => {
                Severity::CommandFailed
            }
            StepOutcome::TimedOut { .. } => Severity::TimedOut,
            StepOutcome::TransportFailed { .. } => Severity::ConnectionFailed,
        }
    }

    /// The error this outcome represents, with host and command context.
    pub fn to_error(&self, target: &HostTarget, command: &str) -> Option<OpsError> {
        match self {
            StepOutcome::Failed { output } => Some(OpsError::Command {
                host: target.host.clone(),
                command: command.to_string(),
                exit_status: output.exit_status,
                stderr: output.stderr.clone(),
            }),
            StepOutcome::TimedOut { after, .. } => Some(OpsError::Timeout {
                host: target.host.clone(),
                command: command.to_string(),
                after: *after,
            }),
            StepOutcome::LookupFailed { query, reason } => Some(OpsError::ContainerLookup {
                host: target.host.clone(),
                query: query.clone(),
                reason: reason.clone(),
            }),
            StepOutcome::TransportFailed { reason } => Some(OpsError::Connection {
                host: target.host.clone(),
                port: target.port,
                source: TransportError::Lost(reason.clone()),
            }),
            _ => None,
        }
    }
}

/// Result of one step of a plan.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub label: String,
    pub command: String,
    /// Container the step ran in, for container steps that resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(flatten)]
    pub outcome: StepOutcome,
    pub duration_ms: u64,
}

impl StepReport {
    pub fn new(index: usize, step: &Step, outcome: StepOutcome) -> Self {
        Self {
            index,
            label: step.label().to_string(),
            command: step.command().to_string(),
            container: None,
            outcome,
            duration_ms: 0,
        }
    }

    pub fn with_container(mut self, container: Option<String>) -> Self {
        self.container = container;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Result of running a plan on one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub run_id: Uuid,
    pub target: HostTarget,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<StepReport>,
}

impl SessionReport {
    pub fn new(target: HostTarget) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            target,
            started_at: Utc::now(),
            steps: Vec::new(),
        }
    }

    pub fn push(&mut self, step: StepReport) {
        self.steps.push(step);
    }

    /// Worst severity across all steps.
    pub fn severity(&self) -> Severity {
        self.steps
            .iter()
            .map(|s| s.outcome.severity())
            .max()
            .unwrap_or(Severity::Success)
    }

    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|s| s.outcome.is_success())
    }

    pub fn exit_code(&self) -> u8 {
        self.severity().exit_code()
    }

    /// Every failure in the run, in step order.
    pub fn errors(&self) -> Vec<OpsError> {
        self.steps
            .iter()
            .filter_map(|s| s.outcome.to_error(&self.target, &s.command))
            .collect()
    }

    /// Number of steps that started a command.
    pub fn executed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.outcome.ran()).count()
    }
}
