//! Ordered command plans.
//!
//! A `Plan` is the explicit replacement for nested completion callbacks: an
//! ordered list of steps, each optionally declaring that it depends on the
//! success of the step before it. The session executes it with one loop.

pub mod parser;

use std::time::Duration;

use serde::Serialize;

use crate::container::ContainerQuery;
use crate::errors::PlanError;

pub use parser::{load_plan, parse_command_list, parse_plan_toml};

/// What a step runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// A shell command run directly on the host.
    Shell { command: String },
    /// A shell command run inside the single container matching `query`.
    InContainer {
        query: ContainerQuery,
        command: String,
    },
}

/// One entry of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub kind: StepKind,
    /// Skip this step unless the previous step succeeded.
    pub depends_on_previous: bool,
    /// Overrides the session's command timeout for this step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl Step {
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            name: None,
            kind: StepKind::Shell {
                command: command.into(),
            },
            depends_on_previous: false,
            timeout: None,
        }
    }

    pub fn in_container(query: ContainerQuery, command: impl Into<String>) -> Self {
        Self {
            name: None,
            kind: StepKind::InContainer {
                query,
                command: command.into(),
            },
            depends_on_previous: false,
            timeout: None,
        }
    }

    /// Mark the step as dependent on its predecessor.
    pub fn after_previous(mut self) -> Self {
        self.depends_on_previous = true;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The user-supplied command text.
    pub fn command(&self) -> &str {
        match &self.kind {
            StepKind::Shell { command } | StepKind::InContainer { command, .. } => command,
        }
    }

    /// Name if given, otherwise the command text.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.command())
    }
}

/// A validated, ordered list of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    /// Validate and wrap `steps`.
    ///
    /// Rejects empty plans, empty commands, a dependent first step and
    /// container steps without any filter.
    pub fn new(steps: Vec<Step>) -> Result<Self, PlanError> {
        if steps.is_empty() {
            return Err(PlanError::Empty);
        }
        if steps[0].depends_on_previous {
            return Err(PlanError::FirstStepDependent);
        }
        for (index, step) in steps.iter().enumerate() {
            if step.command().trim().is_empty() {
                return Err(PlanError::EmptyCommand { index });
            }
            if let StepKind::InContainer { query, .. } = &step.kind {
                if query.is_empty() {
                    return Err(PlanError::EmptyContainerQuery { index });
                }
            }
        }
        Ok(Self { steps })
    }

    /// Build a plan of shell steps. With `chain`, every step after the first
    /// depends on its predecessor.
    pub fn from_commands<I, S>(commands: I, chain: bool) -> Result<Self, PlanError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let steps = commands.into_iter().map(Step::shell).collect();
        let plan = Self::new(steps)?;
        Ok(if chain { plan.chained() } else { plan })
    }

    /// Mark every step after the first as dependent.
    pub fn chained(mut self) -> Self {
        for step in self.steps.iter_mut().skip(1) {
            step.depends_on_previous = true;
        }
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_rejects_empty() {
        assert!(matches!(Plan::new(vec![]), Err(PlanError::Empty)));
    }

    #[test]
    fn test_plan_rejects_dependent_first_step() {
        let result = Plan::new(vec![Step::shell("echo hi").after_previous()]);
        assert!(matches!(result, Err(PlanError::FirstStepDependent)));
    }

    #[test]
    fn test_plan_rejects_blank_command() {
        let result = Plan::new(vec![Step::shell("ls"), Step::shell("   ")]);
        assert!(matches!(result, Err(PlanError::EmptyCommand { index: 1 })));
    }

    #[test]
    fn test_plan_rejects_unfiltered_container_query() {
        let result = Plan::new(vec![Step::in_container(ContainerQuery::default(), "ls")]);
        assert!(matches!(
            result,
            Err(PlanError::EmptyContainerQuery { index: 0 })
        ));
    }

    #[test]
    fn test_from_commands_chain() {
        let plan = Plan::from_commands(["a", "b", "c"], true).unwrap();
        let deps: Vec<bool> = plan.steps().iter().map(|s| s.depends_on_previous).collect();
        assert_eq!(deps, vec![false, true, true]);
    }

    #[test]
    fn test_from_commands_unchained() {
        let plan = Plan::from_commands(vec!["a".to_string(), "b".to_string()], false).unwrap();
        assert!(plan.steps().iter().all(|s| !s.depends_on_previous));
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_step_label_prefers_name() {
        let step = Step::shell("docker ps").with_name("list containers");
        assert_eq!(step.label(), "list containers");
        assert_eq!(step.command(), "docker ps");
        assert_eq!(Step::shell("uptime").label(), "uptime");
    }
}
