//! Plan file parsing.
//!
//! Two formats are accepted:
//!
//! Text command files, one command per line:
//!
//! ```text
//! # comments and blank lines are ignored
//! docker ps
//! && docker logs --tail 50 api     # runs only if the previous line succeeded
//! ```
//!
//! TOML plan files (`*.toml`):
//!
//! ```toml
//! [[step]]
//! name = "db up"
//! run = "pg_isready"
//! timeout_secs = 10
//!
//! [step.container]
//! name = "db"
//! status = "running"
//!
//! [[step]]
//! run = "docker logs --tail 20 db"
//! after_previous = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::{Plan, Step};
use crate::container::ContainerQuery;
use crate::errors::PlanError;

const DEPENDENT_PREFIX: &str = "&&";

/// Parse a text command list into steps.
pub fn parse_command_list(text: &str) -> Result<Vec<Step>, PlanError> {
    let mut steps = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (dependent, command) = match line.strip_prefix(DEPENDENT_PREFIX) {
            Some(rest) => (true, rest.trim()),
            None => (false, line),
        };
        if command.is_empty() {
            return Err(PlanError::EmptyCommand { index: steps.len() });
        }
        let step = Step::shell(command);
        steps.push(if dependent { step.after_previous() } else { step });
    }
    Ok(steps)
}

#[derive(Debug, Deserialize)]
struct PlanToml {
    #[serde(default)]
    step: Vec<StepToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepToml {
    #[serde(default)]
    name: Option<String>,
    run: String,
    #[serde(default)]
    after_previous: bool,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    container: Option<ContainerQuery>,
}

impl From<StepToml> for Step {
    fn from(raw: StepToml) -> Self {
        let mut step = match raw.container {
            Some(query) => Step::in_container(query, raw.run),
            None => Step::shell(raw.run),
        };
        step.name = raw.name;
        step.depends_on_previous = raw.after_previous;
        step.timeout = raw.timeout_secs.map(Duration::from_secs);
        step
    }
}

/// Parse a TOML plan. `path` is only used for error messages.
pub fn parse_plan_toml(text: &str, path: &Path) -> Result<Vec<Step>, PlanError> {
    let raw: PlanToml = toml::from_str(text).map_err(|e| PlanError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(raw.step.into_iter().map(Step::from).collect())
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
}

/// Load and validate a plan from `path`, choosing the format by extension.
pub fn load_plan(path: &Path) -> Result<Plan, PlanError> {
    let text = std::fs::read_to_string(path).map_err(|source| PlanError::Read {
        path: PathBuf::from(path),
        source,
    })?;
    let steps = if is_toml(path) {
        parse_plan_toml(&text, path)?
    } else {
        parse_command_list(&text)?
    };
    Plan::new(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StepKind;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_parse_command_list_skips_comments_and_blanks() {
        let text = "# check host\n\nuptime\n  df -h  \n";
        let steps = parse_command_list(text).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].command(), "uptime");
        assert_eq!(steps[1].command(), "df -h");
    }

    #[test]
    fn test_parse_command_list_dependent_prefix() {
        let text = "echo hello\nexit 1\n&& echo unreachable\n";
        let steps = parse_command_list(text).unwrap();
        assert!(!steps[1].depends_on_previous);
        assert!(steps[2].depends_on_previous);
        assert_eq!(steps[2].command(), "echo unreachable");
    }

    #[test]
    fn test_parse_command_list_rejects_bare_prefix() {
        let err = parse_command_list("ls\n&&\n").unwrap_err();
        assert!(matches!(err, PlanError::EmptyCommand { index: 1 }));
    }

    #[test]
    fn test_parse_plan_toml() {
        let text = r#"
[[step]]
name = "db ready"
run = "pg_isready"
timeout_secs = 10

[step.container]
name = "db"
status = "running"

[[step]]
run = "docker logs --tail 20 db"
after_previous = true
"#;
        let steps = parse_plan_toml(text, Path::new("plan.toml")).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].label(), "db ready");
        assert_eq!(steps[0].timeout, Some(Duration::from_secs(10)));
        match &steps[0].kind {
            StepKind::InContainer { query, command } => {
                assert_eq!(query.name.as_deref(), Some("db"));
                assert_eq!(query.status.as_deref(), Some("running"));
                assert!(query.ancestor.is_none());
                assert_eq!(command, "pg_isready");
            }
            other => panic!("expected container step, got {:?}", other),
        }
        assert!(steps[1].depends_on_previous);
        assert!(matches!(steps[1].kind, StepKind::Shell { .. }));
    }

    #[test]
    fn test_parse_plan_toml_rejects_unknown_keys() {
        let text = "[[step]]\nrun = \"ls\"\ndepends = true\n";
        let err = parse_plan_toml(text, Path::new("p.toml")).unwrap_err();
        assert!(matches!(err, PlanError::Parse { .. }));
    }

    #[test]
    fn test_load_plan_by_extension() {
        let dir = tempdir().unwrap();
        let txt = dir.path().join("steps.txt");
        fs::write(&txt, "echo a\n&& echo b\n").unwrap();
        let plan = load_plan(&txt).unwrap();
        assert_eq!(plan.len(), 2);

        let toml_path = dir.path().join("steps.TOML");
        fs::write(&toml_path, "[[step]]\nrun = \"echo a\"\n").unwrap();
        let plan = load_plan(&toml_path).unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_load_plan_missing_file() {
        let dir = tempdir().unwrap();
        let err = load_plan(&dir.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, PlanError::Read { .. }));
    }

    #[test]
    fn test_load_plan_validates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        fs::write(&path, "# nothing here\n").unwrap();
        assert!(matches!(load_plan(&path), Err(PlanError::Empty)));
    }
}
