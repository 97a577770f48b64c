//! Typed container discovery.
//!
//! A `ContainerQuery` renders to a `docker ps` invocation that emits one JSON
//! object per container; `parse_ps_output` turns that into `ContainerSummary`
//! values. Lookups run fresh every time they are needed and never fall back
//! to a remembered identifier.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::shell_quote;

/// Filters for `docker ps`. At least one filter must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerQuery {
    /// Container name filter (docker matches substrings)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Image the container was created from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ancestor: Option<String>,
    /// Container status, e.g. `running`, `exited`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl ContainerQuery {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_ancestor(mut self, ancestor: impl Into<String>) -> Self {
        self.ancestor = Some(ancestor.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.ancestor.is_none() && self.status.is_none()
    }

    fn filters(&self) -> Vec<(&'static str, &str)> {
        let mut filters = Vec::new();
        if let Some(name) = &self.name {
            filters.push(("name", name.as_str()));
        }
        if let Some(ancestor) = &self.ancestor {
            filters.push(("ancestor", ancestor.as_str()));
        }
        if let Some(status) = &self.status {
            filters.push(("status", status.as_str()));
        }
        filters
    }

    /// Render the `docker ps` command for this query.
    ///
    /// Stopped containers are only listed (`-a`) when the status filter asks
    /// for a state other than `running`.
    pub fn to_command(&self) -> String {
        let mut cmd = String::from("docker ps");
        if self.status.as_deref().is_some_and(|s| s != "running") {
            cmd.push_str(" -a");
        }
        cmd.push_str(" --no-trunc");
        for (key, value) in self.filters() {
            cmd.push_str(" --filter ");
            cmd.push_str(&shell_quote(&format!("{}={}", key, value)));
        }
        cmd.push_str(" --format '{{json .}}'");
        cmd
    }
}

impl fmt::Display for ContainerQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .filters()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        if parts.is_empty() {
            f.write_str("<any>")
        } else {
            f.write_str(&parts.join(","))
        }
    }
}

/// One container row from `docker ps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub state: String,
    pub status: String,
}

impl ContainerSummary {
    /// First 12 characters of the ID, as docker prints it.
    pub fn short_id(&self) -> &str {
        let end = self.id.len().min(12);
        &self.id[..end]
    }
}

/// Raw row shape of `docker ps --format '{{json .}}'`.
#[derive(Debug, Deserialize)]
struct PsRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Status", default)]
    status: String,
}

impl From<PsRow> for ContainerSummary {
    fn from(row: PsRow) -> Self {
        Self {
            id: row.id,
            names: row
                .names
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect(),
            image: row.image,
            state: row.state,
            status: row.status,
        }
    }
}

#[derive(Debug, Error)]
#[error("line {line}: {message}")]
pub struct ContainerParseError {
    pub line: usize,
    pub message: String,
}

/// Parse `docker ps --format '{{json .}}'` output, one object per line.
pub fn parse_ps_output(output: &str) -> Result<Vec<ContainerSummary>, ContainerParseError> {
    output
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str::<PsRow>(line.trim())
                .map(ContainerSummary::from)
                .map_err(|e| ContainerParseError {
                    line: idx + 1,
                    message: e.to_string(),
                })
        })
        .collect()
}

/// Wrap `command` so it runs inside the container via `docker exec`.
pub fn exec_in_container(container_id: &str, command: &str) -> String {
    format!(
        "docker exec {} sh -c {}",
        shell_quote(container_id),
        shell_quote(command)
    )
}
