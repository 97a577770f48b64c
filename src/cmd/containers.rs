//! Container discovery: `remote-ops containers`.

use std::path::Path;

use anyhow::{Result, bail};
use console::style;

use remote_ops::config::OpsConfig;
use remote_ops::container::ContainerQuery;
use remote_ops::ui::containers_table;

use super::{open_session, report_failure};
use crate::ContainersArgs;

fn build_query(args: &ContainersArgs) -> ContainerQuery {
    ContainerQuery {
        name: args.name.clone(),
        ancestor: args.ancestor.clone(),
        status: args.status.clone(),
    }
}

pub async fn cmd_containers(project_dir: &Path, args: &ContainersArgs) -> Result<u8> {
    let query = build_query(args);
    if query.is_empty() {
        bail!("Give at least one of --name, --ancestor or --status");
    }

    let config = OpsConfig::new(project_dir.to_path_buf())?;
    let overrides = args.target.overrides();
    let options = config.session_options(&overrides);

    let mut session = match open_session(&config, &args.target, &overrides, options).await? {
        Ok(session) => session,
        Err(err) => return Ok(report_failure(&err)),
    };

    let result = session.find_containers(&query).await;
    session.close().await;

    let containers = match result {
        Ok(containers) => containers,
        Err(err) => {
            eprintln!("{}", style(&err).red().bold());
            return Ok(err.severity().exit_code());
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&containers)?);
    } else if containers.is_empty() {
        eprintln!("No containers match {}", query);
    } else {
        println!("{}", containers_table(&containers));
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_query_copies_filters() {
        let args = ContainersArgs {
            name: Some("db".to_string()),
            status: Some("running".to_string()),
            ..Default::default()
        };
        let query = build_query(&args);
        assert_eq!(query, ContainerQuery::by_name("db").with_status("running"));
    }

    #[test]
    fn test_build_query_empty_without_filters() {
        assert!(build_query(&ContainersArgs::default()).is_empty());
    }
}
