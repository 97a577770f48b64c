//! Command sequencing: `remote-ops run`.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use remote_ops::config::OpsConfig;
use remote_ops::plan::{Plan, load_plan};
use remote_ops::transport::OutputChunk;
use remote_ops::ui::{ReportPrinter, StreamPrinter};

use super::{open_session, report_failure};
use crate::RunArgs;

fn build_plan(args: &RunArgs, chain: bool) -> Result<Plan> {
    let plan = match &args.file {
        Some(path) => load_plan(path)?,
        None => Plan::from_commands(args.all_commands(), false)
            .context("Nothing to run: pass commands, -c CMD or --file PATH")?,
    };
    Ok(if chain { plan.chained() } else { plan })
}

pub async fn cmd_run(project_dir: &Path, args: &RunArgs) -> Result<u8> {
    let config = OpsConfig::new(project_dir.to_path_buf())?;
    let overrides = args.overrides();
    let plan = build_plan(args, config.chain(&overrides))?;
    let options = config.session_options(&overrides);

    let mut session = match open_session(&config, &args.target, &overrides, options).await? {
        Ok(session) => session,
        Err(err) => return Ok(report_failure(&err)),
    };

    let printer = ReportPrinter::new(args.stream);
    if !args.json {
        printer.print_connected(session.target());
    }

    let mut stream_task = None;
    if args.stream {
        let (tx, mut rx) = mpsc::unbounded_channel::<OutputChunk>();
        session = session.with_output_sink(tx);
        stream_task = Some(tokio::spawn(async move {
            let mut lines = StreamPrinter::new();
            while let Some(chunk) = rx.recv().await {
                StreamPrinter::print(lines.push(&chunk));
            }
            StreamPrinter::print(lines.flush());
        }));
    }

    let result = session.run(&plan).await;
    session.close().await;
    // Dropping the session drops the sink, which ends the stream task.
    drop(session);
    if let Some(task) = stream_task {
        task.await.context("Output stream task failed")?;
    }

    let report = match result {
        Ok(report) => report,
        Err(err) => return Ok(report_failure(&err)),
    };

    if args.json {
        printer.print_json(&report)?;
    } else {
        if args.stream {
            println!();
        }
        printer.print_report(&report);
    }

    for err in report.errors() {
        tracing::debug!(error = %err, "step did not succeed");
    }
    Ok(report.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote_ops::errors::PlanError;
    use std::fs;
    use tempfile::tempdir;

    fn args(commands: &[&str]) -> RunArgs {
        RunArgs {
            positional: commands.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_plan_orders_positional_before_flags() {
        let mut a = args(&["echo one"]);
        a.commands = vec!["echo two".to_string()];
        let plan = build_plan(&a, false).unwrap();
        let commands: Vec<&str> = plan.steps().iter().map(|s| s.command()).collect();
        assert_eq!(commands, vec!["echo one", "echo two"]);
    }

    #[test]
    fn test_build_plan_chain_marks_later_steps() {
        let plan = build_plan(&args(&["a", "b", "c"]), true).unwrap();
        let deps: Vec<bool> = plan.steps().iter().map(|s| s.depends_on_previous).collect();
        assert_eq!(deps, vec![false, true, true]);
    }

    #[test]
    fn test_build_plan_requires_commands() {
        let err = build_plan(&args(&[]), false).unwrap_err();
        assert!(err.to_string().contains("Nothing to run"));
        assert!(matches!(err.downcast_ref::<PlanError>(), Some(PlanError::Empty)));
    }

    #[test]
    fn test_build_plan_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("steps.txt");
        fs::write(&path, "echo hello\n&& echo next\n").unwrap();
        let a = RunArgs {
            file: Some(path),
            ..Default::default()
        };
        let plan = build_plan(&a, false).unwrap();
        assert_eq!(plan.len(), 2);
        assert!(plan.steps()[1].depends_on_previous);
    }
}
