//! Terminal rendering of session results.
//!
//! One summary line per step, followed by the step's output: stdout for
//! successful steps, stdout and stderr for failed ones. Live output, when
//! streamed, is printed line by line with a `[n]` prefix instead.

use std::collections::HashMap;
use std::io::Write;

use console::style;

use crate::container::ContainerSummary;
use crate::errors::Severity;
use crate::session::{SessionReport, StepOutcome, StepReport};
use crate::target::HostTarget;
use crate::transport::{OutputChunk, OutputStream};
use crate::ui::icons::{BLOCKED, CHECK, CLOCK, CROSS, LINK, PLUG, SEARCH, SKIP};
use crate::util::truncate_command;

const LABEL_WIDTH: usize = 60;

fn format_duration_ms(ms: u64) -> String {
    if ms >= 60_000 {
        format!("{}m {}s", ms / 60_000, (ms % 60_000) / 1000)
    } else if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}ms", ms)
    }
}

/// The one-line summary for a step, e.g. `✅ [1] echo hello (12ms)`.
pub fn step_line(step: &StepReport) -> String {
    let label = truncate_command(&step.label, LABEL_WIDTH);
    let number = format!("[{}]", step.index + 1);
    match &step.outcome {
        StepOutcome::Succeeded { .. } => format!(
            "{}{} {} {}",
            CHECK,
            style(number).dim(),
            label,
            style(format!("({})", format_duration_ms(step.duration_ms))).dim()
        ),
        StepOutcome::Failed { output } => format!(
            "{}{} {} {}",
            CROSS,
            style(number).dim(),
            label,
            style(format!("exit {}", output.exit_status)).red().bold()
        ),
        StepOutcome::TimedOut { after, .. } => format!(
            "{}{} {} {}",
            CLOCK,
            style(number).dim(),
            label,
            style(format!(
                "timed out after {}; session closed",
                format_duration_ms(u64::try_from(after.as_millis()).unwrap_or(u64::MAX))
            ))
            .red()
            .bold()
        ),
        StepOutcome::LookupFailed { query, reason } => format!(
            "{}{} {} {}",
            SEARCH,
            style(number).dim(),
            label,
            style(format!("container {}: {}", query, reason)).red()
        ),
        StepOutcome::TransportFailed { reason } => format!(
            "{}{} {} {}",
            PLUG,
            style(number).dim(),
            label,
            style(format!("connection lost: {}", reason)).red().bold()
        ),
        StepOutcome::Skipped { blocked_by } => format!(
            "{}{} {} {}",
            SKIP,
            style(number).dim(),
            style(label).dim(),
            style(format!("skipped: step {} did not succeed", blocked_by + 1)).yellow()
        ),
        StepOutcome::NotRun => format!(
            "{}{} {} {}",
            BLOCKED,
            style(number).dim(),
            style(label).dim(),
            style("not run").dim()
        ),
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|l| format!("    {}", l))
        .collect::<Vec<_>>()
        .join("\n")
}

fn print_streams(stdout: &str, stderr: &str) {
    if !stdout.trim().is_empty() {
        println!("  {}", style("stdout:").dim());
        println!("{}", indent(stdout.trim_end()));
    }
    if !stderr.trim().is_empty() {
        println!("  {}", style("stderr:").dim());
        println!("{}", indent(stderr.trim_end()));
    }
}

/// Prints step results and run summaries.
pub struct ReportPrinter {
    /// Output was already shown live; only summary lines are printed.
    streamed: bool,
}

impl ReportPrinter {
    pub fn new(streamed: bool) -> Self {
        Self { streamed }
    }

    pub fn print_connected(&self, target: &HostTarget) {
        eprintln!("{}{}", LINK, style(format!("connected to {}", target)).dim());
    }

    pub fn print_step(&self, step: &StepReport) {
        println!("{}", step_line(step));
        if self.streamed {
            return;
        }
        match &step.outcome {
            StepOutcome::Succeeded { output } => {
                if !output.stdout.trim().is_empty() {
                    println!("{}", indent(output.stdout.trim_end()));
                }
            }
            StepOutcome::Failed { output } => print_streams(&output.stdout, &output.stderr),
            StepOutcome::TimedOut { stdout, stderr, .. } => print_streams(stdout, stderr),
            _ => {}
        }
    }

    pub fn print_report(&self, report: &SessionReport) {
        for step in &report.steps {
            self.print_step(step);
        }
        println!();
        println!("{}", summary_line(report));
    }

    pub fn print_json(&self, report: &SessionReport) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(report)?;
        println!("{}", json);
        Ok(())
    }
}

/// Counts per outcome and the resulting exit code.
pub fn summary_line(report: &SessionReport) -> String {
    let mut ok = 0;
    let mut failed = 0;
    let mut skipped = 0;
    for step in &report.steps {
        match step.outcome {
            StepOutcome::Succeeded { .. } => ok += 1,
            StepOutcome::Skipped { .. } | StepOutcome::NotRun => skipped += 1,
            _ => failed += 1,
        }
    }
    let severity = report.severity();
    let text = format!(
        "{} steps: {} ok, {} failed, {} not run (exit {})",
        report.steps.len(),
        ok,
        failed,
        skipped,
        severity.exit_code()
    );
    match severity {
        Severity::Success => style(text).green().to_string(),
        _ => style(text).red().bold().to_string(),
    }
}

/// Render containers as an aligned table.
pub fn containers_table(containers: &[ContainerSummary]) -> String {
    let mut rows = vec![[
        "CONTAINER ID".to_string(),
        "NAMES".to_string(),
        "IMAGE".to_string(),
        "STATE".to_string(),
        "STATUS".to_string(),
    ]];
    for c in containers {
        rows.push([
            c.short_id().to_string(),
            c.names.join(","),
            c.image.clone(),
            c.state.clone(),
            c.status.clone(),
        ]);
    }
    let mut widths = [0usize; 5];
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }
    rows.iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
                .collect::<Vec<_>>()
                .join("   ")
                .trim_end()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prints live output with a `[n]` step prefix, one complete line at a time.
#[derive(Debug, Default)]
pub struct StreamPrinter {
    pending: HashMap<(usize, OutputStream), String>,
}

impl StreamPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer `chunk` and return the complete lines it finished, prefixed.
    /// Partial lines of earlier steps are emitted first, since those steps
    /// have ended.
    pub fn push(&mut self, chunk: &OutputChunk) -> Vec<(OutputStream, String)> {
        let mut lines = self.flush_where(|step| step < chunk.step);
        let buffer = self
            .pending
            .entry((chunk.step, chunk.stream))
            .or_default();
        buffer.push_str(&chunk.data);
        while let Some(pos) = buffer.find('\n') {
            let line: String = buffer.drain(..=pos).collect();
            lines.push((
                chunk.stream,
                format!("[{}] {}", chunk.step + 1, line.trim_end_matches('\n')),
            ));
        }
        lines
    }

    /// Return any trailing partial lines.
    pub fn flush(&mut self) -> Vec<(OutputStream, String)> {
        self.flush_where(|_| true)
    }

    fn flush_where(&mut self, done: impl Fn(usize) -> bool) -> Vec<(OutputStream, String)> {
        let mut keys: Vec<_> = self
            .pending
            .keys()
            .copied()
            .filter(|(step, _)| done(*step))
            .collect();
        keys.sort_by_key(|(step, stream)| (*step, *stream == OutputStream::Stderr));
        keys.into_iter()
            .filter_map(|key| {
                let rest = self.pending.remove(&key)?;
                (!rest.is_empty()).then(|| (key.1, format!("[{}] {}", key.0 + 1, rest)))
            })
            .collect()
    }

    pub fn print(lines: Vec<(OutputStream, String)>) {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        for (stream, line) in lines {
            // Ignore broken pipes; the report still decides the exit code.
            let _ = match stream {
                OutputStream::Stdout => writeln!(stdout.lock(), "{}", line),
                OutputStream::Stderr => writeln!(stderr.lock(), "{}", style(line).dim()),
            };
        }
    }
}
