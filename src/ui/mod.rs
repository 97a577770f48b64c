pub mod icons;
pub mod report;

pub use report::{ReportPrinter, StreamPrinter, containers_table, step_line, summary_line};
