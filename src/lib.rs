pub mod config;
pub mod container;
pub mod errors;
pub mod logging;
pub mod plan;
pub mod session;
pub mod target;
pub mod transport;
pub mod ui;
pub mod util;

pub use errors::{OpsError, PlanError, Severity, TransportError};
pub use plan::{Plan, Step, StepKind};
pub use session::{RemoteSession, SessionOptions, SessionReport, StepOutcome};
pub use target::{Credential, HostTarget};
