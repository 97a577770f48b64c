//! CLI command implementations.
//!
//! | Module       | Commands handled |
//! |--------------|------------------|
//! | `run`        | `Run`            |
//! | `containers` | `Containers`     |
//! | `config`     | `Config`         |

pub mod config;
pub mod containers;
pub mod run;

pub use config::cmd_config;
pub use containers::cmd_containers;
pub use run::cmd_run;

use anyhow::Result;
use console::style;

use remote_ops::config::{CliOverrides, OpsConfig};
use remote_ops::errors::OpsError;
use remote_ops::session::{RemoteSession, SessionOptions};
use remote_ops::target::{Credential, HostTarget};
use remote_ops::transport::{LocalConnector, SshConnector};
use remote_ops::ui::icons::PLUG;

use super::TargetArgs;

/// Open a session for `target`.
///
/// The outer error is a configuration problem (no host, no credential);
/// the inner one is a failed connection attempt.
pub(crate) async fn open_session(
    config: &OpsConfig,
    target: &TargetArgs,
    overrides: &CliOverrides,
    options: SessionOptions,
) -> Result<Result<RemoteSession, OpsError>> {
    if target.local {
        let session = RemoteSession::connect(
            &LocalConnector::new(),
            HostTarget::local(),
            &Credential::None,
            options,
        )
        .await;
        return Ok(session);
    }

    let host = config.resolve_target(overrides)?;
    let credential = config.resolve_credential(overrides)?;
    let connector = SshConnector::new(options.connect_timeout);
    Ok(RemoteSession::connect(&connector, host, &credential, options).await)
}

/// Print a failed connection and return its exit code.
pub(crate) fn report_failure(err: &OpsError) -> u8 {
    eprintln!("{}{}", PLUG, style(err).red().bold());
    err.severity().exit_code()
}
