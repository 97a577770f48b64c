use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::process::ExitCode;

use remote_ops::config::CliOverrides;
use remote_ops::errors::EXIT_CONFIG_ERROR;
use remote_ops::logging;

mod cmd;

#[derive(Parser)]
#[command(name = "remote-ops")]
#[command(
    version,
    about = "Run ordered, dependency-aware command sequences on a remote host"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding .remote-ops/remote-ops.toml and .env (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where to connect. Secrets are never accepted as flags.
#[derive(Args, Clone, Debug, Default)]
pub struct TargetArgs {
    /// Remote host address
    #[arg(long)]
    pub host: Option<String>,

    /// SSH port (default 22)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Login user
    #[arg(short, long)]
    pub user: Option<String>,

    /// Private key for public-key auth; passphrase is read from REMOTE_OPS_KEY_PASSPHRASE
    #[arg(short = 'i', long, value_name = "PATH")]
    pub identity: Option<PathBuf>,

    /// Name of the environment variable holding the SSH password
    #[arg(long, value_name = "VAR")]
    pub password_env: Option<String>,

    /// Seconds allowed for connecting and authenticating
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Run on the local machine with `sh -c` instead of over SSH
    #[arg(long)]
    pub local: bool,
}

#[derive(Args, Clone, Debug, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Command to run (repeatable; runs after positional commands)
    #[arg(short = 'c', long = "command", value_name = "CMD")]
    pub commands: Vec<String>,

    /// Commands to run, in order
    #[arg(value_name = "CMD")]
    pub positional: Vec<String>,

    /// Read steps from a file: `*.toml` plan, or one command per line
    #[arg(short, long, value_name = "PATH", conflicts_with_all = ["commands", "positional"])]
    pub file: Option<PathBuf>,

    /// Make every step depend on the success of the one before it
    #[arg(long)]
    pub chain: bool,

    /// Seconds allowed for each command
    #[arg(short, long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Print command output live, prefixed with the step number
    #[arg(long)]
    pub stream: bool,

    /// Print the run report as JSON
    #[arg(long, conflicts_with = "stream")]
    pub json: bool,
}

impl RunArgs {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            command_timeout_secs: self.timeout,
            chain: self.chain,
            ..self.target.overrides()
        }
    }

    /// Positional commands first, then `-c` commands.
    pub fn all_commands(&self) -> Vec<String> {
        self.positional
            .iter()
            .chain(self.commands.iter())
            .cloned()
            .collect()
    }
}

#[derive(Args, Clone, Debug, Default)]
pub struct ContainersArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Container name filter
    #[arg(long)]
    pub name: Option<String>,

    /// Image the container was created from
    #[arg(long)]
    pub ancestor: Option<String>,

    /// Container status (running, exited, ...)
    #[arg(long)]
    pub status: Option<String>,

    /// Print matches as JSON
    #[arg(long)]
    pub json: bool,
}

impl TargetArgs {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            identity: self.identity.clone(),
            password_env: self.password_env.clone(),
            connect_timeout_secs: self.connect_timeout,
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run commands in order on one session
    Run(RunArgs),
    /// List containers on the host matching name/ancestor/status filters
    Containers(ContainersArgs),
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default remote-ops.toml file
    Init,
}

async fn dispatch(cli: &Cli) -> Result<u8> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // Existing environment variables win over .env entries.
    let dotenv = project_dir.join(".env");
    if dotenv.exists() {
        dotenvy::from_path(&dotenv)
            .with_context(|| format!("Failed to load {}", dotenv.display()))?;
    }

    match &cli.command {
        Commands::Run(args) => cmd::cmd_run(&project_dir, args).await,
        Commands::Containers(args) => cmd::cmd_containers(&project_dir, args).await,
        Commands::Config { command } => {
            cmd::cmd_config(&project_dir, command.clone())?;
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match dispatch(&cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}
