//! Configuration view and validation commands: `remote-ops config`.

use std::path::Path;

use anyhow::Result;

use remote_ops::config::{CliOverrides, OpsConfig, RemoteOpsToml};

use crate::ConfigCommands;

fn print_toml(toml: &RemoteOpsToml) {
    println!("[target]");
    match &toml.target.host {
        Some(host) => println!("  host = \"{}\"", host),
        None => println!("  host = (unset)"),
    }
    if let Some(port) = toml.target.port {
        println!("  port = {}", port);
    }
    match &toml.target.user {
        Some(user) => println!("  user = \"{}\"", user),
        None => println!("  user = (unset)"),
    }
    if let Some(identity) = &toml.target.identity_file {
        println!("  identity_file = \"{}\"", identity.display());
    }
    println!();

    println!("[defaults]");
    println!(
        "  command_timeout_secs = {}",
        toml.defaults.command_timeout_secs
    );
    println!(
        "  connect_timeout_secs = {}",
        toml.defaults.connect_timeout_secs
    );
    println!("  password_env = \"{}\"", toml.defaults.password_env);
    println!("  chain = {}", toml.defaults.chain);
    println!();
}

fn print_effective(config: &OpsConfig) {
    let cli = CliOverrides::default();
    println!("Effective values (with env overrides):");
    match config.resolve_target(&cli) {
        Ok(target) => println!("  target = {}", target),
        Err(e) => println!("  target = (unresolved: {})", e),
    }
    let var = config.password_env(&cli);
    let set = std::env::var(&var).map(|v| !v.is_empty()).unwrap_or(false);
    println!(
        "  password = {} ({})",
        var,
        if set { "set" } else { "not set" }
    );
    let options = config.session_options(&cli);
    println!("  command_timeout = {}s", options.command_timeout.as_secs());
    println!("  connect_timeout = {}s", options.connect_timeout.as_secs());
    println!();
}

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config = OpsConfig::new(project_dir.to_path_buf())?;
    let config_path = config.config_path();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("remote-ops Configuration");
            println!("========================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No remote-ops.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();
            print_toml(&config.toml);
            print_effective(&config);

            if !config_path.exists() {
                println!("Run 'remote-ops config init' to create a remote-ops.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No remote-ops.toml found. Using defaults.");
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!(
                    "remote-ops.toml already exists at {}",
                    config_path.display()
                );
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !config.config_dir.exists() {
                std::fs::create_dir_all(&config.config_dir)?;
            }

            RemoteOpsToml::default().save(&config_path)?;

            println!("Created remote-ops.toml at {}", config_path.display());
            println!();
            println!("You can now set:");
            println!("  - [target] host, port, user, identity_file");
            println!("  - [defaults] command_timeout_secs, connect_timeout_secs, password_env, chain");
            println!();
            println!(
                "Passwords are never stored in this file; export {} instead.",
                config.password_env(&CliOverrides::default())
            );
            println!();
        }
    }

    Ok(())
}
