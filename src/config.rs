//! Layered configuration for remote-ops.
//!
//! Reads `.remote-ops/remote-ops.toml` from the project directory, then
//! applies environment variables, then CLI flags:
//!
//! ```toml
//! [target]
//! host = "203.0.113.10"
//! port = 22
//! user = "deploy"
//! identity_file = "~/.ssh/id_ed25519"
//!
//! [defaults]
//! command_timeout_secs = 120
//! connect_timeout_secs = 15
//! password_env = "REMOTE_OPS_PASSWORD"
//! chain = false
//! ```
//!
//! Secrets are never read from the file or from flags. The password comes
//! from the environment variable named by `password_env`, the key passphrase
//! from `REMOTE_OPS_KEY_PASSPHRASE`.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::SessionOptions;
use crate::target::{Credential, DEFAULT_SSH_PORT, HostTarget};

pub const CONFIG_DIR: &str = ".remote-ops";
pub const CONFIG_FILE: &str = "remote-ops.toml";

pub const ENV_HOST: &str = "REMOTE_OPS_HOST";
pub const ENV_PORT: &str = "REMOTE_OPS_PORT";
pub const ENV_USER: &str = "REMOTE_OPS_USER";
pub const ENV_KEY_PASSPHRASE: &str = "REMOTE_OPS_KEY_PASSPHRASE";
pub const DEFAULT_PASSWORD_ENV: &str = "REMOTE_OPS_PASSWORD";

/// `[target]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Private key for public-key auth. `~/` is expanded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
}

/// `[defaults]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultsSection {
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Name of the environment variable holding the SSH password
    #[serde(default = "default_password_env")]
    pub password_env: String,
    /// Make every step depend on the one before it
    #[serde(default)]
    pub chain: bool,
}

fn default_command_timeout_secs() -> u64 {
    120
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_password_env() -> String {
    DEFAULT_PASSWORD_ENV.to_string()
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            password_env: default_password_env(),
            chain: false,
        }
    }
}

/// The complete remote-ops.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteOpsToml {
    #[serde(default)]
    pub target: TargetSection,
    #[serde(default)]
    pub defaults: DefaultsSection,
}

impl RemoteOpsToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse remote-ops.toml")
    }

    /// Load from `config_dir/remote-ops.toml`, or defaults if it does not exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize remote-ops.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Return human-readable warnings; an empty list means the file is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.target.host.is_none() {
            warnings.push(format!(
                "target.host is not set; pass --host or set {}",
                ENV_HOST
            ));
        }
        if self.target.user.is_none() {
            warnings.push(format!(
                "target.user is not set; pass --user or set {}",
                ENV_USER
            ));
        }
        if self.target.port == Some(0) {
            warnings.push("target.port must be between 1 and 65535".to_string());
        }
        if self.defaults.command_timeout_secs == 0 {
            warnings.push("defaults.command_timeout_secs is 0; every command would time out".to_string());
        }
        if self.defaults.connect_timeout_secs == 0 {
            warnings.push("defaults.connect_timeout_secs is 0; connecting would always time out".to_string());
        }
        if !looks_like_env_name(&self.defaults.password_env) {
            warnings.push(format!(
                "defaults.password_env '{}' is not an environment variable name; \
                 it must name a variable, never hold the password itself",
                self.defaults.password_env
            ));
        }
        warnings
    }
}

fn looks_like_env_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub identity: Option<PathBuf>,
    pub password_env: Option<String>,
    pub command_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub chain: bool,
}

/// Resolved configuration: file, then environment, then CLI.
#[derive(Debug, Clone)]
pub struct OpsConfig {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    pub toml: RemoteOpsToml,
}

impl OpsConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_dir = project_dir.join(CONFIG_DIR);
        let toml = RemoteOpsToml::load_or_default(&config_dir)?;
        Ok(Self {
            project_dir,
            config_dir,
            toml,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn resolve_target(&self, cli: &CliOverrides) -> Result<HostTarget> {
        self.resolve_target_with(cli, |k| std::env::var(k).ok())
    }

    /// Resolve the target using `env` for environment lookups.
    pub fn resolve_target_with<F>(&self, cli: &CliOverrides, env: F) -> Result<HostTarget>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = cli
            .host
            .clone()
            .or_else(|| env(ENV_HOST))
            .or_else(|| self.toml.target.host.clone())
            .with_context(|| {
                format!(
                    "No target host: pass --host, set {} or add [target] host to {}",
                    ENV_HOST,
                    self.config_path().display()
                )
            })?;
        let port = match cli.port {
            Some(port) => port,
            None => match env(ENV_PORT) {
                Some(raw) => raw
                    .trim()
                    .parse::<u16>()
                    .with_context(|| format!("{} is not a valid port: '{}'", ENV_PORT, raw))?,
                None => self.toml.target.port.unwrap_or(DEFAULT_SSH_PORT),
            },
        };
        if port == 0 {
            bail!("Port 0 is not a valid SSH port");
        }
        let user = cli
            .user
            .clone()
            .or_else(|| env(ENV_USER))
            .or_else(|| self.toml.target.user.clone())
            .with_context(|| {
                format!(
                    "No login user: pass --user, set {} or add [target] user to {}",
                    ENV_USER,
                    self.config_path().display()
                )
            })?;
        Ok(HostTarget::new(host, port, user))
    }

    /// Name of the environment variable holding the password.
    pub fn password_env(&self, cli: &CliOverrides) -> String {
        cli.password_env
            .clone()
            .unwrap_or_else(|| self.toml.defaults.password_env.clone())
    }

    pub fn resolve_credential(&self, cli: &CliOverrides) -> Result<Credential> {
        self.resolve_credential_with(cli, |k| std::env::var(k).ok())
    }

    /// Key file if one is configured, otherwise the password from the environment.
    pub fn resolve_credential_with<F>(&self, cli: &CliOverrides, env: F) -> Result<Credential>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(identity) = cli
            .identity
            .clone()
            .or_else(|| self.toml.target.identity_file.clone())
        {
            let path = expand_home(&identity);
            if !path.exists() {
                bail!("Identity file not found: {}", path.display());
            }
            return Ok(Credential::KeyFile {
                path,
                passphrase: env(ENV_KEY_PASSPHRASE).filter(|p| !p.is_empty()),
            });
        }

        let var = self.password_env(cli);
        match env(&var) {
            Some(password) if !password.is_empty() => Ok(Credential::Password(password)),
            _ => bail!(
                "No credential: set the {} environment variable or pass --identity",
                var
            ),
        }
    }

    pub fn session_options(&self, cli: &CliOverrides) -> SessionOptions {
        let command = cli
            .command_timeout_secs
            .unwrap_or(self.toml.defaults.command_timeout_secs);
        let connect = cli
            .connect_timeout_secs
            .unwrap_or(self.toml.defaults.connect_timeout_secs);
        SessionOptions {
            command_timeout: Duration::from_secs(command),
            connect_timeout: Duration::from_secs(connect),
        }
    }

    pub fn chain(&self, cli: &CliOverrides) -> bool {
        cli.chain || self.toml.defaults.chain
    }

    /// Warnings for the effective configuration.
    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    fn write_config(dir: &Path, content: &str) {
        let config_dir = dir.join(CONFIG_DIR);
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join(CONFIG_FILE), content).unwrap();
    }

    #[test]
    fn test_defaults() {
        let toml = RemoteOpsToml::default();
        assert_eq!(toml.defaults.command_timeout_secs, 120);
        assert_eq!(toml.defaults.connect_timeout_secs, 15);
        assert_eq!(toml.defaults.password_env, "REMOTE_OPS_PASSWORD");
        assert!(!toml.defaults.chain);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = OpsConfig::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(config.toml, RemoteOpsToml::default());
    }

    #[test]
    fn test_parse_partial_file() {
        let toml = RemoteOpsToml::parse("[target]\nhost = \"10.0.0.5\"\n").unwrap();
        assert_eq!(toml.target.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(toml.defaults.command_timeout_secs, 120);
    }

    #[test]
    fn test_parse_invalid_file() {
        assert!(RemoteOpsToml::parse("not valid toml {{{{").is_err());
    }

    #[test]
    fn test_layering_file_env_cli() {
        let dir = tempdir().unwrap();
        write_config(
            dir.path(),
            "[target]\nhost = \"file-host\"\nport = 2200\nuser = \"file-user\"\n",
        );
        let config = OpsConfig::new(dir.path().to_path_buf()).unwrap();

        let from_file = config
            .resolve_target_with(&CliOverrides::default(), env_of(&[]))
            .unwrap();
        assert_eq!(from_file, HostTarget::new("file-host", 2200, "file-user"));

        let from_env = config
            .resolve_target_with(
                &CliOverrides::default(),
                env_of(&[(ENV_HOST, "env-host"), (ENV_PORT, "2201")]),
            )
            .unwrap();
        assert_eq!(from_env, HostTarget::new("env-host", 2201, "file-user"));

        let cli = CliOverrides {
            host: Some("cli-host".to_string()),
            port: Some(2202),
            user: Some("cli-user".to_string()),
            ..Default::default()
        };
        let from_cli = config
            .resolve_target_with(&cli, env_of(&[(ENV_HOST, "env-host")]))
            .unwrap();
        assert_eq!(from_cli, HostTarget::new("cli-host", 2202, "cli-user"));
    }

    #[test]
    fn test_missing_host_is_an_error() {
        let dir = tempdir().unwrap();
        let config = OpsConfig::new(dir.path().to_path_buf()).unwrap();
        let err = config
            .resolve_target_with(&CliOverrides::default(), env_of(&[]))
            .unwrap_err();
        assert!(err.to_string().contains("No target host"));
    }

    #[test]
    fn test_invalid_env_port() {
        let dir = tempdir().unwrap();
        let config = OpsConfig::new(dir.path().to_path_buf()).unwrap();
        let cli = CliOverrides {
            host: Some("h".to_string()),
            user: Some("u".to_string()),
            ..Default::default()
        };
        let err = config
            .resolve_target_with(&cli, env_of(&[(ENV_PORT, "ssh")]))
            .unwrap_err();
        assert!(err.to_string().contains("not a valid port"));
    }

    #[test]
    fn test_password_comes_from_named_env_var() {
        let dir = tempdir().unwrap();
        let config = OpsConfig::new(dir.path().to_path_buf()).unwrap();
        let cred = config
            .resolve_credential_with(
                &CliOverrides::default(),
                env_of(&[(DEFAULT_PASSWORD_ENV, "pw")]),
            )
            .unwrap();
        assert!(matches!(cred, Credential::Password(ref p) if p == "pw"));

        let cli = CliOverrides {
            password_env: Some("SHOP_SSH_PASSWORD".to_string()),
            ..Default::default()
        };
        let cred = config
            .resolve_credential_with(&cli, env_of(&[("SHOP_SSH_PASSWORD", "other")]))
            .unwrap();
        assert!(matches!(cred, Credential::Password(ref p) if p == "other"));
    }

    #[test]
    fn test_missing_or_empty_password_is_an_error() {
        let dir = tempdir().unwrap();
        let config = OpsConfig::new(dir.path().to_path_buf()).unwrap();
        let err = config
            .resolve_credential_with(&CliOverrides::default(), env_of(&[]))
            .unwrap_err();
        assert!(err.to_string().contains("REMOTE_OPS_PASSWORD"));
        assert!(
            config
                .resolve_credential_with(
                    &CliOverrides::default(),
                    env_of(&[(DEFAULT_PASSWORD_ENV, "")])
                )
                .is_err()
        );
    }

    #[test]
    fn test_identity_file_takes_precedence() {
        let dir = tempdir().unwrap();
        let key = dir.path().join("id_test");
        fs::write(&key, "not really a key").unwrap();
        let config = OpsConfig::new(dir.path().to_path_buf()).unwrap();
        let cli = CliOverrides {
            identity: Some(key.clone()),
            ..Default::default()
        };
        let cred = config
            .resolve_credential_with(
                &cli,
                env_of(&[(DEFAULT_PASSWORD_ENV, "pw"), (ENV_KEY_PASSPHRASE, "phrase")]),
            )
            .unwrap();
        match cred {
            Credential::KeyFile { path, passphrase } => {
                assert_eq!(path, key);
                assert_eq!(passphrase.as_deref(), Some("phrase"));
            }
            other => panic!("expected key credential, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_identity_file() {
        let dir = tempdir().unwrap();
        let config = OpsConfig::new(dir.path().to_path_buf()).unwrap();
        let cli = CliOverrides {
            identity: Some(dir.path().join("absent")),
            ..Default::default()
        };
        let err = config.resolve_credential_with(&cli, env_of(&[])).unwrap_err();
        assert!(err.to_string().contains("Identity file not found"));
    }

    #[test]
    fn test_session_options_and_chain() {
        let dir = tempdir().unwrap();
        write_config(
            dir.path(),
            "[defaults]\ncommand_timeout_secs = 30\nchain = true\n",
        );
        let config = OpsConfig::new(dir.path().to_path_buf()).unwrap();
        let opts = config.session_options(&CliOverrides::default());
        assert_eq!(opts.command_timeout, Duration::from_secs(30));
        assert_eq!(opts.connect_timeout, Duration::from_secs(15));
        assert!(config.chain(&CliOverrides::default()));

        let cli = CliOverrides {
            command_timeout_secs: Some(5),
            ..Default::default()
        };
        assert_eq!(
            config.session_options(&cli).command_timeout,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_validate_flags_literal_secret() {
        let toml = RemoteOpsToml::parse(
            "[target]\nhost = \"h\"\nuser = \"u\"\n[defaults]\npassword_env = \"Hunter2!\"\n",
        )
        .unwrap();
        let warnings = toml.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("password_env"));
    }

    #[test]
    fn test_validate_complete_config_is_clean() {
        let toml = RemoteOpsToml::parse("[target]\nhost = \"h\"\nuser = \"u\"\n").unwrap();
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_save_round_trip_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut toml = RemoteOpsToml::default();
        toml.target.host = Some("10.1.1.1".to_string());
        toml.save(&path).unwrap();
        assert_eq!(RemoteOpsToml::load(&path).unwrap(), toml);
    }

    #[test]
    fn test_expand_home() {
        let plain = Path::new("/etc/ssh/key");
        assert_eq!(expand_home(plain), plain.to_path_buf());
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                expand_home(Path::new("~/.ssh/id_ed25519")),
                home.join(".ssh/id_ed25519")
            );
        }
    }
}
