//! Harness configuration: the checker command, its exit-code contract and
//! the profile registry. Loaded once at startup from `conformance.toml` and
//! passed around as an immutable value.

use crate::registry::ProfileRegistry;
use crate::types::Profile;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Environment variable carrying the plugin list when no plugin flag is configured
pub const PLUGINS_ENV_VAR: &str = "TC_HARNESS_PLUGINS";

/// Default location of the configuration file
pub const DEFAULT_CONFIG_FILE: &str = "conformance.toml";

/// Per-fixture mypy config loaded by the built-in `plugin-enabled` profile
pub const PLUGIN_CONFIG_FILE: &str = "plugins.ini";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid diagnostic pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Semantic class of a checker exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "class", content = "code")]
pub enum ExitClass {
    /// No type errors reported
    Clean,
    /// Type errors reported, tool worked as intended
    ErrorsFound,
    /// Tool crashed, was misconfigured or was killed by a signal (`None`)
    ToolError(Option<i32>),
}

/// Fixed mapping from checker exit codes to [`ExitClass`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExitCodePolicy {
    pub clean: Vec<i32>,
    pub errors_found: Vec<i32>,
}

impl Default for ExitCodePolicy {
    fn default() -> Self {
        Self {
            clean: vec![0],
            errors_found: vec![1],
        }
    }
}

impl ExitCodePolicy {
    pub fn classify(&self, code: Option<i32>) -> ExitClass {
        match code {
            Some(code) if self.clean.contains(&code) => ExitClass::Clean,
            Some(code) if self.errors_found.contains(&code) => ExitClass::ErrorsFound,
            other => ExitClass::ToolError(other),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.clean.is_empty() {
            return Err("At least one clean exit code is required".to_string());
        }

        if self.errors_found.is_empty() {
            return Err("At least one errors-found exit code is required".to_string());
        }

        if let Some(code) = self.clean.iter().find(|c| self.errors_found.contains(c)) {
            return Err(format!(
                "Exit code {} cannot be both clean and errors-found",
                code
            ));
        }

        Ok(())
    }
}

/// How to launch the external checker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckerConfig {
    pub command: String,
    /// Passed before profile flags
    pub args: Vec<String>,
    /// Passed last, unless a fixture declares its own targets
    pub targets: Vec<String>,
    pub timeout_secs: u64,
    /// Each plugin becomes `[plugin_flag, plugin]` when set
    pub plugin_flag: Option<String>,
    /// Multi-line regex; each matching line counts as one diagnostic
    pub diagnostic_pattern: String,
    pub env: BTreeMap<String, String>,
    pub exit_codes: ExitCodePolicy,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            command: "mypy".to_string(),
            args: Vec::new(),
            targets: vec![".".to_string()],
            timeout_secs: 60,
            plugin_flag: None,
            diagnostic_pattern: r"^[^:\s][^:]*:\d+(?::\d+)?: error:".to_string(),
            env: BTreeMap::new(),
            exit_codes: ExitCodePolicy::default(),
        }
    }
}

impl CheckerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_plugin_flag(mut self, flag: impl Into<String>) -> Self {
        self.plugin_flag = Some(flag.into());
        self
    }

    pub fn with_diagnostic_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.diagnostic_pattern = pattern.into();
        self
    }

    pub fn with_exit_codes(mut self, exit_codes: ExitCodePolicy) -> Self {
        self.exit_codes = exit_codes;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Compile the diagnostic pattern in multi-line mode
    pub fn diagnostic_regex(&self) -> ConfigResult<Regex> {
        regex::RegexBuilder::new(&self.diagnostic_pattern)
            .multi_line(true)
            .build()
            .map_err(|source| ConfigError::InvalidPattern {
                pattern: self.diagnostic_pattern.clone(),
                source,
            })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.command.trim().is_empty() {
            return Err(invalid("Checker command cannot be empty"));
        }

        if self.timeout_secs == 0 {
            return Err(invalid("Timeout must be greater than 0"));
        }

        if let Some(flag) = &self.plugin_flag {
            if flag.trim().is_empty() {
                return Err(invalid("Plugin flag cannot be empty when set"));
            }
        }

        self.exit_codes.validate().map_err(|message| ConfigError::Invalid { message })?;
        self.diagnostic_regex()?;

        Ok(())
    }
}

/// A profile entry as written in the config file; its name is the table key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileConfig {
    pub flags: Vec<String>,
    pub plugins: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl ProfileConfig {
    fn into_profile(self, name: &str) -> Profile {
        Profile {
            name: name.to_string(),
            flags: self.flags,
            plugins: self.plugins,
            env: self.env,
        }
    }
}

/// Top level configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub checker: CheckerConfig,
    pub profiles: BTreeMap<String, ProfileConfig>,
}

/// Built-in mypy setup. mypy only loads plugins named in its config file,
/// so `plugin-enabled` points it at the fixture's [`PLUGIN_CONFIG_FILE`].
impl Default for HarnessConfig {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert("default".to_string(), ProfileConfig::default());
        profiles.insert(
            "strict".to_string(),
            ProfileConfig {
                flags: vec!["--strict".to_string()],
                ..Default::default()
            },
        );
        profiles.insert(
            "plugin-enabled".to_string(),
            ProfileConfig {
                flags: vec!["--config-file".to_string(), PLUGIN_CONFIG_FILE.to_string()],
                ..Default::default()
            },
        );

        Self {
            checker: CheckerConfig::default(),
            profiles,
        }
    }
}

impl HarnessConfig {
    pub fn new(checker: CheckerConfig) -> Self {
        Self {
            checker,
            profiles: BTreeMap::new(),
        }
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profiles.insert(
            profile.name.clone(),
            ProfileConfig {
                flags: profile.flags,
                plugins: profile.plugins,
                env: profile.env,
            },
        );
        self
    }

    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let config: HarnessConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config from {}", path.display());
        Self::from_toml_str(&source)
    }

    /// Load `path` if it exists; otherwise fall back to the built-in defaults.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            debug!(
                "No config at {}, using built-in defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// Build the immutable profile registry
    pub fn registry(&self) -> ProfileRegistry {
        ProfileRegistry::new(
            self.profiles
                .iter()
                .map(|(name, profile)| profile.clone().into_profile(name)),
        )
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.checker.validate()?;

        if self.profiles.is_empty() {
            return Err(invalid("At least one profile must be configured"));
        }

        for name in self.profiles.keys() {
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(ConfigError::Invalid {
                    message: format!("Invalid profile name {:?}", name),
                });
            }
        }

        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid {
        message: message.to_string(),
    }
}
