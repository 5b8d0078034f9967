use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Expected result kind of a checker run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    /// Checker must exit with a clean code
    Pass,
    /// Checker must report type errors
    Fail,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Pass => write!(f, "pass"),
            OutcomeKind::Fail => write!(f, "fail"),
        }
    }
}

/// What a fixture expects from one checker run.
///
/// `contains` and `count` only carry meaning for [`OutcomeKind::Fail`];
/// the descriptor parser rejects them on a `pass` expectation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectation {
    pub outcome: OutcomeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl Expectation {
    pub fn pass() -> Self {
        Self {
            outcome: OutcomeKind::Pass,
            contains: Vec::new(),
            count: None,
        }
    }

    pub fn fail() -> Self {
        Self {
            outcome: OutcomeKind::Fail,
            contains: Vec::new(),
            count: None,
        }
    }

    pub fn with_contains<I, S>(mut self, needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contains = needles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.outcome)?;
        if let Some(count) = self.count {
            write!(f, " ({} diagnostics)", count)?;
        }
        if !self.contains.is_empty() {
            write!(f, " containing {:?}", self.contains)?;
        }
        Ok(())
    }
}

/// A fixture project discovered on disk. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    /// Path relative to the discovery root, `/` separated
    pub name: String,
    /// Absolute or root-joined directory of the fixture
    pub dir: PathBuf,
    pub description: Option<String>,
    /// Expectation used for every profile without an override
    pub expected: Expectation,
    /// Required profiles, in declaration order
    pub profiles: Vec<String>,
    pub overrides: BTreeMap<String, Expectation>,
    /// Overrides the checker's default targets when set
    pub targets: Option<Vec<String>>,
    pub timeout: Option<Duration>,
}

impl Fixture {
    /// Expectation for a given profile, taking overrides into account
    pub fn expectation_for(&self, profile: &str) -> &Expectation {
        self.overrides.get(profile).unwrap_or(&self.expected)
    }

    pub fn requires(&self, profile: &str) -> bool {
        self.profiles.iter().any(|p| p == profile)
    }
}

/// A named checker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub flags: Vec<String>,
    pub plugins: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: Vec::new(),
            plugins: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_plugins<I, S>(mut self, plugins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plugins = plugins.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Fully materialized subprocess invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
}

impl CommandSpec {
    /// Shell-like rendering for logs and listings
    pub fn display_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push_str(&format!("{:?}", arg));
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// One (fixture, profile) pair, the unit of execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub fixture: String,
    pub profile: String,
    pub expected: Expectation,
    pub command: CommandSpec,
}

impl Invocation {
    /// Sort and identity key used by the report
    pub fn key(&self) -> (&str, &str) {
        (&self.fixture, &self.profile)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.fixture, self.profile)
    }
}
