//! End to end run: discover fixtures, plan invocations, execute, aggregate.

use crate::comparator::Comparator;
use crate::executor::{Executor, RunOutcome};
use crate::report::ExitStatus;
use crate::runner::Checker;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use suite::{
    discover, plan, ConfigError, DiscoveryError, FixtureFilter, HarnessConfig, Plan, PlanError,
    ProfileSelection,
};
use thiserror::Error;
use tracing::info;

/// Setup failures; all of them abort before any checker runs
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("{0}")]
    Plan(#[from] PlanError),

    #[error("Failed to render report: {0}")]
    Render(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    pub fn exit_status(&self) -> ExitStatus {
        ExitStatus::HarnessError
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;

/// What to run, as chosen on the command line
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub root: PathBuf,
    pub profiles: Vec<String>,
    pub fixtures: Vec<String>,
    pub jobs: Option<usize>,
    /// Replaces every invocation's timeout, fixture-specific ones included
    pub timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("fixtures"),
            profiles: Vec::new(),
            fixtures: Vec::new(),
            jobs: None,
            timeout: None,
        }
    }
}

impl RunOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn with_profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profiles = profiles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_fixtures<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fixtures = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Discover and plan without running anything
pub fn prepare(config: &HarnessConfig, options: &RunOptions) -> HarnessResult<Plan> {
    config.validate()?;

    let filter = FixtureFilter::new(&options.fixtures)?;
    let fixtures = discover(&options.root, &filter)?;
    info!(
        "Discovered {} fixtures under {}",
        fixtures.len(),
        options.root.display()
    );

    let selection = ProfileSelection::only(options.profiles.iter().cloned());
    let plan = plan(&fixtures, &config.registry(), &config.checker, &selection)?;
    Ok(match options.timeout {
        Some(timeout) => plan.with_timeout(timeout),
        None => plan,
    })
}

/// Full pipeline. `shutdown` interrupts the run when it completes.
pub async fn run<F>(
    config: &HarnessConfig,
    options: &RunOptions,
    checker: Arc<dyn Checker>,
    shutdown: F,
) -> HarnessResult<RunOutcome>
where
    F: Future<Output = ()>,
{
    let plan = prepare(config, options)?;
    let comparator = Comparator::new(&config.checker)?;

    let mut executor = Executor::new(checker, comparator);
    if let Some(jobs) = options.jobs {
        executor = executor.with_jobs(jobs);
    }

    Ok(executor.run(&plan, shutdown).await)
}
