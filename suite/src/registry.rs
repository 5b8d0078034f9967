//! Profile resolution and invocation planning.
//!
//! Everything here is pure: it maps loaded fixtures and the static profile
//! registry onto concrete [`Invocation`]s without touching the filesystem.

use crate::config::{CheckerConfig, PLUGINS_ENV_VAR};
use crate::types::{CommandSpec, Fixture, Invocation, Profile};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown profile '{profile}' requested by {requested_by} (registered: {})", .known.join(", "))]
pub struct UnknownProfileError {
    pub profile: String,
    pub requested_by: String,
    pub known: Vec<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error(transparent)]
    UnknownProfile(#[from] UnknownProfileError),

    #[error("No invocations left to run: {reason}")]
    Empty { reason: String },
}

pub type PlanResult<T> = Result<T, PlanError>;

/// Immutable name → profile mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, Profile>,
}

impl ProfileRegistry {
    pub fn new(profiles: impl IntoIterator<Item = Profile>) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|profile| (profile.name.clone(), profile))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.keys().map(|s| s.as_str()).collect()
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Resolve profile names in the given order.
    ///
    /// `requested_by` names the fixture (or CLI) asking, for the error message.
    pub fn resolve<'a, S: AsRef<str>>(
        &'a self,
        names: &[S],
        requested_by: &str,
    ) -> Result<Vec<&'a Profile>, UnknownProfileError> {
        names
            .iter()
            .map(|name| {
                self.get(name.as_ref()).ok_or_else(|| UnknownProfileError {
                    profile: name.as_ref().to_string(),
                    requested_by: requested_by.to_string(),
                    known: self.profiles.keys().cloned().collect(),
                })
            })
            .collect()
    }
}

/// Checker arguments and environment contributed by `profile`, without targets.
///
/// Argument order: checker args, profile flags, plugin args.
pub fn profile_command(
    profile: &Profile,
    checker: &CheckerConfig,
) -> (Vec<String>, BTreeMap<String, String>) {
    let mut args = checker.args.clone();
    args.extend(profile.flags.iter().cloned());

    let mut env = checker.env.clone();
    env.extend(profile.env.iter().map(|(k, v)| (k.clone(), v.clone())));

    if !profile.plugins.is_empty() {
        match &checker.plugin_flag {
            Some(flag) => {
                for plugin in &profile.plugins {
                    args.push(flag.clone());
                    args.push(plugin.clone());
                }
            }
            None => {
                env.insert(PLUGINS_ENV_VAR.to_string(), profile.plugins.join(","));
            }
        }
    }

    (args, env)
}

/// Build the concrete command for running `fixture` under `profile`.
///
/// The fixture's own targets replace the checker default targets, and its
/// timeout replaces the checker default timeout.
pub fn materialize(fixture: &Fixture, profile: &Profile, checker: &CheckerConfig) -> CommandSpec {
    let (mut args, env) = profile_command(profile, checker);
    let targets = fixture.targets.as_ref().unwrap_or(&checker.targets);
    args.extend(targets.iter().cloned());

    CommandSpec {
        program: checker.command.clone(),
        args,
        env,
        working_dir: fixture.dir.clone(),
        timeout: fixture.timeout.unwrap_or_else(|| checker.timeout()),
    }
}

/// Restricts a run to a subset of the registry
#[derive(Debug, Clone, Default)]
pub struct ProfileSelection {
    only: Option<BTreeSet<String>>,
}

impl ProfileSelection {
    pub fn all() -> Self {
        Self::default()
    }

    /// Empty input means "all profiles"
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        Self {
            only: if names.is_empty() { None } else { Some(names) },
        }
    }

    pub fn includes(&self, profile: &str) -> bool {
        self.only.as_ref().is_none_or(|only| only.contains(profile))
    }

    fn validate(&self, registry: &ProfileRegistry) -> Result<(), UnknownProfileError> {
        if let Some(only) = &self.only {
            let names: Vec<&String> = only.iter().collect();
            registry.resolve(&names, "--profile")?;
        }
        Ok(())
    }
}

/// Every invocation a run must produce a verdict for
#[derive(Debug, Clone)]
pub struct Plan {
    pub invocations: Vec<Invocation>,
    /// Required (fixture, profile) pairs left out by the profile selection
    pub deselected: usize,
}

impl Plan {
    /// Bound every invocation by `timeout`, fixture-specific timeouts included
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        for invocation in &mut self.invocations {
            invocation.command.timeout = timeout;
        }
        self
    }
}

/// Expand fixtures into invocations.
///
/// Every profile a fixture declares is resolved, even when deselected, so a
/// typo in a descriptor is reported regardless of the selection in effect.
pub fn plan(
    fixtures: &[Fixture],
    registry: &ProfileRegistry,
    checker: &CheckerConfig,
    selection: &ProfileSelection,
) -> PlanResult<Plan> {
    selection.validate(registry)?;

    let mut invocations = Vec::new();
    let mut deselected = 0;

    for fixture in fixtures {
        let profiles = registry.resolve(&fixture.profiles, &fixture.name)?;
        for profile in profiles {
            if !selection.includes(&profile.name) {
                deselected += 1;
                continue;
            }

            let command = materialize(fixture, profile, checker);
            debug!("Planned {} [{}]: {}", fixture.name, profile.name, command.display_line());
            invocations.push(Invocation {
                fixture: fixture.name.clone(),
                profile: profile.name.clone(),
                expected: fixture.expectation_for(&profile.name).clone(),
                command,
            });
        }
    }

    if invocations.is_empty() {
        let reason = if fixtures.is_empty() {
            "no fixtures were discovered".to_string()
        } else {
            format!(
                "the profile selection excludes all {} required invocations",
                deselected
            )
        };
        return Err(PlanError::Empty { reason });
    }

    Ok(Plan {
        invocations,
        deselected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Expectation;
    use std::path::PathBuf;

    fn registry() -> ProfileRegistry {
        ProfileRegistry::new([
            Profile::new("default"),
            Profile::new("strict").with_flags(["--strict"]),
            Profile::new("plugin-enabled").with_plugins(["pydantic.mypy"]),
        ])
    }

    fn fixture(name: &str, profiles: &[&str]) -> Fixture {
        Fixture {
            name: name.to_string(),
            dir: PathBuf::from("/fixtures").join(name),
            description: None,
            expected: Expectation::pass(),
            profiles: profiles.iter().map(|p| p.to_string()).collect(),
            overrides: BTreeMap::new(),
            targets: None,
            timeout: None,
        }
    }

    #[test]
    fn test_resolve_preserves_order() {
        let registry = registry();
        let resolved = registry
            .resolve(&["strict", "default"], "fixture")
            .unwrap();
        let names: Vec<&str> = resolved.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["strict", "default"]);
    }

    #[test]
    fn test_resolve_unknown_profile() {
        let registry = registry();
        let err = registry
            .resolve(&["default", "paranoid"], "strict/example")
            .unwrap_err();
        assert_eq!(err.profile, "paranoid");
        assert_eq!(err.requested_by, "strict/example");
        assert!(err.to_string().contains("plugin-enabled"));
    }

    #[test]
    fn test_materialize_argument_order() {
        let checker = CheckerConfig::new("mypy")
            .with_args(["--no-incremental"])
            .with_plugin_flag("--plugin");
        let mut fixture = fixture("uses_plugins/example", &["plugin-enabled"]);
        fixture.targets = Some(vec!["example.py".to_string()]);
        let profile = Profile::new("p")
            .with_flags(["--strict"])
            .with_plugins(["pydantic.mypy"]);

        let spec = materialize(&fixture, &profile, &checker);
        assert_eq!(
            spec.args,
            vec![
                "--no-incremental",
                "--strict",
                "--plugin",
                "pydantic.mypy",
                "example.py"
            ]
        );
        assert_eq!(spec.working_dir, fixture.dir);
        assert!(!spec.env.contains_key(PLUGINS_ENV_VAR));
    }

    #[test]
    fn test_materialize_plugins_via_env() {
        let checker = CheckerConfig::default();
        let fixture = fixture("uses_plugins/example", &["plugin-enabled"]);
        let registry = registry();
        let profile = registry.get("plugin-enabled").unwrap();

        let spec = materialize(&fixture, profile, &checker);
        assert_eq!(spec.args, vec!["."]);
        assert_eq!(
            spec.env.get(PLUGINS_ENV_VAR).map(String::as_str),
            Some("pydantic.mypy")
        );
    }

    #[test]
    fn test_materialize_profile_env_overrides_checker_env() {
        let mut checker = CheckerConfig::default();
        checker.env.insert("MODE".to_string(), "base".to_string());
        let profile = Profile::new("p").with_env("MODE", "profile");

        let spec = materialize(&fixture("f", &["p"]), &profile, &checker);
        assert_eq!(spec.env.get("MODE").map(String::as_str), Some("profile"));
    }

    #[test]
    fn test_materialize_fixture_timeout() {
        let checker = CheckerConfig::default().with_timeout_secs(60);
        let mut fixture = fixture("slow", &["default"]);
        fixture.timeout = Some(Duration::from_secs(5));

        let spec = materialize(&fixture, &Profile::new("default"), &checker);
        assert_eq!(spec.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_plan_timeout_overrides_fixture_timeouts() {
        let mut slow = fixture("slow", &["default"]);
        slow.timeout = Some(Duration::from_secs(300));
        let fixtures = vec![slow, fixture("quick", &["default"])];

        let plan = plan(
            &fixtures,
            &registry(),
            &CheckerConfig::default(),
            &ProfileSelection::all(),
        )
        .unwrap()
        .with_timeout(Duration::from_secs(2));

        assert!(plan
            .invocations
            .iter()
            .all(|i| i.command.timeout == Duration::from_secs(2)));
    }

    #[test]
    fn test_plan_expands_every_required_profile() {
        let mut uses_plugins = fixture("uses_plugins/example", &["default", "plugin-enabled"]);
        uses_plugins
            .overrides
            .insert("default".to_string(), Expectation::fail());
        let fixtures = vec![fixture("strict/example", &["strict"]), uses_plugins];

        let plan = plan(
            &fixtures,
            &registry(),
            &CheckerConfig::default(),
            &ProfileSelection::all(),
        )
        .unwrap();

        assert_eq!(plan.invocations.len(), 3);
        assert_eq!(plan.deselected, 0);

        let default_run = plan
            .invocations
            .iter()
            .find(|i| i.key() == ("uses_plugins/example", "default"))
            .unwrap();
        assert_eq!(default_run.expected, Expectation::fail());
    }

    #[test]
    fn test_plan_counts_deselected() {
        let fixtures = vec![fixture("uses_plugins/example", &["default", "plugin-enabled"])];
        let plan = plan(
            &fixtures,
            &registry(),
            &CheckerConfig::default(),
            &ProfileSelection::only(["default"]),
        )
        .unwrap();

        assert_eq!(plan.invocations.len(), 1);
        assert_eq!(plan.deselected, 1);
    }

    #[test]
    fn test_plan_unknown_selected_profile() {
        let fixtures = vec![fixture("strict/example", &["strict"])];
        let result = plan(
            &fixtures,
            &registry(),
            &CheckerConfig::default(),
            &ProfileSelection::only(["nope"]),
        );
        assert!(matches!(result, Err(PlanError::UnknownProfile(e)) if e.requested_by == "--profile"));
    }

    #[test]
    fn test_plan_unknown_fixture_profile_even_when_deselected() {
        let fixtures = vec![fixture("broken", &["default", "missing"])];
        let result = plan(
            &fixtures,
            &registry(),
            &CheckerConfig::default(),
            &ProfileSelection::only(["default"]),
        );
        assert!(matches!(result, Err(PlanError::UnknownProfile(_))));
    }

    #[test]
    fn test_plan_empty_selection_is_error() {
        let fixtures = vec![fixture("strict/example", &["strict"])];
        let result = plan(
            &fixtures,
            &registry(),
            &CheckerConfig::default(),
            &ProfileSelection::only(["default"]),
        );
        assert!(matches!(result, Err(PlanError::Empty { .. })));
    }
}
