//! On-disk fixture descriptor (`fixture.toml`).

use crate::types::{Expectation, Fixture, OutcomeKind};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DESCRIPTOR_FILE: &str = "fixture.toml";

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("Malformed descriptor: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid descriptor: {message}")]
    Invalid { message: String },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExpectation {
    outcome: OutcomeKind,
    #[serde(default)]
    contains: Vec<String>,
    count: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDescriptor {
    outcome: OutcomeKind,
    #[serde(default)]
    contains: Vec<String>,
    count: Option<usize>,
    profiles: Vec<String>,
    targets: Option<Vec<String>>,
    timeout_secs: Option<u64>,
    description: Option<String>,
    #[serde(default)]
    overrides: BTreeMap<String, RawExpectation>,
}

fn expectation(
    outcome: OutcomeKind,
    contains: Vec<String>,
    count: Option<usize>,
    context: &str,
) -> Result<Expectation, DescriptorError> {
    if outcome == OutcomeKind::Pass && (!contains.is_empty() || count.is_some()) {
        return Err(DescriptorError::Invalid {
            message: format!(
                "{}: 'contains' and 'count' are only allowed with outcome = \"fail\"",
                context
            ),
        });
    }

    if contains.iter().any(|needle| needle.is_empty()) {
        return Err(DescriptorError::Invalid {
            message: format!("{}: 'contains' entries cannot be empty", context),
        });
    }

    Ok(Expectation {
        outcome,
        contains,
        count,
    })
}

/// Parse descriptor text for the fixture `name` located at `dir`
pub fn parse_descriptor(name: &str, dir: &Path, source: &str) -> Result<Fixture, DescriptorError> {
    let raw: RawDescriptor = toml::from_str(source)?;

    if raw.profiles.is_empty() {
        return Err(DescriptorError::Invalid {
            message: "'profiles' must list at least one profile".to_string(),
        });
    }

    let mut seen = BTreeSet::new();
    for profile in &raw.profiles {
        if !seen.insert(profile.as_str()) {
            return Err(DescriptorError::Invalid {
                message: format!("profile '{}' is listed twice", profile),
            });
        }
    }

    if let Some(targets) = &raw.targets {
        if targets.is_empty() {
            return Err(DescriptorError::Invalid {
                message: "'targets' cannot be empty when set".to_string(),
            });
        }
    }

    if raw.timeout_secs == Some(0) {
        return Err(DescriptorError::Invalid {
            message: "'timeout_secs' must be greater than 0".to_string(),
        });
    }

    let expected = expectation(raw.outcome, raw.contains, raw.count, "top level")?;

    let mut overrides = BTreeMap::new();
    for (profile, raw_override) in raw.overrides {
        if !seen.contains(profile.as_str()) {
            return Err(DescriptorError::Invalid {
                message: format!(
                    "override for profile '{}' which is not listed in 'profiles'",
                    profile
                ),
            });
        }
        let context = format!("override '{}'", profile);
        let parsed = expectation(
            raw_override.outcome,
            raw_override.contains,
            raw_override.count,
            &context,
        )?;
        overrides.insert(profile, parsed);
    }

    Ok(Fixture {
        name: name.to_string(),
        dir: dir.to_path_buf(),
        description: raw.description,
        expected,
        profiles: raw.profiles,
        overrides,
        targets: raw.targets,
        timeout: raw.timeout_secs.map(Duration::from_secs),
    })
}
