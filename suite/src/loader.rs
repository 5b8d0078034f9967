//! Fixture discovery.
//!
//! A fixture is a directory holding a [`DESCRIPTOR_FILE`]. Directories that
//! only group other directories are traversed; a leaf directory with files
//! but no descriptor is a broken fixture and stops discovery. Entries whose
//! name starts with `.` or `_` (VCS metadata, caches) are skipped, and
//! symlinks are never followed.

use crate::descriptor::{parse_descriptor, DescriptorError, DESCRIPTOR_FILE};
use crate::types::Fixture;
use glob::Pattern;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Fixture root '{}' does not exist or is not a directory", .path.display())]
    RootNotFound { path: PathBuf },

    #[error("Failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Fixture directory '{}' has no fixture.toml", .dir.display())]
    MissingDescriptor { dir: PathBuf },

    #[error("Bad descriptor '{}': {source}", .path.display())]
    Descriptor {
        path: PathBuf,
        #[source]
        source: DescriptorError,
    },

    #[error("Invalid fixture filter '{pattern}': {source}")]
    InvalidFilter {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("No fixture matches {}", .patterns.join(", "))]
    NoMatch { patterns: Vec<String> },
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

fn is_ignored(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('_')
}

/// Lazy, depth-first, sorted traversal of a fixture root
#[derive(Debug)]
pub struct FixtureLoader {
    root: PathBuf,
    pending: Vec<PathBuf>,
    started: bool,
    finished: bool,
}

impl FixtureLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pending: Vec::new(),
            started: false,
            finished: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn fixture_name(&self, dir: &Path) -> String {
        let relative = dir.strip_prefix(&self.root).unwrap_or(dir);
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        if name.is_empty() {
            self.root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| ".".to_string())
        } else {
            name
        }
    }

    fn load_fixture(&self, dir: &Path) -> DiscoveryResult<Fixture> {
        let path = dir.join(DESCRIPTOR_FILE);
        let source = std::fs::read_to_string(&path).map_err(|source| DiscoveryError::Io {
            path: path.clone(),
            source,
        })?;
        let fixture = parse_descriptor(&self.fixture_name(dir), dir, &source)
            .map_err(|source| DiscoveryError::Descriptor { path, source })?;
        debug!(
            "Discovered fixture {} (profiles: {})",
            fixture.name,
            fixture.profiles.join(", ")
        );
        Ok(fixture)
    }

    /// Visit one directory: either it is a fixture, or its children are queued.
    fn visit(&mut self, dir: PathBuf) -> DiscoveryResult<Option<Fixture>> {
        if dir.join(DESCRIPTOR_FILE).is_file() {
            return self.load_fixture(&dir).map(Some);
        }

        let entries = std::fs::read_dir(&dir).map_err(|source| DiscoveryError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut subdirs = Vec::new();
        let mut has_files = false;
        for entry in entries {
            let entry = entry.map_err(|source| DiscoveryError::Io {
                path: dir.clone(),
                source,
            })?;
            let name = entry.file_name();
            if is_ignored(&name.to_string_lossy()) {
                trace!("Skipping {}", entry.path().display());
                continue;
            }
            let file_type = entry.file_type().map_err(|source| DiscoveryError::Io {
                path: entry.path(),
                source,
            })?;
            if file_type.is_dir() {
                subdirs.push(entry.path());
            } else {
                has_files = true;
            }
        }

        if subdirs.is_empty() && has_files && dir != self.root {
            return Err(DiscoveryError::MissingDescriptor { dir });
        }

        subdirs.sort();
        self.pending.extend(subdirs.into_iter().rev());
        Ok(None)
    }
}

impl Iterator for FixtureLoader {
    type Item = DiscoveryResult<Fixture>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if !self.started {
            self.started = true;
            if !self.root.is_dir() {
                self.finished = true;
                return Some(Err(DiscoveryError::RootNotFound {
                    path: self.root.clone(),
                }));
            }
            self.pending.push(self.root.clone());
        }

        while let Some(dir) = self.pending.pop() {
            match self.visit(dir) {
                Ok(Some(fixture)) => return Some(Ok(fixture)),
                Ok(None) => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }

        self.finished = true;
        None
    }
}

/// Glob filter over fixture names; empty means "everything"
#[derive(Debug, Clone, Default)]
pub struct FixtureFilter {
    patterns: Vec<Pattern>,
}

impl FixtureFilter {
    pub fn new<I, S>(patterns: I) -> DiscoveryResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                Pattern::new(p.as_ref()).map_err(|source| DiscoveryError::InvalidFilter {
                    pattern: p.as_ref().to_string(),
                    source,
                })
            })
            .collect::<DiscoveryResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, name: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.matches(name))
    }
}

/// Discover every fixture under `root`, keeping those accepted by `filter`.
///
/// Fails on the first broken fixture, and when a non-empty filter leaves
/// nothing to run.
pub fn discover(root: &Path, filter: &FixtureFilter) -> DiscoveryResult<Vec<Fixture>> {
    let mut fixtures = Vec::new();
    let mut seen_any = false;

    for fixture in FixtureLoader::new(root) {
        let fixture = fixture?;
        seen_any = true;
        if filter.matches(&fixture.name) {
            fixtures.push(fixture);
        } else {
            trace!("Fixture {} filtered out", fixture.name);
        }
    }

    if seen_any && fixtures.is_empty() && !filter.is_empty() {
        return Err(DiscoveryError::NoMatch {
            patterns: filter.patterns.iter().map(|p| p.as_str().to_string()).collect(),
        });
    }

    Ok(fixtures)
}
