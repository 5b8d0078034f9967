//! Report aggregation and rendering.

use crate::comparator::{Verdict, VerdictStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use suite::Invocation;
use tracing::warn;
use uuid::Uuid;

/// Lines of checker output shown under a non-matching verdict
const DIAGNOSTIC_EXCERPT_LINES: usize = 20;

/// Process exit status of a harness run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Every verdict matched
    Success,
    /// At least one verdict mismatched, no invocation errored
    Mismatch,
    /// Configuration, discovery or per-invocation harness failure
    HarnessError,
    /// Shutdown signal received before the run completed
    Interrupted,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Mismatch => 1,
            ExitStatus::HarnessError => 2,
            ExitStatus::Interrupted => 130,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub errored: usize,
    /// Required invocations left out by the profile selection
    pub deselected: usize,
    /// Duplicate or unplanned verdicts dropped during aggregation
    pub discarded: usize,
}

/// All verdicts of one run, in (fixture, profile) order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub summary: Summary,
    pub verdicts: Vec<Verdict>,
}

impl Report {
    /// Build the report for `planned` out of whatever verdicts came back.
    ///
    /// Each planned invocation ends up with exactly one verdict: missing ones
    /// are reported as errors, duplicates and unplanned extras are dropped
    /// and counted as discarded, which fails the run.
    pub fn aggregate(
        planned: &[Invocation],
        verdicts: Vec<Verdict>,
        deselected: usize,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        let mut discarded = 0;
        let mut by_key: BTreeMap<(String, String), Verdict> = BTreeMap::new();
        for verdict in verdicts {
            let key = (verdict.fixture.clone(), verdict.profile.clone());
            if by_key.contains_key(&key) {
                warn!("Duplicate verdict for {} [{}], keeping the first", key.0, key.1);
                discarded += 1;
                continue;
            }
            by_key.insert(key, verdict);
        }

        let mut ordered = BTreeMap::new();
        for invocation in planned {
            let key = (invocation.fixture.clone(), invocation.profile.clone());
            let verdict = by_key.remove(&key).unwrap_or_else(|| {
                warn!("No verdict for {}", invocation);
                Verdict::missing(invocation)
            });
            ordered.insert(key, verdict);
        }

        for (fixture, profile) in by_key.keys() {
            warn!("Ignoring verdict for unplanned invocation {} [{}]", fixture, profile);
            discarded += 1;
        }

        let verdicts: Vec<Verdict> = ordered.into_values().collect();
        let summary = Summary {
            total: verdicts.len(),
            matched: verdicts.iter().filter(|v| v.is_match()).count(),
            mismatched: verdicts.iter().filter(|v| v.is_mismatch()).count(),
            errored: verdicts.iter().filter(|v| v.is_error()).count(),
            deselected,
            discarded,
        };

        Self {
            run_id: Uuid::new_v4(),
            started_at,
            duration,
            summary,
            verdicts,
        }
    }

    pub fn exit_status(&self) -> ExitStatus {
        if self.summary.errored > 0 || self.summary.discarded > 0 {
            ExitStatus::HarnessError
        } else if self.summary.mismatched > 0 {
            ExitStatus::Mismatch
        } else {
            ExitStatus::Success
        }
    }

    pub fn render(&self, format: ReportFormat) -> Result<String, serde_json::Error> {
        match format {
            ReportFormat::Text => Ok(self.render_text()),
            ReportFormat::Json => serde_json::to_string_pretty(self),
        }
    }

    pub fn render_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Report {
    /// Text rendering: one line per verdict, details under the failing ones
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .verdicts
            .iter()
            .map(|v| v.fixture.len() + v.profile.len() + 3)
            .max()
            .unwrap_or(0);

        for verdict in &self.verdicts {
            let label = format!("{} [{}]", verdict.fixture, verdict.profile);
            let tag = match &verdict.status {
                VerdictStatus::Matched => "ok",
                VerdictStatus::Mismatched { .. } => "MISMATCH",
                VerdictStatus::Errored { .. } => "ERROR",
            };
            writeln!(
                f,
                "{:<8}  {:<width$}  expected {}, got {}  ({:.2}s)",
                tag,
                label,
                verdict.expected.outcome,
                verdict.actual_label(),
                verdict.elapsed.as_secs_f64(),
                width = width
            )?;

            match &verdict.status {
                VerdictStatus::Matched => continue,
                VerdictStatus::Mismatched { reasons } => {
                    for reason in reasons {
                        writeln!(f, "          - {}", reason)?;
                    }
                }
                VerdictStatus::Errored { kind, message } => {
                    writeln!(f, "          - {}: {}", kind, message)?;
                }
            }

            let lines: Vec<&str> = verdict.diagnostics.lines().collect();
            for line in lines.iter().take(DIAGNOSTIC_EXCERPT_LINES) {
                writeln!(f, "          | {}", line)?;
            }
            if lines.len() > DIAGNOSTIC_EXCERPT_LINES {
                writeln!(
                    f,
                    "          | ... {} more lines",
                    lines.len() - DIAGNOSTIC_EXCERPT_LINES
                )?;
            }
        }

        let s = &self.summary;
        write!(
            f,
            "\n{} invocations: {} matched, {} mismatched, {} errored, {} deselected",
            s.total, s.matched, s.mismatched, s.errored, s.deselected
        )?;
        if s.discarded > 0 {
            write!(f, ", {} discarded", s.discarded)?;
        }
        writeln!(f, " in {:.2}s", self.duration.as_secs_f64())
    }
}
