//! Outcome comparison: turns a checker run into a [`Verdict`].
//!
//! Matching is a plain text contract. The exit code is classified through
//! the configured [`ExitCodePolicy`], diagnostics are counted by the
//! configured line pattern, and expected substrings are checked by
//! containment in any order. No checker-specific output format is parsed.

use crate::runner::{RunError, RunOutput, RunResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use suite::{
    CheckerConfig, ConfigResult, ExitClass, ExitCodePolicy, Expectation, Invocation, OutcomeKind,
};

/// Why an invocation produced no usable checker result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Launch,
    Timeout,
    Io,
    /// Exit code outside the configured clean / errors-found sets
    ToolError,
    /// No verdict came back for a planned invocation
    Missing,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Launch => write!(f, "launch"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Io => write!(f, "io"),
            ErrorKind::ToolError => write!(f, "tool error"),
            ErrorKind::Missing => write!(f, "missing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum VerdictStatus {
    Matched,
    Mismatched { reasons: Vec<String> },
    Errored { kind: ErrorKind, message: String },
}

/// Comparison result for one (fixture, profile) invocation.
///
/// Equality ignores `elapsed`: the same checker output over the same
/// fixture is the same verdict however long the run took.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub fixture: String,
    pub profile: String,
    pub expected: Expectation,
    pub status: VerdictStatus,
    pub exit_code: Option<i32>,
    pub exit_class: Option<ExitClass>,
    pub diagnostic_count: Option<usize>,
    /// Wall clock time of the checker run, for reporting only
    pub elapsed: Duration,
    pub diagnostics: String,
}

impl PartialEq for Verdict {
    fn eq(&self, other: &Self) -> bool {
        let Verdict {
            fixture,
            profile,
            expected,
            status,
            exit_code,
            exit_class,
            diagnostic_count,
            elapsed: _,
            diagnostics,
        } = self;

        *fixture == other.fixture
            && *profile == other.profile
            && *expected == other.expected
            && *status == other.status
            && *exit_code == other.exit_code
            && *exit_class == other.exit_class
            && *diagnostic_count == other.diagnostic_count
            && *diagnostics == other.diagnostics
    }
}

impl Eq for Verdict {}

impl Verdict {
    /// Verdict for an invocation that never reported back
    pub fn missing(invocation: &Invocation) -> Self {
        Self::errored(
            invocation,
            ErrorKind::Missing,
            "no verdict was produced for this invocation".to_string(),
        )
    }

    fn errored(invocation: &Invocation, kind: ErrorKind, message: String) -> Self {
        Self {
            fixture: invocation.fixture.clone(),
            profile: invocation.profile.clone(),
            expected: invocation.expected.clone(),
            status: VerdictStatus::Errored { kind, message },
            exit_code: None,
            exit_class: None,
            diagnostic_count: None,
            elapsed: Duration::ZERO,
            diagnostics: String::new(),
        }
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.fixture, &self.profile)
    }

    pub fn is_match(&self) -> bool {
        matches!(self.status, VerdictStatus::Matched)
    }

    pub fn is_mismatch(&self) -> bool {
        matches!(self.status, VerdictStatus::Mismatched { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self.status, VerdictStatus::Errored { .. })
    }

    /// Short label for the actual outcome, e.g. `clean (0)`
    pub fn actual_label(&self) -> String {
        match (&self.status, self.exit_class) {
            (VerdictStatus::Errored { kind, .. }, None) => kind.to_string(),
            (_, Some(ExitClass::Clean)) => format!("clean ({})", code_label(self.exit_code)),
            (_, Some(ExitClass::ErrorsFound)) => format!(
                "errors found ({}, {} diagnostics)",
                code_label(self.exit_code),
                self.diagnostic_count.unwrap_or(0)
            ),
            (_, Some(ExitClass::ToolError(_))) => {
                format!("tool error ({})", code_label(self.exit_code))
            }
            (_, None) => "unknown".to_string(),
        }
    }
}

fn code_label(code: Option<i32>) -> String {
    code.map(|c| format!("exit {}", c))
        .unwrap_or_else(|| "killed by signal".to_string())
}

/// Applies the exit-code policy and diagnostic contract of one checker
#[derive(Debug, Clone)]
pub struct Comparator {
    policy: ExitCodePolicy,
    pattern: Regex,
}

impl Comparator {
    pub fn new(checker: &CheckerConfig) -> ConfigResult<Self> {
        Ok(Self {
            policy: checker.exit_codes.clone(),
            pattern: checker.diagnostic_regex()?,
        })
    }

    pub fn policy(&self) -> &ExitCodePolicy {
        &self.policy
    }

    pub fn count_diagnostics(&self, text: &str) -> usize {
        self.pattern.find_iter(text).count()
    }

    pub fn compare(&self, invocation: &Invocation, result: RunResult<RunOutput>) -> Verdict {
        let output = match result {
            Ok(output) => output,
            Err(err) => {
                let kind = match err {
                    RunError::Launch { .. } => ErrorKind::Launch,
                    RunError::Timeout { .. } => ErrorKind::Timeout,
                    RunError::Io { .. } => ErrorKind::Io,
                };
                return Verdict::errored(invocation, kind, err.to_string());
            }
        };

        let diagnostics = output.diagnostics();
        let count = self.count_diagnostics(&diagnostics);
        let class = self.policy.classify(output.exit_code);
        let expected = &invocation.expected;

        let status = match class {
            ExitClass::ToolError(code) => VerdictStatus::Errored {
                kind: ErrorKind::ToolError,
                message: format!(
                    "checker failed with {} which is neither a clean nor an errors-found code",
                    code_label(code)
                ),
            },
            ExitClass::Clean => match expected.outcome {
                OutcomeKind::Pass => VerdictStatus::Matched,
                OutcomeKind::Fail => VerdictStatus::Mismatched {
                    reasons: vec![format!(
                        "expected type errors, but the checker exited clean ({})",
                        code_label(output.exit_code)
                    )],
                },
            },
            ExitClass::ErrorsFound => match expected.outcome {
                OutcomeKind::Pass => VerdictStatus::Mismatched {
                    reasons: vec![format!(
                        "expected a clean run, but the checker reported errors ({}, {} diagnostics)",
                        code_label(output.exit_code),
                        count
                    )],
                },
                OutcomeKind::Fail => {
                    let reasons = fail_reasons(expected, &diagnostics, count);
                    if reasons.is_empty() {
                        VerdictStatus::Matched
                    } else {
                        VerdictStatus::Mismatched { reasons }
                    }
                }
            },
        };

        Verdict {
            fixture: invocation.fixture.clone(),
            profile: invocation.profile.clone(),
            expected: expected.clone(),
            status,
            exit_code: output.exit_code,
            exit_class: Some(class),
            diagnostic_count: Some(count),
            elapsed: output.elapsed,
            diagnostics,
        }
    }
}

/// Checks for a `fail` expectation once the exit code already says "errors found"
fn fail_reasons(expected: &Expectation, diagnostics: &str, count: usize) -> Vec<String> {
    let mut reasons = Vec::new();

    if let Some(want) = expected.count {
        if want != count {
            reasons.push(format!("expected {} diagnostics, found {}", want, count));
        }
    }

    for needle in &expected.contains {
        if !diagnostics.contains(needle.as_str()) {
            reasons.push(format!("diagnostics do not contain {:?}", needle));
        }
    }

    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use suite::CommandSpec;

    fn invocation(expected: Expectation) -> Invocation {
        Invocation {
            fixture: "strict/example".to_string(),
            profile: "strict".to_string(),
            expected,
            command: CommandSpec {
                program: "mypy".to_string(),
                args: vec![".".to_string()],
                env: BTreeMap::new(),
                working_dir: PathBuf::from("."),
                timeout: Duration::from_secs(60),
            },
        }
    }

    fn comparator() -> Comparator {
        Comparator::new(&CheckerConfig::default()).unwrap()
    }

    const TWO_ERRORS: &str = "example.py:5: error: Function is missing a return type annotation  [no-untyped-def]\n\
                              example.py:9: error: Missing named argument \"age\" for \"Model\"  [call-arg]\n\
                              Found 2 errors in 1 file (checked 1 source file)\n";

    #[test]
    fn test_pass_with_clean_exit_matches() {
        let verdict = comparator().compare(
            &invocation(Expectation::pass()),
            Ok(RunOutput::new(Some(0), "Success: no issues found in 1 source file\n", "")),
        );
        assert!(verdict.is_match());
        assert_eq!(verdict.exit_class, Some(ExitClass::Clean));
        assert_eq!(verdict.diagnostic_count, Some(0));
    }

    #[test]
    fn test_pass_with_errors_mismatches() {
        let verdict = comparator().compare(
            &invocation(Expectation::pass()),
            Ok(RunOutput::new(Some(1), TWO_ERRORS, "")),
        );
        assert!(verdict.is_mismatch());
        assert_eq!(verdict.diagnostic_count, Some(2));
    }

    #[test]
    fn test_fail_with_clean_exit_mismatches() {
        let verdict = comparator().compare(
            &invocation(Expectation::fail()),
            Ok(RunOutput::new(Some(0), "", "")),
        );
        assert!(verdict.is_mismatch());
    }

    #[test]
    fn test_fail_substrings_are_order_insensitive() {
        let expected = Expectation::fail().with_contains(["Missing named argument", "no-untyped-def"]);
        let verdict = comparator().compare(
            &invocation(expected),
            Ok(RunOutput::new(Some(1), TWO_ERRORS, "")),
        );
        assert!(verdict.is_match(), "{:?}", verdict.status);
    }

    #[test]
    fn test_fail_missing_substring_reports_each() {
        let expected = Expectation::fail().with_contains(["Missing named argument", "unreachable", "attr-defined"]);
        let verdict = comparator().compare(
            &invocation(expected),
            Ok(RunOutput::new(Some(1), TWO_ERRORS, "")),
        );
        match verdict.status {
            VerdictStatus::Mismatched { reasons } => {
                assert_eq!(reasons.len(), 2);
                assert!(reasons[0].contains("unreachable"));
                assert!(reasons[1].contains("attr-defined"));
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_fail_diagnostic_count() {
        let comparator = comparator();
        let exact = comparator.compare(
            &invocation(Expectation::fail().with_count(2)),
            Ok(RunOutput::new(Some(1), TWO_ERRORS, "")),
        );
        assert!(exact.is_match());

        let wrong = comparator.compare(
            &invocation(Expectation::fail().with_count(3)),
            Ok(RunOutput::new(Some(1), TWO_ERRORS, "")),
        );
        assert!(wrong.is_mismatch());
    }

    #[test]
    fn test_substring_found_on_stderr() {
        let verdict = comparator().compare(
            &invocation(Expectation::fail().with_contains(["plugin not found"])),
            Ok(RunOutput::new(Some(1), "a.py:1: error: x\n", "warning: plugin not found\n")),
        );
        assert!(verdict.is_match());
    }

    #[test]
    fn test_unknown_exit_code_is_error_regardless_of_expectation() {
        let comparator = comparator();
        for expected in [Expectation::pass(), Expectation::fail()] {
            let verdict = comparator.compare(
                &invocation(expected),
                Ok(RunOutput::new(Some(2), "", "mypy: error: unrecognized arguments")),
            );
            assert!(verdict.is_error());
            assert!(matches!(
                verdict.status,
                VerdictStatus::Errored {
                    kind: ErrorKind::ToolError,
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_signal_termination_is_tool_error() {
        let verdict = comparator().compare(
            &invocation(Expectation::pass()),
            Ok(RunOutput::new(None, "", "")),
        );
        assert_eq!(verdict.exit_class, Some(ExitClass::ToolError(None)));
        assert!(verdict.is_error());
    }

    #[test]
    fn test_run_errors_become_errored_verdicts() {
        let comparator = comparator();
        let timeout = comparator.compare(
            &invocation(Expectation::pass()),
            Err(RunError::Timeout {
                timeout: Duration::from_secs(1),
            }),
        );
        assert!(matches!(
            timeout.status,
            VerdictStatus::Errored {
                kind: ErrorKind::Timeout,
                ..
            }
        ));

        let launch = comparator.compare(
            &invocation(Expectation::pass()),
            Err(RunError::Launch {
                program: "mypy".to_string(),
                reason: "not found".to_string(),
            }),
        );
        assert!(matches!(
            launch.status,
            VerdictStatus::Errored {
                kind: ErrorKind::Launch,
                ..
            }
        ));
        assert_eq!(launch.actual_label(), "launch");
    }

    #[test]
    fn test_verdict_equality_ignores_elapsed() {
        let comparator = comparator();
        let fast = comparator.compare(
            &invocation(Expectation::fail()),
            Ok(RunOutput::new(Some(1), TWO_ERRORS, "").with_elapsed(Duration::from_millis(52))),
        );
        let slow = comparator.compare(
            &invocation(Expectation::fail()),
            Ok(RunOutput::new(Some(1), TWO_ERRORS, "").with_elapsed(Duration::from_millis(53))),
        );
        assert_ne!(fast.elapsed, slow.elapsed);
        assert_eq!(fast, slow);

        let other = comparator.compare(
            &invocation(Expectation::fail()),
            Ok(RunOutput::new(Some(1), "a.py:1: error: x\n", "")),
        );
        assert_ne!(fast, other);
    }

    #[test]
    fn test_custom_exit_code_policy() {
        let checker = CheckerConfig::new("pyright").with_exit_codes(ExitCodePolicy {
            clean: vec![0],
            errors_found: vec![1, 3],
        });
        let comparator = Comparator::new(&checker).unwrap();
        let verdict = comparator.compare(
            &invocation(Expectation::fail()),
            Ok(RunOutput::new(Some(3), "", "")),
        );
        assert!(verdict.is_match());
    }
}
