//! Bounded parallel execution of planned invocations.
//!
//! Every invocation runs on its own task behind a semaphore sized to the job
//! count. Tasks share nothing mutable: each returns its verdict and the
//! results are merged once the join set drains. A shutdown future races the
//! run; when it fires, the join set is shut down and no report is built.
//! Dropping a running check kills its checker and the checker's whole
//! process group.

use crate::comparator::{Comparator, Verdict};
use crate::report::Report;
use crate::runner::Checker;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use suite::{Invocation, Plan};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Outcome of a complete run attempt
#[derive(Debug)]
pub enum RunOutcome {
    Completed(Report),
    Interrupted,
}

/// Default worker count: the available CPU parallelism
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

pub struct Executor {
    checker: Arc<dyn Checker>,
    comparator: Arc<Comparator>,
    jobs: usize,
}

impl Executor {
    pub fn new(checker: Arc<dyn Checker>, comparator: Comparator) -> Self {
        Self {
            checker,
            comparator: Arc::new(comparator),
            jobs: default_jobs(),
        }
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    fn spawn_all(&self, invocations: &[Invocation]) -> JoinSet<Verdict> {
        let semaphore = Arc::new(Semaphore::new(self.jobs));
        let mut tasks = JoinSet::new();

        for invocation in invocations.iter().cloned() {
            let semaphore = Arc::clone(&semaphore);
            let checker = Arc::clone(&self.checker);
            let comparator = Arc::clone(&self.comparator);

            tasks.spawn(async move {
                // The semaphore is never closed, so acquiring only waits.
                let _permit = semaphore.acquire_owned().await;
                debug!("Starting {}", invocation);
                let result = checker.check(&invocation.command).await;
                let verdict = comparator.compare(&invocation, result);
                info!(
                    "Finished {} in {:.2}s: {}",
                    invocation,
                    verdict.elapsed.as_secs_f64(),
                    verdict.actual_label()
                );
                verdict
            });
        }

        tasks
    }

    /// Run every invocation of `plan` unless `shutdown` completes first
    pub async fn run<F>(&self, plan: &Plan, shutdown: F) -> RunOutcome
    where
        F: Future<Output = ()>,
    {
        let started_at = Utc::now();
        let start = Instant::now();
        info!(
            "Running {} invocations with {} workers using the {} checker",
            plan.invocations.len(),
            self.jobs,
            self.checker.name()
        );

        let mut tasks = self.spawn_all(&plan.invocations);
        let mut verdicts = Vec::with_capacity(plan.invocations.len());
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    warn!(
                        "Shutdown requested, terminating {} outstanding invocations",
                        tasks.len()
                    );
                    tasks.shutdown().await;
                    return RunOutcome::Interrupted;
                }
                next = tasks.join_next() => match next {
                    Some(Ok(verdict)) => verdicts.push(verdict),
                    // The aggregator reports the invocation as missing.
                    Some(Err(e)) => error!("Invocation task failed: {}", e),
                    None => break,
                },
            }
        }

        RunOutcome::Completed(Report::aggregate(
            &plan.invocations,
            verdicts,
            plan.deselected,
            started_at,
            start.elapsed(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{RunOutput, RunResult};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use suite::{CheckerConfig, CommandSpec, Expectation};

    /// Tracks the peak number of concurrent checks
    struct CountingChecker {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Checker for CountingChecker {
        async fn check(&self, _command: &CommandSpec) -> RunResult<RunOutput> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(RunOutput::new(Some(0), "", ""))
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    struct HangingChecker;

    #[async_trait]
    impl Checker for HangingChecker {
        async fn check(&self, _command: &CommandSpec) -> RunResult<RunOutput> {
            std::future::pending::<()>().await;
            unreachable!()
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }

    fn plan(count: usize) -> Plan {
        let invocations = (0..count)
            .map(|i| Invocation {
                fixture: format!("fixture-{:02}", i),
                profile: "default".to_string(),
                expected: Expectation::pass(),
                command: CommandSpec {
                    program: "mypy".to_string(),
                    args: vec![],
                    env: Default::default(),
                    working_dir: PathBuf::from("."),
                    timeout: Duration::from_secs(1),
                },
            })
            .collect();
        Plan {
            invocations,
            deselected: 0,
        }
    }

    fn comparator() -> Comparator {
        Comparator::new(&CheckerConfig::default()).unwrap()
    }

    #[test]
    fn test_default_jobs_is_positive() {
        assert!(default_jobs() >= 1);
    }

    #[tokio::test]
    async fn test_worker_pool_is_bounded() {
        let checker = Arc::new(CountingChecker {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let executor = Executor::new(checker.clone(), comparator()).with_jobs(2);

        let outcome = executor.run(&plan(8), std::future::pending()).await;
        let RunOutcome::Completed(report) = outcome else {
            panic!("run should complete");
        };

        assert_eq!(report.summary.matched, 8);
        assert!(checker.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_run() {
        let executor = Executor::new(Arc::new(HangingChecker), comparator()).with_jobs(4);
        let outcome = executor
            .run(&plan(3), tokio::time::sleep(Duration::from_millis(50)))
            .await;
        assert!(matches!(outcome, RunOutcome::Interrupted));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_shutdown_kills_running_checker_processes() {
        use crate::runner::liveness::{read_pid, wait_until_gone};
        use crate::runner::ProcessChecker;

        let dir = tempfile::TempDir::new().unwrap();
        let mut plan = plan(1);
        plan.invocations[0].command = CommandSpec {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "echo $$ > sh.pid; sleep 30 & echo $! > sleep.pid; wait".to_string(),
            ],
            env: Default::default(),
            working_dir: dir.path().to_path_buf(),
            timeout: Duration::from_secs(60),
        };

        let sleep_pid_file = dir.path().join("sleep.pid");
        let shutdown = {
            let sleep_pid_file = sleep_pid_file.clone();
            async move {
                read_pid(&sleep_pid_file).await;
            }
        };

        let executor = Executor::new(Arc::new(ProcessChecker::new()), comparator()).with_jobs(1);
        let outcome = executor.run(&plan, shutdown).await;
        assert!(matches!(outcome, RunOutcome::Interrupted));

        let sh = read_pid(&dir.path().join("sh.pid")).await;
        let sleep = read_pid(&sleep_pid_file).await;
        assert!(wait_until_gone(sh).await, "checker {} survived shutdown", sh);
        assert!(wait_until_gone(sleep).await, "grandchild {} survived shutdown", sleep);
    }

    #[test]
    fn test_with_jobs_clamps_to_one() {
        let executor = Executor::new(Arc::new(HangingChecker), comparator()).with_jobs(0);
        assert_eq!(executor.jobs(), 1);
    }
}
