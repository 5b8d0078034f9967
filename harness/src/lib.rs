pub mod comparator;
pub mod executor;
pub mod pipeline;
pub mod report;
pub mod runner;

pub use comparator::{Comparator, ErrorKind, Verdict, VerdictStatus};
pub use executor::{default_jobs, Executor, RunOutcome};
pub use pipeline::{prepare, run, HarnessError, HarnessResult, RunOptions};
pub use report::{ExitStatus, Report, ReportFormat, Summary};
pub use runner::{Checker, ProcessChecker, RunError, RunOutput, RunResult};
