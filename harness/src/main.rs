use clap::{Args, Parser, Subcommand};
use harness::{
    prepare, run, ExitStatus, HarnessError, HarnessResult, ProcessChecker, ReportFormat,
    RunOptions, RunOutcome,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use suite::{profile_command, HarnessConfig, DEFAULT_CONFIG_FILE};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tc-harness")]
#[command(about = "Run a type checker against fixture projects and verify the expected outcomes")]
struct Cli {
    /// Harness configuration file (checker command, exit codes, profiles)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Selection {
    /// Directory containing the fixture projects
    #[arg(long, default_value = "fixtures")]
    root: PathBuf,
    /// Only run these profiles (repeatable)
    #[arg(long = "profile", value_name = "NAME")]
    profiles: Vec<String>,
    /// Only run fixtures whose name matches this glob (repeatable)
    #[arg(long = "fixture", value_name = "GLOB")]
    fixtures: Vec<String>,
}

impl Selection {
    fn options(&self) -> RunOptions {
        RunOptions::new(self.root.clone())
            .with_profiles(self.profiles.iter().cloned())
            .with_fixtures(self.fixtures.iter().cloned())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run every planned invocation and report the verdicts
    Run {
        #[command(flatten)]
        selection: Selection,
        /// Per-invocation timeout in seconds (overrides the config and every fixture)
        #[arg(long, value_name = "SECONDS", value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,
        /// Maximum number of concurrent checker processes
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Report format
        #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the planned invocations without running them
    List {
        #[command(flatten)]
        selection: Selection,
    },
    /// Show the profile registry
    Profiles,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> HarnessResult<HarnessConfig> {
    let config = match path {
        Some(path) => HarnessConfig::from_file(path)?,
        None => HarnessConfig::load_or_default(Path::new(DEFAULT_CONFIG_FILE))?,
    };
    Ok(config)
}

/// Completes on Ctrl-C; never completes if the handler cannot be installed
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match execute(cli).await {
        Ok(status) => ExitCode::from(status.code()),
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(e.exit_status().code())
        }
    }
}

async fn execute(cli: Cli) -> HarnessResult<ExitStatus> {
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Run {
            selection,
            timeout,
            jobs,
            format,
            output,
        } => {
            let mut options = selection.options();
            if let Some(jobs) = jobs {
                options = options.with_jobs(jobs);
            }
            if let Some(timeout) = timeout {
                options = options.with_timeout(Duration::from_secs(timeout));
            }
            run_fixtures(&config, &options, format, output).await
        }
        Commands::List { selection } => {
            list_invocations(&config, &selection.options())?;
            Ok(ExitStatus::Success)
        }
        Commands::Profiles => {
            list_profiles(&config);
            Ok(ExitStatus::Success)
        }
    }
}

async fn run_fixtures(
    config: &HarnessConfig,
    options: &RunOptions,
    format: ReportFormat,
    output: Option<PathBuf>,
) -> HarnessResult<ExitStatus> {
    let checker = Arc::new(ProcessChecker::new());
    let outcome = run(config, options, checker, shutdown_signal()).await?;

    let report = match outcome {
        RunOutcome::Completed(report) => report,
        RunOutcome::Interrupted => {
            eprintln!("Interrupted, no report written.");
            return Ok(ExitStatus::Interrupted);
        }
    };

    let rendered = report.render(format)?;
    match output {
        Some(path) => {
            tokio::fs::write(&path, rendered).await?;
            info!("Report written to {}", path.display());
        }
        None => print!("{}", rendered),
    }

    Ok(report.exit_status())
}

fn list_invocations(config: &HarnessConfig, options: &RunOptions) -> Result<(), HarnessError> {
    let plan = prepare(config, options)?;

    for invocation in &plan.invocations {
        println!(
            "{}  expect {}\n    $ {}",
            invocation,
            invocation.expected,
            invocation.command.display_line()
        );
    }
    println!(
        "\n{} invocations planned, {} deselected",
        plan.invocations.len(),
        plan.deselected
    );

    Ok(())
}

fn list_profiles(config: &HarnessConfig) {
    let registry = config.registry();
    println!("Checker: {}", config.checker.command);
    println!("Profiles:");

    for profile in registry.profiles() {
        let (args, env) = profile_command(profile, &config.checker);
        println!(
            "  - {}: {} {}",
            profile.name,
            config.checker.command,
            args.join(" ")
        );
        for (key, value) in &env {
            println!("      {}={}", key, value);
        }
    }
}
