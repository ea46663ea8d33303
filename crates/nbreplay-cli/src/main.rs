//! nbreplay CLI - replay notebooks as regression tests.

mod colors;
mod report;
mod run;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use nbreplay_core::{OutputSelector, RunPolicy};

#[derive(Parser)]
#[command(name = "nbreplay")]
#[command(about = "Replay a notebook and compare fresh outputs with the stored ones")]
#[command(version)]
struct Cli {
    /// Path to the notebook (.ipynb file)
    file: PathBuf,

    /// Seconds to wait for a cell before it times out
    #[arg(short, long, default_value_t = 300)]
    timeout: u64,

    /// Retries of a cell that timed out
    #[arg(long, num_args = 0..=1, default_value_t = 2, default_missing_value = "2")]
    rerun_if_timeout: u32,

    /// Restarts of the whole notebook after a failing cell
    #[arg(long, num_args = 0..=1, default_value_t = 0, default_missing_value = "1")]
    restart_if_fail: u32,

    /// Count output mismatches as failures
    #[arg(short, long, conflicts_with = "lazy")]
    strict: bool,

    /// Never count output mismatches as failures
    #[arg(short, long)]
    lazy: bool,

    /// Code to run on every fresh interpreter before the first cell
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    eval: Option<String>,

    /// Comma separated output types to compare, e.g. `stream.stdout,display_data.image/png`
    #[arg(long, default_value = "stream.stdout,execute_result.text/plain")]
    tested_types: String,

    /// Count timed out cells as passing
    #[arg(long)]
    pass_if_timeout: bool,

    /// Print the diff of mismatched outputs
    #[arg(short = 'd', long)]
    show_diff: bool,

    /// Stop at the first failing cell once no restarts are left
    #[arg(long)]
    abort_if_fail: bool,

    /// Extra interpreter arguments, separated by `;`
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    extra_arguments: String,

    /// Start the interpreter with inline plotting
    #[arg(short = 'y', long)]
    pylab: bool,

    /// Print the fresh output of every cell
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Interpreter bridge command, e.g. `-- python3 bridge.py`
    #[arg(last = true, required = true, value_name = "INTERPRETER")]
    interpreter: Vec<String>,
}

impl Cli {
    fn policy(&self) -> anyhow::Result<RunPolicy> {
        let selectors = OutputSelector::parse_list(&self.tested_types)?;
        let mut policy = RunPolicy::default()
            .with_timeout(Duration::from_secs(self.timeout))
            .with_max_retries(self.rerun_if_timeout)
            .with_max_restarts(self.restart_if_fail)
            .with_strict(self.strict && !self.lazy)
            .with_pass_if_timeout(self.pass_if_timeout)
            .with_abort_on_fail(self.abort_if_fail)
            .with_selectors(selectors)
            .with_verbose(self.verbose);
        if let Some(code) = self.eval.as_deref().filter(|c| !c.trim().is_empty()) {
            policy = policy.with_preamble(code);
        }
        Ok(policy)
    }

    /// Interpreter command line with the extra arguments appended.
    fn interpreter_command(&self) -> Vec<String> {
        let mut command = self.interpreter.clone();
        if self.pylab {
            command.push("--pylab=inline".to_string());
        }
        command.extend(
            self.extra_arguments
                .split(';')
                .map(str::trim)
                .filter(|arg| !arg.is_empty())
                .map(String::from),
        );
        command
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let policy = cli.policy()?;
    let passed = run::execute(&cli.file, policy, &cli.interpreter_command(), cli.show_diff).await?;

    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
