//! Run command implementation.
//!
//! Loads the notebook, starts the interpreter bridge and replays every cell.

use std::path::Path;

use anyhow::Context;
use nbreplay_core::{NotebookRunner, ProcessSessionFactory, RunPolicy};

use crate::report::ConsoleReporter;

/// Replay a notebook. Returns whether it passed.
pub async fn execute(
    notebook_path: &Path,
    policy: RunPolicy,
    interpreter: &[String],
    show_diff: bool,
) -> anyhow::Result<bool> {
    let notebook = nbreplay_ipynb::load_notebook(notebook_path)?;

    let (program, args) = interpreter
        .split_first()
        .context("No interpreter command given")?;
    let factory = ProcessSessionFactory::new(program, args.to_vec())
        .with_context(|| format!("Cannot start interpreter `{}`", program))?;

    let mut reporter = ConsoleReporter::stdout(show_diff);
    reporter.print_header(notebook_path);

    let mut runner = NotebookRunner::new(policy, factory)?;
    runner.set_callback(reporter);
    let summary = runner.run(&notebook).await?;

    tracing::debug!(
        "Finished {} after {} pass(es) in {:.2}s",
        notebook.name,
        summary.state.run_attempt,
        summary.elapsed.as_secs_f64()
    );
    Ok(summary.passed())
}
