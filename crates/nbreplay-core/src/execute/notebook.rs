//! Running a whole notebook, with restarts.

use std::time::{Duration, Instant};

use crate::collect::OutputCollector;
use crate::compare::OutputComparator;
use crate::error::Result;
use crate::notebook::{Cell, CellType, Notebook, OutputRecord};
use crate::policy::RunPolicy;
use crate::session::{InterpreterSession, SessionFactory};
use crate::tally::ResultTally;

use super::cell::{CellReport, CellRunner};

/// Callback for observing a notebook run.
///
/// All methods default to doing nothing.
pub trait RunCallback: Send {
    /// A pass over the notebook begins on a fresh session. `attempt` starts at 1.
    fn on_pass_started(&mut self, _attempt: u32) {}

    /// A markdown cell was passed over.
    fn on_markdown(&mut self, _source: &str) {}

    /// A code cell is about to run.
    fn on_cell_started(&mut self, _label: &str) {}

    /// A code cell reached its terminal state.
    fn on_cell_finished(&mut self, _report: &CellReport) {}

    /// A pass ended. `restarting` is set when another pass follows.
    fn on_pass_finished(&mut self, _state: &NotebookRunState, _restarting: bool, _elapsed: Duration) {}
}

/// Callback that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallback;

impl RunCallback for NoopCallback {}

/// State carried across the passes of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotebookRunState {
    /// Current pass, starting at 1
    pub run_attempt: u32,
    /// Restarts allowed after a hard fail
    pub max_restarts: u32,
    /// Outcomes of the current pass
    pub tally: ResultTally,
    /// Set when the run stopped early on a hard fail
    pub abort_requested: bool,
    /// Reports of the current pass, in document order
    pub reports: Vec<CellReport>,
}

impl NotebookRunState {
    pub fn new(max_restarts: u32) -> Self {
        Self {
            max_restarts,
            ..Self::default()
        }
    }

    /// Whether a hard fail in the current pass may still restart the notebook.
    pub fn can_restart(&self) -> bool {
        self.run_attempt <= self.max_restarts
    }

    /// Most passes the run may take: the first plus every restart.
    pub fn max_passes(&self) -> u32 {
        self.max_restarts.saturating_add(1)
    }

    fn begin_pass(&mut self) {
        self.run_attempt += 1;
        self.tally.reset();
        self.reports.clear();
    }
}

/// Outcome of a complete run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// State after the final pass
    pub state: NotebookRunState,
    /// Wall time across all passes
    pub elapsed: Duration,
}

impl RunSummary {
    /// Whether the run passed: no failing cell in the final pass.
    pub fn passed(&self) -> bool {
        self.state.tally.is_success()
    }
}

/// Runs the code cells of a notebook in document order.
///
/// Every pass gets a fresh session from the factory. A hard fail restarts
/// the notebook from its first cell while the restart budget lasts.
pub struct NotebookRunner<F: SessionFactory> {
    policy: RunPolicy,
    comparator: OutputComparator,
    factory: F,
    callback: Box<dyn RunCallback>,
}

impl<F: SessionFactory> NotebookRunner<F> {
    /// Create a runner.
    ///
    /// Fails with `Error::UnknownSelector` if the policy enables an output
    /// type that is not registered.
    pub fn new(policy: RunPolicy, factory: F) -> Result<Self> {
        let comparator = OutputComparator::new(&policy.enabled_output_selectors)?;
        Ok(Self {
            policy,
            comparator,
            factory,
            callback: Box::new(NoopCallback),
        })
    }

    /// Set the run callback.
    pub fn set_callback(&mut self, callback: impl RunCallback + 'static) {
        self.callback = Box::new(callback);
    }

    pub fn policy(&self) -> &RunPolicy {
        &self.policy
    }

    /// Run the notebook to completion.
    ///
    /// Errors are returned only when a session cannot be opened or breaks
    /// while running the evaluation preamble. Everything a cell does ends up
    /// in its report.
    pub async fn run(&mut self, notebook: &Notebook) -> Result<RunSummary> {
        let started = Instant::now();
        let mut state = NotebookRunState::new(self.policy.max_notebook_restarts);

        loop {
            state.begin_pass();
            tracing::info!(
                "Starting pass {} of {} over {}",
                state.run_attempt,
                state.max_passes(),
                notebook.name
            );
            self.callback.on_pass_started(state.run_attempt);

            let mut session = self.factory.open().await?;
            let pass = self.run_pass(&mut session, notebook, &mut state).await;
            if let Err(e) = session.close().await {
                tracing::warn!("Failed to close interpreter session: {}", e);
            }
            let restarting = pass?;

            self.callback
                .on_pass_finished(&state, restarting, started.elapsed());
            if !restarting {
                break;
            }
            tracing::info!("Hard fail in pass {}, restarting notebook", state.run_attempt);
        }

        Ok(RunSummary {
            state,
            elapsed: started.elapsed(),
        })
    }

    /// One pass over the cells. Returns whether the notebook must restart.
    async fn run_pass(
        &mut self,
        session: &mut F::Session,
        notebook: &Notebook,
        state: &mut NotebookRunState,
    ) -> Result<bool> {
        if let Some(code) = &self.policy.eval_preamble {
            run_preamble(session, code, self.policy.default_timeout).await?;
        }

        for cell in &notebook.cells {
            match cell.cell_type {
                CellType::Markdown => {
                    if let Some(source) = &cell.source {
                        self.callback.on_markdown(source);
                    }
                    continue;
                }
                CellType::Raw => continue,
                CellType::Code => {}
            }
            if cell.is_blank() {
                continue;
            }

            let label = cell_label(&notebook.name, cell);
            self.callback.on_cell_started(&label);

            let report = CellRunner::new(&self.policy, &self.comparator)
                .run(session, cell, &label)
                .await;
            tracing::debug!("{}: {} (passed: {})", label, report.outcome, report.passed);

            state.tally.record(report.outcome, report.passed);
            self.callback.on_cell_finished(&report);
            let hard_fail = report.is_hard_fail();
            state.reports.push(report);

            if hard_fail {
                if state.can_restart() {
                    return Ok(true);
                }
                if self.policy.abort_on_fail {
                    tracing::info!("Aborting run after hard fail in {}", label);
                    state.abort_requested = true;
                    return Ok(false);
                }
            }
        }

        Ok(false)
    }
}

/// Run the evaluation preamble to idle.
///
/// Problems inside the preamble are only logged; a broken session is an error.
async fn run_preamble<S>(session: &mut S, code: &str, timeout: Duration) -> Result<()>
where
    S: InterpreterSession + ?Sized,
{
    let token = session.execute(code).await?;
    match OutputCollector::collect(session, &token, timeout).await {
        Ok(outputs) => {
            for output in &outputs {
                if let OutputRecord::Error { ename, evalue, .. } = output {
                    tracing::warn!("Evaluation preamble raised {}: {}", ename, evalue);
                }
            }
            Ok(())
        }
        Err(e) if e.is_timeout() => {
            tracing::warn!("Evaluation preamble did not finish: {}", e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Label of a code cell, e.g. `ipynb.demo.In [  3]`.
pub fn cell_label(notebook: &str, cell: &Cell) -> String {
    match cell.execution_count {
        Some(count) => format!("{}.In [{:>3}]", notebook, count),
        None => format!("{}.In [---]", notebook),
    }
}
