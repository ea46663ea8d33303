//! Running a single cell.
//!
//! ```text
//! NotStarted ──skip──────────────────────────────► Skipped
//!     │
//!     ▼
//! Running(n) ──timeout, n ≤ retries──► TimedOut(n) ──► Running(n+1)
//!     │      ──timeout, n > retries──► TimedOut(n)          (terminal)
//!     │      ──session failure──────► Errored
//!     │      ──error output─────────► Errored
//!     └──────── outputs ────────────► Succeeded           (compared)
//! ```
//!
//! An `ignore` directive turns any of the terminal states into `Ignored`.

use std::time::Duration;

use crate::collect::OutputCollector;
use crate::compare::{Comparison, DiffReport, OutputComparator};
use crate::directive::Directives;
use crate::error::{Error, Result};
use crate::notebook::{Cell, OutputKind, OutputRecord};
use crate::policy::RunPolicy;
use crate::session::InterpreterSession;
use crate::tally::CellOutcome;

/// Where a cell is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    NotStarted,
    Running { attempt: u32 },
    /// The given attempt timed out
    TimedOut(u32),
    Errored,
    Succeeded,
    Skipped,
    Ignored,
}

impl CellState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CellState::NotStarted | CellState::Running { .. })
    }
}

/// Why a cell failed to run cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellFailure {
    /// The code raised inside the interpreter
    Raised {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
    /// The session or the cell itself was unusable
    Message(String),
}

/// Result of running one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellReport {
    /// Display label, e.g. `ipynb.demo.In [  3]`
    pub label: String,
    pub outcome: CellOutcome,
    /// Whether the outcome counts as passing under the active policy
    pub passed: bool,
    /// Terminal state
    pub state: CellState,
    /// Number of times the source was submitted
    pub attempts: u32,
    /// Attempts that timed out and were retried
    pub retries: u32,
    /// Outcome hidden behind an `ignore` directive
    pub cause: Option<CellOutcome>,
    pub diff: Option<DiffReport>,
    pub failure: Option<CellFailure>,
    /// Fresh stdout and plain-text results, when captured
    pub stdout: Option<String>,
    /// Fresh stderr, when captured
    pub stderr: Option<String>,
}

impl CellReport {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            outcome: CellOutcome::Skip,
            passed: true,
            state: CellState::NotStarted,
            attempts: 0,
            retries: 0,
            cause: None,
            diff: None,
            failure: None,
            stdout: None,
            stderr: None,
        }
    }

    fn finish(mut self, state: CellState, outcome: CellOutcome, passed: bool) -> Self {
        self.state = state;
        self.outcome = outcome;
        self.passed = passed;
        self
    }

    fn ignored(self, cause: CellOutcome) -> Self {
        let mut report = self.finish(CellState::Ignored, CellOutcome::Ignore, true);
        report.cause = Some(cause);
        report
    }

    fn malformed(mut self, error: &Error) -> Self {
        self.failure = Some(CellFailure::Message(error.to_string()));
        self.finish(CellState::Errored, CellOutcome::Error, false)
    }

    /// Whether this cell failed under the active policy.
    pub fn is_hard_fail(&self) -> bool {
        !self.passed
    }
}

/// Drives one cell through execution, retries, and comparison.
///
/// Has no side effects beyond the messages it exchanges with the session.
pub struct CellRunner<'a> {
    policy: &'a RunPolicy,
    comparator: &'a OutputComparator,
}

impl<'a> CellRunner<'a> {
    pub fn new(policy: &'a RunPolicy, comparator: &'a OutputComparator) -> Self {
        Self { policy, comparator }
    }

    /// Run `cell` on `session`.
    pub async fn run<S>(&self, session: &mut S, cell: &Cell, label: &str) -> CellReport
    where
        S: InterpreterSession + ?Sized,
    {
        let report = CellReport::new(label);

        let Some(source) = cell.source.as_deref() else {
            return report.malformed(&Error::MalformedCell("cell has no source".to_string()));
        };

        let directives = Directives::parse(source);
        if directives.skip() {
            tracing::debug!("{}: skipped", label);
            return report.finish(CellState::Skipped, CellOutcome::Skip, true);
        }

        let timeout = match directives.timeout() {
            Ok(timeout) => timeout.unwrap_or(self.policy.default_timeout),
            Err(e) => return report.malformed(&e),
        };

        self.run_attempts(session, cell, source, &directives, timeout, report)
            .await
    }

    async fn run_attempts<S>(
        &self,
        session: &mut S,
        cell: &Cell,
        source: &str,
        directives: &Directives,
        timeout: Duration,
        mut report: CellReport,
    ) -> CellReport
    where
        S: InterpreterSession + ?Sized,
    {
        let mut state = CellState::NotStarted;

        let outputs = loop {
            let attempt = match state {
                CellState::TimedOut(previous) => {
                    report.retries += 1;
                    previous + 1
                }
                _ => 1,
            };
            state = CellState::Running { attempt };
            report.attempts = attempt;
            tracing::debug!("{}: {:?}", report.label, state);

            match execute(session, source, timeout).await {
                Ok(outputs) => break outputs,
                Err(e) if e.is_timeout() => {
                    state = CellState::TimedOut(attempt);
                    tracing::debug!("{}: {:?}", report.label, state);

                    if directives.ignore() {
                        return report.ignored(CellOutcome::Timeout);
                    }
                    if attempt <= self.policy.max_retries_on_timeout {
                        continue;
                    }
                    let passed = self.timeout_passes(directives);
                    return report.finish(state, CellOutcome::Timeout, passed);
                }
                Err(e) => {
                    tracing::debug!("{}: session failure: {}", report.label, e);
                    report.failure = Some(CellFailure::Message(e.to_string()));
                    if directives.ignore() {
                        return report.ignored(CellOutcome::SessionFailure);
                    }
                    return report.finish(CellState::Errored, CellOutcome::SessionFailure, false);
                }
            }
        };

        if (self.policy.verbose || directives.verbose()) && !directives.quiet() {
            report.stdout = captured_text(&outputs, |record| match record {
                OutputRecord::Stream { name, text } if name == "stdout" => Some(text.clone()),
                OutputRecord::ExecuteResult { data, .. } => data.text("text/plain"),
                _ => None,
            });
            report.stderr = captured_text(&outputs, |record| match record {
                OutputRecord::Stream { name, text } if name == "stderr" => Some(text.clone()),
                _ => None,
            });
        }

        if let Some(OutputRecord::Error {
            ename,
            evalue,
            traceback,
        }) = outputs.iter().find(|o| o.kind() == OutputKind::Error)
        {
            report.failure = Some(CellFailure::Raised {
                ename: ename.clone(),
                evalue: evalue.clone(),
                traceback: traceback.clone(),
            });
            if directives.ignore() {
                return report.ignored(CellOutcome::Error);
            }
            return report.finish(CellState::Errored, CellOutcome::Error, false);
        }

        match self.comparator.compare(&cell.outputs, &outputs) {
            Comparison::Match => report.finish(CellState::Succeeded, CellOutcome::Success, true),
            Comparison::Mismatch(diff) => {
                report.diff = Some(diff);
                if directives.ignore() {
                    return report.ignored(CellOutcome::Diff);
                }
                let passed = self.diff_passes(directives);
                report.finish(CellState::Succeeded, CellOutcome::Diff, passed)
            }
        }
    }

    /// Whether an unresolved timeout passes.
    fn timeout_passes(&self, directives: &Directives) -> bool {
        if directives.pass_if_timeout() {
            true
        } else if directives.fail_if_timeout() {
            false
        } else {
            self.policy.pass_if_timeout_by_default
        }
    }

    /// Whether a diff passes. Cell directives win over the run-level default.
    fn diff_passes(&self, directives: &Directives) -> bool {
        if directives.strict() {
            false
        } else if directives.lazy() {
            true
        } else {
            !self.policy.strict_by_default
        }
    }
}

/// Submit `source` and collect its outputs until the interpreter goes idle.
async fn execute<S>(session: &mut S, source: &str, timeout: Duration) -> Result<Vec<OutputRecord>>
where
    S: InterpreterSession + ?Sized,
{
    let token = session.execute(source).await?;
    OutputCollector::collect(session, &token, timeout).await
}

fn captured_text(
    outputs: &[OutputRecord],
    select: impl Fn(&OutputRecord) -> Option<String>,
) -> Option<String> {
    let lines: Vec<String> = outputs
        .iter()
        .filter_map(select)
        .map(|text| text.trim().to_string())
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;

    use super::*;
    use crate::compare::OutputSelector;
    use crate::session::{ExecutionToken, KernelMessage};

    /// What the scripted session does with one submission.
    enum Reply {
        Outputs(Vec<KernelMessage>),
        Hang,
        Fail,
    }

    /// Session that answers submissions from a script, in order.
    struct ScriptedSession {
        replies: VecDeque<Reply>,
        pending: VecDeque<KernelMessage>,
        submitted: Vec<String>,
        hang: bool,
    }

    impl ScriptedSession {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: replies.into(),
                pending: VecDeque::new(),
                submitted: Vec::new(),
                hang: false,
            }
        }
    }

    fn stdout(text: &str) -> Reply {
        Reply::Outputs(vec![KernelMessage::stream(
            &ExecutionToken::from_string("t"),
            "stdout",
            text,
        )])
    }

    #[async_trait]
    impl InterpreterSession for ScriptedSession {
        async fn execute(&mut self, code: &str) -> Result<ExecutionToken> {
            self.submitted.push(code.to_string());
            let token = ExecutionToken::from_string(format!("t{}", self.submitted.len()));
            self.pending.clear();
            self.hang = false;

            match self.replies.pop_front() {
                Some(Reply::Outputs(messages)) => {
                    for message in messages {
                        self.pending
                            .push_back(KernelMessage { parent_id: token.clone(), ..message });
                    }
                    self.pending.push_back(KernelMessage::idle(&token));
                }
                Some(Reply::Hang) | None => self.hang = true,
                Some(Reply::Fail) => return Err(Error::Session("kernel died".to_string())),
            }
            Ok(token)
        }

        async fn listen(&mut self, _token: &ExecutionToken, timeout: Duration) -> Result<KernelMessage> {
            if self.hang {
                return Err(Error::TimedOut {
                    seconds: timeout.as_secs(),
                });
            }
            self.pending
                .pop_front()
                .ok_or_else(|| Error::Session("no message".to_string()))
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    async fn run_cell(policy: &RunPolicy, cell: &Cell, replies: Vec<Reply>) -> (CellReport, ScriptedSession) {
        let comparator = OutputComparator::new(&policy.enabled_output_selectors).unwrap();
        let mut session = ScriptedSession::new(replies);
        let report = CellRunner::new(policy, &comparator)
            .run(&mut session, cell, "ipynb.test.In [  1]")
            .await;
        (report, session)
    }

    fn cell(source: &str, stored: &str) -> Cell {
        Cell::code(source).with_outputs(vec![OutputRecord::stdout(stored)])
    }

    #[tokio::test]
    async fn test_matching_output_succeeds() {
        let (report, session) =
            run_cell(&RunPolicy::default(), &cell("print(2+3)", "5\n"), vec![stdout("5\n")]).await;

        assert_eq!(report.outcome, CellOutcome::Success);
        assert_eq!(report.state, CellState::Succeeded);
        assert!(report.passed);
        assert_eq!(report.attempts, 1);
        assert_eq!(session.submitted, vec!["print(2+3)".to_string()]);
    }

    #[tokio::test]
    async fn test_diff_passes_by_default() {
        let (report, _) =
            run_cell(&RunPolicy::default(), &cell("print(2+3)", "5\n"), vec![stdout("6\n")]).await;

        assert_eq!(report.outcome, CellOutcome::Diff);
        assert!(report.passed);
        assert!(report.diff.is_some());
        assert!(report.failure.is_none());
    }

    #[tokio::test]
    async fn test_diff_precedence() {
        let strict_policy = RunPolicy::default().with_strict(true);

        let (report, _) =
            run_cell(&strict_policy, &cell("print(1)", "5"), vec![stdout("6")]).await;
        assert!(!report.passed);

        // Directive beats the run-level flag.
        let (report, _) =
            run_cell(&strict_policy, &cell("#! lazy\nprint(1)", "5"), vec![stdout("6")]).await;
        assert!(report.passed);

        let (report, _) = run_cell(
            &RunPolicy::default(),
            &cell("#! strict\nprint(1)", "5"),
            vec![stdout("6")],
        )
        .await;
        assert!(!report.passed);

        let (report, _) = run_cell(
            &strict_policy,
            &cell("#! strict, ignore\nprint(1)", "5"),
            vec![stdout("6")],
        )
        .await;
        assert_eq!(report.outcome, CellOutcome::Ignore);
        assert_eq!(report.cause, Some(CellOutcome::Diff));
        assert!(report.passed);
    }

    #[tokio::test]
    async fn test_skip_does_not_execute() {
        let (report, session) =
            run_cell(&RunPolicy::default(), &cell("#! skip\nprint(1)", "1"), vec![]).await;

        assert_eq!(report.outcome, CellOutcome::Skip);
        assert_eq!(report.state, CellState::Skipped);
        assert!(session.submitted.is_empty());
    }

    #[tokio::test]
    async fn test_retry_budget() {
        let policy = RunPolicy::default().with_max_retries(2);
        let (report, session) = run_cell(
            &policy,
            &cell("while True: pass", ""),
            vec![Reply::Hang, Reply::Hang, Reply::Hang, stdout("never")],
        )
        .await;

        assert_eq!(session.submitted.len(), 3);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.retries, 2);
        assert_eq!(report.outcome, CellOutcome::Timeout);
        assert_eq!(report.state, CellState::TimedOut(3));
        assert!(!report.passed);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let (report, session) = run_cell(
            &RunPolicy::default(),
            &cell("print(5)", "5"),
            vec![Reply::Hang, stdout("5")],
        )
        .await;

        assert_eq!(session.submitted.len(), 2);
        assert_eq!(report.retries, 1);
        assert_eq!(report.outcome, CellOutcome::Success);
    }

    #[tokio::test]
    async fn test_timeout_precedence() {
        let no_retry = RunPolicy::default().with_max_retries(0);
        let lenient = no_retry.clone().with_pass_if_timeout(true);

        let (report, _) = run_cell(&no_retry, &cell("x", ""), vec![Reply::Hang]).await;
        assert!(!report.passed);

        let (report, _) = run_cell(&lenient, &cell("x", ""), vec![Reply::Hang]).await;
        assert!(report.passed);

        let (report, _) =
            run_cell(&lenient, &cell("#! fail-if-timeout\nx", ""), vec![Reply::Hang]).await;
        assert!(!report.passed);

        let (report, _) = run_cell(
            &no_retry,
            &cell("#! pass-if-timeout, fail-if-timeout\nx", ""),
            vec![Reply::Hang],
        )
        .await;
        assert!(report.passed);
        assert_eq!(report.outcome, CellOutcome::Timeout);
    }

    #[tokio::test]
    async fn test_ignored_timeout_is_not_retried() {
        let (report, session) =
            run_cell(&RunPolicy::default(), &cell("#! ignore\nx", ""), vec![Reply::Hang]).await;

        assert_eq!(session.submitted.len(), 1);
        assert_eq!(report.outcome, CellOutcome::Ignore);
        assert_eq!(report.cause, Some(CellOutcome::Timeout));
        assert_eq!(report.state, CellState::Ignored);
    }

    #[tokio::test]
    async fn test_timeout_directive_overrides_default() {
        let policy = RunPolicy::default().with_max_retries(0);
        let (report, _) = run_cell(&policy, &cell("#! timeout:7\nx", ""), vec![Reply::Hang]).await;
        assert_eq!(report.outcome, CellOutcome::Timeout);

        let (report, session) =
            run_cell(&policy, &cell("#! timeout:soon\nx", ""), vec![stdout("")]).await;
        assert_eq!(report.outcome, CellOutcome::Error);
        assert!(matches!(report.failure, Some(CellFailure::Message(_))));
        assert!(session.submitted.is_empty());
    }

    #[tokio::test]
    async fn test_error_output_fails() {
        let raised = Reply::Outputs(vec![KernelMessage::error(
            &ExecutionToken::from_string("t"),
            "ZeroDivisionError",
            "division by zero",
            &["Traceback (most recent call last)", "1/0"],
        )]);
        let (report, _) = run_cell(&RunPolicy::default(), &cell("1/0", ""), vec![raised]).await;

        assert_eq!(report.outcome, CellOutcome::Error);
        assert_eq!(report.state, CellState::Errored);
        assert!(report.is_hard_fail());
        let Some(CellFailure::Raised { ename, traceback, .. }) = &report.failure else {
            panic!("expected a raised failure");
        };
        assert_eq!(ename, "ZeroDivisionError");
        assert_eq!(traceback.len(), 2);
    }

    #[tokio::test]
    async fn test_session_failure() {
        let (report, _) = run_cell(&RunPolicy::default(), &cell("x", ""), vec![Reply::Fail]).await;
        assert_eq!(report.outcome, CellOutcome::SessionFailure);
        assert!(report.is_hard_fail());

        let (report, _) =
            run_cell(&RunPolicy::default(), &cell("#! ignore\nx", ""), vec![Reply::Fail]).await;
        assert_eq!(report.outcome, CellOutcome::Ignore);
        assert_eq!(report.cause, Some(CellOutcome::SessionFailure));
        assert!(report.failure.is_some());
    }

    #[tokio::test]
    async fn test_missing_source_is_malformed() {
        let mut cell = Cell::code("");
        cell.source = None;
        let (report, session) = run_cell(&RunPolicy::default(), &cell, vec![]).await;

        assert_eq!(report.outcome, CellOutcome::Error);
        assert!(!report.passed);
        assert!(session.submitted.is_empty());
    }

    #[tokio::test]
    async fn test_verbose_capture() {
        let token = ExecutionToken::from_string("t");
        let reply = || {
            Reply::Outputs(vec![
                KernelMessage::stream(&token, "stdout", "hello\n"),
                KernelMessage::stream(&token, "stderr", "careful\n"),
            ])
        };

        let verbose = RunPolicy::default().with_verbose(true);
        let (report, _) = run_cell(&verbose, &cell("x", "hello"), vec![reply()]).await;
        assert_eq!(report.stdout.as_deref(), Some("hello"));
        assert_eq!(report.stderr.as_deref(), Some("careful"));

        let (report, _) = run_cell(&verbose, &cell("#! quiet\nx", "hello"), vec![reply()]).await;
        assert!(report.stdout.is_none());

        let (report, _) =
            run_cell(&RunPolicy::default(), &cell("#! verbose\nx", "hello"), vec![reply()]).await;
        assert_eq!(report.stdout.as_deref(), Some("hello"));

        let (report, _) = run_cell(&RunPolicy::default(), &cell("x", "hello"), vec![reply()]).await;
        assert!(report.stdout.is_none());
    }

    #[tokio::test]
    async fn test_selected_types_only() {
        let policy = RunPolicy::default()
            .with_selectors(vec![OutputSelector::parse("stream.stderr").unwrap()]);
        let (report, _) = run_cell(&policy, &cell("x", "5"), vec![stdout("6")]).await;
        assert_eq!(report.outcome, CellOutcome::Success);
    }
}
