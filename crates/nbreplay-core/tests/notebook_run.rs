//! Integration tests for whole-notebook runs.
//!
//! Drives `NotebookRunner` against a scripted in-process kernel that answers
//! over a `ChannelSession`, one fresh kernel per pass.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nbreplay_core::{
    Cell, CellOutcome, CellReport, ChannelSession, Error, KernelEndpoint, KernelMessage,
    Notebook, NotebookRunner, OutputRecord, OutputSelector, Result, RunCallback, RunPolicy,
    SessionFactory,
};

// =============================================================================
// Test Helpers
// =============================================================================

/// What the kernel does with one submission.
enum Reply {
    Stdout(&'static str),
    /// Finish without any output
    Silent,
    Raise(&'static str),
    Hang,
    Die,
}

type Script = Arc<dyn Fn(u32, &str) -> Reply + Send + Sync>;
type SubmissionLog = Arc<Mutex<Vec<(u32, String)>>>;

/// Starts a scripted kernel for every pass and logs `(pass, code)` submissions.
struct ScriptedFactory {
    script: Script,
    passes: Arc<AtomicU32>,
    log: SubmissionLog,
}

impl ScriptedFactory {
    fn new(script: Script) -> (Self, SubmissionLog) {
        let log = SubmissionLog::default();
        let factory = Self {
            script,
            passes: Arc::new(AtomicU32::new(0)),
            log: log.clone(),
        };
        (factory, log)
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    type Session = ChannelSession;

    async fn open(&mut self) -> Result<ChannelSession> {
        let pass = self.passes.fetch_add(1, Ordering::SeqCst) + 1;
        let (session, endpoint) = ChannelSession::pair();
        tokio::spawn(kernel(pass, endpoint, self.script.clone(), self.log.clone()));
        Ok(session)
    }
}

async fn kernel(pass: u32, mut endpoint: KernelEndpoint, script: Script, log: SubmissionLog) {
    while let Some(request) = endpoint.requests.recv().await {
        log.lock().unwrap().push((pass, request.code.clone()));

        let token = &request.msg_id;
        let _ = endpoint.messages.send(KernelMessage::busy(token));
        match script(pass, &request.code) {
            Reply::Stdout(text) => {
                let _ = endpoint
                    .messages
                    .send(KernelMessage::stream(token, "stdout", text));
                let _ = endpoint.messages.send(KernelMessage::idle(token));
            }
            Reply::Raise(ename) => {
                let _ = endpoint
                    .messages
                    .send(KernelMessage::error(token, ename, "boom", &["Traceback"]));
                let _ = endpoint.messages.send(KernelMessage::idle(token));
            }
            Reply::Silent => {
                let _ = endpoint.messages.send(KernelMessage::idle(token));
            }
            Reply::Hang => {}
            Reply::Die => return,
        }
    }
}

/// Records callback events as strings.
#[derive(Clone, Default)]
struct RecordingCallback {
    events: Arc<Mutex<Vec<String>>>,
}

impl RunCallback for RecordingCallback {
    fn on_pass_started(&mut self, attempt: u32) {
        self.events.lock().unwrap().push(format!("pass {}", attempt));
    }

    fn on_markdown(&mut self, source: &str) {
        self.events.lock().unwrap().push(format!("markdown {}", source));
    }

    fn on_cell_finished(&mut self, report: &CellReport) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{} {}", report.label, report.outcome));
    }
}

fn stdout_cell(source: &str, count: u32, stored: &str) -> Cell {
    Cell::code(source)
        .with_execution_count(count)
        .with_outputs(vec![OutputRecord::stdout(stored)])
}

/// Kernel that prints the number after `print ` in each submission.
fn echo(_pass: u32, code: &str) -> Reply {
    match code.trim_start_matches("print ") {
        "1" => Reply::Stdout("1\n"),
        "2" => Reply::Stdout("2\n"),
        "3" => Reply::Stdout("3\n"),
        "4" => Reply::Stdout("4\n"),
        _ => Reply::Silent,
    }
}

fn four_cells() -> Notebook {
    Notebook::new(
        "ipynb.four",
        (1..=4)
            .map(|i| stdout_cell(&format!("print {}", i), i, &format!("{}\n", i)))
            .collect(),
    )
}

fn policy() -> RunPolicy {
    RunPolicy::default().with_timeout(Duration::from_secs(1))
}

fn outcomes(reports: &[CellReport]) -> Vec<CellOutcome> {
    reports.iter().map(|r| r.outcome).collect()
}

fn submissions(log: &SubmissionLog, pass: u32) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|(p, _)| *p == pass)
        .map(|(_, code)| code.clone())
        .collect()
}

// =============================================================================
// Runs
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_replicated_and_mismatched_output() {
    let (factory, _log) = ScriptedFactory::new(Arc::new(|_pass: u32, code: &str| match code {
        "print(2+3)" => Reply::Stdout("5\n"),
        _ => Reply::Stdout("6\n"),
    }));
    let notebook = Notebook::new(
        "ipynb.arith",
        vec![
            stdout_cell("print(2+3)", 1, "5\n"),
            stdout_cell("print(3+3)", 2, "5\n"),
        ],
    );

    let mut runner = NotebookRunner::new(policy(), factory).unwrap();
    let summary = runner.run(&notebook).await.unwrap();

    assert_eq!(
        outcomes(&summary.state.reports),
        vec![CellOutcome::Success, CellOutcome::Diff]
    );
    assert!(summary.state.reports[1].diff.is_some());
    assert!(summary.passed());
}

#[tokio::test(start_paused = true)]
async fn test_strict_run_fails_on_diff() {
    let (factory, _log) = ScriptedFactory::new(Arc::new(|_pass: u32, _code: &str| {
        Reply::Stdout("6\n")
    }));
    let notebook = Notebook::new("ipynb.arith", vec![stdout_cell("print(2+3)", 1, "5\n")]);

    let mut runner = NotebookRunner::new(policy().with_strict(true), factory).unwrap();
    let summary = runner.run(&notebook).await.unwrap();

    assert_eq!(summary.state.tally.count(CellOutcome::Diff), 1);
    assert!(!summary.passed());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_retry_budget() {
    let (factory, log) = ScriptedFactory::new(Arc::new(|_pass: u32, code: &str| match code {
        "loop" => Reply::Hang,
        _ => Reply::Silent,
    }));
    let notebook = Notebook::new(
        "ipynb.slow",
        vec![Cell::code("loop").with_execution_count(1), Cell::code("after")],
    );

    let mut runner = NotebookRunner::new(policy().with_max_retries(2), factory).unwrap();
    let summary = runner.run(&notebook).await.unwrap();

    assert_eq!(submissions(&log, 1), vec!["loop", "loop", "loop", "after"]);
    let report = &summary.state.reports[0];
    assert_eq!(report.outcome, CellOutcome::Timeout);
    assert_eq!(report.attempts, 3);
    // Cells after an unresolved timeout still run.
    assert_eq!(summary.state.reports[1].outcome, CellOutcome::Success);
    assert!(!summary.passed());
}

#[tokio::test]
async fn test_huge_timeout_directive_still_runs_cell() {
    let (factory, _log) = ScriptedFactory::new(Arc::new(|_pass: u32, code: &str| {
        if code.ends_with("print(2+3)") {
            Reply::Stdout("5\n")
        } else {
            Reply::Silent
        }
    }));
    let notebook = Notebook::new(
        "ipynb.patient",
        vec![stdout_cell("#! timeout:10000000000000000000\nprint(2+3)", 1, "5\n")],
    );

    let mut runner = NotebookRunner::new(policy(), factory).unwrap();
    let summary = runner.run(&notebook).await.unwrap();

    assert_eq!(outcomes(&summary.state.reports), vec![CellOutcome::Success]);
    assert!(summary.passed());
}

#[tokio::test(start_paused = true)]
async fn test_single_restart_with_cleared_tally() {
    let (factory, log) = ScriptedFactory::new(Arc::new(|pass: u32, code: &str| match code {
        "print 3" => Reply::Raise("ValueError"),
        other => echo(pass, other),
    }));

    let mut runner = NotebookRunner::new(policy().with_max_restarts(1), factory).unwrap();
    let summary = runner.run(&four_cells()).await.unwrap();

    // First pass abandons the cells after the hard fail.
    assert_eq!(submissions(&log, 1), vec!["print 1", "print 2", "print 3"]);
    // The second pass does not restart again and runs to the end.
    assert_eq!(
        submissions(&log, 2),
        vec!["print 1", "print 2", "print 3", "print 4"]
    );
    assert!(submissions(&log, 3).is_empty());

    assert_eq!(summary.state.run_attempt, 2);
    assert_eq!(summary.state.tally.count(CellOutcome::Success), 3);
    assert_eq!(summary.state.tally.count(CellOutcome::Error), 1);
    assert_eq!(summary.state.tally.total(), 4);
    assert!(!summary.passed());
}

#[tokio::test(start_paused = true)]
async fn test_restart_recovers() {
    let (factory, _log) = ScriptedFactory::new(Arc::new(|pass: u32, code: &str| {
        if pass == 1 && code == "print 2" {
            Reply::Raise("FlakyError")
        } else {
            echo(pass, code)
        }
    }));

    let mut runner = NotebookRunner::new(policy().with_max_restarts(3), factory).unwrap();
    let summary = runner.run(&four_cells()).await.unwrap();

    assert_eq!(summary.state.run_attempt, 2);
    assert_eq!(summary.state.tally.count(CellOutcome::Success), 4);
    assert!(summary.passed());
}

#[tokio::test(start_paused = true)]
async fn test_abort_on_fail() {
    let (factory, log) = ScriptedFactory::new(Arc::new(|pass: u32, code: &str| match code {
        "print 2" => Reply::Raise("ValueError"),
        other => echo(pass, other),
    }));

    let mut runner = NotebookRunner::new(policy().with_abort_on_fail(true), factory).unwrap();
    let summary = runner.run(&four_cells()).await.unwrap();

    assert_eq!(submissions(&log, 1), vec!["print 1", "print 2"]);
    assert!(summary.state.abort_requested);
    assert_eq!(summary.state.reports.len(), 2);
    assert!(!summary.passed());
}

#[tokio::test(start_paused = true)]
async fn test_abort_waits_for_restart_budget() {
    let (factory, log) = ScriptedFactory::new(Arc::new(|pass: u32, code: &str| match code {
        "print 2" => Reply::Raise("ValueError"),
        other => echo(pass, other),
    }));

    let policy = policy().with_abort_on_fail(true).with_max_restarts(1);
    let mut runner = NotebookRunner::new(policy, factory).unwrap();
    let summary = runner.run(&four_cells()).await.unwrap();

    assert_eq!(submissions(&log, 1), vec!["print 1", "print 2"]);
    assert_eq!(submissions(&log, 2), vec!["print 1", "print 2"]);
    assert_eq!(summary.state.run_attempt, 2);
    assert!(summary.state.abort_requested);
}

#[tokio::test(start_paused = true)]
async fn test_length_mismatch_is_a_diff() {
    let (factory, _log) = ScriptedFactory::new(Arc::new(|_pass: u32, _code: &str| {
        Reply::Stdout("A\n")
    }));
    let cell = Cell::code("show()").with_execution_count(1).with_outputs(vec![
        OutputRecord::stdout("A\n"),
        OutputRecord::plain_result(Some(1), "B"),
    ]);

    let mut runner = NotebookRunner::new(policy(), factory).unwrap();
    let summary = runner
        .run(&Notebook::new("ipynb.mismatch", vec![cell]))
        .await
        .unwrap();

    let report = &summary.state.reports[0];
    assert_eq!(report.outcome, CellOutcome::Diff);
    let diff = report.diff.as_ref().unwrap().to_string();
    assert!(diff.contains("2 vs 1"));
    assert!(diff.contains("---"));
}

#[tokio::test(start_paused = true)]
async fn test_dead_kernel_is_session_failure() {
    let (factory, _log) = ScriptedFactory::new(Arc::new(|_pass: u32, code: &str| match code {
        "crash" => Reply::Die,
        _ => Reply::Silent,
    }));
    let notebook = Notebook::new(
        "ipynb.crash",
        vec![Cell::code("crash"), Cell::code("after")],
    );

    let mut runner = NotebookRunner::new(policy(), factory).unwrap();
    let summary = runner.run(&notebook).await.unwrap();

    assert_eq!(
        outcomes(&summary.state.reports),
        vec![CellOutcome::SessionFailure, CellOutcome::SessionFailure]
    );
    assert_eq!(summary.state.tally.failed(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_preamble_runs_every_pass() {
    let (factory, log) = ScriptedFactory::new(Arc::new(|pass: u32, code: &str| match code {
        "setup" => Reply::Raise("ImportError"),
        "print 1" if pass == 1 => Reply::Raise("ValueError"),
        other => echo(pass, other),
    }));
    let notebook = Notebook::new("ipynb.pre", vec![stdout_cell("print 1", 1, "1\n")]);

    let policy = policy().with_preamble("setup").with_max_restarts(1);
    let mut runner = NotebookRunner::new(policy, factory).unwrap();
    let summary = runner.run(&notebook).await.unwrap();

    assert_eq!(submissions(&log, 1), vec!["setup", "print 1"]);
    assert_eq!(submissions(&log, 2), vec!["setup", "print 1"]);
    // The preamble is not a cell.
    assert_eq!(summary.state.tally.total(), 1);
    assert!(summary.passed());
}

#[tokio::test(start_paused = true)]
async fn test_dead_kernel_during_preamble_is_an_error() {
    let (factory, _log) = ScriptedFactory::new(Arc::new(|_pass: u32, _code: &str| Reply::Die));
    let notebook = Notebook::new("ipynb.pre", vec![Cell::code("x")]);

    let mut runner = NotebookRunner::new(policy().with_preamble("setup"), factory).unwrap();
    let err = runner.run(&notebook).await.unwrap_err();
    assert!(err.is_session_failure());
}

#[tokio::test(start_paused = true)]
async fn test_non_code_and_blank_cells_are_not_tallied() {
    let (factory, log) = ScriptedFactory::new(Arc::new(echo));
    let notebook = Notebook::new(
        "ipynb.mixed",
        vec![
            Cell::markdown("# Title"),
            Cell::code("  \n"),
            Cell::raw("raw text"),
            stdout_cell("#! skip\nprint 9", 2, "9\n"),
            stdout_cell("print 1", 3, "1\n"),
        ],
    );

    let callback = RecordingCallback::default();
    let events = callback.events.clone();
    let mut runner = NotebookRunner::new(policy(), factory).unwrap();
    runner.set_callback(callback);
    let summary = runner.run(&notebook).await.unwrap();

    assert_eq!(submissions(&log, 1), vec!["print 1"]);
    assert_eq!(summary.state.tally.total(), 2);
    assert_eq!(summary.state.tally.count(CellOutcome::Skip), 1);
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "pass 1".to_string(),
            "markdown # Title".to_string(),
            "ipynb.mixed.In [  2] skip".to_string(),
            "ipynb.mixed.In [  3] success".to_string(),
        ]
    );
}

#[test]
fn test_unknown_selector_is_rejected() {
    let (factory, _log) = ScriptedFactory::new(Arc::new(echo));
    let policy = RunPolicy::default().with_selectors(vec![
        OutputSelector::parse("display_data.application/json").unwrap(),
    ]);

    let err = NotebookRunner::new(policy, factory).err().unwrap();
    assert!(matches!(err, Error::UnknownSelector(_)));
}
