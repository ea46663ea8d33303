//! Console reporting of a notebook run.
//!
//! Prints one line per code cell as it finishes, optional error, diff and
//! output blocks below it, and a results table at the end of every pass.
//! On Travis CI the blocks are wrapped in `travis_fold` markers so the log
//! collapses them.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use nbreplay_core::{CellFailure, CellOutcome, CellReport, NotebookRunState, RunCallback};

use crate::colors::{self, BOLD, CYAN, GREEN, RED, YELLOW, paint};

/// Collapsible log sections, as understood by Travis CI.
#[derive(Debug)]
struct FoldMarkers {
    enabled: bool,
    prefix: String,
    counts: HashMap<String, u32>,
}

impl FoldMarkers {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            prefix: format!("{:x}", std::process::id()),
            counts: HashMap::new(),
        }
    }

    fn id(&self, name: &str) -> String {
        let count = self.counts.get(name).copied().unwrap_or(0);
        format!("{}.{}.{}", self.prefix, name.to_lowercase(), count)
    }

    fn open(&mut self, name: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        *self.counts.entry(name.to_string()).or_insert(0) += 1;
        Some(format!("travis_fold:start:{}", self.id(name)))
    }

    fn close(&self, name: &str) -> Option<String> {
        self.enabled
            .then(|| format!("travis_fold:end:{}", self.id(name)))
    }
}

/// Writes run progress to a terminal.
pub struct ConsoleReporter<W: Write> {
    out: W,
    show_diff: bool,
    folds: FoldMarkers,
}

impl ConsoleReporter<io::Stdout> {
    /// Reporter on stdout. Fold markers are written when `TRAVIS` is set.
    pub fn stdout(show_diff: bool) -> Self {
        let travis = std::env::var_os("TRAVIS").is_some_and(|v| !v.is_empty());
        Self::new(io::stdout(), show_diff, travis)
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W, show_diff: bool, travis: bool) -> Self {
        Self {
            out,
            show_diff,
            folds: FoldMarkers::new(travis),
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }

    /// Print the banner for the notebook at `path`.
    pub fn print_header(&mut self, path: &Path) {
        self.fold_open("ipynb");
        self.line(format!(
            "{}testing notebook : \"{}\"{}",
            BOLD,
            path.display(),
            colors::RESET
        ));
    }

    fn write(&mut self, text: impl std::fmt::Display) {
        write!(self.out, "{}", text).ok();
        self.out.flush().ok();
    }

    fn line(&mut self, text: impl std::fmt::Display) {
        writeln!(self.out, "{}", text).ok();
    }

    fn fold_open(&mut self, name: &str) {
        if let Some(marker) = self.folds.open(name) {
            self.line(marker);
        }
    }

    fn fold_close(&mut self, name: &str) {
        if let Some(marker) = self.folds.close(name) {
            self.line(marker);
        }
    }

    /// Print `text` indented under a header line.
    fn block(&mut self, fold: &str, header: String, text: &str) {
        self.fold_open(fold);
        self.line(header);
        for line in text.lines() {
            self.line(format!("    {}", line));
        }
        self.fold_close(fold);
    }

    fn print_failure(&mut self, failure: &CellFailure) {
        match failure {
            CellFailure::Raised {
                ename,
                evalue,
                traceback,
            } => {
                self.fold_open("ipynb.error");
                self.line(paint(RED, format!(">>> {} (\"{}\")", ename, evalue)));
                for line in traceback {
                    self.line(format!("    {}", line));
                }
                self.fold_close("ipynb.error");
            }
            CellFailure::Message(message) => {
                self.fold_open("ipynb.kernel");
                self.line(paint(RED, format!(">>> {}", message)));
                self.fold_close("ipynb.kernel");
            }
        }
    }

    fn print_diff(&mut self, diff: &str) {
        self.fold_open("ipynb.diff");
        for line in diff.lines() {
            match line.chars().next() {
                Some('-') => self.line(paint(RED, line)),
                Some('+') => self.line(paint(GREEN, line)),
                Some('>') => self.line(paint(CYAN, line)),
                _ => self.line(line),
            }
        }
        self.fold_close("ipynb.diff");
    }

    fn print_captured(&mut self, report: &CellReport) {
        if let Some(stdout) = report.stdout.as_deref().filter(|s| !s.is_empty()) {
            let header = paint(CYAN, format!(">>> stdout / result text {}", line_count(stdout)));
            self.block("ipynb.out", header, stdout);
        }
        if let Some(stderr) = report.stderr.as_deref().filter(|s| !s.is_empty()) {
            let header = paint(RED, format!(">>> stderr / result text {}", line_count(stderr)));
            self.block("ipynb.err", header, stderr);
        }
    }
}

fn line_count(text: &str) -> String {
    match text.lines().count() {
        1 => "[1 line]".to_string(),
        n => format!("[{} lines]", n),
    }
}

impl<W: Write + Send> RunCallback for ConsoleReporter<W> {
    fn on_pass_started(&mut self, attempt: u32) {
        self.line(paint(CYAN, format!("starting interpreter, pass #{}", attempt)));
        self.line("");
    }

    fn on_markdown(&mut self, source: &str) {
        for line in source.lines() {
            if line.starts_with('#') && !line.starts_with("#!") {
                self.line(paint(BOLD, line));
            }
        }
    }

    fn on_cell_started(&mut self, label: &str) {
        self.write(format!("{} ... ", label));
    }

    fn on_cell_finished(&mut self, report: &CellReport) {
        for retry in 1..=report.retries {
            self.write(paint(YELLOW, format!("timeout [retry #{}] ", retry)));
        }
        if let Some(cause) = report.cause {
            self.write(format!("{} / ", cause.as_str()));
        }

        let verdict = if report.passed {
            paint(GREEN, "ok")
        } else {
            paint(RED, "fail")
        };
        self.line(format!("{} [{}]", verdict, report.outcome));

        if let Some(failure) = &report.failure {
            self.print_failure(failure);
        }
        if self.show_diff {
            if let Some(diff) = &report.diff {
                self.print_diff(&diff.to_string());
            }
        }
        self.print_captured(report);
    }

    fn on_pass_finished(&mut self, state: &NotebookRunState, restarting: bool, elapsed: Duration) {
        let tally = &state.tally;

        self.line("");
        if state.abort_requested {
            self.line(paint(CYAN, "aborting tests!"));
            self.line("");
        }
        self.line(format!(
            "{}  testing results ({:5.3} seconds){}",
            BOLD,
            elapsed.as_secs_f64(),
            colors::RESET
        ));
        self.line("  ================================");
        self.line(format!(
            "    {:3} cells passed [{}]",
            tally.passed(),
            paint(GREEN, "ok")
        ));
        self.line(format!(
            "    {:3} cells failed [{}]",
            tally.failed(),
            paint(RED, "fail")
        ));
        self.line("");
        for outcome in CellOutcome::ALL {
            self.line(format!(
                "  {:3} {} [{}]",
                tally.count(outcome),
                outcome.description(),
                outcome
            ));
        }
        self.line("");

        if restarting {
            self.line(paint(
                RED,
                format!(
                    "  attempt #{} of max {} failed, restarting notebook!",
                    state.run_attempt,
                    state.max_passes()
                ),
            ));
            self.line("");
        } else {
            self.fold_close("ipynb");
        }
    }
}
