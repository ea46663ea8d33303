//! Outcome counters for one notebook pass.

use std::fmt;

/// Terminal classification of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellOutcome {
    /// Replicated the stored outputs
    Success,
    /// Ran, but the outputs differ
    Diff,
    /// The code raised
    Error,
    /// No idle signal within the timeout, on every attempt
    Timeout,
    /// The interpreter failed independently of the code
    SessionFailure,
    /// Not executed because of a `skip` directive
    Skip,
    /// Executed without being held to its result
    Ignore,
}

impl CellOutcome {
    /// All outcomes, in report order.
    pub const ALL: [CellOutcome; 7] = [
        CellOutcome::Success,
        CellOutcome::Diff,
        CellOutcome::Timeout,
        CellOutcome::Error,
        CellOutcome::Ignore,
        CellOutcome::SessionFailure,
        CellOutcome::Skip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CellOutcome::Success => "success",
            CellOutcome::Diff => "diff",
            CellOutcome::Error => "error",
            CellOutcome::Timeout => "timeout",
            CellOutcome::SessionFailure => "kernel",
            CellOutcome::Skip => "skip",
            CellOutcome::Ignore => "ignore",
        }
    }

    /// Summary line wording.
    pub fn description(&self) -> &'static str {
        match self {
            CellOutcome::Success => "cells successfully replicated",
            CellOutcome::Diff => "cells had mismatched outputs",
            CellOutcome::Error => "cells ran with errors",
            CellOutcome::Timeout => "cells timed out during execution",
            CellOutcome::SessionFailure => "cells failed to even run (interpreter error)",
            CellOutcome::Skip => "cells have been skipped",
            CellOutcome::Ignore => "cells have been run without comparison",
        }
    }

    fn index(self) -> usize {
        match self {
            CellOutcome::Success => 0,
            CellOutcome::Diff => 1,
            CellOutcome::Timeout => 2,
            CellOutcome::Error => 3,
            CellOutcome::Ignore => 4,
            CellOutcome::SessionFailure => 5,
            CellOutcome::Skip => 6,
        }
    }
}

impl fmt::Display for CellOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts per outcome plus passed/failed totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultTally {
    counts: [usize; 7],
    passed: usize,
    failed: usize,
}

impl ResultTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a terminal outcome.
    pub fn record(&mut self, outcome: CellOutcome, passed: bool) {
        self.counts[outcome.index()] += 1;
        if passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn count(&self, outcome: CellOutcome) -> usize {
        self.counts[outcome.index()]
    }

    pub fn passed(&self) -> usize {
        self.passed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed
    }

    /// Forget everything recorded so far.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Whether no recorded cell failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}
