//! Run-level policy.

use std::time::Duration;

use crate::compare::OutputSelector;

/// Settings that apply to a whole notebook run.
///
/// Cell directives override the per-cell parts of the policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPolicy {
    /// Timeout for each wait on the interpreter
    pub default_timeout: Duration,
    /// Extra attempts after a cell times out
    pub max_retries_on_timeout: u32,
    /// Fresh-session restarts allowed after a hard fail
    pub max_notebook_restarts: u32,
    /// Whether a diff fails a cell that has no `strict`/`lazy` directive
    pub strict_by_default: bool,
    /// Whether an unresolved timeout passes
    pub pass_if_timeout_by_default: bool,
    /// Stop the run at the first hard fail once no restart is left
    pub abort_on_fail: bool,
    /// Output types compared, in priority order
    pub enabled_output_selectors: Vec<OutputSelector>,
    /// Code run at the start of every pass, before the first cell
    pub eval_preamble: Option<String>,
    /// Capture fresh stdout/stderr text for every cell
    pub verbose: bool,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(300),
            max_retries_on_timeout: 2,
            max_notebook_restarts: 0,
            strict_by_default: false,
            pass_if_timeout_by_default: false,
            abort_on_fail: false,
            enabled_output_selectors: OutputSelector::defaults(),
            eval_preamble: None,
            verbose: false,
        }
    }
}

impl RunPolicy {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries_on_timeout = retries;
        self
    }

    pub fn with_max_restarts(mut self, restarts: u32) -> Self {
        self.max_notebook_restarts = restarts;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict_by_default = strict;
        self
    }

    pub fn with_pass_if_timeout(mut self, pass: bool) -> Self {
        self.pass_if_timeout_by_default = pass;
        self
    }

    pub fn with_abort_on_fail(mut self, abort: bool) -> Self {
        self.abort_on_fail = abort;
        self
    }

    pub fn with_selectors(mut self, selectors: Vec<OutputSelector>) -> Self {
        self.enabled_output_selectors = selectors;
        self
    }

    pub fn with_preamble(mut self, code: impl Into<String>) -> Self {
        self.eval_preamble = Some(code.into());
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}
