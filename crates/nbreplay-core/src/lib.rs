//! Replay engine for notebook regression testing.
//!
//! This crate provides:
//! - The notebook document model and per-cell directives
//! - Interpreter sessions (in-process channels, bridge processes)
//! - Output collection from interpreter messages
//! - Typed output comparison with sanitizing and diffs
//! - Cell and notebook runners with timeouts, retries and restarts

pub mod collect;
pub mod compare;
pub mod directive;
pub mod error;
pub mod execute;
pub mod notebook;
pub mod policy;
pub mod session;
pub mod tally;

pub use collect::{CollectStep, OutputCollector};
pub use compare::{
    Comparison, DiffLine, DiffReport, DiffSection, DiffStrategy, DiffTag, OutputComparator,
    OutputRegistry, OutputSelector, TypedOutput, sanitize,
};
pub use directive::{DirectiveValue, Directives};
pub use error::{Error, Result};
pub use execute::{
    CellFailure, CellReport, CellRunner, CellState, NoopCallback, NotebookRunState,
    NotebookRunner, RunCallback, RunSummary, cell_label,
};
pub use notebook::{Cell, CellType, MimeBundle, Notebook, OutputKind, OutputRecord};
pub use policy::RunPolicy;
pub use session::{
    ChannelSession, ExecuteRequest, ExecutionToken, InterpreterSession, KernelEndpoint,
    KernelMessage, ProcessSession, ProcessSessionFactory, SessionFactory,
};
pub use tally::{CellOutcome, ResultTally};
