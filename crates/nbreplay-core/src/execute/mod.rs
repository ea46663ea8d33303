//! Cell and notebook execution.
//!
//! [`NotebookRunner`] walks the code cells in document order and hands each
//! one to a [`CellRunner`], which owns timeouts, retries and the verdict.
//! The notebook runner owns the restart budget and the tally.

mod cell;
mod notebook;

pub use cell::{CellFailure, CellReport, CellRunner, CellState};
pub use notebook::{
    NoopCallback, NotebookRunState, NotebookRunner, RunCallback, RunSummary, cell_label,
};
