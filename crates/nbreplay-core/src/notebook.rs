//! Notebook document model.
//!
//! An already-parsed notebook is an ordered list of [`Cell`]s. Code cells carry
//! the outputs recorded when the notebook was last saved; those are what a
//! replay is verified against.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a notebook cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Code,
    Markdown,
    Raw,
}

/// A single notebook cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    /// Cell kind
    pub cell_type: CellType,
    /// Cell source. `None` when the document had no source for the cell.
    pub source: Option<String>,
    /// Outputs recorded in the document
    pub outputs: Vec<OutputRecord>,
    /// Execution count recorded in the document
    pub execution_count: Option<u32>,
}

impl Cell {
    /// Create a code cell with no stored outputs.
    pub fn code(source: impl Into<String>) -> Self {
        Self {
            cell_type: CellType::Code,
            source: Some(source.into()),
            outputs: Vec::new(),
            execution_count: None,
        }
    }

    /// Create a markdown cell.
    pub fn markdown(source: impl Into<String>) -> Self {
        Self {
            cell_type: CellType::Markdown,
            source: Some(source.into()),
            outputs: Vec::new(),
            execution_count: None,
        }
    }

    /// Create a raw cell.
    pub fn raw(source: impl Into<String>) -> Self {
        Self {
            cell_type: CellType::Raw,
            source: Some(source.into()),
            outputs: Vec::new(),
            execution_count: None,
        }
    }

    /// Set the stored outputs.
    pub fn with_outputs(mut self, outputs: Vec<OutputRecord>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Set the stored execution count.
    pub fn with_execution_count(mut self, count: u32) -> Self {
        self.execution_count = Some(count);
        self
    }

    /// Whether this is a code cell.
    pub fn is_code(&self) -> bool {
        self.cell_type == CellType::Code
    }

    /// Whether the cell has source consisting only of whitespace.
    ///
    /// A cell without any source is not blank; it is malformed.
    pub fn is_blank(&self) -> bool {
        self.source.as_deref().is_some_and(|s| s.trim().is_empty())
    }
}

/// An ordered sequence of cells plus the name used to label them.
#[derive(Debug, Clone, PartialEq)]
pub struct Notebook {
    /// Display name used as the prefix of cell labels
    pub name: String,
    /// Cells in document order
    pub cells: Vec<Cell>,
}

impl Notebook {
    /// Create a notebook.
    pub fn new(name: impl Into<String>, cells: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            cells,
        }
    }

    /// Number of code cells.
    pub fn code_cell_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_code()).count()
    }
}

/// Mime type to payload mapping of a rich output.
///
/// Payloads are kept as JSON values: documents store text as either a string
/// or a list of line strings, and `application/json` payloads are objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MimeBundle(pub BTreeMap<String, serde_json::Value>);

impl MimeBundle {
    /// Create an empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a payload.
    pub fn with(mut self, mime: impl Into<String>, payload: impl Into<serde_json::Value>) -> Self {
        self.0.insert(mime.into(), payload.into());
        self
    }

    /// Whether a payload for `mime` is present.
    pub fn contains(&self, mime: &str) -> bool {
        self.0.contains_key(mime)
    }

    /// Payload for `mime` as text.
    ///
    /// Line lists are joined; non-string payloads are rendered as JSON.
    pub fn text(&self, mime: &str) -> Option<String> {
        self.0.get(mime).map(payload_text)
    }
}

/// Render a mime payload as a single string.
fn payload_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) if items.iter().all(|v| v.is_string()) => items
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<String>(),
        other => other.to_string(),
    }
}

/// Category of an output record, named as in the notebook format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutputKind {
    Stream,
    DisplayData,
    ExecuteResult,
    Error,
}

impl OutputKind {
    /// Name of the kind as it appears in documents and messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Stream => "stream",
            OutputKind::DisplayData => "display_data",
            OutputKind::ExecuteResult => "execute_result",
            OutputKind::Error => "error",
        }
    }

    /// Parse a kind name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "stream" => Some(OutputKind::Stream),
            "display_data" => Some(OutputKind::DisplayData),
            "execute_result" => Some(OutputKind::ExecuteResult),
            "error" => Some(OutputKind::Error),
            _ => None,
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One output of a code cell.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputRecord {
    /// Text written to a named stream (`stdout`, `stderr`)
    Stream { name: String, text: String },

    /// Rich display output
    DisplayData {
        data: MimeBundle,
        metadata: serde_json::Value,
    },

    /// Value of the last expression
    ExecuteResult {
        execution_count: Option<u32>,
        data: MimeBundle,
        metadata: serde_json::Value,
    },

    /// Exception raised by the executed code
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
}

impl OutputRecord {
    /// Create a stream record.
    pub fn stream(name: impl Into<String>, text: impl Into<String>) -> Self {
        OutputRecord::Stream {
            name: name.into(),
            text: text.into(),
        }
    }

    /// Create a `stdout` stream record.
    pub fn stdout(text: impl Into<String>) -> Self {
        Self::stream("stdout", text)
    }

    /// Create an execution result carrying only `text/plain`.
    pub fn plain_result(execution_count: Option<u32>, text: impl Into<String>) -> Self {
        OutputRecord::ExecuteResult {
            execution_count,
            data: MimeBundle::new().with("text/plain", text.into()),
            metadata: serde_json::json!({}),
        }
    }

    /// Create an error record.
    pub fn error(
        ename: impl Into<String>,
        evalue: impl Into<String>,
        traceback: Vec<String>,
    ) -> Self {
        OutputRecord::Error {
            ename: ename.into(),
            evalue: evalue.into(),
            traceback,
        }
    }

    /// Kind of this record.
    pub fn kind(&self) -> OutputKind {
        match self {
            OutputRecord::Stream { .. } => OutputKind::Stream,
            OutputRecord::DisplayData { .. } => OutputKind::DisplayData,
            OutputRecord::ExecuteResult { .. } => OutputKind::ExecuteResult,
            OutputRecord::Error { .. } => OutputKind::Error,
        }
    }

    /// Mime bundle of rich outputs.
    pub fn data(&self) -> Option<&MimeBundle> {
        match self {
            OutputRecord::DisplayData { data, .. } | OutputRecord::ExecuteResult { data, .. } => {
                Some(data)
            }
            _ => None,
        }
    }

    /// Whether this record is an error raised by the executed code.
    pub fn is_error(&self) -> bool {
        matches!(self, OutputRecord::Error { .. })
    }
}
