//! Jupyter notebook (.ipynb) reading.
//!
//! Only nbformat 4 documents are understood.

use std::fs;
use std::path::Path;

use nbreplay_core::{Cell, CellType, MimeBundle, Notebook, OutputRecord};
use serde::Deserialize;

use crate::error::{IpynbError, IpynbResult};

/// The only supported major format version.
pub const SUPPORTED_NBFORMAT: u64 = 4;

/// A Jupyter notebook.
#[derive(Debug, Clone, Deserialize)]
pub struct JupyterNotebook {
    /// Format version
    pub nbformat: u32,

    /// Minor format version
    #[serde(default)]
    pub nbformat_minor: u32,

    /// Notebook metadata, kept opaque
    #[serde(default)]
    pub metadata: serde_json::Value,

    /// Notebook cells
    #[serde(default)]
    pub cells: Vec<JupyterCell>,
}

/// A Jupyter cell.
#[derive(Debug, Clone, Deserialize)]
pub struct JupyterCell {
    /// Cell type (`code`, `markdown`, `raw`)
    pub cell_type: String,

    /// Cell source
    #[serde(default)]
    pub source: Option<MultilineText>,

    /// Cell outputs (code cells)
    #[serde(default)]
    pub outputs: Vec<JupyterOutput>,

    /// Execution count (code cells)
    #[serde(default)]
    pub execution_count: Option<u32>,
}

/// Text stored either as one string or as a list of lines.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MultilineText {
    Text(String),
    Lines(Vec<String>),
}

impl MultilineText {
    /// Join into a single string.
    pub fn into_string(self) -> String {
        match self {
            MultilineText::Text(text) => text,
            MultilineText::Lines(lines) => lines.concat(),
        }
    }
}

/// Cell output.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "output_type")]
pub enum JupyterOutput {
    /// Standard output/error
    #[serde(rename = "stream")]
    Stream { name: String, text: MultilineText },

    /// Result of the cell's last expression
    #[serde(rename = "execute_result")]
    ExecuteResult {
        #[serde(default)]
        execution_count: Option<u32>,
        #[serde(default)]
        data: MimeBundle,
        #[serde(default)]
        metadata: serde_json::Value,
    },

    /// Display data
    #[serde(rename = "display_data")]
    DisplayData {
        #[serde(default)]
        data: MimeBundle,
        #[serde(default)]
        metadata: serde_json::Value,
    },

    /// Error output
    #[serde(rename = "error")]
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },

    /// Output types that are never compared
    #[serde(other)]
    Other,
}

impl JupyterOutput {
    fn into_record(self) -> Option<OutputRecord> {
        match self {
            JupyterOutput::Stream { name, text } => Some(OutputRecord::Stream {
                name,
                text: text.into_string(),
            }),
            JupyterOutput::ExecuteResult {
                execution_count,
                data,
                metadata,
            } => Some(OutputRecord::ExecuteResult {
                execution_count,
                data,
                metadata,
            }),
            JupyterOutput::DisplayData { data, metadata } => {
                Some(OutputRecord::DisplayData { data, metadata })
            }
            JupyterOutput::Error {
                ename,
                evalue,
                traceback,
            } => Some(OutputRecord::Error {
                ename,
                evalue,
                traceback,
            }),
            JupyterOutput::Other => None,
        }
    }
}

impl JupyterCell {
    fn into_cell(self) -> Cell {
        let cell_type = match self.cell_type.as_str() {
            "code" => CellType::Code,
            "markdown" => CellType::Markdown,
            "raw" => CellType::Raw,
            other => {
                tracing::warn!("Treating unknown cell type `{}` as raw", other);
                CellType::Raw
            }
        };

        Cell {
            cell_type,
            source: self.source.map(MultilineText::into_string),
            outputs: self
                .outputs
                .into_iter()
                .filter_map(JupyterOutput::into_record)
                .collect(),
            execution_count: self.execution_count,
        }
    }
}

impl JupyterNotebook {
    /// Parse a notebook from its JSON text.
    ///
    /// Documents with a major format version other than 4 are rejected.
    pub fn parse(content: &str) -> IpynbResult<Self> {
        let value: serde_json::Value = serde_json::from_str(content)?;
        let version = value
            .get("nbformat")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| IpynbError::InvalidNotebook("missing `nbformat` version".to_string()))?;
        if version != SUPPORTED_NBFORMAT {
            return Err(IpynbError::InvalidNotebook(format!(
                "nbformat {} is not supported, only version {} is",
                version, SUPPORTED_NBFORMAT
            )));
        }

        let notebook: Self = serde_json::from_value(value)?;
        Ok(notebook)
    }

    /// Read a notebook from a file.
    pub fn read_from_file(path: impl AsRef<Path>) -> IpynbResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| IpynbError::ReadError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Convert into the replay document model.
    pub fn into_notebook(self, name: impl Into<String>) -> Notebook {
        let cells = self.cells.into_iter().map(JupyterCell::into_cell).collect();
        Notebook::new(name, cells)
    }
}
